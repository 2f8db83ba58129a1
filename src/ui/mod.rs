mod console;
pub mod preview;

pub use console::Console;
