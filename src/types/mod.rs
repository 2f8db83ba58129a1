mod api_types;
mod message;

pub use api_types::*;
pub use message::*;
