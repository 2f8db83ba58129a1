pub mod block;
pub mod builtin;
pub mod prefix;
pub mod registry;

pub use block::{parse_signature, BlockEvent, BlockStack};
pub use prefix::{CommandPrefix, DEFAULT_PREFIX, PREFIX_CHARS};
pub use registry::{
    execute, normalize_command_name, CommandRegistry, CommandSpec, Handler, Invocation, Resolution,
};
