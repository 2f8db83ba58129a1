pub mod api;
pub mod commands;
pub mod config;
pub mod input;
pub mod profiles;
pub mod session;
pub mod tokenizer;
pub mod tools;
pub mod transcript;
pub mod types;
pub mod ui;
pub mod util;

#[cfg(test)]
pub(crate) mod test_support;
