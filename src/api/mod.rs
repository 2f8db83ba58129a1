pub mod client;
pub mod error;
pub mod logging;
#[cfg(test)]
pub mod mock_client;
pub mod stream;

pub use client::{ApiClient, ByteStream, ClientFactory, HttpClientFactory, ModelApi};
pub use error::{ProviderError, ProviderErrorKind};
