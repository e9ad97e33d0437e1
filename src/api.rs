pub mod client;
pub mod execute;
pub mod logging;
#[cfg(test)]
pub mod mock_client;
pub mod stream;

use anyhow::Result;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

pub use client::CompletionClient;
pub use execute::ExecutionClient;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;
