pub mod buffer;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod executor;
pub mod index;
pub mod parser;
pub mod server;
pub mod storage;
pub mod txn;
pub mod utils;
pub mod wal;

#[cfg(test)]
mod tests;

pub use config::Config;
pub use context::OpContext;
pub use engine::StorageEngine;
pub use error::{Error, Result};
