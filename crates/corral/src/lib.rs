pub mod client;
pub mod common;
pub mod config;
pub mod server;
pub mod storage;
pub mod transfer;

pub use drover::{Map, Set};

pub type Error = crate::common::error::CorralError;
pub type Result<T> = std::result::Result<T, Error>;

// Reexport
pub use drover;
