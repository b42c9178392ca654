mod config;
mod error;
pub mod optimization;
mod service;
pub mod storage;
pub mod synchronization;
mod test;

pub use config::{ServerConfig, ServerSpec};
pub use error::{Result, ServerErr};
pub use service::{ParameterServer, Server, ServerBuilder, run, serve};
