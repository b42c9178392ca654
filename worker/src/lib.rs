pub mod compute;
pub mod config;
pub mod data;
pub mod error;
pub mod net;
pub mod registry;
pub mod worker;

pub use compute::{Compute, Gradients, LinearRegression, Params};
pub use config::WorkerConfig;
pub use error::{Result, WorkerErr};
pub use net::{KvClient, ShardClient};
pub use registry::RankRegistry;
pub use worker::{Worker, WorkerState};
