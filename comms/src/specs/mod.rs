mod cluster;
mod data;
mod server;

pub use cluster::{Assignment, MemberId, ProcessKind, Registration, ShutdownReason};
pub use data::{InitHeader, PushHeader, ValueHeader};
pub use server::{OptimizerSpec, SyncMode};
