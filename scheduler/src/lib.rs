mod client;
mod config;
mod error;
mod membership;
mod scheduler;

pub use client::{MemberLink, Report, Reporter, SchedulerClient};
pub use config::{RetryPolicy, SchedulerConfig};
pub use error::{Result, SchedulerErr};
pub use membership::{MemberStatus, Membership};
pub use scheduler::{Scheduler, serve};
