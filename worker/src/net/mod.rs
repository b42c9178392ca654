mod client;
mod kv;

pub use client::ShardClient;
pub use kv::KvClient;
