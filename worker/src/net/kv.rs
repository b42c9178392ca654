use comms::{ParameterKey, PushMode, Rank, ShardId, Tensor};
use futures::future::try_join_all;
use log::debug;
use scheduler::RetryPolicy;

use super::ShardClient;
use crate::{Params, Result, WorkerErr};

/// The worker's view of the sharded key value store.
///
/// Keys are routed to their owner with the same hash every process uses,
/// the shards are then talked to concurrently.
pub struct KvClient {
    shards: Vec<ShardClient>,
}

impl KvClient {
    /// Connects to every shard, `addrs` ordered by shard id.
    ///
    /// # Arguments
    /// * `addrs` - The address of every shard.
    /// * `rank` - This worker's rank.
    /// * `retry` - Bounds the retries of every request.
    ///
    /// # Returns
    /// A connected client or the first connection failure.
    pub async fn connect(addrs: &[String], rank: Rank, retry: RetryPolicy) -> Result<Self> {
        let shards = addrs
            .iter()
            .map(|addr| ShardClient::connect(addr.clone(), rank, retry));

        Ok(Self::new(try_join_all(shards).await?))
    }

    /// Creates a new `KvClient` over already connected shards, ordered by shard id.
    pub fn new(shards: Vec<ShardClient>) -> Self {
        Self { shards }
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// The shard that owns `key`.
    pub fn route(&self, key: &ParameterKey) -> ShardId {
        key.shard_of(self.shards.len())
    }

    /// Splits `items` by owning shard, keeping their order within each shard.
    fn group<'a, T>(
        num_shards: usize,
        items: impl IntoIterator<Item = (&'a ParameterKey, T)>,
    ) -> Vec<Vec<(&'a ParameterKey, T)>> {
        let mut groups: Vec<_> = (0..num_shards).map(|_| Vec::new()).collect();

        for (key, item) in items {
            groups[key.shard_of(num_shards)].push((key, item));
        }

        groups
    }

    /// Declares every key with its initial value.
    pub async fn init_all(&mut self, params: &Params) -> Result<()> {
        let groups = Self::group(self.shards.len(), params);

        let tasks = self.shards.iter_mut().zip(groups).map(|(shard, group)| async move {
            for (key, tensor) in group {
                let version = shard.init(key, tensor).await?;
                debug!(key:% = key, version = version; "key declared");
            }

            Ok::<_, WorkerErr>(())
        });

        try_join_all(tasks).await?;
        Ok(())
    }

    /// Pulls the latest value of every key in `keys`.
    pub async fn pull_all<'k>(
        &mut self,
        keys: impl IntoIterator<Item = &'k ParameterKey>,
        step: u64,
    ) -> Result<Params> {
        let groups = Self::group(self.shards.len(), keys.into_iter().map(|key| (key, ())));

        let tasks = self.shards.iter_mut().zip(groups).map(|(shard, group)| async move {
            let mut pulled = Vec::with_capacity(group.len());
            for (key, ()) in group {
                let (tensor, _) = shard.pull(key, step).await?;
                pulled.push((key.clone(), tensor));
            }

            Ok::<_, WorkerErr>(pulled)
        });

        Ok(try_join_all(tasks).await?.into_iter().flatten().collect())
    }

    /// Pushes one step's gradients with `Accumulate`.
    ///
    /// Returns once every shard applied the step. Keys go out in the same
    /// order on every worker, so no key waits on a push queued behind another.
    pub async fn push_all(&mut self, grads: &Params, step: u64) -> Result<()> {
        let groups = Self::group(self.shards.len(), grads);

        let tasks = self.shards.iter_mut().zip(groups).map(|(shard, group)| async move {
            for (key, grad) in group {
                shard.push(key, grad, PushMode::Accumulate, step).await?;
            }

            Ok::<_, WorkerErr>(())
        });

        try_join_all(tasks).await?;
        Ok(())
    }

    /// Overwrites the value of `key` without waiting on the other workers.
    pub async fn overwrite(
        &mut self,
        key: &ParameterKey,
        tensor: &Tensor,
        step: u64,
    ) -> Result<u64> {
        let shard = self.route(key);
        self.shards[shard].push(key, tensor, PushMode::Overwrite, step).await
    }

    /// Ends the session with every shard.
    pub async fn disconnect(self) -> Result<()> {
        try_join_all(self.shards.into_iter().map(ShardClient::disconnect)).await?;
        Ok(())
    }
}
