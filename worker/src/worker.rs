use comms::{
    ParameterKey,
    specs::{Assignment, ProcessKind, Registration, ShutdownReason},
};
use log::{debug, error, info, warn};
use scheduler::{Report, SchedulerClient};
use tokio_util::sync::CancellationToken;

use crate::{
    Compute, Gradients, KvClient, RankRegistry, Result, WorkerConfig, WorkerErr,
    data::EpochSampler,
};

/// Where a worker is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Registering,
    Pull,
    Compute,
    Push,
    Done,
    Failed,
}

/// Infrastructure worker runtime.
///
/// Pulls the parameters of every step, hands them to the compute
/// collaborator with the next batch of its partition and pushes the
/// gradients back, until every epoch is done.
pub struct Worker<C: Compute> {
    config: WorkerConfig,
    compute: C,
    state: WorkerState,
    step: u64,
}

impl<C: Compute> Worker<C> {
    /// Creates a new idle `Worker`.
    ///
    /// # Args
    /// * `config` - The execution bounds of the worker.
    /// * `compute` - Computes the gradients of a batch.
    ///
    /// # Returns
    /// A new worker instance.
    pub fn new(config: WorkerConfig, compute: C) -> Self {
        Self {
            config,
            compute,
            state: WorkerState::Idle,
            step: 0,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// The amount of steps pushed so far.
    pub fn steps(&self) -> u64 {
        self.step
    }

    pub fn compute(&self) -> &C {
        &self.compute
    }

    fn transition(&mut self, next: WorkerState) {
        debug!(from:? = self.state, to:? = next, step = self.step; "worker state");
        self.state = next;
    }

    /// Runs the worker from registration to the cluster's shutdown.
    ///
    /// # Args
    /// * `cancel` - Cancelled when the scheduler ends the run.
    ///
    /// # Returns
    /// Why the run ended, or the `WorkerErr` that made this worker fail.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<ShutdownReason> {
        self.transition(WorkerState::Registering);

        let registration = Registration {
            kind: ProcessKind::Worker,
            host: self.config.host.clone(),
            addr: None,
        };

        let client = match SchedulerClient::register(
            &self.config.scheduler_addr,
            registration,
            self.config.retry,
        )
        .await
        {
            Ok(client) => client,
            Err(e) => {
                self.transition(WorkerState::Failed);
                return Err(e.into());
            }
        };

        let Assignment::Worker {
            rank,
            num_workers,
            servers,
        } = client.assignment().clone()
        else {
            self.transition(WorkerState::Failed);
            return Err(WorkerErr::UnexpectedAssignment(
                client.assignment().member(),
            ));
        };

        let mut link = client.into_link(self.config.heartbeat_interval, cancel.clone());
        let registry = RankRegistry::new(rank, num_workers);

        let res = tokio::select! {
            res = self.train_against(registry, &servers) => res,
            _ = cancel.cancelled() => Err(WorkerErr::Cancelled),
        };

        match &res {
            Ok(steps) => {
                info!(rank = rank, steps = *steps; "worker done");
                link.report(Report::Done);
            }
            Err(WorkerErr::Cancelled) => {
                warn!(rank = rank; "run shut down before the worker was done");
                self.transition(WorkerState::Failed);
            }
            Err(e) => {
                error!(rank = rank; "worker failed: {e}");
                link.report(Report::Failed(format!("worker {rank}: {e}")));
            }
        }

        let reason = link.wait_shutdown().await;
        link.close().await;

        match res {
            Ok(_) | Err(WorkerErr::Cancelled) => Ok(reason),
            Err(e) => Err(e),
        }
    }

    /// Connects to the shards, trains and disconnects.
    async fn train_against(&mut self, registry: RankRegistry, servers: &[String]) -> Result<u64> {
        let mut kv = match KvClient::connect(servers, registry.rank(), self.config.kv_retry).await {
            Ok(kv) => kv,
            Err(e) => {
                self.transition(WorkerState::Failed);
                return Err(e);
            }
        };

        let steps = self.train(registry, &mut kv).await?;

        if let Err(e) = kv.disconnect().await {
            warn!(rank = registry.rank(); "couldn't disconnect from the shards: {e}");
        }

        Ok(steps)
    }

    /// Trains over this worker's partition for every configured epoch.
    ///
    /// Every key is declared first with the collaborator's initial value, so
    /// every worker starts from the same parameters whoever declared them.
    ///
    /// # Args
    /// * `registry` - This worker's rank and the size of the cluster.
    /// * `kv` - The client of the sharded store.
    ///
    /// # Returns
    /// The amount of steps pushed, or the `WorkerErr` that ended training.
    pub async fn train(&mut self, registry: RankRegistry, kv: &mut KvClient) -> Result<u64> {
        match self.steps_over(registry, kv).await {
            Ok(steps) => {
                self.transition(WorkerState::Done);
                Ok(steps)
            }
            Err(e) => {
                self.transition(WorkerState::Failed);
                Err(e)
            }
        }
    }

    async fn steps_over(&mut self, registry: RankRegistry, kv: &mut KvClient) -> Result<u64> {
        let rank = registry.rank();
        let partition = registry.partition(self.compute.dataset_len())?;
        let seed = self.config.seed.map(|seed| seed.wrapping_add(rank as u64));
        let mut sampler = EpochSampler::new(partition.range(), seed);

        let initial = self.compute.initial_params();
        let keys: Vec<ParameterKey> = initial.keys().cloned().collect();

        self.transition(WorkerState::Pull);
        kv.init_all(&initial).await?;
        info!(rank = rank, keys = keys.len(), samples = partition.length(); "parameters declared");

        for epoch in 0..self.config.epochs {
            let order = sampler.epoch();

            for batch in order.chunks(self.config.batch_size.get()) {
                self.transition(WorkerState::Pull);
                let params = kv.pull_all(&keys, self.step).await?;

                self.transition(WorkerState::Compute);
                let Gradients { grads, batch_size } =
                    self.compute.compute_gradients(&params, batch)?;

                self.transition(WorkerState::Push);
                kv.push_all(&grads, self.step).await?;

                debug!(rank = rank, step = self.step, batch_size = batch_size; "step pushed");
                self.step += 1;
            }

            info!(rank = rank, epoch = epoch, steps = self.step; "epoch done");
        }

        Ok(self.step)
    }
}
