use comms::{
    Rank,
    specs::{OptimizerSpec, SyncMode},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};

use super::{ParameterServer, Server};
use crate::{
    ServerSpec,
    optimization::{Accumulate, Adam, GradientDescent, GradientDescentWithMomentum, Optimizer},
    storage::{ShardStore, StoreHandle},
    synchronization::{BarrierPolicy, BarrierSync, NoBlockingSync, Synchronizer},
};

/// Builds `Server`s given a specification.
#[derive(Debug, Default)]
pub struct ServerBuilder;

impl ServerBuilder {
    /// Creates a new `ServerBuilder`.
    ///
    /// # Returns
    /// A new `ServerBuilder` instance.
    pub fn new() -> Self {
        Self
    }

    /// Builds a new `Server` following a spec.
    ///
    /// # Arguments
    /// * `spec` - The specification of the parameter server.
    /// * `dead` - Where the synchronizer reports workers that missed too many steps.
    ///
    /// # Returns
    /// A new type erased server.
    pub fn build<R, W>(
        &self,
        spec: ServerSpec,
        dead: mpsc::UnboundedSender<Rank>,
    ) -> Box<dyn Server<R, W>>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.resolve_optimizer(spec, dead)
    }

    /// Resolves the `Optimizer` for this server.
    ///
    /// # Arguments
    /// * `spec` - The specification for the parameter server.
    /// * `dead` - Where to report dead workers.
    ///
    /// # Returns
    /// A new server.
    fn resolve_optimizer<R, W>(
        &self,
        spec: ServerSpec,
        dead: mpsc::UnboundedSender<Rank>,
    ) -> Box<dyn Server<R, W>>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        match spec.optimizer {
            OptimizerSpec::Accumulate => self.resolve_synchronizer(spec, dead, |_| Accumulate),
            OptimizerSpec::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => {
                let factory = move |len| Adam::new(len, learning_rate, beta1, beta2, epsilon);
                self.resolve_synchronizer(spec, dead, factory)
            }
            OptimizerSpec::GradientDescent { learning_rate } => {
                let factory = move |_| GradientDescent::new(learning_rate);
                self.resolve_synchronizer(spec, dead, factory)
            }
            OptimizerSpec::GradientDescentWithMomentum {
                learning_rate,
                momentum,
            } => {
                let factory =
                    move |len| GradientDescentWithMomentum::new(len, learning_rate, momentum);
                self.resolve_synchronizer(spec, dead, factory)
            }
        }
    }

    /// Resolves the `Synchronizer` for this server.
    ///
    /// # Arguments
    /// * `spec` - The specification for the parameter server.
    /// * `dead` - Where to report dead workers.
    /// * `optimizer_factory` - Creates the optimizer of every new key.
    ///
    /// # Returns
    /// A new server.
    fn resolve_synchronizer<R, W, O, OF>(
        &self,
        spec: ServerSpec,
        dead: mpsc::UnboundedSender<Rank>,
        optimizer_factory: OF,
    ) -> Box<dyn Server<R, W>>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        O: Optimizer + Send + 'static,
        OF: Fn(usize) -> O + Send + Sync + 'static,
    {
        let store = ShardStore::new(spec.shard_id, spec.num_shards, optimizer_factory);

        match spec.sync {
            SyncMode::Sync => {
                let policy = BarrierPolicy {
                    barrier_size: spec.num_workers,
                    timeout: spec.step_timeout,
                    max_missed: spec.max_missed_steps,
                };

                let synchronizer = BarrierSync::new(policy, dead);
                self.terminate_build(spec, store, synchronizer)
            }
            SyncMode::Async => self.terminate_build(spec, store, NoBlockingSync::new()),
        }
    }

    /// Terminates the entire build and finally instanciates all the entities.
    ///
    /// # Arguments
    /// * `spec` - The specification for the parameter server.
    /// * `store` - The resolved shard store.
    /// * `synchronizer` - A resolved synchronizer.
    ///
    /// # Returns
    /// A new server.
    fn terminate_build<R, W, O, S>(
        &self,
        spec: ServerSpec,
        store: ShardStore<O>,
        synchronizer: S,
    ) -> Box<dyn Server<R, W>>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        O: Optimizer + Send + 'static,
        S: Synchronizer + Send + Sync + 'static,
    {
        let handle = StoreHandle::new(store);
        let pserver = ParameterServer::new(handle, synchronizer, spec.num_workers);
        Box::new(pserver)
    }
}
