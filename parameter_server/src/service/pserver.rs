use std::io;

use comms::{OnoReceiver, OnoSender};
use log::warn;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    task::JoinSet,
};

use super::{Server, session::Session};
use crate::{optimization::Optimizer, storage::StoreHandle, synchronization::Synchronizer};

/// The central server structure, it owns one shard and a session task per connected worker.
pub struct ParameterServer<O: Optimizer, S: Synchronizer> {
    tasks: JoinSet<io::Result<()>>,
    handle: StoreHandle<O>,
    synchronizer: S,
    num_workers: usize,
}

impl<O: Optimizer, S: Synchronizer> ParameterServer<O, S> {
    /// Creates a new `ParameterServer`.
    ///
    /// # Arguments
    /// * `handle` - The handle to the shard's store.
    /// * `synchronizer` - Decides when accumulated gradients are applied.
    /// * `num_workers` - The amount of workers allowed to connect.
    ///
    /// # Returns
    /// A new `ParameterServer` instance.
    pub fn new(handle: StoreHandle<O>, synchronizer: S, num_workers: usize) -> Self {
        Self {
            tasks: JoinSet::new(),
            handle,
            synchronizer,
            num_workers,
        }
    }

    /// The amount of worker sessions still running.
    pub fn sessions(&self) -> usize {
        self.tasks.len()
    }
}

impl<O, S> ParameterServer<O, S>
where
    O: Optimizer + Send + 'static,
    S: Synchronizer + Send + Sync + 'static,
{
    /// Binds a new worker to this server and spawns it's own session task.
    ///
    /// # Arguments
    /// * `rx` - The receiving end of the communication.
    /// * `tx` - The sending end of the communication.
    pub fn spawn<R, W>(&mut self, rx: OnoReceiver<R>, tx: OnoSender<W>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let session = Session {
            handle: self.handle.clone(),
            synchronizer: self.synchronizer.clone(),
            num_workers: self.num_workers,
        };

        self.tasks.spawn(session.run(rx, tx));
    }

    /// Waits for the next worker session to end.
    ///
    /// # Returns
    /// `None` if there are no sessions, otherwise how the session ended.
    pub async fn join_next(&mut self) -> Option<io::Result<()>> {
        let res = self.tasks.join_next().await?;

        Some(match res {
            Ok(res) => res,
            Err(e) if e.is_panic() => {
                Err(io::Error::other(format!("worker session panicked: {e}")))
            }
            Err(_) => Ok(()),
        })
    }

    /// Aborts every running session.
    pub async fn shutdown(&mut self) {
        let open = self.tasks.len();
        if open > 0 {
            warn!(sessions = open; "aborting open worker sessions");
        }

        self.tasks.shutdown().await;
    }
}

#[async_trait::async_trait]
impl<R, W, O, S> Server<R, W> for ParameterServer<O, S>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    O: Optimizer + Send + 'static,
    S: Synchronizer + Send + Sync + 'static,
{
    /// Indirection call to `Self::spawn`.
    fn spawn(&mut self, rx: OnoReceiver<R>, tx: OnoSender<W>) {
        self.spawn(rx, tx)
    }

    /// Indirection call to `Self::join_next`.
    async fn join_next(&mut self) -> Option<io::Result<()>> {
        self.join_next().await
    }

    /// Indirection call to `Self::shutdown`.
    async fn shutdown(&mut self) {
        self.shutdown().await
    }
}
