use std::io;

use comms::{
    OnoReceiver, OnoSender, ParameterKey, PushMode, Rank, RemoteErr, Tensor,
    msg::{Command, Msg, Payload},
    specs::ValueHeader,
};
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    optimization::Optimizer,
    storage::StoreHandle,
    synchronization::{StepErr, Synchronizer},
};

/// What the server answers to one request.
enum Reply {
    Ack { key: ParameterKey, version: u64 },
    Value {
        key: ParameterKey,
        tensor: Tensor,
        version: u64,
    },
    Err(RemoteErr),
    Disconnect,
}

/// The conversation with one connected worker.
pub(super) struct Session<O: Optimizer, S> {
    pub handle: StoreHandle<O>,
    pub synchronizer: S,
    pub num_workers: usize,
}

impl<O, S> Session<O, S>
where
    O: Optimizer + Send + 'static,
    S: Synchronizer,
{
    /// Serves requests until the worker disconnects.
    ///
    /// The first message must be a `Connect` with a rank in range. A worker
    /// that hangs up without disconnecting isn't an error here, the barrier
    /// and the scheduler notice it.
    pub async fn run<R, W>(self, mut rx: OnoReceiver<R>, mut tx: OnoSender<W>) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::new();

        let rank = match rx.recv_into(&mut buf).await? {
            Msg::Control(Command::Connect { rank }) if rank < self.num_workers => rank,
            msg => {
                let text = match msg {
                    Msg::Control(Command::Connect { rank }) => {
                        format!(
                            "rank {rank} is out of range for {} workers",
                            self.num_workers
                        )
                    }
                    other => format!("expected connect, got {}", other.kind()),
                };

                warn!("refusing worker session: {text}");
                tx.send(&Msg::Err(RemoteErr::Protocol(text))).await?;
                return Ok(());
            }
        };

        debug!(rank = rank; "worker session started");

        loop {
            let msg = match rx.recv_into(&mut buf).await {
                Ok(msg) => msg,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!(rank = rank; "worker hung up without disconnecting");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            match self.answer(rank, msg).await? {
                Reply::Ack { key, version } => {
                    tx.send(&Msg::Control(Command::Ack { key, version })).await?;
                }
                Reply::Value {
                    key,
                    tensor,
                    version,
                } => {
                    let header = ValueHeader {
                        key,
                        shape: tensor.shape().clone(),
                        version,
                    };

                    let encoded = tensor.encode();
                    tx.send(&Msg::Data(Payload::Value(header, encoded.values())))
                        .await?;
                }
                Reply::Err(e) => {
                    debug!(rank = rank; "request refused: {e}");
                    tx.send(&Msg::Err(e)).await?;
                }
                Reply::Disconnect => {
                    tx.send(&Msg::Control(Command::Disconnect)).await?;
                    debug!(rank = rank; "worker session closed");
                    return Ok(());
                }
            }
        }
    }

    /// Applies one request to the shard.
    ///
    /// # Returns
    /// The reply to send back, or an io error if the shard is shutting down.
    async fn answer(&self, rank: Rank, msg: Msg<'_>) -> io::Result<Reply> {
        let reply = match msg {
            Msg::Control(Command::Pull { key }) => match self.handle.pull(&key).await {
                Ok((tensor, version)) => Reply::Value {
                    key,
                    tensor,
                    version,
                },
                Err(e) => Reply::Err(e.into()),
            },
            Msg::Data(Payload::Init(header, values)) => {
                let tensor = match Tensor::from_values(header.shape, values) {
                    Ok(tensor) => tensor,
                    Err(e) => return Ok(Reply::Err(RemoteErr::Protocol(e.to_string()))),
                };

                match self.handle.init(header.key.clone(), tensor).await {
                    Ok(version) => Reply::Ack {
                        key: header.key,
                        version,
                    },
                    Err(e) => Reply::Err(e.into()),
                }
            }
            Msg::Data(Payload::Push(header, values)) => {
                let tensor = match Tensor::from_values(header.shape, values) {
                    Ok(tensor) => tensor,
                    Err(e) => return Ok(Reply::Err(RemoteErr::Protocol(e.to_string()))),
                };

                let res = match header.mode {
                    PushMode::Overwrite => self
                        .handle
                        .push(&header.key, &tensor, PushMode::Overwrite)
                        .await
                        .map_err(StepErr::from),
                    PushMode::Accumulate => {
                        self.synchronizer
                            .step(&self.handle, rank, header.step, header.key.clone(), tensor)
                            .await
                    }
                };

                match res {
                    Ok(version) => Reply::Ack {
                        key: header.key,
                        version,
                    },
                    Err(StepErr::Kv(e)) => Reply::Err(e.into()),
                    Err(StepErr::Closed) => {
                        return Err(io::Error::other(StepErr::Closed));
                    }
                }
            }
            Msg::Control(Command::Disconnect) => Reply::Disconnect,
            other => Reply::Err(RemoteErr::Protocol(format!(
                "unexpected {} message from a worker",
                other.kind()
            ))),
        };

        Ok(reply)
    }
}
