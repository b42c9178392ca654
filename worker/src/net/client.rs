use std::io;

use comms::{
    OnoReceiver, OnoSender, ParameterKey, PushMode, Rank, Tensor,
    msg::{Command, Msg, Payload},
    specs::{InitHeader, PushHeader},
};
use log::{debug, warn};
use scheduler::RetryPolicy;
use tokio::{
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time,
};

use crate::{Result, WorkerErr};

/// An owned copy of a shard's answer.
enum Reply {
    Ack { version: u64 },
    Value { tensor: Tensor, version: u64 },
    Disconnect,
}

struct Conn {
    rx: OnoReceiver<OwnedReadHalf>,
    tx: OnoSender<OwnedWriteHalf>,
}

/// Parameter server client wrapper for one shard.
///
/// Requests that fail for a transient network reason are sent again over a
/// fresh connection, as bounded by the retry policy. A resent push is safe,
/// the shard counts one gradient per rank and step.
pub struct ShardClient {
    addr: String,
    rank: Rank,
    retry: RetryPolicy,
    conn: Option<Conn>,
    buf: Vec<u32>,
}

impl ShardClient {
    /// Connects to a shard as the worker at `rank`.
    ///
    /// # Arguments
    /// * `addr` - The shard's address.
    /// * `rank` - This worker's rank.
    /// * `retry` - Bounds the attempts of every request.
    ///
    /// # Returns
    /// A connected client or a `WorkerErr` once the retries are exhausted.
    pub async fn connect(addr: impl Into<String>, rank: Rank, retry: RetryPolicy) -> Result<Self> {
        let mut client = Self {
            addr: addr.into(),
            rank,
            retry,
            conn: None,
            buf: Vec::new(),
        };

        let mut attempt = 0;
        while let Err(e) = client.ensure_conn().await {
            if !e.is_transient() || attempt >= retry.max_retries {
                return Err(e);
            }

            time::sleep(retry.delay(attempt)).await;
            attempt += 1;
        }

        Ok(client)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn ensure_conn(&mut self) -> Result<()> {
        if self.conn.is_none() {
            let stream = TcpStream::connect(&self.addr).await?;
            stream.set_nodelay(true)?;
            let (rx, tx) = stream.into_split();
            let (rx, mut tx) = comms::channel(rx, tx);

            tx.send(&Msg::Control(Command::Connect { rank: self.rank }))
                .await?;
            debug!(addr:% = self.addr, rank = self.rank; "connected to shard");
            self.conn = Some(Conn { rx, tx });
        }

        Ok(())
    }

    /// Sends `msg` once and reads the answer.
    async fn exchange(&mut self, msg: &Msg<'_>, step: u64) -> Result<Reply> {
        self.ensure_conn().await?;
        let Some(conn) = self.conn.as_mut() else {
            return Err(WorkerErr::Io(io::ErrorKind::NotConnected.into()));
        };

        conn.tx.send(msg).await?;

        match conn.rx.recv_into(&mut self.buf).await? {
            Msg::Control(Command::Ack { version, .. }) => Ok(Reply::Ack { version }),
            Msg::Control(Command::Disconnect) => Ok(Reply::Disconnect),
            Msg::Data(Payload::Value(header, values)) => {
                let tensor = Tensor::from_values(header.shape, values).map_err(|_| {
                    WorkerErr::UnexpectedMessage {
                        step,
                        got: "data/value with a ragged body",
                    }
                })?;

                Ok(Reply::Value {
                    tensor,
                    version: header.version,
                })
            }
            Msg::Err(e) => Err(e.into()),
            other => Err(WorkerErr::UnexpectedMessage {
                step,
                got: other.kind(),
            }),
        }
    }

    /// Sends `msg` until it's answered, reconnecting after transient failures.
    async fn request(&mut self, msg: &Msg<'_>, step: u64) -> Result<Reply> {
        let mut attempt = 0;

        loop {
            match self.exchange(msg, step).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    warn!(addr:% = self.addr, attempt = attempt; "shard request failed, reconnecting: {e}");
                    self.conn = None;
                    time::sleep(self.retry.delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.conn = None;
                    return Err(e);
                }
            }
        }
    }

    fn ack(reply: Reply, step: u64) -> Result<u64> {
        match reply {
            Reply::Ack { version } => Ok(version),
            Reply::Value { .. } => Err(WorkerErr::UnexpectedMessage {
                step,
                got: "data/value",
            }),
            Reply::Disconnect => Err(WorkerErr::UnexpectedMessage {
                step,
                got: "control/disconnect",
            }),
        }
    }

    /// Declares `key` with its initial value, the shard keeps the first one it saw.
    ///
    /// # Returns
    /// The key's version on the shard.
    pub async fn init(&mut self, key: &ParameterKey, tensor: &Tensor) -> Result<u64> {
        let header = InitHeader {
            key: key.clone(),
            shape: tensor.shape().clone(),
        };

        let encoded = tensor.encode();
        let msg = Msg::Data(Payload::Init(header, encoded.values()));
        let reply = self.request(&msg, 0).await?;
        Self::ack(reply, 0)
    }

    /// Pushes `tensor` to `key` as part of `step`.
    ///
    /// # Returns
    /// The key's version once the push was applied.
    pub async fn push(
        &mut self,
        key: &ParameterKey,
        tensor: &Tensor,
        mode: PushMode,
        step: u64,
    ) -> Result<u64> {
        let header = PushHeader {
            key: key.clone(),
            shape: tensor.shape().clone(),
            mode,
            step,
        };

        let encoded = tensor.encode();
        let msg = Msg::Data(Payload::Push(header, encoded.values()));
        let reply = self.request(&msg, step).await?;
        Self::ack(reply, step)
    }

    /// Fetches the latest applied value of `key`.
    pub async fn pull(&mut self, key: &ParameterKey, step: u64) -> Result<(Tensor, u64)> {
        let msg = Msg::Control(Command::Pull { key: key.clone() });

        match self.request(&msg, step).await? {
            Reply::Value { tensor, version } => Ok((tensor, version)),
            Reply::Ack { .. } => Err(WorkerErr::UnexpectedMessage {
                step,
                got: "control/ack",
            }),
            Reply::Disconnect => Err(WorkerErr::UnexpectedMessage {
                step,
                got: "control/disconnect",
            }),
        }
    }

    /// Ends the session with the shard.
    pub async fn disconnect(mut self) -> Result<()> {
        if self.conn.is_none() {
            return Ok(());
        }

        let msg = Msg::Control(Command::Disconnect);
        match self.exchange(&msg, 0).await? {
            Reply::Disconnect => Ok(()),
            _ => Err(WorkerErr::UnexpectedMessage {
                step: 0,
                got: "control",
            }),
        }
    }
}
