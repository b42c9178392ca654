use std::{io, time::Duration};

use comms::{
    OnoReceiver, OnoSender, Rank,
    msg::{Command, Msg},
    specs::{Assignment, Registration, ShutdownReason},
};
use log::{debug, info, warn};
use tokio::{
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{mpsc, watch},
    task::JoinHandle,
    time,
};
use tokio_util::sync::CancellationToken;

use crate::{Result, RetryPolicy, SchedulerErr, config::heartbeat_period};

/// What a member tells the scheduler besides its heartbeats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    /// The worker went through all of its steps.
    Done,
    /// The member can't go on.
    Failed(String),
    /// A server gave up on the worker at this rank.
    Dead(Rank),
}

impl Report {
    fn into_command(self) -> Command {
        match self {
            Report::Done => Command::Done,
            Report::Failed(reason) => Command::Failed { reason },
            Report::Dead(rank) => Command::ReportDead { rank },
        }
    }
}

/// A cheap handle to queue reports on a `MemberLink`.
#[derive(Debug, Clone)]
pub struct Reporter(mpsc::UnboundedSender<Report>);

impl Reporter {
    pub fn report(&self, report: Report) {
        if self.0.send(report).is_err() {
            debug!("the scheduler link is closed, dropping report");
        }
    }
}

/// A registered connection to the scheduler.
pub struct SchedulerClient {
    rx: OnoReceiver<OwnedReadHalf>,
    tx: OnoSender<OwnedWriteHalf>,
    assignment: Assignment,
}

impl SchedulerClient {
    /// Connects to the scheduler and registers this process.
    ///
    /// Connection attempts are retried following `retry`, the scheduler may
    /// still be starting. Workers wait here until every server registered.
    ///
    /// # Arguments
    /// * `addr` - The scheduler's address.
    /// * `registration` - Who this process is.
    /// * `retry` - Bounds the connection attempts.
    ///
    /// # Returns
    /// A registered client or a `SchedulerErr` if connecting failed or the scheduler refused.
    pub async fn register(
        addr: &str,
        registration: Registration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let stream = connect(addr, retry).await?;
        let (rx, tx) = stream.into_split();
        let (mut rx, mut tx) = comms::channel(rx, tx);

        let msg = Msg::Control(Command::Register(registration));
        tx.send(&msg).await?;

        let mut buf = Vec::new();
        let assignment = match rx.recv_into(&mut buf).await? {
            Msg::Control(Command::Assigned(assignment)) => assignment,
            Msg::Control(Command::Shutdown(reason)) => return Err(SchedulerErr::Shutdown(reason)),
            Msg::Err(e) => return Err(SchedulerErr::Rejected(e)),
            other => return Err(SchedulerErr::UnexpectedMessage { got: other.kind() }),
        };

        info!(member:% = assignment.member(); "registered with the scheduler");
        Ok(Self { rx, tx, assignment })
    }

    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    /// Moves the connection into background tasks that keep the membership alive.
    ///
    /// A heartbeat goes out every `heartbeat_interval`. When the scheduler
    /// broadcasts `Shutdown`, or the connection to it is lost, `cancel` is cancelled.
    ///
    /// # Arguments
    /// * `heartbeat_interval` - How often to send a heartbeat.
    /// * `cancel` - The process wide shutdown token.
    ///
    /// # Returns
    /// The link to report through.
    pub fn into_link(self, heartbeat_interval: Duration, cancel: CancellationToken) -> MemberLink {
        let Self { mut rx, mut tx, .. } = self;

        let (reports, mut queued) = mpsc::unbounded_channel::<Report>();
        let (shutdown_tx, shutdown) = watch::channel(None);
        let closing = CancellationToken::new();

        let writer_closing = closing.clone();
        let writer = tokio::spawn(async move {
            let mut ticker = time::interval(heartbeat_period(heartbeat_interval));

            loop {
                let cmd = tokio::select! {
                    biased;
                    report = queued.recv() => match report {
                        Some(report) => report.into_command(),
                        None => break,
                    },
                    _ = writer_closing.cancelled() => match queued.try_recv() {
                        Ok(report) => report.into_command(),
                        Err(_) => break,
                    },
                    _ = ticker.tick() => Command::Heartbeat,
                };

                if let Err(e) = tx.send(&Msg::Control(cmd)).await {
                    warn!("lost the scheduler while sending: {e}");
                    break;
                }
            }

            let _ = tx.shutdown().await;
        });

        let reader = tokio::spawn(async move {
            let mut buf = Vec::new();

            let reason = loop {
                match rx.recv_into(&mut buf).await {
                    Ok(Msg::Control(Command::Shutdown(reason))) => break reason,
                    Ok(Msg::Err(e)) => warn!("the scheduler refused a message: {e}"),
                    Ok(msg) => warn!(kind = msg.kind(); "unexpected message from the scheduler"),
                    Err(e) => {
                        break ShutdownReason::Failed {
                            reason: format!("lost the scheduler: {e}"),
                        };
                    }
                }
            };

            info!(reason:% = reason; "shutdown received");
            let _ = shutdown_tx.send(Some(reason));
            cancel.cancel();
        });

        MemberLink {
            reports: Reporter(reports),
            shutdown,
            closing,
            writer,
            reader,
        }
    }
}

/// Tries to connect to `addr`, retrying transient failures.
async fn connect(addr: &str, retry: RetryPolicy) -> io::Result<TcpStream> {
    let mut attempt = 0;

    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) if attempt < retry.max_retries => {
                let delay = retry.delay(attempt);
                warn!(attempt = attempt; "can't reach the scheduler at {addr}: {e}, retrying in {delay:?}");
                time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// The live membership of this process in the cluster.
pub struct MemberLink {
    reports: Reporter,
    shutdown: watch::Receiver<Option<ShutdownReason>>,
    closing: CancellationToken,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl MemberLink {
    pub fn report(&self, report: Report) {
        self.reports.report(report);
    }

    pub fn reporter(&self) -> Reporter {
        self.reports.clone()
    }

    /// Why the scheduler ended the run, if it already did.
    pub fn shutdown_reason(&self) -> Option<ShutdownReason> {
        self.shutdown.borrow().clone()
    }

    /// Waits until the scheduler ends the run.
    pub async fn wait_shutdown(&mut self) -> ShutdownReason {
        match self.shutdown.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone().unwrap_or(ShutdownReason::Completed),
            Err(_) => ShutdownReason::Failed {
                reason: "the scheduler link closed".into(),
            },
        }
    }

    /// Flushes the queued reports and closes the connection.
    pub async fn close(self) {
        let Self {
            closing,
            writer,
            reader,
            ..
        } = self;

        closing.cancel();
        if let Err(e) = writer.await {
            warn!("scheduler link writer ended abruptly: {e}");
        }

        reader.abort();
    }
}
