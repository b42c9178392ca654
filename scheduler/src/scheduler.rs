use std::{collections::HashMap, io, net::SocketAddr, time::Duration};

use comms::{
    RemoteErr,
    msg::{Command, Msg},
    specs::{MemberId, Registration, ShutdownReason},
};
use log::{debug, error, info, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinSet,
    time::{self, Instant},
};

use crate::{MemberStatus, Membership, Result, SchedulerConfig, config::heartbeat_period};

/// How long queued messages get to reach the members once the run is over.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);
/// Pause after a failed accept, so a persistent error doesn't spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

type ConnId = usize;

/// What the connection tasks report back to the scheduler task.
#[derive(Debug)]
enum Event {
    Received {
        conn: ConnId,
        cmd: Command,
    },
    Closed {
        conn: ConnId,
        cause: Option<io::Error>,
    },
}

struct Conn {
    peer: SocketAddr,
    outbox: mpsc::UnboundedSender<Msg<'static>>,
    member: Option<MemberId>,
}

/// The single cluster wide coordinator.
///
/// Hands out ranks and shard ids, watches heartbeats and decides when the run
/// is over. Every piece of state lives in this task, connection tasks only
/// forward what they read.
pub struct Scheduler {
    membership: Membership,
    heartbeat_interval: Duration,
    conns: HashMap<ConnId, Conn>,
    /// Workers whose assignment waits on the missing servers.
    pending: Vec<ConnId>,
    readers: JoinSet<()>,
    writers: JoinSet<()>,
}

impl Scheduler {
    /// Creates a new `Scheduler`.
    ///
    /// # Arguments
    /// * `config` - The scheduler settings.
    ///
    /// # Returns
    /// A new `Scheduler` instance.
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            membership: Membership::new(
                config.num_workers,
                config.num_servers,
                config.heartbeat_interval,
                config.max_missed_heartbeats,
            ),
            heartbeat_interval: heartbeat_period(config.heartbeat_interval),
            conns: HashMap::new(),
            pending: Vec::new(),
            readers: JoinSet::new(),
            writers: JoinSet::new(),
        }
    }

    /// Accepts members on `listener` until the run completes or fails.
    ///
    /// Every connected member gets the final `Shutdown` before this returns.
    ///
    /// # Arguments
    /// * `listener` - A bound listener.
    ///
    /// # Returns
    /// Why the run ended. Failed accepts are logged and the loop keeps going.
    pub async fn run(mut self, listener: TcpListener) -> Result<ShutdownReason> {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut ticker = time::interval(self.heartbeat_interval);
        let mut next_conn: ConnId = 0;

        let outcome = loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!("failed to accept a member: {e}");
                            time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };
                    debug!(conn = next_conn, peer:% = peer; "member connected");
                    self.spawn_conn(next_conn, peer, stream, events_tx.clone());
                    next_conn += 1;
                }
                Some(event) = events.recv() => {
                    if let Some(reason) = self.handle_event(event) {
                        break reason;
                    }
                }
                _ = ticker.tick() => {
                    if let Some(reason) = self.sweep() {
                        break reason;
                    }
                }
            }
        };

        match &outcome {
            ShutdownReason::Completed => info!("run completed, shutting the cluster down"),
            ShutdownReason::Failed { reason } => error!(reason:% = reason; "run failed"),
        }

        self.broadcast(&outcome);
        self.flush().await;
        Ok(outcome)
    }

    /// Spawns the reader and writer tasks of a new connection.
    fn spawn_conn(
        &mut self,
        conn: ConnId,
        peer: SocketAddr,
        stream: TcpStream,
        events: mpsc::UnboundedSender<Event>,
    ) {
        let (rx, tx) = stream.into_split();
        let (mut rx, mut tx) = comms::channel(rx, tx);
        let (outbox, mut queued) = mpsc::unbounded_channel::<Msg<'static>>();

        self.readers.spawn(async move {
            let mut buf = Vec::new();

            let cause = loop {
                match rx.recv_into(&mut buf).await {
                    Ok(Msg::Control(cmd)) => {
                        if events.send(Event::Received { conn, cmd }).is_err() {
                            return;
                        }
                    }
                    Ok(msg) => {
                        let text = format!("expected a control message, got {}", msg.kind());
                        break Some(io::Error::new(io::ErrorKind::InvalidData, text));
                    }
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break None,
                    Err(e) => break Some(e),
                }
            };

            let _ = events.send(Event::Closed { conn, cause });
        });

        self.writers.spawn(async move {
            while let Some(msg) = queued.recv().await {
                if let Err(e) = tx.send(&msg).await {
                    debug!(conn = conn; "dropping outgoing messages: {e}");
                    return;
                }
            }

            let _ = tx.shutdown().await;
        });

        self.conns.insert(
            conn,
            Conn {
                peer,
                outbox,
                member: None,
            },
        );
    }

    fn send(&self, conn: ConnId, msg: Msg<'static>) {
        if let Some(c) = self.conns.get(&conn) {
            let _ = c.outbox.send(msg);
        }
    }

    /// Applies one connection event to the membership.
    ///
    /// # Returns
    /// The reason to stop the run, if the event ends it.
    fn handle_event(&mut self, event: Event) -> Option<ShutdownReason> {
        let now = Instant::now().into_std();

        let (conn, cmd) = match event {
            Event::Received { conn, cmd } => (conn, cmd),
            Event::Closed { conn, cause } => return self.handle_closed(conn, cause),
        };

        let member = self.conns.get(&conn).and_then(|c| c.member);

        match (member, cmd) {
            (None, Command::Register(registration)) => {
                self.handle_register(conn, registration);
                None
            }
            (Some(id), Command::Heartbeat) => {
                if !self.membership.heartbeat(id, now) {
                    warn!(member:% = id; "heartbeat from a member presumed dead");
                }
                None
            }
            (Some(MemberId::Worker(rank)), Command::Done) => {
                info!(rank = rank; "worker done");
                self.membership
                    .mark_done(rank)
                    .then_some(ShutdownReason::Completed)
            }
            (Some(id), Command::Failed { reason }) => {
                error!(member:% = id; "member failed: {reason}");
                Some(ShutdownReason::Failed {
                    reason: format!("{id} failed: {reason}"),
                })
            }
            (Some(id @ MemberId::Server(_)), Command::ReportDead { rank }) => {
                let dead = MemberId::Worker(rank);
                error!(member:% = id, rank = rank; "worker reported dead");
                self.membership.presume_dead(dead);
                Some(ShutdownReason::Failed {
                    reason: format!("{dead} presumed dead by {id}"),
                })
            }
            (_, cmd) => {
                warn!(conn = conn; "out of protocol command {cmd:?}");
                let err = RemoteErr::Protocol(format!("unexpected command {cmd:?}"));
                self.send(conn, Msg::Err(err));
                None
            }
        }
    }

    fn handle_register(&mut self, conn: ConnId, registration: Registration) {
        let now = Instant::now().into_std();

        let id = match self.membership.register(&registration, now) {
            Ok(id) => id,
            Err(e) => {
                warn!(kind:% = registration.kind, host:% = registration.host; "registration rejected: {e}");
                self.send(conn, Msg::Err(e));
                return;
            }
        };

        info!(member:% = id, host:% = registration.host; "member registered");
        if let Some(c) = self.conns.get_mut(&conn) {
            c.member = Some(id);
        }

        match id {
            MemberId::Server(_) => {
                self.assign(conn, id);

                if self.membership.servers_ready() {
                    for conn in std::mem::take(&mut self.pending) {
                        if let Some(id) = self.conns.get(&conn).and_then(|c| c.member) {
                            self.assign(conn, id);
                        }
                    }
                }
            }
            MemberId::Worker(_) if self.membership.servers_ready() => self.assign(conn, id),
            MemberId::Worker(rank) => {
                debug!(rank = rank; "holding the assignment until every server registers");
                self.pending.push(conn);
            }
        }
    }

    fn assign(&mut self, conn: ConnId, id: MemberId) {
        self.membership.activate(id, Instant::now().into_std());
        let assignment = self.membership.assignment(id);
        self.send(conn, Msg::Control(Command::Assigned(assignment)));
    }

    fn handle_closed(&mut self, conn: ConnId, cause: Option<io::Error>) -> Option<ShutdownReason> {
        let c = self.conns.remove(&conn)?;

        if let Some(e) = cause {
            warn!(conn = conn, peer:% = c.peer; "connection error: {e}");
        }

        let id = c.member?;
        match self.membership.status(id) {
            Some(MemberStatus::Pending) => {
                self.membership.presume_dead(id);
                Some(ShutdownReason::Failed {
                    reason: format!("{id} left before its assignment"),
                })
            }
            Some(MemberStatus::Alive) => {
                warn!(member:% = id; "lost the connection to an alive member");
                None
            }
            _ => None,
        }
    }

    fn sweep(&mut self) -> Option<ShutdownReason> {
        let dead = self.membership.sweep(Instant::now().into_std());

        for id in &dead {
            let host = self.membership.host(*id).unwrap_or_default();
            error!(member:% = id, host = host; "member presumed dead");
        }

        let first = dead.first()?;
        Some(ShutdownReason::Failed {
            reason: format!("{first} presumed dead"),
        })
    }

    fn broadcast(&mut self, reason: &ShutdownReason) {
        for c in self.conns.values() {
            let shutdown = Command::Shutdown(reason.clone());
            let _ = c.outbox.send(Msg::Control(shutdown));
        }

        // Dropping the outboxes lets every writer drain and close.
        self.conns.clear();
    }

    async fn flush(&mut self) {
        let writers = &mut self.writers;
        let drained = time::timeout(FLUSH_TIMEOUT, async {
            while writers.join_next().await.is_some() {}
        });

        if drained.await.is_err() {
            warn!("some members didn't take the shutdown in time");
        }

        self.readers.shutdown().await;
    }
}

/// Binds the scheduler's listener and drives the run to its end.
///
/// # Arguments
/// * `config` - The scheduler settings.
///
/// # Returns
/// Why the run ended.
pub async fn serve(config: SchedulerConfig) -> Result<ShutdownReason> {
    let listener = TcpListener::bind(&config.addr).await?;
    info!(
        addr:% = listener.local_addr()?,
        workers = config.num_workers,
        servers = config.num_servers;
        "scheduler listening"
    );

    Scheduler::new(&config).run(listener).await
}
