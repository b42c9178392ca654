use std::time::{Duration, Instant};

use comms::{
    RemoteErr,
    specs::{Assignment, MemberId, ProcessKind, Registration},
};

use crate::config::heartbeat_period;

/// The liveness state of a registered member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    /// Registered, but its assignment is still withheld.
    Pending,
    Alive,
    /// A worker that went through all of its steps.
    Done,
    PresumedDead,
}

#[derive(Debug)]
struct Member {
    host: String,
    addr: Option<String>,
    last_seen: Instant,
    status: MemberStatus,
}

/// The cluster membership table, owned by a single scheduler task.
///
/// Workers are indexed by rank and servers by shard id, both handed out in
/// arrival order.
#[derive(Debug)]
pub struct Membership {
    expected_workers: usize,
    expected_servers: usize,
    liveness_timeout: Duration,
    workers: Vec<Member>,
    servers: Vec<Member>,
}

impl Membership {
    /// Creates a new empty `Membership`.
    ///
    /// # Arguments
    /// * `expected_workers` - The cluster size.
    /// * `expected_servers` - The amount of shards.
    /// * `heartbeat_interval` - How often members send heartbeats.
    /// * `max_missed` - Consecutive silent intervals before a member is presumed dead, zero
    ///   counts as one.
    ///
    /// # Returns
    /// A new `Membership` instance.
    pub fn new(
        expected_workers: usize,
        expected_servers: usize,
        heartbeat_interval: Duration,
        max_missed: u32,
    ) -> Self {
        Self {
            expected_workers,
            expected_servers,
            liveness_timeout: heartbeat_period(heartbeat_interval) * max_missed.max(1),
            workers: Vec::with_capacity(expected_workers),
            servers: Vec::with_capacity(expected_servers),
        }
    }

    /// The expected amount of workers.
    pub fn cluster_size(&self) -> usize {
        self.expected_workers
    }

    pub fn num_shards(&self) -> usize {
        self.expected_servers
    }

    /// Registers a new member.
    ///
    /// Servers become alive right away, workers stay pending until `activate`.
    ///
    /// # Arguments
    /// * `registration` - What the member sent on first contact.
    /// * `now` - The time of the registration.
    ///
    /// # Returns
    /// The next free rank or shard id, or `ClusterFull` when every slot of that kind is taken.
    pub fn register(
        &mut self,
        registration: &Registration,
        now: Instant,
    ) -> Result<MemberId, RemoteErr> {
        let kind = registration.kind;

        let (members, capacity, status) = match kind {
            ProcessKind::Worker => {
                (&mut self.workers, self.expected_workers, MemberStatus::Pending)
            }
            ProcessKind::Server if registration.addr.is_none() => {
                return Err(RemoteErr::Protocol(
                    "a server must register the address it serves on".into(),
                ));
            }
            ProcessKind::Server => (&mut self.servers, self.expected_servers, MemberStatus::Alive),
            ProcessKind::Scheduler => {
                return Err(RemoteErr::Protocol(
                    "only workers and servers register".into(),
                ));
            }
        };

        if members.len() >= capacity {
            return Err(RemoteErr::ClusterFull { kind, capacity });
        }

        let id = members.len();
        members.push(Member {
            host: registration.host.clone(),
            addr: registration.addr.clone(),
            last_seen: now,
            status,
        });

        Ok(match kind {
            ProcessKind::Worker => MemberId::Worker(id),
            _ => MemberId::Server(id),
        })
    }

    fn member(&self, id: MemberId) -> Option<&Member> {
        match id {
            MemberId::Worker(rank) => self.workers.get(rank),
            MemberId::Server(shard) => self.servers.get(shard),
        }
    }

    fn member_mut(&mut self, id: MemberId) -> Option<&mut Member> {
        match id {
            MemberId::Worker(rank) => self.workers.get_mut(rank),
            MemberId::Server(shard) => self.servers.get_mut(shard),
        }
    }

    pub fn status(&self, id: MemberId) -> Option<MemberStatus> {
        self.member(id).map(|m| m.status)
    }

    pub fn host(&self, id: MemberId) -> Option<&str> {
        self.member(id).map(|m| m.host.as_str())
    }

    /// Whether every expected server has registered.
    pub fn servers_ready(&self) -> bool {
        self.servers.len() == self.expected_servers
    }

    /// The address of every registered server, ordered by shard id.
    pub fn server_addrs(&self) -> Vec<String> {
        self.servers.iter().filter_map(|m| m.addr.clone()).collect()
    }

    /// Builds the assignment that answers the registration of `id`.
    pub fn assignment(&self, id: MemberId) -> Assignment {
        match id {
            MemberId::Worker(rank) => Assignment::Worker {
                rank,
                num_workers: self.expected_workers,
                servers: self.server_addrs(),
            },
            MemberId::Server(shard_id) => Assignment::Server {
                shard_id,
                num_shards: self.expected_servers,
                num_workers: self.expected_workers,
            },
        }
    }

    /// Marks a pending member as alive, its liveness clock starts at `now`.
    pub fn activate(&mut self, id: MemberId, now: Instant) {
        if let Some(member) = self.member_mut(id) {
            if member.status == MemberStatus::Pending {
                member.status = MemberStatus::Alive;
                member.last_seen = now;
            }
        }
    }

    /// Records a heartbeat of `id`.
    ///
    /// # Returns
    /// `false` if `id` isn't registered or is already presumed dead.
    pub fn heartbeat(&mut self, id: MemberId, now: Instant) -> bool {
        match self.member_mut(id) {
            Some(member) if member.status != MemberStatus::PresumedDead => {
                member.last_seen = now;
                true
            }
            _ => false,
        }
    }

    /// Marks the worker at `rank` as done.
    ///
    /// # Returns
    /// Whether every expected worker is now done.
    pub fn mark_done(&mut self, rank: usize) -> bool {
        if let Some(member) = self.workers.get_mut(rank) {
            if member.status == MemberStatus::Alive {
                member.status = MemberStatus::Done;
            }
        }

        self.all_workers_done()
    }

    pub fn all_workers_done(&self) -> bool {
        self.workers.len() == self.expected_workers
            && self.workers.iter().all(|m| m.status == MemberStatus::Done)
    }

    pub fn presume_dead(&mut self, id: MemberId) {
        if let Some(member) = self.member_mut(id) {
            member.status = MemberStatus::PresumedDead;
        }
    }

    /// Presumes dead every alive member that went silent for too long.
    ///
    /// # Arguments
    /// * `now` - The current time.
    ///
    /// # Returns
    /// The members that just became `PresumedDead`.
    pub fn sweep(&mut self, now: Instant) -> Vec<MemberId> {
        let timeout = self.liveness_timeout;
        let workers = self
            .workers
            .iter_mut()
            .enumerate()
            .map(|(i, m)| (MemberId::Worker(i), m));
        let servers = self
            .servers
            .iter_mut()
            .enumerate()
            .map(|(i, m)| (MemberId::Server(i), m));

        workers
            .chain(servers)
            .filter(|(_, m)| {
                m.status == MemberStatus::Alive
                    && now.saturating_duration_since(m.last_seen) > timeout
            })
            .map(|(id, m)| {
                m.status = MemberStatus::PresumedDead;
                id
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(100);

    fn worker() -> Registration {
        Registration {
            kind: ProcessKind::Worker,
            host: "10.0.0.1".into(),
            addr: None,
        }
    }

    fn server(addr: &str) -> Registration {
        Registration {
            kind: ProcessKind::Server,
            host: "10.0.0.2".into(),
            addr: Some(addr.into()),
        }
    }

    #[test]
    fn workers_get_every_rank_once_in_arrival_order() {
        let now = Instant::now();
        let mut membership = Membership::new(4, 1, INTERVAL, 3);

        let ranks: Vec<_> = (0..4)
            .map(|_| membership.register(&worker(), now).unwrap())
            .collect();

        let expected: Vec<_> = (0..4).map(MemberId::Worker).collect();
        assert_eq!(ranks, expected);
        assert_eq!(membership.cluster_size(), 4);
    }

    #[test]
    fn registration_past_capacity_is_cluster_full() {
        let now = Instant::now();
        let mut membership = Membership::new(2, 1, INTERVAL, 3);

        membership.register(&worker(), now).unwrap();
        membership.register(&worker(), now).unwrap();

        let err = membership.register(&worker(), now).unwrap_err();
        assert_eq!(
            err,
            RemoteErr::ClusterFull {
                kind: ProcessKind::Worker,
                capacity: 2
            }
        );

        membership.register(&server("10.0.0.2:4000"), now).unwrap();
        let err = membership
            .register(&server("10.0.0.3:4000"), now)
            .unwrap_err();
        assert_eq!(
            err,
            RemoteErr::ClusterFull {
                kind: ProcessKind::Server,
                capacity: 1
            }
        );
    }

    #[test]
    fn servers_need_an_address() {
        let mut membership = Membership::new(1, 1, INTERVAL, 3);
        let mut registration = server("unused");
        registration.addr = None;

        let err = membership
            .register(&registration, Instant::now())
            .unwrap_err();
        assert!(matches!(err, RemoteErr::Protocol(_)));
        assert!(!membership.servers_ready());
    }

    #[test]
    fn worker_assignment_lists_servers_by_shard_id() {
        let now = Instant::now();
        let mut membership = Membership::new(1, 2, INTERVAL, 3);

        membership.register(&server("10.0.0.2:4000"), now).unwrap();
        assert!(!membership.servers_ready());
        membership.register(&server("10.0.0.3:4000"), now).unwrap();
        assert!(membership.servers_ready());

        let id = membership.register(&worker(), now).unwrap();
        assert_eq!(membership.status(id), Some(MemberStatus::Pending));

        let Assignment::Worker {
            rank,
            num_workers,
            servers,
        } = membership.assignment(id)
        else {
            panic!("expected a worker assignment");
        };

        assert_eq!(rank, 0);
        assert_eq!(num_workers, 1);
        assert_eq!(servers, ["10.0.0.2:4000", "10.0.0.3:4000"]);
    }

    #[test]
    fn silent_members_are_presumed_dead_after_enough_intervals() {
        let start = Instant::now();
        let mut membership = Membership::new(2, 1, INTERVAL, 3);

        let shard = membership
            .register(&server("10.0.0.2:4000"), start)
            .unwrap();
        let first = membership.register(&worker(), start).unwrap();
        let second = membership.register(&worker(), start).unwrap();
        membership.activate(first, start);
        membership.activate(second, start);

        let later = start + INTERVAL * 2;
        membership.heartbeat(shard, later);
        membership.heartbeat(first, later);
        assert!(membership.sweep(later).is_empty());

        let dead = membership.sweep(start + INTERVAL * 4);
        assert_eq!(dead, [second]);
        assert_eq!(membership.status(second), Some(MemberStatus::PresumedDead));
        assert!(!membership.heartbeat(second, start + INTERVAL * 4));

        // Already dead members are only reported once.
        let dead = membership.sweep(start + INTERVAL * 6);
        assert_eq!(dead, [first, shard]);
    }

    #[test]
    fn zero_liveness_settings_still_allow_one_interval() {
        let start = Instant::now();
        let mut membership = Membership::new(1, 0, Duration::ZERO, 0);

        let id = membership.register(&worker(), start).unwrap();
        membership.activate(id, start);

        assert!(membership.sweep(start).is_empty());
        let within = start + Duration::from_micros(500);
        assert!(membership.sweep(within).is_empty());
        assert_eq!(membership.sweep(start + Duration::from_millis(2)), [id]);
    }

    #[test]
    fn pending_and_done_members_are_never_swept() {
        let start = Instant::now();
        let mut membership = Membership::new(2, 0, INTERVAL, 1);

        let pending = membership.register(&worker(), start).unwrap();
        let done = membership.register(&worker(), start).unwrap();
        membership.activate(done, start);
        assert!(!membership.mark_done(1));
        assert_eq!(membership.status(done), Some(MemberStatus::Done));

        assert!(membership.sweep(start + INTERVAL * 10).is_empty());
        assert_eq!(membership.status(pending), Some(MemberStatus::Pending));
        assert!(!membership.all_workers_done());
    }

    #[test]
    fn run_completes_once_every_worker_is_done() {
        let now = Instant::now();
        let mut membership = Membership::new(2, 0, INTERVAL, 3);

        for _ in 0..2 {
            let id = membership.register(&worker(), now).unwrap();
            membership.activate(id, now);
        }

        assert!(!membership.mark_done(0));
        assert!(!membership.mark_done(0));
        assert!(membership.mark_done(1));
    }
}
