use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use comms::{KvErr, ParameterKey, Rank, Tensor};
use log::{debug, error, warn};
use parking_lot::Mutex;
use tokio::{
    sync::{mpsc, oneshot},
    time::{self, Instant},
};

use super::{StepErr, Synchronizer};
use crate::{
    optimization::Optimizer,
    storage::{StoreHandle, add_assign},
};

/// The knobs of a per step barrier.
#[derive(Debug, Clone, Copy)]
pub struct BarrierPolicy {
    /// The amount of distinct ranks a step waits for.
    pub barrier_size: usize,
    /// How long a step stays open after its first push.
    pub timeout: Duration,
    /// Consecutive missed steps of one key before the rank is reported dead,
    /// zero counts as one.
    pub max_missed: u32,
}

/// One worker's gradient, waiting on its step to close.
struct Contribution {
    rank: Rank,
    step: u64,
    grad: Tensor,
    reply: oneshot::Sender<Result<u64, KvErr>>,
}

/// Synchronizes parameter updates across the workers with a counting
/// rendezvous per key and step.
///
/// Every key gets its own aggregator task. It sums the gradients of a step
/// until every rank pushed or the step times out, then applies the
/// optimizer once and acknowledges every contributor with the new version.
#[derive(Clone)]
pub struct BarrierSync {
    policy: BarrierPolicy,
    aggregators: Arc<Mutex<HashMap<ParameterKey, mpsc::UnboundedSender<Contribution>>>>,
    dead: mpsc::UnboundedSender<Rank>,
}

impl BarrierSync {
    /// Creates a new `BarrierSync` synchronizer.
    ///
    /// # Arguments
    /// * `policy` - The size and timeout of the barrier.
    /// * `dead` - Where to send the ranks that missed too many steps.
    ///
    /// # Returns
    /// A new `BarrierSync` instance.
    pub fn new(policy: BarrierPolicy, dead: mpsc::UnboundedSender<Rank>) -> Self {
        Self {
            policy,
            aggregators: Arc::new(Mutex::new(HashMap::new())),
            dead,
        }
    }

    /// Returns the inbox of the aggregator for `key`, spawning it on first use.
    fn aggregator<O>(
        &self,
        handle: &StoreHandle<O>,
        key: &ParameterKey,
    ) -> mpsc::UnboundedSender<Contribution>
    where
        O: Optimizer + Send + 'static,
    {
        let mut aggregators = self.aggregators.lock();

        if let Some(inbox) = aggregators.get(key) {
            return inbox.clone();
        }

        let (inbox, rx) = mpsc::unbounded_channel();
        let aggregator =
            Aggregator::new(handle.clone(), key.clone(), self.policy, self.dead.clone());
        tokio::spawn(aggregator.run(rx));

        aggregators.insert(key.clone(), inbox.clone());
        inbox
    }
}

impl Synchronizer for BarrierSync {
    async fn step<O>(
        &self,
        handle: &StoreHandle<O>,
        rank: Rank,
        step: u64,
        key: ParameterKey,
        grad: Tensor,
    ) -> Result<u64, StepErr>
    where
        O: Optimizer + Send + 'static,
    {
        handle.validate(&key, grad.shape(), grad.dtype()).await?;

        let (reply, ack) = oneshot::channel();
        let contribution = Contribution {
            rank,
            step,
            grad,
            reply,
        };

        self.aggregator(handle, &key)
            .send(contribution)
            .map_err(|_| StepErr::Closed)?;

        match ack.await {
            Ok(res) => Ok(res?),
            Err(_) => Err(StepErr::Closed),
        }
    }
}

/// The gradients gathered so far for the open step.
struct Round {
    step: u64,
    deadline: Instant,
    contributions: BTreeMap<Rank, Contribution>,
}

impl Round {
    fn new(step: u64, timeout: Duration) -> Self {
        Self {
            step,
            deadline: Instant::now() + timeout,
            contributions: BTreeMap::new(),
        }
    }

    /// Adds a contribution, a retried push from the same rank only refreshes the reply.
    fn insert(&mut self, c: Contribution) {
        match self.contributions.get_mut(&c.rank) {
            Some(existing) => {
                debug!(rank = c.rank, step = c.step; "duplicate push, keeping the first gradient");
                existing.reply = c.reply;
            }
            None => {
                self.contributions.insert(c.rank, c);
            }
        }
    }
}

/// The task that owns the barrier state of one key.
struct Aggregator<O: Optimizer> {
    handle: StoreHandle<O>,
    key: ParameterKey,
    policy: BarrierPolicy,
    dead: mpsc::UnboundedSender<Rank>,
    round: Option<Round>,
    last_closed: Option<u64>,
    /// Pushes that arrived ahead of the open step.
    backlog: BTreeMap<u64, Vec<Contribution>>,
    missed: Vec<u32>,
    /// Ranks already reported dead since their last push.
    reported: Vec<bool>,
}

impl<O: Optimizer + Send + 'static> Aggregator<O> {
    fn new(
        handle: StoreHandle<O>,
        key: ParameterKey,
        policy: BarrierPolicy,
        dead: mpsc::UnboundedSender<Rank>,
    ) -> Self {
        Self {
            handle,
            key,
            policy,
            dead,
            round: None,
            last_closed: None,
            backlog: BTreeMap::new(),
            missed: vec![0; policy.barrier_size],
            reported: vec![false; policy.barrier_size],
        }
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Contribution>) {
        loop {
            let deadline = self.round.as_ref().map(|r| r.deadline);

            let arrived = match deadline {
                Some(deadline) => tokio::select! {
                    c = inbox.recv() => c,
                    _ = time::sleep_until(deadline) => {
                        self.close().await;
                        continue;
                    }
                },
                None => inbox.recv().await,
            };

            let Some(c) = arrived else {
                break;
            };

            self.offer(c).await;
        }
    }

    async fn offer(&mut self, c: Contribution) {
        let closed = self.last_closed.is_some_and(|s| c.step <= s)
            || self.round.as_ref().is_some_and(|r| c.step < r.step);

        if closed {
            warn!(key:% = self.key, rank = c.rank, step = c.step; "dropping a push for a closed step");
            let _ = c.reply.send(self.handle.version(&self.key));
            return;
        }

        match &mut self.round {
            Some(round) if c.step > round.step => {
                self.backlog.entry(c.step).or_default().push(c);
                return;
            }
            Some(round) => round.insert(c),
            None => {
                let mut round = Round::new(c.step, self.policy.timeout);
                round.insert(c);
                self.round = Some(round);
            }
        }

        let full = self
            .round
            .as_ref()
            .is_some_and(|r| r.contributions.len() >= self.policy.barrier_size);

        if full {
            self.close().await;
        }
    }

    /// Applies the open step and opens the next buffered one, if any.
    async fn close(&mut self) {
        let Some(round) = self.round.take() else {
            return;
        };

        self.apply(round).await;

        while let Some((step, pending)) = self.backlog.pop_first() {
            let mut round = Round::new(step, self.policy.timeout);
            pending.into_iter().for_each(|c| round.insert(c));

            if round.contributions.len() < self.policy.barrier_size {
                self.round = Some(round);
                break;
            }

            self.apply(round).await;
        }
    }

    async fn apply(&mut self, round: Round) {
        let Round {
            step,
            contributions,
            ..
        } = round;

        let size = self.policy.barrier_size;
        if contributions.len() < size {
            warn!(
                key:% = self.key,
                step = step,
                arrived = contributions.len(),
                expected = size;
                "step timeout, applying the partial aggregate"
            );
        }

        let max_missed = self.policy.max_missed.max(1);
        for rank in 0..size {
            if contributions.contains_key(&rank) {
                self.missed[rank] = 0;
                self.reported[rank] = false;
                continue;
            }

            self.missed[rank] = self.missed[rank].saturating_add(1);
            if self.missed[rank] >= max_missed && !self.reported[rank] {
                error!(key:% = self.key, rank = rank; "worker missed too many steps");
                self.reported[rank] = true;
                let _ = self.dead.send(rank);
            }
        }

        let mut grads = contributions.values().map(|c| &c.grad);
        let result = match grads.next() {
            Some(first) => {
                let mut sum = first.clone();
                grads.for_each(|g| add_assign(sum.as_mut_slice(), g.as_slice()));
                self.handle.update(&self.key, &sum).await
            }
            None => self.handle.version(&self.key),
        };

        debug!(key:% = self.key, step = step; "step applied");
        for c in contributions.into_values() {
            let _ = c.reply.send(result.clone());
        }

        self.last_closed = Some(step);
    }
}
