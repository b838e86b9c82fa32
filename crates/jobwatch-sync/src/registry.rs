use std::{
    collections::{BTreeSet, HashMap},
    sync::{Mutex, MutexGuard},
};

use jobwatch_common::JobId;
use tokio::sync::watch;

/// Identifies one subscribe sequence holding the in-flight guard for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardTicket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Claimed(GuardTicket),
    InFlight,
    Tracked,
}

#[derive(Debug, Default)]
struct RegistryState {
    tracked: BTreeSet<JobId>,
    in_flight: HashMap<JobId, GuardTicket>,
    next_ticket: u64,
}

/// Tracked set plus in-flight guard set. Every check-and-claim happens under
/// one synchronous lock, never across an await.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
    tracked_tx: watch::Sender<BTreeSet<JobId>>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        let (tracked_tx, _rx) = watch::channel(BTreeSet::new());
        Self {
            state: Mutex::new(RegistryState::default()),
            tracked_tx,
        }
    }

    pub fn claim(&self, job_id: &JobId) -> Claim {
        let mut state = self.lock();
        if state.in_flight.contains_key(job_id) {
            return Claim::InFlight;
        }
        if state.tracked.contains(job_id) {
            return Claim::Tracked;
        }

        state.next_ticket += 1;
        let ticket = GuardTicket(state.next_ticket);
        state.in_flight.insert(job_id.clone(), ticket);
        Claim::Claimed(ticket)
    }

    /// Drops the guard only if it is still held by `ticket`.
    pub fn release(&self, job_id: &JobId, ticket: GuardTicket) -> bool {
        let mut state = self.lock();
        if state.in_flight.get(job_id) == Some(&ticket) {
            state.in_flight.remove(job_id);
            return true;
        }
        false
    }

    pub fn track(&self, job_id: &JobId) {
        let mut state = self.lock();
        if state.tracked.insert(job_id.clone()) {
            self.tracked_tx.send_replace(state.tracked.clone());
        }
    }

    pub fn untrack(&self, job_id: &JobId) {
        let mut state = self.lock();
        state.in_flight.remove(job_id);
        if state.tracked.remove(job_id) {
            self.tracked_tx.send_replace(state.tracked.clone());
        }
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.in_flight.clear();
        if !state.tracked.is_empty() {
            state.tracked.clear();
            self.tracked_tx.send_replace(BTreeSet::new());
        }
    }

    pub fn is_tracked(&self, job_id: &JobId) -> bool {
        self.lock().tracked.contains(job_id)
    }

    pub fn is_in_flight(&self, job_id: &JobId) -> bool {
        self.lock().in_flight.contains_key(job_id)
    }

    pub fn tracked(&self) -> BTreeSet<JobId> {
        self.lock().tracked.clone()
    }

    pub fn watch_tracked(&self) -> watch::Receiver<BTreeSet<JobId>> {
        self.tracked_tx.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use jobwatch_common::JobId;

    use super::{Claim, SubscriptionRegistry};

    #[test]
    fn second_claim_sees_in_flight_guard() {
        let registry = SubscriptionRegistry::new();
        let job = JobId::from("job-1");

        assert!(matches!(registry.claim(&job), Claim::Claimed(_)));
        assert_eq!(registry.claim(&job), Claim::InFlight);
    }

    #[test]
    fn tracked_job_is_not_claimed_again() {
        let registry = SubscriptionRegistry::new();
        let job = JobId::from("job-1");

        let Claim::Claimed(ticket) = registry.claim(&job) else {
            panic!("first claim must succeed");
        };
        registry.track(&job);
        assert!(registry.release(&job, ticket));
        assert_eq!(registry.claim(&job), Claim::Tracked);
    }

    #[test]
    fn stale_ticket_does_not_release_newer_guard() {
        let registry = SubscriptionRegistry::new();
        let job = JobId::from("job-1");

        let Claim::Claimed(first) = registry.claim(&job) else {
            panic!("first claim must succeed");
        };
        registry.track(&job);
        registry.untrack(&job);

        let Claim::Claimed(second) = registry.claim(&job) else {
            panic!("claim after untrack must succeed");
        };
        assert!(!registry.release(&job, first));
        assert!(registry.is_in_flight(&job));
        assert!(registry.release(&job, second));
        assert!(!registry.is_in_flight(&job));
    }

    #[test]
    fn watch_only_fires_on_membership_change() {
        let registry = SubscriptionRegistry::new();
        let mut rx = registry.watch_tracked();
        let job = JobId::from("job-1");

        registry.track(&job);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 1);

        registry.track(&job);
        assert!(!rx.has_changed().unwrap());

        registry.untrack(&job);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_empty());
    }

    #[test]
    fn clear_empties_both_sets() {
        let registry = SubscriptionRegistry::new();
        let tracked = JobId::from("job-1");
        let pending = JobId::from("job-2");
        registry.track(&tracked);
        let _ = registry.claim(&pending);

        registry.clear();
        assert!(registry.tracked().is_empty());
        assert!(!registry.is_in_flight(&pending));
    }
}
