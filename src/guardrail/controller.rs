//! Per-connection query budget enforcement

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

/// Width of the trailing rate window
const RATE_WINDOW_SECS: i64 = 60;

/// Rate and concurrency limits for one replica connection
#[derive(Debug, Clone, PartialEq)]
pub struct GuardrailLimits {
    /// Queries allowed in any trailing 60-second window
    pub max_queries_per_minute: usize,
    /// Queries allowed in flight at once
    pub max_concurrent_queries: usize,
    /// Upper bound on a single query, including session setup
    pub query_timeout: Duration,
}

impl Default for GuardrailLimits {
    fn default() -> Self {
        Self {
            max_queries_per_minute: 60,
            max_concurrent_queries: 5,
            query_timeout: Duration::from_secs(2),
        }
    }
}

impl GuardrailLimits {
    pub fn with_max_queries_per_minute(mut self, max: usize) -> Self {
        self.max_queries_per_minute = max;
        self
    }

    pub fn with_max_concurrent_queries(mut self, max: usize) -> Self {
        self.max_concurrent_queries = max;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }
}

/// Budget bookkeeping for one connection. Only the controller touches this,
/// always under the per-connection mutex.
#[derive(Debug)]
struct GuardrailState {
    limits: GuardrailLimits,
    recent_queries: VecDeque<DateTime<Utc>>,
    in_flight: usize,
}

impl GuardrailState {
    fn new(limits: GuardrailLimits) -> Self {
        Self {
            limits,
            recent_queries: VecDeque::new(),
            in_flight: 0,
        }
    }

    /// Drop window entries older than 60 seconds
    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::seconds(RATE_WINDOW_SECS);
        while let Some(front) = self.recent_queries.front() {
            if *front <= cutoff {
                self.recent_queries.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Enforces per-connection rate and concurrency budgets.
///
/// `acquire` asks whether a query may proceed right now; `commit` records
/// the query and takes an in-flight slot; the returned [`GuardrailSlot`]
/// releases that slot when dropped, so every exit path gives it back.
/// Connection ids without a registered entry run under the default limits.
pub struct GuardrailController {
    defaults: GuardrailLimits,
    states: DashMap<i64, Mutex<GuardrailState>>,
}

impl GuardrailController {
    pub fn new(defaults: GuardrailLimits) -> Self {
        Self {
            defaults,
            states: DashMap::new(),
        }
    }

    /// Install limits for a connection, resetting its bookkeeping
    pub fn configure(&self, connection_id: i64, limits: GuardrailLimits) {
        self.states
            .insert(connection_id, Mutex::new(GuardrailState::new(limits)));
    }

    /// Drop a connection's guardrail state
    pub fn remove(&self, connection_id: i64) {
        self.states.remove(&connection_id);
    }

    /// Limits in force for a connection
    pub fn limits(&self, connection_id: i64) -> GuardrailLimits {
        self.states
            .get(&connection_id)
            .map(|entry| entry.lock().limits.clone())
            .unwrap_or_else(|| self.defaults.clone())
    }

    /// Whether a query may proceed now. Does not block and does not
    /// reserve anything; pair with [`commit`](Self::commit) once the query
    /// is actually issued.
    pub fn acquire(&self, connection_id: i64) -> bool {
        self.acquire_at(connection_id, Utc::now())
    }

    pub fn acquire_at(&self, connection_id: i64, now: DateTime<Utc>) -> bool {
        self.with_state(connection_id, |state| {
            state.prune(now);

            if state.recent_queries.len() >= state.limits.max_queries_per_minute {
                tracing::warn!(
                    connection_id,
                    window = state.recent_queries.len(),
                    limit = state.limits.max_queries_per_minute,
                    "Query rate budget exhausted"
                );
                return false;
            }

            if state.in_flight >= state.limits.max_concurrent_queries {
                tracing::warn!(
                    connection_id,
                    in_flight = state.in_flight,
                    limit = state.limits.max_concurrent_queries,
                    "Concurrent query budget exhausted"
                );
                return false;
            }

            true
        })
    }

    /// Record an issued query and take an in-flight slot
    pub fn commit(&self, connection_id: i64) -> GuardrailSlot<'_> {
        self.commit_at(connection_id, Utc::now())
    }

    pub fn commit_at(&self, connection_id: i64, now: DateTime<Utc>) -> GuardrailSlot<'_> {
        self.with_state(connection_id, |state| {
            state.recent_queries.push_back(now);
            state.in_flight += 1;
        });
        GuardrailSlot {
            controller: self,
            connection_id,
        }
    }

    /// Give back an in-flight slot. Saturates at zero.
    pub fn release(&self, connection_id: i64) {
        self.with_state(connection_id, |state| {
            state.in_flight = state.in_flight.saturating_sub(1);
        });
    }

    /// Current in-flight count, for introspection
    pub fn in_flight(&self, connection_id: i64) -> usize {
        self.with_state(connection_id, |state| state.in_flight)
    }

    fn with_state<R>(&self, connection_id: i64, f: impl FnOnce(&mut GuardrailState) -> R) -> R {
        let entry = self
            .states
            .entry(connection_id)
            .or_insert_with(|| Mutex::new(GuardrailState::new(self.defaults.clone())));
        let mut state = entry.lock();
        f(&mut state)
    }
}

/// In-flight slot taken by [`GuardrailController::commit`]. Dropping it
/// releases the slot, which keeps the budget correct on every exit path.
pub struct GuardrailSlot<'a> {
    controller: &'a GuardrailController,
    connection_id: i64,
}

impl Drop for GuardrailSlot<'_> {
    fn drop(&mut self) {
        self.controller.release(self.connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_limits() -> GuardrailLimits {
        GuardrailLimits::default()
            .with_max_queries_per_minute(3)
            .with_max_concurrent_queries(2)
    }

    #[test]
    fn test_rate_window_denies_then_refills() {
        let controller = GuardrailController::new(GuardrailLimits::default());
        controller.configure(7, small_limits());

        let start = Utc::now();
        for i in 0..3 {
            let now = start + chrono::Duration::seconds(i);
            assert!(controller.acquire_at(7, now));
            drop(controller.commit_at(7, now));
        }

        // Window is full
        let now = start + chrono::Duration::seconds(5);
        assert!(!controller.acquire_at(7, now));

        // Once the oldest entry ages past 60s the budget refills
        let later = start + chrono::Duration::seconds(61);
        assert!(controller.acquire_at(7, later));
    }

    #[test]
    fn test_concurrency_denies_until_release() {
        let controller = GuardrailController::new(GuardrailLimits::default());
        controller.configure(1, small_limits());

        let now = Utc::now();
        let slot_a = controller.commit_at(1, now);
        let slot_b = controller.commit_at(1, now);
        assert_eq!(controller.in_flight(1), 2);
        assert!(!controller.acquire_at(1, now));

        drop(slot_a);
        assert_eq!(controller.in_flight(1), 1);
        assert!(controller.acquire_at(1, now));

        drop(slot_b);
        assert_eq!(controller.in_flight(1), 0);
    }

    #[test]
    fn test_release_never_goes_below_zero() {
        let controller = GuardrailController::new(GuardrailLimits::default());
        controller.release(42);
        controller.release(42);
        assert_eq!(controller.in_flight(42), 0);
    }

    #[test]
    fn test_unregistered_connection_uses_defaults() {
        let defaults = GuardrailLimits::default().with_max_concurrent_queries(1);
        let controller = GuardrailController::new(defaults.clone());

        assert_eq!(controller.limits(99), defaults);

        let now = Utc::now();
        let _slot = controller.commit_at(99, now);
        assert!(!controller.acquire_at(99, now));
    }

    #[test]
    fn test_budgets_are_per_connection() {
        let controller = GuardrailController::new(GuardrailLimits::default());
        controller.configure(1, small_limits());
        controller.configure(2, small_limits());

        let now = Utc::now();
        let _a = controller.commit_at(1, now);
        let _b = controller.commit_at(1, now);
        assert!(!controller.acquire_at(1, now));

        // Exhausting connection 1 leaves connection 2 untouched
        assert!(controller.acquire_at(2, now));
    }

    #[test]
    fn test_configure_resets_state() {
        let controller = GuardrailController::new(GuardrailLimits::default());
        controller.configure(5, small_limits());

        let now = Utc::now();
        let slot = controller.commit_at(5, now);
        std::mem::forget(slot); // simulate a leaked slot from a replaced connection
        controller.configure(5, small_limits());
        assert_eq!(controller.in_flight(5), 0);
    }
}
