//! Request coalescing for identical in-flight dispatches
//!
//! The first caller for a fingerprint becomes the leader and drives the
//! provider call. Everyone else becomes a waiter on a watch channel and
//! shares the leader's outcome. A leader dropped before completing closes
//! the channel, which waiters observe as an aborted flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use super::GatewayResponse;
use crate::error::{Error, FailedAttempt};
use crate::fingerprint::FingerprintHash;

/// Shared result of a coalesced dispatch
pub(crate) type FlightOutcome = std::result::Result<GatewayResponse, FlightFailure>;

/// Cloneable failure subset that a flight can broadcast to its waiters
#[derive(Debug, Clone)]
pub(crate) enum FlightFailure {
    NoEligibleModel(String),
    ProviderUnavailable { attempted: Vec<FailedAttempt> },
}

impl From<FlightFailure> for Error {
    fn from(failure: FlightFailure) -> Self {
        match failure {
            FlightFailure::NoEligibleModel(task) => Error::NoEligibleModel(task),
            FlightFailure::ProviderUnavailable { attempted } => {
                Error::ProviderUnavailable { attempted }
            }
        }
    }
}

/// Registry of in-flight dispatches keyed by request fingerprint
#[derive(Debug, Clone, Default)]
pub(crate) struct SingleFlight {
    flights: Arc<Mutex<HashMap<FingerprintHash, watch::Receiver<Option<FlightOutcome>>>>>,
}

impl SingleFlight {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Join the flight for a fingerprint, becoming leader or waiter
    pub(crate) fn join(&self, key: FingerprintHash) -> Flight {
        match self.flights.lock() {
            Ok(mut flights) => {
                if let Some(rx) = flights.get(&key) {
                    return Flight::Waiter(FlightWaiter { rx: rx.clone() });
                }
                let (tx, rx) = watch::channel(None);
                flights.insert(key, rx);
                Flight::Leader(FlightLeader {
                    key,
                    tx,
                    flights: Arc::clone(&self.flights),
                    registered: true,
                    completed: false,
                })
            }
            Err(_) => {
                // Lock poisoned: run without coalescing rather than failing the request
                let (tx, _rx) = watch::channel(None);
                Flight::Leader(FlightLeader {
                    key,
                    tx,
                    flights: Arc::clone(&self.flights),
                    registered: false,
                    completed: false,
                })
            }
        }
    }

    /// Number of dispatches currently in flight
    pub(crate) fn in_flight(&self) -> usize {
        self.flights.lock().map(|f| f.len()).unwrap_or(0)
    }
}

/// Role assigned to a caller joining a flight
#[derive(Debug)]
pub(crate) enum Flight {
    Leader(FlightLeader),
    Waiter(FlightWaiter),
}

/// The caller responsible for driving the dispatch
#[derive(Debug)]
pub(crate) struct FlightLeader {
    key: FingerprintHash,
    tx: watch::Sender<Option<FlightOutcome>>,
    flights: Arc<Mutex<HashMap<FingerprintHash, watch::Receiver<Option<FlightOutcome>>>>>,
    registered: bool,
    completed: bool,
}

impl FlightLeader {
    /// Subscribe to this flight's outcome, like any other waiter
    pub(crate) fn subscribe(&self) -> FlightWaiter {
        FlightWaiter {
            rx: self.tx.subscribe(),
        }
    }

    /// Publish the outcome and retire the flight
    ///
    /// The registry entry is removed before the outcome is sent, so a new
    /// request arriving after removal starts a fresh flight and finds any
    /// cache entry the finished one stored.
    pub(crate) fn complete(mut self, outcome: FlightOutcome) {
        self.completed = true;
        if self.registered {
            if let Ok(mut flights) = self.flights.lock() {
                flights.remove(&self.key);
            }
        }
        let _ = self.tx.send(Some(outcome));
    }
}

impl Drop for FlightLeader {
    fn drop(&mut self) {
        // A leader that never completed leaves by closing the channel;
        // waiters see the closure as an aborted flight.
        if !self.completed && self.registered {
            if let Ok(mut flights) = self.flights.lock() {
                flights.remove(&self.key);
            }
        }
    }
}

/// A caller sharing the outcome of someone else's dispatch
#[derive(Debug)]
pub(crate) struct FlightWaiter {
    rx: watch::Receiver<Option<FlightOutcome>>,
}

impl FlightWaiter {
    /// Wait for the flight to finish; `None` means it was aborted
    pub(crate) async fn outcome(mut self) -> Option<FlightOutcome> {
        match self.rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_response() -> GatewayResponse {
        GatewayResponse {
            response: "shared text".to_string(),
            model_used: "test/model-a".to_string(),
            cached: false,
            cache_tier: None,
            cost_usd: 0.01,
            latency_ms: 5,
        }
    }

    #[test]
    fn test_first_join_is_leader() {
        let flights = SingleFlight::new();
        let flight = flights.join([1; 32]);
        assert!(matches!(flight, Flight::Leader(_)));
        assert_eq!(flights.in_flight(), 1);
    }

    #[test]
    fn test_second_join_is_waiter() {
        let flights = SingleFlight::new();
        let _leader = flights.join([1; 32]);
        assert!(matches!(flights.join([1; 32]), Flight::Waiter(_)));
        // A different fingerprint still gets its own leader
        let second = flights.join([2; 32]);
        assert!(matches!(second, Flight::Leader(_)));
        assert_eq!(flights.in_flight(), 2);
    }

    #[tokio::test]
    async fn test_complete_reaches_waiters() {
        let flights = SingleFlight::new();
        let leader = match flights.join([1; 32]) {
            Flight::Leader(leader) => leader,
            Flight::Waiter(_) => panic!("expected leader"),
        };

        let waiter_a = match flights.join([1; 32]) {
            Flight::Waiter(waiter) => waiter,
            Flight::Leader(_) => panic!("expected waiter"),
        };
        let waiter_b = leader.subscribe();

        leader.complete(Ok(sample_response()));

        let outcome_a = waiter_a.outcome().await.unwrap().unwrap();
        let outcome_b = waiter_b.outcome().await.unwrap().unwrap();
        assert_eq!(outcome_a.response, "shared text");
        assert_eq!(outcome_b.model_used, "test/model-a");
    }

    #[tokio::test]
    async fn test_failure_outcome_propagates() {
        let flights = SingleFlight::new();
        let leader = match flights.join([1; 32]) {
            Flight::Leader(leader) => leader,
            Flight::Waiter(_) => panic!("expected leader"),
        };
        let waiter = leader.subscribe();

        leader.complete(Err(FlightFailure::ProviderUnavailable {
            attempted: vec![FailedAttempt::new("test/model-a", "boom")],
        }));

        let outcome = waiter.outcome().await.unwrap();
        match outcome {
            Err(FlightFailure::ProviderUnavailable { attempted }) => {
                assert_eq!(attempted.len(), 1);
                assert_eq!(attempted[0].model, "test/model-a");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_map_cleared_after_complete() {
        let flights = SingleFlight::new();
        let leader = match flights.join([1; 32]) {
            Flight::Leader(leader) => leader,
            Flight::Waiter(_) => panic!("expected leader"),
        };
        leader.complete(Ok(sample_response()));

        assert_eq!(flights.in_flight(), 0);
        assert!(matches!(flights.join([1; 32]), Flight::Leader(_)));
    }

    #[tokio::test]
    async fn test_dropped_waiter_leaves_flight_intact() {
        let flights = SingleFlight::new();
        let leader = match flights.join([1; 32]) {
            Flight::Leader(leader) => leader,
            Flight::Waiter(_) => panic!("expected leader"),
        };

        let dropped = match flights.join([1; 32]) {
            Flight::Waiter(waiter) => waiter,
            Flight::Leader(_) => panic!("expected waiter"),
        };
        let surviving = leader.subscribe();
        drop(dropped);

        leader.complete(Ok(sample_response()));

        let outcome = surviving.outcome().await.unwrap().unwrap();
        assert_eq!(outcome.response, "shared text");
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_dropped_leader_aborts_waiters() {
        let flights = SingleFlight::new();
        let leader = match flights.join([1; 32]) {
            Flight::Leader(leader) => leader,
            Flight::Waiter(_) => panic!("expected leader"),
        };
        let waiter = leader.subscribe();

        drop(leader);

        assert!(waiter.outcome().await.is_none());
        assert_eq!(flights.in_flight(), 0);
    }
}
