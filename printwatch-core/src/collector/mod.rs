//! Delivery of print events to the central collector
//!
//! ## Architecture
//!
//! Delivery is "verify, then send":
//! - `POST /central/verifyimpression` asks whether an identical event is
//!   already stored
//! - `POST /central/receptprintreq` stores it when it is not
//!
//! Any event that cannot be confirmed as stored goes to the [`PendingQueue`],
//! a directory of JSON files that is drained at the start of every tick.
//! Nothing leaves the queue until the collector accepts it or reports it as
//! a duplicate.
//!
//! [`Deliver`] is the seam between the two: the queue and the agent only
//! need something that turns an event into a [`DeliveryOutcome`].

mod client;
mod queue;

pub use client::DeliveryClient;
pub use queue::{DrainReport, PendingId, PendingQueue};

use crate::types::{DeliveryOutcome, PrintEvent};
use std::future::Future;

/// Pushes one event to the collector.
pub trait Deliver {
    /// Attempt delivery. Never panics or errors; failures are reported as
    /// [`DeliveryOutcome::Failed`].
    fn deliver(&self, event: &PrintEvent) -> impl Future<Output = DeliveryOutcome>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted outcomes in order, then repeats the fallback.
    pub struct ScriptedDelivery {
        outcomes: Mutex<VecDeque<DeliveryOutcome>>,
        fallback: DeliveryOutcome,
        pub seen: Mutex<Vec<PrintEvent>>,
    }

    impl ScriptedDelivery {
        pub fn new(outcomes: Vec<DeliveryOutcome>, fallback: DeliveryOutcome) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                fallback,
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn always(outcome: DeliveryOutcome) -> Self {
            Self::new(Vec::new(), outcome)
        }

        pub fn seen_users(&self) -> Vec<String> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.user.clone())
                .collect()
        }
    }

    impl Deliver for ScriptedDelivery {
        async fn deliver(&self, event: &PrintEvent) -> DeliveryOutcome {
            self.seen.lock().unwrap().push(event.clone());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone())
        }
    }
}
