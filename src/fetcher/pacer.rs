use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{Mutex, OwnedSemaphorePermit, Semaphore},
    time::{Instant, sleep_until},
};

/// Spaces outgoing requests and caps how many are in flight.
///
/// Shared by every task of a run, independent of how many pages are being
/// processed at once.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
    in_flight: Arc<Semaphore>,
}

impl Pacer {
    pub fn new(interval: Duration, max_in_flight: usize) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
            in_flight: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Waits for a free request slot. The permit must be held until the
    /// response body has been read.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        let permit = self
            .in_flight
            .clone()
            .acquire_owned()
            .await
            .unwrap_or_else(|_| unreachable!("pacer semaphore is never closed"));

        let mut next_slot = self.next_slot.lock().await;
        if let Some(at) = *next_slot {
            sleep_until(at).await;
        }
        *next_slot = Some(Instant::now() + self.interval);

        permit
    }
}
