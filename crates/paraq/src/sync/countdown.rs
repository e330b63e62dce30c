use std::sync::Arc;
use std::time::Duration;

use paraq_error::Result;
use parking_lot::{Condvar, Mutex};

use crate::runtime::cancel::MergedCancellation;

/// How often a blocked waiter rechecks cancellation.
const CANCELLATION_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Event that's set once it has been signaled a fixed number of times.
#[derive(Debug)]
pub struct CountdownEvent {
    remaining: Mutex<usize>,
    cond: Condvar,
}

impl CountdownEvent {
    pub fn new(count: usize) -> Self {
        CountdownEvent {
            remaining: Mutex::new(count),
            cond: Condvar::new(),
        }
    }

    /// Decrement the count, waking all waiters when it reaches zero.
    ///
    /// Returns true if this signal set the event. Signaling an event that's
    /// already set does nothing.
    pub fn signal(&self) -> bool {
        let mut remaining = self.remaining.lock();
        if *remaining == 0 {
            return false;
        }
        *remaining -= 1;
        if *remaining == 0 {
            self.cond.notify_all();
            return true;
        }
        false
    }

    pub fn is_set(&self) -> bool {
        *self.remaining.lock() == 0
    }

    /// Block until the event is set or the query is canceled.
    pub fn wait(&self, cancellation: &MergedCancellation) -> Result<()> {
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            cancellation.check()?;
            let _ = self
                .cond
                .wait_for(&mut remaining, CANCELLATION_CHECK_INTERVAL);
        }
        Ok(())
    }
}

/// One participant's obligation to signal a [`CountdownEvent`].
///
/// Signals at most once. If the participant never arrives explicitly (early
/// drop, error), arrival happens on drop so other participants aren't left
/// waiting.
#[derive(Debug)]
pub struct BarrierArrival {
    event: Arc<CountdownEvent>,
    arrived: bool,
}

impl BarrierArrival {
    pub fn new(event: Arc<CountdownEvent>) -> Self {
        BarrierArrival {
            event,
            arrived: false,
        }
    }

    pub fn arrive(&mut self) {
        if !self.arrived {
            self.arrived = true;
            self.event.signal();
        }
    }

    pub fn has_arrived(&self) -> bool {
        self.arrived
    }
}

impl Drop for BarrierArrival {
    fn drop(&mut self) {
        self.arrive();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn set_after_count_signals() {
        let event = CountdownEvent::new(2);
        assert!(!event.signal());
        assert!(!event.is_set());
        assert!(event.signal());
        assert!(event.is_set());
        assert!(!event.signal());
    }

    #[test]
    fn zero_count_is_already_set() {
        let event = CountdownEvent::new(0);
        event.wait(&MergedCancellation::new([])).unwrap();
    }

    #[test]
    fn arrival_signals_once_and_on_drop() {
        let event = Arc::new(CountdownEvent::new(2));

        let mut a = BarrierArrival::new(event.clone());
        a.arrive();
        a.arrive();
        assert!(!event.is_set());

        let b = BarrierArrival::new(event.clone());
        drop(b);
        assert!(event.is_set());
    }

    #[test]
    fn wait_released_by_other_thread() {
        let event = Arc::new(CountdownEvent::new(1));
        let cancel = MergedCancellation::new([]);

        let handle = {
            let event = event.clone();
            thread::spawn(move || event.signal())
        };

        event.wait(&cancel).unwrap();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn wait_interrupted_by_cancel() {
        let event = CountdownEvent::new(1);
        let cancel = MergedCancellation::new([]);
        cancel.cancel_internal();

        let err = event.wait(&cancel).unwrap_err();
        assert!(err.is_canceled());
    }
}
