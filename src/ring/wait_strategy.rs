use std::hint;
use std::sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::Duration;

use serde::Deserialize;

use super::Alerted;

const SPIN_TRIES: u32 = 100;
const YIELD_TRIES: u32 = 200;
const SLEEP_INTERVAL: Duration = Duration::from_micros(100);
const BLOCK_INTERVAL: Duration = Duration::from_millis(1);

/// How a thread waits for a sequence to become available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategy {
    /// Spin on the CPU. Lowest latency, burns a core per waiting thread.
    BusySpin,
    /// Spin briefly, then yield the time slice.
    Yielding,
    /// Spin, yield, then sleep in short intervals.
    Sleeping,
    /// Park on a condition variable until signalled.
    #[default]
    Blocking,
}

/// Shared waiting/signalling point for one ring buffer and its consumers.
pub struct Waiter {
    strategy: WaitStrategy,
    lock: Mutex<()>,
    wake: Condvar,
    parked: AtomicUsize,
}

impl Waiter {
    pub fn new(strategy: WaitStrategy) -> Self {
        Waiter {
            strategy,
            lock: Mutex::new(()),
            wake: Condvar::new(),
            parked: AtomicUsize::new(0),
        }
    }

    pub fn strategy(&self) -> WaitStrategy {
        self.strategy
    }

    /// Wait until `ready` returns true, or fail once `alert` is raised.
    ///
    /// `ready` is checked before `alert`, so work that is already available is
    /// always observed.
    pub fn wait_until<F>(&self, alert: &AtomicBool, mut ready: F) -> Result<(), Alerted>
    where
        F: FnMut() -> bool,
    {
        let mut tries = 0u32;
        loop {
            if ready() {
                return Ok(());
            }
            if alert.load(Ordering::Acquire) {
                return Err(Alerted);
            }

            match self.strategy {
                WaitStrategy::BusySpin => hint::spin_loop(),
                WaitStrategy::Yielding => {
                    if tries < SPIN_TRIES {
                        tries += 1;
                        hint::spin_loop();
                    } else {
                        thread::yield_now();
                    }
                }
                WaitStrategy::Sleeping => {
                    if tries < SPIN_TRIES {
                        tries += 1;
                        hint::spin_loop();
                    } else if tries < YIELD_TRIES {
                        tries += 1;
                        thread::yield_now();
                    } else {
                        thread::sleep(SLEEP_INTERVAL);
                    }
                }
                WaitStrategy::Blocking => self.park(alert, &mut ready),
            }
        }
    }

    fn park<F>(&self, alert: &AtomicBool, ready: &mut F)
    where
        F: FnMut() -> bool,
    {
        self.parked.fetch_add(1, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        let guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !ready() && !alert.load(Ordering::Acquire) {
            // The timeout bounds the cost of a wakeup racing with the check above.
            let _ = self.wake.wait_timeout(guard, BLOCK_INTERVAL);
        }
        self.parked.fetch_sub(1, Ordering::SeqCst);
    }

    /// Wake parked threads after progress was published.
    pub fn signal(&self) {
        if self.strategy != WaitStrategy::Blocking {
            return;
        }
        fence(Ordering::SeqCst);
        if self.parked.load(Ordering::SeqCst) > 0 {
            self.signal_all();
        }
    }

    /// Wake every parked thread unconditionally.
    pub fn signal_all(&self) {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.wake.notify_all();
    }
}
