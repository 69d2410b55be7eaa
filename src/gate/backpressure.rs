//! Sliding-window flow control between a session's sender and receiver
//!
//! The sender takes a token before writing a chunk; the receiver returns it
//! once the chunk has been fully read. At most `capacity` chunks can be on
//! the wire unacknowledged.

use crate::gate::error::{GateError, GateResult};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Semaphore;

/// Bounded counting token store of capacity W
pub struct BackpressureGate {
    capacity: usize,
    tokens: Semaphore,
    /// Tokens taken and not yet returned, always in `[0, capacity]`
    outstanding: AtomicUsize,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl BackpressureGate {
    /// Create a gate with all `capacity` tokens available
    pub fn new(capacity: usize) -> GateResult<Self> {
        if capacity == 0 {
            return Err(GateError::ZeroWindow);
        }

        Ok(Self {
            capacity,
            tokens: Semaphore::new(capacity),
            outstanding: AtomicUsize::new(0),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
        })
    }

    /// Wait for a token and consume it.
    ///
    /// Fails with [`GateError::Closed`] once the gate has been closed, including
    /// when a caller is already parked here.
    pub async fn acquire(&self) -> GateResult<()> {
        let permit = self.tokens.acquire().await.map_err(|_| GateError::Closed)?;
        permit.forget();
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        self.acquired.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Non-blocking variant of [`acquire`](Self::acquire). Returns `false` if no
    /// token is currently available or the gate is closed.
    pub fn try_acquire(&self) -> bool {
        match self.tokens.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.outstanding.fetch_add(1, Ordering::AcqRel);
                self.acquired.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => false,
        }
    }

    /// Return one token.
    ///
    /// Never blocks. Returns `false` without changing state when no token is
    /// outstanding, so the available count can never exceed the capacity.
    pub fn release(&self) -> bool {
        let returned = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();

        if returned {
            self.tokens.add_permits(1);
            self.released.fetch_add(1, Ordering::Relaxed);
        }
        returned
    }

    /// Close the gate, waking any parked `acquire` with an error.
    /// Closing twice is a no-op.
    pub fn close(&self) {
        self.tokens.close();
    }

    pub fn is_closed(&self) -> bool {
        self.tokens.is_closed()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Chunks sent but not yet consumed by the receiver
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Tokens currently available to the sender
    pub fn available(&self) -> usize {
        self.tokens.available_permits()
    }

    /// Total tokens handed out over the gate's lifetime
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    /// Total tokens returned over the gate's lifetime
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for BackpressureGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackpressureGate")
            .field("capacity", &self.capacity)
            .field("outstanding", &self.outstanding())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_zero_window_rejected() {
        assert_eq!(BackpressureGate::new(0).unwrap_err(), GateError::ZeroWindow);
    }

    #[tokio::test]
    async fn test_acquire_up_to_capacity() {
        let gate = BackpressureGate::new(2).unwrap();

        gate.acquire().await.unwrap();
        gate.acquire().await.unwrap();
        assert_eq!(gate.outstanding(), 2);
        assert_eq!(gate.available(), 0);
        assert!(!gate.try_acquire());
    }

    #[tokio::test]
    async fn test_acquire_blocks_until_release() {
        let gate = Arc::new(BackpressureGate::new(1).unwrap());
        gate.acquire().await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished(), "acquire should park while window is full");

        assert!(gate.release());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(gate.outstanding(), 1);
    }

    #[test]
    fn test_release_is_capped() {
        let gate = BackpressureGate::new(2).unwrap();

        assert!(!gate.release());
        assert!(!gate.release());
        assert_eq!(gate.available(), 2);
        assert_eq!(gate.outstanding(), 0);
        assert_eq!(gate.released(), 0);
    }

    #[tokio::test]
    async fn test_close_wakes_parked_acquire() {
        let gate = Arc::new(BackpressureGate::new(1).unwrap());
        gate.acquire().await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        gate.close();
        gate.close();
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(GateError::Closed));
        assert!(gate.is_closed());
    }

    #[tokio::test]
    async fn test_outstanding_never_exceeds_window() {
        for window in [1usize, 2, 3, 8] {
            let gate = Arc::new(BackpressureGate::new(window).unwrap());
            let rounds = 200u64;

            let producer = {
                let gate = gate.clone();
                tokio::spawn(async move {
                    for _ in 0..rounds {
                        gate.acquire().await.unwrap();
                        assert!(gate.outstanding() <= window);
                    }
                })
            };

            let consumer = {
                let gate = gate.clone();
                tokio::spawn(async move {
                    let mut returned = 0;
                    while returned < rounds {
                        if gate.release() {
                            returned += 1;
                        } else {
                            tokio::task::yield_now().await;
                        }
                        assert!(gate.outstanding() <= window);
                    }
                })
            };

            producer.await.unwrap();
            consumer.await.unwrap();
            assert_eq!(gate.acquired(), rounds);
            assert_eq!(gate.released(), rounds);
            assert_eq!(gate.available(), window);
        }
    }
}
