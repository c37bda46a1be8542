//! Counted dispatch permits.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{FlowError, FlowResult};

/// Counted permits gating concurrent batch dispatches against one range.
///
/// The dispatcher holds one [`DispatchPermit`] per in-flight batch; the
/// congestion controller grows the budget with [`PermitLimiter::release`]
/// and shrinks it with [`PermitLimiter::withhold`], which blocks until the
/// permits can actually be taken out of circulation.
#[derive(Debug)]
pub struct PermitLimiter {
    semaphore: Arc<Semaphore>,
}

impl PermitLimiter {
    /// Creates a limiter with `initial` permits.
    #[must_use]
    pub fn new(initial: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(initial as usize)),
        }
    }

    /// Acquires one permit, waiting until one is available.
    ///
    /// The permit is released when the returned guard is dropped.
    ///
    /// # Errors
    /// Returns [`FlowError::Closed`] if the limiter was closed.
    pub async fn acquire(&self) -> FlowResult<DispatchPermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| FlowError::Closed)?;
        Ok(DispatchPermit { _permit: permit })
    }

    /// Permanently removes `n` permits from circulation, waiting until they
    /// can be acquired.
    ///
    /// # Errors
    /// Returns [`FlowError::Closed`] if the limiter was closed.
    pub async fn withhold(&self, n: u32) -> FlowResult<()> {
        if n == 0 {
            return Ok(());
        }
        let permits = self
            .semaphore
            .acquire_many(n)
            .await
            .map_err(|_| FlowError::Closed)?;
        permits.forget();
        Ok(())
    }

    /// Adds `n` permits to the budget.
    pub fn release(&self, n: u32) {
        if n > 0 {
            self.semaphore.add_permits(n as usize);
        }
    }

    /// Returns the number of currently available permits.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Closes the limiter; pending and future acquires fail.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// RAII guard for one dispatch permit; released on drop.
#[derive(Debug)]
pub struct DispatchPermit {
    _permit: OwnedSemaphorePermit,
}
