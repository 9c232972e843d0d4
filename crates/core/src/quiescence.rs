use parking_lot::{Condvar, Mutex};

/// Freezes and unfreezes the simulated clock driving all participants.
///
/// While `is_suspended()` reports `true`, no simulated time advances and no
/// participant state is mutated from the simulation side.
pub trait Quiescence: Send + Sync {
    fn suspend(&self);
    fn resume(&self);
    fn is_suspended(&self) -> bool;

    /// Suspend unless already suspended. Returns `true` when this call did
    /// the suspending and the caller owns the matching `resume()`.
    ///
    /// The default is a plain check-then-act; implementations shared across
    /// threads should make it atomic.
    fn suspend_if_running(&self) -> bool {
        if self.is_suspended() {
            false
        } else {
            self.suspend();
            true
        }
    }

    /// Request global teardown of the simulation.
    fn quit(&self);
}

#[derive(Debug, Default)]
struct SuspendState {
    suspended: bool,
    quit_requested: bool,
}

/// Quiescence controller shared between the simulation thread and any
/// thread issuing suspend/resume requests.
#[derive(Debug, Default)]
pub struct Suspender {
    state: Mutex<SuspendState>,
    wake: Condvar,
}

impl Suspender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block the calling (simulation) thread while suspended.
    ///
    /// Returns `false` once quit has been requested, `true` when the caller
    /// may advance simulated time.
    pub fn wait_while_suspended(&self) -> bool {
        let mut state = self.state.lock();
        while state.suspended && !state.quit_requested {
            self.wake.wait(&mut state);
        }
        !state.quit_requested
    }

    pub fn is_quit_requested(&self) -> bool {
        self.state.lock().quit_requested
    }
}

impl Quiescence for Suspender {
    fn suspend(&self) {
        let mut state = self.state.lock();
        if !state.suspended {
            tracing::debug!("Simulation suspended");
        }
        state.suspended = true;
    }

    fn resume(&self) {
        let mut state = self.state.lock();
        if state.suspended {
            tracing::debug!("Simulation resumed");
        }
        state.suspended = false;
        self.wake.notify_all();
    }

    fn is_suspended(&self) -> bool {
        self.state.lock().suspended
    }

    fn suspend_if_running(&self) -> bool {
        let mut state = self.state.lock();
        if state.suspended {
            return false;
        }
        state.suspended = true;
        tracing::debug!("Simulation suspended");
        true
    }

    fn quit(&self) {
        let mut state = self.state.lock();
        state.quit_requested = true;
        tracing::info!("Simulation quit requested");
        self.wake.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_suspend_resume() {
        let s = Suspender::new();
        assert!(!s.is_suspended());
        s.suspend();
        assert!(s.is_suspended());
        s.resume();
        assert!(!s.is_suspended());
        assert!(s.wait_while_suspended());
    }

    #[test]
    fn test_suspend_if_running_claims_once() {
        let s = Suspender::new();
        assert!(s.suspend_if_running());
        assert!(s.is_suspended());
        assert!(!s.suspend_if_running());
        s.resume();
        assert!(!s.is_suspended());
    }

    #[test]
    fn test_concurrent_claims_have_single_owner() {
        let s = Arc::new(Suspender::new());
        let claims: Vec<_> = (0..8)
            .map(|_| {
                let s = s.clone();
                thread::spawn(move || s.suspend_if_running())
            })
            .collect();
        let owners = claims
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|claimed| *claimed)
            .count();
        assert_eq!(owners, 1);
        assert!(s.is_suspended());
    }

    #[test]
    fn test_waiter_released_by_resume() {
        let s = Arc::new(Suspender::new());
        s.suspend();

        let waiter = {
            let s = s.clone();
            thread::spawn(move || s.wait_while_suspended())
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        s.resume();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_quit_wakes_suspended_waiter() {
        let s = Arc::new(Suspender::new());
        s.suspend();

        let waiter = {
            let s = s.clone();
            thread::spawn(move || s.wait_while_suspended())
        };

        s.quit();
        assert!(!waiter.join().unwrap());
        assert!(s.is_quit_requested());
    }
}
