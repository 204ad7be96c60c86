use std::fmt;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Lifecycle of the hosted module as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModuleState {
    /// No module is loaded and none is being started.
    #[default]
    Idle,
    Loading,
    Running,
    /// A stop was requested and the module has not exited yet.
    Stopping,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModuleState::Idle => "idle",
            ModuleState::Loading => "loading",
            ModuleState::Running => "running",
            ModuleState::Stopping => "stopping",
        })
    }
}

/// A [`ModuleState`] other threads can wait on.
#[derive(Debug, Default)]
pub(crate) struct StateCell {
    state: Mutex<ModuleState>,
    changed: Condvar,
}

impl StateCell {
    pub fn get(&self) -> ModuleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, state: ModuleState) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != state {
            tracing::debug!(from = %*current, to = %state, "module state");
            *current = state;
            self.changed.notify_all();
        }
    }

    /// Block until the state equals `target` or `timeout` passes.
    pub fn wait_for(&self, target: ModuleState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while *current != target {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            current = self
                .changed
                .wait_timeout(current, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_for_wakes_on_change() {
        let cell = Arc::new(StateCell::default());
        cell.set(ModuleState::Running);

        let waiter = {
            let cell = cell.clone();
            thread::spawn(move || cell.wait_for(ModuleState::Idle, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        cell.set(ModuleState::Idle);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_wait_for_times_out() {
        let cell = StateCell::default();
        cell.set(ModuleState::Loading);
        assert!(!cell.wait_for(ModuleState::Running, Duration::from_millis(30)));
        assert_eq!(cell.get(), ModuleState::Loading);
    }
}
