use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Mutex, PoisonError};

/// Edge-level update signal.
///
/// Any number of raises before the watcher wakes collapse into one cycle.
#[derive(Debug)]
pub struct UpdateTrigger {
    tx: SyncSender<()>,
    rx: Mutex<Receiver<()>>,
}

/// Raising side of an [`UpdateTrigger`], cheap to clone into callbacks.
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    tx: SyncSender<()>,
}

impl UpdateTrigger {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::sync_channel(1);
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn handle(&self) -> TriggerHandle {
        TriggerHandle {
            tx: self.tx.clone(),
        }
    }

    /// Raise the signal. Returns `false` if one was already pending.
    pub fn fire(&self) -> bool {
        self.handle().fire()
    }

    /// Block until the signal is raised, consuming it.
    pub fn wait(&self) {
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        // `self` keeps a sender alive, so the channel never disconnects.
        let _ = rx.recv();
    }

    /// Consume a pending signal without blocking.
    pub fn take(&self) -> bool {
        self.rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_recv()
            .is_ok()
    }
}

impl Default for UpdateTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerHandle {
    pub fn fire(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => false,
            Err(TrySendError::Disconnected(())) => false,
        }
    }
}
