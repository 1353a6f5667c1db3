//! Fire-and-forget notifications from the controller to UI consumers.
//!
//! Each channel is a one-slot mailbox: posting overwrites whatever the
//! consumer has not yet taken. The controller never blocks on a consumer and
//! a slow consumer only ever sees the freshest value.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::frame::Frame;

/// Single-slot, latest-value channel.
pub struct Mailbox<T> {
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pending value. Returns true if an untaken value was dropped.
    pub fn post(&self, value: T) -> bool {
        self.lock().replace(value).is_some()
    }

    /// Take the pending value, leaving the slot empty.
    pub fn take(&self) -> Option<T> {
        self.lock().take()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Clone> Mailbox<T> {
    /// Copy of the pending value without taking it.
    pub fn peek(&self) -> Option<T> {
        self.lock().clone()
    }
}

/// Lockout state as seen by an overlay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LockoutNotice {
    pub active: bool,
    pub remaining_secs: u32,
}

impl LockoutNotice {
    pub fn active(remaining_secs: u32) -> Self {
        Self {
            active: true,
            remaining_secs,
        }
    }

    pub fn cleared() -> Self {
        Self::default()
    }
}

/// Controller side.
#[derive(Clone, Default)]
pub struct Notifier {
    lockout: Mailbox<LockoutNotice>,
    mode: Mailbox<String>,
    preview: Mailbox<Frame>,
}

/// Consumer side. Cloneable; every clone shares the same slots.
#[derive(Clone)]
pub struct NotifierReceivers {
    pub lockout: Mailbox<LockoutNotice>,
    pub mode: Mailbox<String>,
    pub preview: Mailbox<Frame>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receivers(&self) -> NotifierReceivers {
        NotifierReceivers {
            lockout: self.lockout.clone(),
            mode: self.mode.clone(),
            preview: self.preview.clone(),
        }
    }

    pub fn lockout(&self, notice: LockoutNotice) {
        self.lockout.post(notice);
    }

    pub fn mode(&self, label: &str) {
        self.mode.post(label.to_string());
    }

    pub fn preview(&self, frame: Frame) {
        self.preview.post(frame);
    }
}
