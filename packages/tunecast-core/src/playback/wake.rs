//! Keep-alive resource held while a backend is playing.

use parking_lot::Mutex;

use super::backend::BackendKind;

/// A keep-alive resource (wake lock, inhibitor) held while audio plays.
pub trait WakeLock: Send + Sync {
    /// Takes the resource for `holder`. Acquiring twice is a no-op.
    fn acquire(&self, holder: BackendKind);

    /// Gives the resource back if `holder` has it.
    fn release(&self, holder: BackendKind);

    /// Returns the backend currently holding the resource.
    fn holder(&self) -> Option<BackendKind>;
}

/// Single wake resource shared by both backends.
#[derive(Debug, Default)]
pub struct SharedWakeLock {
    holder: Mutex<Option<BackendKind>>,
}

impl SharedWakeLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WakeLock for SharedWakeLock {
    fn acquire(&self, holder: BackendKind) {
        let mut current = self.holder.lock();
        match *current {
            Some(existing) if existing == holder => {}
            Some(existing) => {
                log::warn!(
                    "[Wake] {:?} acquiring while {:?} still holds the lock",
                    holder,
                    existing
                );
                *current = Some(holder);
            }
            None => {
                log::debug!("[Wake] Acquired by {:?}", holder);
                *current = Some(holder);
            }
        }
    }

    fn release(&self, holder: BackendKind) {
        let mut current = self.holder.lock();
        if *current == Some(holder) {
            log::debug!("[Wake] Released by {:?}", holder);
            *current = None;
        }
    }

    fn holder(&self) -> Option<BackendKind> {
        *self.holder.lock()
    }
}
