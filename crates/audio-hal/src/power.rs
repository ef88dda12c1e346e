//! Wake locks held while a stream is actively moving audio.

pub const OUTPUT_WAKE_LOCK: &str = "AudioOutLock";
pub const INPUT_WAKE_LOCK: &str = "AudioInLock";

/// Keeps the system awake between a stream's first I/O and its standby.
pub trait WakeLock: Send + Sync {
    fn acquire(&self, name: &str);
    fn release(&self, name: &str);
}

/// Wake lock that only logs; used where the platform has no power manager.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingWakeLock;

impl WakeLock for TracingWakeLock {
    fn acquire(&self, name: &str) {
        tracing::debug!(lock = name, "wake lock acquired");
    }

    fn release(&self, name: &str) {
        tracing::debug!(lock = name, "wake lock released");
    }
}
