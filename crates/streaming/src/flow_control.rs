//! Cooperative write-pacing signal for a connection.
//!
//! Unlike OS-level TCP backpressure, this is an explicit, in-process
//! flag the writer consults before pushing more frames so a slow peer
//! can't make the outbound queue grow without bound.

use tokio::sync::Notify;

pub struct FlowControl {
    writable: std::sync::atomic::AtomicBool,
    notify: Notify,
}

impl Default for FlowControl {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowControl {
    pub fn new() -> Self {
        Self {
            writable: std::sync::atomic::AtomicBool::new(true),
            notify: Notify::new(),
        }
    }

    pub fn pause_writing(&self) {
        self.writable
            .store(false, std::sync::atomic::Ordering::Release);
    }

    pub fn resume_writing(&self) {
        self.writable
            .store(true, std::sync::atomic::Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_writable(&self) -> bool {
        self.writable.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Blocks until writing is resumed, if currently paused.
    pub async fn drain(&self) {
        while !self.is_writable() {
            self.notify.notified().await;
        }
    }
}
