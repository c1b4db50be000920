//! No-buffer multicast: every `publish` hands the message to whichever
//! subscribers are waiting *right now* and forgets it. Deliberately not
//! `tokio::broadcast`, which retains a ring buffer and can lag/drop —
//! callers here only ever want "the next message from this point on".

use crate::message::Message;
use parking_lot::Mutex;
use tokio::sync::oneshot;

pub struct Subscription {
    waiters: Mutex<Vec<oneshot::Sender<Message>>>,
}

impl Default for Subscription {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscription {
    pub fn new() -> Self {
        Self {
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Registers interest in the next published message.
    pub fn subscribe(&self) -> oneshot::Receiver<Message> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().push(tx);
        rx
    }

    /// Delivers `msg` to every waiter registered so far, then clears
    /// the waiter list. Subscribers that dropped their receiver are
    /// silently skipped.
    pub fn publish(&self, msg: Message) {
        let waiters = std::mem::take(&mut *self.waiters.lock());
        for waiter in waiters {
            let _ = waiter.send(msg.clone());
        }
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }
}
