//! Lossy wake-up fan-out.
//!
//! Subscribers treat a wake as "something may have changed" and always
//! re-check the real state, so a notification dropped because a
//! subscriber's channel is already full is harmless.

use std::sync::RwLock;

use tokio::sync::mpsc;

/// Registers subscribers and wakes all of them on [`Broadcaster::notify`].
#[derive(Debug)]
pub struct Broadcaster {
    capacity: usize,
    subscribers: RwLock<Subscribers>,
}

#[derive(Debug, Default)]
struct Subscribers {
    senders: Vec<mpsc::Sender<()>>,
    closed: bool,
}

impl Broadcaster {
    /// `capacity` bounds the pending wakes per subscriber (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: RwLock::new(Subscribers::default()),
        }
    }

    /// Best-effort wake of every subscriber. Never blocks.
    pub fn notify(&self) {
        let subscribers = self.subscribers.read().expect("broadcaster lock");
        for tx in &subscribers.senders {
            // Full means a wake is already pending; closed means the
            // subscriber is gone. Either way there is nothing to do.
            let _ = tx.try_send(());
        }
    }

    /// Add a subscriber.
    ///
    /// After [`Broadcaster::close_all`] the returned subscription is
    /// already closed.
    pub fn register(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subscribers = self.subscribers.write().expect("broadcaster lock");
        if !subscribers.closed {
            subscribers.senders.retain(|tx| !tx.is_closed());
            subscribers.senders.push(tx);
        }
        Subscription { rx }
    }

    /// Permanently close every subscription. Returns `false` if already closed.
    pub fn close_all(&self) -> bool {
        let mut subscribers = self.subscribers.write().expect("broadcaster lock");
        if subscribers.closed {
            return false;
        }
        subscribers.closed = true;
        subscribers.senders.clear();
        true
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .expect("broadcaster lock")
            .senders
            .len()
    }
}

/// Receiving end of one broadcaster registration.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<()>,
}

impl Subscription {
    /// Wait for the next wake. Returns `false` once the broadcaster is closed.
    pub async fn recv(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }

    /// Consume a pending wake without waiting.
    pub fn try_recv(&mut self) -> Result<(), mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }
}
