//! Ordered publish/subscribe channel
//!
//! [`EventChannel`] is the primitive every other layer rides on: coordinator
//! events for the UI, inbound and outbound payloads of data tracks, and
//! through them the pointer protocol.
//!
//! Dispatch is synchronous. A message published while another dispatch of
//! the same channel is in flight (a handler publishing re-entrantly, or a
//! second thread) is queued and delivered by the in-flight dispatch, so every
//! subscriber observes a producer's messages in send order.
//!
//! ```
//! use huddle_room_core::channel::EventChannel;
//!
//! let channel = EventChannel::<u32>::new("numbers");
//! let sub = channel.subscribe(|n| {
//!     println!("got {}", n);
//!     Ok(())
//! });
//! assert_eq!(channel.publish(7), 1);
//! sub.unsubscribe();
//! assert_eq!(channel.publish(8), 0);
//! ```

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{error, trace, warn};

type Handler<M> = dyn Fn(&M) -> anyhow::Result<()> + Send + Sync;

struct Subscriber<M> {
    id: u64,
    handler: Arc<Handler<M>>,
}

struct DispatchQueue<M> {
    pending: VecDeque<M>,
    draining: bool,
}

struct ChannelInner<M> {
    name: String,
    next_id: AtomicU64,
    subscribers: RwLock<Vec<Subscriber<M>>>,
    queue: Mutex<DispatchQueue<M>>,
}

/// Ordered, synchronous pub/sub channel
pub struct EventChannel<M> {
    inner: Arc<ChannelInner<M>>,
}

impl<M> Clone for EventChannel<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M> std::fmt::Debug for EventChannel<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("name", &self.inner.name)
            .field("subscribers", &self.inner.subscribers.read().len())
            .finish()
    }
}

impl<M: Send + Sync + 'static> EventChannel<M> {
    /// Create a channel; `name` only shows up in logs
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                name: name.into(),
                next_id: AtomicU64::new(1),
                subscribers: RwLock::new(Vec::new()),
                queue: Mutex::new(DispatchQueue {
                    pending: VecDeque::new(),
                    draining: false,
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Register a handler for every message published from now on
    ///
    /// The returned [`Subscription`] removes the handler when it is dropped
    /// or explicitly unsubscribed.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&M) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.write().push(Subscriber {
            id,
            handler: Arc::new(handler),
        });
        trace!("Channel '{}' gained subscriber {}", self.inner.name, id);

        let weak: Weak<ChannelInner<M>> = Arc::downgrade(&self.inner);
        let channel: Weak<dyn Detach> = weak;
        Subscription {
            id,
            channel: Some(channel),
        }
    }

    /// Deliver `message` to all current subscribers
    ///
    /// Returns the number of subscribers the message was addressed to. With
    /// no subscribers the message is dropped and 0 is returned.
    pub fn publish(&self, message: M) -> usize {
        let count = self.inner.subscribers.read().len();
        if count == 0 {
            trace!("Channel '{}' has no subscribers, message dropped", self.inner.name);
            return 0;
        }

        {
            let mut queue = self.inner.queue.lock();
            queue.pending.push_back(message);
            if queue.draining {
                return count;
            }
            queue.draining = true;
        }

        loop {
            let next = {
                let mut queue = self.inner.queue.lock();
                match queue.pending.pop_front() {
                    Some(message) => message,
                    None => {
                        queue.draining = false;
                        break;
                    }
                }
            };
            self.dispatch(&next);
        }

        count
    }

    fn dispatch(&self, message: &M) {
        let handlers: Vec<(u64, Arc<Handler<M>>)> = self
            .inner
            .subscribers
            .read()
            .iter()
            .map(|s| (s.id, Arc::clone(&s.handler)))
            .collect();

        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(message))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        "Subscriber {} on channel '{}' failed: {:#}",
                        id, self.inner.name, e
                    );
                }
                Err(panic) => {
                    error!(
                        "Subscriber {} on channel '{}' panicked: {}",
                        id,
                        self.inner.name,
                        panic_message(panic.as_ref())
                    );
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

impl<M: Send + Sync> Detach for ChannelInner<M> {
    fn detach(&self, id: u64) {
        let mut subscribers = self.subscribers.write();
        if let Some(pos) = subscribers.iter().position(|s| s.id == id) {
            subscribers.remove(pos);
            trace!("Channel '{}' lost subscriber {}", self.name, id);
        }
    }
}

/// Unsubscribe capability returned by [`EventChannel::subscribe`]
#[must_use = "dropping a Subscription unsubscribes the handler"]
pub struct Subscription {
    id: u64,
    channel: Option<Weak<dyn Detach>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the handler now
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    /// Give up the capability and keep the handler for the channel's lifetime
    pub fn keep(mut self) {
        self.channel = None;
    }

    fn detach(&mut self) {
        if let Some(channel) = self.channel.take().and_then(|w| w.upgrade()) {
            channel.detach(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.channel.is_some())
            .finish()
    }
}
