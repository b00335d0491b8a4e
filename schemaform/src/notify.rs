//! Synchronous notification channels.
//!
//! Every emission runs the subscribers in registration order inside the call
//! that triggered it. There is no replay: a late subscriber only sees
//! emissions made after it subscribed.

use std::fmt;

/// Handle returned by [`Channel::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber<T> = Box<dyn FnMut(&T)>;

/// A multicast callback registration point.
pub struct Channel<T> {
    subscribers: Vec<(SubscriptionId, Subscriber<T>)>,
    next_id: u64,
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
            next_id: 0,
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl<T> Channel<T> {
    /// Create a channel without subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback.
    pub fn subscribe(&mut self, callback: impl FnMut(&T) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    /// Release a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        before != self.subscribers.len()
    }

    /// Deliver `value` to every subscriber.
    pub fn emit(&mut self, value: &T) {
        for (_, callback) in &mut self.subscribers {
            callback(value);
        }
    }

    /// Drop every subscription.
    pub fn clear(&mut self) {
        self.subscribers.clear();
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether nobody is listening.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

    #[test]
    fn test_emit_and_unsubscribe() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut channel = Channel::new();

        let sink = seen.clone();
        let id = channel.subscribe(move |v: &i32| sink.borrow_mut().push(*v));
        channel.emit(&1);
        assert!(channel.unsubscribe(id));
        assert!(!channel.unsubscribe(id));
        channel.emit(&2);

        assert_eq!(*seen.borrow(), vec![1]);
        assert!(channel.is_empty());
    }
}
