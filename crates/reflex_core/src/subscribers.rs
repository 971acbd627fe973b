//! Ordered subscriber lists that tolerate modification during notification.
//!
//! Firing iterates a snapshot taken at the start of the pass, so a handler
//! that unsubscribes itself (or a sibling) never causes another handler that
//! was present at iteration start to be skipped or invoked twice.

use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

pub struct Entry<H: ?Sized> {
    pub id: u64,
    pub target: Arc<H>,
}

impl<H: ?Sized> Clone for Entry<H> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            target: Arc::clone(&self.target),
        }
    }
}

pub struct Subscribers<H: ?Sized> {
    entries: ArcSwap<Vec<Entry<H>>>,
    next_id: AtomicU64,
}

impl<H: ?Sized + Send + Sync + 'static> Subscribers<H> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: ArcSwap::from_pointee(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Append `target`; it will be notified after every existing subscriber.
    pub fn add(self: &Arc<Self>, target: Arc<H>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Entry { id, target };
        self.entries.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(entry.clone());
            next
        });
        let weak: Weak<Self> = Arc::downgrade(self);
        let source: Weak<dyn Detach> = weak;
        Subscription {
            inner: Inner::Single { source, id },
        }
    }

    /// Current subscribers in subscription order.
    pub fn snapshot(&self) -> Arc<Vec<Entry<H>>> {
        self.entries.load_full()
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

impl<H: ?Sized + Send + Sync + 'static> Detach for Subscribers<H> {
    fn detach(&self, id: u64) {
        self.entries.rcu(|current| {
            current
                .iter()
                .filter(|entry| entry.id != id)
                .cloned()
                .collect::<Vec<_>>()
        });
    }
}

/// Handle returned by every subscribe call.
///
/// Dropping it leaves the subscription in place; call
/// [`Subscription::unsubscribe`] to detach. Detaching is safe from inside a
/// notification, including the handler's own.
#[must_use = "dropping a Subscription keeps the handler attached; bind it to `_` to make that explicit"]
pub struct Subscription {
    inner: Inner,
}

enum Inner {
    Empty,
    Single { source: Weak<dyn Detach>, id: u64 },
    Group(Vec<Subscription>),
}

impl Subscription {
    /// A subscription to nothing, for sources that never fire.
    pub fn empty() -> Self {
        Self { inner: Inner::Empty }
    }

    /// Merge several subscriptions into one handle that detaches them all.
    pub fn all(parts: Vec<Subscription>) -> Self {
        Self {
            inner: Inner::Group(parts),
        }
    }

    pub fn unsubscribe(self) {
        match self.inner {
            Inner::Empty => {}
            Inner::Single { source, id } => {
                if let Some(source) = source.upgrade() {
                    source.detach(id);
                }
            }
            Inner::Group(parts) => parts.into_iter().for_each(Subscription::unsubscribe),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Inner::Empty => f.write_str("Subscription(empty)"),
            Inner::Single { id, .. } => write!(f, "Subscription({})", id),
            Inner::Group(parts) => write!(f, "Subscription(group of {})", parts.len()),
        }
    }
}
