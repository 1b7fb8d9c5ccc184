//! Listener list for "active repositories changed" notifications.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Listener<R> = Arc<dyn Fn(&[Arc<R>]) + Send + Sync>;

struct ListenerSet<R> {
	next_id: u64,
	listeners: Vec<(u64, Listener<R>)>,
}

/// Broadcasts registry snapshots to subscribed callbacks.
///
/// Callbacks are invoked without any lock held, so they may subscribe,
/// unsubscribe, or query the cache.
pub(crate) struct ChangeEmitter<R> {
	inner: Arc<Mutex<ListenerSet<R>>>,
}

impl<R> ChangeEmitter<R> {
	pub(crate) fn new() -> Self {
		Self {
			inner: Arc::new(Mutex::new(ListenerSet {
				next_id: 0,
				listeners: Vec::new(),
			})),
		}
	}

	/// Registers `listener` and returns the guard that removes it.
	pub(crate) fn subscribe(&self, listener: Listener<R>) -> Subscription<R> {
		let mut set = self.inner.lock();
		let id = set.next_id;
		set.next_id += 1;
		set.listeners.push((id, listener));
		Subscription {
			id,
			emitter: Arc::downgrade(&self.inner),
		}
	}

	pub(crate) fn emit(&self, snapshot: &[Arc<R>]) {
		let listeners: Vec<Listener<R>> = self
			.inner
			.lock()
			.listeners
			.iter()
			.map(|(_, l)| Arc::clone(l))
			.collect();
		for listener in listeners {
			listener(snapshot);
		}
	}

	pub(crate) fn remove_all(&self) {
		self.inner.lock().listeners.clear();
	}

	#[cfg(test)]
	pub(crate) fn listener_count(&self) -> usize {
		self.inner.lock().listeners.len()
	}
}

/// Active subscription to cache change events.
///
/// Dropping the subscription unsubscribes it.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription<R> {
	id: u64,
	emitter: Weak<Mutex<ListenerSet<R>>>,
}

impl<R> Subscription<R> {
	/// Stops delivering change events to this subscriber.
	pub fn unsubscribe(self) {}
}

impl<R> Drop for Subscription<R> {
	fn drop(&mut self) {
		if let Some(inner) = self.emitter.upgrade() {
			inner.lock().listeners.retain(|(id, _)| *id != self.id);
		}
	}
}

impl<R> std::fmt::Debug for Subscription<R> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription").field("id", &self.id).finish()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;

	fn counting(counter: &Arc<AtomicUsize>) -> Listener<u32> {
		let counter = Arc::clone(counter);
		Arc::new(move |_: &[Arc<u32>]| {
			counter.fetch_add(1, Ordering::SeqCst);
		})
	}

	#[test]
	fn unsubscribe_stops_delivery() {
		let emitter = ChangeEmitter::<u32>::new();
		let hits = Arc::new(AtomicUsize::new(0));
		let sub = emitter.subscribe(counting(&hits));
		emitter.emit(&[]);
		sub.unsubscribe();
		emitter.emit(&[]);
		assert_eq!(hits.load(Ordering::SeqCst), 1);
		assert_eq!(emitter.listener_count(), 0);
	}

	#[test]
	fn remove_all_clears_every_listener() {
		let emitter = ChangeEmitter::<u32>::new();
		let hits = Arc::new(AtomicUsize::new(0));
		let _a = emitter.subscribe(counting(&hits));
		let _b = emitter.subscribe(counting(&hits));
		emitter.emit(&[Arc::new(1)]);
		emitter.remove_all();
		emitter.emit(&[]);
		assert_eq!(hits.load(Ordering::SeqCst), 2);
	}
}
