//! Ownership wrapper that tears its value down once the last reference goes.

use std::sync::Arc;

use tracing::warn;

/// Values that hold subscriptions or other state needing explicit teardown.
pub trait Dispose {
	/// Releases the value's underlying state.
	fn dispose(&self);
}

/// A value paired with a reference count and single-fire disposal.
///
/// Not synchronised on its own; the owner serialises every call.
#[derive(Debug)]
pub struct RefCounted<T: Dispose> {
	value: Arc<T>,
	references: usize,
	disposed: bool,
}

impl<T: Dispose> RefCounted<T> {
	/// Wraps `value` with zero references.
	pub fn new(value: T) -> Self {
		Self {
			value: Arc::new(value),
			references: 0,
			disposed: false,
		}
	}

	/// Shared access to the wrapped value.
	pub fn value(&self) -> &Arc<T> {
		&self.value
	}

	/// Takes one more reference. Each call must be paired with one [`Self::dispose`].
	pub fn ref_(&mut self) {
		self.references += 1;
	}

	/// Drops one reference, tearing the value down when the count reaches zero.
	///
	/// Returns `true` if this call performed the teardown.
	pub fn dispose(&mut self) -> bool {
		let Some(remaining) = self.references.checked_sub(1) else {
			warn!("reference released more times than it was taken");
			return false;
		};
		self.references = remaining;
		if remaining == 0 && !self.disposed {
			self.disposed = true;
			self.value.dispose();
			return true;
		}
		false
	}

	/// Tears the value down regardless of outstanding references.
	///
	/// Returns `true` if this call performed the teardown.
	pub fn force_dispose(&mut self) -> bool {
		if self.disposed {
			return false;
		}
		self.disposed = true;
		self.value.dispose();
		true
	}

	pub fn number_of_references(&self) -> usize {
		self.references
	}

	pub fn is_disposed(&self) -> bool {
		self.disposed
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use proptest::prelude::*;

	use super::*;

	#[derive(Default)]
	struct Counter(AtomicUsize);

	impl Dispose for Counter {
		fn dispose(&self) {
			self.0.fetch_add(1, Ordering::SeqCst);
		}
	}

	fn teardowns(rc: &RefCounted<Counter>) -> usize {
		rc.value().0.load(Ordering::SeqCst)
	}

	#[test]
	fn disposes_on_last_release() {
		let mut rc = RefCounted::new(Counter::default());
		rc.ref_();
		rc.ref_();
		assert!(!rc.dispose());
		assert_eq!(teardowns(&rc), 0);
		assert!(rc.dispose());
		assert!(rc.is_disposed());
		assert_eq!(teardowns(&rc), 1);
	}

	#[test]
	fn over_release_never_tears_down_twice() {
		let mut rc = RefCounted::new(Counter::default());
		rc.ref_();
		assert!(rc.dispose());
		assert!(!rc.dispose());
		assert!(!rc.dispose());
		assert_eq!(rc.number_of_references(), 0);
		assert_eq!(teardowns(&rc), 1);
	}

	#[test]
	fn release_without_ref_is_a_noop() {
		let mut rc = RefCounted::new(Counter::default());
		assert!(!rc.dispose());
		assert!(!rc.is_disposed());
		assert_eq!(teardowns(&rc), 0);
	}

	#[test]
	fn force_dispose_ignores_count() {
		let mut rc = RefCounted::new(Counter::default());
		rc.ref_();
		rc.ref_();
		assert!(rc.force_dispose());
		assert!(!rc.force_dispose());
		assert!(!rc.dispose());
		assert!(!rc.dispose());
		assert_eq!(teardowns(&rc), 1);
	}

	proptest! {
		#[test]
		fn teardown_happens_once_after_balanced_releases(refs in 1usize..64) {
			let mut rc = RefCounted::new(Counter::default());
			for _ in 0..refs {
				rc.ref_();
			}
			for released in 1..=refs {
				let tore_down = rc.dispose();
				prop_assert_eq!(tore_down, released == refs);
				prop_assert_eq!(teardowns(&rc), usize::from(released == refs));
			}
			prop_assert!(!rc.dispose());
			prop_assert_eq!(teardowns(&rc), 1);
		}
	}
}
