//! Caller-facing handles to cached repositories.
//!
//! A [`RepoHandle`] is issued synchronously, before its repository may exist.
//! Each handle owns exactly one reference on its registry entry once attached,
//! and gives it back on [`RepoHandle::unref`] or drop.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::watch;

use crate::RepoError;

type Outcome<R> = Option<Result<Arc<R>, RepoError>>;

/// Arena-style key of a registry entry: the root plus the generation that
/// was current when the handle attached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct EntryKey {
	pub(crate) root: PathBuf,
	pub(crate) generation: u64,
}

/// Lifecycle of a single handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HandleState {
	/// Root resolution is still running.
	Pending,
	/// Holds one reference on the keyed entry.
	Attached(EntryKey),
	/// Resolution finished without attaching anything.
	Failed,
	/// Released while pending; resolution must not attach.
	CancelledBeforeReady,
	/// Released after attaching or failing.
	Released,
}

/// Gives a reference back to whoever owns the keyed entry.
pub(crate) trait ReleaseEntry: Send + Sync {
	fn release(&self, key: &EntryKey);
}

/// Reference-counted access to a cached repository.
///
/// Call [`unref`](Self::unref) (or drop the handle) once the repository is no
/// longer needed. Releasing before resolution finishes guarantees no
/// repository is registered on this handle's behalf.
#[must_use = "dropping a RepoHandle releases its reference"]
pub struct RepoHandle<R> {
	state: Arc<Mutex<HandleState>>,
	result: watch::Receiver<Outcome<R>>,
	owner: Weak<dyn ReleaseEntry>,
}

impl<R> RepoHandle<R> {
	/// A handle already attached to a live entry.
	pub(crate) fn ready(key: EntryKey, repo: Arc<R>, owner: Weak<dyn ReleaseEntry>) -> Self {
		let (_tx, result) = watch::channel(Some(Ok(repo)));
		Self {
			state: Arc::new(Mutex::new(HandleState::Attached(key))),
			result,
			owner,
		}
	}

	/// A pending handle plus the ticket the resolution task completes it with.
	pub(crate) fn pending(owner: Weak<dyn ReleaseEntry>) -> (Self, Ticket<R>) {
		let (tx, result) = watch::channel(None);
		let state = Arc::new(Mutex::new(HandleState::Pending));
		let ticket = Ticket {
			state: Arc::clone(&state),
			tx,
		};
		(
			Self {
				state,
				result,
				owner,
			},
			ticket,
		)
	}

	/// Waits for resolution and returns the repository or the failure.
	///
	/// May be awaited any number of times; every call observes the same outcome.
	pub async fn resolved(&self) -> Result<Arc<R>, RepoError> {
		let mut rx = self.result.clone();
		let outcome = match rx.wait_for(Option::is_some).await {
			Ok(outcome) => (*outcome).clone(),
			Err(_) => None,
		};
		outcome.unwrap_or_else(|| {
			Err(RepoError::unknown(
				"repository resolution ended without a result",
			))
		})
	}

	/// Returns the outcome if resolution has already finished.
	pub fn try_resolved(&self) -> Option<Result<Arc<R>, RepoError>> {
		self.result.borrow().clone()
	}

	/// Releases this handle's reference. Idempotent.
	pub fn unref(&self) {
		let attached = {
			let mut state = self.state.lock();
			match std::mem::replace(&mut *state, HandleState::Released) {
				HandleState::Pending | HandleState::CancelledBeforeReady => {
					*state = HandleState::CancelledBeforeReady;
					None
				}
				HandleState::Attached(key) => Some(key),
				HandleState::Failed | HandleState::Released => None,
			}
		};
		if let Some(key) = attached
			&& let Some(owner) = self.owner.upgrade()
		{
			owner.release(&key);
		}
	}

	/// Whether [`unref`](Self::unref) has run.
	pub fn is_disposed(&self) -> bool {
		matches!(
			*self.state.lock(),
			HandleState::CancelledBeforeReady | HandleState::Released
		)
	}

	#[cfg(test)]
	pub(crate) fn state(&self) -> HandleState {
		self.state.lock().clone()
	}
}

impl<R> Drop for RepoHandle<R> {
	fn drop(&mut self) {
		self.unref();
	}
}

impl<R> fmt::Debug for RepoHandle<R> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RepoHandle")
			.field("state", &*self.state.lock())
			.field("resolved", &self.result.borrow().is_some())
			.finish_non_exhaustive()
	}
}

/// Completion side of a pending handle, owned by its resolution task.
pub(crate) struct Ticket<R> {
	state: Arc<Mutex<HandleState>>,
	tx: watch::Sender<Outcome<R>>,
}

impl<R> Ticket<R> {
	/// Locks the handle state for the atomic registry step.
	pub(crate) fn lock(&self) -> MutexGuard<'_, HandleState> {
		self.state.lock()
	}

	/// Publishes the outcome. The first call wins.
	pub(crate) fn publish(&self, outcome: Result<Arc<R>, RepoError>) {
		self.tx.send_if_modified(|slot| {
			if slot.is_some() {
				return false;
			}
			*slot = Some(outcome);
			true
		});
	}

	/// Marks the handle failed (unless already released) and publishes `err`.
	pub(crate) fn fail(&self, err: RepoError) {
		{
			let mut state = self.state.lock();
			if *state == HandleState::Pending {
				*state = HandleState::Failed;
			}
		}
		self.publish(Err(err));
	}
}
