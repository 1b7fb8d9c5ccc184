//! Repository cache.
//!
//! Reuses one repository per canonical root across every working directory
//! beneath it, and tears it down once the last handle lets go.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, ReentrantMutex};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::RepoError;
use crate::backend::{RepoBackend, RepoContext, RootInfo};
use crate::events::{ChangeEmitter, Subscription};
use crate::handle::{EntryKey, HandleState, ReleaseEntry, RepoHandle, Ticket};
use crate::ref_counted::{Dispose, RefCounted};

/// A registered repository and the generation it was inserted under.
struct Entry<R: Dispose> {
	generation: u64,
	counted: RefCounted<R>,
}

/// Registry state, always mutated under a single lock.
///
/// Entries are kept in insertion order; lookup returns the first live match.
struct CacheState<R: Dispose> {
	repos_by_root: IndexMap<PathBuf, Entry<R>>,
	next_generation: u64,
}

impl<R: Dispose> CacheState<R> {
	fn new() -> Self {
		Self {
			repos_by_root: IndexMap::new(),
			next_generation: 0,
		}
	}

	/// First live entry whose root is `path` or an ancestor of it.
	fn lookup(&mut self, path: &Path) -> Option<(&PathBuf, &mut Entry<R>)> {
		self.repos_by_root
			.iter_mut()
			.find(|(root, entry)| !entry.counted.is_disposed() && path.starts_with(root))
	}

	/// Looks up `path` and takes a reference on the match in the same step.
	fn acquire(&mut self, path: &Path) -> Option<(EntryKey, Arc<R>)> {
		let (root, entry) = self.lookup(path)?;
		entry.counted.ref_();
		let key = EntryKey {
			root: root.clone(),
			generation: entry.generation,
		};
		Some((key, Arc::clone(entry.counted.value())))
	}

	/// Registers `repo` under `root` holding one reference.
	fn insert(&mut self, root: PathBuf, repo: R) -> (EntryKey, Arc<R>) {
		let generation = self.next_generation;
		self.next_generation += 1;

		let mut counted = RefCounted::new(repo);
		counted.ref_();
		let value = Arc::clone(counted.value());
		self.repos_by_root
			.insert(root.clone(), Entry { generation, counted });
		(EntryKey { root, generation }, value)
	}

	/// Drops one reference on `key`, sweeping the entry once it is torn down.
	///
	/// Returns `true` if the registry changed.
	fn release(&mut self, key: &EntryKey) -> bool {
		let Some(entry) = self.repos_by_root.get_mut(&key.root) else {
			debug!(root = %key.root.display(), "release for a root that is no longer cached");
			return false;
		};
		if entry.generation != key.generation {
			warn!(
				root = %key.root.display(),
				held = key.generation,
				current = entry.generation,
				"release for a stale generation ignored"
			);
			return false;
		}
		if !entry.counted.dispose() {
			return false;
		}
		self.repos_by_root.shift_remove(&key.root);
		info!(root = %key.root.display(), "disposed repository after last reference");
		true
	}

	fn snapshot(&self) -> Vec<Arc<R>> {
		self.repos_by_root
			.values()
			.filter(|entry| !entry.counted.is_disposed())
			.map(|entry| Arc::clone(entry.counted.value()))
			.collect()
	}
}

struct CacheInner<B: RepoBackend> {
	backend: B,
	state: Mutex<CacheState<B::Repo>>,
	emitter: ChangeEmitter<B::Repo>,
	/// Serializes change delivery. Taken before `state`, never while holding it.
	/// Reentrant so a listener may release handles from its callback.
	delivery: ReentrantMutex<()>,
}

impl<B: RepoBackend> CacheInner<B> {
	/// Delivers the current registry to every subscriber.
	///
	/// The snapshot is read under the delivery lock, so a delivery can never
	/// overtake a later one and the last list a subscriber sees is current.
	fn notify(&self) {
		let _delivery = self.delivery.lock();
		let snapshot = self.state.lock().snapshot();
		self.emitter.emit(&snapshot);
	}

	/// Resolves the root for `ctx` and completes `ticket`.
	///
	/// Root resolution is the only await point; everything after it runs in
	/// one critical section so two live entries can never share a root.
	async fn resolve(self: Arc<Self>, ctx: RepoContext, ticket: Ticket<B::Repo>) {
		let info = match self.backend.resolve_root(&ctx).await {
			Ok(info) => info,
			Err(err) => {
				debug!(cwd = %ctx.cwd.display(), error = %err, "repository root resolution failed");
				ticket.fail(err);
				return;
			}
		};

		if self.attach(info, &ctx, &ticket) {
			self.notify();
		}
	}

	/// Reuses or registers the entry for `info` and attaches it to `ticket`.
	///
	/// Returns `true` when a new entry was inserted.
	fn attach(&self, info: RootInfo, ctx: &RepoContext, ticket: &Ticket<B::Repo>) -> bool {
		let mut state = self.state.lock();
		let mut handle = ticket.lock();

		if *handle != HandleState::Pending {
			debug!(root = %info.repo_root.display(), "handle released before its repository was ready");
			drop(handle);
			ticket.fail(RepoError::Disposed);
			return false;
		}

		if let Some((key, repo)) = state.acquire(&info.repo_root) {
			debug!(
				cwd = %ctx.cwd.display(),
				root = %key.root.display(),
				"reusing repository found after root resolution"
			);
			*handle = HandleState::Attached(key);
			ticket.publish(Ok(repo));
			return false;
		}

		let root = info.repo_root.clone();
		let repo = self.backend.construct(info, ctx);
		let (key, repo) = state.insert(root, repo);
		info!(root = %key.root.display(), generation = key.generation, "registered repository");
		*handle = HandleState::Attached(key);
		ticket.publish(Ok(repo));
		true
	}
}

impl<B: RepoBackend> ReleaseEntry for CacheInner<B> {
	fn release(&self, key: &EntryKey) {
		let changed = self.state.lock().release(key);
		if changed {
			self.notify();
		}
	}
}

/// Cache of reference-counted repositories keyed by canonical root.
///
/// Cloning is cheap and shares the same registry. Handles may be requested
/// from any thread; root resolution runs on the ambient Tokio runtime.
///
/// # Concurrency
///
/// - Fast path: a `cwd` at or under a cached root is served synchronously.
/// - Slow path: the backend resolves the canonical root on a spawned task.
///   Concurrent probes for the same root are allowed; after each probe the
///   registry is re-checked and updated under one lock, so only one of them
///   ever registers a repository.
/// - A handle released while its probe is in flight is never attached.
pub struct RepoCache<B: RepoBackend> {
	inner: Arc<CacheInner<B>>,
}

impl<B: RepoBackend> Clone for RepoCache<B> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<B: RepoBackend> RepoCache<B> {
	/// Creates an empty cache driven by `backend`.
	pub fn new(backend: B) -> Self {
		Self {
			inner: Arc::new(CacheInner {
				backend,
				state: Mutex::new(CacheState::new()),
				emitter: ChangeEmitter::new(),
				delivery: ReentrantMutex::new(()),
			}),
		}
	}

	/// The backend this cache resolves and constructs with.
	pub fn backend(&self) -> &B {
		&self.inner.backend
	}

	fn owner(&self) -> Weak<dyn ReleaseEntry> {
		let owner: Weak<CacheInner<B>> = Arc::downgrade(&self.inner);
		owner
	}

	/// Returns a handle to the repository containing `ctx.cwd`, creating it
	/// if no live repository covers that directory.
	///
	/// Never blocks: when the root is not yet known, resolution continues on
	/// a spawned task and the handle resolves later. Outside a Tokio runtime
	/// such handles resolve to [`RepoError::Unknown`].
	pub fn get_or_create(&self, ctx: RepoContext) -> RepoHandle<B::Repo> {
		// Only hits when cwd is at or under a known root; otherwise the
		// canonical root is checked again after resolution.
		let hit = self.inner.state.lock().acquire(&ctx.cwd);
		if let Some((key, repo)) = hit {
			debug!(cwd = %ctx.cwd.display(), root = %key.root.display(), "repository cache hit");
			return RepoHandle::ready(key, repo, self.owner());
		}

		let (handle, ticket) = RepoHandle::pending(self.owner());
		match Handle::try_current() {
			Ok(runtime) => {
				let inner = Arc::clone(&self.inner);
				runtime.spawn(inner.resolve(ctx, ticket));
			}
			Err(err) => {
				warn!(cwd = %ctx.cwd.display(), error = %err, "no runtime to resolve repository on");
				ticket.fail(RepoError::unknown(err));
			}
		}
		handle
	}

	/// Returns the live repository covering `path` without creating one.
	pub fn cached_for_path(&self, path: impl AsRef<Path>) -> Option<Arc<B::Repo>> {
		let mut state = self.inner.state.lock();
		state
			.lookup(path.as_ref())
			.map(|(_, entry)| Arc::clone(entry.counted.value()))
	}

	/// Snapshot of every live repository.
	pub fn active_repos(&self) -> Vec<Arc<B::Repo>> {
		self.inner.state.lock().snapshot()
	}

	/// Subscribes `callback` to registry changes.
	///
	/// The callback runs once immediately with the current snapshot, then
	/// after every insert or removal. Deliveries are serialized across
	/// threads, so the latest call always carries the current registry.
	pub fn on_change_active_repos(
		&self,
		callback: impl Fn(&[Arc<B::Repo>]) + Send + Sync + 'static,
	) -> Subscription<B::Repo> {
		let callback: Arc<dyn Fn(&[Arc<B::Repo>]) + Send + Sync> = Arc::new(callback);
		let _delivery = self.inner.delivery.lock();
		let subscription = self.inner.emitter.subscribe(Arc::clone(&callback));
		callback(&self.active_repos());
		subscription
	}

	/// Tears down every cached repository regardless of outstanding
	/// references, empties the registry and drops all subscribers.
	///
	/// Handles attached before the clear become no-ops on release.
	pub fn clear_cache(&self) {
		let cleared = {
			let mut state = self.inner.state.lock();
			let mut cleared = 0;
			for (root, mut entry) in state.repos_by_root.drain(..) {
				if entry.counted.force_dispose() {
					cleared += 1;
				}
				debug!(
					root = %root.display(),
					references = entry.counted.number_of_references(),
					"cleared repository"
				);
			}
			cleared
		};
		{
			let _delivery = self.inner.delivery.lock();
			self.inner.emitter.remove_all();
		}
		info!(cleared, "repository cache cleared");
	}

	/// Sum of outstanding references across live repositories.
	pub fn number_of_active_servers(&self) -> usize {
		self.inner
			.state
			.lock()
			.repos_by_root
			.values()
			.filter(|entry| !entry.counted.is_disposed())
			.map(|entry| entry.counted.number_of_references())
			.sum()
	}

	/// Number of live repositories.
	pub fn len(&self) -> usize {
		self.active_repos().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
