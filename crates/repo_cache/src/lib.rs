//! Shared, reference-counted repository handles keyed by root path.
//!
//! Repositories are expensive to build, so [`RepoCache`] keeps at most one
//! live instance per canonical root and hands out [`RepoHandle`]s to it from
//! any working directory beneath that root. A repository is torn down exactly
//! once, after every handle has been released.
//!
//! How roots are discovered and how repositories are built is up to the
//! [`RepoBackend`] supplied by the caller:
//!
//! ```rust,ignore
//! let cache = RepoCache::new(MyBackend::default());
//! let handle = cache.get_or_create(config.context_for("/src/project/lib"));
//! let repo = handle.resolved().await?;
//! // ...
//! handle.unref();
//! ```

mod backend;
mod cache;
mod config;
mod error;
mod events;
mod handle;
mod ref_counted;

pub use backend::{RepoBackend, RepoContext, RootInfo};
pub use cache::RepoCache;
pub use config::ContextConfig;
pub use error::{ConfigError, RepoError};
pub use events::Subscription;
pub use handle::RepoHandle;
pub use ref_counted::{Dispose, RefCounted};
