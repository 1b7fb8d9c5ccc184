//! Collaborator seam: how roots are found and repositories are built.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::RepoError;
use crate::ref_counted::Dispose;

/// Request context for a repository lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoContext {
	/// Working directory the caller is operating in.
	pub cwd: PathBuf,
	/// Source control command used to probe and drive the repository.
	pub command: String,
	/// Extra environment for spawned commands.
	pub env: HashMap<String, String>,
}

impl RepoContext {
	pub fn new(cwd: impl Into<PathBuf>, command: impl Into<String>) -> Self {
		Self {
			cwd: cwd.into(),
			command: command.into(),
			env: HashMap::new(),
		}
	}

	/// Adds environment variables.
	pub fn env(
		mut self,
		vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
	) -> Self {
		self.env
			.extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
		self
	}
}

/// Validated root information produced by [`RepoBackend::resolve_root`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootInfo {
	/// Canonical repository root; the cache key.
	pub repo_root: PathBuf,
	/// Metadata directory of the repository (e.g. `.sl`).
	pub dot_dir: PathBuf,
	/// Command that successfully probed the root.
	pub command: String,
}

impl RootInfo {
	pub fn new(
		repo_root: impl Into<PathBuf>,
		dot_dir: impl Into<PathBuf>,
		command: impl Into<String>,
	) -> Self {
		Self {
			repo_root: repo_root.into(),
			dot_dir: dot_dir.into(),
			command: command.into(),
		}
	}

	pub fn repo_root(&self) -> &Path {
		&self.repo_root
	}
}

/// Finds repository roots and constructs repositories for the cache.
///
/// `resolve_root` may be called concurrently for overlapping inputs; any
/// timeout policy belongs here rather than in the cache.
#[async_trait]
pub trait RepoBackend: Send + Sync + 'static {
	/// The cached repository type.
	type Repo: Dispose + Send + Sync + 'static;

	/// Determines the canonical root for `ctx.cwd`.
	async fn resolve_root(&self, ctx: &RepoContext) -> Result<RootInfo, RepoError>;

	/// Builds a repository for a validated root. Called at most once per live root.
	fn construct(&self, info: RootInfo, ctx: &RepoContext) -> Self::Repo;
}
