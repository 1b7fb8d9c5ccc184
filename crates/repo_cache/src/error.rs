use std::fmt;
use std::path::PathBuf;

/// Failure surfaced through a [`RepoHandle`](crate::RepoHandle).
///
/// Resolution failures are never retried by the cache; callers retry by
/// requesting a new handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepoError {
	/// No repository was found at the requested location.
	#[error("no repository found at {}", cwd.display())]
	NotFound {
		/// Working directory the lookup started from.
		cwd: PathBuf,
	},
	/// The requested working directory does not exist.
	#[error("working directory {} does not exist", cwd.display())]
	CwdDoesNotExist {
		/// Working directory the lookup started from.
		cwd: PathBuf,
	},
	/// The configured source control command could not be run.
	#[error("command `{command}` could not be run")]
	InvalidCommand {
		/// The command that failed.
		command: String,
	},
	/// The handle was released before its repository was ready.
	#[error("repository handle released before it was ready")]
	Disposed,
	/// Any other failure.
	#[error("{0}")]
	Unknown(String),
}

impl RepoError {
	/// Wraps an arbitrary error as [`RepoError::Unknown`].
	pub fn unknown(err: impl fmt::Display) -> Self {
		Self::Unknown(err.to_string())
	}
}

/// Errors raised while loading a [`ContextConfig`](crate::ContextConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	/// The TOML document did not parse.
	#[error("invalid config: {0}")]
	Parse(#[from] toml::de::Error),
	/// The configured command was empty.
	#[error("`command` must not be empty")]
	EmptyCommand,
}
