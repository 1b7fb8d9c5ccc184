//! Context defaults loaded from TOML.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::RepoContext;
use crate::error::ConfigError;

/// Defaults applied to every [`RepoContext`] built from this config.
///
/// ```toml
/// command = "sl"
///
/// [env]
/// HGPLAIN = "1"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
	/// Source control command.
	#[serde(default = "default_command")]
	pub command: String,
	/// Environment variables passed to spawned commands.
	#[serde(default)]
	pub env: HashMap<String, String>,
}

/// Returns the default source control command.
fn default_command() -> String {
	"sl".to_string()
}

impl Default for ContextConfig {
	fn default() -> Self {
		Self {
			command: default_command(),
			env: HashMap::new(),
		}
	}
}

impl ContextConfig {
	/// Parses a config from a TOML document.
	pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(input)?;
		if config.command.trim().is_empty() {
			return Err(ConfigError::EmptyCommand);
		}
		Ok(config)
	}

	/// Builds a request context for `cwd`.
	pub fn context_for(&self, cwd: impl Into<PathBuf>) -> RepoContext {
		RepoContext::new(cwd, self.command.clone()).env(self.env.clone())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_document_uses_defaults() {
		let config = ContextConfig::from_toml_str("").unwrap();
		assert_eq!(config, ContextConfig::default());
		assert_eq!(config.command, "sl");
	}

	#[test]
	fn overrides_and_env() {
		let config = ContextConfig::from_toml_str(
			r#"
			command = "hg"

			[env]
			HGPLAIN = "1"
			"#,
		)
		.unwrap();
		let ctx = config.context_for("/repo/sub");
		assert_eq!(ctx.command, "hg");
		assert_eq!(ctx.cwd, PathBuf::from("/repo/sub"));
		assert_eq!(ctx.env.get("HGPLAIN").map(String::as_str), Some("1"));
	}

	#[test]
	fn rejects_empty_command() {
		let err = ContextConfig::from_toml_str(r#"command = " ""#).unwrap_err();
		assert!(matches!(err, ConfigError::EmptyCommand));
	}

	#[test]
	fn rejects_malformed_toml() {
		let err = ContextConfig::from_toml_str("command = [").unwrap_err();
		assert!(matches!(err, ConfigError::Parse(_)));
	}
}
