//! Configuration file support for kensure
//!
//! Supports `.kensure.yaml` files that can be placed in the manifest directory
//! or anywhere above it. kensure searches from the manifest directory upward to
//! the filesystem root; command line flags override values from the file.

use std::{
	fs,
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use walkdir::DirEntry;

use crate::{
	ensure::DEFAULT_POLL_INTERVAL,
	k8s::client::ConnectionSpec,
	loader::{self, FilePredicate},
};

/// The name of the config file kensure looks for
pub const CONFIG_FILE_NAME: &str = ".kensure.yaml";

/// How long to keep retrying when nothing else is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Root configuration structure for .kensure.yaml
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KensureConfig {
	/// Overall deadline, e.g. `10m`
	#[serde(default)]
	pub timeout: Option<String>,

	/// Delay between create rounds, e.g. `500ms`
	#[serde(default)]
	pub poll_interval: Option<String>,

	/// Cluster selection
	#[serde(flatten)]
	pub connection: ConnectionSpec,

	/// Only load files whose name starts with this prefix
	#[serde(default)]
	pub prefix: Option<String>,

	/// Only load files with one of these extensions
	#[serde(default)]
	pub extensions: Vec<String>,

	/// Also load dotfiles and editor temp files
	#[serde(default)]
	pub include_hidden: bool,
}

impl KensureConfig {
	/// Load config by searching from the given directory upward
	pub fn load_from_directory(start_dir: &Path) -> Result<Option<Self>> {
		match find_config_file(start_dir) {
			Some(config_path) => Ok(Some(Self::load_from_file(&config_path)?)),
			None => Ok(None),
		}
	}

	/// Load config from a specific file path
	pub fn load_from_file(path: &Path) -> Result<Self> {
		let content = fs::read_to_string(path)
			.with_context(|| format!("failed to read config file: {}", path.display()))?;
		let config: KensureConfig = serde_yaml_with_quirks::from_str(&content)
			.with_context(|| format!("failed to parse config file: {}", path.display()))?;
		Ok(config)
	}

	/// Merge `other` over this config; values set in `other` win.
	pub fn merge_from(&mut self, other: &KensureConfig) {
		if other.timeout.is_some() {
			self.timeout = other.timeout.clone();
		}
		if other.poll_interval.is_some() {
			self.poll_interval = other.poll_interval.clone();
		}
		if other.connection.api_server.is_some() {
			self.connection.api_server = other.connection.api_server.clone();
		}
		if other.connection.context_names.is_some() {
			self.connection.context_names = other.connection.context_names.clone();
		}
		if other.prefix.is_some() {
			self.prefix = other.prefix.clone();
		}
		if !other.extensions.is_empty() {
			self.extensions = other.extensions.clone();
		}
		// A bool can't tell "unset" from "false", so only a true value overrides
		if other.include_hidden {
			self.include_hidden = true;
		}
	}

	pub fn timeout(&self) -> Result<Duration> {
		self.timeout
			.as_deref()
			.map_or(Ok(DEFAULT_TIMEOUT), parse_duration)
			.context("invalid timeout")
	}

	pub fn poll_interval(&self) -> Result<Duration> {
		let interval = self
			.poll_interval
			.as_deref()
			.map_or(Ok(DEFAULT_POLL_INTERVAL), parse_duration)
			.context("invalid poll interval")?;
		if interval.is_zero() {
			bail!("poll interval must be greater than zero");
		}
		Ok(interval)
	}

	/// File predicates described by this config.
	pub fn filters(&self) -> Vec<FilePredicate> {
		let mut filters = Vec::new();
		if let Some(prefix) = &self.prefix {
			filters.push(loader::name_prefix(prefix.clone()));
		}
		if !self.extensions.is_empty() {
			filters.push(loader::extensions(&self.extensions));
		}
		if !self.include_hidden {
			filters.push(loader::skip_hidden());
		}
		// The config file may sit next to the manifests
		filters.push(Arc::new(|entry: &DirEntry| entry.file_name() != CONFIG_FILE_NAME));
		filters
	}
}

/// Parse a duration such as `500ms`, `30s`, `10m` or `1h 30m`.
pub fn parse_duration(input: &str) -> Result<Duration> {
	humantime::parse_duration(input.trim())
		.with_context(|| format!("invalid duration {:?}", input))
}

/// Search for a config file starting from `start_dir` and walking up to the filesystem root
pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
	let start = start_dir
		.canonicalize()
		.unwrap_or_else(|_| start_dir.to_path_buf());

	start
		.ancestors()
		.map(|dir| dir.join(CONFIG_FILE_NAME))
		.find(|candidate| candidate.exists())
}

#[cfg(test)]
mod tests {
	use indoc::indoc;
	use rstest::rstest;
	use tempfile::TempDir;

	use super::*;

	#[test]
	fn test_find_config_in_current_dir() {
		let temp = TempDir::new().unwrap();
		let config_path = temp.path().join(CONFIG_FILE_NAME);
		fs::write(&config_path, "timeout: 5m").unwrap();

		let found = find_config_file(temp.path());
		// Compare file names only to avoid canonicalization issues on macOS
		assert!(found.is_some());
		assert_eq!(found.unwrap().file_name(), config_path.file_name());
	}

	#[test]
	fn test_find_config_in_parent_dir() {
		let temp = TempDir::new().unwrap();
		fs::write(temp.path().join(CONFIG_FILE_NAME), "timeout: 5m").unwrap();
		let subdir = temp.path().join("manifests").join("bootstrap");
		fs::create_dir_all(&subdir).unwrap();

		let config = KensureConfig::load_from_directory(&subdir).unwrap().unwrap();
		assert_eq!(config.timeout().unwrap(), Duration::from_secs(300));
	}

	#[test]
	fn test_parse_full_config() {
		let temp = TempDir::new().unwrap();
		let path = temp.path().join(CONFIG_FILE_NAME);
		fs::write(
			&path,
			indoc! {"
				timeout: 2m
				pollInterval: 250ms
				contextNames:
				  - staging-admin
				prefix: \"00\"
				extensions: [yaml, yml]
			"},
		)
		.unwrap();

		let config = KensureConfig::load_from_file(&path).unwrap();
		assert_eq!(config.timeout().unwrap(), Duration::from_secs(120));
		assert_eq!(config.poll_interval().unwrap(), Duration::from_millis(250));
		assert_eq!(
			config.connection.context_names,
			Some(vec!["staging-admin".to_string()])
		);
		assert_eq!(config.prefix.as_deref(), Some("00"));
		// prefix, extensions, hidden files and the config file itself
		assert_eq!(config.filters().len(), 4);
	}

	#[test]
	fn test_defaults() {
		let config = KensureConfig::default();
		assert_eq!(config.timeout().unwrap(), DEFAULT_TIMEOUT);
		assert_eq!(config.poll_interval().unwrap(), DEFAULT_POLL_INTERVAL);
		assert_eq!(config.filters().len(), 2);
	}

	#[test]
	fn test_config_file_is_never_a_manifest() {
		let temp = TempDir::new().unwrap();
		fs::write(temp.path().join(CONFIG_FILE_NAME), "timeout: 5m").unwrap();
		fs::write(
			temp.path().join(".00_namespace.yaml"),
			"apiVersion: v1\nkind: Namespace\nmetadata:\n  name: hidden\n",
		)
		.unwrap();

		let config = KensureConfig {
			include_hidden: true,
			..Default::default()
		};
		let loaded = loader::load_manifests(temp.path(), &config.filters()).unwrap();

		assert!(loaded.errors.is_none());
		assert_eq!(
			loaded.manifests.keys().collect::<Vec<_>>(),
			vec![".00_namespace.yaml"]
		);
	}

	#[test]
	fn test_merge_prefers_other() {
		let mut base = KensureConfig {
			timeout: Some("1m".to_string()),
			prefix: Some("00".to_string()),
			..Default::default()
		};
		let cli = KensureConfig {
			timeout: Some("30s".to_string()),
			connection: ConnectionSpec {
				api_server: Some("https://staging:6443".to_string()),
				..Default::default()
			},
			..Default::default()
		};

		base.merge_from(&cli);
		assert_eq!(base.timeout().unwrap(), Duration::from_secs(30));
		assert_eq!(base.prefix.as_deref(), Some("00"));
		assert_eq!(
			base.connection.api_server.as_deref(),
			Some("https://staging:6443")
		);
	}

	#[test]
	fn test_zero_poll_interval_rejected() {
		let config = KensureConfig {
			poll_interval: Some("0s".to_string()),
			..Default::default()
		};
		assert!(config.poll_interval().is_err());
	}

	#[rstest]
	#[case("500ms", Duration::from_millis(500))]
	#[case("30s", Duration::from_secs(30))]
	#[case("1h 30m", Duration::from_secs(90 * 60))]
	#[case("10m", Duration::from_secs(600))]
	#[case(" 1h ", Duration::from_secs(3600))]
	fn test_parse_duration(#[case] input: &str, #[case] expected: Duration) {
		assert_eq!(parse_duration(input).unwrap(), expected);
	}

	#[rstest]
	#[case("")]
	#[case("ms")]
	#[case("45")]
	#[case("1.5s")]
	#[case("10 parsecs")]
	#[case("307445734561825862m")]
	fn test_parse_duration_invalid(#[case] input: &str) {
		assert!(parse_duration(input).is_err());
	}
}
