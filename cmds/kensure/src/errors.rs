//! Aggregated per-manifest failures.
//!
//! Failures are keyed by manifest path and always rendered in lexicographic
//! path order, so the same set of failures produces the same report no matter
//! in which order they were recorded.

use std::{collections::BTreeMap, fmt};

/// Which step the aggregated failures come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
	Load,
	Create,
}

impl fmt::Display for Stage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Stage::Load => write!(f, "load"),
			Stage::Create => write!(f, "create"),
		}
	}
}

/// Failure reasons collected for a set of manifests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestErrors {
	stage: Stage,
	failures: BTreeMap<String, String>,
}

impl ManifestErrors {
	pub fn new(stage: Stage) -> Self {
		Self {
			stage,
			failures: BTreeMap::new(),
		}
	}

	/// Record a failure for `path`, replacing any earlier reason for it.
	pub fn insert(&mut self, path: impl Into<String>, reason: impl fmt::Display) {
		self.failures.insert(path.into(), reason.to_string());
	}

	pub fn stage(&self) -> Stage {
		self.stage
	}

	pub fn len(&self) -> usize {
		self.failures.len()
	}

	pub fn is_empty(&self) -> bool {
		self.failures.is_empty()
	}

	pub fn get(&self, path: &str) -> Option<&str> {
		self.failures.get(path).map(String::as_str)
	}

	/// Failing manifest paths, sorted.
	pub fn paths(&self) -> impl Iterator<Item = &str> {
		self.failures.keys().map(String::as_str)
	}

	/// `None` when nothing failed.
	pub fn into_error(self) -> Option<Self> {
		(!self.is_empty()).then_some(self)
	}
}

impl fmt::Display for ManifestErrors {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "failed to {} some manifests:", self.stage)?;
		for (path, reason) in &self.failures {
			write!(f, "\n{:?}: {}", path, reason)?;
		}
		Ok(())
	}
}

impl std::error::Error for ManifestErrors {}

#[cfg(test)]
mod tests {
	use indoc::indoc;

	use super::*;

	#[test]
	fn test_format_is_sorted() {
		let mut errors = ManifestErrors::new(Stage::Create);
		errors.insert("02_deployment.yaml", "failed to create: quota exceeded");
		errors.insert("00_namespace.yaml", "failed to create: forbidden");

		assert_eq!(
			errors.to_string(),
			indoc! {r#"
				failed to create some manifests:
				"00_namespace.yaml": failed to create: forbidden
				"02_deployment.yaml": failed to create: quota exceeded"#}
		);
	}

	#[test]
	fn test_format_independent_of_insertion_order() {
		let reasons = [
			("b/10_service.yaml", "boom"),
			("a/00_ns.yaml", "bang"),
			("b/01_cm.yaml", "crash"),
		];

		let mut forward = ManifestErrors::new(Stage::Load);
		for (path, reason) in reasons {
			forward.insert(path, reason);
		}
		let mut backward = ManifestErrors::new(Stage::Load);
		for (path, reason) in reasons.into_iter().rev() {
			backward.insert(path, reason);
		}

		assert_eq!(forward.to_string(), backward.to_string());
		assert_eq!(
			forward.paths().collect::<Vec<_>>(),
			vec!["a/00_ns.yaml", "b/01_cm.yaml", "b/10_service.yaml"]
		);
	}

	#[test]
	fn test_empty_is_not_an_error() {
		assert!(ManifestErrors::new(Stage::Create).into_error().is_none());
	}

	#[test]
	fn test_paths_are_quoted() {
		let mut errors = ManifestErrors::new(Stage::Load);
		errors.insert("with \"quotes\".yaml", "bad");
		assert_eq!(
			errors.to_string(),
			"failed to load some manifests:\n\"with \\\"quotes\\\".yaml\": bad"
		);
	}
}
