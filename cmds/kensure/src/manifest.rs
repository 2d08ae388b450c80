//! In-memory representation of a single resource manifest.

use std::collections::BTreeMap;

use kube::core::GroupVersionKind;
use thiserror::Error;

/// Pending manifests keyed by their path relative to the manifest directory.
///
/// Iteration order is lexicographic by path, which is also the order
/// manifests are created in.
pub type PendingSet = BTreeMap<String, Manifest>;

/// Reasons a decoded document cannot be treated as a manifest.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
	#[error("document is not a mapping")]
	NotAnObject,

	#[error("manifest missing apiVersion or kind")]
	MissingApiVersionOrKind,

	#[error("manifest missing metadata.name and metadata.generateName")]
	MissingName,
}

/// A decoded manifest together with the identity fields needed to create it.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
	gvk: GroupVersionKind,
	name: String,
	generated_name: bool,
	namespace: Option<String>,
	object: serde_json::Value,
}

impl Manifest {
	/// Validate the structural fields of a document and wrap it.
	pub fn from_value(object: serde_json::Value) -> Result<Self, ManifestError> {
		if !object.is_object() {
			return Err(ManifestError::NotAnObject);
		}

		let gvk = gvk_from_manifest(&object).ok_or(ManifestError::MissingApiVersionOrKind)?;

		let non_empty = |pointer: &str| {
			object
				.pointer(pointer)
				.and_then(|v| v.as_str())
				.filter(|s| !s.is_empty())
		};
		let (name, generated_name) = match non_empty("/metadata/name") {
			Some(name) => (name.to_string(), false),
			None => {
				let prefix = non_empty("/metadata/generateName").ok_or(ManifestError::MissingName)?;
				(prefix.to_string(), true)
			}
		};

		let namespace = non_empty("/metadata/namespace").map(str::to_string);

		Ok(Self {
			gvk,
			name,
			generated_name,
			namespace,
			object,
		})
	}

	pub fn gvk(&self) -> &GroupVersionKind {
		&self.gvk
	}

	/// `metadata.name`, or the `metadata.generateName` prefix when no name is set.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Whether the server picks the final name from a `generateName` prefix.
	pub fn has_generated_name(&self) -> bool {
		self.generated_name
	}

	/// Namespace from `metadata.namespace`, if the manifest sets one.
	pub fn namespace(&self) -> Option<&str> {
		self.namespace.as_deref()
	}

	pub fn object(&self) -> &serde_json::Value {
		&self.object
	}
}

/// Extract a GroupVersionKind from a Kubernetes manifest.
pub fn gvk_from_manifest(manifest: &serde_json::Value) -> Option<GroupVersionKind> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	if api_version.is_empty() || kind.is_empty() {
		return None;
	}
	let (group, version) = match api_version.split_once('/') {
		Some((g, v)) => (g, v),
		None => ("", api_version),
	};
	Some(GroupVersionKind::gvk(group, version, kind))
}
