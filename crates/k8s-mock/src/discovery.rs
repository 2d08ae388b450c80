//! Resource types advertised by the mock server's discovery endpoints.

use std::collections::BTreeMap;

/// Which discovery protocol the mock server speaks.
#[derive(Debug, Clone, Copy, Default)]
pub enum DiscoveryMode {
	/// Support aggregated discovery (APIGroupDiscoveryList).
	#[default]
	Aggregated,
	/// Return 406 for aggregated discovery, forcing fallback to legacy endpoints.
	Legacy,
}

/// The resource types the mock server advertises.
///
/// Core (`v1`) resources are listed separately; everything else is keyed by
/// group/version, e.g. `apps/v1`.
#[derive(Debug, Clone)]
pub struct MockDiscovery {
	pub core_resources: Vec<MockApiResource>,
	pub group_resources: BTreeMap<String, Vec<MockApiResource>>,
}

impl MockDiscovery {
	/// Also advertise `resources` under `group_version`.
	pub fn with_group(
		mut self,
		group_version: &str,
		resources: impl IntoIterator<Item = MockApiResource>,
	) -> Self {
		self.group_resources
			.entry(group_version.to_string())
			.or_default()
			.extend(resources);
		self
	}

	/// Find the resource serving `kind` in `api_version`.
	pub fn find(&self, api_version: &str, kind: &str) -> Option<&MockApiResource> {
		let candidates = if api_version.contains('/') {
			self.group_resources.get(api_version)?
		} else if api_version == "v1" {
			&self.core_resources
		} else {
			return None;
		};
		candidates.iter().find(|r| r.kind == kind)
	}
}

impl Default for MockDiscovery {
	fn default() -> Self {
		Self {
			core_resources: vec![
				MockApiResource::namespaced("configmaps", "ConfigMap"),
				MockApiResource::namespaced("secrets", "Secret"),
				MockApiResource::namespaced("services", "Service"),
				MockApiResource::namespaced("serviceaccounts", "ServiceAccount"),
				MockApiResource::cluster_scoped("namespaces", "Namespace"),
			],
			group_resources: BTreeMap::from([(
				"apps/v1".to_string(),
				vec![
					MockApiResource::namespaced("deployments", "Deployment"),
					MockApiResource::namespaced("statefulsets", "StatefulSet"),
				],
			)]),
		}
	}
}

/// A mock API resource definition.
#[derive(Debug, Clone)]
pub struct MockApiResource {
	/// Plural resource name used in URLs.
	pub name: String,
	pub kind: String,
	pub namespaced: bool,
	pub verbs: Vec<String>,
}

impl MockApiResource {
	pub fn namespaced(name: &str, kind: &str) -> Self {
		Self::new(name, kind, true)
	}

	pub fn cluster_scoped(name: &str, kind: &str) -> Self {
		Self::new(name, kind, false)
	}

	fn new(name: &str, kind: &str, namespaced: bool) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced,
			verbs: ["create", "get"].map(String::from).to_vec(),
		}
	}

	/// Collection path for this resource, given its group/version.
	pub fn collection_path(&self, api_version: &str, namespace: Option<&str>) -> String {
		let root = if api_version.contains('/') {
			format!("/apis/{}", api_version)
		} else {
			format!("/api/{}", api_version)
		};
		match (self.namespaced, namespace) {
			(true, ns) => format!(
				"{}/namespaces/{}/{}",
				root,
				ns.unwrap_or("default"),
				self.name
			),
			(false, _) => format!("{}/{}", root, self.name),
		}
	}
}
