//! Kubernetes API resource discovery.
//!
//! A [`TypeMapping`] is an immutable snapshot of the cluster's discovery API,
//! mapping every known apiVersion/kind to the resource endpoint that serves it.
//! Snapshots are never patched: when a mapping turns out to be stale, a new one
//! is taken from a [`TypeDiscovery`] source and replaces the old one wholesale.

use std::collections::HashMap;

use kube::{
	core::GroupVersionKind,
	discovery::{ApiResource, Scope},
	Client, Discovery,
};
use thiserror::Error;
use tracing::instrument;

use super::ResourceScope;

/// Errors that can occur during API resource discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("full API discovery failed")]
	FullDiscovery(#[source] kube::Error),
}

/// The type mapping has no entry for a manifest's apiVersion/kind.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("no matches for kind {kind:?} in version {api_version:?}")]
pub struct UnresolvableType {
	pub api_version: String,
	pub kind: String,
}

/// Discovered API resource with its scope.
#[derive(Debug, Clone)]
pub struct DiscoveredResource {
	/// The kube ApiResource for making API calls.
	pub api_resource: ApiResource,
	/// Whether this resource is namespaced or cluster-wide.
	pub scope: ResourceScope,
}

impl DiscoveredResource {
	pub fn new(api_resource: ApiResource, scope: ResourceScope) -> Self {
		Self {
			api_resource,
			scope,
		}
	}
}

/// Snapshot of the cluster's known resource types.
#[derive(Debug, Clone, Default)]
pub struct TypeMapping {
	resources: HashMap<GroupVersionKind, DiscoveredResource>,
}

impl TypeMapping {
	/// Build a mapping from already discovered resources.
	pub fn from_resources(resources: impl IntoIterator<Item = DiscoveredResource>) -> Self {
		let resources = resources
			.into_iter()
			.map(|r| (gvk_from_api_resource(&r.api_resource), r))
			.collect();
		Self { resources }
	}

	/// Build a mapping from a completed Discovery.
	fn from_discovery(discovery: Discovery) -> Self {
		let mut resources = HashMap::new();

		for group in discovery.groups() {
			// Iterate all versions, not just recommended, so we can handle
			// manifests using older API versions (e.g., v1alpha1 vs v1beta1)
			for ver in group.versions() {
				for (ar, caps) in group.versioned_resources(ver) {
					let scope = match caps.scope {
						Scope::Namespaced => ResourceScope::Namespaced,
						Scope::Cluster => ResourceScope::ClusterWide,
					};
					resources.insert(
						gvk_from_api_resource(&ar),
						DiscoveredResource::new(ar, scope),
					);
				}
			}
		}

		Self { resources }
	}

	/// Look up the endpoint serving `gvk`.
	pub fn resolve(&self, gvk: &GroupVersionKind) -> Result<&DiscoveredResource, UnresolvableType> {
		self.resources.get(gvk).ok_or_else(|| UnresolvableType {
			api_version: gvk.api_version(),
			kind: gvk.kind.clone(),
		})
	}

	pub fn len(&self) -> usize {
		self.resources.len()
	}

	pub fn is_empty(&self) -> bool {
		self.resources.is_empty()
	}
}

/// Create a GroupVersionKind from a kube ApiResource.
fn gvk_from_api_resource(ar: &ApiResource) -> GroupVersionKind {
	GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind)
}

/// Source of fresh [`TypeMapping`] snapshots.
#[allow(async_fn_in_trait)]
pub trait TypeDiscovery {
	/// Query the platform and build a new mapping.
	async fn snapshot(&self) -> Result<TypeMapping, DiscoveryError>;
}

impl TypeDiscovery for Client {
	/// Uses the Aggregated Discovery API (K8s 1.26+) which requires only 2 API calls,
	/// falling back to full discovery (N+2 API calls) on older clusters.
	#[instrument(skip_all)]
	async fn snapshot(&self) -> Result<TypeMapping, DiscoveryError> {
		let mapping = match Discovery::new(self.clone()).run_aggregated().await {
			Ok(discovery) => {
				tracing::debug!("using aggregated discovery");
				TypeMapping::from_discovery(discovery)
			}
			Err(e) => {
				tracing::debug!(error = %e, "aggregated discovery not available, using full discovery");
				let discovery = Discovery::new(self.clone())
					.run()
					.await
					.map_err(DiscoveryError::FullDiscovery)?;
				TypeMapping::from_discovery(discovery)
			}
		};

		tracing::debug!(resource_count = mapping.len(), "built type mapping");
		Ok(mapping)
	}
}

impl<T: TypeDiscovery> TypeDiscovery for &T {
	async fn snapshot(&self) -> Result<TypeMapping, DiscoveryError> {
		(**self).snapshot().await
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;

	use super::*;

	fn resource(group: &str, version: &str, kind: &str, plural: &str) -> ApiResource {
		ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk(group, version, kind), plural)
	}

	#[test]
	fn test_resolve_known_type() {
		let mapping = TypeMapping::from_resources([
			DiscoveredResource::new(
				resource("", "v1", "ConfigMap", "configmaps"),
				ResourceScope::Namespaced,
			),
			DiscoveredResource::new(
				resource("", "v1", "Namespace", "namespaces"),
				ResourceScope::ClusterWide,
			),
		]);

		let resolved = mapping
			.resolve(&GroupVersionKind::gvk("", "v1", "Namespace"))
			.unwrap();
		assert_eq!(resolved.scope, ResourceScope::ClusterWide);
		assert_eq!(resolved.api_resource.plural, "namespaces");
		assert_eq!(mapping.len(), 2);
	}

	#[test]
	fn test_resolve_matches_version() {
		let mapping = TypeMapping::from_resources([DiscoveredResource::new(
			resource("apps", "v1", "Deployment", "deployments"),
			ResourceScope::Namespaced,
		)]);

		assert_matches!(
			mapping.resolve(&GroupVersionKind::gvk("apps", "v1beta1", "Deployment")),
			Err(UnresolvableType { api_version, kind })
				if api_version == "apps/v1beta1" && kind == "Deployment"
		);
	}

	#[test]
	fn test_unresolvable_message() {
		let err = TypeMapping::default()
			.resolve(&GroupVersionKind::gvk("example.com", "v1", "Widget"))
			.unwrap_err();
		assert_eq!(
			err.to_string(),
			r#"no matches for kind "Widget" in version "example.com/v1""#
		);
	}
}
