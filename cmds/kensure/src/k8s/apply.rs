//! Kubernetes resource create engine.
//!
//! One call to [`ApplyEngine::apply`] is one round over the pending manifests:
//! every manifest is resolved through the current type mapping and created.
//! Manifests that were created, or that already existed, are removed from the
//! pending set; everything else stays for the next round.

use kube::{
	api::{Api, DynamicObject, PostParams},
	Client,
};
use thiserror::Error;
use tracing::instrument;

use super::{
	discovery::{DiscoveredResource, TypeMapping},
	ResourceScope,
};
use crate::{
	errors::{ManifestErrors, Stage},
	manifest::{Manifest, PendingSet},
};

/// Errors reported by a [`ResourceClient`] create request.
#[derive(Debug, Error)]
pub enum CreateError {
	/// A resource with the same identity is already present.
	#[error("already exists")]
	AlreadyExists,

	#[error("{0}")]
	Failed(Box<dyn std::error::Error + Send + Sync>),
}

/// Something that can create resources on the cluster.
#[allow(async_fn_in_trait)]
pub trait ResourceClient {
	/// Create `manifest` at the endpoint described by `resource`.
	///
	/// `namespace` is `Some` exactly when the resource is namespaced.
	async fn create(
		&self,
		resource: &DiscoveredResource,
		namespace: Option<&str>,
		manifest: &Manifest,
	) -> Result<(), CreateError>;
}

impl ResourceClient for Client {
	#[instrument(
		skip_all,
		fields(
			kind = %manifest.gvk().kind,
			name = manifest.name(),
			generated_name = manifest.has_generated_name(),
			namespace,
		)
	)]
	async fn create(
		&self,
		resource: &DiscoveredResource,
		namespace: Option<&str>,
		manifest: &Manifest,
	) -> Result<(), CreateError> {
		let api: Api<DynamicObject> = match namespace {
			Some(ns) => {
				tracing::Span::current().record("namespace", ns);
				Api::namespaced_with(self.clone(), ns, &resource.api_resource)
			}
			None => Api::all_with(self.clone(), &resource.api_resource),
		};

		let obj: DynamicObject = serde_json::from_value(manifest.object().clone())
			.map_err(|e| CreateError::Failed(Box::new(e)))?;

		match api.create(&PostParams::default(), &obj).await {
			Ok(_) => Ok(()),
			Err(kube::Error::Api(err)) if err.code == 409 && err.reason == "AlreadyExists" => {
				Err(CreateError::AlreadyExists)
			}
			Err(e) => Err(CreateError::Failed(Box::new(e))),
		}
	}
}

impl<T: ResourceClient> ResourceClient for &T {
	async fn create(
		&self,
		resource: &DiscoveredResource,
		namespace: Option<&str>,
		manifest: &Manifest,
	) -> Result<(), CreateError> {
		(**self).create(resource, namespace, manifest).await
	}
}

/// Result of one round over the pending manifests.
#[derive(Debug)]
pub struct ApplyOutcome {
	/// Manifests that are still pending and why, `None` when all were created.
	pub errors: Option<ManifestErrors>,
	/// At least one manifest had a type the mapping could not resolve.
	pub stale_mapping: bool,
}

/// Engine for creating resources on a Kubernetes cluster.
pub struct ApplyEngine<C> {
	client: C,
	default_namespace: String,
}

impl<C: ResourceClient> ApplyEngine<C> {
	/// Create a new engine.
	///
	/// Namespaced manifests without `metadata.namespace` are created in
	/// `default_namespace`.
	pub fn new(client: C, default_namespace: String) -> Self {
		Self {
			client,
			default_namespace,
		}
	}

	/// Try to create every pending manifest once, in path order.
	///
	/// Manifests that were created or already exist are removed from `pending`.
	#[instrument(skip_all, fields(pending = pending.len()))]
	pub async fn apply(&self, pending: &mut PendingSet, mapping: &TypeMapping) -> ApplyOutcome {
		let mut errors = ManifestErrors::new(Stage::Create);
		let mut stale_mapping = false;
		let mut done = Vec::new();

		for (path, manifest) in pending.iter() {
			let resource = match mapping.resolve(manifest.gvk()) {
				Ok(resource) => resource,
				Err(e) => {
					tracing::debug!(path = %path, error = %e, "unable to resolve manifest type");
					errors.insert(path.clone(), format!("unable to get REST mapping: {}", e));
					stale_mapping = true;
					continue;
				}
			};

			let namespace = self.namespace_for(manifest, resource);
			match self
				.client
				.create(resource, namespace.as_deref(), manifest)
				.await
			{
				Ok(()) => {
					tracing::info!(
						path = %path,
						kind = %manifest.gvk().kind,
						name = manifest.name(),
						generated_name = manifest.has_generated_name(),
						"created"
					);
					done.push(path.clone());
				}
				Err(CreateError::AlreadyExists) => {
					tracing::debug!(path = %path, name = manifest.name(), "already exists");
					done.push(path.clone());
				}
				Err(e) => {
					tracing::debug!(path = %path, error = %e, "create failed");
					errors.insert(path.clone(), format!("failed to create: {}", e));
				}
			}
		}

		for path in done {
			pending.remove(&path);
		}

		ApplyOutcome {
			errors: errors.into_error(),
			stale_mapping,
		}
	}

	fn namespace_for(&self, manifest: &Manifest, resource: &DiscoveredResource) -> Option<String> {
		match resource.scope {
			ResourceScope::Namespaced => Some(
				manifest
					.namespace()
					.unwrap_or(&self.default_namespace)
					.to_string(),
			),
			ResourceScope::ClusterWide => None,
		}
	}
}
