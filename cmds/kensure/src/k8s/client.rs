//! Kubernetes cluster connection management.

use std::time::Duration;

use k8s_openapi::apimachinery::pkg::version::Info;
use kube::{
	config::{InferConfigError, KubeConfigOptions, Kubeconfig, KubeconfigError},
	Client, Config,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

/// Default timeout for Kubernetes API requests.
const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Which cluster to talk to.
///
/// When neither field is set, the ambient configuration is used: the current
/// kubeconfig context, or the in-cluster service account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSpec {
	/// API server URL; a kubeconfig context pointing at this server is used.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub api_server: Option<String>,

	/// Candidate kubeconfig context names; the first one present is used.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub context_names: Option<Vec<String>>,
}

impl ConnectionSpec {
	fn is_ambient(&self) -> bool {
		self.api_server.is_none() && self.context_names.is_none()
	}
}

/// Errors that can occur when connecting to a Kubernetes cluster.
#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error("contextNames is empty")]
	EmptyContextNames,

	#[error(
		"no cluster that matches the apiServer `{0}` was found. Please check your $KUBECONFIG"
	)]
	ClusterNotFound(String),

	#[error("no context using cluster `{0}` was found. Please check your $KUBECONFIG")]
	ContextNotFoundForCluster(String),

	#[error("no context named `{0:?}` was found. Please check your $KUBECONFIG")]
	ContextNotFound(Vec<String>),

	#[error(transparent)]
	Kubeconfig(#[from] KubeconfigError),

	#[error(transparent)]
	Infer(#[from] InferConfigError),

	#[error(transparent)]
	Kube(#[from] kube::Error),
}

/// Represents a connection to a Kubernetes cluster.
#[derive(Clone)]
pub struct ClusterConnection {
	client: Client,
	server_version: Info,
	/// Human-readable identifier for the cluster (context name or API server URL).
	cluster_identifier: String,
}

impl std::fmt::Debug for ClusterConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClusterConnection")
			.field("cluster_identifier", &self.cluster_identifier)
			.field("server_version", &self.server_version)
			.finish_non_exhaustive()
	}
}

impl ClusterConnection {
	/// Connect to the cluster selected by `spec`.
	///
	/// - `spec.apiServer`: searches kubeconfig for a cluster with matching server URL,
	///   then finds and uses a context that references that cluster
	/// - `spec.contextNames`: uses the first matching context name from kubeconfig
	/// - neither: infers the configuration from the environment
	#[instrument(skip_all)]
	pub async fn from_spec(spec: &ConnectionSpec) -> Result<Self, ConnectionError> {
		if spec.is_ambient() {
			let config = Config::infer().await?;
			let identifier = config.cluster_url.to_string();
			return Self::connect(config, identifier).await;
		}

		let kubeconfig = Kubeconfig::read()?;
		Self::from_spec_with_kubeconfig(spec, kubeconfig).await
	}

	/// Connect to a cluster using `spec` and a provided kubeconfig.
	#[instrument(skip_all)]
	pub async fn from_spec_with_kubeconfig(
		spec: &ConnectionSpec,
		kubeconfig: Kubeconfig,
	) -> Result<Self, ConnectionError> {
		let (context_name, cluster_identifier) = if let Some(api_server) = &spec.api_server {
			let context_name = find_context_for_api_server(&kubeconfig, api_server)?;
			tracing::debug!(
				context = %context_name,
				api_server = %api_server,
				"found context for apiServer"
			);
			let identifier = format!("{}  (context:{})", api_server, context_name);
			(Some(context_name), identifier)
		} else if let Some(context_names) = &spec.context_names {
			if context_names.is_empty() {
				return Err(ConnectionError::EmptyContextNames);
			}
			let context_name = find_first_matching_context(&kubeconfig, context_names)?;
			tracing::debug!(context = %context_name, "using context from contextNames");
			let identifier = format!("context:{}", context_name);
			(Some(context_name), identifier)
		} else {
			let current = kubeconfig.current_context.clone().unwrap_or_default();
			(None, format!("context:{}", current))
		};

		let config = Config::from_custom_kubeconfig(
			kubeconfig,
			&KubeConfigOptions {
				context: context_name,
				..Default::default()
			},
		)
		.await?;

		Self::connect(config, cluster_identifier).await
	}

	async fn connect(mut config: Config, cluster_identifier: String) -> Result<Self, ConnectionError> {
		config.read_timeout = Some(DEFAULT_API_TIMEOUT);
		let client = Client::try_from(config)?;

		let server_version = client.apiserver_version().await?;
		tracing::debug!(
			cluster = %cluster_identifier,
			server_version = %format!("{}.{}", server_version.major, server_version.minor),
			"connected to cluster"
		);

		Ok(Self {
			client,
			server_version,
			cluster_identifier,
		})
	}

	/// Get a reference to the underlying kube client.
	pub fn client(&self) -> &Client {
		&self.client
	}

	/// Get the server version.
	pub fn server_version(&self) -> &Info {
		&self.server_version
	}

	/// Get the default namespace from the current context.
	pub fn default_namespace(&self) -> &str {
		self.client.default_namespace()
	}

	/// Get the cluster identifier (context name or API server URL).
	pub fn cluster_identifier(&self) -> &str {
		&self.cluster_identifier
	}
}

/// Find a kubeconfig context that uses a cluster with the given API server URL.
fn find_context_for_api_server(
	kubeconfig: &Kubeconfig,
	api_server: &str,
) -> Result<String, ConnectionError> {
	let matching_cluster = kubeconfig
		.clusters
		.iter()
		.find(|c| {
			c.cluster
				.as_ref()
				.is_some_and(|cluster| cluster.server.as_deref() == Some(api_server))
		})
		.ok_or_else(|| ConnectionError::ClusterNotFound(api_server.to_string()))?;

	let cluster_name = &matching_cluster.name;

	let matching_context = kubeconfig
		.contexts
		.iter()
		.find(|c| {
			c.context
				.as_ref()
				.is_some_and(|ctx| ctx.cluster.as_str() == cluster_name)
		})
		.ok_or_else(|| ConnectionError::ContextNotFoundForCluster(cluster_name.clone()))?;

	Ok(matching_context.name.clone())
}

/// Find the first context from the list that exists in kubeconfig.
fn find_first_matching_context(
	kubeconfig: &Kubeconfig,
	context_names: &[String],
) -> Result<String, ConnectionError> {
	context_names
		.iter()
		.find(|name| kubeconfig.contexts.iter().any(|c| &c.name == *name))
		.cloned()
		.ok_or_else(|| ConnectionError::ContextNotFound(context_names.to_vec()))
}
