//! Retry loop that keeps creating manifests until all of them exist.
//!
//! Each round hands the pending set to the [`ApplyEngine`]. A round that
//! leaves nothing pending ends the loop. A round that could not resolve some
//! manifest type triggers a fresh discovery snapshot before the next round.
//! Any other failure is retried after the poll interval until the deadline,
//! at which point the failures of the last round are reported.

use std::{future::Future, path::Path, time::Duration};

use thiserror::Error;
use tokio::time::Instant;
use tracing::{instrument, Instrument};

use crate::{
	errors::ManifestErrors,
	k8s::{
		apply::{ApplyEngine, ResourceClient},
		client::{ClusterConnection, ConnectionError, ConnectionSpec},
		discovery::{DiscoveryError, TypeDiscovery, TypeMapping},
	},
	loader::{self, FilePredicate, LoadError},
	manifest::PendingSet,
};

/// Delay between two create rounds.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Errors returned by [`ensure_manifests_created`].
#[derive(Debug, Error)]
pub enum EnsureError {
	#[error("connecting to Kubernetes cluster")]
	Connection(#[from] ConnectionError),

	#[error("loading manifests")]
	Load(#[from] LoadError),

	#[error("building API type mapping")]
	InitialMapping(#[source] DiscoveryError),

	#[error("refreshing API type mapping")]
	MappingRefresh(#[source] DiscoveryError),

	/// The manifests still failing when the deadline was reached.
	#[error(transparent)]
	Create(ManifestErrors),

	#[error("deadline exceeded before manifests could be created")]
	DeadlineExceeded,
}

/// Options for [`ensure_manifests_created`].
#[derive(Clone)]
pub struct EnsureOptions {
	/// Only files accepted by every filter are loaded.
	pub filters: Vec<FilePredicate>,
	pub poll_interval: Duration,
}

impl Default for EnsureOptions {
	fn default() -> Self {
		Self {
			filters: Vec::new(),
			poll_interval: DEFAULT_POLL_INTERVAL,
		}
	}
}

impl std::fmt::Debug for EnsureOptions {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EnsureOptions")
			.field("filters", &self.filters.len())
			.field("poll_interval", &self.poll_interval)
			.finish()
	}
}

/// Ensure every manifest under `manifest_dir` exists on the cluster selected by `spec`.
///
/// Keeps retrying until no errors are reported or `deadline` is reached.
pub async fn ensure_manifests_created(
	deadline: Instant,
	manifest_dir: &Path,
	spec: &ConnectionSpec,
	options: EnsureOptions,
) -> Result<usize, EnsureError> {
	ensure_manifests_created_until(
		manifest_dir,
		spec,
		options,
		tokio::time::sleep_until(deadline),
	)
	.await
}

/// Like [`ensure_manifests_created`], stopping once `cancelled` completes.
///
/// Connecting to the cluster is abandoned too when `cancelled` completes first.
pub async fn ensure_manifests_created_until(
	manifest_dir: &Path,
	spec: &ConnectionSpec,
	options: EnsureOptions,
	cancelled: impl Future<Output = ()>,
) -> Result<usize, EnsureError> {
	tokio::pin!(cancelled);

	let connection = tokio::select! {
		biased;
		() = &mut cancelled => return Err(EnsureError::DeadlineExceeded),
		connection = ClusterConnection::from_spec(spec) => connection?,
	};

	ensure_manifests_created_with_connection(manifest_dir, &connection, options, cancelled).await
}

/// Like [`ensure_manifests_created`], over an existing connection.
///
/// The loop stops once `cancelled` completes. Returns the number of manifests
/// that were loaded.
#[instrument(skip_all, fields(dir = %manifest_dir.display(), cluster = %connection.cluster_identifier()))]
pub async fn ensure_manifests_created_with_connection(
	manifest_dir: &Path,
	connection: &ClusterConnection,
	options: EnsureOptions,
	cancelled: impl Future<Output = ()>,
) -> Result<usize, EnsureError> {
	tokio::pin!(cancelled);

	let mut pending = loader::load_manifests(manifest_dir, &options.filters)?.into_result()?;
	let total = pending.len();
	tracing::info!(manifest_count = total, "loaded manifests");

	let client = connection.client();
	let mapping = tokio::select! {
		biased;
		() = &mut cancelled => return Err(EnsureError::DeadlineExceeded),
		mapping = client.snapshot() => mapping.map_err(EnsureError::InitialMapping)?,
	};

	let engine = ApplyEngine::new(client.clone(), connection.default_namespace().to_string());
	ensure_created(
		&mut pending,
		&engine,
		client,
		mapping,
		options.poll_interval,
		cancelled,
	)
	.await?;

	tracing::info!(manifest_count = total, "all manifests exist");
	Ok(total)
}

/// Run create rounds until `pending` is empty or `cancelled` completes.
///
/// The first round starts immediately. Between rounds the loop sleeps for
/// `poll_interval`; the sleep is abandoned as soon as `cancelled` completes.
/// On cancellation the failures of the last round are returned.
pub async fn ensure_created<C, D>(
	pending: &mut PendingSet,
	engine: &ApplyEngine<C>,
	discovery: D,
	mut mapping: TypeMapping,
	poll_interval: Duration,
	cancelled: impl Future<Output = ()>,
) -> Result<(), EnsureError>
where
	C: ResourceClient,
	D: TypeDiscovery,
{
	tokio::pin!(cancelled);

	let mut round: u32 = 0;
	let last_error = loop {
		round += 1;
		let span = tracing::debug_span!("create_round", round, pending = pending.len());
		let outcome = engine.apply(pending, &mapping).instrument(span).await;

		let Some(errors) = outcome.errors else {
			tracing::debug!(round, "all manifests created");
			return Ok(());
		};

		if outcome.stale_mapping {
			tracing::info!(round, "type mapping is stale, refreshing discovery");
			mapping = discovery
				.snapshot()
				.await
				.map_err(EnsureError::MappingRefresh)?;
		}

		tracing::debug!(
			round,
			remaining = pending.len(),
			failed = errors.len(),
			"create round finished with errors"
		);

		tokio::select! {
			biased;
			() = &mut cancelled => break errors,
			() = tokio::time::sleep(poll_interval) => {}
		}
	};

	tracing::warn!(round, remaining = pending.len(), "gave up waiting for manifests");
	Err(EnsureError::Create(last_error))
}
