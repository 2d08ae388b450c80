//! Integration tests for the create loop against a mock Kubernetes API server.

use std::{
	path::{Path, PathBuf},
	time::Duration,
};

use assert_matches::assert_matches;
use k8s_mock::{
	DiscoveryMode, HttpMockK8sServer, MockApiResource, MockDiscovery, RunningHttpMockK8sServer,
};
use kensure::{
	ensure::{
		ensure_manifests_created, ensure_manifests_created_with_connection, EnsureError,
		EnsureOptions,
	},
	k8s::client::{ClusterConnection, ConnectionSpec},
	loader::{self, LoadError},
};
use rstest::rstest;

const TIMEOUT: Duration = Duration::from_secs(3);

fn testdata(name: &str) -> PathBuf {
	Path::new(env!("CARGO_MANIFEST_DIR"))
		.join("tests/testdata")
		.join(name)
}

fn options() -> EnsureOptions {
	EnsureOptions {
		poll_interval: Duration::from_millis(100),
		..EnsureOptions::default()
	}
}

async fn connect(server: &RunningHttpMockK8sServer) -> ClusterConnection {
	let spec = ConnectionSpec {
		context_names: Some(vec!["mock-context".to_string()]),
		..ConnectionSpec::default()
	};
	ClusterConnection::from_spec_with_kubeconfig(&spec, server.kubeconfig())
		.await
		.expect("failed to create connection")
}

async fn ensure(
	dir: &str,
	connection: &ClusterConnection,
	options: EnsureOptions,
) -> Result<usize, EnsureError> {
	ensure_manifests_created_with_connection(
		&testdata(dir),
		connection,
		options,
		tokio::time::sleep(TIMEOUT),
	)
	.await
}

#[rstest]
#[case::aggregated(DiscoveryMode::Aggregated)]
#[case::legacy(DiscoveryMode::Legacy)]
#[tokio::test]
async fn test_creates_all_manifests(#[case] discovery_mode: DiscoveryMode) {
	let server = HttpMockK8sServer::builder()
		.discovery_mode(discovery_mode)
		.build()
		.start()
		.await;
	let connection = connect(&server).await;

	let count = ensure("basic", &connection, options()).await.unwrap();

	assert_eq!(count, 3);
	assert_eq!(
		server.resource_names("/api/v1/namespaces"),
		vec!["default", "team"]
	);
	assert!(server
		.resource("/api/v1/namespaces/default/configmaps", "settings")
		.is_some());
	let deployment = server
		.resource("/apis/apps/v1/namespaces/team/deployments", "web")
		.unwrap();
	assert_eq!(deployment["spec"]["replicas"], 1);
	assert_eq!(server.create_requests().await, 3);
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let connection = connect(&server).await;

	ensure("basic", &connection, options()).await.unwrap();
	let first = server.create_requests().await;

	// Every object already exists now; each one is tried exactly once more.
	let count = ensure("basic", &connection, options()).await.unwrap();
	assert_eq!(count, 3);
	assert_eq!(server.create_requests().await, first + 3);
}

#[tokio::test]
async fn test_existing_resources_count_as_created() {
	let server = HttpMockK8sServer::builder()
		.resources(vec![
			serde_json::json!({
				"apiVersion": "v1",
				"kind": "Namespace",
				"metadata": { "name": "team" }
			}),
			serde_json::json!({
				"apiVersion": "apps/v1",
				"kind": "Deployment",
				"metadata": { "name": "web", "namespace": "team" },
				"spec": { "replicas": 5 }
			}),
		])
		.build()
		.start()
		.await;
	let connection = connect(&server).await;

	ensure("basic", &connection, options()).await.unwrap();

	// The existing object is left alone.
	let deployment = server
		.resource("/apis/apps/v1/namespaces/team/deployments", "web")
		.unwrap();
	assert_eq!(deployment["spec"]["replicas"], 5);
	assert_eq!(server.create_requests().await, 3);
}

#[tokio::test]
async fn test_retries_until_dependency_exists() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let connection = connect(&server).await;

	// The ConfigMap sorts before its namespace, so the first round fails it.
	ensure("out-of-order", &connection, options()).await.unwrap();

	assert!(server
		.resource("/api/v1/namespaces/late/configmaps", "late-settings")
		.is_some());
	assert_eq!(server.create_requests().await, 3);
}

#[tokio::test]
async fn test_creates_custom_resource() {
	let discovery = MockDiscovery::default().with_group(
		"example.com/v1",
		[MockApiResource::cluster_scoped("widgets", "Widget")],
	);
	let server = HttpMockK8sServer::builder()
		.discovery(discovery)
		.build()
		.start()
		.await;
	let connection = connect(&server).await;

	ensure("custom-kind", &connection, options()).await.unwrap();

	assert!(server
		.resource("/apis/example.com/v1/widgets", "sprocket")
		.is_some());
}

#[rstest]
#[case::aggregated(DiscoveryMode::Aggregated)]
#[case::legacy(DiscoveryMode::Legacy)]
#[tokio::test]
async fn test_unknown_kind_fails_at_deadline(#[case] discovery_mode: DiscoveryMode) {
	let server = HttpMockK8sServer::builder()
		.discovery_mode(discovery_mode)
		.build()
		.start()
		.await;
	let connection = connect(&server).await;

	let result = ensure("unknown-kind", &connection, options()).await;

	let errors = assert_matches!(result, Err(EnsureError::Create(errors)) => errors);
	assert_eq!(errors.len(), 1);
	assert_eq!(
		errors.get("01_widget.yaml"),
		Some(r#"unable to get REST mapping: no matches for kind "Widget" in version "example.com/v1""#)
	);
	// Manifests with a known type are still created.
	assert_eq!(
		server.resource_names("/api/v1/namespaces"),
		vec!["default", "widgets"]
	);
}

#[tokio::test]
async fn test_rejected_manifest_reports_create_error() {
	let server = HttpMockK8sServer::builder()
		.rejected_names(vec!["web".to_string()])
		.build()
		.start()
		.await;
	let connection = connect(&server).await;

	let result = ensure("basic", &connection, options()).await;

	let errors = assert_matches!(result, Err(EnsureError::Create(errors)) => errors);
	assert_eq!(errors.paths().collect::<Vec<_>>(), vec!["02_deployment.yaml"]);
	let reason = errors.get("02_deployment.yaml").unwrap();
	assert!(
		reason.contains("denied the request"),
		"unexpected reason: {reason}"
	);
	assert!(errors
		.to_string()
		.starts_with("failed to create some manifests:\n\"02_deployment.yaml\": "));
	// Retried every poll interval, not just once.
	assert!(server.create_requests().await > 3);
}

#[tokio::test]
async fn test_missing_directory() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let connection = connect(&server).await;

	let result = ensure("does-not-exist", &connection, options()).await;

	assert_matches!(
		result,
		Err(EnsureError::Load(LoadError::DirectoryNotFound(_)))
	);
	assert_eq!(server.create_requests().await, 0);
}

#[tokio::test]
async fn test_decode_errors_stop_before_creating() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let connection = connect(&server).await;

	let result = ensure("invalid", &connection, options()).await;

	let errors = assert_matches!(
		result,
		Err(EnsureError::Load(LoadError::Decode(errors))) => errors
	);
	assert_eq!(
		errors.paths().collect::<Vec<_>>(),
		vec!["01_broken.yaml", "02_nameless.yaml"]
	);
	assert!(errors
		.get("01_broken.yaml")
		.unwrap()
		.starts_with(r#"unable to convert asset "01_broken.yaml" from YAML"#));
	assert_eq!(server.create_requests().await, 0);
}

#[tokio::test]
async fn test_filters_limit_what_is_created() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let connection = connect(&server).await;

	let options = EnsureOptions {
		filters: vec![loader::extensions(&["yaml", "yml"]), loader::skip_hidden()],
		..options()
	};
	let count = ensure("mixed", &connection, options).await.unwrap();

	assert_eq!(count, 2);
	assert_eq!(
		server.resource_names("/api/v1/namespaces/default/configmaps"),
		vec!["mixed"]
	);
	assert_eq!(
		server.resource_names("/api/v1/namespaces/default/secrets"),
		vec!["mixed-credentials"]
	);
}

#[tokio::test]
async fn test_passed_deadline_creates_nothing() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let spec = ConnectionSpec {
		context_names: Some(vec!["mock-context".to_string()]),
		..ConnectionSpec::default()
	};
	let deadline = tokio::time::Instant::now() - Duration::from_secs(1);

	let result = ensure_manifests_created(deadline, &testdata("basic"), &spec, options()).await;

	assert_matches!(result, Err(EnsureError::DeadlineExceeded));
	assert_eq!(server.create_requests().await, 0);
}

#[tokio::test]
async fn test_generate_name_manifest_is_created() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let connection = connect(&server).await;

	let count = ensure("generate-name", &connection, options())
		.await
		.unwrap();

	assert_eq!(count, 1);
	assert_eq!(
		server.resource_names("/api/v1/namespaces/default/configmaps"),
		vec!["bootstrap-run-00000"]
	);
	assert_eq!(server.create_requests().await, 1);
}
