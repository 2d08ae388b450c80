//! HTTP-based mock Kubernetes server using wiremock.
//!
//! This provides a real HTTP server that can be used with actual kubeconfig-based
//! connections. It implements discovery and the create half of the resource
//! API: POST stores the object, or answers `409 AlreadyExists` when an object
//! with the same name is already stored. Objects with only `generateName` get a
//! numbered name. Namespaced objects can only be created once their namespace
//! exists.

use std::{
	collections::HashMap,
	sync::{Arc, RwLock},
};

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use serde_json::{json, Value};
use tracing::{debug, trace};
use wiremock::{
	matchers::{header_regex, method, path, path_regex},
	Mock, MockServer, Request, ResponseTemplate,
};

use super::discovery::{DiscoveryMode, MockApiResource, MockDiscovery};

/// Stored objects keyed by (collection path, name).
pub type SharedResources = Arc<RwLock<HashMap<(String, String), Value>>>;

const NAMESPACES_PATH: &str = "/api/v1/namespaces";

/// A mock Kubernetes server exposed over HTTP.
#[derive(Builder)]
pub struct HttpMockK8sServer {
	#[builder(default)]
	discovery_mode: DiscoveryMode,
	/// Resource types advertised through discovery.
	#[builder(default)]
	discovery: MockDiscovery,
	/// Objects that exist before the first request. The server derives API
	/// paths from apiVersion/kind using the discovery data.
	#[builder(default)]
	resources: Vec<Value>,
	/// Object names whose creation is refused, as an admission webhook would.
	#[builder(default)]
	rejected_names: Vec<String>,
}

/// A running HTTP mock server instance.
pub struct RunningHttpMockK8sServer {
	server: MockServer,
	resources: SharedResources,
}

impl HttpMockK8sServer {
	/// Start the mock server with all configured resources.
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;
		debug!(uri = %server.uri(), "started mock K8s server");

		let mut resources = HashMap::new();
		for manifest in self.resources {
			if let Some(key) = storage_key(&manifest, &self.discovery) {
				trace!(api_path = %key.0, name = %key.1, "registered resource");
				resources.insert(key, manifest);
			}
		}
		resources
			.entry((NAMESPACES_PATH.to_string(), "default".to_string()))
			.or_insert_with(|| namespace_object("default"));

		let resources = Arc::new(RwLock::new(resources));

		mount_version(&server).await;
		mount_discovery(&server, &self.discovery, self.discovery_mode).await;
		mount_resources(&server, &resources, self.rejected_names).await;

		RunningHttpMockK8sServer { server, resources }
	}
}

/// Collection path and name under which `manifest` is stored.
fn storage_key(manifest: &Value, discovery: &MockDiscovery) -> Option<(String, String)> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	let name = manifest.pointer("/metadata/name")?.as_str()?;
	let namespace = manifest
		.pointer("/metadata/namespace")
		.and_then(Value::as_str);

	let resource = discovery.find(api_version, kind)?;
	Some((
		resource.collection_path(api_version, namespace),
		name.to_string(),
	))
}

fn namespace_object(name: &str) -> Value {
	json!({
		"apiVersion": "v1",
		"kind": "Namespace",
		"metadata": { "name": name }
	})
}

impl RunningHttpMockK8sServer {
	/// Get the server's URI (e.g., "http://127.0.0.1:12345").
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Stored object at `api_path` (a collection path) named `name`.
	pub fn resource(&self, api_path: &str, name: &str) -> Option<Value> {
		self.lock_resources()
			.get(&(api_path.to_string(), name.to_string()))
			.cloned()
	}

	/// Sorted names of all objects stored under `api_path`.
	pub fn resource_names(&self, api_path: &str) -> Vec<String> {
		let mut names: Vec<_> = self
			.lock_resources()
			.keys()
			.filter(|(path, _)| path == api_path)
			.map(|(_, name)| name.clone())
			.collect();
		names.sort();
		names
	}

	/// Number of create requests received so far, successful or not.
	pub async fn create_requests(&self) -> usize {
		self.server
			.received_requests()
			.await
			.unwrap_or_default()
			.iter()
			.filter(|req| req.method.as_str() == "POST")
			.count()
	}

	fn lock_resources(
		&self,
	) -> std::sync::RwLockReadGuard<'_, HashMap<(String, String), Value>> {
		self.resources
			.read()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	/// Create a Kubeconfig pointing to this mock server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock-context")
	}

	/// Create a Kubeconfig pointing to this mock server with a custom context name.
	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		let cluster_name = "mock-cluster";
		let user_name = "mock-user";

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: cluster_name.to_string(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: cluster_name.to_string(),
					user: Some(user_name.to_string()),
					namespace: Some("default".to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: user_name.to_string(),
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}
}

async fn mount_version(server: &MockServer) {
	Mock::given(method("GET"))
		.and(path("/version"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"major": "1",
			"minor": "31",
			"gitVersion": "v1.31.0",
			"gitCommit": "fake",
			"gitTreeState": "clean",
			"buildDate": "2024-08-13T00:00:00Z",
			"goVersion": "go1.22.5",
			"compiler": "gc",
			"platform": "linux/amd64"
		})))
		.mount(server)
		.await;
}

/// One entry of an aggregated discovery version.
fn aggregated_resource(group: &str, version: &str, r: &MockApiResource) -> Value {
	json!({
		"resource": r.name,
		"responseKind": {
			"group": group,
			"version": version,
			"kind": r.kind
		},
		"scope": if r.namespaced { "Namespaced" } else { "Cluster" },
		"verbs": r.verbs,
	})
}

/// One entry of a legacy APIResourceList.
fn legacy_resource(r: &MockApiResource) -> Value {
	json!({
		"name": r.name,
		"singularName": "",
		"namespaced": r.namespaced,
		"kind": r.kind,
		"verbs": r.verbs,
	})
}

fn split_group_version(gv: &str) -> (&str, &str) {
	gv.split_once('/').unwrap_or(("", gv))
}

async fn mount_discovery(server: &MockServer, discovery: &MockDiscovery, mode: DiscoveryMode) {
	match mode {
		DiscoveryMode::Aggregated => mount_aggregated_discovery(server, discovery).await,
		DiscoveryMode::Legacy => {
			// Refuse the aggregated format so clients fall back to legacy endpoints
			for root in ["/api", "/apis"] {
				Mock::given(method("GET"))
					.and(path(root))
					.and(header_regex("accept", "apidiscovery"))
					.respond_with(ResponseTemplate::new(406))
					.mount(server)
					.await;
			}
		}
	}

	Mock::given(method("GET"))
		.and(path("/api"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"kind": "APIVersions",
			"versions": ["v1"],
			"serverAddressByClientCIDRs": []
		})))
		.mount(server)
		.await;

	let groups: Vec<_> = discovery
		.group_resources
		.keys()
		.map(|gv| {
			let (group, version) = split_group_version(gv);
			json!({
				"name": group,
				"versions": [{"groupVersion": gv, "version": version}],
				"preferredVersion": {"groupVersion": gv, "version": version}
			})
		})
		.collect();

	Mock::given(method("GET"))
		.and(path("/apis"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"kind": "APIGroupList",
			"apiVersion": "v1",
			"groups": groups
		})))
		.mount(server)
		.await;

	let lists = std::iter::once(("v1", &discovery.core_resources)).chain(
		discovery
			.group_resources
			.iter()
			.map(|(gv, rs)| (gv.as_str(), rs)),
	);
	for (gv, rs) in lists {
		let url = if gv == "v1" {
			"/api/v1".to_string()
		} else {
			format!("/apis/{}", gv)
		};
		Mock::given(method("GET"))
			.and(path(url))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"kind": "APIResourceList",
				"apiVersion": "v1",
				"groupVersion": gv,
				"resources": rs.iter().map(legacy_resource).collect::<Vec<_>>()
			})))
			.mount(server)
			.await;
	}
}

async fn mount_aggregated_discovery(server: &MockServer, discovery: &MockDiscovery) {
	// The Content-Type must announce the aggregated format or clients won't parse it
	const AGGREGATED_DISCOVERY_CONTENT_TYPE: &str =
		"application/json;g=apidiscovery.k8s.io;v=v2;as=APIGroupDiscoveryList";

	let core = json!({
		"kind": "APIGroupDiscoveryList",
		"apiVersion": "apidiscovery.k8s.io/v2",
		"items": [{
			"metadata": { "name": "" },
			"versions": [{
				"version": "v1",
				"resources": discovery
					.core_resources
					.iter()
					.map(|r| aggregated_resource("", "v1", r))
					.collect::<Vec<_>>(),
				"freshness": "Current"
			}]
		}]
	});

	let groups: Vec<_> = discovery
		.group_resources
		.iter()
		.map(|(gv, rs)| {
			let (group, version) = split_group_version(gv);
			json!({
				"metadata": { "name": group },
				"versions": [{
					"version": version,
					"resources": rs
						.iter()
						.map(|r| aggregated_resource(group, version, r))
						.collect::<Vec<_>>(),
					"freshness": "Current"
				}]
			})
		})
		.collect();
	let apis = json!({
		"kind": "APIGroupDiscoveryList",
		"apiVersion": "apidiscovery.k8s.io/v2",
		"items": groups
	});

	for (root, body) in [("/api", core), ("/apis", apis)] {
		// set_body_json would overwrite the Content-Type
		Mock::given(method("GET"))
			.and(path(root))
			.and(header_regex("accept", "apidiscovery"))
			.respond_with(
				ResponseTemplate::new(200)
					.set_body_raw(body.to_string(), AGGREGATED_DISCOVERY_CONTENT_TYPE),
			)
			.mount(server)
			.await;
	}
}

fn status(code: u16, reason: &str, message: String) -> ResponseTemplate {
	ResponseTemplate::new(code).set_body_json(json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": message,
		"reason": reason,
		"code": code
	}))
}

/// Namespace segment of a namespaced collection path.
fn namespace_of(api_path: &str) -> Option<&str> {
	let (_, rest) = api_path.split_once("/namespaces/")?;
	rest.split('/').next()
}

async fn mount_resources(server: &MockServer, resources: &SharedResources, rejected: Vec<String>) {
	let post_resources = Arc::clone(resources);
	let get_resources = Arc::clone(resources);

	Mock::given(method("POST"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let api_path = req.url.path().trim_end_matches('/').to_string();
			let mut body: Value = match serde_json::from_slice(&req.body) {
				Ok(body) => body,
				Err(e) => return status(400, "BadRequest", e.to_string()),
			};
			let plural = api_path.rsplit('/').next().unwrap_or_default();

			let mut resources = post_resources
				.write()
				.unwrap_or_else(|poisoned| poisoned.into_inner());

			let name = match body.pointer("/metadata/name").and_then(Value::as_str) {
				Some(name) => name.to_string(),
				None => {
					let Some(prefix) = body.pointer("/metadata/generateName").and_then(Value::as_str)
					else {
						return status(422, "Invalid", "metadata.name: Required value".to_string());
					};
					let taken = resources.keys().filter(|(p, _)| *p == api_path).count();
					let name = format!("{}{:05}", prefix, taken);
					body["metadata"]["name"] = Value::String(name.clone());
					name
				}
			};

			if rejected.iter().any(|r| *r == name) {
				return status(
					403,
					"Forbidden",
					format!(
						"admission webhook \"deny.mock.k8s.io\" denied the request: {} {:?} is not allowed",
						plural, name
					),
				);
			}

			if let Some(ns) = namespace_of(&api_path) {
				if !resources.contains_key(&(NAMESPACES_PATH.to_string(), ns.to_string())) {
					return status(404, "NotFound", format!("namespaces {:?} not found", ns));
				}
			}

			let key = (api_path.clone(), name.clone());
			if resources.contains_key(&key) {
				return status(
					409,
					"AlreadyExists",
					format!("{} {:?} already exists", plural, name),
				);
			}

			trace!(api_path = %api_path, name = %name, "created resource");
			resources.insert(key, body.clone());
			ResponseTemplate::new(201).set_body_json(body)
		})
		.mount(server)
		.await;

	Mock::given(method("GET"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let path = req.url.path().trim_end_matches('/');
			let Some((api_path, name)) = path.rsplit_once('/') else {
				return status(404, "NotFound", "not found".to_string());
			};
			let resources = get_resources
				.read()
				.unwrap_or_else(|poisoned| poisoned.into_inner());
			match resources.get(&(api_path.to_string(), name.to_string())) {
				Some(resource) => ResponseTemplate::new(200).set_body_json(resource),
				None => status(404, "NotFound", format!("{:?} not found", name)),
			}
		})
		.mount(server)
		.await;
}
