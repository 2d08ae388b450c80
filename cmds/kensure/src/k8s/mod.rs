//! Kubernetes access for manifest creation.
//!
//! This module provides native Kubernetes API access using kube-rs:
//! cluster connection, API discovery and the create loop.

pub mod apply;
pub mod client;
pub mod discovery;

/// Kubernetes API resource scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
	/// Resource is namespaced (e.g., Deployment, ConfigMap).
	Namespaced,

	/// Resource is cluster-wide (e.g., Namespace, ClusterRole).
	ClusterWide,
}
