//! Ensure command handler.
//!
//! Loads the manifests of a directory and keeps creating them on the cluster
//! until every one exists, the timeout passes, or the user interrupts.

use std::{io::Write, path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use clap::Args;
use tokio::time::Instant;

use crate::{
	config::KensureConfig,
	ensure::{self, EnsureOptions},
	k8s::client::ConnectionSpec,
};

#[derive(Args, Debug, Clone)]
pub struct EnsureArgs {
	/// Directory containing the manifests to create
	pub path: PathBuf,

	/// Give up after this long, e.g. 30s, 10m [default: 10m]
	#[arg(long)]
	pub timeout: Option<String>,

	/// Delay between create attempts [default: 500ms]
	#[arg(long)]
	pub poll_interval: Option<String>,

	/// Use the kubeconfig context whose cluster has this API server URL
	#[arg(long, conflicts_with = "context")]
	pub api_server: Option<String>,

	/// Kubeconfig context to use; the first one that exists wins
	#[arg(long = "context")]
	pub context: Vec<String>,

	/// Only load files whose name starts with this prefix
	#[arg(long)]
	pub prefix: Option<String>,

	/// Only load files with this extension (repeatable)
	#[arg(long = "extension")]
	pub extensions: Vec<String>,

	/// Also load hidden files and editor temp files
	#[arg(long)]
	pub include_hidden: bool,

	/// Log level (trace, debug, info, warn, error)
	#[arg(long)]
	pub log_level: Option<tracing::Level>,
}

impl EnsureArgs {
	/// Settings given on the command line, in config file form.
	fn as_config(&self) -> KensureConfig {
		KensureConfig {
			timeout: self.timeout.clone(),
			poll_interval: self.poll_interval.clone(),
			connection: ConnectionSpec {
				api_server: self.api_server.clone(),
				context_names: (!self.context.is_empty()).then(|| self.context.clone()),
			},
			prefix: self.prefix.clone(),
			extensions: self.extensions.clone(),
			include_hidden: self.include_hidden,
		}
	}
}

/// Run the ensure command.
pub fn run<W: Write>(args: EnsureArgs, writer: W) -> Result<()> {
	let mut config = KensureConfig::load_from_directory(&args.path)?.unwrap_or_default();
	config.merge_from(&args.as_config());

	let runtime = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.context("creating tokio runtime")?;

	runtime.block_on(run_async(args.path, config, writer))
}

async fn run_async<W: Write>(path: PathBuf, config: KensureConfig, mut writer: W) -> Result<()> {
	let deadline = deadline_after(config.timeout()?)?;
	let options = EnsureOptions {
		filters: config.filters(),
		poll_interval: config.poll_interval()?,
	};

	let interrupted = async {
		if let Err(e) = tokio::signal::ctrl_c().await {
			tracing::warn!(error = %e, "unable to listen for interrupts");
			std::future::pending::<()>().await;
		}
		tracing::warn!("interrupted");
	};
	let stop = async move {
		tokio::select! {
			() = tokio::time::sleep_until(deadline) => tracing::debug!("timeout reached"),
			() = interrupted => {}
		}
	};

	let count =
		ensure::ensure_manifests_created_until(&path, &config.connection, options, stop).await?;

	writeln!(writer, "{} manifests exist", count)?;
	Ok(())
}

/// The instant `timeout` from now.
fn deadline_after(timeout: Duration) -> Result<Instant> {
	match Instant::now().checked_add(timeout) {
		Some(deadline) => Ok(deadline),
		None => bail!("timeout {:?} is too large", timeout),
	}
}
