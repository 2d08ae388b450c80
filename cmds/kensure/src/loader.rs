//! Manifest loading from a directory tree.
//!
//! Files are collected recursively, filtered by caller-supplied predicates and
//! decoded from YAML. A file that fails to decode does not stop the others from
//! loading: the successfully decoded manifests are returned alongside an
//! aggregated report of the failures.

use std::{
	collections::BTreeMap,
	fs, io,
	path::{Path, PathBuf},
	sync::Arc,
};

use thiserror::Error;
use tracing::instrument;
use walkdir::{DirEntry, WalkDir};

use crate::{
	errors::{ManifestErrors, Stage},
	manifest::{Manifest, PendingSet},
};

/// Predicate deciding whether a file is loaded.
///
/// A file is loaded only when every predicate accepts it.
pub type FilePredicate = Arc<dyn Fn(&DirEntry) -> bool + Send + Sync>;

/// Errors that prevent a manifest directory from being loaded.
#[derive(Debug, Error)]
pub enum LoadError {
	#[error("directory {0:?} does not exist")]
	DirectoryNotFound(PathBuf),

	#[error("walking manifest directory")]
	Walk(#[from] walkdir::Error),

	#[error("reading {path:?}")]
	Read {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error(transparent)]
	Decode(ManifestErrors),
}

/// Result of decoding a set of files.
#[derive(Debug)]
pub struct LoadedManifests {
	pub manifests: PendingSet,
	/// Files that could not be decoded, if any.
	pub errors: Option<ManifestErrors>,
}

impl LoadedManifests {
	/// Treat any decode failure as an error, discarding the partial result.
	pub fn into_result(self) -> Result<PendingSet, LoadError> {
		match self.errors {
			Some(errors) => Err(LoadError::Decode(errors)),
			None => Ok(self.manifests),
		}
	}
}

/// Read every file under `dir` that satisfies all `filters`.
///
/// Keys are paths relative to `dir`.
#[instrument(skip(dir, filters), fields(dir = %dir.display(), filter_count = filters.len()))]
pub fn load_files(
	dir: &Path,
	filters: &[FilePredicate],
) -> Result<BTreeMap<String, Vec<u8>>, LoadError> {
	if !dir.exists() {
		return Err(LoadError::DirectoryNotFound(dir.to_path_buf()));
	}

	let mut files = BTreeMap::new();
	for entry in WalkDir::new(dir).follow_links(true) {
		let entry = entry?;
		if entry.file_type().is_dir() {
			continue;
		}
		if !filters.iter().all(|accept| accept(&entry)) {
			tracing::trace!(path = %entry.path().display(), "skipping filtered file");
			continue;
		}

		let bytes = fs::read(entry.path()).map_err(|source| LoadError::Read {
			path: entry.path().to_path_buf(),
			source,
		})?;
		files.insert(relative_key(dir, entry.path()), bytes);
	}

	tracing::debug!(file_count = files.len(), "read manifest files");
	Ok(files)
}

fn relative_key(dir: &Path, path: &Path) -> String {
	path.strip_prefix(dir)
		.unwrap_or(path)
		.to_string_lossy()
		.into_owned()
}

/// Decode raw YAML files into manifests.
pub fn decode_manifests(files: BTreeMap<String, Vec<u8>>) -> LoadedManifests {
	let mut manifests = PendingSet::new();
	let mut errors = ManifestErrors::new(Stage::Load);

	for (path, bytes) in files {
		let value: serde_json::Value = match serde_yaml_with_quirks::from_slice(&bytes) {
			Ok(value) => value,
			Err(e) => {
				errors.insert(
					path.clone(),
					format!("unable to convert asset {:?} from YAML: {}", path, e),
				);
				continue;
			}
		};

		match Manifest::from_value(value) {
			Ok(manifest) => {
				manifests.insert(path, manifest);
			}
			Err(e) => {
				errors.insert(
					path.clone(),
					format!("unable to decode asset {:?}: {}", path, e),
				);
			}
		}
	}

	LoadedManifests {
		manifests,
		errors: errors.into_error(),
	}
}

/// Load and decode all manifests under `dir`.
pub fn load_manifests(dir: &Path, filters: &[FilePredicate]) -> Result<LoadedManifests, LoadError> {
	let files = load_files(dir, filters)?;
	Ok(decode_manifests(files))
}

/// Accept files whose name starts with `prefix`.
pub fn name_prefix(prefix: impl Into<String>) -> FilePredicate {
	let prefix = prefix.into();
	Arc::new(move |entry: &DirEntry| entry.file_name().to_string_lossy().starts_with(&prefix))
}

/// Accept files with one of the given extensions (without the leading dot).
pub fn extensions<S: AsRef<str>>(extensions: &[S]) -> FilePredicate {
	let extensions: Vec<String> = extensions
		.iter()
		.map(|ext| ext.as_ref().trim_start_matches('.').to_string())
		.collect();
	Arc::new(move |entry: &DirEntry| {
		entry
			.path()
			.extension()
			.is_some_and(|ext| extensions.iter().any(|e| ext == e.as_str()))
	})
}

/// Reject dotfiles and editor leftovers.
pub fn skip_hidden() -> FilePredicate {
	Arc::new(|entry: &DirEntry| {
		let name = entry.file_name().to_string_lossy();
		!(name.starts_with('.') || name.ends_with(".tmp") || name.ends_with(".swp"))
	})
}
