/// Results archive
///
/// Every analysis point is stored under its [`ParameterKey`] as a set of named
/// numeric datasets. The on-disk layout of [`DirectoryArchive`] is:
///
/// ```text
/// <root>/
///   <key file stem>/
///     manifest.json      key, and per dataset: shape, length, blake3 digest
///     <dataset>.json     {"shape": [...], "data": [...]}
/// ```
///
/// Files are written to a temporary name and renamed into place, so a crashed
/// run leaves either the old dataset or the new one. A dataset whose bytes no
/// longer match the manifest digest is reported as corrupt, never returned.
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::ParameterKey;
use crate::error::{AnalysisError, Result};

const MANIFEST_FILE: &str = "manifest.json";

/// A dense row-major numeric array.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Dataset {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl Dataset {
    /// `shape` must describe exactly `data.len()` values.
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Self {
        debug_assert_eq!(shape.iter().product::<usize>(), data.len());
        Self { shape, data }
    }

    pub fn vector(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Storage of analysis results keyed by parameter set and dataset name.
pub trait ResultsArchive {
    /// Stores `dataset`, replacing any previous dataset of the same name.
    fn store_result(&self, key: &ParameterKey, name: &str, dataset: &Dataset) -> Result<()>;

    /// `Ok(None)` when nothing is stored under `name`.
    fn load_result(&self, key: &ParameterKey, name: &str) -> Result<Option<Dataset>>;

    /// Removes a dataset. Deleting a missing dataset is not an error.
    fn delete_result(&self, key: &ParameterKey, name: &str) -> Result<()>;

    /// Names of all datasets stored under `key`.
    fn stored_names(&self, key: &ParameterKey) -> Result<Vec<String>>;

    /// True when every name in `expected` is stored under `key`.
    fn is_complete(&self, key: &ParameterKey, expected: &[&str]) -> Result<bool> {
        let stored = self.stored_names(key)?;
        let missing: Vec<&str> = expected
            .iter()
            .copied()
            .filter(|name| !stored.iter().any(|s| s == name))
            .collect();
        if !missing.is_empty() && !stored.is_empty() {
            warn!("results under '{key}' are incomplete, missing {missing:?}");
        }
        Ok(missing.is_empty())
    }
}

/// In-process archive, mostly for tests and one-off runs.
#[derive(Debug, Default)]
pub struct MemoryArchive {
    entries: Mutex<HashMap<String, BTreeMap<String, Dataset>>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, BTreeMap<String, Dataset>>> {
        // a poisoned map is still consistent: every operation is a single insert or remove
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl ResultsArchive for MemoryArchive {
    fn store_result(&self, key: &ParameterKey, name: &str, dataset: &Dataset) -> Result<()> {
        self.lock()
            .entry(key.as_str().to_string())
            .or_default()
            .insert(name.to_string(), dataset.clone());
        Ok(())
    }

    fn load_result(&self, key: &ParameterKey, name: &str) -> Result<Option<Dataset>> {
        Ok(self
            .lock()
            .get(key.as_str())
            .and_then(|sets| sets.get(name))
            .cloned())
    }

    fn delete_result(&self, key: &ParameterKey, name: &str) -> Result<()> {
        if let Some(sets) = self.lock().get_mut(key.as_str()) {
            sets.remove(name);
        }
        Ok(())
    }

    fn stored_names(&self, key: &ParameterKey) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .get(key.as_str())
            .map(|sets| sets.keys().cloned().collect())
            .unwrap_or_default())
    }
}

/// Manifest entry for one stored dataset.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DatasetEntry {
    pub shape: Vec<usize>,
    pub len: usize,
    /// blake3 hex digest of the dataset file
    pub hash: String,
}

/// Per-key manifest.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct KeyManifest {
    pub key: String,
    pub datasets: BTreeMap<String, DatasetEntry>,
}

/// JSON files under a root directory, one subdirectory per parameter key.
#[derive(Debug, Clone)]
pub struct DirectoryArchive {
    root: PathBuf,
}

impl DirectoryArchive {
    /// Opens (creating if needed) an archive rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_dir(&self, key: &ParameterKey) -> PathBuf {
        self.root.join(key.file_stem())
    }

    fn dataset_path(&self, key: &ParameterKey, name: &str) -> PathBuf {
        self.key_dir(key).join(format!("{name}.json"))
    }

    /// Reads the manifest of `key`; an absent manifest is an empty one.
    pub fn manifest(&self, key: &ParameterKey) -> Result<KeyManifest> {
        let path = self.key_dir(key).join(MANIFEST_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(KeyManifest {
                    key: key.as_str().to_string(),
                    ..KeyManifest::default()
                })
            }
            Err(e) => return Err(e.into()),
        };
        let manifest: KeyManifest = serde_json::from_slice(&bytes)?;
        if manifest.key != key.as_str() {
            return Err(AnalysisError::integrity(format!(
                "manifest at {} belongs to '{}', not '{key}'",
                path.display(),
                manifest.key
            )));
        }
        Ok(manifest)
    }

    fn write_manifest(&self, key: &ParameterKey, manifest: &KeyManifest) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(manifest)?;
        write_atomic(&self.key_dir(key).join(MANIFEST_FILE), &bytes)
    }
}

impl ResultsArchive for DirectoryArchive {
    fn store_result(&self, key: &ParameterKey, name: &str, dataset: &Dataset) -> Result<()> {
        fs::create_dir_all(self.key_dir(key))?;
        let mut manifest = self.manifest(key)?;
        if manifest.datasets.remove(name).is_some() {
            // drop the old entry first so a failed write never leaves a stale digest
            self.write_manifest(key, &manifest)?;
        }

        let bytes = dataset.to_json()?;
        write_atomic(&self.dataset_path(key, name), &bytes)?;
        manifest.datasets.insert(
            name.to_string(),
            DatasetEntry {
                shape: dataset.shape.clone(),
                len: dataset.len(),
                hash: blake3::hash(&bytes).to_hex().to_string(),
            },
        );
        self.write_manifest(key, &manifest)?;
        debug!("stored '{name}' ({} values) under '{key}'", dataset.len());
        Ok(())
    }

    fn load_result(&self, key: &ParameterKey, name: &str) -> Result<Option<Dataset>> {
        let manifest = self.manifest(key)?;
        let Some(entry) = manifest.datasets.get(name) else {
            return Ok(None);
        };
        let corrupt = || AnalysisError::CorruptDataset {
            key: key.as_str().to_string(),
            name: name.to_string(),
        };
        let bytes = match fs::read(self.dataset_path(key, name)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(corrupt()),
            Err(e) => return Err(e.into()),
        };
        if blake3::hash(&bytes).to_hex().as_str() != entry.hash {
            return Err(corrupt());
        }
        let dataset: Dataset = serde_json::from_slice(&bytes)?;
        if dataset.shape != entry.shape || dataset.len() != entry.len {
            return Err(corrupt());
        }
        Ok(Some(dataset))
    }

    fn delete_result(&self, key: &ParameterKey, name: &str) -> Result<()> {
        let mut manifest = self.manifest(key)?;
        if manifest.datasets.remove(name).is_some() {
            self.write_manifest(key, &manifest)?;
        }
        match fs::remove_file(self.dataset_path(key, name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn stored_names(&self, key: &ParameterKey) -> Result<Vec<String>> {
        Ok(self.manifest(key)?.datasets.into_keys().collect())
    }
}

/// Writes `bytes` next to `path` and renames over it.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
