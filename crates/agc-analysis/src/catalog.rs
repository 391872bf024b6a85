//! Input catalog (`ntuples.json`).
//!
//! The catalog maps `process -> variation -> {"files": [{"path", "nevts"}]}`.
//! Every path is a URL under the remote prefix; the catalog reader can swap
//! that prefix for a mirror and then map the result into a local cache of
//! Parquet conversions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use agc_core::{Error, Result};

/// Process name skipped by the catalog reader.
pub const DATA_PROCESS: &str = "data";

/// One input file entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Remote location.
    pub path: String,
    /// Number of events in the file before any selection.
    pub nevts: u64,
}

/// Files of one (process, variation) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleEntry {
    /// Input files.
    pub files: Vec<FileEntry>,
}

/// Raw catalog contents.
pub type Catalog = BTreeMap<String, BTreeMap<String, SampleEntry>>;

/// A (process, variation) sample ready to be booked.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Event file locations, after prefix and cache mapping.
    pub paths: Vec<String>,
    /// Physics process (`ttbar`, `wjets`, ...).
    pub process: String,
    /// Catalog variation (`nominal`, `ME_var`, ...).
    pub variation: String,
    /// Sum of `nevts` over the kept files.
    pub total_events: u64,
}

impl Sample {
    /// `{process}_{variation}`, used for logs and graph names.
    pub fn name(&self) -> String {
        format!("{}_{}", self.process, self.variation)
    }

    /// Whether systematic variations are booked for this sample.
    pub fn is_nominal(&self) -> bool {
        self.variation == agc_frame::NOMINAL
    }
}

/// How catalog paths are turned into readable locations.
#[derive(Debug, Clone, Default)]
pub struct CatalogOptions {
    /// Keep at most this many files per sample.
    pub max_files_per_sample: Option<usize>,
    /// Replacement for the remote prefix.
    pub remote_data_prefix: Option<String>,
    /// Local directory holding copies of the input files.
    pub data_cache: Option<PathBuf>,
}

/// Parse a catalog file.
pub fn read_catalog(path: &Path) -> Result<Catalog> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Input(format!("cannot read catalog {}: {e}", path.display())))?;
    serde_json::from_str(&text).map_err(|e| Error::Input(format!("malformed catalog {}: {e}", path.display())))
}

/// Read `path` and resolve every non-data sample.
pub fn retrieve_inputs(path: &Path, remote_prefix: &str, opts: &CatalogOptions) -> Result<Vec<Sample>> {
    let catalog = read_catalog(path)?;
    resolve_samples(&catalog, remote_prefix, opts)
}

/// Resolve the samples of an already parsed catalog.
pub fn resolve_samples(catalog: &Catalog, remote_prefix: &str, opts: &CatalogOptions) -> Result<Vec<Sample>> {
    if opts.max_files_per_sample == Some(0) {
        return Err(Error::Config("--n-max-files-per-sample must be at least 1".into()));
    }
    let cache_root = match &opts.data_cache {
        Some(dir) => Some(
            std::path::absolute(dir)
                .map_err(|e| Error::Input(format!("invalid data cache {}: {e}", dir.display())))?,
        ),
        None => None,
    };

    let mut samples = Vec::new();
    for (process, variations) in catalog {
        if process == DATA_PROCESS {
            continue;
        }
        for (variation, entry) in variations {
            let kept = match opts.max_files_per_sample {
                Some(n) => &entry.files[..n.min(entry.files.len())],
                None => &entry.files[..],
            };
            let mut paths = Vec::with_capacity(kept.len());
            for f in kept {
                let rest = f.path.strip_prefix(remote_prefix).ok_or_else(|| {
                    Error::Input(format!(
                        "{process}/{variation}: path '{}' does not start with '{remote_prefix}'",
                        f.path
                    ))
                })?;
                let located = match (&cache_root, &opts.remote_data_prefix) {
                    (Some(root), _) => cached_path(root, rest)?,
                    (None, Some(prefix)) => format!("{prefix}{rest}"),
                    (None, None) => f.path.clone(),
                };
                paths.push(located);
            }
            let total_events = kept.iter().map(|f| f.nevts).sum();
            log::debug!("{process}/{variation}: {} files, {total_events} events", paths.len());
            samples.push(Sample { paths, process: process.clone(), variation: variation.clone(), total_events });
        }
    }
    Ok(samples)
}

/// Location of a remote file inside the cache. The cache holds Parquet
/// conversions, so a `.root` name maps to its `.parquet` sibling.
fn cached_path(root: &Path, rest: &str) -> Result<String> {
    let mut p = root.join(rest.trim_start_matches('/'));
    if p.extension().is_some_and(|e| e == "root") {
        p.set_extension("parquet");
    }
    if !p.is_file() {
        return Err(Error::Input(format!("{} is missing from the data cache", p.display())));
    }
    Ok(p.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_REMOTE_PREFIX;

    fn catalog() -> Catalog {
        let text = format!(
            r#"{{
              "ttbar": {{
                "nominal": {{"files": [
                  {{"path": "{p}/nanoAOD/TT/a.root", "nevts": 100}},
                  {{"path": "{p}/nanoAOD/TT/b.root", "nevts": 50}}
                ]}},
                "ME_var": {{"files": [{{"path": "{p}/nanoAOD/TT_ME/c.root", "nevts": 10}}]}}
              }},
              "data": {{"nominal": {{"files": [{{"path": "{p}/data/d.root", "nevts": 7}}]}}}}
            }}"#,
            p = DEFAULT_REMOTE_PREFIX
        );
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn skips_data_and_sums_events() {
        let samples = resolve_samples(&catalog(), DEFAULT_REMOTE_PREFIX, &CatalogOptions::default()).unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.process == "ttbar"));
        let nominal = samples.iter().find(|s| s.is_nominal()).unwrap();
        assert_eq!(nominal.total_events, 150);
        assert_eq!(nominal.paths.len(), 2);
        assert_eq!(nominal.name(), "ttbar_nominal");
    }

    #[test]
    fn truncates_and_replaces_prefix() {
        let opts = CatalogOptions {
            max_files_per_sample: Some(1),
            remote_data_prefix: Some("root://eos.example//agc".into()),
            data_cache: None,
        };
        let samples = resolve_samples(&catalog(), DEFAULT_REMOTE_PREFIX, &opts).unwrap();
        let nominal = samples.iter().find(|s| s.is_nominal()).unwrap();
        assert_eq!(nominal.total_events, 100);
        assert_eq!(nominal.paths, vec!["root://eos.example//agc/nanoAOD/TT/a.root"]);
    }

    #[test]
    fn rejects_foreign_prefix_and_zero_files() {
        let mut c = catalog();
        c.get_mut("ttbar").unwrap().get_mut("nominal").unwrap().files[0].path = "/elsewhere/a.root".into();
        let err = resolve_samples(&c, DEFAULT_REMOTE_PREFIX, &CatalogOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Input(_)));

        let opts = CatalogOptions { max_files_per_sample: Some(0), ..Default::default() };
        assert!(matches!(resolve_samples(&catalog(), DEFAULT_REMOTE_PREFIX, &opts), Err(Error::Config(_))));
    }

    #[test]
    fn cache_maps_to_parquet_copies() {
        let dir = std::env::temp_dir().join(format!("agc_catalog_cache_{}", std::process::id()));
        let tt = dir.join("nanoAOD/TT");
        std::fs::create_dir_all(&tt).unwrap();
        std::fs::write(tt.join("a.parquet"), b"").unwrap();

        let opts = CatalogOptions { max_files_per_sample: Some(1), data_cache: Some(dir.clone()), ..Default::default() };
        let samples = resolve_samples(&catalog(), DEFAULT_REMOTE_PREFIX, &opts);
        // ME_var's file is not in the cache.
        assert!(matches!(samples, Err(Error::Input(ref m)) if m.contains("missing from the data cache")));

        std::fs::create_dir_all(dir.join("nanoAOD/TT_ME")).unwrap();
        std::fs::write(dir.join("nanoAOD/TT_ME/c.parquet"), b"").unwrap();
        let samples = resolve_samples(&catalog(), DEFAULT_REMOTE_PREFIX, &opts).unwrap();
        let nominal = samples.iter().find(|s| s.is_nominal()).unwrap();
        assert!(nominal.paths[0].ends_with("nanoAOD/TT/a.parquet"));
        assert!(Path::new(&nominal.paths[0]).is_absolute());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn malformed_catalog_is_an_input_error() {
        let dir = std::env::temp_dir().join(format!("agc_catalog_bad_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("ntuples.json");
        std::fs::write(&path, r#"{"ttbar": {"nominal": {"files": [{"path": 3}]}}}"#).unwrap();
        assert!(matches!(read_catalog(&path), Err(Error::Input(_))));
        assert!(matches!(read_catalog(&dir.join("absent.json")), Err(Error::Input(_))));
    }
}
