//! Prometheus file based service discovery output.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use infoblox_discovery_common::{Category, Entity, SdTarget};

use crate::cache::DiscoveryCache;

/// Errors writing service discovery files.
#[derive(Error, Debug)]
pub enum SdFileError {
    #[error("Service discovery directory {0} does not exist")]
    MissingDirectory(PathBuf),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Writes one YAML file per (source, category).
pub struct SdFileWriter {
    directory: PathBuf,
}

impl SdFileWriter {
    /// Create a writer for an existing directory.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, SdFileError> {
        let directory = directory.into();
        if !directory.is_dir() {
            return Err(SdFileError::MissingDirectory(directory));
        }
        Ok(Self { directory })
    }

    /// Path of the file of a (source, category).
    pub fn file_path(&self, source: &str, category: Category) -> PathBuf {
        self.directory
            .join(format!("infoblox_{}_{}.yaml", source, category.as_str()))
    }

    /// Write the targets of a (source, category), replacing the file atomically.
    pub fn write(
        &self,
        source: &str,
        category: Category,
        entities: &[Entity],
    ) -> Result<PathBuf, SdFileError> {
        let path = self.file_path(source, category);
        let targets: Vec<SdTarget> = entities.iter().map(Entity::to_sd_target).collect();

        let yaml = serde_yaml::to_string(&targets).map_err(|source| SdFileError::Yaml {
            path: path.clone(),
            source,
        })?;
        write_atomic(&path, yaml.as_bytes()).map_err(|source| SdFileError::Io {
            path: path.clone(),
            source,
        })?;

        debug!(path = %path.display(), targets = targets.len(), "Service discovery file written");
        Ok(path)
    }

    /// Write every cached (source, category).
    pub fn write_all(&self, cache: &DiscoveryCache) -> Result<Vec<PathBuf>, SdFileError> {
        let mut written = Vec::new();
        for (source, lists) in cache.get_all() {
            for (category, entities) in lists {
                written.push(self.write(&source, category, &entities)?);
            }
        }

        info!(
            directory = %self.directory.display(),
            files = written.len(),
            "Service discovery files updated"
        );
        Ok(written)
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = fs::File::create(&tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)
}
