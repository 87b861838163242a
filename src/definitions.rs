//! Restream definitions
//!
//! The configuration source: one JSON document per restream in a directory.
//!
//! ```json
//! {
//!   "id": "r1",
//!   "name": "Test",
//!   "endpoints": {
//!     "e1": { "name": "E1", "url": "flv://dest1:1935/live/key" }
//!   }
//! }
//! ```
//!
//! A document that cannot be read or decoded is reported and skipped; only an
//! unreadable directory fails the whole load.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors from loading restream definitions
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid restream id {id:?} in {path}")]
    InvalidId { path: PathBuf, id: String },
}

/// One configured destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDefinition {
    pub name: String,
    pub url: String,
}

/// One restream document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestreamDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub endpoints: BTreeMap<String, EndpointDefinition>,
}

impl RestreamDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            endpoints: BTreeMap::new(),
        }
    }

    /// Add an endpoint, builder style
    pub fn endpoint(mut self, id: &str, name: &str, url: &str) -> Self {
        self.endpoints.insert(
            id.to_string(),
            EndpointDefinition {
                name: name.to_string(),
                url: url.to_string(),
            },
        );
        self
    }

    /// Decode and validate a document read from `path`
    pub fn from_json(path: &Path, bytes: &[u8]) -> Result<Self, DefinitionError> {
        let definition: Self =
            serde_json::from_slice(bytes).map_err(|source| DefinitionError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        // The id addresses the restream as a single request path segment
        if definition.id.is_empty() || definition.id.contains(['/', '?', '#']) {
            return Err(DefinitionError::InvalidId {
                path: path.to_path_buf(),
                id: definition.id,
            });
        }

        Ok(definition)
    }
}

/// Result of one load pass
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Documents that decoded successfully
    pub definitions: Vec<RestreamDefinition>,
    /// Documents that were skipped
    pub errors: Vec<DefinitionError>,
}

/// Where restream definitions come from
#[async_trait]
pub trait DefinitionSource: Send + Sync {
    /// Read every definition; `Err` only when the source as a whole is unavailable
    async fn load(&self) -> Result<LoadReport, DefinitionError>;
}

/// A directory of `*.json` documents, read in file-name order
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl DefinitionSource for DirectorySource {
    async fn load(&self) -> Result<LoadReport, DefinitionError> {
        let read_err = |source| DefinitionError::Read {
            path: self.dir.clone(),
            source,
        };

        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(read_err)?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut report = LoadReport::default();
        for path in paths {
            let result = match tokio::fs::read(&path).await {
                Ok(bytes) => RestreamDefinition::from_json(&path, &bytes),
                Err(source) => {
                    // Directories named *.json and vanished files land here
                    Err(DefinitionError::Read { path, source })
                }
            };

            match result {
                Ok(definition) => report.definitions.push(definition),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping restream definition");
                    report.errors.push(e);
                }
            }
        }

        Ok(report)
    }
}

/// In-memory definitions that can be swapped between reloads
///
/// ```
/// use rtmp_restream::definitions::{DefinitionSource, RestreamDefinition, StaticDefinitions};
///
/// # tokio_test::block_on(async {
/// let source = StaticDefinitions::new(vec![
///     RestreamDefinition::new("r1", "Main").endpoint("e1", "Backup", "flv://10.0.0.2:1935/live"),
/// ]);
/// assert_eq!(source.load().await.unwrap().definitions[0].endpoints.len(), 1);
///
/// source.set(Vec::new()).await;
/// assert!(source.load().await.unwrap().definitions.is_empty());
/// # });
/// ```
#[derive(Debug, Default)]
pub struct StaticDefinitions {
    definitions: RwLock<Vec<RestreamDefinition>>,
}

impl StaticDefinitions {
    pub fn new(definitions: Vec<RestreamDefinition>) -> Self {
        Self {
            definitions: RwLock::new(definitions),
        }
    }

    /// Replace the definitions seen by the next load
    pub async fn set(&self, definitions: Vec<RestreamDefinition>) {
        *self.definitions.write().await = definitions;
    }
}

#[async_trait]
impl DefinitionSource for StaticDefinitions {
    async fn load(&self) -> Result<LoadReport, DefinitionError> {
        Ok(LoadReport {
            definitions: self.definitions.read().await.clone(),
            errors: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json() {
        let json = br#"{"id":"r1","name":"Test","endpoints":{"e1":{"name":"E1","url":"proto://dest1"}}}"#;
        let def = RestreamDefinition::from_json(Path::new("r1.json"), json).unwrap();

        assert_eq!(def, RestreamDefinition::new("r1", "Test").endpoint("e1", "E1", "proto://dest1"));
    }

    #[test]
    fn test_from_json_without_endpoints() {
        let def =
            RestreamDefinition::from_json(Path::new("r.json"), br#"{"id":"r2","name":"Bare"}"#)
                .unwrap();
        assert!(def.endpoints.is_empty());
    }

    #[test]
    fn test_from_json_rejects_bad_id() {
        let result =
            RestreamDefinition::from_json(Path::new("r.json"), br#"{"id":"a/b","name":"X"}"#);
        assert!(matches!(result, Err(DefinitionError::InvalidId { .. })));

        let result = RestreamDefinition::from_json(Path::new("r.json"), br#"{"id":"","name":"X"}"#);
        assert!(matches!(result, Err(DefinitionError::InvalidId { .. })));
    }

    #[tokio::test]
    async fn test_directory_skips_bad_documents() {
        let scratch = tempfile::tempdir().unwrap();
        let dir = scratch.path();
        std::fs::write(dir.join("b.json"), r#"{"id":"b","name":"B"}"#).unwrap();
        std::fs::write(dir.join("a.json"), r#"{"id":"a","name":"A"}"#).unwrap();
        std::fs::write(dir.join("broken.json"), "{ not json").unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let report = DirectorySource::new(dir).load().await.unwrap();
        let ids: Vec<&str> = report.definitions.iter().map(|d| d.id.as_str()).collect();

        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0], DefinitionError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_missing_directory_fails() {
        let scratch = tempfile::tempdir().unwrap();
        let source = DirectorySource::new(scratch.path().join("missing"));
        assert!(matches!(
            source.load().await,
            Err(DefinitionError::Read { .. })
        ));
    }

    #[tokio::test]
    async fn test_static_definitions() {
        let source = StaticDefinitions::new(vec![RestreamDefinition::new("r1", "One")]);
        assert_eq!(source.load().await.unwrap().definitions.len(), 1);

        source.set(Vec::new()).await;
        assert!(source.load().await.unwrap().definitions.is_empty());
    }
}
