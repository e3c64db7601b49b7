// 🌐 Snapshot Sources - the eCFR admin API or a saved document on disk
//
// Blocking reqwest client (no Tokio runtime required). A fetch is one attempt;
// any failure surfaces as `SourceError` before the store is touched.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;

use crate::error::SourceError;

pub const DEFAULT_SOURCE_URL: &str = "https://www.ecfr.gov/api/admin/v1/agencies.json";

/// Anything that can hand over one snapshot document.
pub trait SnapshotSource {
    /// Human-readable origin for logs
    fn describe(&self) -> String;

    fn fetch(&self) -> Result<Value, SourceError>;
}

/// eCFR admin API (or any URL serving the same document).
#[derive(Clone)]
pub struct HttpSource {
    http: reqwest::blocking::Client,
    url: String,
}

impl HttpSource {
    pub fn new(url: impl Into<String>) -> Result<Self, SourceError> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(format!("ecfr-ingest/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| SourceError::Network(e.to_string()))?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

impl SnapshotSource for HttpSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn fetch(&self) -> Result<Value, SourceError> {
        let response = self
            .http
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .map_err(|e| SourceError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(SourceError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .map_err(|e| SourceError::Parse(e.to_string()))
    }
}

/// A snapshot saved on disk (e.g. a previous download of agencies.json).
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SnapshotSource for FileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn fetch(&self) -> Result<Value, SourceError> {
        let bytes = std::fs::read(&self.path).map_err(|source| SourceError::Io {
            path: self.path.display().to_string(),
            source,
        })?;

        serde_json::from_slice(&bytes).map_err(|e| SourceError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_file_source_reads_document_in_key_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"agencies":[{{"slug":"a","name":"Alpha"}}]}}"#).unwrap();

        let document = FileSource::new(file.path()).fetch().unwrap();
        let first = &document["agencies"][0];
        let keys: Vec<&String> = first.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["slug", "name"]);
    }

    #[test]
    fn test_file_source_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileSource::new(dir.path().join("absent.json")).fetch().unwrap_err();
        assert!(matches!(err, SourceError::Io { .. }));
    }

    #[test]
    fn test_file_source_invalid_json_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ agencies: ").unwrap();
        assert!(matches!(
            FileSource::new(file.path()).fetch(),
            Err(SourceError::Parse(_))
        ));
    }

    #[test]
    fn test_http_source_unreachable_host_is_network_error() {
        // Port 9 on localhost: nothing listens, connection is refused immediately
        let source = HttpSource::new("http://127.0.0.1:9/agencies.json").unwrap();
        assert_eq!(source.describe(), "http://127.0.0.1:9/agencies.json");
        assert!(matches!(source.fetch(), Err(SourceError::Network(_))));
    }
}
