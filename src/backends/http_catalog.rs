//! Bulk catalog source backed by `ureq` for URLs and the filesystem for paths.

use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};

use log::debug;

use crate::backends::{CatalogFetch, CatalogSource, SourceMetadata};
use crate::error::{classify_ureq_failure, ArtError, Result};

/// Upper bound on a downloaded catalog body.
const MAX_CATALOG_BYTES: u64 = 512 * 1024 * 1024;
/// Upstream still generating its catalog.
const HTTP_ACCEPTED: u16 = 202;

fn is_remote_locator(locator: &str) -> bool {
    let lowered = locator.trim_start().to_ascii_lowercase();
    lowered.starts_with("http://") || lowered.starts_with("https://")
}

pub struct HttpCatalogSource {
    http_client: ureq::Agent,
}

impl Default for HttpCatalogSource {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpCatalogSource {
    pub fn new() -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(60))
            .timeout_write(Duration::from_secs(15))
            .build();
        Self { http_client }
    }

    fn metadata_from_response(response: &ureq::Response) -> SourceMetadata {
        SourceMetadata {
            last_modified: response
                .header("Last-Modified")
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
            content_length: response
                .header("Content-Length")
                .and_then(|value| value.trim().parse::<u64>().ok()),
        }
    }

    fn fetch_remote(&self, url: &str) -> Result<CatalogFetch> {
        let response = self
            .http_client
            .get(url)
            .call()
            .map_err(|err| classify_ureq_failure(&err, "catalog fetch"))?;
        if response.status() == HTTP_ACCEPTED {
            return Err(ArtError::SourceBusy(format!(
                "{url} answered HTTP {HTTP_ACCEPTED}"
            )));
        }
        let metadata = Self::metadata_from_response(&response);
        let mut body = String::new();
        response
            .into_reader()
            .take(MAX_CATALOG_BYTES)
            .read_to_string(&mut body)
            .map_err(|err| ArtError::Network(format!("catalog body read failed: {err}")))?;
        debug!("HttpCatalogSource: fetched {} bytes from {}", body.len(), url);
        Ok(CatalogFetch { body, metadata })
    }

    fn probe_remote(&self, url: &str) -> Result<SourceMetadata> {
        let response = self
            .http_client
            .head(url)
            .call()
            .map_err(|err| classify_ureq_failure(&err, "catalog probe"))?;
        Ok(Self::metadata_from_response(&response))
    }

    fn file_metadata(path: &Path) -> Result<SourceMetadata> {
        let metadata = fs::metadata(path).map_err(|err| {
            ArtError::SourceUnavailable(format!("{}: {err}", path.display()))
        })?;
        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
            .map(|since_epoch| since_epoch.as_secs().to_string());
        Ok(SourceMetadata {
            last_modified,
            content_length: Some(metadata.len()),
        })
    }

    fn fetch_file(path: &Path) -> Result<CatalogFetch> {
        let metadata = Self::file_metadata(path)?;
        let body = fs::read_to_string(path).map_err(|err| {
            ArtError::SourceUnavailable(format!("{}: {err}", path.display()))
        })?;
        Ok(CatalogFetch { body, metadata })
    }
}

impl CatalogSource for HttpCatalogSource {
    fn fetch(&self, locator: &str) -> Result<CatalogFetch> {
        if locator.trim().is_empty() {
            return Err(ArtError::InvalidInput("catalog locator is empty".to_string()));
        }
        if is_remote_locator(locator) {
            self.fetch_remote(locator.trim())
        } else {
            Self::fetch_file(Path::new(locator.trim()))
        }
    }

    fn probe(&self, locator: &str) -> Result<SourceMetadata> {
        if locator.trim().is_empty() {
            return Err(ArtError::InvalidInput("catalog locator is empty".to_string()));
        }
        if is_remote_locator(locator) {
            self.probe_remote(locator.trim())
        } else {
            Self::file_metadata(Path::new(locator.trim()))
        }
    }
}
