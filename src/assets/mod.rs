//! Shared, append-only store of localized page assets.

use std::{
    io,
    path::{Path, PathBuf},
};

use dashmap::{DashMap, mapref::entry::Entry};
use percent_encoding::percent_decode_str;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use crate::{
    archive::atomic::{WriteOutcome, write_new},
    extractor::model::Asset,
    fetcher::{FetchError, Fetcher},
    pages::PageId,
};

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("download failed: {0}")]
    Download(#[from] FetchError),

    #[error("io error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Localized assets live under `<archive>/<dir_name>/page<id>_<name>`.
///
/// Names are claimed through a concurrent map, so two sources never share a
/// name within a run; a second source wanting a taken name gets a name
/// prefixed with a digest of its URL.
#[derive(Debug)]
pub struct AssetStore {
    root: PathBuf,
    dir_name: String,
    /// local name → source URL
    claims: DashMap<String, Url>,
    /// (page, source URL) → local name
    known: DashMap<(PageId, Url), String>,
}

impl AssetStore {
    pub fn new(archive_root: impl AsRef<Path>, dir_name: impl Into<String>) -> Self {
        let dir_name = dir_name.into();
        Self {
            root: archive_root.as_ref().join(&dir_name),
            dir_name,
            claims: DashMap::new(),
            known: DashMap::new(),
        }
    }

    /// Downloads `source` for `page` unless it is already stored.
    #[instrument(skip(self, fetcher, referer), fields(page = %page))]
    pub async fn localize(
        &self,
        fetcher: &Fetcher,
        source: &Url,
        page: PageId,
        referer: &Url,
    ) -> Result<Asset, AssetError> {
        if let Some(name) = self.known.get(&(page, source.clone())) {
            return Ok(self.asset(source, name.clone()));
        }

        // Reuse a file left by an earlier run without downloading again.
        if let Some(base) = file_name_from_url(source).filter(|b| has_extension(b)) {
            let name = self.claim(source, page, &base);
            if self.root.join(&name).is_file() {
                debug!("Reusing stored asset {}", name);
                self.known.insert((page, source.clone()), name.clone());
                return Ok(self.asset(source, name));
            }
        }

        let response = fetcher.fetch_asset(source, referer).await?;

        let mut base = file_name_from_url(source).unwrap_or_else(|| "image".to_string());
        if !has_extension(&base)
            && let Some(ext) = response.content_type.as_deref().and_then(extension_for)
        {
            base.push_str(ext);
        }

        let name = self.claim(source, page, &base);
        let path = self.root.join(&name);
        let body = response.body;

        let write_path = path.clone();
        let outcome = tokio::task::spawn_blocking(move || write_new(&write_path, &body))
            .await
            .map_err(|e| AssetError::Io {
                path: path.clone(),
                source: io::Error::other(e),
            })?
            .map_err(|source| AssetError::Io {
                path: path.clone(),
                source,
            })?;

        match outcome {
            WriteOutcome::Written => debug!("Downloaded image {}", name),
            WriteOutcome::AlreadyExists => debug!("Image {} already stored", name),
        }

        self.known.insert((page, source.clone()), name.clone());
        Ok(self.asset(source, name))
    }

    /// Reserves the deterministic local name for `source` on `page`.
    pub fn claim(&self, source: &Url, page: PageId, base: &str) -> String {
        let preferred = format!("page{}_{}", page, base);
        match self.claims.entry(preferred.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(source.clone());
                return preferred;
            }
            Entry::Occupied(slot) if slot.get() == source => return preferred,
            Entry::Occupied(_) => {}
        }

        let digest = format!("{:x}", md5::compute(source.as_str().as_bytes()));
        let fallback = format!("page{}_{}_{}", page, &digest[..8], base);
        self.claims.insert(fallback.clone(), source.clone());
        fallback
    }

    fn asset(&self, source: &Url, local_name: String) -> Asset {
        Asset {
            source_url: source.clone(),
            local_path: format!("{}/{}", self.dir_name, local_name),
            local_name,
        }
    }
}

/// Last path segment, percent-decoded and stripped of characters that are
/// unsafe in file names.
pub fn file_name_from_url(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let decoded = percent_decode_str(segment).decode_utf8_lossy();
    let cleaned: String = decoded
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') && !c.is_control())
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}

fn has_extension(name: &str) -> bool {
    name.contains('.')
}

pub fn extension_for(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next()?.trim().to_ascii_lowercase();
    match mime.as_str() {
        "image/jpeg" | "image/jpg" => Some(".jpg"),
        "image/png" => Some(".png"),
        "image/gif" => Some(".gif"),
        "image/webp" => Some(".webp"),
        "image/svg+xml" => Some(".svg"),
        _ => None,
    }
}
