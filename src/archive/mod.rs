//! Output units and their idempotent persistence.

pub mod atomic;

use std::{
    fmt::Write as _,
    io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
    archive::atomic::{WriteOutcome, write_new},
    config::SiteProfile,
    extractor::Asset,
    pages::PageId,
};

const UNTITLED: &str = "untitled";

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("page body is empty")]
    EmptyBody,

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persisted {
    Written(PathBuf),
    /// A unit for this page was already on disk and was left untouched.
    AlreadyPresent(PathBuf),
}

/// Metadata header plus Markdown body for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputUnit {
    pub id: PageId,
    /// Title from the page list; names the file.
    pub title: String,
    /// In-page title, recorded when it differs from `title`.
    pub page_title: Option<String>,
    pub source: Url,
    pub fetched_at: DateTime<Utc>,
    pub assets: Vec<Asset>,
    pub body: String,
}

impl OutputUnit {
    pub fn assemble(
        id: PageId,
        title: impl Into<String>,
        source: Url,
        body: impl Into<String>,
    ) -> Result<Self, ArchiveError> {
        let body = body.into();
        if body.trim().is_empty() {
            return Err(ArchiveError::EmptyBody);
        }

        Ok(Self {
            id,
            title: title.into(),
            page_title: None,
            source,
            fetched_at: Utc::now(),
            assets: Vec::new(),
            body,
        })
    }

    pub fn with_page_title(mut self, page_title: Option<String>) -> Self {
        self.page_title = page_title.filter(|t| *t != self.title);
        self
    }

    pub fn with_assets(mut self, assets: Vec<Asset>) -> Self {
        self.assets = assets;
        self
    }

    pub fn with_fetched_at(mut self, fetched_at: DateTime<Utc>) -> Self {
        self.fetched_at = fetched_at;
        self
    }

    /// `---` fenced header, a blank line, then the body.
    pub fn render(&self) -> String {
        let mut out = String::from("---\n");
        let _ = writeln!(out, "source: {}", quote(self.source.as_str()));
        let _ = writeln!(out, "id: {}", self.id);
        let _ = writeln!(out, "title: {}", quote(&self.title));
        if let Some(page_title) = &self.page_title {
            let _ = writeln!(out, "page_title: {}", quote(page_title));
        }
        let _ = writeln!(
            out,
            "fetched_at: {}",
            quote(&self.fetched_at.to_rfc3339_opts(SecondsFormat::Secs, true))
        );
        if !self.assets.is_empty() {
            out.push_str("images:\n");
            for asset in &self.assets {
                let _ = writeln!(out, "  - original: {}", quote(asset.source_url.as_str()));
                let _ = writeln!(out, "    local: {}", quote(&asset.local_path));
            }
        }
        out.push_str("---\n\n");
        out.push_str(self.body.trim_end());
        out.push('\n');
        out
    }
}

fn quote(value: &str) -> String {
    // JSON strings are valid double-quoted YAML scalars
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value.replace('"', "'")))
}

/// Removes characters unsafe in file names and cuts to `max_len` characters.
pub fn sanitize_title(title: &str, max_len: usize) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') && !c.is_control())
        .collect();
    let cut: String = cleaned.trim().chars().take(max_len).collect();
    let cut = cut.trim_end();
    if cut.is_empty() {
        UNTITLED.to_string()
    } else {
        cut.to_string()
    }
}

/// Directory of output units named `<id>-<title>.md`.
#[derive(Debug, Clone)]
pub struct Archive {
    root: PathBuf,
    id_width: usize,
    max_title_len: usize,
}

impl Archive {
    pub fn new(root: impl Into<PathBuf>, id_width: usize, max_title_len: usize) -> Self {
        Self {
            root: root.into(),
            id_width,
            max_title_len,
        }
    }

    pub fn from_profile(root: impl Into<PathBuf>, profile: &SiteProfile) -> Self {
        Self::new(root, profile.id_width, profile.max_title_len)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file_name(&self, id: PageId, title: &str) -> String {
        format!(
            "{:0width$}-{}.md",
            id.get(),
            sanitize_title(title, self.max_title_len),
            width = self.id_width
        )
    }

    pub fn path_for(&self, id: PageId, title: &str) -> PathBuf {
        self.root.join(self.file_name(id, title))
    }

    pub fn is_archived(&self, id: PageId, title: &str) -> bool {
        self.path_for(id, title).is_file()
    }

    pub async fn prepare(&self) -> Result<(), ArchiveError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| ArchiveError::Io {
                path: self.root.clone(),
                source,
            })
    }

    /// Writes `unit` unless a file for it already exists.
    pub async fn persist(&self, unit: &OutputUnit) -> Result<Persisted, ArchiveError> {
        let path = self.path_for(unit.id, &unit.title);
        let contents = unit.render();

        let target = path.clone();
        let outcome = tokio::task::spawn_blocking(move || write_new(&target, contents.as_bytes()))
            .await
            .map_err(|e| ArchiveError::Io {
                path: path.clone(),
                source: io::Error::other(e),
            })?
            .map_err(|source| ArchiveError::Io {
                path: path.clone(),
                source,
            })?;

        match outcome {
            WriteOutcome::Written => {
                info!("Archived page {} to {}", unit.id, path.display());
                Ok(Persisted::Written(path))
            }
            WriteOutcome::AlreadyExists => {
                debug!("Page {} already archived at {}", unit.id, path.display());
                Ok(Persisted::AlreadyPresent(path))
            }
        }
    }
}
