//! Per-page orchestration: fetch, isolate, resolve, render, persist.

pub mod failure;
pub mod runner;

use std::path::PathBuf;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

pub use failure::PageFailure;
pub use runner::{FailedPage, RunReport};

use crate::{
    archive::{Archive, ArchiveError, OutputUnit, Persisted},
    assets::AssetStore,
    config::{Config, ConfigError, SiteProfile},
    extractor::{
        self, Isolation, IsolationRules, ReferenceResolver,
        model::AssetFailure,
    },
    fetcher::{FetchError, Fetcher},
    pages::{PageId, PageList, parse_page_list},
};

/// Errors that stop a run before or instead of processing pages.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot build http client: {0}")]
    Client(FetchError),

    #[error("invalid list url: {0}")]
    ListUrl(#[from] url::ParseError),

    #[error("page list unavailable: {0}")]
    ListUnavailable(FetchError),

    #[error("no pages found")]
    NoPages,

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

#[derive(Debug)]
pub enum PageOutcome {
    Archived {
        path: PathBuf,
        tables: usize,
        assets: usize,
        asset_failures: Vec<AssetFailure>,
        /// Expected labels with no table on the page.
        missing_labels: Vec<String>,
    },
    /// A unit for the page already existed; nothing was fetched or written.
    AlreadyArchived(PathBuf),
}

/// Everything a run shares between pages. Read-only once built.
#[derive(Debug)]
pub struct Pipeline {
    profile: SiteProfile,
    rules: IsolationRules,
    resolver: ReferenceResolver,
    link_pattern: Regex,
    fetcher: Fetcher,
    archive: Archive,
    assets: AssetStore,
    concurrency: usize,
}

impl Pipeline {
    pub fn new(config: &Config) -> Result<Self, RunError> {
        let profile = config.profile().clone();
        profile.validate()?;

        let rules = profile.isolation_rules().map_err(ConfigError::from)?;
        let link_pattern = profile.link_pattern().map_err(ConfigError::from)?;
        let fetcher = Fetcher::new(config.fetch_settings().clone()).map_err(RunError::Client)?;

        Ok(Self {
            rules,
            resolver: profile.resolver(),
            link_pattern,
            fetcher,
            archive: Archive::from_profile(config.output_dir(), &profile),
            assets: AssetStore::new(config.output_dir(), profile.images_dir.as_str()),
            concurrency: config.concurrency().max(1),
            profile,
        })
    }

    /// Fetches and parses the wiki's page list. An unreachable or empty
    /// list is fatal to the run.
    #[instrument(skip_all)]
    pub async fn fetch_page_list(&self) -> Result<PageList, RunError> {
        let url = self.profile.list_url()?;
        info!("Fetching page list from {}", url);

        let page = self
            .fetcher
            .fetch_html(&url)
            .await
            .map_err(RunError::ListUnavailable)?;

        let pages = parse_page_list(&page.body_utf8, &self.link_pattern);
        if pages.is_empty() {
            return Err(RunError::NoPages);
        }

        info!("Found {} pages", pages.len());
        Ok(pages)
    }

    /// Converts one page into an output unit, unless it is already archived.
    #[instrument(skip_all, fields(id = %id, title = %title))]
    pub async fn convert_page(&self, id: PageId, title: &str) -> Result<PageOutcome, PageFailure> {
        if self.archive.is_archived(id, title) {
            info!("Page {} already archived, skipping", id);
            return Ok(PageOutcome::AlreadyArchived(self.archive.path_for(id, title)));
        }

        let url = self.profile.page_url(id).map_err(FetchError::from)?;
        let page = self.fetcher.fetch_html(&url).await?;
        debug!(
            "Fetched {} (status: {}, charset: {:?}, size: {} bytes)",
            page.url_final,
            page.status,
            page.charset,
            page.body_raw.len()
        );

        let content = match extractor::isolate(&page.body_utf8, &self.rules)? {
            Isolation::Content(content) => content,
            Isolation::Deleted => return Err(PageFailure::Deleted),
        };

        let resolved = self
            .resolver
            .resolve(&content, id, &page.url_final, &self.assets, &self.fetcher)
            .await;

        let layout = self.profile.table_page(id).map(|p| p.layout);
        let rendered = extractor::render(&resolved.html, layout, &self.profile.table_options(id))?;
        if rendered.is_empty() {
            return Err(PageFailure::Empty);
        }
        if !rendered.missing.is_empty() {
            warn!(
                "Page {} has no table for: {}",
                id,
                rendered.missing.join(", ")
            );
        }

        let tables = rendered.tables.len();
        let assets = resolved.assets.len();
        let unit = OutputUnit::assemble(id, title, url, rendered.markdown)?
            .with_page_title(content.title)
            .with_assets(resolved.assets)
            .with_fetched_at(page.fetched_at);

        match self.archive.persist(&unit).await? {
            Persisted::Written(path) => Ok(PageOutcome::Archived {
                path,
                tables,
                assets,
                asset_failures: resolved.failures,
                missing_labels: rendered.missing,
            }),
            Persisted::AlreadyPresent(path) => Ok(PageOutcome::AlreadyArchived(path)),
        }
    }
}
