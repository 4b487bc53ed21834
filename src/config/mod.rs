//! Configuration handling for a snapshot run.
//!
//! Run-level tunables come from environment variables with development
//! defaults (`Config::from_env`). Everything describing the wiki itself lives
//! in a [`SiteProfile`], which defaults to the yuyuz atwiki and can be
//! replaced by a JSON file named in `WIKISNAP_PROFILE`.

use std::{
    collections::BTreeMap,
    env, fs, io,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{
    extractor::{
        isolate::{InvalidSelector, IsolationRules},
        resolve::{AssetClassifier, ImageMode, ReferenceResolver},
        tables::TableOptions,
    },
    fetcher::FetchSettings,
    pages::{PageId, page_link_pattern},
};

/// Environment variable names.
pub const ENV_OUTPUT_DIR: &str = "WIKISNAP_OUTPUT_DIR";
pub const ENV_BASE_URL: &str = "WIKISNAP_BASE_URL";
pub const ENV_PROFILE: &str = "WIKISNAP_PROFILE";
pub const ENV_IMAGE_MODE: &str = "WIKISNAP_IMAGE_MODE";
pub const ENV_CONCURRENCY: &str = "WIKISNAP_CONCURRENCY";
pub const ENV_REQUEST_INTERVAL_MS: &str = "WIKISNAP_REQUEST_INTERVAL_MS";
pub const ENV_MAX_ATTEMPTS: &str = "WIKISNAP_MAX_ATTEMPTS";
pub const ENV_RETRY_DELAY_MS: &str = "WIKISNAP_RETRY_DELAY_MS";
pub const ENV_TIMEOUT_SECS: &str = "WIKISNAP_TIMEOUT_SECS";

const DEFAULT_OUTPUT_DIR: &str = "wiki_md";
const DEFAULT_BASE_URL: &str = "https://w.atwiki.jp/yuyuz";
const DEFAULT_CONCURRENCY: usize = 1;

const DELETED_SENTINEL: &str = "指定されたページ番号は存在しません";

const REMOVE_SELECTORS: &[&str] = &[
    "#header",
    "#footer",
    "#wikibody > .menu",
    "#wikibody > .side",
    "#rightmenu",
    "#leftmenu",
    ".navbar",
    ".topicpath",
    "#menubar",
    "#toolbar",
    ".atwiki-ad",
    "script",
    "style",
    "noscript",
    "#wikitop",
    "#wikibottom",
    ".page_navi",
];

const CONTENT_SELECTORS: &[&str] = &["#wikibody", "#content", ".wiki-content", "article", "main"];

const CHARACTERS: &[&str] = &[
    "幽助", "桑原", "蔵馬", "妖狐蔵馬", "飛影", "幻海", "幻海(若)", "鈴駒", "凍矢", "陣",
    "死々若丸", "鴉", "武威", "戸愚呂兄", "戸愚呂弟", "100%", "神谷", "刃霧", "樹", "仙水",
];

const MOTION_FRAMES_PAGE: u32 = 57;
const CHARACTER_PAGE: u32 = 24;
const CHARACTER_PAGE_RANGE: std::ops::RangeInclusive<u32> = 30..=48;

/// Errors that can occur while building a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("cannot read profile {path}: {source}")]
    ProfileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse profile {path}: {source}")]
    ProfileParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Selector(#[from] InvalidSelector),

    #[error("invalid page link pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// How a table-centric page is rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableLayout {
    /// Prose with every table replaced by its reconstruction.
    #[default]
    Inline,
    /// Only the reconstructed tables, each under `## <label>`.
    Sections,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TablePage {
    pub expected_labels: Vec<String>,
    pub restrict_to_expected: bool,
    pub layout: TableLayout,
}

/// Parameters describing one wiki instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteProfile {
    pub base_url: Url,
    /// List page, relative to `base_url`.
    pub list_path: String,
    /// Page template relative to `base_url`; must contain `{id}`.
    pub page_path: String,
    pub deleted_sentinel: String,
    pub remove_selectors: Vec<String>,
    pub content_selectors: Vec<String>,
    pub images: ImageMode,
    pub classifier: AssetClassifier,
    pub images_dir: String,
    pub id_width: usize,
    pub max_title_len: usize,
    pub label_search_depth: usize,
    /// Table-centric pages keyed by page identifier.
    pub table_pages: BTreeMap<u32, TablePage>,
}

impl Default for SiteProfile {
    fn default() -> Self {
        let characters: Vec<String> = CHARACTERS.iter().map(|c| c.to_string()).collect();

        let mut table_pages = BTreeMap::new();
        table_pages.insert(
            MOTION_FRAMES_PAGE,
            TablePage {
                expected_labels: characters,
                restrict_to_expected: true,
                layout: TableLayout::Sections,
            },
        );
        for page in std::iter::once(CHARACTER_PAGE).chain(CHARACTER_PAGE_RANGE) {
            table_pages.insert(page, TablePage::default());
        }

        Self {
            base_url: default_base_url(),
            list_path: "list".to_string(),
            page_path: "pages/{id}.html".to_string(),
            deleted_sentinel: DELETED_SENTINEL.to_string(),
            remove_selectors: REMOVE_SELECTORS.iter().map(|s| s.to_string()).collect(),
            content_selectors: CONTENT_SELECTORS.iter().map(|s| s.to_string()).collect(),
            images: ImageMode::default(),
            classifier: AssetClassifier::default(),
            images_dir: "images".to_string(),
            id_width: 3,
            max_title_len: 50,
            label_search_depth: 12,
            table_pages,
        }
    }
}

fn default_base_url() -> Url {
    // compile-time constant
    Url::parse(DEFAULT_BASE_URL).unwrap()
}

impl SiteProfile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::ProfileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let profile: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::ProfileParse {
            path: path.to_path_buf(),
            source,
        })?;
        profile.validate()?;
        Ok(profile)
    }

    /// Checks the values serde cannot: templates and selectors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.page_path.contains("{id}") {
            return Err(ConfigError::InvalidValue {
                field: "page_path",
                reason: format!("{:?} has no {{id}} placeholder", self.page_path),
            });
        }
        if self.images_dir.trim().is_empty() || self.images_dir.contains(['/', '\\']) {
            return Err(ConfigError::InvalidValue {
                field: "images_dir",
                reason: format!("{:?} is not a plain directory name", self.images_dir),
            });
        }
        if self.max_title_len == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_title_len",
                reason: "must be positive".to_string(),
            });
        }
        self.isolation_rules()?;
        self.link_pattern()?;
        Ok(())
    }

    pub fn isolation_rules(&self) -> Result<IsolationRules, InvalidSelector> {
        IsolationRules::compile(
            self.deleted_sentinel.as_str(),
            &self.remove_selectors,
            &self.content_selectors,
        )
    }

    pub fn link_pattern(&self) -> Result<Regex, regex::Error> {
        page_link_pattern(&self.base_url, &self.page_path)
    }

    pub fn list_url(&self) -> Result<Url, url::ParseError> {
        self.join(&self.list_path)
    }

    pub fn page_url(&self, id: PageId) -> Result<Url, url::ParseError> {
        self.join(&self.page_path.replace("{id}", &id.to_string()))
    }

    pub fn resolver(&self) -> ReferenceResolver {
        ReferenceResolver::new(self.base_url.clone(), self.images, self.classifier.clone())
    }

    pub fn table_page(&self, id: PageId) -> Option<&TablePage> {
        self.table_pages.get(&id.get())
    }

    /// Reconstruction options for a page; plain pages get an empty vocabulary.
    pub fn table_options(&self, id: PageId) -> TableOptions {
        let page = self.table_page(id);
        TableOptions {
            expected_labels: page.map(|p| p.expected_labels.clone()).unwrap_or_default(),
            restrict_to_expected: page.is_some_and(|p| p.restrict_to_expected),
            search_depth: self.label_search_depth,
        }
    }

    // `Url::join` drops the last segment unless the base ends with '/'.
    fn join(&self, relative: &str) -> Result<Url, url::ParseError> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(relative.trim_start_matches('/'))
    }
}

/// Runtime configuration for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    output_dir: PathBuf,
    profile: SiteProfile,
    fetch: FetchSettings,
    concurrency: usize,
}

impl Config {
    /// Create a new config explicitly, with default network settings.
    pub fn new(output_dir: impl Into<PathBuf>, profile: SiteProfile) -> Self {
        Self {
            output_dir: output_dir.into(),
            profile,
            fetch: FetchSettings::default(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_fetch_settings(mut self, fetch: FetchSettings) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Load from environment variables, falling back to development defaults.
    ///
    /// The profile file is applied first; `WIKISNAP_BASE_URL` and
    /// `WIKISNAP_IMAGE_MODE` override the corresponding profile fields.
    pub fn from_env() -> Result<Self, ConfigError> {
        let output_dir = env::var(ENV_OUTPUT_DIR).unwrap_or_else(|_| DEFAULT_OUTPUT_DIR.to_string());

        let mut profile = match env::var(ENV_PROFILE) {
            Ok(path) if !path.trim().is_empty() => SiteProfile::load(path.trim())?,
            _ => SiteProfile::default(),
        };

        if let Ok(raw) = env::var(ENV_BASE_URL) {
            profile.base_url = Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidValue {
                field: ENV_BASE_URL,
                reason: e.to_string(),
            })?;
        }
        if let Ok(raw) = env::var(ENV_IMAGE_MODE) {
            profile.images = match raw.trim().to_ascii_lowercase().as_str() {
                "absolutize" => ImageMode::Absolutize,
                "localize" => ImageMode::Localize,
                other => {
                    return Err(ConfigError::InvalidValue {
                        field: ENV_IMAGE_MODE,
                        reason: format!("expected 'absolutize' or 'localize', got {other:?}"),
                    });
                }
            };
        }
        profile.validate()?;

        let defaults = FetchSettings::default();
        let fetch = FetchSettings {
            request_interval: parse_env::<u64>(ENV_REQUEST_INTERVAL_MS)?
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_interval),
            max_attempts: parse_env::<u32>(ENV_MAX_ATTEMPTS)?
                .map(|n| positive(ENV_MAX_ATTEMPTS, n))
                .transpose()?
                .unwrap_or(defaults.max_attempts),
            retry_delay: parse_env::<u64>(ENV_RETRY_DELAY_MS)?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            timeout: parse_env::<u64>(ENV_TIMEOUT_SECS)?
                .map(|n| positive(ENV_TIMEOUT_SECS, n))
                .transpose()?
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            ..defaults
        };

        let concurrency = parse_env::<usize>(ENV_CONCURRENCY)?
            .map(|n| positive(ENV_CONCURRENCY, n))
            .transpose()?
            .unwrap_or(DEFAULT_CONCURRENCY);

        Ok(Self {
            output_dir: PathBuf::from(output_dir),
            profile,
            fetch,
            concurrency,
        })
    }

    /// Directory receiving the Markdown files and the images directory.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    pub fn fetch_settings(&self) -> &FetchSettings {
        &self.fetch
    }

    /// Pages processed at once.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }
}

fn parse_env<T>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                field: key,
                reason: format!("{raw:?}: {e}"),
            }),
        Err(_) => Ok(None),
    }
}

fn positive<T>(field: &'static str, value: T) -> Result<T, ConfigError>
where
    T: PartialOrd + Default + Copy,
{
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue {
            field,
            reason: "must be greater than zero".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::io::Write;
    use std::sync::Mutex;

    // Ensure environment-variable manipulating tests run serially.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            ENV_OUTPUT_DIR,
            ENV_BASE_URL,
            ENV_PROFILE,
            ENV_IMAGE_MODE,
            ENV_CONCURRENCY,
            ENV_REQUEST_INTERVAL_MS,
            ENV_MAX_ATTEMPTS,
            ENV_RETRY_DELAY_MS,
            ENV_TIMEOUT_SECS,
        ] {
            unsafe {
                env::remove_var(key);
            }
        }
    }

    #[test]
    fn defaults_when_env_missing() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.output_dir(), Path::new(DEFAULT_OUTPUT_DIR));
        assert_eq!(cfg.profile(), &SiteProfile::default());
        assert_eq!(cfg.fetch_settings(), &FetchSettings::default());
        assert_eq!(cfg.concurrency(), 1);
    }

    #[test]
    fn overrides_when_env_present() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var(ENV_OUTPUT_DIR, "/tmp/snap");
            env::set_var(ENV_BASE_URL, "https://w.atwiki.jp/sfcyuhakutokubetsu");
            env::set_var(ENV_IMAGE_MODE, "localize");
            env::set_var(ENV_CONCURRENCY, "4");
            env::set_var(ENV_REQUEST_INTERVAL_MS, "0");
            env::set_var(ENV_MAX_ATTEMPTS, "5");
            env::set_var(ENV_RETRY_DELAY_MS, "10");
            env::set_var(ENV_TIMEOUT_SECS, "3");
        }
        let cfg = Config::from_env().unwrap();
        clear_env();

        assert_eq!(cfg.output_dir(), Path::new("/tmp/snap"));
        assert_eq!(
            cfg.profile().base_url.as_str(),
            "https://w.atwiki.jp/sfcyuhakutokubetsu"
        );
        assert_eq!(cfg.profile().images, ImageMode::Localize);
        assert_eq!(cfg.concurrency(), 4);
        assert_eq!(cfg.fetch_settings().request_interval, Duration::ZERO);
        assert_eq!(cfg.fetch_settings().max_attempts, 5);
        assert_eq!(cfg.fetch_settings().retry_delay, Duration::from_millis(10));
        assert_eq!(cfg.fetch_settings().timeout, Duration::from_secs(3));
    }

    #[test]
    fn rejects_invalid_values() {
        let _guard = ENV_MUTEX.lock().unwrap();

        for (key, value) in [
            (ENV_CONCURRENCY, "many"),
            (ENV_CONCURRENCY, "0"),
            (ENV_MAX_ATTEMPTS, "-1"),
            (ENV_BASE_URL, "not a url"),
            (ENV_IMAGE_MODE, "inline"),
        ] {
            clear_env();
            unsafe {
                env::set_var(key, value);
            }
            let err = Config::from_env().unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { field, .. } if field == key),
                "{key}={value} gave {err:?}"
            );
        }
        clear_env();
    }

    #[test]
    fn loads_partial_profile_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "base_url": "https://w.atwiki.jp/sfcyuhakutokubetsu",
                "images": "localize",
                "table_pages": {{ "12": {{ "expected_labels": ["A"], "layout": "sections" }} }}
            }}"#
        )
        .unwrap();

        unsafe {
            env::set_var(ENV_PROFILE, file.path());
        }
        let cfg = Config::from_env().unwrap();
        clear_env();

        let profile = cfg.profile();
        assert_eq!(profile.images, ImageMode::Localize);
        assert_eq!(profile.content_selectors[0], "#wikibody");
        assert_eq!(profile.table_pages.len(), 1);
        assert_eq!(
            profile.table_page(PageId(12)).unwrap().layout,
            TableLayout::Sections
        );
    }

    #[test]
    fn profile_validation() {
        let profile = SiteProfile {
            page_path: "pages/index.html".to_string(),
            ..SiteProfile::default()
        };
        assert!(matches!(
            profile.validate(),
            Err(ConfigError::InvalidValue { field: "page_path", .. })
        ));

        let profile = SiteProfile {
            remove_selectors: vec!["div[".to_string()],
            ..SiteProfile::default()
        };
        assert!(matches!(profile.validate(), Err(ConfigError::Selector(_))));
    }

    #[test]
    fn builds_site_urls() {
        let profile = SiteProfile::default();
        assert_eq!(
            profile.list_url().unwrap().as_str(),
            "https://w.atwiki.jp/yuyuz/list"
        );
        assert_eq!(
            profile.page_url(PageId(57)).unwrap().as_str(),
            "https://w.atwiki.jp/yuyuz/pages/57.html"
        );
    }

    #[test]
    fn table_options_follow_page_settings() {
        let profile = SiteProfile::default();

        let frames = profile.table_options(PageId(57));
        assert!(frames.restrict_to_expected);
        assert!(frames.expected_labels.iter().any(|l| l == "幽助"));
        assert_eq!(frames.search_depth, 12);

        let plain = profile.table_options(PageId(1));
        assert!(plain.expected_labels.is_empty());
        assert!(!plain.restrict_to_expected);
    }
}
