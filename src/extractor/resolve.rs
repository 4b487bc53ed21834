use std::{borrow::Cow, collections::HashMap};

use scraper::{Html, Node};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::{
    assets::AssetStore,
    extractor::{
        dom::{self, Rewrite},
        model::{AssetFailure, ContentNode, ResolvedContent},
    },
    fetcher::Fetcher,
    pages::PageId,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageMode {
    /// Rewrite image sources like links.
    #[default]
    Absolutize,
    /// Download content images into the asset store.
    Localize,
}

/// Decides which images are page content worth localizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetClassifier {
    /// Substring every content asset URL must contain. Empty matches all.
    pub host_marker: String,
    /// Hosts that only serve attachments.
    pub asset_hosts: Vec<String>,
    /// Path fragments of the attachment namespace.
    pub path_markers: Vec<String>,
    /// Fragments of decorative or UI image URLs.
    pub deny_fragments: Vec<String>,
}

impl Default for AssetClassifier {
    fn default() -> Self {
        Self {
            host_marker: "atwiki".to_string(),
            asset_hosts: vec!["img.atwiki.jp".to_string()],
            path_markers: vec!["attach".to_string()],
            deny_fragments: [
                "atwiki_logo",
                "button",
                "recruit",
                "suggestion",
                "hatena",
                "counter",
                "fc2",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

impl AssetClassifier {
    pub fn is_content_asset(&self, src: &str, resolved: &Url) -> bool {
        if src.starts_with("data:") || resolved.scheme() == "data" {
            return false;
        }

        let url = resolved.as_str();
        if self
            .deny_fragments
            .iter()
            .any(|fragment| src.contains(fragment.as_str()) || url.contains(fragment.as_str()))
        {
            return false;
        }

        let host = resolved.host_str().unwrap_or_default();
        url.contains(self.host_marker.as_str())
            && (self.path_markers.iter().any(|m| resolved.path().contains(m.as_str()))
                || self.asset_hosts.iter().any(|h| h == host))
    }
}

/// Rewrites `/x` to `<origin>/x` and `//host/x` to `<scheme>://host/x`.
/// Fragments, absolute and document-relative references are left alone.
pub fn absolutize(reference: &str, origin: &Url) -> Option<String> {
    if reference.starts_with("//") {
        Some(format!("{}:{}", origin.scheme(), reference))
    } else if reference.starts_with('/') {
        Some(format!(
            "{}{}",
            origin.origin().ascii_serialization(),
            reference
        ))
    } else {
        None
    }
}

/// An image selected for localization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSource {
    /// The `src` attribute as written in the page.
    pub src: String,
    pub resolved: Url,
}

#[derive(Debug, Clone)]
pub struct ReferenceResolver {
    origin: Url,
    images: ImageMode,
    classifier: AssetClassifier,
}

impl ReferenceResolver {
    pub fn new(origin: Url, images: ImageMode, classifier: AssetClassifier) -> Self {
        Self {
            origin,
            images,
            classifier,
        }
    }

    /// Rewrites links and images of `content`, localizing content images
    /// when the resolver is in [`ImageMode::Localize`].
    ///
    /// A failed download leaves the image pointing at its remote URL.
    pub async fn resolve(
        &self,
        content: &ContentNode,
        page: PageId,
        page_url: &Url,
        store: &AssetStore,
        fetcher: &Fetcher,
    ) -> ResolvedContent {
        let mut resolved = ResolvedContent::default();
        let mut localized = HashMap::new();

        for image in self.plan(&content.html, page_url) {
            match store.localize(fetcher, &image.resolved, page, page_url).await {
                Ok(asset) => {
                    localized.insert(image.src, asset.local_path.clone());
                    if !resolved.assets.contains(&asset) {
                        resolved.assets.push(asset);
                    }
                }
                Err(e) => {
                    warn!("Failed to localize image {} for page {}: {}", image.resolved, page, e);
                    resolved.failures.push(AssetFailure {
                        source_url: image.resolved,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !resolved.assets.is_empty() {
            info!("Localized {} images for page {}", resolved.assets.len(), page);
        }

        resolved.html = self.rewrite(&content.html, page_url, &localized);
        resolved
    }

    /// Content images of `html` in document order, one entry per distinct
    /// `src`. Empty unless localizing.
    pub fn plan(&self, html: &str, page_url: &Url) -> Vec<ImageSource> {
        if self.images != ImageMode::Localize {
            return Vec::new();
        }

        let fragment = Html::parse_fragment(html);
        let mut images: Vec<ImageSource> = Vec::new();

        for node in fragment.tree.root().descendants() {
            let Node::Element(element) = node.value() else {
                continue;
            };
            if element.name() != "img" {
                continue;
            }
            let Some(src) = element.attr("src").map(str::trim).filter(|s| !s.is_empty()) else {
                continue;
            };
            if images.iter().any(|i| i.src == src) {
                continue;
            }
            let Some(resolved) = self.image_url(src, page_url) else {
                continue;
            };
            if self.classifier.is_content_asset(src, &resolved) {
                images.push(ImageSource {
                    src: src.to_string(),
                    resolved,
                });
            }
        }

        images
    }

    /// Serializes `html` with absolutized links and images; images found in
    /// `localized` point at their local path instead.
    pub fn rewrite(&self, html: &str, page_url: &Url, localized: &HashMap<String, String>) -> String {
        let fragment = Html::parse_fragment(html);
        let rewriter = References {
            resolver: self,
            page_url,
            localized,
        };
        dom::inner_html(*fragment.root_element(), &rewriter)
    }

    fn image_url(&self, src: &str, page_url: &Url) -> Option<Url> {
        match absolutize(src, &self.origin) {
            Some(absolute) => Url::parse(&absolute).ok(),
            None => page_url.join(src).ok(),
        }
    }
}

struct References<'a> {
    resolver: &'a ReferenceResolver,
    page_url: &'a Url,
    localized: &'a HashMap<String, String>,
}

impl Rewrite for References<'_> {
    fn attribute<'v>(&self, element: &str, name: &str, value: &'v str) -> Option<Cow<'v, str>> {
        let origin = &self.resolver.origin;
        let rewritten = match (element, name) {
            ("a", "href") => absolutize(value, origin),
            ("img", "src") => match self.localized.get(value.trim()) {
                Some(local) => Some(local.clone()),
                None if self.resolver.images == ImageMode::Localize
                    && !value.starts_with("data:") =>
                {
                    self.resolver
                        .image_url(value.trim(), self.page_url)
                        .map(String::from)
                }
                None => absolutize(value, origin),
            },
            _ => None,
        };
        Some(rewritten.map_or(Cow::Borrowed(value), Cow::Owned))
    }
}
