use std::{collections::HashSet, sync::LazyLock};

use ego_tree::{NodeId, NodeRef};
use regex::Regex;
use scraper::{Html, Node, Selector};
use thiserror::Error;
use tracing::debug;

use crate::extractor::{
    dom::{self, Rewrite},
    model::{ContentNode, Isolation},
};

static BODY_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").unwrap());
static TITLE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());

// "Page - yuyuz @ wiki - atwiki" → "Page"
static SITE_SUFFIX_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*-\s*[^-]*@\s*wiki.*$").unwrap());

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid selector {selector:?}: {reason}")]
pub struct InvalidSelector {
    pub selector: String,
    pub reason: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IsolateError {
    #[error("no content root found in an empty document")]
    NotFound,
}

/// Compiled selector lists for one site.
#[derive(Debug)]
pub struct IsolationRules {
    deleted_sentinel: String,
    remove: Vec<Selector>,
    candidates: Vec<(String, Selector)>,
}

impl IsolationRules {
    pub fn compile(
        deleted_sentinel: impl Into<String>,
        remove: &[String],
        candidates: &[String],
    ) -> Result<Self, InvalidSelector> {
        let remove = remove
            .iter()
            .map(|s| parse_selector(s))
            .collect::<Result<Vec<_>, _>>()?;
        let candidates = candidates
            .iter()
            .map(|s| parse_selector(s).map(|sel| (s.clone(), sel)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            deleted_sentinel: deleted_sentinel.into(),
            remove,
            candidates,
        })
    }
}

pub fn parse_selector(selector: &str) -> Result<Selector, InvalidSelector> {
    Selector::parse(selector).map_err(|e| InvalidSelector {
        selector: selector.to_string(),
        reason: format!("{e:?}"),
    })
}

/// Locates the content subtree of a wiki page.
///
/// Chrome regions matched by the removal selectors are dropped. The content
/// root is the first candidate selector with a match outside those regions,
/// then `<body>`, then the whole document.
pub fn isolate(raw_html: &str, rules: &IsolationRules) -> Result<Isolation, IsolateError> {
    if raw_html.trim().is_empty() {
        return Err(IsolateError::NotFound);
    }

    if !rules.deleted_sentinel.is_empty() && raw_html.contains(&rules.deleted_sentinel) {
        return Ok(Isolation::Deleted);
    }

    let document = Html::parse_document(raw_html);

    let removed: HashSet<NodeId> = rules
        .remove
        .iter()
        .flat_map(|selector| document.select(selector))
        .map(|element| element.id())
        .collect();
    let chrome = Chrome { removed: &removed };

    let candidate = rules.candidates.iter().find_map(|(source, selector)| {
        document
            .select(selector)
            .find(|element| !chrome.contains(**element))
            .map(|element| (*element, Some(source.clone())))
    });

    let (root, matched) = candidate
        .or_else(|| {
            document
                .select(&BODY_SELECTOR)
                .next()
                .map(|body| (*body, None))
        })
        .unwrap_or_else(|| (document.tree.root(), None));

    debug!(
        matched = matched.as_deref().unwrap_or("<fallback>"),
        removed = removed.len(),
        "content root selected"
    );

    Ok(Isolation::Content(ContentNode {
        html: dom::inner_html(root, &chrome),
        title: page_title(&document),
        matched,
    }))
}

fn page_title(document: &Html) -> Option<String> {
    let element = document.select(&TITLE_SELECTOR).next()?;
    let title = dom::text_of(element);
    let title = SITE_SUFFIX_REGEX.replace(&title, "").trim().to_string();
    (!title.is_empty()).then_some(title)
}

struct Chrome<'a> {
    removed: &'a HashSet<NodeId>,
}

impl Chrome<'_> {
    fn contains(&self, node: NodeRef<'_, Node>) -> bool {
        self.removed.contains(&node.id()) || node.ancestors().any(|a| self.removed.contains(&a.id()))
    }
}

impl Rewrite for Chrome<'_> {
    fn skip(&self, node: NodeRef<'_, Node>) -> bool {
        self.removed.contains(&node.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteProfile;

    fn rules() -> IsolationRules {
        SiteProfile::default().isolation_rules().unwrap()
    }

    fn content(html: &str) -> ContentNode {
        match isolate(html, &rules()).unwrap() {
            Isolation::Content(content) => content,
            Isolation::Deleted => panic!("unexpected Deleted"),
        }
    }

    #[test]
    fn sentinel_means_deleted() {
        let html = r#"<html><body><div id="wikibody"><p>指定されたページ番号は存在しません</p></div></body></html>"#;
        assert_eq!(isolate(html, &rules()).unwrap(), Isolation::Deleted);
    }

    #[test]
    fn specific_selector_wins() {
        let html = r#"<html><body>
            <div id="content"><p>generic</p>
              <div id="wikibody"><p>specific</p></div>
            </div>
            <article><p>article</p></article>
        </body></html>"#;

        let content = content(html);
        assert_eq!(content.matched.as_deref(), Some("#wikibody"));
        assert!(content.html.contains("specific"));
        assert!(!content.html.contains("generic"));
        assert!(!content.html.contains("article"));
    }

    #[test]
    fn removes_chrome_regions() {
        let html = r#"<html><body>
            <div id="wikibody">
              <div class="menu">menu links</div>
              <div class="topicpath">Top &gt; Page</div>
              <h2>Heading</h2>
              <script>track()</script>
              <p>Body text</p>
              <div class="atwiki-ad">buy</div>
            </div>
        </body></html>"#;

        let content = content(html);
        assert!(content.html.contains("<h2>Heading</h2>"));
        assert!(content.html.contains("Body text"));
        for gone in ["menu links", "Top", "track()", "buy"] {
            assert!(!content.html.contains(gone), "{gone} should be removed");
        }
    }

    #[test]
    fn candidate_inside_removed_region_is_ignored() {
        let html = r#"<html><body>
            <div id="header"><article>site banner</article></div>
            <main><p>real content</p></main>
        </body></html>"#;

        let content = content(html);
        assert_eq!(content.matched.as_deref(), Some("main"));
        assert!(content.html.contains("real content"));
        assert!(!content.html.contains("site banner"));
    }

    #[test]
    fn falls_back_to_body() {
        let html = "<html><body><div><p>loose text</p></div><div id=\"footer\">f</div></body></html>";
        let content = content(html);
        assert_eq!(content.matched, None);
        assert_eq!(content.html, "<div><p>loose text</p></div>");
    }

    #[test]
    fn empty_document_is_not_found() {
        assert_eq!(isolate("   \n", &rules()), Err(IsolateError::NotFound));
    }

    #[test]
    fn extracts_page_title_without_site_suffix() {
        let html = "<html><head><title>モーションフレーム - yuyuz @ wiki - atwiki（アットウィキ）</title></head>\
                    <body><div id=\"wikibody\">x</div></body></html>";
        assert_eq!(content(html).title.as_deref(), Some("モーションフレーム"));
    }

    #[test]
    fn keeps_title_dashes_without_site_marker() {
        let html = "<html><head><title>Kick - wiki notes - yuyuz @ wiki - atwiki</title></head>\
                    <body><div id=\"wikibody\">x</div></body></html>";
        assert_eq!(content(html).title.as_deref(), Some("Kick - wiki notes"));

        let html = "<html><head><title>Kick - wiki notes</title></head>\
                    <body><div id=\"wikibody\">x</div></body></html>";
        assert_eq!(content(html).title.as_deref(), Some("Kick - wiki notes"));
    }

    #[test]
    fn invalid_selector_is_reported() {
        let err = IsolationRules::compile("", &["div[".to_string()], &[]).unwrap_err();
        assert_eq!(err.selector, "div[");
    }
}
