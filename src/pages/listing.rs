use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::pages::{PageId, PageList};

static LINK_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// Builds the regex matching page links, e.g. `/yuyuz/pages/(\d+)\.html`
/// for base `https://w.atwiki.jp/yuyuz` and template `pages/{id}.html`.
pub fn page_link_pattern(base_url: &Url, page_path: &str) -> Result<Regex, regex::Error> {
    let base_path = base_url.path().trim_end_matches('/');
    let template = format!("{}/{}", base_path, page_path.trim_start_matches('/'));
    let pattern = template
        .split("{id}")
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"(\d+)");
    Regex::new(&pattern)
}

/// Scans a list page for links to wiki pages.
///
/// Links with empty text are ignored; a later link to the same page replaces
/// the title of an earlier one.
pub fn parse_page_list(html: &str, pattern: &Regex) -> PageList {
    let document = Html::parse_document(html);
    let mut pages = PageList::new();

    for link in document.select(&LINK_SELECTOR) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let Some(id) = pattern
            .captures(href)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
        else {
            continue;
        };

        let title = link.text().collect::<Vec<_>>().join(" ");
        let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
        if !title.is_empty() {
            pages.insert(PageId(id), title);
        }
    }

    pages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern() -> Regex {
        let base = Url::parse("https://w.atwiki.jp/yuyuz").unwrap();
        page_link_pattern(&base, "pages/{id}.html").unwrap()
    }

    #[test]
    fn builds_escaped_pattern() {
        assert_eq!(pattern().as_str(), r"/yuyuz/pages/(\d+)\.html");
    }

    #[test]
    fn collects_pages_in_id_order() {
        let html = r#"
            <ul>
              <li><a href="/yuyuz/pages/57.html">モーションフレーム</a></li>
              <li><a href="//w.atwiki.jp/yuyuz/pages/24.html"> 幽助 </a></li>
              <li><a href="https://w.atwiki.jp/yuyuz/pages/3.html">Top</a></li>
            </ul>"#;

        let pages = parse_page_list(html, &pattern());
        let ids: Vec<u32> = pages.keys().map(|id| id.get()).collect();
        assert_eq!(ids, vec![3, 24, 57]);
        assert_eq!(pages[&PageId(24)], "幽助");
        assert_eq!(pages[&PageId(57)], "モーションフレーム");
    }

    #[test]
    fn ignores_foreign_and_empty_links() {
        let html = r#"
            <a href="/otherwiki/pages/10.html">Other wiki</a>
            <a href="/yuyuz/list">List</a>
            <a href="/yuyuz/pages/11.html"><img src="x.png"></a>
            <a href="/yuyuz/pages/abc.html">Broken</a>"#;

        assert!(parse_page_list(html, &pattern()).is_empty());
    }

    #[test]
    fn later_duplicate_wins() {
        let html = r#"
            <a href="/yuyuz/pages/5.html">Old</a>
            <a href="/yuyuz/pages/5.html">New   Title</a>"#;

        let pages = parse_page_list(html, &pattern());
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[&PageId(5)], "New Title");
    }
}
