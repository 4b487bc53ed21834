#![allow(dead_code)]

use std::{collections::BTreeMap, path::Path, time::Duration};

use url::Url;
use wikisnap::{
    config::{Config, SiteProfile},
    fetcher::FetchSettings,
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

/// Profile pointing at a mock wiki under `/yuyuz` with no table pages.
pub fn profile(server: &MockServer) -> SiteProfile {
    SiteProfile {
        base_url: Url::parse(&format!("{}/yuyuz", server.uri())).unwrap(),
        table_pages: BTreeMap::new(),
        ..SiteProfile::default()
    }
}

pub fn config(output_dir: &Path, profile: SiteProfile) -> Config {
    Config::new(output_dir, profile).with_fetch_settings(FetchSettings {
        retry_delay: Duration::from_millis(10),
        request_interval: Duration::ZERO,
        timeout: Duration::from_secs(5),
        ..FetchSettings::default()
    })
}

pub fn html(body: impl Into<String>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.into().into_bytes(), "text/html; charset=utf-8")
}

/// A wiki page with the usual atwiki chrome around `content`.
pub fn wiki_page(title: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html><html><head><title>{title} - yuyuz @ wiki - atwiki（アットウィキ）</title></head>
<body>
<div id="header"><a href="/yuyuz/">yuyuz @ wiki</a></div>
<div id="wikibody">{content}</div>
<div id="footer">atwiki</div>
</body></html>"#
    )
}

pub async fn mount_list(server: &MockServer, pages: &[(u32, &str)]) {
    let links: String = pages
        .iter()
        .map(|(id, title)| format!(r#"<li><a href="/yuyuz/pages/{id}.html">{title}</a></li>"#))
        .collect();
    let body = wiki_page("ページ一覧", &format!("<ul>{links}</ul><a href=\"/other/pages/1.html\">x</a>"));

    Mock::given(method("GET"))
        .and(path("/yuyuz/list"))
        .respond_with(html(body))
        .mount(server)
        .await;
}

pub async fn mount_page(server: &MockServer, id: u32, body: String, expected_fetches: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/yuyuz/pages/{id}.html")))
        .respond_with(html(body))
        .expect(expected_fetches)
        .mount(server)
        .await;
}
