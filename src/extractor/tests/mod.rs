use std::{collections::HashMap, fs};

use url::Url;

use crate::config::{SiteProfile, TableLayout};
use crate::extractor::{ContentNode, Isolation, isolate, render};
use crate::pages::PageId;

fn fixture(name: &str) -> String {
    fs::read_to_string(format!("src/extractor/tests/fixtures/{name}"))
        .expect("Failed to read test fixture")
}

fn content(profile: &SiteProfile, html: &str) -> ContentNode {
    match isolate(html, &profile.isolation_rules().unwrap()).unwrap() {
        Isolation::Content(content) => content,
        Isolation::Deleted => panic!("fixture unexpectedly deleted"),
    }
}

fn resolved_html(profile: &SiteProfile, id: u32, html: &str) -> (ContentNode, String) {
    let content = content(profile, html);
    let page_url = profile.page_url(PageId(id)).unwrap();
    let html = profile
        .resolver()
        .rewrite(&content.html, &page_url, &HashMap::new());
    (content, html)
}

#[test]
fn test_motion_frames_sections() {
    let profile = SiteProfile::default();
    let (content, html) = resolved_html(&profile, 57, &fixture("motion_frames.html"));

    assert_eq!(content.matched.as_deref(), Some("#wikibody"));
    assert_eq!(content.title.as_deref(), Some("モーションフレーム"));

    let id = PageId(57);
    let rendered = render(
        &html,
        profile.table_page(id).map(|p| p.layout),
        &profile.table_options(id),
    )
    .unwrap();

    // only the character tables survive
    let labels: Vec<String> = rendered.tables.iter().map(|t| t.label.to_string()).collect();
    assert_eq!(labels, vec!["幽助", "桑原"]);
    assert!(rendered.missing.iter().any(|m| m == "蔵馬"));
    assert!(!rendered.missing.iter().any(|m| m == "幽助"));

    let md = &rendered.markdown;
    assert!(md.starts_with(
        "各キャラクターの準備移行フレームと発動フレームの一覧。\n\n## 幽助\n\n<table>\n<tr><th colspan=\"3\" style=\"text-align:center;\">分類</th>"
    ));
    assert!(md.contains(
        "<tr><td rowspan=\"2\" style=\"text-align:center;\"><b>パンチ</b></td><td>AX</td><td>地</td><td style=\"text-align:right;\">30</td><td>142</td></tr>"
    ));
    assert!(md.contains("## 桑原\n\n霊撃Bと次元刀、霊撃Yと霊撃力UPYは同じ\n\n<table>"));
    assert!(md.contains("<td rowspan=\"2\"><b>霊撃</b></td>"));
    // the foreign section after the last character is dropped
    assert!(!md.contains("備考"));
    assert!(!md.contains("出典"));
    assert!(!md.contains("広告"));
}

#[test]
fn test_character_page_inline() {
    let profile = SiteProfile::default();
    let (content, html) = resolved_html(&profile, 24, &fixture("character.html"));
    assert_eq!(content.title.as_deref(), Some("幽助"));
    assert_eq!(profile.table_page(PageId(24)).map(|p| p.layout), Some(TableLayout::Inline));

    let id = PageId(24);
    let rendered = render(&html, Some(TableLayout::Inline), &profile.table_options(id)).unwrap();
    let labels: Vec<String> = rendered.tables.iter().map(|t| t.label.to_string()).collect();
    assert_eq!(labels, vec!["バトルコマンド", "霊撃"]);

    let md = &rendered.markdown;
    assert!(md.contains("(https://w.atwiki.jp/yuyuz/pages/57.html)"));
    assert!(md.contains("(#id_2)"));
    assert!(md.contains("https://w.atwiki.jp/yuyuz/attach/24/3/yusuke.gif"));
    assert!(md.contains("<td>霊丸</td><td style=\"text-align:right;\">50</td>"));
    assert!(md.contains("<td rowspan=\"2\">霊撃A</td>"));
    assert!(!md.contains("JavaScript"));
    assert!(!md.contains("menu"));
    assert!(!md.contains("footer"));
}

#[test]
fn test_plain_page_keeps_only_merged_tables() {
    let profile = SiteProfile::default();
    let (_, html) = resolved_html(&profile, 24, &fixture("character.html"));

    let rendered = render(&html, None, &profile.table_options(PageId(1))).unwrap();
    assert!(rendered.tables.is_empty());
    assert!(!rendered.is_empty());

    let md = &rendered.markdown;
    assert!(md.contains("霊丸"));
    assert!(!md.contains("<td>霊丸</td>"));
    assert!(md.contains("<td rowspan=\"2\">霊撃A</td>"));
}

#[test]
fn test_deleted_page() {
    let profile = SiteProfile::default();
    let rules = profile.isolation_rules().unwrap();
    assert_eq!(
        isolate(&fixture("deleted.html"), &rules).unwrap(),
        Isolation::Deleted
    );
}

#[test]
fn test_blank_page_is_empty() {
    let profile = SiteProfile::default();
    let html = r#"<html><body><div id="wikibody"><div class="atwiki-ad">ad</div>
        <p> </p></div></body></html>"#;
    let (_, html) = resolved_html(&profile, 99, html);

    let rendered = render(&html, None, &profile.table_options(PageId(99))).unwrap();
    assert!(rendered.is_empty());
}

#[test]
fn test_page_url_joins_template() {
    let profile = SiteProfile {
        base_url: Url::parse("https://w.atwiki.jp/sfcyuhakutokubetsu/").unwrap(),
        ..SiteProfile::default()
    };
    assert_eq!(
        profile.page_url(PageId(38)).unwrap().as_str(),
        "https://w.atwiki.jp/sfcyuhakutokubetsu/pages/38.html"
    );
}
