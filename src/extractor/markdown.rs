use std::{collections::HashMap, io, sync::LazyLock};

use ammonia::{Builder, UrlRelative};
use ego_tree::{NodeId, NodeRef};
use htmd::HtmlToMarkdown;
use regex::Regex;
use scraper::{Html, Node};
use thiserror::Error;

use crate::extractor::{
    dom::{self, Rewrite},
    model::{ReconstructedTable, Reconstruction, TableLabel},
    tables::{Placed, TableOptions, outermost_tables, place, read_rows},
};

static SANITIZER: LazyLock<Builder<'static>> = LazyLock::new(|| {
    let mut builder = Builder::default();
    builder.link_rel(None).url_relative(UrlRelative::PassThrough);
    builder
});

static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

// Letters and digits only, so the converter has nothing to escape.
const PLACEHOLDER: &str = "WIKISNAPTABLE";

#[derive(Error, Debug)]
#[error("markdown conversion failed: {0}")]
pub struct MarkdownError(#[from] io::Error);

/// Which tables are emitted as reconstructed raw markup instead of being
/// flattened by the converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawTables {
    /// Only tables with a merged cell.
    Merged,
    All,
}

/// Converts content HTML to Markdown.
pub fn convert(html: &str, raw: RawTables) -> Result<String, MarkdownError> {
    let (marked, tables) = mark_tables(html, raw);

    let sanitized = SANITIZER.clean(&marked).to_string();
    let converter = HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style"])
        .build();
    let mut markdown = converter.convert(&sanitized)?;

    // Highest index first so "…TABLE1" never matches inside "…TABLE12".
    for (index, table) in tables.iter().enumerate().rev() {
        markdown = markdown.replace(&placeholder(index), table);
    }

    Ok(tidy(&markdown))
}

/// Lays out a table-centric page as one `## <label>` section per kept table.
///
/// Text before the first section is kept as a preamble. A section holds the
/// text between its heading and its table, the table as raw markup, then
/// whatever follows up to the next section. With `restrict_to_expected` that
/// trailing text stops at the next heading, since it opens a dropped section.
pub fn sections(
    html: &str,
    options: &TableOptions,
) -> Result<(String, Reconstruction), MarkdownError> {
    let fragment = Html::parse_fragment(html);
    let root = *fragment.root_element();
    let (placed, missing) = place(root, options);

    let spans = spans(root);
    let span = |id: NodeId| spans.get(&id).copied().unwrap_or_default();
    let starts = |p: &Placed| span(p.heading.unwrap_or(p.node)).0;
    let headings: Vec<usize> = root
        .descendants()
        .filter(|node| is_named(*node, dom::is_heading))
        .filter(|node| !node.ancestors().any(|a| is_named(a, |name| name == "table")))
        .map(|node| span(node.id()).0)
        .collect();

    let excerpt = |after: usize, before: usize| -> Result<String, MarkdownError> {
        if after >= before {
            return Ok(String::new());
        }
        let keep = Excerpt {
            spans: &spans,
            after,
            before,
        };
        convert(&dom::inner_html(root, &keep), RawTables::Merged)
    };

    let mut out = String::new();
    let first = placed.first().map_or(usize::MAX, starts);
    push_block(&mut out, &excerpt(0, first)?);

    for (index, section) in placed.iter().enumerate() {
        push_block(&mut out, &format!("## {}", section.table.label));
        if let Some(heading) = section.heading {
            push_block(&mut out, &excerpt(span(heading).1, span(section.node).0)?);
        }
        push_block(&mut out, &section.table.to_html());

        let after = span(section.node).1;
        let mut before = placed.get(index + 1).map_or(usize::MAX, starts);
        if options.restrict_to_expected
            && let Some(&next) = headings.iter().find(|&&h| h > after)
        {
            before = before.min(next);
        }
        push_block(&mut out, &excerpt(after, before)?);
    }

    let reconstruction = Reconstruction {
        tables: placed.into_iter().map(|p| p.table).collect(),
        missing,
    };
    Ok((tidy(&out), reconstruction))
}

fn is_named(node: NodeRef<'_, Node>, test: impl Fn(&str) -> bool) -> bool {
    node.value().as_element().is_some_and(|e| test(e.name()))
}

fn push_block(out: &mut String, block: &str) {
    if !block.is_empty() {
        out.push_str(block);
        out.push_str("\n\n");
    }
}

/// Pre-order position of every node below `root` and of its last descendant.
fn spans(root: NodeRef<'_, Node>) -> HashMap<NodeId, (usize, usize)> {
    root.descendants()
        .enumerate()
        .map(|(position, node)| {
            let size = node.descendants().count();
            (node.id(), (position, position + size - 1))
        })
        .collect()
}

/// Keeps only what lies strictly between two pre-order positions; ancestors
/// of the boundary nodes survive as bare wrappers.
struct Excerpt<'a> {
    spans: &'a HashMap<NodeId, (usize, usize)>,
    after: usize,
    before: usize,
}

impl Rewrite for Excerpt<'_> {
    fn skip(&self, node: NodeRef<'_, Node>) -> bool {
        self.spans
            .get(&node.id())
            .is_some_and(|&(start, end)| start >= self.before || end <= self.after)
    }
}

fn tidy(markdown: &str) -> String {
    BLANK_RUNS.replace_all(markdown, "\n\n").trim().to_string()
}

fn placeholder(index: usize) -> String {
    format!("{PLACEHOLDER}{index}")
}

/// Serializes `html` with each selected table replaced by a placeholder
/// paragraph; returns the markup and the raw tables in placeholder order.
fn mark_tables(html: &str, raw: RawTables) -> (String, Vec<String>) {
    let fragment = Html::parse_fragment(html);
    let root = *fragment.root_element();

    let mut marks = HashMap::new();
    let mut tables = Vec::new();
    for (position, node) in outermost_tables(root).into_iter().enumerate() {
        let table = ReconstructedTable {
            label: TableLabel::Synthetic(position + 1),
            rows: read_rows(node),
        };
        if raw == RawTables::All || table.has_merged_cells() {
            marks.insert(node.id(), tables.len());
            tables.push(table.to_html());
        }
    }

    let marked = dom::inner_html(root, &Placeholders { marks: &marks });
    (marked, tables)
}

struct Placeholders<'a> {
    marks: &'a HashMap<NodeId, usize>,
}

impl Rewrite for Placeholders<'_> {
    fn replace(&self, node: NodeRef<'_, Node>) -> Option<String> {
        self.marks
            .get(&node.id())
            .map(|index| format!("<p>{}</p>", placeholder(*index)))
    }
}
