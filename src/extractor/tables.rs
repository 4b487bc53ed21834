use std::{
    collections::{HashMap, HashSet},
    num::NonZeroU32,
    sync::LazyLock,
};

use ammonia::{Builder, UrlRelative};
use ego_tree::{NodeId, NodeRef};
use scraper::{ElementRef, Html, Node};
use tracing::{debug, warn};

use crate::extractor::{
    dom::{self, Verbatim},
    model::{Align, Cell, Reconstruction, ReconstructedTable, Row, TableLabel},
};

pub const DEFAULT_SEARCH_DEPTH: usize = 12;

// Phrasing and void elements; not charged against the label search.
const INLINE_ELEMENTS: &[&str] = &[
    "a", "abbr", "b", "big", "br", "code", "em", "font", "hr", "i", "img", "mark", "ruby", "s",
    "small", "span", "strike", "strong", "sub", "sup", "u", "wbr",
];

static CELL_SANITIZER: LazyLock<Builder<'static>> = LazyLock::new(|| {
    let tags: HashSet<&str> = [
        "br", "b", "strong", "i", "em", "u", "span", "sup", "sub", "a", "img", "table", "thead",
        "tbody", "tfoot", "tr", "td", "th",
    ]
    .into_iter()
    .collect();
    let spans: HashSet<&str> = ["rowspan", "colspan"].into_iter().collect();
    let tag_attributes: HashMap<&str, HashSet<&str>> = HashMap::from([
        ("a", ["href"].into_iter().collect()),
        ("img", ["src", "alt"].into_iter().collect()),
        ("td", spans.clone()),
        ("th", spans),
    ]);

    let mut builder = Builder::default();
    builder
        .tags(tags)
        .tag_attributes(tag_attributes)
        .generic_attributes(HashSet::new())
        .link_rel(None)
        .url_relative(UrlRelative::PassThrough);
    builder
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOptions {
    /// Headings every complete page is expected to carry a table for.
    pub expected_labels: Vec<String>,
    /// Drop tables labelled by a heading outside `expected_labels`.
    pub restrict_to_expected: bool,
    /// Block elements inspected before a table gets a synthetic label.
    pub search_depth: usize,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            expected_labels: Vec::new(),
            restrict_to_expected: false,
            search_depth: DEFAULT_SEARCH_DEPTH,
        }
    }
}

/// Rebuilds the outermost tables of a content fragment and labels each one
/// with the nearest preceding heading.
pub fn reconstruct(html: &str, options: &TableOptions) -> Reconstruction {
    let fragment = Html::parse_fragment(html);
    let (placed, missing) = place(*fragment.root_element(), options);

    Reconstruction {
        tables: placed.into_iter().map(|p| p.table).collect(),
        missing,
    }
}

/// A kept table and the nodes it was found at.
#[derive(Debug)]
pub(crate) struct Placed {
    pub node: NodeId,
    /// The heading that gave a primary label.
    pub heading: Option<NodeId>,
    pub table: ReconstructedTable,
}

/// Labels the outermost tables below `root`, checks them against the
/// expected labels and applies `restrict_to_expected`.
pub(crate) fn place(root: NodeRef<'_, Node>, options: &TableOptions) -> (Vec<Placed>, Vec<String>) {
    let mut placed = Vec::new();
    for (index, table) in outermost_tables(root).into_iter().enumerate() {
        let (label, heading) = match find_label(table, root.id(), options.search_depth) {
            Some(found) => (
                TableLabel::Heading {
                    text: found.text,
                    ordinal: found.passed + 1,
                },
                (found.passed == 0).then_some(found.heading),
            ),
            None => (TableLabel::Synthetic(index + 1), None),
        };
        debug!(label = %label, "table labelled");

        placed.push(Placed {
            node: table.id(),
            heading,
            table: ReconstructedTable {
                label,
                rows: read_rows(table),
            },
        });
    }

    let missing: Vec<String> = options
        .expected_labels
        .iter()
        .filter(|expected| {
            !placed.iter().any(|p| {
                p.table.label.is_primary() && p.table.label.heading() == Some(expected.as_str())
            })
        })
        .cloned()
        .collect();

    if !missing.is_empty() {
        warn!("No table found for expected labels: {}", missing.join(", "));
    }

    if options.restrict_to_expected {
        // unlabelled tables stay; only foreign headings are dropped
        placed.retain(|p| match p.table.label.heading() {
            Some(heading) => options.expected_labels.iter().any(|e| e == heading),
            None => true,
        });
    }

    (placed, missing)
}

/// Tables below `root` that are not nested in another table, in document
/// order.
pub(crate) fn outermost_tables(root: NodeRef<'_, Node>) -> Vec<NodeRef<'_, Node>> {
    root.descendants()
        .skip(1)
        .filter(|node| is_element(*node, "table"))
        .filter(|node| {
            !node
                .ancestors()
                .take_while(|a| a.id() != root.id())
                .any(|a| is_element(a, "table"))
        })
        .collect()
}

pub(crate) fn read_rows(table: NodeRef<'_, Node>) -> Vec<Row> {
    let mut rows = Vec::new();
    for child in table.children() {
        match element_name(child) {
            Some("tr") => rows.push(read_row(child)),
            Some("thead" | "tbody" | "tfoot") => rows.extend(
                child
                    .children()
                    .filter(|c| is_element(*c, "tr"))
                    .map(read_row),
            ),
            _ => {}
        }
    }
    rows
}

fn read_row(tr: NodeRef<'_, Node>) -> Row {
    let cells = tr
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|cell| matches!(cell.value().name(), "td" | "th"))
        .map(read_cell)
        .collect();
    Row { cells }
}

fn read_cell(cell: ElementRef<'_>) -> Cell {
    let element = cell.value();
    let raw = dom::inner_html(*cell, &Verbatim);
    Cell {
        header: element.name() == "th",
        row_span: parse_span(element.attr("rowspan")),
        col_span: parse_span(element.attr("colspan")),
        align: parse_align(element.attr("style"), element.attr("align")),
        html: CELL_SANITIZER.clean(&raw).to_string().trim().to_string(),
    }
}

fn parse_span(value: Option<&str>) -> Option<NonZeroU32> {
    value?.trim().parse::<u32>().ok().and_then(NonZeroU32::new)
}

fn parse_align(style: Option<&str>, align: Option<&str>) -> Align {
    let from_style = style.and_then(|style| {
        style.split(';').find_map(|decl| {
            let (property, value) = decl.split_once(':')?;
            property
                .trim()
                .eq_ignore_ascii_case("text-align")
                .then(|| value.trim().to_ascii_lowercase())
        })
    });

    match from_style
        .or_else(|| align.map(|a| a.trim().to_ascii_lowercase()))
        .as_deref()
    {
        Some("center") => Align::Center,
        Some("right") => Align::Right,
        _ => Align::Default,
    }
}

struct Found {
    heading: NodeId,
    text: String,
    /// Outermost tables between the heading and the labelled table.
    passed: usize,
}

/// Walks backward from `table` through preceding siblings, climbing to the
/// parent when a level is exhausted but never past `root`.
///
/// Each block element inspected costs one step; inline and void elements
/// such as `<br>` are free. Gives up once `depth` steps were spent.
fn find_label(table: NodeRef<'_, Node>, root: NodeId, depth: usize) -> Option<Found> {
    let mut steps = 0;
    let mut passed = 0;
    let mut current = table;

    loop {
        let mut sibling = current.prev_sibling();
        while let Some(node) = sibling {
            sibling = node.prev_sibling();
            let Some(element) = ElementRef::wrap(node) else {
                continue;
            };
            let name = element.value().name();
            if INLINE_ELEMENTS.contains(&name) {
                continue;
            }

            steps += 1;
            if steps > depth {
                return None;
            }

            if dom::is_heading(name) {
                let text = dom::text_of(element);
                if !text.is_empty() {
                    return Some(Found {
                        heading: node.id(),
                        text,
                        passed,
                    });
                }
            } else if name == "table" {
                passed += 1;
            } else if let Some((heading, text)) = scan_wrapper(node, &mut passed) {
                return Some(Found {
                    heading,
                    text,
                    passed,
                });
            }
        }

        let parent = current.parent()?;
        if parent.id() == root {
            return None;
        }
        current = parent;
    }
}

/// Looks for the last heading inside a preceding wrapper element, counting
/// the outermost tables that follow it.
fn scan_wrapper(wrapper: NodeRef<'_, Node>, passed: &mut usize) -> Option<(NodeId, String)> {
    let descendants: Vec<_> = wrapper.descendants().skip(1).collect();
    for node in descendants.into_iter().rev() {
        let Some(element) = ElementRef::wrap(node) else {
            continue;
        };
        let name = element.value().name();
        let nested_in_table = node
            .ancestors()
            .take_while(|a| a.id() != wrapper.id())
            .any(|a| is_element(a, "table"));
        if nested_in_table {
            continue;
        }

        if name == "table" {
            *passed += 1;
        } else if dom::is_heading(name) {
            let text = dom::text_of(element);
            if !text.is_empty() {
                return Some((node.id(), text));
            }
        }
    }
    None
}

fn element_name<'a>(node: NodeRef<'a, Node>) -> Option<&'a str> {
    node.value().as_element().map(|e| e.name())
}

fn is_element(node: NodeRef<'_, Node>, name: &str) -> bool {
    element_name(node) == Some(name)
}
