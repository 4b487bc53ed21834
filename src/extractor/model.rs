use std::{fmt, num::NonZeroU32};

use serde::{Deserialize, Serialize};
use url::Url;

/// The isolated content subtree of a page, serialized back to HTML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentNode {
    pub html: String,
    /// In-page `<title>` with the site suffix removed.
    pub title: Option<String>,
    /// Selector that matched the content root, `None` for a fallback.
    pub matched: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Isolation {
    Content(ContentNode),
    /// The page carries the "does not exist" sentinel.
    Deleted,
}

/// A resource localized into the asset store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub source_url: Url,
    pub local_name: String,
    /// Path relative to the archive directory, as written into the page.
    pub local_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFailure {
    pub source_url: Url,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedContent {
    pub html: String,
    pub assets: Vec<Asset>,
    pub failures: Vec<AssetFailure>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    #[default]
    Default,
    Center,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub header: bool,
    pub row_span: Option<NonZeroU32>,
    pub col_span: Option<NonZeroU32>,
    pub align: Align,
    /// Sanitized inner markup.
    pub html: String,
}

impl Cell {
    pub fn is_merged(&self) -> bool {
        self.row_span.is_some_and(|n| n.get() > 1) || self.col_span.is_some_and(|n| n.get() > 1)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableLabel {
    /// Under a heading; `ordinal` 1 is the canonical table for it, higher
    /// values are later tables before the next heading.
    Heading { text: String, ordinal: usize },
    /// No heading within the search window; positional 1-based index.
    Synthetic(usize),
}

impl TableLabel {
    pub fn heading(&self) -> Option<&str> {
        match self {
            Self::Heading { text, .. } => Some(text),
            Self::Synthetic(_) => None,
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, Self::Heading { ordinal: 1, .. })
    }
}

impl fmt::Display for TableLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Heading { text, ordinal: 1 } => write!(f, "{text}"),
            Self::Heading { text, ordinal } => write!(f, "{text} ({ordinal})"),
            Self::Synthetic(index) => write!(f, "table {index}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconstructedTable {
    pub label: TableLabel,
    pub rows: Vec<Row>,
}

impl ReconstructedTable {
    pub fn has_merged_cells(&self) -> bool {
        self.rows.iter().flat_map(|r| &r.cells).any(Cell::is_merged)
    }

    /// Raw HTML keeping only spans and normalized alignment.
    pub fn to_html(&self) -> String {
        let mut out = String::from("<table>\n");
        for row in &self.rows {
            out.push_str("<tr>");
            for cell in &row.cells {
                let tag = if cell.header { "th" } else { "td" };
                out.push('<');
                out.push_str(tag);
                if let Some(n) = cell.row_span {
                    out.push_str(&format!(" rowspan=\"{n}\""));
                }
                if let Some(n) = cell.col_span {
                    out.push_str(&format!(" colspan=\"{n}\""));
                }
                match cell.align {
                    Align::Center => out.push_str(" style=\"text-align:center;\""),
                    Align::Right => out.push_str(" style=\"text-align:right;\""),
                    Align::Default => {}
                }
                out.push('>');
                out.push_str(&cell.html);
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
            out.push_str("</tr>\n");
        }
        out.push_str("</table>");
        out
    }
}

/// Tables of one page plus the completeness check against expected labels.
#[derive(Debug, Clone, Default)]
pub struct Reconstruction {
    pub tables: Vec<ReconstructedTable>,
    pub missing: Vec<String>,
}
