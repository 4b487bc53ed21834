pub mod dom;
pub mod isolate;
pub mod markdown;
pub mod model;
pub mod reject;
pub mod resolve;
pub mod tables;

#[cfg(test)]
mod tests;

pub use isolate::{IsolateError, IsolationRules, isolate};
pub use markdown::{MarkdownError, RawTables};
pub use model::{Asset, ContentNode, Isolation, ReconstructedTable, ResolvedContent};
pub use resolve::{AssetClassifier, ImageMode, ReferenceResolver};
pub use tables::{TableOptions, reconstruct};

use crate::config::TableLayout;

/// Markdown body of a page plus the tables reconstructed for it.
#[derive(Debug, Clone, Default)]
pub struct Rendered {
    pub markdown: String,
    pub tables: Vec<ReconstructedTable>,
    /// Expected labels with no table on the page.
    pub missing: Vec<String>,
}

impl Rendered {
    /// Nothing to archive: no text and no reconstructed table.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && reject::is_blank(&self.markdown)
    }
}

/// Converts resolved content HTML to Markdown.
///
/// Plain pages (`layout` is `None`) keep only merged-cell tables as raw
/// markup. Table-centric pages are reconstructed first and laid out
/// according to `layout`.
pub fn render(
    html: &str,
    layout: Option<TableLayout>,
    options: &TableOptions,
) -> Result<Rendered, MarkdownError> {
    let Some(layout) = layout else {
        return Ok(Rendered {
            markdown: markdown::convert(html, RawTables::Merged)?,
            ..Rendered::default()
        });
    };

    let (markdown, reconstruction) = match layout {
        TableLayout::Inline => (
            markdown::convert(html, RawTables::All)?,
            tables::reconstruct(html, options),
        ),
        TableLayout::Sections => markdown::sections(html, options)?,
    };

    Ok(Rendered {
        markdown,
        tables: reconstruction.tables,
        missing: reconstruction.missing,
    })
}
