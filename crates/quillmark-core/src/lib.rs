//! A CommonMark parser and HTML renderer with optional GitHub Flavored
//! Markdown extensions.
//!
//! Parsing is total: every input produces a well-formed [`Document`] and
//! valid UTF-8 output, with malformed constructs degrading to literal text.
//!
//! ```
//! use quillmark_core::{gfm, RenderOptions};
//!
//! let html = gfm("~~old~~ *new*\n", &RenderOptions::default());
//! assert_eq!(html, "<p><del>old</del> <em>new</em></p>\n");
//! ```

mod ast;
mod emit;
mod entities;
mod inline;
mod label;
mod parser;
mod smart;

pub use ast::{
    Block, Document, FootnoteDefinition, Inline, InlineSeq, LinkDefinition, List, ListItem, Table,
    TableAlignment, TableRow,
};

/// The GFM extension set. CommonMark mode runs with none of these; `gfm`
/// enables all of them.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Extensions {
    pub table: bool,
    pub strikethrough: bool,
    pub tasklist: bool,
    pub autolink: bool,
    pub tagfilter: bool,
    pub footnotes: bool,
}

impl Extensions {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Extensions {
            table: true,
            strikethrough: true,
            tasklist: true,
            autolink: true,
            tagfilter: true,
            footnotes: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ParseOptions {
    pub extensions: Extensions,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RenderOptions {
    /// Scrub raw HTML and `javascript:` destinations.
    pub safe: bool,
    /// Replacement text for soft line breaks.
    pub softbreak: String,
    /// Curly quotes, ellipses, en/em dashes.
    pub smart: bool,
    /// `style="text-align: …"` instead of `align="…"` on table cells.
    pub table_prefer_style_attributes: bool,
    /// Emit the info-string tail as `data-meta` on code blocks.
    pub full_info_string: bool,
    /// Apply the GFM tag filter to raw HTML output.
    pub tagfilter: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            safe: false,
            softbreak: "\n".to_string(),
            smart: false,
            table_prefer_style_attributes: false,
            full_info_string: false,
            tagfilter: false,
        }
    }
}

/// Parses `input` into a document tree. Inline content is fully resolved
/// against the link-reference and footnote side tables before returning.
pub fn parse(input: &str, options: &ParseOptions) -> Document {
    parser::parse_document(input, options.extensions)
}

/// Renders a parsed document to HTML. The document is not mutated; smart
/// punctuation operates on a private copy.
pub fn render(document: &Document, options: &RenderOptions) -> String {
    emit::emit_html(document, options)
}

/// Renders and then cleans the HTML against an allow-list covering exactly
/// the tags this renderer produces.
pub fn render_sanitized(document: &Document, options: &RenderOptions) -> String {
    emit::emit_html_sanitized(document, options)
}

/// CommonMark, parse and render in one call.
pub fn markdown(input: &str, options: &RenderOptions) -> String {
    let document = parse(input, &ParseOptions::default());
    render(&document, options)
}

/// GitHub Flavored Markdown: the full extension set, with the tag filter
/// applied to raw HTML output.
pub fn gfm(input: &str, options: &RenderOptions) -> String {
    gfm_with_extensions(input, Extensions::all(), options)
}

/// GFM with a caller-selected extension subset. The tag filter render pass
/// follows its extension flag unless the options already request it.
pub fn gfm_with_extensions(
    input: &str,
    extensions: Extensions,
    options: &RenderOptions,
) -> String {
    let document = parse(input, &ParseOptions { extensions });
    let mut render_options = options.clone();
    render_options.tagfilter = render_options.tagfilter || extensions.tagfilter;
    render(&document, &render_options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_and_gfm_share_a_pipeline() {
        let input = "| a |\n|---|\n| 1 |\n";
        assert!(markdown(input, &RenderOptions::default()).starts_with("<p>"));
        assert!(gfm(input, &RenderOptions::default()).starts_with("<table>"));
    }

    #[test]
    fn parse_then_render_matches_combined_entry_point() {
        let input = "# Title\n\nBody with [link](/url).\n";
        let document = parse(input, &ParseOptions::default());
        let options = RenderOptions::default();
        assert_eq!(render(&document, &options), markdown(input, &options));
    }

    #[test]
    fn render_does_not_mutate_the_document() {
        let input = "\"quotes\" and --- dashes\n";
        let document = parse(input, &ParseOptions::default());
        let before = document.clone();
        let _ = render(
            &document,
            &RenderOptions {
                smart: true,
                ..RenderOptions::default()
            },
        );
        assert_eq!(document, before);
    }
}
