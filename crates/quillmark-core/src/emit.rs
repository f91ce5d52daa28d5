//! HTML rendering. The writer appends to one output `String`, coalescing
//! newlines through `cr()` so block tags land on their own lines, and emits
//! the footnote section after the document body in first-use order.

use crate::ast::{Block, Document, Inline, InlineSeq, Table, TableAlignment};
use crate::smart::apply_smart_punctuation;
use crate::RenderOptions;
use ammonia::Builder;
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

pub(crate) fn emit_html(document: &Document, options: &RenderOptions) -> String {
    if options.smart {
        let mut prepared = document.clone();
        apply_smart_punctuation(&mut prepared);
        emit_prepared(&prepared, options)
    } else {
        emit_prepared(document, options)
    }
}

pub(crate) fn emit_html_sanitized(document: &Document, options: &RenderOptions) -> String {
    SANITIZER.clean(&emit_html(document, options)).to_string()
}

fn emit_prepared(document: &Document, options: &RenderOptions) -> String {
    let mut writer = HtmlWriter {
        out: String::new(),
        options,
        footnote_order: Vec::new(),
        footnote_ref_counts: HashMap::new(),
    };
    for block in &document.blocks {
        writer.block(block, false);
    }
    writer.footnote_section(document);
    writer.out
}

struct HtmlWriter<'o> {
    out: String,
    options: &'o RenderOptions,
    /// Footnote keys in first-reference order.
    footnote_order: Vec<String>,
    footnote_ref_counts: HashMap<String, usize>,
}

impl HtmlWriter<'_> {
    fn cr(&mut self) {
        if !self.out.is_empty() && !self.out.ends_with('\n') {
            self.out.push('\n');
        }
    }

    fn block(&mut self, block: &Block, tight: bool) {
        match block {
            Block::Paragraph { content } => {
                if tight {
                    self.inlines(content);
                } else {
                    self.cr();
                    self.out.push_str("<p>");
                    self.inlines(content);
                    self.out.push_str("</p>\n");
                }
            }
            Block::Heading { level, content } => {
                self.cr();
                self.out.push_str(&format!("<h{}>", level));
                self.inlines(content);
                self.out.push_str(&format!("</h{}>\n", level));
            }
            Block::ThematicBreak => {
                self.cr();
                self.out.push_str("<hr />\n");
            }
            Block::CodeBlock { info, literal, .. } => {
                self.cr();
                if info.is_empty() {
                    self.out.push_str("<pre><code>");
                } else {
                    let (lang, meta) = split_info_string(info);
                    self.out.push_str("<pre><code class=\"language-");
                    self.out.push_str(&escape_html(lang));
                    self.out.push('"');
                    if self.options.full_info_string && !meta.is_empty() {
                        self.out.push_str(" data-meta=\"");
                        self.out.push_str(&escape_html(meta));
                        self.out.push('"');
                    }
                    self.out.push('>');
                }
                self.out.push_str(&escape_html(literal));
                self.out.push_str("</code></pre>\n");
            }
            Block::BlockQuote { blocks } => {
                self.cr();
                self.out.push_str("<blockquote>\n");
                for child in blocks {
                    self.block(child, false);
                }
                self.cr();
                self.out.push_str("</blockquote>\n");
            }
            Block::List(list) => {
                self.cr();
                if !list.ordered {
                    self.out.push_str("<ul>\n");
                } else if list.start == 1 {
                    self.out.push_str("<ol>\n");
                } else {
                    self.out.push_str(&format!("<ol start=\"{}\">\n", list.start));
                }
                for item in &list.items {
                    self.out.push_str("<li>");
                    let mut first = true;
                    for child in &item.blocks {
                        if let Block::Paragraph { content } = child {
                            let checkbox = if first { item.checked } else { None };
                            if list.tight {
                                if let Some(checked) = checkbox {
                                    self.checkbox(checked);
                                }
                                self.inlines(content);
                            } else {
                                self.cr();
                                self.out.push_str("<p>");
                                if let Some(checked) = checkbox {
                                    self.checkbox(checked);
                                }
                                self.inlines(content);
                                self.out.push_str("</p>\n");
                            }
                        } else {
                            self.block(child, false);
                        }
                        first = false;
                    }
                    self.out.push_str("</li>\n");
                }
                self.out
                    .push_str(if list.ordered { "</ol>\n" } else { "</ul>\n" });
            }
            Block::HtmlBlock { raw } => {
                self.cr();
                if self.options.safe {
                    self.out.push_str("<!-- raw HTML omitted -->\n");
                } else if self.options.tagfilter {
                    self.out.push_str(&tagfilter_block(raw));
                } else {
                    self.out.push_str(raw);
                }
                self.cr();
            }
            Block::Table(table) => self.table(table),
        }
    }

    fn checkbox(&mut self, checked: bool) {
        self.out.push_str(if checked {
            "<input checked=\"\" disabled=\"\" type=\"checkbox\"> "
        } else {
            "<input disabled=\"\" type=\"checkbox\"> "
        });
    }

    fn table(&mut self, table: &Table) {
        self.cr();
        self.out.push_str("<table>\n");
        let mut body_open = false;
        for row in &table.rows {
            if row.header {
                self.out.push_str("<thead>\n");
            } else if !body_open {
                self.out.push_str("<tbody>\n");
                body_open = true;
            }
            self.out.push_str("<tr>\n");
            for (idx, cell) in row.cells.iter().enumerate() {
                let tag = if row.header { "th" } else { "td" };
                self.out.push('<');
                self.out.push_str(tag);
                let alignment = table.alignments.get(idx).copied().unwrap_or(TableAlignment::None);
                if let Some(name) = alignment_name(alignment) {
                    if self.options.table_prefer_style_attributes {
                        self.out
                            .push_str(&format!(" style=\"text-align: {}\"", name));
                    } else {
                        self.out.push_str(&format!(" align=\"{}\"", name));
                    }
                }
                self.out.push('>');
                self.inlines(cell);
                self.out.push_str(&format!("</{}>\n", tag));
            }
            self.out.push_str("</tr>\n");
            if row.header {
                self.out.push_str("</thead>\n");
            }
        }
        if body_open {
            self.out.push_str("</tbody>\n");
        }
        self.out.push_str("</table>\n");
    }

    fn inlines(&mut self, inlines: &InlineSeq) {
        for inline in inlines {
            self.inline(inline);
        }
    }

    fn inline(&mut self, inline: &Inline) {
        match inline {
            Inline::Text { text, .. } => self.out.push_str(&escape_html(text)),
            Inline::SoftBreak => {
                let softbreak = self.options.softbreak.clone();
                self.out.push_str(&softbreak);
            }
            Inline::HardBreak => self.out.push_str("<br />\n"),
            Inline::Code(literal) => {
                self.out.push_str("<code>");
                self.out.push_str(&escape_html(literal));
                self.out.push_str("</code>");
            }
            Inline::Emph(children) => {
                self.out.push_str("<em>");
                self.inlines(children);
                self.out.push_str("</em>");
            }
            Inline::Strong(children) => {
                self.out.push_str("<strong>");
                self.inlines(children);
                self.out.push_str("</strong>");
            }
            Inline::Strikethrough(children) => {
                self.out.push_str("<del>");
                self.inlines(children);
                self.out.push_str("</del>");
            }
            Inline::Link {
                url,
                title,
                children,
            } => {
                if self.options.safe && is_javascript_url(url) {
                    self.inlines(children);
                    return;
                }
                self.out.push_str("<a href=\"");
                self.out.push_str(&escape_href(url));
                self.out.push('"');
                if let Some(title) = title {
                    self.out.push_str(" title=\"");
                    self.out.push_str(&escape_html(title));
                    self.out.push('"');
                }
                self.out.push('>');
                self.inlines(children);
                self.out.push_str("</a>");
            }
            Inline::Image { url, title, alt } => {
                if self.options.safe && is_javascript_url(url) {
                    self.out.push_str(&escape_html(alt));
                    return;
                }
                self.out.push_str("<img src=\"");
                self.out.push_str(&escape_href(url));
                self.out.push_str("\" alt=\"");
                self.out.push_str(&escape_html(alt));
                self.out.push('"');
                if let Some(title) = title {
                    self.out.push_str(" title=\"");
                    self.out.push_str(&escape_html(title));
                    self.out.push('"');
                }
                self.out.push_str(" />");
            }
            Inline::Html(raw) => {
                if self.options.safe {
                    self.out.push_str("<!-- raw HTML omitted -->");
                } else if self.options.tagfilter && tagfilter_matches(raw) {
                    self.out.push_str("&lt;");
                    self.out.push_str(&raw[1..]);
                } else {
                    self.out.push_str(raw);
                }
            }
            Inline::FootnoteRef { label, key } => {
                let number = match self.footnote_order.iter().position(|k| k == key) {
                    Some(pos) => pos + 1,
                    None => {
                        self.footnote_order.push(key.clone());
                        self.footnote_order.len()
                    }
                };
                let count = *self
                    .footnote_ref_counts
                    .entry(key.clone())
                    .and_modify(|c| *c += 1)
                    .or_insert(1);
                let suffix = if count > 1 {
                    format!("-{}", count)
                } else {
                    String::new()
                };
                let encoded = escape_href(label);
                self.out.push_str(&format!(
                    "<sup class=\"footnote-ref\"><a href=\"#fn-{}\" id=\"fnref-{}{}\" data-footnote-ref>{}</a></sup>",
                    encoded, encoded, suffix, number
                ));
            }
        }
    }

    fn footnote_section(&mut self, document: &Document) {
        if self.footnote_order.is_empty() {
            return;
        }
        self.cr();
        self.out
            .push_str("<section class=\"footnotes\" data-footnotes>\n<ol>\n");
        let mut idx = 0;
        // References inside definitions may append to the order mid-loop.
        while idx < self.footnote_order.len() {
            let key = self.footnote_order[idx].clone();
            idx += 1;
            let definition = match document.footnotes.get(&key) {
                Some(definition) => definition,
                None => continue,
            };
            let encoded = escape_href(&definition.label);
            self.out.push_str(&format!("<li id=\"fn-{}\">\n", encoded));
            let backrefs = self.backref_links(&key, &encoded);
            let blocks = &definition.blocks;
            let last_paragraph = blocks
                .len()
                .checked_sub(1)
                .filter(|last| matches!(blocks[*last], Block::Paragraph { .. }));
            for (block_idx, block) in blocks.iter().enumerate() {
                match block {
                    Block::Paragraph { content } if Some(block_idx) == last_paragraph => {
                        self.cr();
                        self.out.push_str("<p>");
                        self.inlines(content);
                        self.out.push(' ');
                        self.out.push_str(&backrefs);
                        self.out.push_str("</p>\n");
                    }
                    _ => self.block(block, false),
                }
            }
            if last_paragraph.is_none() {
                self.cr();
                self.out.push_str(&backrefs);
                self.out.push('\n');
            }
            self.out.push_str("</li>\n");
        }
        self.out.push_str("</ol>\n</section>\n");
    }

    /// One `↩` anchor per rendered reference; the n-th gets a numbered
    /// glyph and a suffixed target.
    fn backref_links(&self, key: &str, encoded: &str) -> String {
        let count = self.footnote_ref_counts.get(key).copied().unwrap_or(1);
        let mut out = String::new();
        for n in 1..=count {
            if n > 1 {
                out.push(' ');
            }
            let suffix = if n > 1 {
                format!("-{}", n)
            } else {
                String::new()
            };
            let glyph = if n > 1 {
                format!("\u{21A9}{}", n)
            } else {
                "\u{21A9}".to_string()
            };
            out.push_str(&format!(
                "<a href=\"#fnref-{}{}\" class=\"footnote-backref\" data-footnote-backref aria-label=\"Back to reference {}\">{}</a>",
                encoded, suffix, n, glyph
            ));
        }
        out
    }
}

fn alignment_name(alignment: TableAlignment) -> Option<&'static str> {
    match alignment {
        TableAlignment::None => None,
        TableAlignment::Left => Some("left"),
        TableAlignment::Center => Some("center"),
        TableAlignment::Right => Some("right"),
    }
}

fn split_info_string(info: &str) -> (&str, &str) {
    match info.find(|ch: char| ch.is_ascii_whitespace()) {
        Some(pos) => (&info[..pos], info[pos..].trim_start()),
        None => (info, ""),
    }
}

fn is_javascript_url(url: &str) -> bool {
    let trimmed = url.trim_start();
    trimmed.len() >= 11 && trimmed[..11].eq_ignore_ascii_case("javascript:")
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// URL encoding for href/src attributes: existing percent-triples are
/// uppercased and preserved, characters in the URL-safe set pass through
/// (`&` as `&amp;` for the attribute context), everything else is
/// percent-encoded from its UTF-8 bytes.
pub(crate) fn escape_href(url: &str) -> String {
    const SAFE: &[u8] = b"-._~:/?#@!$&'()*+,;=";
    let bytes = url.as_bytes();
    let mut out = String::with_capacity(url.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'%' {
            if let (Some(hi), Some(lo)) = (bytes.get(i + 1), bytes.get(i + 2)) {
                if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() {
                    out.push('%');
                    out.push(hi.to_ascii_uppercase() as char);
                    out.push(lo.to_ascii_uppercase() as char);
                    i += 3;
                    continue;
                }
            }
            out.push_str("%25");
            i += 1;
            continue;
        }
        if b == b'&' {
            out.push_str("&amp;");
            i += 1;
            continue;
        }
        if b.is_ascii_alphanumeric() || SAFE.contains(&b) {
            out.push(b as char);
            i += 1;
            continue;
        }
        out.push_str(&format!("%{:02X}", b));
        i += 1;
    }
    out
}

const TAGFILTER_BLACKLIST: &[&str] = &[
    "title",
    "textarea",
    "style",
    "xmp",
    "iframe",
    "noembed",
    "noframes",
    "script",
    "plaintext",
];

/// Whether the text beginning at `<` opens or closes one of the filtered
/// tag names.
fn tagfilter_matches(literal: &str) -> bool {
    let bytes = literal.as_bytes();
    if bytes.len() < 3 || bytes[0] != b'<' {
        return false;
    }
    let mut i = 1;
    if bytes[i] == b'/' {
        i += 1;
    }
    for tag in TAGFILTER_BLACKLIST {
        if literal[i..].len() >= tag.len() && literal[i..i + tag.len()].eq_ignore_ascii_case(tag) {
            return match bytes.get(i + tag.len()) {
                Some(b) if b.is_ascii_whitespace() || *b == b'>' => true,
                Some(b'/') => bytes.get(i + tag.len() + 1) == Some(&b'>'),
                _ => false,
            };
        }
    }
    false
}

/// The tag filter over a raw HTML block: every `<` that opens a filtered
/// tag becomes `&lt;`. Already-filtered text has no `<` left to match, so
/// the pass is idempotent.
fn tagfilter_block(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('<') {
        out.push_str(&rest[..pos]);
        if tagfilter_matches(&rest[pos..]) {
            out.push_str("&lt;");
        } else {
            out.push('<');
        }
        rest = &rest[pos + 1..];
    }
    out.push_str(rest);
    out
}

/// Allow-list for the hardened output mode: exactly the tags and
/// attributes this renderer produces.
static SANITIZER: Lazy<Builder<'static>> = Lazy::new(|| {
    let tags: HashSet<&'static str> = [
        "a",
        "blockquote",
        "br",
        "code",
        "del",
        "em",
        "h1",
        "h2",
        "h3",
        "h4",
        "h5",
        "h6",
        "hr",
        "img",
        "input",
        "li",
        "ol",
        "p",
        "pre",
        "section",
        "strong",
        "sup",
        "table",
        "tbody",
        "td",
        "th",
        "thead",
        "tr",
        "ul",
    ]
    .into_iter()
    .collect();

    let mut tag_attributes: HashMap<&'static str, HashSet<&'static str>> = HashMap::new();
    tag_attributes.insert(
        "a",
        ["href", "title", "class", "id", "aria-label"].into_iter().collect(),
    );
    tag_attributes.insert("img", ["src", "alt", "title"].into_iter().collect());
    tag_attributes.insert("ol", ["start"].into_iter().collect());
    tag_attributes.insert("th", ["align", "style"].into_iter().collect());
    tag_attributes.insert("td", ["align", "style"].into_iter().collect());
    tag_attributes.insert(
        "input",
        ["checked", "disabled", "type"].into_iter().collect(),
    );
    tag_attributes.insert("li", ["id"].into_iter().collect());
    tag_attributes.insert("section", ["class"].into_iter().collect());
    tag_attributes.insert("sup", ["class"].into_iter().collect());
    tag_attributes.insert("code", ["class"].into_iter().collect());

    let mut builder = Builder::default();
    builder
        .tags(tags)
        .tag_attributes(tag_attributes)
        .generic_attribute_prefixes(["data-"].into_iter().collect())
        .link_rel(None);
    builder
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn href_encoding_contract() {
        assert_eq!(escape_href("/url?a=b&c=d"), "/url?a=b&amp;c=d");
        assert_eq!(escape_href("/a%2fb%ZZ"), "/a%2Fb%25ZZ");
        assert_eq!(escape_href("/ä b"), "/%C3%A4%20b");
        assert_eq!(escape_href("foo)("), "foo)(");
    }

    #[test]
    fn tagfilter_hits_only_listed_tags() {
        assert!(tagfilter_matches("<script>"));
        assert!(tagfilter_matches("</sCrIpT>"));
        assert!(tagfilter_matches("<iframe src=\"x\">"));
        assert!(tagfilter_matches("<style/>"));
        assert!(!tagfilter_matches("<scripts>"));
        assert!(!tagfilter_matches("<div>"));
        assert_eq!(
            tagfilter_block("<em><script>x</script></em>\n"),
            "<em>&lt;script>x&lt;/script></em>\n"
        );
    }

    #[test]
    fn tagfilter_is_idempotent() {
        let once = tagfilter_block("<title>a</title>\n");
        assert_eq!(tagfilter_block(&once), once);
    }

    #[test]
    fn javascript_urls_detected_case_insensitively() {
        assert!(is_javascript_url("javascript:alert(1)"));
        assert!(is_javascript_url("  JavaScript:x"));
        assert!(!is_javascript_url("java-script:x"));
        assert!(!is_javascript_url("/javascript:x"));
    }
}
