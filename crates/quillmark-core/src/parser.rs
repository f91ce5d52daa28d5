//! Block phase: a line-driven state machine producing the block tree and
//! the link-reference / footnote side tables. The document is parsed twice:
//! a definition-gathering prepass (inlines skipped) followed by the full
//! parse, so reference definitions are visible to paragraphs that precede
//! them.

use crate::ast::{
    Block, Document, FootnoteDefinition, InlineSeq, LinkDefinition, List, ListItem, Table,
    TableAlignment, TableRow,
};
use crate::entities::unescape_and_decode;
use crate::inline::InlineParser;
use crate::label::{is_label_escape, normalize_label};
use crate::Extensions;
use std::collections::HashMap;

pub(crate) fn parse_document(source: &str, extensions: Extensions) -> Document {
    let normalized = normalize_line_endings(source);
    let lines = split_lines(&normalized);

    let mut prepass = Parser::new(extensions);
    prepass.parse_blocks(&lines, false);

    let mut parser = Parser::new(extensions);
    parser.link_defs = prepass.link_defs;
    parser.footnote_labels = prepass.footnote_labels;
    let blocks = parser.parse_blocks(&lines, true);
    Document {
        blocks,
        footnotes: parser.footnotes,
    }
}

fn normalize_line_endings(source: &str) -> String {
    if !source.contains('\r') {
        return source.to_string();
    }
    source.replace("\r\n", "\n").replace('\r', "\n")
}

struct Parser {
    extensions: Extensions,
    link_defs: HashMap<String, LinkDefinition>,
    /// Normalized footnote key to the first definition's original spelling.
    footnote_labels: HashMap<String, String>,
    footnotes: HashMap<String, FootnoteDefinition>,
}

/// The lazy flag marks non-prefixed blockquote continuation lines; such
/// lines join an open paragraph unconditionally and never start blocks.
#[derive(Clone, Debug)]
struct Line {
    text: String,
    lazy: bool,
}

impl Line {
    fn new(text: impl Into<String>) -> Self {
        Line {
            text: text.into(),
            lazy: false,
        }
    }

    fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

fn split_lines(source: &str) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (idx, byte) in source.bytes().enumerate() {
        if byte == b'\n' {
            lines.push(Line::new(&source[start..idx]));
            start = idx + 1;
        }
    }
    // A trailing newline terminates the last line rather than opening an
    // empty one.
    if start < source.len() {
        lines.push(Line::new(&source[start..]));
    }
    lines
}

impl Parser {
    fn new(extensions: Extensions) -> Self {
        Parser {
            extensions,
            link_defs: HashMap::new(),
            footnote_labels: HashMap::new(),
            footnotes: HashMap::new(),
        }
    }

    fn parse_blocks(&mut self, lines: &[Line], parse_inlines: bool) -> Vec<Block> {
        let mut blocks = Vec::new();
        let mut i = 0;
        while i < lines.len() {
            let line = &lines[i];
            if line.is_blank() {
                i += 1;
                continue;
            }
            if !line.lazy {
                if let Some((block, next)) = self.parse_fenced_code(lines, i) {
                    blocks.push(block);
                    i = next;
                    continue;
                }
                if let Some((block, next)) = self.parse_indented_code(lines, i) {
                    blocks.push(block);
                    i = next;
                    continue;
                }
                if let Some((block, next)) = self.parse_html_block(lines, i) {
                    blocks.push(block);
                    i = next;
                    continue;
                }
                if is_thematic_break_line(&line.text) {
                    blocks.push(Block::ThematicBreak);
                    i += 1;
                    continue;
                }
                if let Some((block, next)) = self.parse_blockquote(lines, i, parse_inlines) {
                    blocks.push(block);
                    i = next;
                    continue;
                }
                if let Some(next) = self.parse_footnote_definition(lines, i, parse_inlines) {
                    i = next;
                    continue;
                }
                if let Some((block, next)) = self.parse_list(lines, i, parse_inlines) {
                    blocks.push(block);
                    i = next;
                    continue;
                }
                if let Some((block, next)) = self.parse_atx_heading(lines, i, parse_inlines) {
                    blocks.push(block);
                    i = next;
                    continue;
                }
                if let Some((block, next)) = self.parse_table(lines, i, parse_inlines) {
                    blocks.push(block);
                    i = next;
                    continue;
                }
            }
            let (block, next) = self.parse_paragraph(lines, i, parse_inlines);
            if let Some(block) = block {
                blocks.push(block);
            }
            i = next.max(i + 1);
        }
        blocks
    }

    /// A line that would end an open paragraph and start a new block.
    /// Setext underlines, tables, and indented code are handled separately.
    fn interrupts_paragraph(&self, text: &str) -> bool {
        if is_thematic_break_line(text) {
            return true;
        }
        if scan_atx_heading(text).is_some() {
            return true;
        }
        if parse_fence_open(text).is_some() {
            return true;
        }
        if blockquote_extract(text).is_some() {
            return true;
        }
        if let Some(kind) = match_html_block_start(text) {
            if !matches!(kind, HtmlBlockKind::Type7) {
                return true;
            }
        }
        if let Some(marker) = parse_list_marker(text) {
            if !marker.empty && (!marker.ordered || marker.start == 1) {
                return true;
            }
        }
        if self.extensions.footnotes && scan_footnote_definition_start(text).is_some() {
            return true;
        }
        false
    }

    fn line_can_continue_paragraph(&self, text: &str) -> bool {
        !text.trim().is_empty()
            && setext_underline_level(text).is_none()
            && !self.interrupts_paragraph(text)
    }

    fn inline_parser(&self) -> InlineParser<'_> {
        InlineParser {
            extensions: self.extensions,
            link_defs: &self.link_defs,
            footnote_labels: &self.footnote_labels,
        }
    }

    fn parse_inline_text(&self, text: &str, parse_inlines: bool) -> InlineSeq {
        if !parse_inlines || text.is_empty() {
            return Vec::new();
        }
        self.inline_parser().parse(text)
    }

    // --- paragraphs and setext headings ------------------------------------

    fn parse_paragraph(
        &mut self,
        lines: &[Line],
        start: usize,
        parse_inlines: bool,
    ) -> (Option<Block>, usize) {
        let mut i = start;
        let mut content: Vec<String> = Vec::new();
        let mut setext_level = None;
        let mut consumed_defs = false;

        while i < lines.len() {
            let line = &lines[i];
            if line.lazy {
                content.push(dedent_up_to_three(&line.text));
                i += 1;
                continue;
            }
            if line.is_blank() {
                break;
            }
            if content.is_empty() {
                if let Some((label, def, next)) = parse_link_reference_definition(lines, i) {
                    self.link_defs.entry(label).or_insert(def);
                    consumed_defs = true;
                    i = next;
                    continue;
                }
                // A buffer emptied by definition extraction still converts
                // under an `=` underline; the heading comes out empty. The
                // `-` underline falls through to the thematic-break rule.
                if consumed_defs && setext_underline_level(&line.text) == Some(1) {
                    return (
                        Some(Block::Heading {
                            level: 1,
                            content: Vec::new(),
                        }),
                        i + 1,
                    );
                }
                // Definitions consumed every buffered line; whatever starts
                // here is a fresh block for the dispatch loop.
                if i != start
                    && (self.interrupts_paragraph(&line.text) || self.table_starts_at(lines, i))
                {
                    return (None, i);
                }
            } else {
                if self.interrupts_paragraph(&line.text) {
                    break;
                }
                if self.table_starts_at(lines, i) {
                    break;
                }
            }
            content.push(dedent_up_to_three(&line.text));
            if let Some(next_line) = lines.get(i + 1) {
                if !next_line.lazy {
                    if let Some(level) = setext_underline_level(&next_line.text) {
                        setext_level = Some(level);
                        i += 2;
                        break;
                    }
                }
            }
            i += 1;
        }

        if content.is_empty() {
            return (None, i);
        }

        let mut buffer = content.join("\n");
        truncate_trailing_blanks(&mut buffer);
        if let Some(level) = setext_level {
            let trimmed = buffer.trim_matches([' ', '\t']).to_string();
            let content = self.parse_inline_text(&trimmed, parse_inlines);
            return (Some(Block::Heading { level, content }), i);
        }
        let inlines = self.parse_inline_text(&buffer, parse_inlines);
        (Some(Block::Paragraph { content: inlines }), i)
    }

    // --- code blocks -------------------------------------------------------

    fn parse_fenced_code(&mut self, lines: &[Line], start: usize) -> Option<(Block, usize)> {
        let line = &lines[start];
        let (indent, fence_len, fence_char, info_raw) = parse_fence_open(&line.text)?;
        let info = unescape_and_decode(info_raw.trim_matches([' ', '\t']));

        let mut code_lines: Vec<String> = Vec::new();
        let mut i = start + 1;
        let mut closed = false;
        while i < lines.len() {
            let candidate = &lines[i];
            if !candidate.lazy && is_fence_close(&candidate.text, fence_len, fence_char) {
                closed = true;
                i += 1;
                break;
            }
            code_lines.push(remove_indent(&candidate.text, indent));
            i += 1;
        }
        if !closed {
            while code_lines.last().is_some_and(|l| l.trim().is_empty()) {
                code_lines.pop();
            }
        }
        let literal = if code_lines.is_empty() {
            String::new()
        } else {
            let mut text = code_lines.join("\n");
            text.push('\n');
            text
        };
        Some((
            Block::CodeBlock {
                info,
                literal,
                fenced: true,
            },
            i,
        ))
    }

    fn parse_indented_code(&self, lines: &[Line], start: usize) -> Option<(Block, usize)> {
        indent_prefix_len(&lines[start].text, 4)?;
        let mut code_lines: Vec<String> = Vec::new();
        let mut pending_blank = 0usize;
        let mut i = start;
        while i < lines.len() {
            let current = &lines[i];
            if current.is_blank() {
                pending_blank += 1;
                i += 1;
                continue;
            }
            if current.lazy || indent_prefix_len(&current.text, 4).is_none() {
                break;
            }
            for _ in 0..pending_blank {
                code_lines.push(String::new());
            }
            pending_blank = 0;
            code_lines.push(remove_indent(&current.text, 4));
            i += 1;
        }
        // Trailing blanks were never drained; they follow the block.
        i -= pending_blank;
        let mut literal = code_lines.join("\n");
        literal.push('\n');
        Some((
            Block::CodeBlock {
                info: String::new(),
                literal,
                fenced: false,
            },
            i,
        ))
    }

    // --- HTML blocks -------------------------------------------------------

    fn parse_html_block(&mut self, lines: &[Line], start: usize) -> Option<(Block, usize)> {
        let line = &lines[start];
        let kind = match_html_block_start(&line.text)?;
        let mut raw_lines = vec![line.text.clone()];
        let mut i = start + 1;

        match kind {
            HtmlBlockKind::Type6 | HtmlBlockKind::Type7 => {
                while i < lines.len() && !lines[i].is_blank() {
                    raw_lines.push(lines[i].text.clone());
                    i += 1;
                }
            }
            _ => {
                if !html_block_end(kind, &line.text) {
                    let mut closed = false;
                    while i < lines.len() {
                        raw_lines.push(lines[i].text.clone());
                        i += 1;
                        if html_block_end(kind, &lines[i - 1].text) {
                            closed = true;
                            break;
                        }
                    }
                    if !closed {
                        while raw_lines.len() > 1
                            && raw_lines.last().is_some_and(|l| l.trim().is_empty())
                        {
                            raw_lines.pop();
                        }
                    }
                }
            }
        }

        let mut raw = raw_lines.join("\n");
        raw.push('\n');
        Some((Block::HtmlBlock { raw }, i))
    }

    // --- blockquotes -------------------------------------------------------

    fn parse_blockquote(
        &mut self,
        lines: &[Line],
        start: usize,
        parse_inlines: bool,
    ) -> Option<(Block, usize)> {
        blockquote_extract(&lines[start].text)?;
        let mut quote_lines: Vec<Line> = Vec::new();
        let mut fence: Option<(usize, u8)> = None;
        let mut can_lazy = false;
        let mut i = start;

        while i < lines.len() {
            let candidate = &lines[i];
            if let Some(extracted) = blockquote_extract(&candidate.text) {
                match fence {
                    Some((len, ch)) => {
                        if is_fence_close(&extracted, len, ch) {
                            fence = None;
                        }
                    }
                    None => {
                        if let Some((_, len, ch, _)) = parse_fence_open(&extracted) {
                            fence = Some((len, ch));
                        }
                    }
                }
                can_lazy = fence.is_none() && self.lazy_anchor(&extracted);
                quote_lines.push(Line::new(extracted));
                i += 1;
                continue;
            }
            if candidate.is_blank() {
                break;
            }
            // While an interior fence is open, only prefixed lines continue.
            if fence.is_some() {
                break;
            }
            if can_lazy && self.line_can_continue_paragraph(&candidate.text) {
                quote_lines.push(Line {
                    text: candidate.text.clone(),
                    lazy: true,
                });
                i += 1;
                continue;
            }
            break;
        }

        let blocks = self.parse_blocks(&quote_lines, parse_inlines);
        Some((Block::BlockQuote { blocks }, i))
    }

    /// Whether an extracted quote line leaves a paragraph open for lazy
    /// continuation: not indented code, not a fence, and a leading list
    /// marker only counts when a nested `>` follows it.
    fn lazy_anchor(&self, extracted: &str) -> bool {
        if extracted.trim().is_empty() {
            return false;
        }
        if extracted.trim_start().starts_with('>') {
            return true;
        }
        if indent_prefix_len(extracted, 4).is_some() {
            return false;
        }
        if parse_fence_open(extracted).is_some() {
            return false;
        }
        if let Some(marker) = parse_list_marker(extracted) {
            return remove_marker_indent(extracted, marker.content_indent)
                .trim_start()
                .starts_with('>');
        }
        self.line_can_continue_paragraph(extracted)
    }

    // --- lists -------------------------------------------------------------

    fn parse_list(
        &mut self,
        lines: &[Line],
        start: usize,
        parse_inlines: bool,
    ) -> Option<(Block, usize)> {
        let first_marker = parse_list_marker(&lines[start].text)?;
        let mut items = Vec::new();
        let mut item_blanks = Vec::new();
        let mut item_paragraphs = Vec::new();
        let mut list_has_blank = false;
        let mut i = start;

        while i < lines.len() {
            let current = &lines[i];
            if current.lazy {
                break;
            }
            let marker = match parse_list_marker(&current.text) {
                Some(marker) => marker,
                None => break,
            };
            if marker.ordered != first_marker.ordered || marker.marker != first_marker.marker {
                break;
            }

            let content_indent = marker.content_indent;
            let mut item_lines: Vec<Line> = Vec::new();
            let mut item_blank = false;
            let mut fence: Option<(usize, u8)> = None;
            let first_text = remove_marker_indent(&current.text, content_indent);
            let mut seen_content = !first_text.trim().is_empty();
            if let Some((_, len, ch, _)) = parse_fence_open(&first_text) {
                fence = Some((len, ch));
            }
            let mut can_lazy = seen_content
                && (self.line_can_continue_paragraph(&first_text)
                    || first_text.trim_start().starts_with('>'));
            item_lines.push(Line::new(first_text));

            let mut j = i + 1;
            let mut pending_blank = 0usize;
            while j < lines.len() {
                let next = &lines[j];
                if fence.is_some() {
                    // An open fence swallows lines regardless of indentation.
                    let text = if next.is_blank() {
                        String::new()
                    } else {
                        remove_indent(&next.text, content_indent)
                    };
                    if let Some((len, ch)) = fence {
                        if is_fence_close(&text, len, ch) {
                            fence = None;
                        }
                    }
                    item_lines.push(Line::new(text));
                    seen_content = true;
                    can_lazy = false;
                    j += 1;
                    continue;
                }
                if next.is_blank() {
                    if !seen_content {
                        // An empty item ends at a blank line, but the list
                        // survives when a sibling marker follows.
                        let mut k = j;
                        while k < lines.len() && lines[k].is_blank() {
                            k += 1;
                        }
                        if k < lines.len() {
                            if let Some(next_marker) = parse_list_marker(&lines[k].text) {
                                if next_marker.ordered == first_marker.ordered
                                    && next_marker.marker == first_marker.marker
                                {
                                    list_has_blank = true;
                                    j = k;
                                }
                            }
                        }
                        break;
                    }
                    pending_blank += 1;
                    can_lazy = false;
                    j += 1;
                    continue;
                }
                if !next.lazy && indent_prefix_len(&next.text, content_indent).is_some() {
                    if pending_blank > 0 {
                        item_blank = true;
                        for _ in 0..pending_blank {
                            item_lines.push(Line::new(""));
                        }
                        pending_blank = 0;
                    }
                    let text = remove_indent(&next.text, content_indent);
                    if let Some((_, len, ch, _)) = parse_fence_open(&text) {
                        fence = Some((len, ch));
                    }
                    can_lazy = self.line_can_continue_paragraph(&text)
                        || text.trim_start().starts_with('>');
                    item_lines.push(Line::new(text));
                    seen_content = true;
                    j += 1;
                    continue;
                }
                if let Some(next_marker) = parse_list_marker(&next.text) {
                    if pending_blank > 0
                        && next_marker.ordered == first_marker.ordered
                        && next_marker.marker == first_marker.marker
                    {
                        list_has_blank = true;
                    }
                    break;
                }
                if pending_blank == 0 && can_lazy && self.line_can_continue_paragraph(&next.text) {
                    item_lines.push(next.clone());
                    seen_content = true;
                    j += 1;
                    continue;
                }
                break;
            }

            let mut blocks = self.parse_blocks(&item_lines, parse_inlines);
            let checked = if self.extensions.tasklist && parse_inlines {
                take_task_marker(&mut blocks)
            } else {
                None
            };
            let paragraphs = blocks
                .iter()
                .filter(|block| matches!(block, Block::Paragraph { .. }))
                .count();
            items.push(ListItem { blocks, checked });
            item_blanks.push(item_blank);
            item_paragraphs.push(paragraphs);
            i = j;
        }

        if items.is_empty() {
            return None;
        }
        let tight = !list_has_blank
            && item_blanks.iter().all(|blank| !*blank)
            && item_paragraphs.iter().all(|count| *count < 2);
        Some((
            Block::List(List {
                ordered: first_marker.ordered,
                marker: first_marker.marker,
                start: first_marker.start,
                tight,
                items,
            }),
            i,
        ))
    }

    // --- headings ----------------------------------------------------------

    fn parse_atx_heading(
        &mut self,
        lines: &[Line],
        start: usize,
        parse_inlines: bool,
    ) -> Option<(Block, usize)> {
        let (level, text) = scan_atx_heading(&lines[start].text)?;
        let content = self.parse_inline_text(&text, parse_inlines);
        Some((Block::Heading { level, content }, start + 1))
    }

    // --- tables ------------------------------------------------------------

    fn table_starts_at(&self, lines: &[Line], i: usize) -> bool {
        if !self.extensions.table || lines[i].lazy {
            return false;
        }
        let header = match table_line_view(&lines[i].text) {
            Some(view) => view,
            None => return false,
        };
        let (cells, had_pipe) = split_table_cells(header);
        if !had_pipe {
            return false;
        }
        let separator = match lines.get(i + 1) {
            Some(line) if !line.lazy => line,
            _ => return false,
        };
        let sep_view = match table_line_view(&separator.text) {
            Some(view) => view,
            None => return false,
        };
        matches!(parse_table_separator(sep_view), Some(aligns) if aligns.len() == cells.len())
    }

    fn parse_table(
        &mut self,
        lines: &[Line],
        start: usize,
        parse_inlines: bool,
    ) -> Option<(Block, usize)> {
        if !self.table_starts_at(lines, start) {
            return None;
        }
        let header_view = table_line_view(&lines[start].text)?;
        let (header_cells, _) = split_table_cells(header_view);
        let sep_view = table_line_view(&lines[start + 1].text)?;
        let alignments = parse_table_separator(sep_view)?;
        let columns = alignments.len();

        let mut rows = vec![TableRow {
            header: true,
            cells: self.parse_table_cells(&header_cells, columns, parse_inlines),
        }];

        let mut i = start + 2;
        while i < lines.len() {
            let line = &lines[i];
            if line.is_blank() || line.lazy {
                break;
            }
            if is_thematic_break_line(&line.text)
                || scan_atx_heading(&line.text).is_some()
                || parse_fence_open(&line.text).is_some()
                || blockquote_extract(&line.text).is_some()
                || match_html_block_start(&line.text).is_some()
            {
                break;
            }
            let view = match table_line_view(&line.text) {
                Some(view) => view,
                None => break,
            };
            let (cells, _) = split_table_cells(view);
            rows.push(TableRow {
                header: false,
                cells: self.parse_table_cells(&cells, columns, parse_inlines),
            });
            i += 1;
        }

        Some((Block::Table(Table { alignments, rows }), i))
    }

    fn parse_table_cells(
        &self,
        cells: &[String],
        columns: usize,
        parse_inlines: bool,
    ) -> Vec<InlineSeq> {
        let mut out = Vec::with_capacity(columns);
        for cell in cells.iter().take(columns) {
            out.push(self.parse_inline_text(cell, parse_inlines));
        }
        while out.len() < columns {
            out.push(Vec::new());
        }
        out
    }

    // --- footnote definitions ----------------------------------------------

    fn parse_footnote_definition(
        &mut self,
        lines: &[Line],
        start: usize,
        parse_inlines: bool,
    ) -> Option<usize> {
        if !self.extensions.footnotes {
            return None;
        }
        let (label, rest) = scan_footnote_definition_start(&lines[start].text)?;
        let mut content_lines = vec![Line::new(rest.trim_start_matches([' ', '\t']))];

        let mut i = start + 1;
        let mut pending_blank = 0usize;
        while i < lines.len() {
            let line = &lines[i];
            if line.lazy {
                break;
            }
            if line.is_blank() {
                pending_blank += 1;
                i += 1;
                continue;
            }
            if indent_prefix_len(&line.text, 4).is_none() {
                break;
            }
            // Blanks count only when further indented content follows.
            for _ in 0..pending_blank {
                content_lines.push(Line::new(""));
            }
            pending_blank = 0;
            content_lines.push(Line::new(remove_indent(&line.text, 4)));
            i += 1;
        }
        i -= pending_blank;

        let key = normalize_label(&label);
        if key.is_empty() {
            return None;
        }
        self.footnote_labels
            .entry(key.clone())
            .or_insert_with(|| label.clone());
        let blocks = self.parse_blocks(&content_lines, parse_inlines);
        if parse_inlines {
            self.footnotes
                .entry(key)
                .or_insert(FootnoteDefinition { label, blocks });
        }
        Some(i)
    }
}

// --- task lists -------------------------------------------------------------

/// Strips a leading `[ ]`/`[x]` marker from the item's first paragraph and
/// reports its state. The marker must be followed by a space or tab.
fn take_task_marker(blocks: &mut [Block]) -> Option<bool> {
    let first = blocks.first_mut()?;
    let Block::Paragraph { content } = first else {
        return None;
    };

    let mut prefix = [0u8; 4];
    let mut filled = 0;
    for inline in content.iter() {
        let crate::ast::Inline::Text { text, .. } = inline else {
            return None;
        };
        for byte in text.as_bytes() {
            prefix[filled] = *byte;
            filled += 1;
            if filled == prefix.len() {
                break;
            }
        }
        if filled == prefix.len() {
            break;
        }
    }
    if filled < prefix.len() || prefix[0] != b'[' || prefix[2] != b']' {
        return None;
    }
    if prefix[3] != b' ' && prefix[3] != b'\t' {
        return None;
    }
    let checked = match prefix[1] {
        b' ' => false,
        b'x' | b'X' => true,
        _ => return None,
    };

    let mut remaining = prefix.len();
    let mut idx = 0;
    while idx < content.len() && remaining > 0 {
        let crate::ast::Inline::Text { text, .. } = &mut content[idx] else {
            return None;
        };
        let take = remaining.min(text.len());
        let rest = text[take..].trim_start_matches([' ', '\t']).to_string();
        remaining -= take;
        if rest.is_empty() {
            content.remove(idx);
        } else {
            *text = rest;
            idx += 1;
        }
    }
    Some(checked)
}

// --- indentation and columns -------------------------------------------------

fn advance_column(columns: usize, byte: u8) -> Option<usize> {
    match byte {
        b' ' => Some(columns + 1),
        b'\t' => Some(columns + (4 - (columns % 4))),
        _ => None,
    }
}

/// Byte length of the whitespace prefix spanning at least `required`
/// columns, or `None` if the line is less indented.
fn indent_prefix_len(text: &str, required: usize) -> Option<usize> {
    if required == 0 {
        return Some(0);
    }
    let mut columns = 0;
    for (idx, byte) in text.bytes().enumerate() {
        columns = advance_column(columns, byte)?;
        if columns >= required {
            return Some(idx + 1);
        }
    }
    None
}

/// Consumes up to `columns` columns of leading whitespace. A tab that
/// straddles the boundary contributes its remainder as spaces; the rest of
/// the line (including any further tabs) is returned verbatim.
fn remove_indent(text: &str, columns: usize) -> String {
    let bytes = text.as_bytes();
    let mut col = 0;
    let mut idx = 0;
    let mut remainder = 0;
    while idx < bytes.len() && col < columns {
        match bytes[idx] {
            b' ' => {
                col += 1;
                idx += 1;
            }
            b'\t' => {
                let next = col + (4 - (col % 4));
                idx += 1;
                if next > columns {
                    remainder = next - columns;
                    break;
                }
                col = next;
            }
            _ => break,
        }
    }
    let mut out = String::with_capacity(remainder + text.len() - idx);
    for _ in 0..remainder {
        out.push(' ');
    }
    out.push_str(&text[idx..]);
    out
}

/// `remove_indent` for list-item first lines: the marker's bytes count one
/// column each while locating the content start.
fn remove_marker_indent(text: &str, columns: usize) -> String {
    let bytes = text.as_bytes();
    let mut col = 0;
    let mut idx = 0;
    let mut remainder = 0;
    while idx < bytes.len() && col < columns {
        match bytes[idx] {
            b' ' => {
                col += 1;
                idx += 1;
            }
            b'\t' => {
                let next = col + (4 - (col % 4));
                idx += 1;
                if next > columns {
                    remainder = next - columns;
                    break;
                }
                col = next;
            }
            _ => {
                col += 1;
                idx += 1;
            }
        }
    }
    let mut out = String::with_capacity(remainder + text.len() - idx);
    for _ in 0..remainder {
        out.push(' ');
    }
    out.push_str(&text[idx..]);
    out
}

fn dedent_up_to_three(text: &str) -> String {
    let mut removed = 0;
    for byte in text.bytes() {
        if byte == b' ' && removed < 3 {
            removed += 1;
        } else {
            break;
        }
    }
    text[removed..].to_string()
}

fn truncate_trailing_blanks(buffer: &mut String) {
    while buffer.ends_with(' ') || buffer.ends_with('\t') {
        buffer.pop();
    }
}

/// Strips up to three columns of indentation; `None` when indented four or
/// more (the line belongs to indented code).
fn strip_indent_up_to(text: &str, max_cols: usize) -> Option<&str> {
    let mut cols = 0;
    let mut idx = 0;
    for (pos, byte) in text.bytes().enumerate() {
        match advance_column(cols, byte) {
            Some(next) => {
                cols = next;
                idx = pos + 1;
                if cols > max_cols {
                    return None;
                }
            }
            None => {
                return Some(&text[pos..]);
            }
        }
    }
    Some(&text[idx..])
}

// --- leaf-block scanners -----------------------------------------------------

fn is_thematic_break_line(text: &str) -> bool {
    let trimmed = match strip_indent_up_to(text, 3) {
        Some(value) => value,
        None => return false,
    };
    let mut marker: Option<char> = None;
    let mut count = 0;
    for ch in trimmed.chars() {
        if ch == ' ' || ch == '\t' {
            continue;
        }
        match marker {
            None if matches!(ch, '-' | '*' | '_') => {
                marker = Some(ch);
                count = 1;
            }
            Some(current) if current == ch => count += 1,
            _ => return false,
        }
    }
    count >= 3
}

/// ATX heading: returns the level and the trimmed content with any trailing
/// `#` run removed.
fn scan_atx_heading(text: &str) -> Option<(u8, String)> {
    let trimmed = strip_indent_up_to(text, 3)?;
    let bytes = trimmed.as_bytes();
    let mut level = 0;
    while level < bytes.len() && bytes[level] == b'#' {
        level += 1;
    }
    if level == 0 || level > 6 {
        return None;
    }
    if level < bytes.len() && !matches!(bytes[level], b' ' | b'\t') {
        return None;
    }
    let rest = trimmed[level..].trim_matches([' ', '\t']);
    let content = match rest.rfind(|ch| ch != '#') {
        None => "",
        Some(last) => {
            let head = &rest[..=last];
            if last + 1 < rest.len() && head.ends_with([' ', '\t']) {
                head.trim_end_matches([' ', '\t'])
            } else {
                rest
            }
        }
    };
    Some((level as u8, content.to_string()))
}

fn setext_underline_level(text: &str) -> Option<u8> {
    let trimmed = strip_indent_up_to(text, 3)?;
    let bytes = trimmed.as_bytes();
    let ch = *bytes.first()?;
    if ch != b'=' && ch != b'-' {
        return None;
    }
    let mut i = 0;
    while i < bytes.len() && bytes[i] == ch {
        i += 1;
    }
    if trimmed[i..].bytes().any(|b| b != b' ' && b != b'\t') {
        return None;
    }
    Some(if ch == b'=' { 1 } else { 2 })
}

/// Fence opening: returns (indent columns, fence length, fence char, info).
fn parse_fence_open(text: &str) -> Option<(usize, usize, u8, &str)> {
    let bytes = text.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() && idx < 3 && bytes[idx] == b' ' {
        idx += 1;
    }
    if idx < bytes.len() && bytes[idx] == b' ' {
        return None;
    }
    let rest = &text[idx..];
    let fence_char = match rest.as_bytes().first() {
        Some(b'`') => b'`',
        Some(b'~') => b'~',
        _ => return None,
    };
    let fence_len = rest.bytes().take_while(|b| *b == fence_char).count();
    if fence_len < 3 {
        return None;
    }
    let info = &rest[fence_len..];
    if fence_char == b'`' && info.contains('`') {
        return None;
    }
    Some((idx, fence_len, fence_char, info))
}

fn is_fence_close(text: &str, fence_len: usize, fence_char: u8) -> bool {
    let bytes = text.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() && idx < 3 && bytes[idx] == b' ' {
        idx += 1;
    }
    if idx < bytes.len() && bytes[idx] == b' ' {
        return false;
    }
    let rest = &bytes[idx..];
    let count = rest.iter().take_while(|b| **b == fence_char).count();
    count >= fence_len && rest[count..].iter().all(|b| matches!(b, b' ' | b'\t'))
}

// --- blockquote prefix -------------------------------------------------------

/// Extracts the content of a blockquote line: up to three columns of
/// indent, `>`, and at most one following space (a straddling tab leaves
/// its remainder as spaces).
fn blockquote_extract(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() && idx < 3 && bytes[idx] == b' ' {
        idx += 1;
    }
    if idx < bytes.len() && bytes[idx] == b' ' {
        return None;
    }
    if idx >= bytes.len() || bytes[idx] != b'>' {
        return None;
    }
    let col = idx + 1;
    idx += 1;
    let mut remainder = 0;
    if idx < bytes.len() {
        match bytes[idx] {
            b' ' => idx += 1,
            b'\t' => {
                let span = 4 - (col % 4);
                if span > 1 {
                    remainder = span - 1;
                }
                idx += 1;
            }
            _ => {}
        }
    }
    let mut out = String::with_capacity(remainder + text.len() - idx);
    for _ in 0..remainder {
        out.push(' ');
    }
    out.push_str(&text[idx..]);
    Some(out)
}

// --- list markers ------------------------------------------------------------

struct ListMarker {
    ordered: bool,
    start: u64,
    marker: u8,
    content_indent: usize,
    empty: bool,
}

fn parse_list_marker(text: &str) -> Option<ListMarker> {
    if is_thematic_break_line(text) {
        return None;
    }
    let bytes = text.as_bytes();
    let mut idx = 0;
    let mut indent_cols = 0;
    while idx < bytes.len() && idx < 3 && bytes[idx] == b' ' {
        idx += 1;
        indent_cols += 1;
    }
    if idx < bytes.len() && bytes[idx] == b' ' {
        return None;
    }
    if idx >= bytes.len() {
        return None;
    }

    let ch = bytes[idx];
    if matches!(ch, b'-' | b'+' | b'*') {
        let marker_width = 1;
        let start_col = indent_cols + marker_width;
        let (post_cols, content_cols, has_content) = scan_post_marker(bytes, idx + 1, start_col);
        if post_cols == 0 && has_content {
            return None;
        }
        let content_indent = if !has_content || content_cols == 0 {
            start_col + 1
        } else {
            start_col + content_cols
        };
        return Some(ListMarker {
            ordered: false,
            start: 0,
            marker: ch,
            content_indent,
            empty: !has_content,
        });
    }

    let digit_start = idx;
    while idx < bytes.len() && bytes[idx].is_ascii_digit() {
        idx += 1;
    }
    let digits = idx - digit_start;
    if digits == 0 || digits > 9 || idx >= bytes.len() {
        return None;
    }
    let delimiter = bytes[idx];
    if delimiter != b'.' && delimiter != b')' {
        return None;
    }
    let marker_width = digits + 1;
    let start_col = indent_cols + marker_width;
    let (post_cols, content_cols, has_content) = scan_post_marker(bytes, idx + 1, start_col);
    if post_cols == 0 && has_content {
        return None;
    }
    let content_indent = if !has_content || content_cols == 0 {
        start_col + 1
    } else {
        start_col + content_cols
    };
    let start = text[digit_start..digit_start + digits].parse::<u64>().ok()?;
    Some(ListMarker {
        ordered: true,
        start,
        marker: delimiter,
        content_indent,
        empty: !has_content,
    })
}

/// Measures the whitespace after a list marker: total columns consumed
/// (capped at 5), the content padding (1–4 columns; 0 when the run is 5+
/// and the single-space fallback applies), and whether any content follows.
fn scan_post_marker(bytes: &[u8], start: usize, start_col: usize) -> (usize, usize, bool) {
    let mut idx = start;
    let mut col = start_col;
    let mut tab_remainder = 0;
    while col - start_col < 5 && idx < bytes.len() {
        if tab_remainder > 0 {
            tab_remainder -= 1;
            col += 1;
            if tab_remainder == 0 {
                idx += 1;
            }
            continue;
        }
        match bytes[idx] {
            b' ' => {
                col += 1;
                idx += 1;
            }
            b'\t' => {
                let span = 4 - (col % 4);
                col += 1;
                if span > 1 {
                    tab_remainder = span - 1;
                } else {
                    idx += 1;
                }
            }
            _ => break,
        }
    }
    let consumed = col - start_col;

    let mut has_content = false;
    let mut scan = idx;
    while scan < bytes.len() {
        match bytes[scan] {
            b' ' | b'\t' => scan += 1,
            _ => {
                has_content = true;
                break;
            }
        }
    }

    let content_cols = if (1..=4).contains(&consumed) {
        consumed
    } else {
        0
    };
    (consumed, content_cols, has_content)
}

// --- HTML block classification ----------------------------------------------

#[derive(Clone, Copy, Debug)]
enum HtmlBlockKind {
    Type1(&'static str),
    Type2,
    Type3,
    Type4,
    Type5,
    Type6,
    Type7,
}

const HTML_BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "base", "basefont", "blockquote", "body", "caption", "center",
    "col", "colgroup", "dd", "details", "dialog", "dir", "div", "dl", "dt", "fieldset",
    "figcaption", "figure", "footer", "form", "frame", "frameset", "h1", "h2", "h3", "h4", "h5",
    "h6", "head", "header", "hr", "html", "iframe", "legend", "li", "link", "main", "menu",
    "menuitem", "nav", "noframes", "ol", "optgroup", "option", "p", "param", "search", "section",
    "source", "summary", "table", "tbody", "td", "tfoot", "th", "thead", "title", "tr", "track",
    "ul",
];

struct HtmlTag<'a> {
    name: &'a str,
    after: usize,
    closing: bool,
}

fn parse_html_tag_name(text: &str) -> Option<HtmlTag<'_>> {
    let bytes = text.as_bytes();
    if bytes.first() != Some(&b'<') {
        return None;
    }
    let mut idx = 1;
    let mut closing = false;
    if bytes.get(idx) == Some(&b'/') {
        closing = true;
        idx += 1;
    }
    if idx >= bytes.len() || !bytes[idx].is_ascii_alphabetic() {
        return None;
    }
    let start = idx;
    while idx < bytes.len() && (bytes[idx].is_ascii_alphanumeric() || bytes[idx] == b'-') {
        idx += 1;
    }
    Some(HtmlTag {
        name: &text[start..idx],
        after: idx,
        closing,
    })
}

fn match_html_block_start(text: &str) -> Option<HtmlBlockKind> {
    let trimmed = strip_indent_up_to(text, 3)?;
    if !trimmed.starts_with('<') {
        return None;
    }
    if let Some(tag) = parse_html_tag_name(trimmed) {
        if !tag.closing {
            let boundary = trimmed.as_bytes().get(tag.after);
            let type1_boundary = matches!(boundary, None | Some(b' ') | Some(b'\t') | Some(b'>'));
            if type1_boundary {
                for name in ["pre", "script", "style", "textarea"] {
                    if tag.name.eq_ignore_ascii_case(name) {
                        return Some(HtmlBlockKind::Type1(name));
                    }
                }
            }
        }
    }
    if trimmed.starts_with("<!--") {
        return Some(HtmlBlockKind::Type2);
    }
    if trimmed.starts_with("<?") {
        return Some(HtmlBlockKind::Type3);
    }
    if trimmed.starts_with("<![CDATA[") {
        return Some(HtmlBlockKind::Type5);
    }
    if trimmed.starts_with("<!")
        && trimmed
            .as_bytes()
            .get(2)
            .is_some_and(|b| b.is_ascii_alphabetic())
    {
        return Some(HtmlBlockKind::Type4);
    }
    if let Some(tag) = parse_html_tag_name(trimmed) {
        let boundary = trimmed.as_bytes().get(tag.after);
        let type6_boundary = matches!(boundary, None | Some(b' ') | Some(b'\t') | Some(b'>'))
            || (boundary == Some(&b'/') && trimmed.as_bytes().get(tag.after + 1) == Some(&b'>'));
        if type6_boundary
            && HTML_BLOCK_TAGS
                .iter()
                .any(|name| tag.name.eq_ignore_ascii_case(name))
        {
            return Some(HtmlBlockKind::Type6);
        }
    }
    if match_html_any_tag(trimmed) {
        return Some(HtmlBlockKind::Type7);
    }
    None
}

/// Type 7: a single well-formed open or close tag with nothing but
/// whitespace after it. `pre`/`script`/`style`/`textarea` are excluded.
fn match_html_any_tag(text: &str) -> bool {
    let bytes = text.as_bytes();
    let end = match crate::inline::scan_html_tag(bytes, 0, bytes.len()) {
        Some(end) => end,
        None => return false,
    };
    if let Some(tag) = parse_html_tag_name(text) {
        for name in ["pre", "script", "style", "textarea"] {
            if tag.name.eq_ignore_ascii_case(name) {
                return false;
            }
        }
    }
    bytes[end..].iter().all(|b| matches!(b, b' ' | b'\t'))
}

fn html_block_end(kind: HtmlBlockKind, line: &str) -> bool {
    match kind {
        HtmlBlockKind::Type1(tag) => contains_closing_tag(line, tag),
        HtmlBlockKind::Type2 => line.contains("-->"),
        HtmlBlockKind::Type3 => line.contains("?>"),
        HtmlBlockKind::Type4 => line.contains('>'),
        HtmlBlockKind::Type5 => line.contains("]]>"),
        HtmlBlockKind::Type6 | HtmlBlockKind::Type7 => false,
    }
}

fn contains_closing_tag(line: &str, tag: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    let needle = format!("</{}", tag);
    let mut search = 0;
    while let Some(pos) = lower[search..].find(&needle) {
        let idx = search + pos + needle.len();
        match lower.as_bytes().get(idx) {
            None | Some(b'>') | Some(b' ') | Some(b'\t') => return true,
            _ => search = idx,
        }
    }
    false
}

// --- tables ------------------------------------------------------------------

/// A table line may be indented at most three spaces.
fn table_line_view(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() && idx < 3 && bytes[idx] == b' ' {
        idx += 1;
    }
    if idx < bytes.len() && bytes[idx] == b' ' {
        return None;
    }
    Some(&text[idx..])
}

/// Splits a row on `|`, honoring `\|` escapes and suspending the separator
/// inside backtick runs. A leading/trailing empty cell from an outer pipe
/// is dropped. Returns the trimmed cell texts and whether any unescaped
/// pipe was seen.
fn split_table_cells(text: &str) -> (Vec<String>, bool) {
    let bytes = text.as_bytes();
    let mut cells = Vec::new();
    let mut buf = String::new();
    let mut had_pipe = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' && i + 1 < bytes.len() && bytes[i + 1] == b'|' {
            buf.push_str("\\|");
            i += 2;
            continue;
        }
        if b == b'`' {
            let run = bytes[i..].iter().take_while(|b| **b == b'`').count();
            for _ in 0..run {
                buf.push('`');
            }
            i += run;
            while i < bytes.len() {
                if bytes[i] == b'`' {
                    let close = bytes[i..].iter().take_while(|b| **b == b'`').count();
                    if close == run {
                        for _ in 0..run {
                            buf.push('`');
                        }
                        i += run;
                        break;
                    }
                }
                let ch = text[i..].chars().next().unwrap_or('\u{FFFD}');
                buf.push(ch);
                i += ch.len_utf8();
            }
            continue;
        }
        if b == b'|' {
            had_pipe = true;
            cells.push(buf.trim_matches([' ', '\t']).to_string());
            buf.clear();
            i += 1;
            continue;
        }
        let ch = text[i..].chars().next().unwrap_or('\u{FFFD}');
        buf.push(ch);
        i += ch.len_utf8();
    }
    cells.push(buf.trim_matches([' ', '\t']).to_string());

    if had_pipe && cells.len() > 1 {
        if cells.first().is_some_and(|cell| cell.is_empty()) {
            cells.remove(0);
        }
        if cells.last().is_some_and(|cell| cell.is_empty()) {
            cells.pop();
        }
    }
    (cells, had_pipe)
}

/// A delimiter row: `|`-separated cells matching `:?-+:?`.
fn parse_table_separator(text: &str) -> Option<Vec<TableAlignment>> {
    let (cells, had_pipe) = split_table_cells(text);
    if !had_pipe {
        return None;
    }
    let mut alignments = Vec::with_capacity(cells.len());
    for cell in cells {
        let trimmed = cell.trim();
        if trimmed.is_empty() {
            return None;
        }
        let left = trimmed.starts_with(':');
        let right = trimmed.len() > 1 && trimmed.ends_with(':');
        let core = &trimmed[left as usize..trimmed.len() - (right as usize)];
        if core.is_empty() || !core.bytes().all(|b| b == b'-') {
            return None;
        }
        alignments.push(match (left, right) {
            (true, true) => TableAlignment::Center,
            (true, false) => TableAlignment::Left,
            (false, true) => TableAlignment::Right,
            (false, false) => TableAlignment::None,
        });
    }
    Some(alignments)
}

// --- footnote definitions ----------------------------------------------------

/// Matches `[^label]:` at up to three columns of indent; returns the raw
/// label and the text after the colon.
fn scan_footnote_definition_start(text: &str) -> Option<(String, &str)> {
    let trimmed = strip_indent_up_to(text, 3)?;
    let bytes = trimmed.as_bytes();
    if !trimmed.starts_with("[^") {
        return None;
    }
    let mut i = 2;
    let mut raw = Vec::new();
    loop {
        if i >= bytes.len() {
            return None;
        }
        match bytes[i] {
            b'\\' if i + 1 < bytes.len() && is_label_escape(bytes[i + 1]) => {
                raw.push(bytes[i]);
                raw.push(bytes[i + 1]);
                i += 2;
            }
            b']' => break,
            b => {
                raw.push(b);
                i += 1;
            }
        }
    }
    if raw.is_empty() || raw.len() > 999 {
        return None;
    }
    if bytes.get(i + 1) != Some(&b':') {
        return None;
    }
    let label = String::from_utf8_lossy(&raw).into_owned();
    Some((label, &trimmed[i + 2..]))
}

// --- link reference definitions ----------------------------------------------

/// Parses a `[label]: destination "title"` definition starting at `start`.
/// Returns the normalized label, the definition, and the index of the line
/// after it.
fn parse_link_reference_definition(
    lines: &[Line],
    start: usize,
) -> Option<(String, LinkDefinition, usize)> {
    let first = &lines[start];
    let text = strip_indent_up_to(&first.text, 3)?;
    if !text.starts_with('[') {
        return None;
    }
    let offset = first.text.len() - text.len();
    let (raw_label, label_line, label_end) =
        scan_definition_label(lines, start, offset + 1)?;
    let label = normalize_label(&raw_label);
    if label.is_empty() {
        return None;
    }

    let line_text = &lines[label_line].text;
    let bytes = line_text.as_bytes();
    let mut pos = label_end + 1;
    if bytes.get(pos) != Some(&b':') {
        return None;
    }
    pos += 1;

    let mut line_idx = label_line;
    pos = skip_spaces_tabs(line_text, pos);
    if pos >= line_text.len() {
        line_idx += 1;
        if line_idx >= lines.len() || lines[line_idx].is_blank() || lines[line_idx].lazy {
            return None;
        }
        pos = skip_spaces_tabs(&lines[line_idx].text, 0);
        if pos >= lines[line_idx].text.len() {
            return None;
        }
    }

    let dest_line = &lines[line_idx].text;
    let (url, after_dest) = scan_definition_destination(dest_line, pos)?;
    if url.is_empty() {
        return None;
    }

    let pos = skip_spaces_tabs(dest_line, after_dest);
    if pos < dest_line.len() {
        // A title on the destination line must be space-separated and must
        // end the line; otherwise the whole definition is invalid.
        if pos == after_dest {
            return None;
        }
        let (raw_title, title_line, title_end) = scan_definition_title(lines, line_idx, pos)?;
        let tail = &lines[title_line].text[title_end..];
        if !tail.bytes().all(|b| matches!(b, b' ' | b'\t')) {
            return None;
        }
        let title = Some(unescape_and_decode(&raw_title));
        return Some((label, LinkDefinition { url, title }, title_line + 1));
    }

    // Destination ends its line; a title may follow on the next.
    let peek = line_idx + 1;
    if peek < lines.len() && !lines[peek].is_blank() && !lines[peek].lazy {
        let title_pos = skip_spaces_tabs(&lines[peek].text, 0);
        if title_pos < lines[peek].text.len() {
            if let Some((raw_title, title_line, title_end)) =
                scan_definition_title(lines, peek, title_pos)
            {
                let tail = &lines[title_line].text[title_end..];
                if tail.bytes().all(|b| matches!(b, b' ' | b'\t')) {
                    let title = Some(unescape_and_decode(&raw_title));
                    return Some((label, LinkDefinition { url, title }, title_line + 1));
                }
            }
        }
    }
    Some((label, LinkDefinition { url, title: None }, line_idx + 1))
}

/// Scans a definition label (possibly spanning lines) starting just past
/// `[`. Returns the raw text, the line index holding `]`, and its byte
/// position. An unescaped nested `[` invalidates the label.
fn scan_definition_label(
    lines: &[Line],
    mut line_idx: usize,
    mut pos: usize,
) -> Option<(String, usize, usize)> {
    let mut raw = String::new();
    loop {
        let text = &lines.get(line_idx)?.text;
        let bytes = text.as_bytes();
        while pos < bytes.len() {
            match bytes[pos] {
                b'\\' if pos + 1 < bytes.len() && bytes[pos + 1].is_ascii_punctuation() => {
                    raw.push('\\');
                    raw.push(bytes[pos + 1] as char);
                    pos += 2;
                }
                b'[' => return None,
                b']' => {
                    if raw.len() > 999 {
                        return None;
                    }
                    return Some((raw, line_idx, pos));
                }
                _ => {
                    let ch = text[pos..].chars().next()?;
                    raw.push(ch);
                    pos += ch.len_utf8();
                }
            }
        }
        line_idx += 1;
        let next = lines.get(line_idx)?;
        if next.is_blank() || next.lazy {
            return None;
        }
        raw.push('\n');
        pos = 0;
    }
}

/// Scans a definition destination (angle-bracketed or bare) and returns the
/// decoded URL plus the position after it.
fn scan_definition_destination(text: &str, start: usize) -> Option<(String, usize)> {
    let bytes = text.as_bytes();
    let mut i = start;
    let mut raw = Vec::new();
    if bytes.get(i) == Some(&b'<') {
        i += 1;
        let mut closed = false;
        while i < bytes.len() {
            match bytes[i] {
                b'<' => return None,
                b'>' => {
                    closed = true;
                    i += 1;
                    break;
                }
                b'\\' if i + 1 < bytes.len() && bytes[i + 1].is_ascii_punctuation() => {
                    raw.push(b'\\');
                    raw.push(bytes[i + 1]);
                    i += 2;
                }
                b => {
                    raw.push(b);
                    i += 1;
                }
            }
        }
        if !closed {
            return None;
        }
    } else {
        while i < bytes.len() {
            match bytes[i] {
                b' ' | b'\t' => break,
                b'\\' if i + 1 < bytes.len() && bytes[i + 1].is_ascii_punctuation() => {
                    raw.push(b'\\');
                    raw.push(bytes[i + 1]);
                    i += 2;
                }
                b => {
                    raw.push(b);
                    i += 1;
                }
            }
        }
        if raw.is_empty() {
            return None;
        }
    }
    let raw = String::from_utf8_lossy(&raw).into_owned();
    Some((unescape_and_decode(&raw), i))
}

/// Scans a `"…"`, `'…'`, or `(…)` title which may span lines (but not blank
/// ones). Returns the raw text, the line holding the closing delimiter, and
/// the position after it.
fn scan_definition_title(
    lines: &[Line],
    mut line_idx: usize,
    mut pos: usize,
) -> Option<(String, usize, usize)> {
    let bytes = lines.get(line_idx)?.text.as_bytes();
    let close = match bytes.get(pos)? {
        b'"' => b'"',
        b'\'' => b'\'',
        b'(' => b')',
        _ => return None,
    };
    pos += 1;
    let mut raw = String::new();
    loop {
        let text = &lines.get(line_idx)?.text;
        let bytes = text.as_bytes();
        while pos < bytes.len() {
            match bytes[pos] {
                b'\\' if pos + 1 < bytes.len() && bytes[pos + 1].is_ascii_punctuation() => {
                    raw.push('\\');
                    raw.push(bytes[pos + 1] as char);
                    pos += 2;
                }
                b if b == close => return Some((raw, line_idx, pos + 1)),
                _ => {
                    let ch = text[pos..].chars().next()?;
                    raw.push(ch);
                    pos += ch.len_utf8();
                }
            }
        }
        line_idx += 1;
        let next = lines.get(line_idx)?;
        if next.is_blank() || next.lazy {
            return None;
        }
        raw.push('\n');
        pos = 0;
    }
}

fn skip_spaces_tabs(text: &str, mut pos: usize) -> usize {
    let bytes = text.as_bytes();
    while pos < bytes.len() && matches!(bytes[pos], b' ' | b'\t') {
        pos += 1;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_gfm(source: &str) -> Document {
        parse_document(source, Extensions::all())
    }

    fn parse_plain(source: &str) -> Document {
        parse_document(source, Extensions::none())
    }

    #[test]
    fn atx_heading_strips_trailing_hashes() {
        assert_eq!(scan_atx_heading("## foo ##"), Some((2, "foo".to_string())));
        assert_eq!(scan_atx_heading("# foo#"), Some((1, "foo#".to_string())));
        assert_eq!(scan_atx_heading("#hashtag"), None);
        assert_eq!(scan_atx_heading("####### x"), None);
        assert_eq!(scan_atx_heading("##"), Some((2, String::new())));
    }

    #[test]
    fn remove_indent_handles_straddling_tabs() {
        assert_eq!(remove_indent("\tfoo", 4), "foo");
        assert_eq!(remove_indent("\tfoo", 2), "  foo");
        assert_eq!(remove_indent("  \tbar", 4), "bar");
        assert_eq!(remove_indent(" a", 4), "a");
        // Tabs past the consumed prefix stay literal.
        assert_eq!(remove_indent("    a\tb", 4), "a\tb");
    }

    #[test]
    fn setext_headings_and_thematic_fallback() {
        let doc = parse_plain("title\n===\n\nsub\n---\n");
        assert!(matches!(doc.blocks[0], Block::Heading { level: 1, .. }));
        assert!(matches!(doc.blocks[1], Block::Heading { level: 2, .. }));

        // A paragraph made only of link definitions falls back to a break.
        let doc = parse_plain("[a]: /x\n---\n");
        assert_eq!(doc.blocks, vec![Block::ThematicBreak]);
    }

    #[test]
    fn unterminated_fence_trims_trailing_blanks() {
        let doc = parse_plain("```\ncode\n\n\n");
        assert_eq!(
            doc.blocks,
            vec![Block::CodeBlock {
                info: String::new(),
                literal: "code\n".to_string(),
                fenced: true,
            }]
        );
    }

    #[test]
    fn fence_info_is_unescaped_and_decoded() {
        let doc = parse_plain("``` ru\\&#115;t\nx\n```\n");
        assert_eq!(
            doc.blocks,
            vec![Block::CodeBlock {
                info: "ru&#115;t".to_string(),
                literal: "x\n".to_string(),
                fenced: true,
            }]
        );
    }

    #[test]
    fn indented_code_trims_trailing_blank_lines() {
        let doc = parse_plain("    a\n\n    b\n\n\npara\n");
        assert_eq!(
            doc.blocks[0],
            Block::CodeBlock {
                info: String::new(),
                literal: "a\n\nb\n".to_string(),
                fenced: false,
            }
        );
        assert!(matches!(doc.blocks[1], Block::Paragraph { .. }));
    }

    #[test]
    fn blockquote_lazy_continuation() {
        let doc = parse_plain("> foo\nbar\n");
        let Block::BlockQuote { blocks } = &doc.blocks[0] else {
            panic!("expected blockquote");
        };
        assert_eq!(blocks.len(), 1);
        assert_eq!(doc.blocks.len(), 1);

        // A fence inside the quote stops lazy continuation.
        let doc = parse_plain("> ```\nnot code\n");
        assert_eq!(doc.blocks.len(), 2);
    }

    #[test]
    fn list_tightness() {
        let doc = parse_gfm("- a\n- b\n");
        let Block::List(list) = &doc.blocks[0] else {
            panic!("expected list");
        };
        assert!(list.tight);
        assert_eq!(list.items.len(), 2);

        let doc = parse_gfm("- a\n\n- b\n");
        let Block::List(list) = &doc.blocks[0] else {
            panic!("expected list");
        };
        assert!(!list.tight);
    }

    #[test]
    fn ordered_list_start_and_marker_change() {
        let doc = parse_gfm("3. a\n4. b\n1) c\n");
        let Block::List(first) = &doc.blocks[0] else {
            panic!("expected list");
        };
        assert!(first.ordered);
        assert_eq!(first.start, 3);
        assert_eq!(first.items.len(), 2);
        let Block::List(second) = &doc.blocks[1] else {
            panic!("expected second list");
        };
        assert_eq!(second.marker, b')');
    }

    #[test]
    fn ordered_list_interrupts_paragraph_only_at_one() {
        let doc = parse_gfm("text\n2. no\n");
        assert_eq!(doc.blocks.len(), 1);
        let doc = parse_gfm("text\n1. yes\n");
        assert_eq!(doc.blocks.len(), 2);
    }

    #[test]
    fn task_markers_are_stripped() {
        let doc = parse_gfm("- [x] done\n- [ ] todo\n- plain\n");
        let Block::List(list) = &doc.blocks[0] else {
            panic!("expected list");
        };
        assert_eq!(list.items[0].checked, Some(true));
        assert_eq!(list.items[1].checked, Some(false));
        assert_eq!(list.items[2].checked, None);
        let Block::Paragraph { content } = &list.items[0].blocks[0] else {
            panic!("expected paragraph");
        };
        assert_eq!(content, &vec![crate::ast::Inline::plain("done")]);
    }

    #[test]
    fn table_requires_matching_delimiter() {
        let doc = parse_gfm("| a | b |\n|---|:-:|\n| 1 | 2 |\n");
        let Block::Table(table) = &doc.blocks[0] else {
            panic!("expected table");
        };
        assert_eq!(
            table.alignments,
            vec![TableAlignment::None, TableAlignment::Center]
        );
        assert_eq!(table.rows.len(), 2);
        assert!(table.rows[0].header);

        // Mismatched column count keeps the line as paragraph text.
        let doc = parse_gfm("| a | b |\n|---|\n");
        assert!(matches!(doc.blocks[0], Block::Paragraph { .. }));
    }

    #[test]
    fn table_interrupts_paragraph_and_flushes_prefix() {
        let doc = parse_gfm("before\n| a |\n| --- |\n| 1 |\n");
        assert!(matches!(doc.blocks[0], Block::Paragraph { .. }));
        let Block::Table(table) = &doc.blocks[1] else {
            panic!("expected table");
        };
        assert_eq!(table.rows.len(), 2);
    }

    #[test]
    fn table_cells_pad_and_truncate() {
        let doc = parse_gfm("| a | b |\n|---|---|\n| 1 |\n| 1 | 2 | 3 |\n");
        let Block::Table(table) = &doc.blocks[0] else {
            panic!("expected table");
        };
        assert_eq!(table.rows[1].cells.len(), 2);
        assert_eq!(table.rows[2].cells.len(), 2);
    }

    #[test]
    fn tables_disabled_without_extension() {
        let doc = parse_plain("| a | b |\n|---|---|\n");
        assert!(matches!(doc.blocks[0], Block::Paragraph { .. }));
    }

    #[test]
    fn link_reference_definition_first_wins() {
        let doc = parse_plain("[foo]: /one\n[foo]: /two\n\n[foo]\n");
        let Block::Paragraph { content } = &doc.blocks[0] else {
            panic!("expected paragraph");
        };
        assert!(content.iter().any(|inline| matches!(
            inline,
            crate::ast::Inline::Link { url, .. } if url == "/one"
        )));
    }

    #[test]
    fn definition_title_on_next_line() {
        let doc = parse_plain("[foo]: /url\n\"title\"\n\n[foo]\n");
        let Block::Paragraph { content } = &doc.blocks[0] else {
            panic!("expected paragraph");
        };
        assert!(content.iter().any(|inline| matches!(
            inline,
            crate::ast::Inline::Link { url, title: Some(t), .. }
                if url == "/url" && t == "title"
        )));
    }

    #[test]
    fn definition_bad_title_is_rejected() {
        // Junk after the title invalidates the whole definition.
        let doc = parse_plain("[foo]: /url \"title\" junk\n");
        assert!(matches!(doc.blocks[0], Block::Paragraph { .. }));
    }

    #[test]
    fn footnote_definitions_collect_blocks() {
        let doc = parse_gfm("A note.[^x]\n\n[^x]: first line\n    second paragraph\n");
        assert_eq!(doc.footnotes.len(), 1);
        let def = &doc.footnotes["x"];
        assert_eq!(def.label, "x");
        assert_eq!(def.blocks.len(), 1);
    }

    #[test]
    fn footnote_blank_needs_indented_follower() {
        let doc = parse_gfm("[^x]: one\n\n    two\n\n[^x]\n");
        let def = &doc.footnotes["x"];
        assert_eq!(def.blocks.len(), 2);

        let doc = parse_gfm("[^y]: one\n\nplain\n\n[^y]\n");
        assert_eq!(doc.footnotes["y"].blocks.len(), 1);
        assert!(doc
            .blocks
            .iter()
            .any(|block| matches!(block, Block::Paragraph { .. })));
    }

    #[test]
    fn html_block_types() {
        let doc = parse_plain("<div>\nx\n</div>\n\n<!-- c -->\npara\n");
        assert!(matches!(&doc.blocks[0], Block::HtmlBlock { raw } if raw == "<div>\nx\n</div>\n"));
        // A type 2 block can close on its opening line.
        assert!(matches!(&doc.blocks[1], Block::HtmlBlock { raw } if raw == "<!-- c -->\n"));
        assert!(matches!(doc.blocks[2], Block::Paragraph { .. }));

        // Type 7 must not interrupt a paragraph.
        let doc = parse_plain("text\n<custom>\n");
        assert_eq!(doc.blocks.len(), 1);
    }

    #[test]
    fn crlf_and_cr_normalize() {
        let unix = parse_gfm("# a\n\nb\n");
        let dos = parse_gfm("# a\r\n\r\nb\r\n");
        let mac = parse_gfm("# a\r\rb\r");
        assert_eq!(unix, dos);
        assert_eq!(unix, mac);
    }
}
