//! Inline phase: a single left-to-right scan over a block's raw content,
//! maintaining a delimiter side array and a bracket stack, followed by
//! emphasis resolution, strikethrough resolution, and the extended-autolink
//! rewrite. Reference lookups hit the side tables collected by the block
//! phase.

use crate::ast::{Inline, InlineSeq, LinkDefinition};
use crate::entities::{decode_entity, unescape_and_decode};
use crate::label::normalize_label;
use crate::Extensions;
use std::collections::HashMap;

pub(crate) struct InlineParser<'a> {
    pub(crate) extensions: Extensions,
    pub(crate) link_defs: &'a HashMap<String, LinkDefinition>,
    /// Normalized footnote key to the definition's original spelling.
    pub(crate) footnote_labels: &'a HashMap<String, String>,
}

#[derive(Clone, Debug)]
struct Delimiter {
    ch: u8,
    len: usize,
    /// Length of the run as scanned; the mod-3 emphasis rule and flanking
    /// both refer to the original run even after partial consumption.
    orig_len: usize,
    node: usize,
    can_open: bool,
    can_close: bool,
    orig_can_open: bool,
    orig_can_close: bool,
}

#[derive(Clone, Debug)]
struct Bracket {
    node: usize,
    /// Byte position just past `[` (or `![`) in the buffer.
    text_pos: usize,
    image: bool,
    active: bool,
}

impl<'a> InlineParser<'a> {
    pub(crate) fn parse(&self, buffer: &str) -> InlineSeq {
        let bytes = buffer.as_bytes();
        let end = bytes.len();
        let mut out: InlineSeq = Vec::new();
        let mut delims: Vec<Delimiter> = Vec::new();
        let mut brackets: Vec<Bracket> = Vec::new();
        let mut text_buf: Vec<u8> = Vec::new();
        let mut i = 0;

        while i < end {
            let b = bytes[i];
            match b {
                b'\\' => {
                    if i + 1 < end && bytes[i + 1] == b'\n' {
                        trim_trailing_blanks(&mut text_buf);
                        flush_text(&mut out, &mut text_buf);
                        out.push(Inline::HardBreak);
                        i += 2;
                        i = skip_spaces_tabs(bytes, i, end);
                        continue;
                    }
                    if i + 1 < end && bytes[i + 1].is_ascii_punctuation() {
                        let next = bytes[i + 1];
                        let no_delim = next == b'*' || next == b'_';
                        let no_smart = matches!(next, b'"' | b'\'' | b'-' | b'.');
                        if no_delim || no_smart {
                            flush_text(&mut out, &mut text_buf);
                            out.push(Inline::Text {
                                text: (next as char).to_string(),
                                no_delim,
                                no_smart,
                            });
                        } else {
                            text_buf.push(next);
                        }
                        i += 2;
                        continue;
                    }
                    text_buf.push(b'\\');
                    i += 1;
                }
                b'`' => {
                    if let Some((inline, next)) = parse_code_span(buffer, i, end) {
                        flush_text(&mut out, &mut text_buf);
                        out.push(inline);
                        i = next;
                    } else {
                        let run = count_run(bytes, i, end, b'`');
                        text_buf.extend(std::iter::repeat(b'`').take(run));
                        i += run;
                    }
                }
                b'<' => {
                    if let Some((inline, next)) = parse_angle_autolink(buffer, i, end) {
                        flush_text(&mut out, &mut text_buf);
                        out.push(inline);
                        i = next;
                    } else if let Some((inline, next)) = parse_html_span(buffer, i, end) {
                        flush_text(&mut out, &mut text_buf);
                        out.push(inline);
                        i = next;
                    } else {
                        text_buf.push(b'<');
                        i += 1;
                    }
                }
                b'&' => {
                    if let Some((decoded, next)) = decode_entity(bytes, i, end) {
                        text_buf.extend_from_slice(decoded.as_bytes());
                        i = next;
                    } else {
                        text_buf.push(b'&');
                        i += 1;
                    }
                }
                b'\n' => {
                    let trailing_spaces = text_buf
                        .iter()
                        .rev()
                        .take_while(|byte| **byte == b' ')
                        .count();
                    trim_trailing_blanks(&mut text_buf);
                    flush_text(&mut out, &mut text_buf);
                    out.push(if trailing_spaces >= 2 {
                        Inline::HardBreak
                    } else {
                        Inline::SoftBreak
                    });
                    i += 1;
                    i = skip_spaces_tabs(bytes, i, end);
                }
                b'*' | b'_' => {
                    let run = count_run(bytes, i, end, b);
                    let (can_open, can_close) = delimiter_properties(buffer, i, run, b);
                    flush_text(&mut out, &mut text_buf);
                    out.push(Inline::plain(
                        std::iter::repeat(b as char).take(run).collect::<String>(),
                    ));
                    if can_open || can_close {
                        delims.push(Delimiter {
                            ch: b,
                            len: run,
                            orig_len: run,
                            node: out.len() - 1,
                            can_open,
                            can_close,
                            orig_can_open: can_open,
                            orig_can_close: can_close,
                        });
                    }
                    i += run;
                }
                b'~' => {
                    let run = count_run(bytes, i, end, b'~');
                    if !self.extensions.strikethrough || run > 2 {
                        text_buf.extend(std::iter::repeat(b'~').take(run));
                        i += run;
                        continue;
                    }
                    let can_open = next_char(buffer, i + run).is_some_and(|c| !c.is_whitespace());
                    let can_close = prev_char(buffer, i).is_some_and(|c| !c.is_whitespace());
                    flush_text(&mut out, &mut text_buf);
                    out.push(Inline::plain(
                        std::iter::repeat('~').take(run).collect::<String>(),
                    ));
                    if can_open || can_close {
                        delims.push(Delimiter {
                            ch: b'~',
                            len: run,
                            orig_len: run,
                            node: out.len() - 1,
                            can_open,
                            can_close,
                            orig_can_open: can_open,
                            orig_can_close: can_close,
                        });
                    }
                    i += run;
                }
                b'!' => {
                    let image_open = i + 1 < end
                        && bytes[i + 1] == b'['
                        && !(self.extensions.footnotes && i + 2 < end && bytes[i + 2] == b'^');
                    if image_open {
                        flush_text(&mut out, &mut text_buf);
                        out.push(Inline::plain("!["));
                        brackets.push(Bracket {
                            node: out.len() - 1,
                            text_pos: i + 2,
                            image: true,
                            active: true,
                        });
                        i += 2;
                    } else {
                        text_buf.push(b'!');
                        i += 1;
                    }
                }
                b'[' => {
                    if self.extensions.footnotes && i + 1 < end && bytes[i + 1] == b'^' {
                        if let Some((inline, next)) = self.parse_footnote_ref(bytes, i, end) {
                            flush_text(&mut out, &mut text_buf);
                            out.push(inline);
                            i = next;
                            continue;
                        }
                    }
                    flush_text(&mut out, &mut text_buf);
                    out.push(Inline::plain("["));
                    brackets.push(Bracket {
                        node: out.len() - 1,
                        text_pos: i + 1,
                        image: false,
                        active: true,
                    });
                    i += 1;
                }
                b']' => {
                    flush_text(&mut out, &mut text_buf);
                    if let Some(next) =
                        self.try_close_bracket(buffer, i, &mut out, &mut delims, &mut brackets)
                    {
                        i = next;
                    } else {
                        text_buf.push(b']');
                        i += 1;
                    }
                }
                _ => {
                    text_buf.push(b);
                    i += 1;
                }
            }
        }

        flush_text(&mut out, &mut text_buf);
        resolve_delimiters(&mut out, &mut delims);
        if self.extensions.autolink {
            apply_extended_autolinks(&mut out);
        }
        out
    }

    fn parse_footnote_ref(&self, bytes: &[u8], start: usize, end: usize) -> Option<(Inline, usize)> {
        let (raw, close) = scan_footnote_label(bytes, start, end)?;
        let key = normalize_label(&raw);
        let label = self.footnote_labels.get(&key)?.clone();
        Some((Inline::FootnoteRef { label, key }, close + 1))
    }

    fn try_close_bracket(
        &self,
        buffer: &str,
        current: usize,
        out: &mut InlineSeq,
        delims: &mut Vec<Delimiter>,
        brackets: &mut Vec<Bracket>,
    ) -> Option<usize> {
        let opener = brackets.pop()?;
        if !opener.active {
            return None;
        }
        let bytes = buffer.as_bytes();
        let end = bytes.len();
        let interior_text = &buffer[opener.text_pos..current];

        enum Matched {
            Inline {
                url: String,
                title: Option<String>,
            },
            Reference(LinkDefinition),
        }

        let (matched, consumed) = if let Some((url, title, close)) =
            parse_inline_link(buffer, current + 1, end)
        {
            (Matched::Inline { url, title }, close + 1)
        } else if current + 1 < end && bytes[current + 1] == b'[' {
            let label_end = scan_link_label(bytes, current + 2, end);
            match label_end {
                Some(label_end) => {
                    let raw_label = &buffer[current + 2..label_end];
                    let lookup = if raw_label.is_empty() {
                        // Collapsed reference: the interior is the label.
                        interior_text
                    } else {
                        raw_label
                    };
                    let key = normalize_label(lookup);
                    match self.link_defs.get(&key) {
                        Some(def) if !key.is_empty() => {
                            (Matched::Reference(def.clone()), label_end + 1)
                        }
                        _ => return None,
                    }
                }
                None => {
                    let key = normalize_label(interior_text);
                    match self.link_defs.get(&key) {
                        Some(def) if !key.is_empty() => {
                            (Matched::Reference(def.clone()), current + 1)
                        }
                        _ => return None,
                    }
                }
            }
        } else {
            let key = normalize_label(interior_text);
            match self.link_defs.get(&key) {
                Some(def) if !key.is_empty() => (Matched::Reference(def.clone()), current + 1),
                _ => return None,
            }
        };

        // Detach the interior and resolve its emphasis before wrapping.
        let mut children = out.split_off(opener.node + 1);
        out.pop();
        let mut child_delims: Vec<Delimiter> = Vec::new();
        delims.retain(|delim| {
            if delim.node > opener.node {
                let mut shifted = delim.clone();
                shifted.node -= opener.node + 1;
                child_delims.push(shifted);
                false
            } else {
                true
            }
        });
        resolve_delimiters(&mut children, &mut child_delims);

        let (url, title) = match matched {
            Matched::Inline { url, title } => (url, title),
            Matched::Reference(def) => (def.url, def.title),
        };
        if opener.image {
            let alt = flatten_plain_text(&children);
            out.push(Inline::Image { url, title, alt });
        } else {
            out.push(Inline::Link {
                url,
                title,
                children,
            });
            // Links do not nest: deactivate enclosing link openers.
            for entry in brackets.iter_mut() {
                if !entry.image {
                    entry.active = false;
                }
            }
        }
        Some(consumed)
    }
}

fn flush_text(out: &mut InlineSeq, text_buf: &mut Vec<u8>) {
    if text_buf.is_empty() {
        return;
    }
    let bytes = std::mem::take(text_buf);
    let text = match String::from_utf8(bytes) {
        Ok(value) => value,
        Err(err) => String::from_utf8_lossy(&err.into_bytes()).into_owned(),
    };
    out.push(Inline::plain(text));
}

fn trim_trailing_blanks(text_buf: &mut Vec<u8>) {
    while matches!(text_buf.last(), Some(b' ') | Some(b'\t')) {
        text_buf.pop();
    }
}

fn skip_spaces_tabs(bytes: &[u8], mut i: usize, end: usize) -> usize {
    while i < end && (bytes[i] == b' ' || bytes[i] == b'\t') {
        i += 1;
    }
    i
}

fn count_run(bytes: &[u8], start: usize, end: usize, needle: u8) -> usize {
    let mut i = start;
    while i < end && bytes[i] == needle {
        i += 1;
    }
    i - start
}

fn prev_char(buffer: &str, pos: usize) -> Option<char> {
    buffer[..pos].chars().next_back()
}

fn next_char(buffer: &str, pos: usize) -> Option<char> {
    buffer[pos..].chars().next()
}

/// CommonMark flanking rules for an emphasis delimiter run.
fn delimiter_properties(buffer: &str, pos: usize, run_len: usize, delim: u8) -> (bool, bool) {
    let before = prev_char(buffer, pos);
    let after = next_char(buffer, pos + run_len);

    let before_ws = before.map_or(true, |ch| ch.is_whitespace());
    let after_ws = after.map_or(true, |ch| ch.is_whitespace());
    let before_punct = before.is_some_and(is_punctuation_char);
    let after_punct = after.is_some_and(is_punctuation_char);

    let left_flanking = !after_ws && (!after_punct || before_ws || before_punct);
    let right_flanking = !before_ws && (!before_punct || after_ws || after_punct);

    if delim == b'_' {
        (
            left_flanking && (!right_flanking || before_punct),
            right_flanking && (!left_flanking || after_punct),
        )
    } else {
        (left_flanking, right_flanking)
    }
}

// Approximates the Unicode punctuation-or-symbol classes the flanking rules
// reference.
fn is_punctuation_char(ch: char) -> bool {
    !ch.is_whitespace() && !ch.is_alphanumeric()
}

/// Resolves emphasis, strong, and strikethrough over the node sequence.
/// Closers are taken in document order; the matching rule depends on the
/// delimiter character. The closer scan restarts from the beginning of the
/// delimiter array after every successful match; this quadratic behavior is
/// intentional and observable.
fn resolve_delimiters(out: &mut InlineSeq, delims: &mut Vec<Delimiter>) {
    loop {
        let closer_index = delims.iter().position(|d| d.can_close);
        let closer_index = match closer_index {
            Some(idx) => idx,
            None => break,
        };
        let closer = delims[closer_index].clone();

        let mut opener_index = None;
        let mut use_len = 1;
        for idx in (0..closer_index).rev() {
            let opener = &delims[idx];
            if opener.ch != closer.ch || !opener.can_open {
                continue;
            }
            if closer.ch == b'~' {
                // Strikethrough pairs only runs of equal length.
                if opener.len != closer.len {
                    continue;
                }
                use_len = opener.len;
            } else {
                if mod_three_blocked(opener, &closer) {
                    continue;
                }
                use_len = if opener.len >= 2 && closer.len >= 2 { 2 } else { 1 };
            }
            opener_index = Some(idx);
            break;
        }

        match opener_index {
            Some(opener_index) => {
                apply_emphasis(out, delims, opener_index, closer_index, use_len);
            }
            None => {
                delims[closer_index].can_close = false;
            }
        }
    }
}

/// The CommonMark "multiple of 3" restriction, stated over original run
/// lengths: when either run could both open and close, a combined length
/// divisible by 3 blocks the pair unless both runs are divisible by 3.
fn mod_three_blocked(opener: &Delimiter, closer: &Delimiter) -> bool {
    let opener_both = opener.orig_can_open && opener.orig_can_close;
    let closer_both = closer.orig_can_open && closer.orig_can_close;
    if !opener_both && !closer_both {
        return false;
    }
    if (opener.orig_len + closer.orig_len) % 3 != 0 {
        return false;
    }
    opener.orig_len % 3 != 0 || closer.orig_len % 3 != 0
}

fn apply_emphasis(
    out: &mut InlineSeq,
    delims: &mut Vec<Delimiter>,
    opener_index: usize,
    closer_index: usize,
    use_len: usize,
) {
    let opener = delims[opener_index].clone();
    let closer = delims[closer_index].clone();
    if opener.node >= closer.node {
        delims.remove(closer_index);
        return;
    }

    let removed_len = closer.node + 1 - opener.node;
    let removed: Vec<Inline> = out.drain(opener.node..=closer.node).collect();
    let mut iter = removed.into_iter();
    let _opener_node = iter.next();
    let _closer_node = iter.next_back();
    let children: Vec<Inline> = iter.collect();

    let opener_remain = opener.len - use_len;
    let closer_remain = closer.len - use_len;
    let mut replacement = Vec::new();
    if opener_remain > 0 {
        replacement.push(Inline::plain(
            std::iter::repeat(opener.ch as char)
                .take(opener_remain)
                .collect::<String>(),
        ));
    }
    let emph_index = opener.node + replacement.len();
    replacement.push(if opener.ch == b'~' {
        Inline::Strikethrough(children)
    } else if use_len == 2 {
        Inline::Strong(children)
    } else {
        Inline::Emph(children)
    });
    if closer_remain > 0 {
        replacement.push(Inline::plain(
            std::iter::repeat(closer.ch as char)
                .take(closer_remain)
                .collect::<String>(),
        ));
    }

    let replacement_len = replacement.len();
    out.splice(opener.node..opener.node, replacement);

    // Rebuild the delimiter array: interior runs are consumed, later runs
    // shift by the node-count difference, partially consumed runs survive.
    let mut updated = Vec::with_capacity(delims.len());
    for (idx, delim) in delims.iter().enumerate() {
        if idx == opener_index || idx == closer_index {
            continue;
        }
        if delim.node < opener.node {
            updated.push(delim.clone());
        } else if delim.node > closer.node {
            let mut shifted = delim.clone();
            shifted.node = shifted.node + replacement_len - removed_len;
            updated.push(shifted);
        }
    }
    if opener_remain > 0 {
        let mut remaining = opener.clone();
        remaining.len = opener_remain;
        remaining.node = emph_index - 1;
        updated.push(remaining);
    }
    if closer_remain > 0 {
        let mut remaining = closer.clone();
        remaining.len = closer_remain;
        remaining.node = emph_index + 1;
        updated.push(remaining);
    }
    updated.sort_by_key(|delim| delim.node);
    *delims = updated;
}

fn parse_code_span(buffer: &str, start: usize, end: usize) -> Option<(Inline, usize)> {
    let bytes = buffer.as_bytes();
    let open_len = count_run(bytes, start, end, b'`');
    let mut i = start + open_len;
    while i < end {
        if bytes[i] == b'`' {
            let close_len = count_run(bytes, i, end, b'`');
            if close_len == open_len {
                let mut content = buffer[start + open_len..i].replace('\n', " ");
                if content.len() >= 2
                    && content.starts_with(' ')
                    && content.ends_with(' ')
                    && content.bytes().any(|b| b != b' ')
                {
                    content = content[1..content.len() - 1].to_string();
                }
                return Some((Inline::Code(content), i + close_len));
            }
            i += close_len;
        } else {
            i += 1;
        }
    }
    None
}

fn parse_angle_autolink(buffer: &str, start: usize, end: usize) -> Option<(Inline, usize)> {
    let bytes = buffer.as_bytes();
    let mut i = start + 1;
    while i < end {
        let b = bytes[i];
        if b == b'>' {
            break;
        }
        if b == b'<' || b.is_ascii_whitespace() {
            return None;
        }
        i += 1;
    }
    if i >= end || bytes[i] != b'>' {
        return None;
    }
    let inner = &buffer[start + 1..i];
    let url = if is_uri_autolink(inner) {
        inner.to_string()
    } else if is_email_address(inner) {
        format!("mailto:{}", inner)
    } else {
        return None;
    };
    Some((
        Inline::Link {
            url,
            title: None,
            children: vec![Inline::plain(inner)],
        },
        i + 1,
    ))
}

/// `scheme:rest` with a 2–32 character scheme and no whitespace.
fn is_uri_autolink(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.is_empty() || !bytes[0].is_ascii_alphabetic() {
        return false;
    }
    for (idx, b) in bytes.iter().enumerate() {
        if *b == b':' {
            return (2..=32).contains(&idx);
        }
        if !(b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'.')) {
            return false;
        }
    }
    false
}

/// The CommonMark email autolink production (an RFC 5322 subset).
fn is_email_address(value: &str) -> bool {
    let (local, domain) = match value.split_once('@') {
        Some(pair) => pair,
        None => return false,
    };
    if local.is_empty()
        || !local.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'.' | b'!'
                        | b'#'
                        | b'$'
                        | b'%'
                        | b'&'
                        | b'\''
                        | b'*'
                        | b'+'
                        | b'/'
                        | b'='
                        | b'?'
                        | b'^'
                        | b'_'
                        | b'`'
                        | b'{'
                        | b'|'
                        | b'}'
                        | b'~'
                        | b'-'
                )
        })
    {
        return false;
    }
    if domain.is_empty() || domain.contains('@') {
        return false;
    }
    domain.split('.').all(|segment| {
        !segment.is_empty()
            && segment.len() <= 63
            && segment
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-')
            && !segment.starts_with('-')
            && !segment.ends_with('-')
    })
}

fn parse_html_span(buffer: &str, start: usize, end: usize) -> Option<(Inline, usize)> {
    let bytes = buffer.as_bytes();
    if start + 1 >= end {
        return None;
    }
    let html = |to: usize| Some((Inline::Html(buffer[start..to].to_string()), to));
    match bytes[start + 1] {
        b'!' => {
            if buffer[start..].starts_with("<!--") {
                // Degenerate comments first: <!--> and <!--->.
                if buffer[start + 4..].starts_with('>') {
                    return html(start + 5);
                }
                if buffer[start + 4..].starts_with("->") {
                    return html(start + 6);
                }
                let mut i = start + 4;
                while i + 2 < end {
                    if &bytes[i..i + 3] == b"-->" {
                        return html(i + 3);
                    }
                    i += 1;
                }
                return None;
            }
            if buffer[start..].starts_with("<![CDATA[") {
                let mut i = start + 9;
                while i + 2 < end {
                    if &bytes[i..i + 3] == b"]]>" {
                        return html(i + 3);
                    }
                    i += 1;
                }
                return None;
            }
            if start + 2 < end && bytes[start + 2].is_ascii_alphabetic() {
                let mut i = start + 2;
                while i < end {
                    if bytes[i] == b'>' {
                        return html(i + 1);
                    }
                    i += 1;
                }
            }
            None
        }
        b'?' => {
            let mut i = start + 2;
            while i + 1 < end {
                if bytes[i] == b'?' && bytes[i + 1] == b'>' {
                    return html(i + 2);
                }
                i += 1;
            }
            None
        }
        _ => {
            let tag_end = scan_html_tag(bytes, start, end)?;
            html(tag_end)
        }
    }
}

/// Scans a well-formed open or close tag starting at `<`; returns the index
/// just past `>`.
pub(crate) fn scan_html_tag(bytes: &[u8], start: usize, end: usize) -> Option<usize> {
    let mut i = start + 1;
    let mut closing = false;
    if i < end && bytes[i] == b'/' {
        closing = true;
        i += 1;
    }
    if i >= end || !bytes[i].is_ascii_alphabetic() {
        return None;
    }
    while i < end && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'-') {
        i += 1;
    }
    if closing {
        while i < end && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        return if i < end && bytes[i] == b'>' {
            Some(i + 1)
        } else {
            None
        };
    }
    loop {
        let before_ws = i;
        while i < end && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= end {
            return None;
        }
        if bytes[i] == b'>' {
            return Some(i + 1);
        }
        if bytes[i] == b'/' && i + 1 < end && bytes[i + 1] == b'>' {
            return Some(i + 2);
        }
        // Attributes must be separated from the tag name by whitespace.
        if before_ws == i || !is_attr_name_start(bytes[i]) {
            return None;
        }
        i += 1;
        while i < end && is_attr_name_continue(bytes[i]) {
            i += 1;
        }
        let mut ws = i;
        while ws < end && bytes[ws].is_ascii_whitespace() {
            ws += 1;
        }
        if ws < end && bytes[ws] == b'=' {
            i = ws + 1;
            while i < end && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if i >= end {
                return None;
            }
            match bytes[i] {
                quote @ (b'"' | b'\'') => {
                    i += 1;
                    while i < end && bytes[i] != quote {
                        i += 1;
                    }
                    if i >= end {
                        return None;
                    }
                    i += 1;
                }
                _ => {
                    let mut consumed = false;
                    while i < end {
                        let b = bytes[i];
                        if b.is_ascii_whitespace() || b == b'>' {
                            break;
                        }
                        if b == b'/' && i + 1 < end && bytes[i + 1] == b'>' {
                            break;
                        }
                        if matches!(b, b'"' | b'\'' | b'=' | b'<' | b'`') {
                            return None;
                        }
                        consumed = true;
                        i += 1;
                    }
                    if !consumed {
                        return None;
                    }
                }
            }
        }
    }
}

fn is_attr_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b':'
}

fn is_attr_name_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b':' | b'.' | b'-')
}

/// Finds the `]` closing a link label scan begun just past `[`. Honors
/// backslash escapes; an unescaped nested `[` invalidates the label.
fn scan_link_label(bytes: &[u8], start: usize, end: usize) -> Option<usize> {
    let mut i = start;
    while i < end && i - start <= 999 {
        match bytes[i] {
            b'\\' if i + 1 < end && bytes[i + 1].is_ascii_punctuation() => i += 2,
            b'[' => return None,
            b']' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// Scans `[^label]` starting at the `[`; returns the raw label text and the
/// index of the closing `]`.
fn scan_footnote_label(bytes: &[u8], start: usize, end: usize) -> Option<(String, usize)> {
    if start + 1 >= end || bytes[start] != b'[' || bytes[start + 1] != b'^' {
        return None;
    }
    let mut i = start + 2;
    let mut raw = Vec::new();
    while i < end {
        match bytes[i] {
            b'\\' if i + 1 < end && crate::label::is_label_escape(bytes[i + 1]) => {
                raw.push(bytes[i]);
                raw.push(bytes[i + 1]);
                i += 2;
            }
            b']' => {
                if raw.is_empty() || raw.len() > 999 {
                    return None;
                }
                let text = String::from_utf8_lossy(&raw).into_owned();
                return Some((text, i));
            }
            b'\n' => return None,
            b => {
                raw.push(b);
                i += 1;
            }
        }
    }
    None
}

/// Parses `(destination "title")` after a bracket close. Returns the
/// decoded destination, optional title, and the index of `)`.
fn parse_inline_link(buffer: &str, start: usize, end: usize) -> Option<(String, Option<String>, usize)> {
    let bytes = buffer.as_bytes();
    let mut i = start;
    if i >= end || bytes[i] != b'(' {
        return None;
    }
    i += 1;
    while i < end && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    if i >= end {
        return None;
    }

    let mut url_bytes = Vec::new();
    if bytes[i] == b'<' {
        i += 1;
        let mut closed = false;
        while i < end {
            let b = bytes[i];
            if b == b'\n' || b == b'<' {
                return None;
            }
            if b == b'\\' && i + 1 < end && bytes[i + 1].is_ascii_punctuation() {
                url_bytes.push(b'\\');
                url_bytes.push(bytes[i + 1]);
                i += 2;
                continue;
            }
            if b == b'>' {
                closed = true;
                i += 1;
                break;
            }
            url_bytes.push(b);
            i += 1;
        }
        if !closed {
            return None;
        }
    } else {
        let mut depth = 0usize;
        while i < end {
            let b = bytes[i];
            if b.is_ascii_whitespace() {
                break;
            }
            if b == b'\\' && i + 1 < end && bytes[i + 1].is_ascii_punctuation() {
                url_bytes.push(b'\\');
                url_bytes.push(bytes[i + 1]);
                i += 2;
                continue;
            }
            if b == b'(' {
                depth += 1;
            }
            if b == b')' {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            url_bytes.push(b);
            i += 1;
        }
        if depth > 0 {
            return None;
        }
    }
    let raw_url = String::from_utf8_lossy(&url_bytes).into_owned();
    let url = unescape_and_decode(&raw_url);

    let mut had_space = false;
    while i < end && bytes[i].is_ascii_whitespace() {
        had_space = true;
        i += 1;
    }
    if i >= end {
        return None;
    }
    if bytes[i] == b')' {
        return Some((url, None, i));
    }
    if !had_space {
        return None;
    }
    let (raw_title, next) = scan_link_title(bytes, i, end)?;
    let title = unescape_and_decode(&raw_title);
    i = next;
    while i < end && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    if i < end && bytes[i] == b')' {
        Some((url, Some(title), i))
    } else {
        None
    }
}

/// Scans a `"…"`, `'…'`, or `(…)` title. Titles may span lines but not
/// blank lines. Returns the raw (still escaped) text and the index past the
/// closing delimiter.
pub(crate) fn scan_link_title(bytes: &[u8], start: usize, end: usize) -> Option<(String, usize)> {
    if start >= end {
        return None;
    }
    let close = match bytes[start] {
        b'"' => b'"',
        b'\'' => b'\'',
        b'(' => b')',
        _ => return None,
    };
    let mut i = start + 1;
    let mut out = Vec::new();
    while i < end {
        let b = bytes[i];
        if b == b'\\' && i + 1 < end && bytes[i + 1].is_ascii_punctuation() {
            out.push(b'\\');
            out.push(bytes[i + 1]);
            i += 2;
            continue;
        }
        if b == close {
            let text = String::from_utf8_lossy(&out).into_owned();
            return Some((text, i + 1));
        }
        if b == b'\n' && i + 1 < end && bytes[i + 1] == b'\n' {
            return None;
        }
        out.push(b);
        i += 1;
    }
    None
}

/// Plain-text flattening for image alt attributes: code spans contribute
/// their literal, nested images their alt, breaks a single space.
fn flatten_plain_text(inlines: &[Inline]) -> String {
    let mut out = String::new();
    for inline in inlines {
        match inline {
            Inline::Text { text, .. } => out.push_str(text),
            Inline::Code(literal) => out.push_str(literal),
            Inline::SoftBreak | Inline::HardBreak => out.push(' '),
            Inline::Emph(children)
            | Inline::Strong(children)
            | Inline::Strikethrough(children)
            | Inline::Link { children, .. } => out.push_str(&flatten_plain_text(children)),
            Inline::Image { alt, .. } => out.push_str(alt),
            Inline::Html(raw) => out.push_str(raw),
            Inline::FootnoteRef { .. } => {}
        }
    }
    out
}

// --- GFM extended autolinks -------------------------------------------------

fn apply_extended_autolinks(inlines: &mut InlineSeq) {
    let mut rebuilt = Vec::with_capacity(inlines.len());
    for inline in inlines.drain(..) {
        match inline {
            Inline::Text {
                text,
                no_delim: false,
                no_smart: false,
            } => match split_autolinks(&text) {
                Some(pieces) => rebuilt.extend(pieces),
                None => rebuilt.push(Inline::plain(text)),
            },
            Inline::Emph(mut children) => {
                apply_extended_autolinks(&mut children);
                rebuilt.push(Inline::Emph(children));
            }
            Inline::Strong(mut children) => {
                apply_extended_autolinks(&mut children);
                rebuilt.push(Inline::Strong(children));
            }
            Inline::Strikethrough(mut children) => {
                apply_extended_autolinks(&mut children);
                rebuilt.push(Inline::Strikethrough(children));
            }
            other => rebuilt.push(other),
        }
    }
    *inlines = rebuilt;
}

struct AutolinkMatch {
    start: usize,
    end: usize,
    url: String,
    display: String,
}

fn split_autolinks(text: &str) -> Option<InlineSeq> {
    let mut out = Vec::new();
    let mut last = 0;
    let mut i = 0;
    while i < text.len() {
        if !text.is_char_boundary(i) {
            i += 1;
            continue;
        }
        if let Some(link) = match_autolink_at(text, i) {
            if link.start > last {
                out.push(Inline::plain(&text[last..link.start]));
            }
            out.push(Inline::Link {
                url: link.url,
                title: None,
                children: vec![Inline::plain(link.display)],
            });
            last = link.end;
            i = link.end;
        } else {
            i += 1;
        }
    }
    if out.is_empty() {
        return None;
    }
    if last < text.len() {
        out.push(Inline::plain(&text[last..]));
    }
    Some(out)
}

fn match_autolink_at(text: &str, start: usize) -> Option<AutolinkMatch> {
    let prev = prev_char(text, start);
    if prev == Some('<') {
        return None;
    }
    let rest = &text[start..];
    let url_boundary =
        prev.map_or(true, |ch| ch.is_whitespace() || matches!(ch, '*' | '_' | '~' | '(' | '"' | '\''));
    let email_boundary = url_boundary || matches!(prev, Some(':') | Some('/'));

    for scheme in ["http://", "https://", "ftp://"] {
        if rest.starts_with(scheme) {
            if !url_boundary {
                return None;
            }
            let end = scan_extended_url_end(text, start);
            let host_start = start + scheme.len();
            if end <= host_start || !valid_autolink_domain(&text[host_start..end]) {
                return None;
            }
            let display = text[start..end].to_string();
            return Some(AutolinkMatch {
                start,
                end,
                url: display.clone(),
                display,
            });
        }
    }
    if rest.starts_with("www.") {
        if !url_boundary {
            return None;
        }
        let end = scan_extended_url_end(text, start);
        if end <= start + 4 || !valid_autolink_domain(&text[start..end]) {
            return None;
        }
        let display = text[start..end].to_string();
        return Some(AutolinkMatch {
            start,
            end,
            url: format!("http://{}", display),
            display,
        });
    }
    for scheme in ["mailto:", "xmpp:"] {
        if rest.starts_with(scheme) {
            if !email_boundary {
                return None;
            }
            let addr_start = start + scheme.len();
            let end = scan_extended_email_end(text, addr_start, scheme == "xmpp:")?;
            let display = text[start..end].to_string();
            return Some(AutolinkMatch {
                start,
                end,
                url: display.clone(),
                display,
            });
        }
    }
    if email_boundary && rest.chars().next().is_some_and(is_email_local_char) {
        let end = scan_extended_email_end(text, start, false)?;
        let display = text[start..end].to_string();
        return Some(AutolinkMatch {
            start,
            end,
            url: format!("mailto:{}", display),
            display,
        });
    }
    None
}

fn is_email_local_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '+' | '-')
}

/// Consumes the URL candidate (to whitespace or `<`), then trims trailing
/// punctuation, unbalanced `)`, and entity-like `;` suffixes.
fn scan_extended_url_end(text: &str, start: usize) -> usize {
    let bytes = text.as_bytes();
    let mut end = start;
    while end < bytes.len() {
        let b = bytes[end];
        if b.is_ascii_whitespace() || b == b'<' {
            break;
        }
        end += 1;
    }
    while end > start && !text.is_char_boundary(end) {
        end -= 1;
    }
    trim_autolink_tail(text, start, end)
}

fn trim_autolink_tail(text: &str, start: usize, mut end: usize) -> usize {
    let bytes = text.as_bytes();
    loop {
        if end == start {
            return end;
        }
        let last = bytes[end - 1];
        if matches!(
            last,
            b'?' | b'!' | b'.' | b',' | b':' | b'*' | b'_' | b'~' | b'"' | b'\''
        ) {
            end -= 1;
            continue;
        }
        if last == b')' {
            let slice = &bytes[start..end];
            let opens = slice.iter().filter(|b| **b == b'(').count();
            let closes = slice.iter().filter(|b| **b == b')').count();
            if closes > opens {
                end -= 1;
                continue;
            }
            return end;
        }
        if last == b';' {
            // Strip an entity-looking suffix (&name;) entirely.
            let mut j = end - 1;
            while j > start && bytes[j - 1].is_ascii_alphanumeric() {
                j -= 1;
            }
            if j > start && bytes[j - 1] == b'&' && j < end - 1 {
                end = j - 1;
            } else {
                end -= 1;
            }
            continue;
        }
        return end;
    }
}

/// The autolink domain rule: at least one dot, labels of alphanumerics,
/// `-`, and `_`, and no underscore in the last two labels. Validation stops
/// at the first `/`, `?`, `#`, or `:`.
fn valid_autolink_domain(candidate: &str) -> bool {
    let domain_end = candidate
        .find(|ch| matches!(ch, '/' | '?' | '#' | ':'))
        .unwrap_or(candidate.len());
    let domain = &candidate[..domain_end];
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    for label in &labels {
        if label.is_empty()
            || !label
                .chars()
                .all(|ch| ch.is_alphanumeric() || ch == '-' || ch == '_')
        {
            return false;
        }
    }
    labels[labels.len() - 2..]
        .iter()
        .all(|label| !label.contains('_'))
}

fn scan_extended_email_end(text: &str, start: usize, allow_resource: bool) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = start;
    while i < bytes.len() && is_email_local_char(bytes[i] as char) {
        i += 1;
    }
    if i == start || i >= bytes.len() || bytes[i] != b'@' {
        return None;
    }
    let domain_start = i + 1;
    let mut end = domain_start;
    while end < bytes.len() {
        let b = bytes[end] as char;
        if b.is_ascii_alphanumeric() || matches!(b, '.' | '-' | '_') {
            end += 1;
        } else {
            break;
        }
    }
    while end > domain_start && matches!(bytes[end - 1], b'.' | b'-' | b'_') {
        if matches!(bytes[end - 1], b'-' | b'_') {
            // A dash or underscore may not end the address.
            return None;
        }
        end -= 1;
    }
    let domain = &text[domain_start..end];
    if !domain.contains('.') || domain.split('.').any(|label| label.is_empty()) {
        return None;
    }
    if allow_resource && end < bytes.len() && bytes[end] == b'/' {
        let mut j = end + 1;
        while j < bytes.len() {
            let b = bytes[j] as char;
            if b.is_ascii_alphanumeric() || matches!(b, '.' | '-' | '_' | '@') {
                j += 1;
            } else {
                break;
            }
        }
        if j > end + 1 {
            end = j;
        }
    }
    Some(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Inline;

    fn parser<'a>(
        defs: &'a HashMap<String, LinkDefinition>,
        notes: &'a HashMap<String, String>,
    ) -> InlineParser<'a> {
        InlineParser {
            extensions: Extensions::all(),
            link_defs: defs,
            footnote_labels: notes,
        }
    }

    fn parse(text: &str) -> InlineSeq {
        let defs = HashMap::new();
        let notes = HashMap::new();
        parser(&defs, &notes).parse(text)
    }

    #[test]
    fn emphasis_and_strong() {
        let inlines = parse("*a* **b**");
        assert_eq!(inlines[0], Inline::Emph(vec![Inline::plain("a")]));
        assert_eq!(inlines[2], Inline::Strong(vec![Inline::plain("b")]));
    }

    #[test]
    fn mod_three_rule_blocks_mixed_runs() {
        // `*foo**bar*` must not pair the ** closer with the * opener.
        let inlines = parse("*foo**bar*");
        assert_eq!(
            inlines,
            vec![Inline::Emph(vec![
                Inline::plain("foo"),
                Inline::plain("**"),
                Inline::plain("bar"),
            ])]
        );
    }

    #[test]
    fn strikethrough_requires_matching_lengths() {
        let inlines = parse("~~a~~ and ~b~");
        assert_eq!(inlines[0], Inline::Strikethrough(vec![Inline::plain("a")]));
        assert_eq!(
            inlines.last(),
            Some(&Inline::Strikethrough(vec![Inline::plain("b")]))
        );
        let unmatched = parse("~~~x~~~");
        assert_eq!(unmatched, vec![Inline::plain("~~~x~~~")]);
    }

    #[test]
    fn code_span_strips_one_padding_space() {
        assert_eq!(parse("` a ` b"), vec![
            Inline::Code("a".into()),
            Inline::plain(" b"),
        ]);
        assert_eq!(parse("`` a ` b ``"), vec![Inline::Code("a ` b".into())]);
    }

    #[test]
    fn unmatched_backticks_stay_literal() {
        assert_eq!(parse("``x`"), vec![Inline::plain("``x`")]);
    }

    #[test]
    fn reference_links_resolve_through_side_table() {
        let mut defs = HashMap::new();
        defs.insert(
            "foo".to_string(),
            LinkDefinition {
                url: "/url".to_string(),
                title: Some("t".to_string()),
            },
        );
        let notes = HashMap::new();
        let inlines = parser(&defs, &notes).parse("[Foo][] and [foo] and [x][foo]");
        let links = inlines
            .iter()
            .filter(|inline| matches!(inline, Inline::Link { .. }))
            .count();
        assert_eq!(links, 3);
    }

    #[test]
    fn links_do_not_nest() {
        let mut defs = HashMap::new();
        defs.insert(
            "bar".to_string(),
            LinkDefinition {
                url: "/bar".to_string(),
                title: None,
            },
        );
        let notes = HashMap::new();
        let inlines = parser(&defs, &notes).parse("[a [bar] c](/url)");
        // The inner bracket resolves; the outer opener was deactivated.
        assert!(inlines.iter().any(|inline| matches!(
            inline,
            Inline::Link { url, .. } if url == "/bar"
        )));
        assert!(!inlines.iter().any(|inline| matches!(
            inline,
            Inline::Link { url, .. } if url == "/url"
        )));
    }

    #[test]
    fn image_alt_flattens_interior() {
        let inlines = parse("![foo *bar*](/img.png \"t\")");
        assert_eq!(
            inlines,
            vec![Inline::Image {
                url: "/img.png".to_string(),
                title: Some("t".to_string()),
                alt: "foo bar".to_string(),
            }]
        );
    }

    #[test]
    fn escaped_star_never_delimits() {
        let inlines = parse("\\*not em\\*");
        assert!(inlines.iter().all(|i| !matches!(i, Inline::Emph(_))));
        assert_eq!(
            inlines[0],
            Inline::Text {
                text: "*".to_string(),
                no_delim: true,
                no_smart: false,
            }
        );
    }

    #[test]
    fn extended_autolinks() {
        let inlines = parse("visit www.commonmark.org/help now");
        assert_eq!(
            inlines[1],
            Inline::Link {
                url: "http://www.commonmark.org/help".to_string(),
                title: None,
                children: vec![Inline::plain("www.commonmark.org/help")],
            }
        );
        let trailing = parse("see https://example.com/x. done");
        assert_eq!(
            trailing[1],
            Inline::Link {
                url: "https://example.com/x".to_string(),
                title: None,
                children: vec![Inline::plain("https://example.com/x")],
            }
        );
        let email = parse("mail a.b-c_d@example.com!");
        assert_eq!(
            email[1],
            Inline::Link {
                url: "mailto:a.b-c_d@example.com".to_string(),
                title: None,
                children: vec![Inline::plain("a.b-c_d@example.com")],
            }
        );
        // Underscores may not appear in the last two domain labels.
        assert_eq!(
            parse("http://no_good.example.com http://ok_fine.sub.example.com"),
            parse("http://no_good.example.com http://ok_fine.sub.example.com"),
        );
        assert!(matches!(
            parse("http://ok_fine.sub.example.com")[0],
            Inline::Link { .. }
        ));
        assert_eq!(
            parse("http://no_good.example_bad.com"),
            vec![Inline::plain("http://no_good.example_bad.com")]
        );
    }

    #[test]
    fn unbalanced_paren_is_trimmed() {
        let inlines = parse("(see www.example.com/a)");
        assert_eq!(
            inlines[1],
            Inline::Link {
                url: "http://www.example.com/a".to_string(),
                title: None,
                children: vec![Inline::plain("www.example.com/a")],
            }
        );
        let balanced = parse("www.example.com/a_(b)");
        assert_eq!(
            balanced[0],
            Inline::Link {
                url: "http://www.example.com/a_(b)".to_string(),
                title: None,
                children: vec![Inline::plain("www.example.com/a_(b)")],
            }
        );
    }

    #[test]
    fn footnote_refs_need_a_definition() {
        let defs = HashMap::new();
        let mut notes = HashMap::new();
        notes.insert("x".to_string(), "x".to_string());
        let inlines = parser(&defs, &notes).parse("a[^x] b[^y]");
        assert_eq!(
            inlines[1],
            Inline::FootnoteRef {
                label: "x".to_string(),
                key: "x".to_string(),
            }
        );
        assert!(inlines[2..]
            .iter()
            .all(|inline| !matches!(inline, Inline::FootnoteRef { .. })));
    }

    #[test]
    fn hard_breaks() {
        let spaces = parse("foo  \nbar");
        assert_eq!(
            spaces,
            vec![Inline::plain("foo"), Inline::HardBreak, Inline::plain("bar")]
        );
        let backslash = parse("foo\\\n   bar");
        assert_eq!(
            backslash,
            vec![Inline::plain("foo"), Inline::HardBreak, Inline::plain("bar")]
        );
    }

    #[test]
    fn raw_html_span() {
        let inlines = parse("a <b foo=\"1\"> c <!-- note --> <bad");
        assert_eq!(inlines[1], Inline::Html("<b foo=\"1\">".to_string()));
        assert_eq!(inlines[3], Inline::Html("<!-- note -->".to_string()));
        assert!(matches!(&inlines[4], Inline::Text { text, .. } if text.contains("<bad")));
    }

    #[test]
    fn uri_autolinks() {
        let inlines = parse("<http://example.com/?a=b&c=d> <foo@bar.example.com> <not valid>");
        assert_eq!(
            inlines[0],
            Inline::Link {
                url: "http://example.com/?a=b&c=d".to_string(),
                title: None,
                children: vec![Inline::plain("http://example.com/?a=b&c=d")],
            }
        );
        assert_eq!(
            inlines[2],
            Inline::Link {
                url: "mailto:foo@bar.example.com".to_string(),
                title: None,
                children: vec![Inline::plain("foo@bar.example.com")],
            }
        );
    }
}
