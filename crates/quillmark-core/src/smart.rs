//! Smart punctuation: straight quotes to curly, `...` to ellipsis, dash
//! runs to em/en dashes. The inline forest is flattened to a token stream
//! (leaf non-text inlines become one opaque alphabetic token, breaks become
//! `\n`) so quote flanking sees through node boundaries; characters from
//! escaped punctuation carry a `no_smart` flag and are left alone without
//! disabling the rest of the pass.

use crate::ast::{Block, Document, Inline, InlineSeq};

pub(crate) fn apply_smart_punctuation(document: &mut Document) {
    for block in &mut document.blocks {
        smart_block(block);
    }
    for definition in document.footnotes.values_mut() {
        for block in &mut definition.blocks {
            smart_block(block);
        }
    }
}

fn smart_block(block: &mut Block) {
    match block {
        Block::Paragraph { content } | Block::Heading { content, .. } => smart_inlines(content),
        Block::BlockQuote { blocks } => {
            for child in blocks {
                smart_block(child);
            }
        }
        Block::List(list) => {
            for item in &mut list.items {
                for child in &mut item.blocks {
                    smart_block(child);
                }
            }
        }
        Block::Table(table) => {
            for row in &mut table.rows {
                for cell in &mut row.cells {
                    smart_inlines(cell);
                }
            }
        }
        Block::ThematicBreak | Block::CodeBlock { .. } | Block::HtmlBlock { .. } => {}
    }
}

#[derive(Clone, Copy)]
struct Tok {
    ch: char,
    /// Ordinal of the owning text node in traversal order; `usize::MAX`
    /// for opaque stand-ins.
    ord: usize,
    byte: usize,
    no_smart: bool,
}

struct Repl {
    ord: usize,
    byte: usize,
    len: usize,
    text: String,
}

fn smart_inlines(root: &mut InlineSeq) {
    let mut toks = Vec::new();
    let mut counter = 0;
    collect_tokens(root, &mut counter, &mut toks);
    let repls = compute_replacements(&toks);
    if repls.is_empty() {
        return;
    }
    let mut counter = 0;
    rewrite_text_nodes(root, &mut counter, &repls);
}

fn collect_tokens(seq: &InlineSeq, counter: &mut usize, toks: &mut Vec<Tok>) {
    for inline in seq {
        match inline {
            Inline::Text { text, no_smart, .. } => {
                let ord = *counter;
                *counter += 1;
                for (byte, ch) in text.char_indices() {
                    toks.push(Tok {
                        ch,
                        ord,
                        byte,
                        no_smart: *no_smart,
                    });
                }
            }
            Inline::SoftBreak | Inline::HardBreak => toks.push(Tok {
                ch: '\n',
                ord: usize::MAX,
                byte: 0,
                no_smart: true,
            }),
            Inline::Emph(children)
            | Inline::Strong(children)
            | Inline::Strikethrough(children)
            | Inline::Link { children, .. } => collect_tokens(children, counter, toks),
            Inline::Code(_)
            | Inline::Image { .. }
            | Inline::Html(_)
            | Inline::FootnoteRef { .. } => toks.push(Tok {
                ch: 'x',
                ord: usize::MAX,
                byte: 0,
                no_smart: true,
            }),
        }
    }
}

fn rewrite_text_nodes(seq: &mut InlineSeq, counter: &mut usize, repls: &[Repl]) {
    for inline in seq {
        match inline {
            Inline::Text { text, .. } => {
                let ord = *counter;
                *counter += 1;
                let mut mine: Vec<&Repl> = repls.iter().filter(|r| r.ord == ord).collect();
                mine.sort_by_key(|r| std::cmp::Reverse(r.byte));
                for repl in mine {
                    text.replace_range(repl.byte..repl.byte + repl.len, &repl.text);
                }
            }
            Inline::Emph(children)
            | Inline::Strong(children)
            | Inline::Strikethrough(children)
            | Inline::Link { children, .. } => rewrite_text_nodes(children, counter, repls),
            _ => {}
        }
    }
}

fn compute_replacements(toks: &[Tok]) -> Vec<Repl> {
    let mut repls = Vec::new();
    let mut open_doubles = 0usize;
    let mut i = 0;
    while i < toks.len() {
        let tok = toks[i];
        if tok.no_smart || tok.ord == usize::MAX {
            i += 1;
            continue;
        }
        match tok.ch {
            '\'' | '"' => {
                let before = if i > 0 { Some(toks[i - 1].ch) } else { None };
                let after = toks.get(i + 1).map(|t| t.ch);
                let glyph = pick_quote(tok.ch, before, after, &mut open_doubles);
                repls.push(Repl {
                    ord: tok.ord,
                    byte: tok.byte,
                    len: 1,
                    text: glyph.to_string(),
                });
                i += 1;
            }
            '.' => {
                if run_within_node(toks, i, '.') >= 3 {
                    repls.push(Repl {
                        ord: tok.ord,
                        byte: tok.byte,
                        len: 3,
                        text: "\u{2026}".to_string(),
                    });
                    i += 3;
                } else {
                    i += 1;
                }
            }
            '-' => {
                let run = run_within_node(toks, i, '-');
                if run >= 2 {
                    repls.push(Repl {
                        ord: tok.ord,
                        byte: tok.byte,
                        len: run,
                        text: dash_run(run),
                    });
                    i += run;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    repls
}

/// Length of the run of `needle` starting at `i` that stays inside one text
/// node with contiguous bytes and no `no_smart` members.
fn run_within_node(toks: &[Tok], start: usize, needle: char) -> usize {
    let first = toks[start];
    let mut len = 0;
    while let Some(tok) = toks.get(start + len) {
        if tok.ch != needle
            || tok.no_smart
            || tok.ord != first.ord
            || tok.byte != first.byte + len
        {
            break;
        }
        len += 1;
    }
    len
}

fn pick_quote(quote: char, before: Option<char>, after: Option<char>, open_doubles: &mut usize) -> char {
    let before_ws = before.map_or(true, |ch| ch.is_whitespace());
    let after_ws = after.map_or(true, |ch| ch.is_whitespace());
    let before_punct = before.is_some_and(|ch| !ch.is_whitespace() && !ch.is_alphanumeric());
    let after_punct = after.is_some_and(|ch| !ch.is_whitespace() && !ch.is_alphanumeric());
    let left = !after_ws && (!after_punct || before_ws || before_punct);
    let right = !before_ws && (!before_punct || after_ws || after_punct);

    if quote == '\'' {
        // A bracket before and a letter after reads as an apostrophe.
        if matches!(before, Some(')') | Some(']'))
            && after.is_some_and(|ch| ch.is_alphanumeric())
        {
            return '\u{2019}';
        }
        if right {
            return '\u{2019}';
        }
        if left {
            return '\u{2018}';
        }
        '\u{2019}'
    } else {
        if right && *open_doubles > 0 {
            *open_doubles -= 1;
            return '\u{201D}';
        }
        if left {
            *open_doubles += 1;
            return '\u{201C}';
        }
        if right {
            return '\u{201D}';
        }
        '\u{201D}'
    }
}

/// Dash runs: divisible by 3 becomes em dashes, divisible by 2 en dashes,
/// otherwise a width-preserving mix.
fn dash_run(len: usize) -> String {
    let (em, en) = if len % 3 == 0 {
        (len / 3, 0)
    } else if len % 2 == 0 {
        (0, len / 2)
    } else if len % 3 == 2 {
        ((len - 2) / 3, 1)
    } else {
        ((len - 4) / 3, 2)
    };
    let mut out = String::with_capacity(3 * (em + en));
    for _ in 0..em {
        out.push('\u{2014}');
    }
    for _ in 0..en {
        out.push('\u{2013}');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smart(seq: &mut InlineSeq) {
        smart_inlines(seq);
    }

    fn text_of(seq: &InlineSeq) -> String {
        seq.iter()
            .map(|inline| match inline {
                Inline::Text { text, .. } => text.clone(),
                _ => String::new(),
            })
            .collect()
    }

    #[test]
    fn quotes_pair_and_apostrophes_close() {
        let mut seq = vec![Inline::plain("\"Hello,\" she didn't say.")];
        smart(&mut seq);
        assert_eq!(text_of(&seq), "\u{201C}Hello,\u{201D} she didn\u{2019}t say.");
    }

    #[test]
    fn quote_flanking_crosses_node_boundaries() {
        let mut seq = vec![
            Inline::plain("\""),
            Inline::Emph(vec![Inline::plain("word")]),
            Inline::plain("\""),
        ];
        smart(&mut seq);
        assert_eq!(text_of(&seq), "\u{201C}\u{201D}");
    }

    #[test]
    fn ellipsis_and_dashes() {
        let mut seq = vec![Inline::plain("wait... a--b c---d e----f")];
        smart(&mut seq);
        assert_eq!(
            text_of(&seq),
            "wait\u{2026} a\u{2013}b c\u{2014}d e\u{2013}\u{2013}f"
        );
    }

    #[test]
    fn dash_mix_preserves_width() {
        assert_eq!(dash_run(2), "\u{2013}");
        assert_eq!(dash_run(3), "\u{2014}");
        assert_eq!(dash_run(5), "\u{2014}\u{2013}");
        assert_eq!(dash_run(7), "\u{2014}\u{2013}\u{2013}");
    }

    #[test]
    fn no_smart_characters_stay_straight() {
        let mut seq = vec![
            Inline::Text {
                text: "\"".to_string(),
                no_delim: false,
                no_smart: true,
            },
            Inline::plain("quoted\""),
        ];
        smart(&mut seq);
        assert_eq!(text_of(&seq), "\"quoted\u{201D}");
    }

    #[test]
    fn code_spans_are_opaque() {
        let mut seq = vec![
            Inline::plain("'"),
            Inline::Code("x".to_string()),
            Inline::plain("'"),
        ];
        smart(&mut seq);
        // Both quotes flank the opaque token like a letter.
        assert_eq!(text_of(&seq), "\u{2018}\u{2019}");
    }
}
