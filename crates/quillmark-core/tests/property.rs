//! Randomized properties over a deterministic LCG: the parser is total,
//! output is stable under trailing blank lines and line-ending styles, and
//! emphasis-family nodes never carry empty text children.

use std::panic;

use quillmark_core::{
    gfm, markdown, parse, Block, Document, Inline, ParseOptions, RenderOptions,
};

const CASES: usize = 300;
const MAX_LEN: usize = 384;
const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJ0123456789 \n\t\
#>*_~`[](){}|!<>&\\:+-=./\"'^@wmp";

fn gfm_options() -> ParseOptions {
    ParseOptions {
        extensions: quillmark_core::Extensions::all(),
    }
}

#[test]
fn parser_never_panics_on_random_input() -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = Lcg::new(0x7f4a_2d91_13b4_55a1);
    for case in 0..CASES {
        let len = rng.gen_range(0, MAX_LEN + 1);
        let source = random_string(&mut rng, len);
        for flavored in [false, true] {
            let input = source.clone();
            let result = panic::catch_unwind(move || {
                if flavored {
                    gfm(&input, &RenderOptions::default())
                } else {
                    markdown(&input, &RenderOptions::default())
                }
            });
            if result.is_err() {
                return Err(format!(
                    "pipeline panicked for case {} (gfm={}): {:?}",
                    case, flavored, source
                )
                .into());
            }
        }
    }
    Ok(())
}

#[test]
fn trailing_newline_does_not_change_output() {
    let mut rng = Lcg::new(0x91d4_2f8e_c1a3_044f);
    let options = RenderOptions::default();
    for _ in 0..CASES {
        let len = rng.gen_range(0, MAX_LEN + 1);
        let mut source = random_string(&mut rng, len);
        if !source.ends_with('\n') {
            source.push('\n');
        }
        let mut padded = source.clone();
        padded.push('\n');
        assert_eq!(
            gfm(&source, &options),
            gfm(&padded, &options),
            "trailing blank line changed output for {:?}",
            source
        );
    }
}

#[test]
fn line_endings_normalize_to_the_same_output() {
    let mut rng = Lcg::new(0x3c6e_f372_fe94_f82b);
    let options = RenderOptions::default();
    for _ in 0..CASES {
        let len = rng.gen_range(0, MAX_LEN + 1);
        let source = random_string(&mut rng, len);
        let crlf = source.replace('\n', "\r\n");
        let cr = source.replace('\n', "\r");
        let expected = gfm(&source, &options);
        assert_eq!(expected, gfm(&crlf, &options));
        assert_eq!(expected, gfm(&cr, &options));
    }
}

#[test]
fn smart_rendering_never_panics() {
    let mut rng = Lcg::new(0x0b5c_9d2a_e877_1f33);
    let options = RenderOptions {
        smart: true,
        ..RenderOptions::default()
    };
    for _ in 0..CASES {
        let len = rng.gen_range(0, MAX_LEN + 1);
        let source = random_string(&mut rng, len);
        let html = gfm(&source, &options);
        assert!(html.is_empty() || html.ends_with('\n'));
    }
}

#[test]
fn emphasis_nodes_have_no_empty_text_children() {
    let mut rng = Lcg::new(0x5851_f42d_4c95_7f2d);
    for _ in 0..CASES {
        let len = rng.gen_range(0, MAX_LEN + 1);
        let source = random_string(&mut rng, len);
        let document = parse(&source, &gfm_options());
        check_document(&document, &source);
    }
}

fn check_document(document: &Document, source: &str) {
    for block in &document.blocks {
        check_block(block, source);
    }
    for definition in document.footnotes.values() {
        for block in &definition.blocks {
            check_block(block, source);
        }
    }
}

fn check_block(block: &Block, source: &str) {
    match block {
        Block::Paragraph { content } | Block::Heading { content, .. } => {
            check_inlines(content, source)
        }
        Block::BlockQuote { blocks } => {
            for child in blocks {
                check_block(child, source);
            }
        }
        Block::List(list) => {
            for item in &list.items {
                for child in &item.blocks {
                    check_block(child, source);
                }
            }
        }
        Block::Table(table) => {
            for row in &table.rows {
                assert!(
                    row.cells.len() == table.alignments.len(),
                    "ragged table row for {:?}",
                    source
                );
                for cell in &row.cells {
                    check_inlines(cell, source);
                }
            }
        }
        Block::ThematicBreak | Block::CodeBlock { .. } | Block::HtmlBlock { .. } => {}
    }
}

fn check_inlines(inlines: &[Inline], source: &str) {
    for inline in inlines {
        match inline {
            Inline::Emph(children) | Inline::Strong(children) | Inline::Strikethrough(children) => {
                assert!(
                    !children.is_empty(),
                    "empty emphasis container for {:?}",
                    source
                );
                for child in children {
                    if let Inline::Text { text, .. } = child {
                        assert!(!text.is_empty(), "empty text child for {:?}", source);
                    }
                }
                check_inlines(children, source);
            }
            Inline::Link { children, .. } => check_inlines(children, source),
            _ => {}
        }
    }
}

fn random_string(rng: &mut Lcg, len: usize) -> String {
    let mut out = String::with_capacity(len);
    for _ in 0..len {
        let idx = rng.gen_range(0, CHARSET.len());
        out.push(CHARSET[idx] as char);
    }
    out
}

struct Lcg {
    state: u64,
}

impl Lcg {
    fn new(seed: u64) -> Self {
        Lcg { state: seed }
    }

    fn next(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        self.state
    }

    fn gen_range(&mut self, min: usize, max: usize) -> usize {
        if max <= min {
            return min;
        }
        min + (self.next() >> 1) as usize % (max - min)
    }
}
