use std::collections::HashMap;

pub type InlineSeq = Vec<Inline>;

/// A fully parsed document: the block tree plus the footnote side table
/// (populated only when the `footnotes` extension is enabled).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Document {
    pub blocks: Vec<Block>,
    pub footnotes: HashMap<String, FootnoteDefinition>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Block {
    Paragraph {
        content: InlineSeq,
    },
    Heading {
        level: u8,
        content: InlineSeq,
    },
    ThematicBreak,
    CodeBlock {
        info: String,
        literal: String,
        fenced: bool,
    },
    BlockQuote {
        blocks: Vec<Block>,
    },
    List(List),
    HtmlBlock {
        raw: String,
    },
    Table(Table),
}

#[derive(Clone, Debug, PartialEq)]
pub struct List {
    pub ordered: bool,
    /// The bullet character for bullet lists, the delimiter (`.` or `)`) for
    /// ordered lists. Items with a different marker start a new list.
    pub marker: u8,
    pub start: u64,
    pub tight: bool,
    pub items: Vec<ListItem>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListItem {
    pub blocks: Vec<Block>,
    /// Task-list state: `Some(true)` for `[x]`, `Some(false)` for `[ ]`,
    /// `None` for an ordinary item.
    pub checked: Option<bool>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    pub alignments: Vec<TableAlignment>,
    pub rows: Vec<TableRow>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TableAlignment {
    None,
    Left,
    Center,
    Right,
}

/// A cell's alignment is `table.alignments[column]`; cells never outnumber
/// the alignment vector.
#[derive(Clone, Debug, PartialEq)]
pub struct TableRow {
    pub header: bool,
    pub cells: Vec<InlineSeq>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Inline {
    Text {
        text: String,
        /// Escaped `*`/`_`: never treated as an emphasis delimiter run.
        no_delim: bool,
        /// Escaped `"`, `'`, `-`, `.`: skipped by smart punctuation.
        no_smart: bool,
    },
    SoftBreak,
    HardBreak,
    Code(String),
    Emph(InlineSeq),
    Strong(InlineSeq),
    Strikethrough(InlineSeq),
    Link {
        url: String,
        title: Option<String>,
        children: InlineSeq,
    },
    Image {
        url: String,
        title: Option<String>,
        /// Plain-text flattening of the bracket interior.
        alt: String,
    },
    Html(String),
    FootnoteRef {
        /// Original label spelling, used for anchor ids.
        label: String,
        /// Normalized key into `Document::footnotes`.
        key: String,
    },
}

impl Inline {
    pub fn plain(text: impl Into<String>) -> Self {
        Inline::Text {
            text: text.into(),
            no_delim: false,
            no_smart: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FootnoteDefinition {
    /// Original label spelling (anchors encode this, not the map key).
    pub label: String,
    pub blocks: Vec<Block>,
}

/// A `[label]: destination "title"` declaration, keyed by normalized label.
/// Consumed during inline resolution; not part of the finished `Document`.
#[derive(Clone, Debug, PartialEq)]
pub struct LinkDefinition {
    pub url: String,
    pub title: Option<String>,
}
