//! Minimal grid layout emitting a single-page PDF.
//!
//! Content is laid out top-down in rows of a 12-column grid. Each cell holds
//! one or more text blocks that are word-wrapped to the cell width using
//! Helvetica advance widths. The page height is not fixed: it grows to fit
//! everything that was laid out, so each document is exactly one page and
//! rasterises to exactly one image.
//!
//! Marks are collected with top-based coordinates and flipped into PDF user
//! space only in [`Canvas::finish`], once the final height is known.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

/// US Letter width in points.
pub const LETTER_WIDTH: f32 = 612.0;

const GRID_COLUMNS: u8 = 12;
const LEADING: f32 = 1.25;
const CELL_PADDING: f32 = 3.0;

/// Advance widths of Helvetica for ASCII 32..=126, in 1/1000 em.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // 0-9
    278, 278, 584, 584, 584, 556, 1015, // :..@
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // A-M
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // N-Z
    278, 278, 278, 469, 556, 333, // [..`
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // a-m
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // n-z
    334, 260, 334, 584, // {..~
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource_name(self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
        }
    }

    /// Width of `text` at `size` points.
    pub fn text_width(self, text: &str, size: f32) -> f32 {
        let units: u32 = text
            .chars()
            .map(|c| {
                let code = c as u32;
                if (32..=126).contains(&code) {
                    HELVETICA_WIDTHS[(code - 32) as usize] as u32
                } else {
                    556
                }
            })
            .sum();
        let scale = match self {
            Font::Regular => 1.0,
            Font::Bold => 1.07,
        };
        units as f32 * size / 1000.0 * scale
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Center,
}

/// A run of text with one font, size, and alignment.
#[derive(Debug, Clone)]
pub struct TextBlock {
    pub text: String,
    pub font: Font,
    pub size: f32,
    pub align: Align,
}

impl TextBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            font: Font::Regular,
            size: 10.0,
            align: Align::Left,
        }
    }

    pub fn bold(mut self) -> Self {
        self.font = Font::Bold;
        self
    }

    pub fn size(mut self, size: f32) -> Self {
        self.size = size;
        self
    }

    pub fn centered(mut self) -> Self {
        self.align = Align::Center;
        self
    }
}

/// One grid cell spanning `span` of the 12 columns.
#[derive(Debug, Clone)]
pub struct Cell {
    pub span: u8,
    pub blocks: Vec<TextBlock>,
}

impl Cell {
    pub fn new(span: u8, block: TextBlock) -> Self {
        Self {
            span,
            blocks: vec![block],
        }
    }

    pub fn with_blocks(span: u8, blocks: Vec<TextBlock>) -> Self {
        Self { span, blocks }
    }

    /// Full-width cell.
    pub fn full(block: TextBlock) -> Self {
        Self::new(GRID_COLUMNS, block)
    }
}

/// Greedy word wrap. Words wider than `max_width` get a line of their own.
pub fn wrap(text: &str, font: Font, size: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{current} {word}")
            };
            if font.text_width(&candidate, size) <= max_width || current.is_empty() {
                current = candidate;
            } else {
                lines.push(std::mem::take(&mut current));
                current = word.to_string();
            }
        }
        lines.push(current);
    }
    lines
}

/// Encode text for a Type1 font using WinAnsiEncoding. Characters outside
/// the encoding become `?`.
pub fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            ' '..='~' => c as u8,
            '\u{20AC}' => 0x80,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '\u{2022}' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '\u{A0}'..='\u{FF}' => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

#[derive(Debug, Clone)]
enum Mark {
    Text {
        x: f32,
        top: f32,
        font: Font,
        size: f32,
        text: String,
    },
    Rect {
        x: f32,
        top: f32,
        width: f32,
        height: f32,
    },
}

/// Top-down layout surface for one page.
#[derive(Debug)]
pub struct Canvas {
    width: f32,
    margin: f32,
    cursor: f32,
    border: bool,
    marks: Vec<Mark>,
}

impl Canvas {
    pub fn new(width: f32, margin: f32) -> Self {
        Self {
            width,
            margin,
            cursor: margin,
            border: false,
            marks: Vec::new(),
        }
    }

    /// Draw cell borders for subsequent rows.
    pub fn set_border(&mut self, border: bool) {
        self.border = border;
    }

    fn content_width(&self) -> f32 {
        self.width - 2.0 * self.margin
    }

    /// Vertical space without content.
    pub fn spacer(&mut self, height: f32) {
        self.cursor += height;
    }

    /// Lay out one row. The row is as tall as its tallest cell, and at least
    /// `min_height`.
    pub fn row(&mut self, cells: &[Cell], min_height: f32) {
        let column = self.content_width() / GRID_COLUMNS as f32;

        let mut x = self.margin;
        let mut placed = Vec::with_capacity(cells.len());
        let mut row_height = min_height;
        for cell in cells {
            let cell_width = column * cell.span.min(GRID_COLUMNS) as f32;
            let inner = (cell_width - 2.0 * CELL_PADDING).max(1.0);
            let mut lines = Vec::new();
            let mut height = CELL_PADDING;
            for block in &cell.blocks {
                for line in wrap(&block.text, block.font, block.size, inner) {
                    let line_height = block.size * LEADING;
                    lines.push((line, block, height));
                    height += line_height;
                }
            }
            height += CELL_PADDING;
            row_height = row_height.max(height);
            placed.push((x, cell_width, inner, lines));
            x += cell_width;
        }

        for (x, cell_width, inner, lines) in placed {
            if self.border {
                self.marks.push(Mark::Rect {
                    x,
                    top: self.cursor,
                    width: cell_width,
                    height: row_height,
                });
            }
            for (line, block, offset) in lines {
                if line.is_empty() {
                    continue;
                }
                let line_x = match block.align {
                    Align::Left => x + CELL_PADDING,
                    Align::Center => {
                        let w = block.font.text_width(&line, block.size);
                        x + CELL_PADDING + ((inner - w) / 2.0).max(0.0)
                    }
                };
                self.marks.push(Mark::Text {
                    x: line_x,
                    top: self.cursor + offset + block.size,
                    font: block.font,
                    size: block.size,
                    text: line,
                });
            }
        }
        self.cursor += row_height;
    }

    /// A footnote: `marker` in a narrow gutter, `text` wrapped beside it.
    pub fn note(&mut self, marker: &str, text: &str, size: f32) {
        let gutter = 14.0;
        let lines = wrap(text, Font::Regular, size, self.content_width() - gutter);
        self.marks.push(Mark::Text {
            x: self.margin,
            top: self.cursor + size,
            font: Font::Regular,
            size,
            text: marker.to_string(),
        });
        for line in lines {
            self.marks.push(Mark::Text {
                x: self.margin + gutter,
                top: self.cursor + size,
                font: Font::Regular,
                size,
                text: line,
            });
            self.cursor += size * LEADING;
        }
        self.cursor += CELL_PADDING;
    }

    /// Height consumed so far, including the bottom margin.
    pub fn height(&self) -> f32 {
        self.cursor + self.margin
    }

    /// Flip marks into PDF space and emit the content operations.
    pub fn finish(self) -> PageContent {
        let height = self.height();
        let mut operations = vec![Operation::new("w", vec![0.5_f32.into()])];
        for mark in self.marks {
            match mark {
                Mark::Rect {
                    x,
                    top,
                    width,
                    height: h,
                } => {
                    operations.push(Operation::new(
                        "re",
                        vec![x.into(), (height - top - h).into(), width.into(), h.into()],
                    ));
                    operations.push(Operation::new("S", vec![]));
                }
                Mark::Text {
                    x,
                    top,
                    font,
                    size,
                    text,
                } => {
                    operations.push(Operation::new("BT", vec![]));
                    operations.push(Operation::new(
                        "Tf",
                        vec![font.resource_name().into(), size.into()],
                    ));
                    operations.push(Operation::new("Td", vec![x.into(), (height - top).into()]));
                    operations.push(Operation::new(
                        "Tj",
                        vec![Object::String(win_ansi(&text), lopdf::StringFormat::Literal)],
                    ));
                    operations.push(Operation::new("ET", vec![]));
                }
            }
        }
        PageContent {
            width: self.width,
            height,
            operations,
        }
    }
}

/// A laid-out page ready to be serialised.
#[derive(Debug)]
pub struct PageContent {
    pub width: f32,
    pub height: f32,
    pub operations: Vec<Operation>,
}

impl PageContent {
    /// Build a one-page PDF document with Helvetica and Helvetica-Bold.
    pub fn into_document(self, title: &str) -> Result<Document, lopdf::Error> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let font_regular = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let font_bold = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                Font::Regular.resource_name() => font_regular,
                Font::Bold.resource_name() => font_bold,
            },
        });

        let content = Content {
            operations: self.operations,
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), self.width.into(), self.height.into()],
        });

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "Resources" => resources_id,
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        let info_id = doc.add_object(dictionary! {
            "Title" => Object::string_literal(title),
            "Producer" => Object::string_literal(concat!("contract-forms ", env!("CARGO_PKG_VERSION"))),
        });
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);
        Ok(doc)
    }
}
