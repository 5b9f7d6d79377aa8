//! PDF export of research documents.
//!
//! Export happens in three steps:
//!
//! 1. The markdown is rendered into an off-screen [`ExportContainer`]. The
//!    [`MarkdownRenderer`] parses it once, and that event stream yields both
//!    the HTML and a flat block tree (headings, paragraphs, list items, code,
//!    tables).
//! 2. The fixed [`StyleSheet`] is applied to the container.
//! 3. A [`PdfExporter`] turns the styled container into PDF bytes. The
//!    default [`LopdfExporter`] lays the blocks out on US-letter pages with
//!    the standard Type1 fonts and writes the file with `lopdf`.
//!
//! The container only lives for the duration of [`export_to_pdf`].

use lopdf::{dictionary, Document, Object, Stream};
use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::error::{ResearchError, Result};
use crate::render::{events_to_html, markdown_options, MarkdownRenderer, DEFAULT_VIEWER_TITLE};

/// `<title>` with every character outside `[A-Za-z0-9]` replaced by `_`,
/// plus `.pdf`.
pub fn pdf_filename(title: &str) -> String {
    let stem: String = title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}.pdf", stem)
}

// ============ Style sheet ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn hex(value: u32) -> Self {
        Self {
            r: ((value >> 16) & 0xff) as u8,
            g: ((value >> 8) & 0xff) as u8,
            b: (value & 0xff) as u8,
        }
    }

    fn components(&self) -> String {
        format!(
            "{:.3} {:.3} {:.3}",
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0
        )
    }
}

/// Fixed export styling. Sizes are CSS pixels; the layout converts them to
/// points at 0.75pt/px.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleSheet {
    pub text_color: Rgb,
    pub accent: Rgb,
    pub base_px: f32,
    pub line_height: f32,
    pub page_margin_in: f32,
    pub padding_x_px: f32,
    pub padding_y_px: f32,

    pub h1_px: f32,
    pub h1_rule_px: f32,
    pub h2_px: f32,
    pub h2_bar_px: f32,
    pub h3_px: f32,

    pub paragraph_gap_px: f32,
    pub justify_paragraphs: bool,
    pub strong_in_accent: bool,

    pub list_indent_px: f32,
    pub list_item_gap_px: f32,

    pub table_px: f32,
    pub table_margin_px: f32,
    pub table_border: Rgb,
    pub header_fill: Rgb,
    pub zebra_fill: Rgb,
    pub cell_padding_x_px: f32,
    pub header_padding_y_px: f32,
    pub cell_padding_y_px: f32,
}

impl Default for StyleSheet {
    fn default() -> Self {
        Self {
            text_color: Rgb::hex(0x1f2d3d),
            accent: Rgb::hex(0x336f51),
            base_px: 16.0,
            line_height: 1.6,
            page_margin_in: 0.5,
            padding_x_px: 40.0,
            padding_y_px: 30.0,
            h1_px: 28.0,
            h1_rule_px: 3.0,
            h2_px: 22.0,
            h2_bar_px: 4.0,
            h3_px: 18.0,
            paragraph_gap_px: 16.0,
            justify_paragraphs: true,
            strong_in_accent: true,
            list_indent_px: 24.0,
            list_item_gap_px: 8.0,
            table_px: 14.0,
            table_margin_px: 20.0,
            table_border: Rgb::hex(0xe0e5ea),
            header_fill: Rgb::hex(0xf8f9fb),
            zebra_fill: Rgb::hex(0xfafbfc),
            cell_padding_x_px: 8.0,
            header_padding_y_px: 12.0,
            cell_padding_y_px: 10.0,
        }
    }
}

impl StyleSheet {
    /// Background of the body row at zero-based `index`. Every second row
    /// (the even ones when counting from one) is shaded.
    pub fn row_fill(&self, index: usize) -> Option<Rgb> {
        (index % 2 == 1).then_some(self.zebra_fill)
    }
}

fn pt(px: f32) -> f32 {
    px * 0.75
}

// ============ Off-screen container ============

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Span {
    pub text: String,
    pub strong: bool,
    pub emphasis: bool,
    pub code: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Heading {
        level: u8,
        spans: Vec<Span>,
    },
    Paragraph(Vec<Span>),
    ListItem {
        depth: usize,
        marker: String,
        spans: Vec<Span>,
    },
    Code(String),
    Rule,
    Table {
        header: Vec<String>,
        rows: Vec<Vec<String>>,
    },
}

/// Rendered document held off-screen while it is exported.
#[derive(Debug)]
pub struct ExportContainer {
    pub title: String,
    pub html: String,
    pub blocks: Vec<Block>,
    pub style: Option<StyleSheet>,
}

impl ExportContainer {
    /// Parse once; the HTML and the block tree share the same event stream.
    pub fn render(renderer: &dyn MarkdownRenderer, markdown: &str, title: &str) -> Result<Self> {
        let events = renderer.events(markdown)?;
        let html = events_to_html(events.iter().cloned(), markdown.len());
        Ok(Self {
            title: title.to_string(),
            html,
            blocks: blocks_from_events(events),
            style: None,
        })
    }

    pub fn apply_styles(&mut self, sheet: StyleSheet) {
        self.style = Some(sheet);
    }
}

#[derive(Default)]
struct TableBuilder {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
    row: Vec<String>,
    cell: String,
}

#[derive(Default)]
struct BlockBuilder {
    blocks: Vec<Block>,
    spans: Vec<Span>,
    strong: usize,
    emphasis: usize,
    heading: Option<u8>,
    lists: Vec<Option<u64>>,
    item_marker: Option<String>,
    code: Option<String>,
    table: Option<TableBuilder>,
}

impl BlockBuilder {
    fn push_text(&mut self, text: &str, code: bool) {
        if let Some(buf) = self.code.as_mut() {
            buf.push_str(text);
            return;
        }
        if let Some(table) = self.table.as_mut() {
            table.cell.push_str(text);
            return;
        }
        self.spans.push(Span {
            text: text.to_string(),
            strong: self.strong > 0,
            emphasis: self.emphasis > 0,
            code,
        });
    }

    fn take_spans(&mut self) -> Vec<Span> {
        let spans = std::mem::take(&mut self.spans);
        if spans.iter().all(|s| s.text.trim().is_empty()) {
            Vec::new()
        } else {
            spans
        }
    }

    fn flush_item(&mut self) {
        let spans = self.take_spans();
        let marker = self.item_marker.take();
        if spans.is_empty() {
            return;
        }
        match marker {
            Some(marker) => self.blocks.push(Block::ListItem {
                depth: self.lists.len().max(1),
                marker,
                spans,
            }),
            // Text after a nested list continues its parent item.
            None if !self.lists.is_empty() => self.blocks.push(Block::ListItem {
                depth: self.lists.len(),
                marker: String::new(),
                spans,
            }),
            None => self.blocks.push(Block::Paragraph(spans)),
        }
    }

    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => self.heading = Some(level as u8),
            Event::End(TagEnd::Heading(_)) => {
                let spans = self.take_spans();
                let level = self.heading.take().unwrap_or(1);
                if !spans.is_empty() {
                    self.blocks.push(Block::Heading { level, spans });
                }
            }
            Event::End(TagEnd::Paragraph) => {
                if self.item_marker.is_some() || !self.lists.is_empty() {
                    self.spans.push(Span {
                        text: " ".into(),
                        ..Span::default()
                    });
                } else {
                    let spans = self.take_spans();
                    if !spans.is_empty() {
                        self.blocks.push(Block::Paragraph(spans));
                    }
                }
            }
            Event::Start(Tag::List(first)) => {
                self.flush_item();
                self.lists.push(first);
            }
            Event::End(TagEnd::List(_)) => {
                self.flush_item();
                self.lists.pop();
            }
            Event::Start(Tag::Item) => {
                let marker = match self.lists.last_mut() {
                    Some(Some(n)) => {
                        let marker = format!("{}.", n);
                        *n += 1;
                        marker
                    }
                    _ => "\u{2022}".to_string(),
                };
                self.item_marker = Some(marker);
            }
            Event::End(TagEnd::Item) => self.flush_item(),
            Event::Start(Tag::CodeBlock(_)) => self.code = Some(String::new()),
            Event::End(TagEnd::CodeBlock) => {
                if let Some(code) = self.code.take() {
                    self.blocks
                        .push(Block::Code(code.trim_end_matches('\n').to_string()));
                }
            }
            Event::Start(Tag::Table(_)) => self.table = Some(TableBuilder::default()),
            Event::End(TagEnd::TableHead) => {
                if let Some(table) = self.table.as_mut() {
                    table.header = std::mem::take(&mut table.row);
                }
            }
            Event::End(TagEnd::TableRow) => {
                if let Some(table) = self.table.as_mut() {
                    let row = std::mem::take(&mut table.row);
                    table.rows.push(row);
                }
            }
            Event::End(TagEnd::TableCell) => {
                if let Some(table) = self.table.as_mut() {
                    let cell = std::mem::take(&mut table.cell);
                    table.row.push(cell.trim().to_string());
                }
            }
            Event::End(TagEnd::Table) => {
                if let Some(table) = self.table.take() {
                    self.blocks.push(Block::Table {
                        header: table.header,
                        rows: table.rows,
                    });
                }
            }
            Event::Start(Tag::Strong) => self.strong += 1,
            Event::End(TagEnd::Strong) => self.strong = self.strong.saturating_sub(1),
            Event::Start(Tag::Emphasis) => self.emphasis += 1,
            Event::End(TagEnd::Emphasis) => self.emphasis = self.emphasis.saturating_sub(1),
            Event::Text(text) => self.push_text(&text, false),
            Event::Code(text) => self.push_text(&text, true),
            Event::SoftBreak | Event::HardBreak => self.push_text(" ", false),
            Event::TaskListMarker(done) => {
                self.push_text(if done { "[x] " } else { "[ ] " }, false)
            }
            Event::Rule => self.blocks.push(Block::Rule),
            _ => {}
        }
    }

    fn finish(mut self) -> Vec<Block> {
        self.flush_item();
        self.blocks
    }
}

/// Flatten markdown into the blocks the PDF layout understands.
pub fn parse_blocks(markdown: &str) -> Vec<Block> {
    blocks_from_events(Parser::new_ext(markdown, markdown_options()))
}

pub fn blocks_from_events<'a>(events: impl IntoIterator<Item = Event<'a>>) -> Vec<Block> {
    let mut builder = BlockBuilder::default();
    for event in events {
        builder.event(event);
    }
    builder.finish()
}

// ============ Exporters ============

/// Turns a styled container into a PDF document.
pub trait PdfExporter: Send + Sync {
    fn export(&self, container: &ExportContainer, filename: &str) -> Result<Vec<u8>>;
}

/// A finished export.
#[derive(Debug, Clone)]
pub struct PdfFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl PdfFile {
    /// Write the PDF into `dir` under its filename.
    pub fn save_in(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(&self.filename);
        std::fs::write(&path, &self.bytes)?;
        Ok(path)
    }
}

/// Render `content`, style it, and export it as `<title>.pdf`.
///
/// The off-screen container is dropped before returning whether or not the
/// exporter succeeded.
pub fn export_to_pdf(
    renderer: &dyn MarkdownRenderer,
    exporter: &dyn PdfExporter,
    content: &str,
    title: &str,
) -> Result<PdfFile> {
    let title = if title.trim().is_empty() {
        DEFAULT_VIEWER_TITLE
    } else {
        title
    };
    let filename = pdf_filename(title);

    let mut container = ExportContainer::render(renderer, content, title)?;
    container.apply_styles(StyleSheet::default());
    let result = exporter.export(&container, &filename);
    drop(container);

    match result {
        Ok(bytes) => {
            info!(%filename, size = bytes.len(), "exported PDF");
            Ok(PdfFile { filename, bytes })
        }
        Err(e) => {
            error!(error = %e, %filename, "PDF generation failed");
            Err(e)
        }
    }
}

/// Lays the container out on US-letter pages and serializes it with lopdf.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExporter;

impl PdfExporter for LopdfExporter {
    fn export(&self, container: &ExportContainer, filename: &str) -> Result<Vec<u8>> {
        let sheet = container
            .style
            .as_ref()
            .ok_or_else(|| ResearchError::Export("no style sheet applied".to_string()))?;

        let mut layout = Layout::new(sheet);
        for block in &container.blocks {
            layout.block(block);
        }
        let pages = layout.finish();
        debug!(%filename, pages = pages.len(), "laid out PDF");

        write_document(&container.title, pages)
    }
}

// ============ Layout ============

const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Font {
    Regular,
    Bold,
    Italic,
    Mono,
}

impl Font {
    const ALL: [Font; 4] = [Font::Regular, Font::Bold, Font::Italic, Font::Mono];

    fn resource(&self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
            Font::Italic => "F3",
            Font::Mono => "F4",
        }
    }

    fn base_font(&self) -> &'static str {
        match self {
            Font::Regular => "Helvetica",
            Font::Bold => "Helvetica-Bold",
            Font::Italic => "Helvetica-Oblique",
            Font::Mono => "Courier",
        }
    }

    /// Approximate advance width of `c` in em.
    fn em(&self, c: char) -> f32 {
        if *self == Font::Mono {
            return 0.6;
        }
        let w = match c {
            'i' | 'j' | 'l' | '.' | ',' | ':' | ';' | '\'' | '!' | '|' => 0.24,
            'f' | 't' | 'r' | ' ' | '(' | ')' | '[' | ']' | '-' | '/' => 0.32,
            'm' | 'w' | 'M' | 'W' | '@' => 0.85,
            'A'..='Z' => 0.68,
            '0'..='9' => 0.556,
            _ => 0.54,
        };
        if *self == Font::Bold {
            w * 1.05
        } else {
            w
        }
    }

    fn width(&self, text: &str, size: f32) -> f32 {
        text.chars().map(|c| self.em(c)).sum::<f32>() * size
    }
}

struct Word {
    text: String,
    font: Font,
    color: Rgb,
    space_before: bool,
    width: f32,
}

#[derive(Clone, Copy)]
struct TextStyle {
    size: f32,
    font: Font,
    color: Rgb,
}

fn words(spans: &[Span], base: TextStyle, sheet: &StyleSheet) -> Vec<Word> {
    let mut out = Vec::new();
    let mut pending_space = false;
    for span in spans {
        let (font, color) = if span.code {
            (Font::Mono, base.color)
        } else if span.strong {
            let color = if sheet.strong_in_accent {
                sheet.accent
            } else {
                base.color
            };
            (Font::Bold, color)
        } else if span.emphasis {
            (Font::Italic, base.color)
        } else {
            (base.font, base.color)
        };

        let mut current = String::new();
        let mut current_space = false;
        for c in span.text.chars() {
            if c.is_whitespace() {
                if !current.is_empty() {
                    let text = std::mem::take(&mut current);
                    out.push(Word {
                        width: font.width(&text, base.size),
                        text,
                        font,
                        color,
                        space_before: current_space,
                    });
                }
                pending_space = true;
            } else {
                if current.is_empty() {
                    current_space = pending_space;
                    pending_space = false;
                }
                current.push(c);
            }
        }
        if !current.is_empty() {
            out.push(Word {
                width: font.width(&current, base.size),
                text: current,
                font,
                color,
                space_before: current_space,
            });
        }
    }
    out
}

fn wrap(words: Vec<Word>, max_width: f32, size: f32) -> Vec<Vec<Word>> {
    let space = Font::Regular.em(' ') * size;
    let mut lines: Vec<Vec<Word>> = Vec::new();
    let mut line: Vec<Word> = Vec::new();
    let mut width = 0.0;
    for word in words {
        let gap = if word.space_before && !line.is_empty() {
            space
        } else {
            0.0
        };
        if !line.is_empty() && width + gap + word.width > max_width {
            lines.push(std::mem::take(&mut line));
            width = 0.0;
        }
        width += if line.is_empty() { 0.0 } else { gap } + word.width;
        line.push(word);
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

fn line_width(line: &[Word], size: f32) -> f32 {
    let space = Font::Regular.em(' ') * size;
    line.iter()
        .enumerate()
        .map(|(i, w)| w.width + if i > 0 && w.space_before { space } else { 0.0 })
        .sum()
}

fn pdf_text(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 2);
    out.push(b'(');
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push(b'\\');
                out.push(c as u8);
            }
            c if c.is_ascii() && !c.is_control() => out.push(c as u8),
            c => out.push(win_ansi(c).unwrap_or(b'?')),
        }
    }
    out.push(b')');
    out
}

fn win_ansi(c: char) -> Option<u8> {
    match c {
        '\u{20ac}' => Some(0x80),
        '\u{2026}' => Some(0x85),
        '\u{2018}' => Some(0x91),
        '\u{2019}' => Some(0x92),
        '\u{201c}' => Some(0x93),
        '\u{201d}' => Some(0x94),
        '\u{2022}' => Some(0x95),
        '\u{2013}' => Some(0x96),
        '\u{2014}' => Some(0x97),
        '\u{a0}'..='\u{ff}' => Some(c as u32 as u8),
        _ => None,
    }
}

struct Layout<'a> {
    sheet: &'a StyleSheet,
    pages: Vec<Vec<u8>>,
    current: Vec<u8>,
    y: f32,
    left: f32,
    width: f32,
    top: f32,
    bottom: f32,
}

impl<'a> Layout<'a> {
    fn new(sheet: &'a StyleSheet) -> Self {
        let margin = sheet.page_margin_in * 72.0;
        let left = margin + pt(sheet.padding_x_px);
        let top = PAGE_HEIGHT - margin;
        Self {
            sheet,
            pages: Vec::new(),
            current: Vec::new(),
            y: top - pt(sheet.padding_y_px),
            left,
            width: PAGE_WIDTH - 2.0 * left,
            top,
            bottom: margin,
        }
    }

    fn op(&mut self, op: String) {
        self.current.extend_from_slice(op.as_bytes());
        self.current.push(b'\n');
    }

    fn new_page(&mut self) {
        let page = std::mem::take(&mut self.current);
        self.pages.push(page);
        self.y = self.top;
    }

    fn reserve(&mut self, height: f32) {
        if self.y - height < self.bottom && self.y < self.top {
            self.new_page();
        }
    }

    fn gap(&mut self, height: f32) {
        self.y -= height;
        if self.y < self.bottom {
            self.new_page();
        }
    }

    fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, color: Rgb) {
        self.op(format!(
            "{} rg {:.2} {:.2} {:.2} {:.2} re f",
            color.components(),
            x,
            y,
            w,
            h
        ));
    }

    fn stroke_rect(&mut self, x: f32, y: f32, w: f32, h: f32, color: Rgb) {
        self.op(format!(
            "{} RG 0.75 w {:.2} {:.2} {:.2} {:.2} re S",
            color.components(),
            x,
            y,
            w,
            h
        ));
    }

    fn rule(&mut self, x1: f32, x2: f32, y: f32, thickness: f32, color: Rgb) {
        self.op(format!(
            "{} RG {:.2} w {:.2} {:.2} m {:.2} {:.2} l S",
            color.components(),
            thickness,
            x1,
            y,
            x2,
            y
        ));
    }

    fn text(&mut self, x: f32, baseline: f32, size: f32, font: Font, color: Rgb, text: &str) {
        self.op(format!(
            "BT /{} {:.2} Tf {} rg {:.2} {:.2} Td",
            font.resource(),
            size,
            color.components(),
            x,
            baseline
        ));
        self.current.extend_from_slice(&pdf_text(text));
        self.current.extend_from_slice(b" Tj ET\n");
    }

    /// Draw one wrapped line with its top at the current position.
    fn line(&mut self, line: &[Word], x: f32, max_width: f32, size: f32, justify: bool) {
        let leading = size * self.sheet.line_height;
        self.reserve(leading);
        let baseline = self.y - leading / 2.0 - size * 0.25;

        let space = Font::Regular.em(' ') * size;
        let gaps = line.iter().skip(1).filter(|w| w.space_before).count();
        let extra = if justify && gaps > 0 {
            ((max_width - line_width(line, size)) / gaps as f32).max(0.0)
        } else {
            0.0
        };

        let mut cursor = x;
        for (i, word) in line.iter().enumerate() {
            if i > 0 && word.space_before {
                cursor += space + extra;
            }
            self.text(cursor, baseline, size, word.font, word.color, &word.text);
            cursor += word.width;
        }
        self.y -= leading;
    }

    fn paragraph(&mut self, spans: &[Span], style: TextStyle, x: f32, max_width: f32, justify: bool) {
        let lines = wrap(words(spans, style, self.sheet), max_width, style.size);
        let count = lines.len();
        for (i, line) in lines.iter().enumerate() {
            self.line(line, x, max_width, style.size, justify && i + 1 < count);
        }
    }

    fn block(&mut self, block: &Block) {
        let sheet = self.sheet;
        let body = TextStyle {
            size: pt(sheet.base_px),
            font: Font::Regular,
            color: sheet.text_color,
        };

        match block {
            Block::Heading { level, spans } => self.heading(*level, spans),
            Block::Paragraph(spans) => {
                self.paragraph(spans, body, self.left, self.width, sheet.justify_paragraphs);
                self.gap(pt(sheet.paragraph_gap_px));
            }
            Block::ListItem {
                depth,
                marker,
                spans,
            } => {
                let indent = pt(sheet.list_indent_px) * *depth as f32;
                let x = self.left + indent;
                if !marker.is_empty() {
                    let leading = body.size * sheet.line_height;
                    self.reserve(leading);
                    let baseline = self.y - leading / 2.0 - body.size * 0.25;
                    let marker_x = x - Font::Regular.width(marker, body.size) - 4.0;
                    self.text(marker_x, baseline, body.size, Font::Regular, body.color, marker);
                }
                self.paragraph(spans, body, x, self.width - indent, false);
                self.gap(pt(sheet.list_item_gap_px));
            }
            Block::Code(code) => {
                let style = TextStyle {
                    size: pt(sheet.table_px),
                    font: Font::Mono,
                    color: sheet.text_color,
                };
                for source_line in code.lines() {
                    let span = Span {
                        text: source_line.to_string(),
                        code: true,
                        ..Span::default()
                    };
                    if source_line.trim().is_empty() {
                        self.gap(style.size * sheet.line_height);
                    } else {
                        self.paragraph(&[span], style, self.left, self.width, false);
                    }
                }
                self.gap(pt(sheet.paragraph_gap_px));
            }
            Block::Rule => {
                self.gap(pt(sheet.paragraph_gap_px) / 2.0);
                let y = self.y;
                self.rule(self.left, self.left + self.width, y, 0.75, sheet.table_border);
                self.gap(pt(sheet.paragraph_gap_px) / 2.0);
            }
            Block::Table { header, rows } => self.table(header, rows),
        }
    }

    fn heading(&mut self, level: u8, spans: &[Span]) {
        let sheet = self.sheet;
        let (px, color, top_px, bottom_px) = match level {
            1 => (sheet.h1_px, sheet.accent, 30.0, 20.0),
            2 => (sheet.h2_px, sheet.text_color, 25.0, 15.0),
            _ => (sheet.h3_px, sheet.text_color, 20.0, 12.0),
        };
        let style = TextStyle {
            size: pt(px),
            font: Font::Bold,
            color,
        };
        // Headings carry their colour; strong spans inside stay bold.
        let plain: Vec<Span> = spans
            .iter()
            .map(|s| Span {
                strong: false,
                ..s.clone()
            })
            .collect();

        if self.y < self.top {
            self.gap(pt(top_px));
        }
        // Keep the heading with at least one following line.
        self.reserve(style.size * sheet.line_height * 2.0);

        let (x, width) = if level == 2 {
            let bar = pt(sheet.h2_bar_px);
            (self.left + bar + pt(12.0), self.width - bar - pt(12.0))
        } else {
            (self.left, self.width)
        };

        let start = self.y;
        self.paragraph(&plain, style, x, width, false);

        match level {
            1 => {
                self.y -= pt(12.0);
                let y = self.y;
                self.rule(self.left, self.left + self.width, y, pt(sheet.h1_rule_px), sheet.accent);
            }
            2 => {
                let bar = pt(sheet.h2_bar_px);
                let x = self.left + bar / 2.0;
                let end = self.y;
                self.op(format!(
                    "{} RG {:.2} w {:.2} {:.2} m {:.2} {:.2} l S",
                    sheet.accent.components(),
                    bar,
                    x,
                    start,
                    x,
                    end
                ));
            }
            _ => {}
        }
        self.gap(pt(bottom_px));
    }

    fn table(&mut self, header: &[String], rows: &[Vec<String>]) {
        let sheet = self.sheet;
        let columns = header
            .len()
            .max(rows.iter().map(|r| r.len()).max().unwrap_or(0));
        if columns == 0 {
            return;
        }
        let size = pt(sheet.table_px);
        let leading = size * sheet.line_height;
        let col_width = self.width / columns as f32;
        let pad_x = pt(sheet.cell_padding_x_px);

        self.gap(pt(sheet.table_margin_px));

        // Cell text never takes the accent colour.
        let mut cell_sheet = sheet.clone();
        cell_sheet.strong_in_accent = false;

        let draw_row = |layout: &mut Self, cells: &[String], font: Font, pad_y: f32, fill: Option<Rgb>| {
            let wrapped: Vec<Vec<Vec<Word>>> = (0..columns)
                .map(|i| {
                    let text = cells.get(i).map(String::as_str).unwrap_or("");
                    let span = Span {
                        text: text.to_string(),
                        strong: font == Font::Bold,
                        ..Span::default()
                    };
                    let style = TextStyle {
                        size,
                        font,
                        color: sheet.text_color,
                    };
                    wrap(words(&[span], style, &cell_sheet), col_width - 2.0 * pad_x, size)
                })
                .collect();
            let line_count = wrapped.iter().map(|c| c.len()).max().unwrap_or(0).max(1);
            let height = line_count as f32 * leading + 2.0 * pad_y;

            layout.reserve(height);
            let top = layout.y;
            let bottom = top - height;
            for col in 0..columns {
                let x = layout.left + col as f32 * col_width;
                if let Some(color) = fill {
                    layout.fill_rect(x, bottom, col_width, height, color);
                }
                layout.stroke_rect(x, bottom, col_width, height, sheet.table_border);
            }
            for (col, lines) in wrapped.iter().enumerate() {
                let x = layout.left + col as f32 * col_width + pad_x;
                for (i, line) in lines.iter().enumerate() {
                    let baseline = top - pad_y - i as f32 * leading - leading / 2.0 - size * 0.25;
                    let mut cursor = x;
                    for (j, word) in line.iter().enumerate() {
                        if j > 0 && word.space_before {
                            cursor += Font::Regular.em(' ') * size;
                        }
                        layout.text(cursor, baseline, size, word.font, word.color, &word.text);
                        cursor += word.width;
                    }
                }
            }
            layout.y = bottom;
        };

        if !header.is_empty() {
            draw_row(
                self,
                header,
                Font::Bold,
                pt(sheet.header_padding_y_px),
                Some(sheet.header_fill),
            );
        }
        for (i, row) in rows.iter().enumerate() {
            draw_row(
                self,
                row,
                Font::Regular,
                pt(sheet.cell_padding_y_px),
                sheet.row_fill(i),
            );
        }

        self.gap(pt(sheet.table_margin_px));
    }

    fn finish(mut self) -> Vec<Vec<u8>> {
        if !self.current.is_empty() || self.pages.is_empty() {
            let page = std::mem::take(&mut self.current);
            self.pages.push(page);
        }
        self.pages
    }
}

fn write_document(title: &str, pages: Vec<Vec<u8>>) -> Result<Vec<u8>> {
    let mut doc = Document::with_version("1.5");

    let pages_id = doc.new_object_id();
    let resources_id = doc.new_object_id();

    let mut fonts = lopdf::Dictionary::new();
    for font in Font::ALL {
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => font.base_font(),
            "Encoding" => "WinAnsiEncoding",
        });
        fonts.set(font.resource(), font_id);
    }

    doc.objects.insert(
        resources_id,
        Object::Dictionary(dictionary! {
            "Font" => fonts,
        }),
    );

    let mut page_ids = Vec::with_capacity(pages.len());
    for content in pages {
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        page_ids.push(page_id);
    }

    let kids: Vec<Object> = page_ids.iter().map(|id| (*id).into()).collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_ids.len() as i64,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(title),
        "Producer" => Object::string_literal(concat!("research ", env!("CARGO_PKG_VERSION"))),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| ResearchError::Export(e.to_string()))?;
    Ok(buffer)
}
