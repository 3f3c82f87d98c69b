use crate::dom::{Document, NodeId};
use scraper::Node;
use std::collections::{HashMap, HashSet};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// One terminal row, in CSS px. Every height and offset in the engine is measured in px.
pub const ROW_HEIGHT: f64 = 16.0;

/// Attribute marking page dividers so their rows render as such.
pub const DIVIDER_MARK: &str = "data-bad-scroll-divider";

const MEDIA_HEIGHT: f64 = 96.0;
const FRAME_HEIGHT: f64 = 150.0;

const HIDDEN_TAGS: [&str; 9] = [
    "head", "script", "style", "noscript", "template", "title", "meta", "link", "base",
];

const INLINE_TAGS: [&str; 34] = [
    "a", "abbr", "b", "bdi", "bdo", "big", "button", "cite", "code", "data", "del", "dfn",
    "em", "font", "i", "input", "ins", "kbd", "label", "mark", "nobr", "q", "s", "samp",
    "select", "small", "span", "strong", "sub", "sup", "textarea", "time", "u", "var",
];

/// Block elements followed by an empty row.
const SPACED_BLOCKS: [&str; 13] = [
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "dl", "table", "blockquote", "pre",
];

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub top: f64,
    pub bottom: f64,
}

impl Rect {
    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineKind {
    Text,
    Link,
    Divider,
    Media,
    Frame,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenderedLine {
    pub text: String,
    pub kind: LineKind,
}

impl RenderedLine {
    fn new(text: impl Into<String>, kind: LineKind) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }
}

/// Geometry and rendered rows of one document at one width.
#[derive(Clone, Debug, Default)]
pub struct Layout {
    /// Every laid-out element and text node. Below a hidden element there are no entries.
    pub rects: HashMap<NodeId, Rect>,
    /// Elements with `position: absolute|fixed`, laid out with zero height.
    pub positioned: HashSet<NodeId>,
    pub height: f64,
    pub lines: Vec<RenderedLine>,
}

impl Layout {
    pub fn rect(&self, id: NodeId) -> Option<Rect> {
        self.rects.get(&id).copied()
    }

    pub fn height_of(&self, id: NodeId) -> f64 {
        self.rect(id).map(|r| r.height()).unwrap_or(0.0)
    }

    pub fn is_static(&self, id: NodeId) -> bool {
        !self.positioned.contains(&id)
    }
}

/// Lays out `doc` for a viewport `width` columns wide. `frames` holds the layouts of
/// documents loaded into iframes, keyed by the iframe element.
pub fn layout_document(
    doc: &Document,
    width: u16,
    viewport_height: f64,
    frames: &HashMap<NodeId, Layout>,
) -> Layout {
    let mut builder = Builder {
        doc,
        frames,
        width: usize::from(width.max(1)),
        viewport_height,
        lines: Vec::new(),
        run: String::new(),
        run_links: Vec::new(),
        markers: Vec::new(),
        pending: Vec::new(),
        spans: Vec::new(),
        positioned: HashSet::new(),
        pre_depth: 0,
        divider_depth: 0,
        align: Vec::new(),
    };
    builder.visit(doc.document_node());
    builder.flush_run(false);
    builder.finish()
}

#[derive(Clone, Copy, Debug)]
enum Pos {
    Row(usize),
    Offset { at: usize, end: bool },
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Align {
    Left,
    Center,
    Right,
}

struct Open {
    marker: usize,
    lines: usize,
    run: usize,
}

struct Builder<'a> {
    doc: &'a Document,
    frames: &'a HashMap<NodeId, Layout>,
    width: usize,
    viewport_height: f64,
    lines: Vec<RenderedLine>,
    /// Pending inline text, whitespace-collapsed, not yet wrapped.
    run: String,
    run_links: Vec<(usize, usize)>,
    markers: Vec<Pos>,
    /// Markers still pointing into `run`.
    pending: Vec<usize>,
    spans: Vec<(NodeId, usize, usize)>,
    positioned: HashSet<NodeId>,
    pre_depth: usize,
    divider_depth: usize,
    align: Vec<Align>,
}

impl Builder<'_> {
    fn visit(&mut self, id: NodeId) {
        let doc = self.doc;
        let Some(node) = doc.node(id) else {
            return;
        };
        match node.value() {
            Node::Text(text) => {
                let open = self.open();
                self.push_text(text);
                self.close(id, open);
            }
            Node::Element(element) => self.visit_element(id, element.name()),
            Node::Document | Node::Fragment => {
                for child in doc.children(id) {
                    self.visit(child);
                }
            }
            _ => {}
        }
    }

    fn visit_element(&mut self, id: NodeId, tag: &str) {
        let doc = self.doc;
        if is_hidden(doc, id, tag) {
            self.zero_rect(id);
            return;
        }
        if matches!(
            doc.style_value(id, "position").as_deref(),
            Some("absolute" | "fixed")
        ) {
            self.positioned.insert(id);
            self.zero_rect(id);
            return;
        }
        match tag {
            "br" => {
                self.flush_run(true);
                return;
            }
            "img" | "video" | "iframe" | "embed" => {
                self.replaced(id, tag);
                return;
            }
            _ => {}
        }

        let block = is_block(doc, id, tag);
        if block {
            self.flush_run(false);
        }
        let open = self.open();
        let divider = doc.attr(id, DIVIDER_MARK).is_some();
        if divider {
            self.divider_depth += 1;
        }
        let aligned = match doc.style_value(id, "text-align").as_deref() {
            Some("center") => Some(Align::Center),
            Some("right") => Some(Align::Right),
            Some("left") => Some(Align::Left),
            _ => None,
        };
        if let Some(align) = aligned {
            self.align.push(align);
        }
        if tag == "pre" {
            self.pre_depth += 1;
        }
        match tag {
            "li" | "dd" => self.push_text("• "),
            "td" | "th" if !self.run.is_empty() => self.push_text(" | "),
            _ => {}
        }

        let link_start = (self.lines.len(), self.run.len());
        for child in doc.children(id) {
            self.visit(child);
        }
        if tag == "a" && doc.attr(id, "href").is_some() {
            let start = if self.lines.len() == link_start.0 {
                link_start.1
            } else {
                0
            };
            self.run_links.push((start, self.run.len()));
        }

        if block {
            self.flush_run(false);
        }
        if tag == "pre" {
            self.pre_depth -= 1;
        }
        if aligned.is_some() {
            self.align.pop();
        }
        if divider {
            self.divider_depth -= 1;
        }
        self.close(id, open);
        if block && SPACED_BLOCKS.contains(&tag) {
            self.blank_line();
        }
    }

    fn replaced(&mut self, id: NodeId, tag: &str) {
        self.flush_run(false);
        let open = self.open();
        let doc = self.doc;
        let frame = self.frames.get(&id);
        let px = if tag == "iframe" {
            attr_px(doc, id, "height")
                .or_else(|| frame.map(|l| l.height))
                .unwrap_or(FRAME_HEIGHT)
        } else {
            let height = attr_px(doc, id, "height").unwrap_or(MEDIA_HEIGHT);
            if doc.style_value(id, "max-height").as_deref() == Some("100vh") {
                height.min(self.viewport_height)
            } else {
                height
            }
        };
        let rows = ((px / ROW_HEIGHT).ceil() as usize).max(1);
        let kind = if tag == "iframe" {
            LineKind::Frame
        } else {
            LineKind::Media
        };
        let mut content: Vec<RenderedLine> = match (tag, frame) {
            ("iframe", Some(frame)) => frame
                .lines
                .iter()
                .take(rows)
                .map(|l| RenderedLine::new(l.text.clone(), kind))
                .collect(),
            ("iframe", None) => vec![RenderedLine::new(
                format!("[frame] {}", doc.attr(id, "src").unwrap_or_default()),
                kind,
            )],
            ("video", _) => vec![RenderedLine::new(
                format!("[video] {}", video_source(doc, id)),
                kind,
            )],
            _ => {
                let label = doc
                    .attr(id, "alt")
                    .filter(|alt| !alt.trim().is_empty())
                    .or_else(|| doc.attr(id, "src"))
                    .unwrap_or_default();
                vec![RenderedLine::new(format!("[image] {label}"), kind)]
            }
        };
        content.truncate(rows);
        content.resize(rows, RenderedLine::new("", kind));
        self.lines.extend(content);
        self.close(id, open);
    }

    fn push_text(&mut self, text: &str) {
        if self.pre_depth > 0 {
            let mut parts = text.split('\n');
            if let Some(first) = parts.next() {
                self.run.push_str(first);
            }
            for part in parts {
                self.flush_run(true);
                self.run.push_str(part);
            }
            return;
        }
        for c in text.chars() {
            if c.is_whitespace() {
                if !self.run.is_empty() && !self.run.ends_with(' ') {
                    self.run.push(' ');
                }
            } else {
                self.run.push(c);
            }
        }
    }

    fn mark(&mut self, end: bool) -> usize {
        let pos = if self.run.is_empty() {
            Pos::Row(self.lines.len())
        } else {
            self.pending.push(self.markers.len());
            Pos::Offset {
                at: self.run.len(),
                end,
            }
        };
        self.markers.push(pos);
        self.markers.len() - 1
    }

    fn open(&mut self) -> Open {
        Open {
            marker: self.mark(false),
            lines: self.lines.len(),
            run: self.run.len(),
        }
    }

    fn close(&mut self, id: NodeId, open: Open) {
        let empty = open.lines == self.lines.len() && open.run == self.run.len();
        let end = if empty { open.marker } else { self.mark(true) };
        self.spans.push((id, open.marker, end));
    }

    fn zero_rect(&mut self, id: NodeId) {
        let open = self.open();
        self.close(id, open);
    }

    fn blank_line(&mut self) {
        if self.lines.last().is_some_and(|l| !l.text.is_empty()) {
            self.lines.push(RenderedLine::new("", LineKind::Text));
        }
    }

    /// Wraps the pending run into rows and pins every marker that pointed into it.
    fn flush_run(&mut self, keep_empty: bool) {
        let ranges = wrap(&self.run, self.width);
        let base = self.lines.len();
        let kind = if self.divider_depth > 0 {
            LineKind::Divider
        } else {
            LineKind::Text
        };
        if ranges.is_empty() && keep_empty {
            self.lines.push(RenderedLine::new("", kind));
        }
        for &(start, end) in &ranges {
            let link = self
                .run_links
                .iter()
                .any(|&(ls, le)| ls < end && le > start);
            let kind = if link && kind == LineKind::Text {
                LineKind::Link
            } else {
                kind
            };
            let text = self.aligned(&self.run[start..end]);
            self.lines.push(RenderedLine::new(text, kind));
        }
        for index in self.pending.drain(..) {
            if let Pos::Offset { at, end } = self.markers[index] {
                let row = if ranges.is_empty() {
                    base
                } else if end {
                    base + line_at(&ranges, at.saturating_sub(1)) + 1
                } else {
                    base + line_at(&ranges, at)
                };
                self.markers[index] = Pos::Row(row);
            }
        }
        self.run.clear();
        self.run_links.clear();
    }

    fn aligned(&self, text: &str) -> String {
        let free = self.width.saturating_sub(text.width());
        match self.align.last() {
            Some(Align::Center) => format!("{}{text}", " ".repeat(free / 2)),
            Some(Align::Right) => format!("{}{text}", " ".repeat(free)),
            _ => text.to_string(),
        }
    }

    fn finish(self) -> Layout {
        let last = self.lines.len();
        let row = |index: usize| match self.markers.get(index) {
            Some(Pos::Row(row)) => *row,
            _ => last,
        };
        let rects = self
            .spans
            .iter()
            .map(|&(id, start, end)| {
                let top = row(start);
                let bottom = row(end).max(top);
                (
                    id,
                    Rect {
                        top: top as f64 * ROW_HEIGHT,
                        bottom: bottom as f64 * ROW_HEIGHT,
                    },
                )
            })
            .collect();
        Layout {
            rects,
            positioned: self.positioned,
            height: last as f64 * ROW_HEIGHT,
            lines: self.lines,
        }
    }
}

fn is_hidden(doc: &Document, id: NodeId, tag: &str) -> bool {
    HIDDEN_TAGS.contains(&tag)
        || doc.attr(id, "hidden").is_some()
        || doc.style_value(id, "display").as_deref() == Some("none")
}

fn is_block(doc: &Document, id: NodeId, tag: &str) -> bool {
    match doc.style_value(id, "display").as_deref() {
        Some("inline" | "inline-block" | "inline-flex") => false,
        Some(_) => true,
        None => !INLINE_TAGS.contains(&tag),
    }
}

fn attr_px(doc: &Document, id: NodeId, name: &str) -> Option<f64> {
    let value = doc.attr(id, name)?.trim();
    let value = value.strip_suffix("px").unwrap_or(value).trim();
    value.parse::<f64>().ok().filter(|v| *v >= 0.0)
}

fn video_source(doc: &Document, id: NodeId) -> String {
    doc.attr(id, "src")
        .map(str::to_string)
        .or_else(|| {
            doc.element_children(id)
                .into_iter()
                .find(|c| doc.tag(*c) == Some("source"))
                .and_then(|c| doc.attr(c, "src").map(str::to_string))
        })
        .unwrap_or_default()
}

fn line_at(ranges: &[(usize, usize)], offset: usize) -> usize {
    ranges
        .iter()
        .rposition(|&(start, _)| start <= offset)
        .unwrap_or(0)
}

/// Greedy word wrap. Returns byte ranges of `text`, one per row; words wider than a row
/// are broken at character boundaries.
fn wrap(text: &str, width: usize) -> Vec<(usize, usize)> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut line: Option<(usize, usize, usize)> = None; // start, end, width
    let mut offset = 0;
    for word in text.split(' ') {
        let start = offset;
        offset += word.len() + 1;
        if word.is_empty() {
            continue;
        }
        let word_width = word.width();
        if let Some((line_start, _, line_width)) = line
            && line_width + 1 + word_width <= width
        {
            line = Some((line_start, start + word.len(), line_width + 1 + word_width));
            continue;
        }
        if let Some((line_start, line_end, _)) = line.take() {
            lines.push((line_start, line_end));
        }
        let mut chunk_start = start;
        let mut chunk_width = 0;
        for (i, c) in word.char_indices() {
            let w = c.width().unwrap_or(0);
            if chunk_width + w > width && chunk_width > 0 {
                lines.push((chunk_start, start + i));
                chunk_start = start + i;
                chunk_width = 0;
            }
            chunk_width += w;
        }
        line = Some((chunk_start, start + word.len(), chunk_width));
    }
    if let Some((line_start, line_end, _)) = line {
        lines.push((line_start, line_end));
    }
    lines
}
