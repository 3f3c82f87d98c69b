use crate::dom::{Document, NodeId};
use crate::layout::Layout;
use crate::types::RuleType;
use crate::utils::log_msg;

/// Result of evaluating a page-element rule. Rule errors land in `error`, never upward.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Located {
    pub elements: Vec<NodeId>,
    pub error: Option<String>,
}

pub fn locate_elements(doc: &Document, rule_type: RuleType, rule: &str) -> Located {
    match doc.query_all(rule_type, rule) {
        Ok(elements) => Located {
            elements,
            error: None,
        },
        Err(e) => {
            log_msg("warn", &format!("Locating elements failed: {e}"));
            Located {
                elements: Vec::new(),
                error: Some(e.to_string()),
            }
        }
    }
}

enum Insertion {
    Found(NodeId, String),
    /// The last element has no next sibling; a placeholder goes at the end of its parent.
    AfterLast(NodeId),
    Missing(String),
}

fn find_insertion(
    doc: &Document,
    elements: &[NodeId],
    use_insert_rule: bool,
    rule_type: RuleType,
    insert_rule: &str,
) -> Insertion {
    let mut details = String::new();
    if use_insert_rule && !insert_rule.trim().is_empty() {
        match doc.query_first(rule_type, insert_rule) {
            Ok(Some(id)) => {
                return Insertion::Found(id, "derived from the insert before rule".to_string());
            }
            Ok(None) => details = "the insert before rule matched nothing".to_string(),
            Err(e) => details = e.to_string(),
        }
    }
    let Some(&last) = elements.last() else {
        return Insertion::Missing(details);
    };
    match doc.next_sibling(last) {
        Some(next) => Insertion::Found(next, "the last element's next sibling".to_string()),
        None => Insertion::AfterLast(last),
    }
}

/// The node new elements are inserted before. The insert rule is only evaluated when
/// `use_insert_rule` is set, which callers do for the first page only.
pub fn insertion_point(
    doc: &mut Document,
    elements: &[NodeId],
    use_insert_rule: bool,
    rule_type: RuleType,
    insert_rule: &str,
) -> Option<NodeId> {
    match find_insertion(doc, elements, use_insert_rule, rule_type, insert_rule) {
        Insertion::Found(id, details) => {
            log_msg("info", &format!("Insertion point is {details}"));
            Some(id)
        }
        Insertion::AfterLast(last) => {
            let parent = doc.parent(last)?;
            let placeholder = doc.create_text(" ");
            doc.append_child(parent, placeholder);
            log_msg("info", "Insertion point is a new node created by the document");
            Some(placeholder)
        }
        Insertion::Missing(details) => {
            log_msg("warn", &format!("No insertion point: {details}"));
            None
        }
    }
}

/// Read-only variant of [`insertion_point`]: when a placeholder would be needed, the last
/// element itself is returned so callers can still report its parent.
pub fn preview_insertion_point(
    doc: &Document,
    elements: &[NodeId],
    use_insert_rule: bool,
    rule_type: RuleType,
    insert_rule: &str,
) -> (Option<NodeId>, String) {
    match find_insertion(doc, elements, use_insert_rule, rule_type, insert_rule) {
        Insertion::Found(id, details) => (Some(id), details),
        Insertion::AfterLast(last) => (
            Some(last),
            "a new node created by the document".to_string(),
        ),
        Insertion::Missing(details) => (None, details),
    }
}

/// First element with height that is statically positioned, else the first with height,
/// else the first element at all. Text nodes never qualify.
pub fn page_element(doc: &Document, layout: &Layout, elements: &[NodeId]) -> Option<NodeId> {
    let element_nodes: Vec<NodeId> = elements
        .iter()
        .copied()
        .filter(|id| doc.is_element(*id))
        .collect();
    let with_height: Vec<NodeId> = element_nodes
        .iter()
        .copied()
        .filter(|id| layout.height_of(*id) > 0.0)
        .collect();
    with_height
        .iter()
        .copied()
        .find(|id| layout.is_static(*id))
        .or_else(|| with_height.first().copied())
        .or_else(|| element_nodes.first().copied())
}

/// Divider tag and its inner container tag, chosen so strict parents keep the divider.
pub fn divider_tags(parent_tag: Option<&str>) -> (&'static str, &'static str) {
    match parent_tag.map(str::to_ascii_lowercase).as_deref() {
        Some("dl") => ("dt", "dd"),
        Some("ol" | "ul") => ("li", "div"),
        Some("table" | "tbody") => ("tr", "td"),
        Some("thead") => ("tr", "th"),
        _ => ("div", "div"),
    }
}

/// Column span for a table-row divider: the previous divider's cell span when it has
/// one, else the summed `colspan` of the first row in the table being divided, else 1.
pub fn calculate_col_span(doc: &Document, previous_divider: Option<NodeId>, insert: NodeId) -> u32 {
    let previous = previous_divider
        .and_then(|divider| doc.element_children(divider).first().copied())
        .and_then(|cell| doc.attr(cell, "colspan"))
        .and_then(|span| span.trim().parse::<u32>().ok())
        .filter(|span| *span > 0);
    if let Some(span) = previous {
        return span;
    }
    let first_row = doc.parent(insert).and_then(|table| {
        doc.descendant_elements(table)
            .into_iter()
            .find(|id| doc.tag(*id) == Some("tr"))
    });
    let span: u32 = first_row
        .map(|row| {
            doc.element_children(row)
                .into_iter()
                .filter(|cell| matches!(doc.tag(*cell), Some("td" | "th")))
                .map(|cell| {
                    doc.attr(cell, "colspan")
                        .and_then(|span| span.trim().parse::<u32>().ok())
                        .filter(|span| *span > 0)
                        .unwrap_or(1)
                })
                .sum()
        })
        .unwrap_or(0);
    span.max(1)
}

/// Distance from the insertion point to the bottom of the document, the trailing content
/// pixel detection ignores. Falls back to the lowest element bottom, then to three
/// quarters of the document.
pub fn calculate_offset(
    doc: &Document,
    layout: &Layout,
    bottom: f64,
    insert: Option<NodeId>,
    elements: &[NodeId],
) -> f64 {
    let mut difference = insert
        .and_then(|id| layout.rect(id))
        .map(|r| r.top)
        .unwrap_or(0.0);
    if difference <= 0.0 {
        difference = elements
            .iter()
            .filter(|id| doc.is_element(**id))
            .filter_map(|id| layout.rect(*id))
            .map(|r| r.bottom)
            .fold(0.0, f64::max);
    }
    if difference <= 0.0 {
        difference = bottom * 0.75;
    }
    let offset = bottom - difference;
    log_msg(
        "info",
        &format!("Offset {offset} from bottom {bottom} and difference {difference}"),
    );
    offset
}
