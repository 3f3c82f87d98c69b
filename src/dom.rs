use crate::error::{Error, Result};
use crate::types::RuleType;
use crate::utils::log_msg;
use crate::xpath;
use ego_tree::NodeRef;
use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

pub use ego_tree::NodeId;

/// Properties that reflect a URL attribute and resolve against the base URL on read.
const URL_PROPERTIES: [&str; 4] = ["href", "src", "action", "formaction"];

/// Elements whose text is never rendered.
const UNRENDERED: [&str; 4] = ["script", "style", "noscript", "template"];

const VOID_ELEMENTS: [&str; 13] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// A parsed, mutable HTML document.
///
/// Node handles are `NodeId`s into the underlying tree. Detached nodes keep their ids
/// but stop being reachable from the root, which is what [`Document::contains`] checks.
#[derive(Clone, Debug)]
pub struct Document {
    html: Html,
    url: Option<Url>,
    revision: u64,
}

impl Document {
    pub fn parse(text: &str, url: Option<Url>) -> Self {
        Self::parse_as(text, url, "text/html")
    }

    pub fn parse_as(text: &str, url: Option<Url>, content_type: &str) -> Self {
        if !content_type.contains("html") {
            log_msg(
                "info",
                &format!("Parsing {content_type} with the HTML parser"),
            );
        }
        Self {
            html: Html::parse_document(text),
            url,
            revision: 0,
        }
    }

    /// Bumped by every mutation; layout caches key on it.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    pub(crate) fn node(&self, id: NodeId) -> Option<NodeRef<'_, Node>> {
        self.html.tree.get(id)
    }

    pub fn document_node(&self) -> NodeId {
        self.html.tree.root().id()
    }

    pub fn root(&self) -> NodeId {
        self.html.root_element().id()
    }

    pub fn body(&self) -> Option<NodeId> {
        self.first_by_tag("body")
    }

    pub fn head(&self) -> Option<NodeId> {
        self.first_by_tag("head")
    }

    fn first_by_tag(&self, tag: &str) -> Option<NodeId> {
        self.html
            .tree
            .root()
            .descendants()
            .find(|n| n.value().as_element().is_some_and(|e| e.name() == tag))
            .map(|n| n.id())
    }

    pub fn title(&self) -> String {
        self.first_by_tag("title")
            .map(|id| self.raw_text(id).trim().to_string())
            .unwrap_or_default()
    }

    /// `<base href>` resolved against the document URL, else the document URL.
    pub fn base_url(&self) -> Option<Url> {
        let base = self.first_by_tag("base").and_then(|id| self.attr(id, "href"));
        match (base, &self.url) {
            (Some(href), Some(url)) => url.join(href).ok().or_else(|| Some(url.clone())),
            (Some(href), None) => Url::parse(href).ok(),
            (None, url) => url.clone(),
        }
    }

    pub fn resolve(&self, value: &str) -> String {
        match self.base_url() {
            Some(base) => base
                .join(value.trim())
                .map(|u| u.to_string())
                .unwrap_or_else(|_| value.to_string()),
            None => value.to_string(),
        }
    }

    // --- queries ---

    /// Elements matching a CSS selector, attached nodes only, in document order.
    pub fn select_all(&self, css: &str) -> Result<Vec<NodeId>> {
        let selector =
            Selector::parse(css).map_err(|e| Error::rule(css, format!("{e:?}")))?;
        Ok(self
            .html
            .tree
            .root()
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|e| selector.matches(e))
            .map(|e| e.id())
            .collect())
    }

    pub fn select_first(&self, css: &str) -> Result<Option<NodeId>> {
        Ok(self.select_all(css)?.into_iter().next())
    }

    pub fn query_all(&self, rule_type: RuleType, rule: &str) -> Result<Vec<NodeId>> {
        match rule_type {
            RuleType::Selector => self.select_all(rule),
            RuleType::Xpath => xpath::evaluate(self, rule),
        }
    }

    pub fn query_first(&self, rule_type: RuleType, rule: &str) -> Result<Option<NodeId>> {
        Ok(self.query_all(rule_type, rule)?.into_iter().next())
    }

    // --- node inspection ---

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.node(id)?.value().as_element().map(|e| e.name())
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(|n| n.value().is_element())
    }

    pub fn is_text(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(|n| n.value().is_text())
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.node(id)?.value().as_element()?.attr(name)
    }

    /// Attributes in source order.
    pub fn attrs(&self, id: NodeId) -> Vec<(String, String)> {
        self.node(id)
            .and_then(|n| n.value().as_element())
            .map(|e| {
                e.attrs()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Inline style declaration value, e.g. `style_value(id, "position")`.
    pub fn style_value(&self, id: NodeId, property: &str) -> Option<String> {
        let style = self.attr(id, "style")?;
        style.split(';').find_map(|decl| {
            let (name, value) = decl.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case(property)
                .then(|| value.trim().to_ascii_lowercase())
        })
    }

    /// Rendered text: script and style content is skipped.
    pub fn text(&self, id: NodeId) -> String {
        let mut out = String::new();
        if let Some(node) = self.node(id) {
            collect_text(node, &mut out, true);
        }
        out
    }

    /// Every descendant text node, including script and style bodies.
    pub fn raw_text(&self, id: NodeId) -> String {
        let mut out = String::new();
        if let Some(node) = self.node(id) {
            collect_text(node, &mut out, false);
        }
        out
    }

    pub fn inner_html(&self, id: NodeId) -> String {
        self.node(id)
            .and_then(ElementRef::wrap)
            .map(|e| e.inner_html())
            .unwrap_or_default()
    }

    pub fn outer_html(&self, id: NodeId) -> String {
        self.node(id)
            .and_then(ElementRef::wrap)
            .map(|e| e.html())
            .unwrap_or_default()
    }

    /// Reads a property path the way script property access would: URL properties come
    /// back absolute, `dataset.fooBar` reads `data-foo-bar`, `attributes.x[.value]`
    /// reads attribute `x`, anything else falls back to the attribute of that name.
    pub fn property(&self, id: NodeId, path: &[String]) -> Option<String> {
        let first = path.first()?;
        let value = match (first.as_str(), path.get(1)) {
            ("dataset", Some(key)) => self.attr(id, &format!("data-{}", kebab(key)))?.to_string(),
            ("attributes", Some(name)) => {
                if path.len() > 2 && path[2] != "value" {
                    return None;
                }
                self.attr(id, name)?.to_string()
            }
            (_, Some(_)) => return None,
            (name, None) => {
                let lower = name.to_ascii_lowercase();
                if URL_PROPERTIES.contains(&lower.as_str()) {
                    let raw = self.attr(id, &lower)?;
                    self.resolve(raw)
                } else {
                    match name {
                        "textContent" | "innerText" => self.text(id),
                        "innerHTML" => self.inner_html(id),
                        "outerHTML" => self.outer_html(id),
                        "className" => self.attr(id, "class")?.to_string(),
                        _ => self.attr(id, &lower)?.to_string(),
                    }
                }
            }
        };
        (!value.is_empty()).then_some(value)
    }

    // --- navigation ---

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)?.parent().map(|p| p.id())
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)?.next_sibling().map(|n| n.id())
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id)
            .map(|n| n.children().map(|c| c.id()).collect())
            .unwrap_or_default()
    }

    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id)
            .map(|n| {
                n.children()
                    .filter(|c| c.value().is_element())
                    .map(|c| c.id())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every element below `id` in document order, `id` excluded.
    pub fn descendant_elements(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id)
            .map(|n| {
                n.descendants()
                    .skip(1)
                    .filter(|d| d.value().is_element())
                    .map(|d| d.id())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True when `ancestor` is a proper ancestor of `id`.
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        self.node(id)
            .is_some_and(|n| n.ancestors().any(|a| a.id() == ancestor))
    }

    /// True when the node is still reachable from the document root.
    pub fn contains(&self, id: NodeId) -> bool {
        let root = self.document_node();
        id == root || self.is_ancestor(root, id)
    }

    // --- mutation ---

    pub fn create_element(&mut self, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
        let value = build_element(tag, attrs)
            .or_else(|| build_element("div", attrs))
            .unwrap_or(Node::Fragment);
        self.touch();
        self.html.tree.orphan(value).id()
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        let value = build_text(text).unwrap_or(Node::Fragment);
        self.touch();
        self.html.tree.orphan(value).id()
    }

    pub fn create_element_with_text(
        &mut self,
        tag: &str,
        attrs: &[(&str, &str)],
        text: &str,
    ) -> NodeId {
        let element = self.create_element(tag, attrs);
        if !text.is_empty() {
            let text = self.create_text(text);
            self.append_child(element, text);
        }
        element
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if parent == child || self.is_ancestor(child, parent) {
            return false;
        }
        if self.node(parent).and_then(|p| p.last_child()).map(|c| c.id()) == Some(child) {
            return true;
        }
        match self.html.tree.get_mut(parent) {
            Some(mut node) => {
                node.append_id(child);
                self.touch();
                true
            }
            None => false,
        }
    }

    pub fn prepend_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if parent == child || self.is_ancestor(child, parent) {
            return false;
        }
        if self.node(parent).and_then(|p| p.first_child()).map(|c| c.id()) == Some(child) {
            return true;
        }
        match self.html.tree.get_mut(parent) {
            Some(mut node) => {
                node.prepend_id(child);
                self.touch();
                true
            }
            None => false,
        }
    }

    /// Inserts `child` as the previous sibling of `reference`. Fails when the reference
    /// has no parent.
    pub fn insert_before(&mut self, reference: NodeId, child: NodeId) -> bool {
        if reference == child
            || self.parent(reference).is_none()
            || self.is_ancestor(child, reference)
        {
            return false;
        }
        if self.node(reference).and_then(|r| r.prev_sibling()).map(|s| s.id()) == Some(child) {
            return true;
        }
        match self.html.tree.get_mut(reference) {
            Some(mut node) => {
                node.insert_id_before(child);
                self.touch();
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: NodeId) {
        if let Some(mut node) = self.html.tree.get_mut(id) {
            node.detach();
            self.touch();
        }
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        let Some(tag) = self.tag(id).map(str::to_string) else {
            return;
        };
        let mut attrs = self.attrs(id);
        match attrs.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value.to_string(),
            None => attrs.push((name.to_string(), value.to_string())),
        }
        self.replace_element(id, &tag, &attrs);
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        let Some(tag) = self.tag(id).map(str::to_string) else {
            return;
        };
        let mut attrs = self.attrs(id);
        let before = attrs.len();
        attrs.retain(|(k, _)| k != name);
        if attrs.len() != before {
            self.replace_element(id, &tag, &attrs);
        }
    }

    fn replace_element(&mut self, id: NodeId, tag: &str, attrs: &[(String, String)]) {
        let borrowed: Vec<(&str, &str)> =
            attrs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        if let Some(value) = build_element(tag, &borrowed)
            && let Some(mut node) = self.html.tree.get_mut(id)
        {
            *node.value() = value;
            self.touch();
        }
    }

    /// Moves every child of `from` to the end of `to`.
    pub fn move_children(&mut self, from: NodeId, to: NodeId) {
        for child in self.children(from) {
            if child != to {
                self.append_child(to, child);
            }
        }
    }

    /// Deep-copies a node of another document into this one, detached.
    pub fn import(&mut self, other: &Document, id: NodeId) -> Option<NodeId> {
        let source = other.node(id)?;
        let copy = self.html.tree.orphan(source.value().clone()).id();
        self.import_children(source, copy);
        self.touch();
        Some(copy)
    }

    fn import_children(&mut self, source: NodeRef<'_, Node>, target: NodeId) {
        for child in source.children() {
            let id = match self.html.tree.get_mut(target) {
                Some(mut node) => node.append(child.value().clone()).id(),
                None => return,
            };
            self.import_children(child, id);
        }
    }

    /// Removes every body element matching `css`. Returns how many were removed.
    pub fn strip_body(&mut self, css: &str) -> Result<usize> {
        let Some(body) = self.body() else {
            return Ok(0);
        };
        let doomed: Vec<NodeId> = self
            .select_all(css)?
            .into_iter()
            .filter(|id| self.is_ancestor(body, *id))
            .collect();
        for id in &doomed {
            self.remove(*id);
        }
        Ok(doomed.len())
    }
}

fn collect_text(node: NodeRef<'_, Node>, out: &mut String, rendered_only: bool) {
    match node.value() {
        Node::Text(text) => out.push_str(text),
        Node::Element(e) if rendered_only && UNRENDERED.contains(&e.name()) => {}
        _ => {
            for child in node.children() {
                collect_text(child, out, rendered_only);
            }
        }
    }
}

fn kebab(key: &str) -> String {
    let mut out = String::new();
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push('-');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

pub fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn safe_attr_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '>' | '/' | '=' | '<'))
}

/// Builds an element node by parsing a fragment, wrapped in whatever context the tag
/// needs to survive the tree builder (a bare `<tr>` outside a table is dropped).
fn build_element(tag: &str, attrs: &[(&str, &str)]) -> Option<Node> {
    let tag = tag.to_ascii_lowercase();
    let mut open = format!("<{tag}");
    for (name, value) in attrs.iter().filter(|(name, _)| safe_attr_name(name)) {
        open.push_str(&format!(" {name}=\"{}\"", escape_html(value)));
    }
    open.push('>');
    let element = if VOID_ELEMENTS.contains(&tag.as_str()) {
        open
    } else {
        format!("{open}</{tag}>")
    };
    let markup = match tag.as_str() {
        "tr" => format!("<table><tbody>{element}</tbody></table>"),
        "td" | "th" => format!("<table><tbody><tr>{element}</tr></tbody></table>"),
        "tbody" | "thead" | "tfoot" | "caption" | "colgroup" => {
            format!("<table>{element}</table>")
        }
        "col" => format!("<table><colgroup>{element}</colgroup></table>"),
        "option" | "optgroup" => format!("<select>{element}</select>"),
        _ => element,
    };
    let fragment = Html::parse_fragment(&markup);
    fragment
        .tree
        .root()
        .descendants()
        .find(|n| n.value().as_element().is_some_and(|e| e.name() == tag))
        .map(|n| n.value().clone())
}

fn build_text(text: &str) -> Option<Node> {
    let fragment = Html::parse_fragment(&format!("<p>{}</p>", escape_html(text)));
    fragment
        .tree
        .root()
        .descendants()
        .find(|n| n.value().is_text())
        .map(|n| n.value().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(html: &str) -> Document {
        Document::parse(html, Url::parse("https://example.com/p/1").ok())
    }

    #[test]
    fn creates_table_rows_outside_table_context() {
        let mut d = doc("<table><tbody><tr><td>a</td></tr></tbody></table>");
        let tbody = d.select_first("tbody").unwrap().unwrap();
        let tr = d.create_element("tr", &[("id", "divider")]);
        let td = d.create_element("td", &[("colspan", "3")]);
        d.append_child(tr, td);
        d.append_child(tbody, tr);
        assert_eq!(d.tag(tr), Some("tr"));
        assert_eq!(d.attr(td, "colspan"), Some("3"));
        assert_eq!(d.select_all("tr").unwrap().len(), 2);
    }

    #[test]
    fn selection_follows_document_order_after_insertion() {
        let mut d = doc("<ul><li id=a>a</li><li id=b>b</li></ul>");
        let b = d.select_first("#b").unwrap().unwrap();
        let li = d.create_element_with_text("li", &[("id", "new")], "new");
        assert!(d.insert_before(b, li));
        let ids: Vec<String> = d
            .select_all("li")
            .unwrap()
            .into_iter()
            .map(|id| d.attr(id, "id").unwrap().to_string())
            .collect();
        assert_eq!(ids, ["a", "new", "b"]);
    }

    #[test]
    fn removed_nodes_are_no_longer_contained() {
        let mut d = doc("<div id=x><span>hi</span></div>");
        let x = d.select_first("#x").unwrap().unwrap();
        assert!(d.contains(x));
        d.remove(x);
        assert!(!d.contains(x));
        assert!(d.select_first("#x").unwrap().is_none());
    }

    #[test]
    fn set_attr_keeps_children_and_other_attributes() {
        let mut d = doc("<iframe id=f src=\"/a\"></iframe><div id=d class=c><b>x</b></div>");
        let div = d.select_first("#d").unwrap().unwrap();
        d.set_attr(div, "hidden", "");
        assert_eq!(d.attr(div, "class"), Some("c"));
        assert_eq!(d.attr(div, "hidden"), Some(""));
        assert_eq!(d.text(div), "x");
        d.remove_attr(div, "hidden");
        assert_eq!(d.attr(div, "hidden"), None);
        let frame = d.select_first("#f").unwrap().unwrap();
        d.set_attr(frame, "height", "320");
        assert_eq!(d.attr(frame, "height"), Some("320"));
    }

    #[test]
    fn imports_subtrees_from_other_documents() {
        let mut host = doc("<body><main></main></body>");
        let next = doc("<body><article><h1>Two</h1><p>body</p></article></body>");
        let article = next.select_first("article").unwrap().unwrap();
        let copy = host.import(&next, article).unwrap();
        let main = host.select_first("main").unwrap().unwrap();
        host.append_child(main, copy);
        assert_eq!(host.text(main), "Twobody");
        assert!(next.contains(article));
    }

    #[test]
    fn url_properties_resolve_against_base() {
        let d = doc("<head><base href=\"https://example.com/list/\"></head><a id=n href=\"2\" data-next-page=\"/p/9\">n</a>");
        let a = d.select_first("#n").unwrap().unwrap();
        assert_eq!(
            d.property(a, &["href".to_string()]).as_deref(),
            Some("https://example.com/list/2")
        );
        assert_eq!(
            d.property(a, &["dataset".to_string(), "nextPage".to_string()]).as_deref(),
            Some("/p/9")
        );
        assert_eq!(d.property(a, &["action".to_string()]), None);
    }

    #[test]
    fn other_content_types_parse_and_resolve_against_the_page() {
        let d = Document::parse_as(
            "<a id=n href=\"../p/2\">n</a>",
            Url::parse("https://example.com/list/1").ok(),
            "application/xml",
        );
        let a = d.select_first("#n").unwrap().unwrap();
        assert_eq!(d.resolve("../p/2"), "https://example.com/p/2");
        assert_eq!(d.text(a), "n");
        assert_eq!(Document::parse("<p>x</p>", None).resolve("p/2"), "p/2");
    }

    #[test]
    fn invalid_selectors_are_rule_errors() {
        let d = doc("<p>x</p>");
        assert!(matches!(d.select_all("p[["), Err(Error::Rule { .. })));
    }

    #[test]
    fn strips_scripts_from_body_only() {
        let mut d = doc("<head><style>h{}</style></head><body><script>x()</script><p>a</p><style>p{}</style></body>");
        assert_eq!(d.strip_body("script, noscript, style, link").unwrap(), 2);
        assert_eq!(d.select_all("style").unwrap().len(), 1);
    }
}
