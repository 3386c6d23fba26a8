//! Document tree the scanner works over.
//!
//! The scanner only needs a handful of operations from its host tree, captured
//! by the [`Tree`] trait. [`Document`] is the in-memory implementation used by
//! the CLI: an arena of nodes addressed by stable [`NodeId`]s, so a node keeps
//! its identity across passes even after its children are replaced.

use scraper::Html;

/// Index of a node in a [`Document`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    /// The document root (always 0).
    pub const ROOT: NodeId = NodeId(0);
}

/// How the scanner classifies a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    Element,
    Text,
    Comment,
    /// An element whose content is code, never page text.
    Script,
}

/// Operations the scanner requires from a host tree.
pub trait Tree {
    /// Opaque, stable node handle. Equality is node identity.
    type Node: Copy + Eq + std::hash::Hash + std::fmt::Debug;

    fn root(&self) -> Self::Node;

    fn kind(&self, node: Self::Node) -> NodeKind;

    /// Children in document order.
    fn children(&self, node: Self::Node) -> Vec<Self::Node>;

    /// Payload of a text leaf; `None` for every other kind.
    fn text(&self, node: Self::Node) -> Option<&str>;

    fn clear_children(&mut self, node: Self::Node);

    /// Set the displayed text of a node (DOM `textContent` assignment).
    fn set_text(&mut self, node: Self::Node, text: &str);
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    name: Option<String>,
    attrs: Vec<(String, String)>,
    text: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl NodeData {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            name: None,
            attrs: Vec::new(),
            text: String::new(),
            parent: None,
            children: Vec::new(),
        }
    }
}

// Elements serialized without a closing tag
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

// Elements whose text children are written unescaped
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// Arena-backed document. Detached nodes stay in the arena, so ids are never reused.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<NodeData>,
    doctype: Option<String>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty document containing only the root.
    pub fn new() -> Self {
        Self {
            nodes: vec![NodeData::new(NodeKind::Document)],
            doctype: None,
        }
    }

    /// Parse an HTML document.
    pub fn parse_html(html: &str) -> Self {
        let parsed = Html::parse_document(html);
        let mut doc = Document::new();

        let mut stack = vec![(parsed.tree.root(), NodeId::ROOT)];
        while let Some((source, parent)) = stack.pop() {
            for child in source.children() {
                let id = match child.value() {
                    scraper::Node::Element(el) => {
                        let id = doc.append_element(parent, el.name());
                        doc.nodes[id.0 as usize].attrs = el
                            .attrs()
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .collect();
                        id
                    }
                    scraper::Node::Text(text) => doc.append_text(parent, &**text),
                    scraper::Node::Comment(comment) => doc.append_comment(parent, &**comment),
                    scraper::Node::Doctype(doctype) => {
                        doc.doctype = Some(doctype.name().to_string());
                        continue;
                    }
                    _ => continue,
                };
                stack.push((child, id));
            }
        }

        doc
    }

    /// Number of nodes ever allocated (attached or not).
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Tag name of an element.
    pub fn name(&self, node: NodeId) -> Option<&str> {
        self.data(node).and_then(|n| n.name.as_deref())
    }

    /// Parent of an attached node.
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.data(node).and_then(|n| n.parent)
    }

    /// Attribute value of an element.
    pub fn attr(&self, node: NodeId, key: &str) -> Option<&str> {
        self.data(node)?
            .attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Append a new element. `script` elements are classified as [`NodeKind::Script`].
    pub fn append_element(&mut self, parent: NodeId, name: &str) -> NodeId {
        let name = name.to_ascii_lowercase();
        let kind = if name == "script" {
            NodeKind::Script
        } else {
            NodeKind::Element
        };
        let mut data = NodeData::new(kind);
        data.name = Some(name);
        self.attach(parent, data)
    }

    pub fn append_text(&mut self, parent: NodeId, text: &str) -> NodeId {
        let mut data = NodeData::new(NodeKind::Text);
        data.text = text.to_string();
        self.attach(parent, data)
    }

    pub fn append_comment(&mut self, parent: NodeId, text: &str) -> NodeId {
        let mut data = NodeData::new(NodeKind::Comment);
        data.text = text.to_string();
        self.attach(parent, data)
    }

    /// First element with the given tag name, in document order.
    pub fn find_element(&self, tag: &str) -> Option<NodeId> {
        let mut stack = vec![NodeId::ROOT];
        while let Some(id) = stack.pop() {
            let node = self.data(id)?;
            if node.name.as_deref() == Some(tag) {
                return Some(id);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        None
    }

    /// Serialize the attached tree back to HTML.
    pub fn to_html(&self) -> String {
        enum Step {
            Open(NodeId),
            Close(NodeId),
        }

        let mut out = String::new();
        if let Some(ref doctype) = self.doctype {
            out.push_str("<!DOCTYPE ");
            out.push_str(doctype);
            out.push_str(">\n");
        }

        let mut stack = vec![Step::Open(NodeId::ROOT)];
        while let Some(step) = stack.pop() {
            match step {
                Step::Open(id) => {
                    let Some(node) = self.data(id) else { continue };
                    match node.kind {
                        NodeKind::Document => {}
                        NodeKind::Text => {
                            if self.in_raw_text(id) {
                                out.push_str(&node.text);
                            } else {
                                out.push_str(&escape_text(&node.text));
                            }
                            continue;
                        }
                        NodeKind::Comment => {
                            out.push_str("<!--");
                            out.push_str(&node.text);
                            out.push_str("-->");
                            continue;
                        }
                        NodeKind::Element | NodeKind::Script => {
                            let name = node.name.as_deref().unwrap_or("span");
                            out.push('<');
                            out.push_str(name);
                            for (key, value) in &node.attrs {
                                out.push(' ');
                                out.push_str(key);
                                out.push_str("=\"");
                                out.push_str(&escape_attr(value));
                                out.push('"');
                            }
                            out.push('>');
                            if VOID_ELEMENTS.contains(&name) {
                                continue;
                            }
                            stack.push(Step::Close(id));
                        }
                    }
                    stack.extend(node.children.iter().rev().map(|&c| Step::Open(c)));
                }
                Step::Close(id) => {
                    if let Some(name) = self.name(id) {
                        out.push_str("</");
                        out.push_str(name);
                        out.push('>');
                    }
                }
            }
        }

        out
    }

    fn data(&self, node: NodeId) -> Option<&NodeData> {
        self.nodes.get(node.0 as usize)
    }

    fn attach(&mut self, parent: NodeId, mut data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        data.parent = Some(parent);
        self.nodes.push(data);
        if let Some(parent_node) = self.nodes.get_mut(parent.0 as usize) {
            parent_node.children.push(id);
        }
        id
    }

    fn in_raw_text(&self, node: NodeId) -> bool {
        self.parent(node)
            .and_then(|p| self.name(p))
            .is_some_and(|name| RAW_TEXT_ELEMENTS.contains(&name))
    }
}

impl Tree for Document {
    type Node = NodeId;

    fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    fn kind(&self, node: NodeId) -> NodeKind {
        self.data(node).map(|n| n.kind).unwrap_or(NodeKind::Comment)
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.data(node).map(|n| n.children.clone()).unwrap_or_default()
    }

    fn text(&self, node: NodeId) -> Option<&str> {
        self.data(node)
            .filter(|n| n.kind == NodeKind::Text)
            .map(|n| n.text.as_str())
    }

    fn clear_children(&mut self, node: NodeId) {
        let children = match self.nodes.get_mut(node.0 as usize) {
            Some(n) => std::mem::take(&mut n.children),
            None => return,
        };
        for child in children {
            if let Some(c) = self.nodes.get_mut(child.0 as usize) {
                c.parent = None;
            }
        }
    }

    fn set_text(&mut self, node: NodeId, text: &str) {
        match self.kind(node) {
            NodeKind::Text | NodeKind::Comment => {
                if let Some(n) = self.nodes.get_mut(node.0 as usize) {
                    n.text = text.to_string();
                }
            }
            _ => {
                self.clear_children(node);
                if !text.is_empty() {
                    self.append_text(node, text);
                }
            }
        }
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keeps_structure() {
        let doc = Document::parse_html("<p id=\"a\">Hello <b>world</b></p>");
        let p = doc.find_element("p").unwrap();
        assert_eq!(doc.attr(p, "id"), Some("a"));

        let children = doc.children(p);
        assert_eq!(children.len(), 2);
        assert_eq!(doc.text(children[0]), Some("Hello "));
        assert_eq!(doc.name(children[1]), Some("b"));
    }

    #[test]
    fn test_script_kind() {
        let doc = Document::parse_html("<body><script>var x = 1;</script></body>");
        let script = doc.find_element("script").unwrap();
        assert_eq!(doc.kind(script), NodeKind::Script);
    }

    #[test]
    fn test_set_text_on_element_replaces_children() {
        let mut doc = Document::new();
        let div = doc.append_element(NodeId::ROOT, "div");
        let span = doc.append_element(div, "span");
        doc.append_text(span, "$5");

        doc.set_text(div, "2:30");
        let children = doc.children(div);
        assert_eq!(children.len(), 1);
        assert_eq!(doc.text(children[0]), Some("2:30"));
        assert_eq!(doc.parent(span), None);
    }

    #[test]
    fn test_set_text_on_text_keeps_identity() {
        let mut doc = Document::new();
        let div = doc.append_element(NodeId::ROOT, "div");
        let text = doc.append_text(div, "$5");

        doc.set_text(text, "5 coffees");
        assert_eq!(doc.children(div), vec![text]);
        assert_eq!(doc.text(text), Some("5 coffees"));
    }

    #[test]
    fn test_to_html_escapes() {
        let mut doc = Document::new();
        let div = doc.append_element(NodeId::ROOT, "div");
        doc.append_text(div, "a < b & c");
        doc.append_element(div, "br");
        doc.append_comment(div, " note ");

        assert_eq!(doc.to_html(), "<div>a &lt; b &amp; c<br><!-- note --></div>");
    }

    #[test]
    fn test_to_html_roundtrip_body() {
        let doc = Document::parse_html("<!DOCTYPE html><html><body><p>$5</p></body></html>");
        let html = doc.to_html();
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<body><p>$5</p></body>"));
    }
}
