//! Minimal XML element tree used for every component payload.
//!
//! The remote engine exports components as XStream-style XML: elements,
//! attributes, escaped text, the occasional CDATA section and comments.
//! This module parses that dialect into an owned [`Element`] tree,
//! offers path helpers for the structural edits the migration engine
//! performs, and serializes the tree back with two-space indentation.

use std::fmt::Write as _;

use crate::error::InterchangeError;

/// A node inside an element's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    /// Decoded character data.
    Text(String),
    CData(String),
    Comment(String),
}

/// An XML element with ordered attributes and children.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Element holding a single text node.
    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        let mut el = Element::new(name);
        el.set_text(text);
        el
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    /// Direct element children, in document order.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.elements().filter(move |e| e.name == name)
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.elements_mut().find(|e| e.name == name)
    }

    pub fn has_child(&self, name: &str) -> bool {
        self.child(name).is_some()
    }

    /// Concatenated text and CDATA content of this element (not descendants).
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            match node {
                Node::Text(t) | Node::CData(t) => out.push_str(t),
                _ => {}
            }
        }
        out
    }

    /// Text of the named child, if the child exists.
    pub fn child_text(&self, name: &str) -> Option<String> {
        self.child(name).map(Element::text)
    }

    /// Replace all content with a single text node.
    pub fn set_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.children.clear();
        if !text.is_empty() {
            self.children.push(Node::Text(text));
        }
    }

    /// Follow a `/`-separated path of child names.
    pub fn find(&self, path: &str) -> Option<&Element> {
        let mut current = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = current.child(segment)?;
        }
        Some(current)
    }

    pub fn find_mut(&mut self, path: &str) -> Option<&mut Element> {
        let mut current = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = current.child_mut(segment)?;
        }
        Some(current)
    }

    /// Text at a `/`-separated path.
    pub fn find_text(&self, path: &str) -> Option<String> {
        self.find(path).map(Element::text)
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Return the named child, appending an empty one if it is absent.
    pub fn ensure_child(&mut self, name: &str) -> &mut Element {
        let position = self
            .children
            .iter()
            .position(|n| matches!(n, Node::Element(e) if e.name == name));
        let index = match position {
            Some(i) => i,
            None => {
                self.children.push(Node::Element(Element::new(name)));
                self.children.len() - 1
            }
        };
        match &mut self.children[index] {
            Node::Element(e) => e,
            _ => unreachable!("index points at an element node"),
        }
    }

    /// Walk a path, creating every missing segment.
    pub fn ensure_path(&mut self, path: &str) -> &mut Element {
        let mut current = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = current.ensure_child(segment);
        }
        current
    }

    /// Remove every direct child with the given name; returns how many went.
    pub fn remove_children(&mut self, name: &str) -> usize {
        let before = self.children.len();
        self.children
            .retain(|n| !matches!(n, Node::Element(e) if e.name == name));
        before - self.children.len()
    }

    /// Remove and return the first direct child with the given name.
    pub fn take_child(&mut self, name: &str) -> Option<Element> {
        let index = self
            .children
            .iter()
            .position(|n| matches!(n, Node::Element(e) if e.name == name))?;
        match self.children.remove(index) {
            Node::Element(e) => Some(e),
            _ => None,
        }
    }

    /// Visit this element and every descendant element, parents first.
    pub fn walk_mut(&mut self, visit: &mut dyn FnMut(&mut Element)) {
        visit(self);
        for child in self.elements_mut() {
            child.walk_mut(visit);
        }
    }

    /// Visit this element and every descendant element, parents first.
    pub fn walk(&self, visit: &mut dyn FnMut(&Element)) {
        visit(self);
        for child in self.elements() {
            child.walk(visit);
        }
    }

    /// Serialize without an XML declaration.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        write_element(self, 0, &mut out);
        out
    }
}

/// Parse a document and return its root element.
///
/// The prolog (declaration, comments, doctype) and trailing misc content
/// are skipped.
pub fn parse(src: &str) -> Result<Element, InterchangeError> {
    let mut parser = Parser {
        src,
        bytes: src.as_bytes(),
        pos: 0,
    };
    if src.starts_with('\u{feff}') {
        parser.pos = '\u{feff}'.len_utf8();
    }
    parser.skip_misc()?;
    if parser.pos >= parser.bytes.len() {
        return Err(parser.error("document has no root element"));
    }
    let root = parser.element()?;
    parser.skip_misc()?;
    if parser.pos < parser.bytes.len() {
        return Err(parser.error("unexpected content after root element"));
    }
    Ok(root)
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: &str) -> InterchangeError {
        let line = self.src[..self.pos.min(self.src.len())]
            .bytes()
            .filter(|b| *b == b'\n')
            .count()
            + 1;
        InterchangeError::Xml {
            line,
            message: message.to_string(),
        }
    }

    fn starts_with(&self, pat: &str) -> bool {
        self.bytes[self.pos..].starts_with(pat.as_bytes())
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    /// Position right after the next occurrence of `pat`.
    fn skip_past(&mut self, pat: &str, what: &str) -> Result<&'a str, InterchangeError> {
        let start = self.pos;
        match self.src[start..].find(pat) {
            Some(offset) => {
                self.pos = start + offset + pat.len();
                Ok(&self.src[start..start + offset])
            }
            None => Err(self.error(&format!("unterminated {}", what))),
        }
    }

    fn skip_misc(&mut self) -> Result<(), InterchangeError> {
        loop {
            self.skip_whitespace();
            if self.starts_with("<?") {
                self.skip_past("?>", "processing instruction")?;
            } else if self.starts_with("<!--") {
                self.skip_past("-->", "comment")?;
            } else if self.starts_with("<!DOCTYPE") {
                self.skip_past(">", "doctype")?;
            } else {
                return Ok(());
            }
        }
    }

    fn name(&mut self) -> Result<String, InterchangeError> {
        let start = self.pos;
        while self.pos < self.bytes.len() {
            let b = self.bytes[self.pos];
            if b.is_ascii_whitespace() || b == b'/' || b == b'>' || b == b'=' {
                break;
            }
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("expected a name"));
        }
        Ok(self.src[start..self.pos].to_string())
    }

    fn element(&mut self) -> Result<Element, InterchangeError> {
        if !self.starts_with("<") {
            return Err(self.error("expected '<'"));
        }
        self.pos += 1;
        let mut element = Element::new(self.name()?);

        loop {
            self.skip_whitespace();
            if self.starts_with("/>") {
                self.pos += 2;
                return Ok(element);
            }
            if self.starts_with(">") {
                self.pos += 1;
                break;
            }
            if self.pos >= self.bytes.len() {
                return Err(self.error("unterminated start tag"));
            }
            let key = self.name()?;
            self.skip_whitespace();
            if !self.starts_with("=") {
                return Err(self.error(&format!("attribute '{}' has no value", key)));
            }
            self.pos += 1;
            self.skip_whitespace();
            let quote = match self.bytes.get(self.pos) {
                Some(b'"') => "\"",
                Some(b'\'') => "'",
                _ => return Err(self.error("attribute value must be quoted")),
            };
            self.pos += 1;
            let raw = self.skip_past(quote, "attribute value")?;
            element.attributes.push((key, decode_entities(raw)));
        }

        loop {
            if self.pos >= self.bytes.len() {
                return Err(self.error(&format!("element <{}> is not closed", element.name)));
            }
            if self.starts_with("</") {
                self.pos += 2;
                let closing = self.name()?;
                if closing != element.name {
                    return Err(self.error(&format!(
                        "mismatched closing tag: expected </{}>, found </{}>",
                        element.name, closing
                    )));
                }
                self.skip_whitespace();
                if !self.starts_with(">") {
                    return Err(self.error("malformed closing tag"));
                }
                self.pos += 1;
                break;
            } else if self.starts_with("<!--") {
                self.pos += 4;
                let body = self.skip_past("-->", "comment")?;
                element.children.push(Node::Comment(body.to_string()));
            } else if self.starts_with("<![CDATA[") {
                self.pos += 9;
                let body = self.skip_past("]]>", "CDATA section")?;
                element.children.push(Node::CData(body.to_string()));
            } else if self.starts_with("<?") {
                self.skip_past("?>", "processing instruction")?;
            } else if self.starts_with("<") {
                let child = self.element()?;
                element.children.push(Node::Element(child));
            } else {
                let start = self.pos;
                let end = self.src[start..]
                    .find('<')
                    .map(|o| start + o)
                    .unwrap_or(self.bytes.len());
                self.pos = end;
                element
                    .children
                    .push(Node::Text(decode_entities(&self.src[start..end])));
            }
        }

        // Indentation between child elements carries no data.
        if element.children.iter().any(|n| matches!(n, Node::Element(_))) {
            element
                .children
                .retain(|n| !matches!(n, Node::Text(t) if t.trim().is_empty()));
        }
        Ok(element)
    }
}

/// Resolve the predefined and numeric character references.
pub fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').filter(|semi| *semi <= 10).and_then(|semi| {
            let entity = &tail[1..semi];
            let ch = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ if entity.starts_with("#x") || entity.starts_with("#X") => {
                    u32::from_str_radix(&entity[2..], 16).ok().and_then(char::from_u32)
                }
                _ if entity.starts_with('#') => {
                    entity[1..].parse::<u32>().ok().and_then(char::from_u32)
                }
                _ => None,
            };
            ch.map(|c| (c, semi + 1))
        });
        match decoded {
            Some((c, consumed)) => {
                out.push(c);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Escape text content the way the remote engine's serializer does.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn write_element(el: &Element, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    out.push_str(&indent);
    out.push('<');
    out.push_str(&el.name);
    for (k, v) in &el.attributes {
        let _ = write!(out, " {}=\"{}\"", k, escape_text(v));
    }
    if el.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');

    let element_only = el
        .children
        .iter()
        .all(|n| matches!(n, Node::Element(_) | Node::Comment(_)));
    if element_only {
        for node in &el.children {
            out.push('\n');
            match node {
                Node::Element(child) => write_element(child, depth + 1, out),
                Node::Comment(c) => {
                    let _ = write!(out, "{}  <!--{}-->", indent, c);
                }
                _ => {}
            }
        }
        out.push('\n');
        out.push_str(&indent);
    } else {
        for node in &el.children {
            match node {
                Node::Text(t) => out.push_str(&escape_text(t)),
                Node::CData(c) => {
                    let _ = write!(out, "<![CDATA[{}]]>", c);
                }
                Node::Comment(c) => {
                    let _ = write!(out, "<!--{}-->", c);
                }
                Node::Element(child) => {
                    let mut inline = String::new();
                    write_element(child, 0, &mut inline);
                    out.push_str(&inline);
                }
            }
        }
    }
    let _ = write!(out, "</{}>", el.name);
}
