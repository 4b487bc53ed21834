//! HTML serialization over a parsed `scraper` tree with per-node hooks.
//!
//! `scraper` trees are immutable in practice, so stages that "remove" or
//! "rewrite" nodes do it while serializing rather than by mutating the DOM.

use std::borrow::Cow;

use ego_tree::NodeRef;
use scraper::{ElementRef, Node};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

pub trait Rewrite {
    /// Drops the node and its subtree.
    fn skip(&self, _node: NodeRef<'_, Node>) -> bool {
        false
    }

    /// Markup emitted in place of the node.
    fn replace(&self, _node: NodeRef<'_, Node>) -> Option<String> {
        None
    }

    /// Maps an attribute value; `None` drops the attribute.
    fn attribute<'a>(&self, _element: &str, _name: &str, value: &'a str) -> Option<Cow<'a, str>> {
        Some(Cow::Borrowed(value))
    }
}

/// Serializes nodes unchanged.
pub struct Verbatim;

impl Rewrite for Verbatim {}

pub fn inner_html<R: Rewrite>(node: NodeRef<'_, Node>, rewrite: &R) -> String {
    let mut out = String::new();
    for child in node.children() {
        write_node(child, rewrite, &mut out);
    }
    out
}

pub fn outer_html<R: Rewrite>(node: NodeRef<'_, Node>, rewrite: &R) -> String {
    let mut out = String::new();
    write_node(node, rewrite, &mut out);
    out
}

fn write_node<R: Rewrite>(node: NodeRef<'_, Node>, rewrite: &R, out: &mut String) {
    if rewrite.skip(node) {
        return;
    }
    if let Some(replacement) = rewrite.replace(node) {
        out.push_str(&replacement);
        return;
    }

    match node.value() {
        Node::Document | Node::Fragment => {
            for child in node.children() {
                write_node(child, rewrite, out);
            }
        }
        Node::Element(element) => {
            let name = element.name();
            out.push('<');
            out.push_str(name);
            for (attr, value) in element.attrs() {
                if let Some(value) = rewrite.attribute(name, attr, value) {
                    out.push(' ');
                    out.push_str(attr);
                    out.push_str("=\"");
                    escape_into(&value, true, out);
                    out.push('"');
                }
            }
            out.push('>');

            if VOID_ELEMENTS.contains(&name) {
                return;
            }

            let raw = RAW_TEXT_ELEMENTS.contains(&name);
            for child in node.children() {
                match child.value() {
                    Node::Text(text) if raw => out.push_str(text),
                    _ => write_node(child, rewrite, out),
                }
            }

            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
        Node::Text(text) => escape_into(text, false, out),
        Node::Comment(_) | Node::Doctype(_) | Node::ProcessingInstruction(_) => {}
    }
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
}

pub fn is_heading(name: &str) -> bool {
    matches!(name, "h1" | "h2" | "h3" | "h4" | "h5" | "h6")
}

/// Text content with whitespace runs collapsed.
pub fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
