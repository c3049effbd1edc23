// Copyright (c) 2024 XMPBee contributors.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A generic XML element tree for stanzas.

use core::fmt;
use core::str::FromStr;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::parser::build_element;

/// A child node of a [`Stanza`]: either a nested element or character data.
///
/// Document order of children is preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// A nested element.
    Element(Stanza),
    /// Character data.
    Text(String),
}

/// A parsed XML element.
///
/// The name is the qualified name as it appeared on the wire (so a stream
/// features element is named `stream:features`). Attribute keys are unique;
/// children keep document order; [`Stanza::text`] is the concatenation of
/// the direct character data children.
///
/// The tree carries no parent links: parents only exist on the parser's
/// stack while a stanza is being assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stanza {
    name: String,
    attrs: BTreeMap<String, String>,
    nodes: Vec<Node>,
}

impl Stanza {
    /// Start building a new element with the given qualified name.
    pub fn builder<N: Into<String>>(name: N) -> StanzaBuilder {
        StanzaBuilder {
            stanza: Stanza {
                name: name.into(),
                attrs: BTreeMap::new(),
                nodes: Vec::new(),
            },
        }
    }

    /// Bare constructor, used by the parser.
    pub(crate) fn new(name: String, attrs: BTreeMap<String, String>) -> Stanza {
        Stanza {
            name,
            attrs,
            nodes: Vec::new(),
        }
    }

    /// The qualified element name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The local part of the element name, with any prefix stripped.
    pub fn local_name(&self) -> &str {
        match self.name.split_once(':') {
            Some((_, local)) => local,
            None => &self.name,
        }
    }

    /// Get an attribute value.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Set an attribute. An existing value for the same key is replaced.
    pub fn set_attr<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) {
        self.attrs.insert(name.into(), value.into());
    }

    /// Iterate over `(name, value)` attribute pairs.
    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The `xmlns` attribute, if the element declares one.
    pub fn xmlns(&self) -> Option<&str> {
        self.attr("xmlns")
    }

    /// Whether this element has the given local name and declares the given
    /// namespace.
    pub fn is(&self, name: &str, ns: &str) -> bool {
        self.local_name() == name && self.xmlns() == Some(ns)
    }

    /// Append a child element.
    pub fn append_child(&mut self, child: Stanza) {
        self.nodes.push(Node::Element(child));
    }

    /// Append character data. Consecutive text nodes are merged.
    pub fn append_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Node::Text(last)) = self.nodes.last_mut() {
            last.push_str(text);
        } else {
            self.nodes.push(Node::Text(text.to_owned()));
        }
    }

    /// All child nodes, in document order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Child elements, in document order.
    pub fn children(&self) -> impl Iterator<Item = &Stanza> {
        self.nodes.iter().filter_map(|node| match node {
            Node::Element(child) => Some(child),
            Node::Text(_) => None,
        })
    }

    /// The first child element with the given local name.
    pub fn get_child(&self, name: &str) -> Option<&Stanza> {
        self.children().find(|child| child.local_name() == name)
    }

    /// Whether a child with the given local name and namespace exists.
    pub fn has_child(&self, name: &str, ns: &str) -> bool {
        self.children().any(|child| child.is(name, ns))
    }

    /// The concatenated direct character data of this element.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            if let Node::Text(text) = node {
                out.push_str(text);
            }
        }
        out
    }

    /// Serialize to its wire form.
    pub fn write_to(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attrs {
            out.push(' ');
            out.push_str(key);
            out.push_str("='");
            escape_into(value, out);
            out.push('\'');
        }
        if self.nodes.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for node in &self.nodes {
            match node {
                Node::Element(child) => child.write_to(out),
                Node::Text(text) => escape_into(text, out),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

impl fmt::Display for Stanza {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut out = String::new();
        self.write_to(&mut out);
        f.write_str(&out)
    }
}

impl FromStr for Stanza {
    type Err = Error;

    fn from_str(s: &str) -> Result<Stanza> {
        build_element(s.as_bytes())
    }
}

/// Builder for [`Stanza`].
pub struct StanzaBuilder {
    stanza: Stanza,
}

impl StanzaBuilder {
    /// Set an attribute.
    pub fn attr<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> StanzaBuilder {
        self.stanza.set_attr(name, value);
        self
    }

    /// Append a child element.
    pub fn append(mut self, child: Stanza) -> StanzaBuilder {
        self.stanza.append_child(child);
        self
    }

    /// Append character data.
    pub fn text<T: AsRef<str>>(mut self, text: T) -> StanzaBuilder {
        self.stanza.append_text(text.as_ref());
        self
    }

    /// Finish building.
    pub fn build(self) -> Stanza {
        self.stanza
    }
}

/// Escape the five predefined entities into `out`.
pub(crate) fn escape_into(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_serialize() {
        let body = Stanza::builder("body").text("hi there").build();
        let message = Stanza::builder("message")
            .attr("to", "general@muc.example.org")
            .attr("type", "groupchat")
            .append(body)
            .build();
        assert_eq!(
            message.to_string(),
            "<message to='general@muc.example.org' type='groupchat'><body>hi there</body></message>"
        );
    }

    #[test]
    fn empty_element_self_closes() {
        let presence = Stanza::builder("presence").build();
        assert_eq!(presence.to_string(), "<presence/>");
    }

    #[test]
    fn text_concatenates_direct_children_only() {
        let mut outer = Stanza::builder("message").build();
        outer.append_text("a");
        outer.append_child(Stanza::builder("body").text("nested").build());
        outer.append_text("b");
        assert_eq!(outer.text(), "ab");
    }

    #[test]
    fn escaping_round_trips() {
        let stanza = Stanza::builder("body").text("a < b & c > 'd'").build();
        let wire = stanza.to_string();
        assert_eq!(
            wire,
            "<body>a &lt; b &amp; c &gt; &apos;d&apos;</body>"
        );
        let back: Stanza = wire.parse().unwrap();
        assert_eq!(back.text(), "a < b & c > 'd'");
    }

    #[test]
    fn parse_preserves_child_order() {
        let stanza: Stanza = "<iq><first/><second/><third/></iq>".parse().unwrap();
        let names: Vec<_> = stanza.children().map(|c| c.name().to_owned()).collect();
        assert_eq!(names, ["first", "second", "third"]);
    }

    #[test]
    fn attribute_keys_are_unique() {
        let mut stanza = Stanza::builder("iq").attr("id", "1").build();
        stanza.set_attr("id", "2");
        assert_eq!(stanza.attr("id"), Some("2"));
        assert_eq!(stanza.attrs().count(), 1);
    }

    #[test]
    fn local_name_strips_prefix() {
        let features: Stanza = "<stream:features/>".parse().unwrap();
        assert_eq!(features.name(), "stream:features");
        assert_eq!(features.local_name(), "features");
    }

    #[test]
    fn is_checks_name_and_namespace() {
        let ping: Stanza = "<ping xmlns='urn:xmpp:ping'/>".parse().unwrap();
        assert!(ping.is("ping", "urn:xmpp:ping"));
        assert!(!ping.is("ping", "jabber:client"));
    }
}
