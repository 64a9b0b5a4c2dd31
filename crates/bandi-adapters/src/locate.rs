//! Ordered fallback locators.
//!
//! A field is described by a slice of [`Locator`]s, most specific first.
//! [`locate_first`] walks the slice and returns the first hit, so the tie-break
//! order lives in data and can be asserted on directly.

use std::fmt;

use scraper::{ElementRef, Selector};

use crate::text::{element_text, text_or_none};

pub type Probe = fn(ElementRef<'_>) -> Option<String>;

#[derive(Clone, Copy)]
pub enum Locator {
    /// Cleaned text of the first non-empty element matching the selector.
    Text(&'static str),
    /// Attribute of the first matching element that carries it non-empty.
    Attr(&'static str, &'static str),
    /// Attribute of the node itself.
    OwnAttr(&'static str),
    /// Named heuristic.
    Probe(&'static str, Probe),
}

impl fmt::Debug for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(css) => write!(f, "Text({css})"),
            Self::Attr(css, attr) => write!(f, "Attr({css}@{attr})"),
            Self::OwnAttr(attr) => write!(f, "OwnAttr({attr})"),
            Self::Probe(name, _) => write!(f, "Probe({name})"),
        }
    }
}

impl Locator {
    pub fn locate(&self, node: ElementRef<'_>) -> Option<String> {
        match self {
            Self::Text(css) => select_all(node, css)
                .into_iter()
                .map(element_text)
                .find(|t| !t.is_empty()),
            Self::Attr(css, attr) => select_all(node, css)
                .into_iter()
                .find_map(|el| el.value().attr(attr).and_then(|v| text_or_none(v.to_string()))),
            Self::OwnAttr(attr) => node
                .value()
                .attr(attr)
                .and_then(|v| text_or_none(v.to_string())),
            Self::Probe(_, probe) => probe(node),
        }
    }
}

pub fn locate_first(node: ElementRef<'_>, chain: &[Locator]) -> Option<String> {
    chain.iter().find_map(|locator| locator.locate(node))
}

/// An unparsable selector matches nothing.
pub fn select_all<'a>(node: ElementRef<'a>, css: &str) -> Vec<ElementRef<'a>> {
    let Ok(selector) = Selector::parse(css) else {
        return Vec::new();
    };
    let found = node.select(&selector).collect();
    found
}

pub fn select_first<'a>(node: ElementRef<'a>, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    let first = node.select(&selector).next();
    first
}

/// Descendants named one of `tags` whose class attribute contains one of
/// `needles`, compared case-insensitively.
pub fn find_by_class<'a>(
    node: ElementRef<'a>,
    tags: &'a [&'a str],
    needles: &'a [&'a str],
) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    node.descendants().filter_map(ElementRef::wrap).filter(move |el| {
        let value = el.value();
        if !tags.contains(&value.name()) {
            return false;
        }
        value.attr("class").is_some_and(|class| {
            let class = class.to_lowercase();
            needles.iter().any(|n| class.contains(n))
        })
    })
}
