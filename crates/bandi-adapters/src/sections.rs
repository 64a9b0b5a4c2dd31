//! Heading-delimited sectioning of detail pages.

use bandi_core::{LinkEntry, SectionValue, Sections};
use scraper::{ElementRef, Node};
use url::Url;

use crate::locate::select_all;
use crate::text::{clean_text, element_text};

/// Section titles (lower-cased, substring) parsed as link lists.
pub const LINK_SECTION_MARKERS: &[&str] =
    &["link e documenti", "documenti", "allegati", "link utili"];

pub fn heading_level(name: &str) -> Option<u8> {
    match name {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

pub fn is_link_section(title: &str) -> bool {
    let lowered = title.to_lowercase();
    LINK_SECTION_MARKERS.iter().any(|m| lowered.contains(m))
}

/// Resolve `href` against `base`; without a usable base it is kept as-is.
pub fn absolutize(base: Option<&Url>, href: &str) -> String {
    let href = href.trim();
    match base.and_then(|b| b.join(href).ok()) {
        Some(url) => url.to_string(),
        None => href.to_string(),
    }
}

/// Every `h2..=h{deepest}` under `scope` opens a section that runs over its
/// following siblings up to the next heading of equal or higher rank.
pub fn extract_sections(scope: ElementRef<'_>, deepest: u8, base: Option<&Url>) -> Sections {
    let mut sections = Sections::new();
    let selector = (2..=deepest.clamp(2, 6))
        .map(|level| format!("h{level}"))
        .collect::<Vec<_>>()
        .join(", ");

    for heading in select_all(scope, &selector) {
        let Some(level) = heading_level(heading.value().name()) else {
            continue;
        };
        let title = element_text(heading);
        if title.is_empty() {
            continue;
        }
        let siblings = section_siblings(heading, level);
        let value = if is_link_section(&title) {
            SectionValue::Links(collect_links(&siblings, base))
        } else {
            SectionValue::Text(collect_text(&siblings))
        };
        sections.insert(title, value);
    }
    sections
}

enum Sibling<'a> {
    Element(ElementRef<'a>),
    Text(String),
}

fn section_siblings(heading: ElementRef<'_>, level: u8) -> Vec<Sibling<'_>> {
    let mut out = Vec::new();
    for node in heading.next_siblings() {
        match node.value() {
            Node::Element(el) => {
                if heading_level(el.name()).is_some_and(|l| l <= level) {
                    break;
                }
                if let Some(element) = ElementRef::wrap(node) {
                    out.push(Sibling::Element(element));
                }
            }
            Node::Text(text) => {
                let cleaned = clean_text(text);
                if !cleaned.is_empty() {
                    out.push(Sibling::Text(cleaned));
                }
            }
            _ => {}
        }
    }
    out
}

fn collect_text(siblings: &[Sibling<'_>]) -> String {
    siblings
        .iter()
        .filter_map(|s| {
            let text = match s {
                Sibling::Element(el) => element_text(*el),
                Sibling::Text(text) => text.clone(),
            };
            (!text.is_empty()).then_some(text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn collect_links(siblings: &[Sibling<'_>], base: Option<&Url>) -> Vec<LinkEntry> {
    let mut links = Vec::new();
    for sibling in siblings {
        let Sibling::Element(el) = sibling else {
            continue;
        };
        let anchors = if el.value().name() == "a" {
            vec![*el]
        } else {
            select_all(*el, "a")
        };
        for anchor in anchors {
            let Some(href) = anchor.value().attr("href").filter(|h| !h.trim().is_empty()) else {
                continue;
            };
            let url = absolutize(base, href);
            let label = element_text(anchor);
            links.push(LinkEntry {
                label: if label.is_empty() { url.clone() } else { label },
                url,
            });
        }
    }
    links
}
