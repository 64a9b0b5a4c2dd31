//! Generic detail-page extraction, parameterised per source.

use bandi_core::DetailRecord;
use chrono::{DateTime, Utc};
use scraper::Html;
use url::Url;

use crate::dates::detail_dates;
use crate::locate::{locate_first, select_first, Locator};
use crate::sections::extract_sections;
use crate::status::DETAIL_STATUS_CHAIN;
use crate::text::visible_text;

#[derive(Debug, Clone, Copy)]
pub struct DetailProfile {
    pub title_chain: &'static [Locator],
    /// Selectors tried in order for the content root; the whole document otherwise.
    pub content_scope: &'static [&'static str],
    /// Deepest heading level that opens a section.
    pub deepest_heading: u8,
}

pub const DEFAULT_TITLE_CHAIN: &[Locator] = &[
    Locator::Text("h1.page-title"),
    Locator::Text("h1"),
    Locator::Attr("meta[property=\"og:title\"]", "content"),
    Locator::Text("title"),
];

impl Default for DetailProfile {
    fn default() -> Self {
        Self {
            title_chain: DEFAULT_TITLE_CHAIN,
            content_scope: &["main", "article", "body"],
            deepest_heading: 4,
        }
    }
}

/// Never fails: every missing piece comes back empty.
pub fn extract_detail(
    html: &str,
    url: &str,
    fetched_at: DateTime<Utc>,
    profile: &DetailProfile,
) -> DetailRecord {
    let document = Html::parse_document(html);
    let root = document.root_element();
    let base = Url::parse(url).ok();

    let scope = profile
        .content_scope
        .iter()
        .find_map(|css| select_first(root, css))
        .unwrap_or(root);
    let dates = detail_dates(root);

    DetailRecord {
        url: url.to_string(),
        page_title: locate_first(root, profile.title_chain),
        status: locate_first(root, DETAIL_STATUS_CHAIN),
        open_date: dates.open,
        close_date: dates.close,
        sections: extract_sections(scope, profile.deepest_heading, base.as_ref()),
        full_text: visible_text(scope),
        fetched_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bandi_core::SectionValue;
    use chrono::TimeZone;

    #[test]
    fn unrecognisable_markup_degrades_to_empty_fields() {
        let fetched_at = Utc.with_ymd_and_hms(2025, 4, 8, 9, 0, 0).unwrap();
        let detail = extract_detail(
            "<div><span>Contributi per la transizione digitale</span></div>",
            "https://www.incentivi.gov.it/it/catalogo/x",
            fetched_at,
            &DetailProfile::default(),
        );
        assert_eq!(detail.page_title, None);
        assert_eq!(detail.status, None);
        assert_eq!(detail.open_date, None);
        assert_eq!(detail.close_date, None);
        assert!(detail.sections.is_empty());
        assert_eq!(detail.full_text, "Contributi per la transizione digitale");
    }

    #[test]
    fn sections_are_scoped_to_main() {
        let detail = extract_detail(
            r#"<html><body><nav><h2>Menu</h2><p>Home</p></nav>
               <main><h1>Voucher 3I</h1><h2>Cos'è</h2><p>Un voucher.</p></main></body></html>"#,
            "https://www.incentivi.gov.it/it/catalogo/voucher-3i",
            Utc::now(),
            &DetailProfile::default(),
        );
        assert_eq!(detail.page_title.as_deref(), Some("Voucher 3I"));
        assert_eq!(detail.sections.len(), 1);
        assert_eq!(detail.sections["Cos'è"], SectionValue::Text("Un voucher.".into()));
    }
}
