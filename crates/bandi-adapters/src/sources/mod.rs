pub mod incentivi;
pub mod interno;
pub mod italia_domani;
pub mod obiettivo_europa;

use url::Url;

use crate::AdapterError;

pub(crate) fn parse_base(base: &str) -> Result<Url, AdapterError> {
    Url::parse(base).map_err(|e| AdapterError::InvalidUrl {
        url: base.to_string(),
        reason: e.to_string(),
    })
}

/// Resolve `href` against `base`, reporting what could not be joined.
pub(crate) fn resolve(base: &Url, href: &str) -> Result<String, AdapterError> {
    base.join(href.trim())
        .map(|u| u.to_string())
        .map_err(|e| AdapterError::InvalidUrl {
            url: href.to_string(),
            reason: e.to_string(),
        })
}

/// Append `key=value` to `url` with the right separator.
pub(crate) fn with_query_param(url: &str, key: &str, value: impl std::fmt::Display) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}{key}={value}")
}
