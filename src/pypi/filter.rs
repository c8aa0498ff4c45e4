//! Strips wheel links from public index pages so clients fall back to
//! source distributions they build locally.

use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::bytes::Regex;

/// Matches a complete wheel anchor: the `<a>` element whose `href` points
/// at a `.whl` file, its link text, and an optional trailing `<br/>`.
/// Tolerates attribute order, single or double quotes, and extra
/// attributes (`data-requires-python`, `data-dist-info-metadata`, ...).
static WHEEL_ANCHOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)\s*<a\b[^>]*\bhref\s*=\s*(?:"[^"]*\.whl[^"]*"|'[^']*\.whl[^']*')[^>]*>.*?</a>[ \t]*(?:<br\s*/?>)?"#,
    )
    .unwrap()
});

/// Removes every wheel link from an index page. Non-wheel anchors
/// (`.tar.gz`, `.zip`, `.egg`) and page structure are preserved. Pure and
/// idempotent; the input is never mutated.
pub fn filter_wheel_links(html: &[u8]) -> Bytes {
    Bytes::from(WHEEL_ANCHOR.replace_all(html, &b""[..]).into_owned())
}
