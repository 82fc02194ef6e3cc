//! Query component merging.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use url::Url;

/// A single query key/value pair.
pub type QueryItem = (String, String);

/// Characters escaped in query names and values.
///
/// Everything outside the unreserved set is escaped except the sub-delimiters
/// and separators that are legal inside a query component. `+` is among the
/// characters left alone here and is fixed up afterwards.
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'!')
    .remove(b'$')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b':')
    .remove(b'@')
    .remove(b'/')
    .remove(b'?');

/// Encode query items into a query string.
///
/// Every literal `+` ends up as `%2B` so it is never read back as a space.
pub fn encode(items: &[QueryItem]) -> String {
    let encoded = items
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                utf8_percent_encode(key, QUERY_COMPONENT),
                utf8_percent_encode(value, QUERY_COMPONENT)
            )
        })
        .collect::<Vec<_>>()
        .join("&");

    encoded.replace('+', "%2B")
}

/// Replace the query component of `url` with `items`.
///
/// `None` leaves the existing query untouched. An empty slice clears it.
pub fn merge(url: &mut Url, items: Option<&[QueryItem]>) {
    let Some(items) = items else {
        return;
    };

    if items.is_empty() {
        url.set_query(None);
    } else {
        url.set_query(Some(&encode(items)));
    }
}
