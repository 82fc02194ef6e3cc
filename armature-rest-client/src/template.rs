//! URL template expansion.
//!
//! Templates embed `{name}` placeholders anywhere in the string. Expansion is
//! textual: every placeholder is replaced by its parameter value and the
//! result is then parsed as a URL.

use std::collections::HashMap;

use tracing::debug;
use url::Url;

use crate::RestError;

/// Placeholder values keyed by placeholder name.
pub type TemplateParams = HashMap<String, String>;

/// Check whether a URL string contains template placeholders.
pub fn is_template(url: &str) -> bool {
    url.find('{')
        .is_some_and(|open| url[open..].contains('}'))
}

/// Replace every `{name}` placeholder in `template` with its value from `params`.
///
/// Parameters that the template does not reference are ignored. An unresolved
/// placeholder or an unbalanced brace is an error.
pub fn substitute(template: &str, params: &TemplateParams) -> Result<String, RestError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let (literal, tail) = rest.split_at(open);
        if literal.contains('}') {
            debug!(template, "Unbalanced closing brace in URL template");
            return Err(RestError::InvalidSubstitution);
        }
        out.push_str(literal);

        let tail = &tail[1..];
        let close = tail.find('}').ok_or(RestError::InvalidSubstitution)?;
        let name = &tail[..close];
        if name.is_empty() || name.contains('{') {
            debug!(template, "Malformed placeholder in URL template");
            return Err(RestError::InvalidSubstitution);
        }

        let Some(value) = params.get(name) else {
            debug!(template, placeholder = name, "Unresolved URL template placeholder");
            return Err(RestError::InvalidSubstitution);
        };
        out.push_str(value);
        rest = &tail[close + 1..];
    }

    if rest.contains('}') {
        return Err(RestError::InvalidSubstitution);
    }
    out.push_str(rest);
    Ok(out)
}

/// Expand `template` with `params` and parse the result as a URL.
pub fn expand(template: &str, params: &TemplateParams) -> Result<Url, RestError> {
    let expanded = substitute(template, params)?;
    Url::parse(&expanded).map_err(|e| {
        debug!(url = %expanded, error = %e, "Expanded URL template is malformed");
        RestError::InvalidSubstitution
    })
}
