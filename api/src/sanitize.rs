//! Escaping for untrusted text that the browser UI renders as HTML.

/// Escape the characters HTML treats specially, quotes included.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Trim and escape user or workflow supplied text.
pub fn clean(text: &str) -> String {
    escape_html(text.trim())
}
