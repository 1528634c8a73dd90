/// Escapes text for use in HTML element content and quoted attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Cuts `text` to at most `max_len` characters, ending with an ellipsis when cut.
pub fn truncate_with_ellipsis(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_len.saturating_sub(1)).collect();
    format!("{}…", kept.trim_end())
}

/// Link opening in a new tab.
pub fn a_new_tab(to: &str, text: &str, style: &str) -> String {
    format!(
        r#"<a href="{}" target="_blank" rel="noopener noreferrer" style="{}">{}</a>"#,
        escape(to),
        escape(style),
        escape(text)
    )
}

pub fn link(to: &str, inner_html: &str) -> String {
    format!(r#"<a href="{}">{inner_html}</a>"#, escape(to))
}

/// Joins rendered fragments with `separator` between each pair.
pub fn join_fragments(fragments: impl IntoIterator<Item = String>, separator: &str) -> String {
    let mut out = String::new();
    for (i, fragment) in fragments.into_iter().enumerate() {
        if i != 0 {
            out.push_str(separator);
        }
        out.push_str(&fragment);
    }
    out
}
