/// Minimal escaping for text interpolated into HTML-mode messages.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Character-safe truncation with an ellipsis marker. Byte slicing would
/// panic on multi-byte boundaries.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// `[████░░░░░░] 40%` style bar for the stats screens.
pub fn progress_bar(completed: i64, total: i64) -> String {
    const WIDTH: usize = 10;
    let total = total.max(0);
    let completed = completed.clamp(0, total);
    let filled = if total == 0 {
        0
    } else {
        (completed as usize * WIDTH) / total as usize
    };
    let percent = if total == 0 {
        0
    } else {
        completed * 100 / total
    };
    format!(
        "[{}{}] {}%",
        "█".repeat(filled),
        "░".repeat(WIDTH - filled),
        percent
    )
}

/// `@username` when set, otherwise a dash.
pub fn username_display(username: Option<&str>) -> String {
    match username {
        Some(name) => format!("@{name}"),
        None => "—".to_string(),
    }
}

/// Total pages for a paginated listing, never less than one.
pub fn page_count(total: i64, per_page: i64) -> i64 {
    if total <= 0 {
        1
    } else {
        (total + per_page - 1) / per_page
    }
}
