use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::database::models::ContentBlock;

fn button(label: impl Into<String>, data: impl Into<String>) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(label.into(), data.into())
}

pub fn main_menu_keyboard(is_admin: bool) -> InlineKeyboardMarkup {
    let mut rows = vec![
        vec![button("📖 Theory", "menu_theory")],
        vec![button("📝 Tests", "menu_tests")],
        vec![button("📊 My progress", "menu_progress")],
    ];
    if is_admin {
        rows.push(vec![button("⚙️ Admin panel", "admin_panel")]);
    }
    InlineKeyboardMarkup::new(rows)
}

pub fn theory_menu_keyboard(blocks: &[ContentBlock]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = blocks
        .iter()
        .map(|block| vec![button(&block.title, format!("theory_view_{}", block.id))])
        .collect();
    rows.push(vec![button("⬅️ Back", "menu_main")]);
    InlineKeyboardMarkup::new(rows)
}

pub fn theory_view_keyboard(block_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button("📝 Take the test", format!("test_start_{block_id}"))],
        vec![button("⬅️ Back", "menu_theory")],
    ])
}

/// One row per block: done blocks get a check, the next block is open, the
/// rest stay locked behind a no-op callback.
pub fn tests_menu_keyboard(blocks: &[ContentBlock], last_completed: i64) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = blocks
        .iter()
        .map(|block| {
            if block.block_order <= last_completed {
                vec![button(
                    format!("✅ {}", block.title),
                    format!("test_start_{}", block.id),
                )]
            } else if block.is_accessible(last_completed) {
                vec![button(&block.title, format!("test_start_{}", block.id))]
            } else {
                vec![button(
                    format!("🔒 {}", block.title),
                    format!("test_locked_{}", block.id),
                )]
            }
        })
        .collect();
    rows.push(vec![button("⬅️ Back", "menu_main")]);
    InlineKeyboardMarkup::new(rows)
}

pub fn feedback_keyboard(attempt_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        button("👍 Helpful", format!("feedback_good_{attempt_id}")),
        button("👎 Not helpful", format!("feedback_bad_{attempt_id}")),
    ]])
}

/// Shown when the user starts a new test while another is in progress.
pub fn active_test_keyboard(pending_block_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button("▶️ Continue current test", "test_continue")],
        vec![button(
            "🔄 Cancel it and start the new one",
            format!("test_cancel_and_new_{pending_block_id}"),
        )],
    ])
}

pub fn test_in_progress_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![button("❌ Cancel test", "test_cancel_current")]])
}

pub fn back_keyboard(destination: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![button("⬅️ Back", destination)]])
}

pub fn admin_menu_keyboard(is_super_admin: bool, maintenance_on: bool) -> InlineKeyboardMarkup {
    let mut rows = vec![
        vec![button("📚 Manage content", "admin_content")],
        vec![button("👥 User statistics", "stats_page_0")],
        vec![button("🤖 AI analytics", "admin_analytics")],
    ];
    if is_super_admin {
        let label = if maintenance_on {
            "🟢 Disable maintenance mode"
        } else {
            "🔧 Enable maintenance mode"
        };
        rows.push(vec![button(label, "admin_maintenance")]);
    }
    rows.push(vec![button("⬅️ Back", "menu_main")]);
    InlineKeyboardMarkup::new(rows)
}

/// Per-block admin card with neighbour navigation and edit actions.
pub fn admin_content_keyboard(
    block_id: i64,
    prev_id: Option<i64>,
    next_id: Option<i64>,
) -> InlineKeyboardMarkup {
    let mut rows = Vec::new();

    let mut nav = Vec::new();
    if let Some(prev) = prev_id {
        nav.push(button("⬅️", format!("content_view_{prev}")));
    }
    if let Some(next) = next_id {
        nav.push(button("➡️", format!("content_view_{next}")));
    }
    if !nav.is_empty() {
        rows.push(nav);
    }

    rows.push(vec![button(
        "✏️ Edit theory text",
        format!("content_edit_text_{block_id}"),
    )]);
    rows.push(vec![
        button("🎬 Attach video", format!("content_edit_video_{block_id}")),
        button("📄 Attach PDF", format!("content_edit_pdf_{block_id}")),
    ]);
    rows.push(vec![button(
        "🗑 Delete block",
        format!("content_delete_{block_id}"),
    )]);
    rows.push(vec![button("⬅️ Back", "admin_panel")]);
    InlineKeyboardMarkup::new(rows)
}

pub fn confirm_delete_keyboard(block_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        button("✅ Yes, delete", format!("content_delete_confirm_{block_id}")),
        button("❌ No", format!("content_view_{block_id}")),
    ]])
}

pub fn stats_keyboard(page: i64, total_pages: i64) -> InlineKeyboardMarkup {
    let mut nav = Vec::new();
    if page > 0 {
        nav.push(button("⬅️", format!("stats_page_{}", page - 1)));
    }
    if page + 1 < total_pages {
        nav.push(button("➡️", format!("stats_page_{}", page + 1)));
    }

    let mut rows = Vec::new();
    if !nav.is_empty() {
        rows.push(nav);
    }
    rows.push(vec![button("⬅️ Back", "admin_panel")]);
    InlineKeyboardMarkup::new(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(id: i64, order: i64) -> ContentBlock {
        ContentBlock {
            id,
            title: format!("Block {order}"),
            theory_text: None,
            video_file_id: None,
            pdf_file_id: None,
            block_order: order,
        }
    }

    fn callback_data(markup: &InlineKeyboardMarkup) -> Vec<String> {
        use teloxide::types::InlineKeyboardButtonKind;
        markup
            .inline_keyboard
            .iter()
            .flatten()
            .filter_map(|b| match &b.kind {
                InlineKeyboardButtonKind::CallbackData(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn tests_menu_marks_done_open_and_locked_blocks() {
        let blocks = [block(1, 1), block(2, 2), block(3, 3)];
        let markup = tests_menu_keyboard(&blocks, 1);
        let data = callback_data(&markup);

        assert_eq!(data[0], "test_start_1");
        assert_eq!(data[1], "test_start_2");
        assert_eq!(data[2], "test_locked_3");

        let labels: Vec<_> = markup
            .inline_keyboard
            .iter()
            .flatten()
            .map(|b| b.text.clone())
            .collect();
        assert!(labels[0].starts_with("✅"));
        assert!(!labels[1].starts_with("🔒"));
        assert!(labels[2].starts_with("🔒"));
    }

    #[test]
    fn feedback_buttons_carry_the_attempt_id() {
        let data = callback_data(&feedback_keyboard(42));
        assert_eq!(data, vec!["feedback_good_42", "feedback_bad_42"]);
    }

    #[test]
    fn admin_menu_gates_maintenance_behind_super_admin() {
        let plain = callback_data(&admin_menu_keyboard(false, false));
        assert!(!plain.iter().any(|d| d == "admin_maintenance"));

        let full = callback_data(&admin_menu_keyboard(true, true));
        assert!(full.iter().any(|d| d == "admin_maintenance"));
    }

    #[test]
    fn content_navigation_skips_missing_neighbours() {
        let first = callback_data(&admin_content_keyboard(1, None, Some(2)));
        assert!(first.contains(&"content_view_2".to_string()));
        assert!(!first.iter().any(|d| d.starts_with("content_view_0")));

        let middle = callback_data(&admin_content_keyboard(2, Some(1), Some(3)));
        assert!(middle.contains(&"content_view_1".to_string()));
        assert!(middle.contains(&"content_view_3".to_string()));
    }

    #[test]
    fn stats_pagination_hides_dead_arrows() {
        let single = callback_data(&stats_keyboard(0, 1));
        assert!(!single.iter().any(|d| d.starts_with("stats_page_")));

        let middle = callback_data(&stats_keyboard(1, 3));
        assert!(middle.contains(&"stats_page_0".to_string()));
        assert!(middle.contains(&"stats_page_2".to_string()));
    }
}
