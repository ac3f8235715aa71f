use std::sync::Arc;

use teloxide::{
    payloads::{EditMessageTextSetters, SendMessageSetters},
    prelude::Requester,
    types::{ChatId, Message, MessageId, ParseMode},
    Bot,
};
use tracing::instrument;

use crate::{
    config::Config,
    database::connection::Connection,
    database::store::{ContentStore, SettingsStore, UserStore},
    helpers::{escape_html, page_count, progress_bar, truncate_chars, username_display},
    keyboard,
    state::BotState,
    HandlerResult, UserDialogue,
};

const THEORY_CARD_CHARS: usize = 500;

pub async fn show_admin_menu<S: SettingsStore>(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    store: &S,
    config: &Config,
    user_id: i64,
) -> HandlerResult {
    let maintenance = store.is_maintenance_mode().await?;
    let status = if maintenance {
        "🔧 Maintenance mode is ON"
    } else {
        "🟢 The bot is serving users"
    };

    bot.edit_message_text(
        chat_id,
        message_id,
        format!("⚙️ <b>Admin panel</b>\n\n{status}"),
    )
    .parse_mode(ParseMode::Html)
    .reply_markup(keyboard::admin_menu_keyboard(
        config.is_super_admin(user_id),
        maintenance,
    ))
    .await?;
    Ok(())
}

/// One block per screen, with neighbour navigation. `block_id` of `None`
/// opens the first block.
#[instrument(skip(bot, store))]
pub async fn show_content<S: ContentStore>(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    store: &S,
    block_id: Option<i64>,
) -> HandlerResult {
    let blocks = store.list_blocks().await?;
    if blocks.is_empty() {
        bot.edit_message_text(chat_id, message_id, "There are no content blocks.")
            .reply_markup(keyboard::back_keyboard("admin_panel"))
            .await?;
        return Ok(());
    }

    let index = block_id
        .and_then(|id| blocks.iter().position(|b| b.id == id))
        .unwrap_or(0);
    let block = &blocks[index];
    let prev_id = index.checked_sub(1).map(|i| blocks[i].id);
    let next_id = blocks.get(index + 1).map(|b| b.id);

    let questions = store.questions_for_block(block.id).await?;
    let theory = block
        .theory_text
        .as_deref()
        .map(|t| truncate_chars(t, THEORY_CARD_CHARS))
        .unwrap_or_else(|| "(no text)".to_string());

    let text = format!(
        "📚 <b>{}</b> (block {}/{})\n\n{}\n\n\
         Questions: {}\nVideo: {}\nPDF: {}",
        escape_html(&block.title),
        index + 1,
        blocks.len(),
        escape_html(&theory),
        questions.len(),
        if block.video_file_id.is_some() { "✅" } else { "—" },
        if block.pdf_file_id.is_some() { "✅" } else { "—" },
    );

    bot.edit_message_text(chat_id, message_id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(keyboard::admin_content_keyboard(block.id, prev_id, next_id))
        .await?;
    Ok(())
}

pub async fn prompt_edit_text(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    dialogue: &UserDialogue,
    block_id: i64,
) -> HandlerResult {
    dialogue
        .update(BotState::EditingBlockText { block_id })
        .await?;
    bot.edit_message_text(
        chat_id,
        message_id,
        "✏️ Send the new theory text for this block as one message.",
    )
    .reply_markup(keyboard::back_keyboard("admin_content"))
    .await?;
    Ok(())
}

pub async fn prompt_edit_video(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    dialogue: &UserDialogue,
    block_id: i64,
) -> HandlerResult {
    dialogue
        .update(BotState::AwaitingBlockVideo { block_id })
        .await?;
    bot.edit_message_text(
        chat_id,
        message_id,
        "🎬 Send the video for this block, or «-» to remove the current one.",
    )
    .reply_markup(keyboard::back_keyboard("admin_content"))
    .await?;
    Ok(())
}

pub async fn prompt_edit_pdf(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    dialogue: &UserDialogue,
    block_id: i64,
) -> HandlerResult {
    dialogue
        .update(BotState::AwaitingBlockPdf { block_id })
        .await?;
    bot.edit_message_text(
        chat_id,
        message_id,
        "📄 Send the PDF for this block, or «-» to remove the current one.",
    )
    .reply_markup(keyboard::back_keyboard("admin_content"))
    .await?;
    Ok(())
}

#[instrument(skip(bot, msg, dialogue, connection))]
pub async fn receive_block_text(
    bot: Bot,
    msg: Message,
    dialogue: UserDialogue,
    block_id: i64,
    connection: Arc<Connection>,
) -> HandlerResult {
    let Some(text) = msg.text() else {
        bot.send_message(msg.chat.id, "Please send the theory as a text message.")
            .await?;
        return Ok(());
    };

    connection.update_block_text(block_id, text).await?;
    dialogue.update(BotState::Idle).await?;
    bot.send_message(msg.chat.id, "✅ Theory text updated.")
        .reply_markup(keyboard::back_keyboard("admin_content"))
        .await?;
    Ok(())
}

#[instrument(skip(bot, msg, dialogue, connection))]
pub async fn receive_block_video(
    bot: Bot,
    msg: Message,
    dialogue: UserDialogue,
    block_id: i64,
    connection: Arc<Connection>,
) -> HandlerResult {
    let reply = if let Some(video) = msg.video() {
        connection
            .update_block_video(block_id, Some(&video.file.id))
            .await?;
        "✅ Video attached."
    } else if msg.text() == Some("-") {
        connection.update_block_video(block_id, None).await?;
        "✅ Video removed."
    } else {
        bot.send_message(msg.chat.id, "Please send a video, or «-» to remove it.")
            .await?;
        return Ok(());
    };

    dialogue.update(BotState::Idle).await?;
    bot.send_message(msg.chat.id, reply)
        .reply_markup(keyboard::back_keyboard("admin_content"))
        .await?;
    Ok(())
}

#[instrument(skip(bot, msg, dialogue, connection))]
pub async fn receive_block_pdf(
    bot: Bot,
    msg: Message,
    dialogue: UserDialogue,
    block_id: i64,
    connection: Arc<Connection>,
) -> HandlerResult {
    let reply = if let Some(document) = msg.document() {
        connection
            .update_block_pdf(block_id, Some(&document.file.id))
            .await?;
        "✅ PDF attached."
    } else if msg.text() == Some("-") {
        connection.update_block_pdf(block_id, None).await?;
        "✅ PDF removed."
    } else {
        bot.send_message(msg.chat.id, "Please send a PDF document, or «-» to remove it.")
            .await?;
        return Ok(());
    };

    dialogue.update(BotState::Idle).await?;
    bot.send_message(msg.chat.id, reply)
        .reply_markup(keyboard::back_keyboard("admin_content"))
        .await?;
    Ok(())
}

pub async fn confirm_delete<S: ContentStore>(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    store: &S,
    block_id: i64,
) -> HandlerResult {
    let Some(block) = store.get_block(block_id).await? else {
        show_content(bot, chat_id, message_id, store, None).await?;
        return Ok(());
    };

    bot.edit_message_text(
        chat_id,
        message_id,
        format!(
            "🗑 Delete <b>{}</b>?\n\nIts questions and every stored answer go with it.",
            escape_html(&block.title)
        ),
    )
    .parse_mode(ParseMode::Html)
    .reply_markup(keyboard::confirm_delete_keyboard(block_id))
    .await?;
    Ok(())
}

#[instrument(skip(bot, store))]
pub async fn delete_block<S: ContentStore>(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    store: &S,
    block_id: i64,
) -> HandlerResult {
    store.delete_block(block_id).await?;
    tracing::info!(block_id, "content block deleted");
    bot.edit_message_text(chat_id, message_id, "🗑 Block deleted.")
        .reply_markup(keyboard::back_keyboard("admin_content"))
        .await?;
    Ok(())
}

pub async fn show_stats_page<S: UserStore + ContentStore>(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    store: &S,
    config: &Config,
    page: i64,
) -> HandlerResult {
    let per_page = config.users_per_page;
    let (users, total) = store.user_statistics(page * per_page, per_page).await?;
    let total_pages = page_count(total, per_page);
    let max_order = store.max_block_order().await?;

    let mut text = format!(
        "👥 <b>Users</b> — page {}/{}, {} total\n\n",
        page + 1,
        total_pages,
        total
    );
    if users.is_empty() {
        text.push_str("Nobody here yet.");
    }
    for (i, user) in users.iter().enumerate() {
        text.push_str(&format!(
            "{}. {} ({}) — {} {}/{} blocks, {} tests passed\n",
            page * per_page + i as i64 + 1,
            escape_html(&user.full_name),
            escape_html(&username_display(user.username.as_deref())),
            progress_bar(user.last_completed_block_order.min(max_order), max_order),
            user.last_completed_block_order.min(max_order),
            max_order,
            user.completed_tests,
        ));
    }

    bot.edit_message_text(chat_id, message_id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(keyboard::stats_keyboard(page, total_pages))
        .await?;
    Ok(())
}

pub async fn show_ai_analytics<S: ContentStore>(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    store: &S,
) -> HandlerResult {
    let analytics = store.ai_analytics().await?;

    let mut text = format!(
        "🤖 <b>AI analytics</b>\n\n\
         Answers analyzed: {} of {} (pending: {})\n\
         ✅ Sufficient: {} | ❌ Insufficient: {}\n\
         📈 Average success rate: {:.1}%\n\n\
         Report feedback: 👍 {} | 👎 {} (unrated: {})\n",
        analytics.analyzed_answers,
        analytics.total_answers,
        analytics.pending_answers,
        analytics.sufficient_answers,
        analytics.insufficient_answers,
        analytics.avg_success_rate(),
        analytics.positive_ratings,
        analytics.negative_ratings,
        analytics.unrated_attempts,
    );

    if !analytics.blocks.is_empty() {
        text.push_str("\n<b>Per block:</b>\n");
        for block in &analytics.blocks {
            text.push_str(&format!(
                "• {}: {:.1}% of {} answers, 👍 {} 👎 {}\n",
                escape_html(&block.title),
                block.success_rate(),
                block.total_answers,
                block.positive_feedback,
                block.negative_feedback,
            ));
        }
    }

    bot.edit_message_text(chat_id, message_id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(keyboard::back_keyboard("admin_panel"))
        .await?;
    Ok(())
}

/// Super-admin only. Re-renders the admin menu with the new state.
#[instrument(skip(bot, store, config))]
pub async fn toggle_maintenance<S: SettingsStore>(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    store: &S,
    config: &Config,
    user_id: i64,
) -> HandlerResult {
    if !config.is_super_admin(user_id) {
        bot.edit_message_text(
            chat_id,
            message_id,
            "Only the super admin can toggle maintenance mode.",
        )
        .reply_markup(keyboard::back_keyboard("admin_panel"))
        .await?;
        return Ok(());
    }

    let enabled = store.toggle_maintenance_mode().await?;
    tracing::info!(enabled, by = user_id, "maintenance mode toggled");
    show_admin_menu(bot, chat_id, message_id, store, config, user_id).await
}
