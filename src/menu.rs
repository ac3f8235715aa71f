use teloxide::{
    payloads::{EditMessageTextSetters, SendMessageSetters},
    prelude::Requester,
    types::{ChatId, InputFile, MessageId, ParseMode},
    Bot,
};
use tracing::instrument;

use crate::{
    database::store::{ContentStore, UserStore},
    helpers::{escape_html, progress_bar, truncate_chars},
    keyboard, HandlerResult,
};

pub const MAINTENANCE_TEXT: &str =
    "🔧 The bot is under maintenance. Please come back a bit later.";

const MAIN_MENU_TEXT: &str =
    "👋 Welcome to the cargo training bot!\n\nStudy the theory block by block, pass the test \
     after each one and unlock the next.\n\nChoose a section:";

// Telegram caps messages at 4096 characters; leave headroom for the header.
const THEORY_PREVIEW_CHARS: usize = 3500;

pub async fn send_main_menu(bot: &Bot, chat_id: ChatId, is_admin: bool) -> HandlerResult {
    bot.send_message(chat_id, MAIN_MENU_TEXT)
        .reply_markup(keyboard::main_menu_keyboard(is_admin))
        .await?;
    Ok(())
}

pub async fn show_main_menu(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    is_admin: bool,
) -> HandlerResult {
    bot.edit_message_text(chat_id, message_id, MAIN_MENU_TEXT)
        .reply_markup(keyboard::main_menu_keyboard(is_admin))
        .await?;
    Ok(())
}

pub async fn show_theory_menu<S: ContentStore>(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    store: &S,
) -> HandlerResult {
    let blocks = store.list_blocks().await?;
    if blocks.is_empty() {
        bot.edit_message_text(chat_id, message_id, "No study material has been added yet.")
            .reply_markup(keyboard::back_keyboard("menu_main"))
            .await?;
        return Ok(());
    }

    bot.edit_message_text(chat_id, message_id, "📖 <b>Theory</b>\n\nChoose a block to read:")
        .parse_mode(ParseMode::Html)
        .reply_markup(keyboard::theory_menu_keyboard(&blocks))
        .await?;
    Ok(())
}

/// Theory text is edited in place; attached media goes out as separate
/// messages so the navigation message stays editable.
#[instrument(skip(bot, store))]
pub async fn show_theory_block<S: ContentStore>(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    store: &S,
    block_id: i64,
) -> HandlerResult {
    let Some(block) = store.get_block(block_id).await? else {
        bot.edit_message_text(chat_id, message_id, "This block no longer exists.")
            .reply_markup(keyboard::back_keyboard("menu_theory"))
            .await?;
        return Ok(());
    };

    let theory = block
        .theory_text
        .as_deref()
        .unwrap_or("No text has been added for this block yet.");
    let text = format!(
        "📖 <b>{}</b>\n\n{}",
        escape_html(&block.title),
        escape_html(&truncate_chars(theory, THEORY_PREVIEW_CHARS))
    );

    bot.edit_message_text(chat_id, message_id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(keyboard::theory_view_keyboard(block.id))
        .await?;

    if let Some(file_id) = &block.video_file_id {
        bot.send_video(chat_id, InputFile::file_id(file_id.clone()))
            .await?;
    }
    if let Some(file_id) = &block.pdf_file_id {
        bot.send_document(chat_id, InputFile::file_id(file_id.clone()))
            .await?;
    }
    Ok(())
}

pub async fn show_progress<S: ContentStore + UserStore>(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    store: &S,
    user_id: i64,
    username: Option<&str>,
    full_name: &str,
) -> HandlerResult {
    let user = store.get_or_create_user(user_id, username, full_name).await?;
    let total = store.max_block_order().await?;
    let completed = user.last_completed_block_order.min(total);

    let text = format!(
        "📊 <b>Your progress</b>\n\n{}\nCompleted blocks: {completed} of {total}\n\n\
         Pass the test after each block to unlock the next one.",
        progress_bar(completed, total)
    );

    bot.edit_message_text(chat_id, message_id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(keyboard::back_keyboard("menu_main"))
        .await?;
    Ok(())
}
