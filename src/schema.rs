use std::sync::Arc;

use teloxide::{
    dispatching::{
        dialogue::{self, InMemStorage},
        UpdateFilterExt, UpdateHandler,
    },
    dptree,
    payloads::AnswerCallbackQuerySetters,
    prelude::Requester,
    types::{CallbackQuery, Message, Update},
    Bot,
};
use tracing::instrument;

use crate::{
    admin,
    ai::evaluator::OpenAiEvaluator,
    commands::{self, Command},
    config::Config,
    database::connection::Connection,
    database::store::SettingsStore,
    menu,
    state::BotState,
    testing, HandlerResult, UserDialogue,
};

pub fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Help].endpoint(commands::help))
        .branch(case![Command::Start].endpoint(commands::start))
        .branch(case![Command::Cancel].endpoint(commands::cancel))
        .branch(case![Command::Continue].endpoint(commands::resume));

    let message_handler = Update::filter_message()
        .branch(command_handler)
        .branch(
            case![BotState::TakingTest {
                attempt_id,
                block_id,
                questions,
                current_index,
                test_message_id
            }]
            .endpoint(testing::receive_answer),
        )
        .branch(case![BotState::EditingBlockText { block_id }].endpoint(admin::receive_block_text))
        .branch(
            case![BotState::AwaitingBlockVideo { block_id }].endpoint(admin::receive_block_video),
        )
        .branch(case![BotState::AwaitingBlockPdf { block_id }].endpoint(admin::receive_block_pdf))
        .endpoint(invalid_state);

    dialogue::enter::<Update, InMemStorage<BotState>, BotState, _>()
        .branch(message_handler)
        .branch(Update::filter_callback_query().endpoint(dispatch_callback))
}

#[instrument(level = "info", skip_all)]
async fn invalid_state(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(
        msg.chat.id,
        "I didn't understand that. Use the menu buttons, or /help for the command list.",
    )
    .await?;
    Ok(())
}

/// Single callback router. Button payloads carry everything a handler needs
/// (block or attempt ids), so stale buttons keep working after a restart.
#[instrument(skip_all, fields(user_id = q.from.id.0, data = q.data.as_deref().unwrap_or("")))]
async fn dispatch_callback(
    bot: Bot,
    q: CallbackQuery,
    dialogue: UserDialogue,
    connection: Arc<Connection>,
    evaluator: Arc<OpenAiEvaluator>,
    config: Arc<Config>,
) -> HandlerResult {
    let Some(data) = q.data.clone() else {
        bot.answer_callback_query(&q.id).await?;
        return Ok(());
    };
    let user_id = q.from.id.0 as i64;
    let username = q.from.username.clone();
    let full_name = q.from.full_name();

    if let Some(_block_id) = suffix_id(&data, "test_locked_") {
        bot.answer_callback_query(&q.id)
            .text("🔒 Pass the previous block's test first.")
            .show_alert(true)
            .await?;
        return Ok(());
    }

    if connection.is_maintenance_mode().await? && !config.is_admin(user_id) {
        bot.answer_callback_query(&q.id)
            .text(menu::MAINTENANCE_TEXT)
            .show_alert(true)
            .await?;
        return Ok(());
    }

    bot.answer_callback_query(&q.id).await?;

    let Some(message) = q.message.as_ref() else {
        return Ok(());
    };
    let chat_id = message.chat().id;
    let message_id = message.id();

    let admin_area = data.starts_with("admin_")
        || data.starts_with("content_")
        || data.starts_with("stats_");
    if admin_area && !config.is_admin(user_id) {
        bot.send_message(chat_id, "This section is for administrators.")
            .await?;
        return Ok(());
    }

    match data.as_str() {
        "menu_main" => {
            reset_editing_state(&dialogue).await?;
            menu::show_main_menu(&bot, chat_id, message_id, config.is_admin(user_id)).await
        }
        "menu_theory" => menu::show_theory_menu(&bot, chat_id, message_id, &*connection).await,
        "menu_tests" => {
            testing::show_tests_menu(
                &bot,
                chat_id,
                message_id,
                &*connection,
                user_id,
                username.as_deref(),
                &full_name,
            )
            .await
        }
        "menu_progress" => {
            menu::show_progress(
                &bot,
                chat_id,
                message_id,
                &*connection,
                user_id,
                username.as_deref(),
                &full_name,
            )
            .await
        }
        "test_continue" => {
            testing::resume_test(
                &bot,
                chat_id,
                &dialogue,
                connection.clone(),
                evaluator.clone(),
                config.clone(),
                user_id,
            )
            .await
        }
        "test_cancel_current" => {
            testing::cancel_current(&bot, chat_id, message_id, &dialogue, &*connection, user_id)
                .await
        }
        "admin_panel" => {
            reset_editing_state(&dialogue).await?;
            admin::show_admin_menu(&bot, chat_id, message_id, &*connection, &config, user_id).await
        }
        "admin_content" => {
            reset_editing_state(&dialogue).await?;
            admin::show_content(&bot, chat_id, message_id, &*connection, None).await
        }
        "admin_analytics" => admin::show_ai_analytics(&bot, chat_id, message_id, &*connection).await,
        "admin_maintenance" => {
            admin::toggle_maintenance(&bot, chat_id, message_id, &*connection, &config, user_id)
                .await
        }
        _ => {
            if let Some(block_id) = suffix_id(&data, "theory_view_") {
                menu::show_theory_block(&bot, chat_id, message_id, &*connection, block_id).await
            } else if let Some(block_id) = suffix_id(&data, "test_start_") {
                testing::start_test(
                    &bot,
                    chat_id,
                    message_id,
                    &dialogue,
                    &*connection,
                    user_id,
                    username.as_deref(),
                    &full_name,
                    block_id,
                )
                .await
            } else if let Some(block_id) = suffix_id(&data, "test_cancel_and_new_") {
                testing::cancel_and_start(
                    &bot,
                    chat_id,
                    message_id,
                    &dialogue,
                    &*connection,
                    user_id,
                    username.as_deref(),
                    &full_name,
                    block_id,
                )
                .await
            } else if let Some(attempt_id) = suffix_id(&data, "feedback_good_") {
                testing::save_feedback(&bot, chat_id, message_id, &*connection, attempt_id, 1)
                    .await
            } else if let Some(attempt_id) = suffix_id(&data, "feedback_bad_") {
                testing::save_feedback(&bot, chat_id, message_id, &*connection, attempt_id, -1)
                    .await
            } else if let Some(block_id) = suffix_id(&data, "content_view_") {
                reset_editing_state(&dialogue).await?;
                admin::show_content(&bot, chat_id, message_id, &*connection, Some(block_id)).await
            } else if let Some(block_id) = suffix_id(&data, "content_edit_text_") {
                admin::prompt_edit_text(&bot, chat_id, message_id, &dialogue, block_id).await
            } else if let Some(block_id) = suffix_id(&data, "content_edit_video_") {
                admin::prompt_edit_video(&bot, chat_id, message_id, &dialogue, block_id).await
            } else if let Some(block_id) = suffix_id(&data, "content_edit_pdf_") {
                admin::prompt_edit_pdf(&bot, chat_id, message_id, &dialogue, block_id).await
            } else if let Some(block_id) = suffix_id(&data, "content_delete_confirm_") {
                admin::delete_block(&bot, chat_id, message_id, &*connection, block_id).await
            } else if let Some(block_id) = suffix_id(&data, "content_delete_") {
                admin::confirm_delete(&bot, chat_id, message_id, &*connection, block_id).await
            } else if let Some(page) = suffix_id(&data, "stats_page_") {
                admin::show_stats_page(&bot, chat_id, message_id, &*connection, &config, page).await
            } else {
                tracing::warn!(data, "unknown callback payload");
                Ok(())
            }
        }
    }
}

fn suffix_id(data: &str, prefix: &str) -> Option<i64> {
    data.strip_prefix(prefix)?.parse().ok()
}

/// Backing out of a content edit prompt must drop the pending editing state,
/// or the next ordinary message would be taken as block content. Other
/// dialogue states stay untouched.
async fn reset_editing_state(dialogue: &UserDialogue) -> HandlerResult {
    if matches!(
        dialogue.get().await?,
        Some(
            BotState::EditingBlockText { .. }
                | BotState::AwaitingBlockVideo { .. }
                | BotState::AwaitingBlockPdf { .. }
        )
    ) {
        dialogue.update(BotState::Idle).await?;
    }
    Ok(())
}
