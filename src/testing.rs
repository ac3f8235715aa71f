use std::sync::Arc;

use teloxide::{
    net::Download,
    payloads::{EditMessageTextSetters, SendMessageSetters},
    prelude::Requester,
    types::{ChatId, Message, MessageId, ParseMode},
    Bot,
};
use tracing::instrument;

use crate::{
    ai::evaluator::{OpenAiEvaluator, Transcribe},
    ai::pipeline::{spawn_analysis, AnalysisSettings, BotNotifier},
    config::Config,
    database::connection::Connection,
    database::models::Question,
    database::store::{AttemptStore, ContentStore, StoreError, UserStore},
    helpers::escape_html,
    keyboard,
    state::BotState,
    HandlerResult, UserDialogue,
};

pub async fn show_tests_menu<S: ContentStore + UserStore>(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    store: &S,
    user_id: i64,
    username: Option<&str>,
    full_name: &str,
) -> HandlerResult {
    let user = store.get_or_create_user(user_id, username, full_name).await?;
    let blocks = store.list_blocks().await?;
    if blocks.is_empty() {
        bot.edit_message_text(chat_id, message_id, "No tests have been added yet.")
            .reply_markup(keyboard::back_keyboard("menu_main"))
            .await?;
        return Ok(());
    }

    bot.edit_message_text(
        chat_id,
        message_id,
        "📝 <b>Tests</b>\n\nPass each block's test to unlock the next one:",
    )
    .parse_mode(ParseMode::Html)
    .reply_markup(keyboard::tests_menu_keyboard(
        &blocks,
        user.last_completed_block_order,
    ))
    .await?;
    Ok(())
}

/// Entry point of the `test_start_*` callback. Checks the progress gate and
/// the single-active-attempt rule before anything is created.
#[instrument(skip(bot, dialogue, store, username, full_name))]
pub async fn start_test<S>(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    dialogue: &UserDialogue,
    store: &S,
    user_id: i64,
    username: Option<&str>,
    full_name: &str,
    block_id: i64,
) -> HandlerResult
where
    S: ContentStore + UserStore + AttemptStore,
{
    let user = store.get_or_create_user(user_id, username, full_name).await?;

    let Some(block) = store.get_block(block_id).await? else {
        bot.edit_message_text(chat_id, message_id, "This test no longer exists.")
            .reply_markup(keyboard::back_keyboard("menu_tests"))
            .await?;
        return Ok(());
    };

    if !block.is_accessible(user.last_completed_block_order) {
        bot.edit_message_text(
            chat_id,
            message_id,
            "🔒 This block is still locked. Pass the previous block's test first.",
        )
        .reply_markup(keyboard::back_keyboard("menu_tests"))
        .await?;
        return Ok(());
    }

    if let Some(active) = store.active_attempt(user_id).await? {
        offer_active_choice(bot, chat_id, message_id, &active.block_title, block_id).await?;
        return Ok(());
    }

    begin_new_test(bot, chat_id, message_id, dialogue, store, user_id, block_id).await
}

/// Abandons whatever is active and starts the pending block.
pub async fn cancel_and_start<S>(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    dialogue: &UserDialogue,
    store: &S,
    user_id: i64,
    username: Option<&str>,
    full_name: &str,
    block_id: i64,
) -> HandlerResult
where
    S: ContentStore + UserStore + AttemptStore,
{
    store.abandon_active(user_id).await?;
    start_test(
        bot, chat_id, message_id, dialogue, store, user_id, username, full_name, block_id,
    )
    .await
}

pub async fn cancel_current<S: AttemptStore>(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    dialogue: &UserDialogue,
    store: &S,
    user_id: i64,
) -> HandlerResult {
    let abandoned = store.abandon_active(user_id).await?;
    let text = if abandoned {
        "❌ Test cancelled. You can restart it from the tests menu."
    } else {
        "You have no active test."
    };
    bot.edit_message_text(chat_id, message_id, text)
        .reply_markup(keyboard::back_keyboard("menu_tests"))
        .await?;
    dialogue.update(BotState::Idle).await?;
    Ok(())
}

/// `/continue` and the `test_continue` button. The store decides where the
/// test stands; the answered count gives the next question index.
#[instrument(skip(bot, dialogue, connection, evaluator, config))]
pub async fn resume_test(
    bot: &Bot,
    chat_id: ChatId,
    dialogue: &UserDialogue,
    connection: Arc<Connection>,
    evaluator: Arc<OpenAiEvaluator>,
    config: Arc<Config>,
    user_id: i64,
) -> HandlerResult {
    let Some(active) = connection.active_attempt(user_id).await? else {
        bot.send_message(chat_id, "You have no active test. Pick one from the tests menu.")
            .reply_markup(keyboard::back_keyboard("menu_tests"))
            .await?;
        return Ok(());
    };

    let questions = connection.questions_for_block(active.block_id).await?;
    if questions.is_empty() {
        // The block was deleted under the attempt; nothing left to resume.
        connection.abandon_active(user_id).await?;
        dialogue.update(BotState::Idle).await?;
        bot.send_message(chat_id, "That test's block no longer exists, so it was cancelled.")
            .reply_markup(keyboard::back_keyboard("menu_tests"))
            .await?;
        return Ok(());
    }
    let answered = connection.answered_count(active.attempt_id).await? as usize;

    if answered >= questions.len() {
        // All answers are already stored; hand straight over to analysis.
        dialogue.update(BotState::Idle).await?;
        if connection
            .begin_analysis(active.attempt_id, questions.len() as i64)
            .await?
        {
            spawn_analysis(
                connection,
                evaluator,
                Arc::new(BotNotifier::new(bot.clone())),
                AnalysisSettings::from(&*config),
                user_id,
                active.attempt_id,
            );
        } else {
            bot.send_message(chat_id, "Your test is already being analyzed, hold on.")
                .await?;
        }
        return Ok(());
    }

    let message = bot
        .send_message(
            chat_id,
            question_text(&active.block_title, answered, questions.len(), &questions[answered]),
        )
        .parse_mode(ParseMode::Html)
        .reply_markup(keyboard::test_in_progress_keyboard())
        .await?;

    dialogue
        .update(BotState::TakingTest {
            attempt_id: active.attempt_id,
            block_id: active.block_id,
            questions,
            current_index: answered,
            test_message_id: message.id.0,
        })
        .await?;
    Ok(())
}

/// One incoming answer while `TakingTest`. Text is taken as-is (truncated),
/// voice goes through transcription first. A failed transcription leaves the
/// question unanswered.
#[instrument(skip_all, fields(attempt_id = attempt_id, current_index = current_index))]
pub async fn receive_answer(
    bot: Bot,
    msg: Message,
    dialogue: UserDialogue,
    (attempt_id, block_id, questions, current_index, test_message_id): (
        i64,
        i64,
        Vec<Question>,
        usize,
        i32,
    ),
    connection: Arc<Connection>,
    evaluator: Arc<OpenAiEvaluator>,
    config: Arc<Config>,
) -> HandlerResult {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let user_id = from.id.0 as i64;

    let answer = if let Some(text) = msg.text() {
        text.chars().take(config.max_answer_length).collect::<String>()
    } else if let Some(voice) = msg.voice() {
        let file = bot.get_file(voice.file.id.clone()).await?;
        let mut audio = Vec::new();
        bot.download_file(&file.path, &mut audio).await?;
        match evaluator.transcribe(audio).await {
            Ok(text) if !text.is_empty() => {
                bot.send_message(msg.chat.id, format!("🎙 I heard: «{text}»"))
                    .await?;
                text.chars().take(config.max_answer_length).collect()
            }
            Ok(_) | Err(_) => {
                bot.send_message(
                    msg.chat.id,
                    "🎙 I couldn't make out the voice message. Please repeat it or type your answer.",
                )
                .await?;
                return Ok(());
            }
        }
    } else {
        bot.send_message(msg.chat.id, "Please answer with text or a voice message.")
            .await?;
        return Ok(());
    };

    let Some(question) = questions.get(current_index) else {
        tracing::warn!(attempt_id, current_index, "answer for an out-of-range question");
        dialogue.update(BotState::Idle).await?;
        return Ok(());
    };

    match connection.save_answer(attempt_id, question.id, &answer).await {
        Ok(_) => {}
        Err(StoreError::DuplicateAnswer) => {
            // A racing duplicate delivery already stored this one; the first
            // write stands and the flow moves on.
            tracing::warn!(attempt_id, question_id = question.id, "duplicate answer dropped");
        }
        Err(e) => return Err(e.into()),
    }

    let next_index = current_index + 1;
    if next_index < questions.len() {
        let block_title = connection
            .get_block(block_id)
            .await?
            .map(|b| b.title)
            .unwrap_or_default();
        bot.edit_message_text(
            msg.chat.id,
            MessageId(test_message_id),
            question_text(&block_title, next_index, questions.len(), &questions[next_index]),
        )
        .parse_mode(ParseMode::Html)
        .reply_markup(keyboard::test_in_progress_keyboard())
        .await?;

        dialogue
            .update(BotState::TakingTest {
                attempt_id,
                block_id,
                questions,
                current_index: next_index,
                test_message_id,
            })
            .await?;
        return Ok(());
    }

    bot.edit_message_text(
        msg.chat.id,
        MessageId(test_message_id),
        "✅ All answers received. Starting the analysis...",
    )
    .await?;
    dialogue.update(BotState::Idle).await?;

    // The single UPDATE behind begin_analysis is the only trigger gate; a
    // duplicate "last answer" event loses the race and lands here with false.
    if connection
        .begin_analysis(attempt_id, questions.len() as i64)
        .await?
    {
        spawn_analysis(
            connection,
            evaluator,
            Arc::new(BotNotifier::new(bot.clone())),
            AnalysisSettings::from(&*config),
            user_id,
            attempt_id,
        );
    } else {
        tracing::warn!(attempt_id, "analysis gate rejected a duplicate trigger");
    }
    Ok(())
}

pub async fn save_feedback<S: AttemptStore>(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    store: &S,
    attempt_id: i64,
    rating: i64,
) -> HandlerResult {
    store.save_feedback_rating(attempt_id, rating).await?;
    // Strip the buttons so the rating cannot be resubmitted from the UI.
    bot.edit_message_reply_markup(chat_id, message_id).await?;
    Ok(())
}

async fn offer_active_choice(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    active_title: &str,
    pending_block_id: i64,
) -> HandlerResult {
    bot.edit_message_text(
        chat_id,
        message_id,
        format!(
            "⏳ You already have a test in progress for <b>{}</b>.\nWhat would you like to do?",
            escape_html(active_title)
        ),
    )
    .parse_mode(ParseMode::Html)
    .reply_markup(keyboard::active_test_keyboard(pending_block_id))
    .await?;
    Ok(())
}

async fn begin_new_test<S>(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    dialogue: &UserDialogue,
    store: &S,
    user_id: i64,
    block_id: i64,
) -> HandlerResult
where
    S: ContentStore + AttemptStore,
{
    let questions = store.questions_for_block(block_id).await?;
    if questions.is_empty() {
        bot.edit_message_text(chat_id, message_id, "This block has no questions yet.")
            .reply_markup(keyboard::back_keyboard("menu_tests"))
            .await?;
        return Ok(());
    }

    let attempt_id = match store.create_attempt(user_id, block_id).await {
        Ok(id) => id,
        Err(StoreError::AttemptAlreadyActive) => {
            // Raced with another tap; fall back to the choice screen.
            if let Some(active) = store.active_attempt(user_id).await? {
                offer_active_choice(bot, chat_id, message_id, &active.block_title, block_id)
                    .await?;
            }
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let block_title = store
        .get_block(block_id)
        .await?
        .map(|b| b.title)
        .unwrap_or_default();
    bot.edit_message_text(
        chat_id,
        message_id,
        question_text(&block_title, 0, questions.len(), &questions[0]),
    )
    .parse_mode(ParseMode::Html)
    .reply_markup(keyboard::test_in_progress_keyboard())
    .await?;

    dialogue
        .update(BotState::TakingTest {
            attempt_id,
            block_id,
            questions,
            current_index: 0,
            test_message_id: message_id.0,
        })
        .await?;
    Ok(())
}

fn question_text(block_title: &str, index: usize, total: usize, question: &Question) -> String {
    format!(
        "📝 <b>{}</b>\nQuestion {}/{}:\n\n{}\n\n✍️ Send your answer as text or a voice message.",
        escape_html(block_title),
        index + 1,
        total,
        escape_html(&question.question_text)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_text_escapes_and_numbers_from_one() {
        let question = Question {
            id: 5,
            block_id: 1,
            question_text: "What does <double hull> mean?".into(),
        };
        let text = question_text("Block 3 - Tankers", 0, 3, &question);
        assert!(text.contains("Question 1/3"));
        assert!(text.contains("&lt;double hull&gt;"));
        assert!(text.contains("Block 3 - Tankers"));
    }
}
