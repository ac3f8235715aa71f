use std::sync::Arc;

use teloxide::{prelude::Requester, types::Message, utils::command::BotCommands, Bot};
use tracing::instrument;

use crate::{
    ai::evaluator::OpenAiEvaluator,
    config::Config,
    database::connection::Connection,
    database::store::{AttemptStore, SettingsStore, UserStore},
    menu, state::BotState, testing, HandlerResult, UserDialogue,
};

#[derive(Debug, Clone, BotCommands)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    #[command(description = "open the main menu.")]
    Start,
    #[command(description = "display help.")]
    Help,
    #[command(description = "cancel the active test.")]
    Cancel,
    #[command(description = "continue the active test.")]
    Continue,
}

pub(crate) async fn help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, Command::descriptions().to_string())
        .await?;
    Ok(())
}

#[instrument(skip(bot, dialogue, connection, config))]
pub(crate) async fn start(
    bot: Bot,
    msg: Message,
    dialogue: UserDialogue,
    connection: Arc<Connection>,
    config: Arc<Config>,
) -> HandlerResult {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let user_id = from.id.0 as i64;

    if connection.is_maintenance_mode().await? && !config.is_admin(user_id) {
        bot.send_message(msg.chat.id, menu::MAINTENANCE_TEXT).await?;
        return Ok(());
    }

    connection
        .get_or_create_user(user_id, from.username.as_deref(), &from.full_name())
        .await?;

    dialogue.update(BotState::Idle).await?;
    menu::send_main_menu(&bot, msg.chat.id, config.is_admin(user_id)).await
}

pub(crate) async fn cancel(
    bot: Bot,
    msg: Message,
    dialogue: UserDialogue,
    connection: Arc<Connection>,
) -> HandlerResult {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };

    let abandoned = connection.abandon_active(from.id.0 as i64).await?;
    let text = if abandoned {
        "❌ Test cancelled. You can restart it from the tests menu."
    } else {
        "You have no active test to cancel."
    };
    bot.send_message(msg.chat.id, text).await?;
    dialogue.update(BotState::Idle).await?;
    Ok(())
}

pub(crate) async fn resume(
    bot: Bot,
    msg: Message,
    dialogue: UserDialogue,
    connection: Arc<Connection>,
    evaluator: Arc<OpenAiEvaluator>,
    config: Arc<Config>,
) -> HandlerResult {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    testing::resume_test(
        &bot,
        msg.chat.id,
        &dialogue,
        connection,
        evaluator,
        config,
        from.id.0 as i64,
    )
    .await
}
