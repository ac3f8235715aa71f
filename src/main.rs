use std::sync::Arc;

use dotenvy::dotenv;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::dptree;
use teloxide::prelude::*;
use tracing_subscriber::EnvFilter;

use mentorbot::ai::client::OpenAiClient;
use mentorbot::ai::evaluator::OpenAiEvaluator;
use mentorbot::config::Config;
use mentorbot::database::connection::Connection;
use mentorbot::schema::schema;
use mentorbot::state::BotState;

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Arc::new(Config::from_env().expect("configuration should be valid"));
    let connection = Arc::new(
        Connection::connect(&config.database_url)
            .await
            .expect("database should be reachable"),
    );
    connection
        .init_schema()
        .await
        .expect("schema initialization should succeed");

    let bot = Bot::new(config.bot_token.clone());
    let client = OpenAiClient::new(config.openai_api_key.clone(), reqwest::Client::new());
    let evaluator = Arc::new(OpenAiEvaluator::new(client, &config));

    for admin_id in config.all_admins() {
        if let Err(e) = bot
            .send_message(ChatId(admin_id), "🚀 The training bot is up and serving.")
            .await
        {
            tracing::warn!(error = %e, admin_id, "startup notification not delivered");
        }
    }

    tracing::info!("starting dispatcher");
    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![
            InMemStorage::<BotState>::new(),
            connection,
            config,
            evaluator
        ])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}
