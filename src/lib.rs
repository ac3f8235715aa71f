use state::BotState;
use teloxide::{dispatching::dialogue::InMemStorage, prelude::Dialogue};

pub mod admin;
pub mod ai;
pub mod commands;
pub mod config;
pub mod database;
pub mod helpers;
pub mod keyboard;
pub mod menu;
pub mod schema;
pub mod state;
pub mod testing;

pub type UserDialogue = Dialogue<BotState, InMemStorage<BotState>>;
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync + 'static>>;
