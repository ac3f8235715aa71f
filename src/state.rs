use crate::database::models::Question;

/// Per-chat dialogue state. The store is the source of truth for attempts;
/// this state only caches the question list and cursor so each incoming
/// answer does not refetch the block.
#[derive(Debug, Clone, Default)]
pub enum BotState {
    #[default]
    Idle,
    TakingTest {
        attempt_id: i64,
        block_id: i64,
        questions: Vec<Question>,
        current_index: usize,
        /// The bot-side question message, edited in place as the test moves.
        test_message_id: i32,
    },
    EditingBlockText {
        block_id: i64,
    },
    AwaitingBlockVideo {
        block_id: i64,
    },
    AwaitingBlockPdf {
        block_id: i64,
    },
}
