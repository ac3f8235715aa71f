use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle of a single test attempt.
///
/// `InProgress -> Analyzing -> {Completed | Failed}`, with `Abandoned` as the
/// user-initiated side exit out of `InProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    InProgress,
    Analyzing,
    Completed,
    Failed,
    Abandoned,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::InProgress => "in_progress",
            TestStatus::Analyzing => "analyzing",
            TestStatus::Completed => "completed",
            TestStatus::Failed => "failed",
            TestStatus::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ContentBlock {
    pub id: i64,
    pub title: String,
    pub theory_text: Option<String>,
    pub video_file_id: Option<String>,
    pub pdf_file_id: Option<String>,
    /// Unique ordinal defining the prerequisite ordering of blocks.
    pub block_order: i64,
}

impl ContentBlock {
    /// A block at ordinal `k` is accessible iff `k <= last_completed + 1`.
    pub fn is_accessible(&self, last_completed_block_order: i64) -> bool {
        self.block_order <= last_completed_block_order + 1
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Question {
    pub id: i64,
    pub block_id: i64,
    pub question_text: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: i64,
    pub username: Option<String>,
    pub full_name: String,
    /// Monotonically non-decreasing; the progress-gate ratchet.
    pub last_completed_block_order: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct TestAttempt {
    pub id: i64,
    pub user_id: i64,
    pub block_id: i64,
    pub status: TestStatus,
    pub attempt_timestamp: NaiveDateTime,
    pub completed_timestamp: Option<NaiveDateTime>,
    pub ai_feedback_rating: Option<i64>,
}

/// An active attempt joined with its block title, for the continue/abandon
/// decision point.
#[derive(Debug, Clone, FromRow)]
pub struct ActiveAttempt {
    pub attempt_id: i64,
    pub block_id: i64,
    pub block_title: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct UserAnswer {
    pub id: i64,
    pub attempt_id: i64,
    pub question_id: i64,
    pub user_answer_text: String,
    pub ai_verdict_is_sufficient: Option<bool>,
    pub ai_verdict_recommendation: Option<String>,
    pub answered_at: NaiveDateTime,
}

/// Answer row as the analysis pipeline consumes it: answer text joined with
/// its question and the owning block, in submission order.
#[derive(Debug, Clone, FromRow)]
pub struct AnswerForAnalysis {
    pub answer_id: i64,
    pub question_id: i64,
    pub user_answer_text: String,
    pub question_text: String,
    pub block_id: i64,
}

/// One row of the paginated admin statistics view.
#[derive(Debug, Clone, FromRow)]
pub struct UserStatistics {
    pub user_id: i64,
    pub username: Option<String>,
    pub full_name: String,
    pub last_completed_block_order: i64,
    pub completed_tests: i64,
}

/// Aggregated AI analytics for the admin panel.
#[derive(Debug, Clone, Default)]
pub struct AiAnalytics {
    pub total_answers: i64,
    pub analyzed_answers: i64,
    pub pending_answers: i64,
    pub sufficient_answers: i64,
    pub insufficient_answers: i64,
    pub positive_ratings: i64,
    pub negative_ratings: i64,
    pub unrated_attempts: i64,
    pub blocks: Vec<BlockAnalytics>,
}

impl AiAnalytics {
    pub fn avg_success_rate(&self) -> f64 {
        if self.analyzed_answers == 0 {
            0.0
        } else {
            self.sufficient_answers as f64 / self.analyzed_answers as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct BlockAnalytics {
    pub block_id: i64,
    pub title: String,
    pub block_order: i64,
    pub total_answers: i64,
    pub sufficient_answers: i64,
    pub positive_feedback: i64,
    pub negative_feedback: i64,
}

impl BlockAnalytics {
    pub fn success_rate(&self) -> f64 {
        if self.total_answers == 0 {
            0.0
        } else {
            self.sufficient_answers as f64 / self.total_answers as f64 * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            TestStatus::InProgress,
            TestStatus::Analyzing,
            TestStatus::Completed,
            TestStatus::Failed,
            TestStatus::Abandoned,
        ] {
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::Value::String(status.as_str().to_string())
            );
        }
    }

    #[test]
    fn accessibility_follows_the_ratchet() {
        let block = ContentBlock {
            id: 3,
            title: "Tankers".into(),
            theory_text: None,
            video_file_id: None,
            pdf_file_id: None,
            block_order: 3,
        };
        assert!(!block.is_accessible(1));
        assert!(block.is_accessible(2));
        assert!(block.is_accessible(3));
        assert!(block.is_accessible(7));
    }
}
