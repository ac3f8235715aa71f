use thiserror::Error;

use super::connection::Connection;
use super::models::{
    ActiveAttempt, AiAnalytics, AnswerForAnalysis, BlockAnalytics, ContentBlock, Question,
    TestAttempt, TestStatus, User, UserStatistics,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("user already has a test in progress")]
    AttemptAlreadyActive,
    #[error("question already answered in this attempt")]
    DuplicateAnswer,
}

pub type StoreResult<T> = Result<T, StoreError>;

pub trait UserStore {
    async fn get_or_create_user(
        &self,
        user_id: i64,
        username: Option<&str>,
        full_name: &str,
    ) -> StoreResult<User>;

    /// Monotonic ratchet: only advances when the new order is strictly
    /// greater than the stored one. Returns whether anything changed.
    async fn advance_progress(&self, user_id: i64, completed_block_order: i64)
        -> StoreResult<bool>;

    async fn user_statistics(
        &self,
        offset: i64,
        limit: i64,
    ) -> StoreResult<(Vec<UserStatistics>, i64)>;
}

pub trait ContentStore {
    async fn list_blocks(&self) -> StoreResult<Vec<ContentBlock>>;

    async fn get_block(&self, block_id: i64) -> StoreResult<Option<ContentBlock>>;

    async fn theory_for_block(&self, block_id: i64) -> StoreResult<Option<String>>;

    /// Questions in presentation order (ascending id).
    async fn questions_for_block(&self, block_id: i64) -> StoreResult<Vec<Question>>;

    async fn max_block_order(&self) -> StoreResult<i64>;

    async fn update_block_text(&self, block_id: i64, theory_text: &str) -> StoreResult<()>;

    async fn update_block_video(&self, block_id: i64, file_id: Option<&str>) -> StoreResult<()>;

    async fn update_block_pdf(&self, block_id: i64, file_id: Option<&str>) -> StoreResult<()>;

    async fn delete_block(&self, block_id: i64) -> StoreResult<()>;

    async fn ai_analytics(&self) -> StoreResult<AiAnalytics>;
}

pub trait AttemptStore {
    /// Creates an `in_progress` attempt. Fails with `AttemptAlreadyActive`
    /// when the user already has one (partial unique index).
    async fn create_attempt(&self, user_id: i64, block_id: i64) -> StoreResult<i64>;

    async fn get_attempt(&self, attempt_id: i64) -> StoreResult<Option<TestAttempt>>;

    async fn active_attempt(&self, user_id: i64) -> StoreResult<Option<ActiveAttempt>>;

    /// `in_progress -> abandoned` side exit; stamps the completion time.
    async fn abandon_active(&self, user_id: i64) -> StoreResult<bool>;

    /// Stores one answer per question; a second write for the same
    /// (attempt, question) pair fails with `DuplicateAnswer`.
    async fn save_answer(
        &self,
        attempt_id: i64,
        question_id: i64,
        answer_text: &str,
    ) -> StoreResult<i64>;

    async fn answered_count(&self, attempt_id: i64) -> StoreResult<i64>;

    async fn answers_for_analysis(&self, attempt_id: i64) -> StoreResult<Vec<AnswerForAnalysis>>;

    /// Atomic analyzing gate: flips `in_progress -> analyzing` only when the
    /// number of distinct answered questions equals `expected_answers`. The
    /// single UPDATE is both the guard and the transition, so two racing
    /// "last answer" events cannot double-trigger the pipeline.
    async fn begin_analysis(&self, attempt_id: i64, expected_answers: i64) -> StoreResult<bool>;

    /// `analyzing -> completed`, stamping the completion time.
    async fn mark_completed(&self, attempt_id: i64) -> StoreResult<bool>;

    /// `analyzing -> failed`.
    async fn mark_failed(&self, attempt_id: i64) -> StoreResult<bool>;

    /// Writes the verdict pair onto one answer row; idempotent if retried.
    async fn save_verdict(
        &self,
        answer_id: i64,
        is_sufficient: bool,
        recommendation: &str,
    ) -> StoreResult<()>;

    async fn save_feedback_rating(&self, attempt_id: i64, rating: i64) -> StoreResult<()>;
}

pub trait SettingsStore {
    async fn get_setting(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set_setting(&self, key: &str, value: &str) -> StoreResult<()>;

    async fn is_maintenance_mode(&self) -> StoreResult<bool>;

    async fn toggle_maintenance_mode(&self) -> StoreResult<bool>;
}

impl UserStore for Connection {
    async fn get_or_create_user(
        &self,
        user_id: i64,
        username: Option<&str>,
        full_name: &str,
    ) -> StoreResult<User> {
        // Single upsert so two concurrent first contacts cannot race into a
        // primary key violation; the progress counter is left untouched.
        Ok(sqlx::query_as::<_, User>(
            "INSERT INTO users (user_id, username, full_name) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE
                SET username = excluded.username, full_name = excluded.full_name
             RETURNING user_id, username, full_name, last_completed_block_order",
        )
        .bind(user_id)
        .bind(username)
        .bind(full_name)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn advance_progress(
        &self,
        user_id: i64,
        completed_block_order: i64,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE users SET last_completed_block_order = ?
             WHERE user_id = ? AND last_completed_block_order < ?",
        )
        .bind(completed_block_order)
        .bind(user_id)
        .bind(completed_block_order)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn user_statistics(
        &self,
        offset: i64,
        limit: i64,
    ) -> StoreResult<(Vec<UserStatistics>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;

        let users = sqlx::query_as::<_, UserStatistics>(
            "SELECT u.user_id, u.username, u.full_name, u.last_completed_block_order,
                    COUNT(DISTINCT ta.block_id) AS completed_tests
             FROM users u
             LEFT JOIN test_attempts ta
                    ON u.user_id = ta.user_id AND ta.status = 'completed'
             GROUP BY u.user_id
             ORDER BY u.last_completed_block_order DESC, completed_tests DESC
             LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((users, total))
    }
}

impl ContentStore for Connection {
    async fn list_blocks(&self) -> StoreResult<Vec<ContentBlock>> {
        Ok(sqlx::query_as::<_, ContentBlock>(
            "SELECT id, title, theory_text, video_file_id, pdf_file_id, block_order
             FROM content_blocks ORDER BY block_order",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn get_block(&self, block_id: i64) -> StoreResult<Option<ContentBlock>> {
        Ok(sqlx::query_as::<_, ContentBlock>(
            "SELECT id, title, theory_text, video_file_id, pdf_file_id, block_order
             FROM content_blocks WHERE id = ?",
        )
        .bind(block_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn theory_for_block(&self, block_id: i64) -> StoreResult<Option<String>> {
        let theory: Option<Option<String>> =
            sqlx::query_scalar("SELECT theory_text FROM content_blocks WHERE id = ?")
                .bind(block_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(theory.flatten())
    }

    async fn questions_for_block(&self, block_id: i64) -> StoreResult<Vec<Question>> {
        Ok(sqlx::query_as::<_, Question>(
            "SELECT id, block_id, question_text FROM questions WHERE block_id = ? ORDER BY id",
        )
        .bind(block_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn max_block_order(&self) -> StoreResult<i64> {
        let max: Option<i64> =
            sqlx::query_scalar("SELECT MAX(block_order) FROM content_blocks")
                .fetch_one(&self.pool)
                .await?;
        Ok(max.unwrap_or(0))
    }

    async fn update_block_text(&self, block_id: i64, theory_text: &str) -> StoreResult<()> {
        sqlx::query("UPDATE content_blocks SET theory_text = ? WHERE id = ?")
            .bind(theory_text)
            .bind(block_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_block_video(&self, block_id: i64, file_id: Option<&str>) -> StoreResult<()> {
        sqlx::query("UPDATE content_blocks SET video_file_id = ? WHERE id = ?")
            .bind(file_id)
            .bind(block_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_block_pdf(&self, block_id: i64, file_id: Option<&str>) -> StoreResult<()> {
        sqlx::query("UPDATE content_blocks SET pdf_file_id = ? WHERE id = ?")
            .bind(file_id)
            .bind(block_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_block(&self, block_id: i64) -> StoreResult<()> {
        sqlx::query("DELETE FROM content_blocks WHERE id = ?")
            .bind(block_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn ai_analytics(&self) -> StoreResult<AiAnalytics> {
        let (total_answers, analyzed_answers, pending_answers): (i64, i64, i64) =
            sqlx::query_as(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN ai_verdict_is_sufficient IS NOT NULL
                                          THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN ai_verdict_is_sufficient IS NULL
                                          THEN 1 ELSE 0 END), 0)
                 FROM user_answers",
            )
            .fetch_one(&self.pool)
            .await?;

        let (sufficient_answers, insufficient_answers): (i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(CASE WHEN ai_verdict_is_sufficient = 1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN ai_verdict_is_sufficient = 0 THEN 1 ELSE 0 END), 0)
             FROM user_answers WHERE ai_verdict_is_sufficient IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        let (positive_ratings, negative_ratings, unrated_attempts): (i64, i64, i64) =
            sqlx::query_as(
                "SELECT COALESCE(SUM(CASE WHEN ai_feedback_rating = 1 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN ai_feedback_rating = -1 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN ai_feedback_rating IS NULL THEN 1 ELSE 0 END), 0)
                 FROM test_attempts WHERE status = 'completed'",
            )
            .fetch_one(&self.pool)
            .await?;

        let blocks = sqlx::query_as::<_, BlockAnalytics>(
            "SELECT cb.id AS block_id, cb.title, cb.block_order,
                    COUNT(ua.id) AS total_answers,
                    COALESCE(SUM(CASE WHEN ua.ai_verdict_is_sufficient = 1 THEN 1 ELSE 0 END), 0)
                        AS sufficient_answers,
                    COALESCE(SUM(CASE WHEN ta.ai_feedback_rating = 1 THEN 1 ELSE 0 END), 0)
                        AS positive_feedback,
                    COALESCE(SUM(CASE WHEN ta.ai_feedback_rating = -1 THEN 1 ELSE 0 END), 0)
                        AS negative_feedback
             FROM content_blocks cb
             LEFT JOIN questions q ON cb.id = q.block_id
             LEFT JOIN user_answers ua
                    ON q.id = ua.question_id AND ua.ai_verdict_is_sufficient IS NOT NULL
             LEFT JOIN test_attempts ta
                    ON ua.attempt_id = ta.id AND ta.status = 'completed'
             GROUP BY cb.id, cb.title, cb.block_order
             ORDER BY cb.block_order",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(AiAnalytics {
            total_answers,
            analyzed_answers,
            pending_answers,
            sufficient_answers,
            insufficient_answers,
            positive_ratings,
            negative_ratings,
            unrated_attempts,
            blocks,
        })
    }
}

impl AttemptStore for Connection {
    async fn create_attempt(&self, user_id: i64, block_id: i64) -> StoreResult<i64> {
        let result = sqlx::query(
            "INSERT INTO test_attempts (user_id, block_id, status) VALUES (?, ?, 'in_progress')",
        )
        .bind(user_id)
        .bind(block_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::AttemptAlreadyActive)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_attempt(&self, attempt_id: i64) -> StoreResult<Option<TestAttempt>> {
        Ok(sqlx::query_as::<_, TestAttempt>(
            "SELECT id, user_id, block_id, status, attempt_timestamp,
                    completed_timestamp, ai_feedback_rating
             FROM test_attempts WHERE id = ?",
        )
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn active_attempt(&self, user_id: i64) -> StoreResult<Option<ActiveAttempt>> {
        Ok(sqlx::query_as::<_, ActiveAttempt>(
            "SELECT ta.id AS attempt_id, ta.block_id, cb.title AS block_title
             FROM test_attempts ta
             JOIN content_blocks cb ON ta.block_id = cb.id
             WHERE ta.user_id = ? AND ta.status = 'in_progress'",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn abandon_active(&self, user_id: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE test_attempts
             SET status = 'abandoned', completed_timestamp = CURRENT_TIMESTAMP
             WHERE user_id = ? AND status = 'in_progress'",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_answer(
        &self,
        attempt_id: i64,
        question_id: i64,
        answer_text: &str,
    ) -> StoreResult<i64> {
        let result = sqlx::query(
            "INSERT INTO user_answers (attempt_id, question_id, user_answer_text)
             VALUES (?, ?, ?)",
        )
        .bind(attempt_id)
        .bind(question_id)
        .bind(answer_text)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::DuplicateAnswer)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn answered_count(&self, attempt_id: i64) -> StoreResult<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM user_answers WHERE attempt_id = ?")
                .bind(attempt_id)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn answers_for_analysis(&self, attempt_id: i64) -> StoreResult<Vec<AnswerForAnalysis>> {
        Ok(sqlx::query_as::<_, AnswerForAnalysis>(
            "SELECT ua.id AS answer_id, ua.question_id, ua.user_answer_text,
                    q.question_text, ta.block_id
             FROM user_answers ua
             JOIN questions q ON ua.question_id = q.id
             JOIN test_attempts ta ON ua.attempt_id = ta.id
             WHERE ua.attempt_id = ?
             ORDER BY ua.id",
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn begin_analysis(&self, attempt_id: i64, expected_answers: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE test_attempts SET status = 'analyzing'
             WHERE id = ? AND status = 'in_progress'
               AND (SELECT COUNT(DISTINCT question_id)
                    FROM user_answers WHERE attempt_id = ?) = ?",
        )
        .bind(attempt_id)
        .bind(attempt_id)
        .bind(expected_answers)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_completed(&self, attempt_id: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE test_attempts
             SET status = 'completed', completed_timestamp = CURRENT_TIMESTAMP
             WHERE id = ? AND status = 'analyzing'",
        )
        .bind(attempt_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, attempt_id: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE test_attempts SET status = 'failed' WHERE id = ? AND status = 'analyzing'",
        )
        .bind(attempt_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_verdict(
        &self,
        answer_id: i64,
        is_sufficient: bool,
        recommendation: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE user_answers
             SET ai_verdict_is_sufficient = ?, ai_verdict_recommendation = ?
             WHERE id = ?",
        )
        .bind(is_sufficient)
        .bind(recommendation)
        .bind(answer_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_feedback_rating(&self, attempt_id: i64, rating: i64) -> StoreResult<()> {
        sqlx::query("UPDATE test_attempts SET ai_feedback_rating = ? WHERE id = ?")
            .bind(rating)
            .bind(attempt_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl SettingsStore for Connection {
    async fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(
            sqlx::query_scalar("SELECT value FROM system_settings WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO system_settings (key, value, updated_at)
             VALUES (?, ?, CURRENT_TIMESTAMP)",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_maintenance_mode(&self) -> StoreResult<bool> {
        Ok(self.get_setting("maintenance_mode").await?.as_deref() == Some("true"))
    }

    async fn toggle_maintenance_mode(&self) -> StoreResult<bool> {
        let enabled = self.is_maintenance_mode().await?;
        let new_value = if enabled { "false" } else { "true" };
        self.set_setting("maintenance_mode", new_value).await?;
        Ok(!enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::TestStatus;

    async fn test_store() -> Connection {
        let conn = Connection::connect_in_memory().await.unwrap();
        conn.init_schema().await.unwrap();
        conn
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent_and_refreshes_names() {
        let store = test_store().await;

        let created = store.get_or_create_user(7, Some("cap"), "Captain").await.unwrap();
        assert_eq!(created.last_completed_block_order, 0);

        let updated = store.get_or_create_user(7, None, "Captain N.").await.unwrap();
        assert_eq!(updated.user_id, 7);
        assert_eq!(updated.username, None);
        assert_eq!(updated.full_name, "Captain N.");

        let (stats, total) = store.user_statistics(0, 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(stats.len(), 1);
    }

    #[tokio::test]
    async fn reregistration_keeps_the_progress_counter() {
        let store = test_store().await;
        store.get_or_create_user(7, Some("cap"), "Captain").await.unwrap();
        assert!(store.advance_progress(7, 2).await.unwrap());

        let again = store.get_or_create_user(7, Some("cap2"), "Captain II").await.unwrap();
        assert_eq!(again.username.as_deref(), Some("cap2"));
        assert_eq!(again.last_completed_block_order, 2);
    }

    #[tokio::test]
    async fn progress_gate_is_monotonic() {
        let store = test_store().await;
        store.get_or_create_user(1, None, "A").await.unwrap();

        assert!(store.advance_progress(1, 2).await.unwrap());
        assert!(!store.advance_progress(1, 2).await.unwrap());
        assert!(!store.advance_progress(1, 1).await.unwrap());
        assert!(store.advance_progress(1, 3).await.unwrap());

        let user = store.get_or_create_user(1, None, "A").await.unwrap();
        assert_eq!(user.last_completed_block_order, 3);
    }

    #[tokio::test]
    async fn at_most_one_attempt_in_progress_per_user() {
        let store = test_store().await;
        store.get_or_create_user(1, None, "A").await.unwrap();

        let first = store.create_attempt(1, 1).await.unwrap();
        let second = store.create_attempt(1, 2).await;
        assert!(matches!(second, Err(StoreError::AttemptAlreadyActive)));

        // Resolving the active attempt unblocks a new one.
        assert!(store.abandon_active(1).await.unwrap());
        let third = store.create_attempt(1, 2).await.unwrap();
        assert_ne!(first, third);

        let abandoned = store.get_attempt(first).await.unwrap().unwrap();
        assert_eq!(abandoned.status, TestStatus::Abandoned);
        assert!(abandoned.completed_timestamp.is_some());
    }

    #[tokio::test]
    async fn analysis_gate_requires_the_full_answer_set() {
        let store = test_store().await;
        store.get_or_create_user(1, None, "A").await.unwrap();
        let attempt = store.create_attempt(1, 1).await.unwrap();
        let questions = store.questions_for_block(1).await.unwrap();
        assert_eq!(questions.len(), 3);

        store.save_answer(attempt, questions[0].id, "first").await.unwrap();
        store.save_answer(attempt, questions[1].id, "second").await.unwrap();
        assert!(!store.begin_analysis(attempt, 3).await.unwrap());

        store.save_answer(attempt, questions[2].id, "third").await.unwrap();
        assert!(store.begin_analysis(attempt, 3).await.unwrap());
        // Re-entry is rejected: the attempt has left in_progress.
        assert!(!store.begin_analysis(attempt, 3).await.unwrap());

        let attempt_row = store.get_attempt(attempt).await.unwrap().unwrap();
        assert_eq!(attempt_row.status, TestStatus::Analyzing);
    }

    #[tokio::test]
    async fn one_answer_per_question_per_attempt() {
        let store = test_store().await;
        store.get_or_create_user(1, None, "A").await.unwrap();
        let attempt = store.create_attempt(1, 1).await.unwrap();
        let questions = store.questions_for_block(1).await.unwrap();

        store.save_answer(attempt, questions[0].id, "first").await.unwrap();
        let dup = store.save_answer(attempt, questions[0].id, "first, again").await;
        assert!(matches!(dup, Err(StoreError::DuplicateAnswer)));

        // A repeated question cannot stand in for an unanswered one.
        store.save_answer(attempt, questions[1].id, "second").await.unwrap();
        assert!(!store.begin_analysis(attempt, 3).await.unwrap());

        store.save_answer(attempt, questions[2].id, "third").await.unwrap();
        assert!(store.begin_analysis(attempt, 3).await.unwrap());

        // A fresh attempt answers the same question without conflict.
        store.get_or_create_user(2, None, "B").await.unwrap();
        let other = store.create_attempt(2, 1).await.unwrap();
        store.save_answer(other, questions[0].id, "other user").await.unwrap();
    }

    #[tokio::test]
    async fn terminal_transitions_only_leave_analyzing() {
        let store = test_store().await;
        store.get_or_create_user(1, None, "A").await.unwrap();
        let attempt = store.create_attempt(1, 1).await.unwrap();

        // Not analyzing yet, so neither terminal write may land.
        assert!(!store.mark_completed(attempt).await.unwrap());
        assert!(!store.mark_failed(attempt).await.unwrap());

        let questions = store.questions_for_block(1).await.unwrap();
        for q in &questions {
            store.save_answer(attempt, q.id, "answer text").await.unwrap();
        }
        assert!(store.begin_analysis(attempt, 3).await.unwrap());
        assert!(store.mark_completed(attempt).await.unwrap());
        assert!(!store.mark_failed(attempt).await.unwrap());

        let row = store.get_attempt(attempt).await.unwrap().unwrap();
        assert_eq!(row.status, TestStatus::Completed);
        assert!(row.completed_timestamp.is_some());
    }

    #[tokio::test]
    async fn verdicts_round_trip_unchanged() {
        let store = test_store().await;
        store.get_or_create_user(1, None, "A").await.unwrap();
        let attempt = store.create_attempt(1, 1).await.unwrap();
        let questions = store.questions_for_block(1).await.unwrap();
        let answer_id = store
            .save_answer(attempt, questions[0].id, "a dry cargo ship carries bulk")
            .await
            .unwrap();

        store
            .save_verdict(answer_id, false, "Mention the size classes as well.")
            .await
            .unwrap();

        let rows = store.answers_for_analysis(attempt).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].answer_id, answer_id);
        assert_eq!(rows[0].block_id, 1);

        let stored: (Option<bool>, Option<String>) = sqlx::query_as(
            "SELECT ai_verdict_is_sufficient, ai_verdict_recommendation
             FROM user_answers WHERE id = ?",
        )
        .bind(answer_id)
        .fetch_one(&store.pool)
        .await
        .unwrap();
        assert_eq!(stored.0, Some(false));
        assert_eq!(stored.1.as_deref(), Some("Mention the size classes as well."));
    }

    #[tokio::test]
    async fn answers_come_back_in_submission_order() {
        let store = test_store().await;
        store.get_or_create_user(1, None, "A").await.unwrap();
        let attempt = store.create_attempt(1, 1).await.unwrap();
        let questions = store.questions_for_block(1).await.unwrap();

        // Submit out of question order on purpose.
        store.save_answer(attempt, questions[2].id, "third question first").await.unwrap();
        store.save_answer(attempt, questions[0].id, "first question second").await.unwrap();

        let rows = store.answers_for_analysis(attempt).await.unwrap();
        assert_eq!(rows[0].user_answer_text, "third question first");
        assert_eq!(rows[1].user_answer_text, "first question second");
    }

    #[tokio::test]
    async fn deleting_a_block_cascades_to_questions_and_answers() {
        let store = test_store().await;
        store.get_or_create_user(1, None, "A").await.unwrap();
        let attempt = store.create_attempt(1, 1).await.unwrap();
        let questions = store.questions_for_block(1).await.unwrap();
        store.save_answer(attempt, questions[0].id, "x").await.unwrap();

        store.delete_block(1).await.unwrap();

        assert!(store.questions_for_block(1).await.unwrap().is_empty());
        let answers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_answers")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(answers, 0);
    }

    #[tokio::test]
    async fn maintenance_mode_toggles_through_settings() {
        let store = test_store().await;
        assert!(!store.is_maintenance_mode().await.unwrap());
        assert!(store.toggle_maintenance_mode().await.unwrap());
        assert!(store.is_maintenance_mode().await.unwrap());
        assert!(!store.toggle_maintenance_mode().await.unwrap());
    }

    #[tokio::test]
    async fn feedback_rating_lands_on_the_attempt() {
        let store = test_store().await;
        store.get_or_create_user(1, None, "A").await.unwrap();
        let attempt = store.create_attempt(1, 1).await.unwrap();
        store.save_feedback_rating(attempt, -1).await.unwrap();

        let row = store.get_attempt(attempt).await.unwrap().unwrap();
        assert_eq!(row.ai_feedback_rating, Some(-1));
    }
}
