use std::sync::Arc;
use std::time::Duration;

use teloxide::payloads::{EditMessageTextSetters, SendMessageSetters};
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId, ParseMode};
use thiserror::Error;
use tracing::instrument;

use super::evaluator::{EvaluateAnswer, Verdict};
use super::report::{build_report, success_rate};
use crate::config::Config;
use crate::database::connection::Connection;
use crate::database::store::{AttemptStore, ContentStore, StoreError, UserStore};
use crate::keyboard;

const APOLOGY_TEXT: &str =
    "😔 Something went wrong while analyzing your answers. Please try the test again later.";

type NotifyError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("attempt {0} has no stored answers")]
    NoAnswers(i64),
    #[error("content block {0} no longer exists")]
    MissingBlock(i64),
}

/// Messaging seam of the pipeline. The production impl talks to Telegram;
/// tests record calls instead. Delivery is best effort end to end: the
/// pipeline logs failures and carries on, it never fails an attempt over an
/// unreachable user.
pub trait Notify {
    /// Posts the initial progress message, returning its id for later edits.
    async fn send_progress(&self, user_id: i64, text: &str) -> Result<i32, NotifyError>;

    async fn edit_progress(
        &self,
        user_id: i64,
        message_id: i32,
        text: &str,
    ) -> Result<(), NotifyError>;

    /// Delivers the final report with the feedback keyboard for `attempt_id`,
    /// replacing the progress message when one exists.
    async fn send_report(
        &self,
        user_id: i64,
        message_id: Option<i32>,
        report: &str,
        attempt_id: i64,
    ) -> Result<(), NotifyError>;

    async fn send_apology(&self, user_id: i64) -> Result<(), NotifyError>;
}

#[derive(Clone)]
pub struct BotNotifier {
    bot: Bot,
}

impl BotNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

impl Notify for BotNotifier {
    async fn send_progress(&self, user_id: i64, text: &str) -> Result<i32, NotifyError> {
        let message = self.bot.send_message(ChatId(user_id), text).await?;
        Ok(message.id.0)
    }

    async fn edit_progress(
        &self,
        user_id: i64,
        message_id: i32,
        text: &str,
    ) -> Result<(), NotifyError> {
        self.bot
            .edit_message_text(ChatId(user_id), MessageId(message_id), text)
            .await?;
        Ok(())
    }

    async fn send_report(
        &self,
        user_id: i64,
        message_id: Option<i32>,
        report: &str,
        attempt_id: i64,
    ) -> Result<(), NotifyError> {
        match message_id {
            Some(message_id) => {
                self.bot
                    .edit_message_text(ChatId(user_id), MessageId(message_id), report)
                    .parse_mode(ParseMode::Html)
                    .reply_markup(keyboard::feedback_keyboard(attempt_id))
                    .await?;
            }
            None => {
                self.bot
                    .send_message(ChatId(user_id), report)
                    .parse_mode(ParseMode::Html)
                    .reply_markup(keyboard::feedback_keyboard(attempt_id))
                    .await?;
            }
        }
        Ok(())
    }

    async fn send_apology(&self, user_id: i64) -> Result<(), NotifyError> {
        self.bot
            .send_message(ChatId(user_id), APOLOGY_TEXT)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }
}

/// The knobs the pipeline needs, detached from the full `Config`.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisSettings {
    pub success_threshold: f64,
    pub delay: Duration,
}

impl From<&Config> for AnalysisSettings {
    fn from(config: &Config) -> Self {
        Self {
            success_threshold: config.success_threshold,
            delay: config.analysis_delay,
        }
    }
}

/// Grades every stored answer of an `analyzing` attempt, saves the verdicts,
/// resolves the attempt to `completed` and advances the progress gate, then
/// delivers the report. Only errors that make the aggregate meaningless
/// (storage failures, a missing answer set) flip the attempt to `failed`.
#[instrument(skip(store, evaluator, notifier, settings))]
pub async fn run_analysis<S, E, N>(
    store: Arc<S>,
    evaluator: Arc<E>,
    notifier: Arc<N>,
    settings: AnalysisSettings,
    user_id: i64,
    attempt_id: i64,
) -> Result<(), PipelineError>
where
    S: AttemptStore + ContentStore + UserStore,
    E: EvaluateAnswer,
    N: Notify,
{
    match analyze(&*store, &*evaluator, &*notifier, settings, user_id, attempt_id).await {
        Ok(()) => Ok(()),
        Err(e) => {
            if let Err(store_err) = store.mark_failed(attempt_id).await {
                tracing::error!(error = %store_err, attempt_id, "failed to mark attempt failed");
            }
            if let Err(notify_err) = notifier.send_apology(user_id).await {
                tracing::warn!(error = %notify_err, user_id, "apology message not delivered");
            }
            Err(e)
        }
    }
}

async fn analyze<S, E, N>(
    store: &S,
    evaluator: &E,
    notifier: &N,
    settings: AnalysisSettings,
    user_id: i64,
    attempt_id: i64,
) -> Result<(), PipelineError>
where
    S: AttemptStore + ContentStore + UserStore,
    E: EvaluateAnswer,
    N: Notify,
{
    let answers = store.answers_for_analysis(attempt_id).await?;
    if answers.is_empty() {
        return Err(PipelineError::NoAnswers(attempt_id));
    }
    let total = answers.len();

    let block_id = answers[0].block_id;
    let block = store
        .get_block(block_id)
        .await?
        .ok_or(PipelineError::MissingBlock(block_id))?;
    let theory = block.theory_text.clone().unwrap_or_default();

    // A user who blocked the bot mid-test still gets their verdicts graded
    // and persisted; analysis proceeds without the progress message.
    let progress_id = match notifier
        .send_progress(user_id, &progress_text(0, total))
        .await
    {
        Ok(message_id) => Some(message_id),
        Err(e) => {
            tracing::warn!(error = %e, user_id, "progress message not delivered");
            None
        }
    };

    let mut verdicts: Vec<Verdict> = Vec::with_capacity(total);
    for (index, answer) in answers.iter().enumerate() {
        if let Some(message_id) = progress_id {
            if let Err(e) = notifier
                .edit_progress(user_id, message_id, &progress_text(index + 1, total))
                .await
            {
                tracing::warn!(error = %e, user_id, "progress edit not delivered");
            }
        }

        let verdict = evaluator
            .evaluate(&theory, &answer.question_text, &answer.user_answer_text)
            .await;
        store
            .save_verdict(answer.answer_id, verdict.is_sufficient, &verdict.recommendation)
            .await?;
        verdicts.push(verdict);

        tokio::time::sleep(settings.delay).await;
    }

    if !store.mark_completed(attempt_id).await? {
        tracing::warn!(attempt_id, "attempt left analyzing before completion");
    }

    let sufficient = verdicts.iter().filter(|v| v.is_sufficient).count();
    let rate = success_rate(sufficient, total);
    if rate >= settings.success_threshold {
        let advanced = store.advance_progress(user_id, block.block_order).await?;
        tracing::info!(user_id, attempt_id, rate, advanced, "test passed");
    } else {
        tracing::info!(user_id, attempt_id, rate, "test below the passing threshold");
    }

    let report = build_report(&verdicts);
    if let Err(e) = notifier
        .send_report(user_id, progress_id, &report, attempt_id)
        .await
    {
        tracing::warn!(error = %e, user_id, attempt_id, "report not delivered");
    }

    Ok(())
}

/// Detached analysis task with a monitor that logs the outcome. The attempt
/// state machine keeps a crash from stranding the attempt in a ghost state:
/// any error path resolves it to `failed`.
pub fn spawn_analysis(
    store: Arc<Connection>,
    evaluator: Arc<crate::ai::evaluator::OpenAiEvaluator>,
    notifier: Arc<BotNotifier>,
    settings: AnalysisSettings,
    user_id: i64,
    attempt_id: i64,
) {
    tokio::spawn(async move {
        match run_analysis(store, evaluator, notifier, settings, user_id, attempt_id).await {
            Ok(()) => tracing::debug!(user_id, attempt_id, "analysis finished"),
            Err(e) => tracing::error!(error = %e, user_id, attempt_id, "analysis failed"),
        }
    });
}

fn progress_text(done: usize, total: usize) -> String {
    format!("🔍 Analyzing your answers... [{done}/{total}]")
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::ai::client::OpenAiClient;
    use crate::ai::evaluator::OpenAiEvaluator;
    use crate::config::FallbackBands;
    use crate::database::models::TestStatus;

    struct MockEvaluator {
        verdicts: Mutex<VecDeque<Verdict>>,
    }

    impl MockEvaluator {
        fn scripted(verdicts: Vec<(bool, &str)>) -> Self {
            Self {
                verdicts: Mutex::new(
                    verdicts
                        .into_iter()
                        .map(|(is_sufficient, recommendation)| Verdict {
                            is_sufficient,
                            recommendation: recommendation.to_string(),
                        })
                        .collect(),
                ),
            }
        }
    }

    impl EvaluateAnswer for MockEvaluator {
        async fn evaluate(&self, _theory: &str, _question: &str, _answer: &str) -> Verdict {
            self.verdicts
                .lock()
                .unwrap()
                .pop_front()
                .expect("more answers than scripted verdicts")
        }
    }

    #[derive(Debug, PartialEq)]
    enum Event {
        Progress(String),
        Edit(String),
        Report { attempt_id: i64, report: String },
        Apology,
    }

    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<Event>>,
        fail_progress: bool,
        fail_report: bool,
    }

    impl Notify for RecordingNotifier {
        async fn send_progress(&self, _user_id: i64, text: &str) -> Result<i32, NotifyError> {
            if self.fail_progress {
                return Err("user blocked the bot".into());
            }
            self.events
                .lock()
                .unwrap()
                .push(Event::Progress(text.to_string()));
            Ok(1)
        }

        async fn edit_progress(
            &self,
            _user_id: i64,
            _message_id: i32,
            text: &str,
        ) -> Result<(), NotifyError> {
            self.events.lock().unwrap().push(Event::Edit(text.to_string()));
            Ok(())
        }

        async fn send_report(
            &self,
            _user_id: i64,
            _message_id: Option<i32>,
            report: &str,
            attempt_id: i64,
        ) -> Result<(), NotifyError> {
            if self.fail_report {
                return Err("user blocked the bot".into());
            }
            self.events.lock().unwrap().push(Event::Report {
                attempt_id,
                report: report.to_string(),
            });
            Ok(())
        }

        async fn send_apology(&self, _user_id: i64) -> Result<(), NotifyError> {
            self.events.lock().unwrap().push(Event::Apology);
            Ok(())
        }
    }

    fn settings() -> AnalysisSettings {
        AnalysisSettings {
            success_threshold: 0.70,
            delay: Duration::ZERO,
        }
    }

    /// Seeded block 1 has three questions; answers all of them and flips the
    /// attempt to `analyzing`, mirroring the handler's hand-off.
    async fn analyzing_attempt(store: &Connection, user_id: i64) -> i64 {
        store.get_or_create_user(user_id, None, "Tester").await.unwrap();
        let attempt = store.create_attempt(user_id, 1).await.unwrap();
        let questions = store.questions_for_block(1).await.unwrap();
        for question in &questions {
            store
                .save_answer(attempt, question.id, "an answer about dry cargo ships")
                .await
                .unwrap();
        }
        assert!(store.begin_analysis(attempt, questions.len() as i64).await.unwrap());
        attempt
    }

    #[tokio::test]
    async fn full_pass_completes_and_advances_progress() {
        let store = Arc::new(Connection::connect_in_memory().await.unwrap());
        store.init_schema().await.unwrap();
        let attempt = analyzing_attempt(&store, 10).await;

        let evaluator = Arc::new(MockEvaluator::scripted(vec![
            (true, "a"),
            (true, "b"),
            (true, "c"),
        ]));
        let notifier = Arc::new(RecordingNotifier::default());

        run_analysis(
            store.clone(),
            evaluator,
            notifier.clone(),
            settings(),
            10,
            attempt,
        )
        .await
        .unwrap();

        let row = store.get_attempt(attempt).await.unwrap().unwrap();
        assert_eq!(row.status, TestStatus::Completed);

        let user = store.get_or_create_user(10, None, "Tester").await.unwrap();
        assert_eq!(user.last_completed_block_order, 1);

        let events = notifier.events.lock().unwrap();
        assert_eq!(events[0], Event::Progress("🔍 Analyzing your answers... [0/3]".into()));
        let edits = events
            .iter()
            .filter(|e| matches!(e, Event::Edit(_)))
            .count();
        assert_eq!(edits, 3);
        assert!(matches!(
            events.last().unwrap(),
            Event::Report { attempt_id, .. } if *attempt_id == attempt
        ));
    }

    #[tokio::test]
    async fn partial_pass_completes_without_advancing() {
        let store = Arc::new(Connection::connect_in_memory().await.unwrap());
        store.init_schema().await.unwrap();
        let attempt = analyzing_attempt(&store, 11).await;

        // 2/3 is 66.7%, below the 0.70 cutoff.
        let evaluator = Arc::new(MockEvaluator::scripted(vec![
            (true, "a"),
            (false, "Reread the size classes."),
            (true, "c"),
        ]));
        let notifier = Arc::new(RecordingNotifier::default());

        run_analysis(
            store.clone(),
            evaluator,
            notifier.clone(),
            settings(),
            11,
            attempt,
        )
        .await
        .unwrap();

        let row = store.get_attempt(attempt).await.unwrap().unwrap();
        assert_eq!(row.status, TestStatus::Completed);

        let user = store.get_or_create_user(11, None, "Tester").await.unwrap();
        assert_eq!(user.last_completed_block_order, 0);

        let events = notifier.events.lock().unwrap();
        let report = events
            .iter()
            .find_map(|e| match e {
                Event::Report { report, .. } => Some(report.clone()),
                _ => None,
            })
            .unwrap();
        assert!(report.contains("2/3"));
        assert!(report.contains("Reread the size classes."));
    }

    #[tokio::test]
    async fn undeliverable_report_still_completes_and_advances() {
        let store = Arc::new(Connection::connect_in_memory().await.unwrap());
        store.init_schema().await.unwrap();
        let attempt = analyzing_attempt(&store, 15).await;

        let evaluator = Arc::new(MockEvaluator::scripted(vec![
            (true, "a"),
            (true, "b"),
            (true, "c"),
        ]));
        let notifier = Arc::new(RecordingNotifier {
            fail_report: true,
            ..RecordingNotifier::default()
        });

        run_analysis(
            store.clone(),
            evaluator,
            notifier.clone(),
            settings(),
            15,
            attempt,
        )
        .await
        .unwrap();

        // The verdicts are in and the gate opened; losing the report message
        // costs the user nothing but the message itself.
        let row = store.get_attempt(attempt).await.unwrap().unwrap();
        assert_eq!(row.status, TestStatus::Completed);

        let user = store.get_or_create_user(15, None, "Tester").await.unwrap();
        assert_eq!(user.last_completed_block_order, 1);

        let verdicts: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM user_answers
             WHERE attempt_id = ? AND ai_verdict_is_sufficient IS NOT NULL",
        )
        .bind(attempt)
        .fetch_one(&store.pool)
        .await
        .unwrap();
        assert_eq!(verdicts, 3);

        let events = notifier.events.lock().unwrap();
        assert!(!events.contains(&Event::Apology));
    }

    #[tokio::test]
    async fn unreachable_user_from_the_start_still_completes() {
        let store = Arc::new(Connection::connect_in_memory().await.unwrap());
        store.init_schema().await.unwrap();
        let attempt = analyzing_attempt(&store, 16).await;

        let evaluator = Arc::new(MockEvaluator::scripted(vec![
            (true, "a"),
            (true, "b"),
            (true, "c"),
        ]));
        let notifier = Arc::new(RecordingNotifier {
            fail_progress: true,
            fail_report: true,
            ..RecordingNotifier::default()
        });

        run_analysis(
            store.clone(),
            evaluator,
            notifier.clone(),
            settings(),
            16,
            attempt,
        )
        .await
        .unwrap();

        let row = store.get_attempt(attempt).await.unwrap().unwrap();
        assert_eq!(row.status, TestStatus::Completed);
        let user = store.get_or_create_user(16, None, "Tester").await.unwrap();
        assert_eq!(user.last_completed_block_order, 1);

        // No progress message means no edits either; nothing was delivered.
        assert!(notifier.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn verdicts_are_persisted_per_answer() {
        let store = Arc::new(Connection::connect_in_memory().await.unwrap());
        store.init_schema().await.unwrap();
        let attempt = analyzing_attempt(&store, 12).await;

        let evaluator = Arc::new(MockEvaluator::scripted(vec![
            (true, "good"),
            (false, "expand"),
            (true, "good"),
        ]));
        let notifier = Arc::new(RecordingNotifier::default());

        run_analysis(store.clone(), evaluator, notifier, settings(), 12, attempt)
            .await
            .unwrap();

        let saved: Vec<(Option<bool>, Option<String>)> = sqlx::query_as(
            "SELECT ai_verdict_is_sufficient, ai_verdict_recommendation
             FROM user_answers WHERE attempt_id = ? ORDER BY id",
        )
        .bind(attempt)
        .fetch_all(&store.pool)
        .await
        .unwrap();

        assert_eq!(saved.len(), 3);
        assert_eq!(saved[1].0, Some(false));
        assert_eq!(saved[1].1.as_deref(), Some("expand"));
    }

    fn test_config() -> Config {
        Config {
            bot_token: String::new(),
            openai_api_key: "test-key".into(),
            database_url: "sqlite::memory:".into(),
            super_admins: Vec::new(),
            admins: Vec::new(),
            openai_model: "gpt-4o-mini".into(),
            openai_temperature: 0.3,
            openai_max_tokens: 1000,
            success_threshold: 0.70,
            fallback_bands: FallbackBands::default(),
            analysis_delay: Duration::ZERO,
            users_per_page: 10,
            max_answer_length: 1000,
        }
    }

    #[tokio::test]
    async fn unreachable_ai_service_degrades_to_fallback_verdicts() {
        let store = Arc::new(Connection::connect_in_memory().await.unwrap());
        store.init_schema().await.unwrap();
        let attempt = analyzing_attempt(&store, 14).await;

        // Nothing listens on this port; every chat call fails with a
        // transport error and the length heuristic takes over.
        let client = OpenAiClient::new("test-key".into(), reqwest::Client::new())
            .with_base_url("http://127.0.0.1:9");
        let evaluator = Arc::new(OpenAiEvaluator::new(client, &test_config()));
        let notifier = Arc::new(RecordingNotifier::default());

        run_analysis(
            store.clone(),
            evaluator,
            notifier.clone(),
            settings(),
            14,
            attempt,
        )
        .await
        .unwrap();

        let row = store.get_attempt(attempt).await.unwrap().unwrap();
        assert_eq!(row.status, TestStatus::Completed);

        // The 31-character answers land in the "good answer" band, so the
        // run passes on fallback verdicts alone.
        let recommendations: Vec<Option<String>> = sqlx::query_scalar(
            "SELECT ai_verdict_recommendation FROM user_answers WHERE attempt_id = ? ORDER BY id",
        )
        .bind(attempt)
        .fetch_all(&store.pool)
        .await
        .unwrap();
        assert_eq!(recommendations.len(), 3);
        for recommendation in recommendations {
            assert!(recommendation.unwrap().contains("Good answer"));
        }

        let events = notifier.events.lock().unwrap();
        assert!(matches!(
            events.last().unwrap(),
            Event::Report { report, .. } if report.contains("3/3")
        ));
    }

    #[tokio::test]
    async fn attempt_without_answers_fails_with_an_apology() {
        let store = Arc::new(Connection::connect_in_memory().await.unwrap());
        store.init_schema().await.unwrap();
        store.get_or_create_user(13, None, "Tester").await.unwrap();
        let attempt = store.create_attempt(13, 1).await.unwrap();
        assert!(store.begin_analysis(attempt, 0).await.unwrap());

        let evaluator = Arc::new(MockEvaluator::scripted(vec![]));
        let notifier = Arc::new(RecordingNotifier::default());

        let result = run_analysis(
            store.clone(),
            evaluator,
            notifier.clone(),
            settings(),
            13,
            attempt,
        )
        .await;
        assert!(matches!(result, Err(PipelineError::NoAnswers(_))));

        let row = store.get_attempt(attempt).await.unwrap().unwrap();
        assert_eq!(row.status, TestStatus::Failed);
        assert!(notifier.events.lock().unwrap().contains(&Event::Apology));
    }
}
