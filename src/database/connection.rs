use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

use super::store::StoreError;

const CREATE_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS content_blocks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL UNIQUE,
    theory_text TEXT,
    video_file_id TEXT NULL,
    pdf_file_id TEXT NULL,
    block_order INTEGER UNIQUE NOT NULL
);

CREATE TABLE IF NOT EXISTS questions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    block_id INTEGER NOT NULL,
    question_text TEXT NOT NULL,
    FOREIGN KEY (block_id) REFERENCES content_blocks (id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS users (
    user_id INTEGER PRIMARY KEY,
    username TEXT NULL,
    full_name TEXT NOT NULL,
    last_completed_block_order INTEGER NOT NULL DEFAULT 0,
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS test_attempts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    block_id INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'in_progress',
    attempt_timestamp DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    completed_timestamp DATETIME NULL,
    ai_feedback_rating INTEGER NULL,
    FOREIGN KEY (user_id) REFERENCES users (user_id) ON DELETE CASCADE,
    FOREIGN KEY (block_id) REFERENCES content_blocks (id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS user_answers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    attempt_id INTEGER NOT NULL,
    question_id INTEGER NOT NULL,
    user_answer_text TEXT NOT NULL,
    ai_verdict_is_sufficient BOOLEAN NULL,
    ai_verdict_recommendation TEXT NULL,
    answered_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (attempt_id) REFERENCES test_attempts (id) ON DELETE CASCADE,
    FOREIGN KEY (question_id) REFERENCES questions (id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS system_settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
);

INSERT OR IGNORE INTO system_settings (key, value) VALUES ('maintenance_mode', 'false');
"#;

const CREATE_INDEXES_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_test_attempts_user_status ON test_attempts(user_id, status);
CREATE INDEX IF NOT EXISTS idx_user_answers_attempt ON user_answers(attempt_id);
CREATE INDEX IF NOT EXISTS idx_questions_block ON questions(block_id);
CREATE INDEX IF NOT EXISTS idx_content_blocks_order ON content_blocks(block_order);

-- At most one in-progress attempt per user, enforced at the storage level.
CREATE UNIQUE INDEX IF NOT EXISTS idx_one_active_attempt
    ON test_attempts(user_id) WHERE status = 'in_progress';

-- Exactly one stored answer per question within an attempt.
CREATE UNIQUE INDEX IF NOT EXISTS idx_one_answer_per_question
    ON user_answers(attempt_id, question_id);
"#;

const SAMPLE_DATA_SQL: &str = r#"
INSERT OR IGNORE INTO content_blocks (id, title, theory_text, block_order) VALUES
(1, 'Block 1 - Dry cargo ships',
'A dry cargo ship (bulk carrier) is a vessel type built to carry unpackaged dry cargo such as coal, grain and ore. Its defining features are large cargo holds and deck cranes for self-loading and discharge. Bulk carriers are classed by size: Handysize (10,000-35,000 t), Handymax (35,000-60,000 t), Panamax (60,000-80,000 t) and Capesize (over 100,000 t).',
1),

(2, 'Block 2 - Reefer containers',
'A refrigerated container (reefer) is a specialised container with a cooling plant for perishable cargo. It carries a compressor unit, forced air circulation and automatic temperature control. The working range spans -30C to +30C. A reefer requires a 460V connection to the ship''s electrical grid.',
2),

(3, 'Block 3 - Tankers',
'A tanker is a ship for liquid cargo: crude oil, oil products, chemicals and liquefied gas. The main types are oil tankers, chemical carriers and gas carriers. Structural features include a double hull, an inert gas system and dedicated pumps and piping. Sizes range from small tankers (up to 25,000 t) to supertankers (over 320,000 t).',
3);

INSERT OR IGNORE INTO questions (block_id, question_text) VALUES
(1, 'What is a dry cargo ship and what is its primary purpose?'),
(1, 'List the main size classes of dry cargo ships'),
(1, 'Which structural features are characteristic of dry cargo ships?'),

(2, 'What is a reefer container and what is it used for?'),
(2, 'Which temperature range do reefer containers support?'),
(2, 'Which technical requirements apply to connecting reefer containers?'),

(3, 'Define a tanker and describe its purpose'),
(3, 'List the main tanker types'),
(3, 'Which structural features are characteristic of tankers?');
"#;

/// Owner of the SQLite pool; every storage trait in `store` is implemented on
/// this type.
pub struct Connection {
    pub(crate) pool: SqlitePool,
}

impl Connection {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Pool over a private in-memory database, for tests.
    pub async fn connect_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Create tables and indexes, then seed sample content into an empty
    /// database.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(CREATE_TABLES_SQL).execute(&self.pool).await?;
        sqlx::raw_sql(CREATE_INDEXES_SQL).execute(&self.pool).await?;

        let (block_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM content_blocks")
            .fetch_one(&self.pool)
            .await?;
        if block_count == 0 {
            sqlx::raw_sql(SAMPLE_DATA_SQL).execute(&self.pool).await?;
            tracing::info!("seeded sample content blocks");
        }

        Ok(())
    }
}
