use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} should be set")]
    MissingVar(&'static str),
    #[error("failed to parse {var}: {value}")]
    InvalidVar { var: &'static str, value: String },
}

/// Character-length boundaries for the local grading heuristic used when the
/// AI service is unreachable. Answers shorter than `short` or `brief` are
/// insufficient; everything else passes.
#[derive(Debug, Clone, Copy)]
pub struct FallbackBands {
    pub short: usize,
    pub brief: usize,
    pub adequate: usize,
}

impl Default for FallbackBands {
    fn default() -> Self {
        Self {
            short: 10,
            brief: 30,
            adequate: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub openai_api_key: String,
    pub database_url: String,
    pub super_admins: Vec<i64>,
    pub admins: Vec<i64>,
    pub openai_model: String,
    pub openai_temperature: f32,
    pub openai_max_tokens: u32,
    /// Success-rate cutoff gating progress advancement.
    pub success_threshold: f64,
    pub fallback_bands: FallbackBands,
    /// Pause between consecutive AI calls in the analysis pipeline.
    pub analysis_delay: Duration,
    pub users_per_page: i64,
    pub max_answer_length: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token =
            std::env::var("BOT_TOKEN").map_err(|_| ConfigError::MissingVar("BOT_TOKEN"))?;
        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY"))?;

        Ok(Self {
            bot_token,
            openai_api_key,
            database_url: std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:bot.db".into()),
            super_admins: parse_id_list("SUPER_ADMINS")?,
            admins: parse_id_list("ADMINS")?,
            openai_model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
            openai_temperature: 0.3,
            openai_max_tokens: 1000,
            success_threshold: parse_or_default("SUCCESS_THRESHOLD", 0.70)?,
            fallback_bands: FallbackBands::default(),
            analysis_delay: Duration::from_secs(1),
            users_per_page: 10,
            max_answer_length: 1000,
        })
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admins.contains(&user_id) || self.super_admins.contains(&user_id)
    }

    pub fn is_super_admin(&self, user_id: i64) -> bool {
        self.super_admins.contains(&user_id)
    }

    /// Everyone who should receive service notifications.
    pub fn all_admins(&self) -> Vec<i64> {
        let mut ids = self.super_admins.clone();
        for id in &self.admins {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        ids
    }
}

fn parse_id_list(var: &'static str) -> Result<Vec<i64>, ConfigError> {
    let raw = std::env::var(var).unwrap_or_default();
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>().map_err(|_| ConfigError::InvalidVar {
                var,
                value: part.to_string(),
            })
        })
        .collect()
}

fn parse_or_default<T: std::str::FromStr>(
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidVar {
            var,
            value: raw.clone(),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bands_match_heuristic_boundaries() {
        let bands = FallbackBands::default();
        assert_eq!(bands.short, 10);
        assert_eq!(bands.brief, 30);
        assert_eq!(bands.adequate, 100);
    }
}
