use anyhow::{bail, Context};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Longest interval accepted for `SchedulingConfig::max_interval`, about 1000 years.
pub const MAX_INTERVAL_DAYS: i64 = 365_000;

/// Unit an interval of 1 stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Minutes,
    Hours,
    Days,
}

impl IntervalUnit {
    pub fn duration(&self, interval: u32) -> Duration {
        let n = interval as i64;
        match self {
            IntervalUnit::Minutes => Duration::minutes(n),
            IntervalUnit::Hours => Duration::hours(n),
            IntervalUnit::Days => Duration::days(n),
        }
    }
}

impl FromStr for IntervalUnit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minutes" | "minute" | "m" => Ok(IntervalUnit::Minutes),
            "hours" | "hour" | "h" => Ok(IntervalUnit::Hours),
            "days" | "day" | "d" => Ok(IntervalUnit::Days),
            other => bail!("unknown interval unit '{}'", other),
        }
    }
}

/// Pacing constants for the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Ease factor never drops below this.
    pub ease_floor: f64,
    pub initial_ease: f64,
    pub initial_interval: u32,
    pub again_ease_penalty: f64,
    pub hard_interval_multiplier: f64,
    pub hard_ease_penalty: f64,
    pub easy_interval_bonus: f64,
    pub easy_ease_bonus: f64,
    /// Good grades move a card to `review` once repetitions reach this.
    pub review_after_repetitions: u32,
    /// Upper bound for any scheduled interval.
    pub max_interval: u32,
    pub interval_unit: IntervalUnit,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            ease_floor: 1.3,
            initial_ease: 2.5,
            initial_interval: 1,
            again_ease_penalty: 0.2,
            hard_interval_multiplier: 1.2,
            hard_ease_penalty: 0.15,
            easy_interval_bonus: 1.3,
            easy_ease_bonus: 0.15,
            review_after_repetitions: 3,
            max_interval: 36_500,
            interval_unit: IntervalUnit::Days,
        }
    }
}

impl SchedulingConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.ease_floor > 0.0) {
            bail!("ease_floor must be positive, got {}", self.ease_floor);
        }
        if self.initial_ease < self.ease_floor {
            bail!(
                "initial_ease {} is below ease_floor {}",
                self.initial_ease,
                self.ease_floor
            );
        }
        if self.initial_interval == 0 {
            bail!("initial_interval must be at least 1");
        }
        if self.again_ease_penalty < 0.0
            || self.hard_ease_penalty < 0.0
            || self.easy_ease_bonus < 0.0
        {
            bail!("ease adjustments must not be negative");
        }
        if self.hard_interval_multiplier < 1.0 || self.easy_interval_bonus < 1.0 {
            bail!("interval multipliers must be at least 1.0");
        }
        if self.max_interval < self.initial_interval {
            bail!(
                "max_interval {} is below initial_interval {}",
                self.max_interval,
                self.initial_interval
            );
        }
        // Keep every schedule inside four digit years.
        if self.interval_unit.duration(self.max_interval) > Duration::days(MAX_INTERVAL_DAYS) {
            bail!(
                "max_interval {} {:?} exceeds {} days",
                self.max_interval,
                self.interval_unit,
                MAX_INTERVAL_DAYS
            );
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        override_from_env("SRS_EASE_FLOOR", &mut self.ease_floor)?;
        override_from_env("SRS_INITIAL_EASE", &mut self.initial_ease)?;
        override_from_env("SRS_INITIAL_INTERVAL", &mut self.initial_interval)?;
        override_from_env("SRS_AGAIN_EASE_PENALTY", &mut self.again_ease_penalty)?;
        override_from_env("SRS_HARD_INTERVAL_MULTIPLIER", &mut self.hard_interval_multiplier)?;
        override_from_env("SRS_HARD_EASE_PENALTY", &mut self.hard_ease_penalty)?;
        override_from_env("SRS_EASY_INTERVAL_BONUS", &mut self.easy_interval_bonus)?;
        override_from_env("SRS_EASY_EASE_BONUS", &mut self.easy_ease_bonus)?;
        override_from_env(
            "SRS_REVIEW_AFTER_REPETITIONS",
            &mut self.review_after_repetitions,
        )?;
        override_from_env("SRS_MAX_INTERVAL", &mut self.max_interval)?;
        override_from_env("SRS_INTERVAL_UNIT", &mut self.interval_unit)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub seed_demo_deck: bool,
    /// Sessions untouched for this long are dropped.
    pub session_idle_minutes: i64,
    /// Completed sessions are dropped sooner.
    pub completed_session_minutes: i64,
    pub scheduling: SchedulingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://prepcraft.db?mode=rwc".to_string(),
            bind_addr: "127.0.0.1:3000".to_string(),
            seed_demo_deck: true,
            session_idle_minutes: 120,
            completed_session_minutes: 10,
            scheduling: SchedulingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Reads `.env` (if present) and the process environment on top of the defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(e).context("failed to read .env");
            }
        }

        let mut config = AppConfig::default();
        override_from_env("DATABASE_URL", &mut config.database_url)?;
        override_from_env("BIND_ADDR", &mut config.bind_addr)?;
        override_from_env("SEED_DEMO_DECK", &mut config.seed_demo_deck)?;
        override_from_env("SESSION_IDLE_MINUTES", &mut config.session_idle_minutes)?;
        override_from_env(
            "COMPLETED_SESSION_MINUTES",
            &mut config.completed_session_minutes,
        )?;
        if config.session_idle_minutes <= 0 || config.completed_session_minutes <= 0 {
            bail!("session expiry times must be positive");
        }
        config.scheduling.apply_env_overrides()?;
        config.scheduling.validate()?;

        Ok(config)
    }
}

fn override_from_env<T>(key: &str, target: &mut T) -> anyhow::Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = std::env::var(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value for {}: '{}' ({})", key, raw, e))?;
    }
    Ok(())
}
