use std::env;

/// Safety thresholds and quotas. Built once at startup (or by hand in tests)
/// and passed by reference into the gate - never read from globals, so two
/// gates with different thresholds can coexist.
#[derive(Debug, Clone)]
pub struct SafetyConfig {
    pub min_fit_score: i64,
    pub min_confidence_score: i64,
    pub max_hourly_applications: i64,
    pub max_daily_applications: i64,
    /// Optional extra duplicate layer: also match closed applications whose
    /// application date falls within this many days. Off by default; the
    /// active-status duplicate check always runs.
    pub duplicate_cooldown_days: Option<i64>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        SafetyConfig {
            min_fit_score: 80,
            min_confidence_score: 85,
            max_hourly_applications: 3,
            max_daily_applications: 10,
            duplicate_cooldown_days: None,
        }
    }
}

impl SafetyConfig {
    pub fn from_env() -> Self {
        let defaults = SafetyConfig::default();
        SafetyConfig {
            min_fit_score: env_i64("MIN_FIT_SCORE_AUTO", defaults.min_fit_score),
            min_confidence_score: env_i64("MIN_CONFIDENCE_SCORE", defaults.min_confidence_score),
            max_hourly_applications: env_i64(
                "MAX_APPLICATIONS_PER_HOUR",
                defaults.max_hourly_applications,
            ),
            max_daily_applications: env_i64(
                "MAX_DAILY_APPLICATIONS",
                defaults.max_daily_applications,
            ),
            duplicate_cooldown_days: env::var("DUPLICATE_COOLDOWN_DAYS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|days| *days > 0),
        }
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}
