use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
    #[error("failed to read targets file {path}: {source}")]
    TargetsRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse targets file {path}: {source}")]
    TargetsParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Bounds that drive the pagination loop for a single target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeLimits {
    /// Stop once this many posts have been accepted.
    pub ceiling_records_per_target: usize,
    /// Hard ceiling on scroll cycles; guarantees every run terminates.
    pub max_scroll_attempts: u32,
    /// Consecutive stalled scans before a recovery action is attempted.
    pub recovery_threshold: u32,
    /// Consecutive stalled scans (with unchanged height) that end the run.
    pub exhaustion_threshold: u32,
    /// Pause after every scroll so lazy content can render.
    pub settle_interval: Duration,
    /// Upper bound of the random extra pause added to each settle.
    pub settle_jitter: Duration,
    /// How long to wait for the first post to appear after navigation.
    pub load_timeout: Duration,
}

impl Default for ScrapeLimits {
    fn default() -> Self {
        Self {
            ceiling_records_per_target: 100,
            max_scroll_attempts: 30,
            recovery_threshold: 3,
            exhaustion_threshold: 5,
            settle_interval: Duration::from_millis(3000),
            settle_jitter: Duration::from_millis(2500),
            load_timeout: Duration::from_secs(30),
        }
    }
}

/// Credentials for the optional login step.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Targets
    pub targets_file: Option<PathBuf>,
    pub timeline_base_url: String,

    // Pagination
    pub limits: ScrapeLimits,
    pub target_delay_min: Duration,
    pub target_delay_max: Duration,

    // Output
    pub output_dir: PathBuf,
    pub download_media: bool,
    pub media_timeout: Duration,

    // Browser
    pub chrome_path: Option<String>,
    pub browser_headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub credentials: Option<Credentials>,

    // Enrichment
    pub classifier_command: Option<String>,
    pub classifier_args: Vec<String>,
    pub classifier_timeout: Duration,
    pub enrich_temp_dir: PathBuf,
    pub no_image_sample: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = ScrapeLimits::default();

        let credentials = match (
            optional_env("TIMELINE_USERNAME"),
            optional_env("TIMELINE_PASSWORD"),
        ) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            _ => None,
        };

        Ok(Self {
            // Targets
            targets_file: optional_env("TARGETS_FILE").map(PathBuf::from),
            timeline_base_url: env_or_default("TIMELINE_BASE_URL", "https://x.com"),

            // Pagination
            limits: ScrapeLimits {
                ceiling_records_per_target: parse_env_usize(
                    "MAX_POSTS_PER_TARGET",
                    defaults.ceiling_records_per_target,
                )?,
                max_scroll_attempts: parse_env_u32(
                    "MAX_SCROLL_ATTEMPTS",
                    defaults.max_scroll_attempts,
                )?,
                recovery_threshold: parse_env_u32(
                    "RECOVERY_THRESHOLD",
                    defaults.recovery_threshold,
                )?,
                exhaustion_threshold: parse_env_u32(
                    "EXHAUSTION_THRESHOLD",
                    defaults.exhaustion_threshold,
                )?,
                settle_interval: Duration::from_millis(parse_env_u64("SETTLE_INTERVAL_MS", 3000)?),
                settle_jitter: Duration::from_millis(parse_env_u64("SETTLE_JITTER_MS", 2500)?),
                load_timeout: Duration::from_secs(parse_env_u64("LOAD_TIMEOUT_SECS", 30)?),
            },
            target_delay_min: Duration::from_secs(parse_env_u64("TARGET_DELAY_MIN_SECS", 5)?),
            target_delay_max: Duration::from_secs(parse_env_u64("TARGET_DELAY_MAX_SECS", 10)?),

            // Output
            output_dir: PathBuf::from(env_or_default("OUTPUT_DIR", "company_tweets")),
            download_media: parse_env_bool("DOWNLOAD_MEDIA", true)?,
            media_timeout: Duration::from_secs(parse_env_u64("MEDIA_TIMEOUT_SECS", 30)?),

            // Browser
            chrome_path: optional_env("CHROME_PATH"),
            browser_headless: parse_env_bool("BROWSER_HEADLESS", true)?,
            viewport_width: parse_env_u32("VIEWPORT_WIDTH", 1920)?,
            viewport_height: parse_env_u32("VIEWPORT_HEIGHT", 1080)?,
            credentials,

            // Enrichment
            classifier_command: optional_env("CLASSIFIER_COMMAND"),
            classifier_args: optional_env("CLASSIFIER_ARGS")
                .map(|s| s.split_whitespace().map(String::from).collect())
                .unwrap_or_default(),
            classifier_timeout: Duration::from_secs(parse_env_u64("CLASSIFIER_TIMEOUT_SECS", 120)?),
            enrich_temp_dir: PathBuf::from(env_or_default("ENRICH_TEMP_DIR", "temp_images")),
            no_image_sample: parse_env_usize("NO_IMAGE_SAMPLE", 100)?,
        })
    }

    /// Configuration with fast timings and no network side effects.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            targets_file: None,
            timeline_base_url: "https://x.com".to_string(),
            limits: ScrapeLimits {
                settle_interval: Duration::ZERO,
                settle_jitter: Duration::ZERO,
                load_timeout: Duration::from_millis(50),
                ..ScrapeLimits::default()
            },
            target_delay_min: Duration::ZERO,
            target_delay_max: Duration::ZERO,
            output_dir: PathBuf::from("company_tweets"),
            download_media: false,
            media_timeout: Duration::from_secs(5),
            chrome_path: None,
            browser_headless: true,
            viewport_width: 1920,
            viewport_height: 1080,
            credentials: None,
            classifier_command: None,
            classifier_args: Vec::new(),
            classifier_timeout: Duration::from_secs(5),
            enrich_temp_dir: PathBuf::from("temp_images"),
            no_image_sample: 100,
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_scroll_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_SCROLL_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.limits.ceiling_records_per_target == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_POSTS_PER_TARGET".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.limits.recovery_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                name: "RECOVERY_THRESHOLD".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.limits.exhaustion_threshold <= self.limits.recovery_threshold {
            return Err(ConfigError::InvalidValue {
                name: "EXHAUSTION_THRESHOLD".to_string(),
                message: format!(
                    "must be greater than RECOVERY_THRESHOLD ({})",
                    self.limits.recovery_threshold
                ),
            });
        }
        if self.target_delay_min > self.target_delay_max {
            return Err(ConfigError::InvalidValue {
                name: "TARGET_DELAY_MIN_SECS".to_string(),
                message: "cannot exceed TARGET_DELAY_MAX_SECS".to_string(),
            });
        }
        if url::Url::parse(&self.timeline_base_url).is_err() {
            return Err(ConfigError::InvalidValue {
                name: "TIMELINE_BASE_URL".to_string(),
                message: format!("not a valid URL: '{}'", self.timeline_base_url),
            });
        }
        Ok(())
    }

    /// Base URL with any trailing slash removed.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.timeline_base_url.trim_end_matches('/')
    }
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_bool() {
        assert!(parse_env_bool("NONEXISTENT_VAR", true).unwrap());
        assert!(!parse_env_bool("NONEXISTENT_VAR", false).unwrap());
    }

    #[test]
    fn test_default_limits() {
        let limits = ScrapeLimits::default();
        assert_eq!(limits.ceiling_records_per_target, 100);
        assert_eq!(limits.max_scroll_attempts, 30);
        assert!(limits.recovery_threshold < limits.exhaustion_threshold);
    }

    #[test]
    fn test_testing_config_is_valid() {
        assert!(Config::for_testing().validate().is_ok());
    }

    #[test]
    fn test_exhaustion_must_exceed_recovery() {
        let mut config = Config::for_testing();
        config.limits.recovery_threshold = 5;
        config.limits.exhaustion_threshold = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_scroll_attempts_rejected() {
        let mut config = Config::for_testing();
        config.limits.max_scroll_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_delay_rejected() {
        let mut config = Config::for_testing();
        config.target_delay_min = Duration::from_secs(10);
        config.target_delay_max = Duration::from_secs(5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_base_url_trims_slash() {
        let mut config = Config::for_testing();
        config.timeline_base_url = "https://x.com/".to_string();
        assert_eq!(config.base_url(), "https://x.com");
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials {
            username: "someone".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("someone"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    #[serial]
    fn test_from_env_reads_limits() {
        std::env::set_var("MAX_POSTS_PER_TARGET", "42");
        std::env::set_var("SETTLE_INTERVAL_MS", "10");
        std::env::set_var("TIMELINE_USERNAME", "user");
        std::env::remove_var("TIMELINE_PASSWORD");

        let config = Config::from_env().unwrap();
        assert_eq!(config.limits.ceiling_records_per_target, 42);
        assert_eq!(config.limits.settle_interval, Duration::from_millis(10));
        // A username alone is not enough to attempt a login.
        assert!(config.credentials.is_none());

        std::env::remove_var("MAX_POSTS_PER_TARGET");
        std::env::remove_var("SETTLE_INTERVAL_MS");
        std::env::remove_var("TIMELINE_USERNAME");
    }

    #[test]
    #[serial]
    fn test_from_env_without_variables_uses_defaults() {
        for name in ["TARGETS_FILE", "OUTPUT_DIR", "CLASSIFIER_COMMAND", "MAX_POSTS_PER_TARGET"] {
            std::env::remove_var(name);
        }
        let config = Config::from_env().unwrap();
        assert!(config.targets_file.is_none());
        assert!(config.classifier_command.is_none());
        assert_eq!(config.output_dir, PathBuf::from("company_tweets"));
        assert_eq!(config.limits.ceiling_records_per_target, 100);
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_integer() {
        std::env::set_var("MAX_SCROLL_ATTEMPTS", "lots");
        let result = Config::from_env();
        std::env::remove_var("MAX_SCROLL_ATTEMPTS");
        assert!(matches!(result, Err(ConfigError::ParseInt { .. })));
    }
}
