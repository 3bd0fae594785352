//! Application configuration loaded from the environment.
//!
//! A `.env` file in the working directory is loaded first when present. Every
//! variable is optional; unset or blank values fall back to defaults, while
//! values that fail to parse are rejected.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::api::server::ApiServerConfig;
use crate::logging::LogConfig;
use crate::notification::{
    BatchConfig, DeliveryConfig, EmailConfig, PipelineConfig, PublisherKind, PushConfig,
    PusherConfig,
};
use crate::{Error, Result};

/// Default SQLite database location.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:notifications.db?mode=rwc";

/// Longest accepted notification TTL (100 years).
pub const MAX_TTL_SECS: i64 = 100 * 365 * 24 * 60 * 60;

/// Complete application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub api: ApiServerConfig,
    pub pipeline: PipelineConfig,
    pub delivery: DeliveryConfig,
    pub logging: LogConfig,
}

impl AppConfig {
    /// Load `.env` (if any) and read the process environment.
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv()
            && !e.not_found()
        {
            return Err(Error::config(format!("Failed to load .env: {e}")));
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let api_defaults = ApiServerConfig::default();
        let api = ApiServerConfig {
            bind_address: env.string("API_BIND_ADDRESS").unwrap_or(api_defaults.bind_address),
            port: env.parse("API_PORT")?.unwrap_or(api_defaults.port),
            cors_allowed_origins: env
                .string("CORS_ALLOWED_ORIGINS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
        };

        let batch_defaults = BatchConfig::default();
        let pipeline_defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            batch: BatchConfig {
                batch_size: env
                    .parse("NOTIFY_BATCH_SIZE")?
                    .unwrap_or(batch_defaults.batch_size),
                flush_interval: env
                    .millis("NOTIFY_BATCH_INTERVAL_MS")?
                    .unwrap_or(batch_defaults.flush_interval),
                flush_timeout: env
                    .millis("NOTIFY_FLUSH_TIMEOUT_MS")?
                    .unwrap_or(batch_defaults.flush_timeout),
                max_flush_attempts: env
                    .parse("NOTIFY_MAX_FLUSH_ATTEMPTS")?
                    .unwrap_or(batch_defaults.max_flush_attempts),
            },
            reaper_interval: env
                .millis("NOTIFY_REAPER_INTERVAL_MS")?
                .unwrap_or(pipeline_defaults.reaper_interval),
            ttl: env.seconds("NOTIFY_TTL_SECS")?.unwrap_or(pipeline_defaults.ttl),
        };

        let delivery_defaults = DeliveryConfig::default();
        let publishers = match env.string("NOTIFY_PUBLISHERS") {
            Some(list) => split_list(&list)
                .iter()
                .map(|s| s.parse::<PublisherKind>())
                .collect::<Result<Vec<_>>>()?,
            None => delivery_defaults.publishers,
        };
        let delivery = DeliveryConfig {
            pusher: pusher_config(&env, publishers.contains(&PublisherKind::Pusher))?,
            publishers,
            subscriber_buffer: env
                .parse("NOTIFY_SUBSCRIBER_BUFFER")?
                .unwrap_or(delivery_defaults.subscriber_buffer),
            email: EmailConfig {
                enabled: env
                    .flag("NOTIFY_EMAIL_ENABLED")?
                    .unwrap_or(delivery_defaults.email.enabled),
                ..delivery_defaults.email
            },
            push: PushConfig {
                enabled: env
                    .flag("NOTIFY_PUSH_ENABLED")?
                    .unwrap_or(delivery_defaults.push.enabled),
            },
        };

        let logging = LogConfig {
            dir: env.string("LOG_DIR").map(PathBuf::from),
            json: env.flag("LOG_JSON")?.unwrap_or(false),
        };

        let config = Self {
            database_url: env
                .string("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            api,
            pipeline,
            delivery,
            logging,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let batch = &self.pipeline.batch;
        if batch.batch_size == 0 {
            return Err(Error::config("NOTIFY_BATCH_SIZE must be at least 1"));
        }
        if batch.max_flush_attempts == 0 {
            return Err(Error::config("NOTIFY_MAX_FLUSH_ATTEMPTS must be at least 1"));
        }
        for (name, value) in [
            ("NOTIFY_BATCH_INTERVAL_MS", batch.flush_interval),
            ("NOTIFY_FLUSH_TIMEOUT_MS", batch.flush_timeout),
            ("NOTIFY_REAPER_INTERVAL_MS", self.pipeline.reaper_interval),
        ] {
            if value.is_zero() {
                return Err(Error::config(format!("{name} must be greater than 0")));
            }
        }
        if self.pipeline.ttl <= chrono::Duration::zero() {
            return Err(Error::config("NOTIFY_TTL_SECS must be greater than 0"));
        }
        if self.pipeline.ttl > chrono::Duration::seconds(MAX_TTL_SECS) {
            return Err(Error::config(format!(
                "NOTIFY_TTL_SECS must be at most {MAX_TTL_SECS}"
            )));
        }
        if self.delivery.subscriber_buffer == 0 {
            return Err(Error::config("NOTIFY_SUBSCRIBER_BUFFER must be at least 1"));
        }
        Ok(())
    }
}

fn pusher_config<F>(env: &Env<F>, required: bool) -> Result<Option<PusherConfig>>
where
    F: Fn(&str) -> Option<String>,
{
    let credentials = (
        env.string("PUSHER_APP_ID"),
        env.string("PUSHER_KEY"),
        env.string("PUSHER_SECRET"),
        env.string("PUSHER_CLUSTER"),
    );
    let (Some(app_id), Some(key), Some(secret), Some(cluster)) = credentials else {
        if required {
            return Err(Error::config(
                "PUSHER_APP_ID, PUSHER_KEY, PUSHER_SECRET and PUSHER_CLUSTER are required for the pusher publisher",
            ));
        }
        return Ok(None);
    };

    let mut config = PusherConfig::new(app_id, key, secret, cluster);
    if let Some(channel) = env.string("PUSHER_CHANNEL") {
        config.channel = channel;
    }
    if let Some(event) = env.string("PUSHER_EVENT") {
        config.event = event;
    }
    Ok(Some(config))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.string(key)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|e| Error::config(format!("Invalid {key}={raw}: {e}")))
            })
            .transpose()
    }

    fn millis(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_millis))
    }

    fn seconds(&self, key: &str) -> Result<Option<chrono::Duration>> {
        self.parse::<i64>(key)?
            .map(|secs| {
                chrono::Duration::try_seconds(secs)
                    .ok_or_else(|| Error::config(format!("Invalid {key}={secs}: out of range")))
            })
            .transpose()
    }

    fn flag(&self, key: &str) -> Result<Option<bool>> {
        self.string(key)
            .map(|raw| match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(Error::config(format!("Invalid {key}={raw}: expected a boolean"))),
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = load(&[]).unwrap();

        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.api.port, 4000);
        assert!(config.api.cors_allowed_origins.is_empty());
        assert_eq!(config.pipeline.batch.batch_size, 10);
        assert_eq!(config.pipeline.batch.flush_interval, Duration::from_millis(5000));
        assert_eq!(config.pipeline.batch.flush_timeout, Duration::from_millis(10_000));
        assert_eq!(config.pipeline.batch.max_flush_attempts, 3);
        assert_eq!(config.pipeline.reaper_interval, Duration::from_millis(3_600_000));
        assert_eq!(config.pipeline.ttl, chrono::Duration::days(7));
        assert_eq!(config.delivery.publishers, vec![PublisherKind::WebSocket]);
        assert!(config.delivery.pusher.is_none());
        assert!(config.delivery.email.enabled);
        assert!(config.delivery.push.enabled);
        assert!(config.logging.dir.is_none());
        assert!(!config.logging.json);
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("API_PORT", "8080"),
            ("CORS_ALLOWED_ORIGINS", "https://a.example, https://b.example,"),
            ("NOTIFY_BATCH_SIZE", "25"),
            ("NOTIFY_BATCH_INTERVAL_MS", "250"),
            ("NOTIFY_TTL_SECS", "60"),
            ("NOTIFY_EMAIL_ENABLED", "false"),
            ("LOG_DIR", "/var/log/notify"),
            ("LOG_JSON", "1"),
        ])
        .unwrap();

        assert_eq!(config.api.port, 8080);
        assert_eq!(
            config.api.cors_allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert_eq!(config.pipeline.batch.batch_size, 25);
        assert_eq!(config.pipeline.batch.flush_interval, Duration::from_millis(250));
        assert_eq!(config.pipeline.ttl, chrono::Duration::seconds(60));
        assert!(!config.delivery.email.enabled);
        assert_eq!(config.logging.dir, Some(PathBuf::from("/var/log/notify")));
        assert!(config.logging.json);
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = load(&[("NOTIFY_BATCH_SIZE", "  "), ("API_BIND_ADDRESS", "")]).unwrap();
        assert_eq!(config.pipeline.batch.batch_size, 10);
        assert_eq!(config.api.bind_address, "0.0.0.0");
    }

    #[test]
    fn invalid_values_are_rejected() {
        for vars in [
            [("NOTIFY_BATCH_SIZE", "0")],
            [("NOTIFY_BATCH_SIZE", "ten")],
            [("NOTIFY_BATCH_INTERVAL_MS", "0")],
            [("NOTIFY_TTL_SECS", "-5")],
            [("NOTIFY_MAX_FLUSH_ATTEMPTS", "0")],
            [("NOTIFY_PUBLISHERS", "smoke-signal")],
            [("LOG_JSON", "maybe")],
        ] {
            assert!(
                matches!(load(&vars), Err(Error::Configuration(_))),
                "{vars:?} should be rejected"
            );
        }
    }

    #[test]
    fn ttl_is_bounded() {
        let max = MAX_TTL_SECS.to_string();
        let config = load(&[("NOTIFY_TTL_SECS", max.as_str())]).unwrap();
        assert_eq!(config.pipeline.ttl, chrono::Duration::seconds(MAX_TTL_SECS));

        let over = (MAX_TTL_SECS + 1).to_string();
        let huge = i64::MAX.to_string();
        for value in [over.as_str(), huge.as_str()] {
            assert!(
                matches!(load(&[("NOTIFY_TTL_SECS", value)]), Err(Error::Configuration(_))),
                "{value} should be rejected"
            );
        }
    }

    #[test]
    fn pusher_requires_credentials_when_selected() {
        let err = load(&[("NOTIFY_PUBLISHERS", "websocket,pusher")]);
        assert!(matches!(err, Err(Error::Configuration(_))));

        let config = load(&[
            ("NOTIFY_PUBLISHERS", "websocket,pusher"),
            ("PUSHER_APP_ID", "1"),
            ("PUSHER_KEY", "key"),
            ("PUSHER_SECRET", "secret"),
            ("PUSHER_CLUSTER", "eu"),
            ("PUSHER_EVENT", "notification"),
        ])
        .unwrap();
        assert_eq!(
            config.delivery.publishers,
            vec![PublisherKind::WebSocket, PublisherKind::Pusher]
        );
        let pusher = config.delivery.pusher.unwrap();
        assert_eq!(pusher.cluster, "eu");
        assert_eq!(pusher.channel, "notifications");
        assert_eq!(pusher.event, "notification");
    }
}
