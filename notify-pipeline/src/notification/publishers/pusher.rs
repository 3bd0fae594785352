//! Hosted pub/sub publisher speaking the Pusher Channels HTTP API.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use sha2::Sha256;
use tracing::{debug, warn};
use url::Url;

use super::Publisher;
use crate::notification::model::Notification;
use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Pusher application credentials and routing.
#[derive(Debug, Clone)]
pub struct PusherConfig {
    pub app_id: String,
    pub key: String,
    pub secret: String,
    pub cluster: String,
    /// Channel every notification is triggered on.
    pub channel: String,
    /// Event name clients bind to.
    pub event: String,
    /// Overrides `https://api-{cluster}.pusher.com`, e.g. for a self-hosted server.
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl PusherConfig {
    pub fn new(
        app_id: impl Into<String>,
        key: impl Into<String>,
        secret: impl Into<String>,
        cluster: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            key: key.into(),
            secret: secret.into(),
            cluster: cluster.into(),
            channel: "notifications".to_string(),
            event: "comment-added".to_string(),
            base_url: None,
            timeout_secs: 10,
        }
    }

    fn endpoint_base(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| format!("https://api-{}.pusher.com", self.cluster))
    }
}

#[derive(Debug, Serialize)]
struct TriggerBody<'a> {
    name: &'a str,
    channels: [&'a str; 1],
    /// The event payload, JSON-encoded into a string.
    data: String,
}

/// Publishes each notification as one event on a Pusher channel.
pub struct PusherPublisher {
    config: PusherConfig,
    client: Client,
}

impl PusherPublisher {
    pub fn new(config: PusherConfig) -> Result<Self> {
        if config.app_id.is_empty() || config.key.is_empty() || config.secret.is_empty() {
            return Err(Error::config("Pusher app id, key and secret are required"));
        }
        install_rustls_provider();
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    fn events_path(&self) -> String {
        format!("/apps/{}/events", self.config.app_id)
    }

    fn build_body(&self, notification: &Notification) -> Result<String> {
        let body = TriggerBody {
            name: &self.config.event,
            channels: [&self.config.channel],
            data: serde_json::to_string(notification)?,
        };
        Ok(serde_json::to_string(&body)?)
    }

    /// Signed request URL for `body` at unix time `timestamp`.
    fn signed_url(&self, body: &str, timestamp: i64) -> Result<Url> {
        let body_md5 = hex::encode(Md5::digest(body.as_bytes()));
        // Keys already in lexical order, as the signature requires.
        let query = format!(
            "auth_key={}&auth_timestamp={}&auth_version=1.0&body_md5={}",
            self.config.key, timestamp, body_md5
        );
        let path = self.events_path();
        let signature = sign(&self.config.secret, &format!("POST\n{path}\n{query}"))?;

        let raw = format!(
            "{}{path}?{query}&auth_signature={signature}",
            self.config.endpoint_base()
        );
        Url::parse(&raw).map_err(|e| Error::config(format!("Invalid Pusher URL {raw}: {e}")))
    }
}

/// The HTTP client is built without a bundled TLS provider; install ours once.
fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

fn sign(secret: &str, payload: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::config(format!("Invalid Pusher secret: {e}")))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl Publisher for PusherPublisher {
    fn name(&self) -> &'static str {
        "pusher"
    }

    async fn publish(&self, notification: &Notification) -> Result<()> {
        let body = self.build_body(notification)?;
        let url = self.signed_url(&body, Utc::now().timestamp())?;

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(%status, "Pusher trigger rejected: {}", text);
            return Err(Error::publish(
                self.name(),
                format!("trigger failed with {status}: {text}"),
            ));
        }

        debug!(id = %notification.id, channel = %self.config.channel, "Notification triggered on Pusher");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use uuid::Uuid;

    fn publisher() -> PusherPublisher {
        PusherPublisher::new(PusherConfig::new("3", "278d425bdf160c739803", "7ad3773142a6692b25b8", "eu"))
            .unwrap()
    }

    fn notification() -> Notification {
        let created_at = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        Notification {
            id: Uuid::nil(),
            user_id: "u1".to_string(),
            notification_type: "COMMENT_ADDED".to_string(),
            content: "User u1 commented on Post p1".to_string(),
            is_read: false,
            created_at,
            expires_at: created_at + ChronoDuration::days(7),
        }
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let err = PusherPublisher::new(PusherConfig::new("1", "", "secret", "eu")).err();
        assert!(matches!(err, Some(Error::Configuration(_))));
    }

    #[test]
    fn body_carries_event_channel_and_encoded_data() {
        let p = publisher();
        let n = notification();
        let body: serde_json::Value = serde_json::from_str(&p.build_body(&n).unwrap()).unwrap();

        assert_eq!(body["name"], "comment-added");
        assert_eq!(body["channels"], serde_json::json!(["notifications"]));
        let data: Notification = serde_json::from_str(body["data"].as_str().unwrap()).unwrap();
        assert_eq!(data, n);
    }

    #[test]
    fn signed_url_targets_cluster_and_signs_sorted_query() {
        let p = publisher();
        let body = r#"{"name":"foo","channels":["project-3"],"data":"{\"some\":\"data\"}"}"#;
        let url = p.signed_url(body, 1_353_088_179).unwrap();

        assert_eq!(url.host_str(), Some("api-eu.pusher.com"));
        assert_eq!(url.path(), "/apps/3/events");

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let keys: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            ["auth_key", "auth_timestamp", "auth_version", "body_md5", "auth_signature"]
        );
        let body_md5 = &pairs[3].1;
        assert_eq!(body_md5, &hex::encode(Md5::digest(body.as_bytes())));

        let expected = sign(
            "7ad3773142a6692b25b8",
            &format!(
                "POST\n/apps/3/events\nauth_key=278d425bdf160c739803&auth_timestamp=1353088179&auth_version=1.0&body_md5={body_md5}"
            ),
        )
        .unwrap();
        assert_eq!(pairs[4].1, expected);
        assert_eq!(expected.len(), 64);
    }

    #[test]
    fn base_url_override_is_used() {
        let mut config = PusherConfig::new("1", "key", "secret", "eu");
        config.base_url = Some("http://127.0.0.1:6001".to_string());
        let p = PusherPublisher::new(config).unwrap();

        let url = p.signed_url("{}", 0).unwrap();
        assert_eq!(url.as_str().split('?').next(), Some("http://127.0.0.1:6001/apps/1/events"));
    }
}
