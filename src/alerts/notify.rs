use crate::error::SyncError;
use crate::media::ReleaseNotice;
use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use tracing::info;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Delivery seam for fired release triggers.
#[async_trait]
pub trait NotifySink: Send + Sync {
    async fn deliver(&self, notice: &ReleaseNotice) -> Result<(), SyncError>;
}

/// POSTs each notice as JSON to a configured endpoint, signed with
/// `x-marquee-signature: sha256=<hex HMAC>` so the receiver can check who
/// sent it.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    secret: String,
}

impl WebhookSink {
    pub fn new(url: String, secret: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("marquee/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building webhook client")?;
        Ok(Self {
            client,
            url,
            secret,
        })
    }

    fn sign(&self, body: &[u8]) -> Result<String, SyncError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.as_bytes())
            .map_err(|_| SyncError::remote("webhook secret rejected"))?;
        mac.update(body);
        let digest = mac.finalize().into_bytes();
        Ok(format!("sha256={}", hex::encode(digest)))
    }
}

#[async_trait]
impl NotifySink for WebhookSink {
    async fn deliver(&self, notice: &ReleaseNotice) -> Result<(), SyncError> {
        let body = serde_json::to_vec(notice)
            .map_err(|e| SyncError::remote(format!("notice serialization failed: {e}")))?;
        let signature = self.sign(&body)?;
        let res = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .header("x-marquee-signature", signature)
            .body(body)
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            return Err(SyncError::remote(format!(
                "notify endpoint answered {status}"
            )));
        }
        info!(
            "Delivered release notice for {} {}",
            notice.kind, notice.media_id
        );
        Ok(())
    }
}

/// Fallback sink when no webhook is configured; the notice lands in the log.
pub struct LogSink;

#[async_trait]
impl NotifySink for LogSink {
    async fn deliver(&self, notice: &ReleaseNotice) -> Result<(), SyncError> {
        info!(
            "Now in theatres: {} ({} {})",
            notice.title, notice.kind, notice.media_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(secret: &str) -> WebhookSink {
        WebhookSink::new("http://localhost/notify".to_string(), secret.to_string()).unwrap()
    }

    #[test]
    fn signature_is_prefixed_hex_of_the_digest() {
        let sig = sink("test-secret").sign(b"{\"media_id\":603}").unwrap();
        let hex_part = sig.strip_prefix("sha256=").expect("prefix present");
        assert_eq!(hex_part.len(), 64);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_depends_on_body_and_secret() {
        let body = b"{\"media_id\":603}";
        assert_eq!(
            sink("test-secret").sign(body).unwrap(),
            sink("test-secret").sign(body).unwrap()
        );
        assert_ne!(
            sink("test-secret").sign(body).unwrap(),
            sink("other-secret").sign(body).unwrap()
        );
        assert_ne!(
            sink("test-secret").sign(body).unwrap(),
            sink("test-secret").sign(b"{\"media_id\":604}").unwrap()
        );
    }
}
