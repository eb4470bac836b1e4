use std::sync::Arc;

use async_trait::async_trait;
use common::config::AuditConfig;
use common::queue::{Message, Queue, QueueError};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;

use super::key::{KeyDecryptor, key_decryptor_from_config};
use super::snapshot::AuditSnapshot;

/// Queue message subtype of audit snapshots.
pub const AUDIT_SUBTYPE: &str = "document_collection";

/// Header carrying the decrypted application key (`AppKey`).
const APP_KEY_HEADER: HeaderName = HeaderName::from_static("appkey");

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Failed to publish audit snapshot: {0}")]
    Queue(#[from] QueueError),

    #[error("History service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("History service rejected snapshot with {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("HTTP audit channel requires reclaimer.audit.history_base_url")]
    MissingHistoryUrl,

    #[error("Encrypted application key requires reclaimer.audit.key_secret")]
    MissingKeySecret,

    #[error("Failed to decrypt application key: {0}")]
    KeyDecryption(String),
}

/// The single destination audit snapshots go to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditChannel {
    Queue,
    History,
}

impl AuditChannel {
    pub fn from_config(config: &AuditConfig) -> Self {
        if config.use_queue {
            AuditChannel::Queue
        } else {
            AuditChannel::History
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    fn channel(&self) -> AuditChannel;

    async fn forward(&self, snapshot: &AuditSnapshot) -> Result<(), AuditError>;
}

/// Publishes snapshots to the durable queue.
pub struct QueueAuditSink<Q: Queue> {
    queue: Arc<Q>,
}

impl<Q: Queue> QueueAuditSink<Q> {
    pub fn new(queue: Arc<Q>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl<Q: Queue> AuditSink for QueueAuditSink<Q> {
    fn channel(&self) -> AuditChannel {
        AuditChannel::Queue
    }

    async fn forward(&self, snapshot: &AuditSnapshot) -> Result<(), AuditError> {
        let message = Message::audit(AUDIT_SUBTYPE, snapshot.clone())
            .with_metadata("collection_id", snapshot.collection_id.to_string());
        self.queue.publish(message).await?;
        Ok(())
    }
}

/// POSTs snapshots to `{base}/documentcollections` on the history service.
pub struct HttpHistorySink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpHistorySink {
    pub fn new(
        base_url: &str,
        encrypted_key: &str,
        decryptor: &dyn KeyDecryptor,
    ) -> Result<Self, AuditError> {
        let app_key = decryptor.decrypt(encrypted_key)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            APP_KEY_HEADER,
            HeaderValue::from_str(&app_key)
                .map_err(|e| AuditError::KeyDecryption(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/documentcollections", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AuditSink for HttpHistorySink {
    fn channel(&self) -> AuditChannel {
        AuditChannel::History
    }

    async fn forward(&self, snapshot: &AuditSnapshot) -> Result<(), AuditError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(snapshot)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        tracing::warn!(
            collection_id = %snapshot.collection_id,
            status = status.as_u16(),
            body = %body,
            "History service rejected audit snapshot"
        );
        Err(AuditError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// Build the one sink the configuration selects.
///
/// The application key is only resolved for the HTTP channel.
pub fn audit_sink_from_config<Q: Queue>(
    config: &AuditConfig,
    queue: Arc<Q>,
) -> Result<Arc<dyn AuditSink>, AuditError> {
    match AuditChannel::from_config(config) {
        AuditChannel::Queue => Ok(Arc::new(QueueAuditSink::new(queue))),
        AuditChannel::History => {
            let base_url = config
                .history_base_url
                .as_deref()
                .ok_or(AuditError::MissingHistoryUrl)?;
            let decryptor = key_decryptor_from_config(config)?;
            Ok(Arc::new(HttpHistorySink::new(
                base_url,
                &config.app_key,
                decryptor.as_ref(),
            )?))
        }
    }
}
