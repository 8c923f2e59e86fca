//! Log sink that posts batches to the bridge server

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::StatusCode;

use gateway_protocol::{LogBatch, API_KEY_HEADER};
use gateway_utils::{GatewayError, LogSink, Result};

use crate::config::RelayConfig;

/// Ships relay log batches to `POST /api/bridge/logs`
pub struct HttpLogSink {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpLogSink {
    pub fn new(config: &RelayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| GatewayError::internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: config.http_url("/api/bridge/logs"),
            api_key: config.api_key.clone(),
        })
    }

    async fn post(&self, batch: &LogBatch) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(batch)
            .send()
            .await
            .map_err(|e| GatewayError::delivery(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(GatewayError::auth_rejected(
                format!("log delivery refused with HTTP {}", response.status()),
            )),
            status => Err(GatewayError::delivery(format!("HTTP {}", status))),
        }
    }
}

impl LogSink for HttpLogSink {
    fn deliver<'a>(&'a self, batch: &'a LogBatch) -> BoxFuture<'a, Result<()>> {
        self.post(batch).boxed()
    }
}

#[cfg(test)]
mod tests {
    use gateway_protocol::{LogLevel, LogRecord};

    use super::*;
    use crate::testing::{answering_script, fast_config, unused_addr, FakeBridge};

    fn batch() -> LogBatch {
        LogBatch::new(vec![
            LogRecord::new(LogLevel::Info, "Relay started", "relay-1"),
            LogRecord::new(LogLevel::Warning, "Bridge connection lost", "relay-1"),
        ])
    }

    #[tokio::test]
    async fn test_posts_batch_with_key() {
        let bridge = FakeBridge::start(answering_script()).await;
        let sink = HttpLogSink::new(&bridge.config("key")).unwrap();

        sink.deliver(&batch()).await.unwrap();

        let batches = bridge.log_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0]["logs"].as_array().unwrap().len(), 2);
        assert_eq!(batches[0]["logs"][1]["message"], "Bridge connection lost");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_delivery_error() {
        let sink = HttpLogSink::new(&fast_config(unused_addr().await, "key")).unwrap();
        let err = sink.deliver(&batch()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Delivery(_)));
    }
}
