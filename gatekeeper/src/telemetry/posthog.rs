use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::{Event, EventSink};

/// Posts batches to a PostHog compatible `/batch/` capture endpoint
#[derive(Clone, Debug)]
pub struct PostHogSink {
    api_key: String,
    url: String,
    client: Client,
}

#[derive(Serialize)]
struct BatchBody<'a> {
    api_key: &'a str,
    batch: &'a [Event],
}

impl PostHogSink {
    pub fn new(api_key: String, host: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            api_key,
            url: batch_url(&host),
            client,
        })
    }
}

fn batch_url(host: &str) -> String {
    format!("{}/batch/", host.trim_end_matches('/'))
}

#[async_trait]
impl EventSink for PostHogSink {
    async fn deliver(&self, batch: &[Event]) -> anyhow::Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&BatchBody {
                api_key: &self.api_key,
                batch,
            })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(url = self.url, events = batch.len(), "telemetry batch accepted");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(anyhow::anyhow!("telemetry sink answered {}: {}", status, body))
        }
    }
}
