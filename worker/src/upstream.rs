use crate::config::UpstreamConfig;
use monitoring::{HandlerError, TraceData};
use reqwest::header::HeaderMap;
use std::time::Duration;
use url::Url;

/// Outbound call awaited by a handler before it responds.
///
/// The active trace tokens are attached so the upstream joins the same trace.
#[derive(Clone, Debug)]
pub struct Upstream {
    client: reqwest::Client,
    url: Url,
    timeout: Duration,
}

impl Upstream {
    pub fn new(config: &UpstreamConfig) -> Self {
        Upstream {
            client: reqwest::Client::new(),
            url: config.url.clone(),
            timeout: config.timeout(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn call(&self, trace: &TraceData) -> Result<(), HandlerError> {
        let host = self.url.host_str().unwrap_or_default().to_string();
        let mut headers = HeaderMap::new();
        trace.apply_to(&mut headers);

        let response = self
            .client
            .get(self.url.clone())
            .headers(headers)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| match e.is_timeout() {
                true => HandlerError::UpstreamTimeout(host.clone()),
                false => HandlerError::Upstream(host.clone(), e.to_string()),
            })?;

        let status = response.status();
        tracing::debug!(url = %self.url, %status, "Upstream call completed");
        if !status.is_success() {
            return Err(HandlerError::Upstream(host, format!("status {status}")));
        }
        Ok(())
    }
}
