use crate::app::ports::{HttpClientPort, HttpGetResult, RateLimiterPort};
use crate::error::Result;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub struct ReqwestHttp {
    client: reqwest::Client,
    limiter: Option<Arc<dyn RateLimiterPort>>,
}

impl ReqwestHttp {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("audience_pulse/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, limiter: None })
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiterPort>) -> Self {
        self.limiter = Some(limiter);
        self
    }
}

#[async_trait]
impl HttpClientPort for ReqwestHttp {
    async fn get(&self, url: &str, headers: &BTreeMap<String, String>) -> Result<HttpGetResult> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire(1).await;
        }
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let resp = request.send().await?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let bytes = resp.bytes().await?.to_vec();
        Ok(HttpGetResult { status, bytes, content_type })
    }
}
