use crate::error::ClientError;
use crate::types::*;
use async_trait::async_trait;
use harmonized_types::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, TransportError};
use reqwest::{Client, Method};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

pub struct ReqwestTransport {
    client: Client,
    config: ClientConfig,
}

impl ReqwestTransport {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn send_with_retry(&self, request: &HttpRequest) -> Result<HttpResponse, ClientError> {
        let mut attempts = 0;
        let mut delay = self.config.retry.base_delay_ms;

        loop {
            attempts += 1;
            match self.send_once(request).await {
                Ok(response) => return Ok(response),
                Err(ClientError::RateLimited { retry_after }) => {
                    if attempts > self.config.retry.max_retries {
                        return Err(ClientError::RateLimited { retry_after });
                    }
                    let wait = retry_after.map_or(delay, |secs| secs * 1000);
                    tracing::debug!("Rate limited, waiting {}ms (attempt {})", wait, attempts);
                    tokio::time::sleep(Duration::from_millis(wait)).await;
                    delay = (delay * 2).min(self.config.retry.max_delay_ms);
                },
                Err(ClientError::ServerError { status, message }) => {
                    if attempts > self.config.retry.max_retries {
                        return Err(ClientError::ServerError { status, message });
                    }
                    tracing::debug!("Server error {}, retrying (attempt {})", status, attempts);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    delay = (delay * 2).min(self.config.retry.max_delay_ms);
                },
                Err(ClientError::Request(e)) if e.is_timeout() => {
                    if attempts > self.config.retry.max_retries {
                        return Err(ClientError::Timeout(attempts));
                    }
                    tracing::debug!("Request timed out, retrying (attempt {})", attempts);
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, request: &HttpRequest) -> Result<HttpResponse, ClientError> {
        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Delete => Method::DELETE,
        };
        let mut builder = self.client.request(method, &request.url);
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(|e| {
            if e.is_connect() {
                ClientError::Connection(e.to_string())
            } else {
                ClientError::Request(e)
            }
        })?;
        let status = resp.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(ClientError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            let status = status.as_u16();
            return Err(if status >= 500 {
                ClientError::ServerError { status, message }
            } else {
                ClientError::Rejected { status, message }
            });
        }

        let headers: BTreeMap<String, String> = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let text = resp.text().await?;
        let data = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| ClientError::InvalidResponse(e.to_string()))?
        };

        Ok(HttpResponse { status: status.as_u16(), headers, data })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        tracing::debug!("{} {}", request.method, request.url);
        self.send_with_retry(&request).await.map_err(|e| {
            tracing::warn!("{} {} failed: {}", request.method, request.url, e);
            TransportError::from(e)
        })
    }
}
