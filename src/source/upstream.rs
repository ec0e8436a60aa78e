use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::header::HeaderMap;
use reqwest::{Client, Response};
use tracing::{debug, error};
use url::Url;

use super::headers::policies_from_config;
use super::traits::HeaderPolicy;
use crate::config::RelayConfig;
use crate::error::RelayError;

/// HTTP client for origin fetches, dressed by a chain of header policies.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
    policies: Vec<Arc<dyn HeaderPolicy>>,
    deadline: Option<Duration>,
}

impl UpstreamClient {
    /// Build a client and its header policies from `config`.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(connect) = config.connect_timeout() {
            builder = builder.connect_timeout(connect);
        }
        let client = builder.build().context("build upstream http client")?;
        Ok(Self::new(
            client,
            policies_from_config(config)?,
            config.upstream_timeout(),
        ))
    }

    pub fn new(
        client: Client,
        policies: Vec<Arc<dyn HeaderPolicy>>,
        deadline: Option<Duration>,
    ) -> Self {
        Self {
            client,
            policies,
            deadline,
        }
    }

    /// Names of the header policies, in application order.
    pub fn policy_names(&self) -> Vec<&'static str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    /// Headers an upstream request for a page at `referer` will carry.
    pub fn request_headers(&self, referer: &Url) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for policy in &self.policies {
            policy.apply(referer, &mut headers);
        }
        headers
    }

    /// GET `target` impersonating a browser on `referer`.
    ///
    /// Only the wait for response headers is bounded by the deadline; the body
    /// is left to the caller. A non-2xx status becomes [`RelayError::Upstream`].
    pub async fn fetch(&self, target: &Url, referer: &Url) -> Result<Response, RelayError> {
        let headers = self.request_headers(referer);
        debug!(
            "upstream fetch url={} referer={} policies={:?}",
            target,
            referer,
            self.policy_names()
        );

        let request = self.client.get(target.clone()).headers(headers).send();
        let resp = self
            .within_deadline(request)
            .await?
            .with_context(|| format!("upstream request to {target} failed"))?;

        let status = resp.status();
        if !status.is_success() {
            error!(
                "upstream error status={} reason={} url={}",
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
                target
            );
            return Err(RelayError::Upstream { status });
        }
        Ok(resp)
    }

    /// Buffer a full response body as text, bounded by the same deadline.
    pub async fn read_text(&self, resp: Response) -> Result<String, RelayError> {
        let text = self
            .within_deadline(resp.text())
            .await?
            .context("read upstream body")?;
        Ok(text)
    }

    async fn within_deadline<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, fut)
                .await
                .map_err(|_| anyhow!("upstream deadline of {:?} exceeded", deadline)),
            None => Ok(fut.await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::headers::{X_FORWARDED_FOR, X_REAL_IP};

    #[test]
    fn test_request_headers_run_all_policies() {
        let upstream = UpstreamClient::from_config(&RelayConfig::default()).unwrap();
        let referer = Url::parse("https://megacloud.tv/").unwrap();
        let headers = upstream.request_headers(&referer);

        assert_eq!(headers[reqwest::header::REFERER], "https://megacloud.tv/");
        assert!(headers.contains_key(X_FORWARDED_FOR));
        assert!(headers.contains_key(X_REAL_IP));
    }

    #[test]
    fn test_policy_names_follow_config() {
        let upstream = UpstreamClient::from_config(&RelayConfig::default()).unwrap();
        assert_eq!(
            upstream.policy_names(),
            vec!["browser_profile", "spoofed_client_ip"]
        );

        let config = RelayConfig {
            spoof_client_ip: false,
            ..RelayConfig::default()
        };
        let upstream = UpstreamClient::from_config(&config).unwrap();
        assert_eq!(upstream.policy_names(), vec!["browser_profile"]);
    }
}
