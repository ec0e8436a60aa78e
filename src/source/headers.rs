use std::net::Ipv4Addr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rand::Rng;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, ORIGIN, PRAGMA,
    REFERER, USER_AGENT,
};
use url::Url;

use super::traits::HeaderPolicy;
use crate::config::RelayConfig;

pub const SEC_FETCH_DEST: HeaderName = HeaderName::from_static("sec-fetch-dest");
pub const SEC_FETCH_MODE: HeaderName = HeaderName::from_static("sec-fetch-mode");
pub const SEC_FETCH_SITE: HeaderName = HeaderName::from_static("sec-fetch-site");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Makes the fetch look like a cross-site CORS request issued by a desktop
/// browser sitting on the referer page.
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    user_agent: HeaderValue,
    accept_language: HeaderValue,
}

impl BrowserProfile {
    pub fn new(user_agent: &str, accept_language: &str) -> Result<Self> {
        Ok(Self {
            user_agent: HeaderValue::from_str(user_agent)
                .with_context(|| format!("invalid user agent header: {user_agent}"))?,
            accept_language: HeaderValue::from_str(accept_language)
                .with_context(|| format!("invalid accept-language header: {accept_language}"))?,
        })
    }
}

impl HeaderPolicy for BrowserProfile {
    fn name(&self) -> &'static str {
        "browser_profile"
    }

    fn apply(&self, referer: &Url, headers: &mut HeaderMap) {
        // Url serialisations are ASCII, so these conversions only fail on
        // control characters that parsing already rejected.
        if let Ok(v) = HeaderValue::from_str(referer.as_str()) {
            headers.insert(REFERER, v);
        }
        if let Ok(v) = HeaderValue::from_str(&referer.origin().ascii_serialization()) {
            headers.insert(ORIGIN, v);
        }
        headers.insert(USER_AGENT, self.user_agent.clone());
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(ACCEPT_LANGUAGE, self.accept_language.clone());
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(SEC_FETCH_DEST, HeaderValue::from_static("empty"));
        headers.insert(SEC_FETCH_MODE, HeaderValue::from_static("cors"));
        headers.insert(SEC_FETCH_SITE, HeaderValue::from_static("cross-site"));
    }
}

/// Presents a fresh random client address on every request via
/// `X-Forwarded-For` and `X-Real-IP`. Best effort against naive per-IP
/// throttling; nothing relies on it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpoofedClientIp;

impl SpoofedClientIp {
    /// Four independent octets, each in `[0, 255)`.
    pub fn random_ip() -> Ipv4Addr {
        let mut rng = rand::thread_rng();
        Ipv4Addr::new(
            rng.gen_range(0..255),
            rng.gen_range(0..255),
            rng.gen_range(0..255),
            rng.gen_range(0..255),
        )
    }
}

impl HeaderPolicy for SpoofedClientIp {
    fn name(&self) -> &'static str {
        "spoofed_client_ip"
    }

    fn apply(&self, _referer: &Url, headers: &mut HeaderMap) {
        let ip = Self::random_ip().to_string();
        if let Ok(v) = HeaderValue::from_str(&ip) {
            headers.insert(X_FORWARDED_FOR, v.clone());
            headers.insert(X_REAL_IP, v);
        }
    }
}

/// Header policies enabled by `config`, in application order.
pub fn policies_from_config(config: &RelayConfig) -> Result<Vec<Arc<dyn HeaderPolicy>>> {
    let mut policies: Vec<Arc<dyn HeaderPolicy>> = vec![Arc::new(BrowserProfile::new(
        &config.user_agent,
        &config.accept_language,
    )?)];
    if config.spoof_client_ip {
        policies.push(Arc::new(SpoofedClientIp));
    }
    Ok(policies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_ACCEPT_LANGUAGE, DEFAULT_USER_AGENT};

    fn applied(policy: &dyn HeaderPolicy, referer: &str) -> HeaderMap {
        let referer = Url::parse(referer).unwrap();
        let mut headers = HeaderMap::new();
        policy.apply(&referer, &mut headers);
        headers
    }

    #[test]
    fn test_browser_profile_headers() {
        let profile = BrowserProfile::new(DEFAULT_USER_AGENT, DEFAULT_ACCEPT_LANGUAGE).unwrap();
        let headers = applied(&profile, "https://megacloud.tv/embed-2/e-1/abc?k=1");

        assert_eq!(headers[REFERER], "https://megacloud.tv/embed-2/e-1/abc?k=1");
        assert_eq!(headers[ORIGIN], "https://megacloud.tv");
        assert_eq!(headers[USER_AGENT], DEFAULT_USER_AGENT);
        assert_eq!(headers[ACCEPT], "*/*");
        assert_eq!(headers[ACCEPT_LANGUAGE], DEFAULT_ACCEPT_LANGUAGE);
        assert_eq!(headers[CACHE_CONTROL], "no-cache");
        assert_eq!(headers[PRAGMA], "no-cache");
        assert_eq!(headers[SEC_FETCH_DEST], "empty");
        assert_eq!(headers[SEC_FETCH_MODE], "cors");
        assert_eq!(headers[SEC_FETCH_SITE], "cross-site");
    }

    #[test]
    fn test_origin_keeps_explicit_port() {
        let profile = BrowserProfile::new("UA", "en").unwrap();
        let headers = applied(&profile, "http://127.0.0.1:8080/player");
        assert_eq!(headers[ORIGIN], "http://127.0.0.1:8080");
    }

    #[test]
    fn test_browser_profile_rejects_bad_user_agent() {
        assert!(BrowserProfile::new("bad\nagent", "en").is_err());
    }

    #[test]
    fn test_spoofed_ip_pair_matches() {
        let headers = applied(&SpoofedClientIp, "https://megacloud.tv/");
        let forwarded = headers[X_FORWARDED_FOR].to_str().unwrap();
        assert_eq!(forwarded, headers[X_REAL_IP].to_str().unwrap());

        let ip: Ipv4Addr = forwarded.parse().unwrap();
        assert!(ip.octets().iter().all(|o| *o < 255));
    }

    #[test]
    fn test_policies_follow_config() {
        let mut config = RelayConfig::default();
        let names: Vec<_> = policies_from_config(&config)
            .unwrap()
            .iter()
            .map(|p| p.name())
            .collect();
        assert_eq!(names, vec!["browser_profile", "spoofed_client_ip"]);

        config.spoof_client_ip = false;
        let names: Vec<_> = policies_from_config(&config)
            .unwrap()
            .iter()
            .map(|p| p.name())
            .collect();
        assert_eq!(names, vec!["browser_profile"]);
    }
}
