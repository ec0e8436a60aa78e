// Relay pipeline: validate, fetch, classify, then rewrite or stream.

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::TryStreamExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{
    RelayConfig, FALLBACK_CONTENT_TYPE, HLS_CONTENT_TYPE, HLS_MIME_MARKER, HLS_PLAYLIST_EXTENSION,
};
use crate::error::RelayError;
use crate::manifest::ManifestRewriter;
use crate::source::upstream::UpstreamClient;

/// One validated relay invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRequest {
    pub target: Url,
    pub referer: Url,
}

/// Whether an upstream body is an HLS playlist, judged by its content type or
/// by the target path's extension.
pub fn is_manifest(content_type: Option<&str>, target: &Url) -> bool {
    let by_mime = content_type
        .map(|ct| ct.to_ascii_lowercase().contains(HLS_MIME_MARKER))
        .unwrap_or(false);
    by_mime
        || target
            .path()
            .to_ascii_lowercase()
            .ends_with(HLS_PLAYLIST_EXTENSION)
}

/// Stateless relay shared by every request handler.
pub struct Relay {
    config: RelayConfig,
    default_referer: Url,
    upstream: UpstreamClient,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Result<Self> {
        let upstream = UpstreamClient::from_config(&config)?;
        Self::with_upstream(config, upstream)
    }

    /// Build a relay around a caller-provided upstream client (custom policies).
    pub fn with_upstream(config: RelayConfig, upstream: UpstreamClient) -> Result<Self> {
        config.validate()?;
        let default_referer = config.default_referer_url()?;
        Ok(Self {
            config,
            default_referer,
            upstream,
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Validate raw `url` / `referer` query values. Empty values count as absent.
    pub fn request_from_query(
        &self,
        url: Option<&str>,
        referer: Option<&str>,
    ) -> Result<RelayRequest, RelayError> {
        let url = url
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or(RelayError::MissingParameter)?;
        let target = Url::parse(url).map_err(|_| RelayError::InvalidParameter("url"))?;
        if !matches!(target.scheme(), "http" | "https") {
            return Err(RelayError::InvalidParameter("url"));
        }

        let referer = match referer.map(str::trim).filter(|r| !r.is_empty()) {
            Some(r) => Url::parse(r).map_err(|_| RelayError::InvalidParameter("referer"))?,
            None => self.default_referer.clone(),
        };

        Ok(RelayRequest { target, referer })
    }

    /// Run one request through the pipeline.
    pub async fn relay(&self, request: &RelayRequest) -> Result<Response, RelayError> {
        let resp = self.upstream.fetch(&request.target, &request.referer).await?;

        let content_type = resp.headers().get(header::CONTENT_TYPE).cloned();
        let content_type_str = content_type.as_ref().and_then(|v| v.to_str().ok());

        if is_manifest(content_type_str, &request.target) {
            self.manifest_response(resp, request).await
        } else {
            Ok(passthrough_response(resp, content_type, &request.target))
        }
    }

    async fn manifest_response(
        &self,
        resp: reqwest::Response,
        request: &RelayRequest,
    ) -> Result<Response, RelayError> {
        let text = self.upstream.read_text(resp).await?;

        let rewriter = ManifestRewriter::new(
            &self.config.relay_path,
            request.target.as_str(),
            request.referer.as_str(),
        );
        let body = rewriter.rewrite(&text);
        info!(
            "manifest rewritten url={} in_bytes={} out_bytes={}",
            request.target,
            text.len(),
            body.len()
        );

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(HLS_CONTENT_TYPE),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        Ok((StatusCode::OK, headers, body).into_response())
    }
}

/// Pipe the upstream body to the client chunk by chunk. Nothing is buffered.
fn passthrough_response(
    resp: reqwest::Response,
    content_type: Option<HeaderValue>,
    target: &Url,
) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        content_type.unwrap_or_else(|| HeaderValue::from_static(FALLBACK_CONTENT_TYPE)),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    if let Some(len) = resp.headers().get(header::CONTENT_LENGTH) {
        headers.insert(header::CONTENT_LENGTH, len.clone());
    }
    debug!(
        "passthrough url={} content_length={:?}",
        target,
        headers.get(header::CONTENT_LENGTH)
    );

    let url = target.to_string();
    let stream = resp
        .bytes_stream()
        .inspect_err(move |e| warn!("upstream body stream failed url={}: {}", url, e));

    (StatusCode::OK, headers, Body::from_stream(stream)).into_response()
}
