//! Outbound federation HTTP
//!
//! Every GET and POST to a remote instance goes through [`FederationClient`],
//! which applies the per-call timeout, refuses private destinations and turns
//! non-success responses into [`AppError::RemoteStatus`].

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::FederationConfig;
use crate::error::AppError;
use crate::metrics::{REMOTE_FETCH_DURATION_SECONDS, REMOTE_FETCHES};

pub const ACTIVITY_JSON: &str = "application/activity+json";
pub const JRD_JSON: &str = "application/jrd+json";

/// Remote bodies are truncated to this many bytes inside error values.
const ERROR_BODY_LIMIT: usize = 512;

/// Largest remote document read, the same cap as inbound request bodies
pub const MAX_DOCUMENT_BYTES: usize = 1024 * 1024;

fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
                || v6.is_unspecified()
        }
    }
}

fn is_disallowed_host(host: &str) -> bool {
    let normalized = host
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase();
    if normalized == "localhost" || normalized.ends_with(".localhost") {
        return true;
    }

    normalized
        .parse::<IpAddr>()
        .map(is_disallowed_ip)
        .unwrap_or(false)
}

/// Parse a remote URL and check its scheme and host.
pub fn parse_remote_url(raw: &str) -> Result<url::Url, AppError> {
    let parsed =
        url::Url::parse(raw).map_err(|e| AppError::Validation(format!("Invalid URL {raw}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::Validation(format!(
                "Unsupported URL scheme: {scheme}"
            )));
        }
    }

    if parsed.host_str().is_none() {
        return Err(AppError::Validation(format!("Missing host in URL: {raw}")));
    }

    Ok(parsed)
}

/// `host[:port]` of a URL, the form used as an actor's domain
pub fn authority_of(url: &url::Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    })
}

/// HTTP client for talking to other instances
#[derive(Clone)]
pub struct FederationClient {
    http: Arc<reqwest::Client>,
    timeout: Duration,
    allow_private_hosts: bool,
}

impl FederationClient {
    pub fn new(http: Arc<reqwest::Client>, config: &FederationConfig) -> Self {
        Self {
            http,
            timeout: config.fetch_timeout(),
            allow_private_hosts: config.insecure_transport,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn ensure_public_destination(&self, url: &url::Url) -> Result<(), AppError> {
        if self.allow_private_hosts {
            return Ok(());
        }

        let host = url
            .host_str()
            .ok_or_else(|| AppError::Validation("Missing host in URL".to_string()))?;
        if is_disallowed_host(host) {
            return Err(AppError::Validation(format!(
                "Refusing to contact private host {host}"
            )));
        }

        let port = url
            .port_or_known_default()
            .ok_or_else(|| AppError::Validation("Missing port in URL".to_string()))?;
        let lookup = tokio::net::lookup_host((host.trim_end_matches('.'), port))
            .await
            .map_err(|e| AppError::Federation(format!("Failed to resolve {host}: {e}")))?;

        let mut resolved_any = false;
        for addr in lookup {
            resolved_any = true;
            if is_disallowed_ip(addr.ip()) {
                return Err(AppError::Validation(format!(
                    "Refusing to contact {host}: resolves to a private address"
                )));
            }
        }

        if !resolved_any {
            return Err(AppError::Federation(format!("No DNS records for {host}")));
        }

        Ok(())
    }

    /// GET a JSON document
    ///
    /// `kind` labels the request in metrics (e.g. "actor", "outbox").
    pub async fn get_json(
        &self,
        url: &str,
        accept: &str,
        kind: &'static str,
    ) -> Result<serde_json::Value, AppError> {
        let parsed = parse_remote_url(url)?;
        self.ensure_public_destination(&parsed).await?;

        let _timer = REMOTE_FETCH_DURATION_SECONDS
            .with_label_values(&[kind])
            .start_timer();

        tracing::debug!(url = %parsed, kind, "Fetching remote document");

        let result = self.send_get(parsed, accept).await;
        let status = match &result {
            Ok(_) => "success",
            Err(AppError::RemoteStatus { .. }) => "bad_status",
            Err(_) => "error",
        };
        REMOTE_FETCHES.with_label_values(&[kind, status]).inc();

        result
    }

    async fn send_get(&self, url: url::Url, accept: &str) -> Result<serde_json::Value, AppError> {
        let response = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, accept)
            .timeout(self.timeout)
            .send()
            .await?;

        let response = error_for_status(response).await?;
        let body = read_limited(response, MAX_DOCUMENT_BYTES).await?;
        let document = serde_json::from_slice::<serde_json::Value>(&body).map_err(|e| {
            AppError::Federation(format!("Remote document is not valid JSON: {e}"))
        })?;

        Ok(document)
    }

    /// POST a signed activity to an inbox
    pub async fn post_activity(
        &self,
        inbox: &str,
        body: Vec<u8>,
        signed: &super::SignatureHeaders,
    ) -> Result<(), AppError> {
        let parsed = parse_remote_url(inbox)?;
        self.ensure_public_destination(&parsed).await?;

        let mut request = self
            .http
            .post(parsed)
            .header(reqwest::header::CONTENT_TYPE, ACTIVITY_JSON)
            .header("Date", &signed.date)
            .header("Signature", &signed.signature)
            .timeout(self.timeout);

        if let Some(digest) = &signed.digest {
            request = request.header("Digest", digest);
        }

        let response = request.body(body).send().await?;
        error_for_status(response).await?;

        Ok(())
    }
}

/// Read a response body, failing once it grows past `limit` bytes
async fn read_limited(mut response: reqwest::Response, limit: usize) -> Result<Vec<u8>, AppError> {
    let too_large = || AppError::Federation(format!("Remote document exceeds {limit} bytes"));

    if response
        .content_length()
        .is_some_and(|length| length > limit as u64)
    {
        return Err(too_large());
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > limit {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > ERROR_BODY_LIMIT {
        let mut cut = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }

    Err(AppError::RemoteStatus {
        status: status.as_u16(),
        body,
    })
}
