//! HTTP Signatures for ActivityPub
//!
//! Implements the draft-cavage signing scheme as deployed across the
//! fediverse: https://docs.joinmastodon.org/spec/security/
//!
//! Signatures are RSASSA-PKCS1-v1_5 over SHA-256 with the standard
//! DigestInfo prefix.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs1v15::{Signature as Pkcs1v15Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use super::client::{ACTIVITY_JSON, FederationClient};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::metrics::SIGNATURE_VERIFICATIONS;

/// Pseudo-header covering method, path and query
pub const REQUEST_TARGET: &str = "(request-target)";

/// Parsed Signature header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Key ID (URL to public key)
    pub key_id: String,
    /// Algorithm (usually rsa-sha256 or hs2019)
    pub algorithm: String,
    /// Signed header names, in the order the sender declared them
    pub headers: Vec<String>,
    /// Base64-encoded signature
    pub signature: String,
}

/// Split a Signature header into its `key="value"` pairs.
///
/// Quoted values may contain commas; unquoted values end at the next comma.
fn signature_params(raw: &str) -> Result<Vec<(&str, &str)>, AppError> {
    let mut params = Vec::new();
    let mut rest = raw.trim();

    while !rest.is_empty() {
        let (key, after_key) = rest
            .split_once('=')
            .ok_or_else(|| AppError::Validation(format!("Malformed signature parameter: {rest}")))?;
        let key = key.trim().trim_start_matches(',').trim();
        let after_key = after_key.trim_start();

        let (value, remaining) = if let Some(quoted) = after_key.strip_prefix('"') {
            let end = quoted.find('"').ok_or_else(|| {
                AppError::Validation(format!("Unterminated value for {key}"))
            })?;
            (&quoted[..end], &quoted[end + 1..])
        } else {
            match after_key.find(',') {
                Some(end) => (after_key[..end].trim(), &after_key[end..]),
                None => (after_key.trim(), ""),
            }
        };

        if key.is_empty() {
            return Err(AppError::Validation(
                "Empty signature parameter name".to_string(),
            ));
        }
        params.push((key, value));

        rest = remaining.trim_start();
        if let Some(next) = rest.strip_prefix(',') {
            rest = next.trim_start();
        } else if !rest.is_empty() {
            return Err(AppError::Validation(format!(
                "Expected ',' between signature parameters, found: {rest}"
            )));
        }
    }

    Ok(params)
}

/// Parse Signature header value
///
/// # Format
/// ```text
/// keyId="...",algorithm="...",headers="...",signature="..."
/// ```
///
/// `keyId` and `signature` are required. Missing `headers` means `date`,
/// missing `algorithm` means `rsa-sha256`. Unknown parameters are ignored.
pub fn parse_signature_header(raw: &str) -> Result<SignatureHeader, AppError> {
    let mut key_id = None;
    let mut algorithm = None;
    let mut headers = None;
    let mut signature = None;

    for (key, value) in signature_params(raw)? {
        match key {
            "keyId" => key_id = Some(value.to_string()),
            "algorithm" => algorithm = Some(value.to_string()),
            "headers" => {
                headers = Some(
                    value
                        .split_whitespace()
                        .map(|name| name.to_ascii_lowercase())
                        .collect::<Vec<_>>(),
                )
            }
            "signature" => signature = Some(value.to_string()),
            _ => {}
        }
    }

    let key_id = key_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::Validation("Missing keyId".to_string()))?;
    let signature = signature
        .filter(|sig| !sig.is_empty())
        .ok_or_else(|| AppError::Validation("Missing signature".to_string()))?;
    let headers = match headers {
        Some(list) if !list.is_empty() => list,
        _ => vec!["date".to_string()],
    };

    Ok(SignatureHeader {
        key_id,
        algorithm: algorithm.unwrap_or_else(|| "rsa-sha256".to_string()),
        headers,
        signature,
    })
}

/// The parts of an inbound request that a signature can cover
#[derive(Debug, Clone, Copy)]
pub struct InboundRequest<'a> {
    pub method: &'a str,
    /// Path plus `?query` when present
    pub path_and_query: &'a str,
    pub headers: &'a http::HeaderMap,
}

/// Build the string that was signed
///
/// One line per declared header, joined with `\n`, in the declared order.
/// Repeated headers are joined with `, `.
pub fn build_signed_string(
    request: &InboundRequest<'_>,
    header_names: &[String],
) -> Result<String, AppError> {
    let mut lines = Vec::with_capacity(header_names.len());

    for name in header_names {
        if name == REQUEST_TARGET {
            lines.push(format!(
                "{}: {} {}",
                REQUEST_TARGET,
                request.method.to_ascii_lowercase(),
                request.path_and_query
            ));
            continue;
        }

        let mut values = Vec::new();
        for value in request.headers.get_all(name.as_str()) {
            let value = value.to_str().map_err(|_| {
                AppError::Validation(format!("Signed header {name} is not valid text"))
            })?;
            values.push(value.trim());
        }

        if values.is_empty() {
            return Err(AppError::Validation(format!(
                "Signed header missing from request: {name}"
            )));
        }

        lines.push(format!("{}: {}", name, values.join(", ")));
    }

    Ok(lines.join("\n"))
}

/// Verify a parsed signature against a known public key
///
/// Any decoding or cryptographic failure is `InvalidSignature`.
pub fn verify(
    request: &InboundRequest<'_>,
    header: &SignatureHeader,
    public_key: &RsaPublicKey,
) -> Result<(), AppError> {
    let signed_string = build_signed_string(request, &header.headers)?;

    let signature_bytes = BASE64
        .decode(header.signature.as_bytes())
        .map_err(|_| AppError::InvalidSignature)?;
    let signature = Pkcs1v15Signature::try_from(signature_bytes.as_slice())
        .map_err(|_| AppError::InvalidSignature)?;

    let verifier = VerifyingKey::<Sha256>::new(public_key.clone());
    verifier
        .verify(signed_string.as_bytes(), &signature)
        .map_err(|_| AppError::InvalidSignature)
}

/// Decode an RSA public key from PEM
///
/// Accepts PKCS#1 (`RSA PUBLIC KEY`) and SPKI (`PUBLIC KEY`) blocks.
pub fn decode_public_key_pem(pem: &str) -> Result<RsaPublicKey, AppError> {
    let pem = pem.trim();
    RsaPublicKey::from_pkcs1_pem(pem)
        .or_else(|_| RsaPublicKey::from_public_key_pem(pem))
        .map_err(|e| AppError::KeyFetch(format!("Invalid public key PEM: {e}")))
}

fn decode_private_key_pem(pem: &str) -> Result<RsaPrivateKey, AppError> {
    let pem = pem.trim();
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Invalid private key: {e}")))
}

/// Fetch the public key named by a keyId
///
/// GETs the actor document (fragment stripped) and decodes
/// `publicKey.publicKeyPem`. Every failure is reported as `KeyFetch`.
pub async fn fetch_public_key(
    key_id: &str,
    client: &FederationClient,
) -> Result<RsaPublicKey, AppError> {
    let actor_url = key_id.split('#').next().unwrap_or(key_id);

    let actor = client
        .get_json(actor_url, ACTIVITY_JSON, "public_key")
        .await
        .map_err(|e| AppError::KeyFetch(format!("Failed to fetch {actor_url}: {e}")))?;

    let public_key = actor
        .get("publicKey")
        .ok_or_else(|| AppError::KeyFetch("Missing publicKey in actor".to_string()))?;

    // If a key fragment is given, the actor must advertise exactly that key id.
    if key_id.contains('#') {
        if let Some(advertised) = public_key.get("id").and_then(|id| id.as_str()) {
            if advertised != key_id {
                return Err(AppError::KeyFetch(format!(
                    "Actor advertises key {advertised}, not {key_id}"
                )));
            }
        }
    }

    let pem = public_key
        .get("publicKeyPem")
        .and_then(|pem| pem.as_str())
        .ok_or_else(|| AppError::KeyFetch("Missing publicKeyPem in actor".to_string()))?;

    decode_public_key_pem(pem)
}

/// Validate that signature keyId points to the same actor as the activity actor.
pub fn key_id_matches_actor(key_id: &str, actor_id: &str) -> bool {
    let key_actor = key_id.split('#').next().unwrap_or(key_id);
    let actor = actor_id.split('#').next().unwrap_or(actor_id);
    key_actor == actor
}

/// Generate SHA-256 digest for body
///
/// # Returns
/// `SHA-256=base64(hash)`
pub fn generate_digest(body: &[u8]) -> String {
    let hash = Sha256::digest(body);
    format!("SHA-256={}", BASE64.encode(hash))
}

/// Headers to add for signed request
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    /// Signature header value
    pub signature: String,
    /// Date header value (RFC 7231 IMF-fixdate)
    pub date: String,
    /// Digest header value (if body present)
    pub digest: Option<String>,
}

/// Sign an outbound HTTP request
///
/// Covers `(request-target) host date` and `digest` when a body is given.
///
/// # Example
/// ```ignore
/// let headers = sign_request(
///     "POST",
///     "https://remote.server/inbox",
///     Some(&body),
///     &private_key,
///     "https://my.server/users/me#main-key",
/// )?;
/// ```
pub fn sign_request(
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    private_key_pem: &str,
    key_id: &str,
) -> Result<SignatureHeaders, AppError> {
    let parsed_url =
        url::Url::parse(url).map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;
    let host = super::client::authority_of(&parsed_url)
        .ok_or_else(|| AppError::Validation("Missing host in URL".to_string()))?;
    let path_and_query = match parsed_url.query() {
        Some(query) => format!("{}?{}", parsed_url.path(), query),
        None => parsed_url.path().to_string(),
    };

    let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    let digest = body.map(generate_digest);

    let mut signing_parts = vec![
        format!(
            "{}: {} {}",
            REQUEST_TARGET,
            method.to_ascii_lowercase(),
            path_and_query
        ),
        format!("host: {}", host),
        format!("date: {}", date),
    ];
    let mut headers_list = vec![REQUEST_TARGET, "host", "date"];

    if let Some(ref digest_value) = digest {
        signing_parts.push(format!("digest: {}", digest_value));
        headers_list.push("digest");
    }

    let signing_string = signing_parts.join("\n");

    let private_key = decode_private_key_pem(private_key_pem)?;
    let signing_key = SigningKey::<Sha256>::new(private_key);
    let mut rng = rand::thread_rng();
    let signature = signing_key.sign_with_rng(&mut rng, signing_string.as_bytes());

    let signature_header = format!(
        "keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
        key_id,
        headers_list.join(" "),
        BASE64.encode(signature.to_bytes())
    );

    Ok(SignatureHeaders {
        signature: signature_header,
        date,
        digest,
    })
}

/// Outcome of inbound signature checking
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureCheck {
    /// Signature verified with the key at `key_id`
    Verified { key_id: String },
    /// Verification disabled by configuration
    Skipped,
}

/// Verifies signatures on inbound deliveries
///
/// The skip flag is read once from configuration at construction.
#[derive(Clone)]
pub struct SignatureVerifier {
    client: FederationClient,
    skip_verification: bool,
    max_date_skew_secs: i64,
}

impl SignatureVerifier {
    pub fn new(client: FederationClient, config: &Arc<AppConfig>) -> Self {
        Self {
            client,
            skip_verification: config.federation.skip_signature_verification,
            max_date_skew_secs: config.federation.max_date_skew_secs,
        }
    }

    /// Verify an inbound request
    ///
    /// # Steps
    /// 1. Parse the Signature header (no network access on failure)
    /// 2. Check the Date header is recent
    /// 3. Check the Digest header against the body, when present
    /// 4. Fetch the signer's key and verify
    ///
    /// # Errors
    /// - `Unauthorized` if there is no Signature header
    /// - `Validation` for malformed headers, stale dates or digest mismatch
    /// - `KeyFetch` if the key cannot be retrieved
    /// - `InvalidSignature` if the signature does not verify
    pub async fn verify_inbound(
        &self,
        request: &InboundRequest<'_>,
        body: &[u8],
    ) -> Result<SignatureCheck, AppError> {
        if self.skip_verification {
            tracing::debug!("Signature verification skipped by configuration");
            SIGNATURE_VERIFICATIONS.with_label_values(&["skipped"]).inc();
            return Ok(SignatureCheck::Skipped);
        }

        let result = self.check(request, body).await;
        let label = match &result {
            Ok(_) => "valid",
            Err(AppError::KeyFetch(_)) => "key_fetch_failed",
            Err(AppError::InvalidSignature) => "invalid",
            Err(_) => "malformed",
        };
        SIGNATURE_VERIFICATIONS.with_label_values(&[label]).inc();

        if let Err(error) = &result {
            tracing::warn!(%error, path = %request.path_and_query, "Inbound signature rejected");
        }

        result
    }

    async fn check(
        &self,
        request: &InboundRequest<'_>,
        body: &[u8],
    ) -> Result<SignatureCheck, AppError> {
        let raw = request
            .headers
            .get("signature")
            .ok_or(AppError::Unauthorized)?
            .to_str()
            .map_err(|_| AppError::Validation("Invalid Signature header".to_string()))?;
        let header = parse_signature_header(raw)?;

        if let Some(date) = request.headers.get("date") {
            let date = date
                .to_str()
                .map_err(|_| AppError::Validation("Invalid Date header".to_string()))?;
            let date = DateTime::parse_from_rfc2822(date)
                .map_err(|_| AppError::Validation("Invalid Date format".to_string()))?;
            let skew = (Utc::now().timestamp() - date.timestamp()).abs();
            if skew > self.max_date_skew_secs {
                return Err(AppError::Validation(
                    "Date header too old or in future".to_string(),
                ));
            }
        } else if header.headers.iter().any(|name| name == "date") {
            return Err(AppError::Validation("Missing Date header".to_string()));
        }

        if let Some(digest) = request.headers.get("digest") {
            let digest = digest
                .to_str()
                .map_err(|_| AppError::Validation("Invalid Digest header".to_string()))?;
            let matches = digest
                .split(',')
                .map(str::trim)
                .filter(|entry| entry.len() > 8 && entry[..8].eq_ignore_ascii_case("sha-256="))
                .any(|entry| entry[8..] == generate_digest(body)[8..]);
            if !matches {
                return Err(AppError::Validation("Digest mismatch".to_string()));
            }
        }

        // Fail before any network access if the covered headers are absent.
        build_signed_string(request, &header.headers)?;

        let public_key = fetch_public_key(&header.key_id, &self.client).await?;
        verify(request, &header, &public_key)?;

        Ok(SignatureCheck::Verified {
            key_id: header.key_id,
        })
    }
}
