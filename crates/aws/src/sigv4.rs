//! AWS Signature Version 4 request signing.
//!
//! Only the header-based variant is implemented. Path segments are
//! URI-encoded once more on top of whatever encoding the URL already
//! carries, which is what every service except S3 expects.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::{Digest, Sha256};

use crate::credentials::Credentials;
use crate::error::PlatformError;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Scope of a signature: where and when.
#[derive(Debug, Clone)]
pub struct SigningParams<'a> {
    pub region: &'a str,
    pub service: &'a str,
    pub time: DateTime<Utc>,
}

/// Compute the headers that authorize a request.
///
/// `headers` are the extra headers the caller will send (content-type and
/// the like); all of them are signed. The returned list contains
/// `x-amz-date`, `x-amz-security-token` when a session token is present,
/// and `authorization`. The `host` header is signed but not returned since
/// HTTP clients derive it from the URL.
pub fn sign(
    method: &str,
    url: &Url,
    headers: &[(String, String)],
    payload: &[u8],
    credentials: &Credentials,
    params: &SigningParams<'_>,
) -> Result<Vec<(String, String)>, PlatformError> {
    let amz_date = params.time.format("%Y%m%dT%H%M%SZ").to_string();
    let date = params.time.format("%Y%m%d").to_string();

    let mut canonical: Vec<(String, String)> = headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), normalize_value(v)))
        .collect();
    canonical.push(("host".into(), host_header(url)?));
    canonical.push(("x-amz-date".into(), amz_date.clone()));
    if let Some(token) = &credentials.session_token {
        canonical.push(("x-amz-security-token".into(), token.clone()));
    }
    canonical.sort();

    let signed_headers = canonical
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers: String = canonical
        .iter()
        .map(|(k, v)| format!("{k}:{v}\n"))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method.to_ascii_uppercase(),
        canonical_uri(url),
        canonical_query(url),
        canonical_headers,
        signed_headers,
        hex::encode(Sha256::digest(payload)),
    );

    let scope = format!(
        "{date}/{}/{}/aws4_request",
        params.region, params.service
    );
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let key = signing_key(
        &credentials.secret_access_key,
        &date,
        params.region,
        params.service,
    )?;
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes())?);

    let mut out = vec![("x-amz-date".to_string(), amz_date)];
    if let Some(token) = &credentials.session_token {
        out.push(("x-amz-security-token".to_string(), token.clone()));
    }
    out.push((
        "authorization".to_string(),
        format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            credentials.access_key_id
        ),
    ));
    Ok(out)
}

/// Derive the per-day signing key.
pub fn signing_key(
    secret: &str,
    date: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, PlatformError> {
    let k_date = hmac(format!("AWS4{secret}").as_bytes(), date.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, service.as_bytes())?;
    hmac(&k_service, b"aws4_request")
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, PlatformError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| PlatformError::Signing(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn host_header(url: &Url) -> Result<String, PlatformError> {
    let host = url
        .host_str()
        .ok_or_else(|| PlatformError::InvalidUrl(format!("{url} has no host")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn canonical_uri(url: &Url) -> String {
    let path = url.path();
    if path.is_empty() || path == "/" {
        return "/".into();
    }
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            (
                urlencoding::encode(&k).into_owned(),
                urlencoding::encode(&v).into_owned(),
            )
        })
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn normalize_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
