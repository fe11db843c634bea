//! AWS Signature Version 4 for form-encoded POST requests.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::WatchError;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

/// Helper to create an HMAC instance, resolving trait ambiguity.
fn new_hmac(key: &[u8]) -> Result<HmacSha256, WatchError> {
    <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| WatchError::Signing(format!("HMAC init failed: {e}")))
}

fn hmac(key: &[u8], data: &str) -> Result<Vec<u8>, WatchError> {
    let mut mac = new_hmac(key)?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Static credentials plus the region/service a request is scoped to.
pub struct SigV4Signer {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
    region: String,
    service: String,
}

/// Headers to attach to a signed request, in addition to the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub authorization: String,
    pub amz_date: String,
    pub security_token: Option<String>,
}

impl SigV4Signer {
    pub fn new(
        access_key_id: &str,
        secret_access_key: &str,
        session_token: Option<&str>,
        region: &str,
        service: &str,
    ) -> Self {
        Self {
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            session_token: session_token.map(str::to_string),
            region: region.to_string(),
            service: service.to_string(),
        }
    }

    /// Derive the per-day signing key: HMAC chain over date, region, service.
    pub fn signing_key(&self, date: &str) -> Result<Vec<u8>, WatchError> {
        let k_date = hmac(format!("AWS4{}", self.secret_access_key).as_bytes(), date)?;
        let k_region = hmac(&k_date, &self.region)?;
        let k_service = hmac(&k_region, &self.service)?;
        hmac(&k_service, "aws4_request")
    }

    /// Sign a `POST /` with a form-encoded body for `host`.
    pub fn sign_form_post(
        &self,
        host: &str,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<SignedHeaders, WatchError> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();

        // Canonical headers must be sorted by lowercase name.
        let mut headers = vec![
            ("content-type", FORM_CONTENT_TYPE.to_string()),
            ("host", host.to_string()),
            ("x-amz-date", amz_date.clone()),
        ];
        if let Some(token) = &self.session_token {
            headers.push(("x-amz-security-token", token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(b.0));

        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{name}:{}\n", value.trim()))
            .collect();
        let signed_headers = headers
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(";");

        let canonical_request = format!(
            "POST\n/\n\n{canonical_headers}\n{signed_headers}\n{}",
            sha256_hex(body.as_bytes())
        );

        let scope = format!("{date}/{}/{}/aws4_request", self.region, self.service);
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
            sha256_hex(canonical_request.as_bytes())
        );

        let signature = hex::encode(hmac(&self.signing_key(&date)?, &string_to_sign)?);

        Ok(SignedHeaders {
            authorization: format!(
                "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
                self.access_key_id
            ),
            amz_date,
            security_token: self.session_token.clone(),
        })
    }
}
