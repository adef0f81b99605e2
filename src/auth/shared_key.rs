//! SharedKey request signing for the Blob service REST API.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use http::{HeaderMap, Method};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

use crate::error::{ErrorCode, StorageError, StorageResult};

type HmacSha256 = Hmac<Sha256>;

/// Account name plus base64 account key.
#[derive(Clone)]
pub struct SharedKeyCredential {
    account: String,
    key: String,
}

impl SharedKeyCredential {
    pub fn new(account: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            key: key.into(),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Computes the base64 HMAC-SHA256 of `string_to_sign` with the account key.
    pub fn sign(&self, string_to_sign: &str) -> StorageResult<String> {
        compute_signature(string_to_sign, &self.key)
    }

    /// Returns the `Authorization` header value for a request.
    pub fn authorization(
        &self,
        method: &Method,
        url: &Url,
        headers: &HeaderMap,
    ) -> StorageResult<String> {
        let string_to_sign = build_string_to_sign(&self.account, method, url, headers);
        let signature = self.sign(&string_to_sign)?;
        tracing::trace!(?string_to_sign, "signed request");
        Ok(format!("SharedKey {}:{}", self.account, signature))
    }
}

impl fmt::Debug for SharedKeyCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedKeyCredential")
            .field("account", &self.account)
            .field("key", &"<redacted>")
            .finish()
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Builds the string-to-sign for SharedKey authentication.
pub fn build_string_to_sign(
    account: &str,
    method: &Method,
    url: &Url,
    headers: &HeaderMap,
) -> String {
    let mut parts = Vec::new();

    // VERB
    parts.push(method.as_str().to_uppercase());

    // Content headers (must be in this exact order)
    for name in [
        "content-encoding",
        "content-language",
        "content-length",
        "content-md5",
        "content-type",
    ] {
        let value = header(headers, name);
        if name == "content-length" && value == "0" {
            // Content-Length is signed as empty when zero
            parts.push(String::new());
        } else {
            parts.push(value.to_string());
        }
    }

    // Date is left empty when x-ms-date is present
    if headers.contains_key("x-ms-date") {
        parts.push(String::new());
    } else {
        parts.push(header(headers, "date").to_string());
    }

    for name in [
        "if-modified-since",
        "if-match",
        "if-none-match",
        "if-unmodified-since",
        "range",
    ] {
        parts.push(header(headers, name).to_string());
    }

    // [headers].join("\n") + "\n" + canonicalizedHeaders + canonicalizedResource
    format!(
        "{}\n{}{}",
        parts.join("\n"),
        canonicalized_headers(headers),
        canonicalized_resource(account, url)
    )
}

/// x-ms-* headers, sorted, each line terminated by '\n'.
fn canonicalized_headers(headers: &HeaderMap) -> String {
    let mut ms_headers: Vec<(&str, &str)> = headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with("x-ms-"))
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .collect();
    ms_headers.sort_by(|a, b| a.0.cmp(b.0));

    let mut result = String::new();
    for (name, value) in ms_headers {
        let normalized_value = value.split_whitespace().collect::<Vec<_>>().join(" ");
        result.push_str(name);
        result.push(':');
        result.push_str(&normalized_value);
        result.push('\n');
    }
    result
}

/// `/{account}{path}` followed by one `\nkey:value` line per query parameter.
///
/// For path-style (emulator) endpoints the path already starts with the
/// account, so the account appears twice.
fn canonicalized_resource(account: &str, url: &Url) -> String {
    let mut resource = format!("/{}{}", account, url.path());

    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url.query_pairs() {
        params
            .entry(key.to_lowercase())
            .or_default()
            .push(value.into_owned());
    }
    for (key, mut values) in params {
        values.sort();
        resource.push('\n');
        resource.push_str(&key);
        resource.push(':');
        resource.push_str(&values.join(","));
    }

    resource
}

/// Computes HMAC-SHA256 signature.
fn compute_signature(string_to_sign: &str, account_key: &str) -> StorageResult<String> {
    let key_bytes = BASE64.decode(account_key).map_err(|_| {
        StorageError::with_message(
            ErrorCode::CredentialUnavailable,
            "Invalid account key encoding",
        )
    })?;

    let mut mac = HmacSha256::new_from_slice(&key_bytes).map_err(|_| {
        StorageError::with_message(ErrorCode::CredentialUnavailable, "Failed to create HMAC")
    })?;

    mac.update(string_to_sign.as_bytes());
    let result = mac.finalize();

    Ok(BASE64.encode(result.into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_ACCOUNT, DEFAULT_ACCOUNT_KEY};
    use http::HeaderValue;

    fn dev_credential() -> SharedKeyCredential {
        SharedKeyCredential::new(DEFAULT_ACCOUNT, DEFAULT_ACCOUNT_KEY)
    }

    #[test]
    fn test_compute_signature() {
        let signature = dev_credential().sign("test string").unwrap();
        // 32-byte digest, base64 encoded
        assert_eq!(signature.len(), 44);
        assert_eq!(signature, dev_credential().sign("test string").unwrap());
        assert_ne!(signature, dev_credential().sign("other string").unwrap());
    }

    #[test]
    fn test_invalid_key_is_rejected() {
        let err = SharedKeyCredential::new("acct", "not base64!").sign("x").unwrap_err();
        assert_eq!(err.code, ErrorCode::CredentialUnavailable);
    }

    #[test]
    fn test_string_to_sign_layout() {
        let url = Url::parse(
            "http://127.0.0.1:10000/devstoreaccount1/photos/a%20b.txt?comp=block&blockid=QUE%3D",
        )
        .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from_static("5"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        headers.insert("x-ms-version", HeaderValue::from_static("2021-10-04"));
        headers.insert("x-ms-date", HeaderValue::from_static("Mon, 01 Jan 2024 00:00:00 GMT"));
        headers.insert("date", HeaderValue::from_static("ignored"));

        let sts = build_string_to_sign(DEFAULT_ACCOUNT, &Method::PUT, &url, &headers);
        let expected = "PUT\n\n\n5\n\ntext/plain\n\n\n\n\n\n\n\
                        x-ms-date:Mon, 01 Jan 2024 00:00:00 GMT\n\
                        x-ms-version:2021-10-04\n\
                        /devstoreaccount1/devstoreaccount1/photos/a%20b.txt\n\
                        blockid:QUE=\n\
                        comp:block";
        assert_eq!(sts, expected);
    }

    #[test]
    fn test_zero_content_length_signed_empty() {
        let url = Url::parse("https://acct.blob.core.windows.net/c?restype=container").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from_static("0"));
        let sts = build_string_to_sign("acct", &Method::PUT, &url, &headers);
        assert!(sts.starts_with("PUT\n\n\n\n"));
        assert!(sts.ends_with("/acct/c\nrestype:container"));
    }

    #[test]
    fn test_authorization_header_format() {
        let url = Url::parse("https://acct.blob.core.windows.net/c/b").unwrap();
        let value = dev_credential()
            .authorization(&Method::GET, &url, &HeaderMap::new())
            .unwrap();
        assert!(value.starts_with("SharedKey devstoreaccount1:"));
    }
}
