//! Blob service SAS (shared access signature) generation and validation.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::collections::HashMap;
use std::fmt;

use super::shared_key::SharedKeyCredential;
use crate::config::{DEFAULT_API_VERSION, DEFAULT_SAS_DURATION};
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::SasOptions;

/// Permissions granted by a blob SAS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SasPermissions {
    pub read: bool,
    pub add: bool,
    pub create: bool,
    pub write: bool,
    pub delete: bool,
    pub delete_version: bool,
    pub tag: bool,
}

impl SasPermissions {
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    /// Parses a permission string such as `"rw"`. Order does not matter.
    pub fn parse(s: &str) -> StorageResult<Self> {
        let mut permissions = Self::default();
        for c in s.chars() {
            match c {
                'r' => permissions.read = true,
                'a' => permissions.add = true,
                'c' => permissions.create = true,
                'w' => permissions.write = true,
                'd' => permissions.delete = true,
                'x' => permissions.delete_version = true,
                't' => permissions.tag = true,
                other => {
                    return Err(StorageError::with_message(
                        ErrorCode::InvalidInput,
                        format!("invalid SAS permission {:?}", other),
                    ))
                }
            }
        }
        Ok(permissions)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for SasPermissions {
    /// Writes permissions in the order the service requires.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = [
            (self.read, 'r'),
            (self.add, 'a'),
            (self.create, 'c'),
            (self.write, 'w'),
            (self.delete, 'd'),
            (self.delete_version, 'x'),
            (self.tag, 't'),
        ];
        for (set, c) in flags {
            if set {
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}

/// Permissions and validity window after defaults are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SasWindow {
    pub permissions: SasPermissions,
    pub starts_on: DateTime<Utc>,
    pub expires_on: DateTime<Utc>,
}

impl SasWindow {
    /// Applies the defaults: read-only, starting `now`, valid for
    /// `expires_in` (one hour unless given). An explicit `expires_on` always
    /// wins over the duration.
    pub fn resolve(options: &SasOptions, now: DateTime<Utc>) -> StorageResult<Self> {
        let permissions = options
            .permissions
            .filter(|p| !p.is_empty())
            .unwrap_or_else(SasPermissions::read_only);
        // Signed times carry whole seconds only
        let starts_on = options.starts_on.unwrap_or(now).trunc_subsecs(0);
        let expires_on = match options.expires_on {
            Some(expires_on) => expires_on.trunc_subsecs(0),
            None => {
                let expires_in = options
                    .expires_in
                    .unwrap_or_else(|| Duration::seconds(DEFAULT_SAS_DURATION));
                starts_on.checked_add_signed(expires_in).ok_or_else(|| {
                    StorageError::with_message(
                        ErrorCode::InvalidInput,
                        format!(
                            "SAS duration of {}s from {} is out of range",
                            expires_in.num_seconds(),
                            format_sas_datetime(&starts_on)
                        ),
                    )
                })?
            }
        };

        if expires_on <= starts_on {
            return Err(StorageError::with_message(
                ErrorCode::InvalidInput,
                format!(
                    "SAS expiry {} must be later than its start {}",
                    format_sas_datetime(&expires_on),
                    format_sas_datetime(&starts_on)
                ),
            ));
        }

        Ok(Self {
            permissions,
            starts_on,
            expires_on,
        })
    }
}

/// Blob SAS token parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobSasParameters {
    /// Signed version (sv).
    pub signed_version: String,
    /// Signed resource (sr) - b=blob, c=container.
    pub signed_resource: String,
    /// Signed permissions (sp).
    pub signed_permissions: String,
    /// Signed expiry (se).
    pub signed_expiry: DateTime<Utc>,
    /// Signed start (st) - optional.
    pub signed_start: Option<DateTime<Utc>>,
    /// Signed protocol (spr) - optional.
    pub signed_protocol: Option<String>,
    /// Signature (sig).
    pub signature: String,
}

impl BlobSasParameters {
    /// Signs a blob-scoped SAS for `container/blob` with the account key.
    pub fn generate(
        credential: &SharedKeyCredential,
        container: &str,
        blob: &str,
        options: &SasOptions,
    ) -> StorageResult<Self> {
        Self::generate_at(credential, container, blob, options, Utc::now())
    }

    /// Same as [`generate`](Self::generate) with an explicit clock.
    pub fn generate_at(
        credential: &SharedKeyCredential,
        container: &str,
        blob: &str,
        options: &SasOptions,
        now: DateTime<Utc>,
    ) -> StorageResult<Self> {
        let window = SasWindow::resolve(options, now)?;
        let mut params = Self {
            signed_version: DEFAULT_API_VERSION.to_string(),
            signed_resource: "b".to_string(),
            signed_permissions: window.permissions.to_string(),
            signed_expiry: window.expires_on,
            signed_start: Some(window.starts_on),
            signed_protocol: None,
            signature: String::new(),
        };
        let string_to_sign =
            params.build_string_to_sign(credential.account(), container, Some(blob));
        params.signature = credential.sign(&string_to_sign)?;
        Ok(params)
    }

    /// Parses blob SAS parameters from decoded query pairs.
    pub fn from_query(params: &HashMap<String, String>) -> Option<Self> {
        // Account SAS tokens carry ss/srt instead of sr
        if !params.contains_key("sr") || params.contains_key("ss") {
            return None;
        }

        Some(Self {
            signed_version: params.get("sv")?.clone(),
            signed_resource: params.get("sr")?.clone(),
            signed_permissions: params.get("sp").cloned().unwrap_or_default(),
            signed_expiry: parse_sas_datetime(params.get("se")?)?,
            signed_start: params.get("st").and_then(|s| parse_sas_datetime(s)),
            signed_protocol: params.get("spr").cloned(),
            signature: params.get("sig")?.clone(),
        })
    }

    /// Serializes the token as a URL query string (without the leading `?`).
    pub fn to_query(&self) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("sv", &self.signed_version);
        if let Some(ref protocol) = self.signed_protocol {
            query.append_pair("spr", protocol);
        }
        if let Some(ref start) = self.signed_start {
            query.append_pair("st", &format_sas_datetime(start));
        }
        query.append_pair("se", &format_sas_datetime(&self.signed_expiry));
        query.append_pair("sr", &self.signed_resource);
        query.append_pair("sp", &self.signed_permissions);
        query.append_pair("sig", &self.signature);
        query.finish()
    }

    /// Validates the token for an operation on `container` (and `blob`).
    pub fn validate(
        &self,
        credential: &SharedKeyCredential,
        container: &str,
        blob: Option<&str>,
        required_permission: char,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        match self.signed_resource.as_str() {
            // Container SAS - valid for container and blob operations
            "c" => {}
            "b" => {
                if blob.is_none() {
                    return Err(StorageError::new(
                        ErrorCode::AuthorizationResourceTypeMismatch,
                    ));
                }
            }
            _ => {
                return Err(StorageError::new(
                    ErrorCode::AuthorizationResourceTypeMismatch,
                ));
            }
        }

        if !self.signed_permissions.contains(required_permission) {
            return Err(StorageError::new(
                ErrorCode::AuthorizationPermissionMismatch,
            ));
        }

        if now > self.signed_expiry {
            return Err(StorageError::with_message(
                ErrorCode::AuthenticationFailed,
                "SAS token has expired",
            ));
        }

        if let Some(ref start) = self.signed_start {
            if now < *start {
                return Err(StorageError::with_message(
                    ErrorCode::AuthenticationFailed,
                    "SAS token is not yet valid",
                ));
            }
        }

        let string_to_sign = self.build_string_to_sign(credential.account(), container, blob);
        let expected_signature = credential.sign(&string_to_sign)?;
        if self.signature != expected_signature {
            tracing::debug!(
                "Blob SAS signature mismatch:\n  Expected: {}\n  Provided: {}\n  StringToSign: {:?}",
                expected_signature,
                self.signature,
                string_to_sign
            );
            return Err(StorageError::new(ErrorCode::AuthenticationFailed));
        }

        Ok(())
    }

    /// Builds the string-to-sign for blob SAS (version 2020-12-06 and later).
    fn build_string_to_sign(&self, account: &str, container: &str, blob: Option<&str>) -> String {
        let mut resource = format!("/blob/{}/{}", account, container);
        // Only blob SAS tokens include the blob in the canonicalized resource
        if self.signed_resource != "c" {
            if let Some(blob) = blob {
                resource.push('/');
                resource.push_str(blob);
            }
        }

        let parts = [
            self.signed_permissions.clone(),
            self.signed_start
                .map(|dt| format_sas_datetime(&dt))
                .unwrap_or_default(),
            format_sas_datetime(&self.signed_expiry),
            resource,
            // Signed identifier, IP
            String::new(),
            String::new(),
            self.signed_protocol.clone().unwrap_or_default(),
            self.signed_version.clone(),
            self.signed_resource.clone(),
            // Snapshot time, encryption scope
            String::new(),
            String::new(),
            // rscc, rscd, rsce, rscl, rsct
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
        ];

        parts.join("\n")
    }
}

/// Parses a SAS datetime string.
fn parse_sas_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
        })
}

/// Formats a datetime for SAS token.
pub fn format_sas_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
