//! Credential selection from a drive configuration.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

use crate::auth::SharedKeyCredential;
use crate::config::{ConnectionString, DriveConfig, Endpoint};
use crate::error::{DriveResult, ErrorCode, StorageError, StorageResult};

const AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
const STORAGE_SCOPE: &str = "https://storage.azure.com/.default";

/// Tokens are refreshed this long before they expire.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// How requests to the service are authorized.
#[derive(Clone)]
pub enum Credential {
    SharedKey(SharedKeyCredential),
    ClientSecret(Arc<ClientSecretCredential>),
    /// A SAS query string appended to every request.
    SharedAccessSignature(String),
    Anonymous,
}

impl Credential {
    /// The account key credential, the only kind able to sign a SAS.
    pub fn shared_key(&self) -> Option<&SharedKeyCredential> {
        match self {
            Credential::SharedKey(key) => Some(key),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Credential::SharedKey(_) => "shared-key",
            Credential::ClientSecret(_) => "client-secret",
            Credential::SharedAccessSignature(_) => "sas",
            Credential::Anonymous => "anonymous",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::SharedKey(key) => f.debug_tuple("SharedKey").field(key).finish(),
            Credential::ClientSecret(c) => f.debug_tuple("ClientSecret").field(c).finish(),
            Credential::SharedAccessSignature(_) => f.write_str("SharedAccessSignature(<redacted>)"),
            Credential::Anonymous => f.write_str("Anonymous"),
        }
    }
}

/// Picks the endpoint and credential for `config`.
///
/// A connection string wins over tenant/client/secret, which wins over an
/// account name and key. With none of them requests are anonymous.
pub fn resolve(config: &DriveConfig, client: &reqwest::Client) -> DriveResult<(Endpoint, Credential)> {
    if let Some(ref raw) = config.connection_string {
        let cs = ConnectionString::parse(raw)?;
        let credential = match (cs.account_key, cs.shared_access_signature) {
            (Some(key), _) => {
                Credential::SharedKey(SharedKeyCredential::new(cs.endpoint.account.clone(), key))
            }
            (None, Some(sas)) => Credential::SharedAccessSignature(sas),
            (None, None) => Credential::Anonymous,
        };
        tracing::debug!(endpoint = %cs.endpoint.url, kind = credential.kind(), "using connection string");
        return Ok((cs.endpoint, credential));
    }

    let endpoint = config.endpoint()?;
    let credential = match (
        non_empty(&config.azure_tenant_id),
        non_empty(&config.azure_client_id),
        non_empty(&config.azure_client_secret),
    ) {
        (Some(tenant), Some(client_id), Some(secret)) => Credential::ClientSecret(Arc::new(
            ClientSecretCredential::new(tenant, client_id, secret, client.clone()),
        )),
        _ => match (non_empty(&config.name), non_empty(&config.key)) {
            (Some(name), Some(key)) => Credential::SharedKey(SharedKeyCredential::new(name, key)),
            _ => Credential::Anonymous,
        },
    };

    tracing::debug!(endpoint = %endpoint.url, kind = credential.kind(), "resolved credential");
    Ok((endpoint, credential))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct TokenError {
    error: String,
    #[serde(default)]
    error_description: String,
}

/// Azure AD application credential using the client-credentials grant.
pub struct ClientSecretCredential {
    tenant_id: String,
    client_id: String,
    client_secret: String,
    authority_host: String,
    client: reqwest::Client,
    token: RwLock<Option<AccessToken>>,
}

impl ClientSecretCredential {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authority_host: AUTHORITY_HOST.to_string(),
            client,
            token: RwLock::new(None),
        }
    }

    /// Points token requests at another authority, such as a local stub.
    pub fn with_authority_host(mut self, host: impl Into<String>) -> Self {
        self.authority_host = host.into().trim_end_matches('/').to_string();
        self
    }

    /// Returns a bearer token, fetching a new one when the cached one is
    /// missing or about to expire.
    pub async fn token(&self) -> StorageResult<String> {
        {
            let cached = self.token.read();
            if let Some(ref token) = *cached {
                if token.expires_at - Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) > Utc::now() {
                    return Ok(token.value.clone());
                }
            }
        }

        self.refresh().await
    }

    async fn refresh(&self) -> StorageResult<String> {
        let url = format!("{}/{}/oauth2/v2.0/token", self.authority_host, self.tenant_id);
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", STORAGE_SCOPE),
        ];

        tracing::debug!(tenant = %self.tenant_id, "requesting access token");
        let response = self.client.post(&url).form(&params).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error: TokenError = response.json().await.unwrap_or_else(|_| TokenError {
                error: "unknown".to_string(),
                error_description: "failed to parse error response".to_string(),
            });
            return Err(StorageError::with_message(
                ErrorCode::CredentialUnavailable,
                format!("token request failed: {} {}", error.error, error.error_description),
            )
            .with_status(status));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            StorageError::with_message(
                ErrorCode::CredentialUnavailable,
                format!("invalid token response: {}", e),
            )
        })?;

        let value = token.access_token.clone();
        *self.token.write() = Some(AccessToken {
            value: token.access_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
        });
        Ok(value)
    }
}

impl fmt::Debug for ClientSecretCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSecretCredential")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}
