//! Drive configuration.

use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{DriveError, DriveResult};

/// Default account name for development storage.
pub const DEFAULT_ACCOUNT: &str = "devstoreaccount1";

/// Default account key for development storage (base64 encoded).
pub const DEFAULT_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

/// Default blob service port of the local emulator.
pub const DEFAULT_BLOB_PORT: u16 = 10000;

/// API version sent with every request and signed into SAS tokens.
pub const DEFAULT_API_VERSION: &str = "2021-10-04";

/// Validity window of a SAS token when no expiry is given, in seconds.
pub const DEFAULT_SAS_DURATION: i64 = 3600;

/// Size of each staged block when uploading a stream.
pub const DEFAULT_BLOCK_SIZE: usize = 4 * 1024 * 1024;

const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

/// What `delete` does when the blob is already gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingBlobPolicy {
    /// Surface the service's `BlobNotFound` as a delete error.
    #[default]
    Error,
    /// Treat a missing blob as already deleted.
    Ignore,
}

/// Configuration for one logical storage disk.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Registry name of the driver to build.
    pub driver: Option<String>,
    /// Default container for blob operations.
    pub container: Option<String>,
    pub connection_string: Option<String>,
    pub azure_tenant_id: Option<String>,
    pub azure_client_id: Option<String>,
    pub azure_client_secret: Option<String>,
    /// Storage account name.
    pub name: Option<String>,
    /// Storage account key (base64).
    pub key: Option<String>,
    /// Overrides the computed service endpoint, for local or emulated backends.
    pub local_address: Option<String>,
    pub missing_blob_delete: MissingBlobPolicy,
    /// Bytes per staged block when uploading streams.
    pub block_size: Option<usize>,
    /// `maxresults` hint for list pages.
    pub list_page_size: Option<u32>,
}

impl DriveConfig {
    /// Loads a configuration from a JSON file.
    pub fn from_json_file(path: &std::path::Path) -> DriveResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DriveError::Config(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| DriveError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Returns the registry name of the configured driver.
    pub fn driver_name(&self) -> &str {
        self.driver.as_deref().unwrap_or("azure")
    }

    /// Returns the default container, which blob-scoped operations require.
    pub fn require_container(&self) -> DriveResult<&str> {
        self.container
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| DriveError::Config("`container` is required".to_string()))
    }

    pub fn block_size(&self) -> usize {
        self.block_size.filter(|s| *s > 0).unwrap_or(DEFAULT_BLOCK_SIZE)
    }

    /// Endpoint derived from account name, overridden by `local_address`.
    pub fn endpoint(&self) -> DriveResult<Endpoint> {
        let account = self.name.clone().unwrap_or_default();
        if let Some(address) = self.local_address.as_deref() {
            return Endpoint::parse(address, account);
        }
        if account.is_empty() {
            return Err(DriveError::Config(
                "either `name` or `local_address` is required".to_string(),
            ));
        }
        Endpoint::parse(
            &format!("https://{}.blob.{}", account, DEFAULT_ENDPOINT_SUFFIX),
            account,
        )
    }

    /// Overlays values given on the command line.
    pub fn merge_args(&mut self, args: &Args) {
        fn set(target: &mut Option<String>, value: &Option<String>) {
            if value.is_some() {
                *target = value.clone();
            }
        }
        set(&mut self.driver, &args.driver);
        set(&mut self.container, &args.container);
        set(&mut self.connection_string, &args.connection_string);
        set(&mut self.azure_tenant_id, &args.azure_tenant_id);
        set(&mut self.azure_client_id, &args.azure_client_id);
        set(&mut self.azure_client_secret, &args.azure_client_secret);
        set(&mut self.name, &args.name);
        set(&mut self.key, &args.key);
        set(&mut self.local_address, &args.local_address);
        if args.ignore_missing_on_delete {
            self.missing_blob_delete = MissingBlobPolicy::Ignore;
        }
    }
}

/// Base URL of a blob service plus the account it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Service URL without a trailing slash. Path-style emulator endpoints
    /// include the account, e.g. `http://127.0.0.1:10000/devstoreaccount1`.
    pub url: String,
    pub account: String,
}

impl Endpoint {
    /// Validates `url` and pairs it with an account name. When the account is
    /// empty it is taken from the first label of the host.
    pub fn parse(url: &str, account: impl Into<String>) -> DriveResult<Self> {
        let parsed = url::Url::parse(url)
            .map_err(|e| DriveError::Config(format!("invalid endpoint {:?}: {}", url, e)))?;
        let mut account = account.into();
        if account.is_empty() {
            account = parsed
                .host_str()
                .and_then(|h| h.split('.').next())
                .unwrap_or_default()
                .to_string();
        }
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            account,
        })
    }

    /// Endpoint of the local emulator for the development account.
    pub fn development() -> Self {
        Self {
            url: format!("http://127.0.0.1:{}/{}", DEFAULT_BLOB_PORT, DEFAULT_ACCOUNT),
            account: DEFAULT_ACCOUNT.to_string(),
        }
    }
}

/// Parsed form of an Azure storage connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub endpoint: Endpoint,
    pub account_key: Option<String>,
    pub shared_access_signature: Option<String>,
}

impl ConnectionString {
    pub fn parse(raw: &str) -> DriveResult<Self> {
        let pairs: HashMap<String, String> = raw
            .split(';')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                // Values may contain '=' (base64 keys), only split on the first one
                part.split_once('=')
                    .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                    .ok_or_else(|| {
                        DriveError::Config(format!("malformed connection string segment {:?}", part))
                    })
            })
            .collect::<DriveResult<_>>()?;

        if pairs
            .get("UseDevelopmentStorage")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        {
            return Ok(Self {
                endpoint: Endpoint::development(),
                account_key: Some(DEFAULT_ACCOUNT_KEY.to_string()),
                shared_access_signature: None,
            });
        }

        let account = pairs.get("AccountName").cloned().unwrap_or_default();
        let endpoint = match pairs.get("BlobEndpoint") {
            Some(blob_endpoint) => Endpoint::parse(blob_endpoint, account)?,
            None => {
                if account.is_empty() {
                    return Err(DriveError::Config(
                        "connection string needs AccountName or BlobEndpoint".to_string(),
                    ));
                }
                let protocol = pairs
                    .get("DefaultEndpointsProtocol")
                    .map(String::as_str)
                    .unwrap_or("https");
                let suffix = pairs
                    .get("EndpointSuffix")
                    .map(String::as_str)
                    .unwrap_or(DEFAULT_ENDPOINT_SUFFIX);
                Endpoint::parse(
                    &format!("{}://{}.blob.{}", protocol, account, suffix),
                    account,
                )?
            }
        };

        Ok(Self {
            endpoint,
            account_key: pairs.get("AccountKey").cloned(),
            shared_access_signature: pairs
                .get("SharedAccessSignature")
                .map(|s| s.trim_start_matches('?').to_string()),
        })
    }
}

/// Command-line arguments for the `azure-drive` binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "azure-drive")]
#[command(about = "File operations against Azure Blob Storage")]
#[command(version)]
pub struct Args {
    /// JSON file holding a drive configuration.
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Driver to use (azure or memory).
    #[arg(long, global = true)]
    pub driver: Option<String>,

    /// Default container.
    #[arg(long, global = true)]
    pub container: Option<String>,

    /// Storage connection string.
    #[arg(long, global = true)]
    pub connection_string: Option<String>,

    #[arg(long, global = true)]
    pub azure_tenant_id: Option<String>,

    #[arg(long, global = true)]
    pub azure_client_id: Option<String>,

    #[arg(long, global = true)]
    pub azure_client_secret: Option<String>,

    /// Storage account name.
    #[arg(long, global = true)]
    pub name: Option<String>,

    /// Storage account key.
    #[arg(long, global = true)]
    pub key: Option<String>,

    /// Service endpoint override (e.g. a local emulator).
    #[arg(long, global = true)]
    pub local_address: Option<String>,

    /// Treat deleting a missing blob as success.
    #[arg(long, global = true)]
    pub ignore_missing_on_delete: bool,

    /// Enable debug logging.
    #[arg(long, short = 'd', global = true)]
    pub debug: bool,

    /// Enable silent mode (minimal logging).
    #[arg(long, short = 's', global = true)]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {
    /// List files one level under a prefix.
    Ls {
        prefix: Option<String>,
        /// List every blob under the prefix instead of one level.
        #[arg(long, short = 'r')]
        recursive: bool,
    },
    /// Download a file to stdout or to a local path.
    Get {
        location: String,
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
    /// Upload a local file.
    Put {
        location: String,
        file: PathBuf,
        #[arg(long)]
        content_type: Option<String>,
        /// Metadata entry as key=value; may repeat.
        #[arg(long = "meta")]
        metadata: Vec<String>,
    },
    /// Server-side copy.
    Cp { source: String, destination: String },
    /// Copy then delete the source.
    Mv { source: String, destination: String },
    /// Delete a file.
    Rm { location: String },
    /// Show size, modification time and etag.
    Stat { location: String },
    /// Print the plain URL of a file.
    Url { location: String },
    /// Print a time-limited signed URL.
    Sign {
        location: String,
        #[arg(long, default_value = "r")]
        permissions: String,
        /// Validity in seconds.
        #[arg(long)]
        expires_in: Option<i64>,
    },
    /// Container lifecycle.
    Container {
        #[command(subcommand)]
        action: ContainerAction,
    },
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum ContainerAction {
    Create { name: String },
    Delete { name: String },
    Exists { name: String },
}
