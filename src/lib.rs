//! azure-drive: file-storage semantics over Azure Blob Storage.
//!
//! The driver maps file operations (get, put, copy, move, list, signed
//! URLs) onto a container of blobs. Backends speak the REST API through
//! [`HttpBackend`] or keep everything in process with [`MemoryBackend`].
//!
//! # Example
//!
//! ```no_run
//! use azure_drive::{AzureStorageDriver, Drive, DriveConfig, PutOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), azure_drive::DriveError> {
//!     let config = DriveConfig {
//!         container: Some("t1".into()),
//!         connection_string: Some("UseDevelopmentStorage=true".into()),
//!         ..Default::default()
//!     };
//!     let drive = AzureStorageDriver::from_config(&config)?;
//!     drive.put("a.txt", "hello".into(), &PutOptions::default()).await?;
//!     println!("{}", drive.get_url("a.txt"));
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod backend;
pub mod config;
pub mod credential;
pub mod driver;
pub mod error;
pub mod models;
pub mod registry;
pub mod xml;

// Re-exports for convenience
pub use backend::{BlobBackend, HttpBackend, MemoryBackend};
pub use config::{
    Args, DriveConfig, MissingBlobPolicy, DEFAULT_ACCOUNT, DEFAULT_ACCOUNT_KEY, DEFAULT_BLOB_PORT,
};
pub use driver::{AzureStorageDriver, DriverSettings};
pub use error::{DriveError, DriveResult, ErrorCode, MetadataOperation, StorageError, StorageResult};
pub use models::{
    BlobItem, ContainerOptions, CopyOptions, FileStats, ListOptions, PutOptions, SasOptions,
    Visibility,
};
pub use registry::{Drive, DriverRegistry};
