//! Data models shared by the backends and the driver.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::auth::sas::SasPermissions;
use crate::error::StorageError;

/// Lazy, single-pass body of a download.
pub type ByteStream = BoxStream<'static, Result<Bytes, StorageError>>;

/// Caller-supplied source of an upload, of unknown total length.
pub type UploadStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Properties of a blob as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobProperties {
    pub content_length: u64,
    pub content_type: Option<String>,
    pub content_md5: Option<String>,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    /// User-defined metadata (x-ms-meta-*).
    pub metadata: HashMap<String, String>,
}

impl BlobProperties {
    /// Creates properties for freshly written content.
    pub fn new(content_length: u64) -> Self {
        Self {
            content_length,
            content_type: None,
            content_md5: None,
            etag: new_etag(),
            last_modified: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Updates the ETag and last modified time.
    pub fn update_etag(&mut self) {
        self.etag = new_etag();
        self.last_modified = Utc::now();
    }
}

fn new_etag() -> String {
    format!(
        "\"0x{}\"",
        uuid::Uuid::new_v4().simple().to_string().to_uppercase()
    )
}

/// One blob returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobItem {
    /// Full blob name, including any prefix.
    pub name: String,
    pub content_length: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One page of a hierarchical listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListBlobsPage {
    pub blobs: Vec<BlobItem>,
    /// Virtual directory prefixes (ending with the delimiter).
    pub prefixes: Vec<String>,
    pub next_marker: Option<String>,
}

/// File statistics exposed by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStats {
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// Always true: blobs are the only first-class entities.
    pub is_file: bool,
    pub etag: String,
}

impl From<BlobProperties> for FileStats {
    fn from(props: BlobProperties) -> Self {
        Self {
            size: props.content_length,
            modified: props.last_modified,
            is_file: true,
            etag: props.etag,
        }
    }
}

/// Options for `put` and `put_stream`. Unset fields are not sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl PutOptions {
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Options for signed URL generation.
///
/// Permissions default to read-only and `starts_on` to the current time. The
/// expiry is `expires_on` when given, otherwise `starts_on + expires_in`, and
/// `expires_in` defaults to one hour.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SasOptions {
    pub permissions: Option<SasPermissions>,
    pub starts_on: Option<DateTime<Utc>>,
    pub expires_on: Option<DateTime<Utc>>,
    pub expires_in: Option<chrono::Duration>,
}

/// Options for `copy` and `move_file`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyOptions {
    /// Window and permissions of the SAS granted to the copy source.
    pub sas: SasOptions,
    /// Container of the destination; defaults to the source's container.
    pub destination_container: Option<String>,
}

/// Options for `list`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Return every blob under the prefix instead of one level.
    pub recursive: bool,
    /// Page size hint passed to the service.
    pub page_size: Option<u32>,
}

/// Options for creating a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerOptions {
    pub metadata: HashMap<String, String>,
}

/// File visibility, as understood by drive front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}
