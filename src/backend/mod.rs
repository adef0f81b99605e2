//! Container-scoped blob operations the driver is built on.

mod rest;
mod memory;

pub use self::rest::HttpBackend;
pub use self::memory::MemoryBackend;

use async_trait::async_trait;
use bytes::Bytes;

use crate::auth::SharedKeyCredential;
use crate::error::StorageResult;
use crate::models::{BlobProperties, ByteStream, ContainerOptions, ListBlobsPage, PutOptions};

/// Blob service operations, one call per REST request.
///
/// Not-found conditions are reported as errors carrying `BlobNotFound` or
/// `ContainerNotFound`; only the `*_exists` probes turn them into `false`.
#[async_trait]
pub trait BlobBackend: Send + Sync + 'static {
    /// Account the backend talks to.
    fn account(&self) -> &str;

    /// Canonical, percent-encoded URL of a blob.
    fn blob_url(&self, container: &str, blob: &str) -> String;

    /// Account key able to sign SAS tokens, when the backend holds one.
    fn shared_key(&self) -> Option<&SharedKeyCredential>;

    // Container operations
    async fn container_exists(&self, container: &str) -> StorageResult<bool>;
    async fn create_container(&self, container: &str, options: &ContainerOptions) -> StorageResult<()>;
    async fn delete_container(&self, container: &str) -> StorageResult<()>;

    // Blob operations
    async fn blob_exists(&self, container: &str, blob: &str) -> StorageResult<bool>;
    async fn get_blob(&self, container: &str, blob: &str) -> StorageResult<Bytes>;
    async fn get_blob_stream(&self, container: &str, blob: &str) -> StorageResult<ByteStream>;
    async fn put_blob(
        &self,
        container: &str,
        blob: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> StorageResult<()>;
    async fn get_properties(&self, container: &str, blob: &str) -> StorageResult<BlobProperties>;
    async fn delete_blob(&self, container: &str, blob: &str) -> StorageResult<()>;

    /// Synchronous server-side copy from `source_url` onto `container/blob`.
    async fn copy_from_url(&self, container: &str, blob: &str, source_url: &str) -> StorageResult<()>;

    // Block operations
    async fn put_block(
        &self,
        container: &str,
        blob: &str,
        block_id: &str,
        data: Bytes,
    ) -> StorageResult<()>;
    async fn put_block_list(
        &self,
        container: &str,
        blob: &str,
        block_ids: &[String],
        options: &PutOptions,
    ) -> StorageResult<()>;

    /// One page of a listing. `delimiter` collapses deeper names into prefixes.
    async fn list_blobs(
        &self,
        container: &str,
        prefix: Option<&str>,
        delimiter: Option<&str>,
        marker: Option<&str>,
        maxresults: Option<u32>,
    ) -> StorageResult<ListBlobsPage>;
}

/// Percent-encodes a blob name for use in a URL path, keeping `/` literal.
pub fn encode_blob_path(blob: &str) -> String {
    const PATH: &percent_encoding::AsciiSet = &percent_encoding::NON_ALPHANUMERIC
        .remove(b'-')
        .remove(b'_')
        .remove(b'.')
        .remove(b'~')
        .remove(b'/');
    percent_encoding::utf8_percent_encode(blob, PATH).to_string()
}
