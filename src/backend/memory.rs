//! In-process blob store with the service's semantics.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use dashmap::DashMap;
use md5::{Digest, Md5};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::{encode_blob_path, BlobBackend};
use crate::auth::{BlobSasParameters, SharedKeyCredential};
use crate::config::{Endpoint, DEFAULT_ACCOUNT, DEFAULT_ACCOUNT_KEY};
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::{
    BlobItem, BlobProperties, ByteStream, ContainerOptions, ListBlobsPage, PutOptions,
};

/// Size of the chunks `get_blob_stream` yields.
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Default page size of a listing.
const DEFAULT_MAX_RESULTS: u32 = 5000;

type BlobKey = (Arc<str>, Arc<str>);
type BlockKey = (Arc<str>, Arc<str>, Arc<str>);

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Bytes,
    properties: BlobProperties,
}

/// [`BlobBackend`] keeping containers, blobs and staged blocks in memory.
///
/// URLs are minted under the configured endpoint, and server-side copies
/// only accept sources under that endpoint that carry a read SAS signed
/// with the account key.
pub struct MemoryBackend {
    endpoint: Endpoint,
    shared_key: Option<SharedKeyCredential>,
    /// Container metadata indexed by container name.
    containers: DashMap<Arc<str>, HashMap<String, String>>,
    /// Committed blobs indexed by (container, name).
    blobs: DashMap<BlobKey, StoredBlob>,
    /// Staged (uncommitted) blocks indexed by (container, blob, block_id).
    blocks: DashMap<BlockKey, Bytes>,
}

impl MemoryBackend {
    /// Store for the development account at the emulator endpoint.
    pub fn new() -> Self {
        Self::with_endpoint(
            Endpoint::development(),
            Some(SharedKeyCredential::new(DEFAULT_ACCOUNT, DEFAULT_ACCOUNT_KEY)),
        )
    }

    pub fn with_endpoint(endpoint: Endpoint, shared_key: Option<SharedKeyCredential>) -> Self {
        Self {
            endpoint,
            shared_key,
            containers: DashMap::new(),
            blobs: DashMap::new(),
            blocks: DashMap::new(),
        }
    }

    /// Adds an empty container, replacing any existing one of that name.
    pub fn with_container(self, name: &str) -> Self {
        self.containers.insert(Arc::from(name), HashMap::new());
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    #[inline]
    fn blob_key(container: &str, name: &str) -> BlobKey {
        (Arc::from(container), Arc::from(name))
    }

    fn require_container(&self, container: &str) -> StorageResult<()> {
        if self.containers.contains_key(container) {
            Ok(())
        } else {
            Err(StorageError::new(ErrorCode::ContainerNotFound))
        }
    }

    fn read(&self, container: &str, blob: &str) -> StorageResult<StoredBlob> {
        self.require_container(container)?;
        self.blobs
            .get(&Self::blob_key(container, blob))
            .map(|b| b.value().clone())
            .ok_or_else(|| StorageError::new(ErrorCode::BlobNotFound))
    }

    fn write(&self, container: &str, blob: &str, data: Bytes, options: &PutOptions) {
        let mut properties = BlobProperties::new(data.len() as u64);
        properties.content_type = Some(
            options
                .content_type
                .clone()
                .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string()),
        );
        properties.content_md5 = Some(BASE64.encode(Md5::digest(&data)));
        properties.metadata = options.metadata.clone();

        self.blobs
            .insert(Self::blob_key(container, blob), StoredBlob { data, properties });
    }

    /// Resolves a copy source URL to `(container, blob)` after checking its SAS.
    fn verify_copy_source(&self, source_url: &str) -> StorageResult<(String, String)> {
        let cannot_verify = |reason: String| {
            StorageError::with_message(ErrorCode::CannotVerifyCopySource, reason)
        };

        let (base, query) = source_url.split_once('?').unwrap_or((source_url, ""));
        let path = base
            .strip_prefix(self.endpoint.url.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| {
                StorageError::with_message(
                    ErrorCode::InvalidSourceBlobUrl,
                    format!("copy source {:?} is not served by this account", base),
                )
            })?;
        let (container, encoded_blob) = path.split_once('/').ok_or_else(|| {
            StorageError::with_message(ErrorCode::InvalidSourceBlobUrl, "copy source names no blob")
        })?;
        let blob = percent_encoding::percent_decode_str(encoded_blob)
            .decode_utf8()
            .map_err(|_| StorageError::new(ErrorCode::InvalidSourceBlobUrl))?
            .into_owned();

        let key = self
            .shared_key
            .as_ref()
            .ok_or_else(|| cannot_verify("no account key to verify the source SAS".to_string()))?;
        let params: HashMap<String, String> =
            url::form_urlencoded::parse(query.as_bytes()).into_owned().collect();
        let sas = BlobSasParameters::from_query(&params)
            .ok_or_else(|| cannot_verify("copy source carries no blob SAS".to_string()))?;
        sas.validate(key, container, Some(&blob), 'r', Utc::now())
            .map_err(|e| cannot_verify(e.message))?;

        Ok((container.to_string(), blob))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Validates a container name.
fn validate_container_name(name: &str) -> StorageResult<()> {
    // The service also requires at least 3 characters; short names such as
    // `t1` are accepted here for local use
    if name.is_empty() || name.len() > 63 {
        return Err(StorageError::with_message(
            ErrorCode::InvalidResourceName,
            "Container name must be between 1 and 63 characters",
        ));
    }

    // Lowercase letters, numbers and single hyphens, starting and ending alphanumeric
    if !name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        || name.starts_with('-')
        || name.ends_with('-')
        || name.contains("--")
    {
        return Err(StorageError::with_message(
            ErrorCode::InvalidResourceName,
            "Container name can only contain lowercase letters, numbers, and single hyphens",
        ));
    }

    Ok(())
}

fn list_item(name: &str, blob: &StoredBlob) -> BlobItem {
    BlobItem {
        name: name.to_string(),
        content_length: blob.properties.content_length,
        content_type: blob.properties.content_type.clone(),
        etag: Some(blob.properties.etag.clone()),
        last_modified: Some(blob.properties.last_modified),
    }
}

#[async_trait]
impl BlobBackend for MemoryBackend {
    fn account(&self) -> &str {
        &self.endpoint.account
    }

    fn blob_url(&self, container: &str, blob: &str) -> String {
        format!("{}/{}/{}", self.endpoint.url, container, encode_blob_path(blob))
    }

    fn shared_key(&self) -> Option<&SharedKeyCredential> {
        self.shared_key.as_ref()
    }

    async fn container_exists(&self, container: &str) -> StorageResult<bool> {
        Ok(self.containers.contains_key(container))
    }

    async fn create_container(&self, container: &str, options: &ContainerOptions) -> StorageResult<()> {
        validate_container_name(container)?;
        match self.containers.entry(Arc::from(container)) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(StorageError::new(ErrorCode::ContainerAlreadyExists))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(options.metadata.clone());
                Ok(())
            }
        }
    }

    async fn delete_container(&self, container: &str) -> StorageResult<()> {
        self.containers
            .remove(container)
            .ok_or_else(|| StorageError::new(ErrorCode::ContainerNotFound))?;
        self.blobs.retain(|(c, _), _| c.as_ref() != container);
        self.blocks.retain(|(c, _, _), _| c.as_ref() != container);
        Ok(())
    }

    async fn blob_exists(&self, container: &str, blob: &str) -> StorageResult<bool> {
        Ok(self.blobs.contains_key(&Self::blob_key(container, blob)))
    }

    async fn get_blob(&self, container: &str, blob: &str) -> StorageResult<Bytes> {
        Ok(self.read(container, blob)?.data)
    }

    async fn get_blob_stream(&self, container: &str, blob: &str) -> StorageResult<ByteStream> {
        let data = self.read(container, blob)?.data;
        let chunks: Vec<Result<Bytes, StorageError>> = (0..data.len())
            .step_by(STREAM_CHUNK_SIZE)
            .map(|start| Ok(data.slice(start..(start + STREAM_CHUNK_SIZE).min(data.len()))))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn put_blob(
        &self,
        container: &str,
        blob: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> StorageResult<()> {
        self.require_container(container)?;
        self.write(container, blob, data, options);
        Ok(())
    }

    async fn get_properties(&self, container: &str, blob: &str) -> StorageResult<BlobProperties> {
        Ok(self.read(container, blob)?.properties)
    }

    async fn delete_blob(&self, container: &str, blob: &str) -> StorageResult<()> {
        self.require_container(container)?;
        self.blobs
            .remove(&Self::blob_key(container, blob))
            .map(|_| ())
            .ok_or_else(|| StorageError::new(ErrorCode::BlobNotFound))
    }

    async fn copy_from_url(&self, container: &str, blob: &str, source_url: &str) -> StorageResult<()> {
        let (source_container, source_blob) = self.verify_copy_source(source_url)?;
        let source = self.read(&source_container, &source_blob)?;
        self.require_container(container)?;

        let mut properties = source.properties;
        properties.update_etag();
        self.blobs.insert(
            Self::blob_key(container, blob),
            StoredBlob {
                data: source.data,
                properties,
            },
        );
        Ok(())
    }

    async fn put_block(
        &self,
        container: &str,
        blob: &str,
        block_id: &str,
        data: Bytes,
    ) -> StorageResult<()> {
        self.require_container(container)?;
        if block_id.is_empty() || BASE64.decode(block_id).is_err() {
            return Err(StorageError::new(ErrorCode::InvalidBlockId));
        }
        self.blocks
            .insert((Arc::from(container), Arc::from(blob), Arc::from(block_id)), data);
        Ok(())
    }

    async fn put_block_list(
        &self,
        container: &str,
        blob: &str,
        block_ids: &[String],
        options: &PutOptions,
    ) -> StorageResult<()> {
        self.require_container(container)?;

        let container_arc: Arc<str> = Arc::from(container);
        let blob_arc: Arc<str> = Arc::from(blob);
        let mut content = BytesMut::new();
        for id in block_ids {
            let key = (container_arc.clone(), blob_arc.clone(), Arc::from(id.as_str()));
            let block = self.blocks.get(&key).ok_or_else(|| {
                StorageError::with_message(
                    ErrorCode::InvalidBlockList,
                    format!("block {:?} was never staged", id),
                )
            })?;
            content.extend_from_slice(block.value());
        }

        self.write(container, blob, content.freeze(), options);
        self.blocks
            .retain(|(c, b, _), _| !(c.as_ref() == container && b.as_ref() == blob));
        Ok(())
    }

    async fn list_blobs(
        &self,
        container: &str,
        prefix: Option<&str>,
        delimiter: Option<&str>,
        marker: Option<&str>,
        maxresults: Option<u32>,
    ) -> StorageResult<ListBlobsPage> {
        self.require_container(container)?;
        let maxresults = maxresults.filter(|m| *m > 0).unwrap_or(DEFAULT_MAX_RESULTS) as usize;
        let prefix = prefix.unwrap_or("");

        // Entries keyed by name (or virtual prefix) so pages come out sorted
        let mut entries: BTreeMap<String, Option<BlobItem>> = BTreeMap::new();
        for entry in self.blobs.iter() {
            let (c, name) = entry.key();
            let name: &str = name.as_ref();
            if c.as_ref() != container || !name.starts_with(prefix) {
                continue;
            }
            let rest = &name[prefix.len()..];
            match delimiter.and_then(|d| rest.find(d).map(|idx| idx + d.len())) {
                Some(end) => {
                    entries.insert(format!("{}{}", prefix, &rest[..end]), None);
                }
                None => {
                    entries.insert(name.to_string(), Some(list_item(name, entry.value())));
                }
            }
        }

        let mut page = ListBlobsPage::default();
        let mut taken = 0;
        for (key, item) in entries
            .into_iter()
            .filter(|(key, _)| marker.map_or(true, |m| key.as_str() > m))
        {
            if taken == maxresults {
                break;
            }
            taken += 1;
            page.next_marker = Some(key.clone());
            match item {
                Some(blob) => page.blobs.push(blob),
                None => page.prefixes.push(key),
            }
        }

        // Only a full page can have a successor
        if taken < maxresults {
            page.next_marker = None;
        }
        Ok(page)
    }
}
