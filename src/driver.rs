//! File semantics over a blob backend.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::BlobSasParameters;
use crate::backend::{BlobBackend, HttpBackend};
use crate::config::{DriveConfig, MissingBlobPolicy, DEFAULT_BLOCK_SIZE};
use crate::error::{DriveError, DriveResult, ErrorCode, MetadataOperation, StorageError, StorageResult};
use crate::models::{
    BlobItem, ByteStream, ContainerOptions, CopyOptions, FileStats, ListOptions, PutOptions,
    SasOptions, UploadStream, Visibility,
};
use crate::registry::Drive;

/// Per-driver tunables taken from the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverSettings {
    pub missing_blob_delete: MissingBlobPolicy,
    /// Bytes per staged block in `put_stream`.
    pub block_size: usize,
    pub list_page_size: Option<u32>,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            missing_blob_delete: MissingBlobPolicy::Error,
            block_size: DEFAULT_BLOCK_SIZE,
            list_page_size: None,
        }
    }
}

impl From<&DriveConfig> for DriverSettings {
    fn from(config: &DriveConfig) -> Self {
        Self {
            missing_blob_delete: config.missing_blob_delete,
            block_size: config.block_size(),
            list_page_size: config.list_page_size,
        }
    }
}

/// Storage driver bound to one container of a blob backend.
///
/// The container never changes after construction. Use
/// [`container`](Self::container) for a view of another container that
/// shares the same backend connection.
pub struct AzureStorageDriver<B: BlobBackend> {
    backend: Arc<B>,
    container: String,
    settings: DriverSettings,
}

impl<B: BlobBackend> Clone for AzureStorageDriver<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            container: self.container.clone(),
            settings: self.settings,
        }
    }
}

impl AzureStorageDriver<HttpBackend> {
    /// Connects to the service described by `config`.
    pub fn from_config(config: &DriveConfig) -> DriveResult<Self> {
        let container = config.require_container()?.to_string();
        let backend = HttpBackend::from_config(config)?;
        Ok(Self::new(backend, container).with_settings(DriverSettings::from(config)))
    }
}

impl<B: BlobBackend> AzureStorageDriver<B> {
    pub fn new(backend: B, container: impl Into<String>) -> Self {
        Self::from_shared(Arc::new(backend), container)
    }

    pub fn from_shared(backend: Arc<B>, container: impl Into<String>) -> Self {
        Self {
            backend,
            container: container.into(),
            settings: DriverSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: DriverSettings) -> Self {
        self.settings = settings;
        self
    }

    /// A driver for `name` sharing this driver's backend and settings.
    pub fn container(&self, name: impl Into<String>) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            container: name.into(),
            settings: self.settings,
        }
    }

    pub fn container_name(&self) -> &str {
        &self.container
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// URL of `container/location` carrying a freshly signed blob SAS.
    pub fn generate_blob_sas_url(
        &self,
        container: &str,
        location: &str,
        options: &SasOptions,
    ) -> StorageResult<String> {
        let key = self.backend.shared_key().ok_or_else(|| {
            StorageError::with_message(
                ErrorCode::CredentialUnavailable,
                "signing a SAS requires an account key credential",
            )
        })?;
        let sas = BlobSasParameters::generate(key, container, location, options)?;
        Ok(format!(
            "{}?{}",
            self.backend.blob_url(container, location),
            sas.to_query()
        ))
    }

    async fn stage_blocks(
        &self,
        location: &str,
        mut stream: UploadStream,
    ) -> StorageResult<Vec<String>> {
        let block_size = self.settings.block_size.max(1);
        let mut block_ids = Vec::new();
        let mut buffer = BytesMut::new();

        loop {
            let chunk = stream.next().await.transpose().map_err(|e| {
                StorageError::with_message(
                    ErrorCode::TransportFailure,
                    format!("upload source failed: {}", e),
                )
            })?;
            let done = chunk.is_none();
            if let Some(chunk) = chunk {
                buffer.extend_from_slice(&chunk);
            }

            while buffer.len() >= block_size || (done && !buffer.is_empty()) {
                let take = block_size.min(buffer.len());
                let block = buffer.split_to(take).freeze();
                let block_id = block_id(block_ids.len());
                self.backend
                    .put_block(&self.container, location, &block_id, block)
                    .await?;
                block_ids.push(block_id);
            }

            if done {
                return Ok(block_ids);
            }
        }
    }
}

/// Fixed-width block id; the service requires equal lengths within a blob.
fn block_id(index: usize) -> String {
    BASE64.encode(format!("{:032}", index))
}

#[async_trait]
impl<B: BlobBackend> Drive for AzureStorageDriver<B> {
    async fn exists(&self, location: &str) -> DriveResult<bool> {
        self.backend
            .blob_exists(&self.container, location)
            .await
            .map_err(|e| DriveError::metadata(location, MetadataOperation::Exists, e))
    }

    async fn get(&self, location: &str) -> DriveResult<Bytes> {
        debug!(container = %self.container, location, "get");
        self.backend
            .get_blob(&self.container, location)
            .await
            .map_err(|cause| DriveError::Read {
                location: location.to_string(),
                cause,
            })
    }

    async fn get_stream(&self, location: &str) -> DriveResult<ByteStream> {
        debug!(container = %self.container, location, "get stream");
        self.backend
            .get_blob_stream(&self.container, location)
            .await
            .map_err(|cause| DriveError::Read {
                location: location.to_string(),
                cause,
            })
    }

    async fn put(&self, location: &str, content: Bytes, options: &PutOptions) -> DriveResult<()> {
        debug!(container = %self.container, location, len = content.len(), "put");
        self.backend
            .put_blob(&self.container, location, content, options)
            .await
            .map_err(|cause| DriveError::Write {
                location: location.to_string(),
                cause,
            })
    }

    async fn put_stream(
        &self,
        location: &str,
        stream: UploadStream,
        options: &PutOptions,
    ) -> DriveResult<()> {
        let write_error = |cause| DriveError::Write {
            location: location.to_string(),
            cause,
        };

        let block_ids = self.stage_blocks(location, stream).await.map_err(write_error)?;
        debug!(container = %self.container, location, blocks = block_ids.len(), "committing blocks");
        self.backend
            .put_block_list(&self.container, location, &block_ids, options)
            .await
            .map_err(write_error)
    }

    async fn delete(&self, location: &str) -> DriveResult<()> {
        debug!(container = %self.container, location, "delete");
        match self.backend.delete_blob(&self.container, location).await {
            Ok(()) => Ok(()),
            Err(e)
                if e.code == ErrorCode::BlobNotFound
                    && self.settings.missing_blob_delete == MissingBlobPolicy::Ignore =>
            {
                warn!(container = %self.container, location, "blob already absent, delete ignored");
                Ok(())
            }
            Err(cause) => Err(DriveError::Delete {
                location: location.to_string(),
                cause,
            }),
        }
    }

    async fn copy(&self, source: &str, destination: &str, options: &CopyOptions) -> DriveResult<()> {
        let copy_error = |cause| DriveError::Copy {
            from: source.to_string(),
            to: destination.to_string(),
            cause,
        };

        // The source is always readable through its SAS
        let mut sas = options.sas.clone();
        if let Some(ref mut permissions) = sas.permissions {
            permissions.read = true;
        }
        let source_url = self
            .generate_blob_sas_url(&self.container, source, &sas)
            .map_err(copy_error)?;

        let destination_container = options
            .destination_container
            .as_deref()
            .unwrap_or(&self.container);
        debug!(
            container = %self.container,
            source,
            destination_container,
            destination,
            "copy"
        );
        self.backend
            .copy_from_url(destination_container, destination, &source_url)
            .await
            .map_err(copy_error)
    }

    async fn move_file(
        &self,
        source: &str,
        destination: &str,
        options: &CopyOptions,
    ) -> DriveResult<()> {
        let destination_container = options
            .destination_container
            .as_deref()
            .unwrap_or(&self.container);
        // Deleting the source would remove the only copy
        if destination_container == self.container && source == destination {
            debug!(container = %self.container, source, "move onto itself skipped");
            return Ok(());
        }

        if let Err(e) = self.copy(source, destination, options).await {
            return Err(DriveError::Move {
                from: source.to_string(),
                to: destination.to_string(),
                destination_written: false,
                cause: e.into_cause(),
            });
        }

        if let Err(e) = self.delete(source).await {
            warn!(
                container = %self.container,
                source,
                destination,
                "destination written but source could not be removed"
            );
            return Err(DriveError::Move {
                from: source.to_string(),
                to: destination.to_string(),
                destination_written: true,
                cause: e.into_cause(),
            });
        }

        Ok(())
    }

    fn get_url(&self, location: &str) -> String {
        let url = self.backend.blob_url(&self.container, location);
        percent_encoding::percent_decode_str(&url)
            .decode_utf8_lossy()
            .into_owned()
    }

    async fn get_signed_url(&self, location: &str, options: &SasOptions) -> DriveResult<String> {
        self.generate_blob_sas_url(&self.container, location, options)
            .map_err(|e| DriveError::metadata(location, MetadataOperation::SignedUrl, e))
    }

    async fn get_stats(&self, location: &str) -> DriveResult<FileStats> {
        self.backend
            .get_properties(&self.container, location)
            .await
            .map(FileStats::from)
            .map_err(|e| DriveError::metadata(location, MetadataOperation::Stats, e))
    }

    async fn list(&self, prefix: &str, options: &ListOptions) -> DriveResult<Vec<BlobItem>> {
        let delimiter = if options.recursive { None } else { Some("/") };
        let page_size = options.page_size.or(self.settings.list_page_size);

        let mut entries = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let page = self
                .backend
                .list_blobs(
                    &self.container,
                    Some(prefix),
                    delimiter,
                    marker.as_deref(),
                    page_size,
                )
                .await
                .map_err(|e| DriveError::metadata(prefix, MetadataOperation::List, e))?;

            // Virtual directory prefixes are not entries
            entries.extend(page.blobs);
            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        debug!(container = %self.container, prefix, count = entries.len(), "list");
        Ok(entries)
    }

    async fn get_visibility(&self, location: &str) -> DriveResult<Visibility> {
        Err(visibility_unsupported(location))
    }

    async fn set_visibility(&self, location: &str, _visibility: Visibility) -> DriveResult<()> {
        Err(visibility_unsupported(location))
    }

    async fn exists_container(&self, name: &str) -> DriveResult<bool> {
        self.backend
            .container_exists(name)
            .await
            .map_err(|cause| DriveError::CannotFindContainer {
                container: name.to_string(),
                cause,
            })
    }

    async fn create_container(&self, name: &str, options: &ContainerOptions) -> DriveResult<()> {
        debug!(container = name, "create container");
        self.backend
            .create_container(name, options)
            .await
            .map_err(|cause| DriveError::CannotCreateContainer {
                container: name.to_string(),
                cause,
            })
    }

    async fn delete_container(&self, name: &str) -> DriveResult<()> {
        debug!(container = name, "delete container");
        self.backend
            .delete_container(name)
            .await
            .map_err(|cause| DriveError::CannotDeleteContainer {
                container: name.to_string(),
                cause,
            })
    }
}

fn visibility_unsupported(location: &str) -> DriveError {
    DriveError::Metadata {
        location: location.to_string(),
        operation: MetadataOperation::Visibility,
        reason: "unsupported".to_string(),
        cause: None,
    }
}
