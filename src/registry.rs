//! The drive capability set and a registry of named driver factories.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::MemoryBackend;
use crate::config::DriveConfig;
use crate::driver::{AzureStorageDriver, DriverSettings};
use crate::error::{DriveError, DriveResult};
use crate::models::{
    BlobItem, ByteStream, ContainerOptions, CopyOptions, FileStats, ListOptions, PutOptions,
    SasOptions, UploadStream, Visibility,
};

/// File operations every storage driver provides.
///
/// Locations are paths relative to the driver's container. `/` inside a
/// location is only a naming convention.
#[async_trait]
pub trait Drive: Send + Sync {
    /// True when a blob exists at `location`. Absence is never an error.
    async fn exists(&self, location: &str) -> DriveResult<bool>;

    /// Downloads the whole blob into memory.
    async fn get(&self, location: &str) -> DriveResult<Bytes>;

    /// Single-pass stream over the blob content.
    async fn get_stream(&self, location: &str) -> DriveResult<ByteStream>;

    /// Uploads `content`, replacing any existing blob.
    async fn put(&self, location: &str, content: Bytes, options: &PutOptions) -> DriveResult<()>;

    /// Uploads a stream of unknown length in blocks.
    async fn put_stream(
        &self,
        location: &str,
        stream: UploadStream,
        options: &PutOptions,
    ) -> DriveResult<()>;

    async fn delete(&self, location: &str) -> DriveResult<()>;

    /// Server-side copy through a short-lived read SAS on `source`.
    async fn copy(&self, source: &str, destination: &str, options: &CopyOptions) -> DriveResult<()>;

    /// Copy followed by deleting `source`. Not atomic: when the delete fails
    /// the error reports `destination_written` and both blobs exist.
    async fn move_file(
        &self,
        source: &str,
        destination: &str,
        options: &CopyOptions,
    ) -> DriveResult<()>;

    /// Plain URL of the blob with percent-escapes decoded.
    fn get_url(&self, location: &str) -> String;

    async fn get_signed_url(&self, location: &str, options: &SasOptions) -> DriveResult<String>;

    async fn get_stats(&self, location: &str) -> DriveResult<FileStats>;

    /// Blobs directly under `prefix` (or all below it when recursive).
    async fn list(&self, prefix: &str, options: &ListOptions) -> DriveResult<Vec<BlobItem>>;

    async fn get_visibility(&self, location: &str) -> DriveResult<Visibility>;

    async fn set_visibility(&self, location: &str, visibility: Visibility) -> DriveResult<()>;

    async fn exists_container(&self, name: &str) -> DriveResult<bool>;

    async fn create_container(&self, name: &str, options: &ContainerOptions) -> DriveResult<()>;

    async fn delete_container(&self, name: &str) -> DriveResult<()>;
}

/// Builds a drive from its configuration.
pub type DriveFactory = fn(&DriveConfig) -> DriveResult<Arc<dyn Drive>>;

/// Maps driver names to factories.
#[derive(Clone)]
pub struct DriverRegistry {
    factories: HashMap<String, DriveFactory>,
}

impl DriverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry holding the `azure` and `memory` drivers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("azure", azure_factory);
        registry.register("memory", memory_factory);
        registry
    }

    /// Registers `factory` under `name`, returning the factory it replaced.
    pub fn register(&mut self, name: impl Into<String>, factory: DriveFactory) -> Option<DriveFactory> {
        self.factories.insert(name.into(), factory)
    }

    /// Builds the driver named by `config.driver`.
    pub fn create(&self, config: &DriveConfig) -> DriveResult<Arc<dyn Drive>> {
        let name = config.driver_name();
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| DriveError::UnknownDriver(name.to_string()))?;
        tracing::debug!(driver = name, "creating drive");
        factory(config)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn azure_factory(config: &DriveConfig) -> DriveResult<Arc<dyn Drive>> {
    Ok(Arc::new(AzureStorageDriver::from_config(config)?))
}

/// An empty in-process store holding just the configured container.
fn memory_factory(config: &DriveConfig) -> DriveResult<Arc<dyn Drive>> {
    let container = config.require_container()?;
    let backend = MemoryBackend::new().with_container(container);
    Ok(Arc::new(
        AzureStorageDriver::new(backend, container).with_settings(DriverSettings::from(config)),
    ))
}
