//! Common test utilities.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Form, OriginalUri, Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, Method, Response, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{any, post};
use axum::{Json, Router};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

mod wire;

use wire::{parse_block_list, serialize_blob_list, serialize_error};

use azure_drive::auth::shared_key::build_string_to_sign;
use azure_drive::auth::SharedKeyCredential;
use azure_drive::config::Endpoint;
use azure_drive::models::{BlobProperties, ByteStream, ListBlobsPage};
use azure_drive::xml::format_http_date;
use azure_drive::{
    AzureStorageDriver, BlobBackend, ContainerOptions, DriveConfig, ErrorCode, HttpBackend,
    MemoryBackend, PutOptions, StorageError, StorageResult, DEFAULT_ACCOUNT, DEFAULT_ACCOUNT_KEY,
};

pub const TEST_TOKEN: &str = "test-token";

/// Driver over a fresh in-memory store holding container `t1`.
pub fn memory_driver() -> AzureStorageDriver<MemoryBackend> {
    AzureStorageDriver::new(MemoryBackend::new().with_container("t1"), "t1")
}

#[derive(Clone)]
struct AppState {
    base_url: String,
    key: SharedKeyCredential,
    store: Arc<MemoryBackend>,
    requests: Arc<AtomicUsize>,
}

/// Blob REST endpoint served from a [`MemoryBackend`] on a random port.
pub struct TestServer {
    pub base_url: String,
    pub endpoint: Endpoint,
    pub store: Arc<MemoryBackend>,
    requests: Arc<AtomicUsize>,
}

impl TestServer {
    /// Creates and starts a test server on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let endpoint = Endpoint {
            url: format!("{}/{}", base_url, DEFAULT_ACCOUNT),
            account: DEFAULT_ACCOUNT.to_string(),
        };
        let store = Arc::new(MemoryBackend::with_endpoint(
            endpoint.clone(),
            Some(SharedKeyCredential::new(DEFAULT_ACCOUNT, DEFAULT_ACCOUNT_KEY)),
        ));
        let requests = Arc::new(AtomicUsize::new(0));

        let app = Router::new()
            .route("/:account/:container", any(container_handler))
            .route("/:account/:container/*blob", any(blob_handler))
            .with_state(AppState {
                base_url: base_url.clone(),
                key: SharedKeyCredential::new(DEFAULT_ACCOUNT, DEFAULT_ACCOUNT_KEY),
                store: store.clone(),
                requests: requests.clone(),
            });

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            endpoint,
            store,
            requests,
        }
    }

    /// Connection string for the development account at this server.
    pub fn connection_string(&self) -> String {
        format!(
            "DefaultEndpointsProtocol=http;AccountName={};AccountKey={};BlobEndpoint={};",
            DEFAULT_ACCOUNT, DEFAULT_ACCOUNT_KEY, self.endpoint.url
        )
    }

    pub fn config(&self, container: &str) -> DriveConfig {
        DriveConfig {
            container: Some(container.to_string()),
            connection_string: Some(self.connection_string()),
            ..Default::default()
        }
    }

    /// REST driver for `container`, which is created first.
    pub async fn driver(&self, container: &str) -> AzureStorageDriver<HttpBackend> {
        self.store
            .create_container(container, &ContainerOptions::default())
            .await
            .unwrap();
        AzureStorageDriver::from_config(&self.config(container)).unwrap()
    }

    /// Number of blob service requests served so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

fn error_response(err: StorageError) -> Response<Body> {
    Response::builder()
        .status(err.status_code())
        .header("x-ms-error-code", err.code.as_str())
        .header("content-type", "application/xml")
        .body(Body::from(serialize_error(err.code, &err.message)))
        .unwrap()
}

fn empty_response(status: StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("x-ms-version", "2021-10-04")
        .body(Body::empty())
        .unwrap()
}

/// Accepts the test bearer token or a SharedKey signature recomputed from
/// the request as received.
fn authorize(state: &AppState, method: &Method, uri: &Uri, headers: &HeaderMap) -> StorageResult<()> {
    state.requests.fetch_add(1, Ordering::SeqCst);
    let auth_header = header_str(headers, "authorization")
        .ok_or_else(|| StorageError::new(ErrorCode::AuthenticationFailed))?;
    if auth_header == format!("Bearer {}", TEST_TOKEN) {
        return Ok(());
    }

    let (account, provided_signature) = auth_header
        .strip_prefix("SharedKey ")
        .and_then(|credentials| credentials.split_once(':'))
        .ok_or_else(|| StorageError::new(ErrorCode::AuthenticationFailed))?;
    if account != state.key.account() {
        return Err(StorageError::new(ErrorCode::AuthorizationFailure));
    }

    let url = url::Url::parse(&format!("{}{}", state.base_url, uri))
        .map_err(|e| StorageError::with_message(ErrorCode::InvalidUri, e.to_string()))?;
    let string_to_sign = build_string_to_sign(account, method, &url, headers);
    if provided_signature != state.key.sign(&string_to_sign)? {
        return Err(StorageError::with_message(
            ErrorCode::AuthenticationFailed,
            format!("signature mismatch for {:?}", string_to_sign),
        ));
    }
    Ok(())
}

fn metadata_from(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix("x-ms-meta-")?;
            Some((key.to_string(), value.to_str().ok()?.to_string()))
        })
        .collect()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn properties_response(props: &BlobProperties, body: Body) -> Response<Body> {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header("content-length", props.content_length)
        .header("etag", props.etag.as_str())
        .header("last-modified", format_http_date(&props.last_modified))
        .header("x-ms-blob-type", "BlockBlob");
    if let Some(ref content_type) = props.content_type {
        builder = builder.header("content-type", content_type.as_str());
    }
    if let Some(ref md5) = props.content_md5 {
        builder = builder.header("content-md5", md5.as_str());
    }
    for (key, value) in &props.metadata {
        builder = builder.header(format!("x-ms-meta-{}", key), value.as_str());
    }
    builder.body(body).unwrap()
}

async fn container_handler(
    State(state): State<AppState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    Path((_account, container)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response<Body> {
    if let Err(err) = authorize(&state, &method, &uri, &headers) {
        return error_response(err);
    }
    handle_container(&state, method, &container, &query, &headers)
        .await
        .unwrap_or_else(error_response)
}

async fn handle_container(
    state: &AppState,
    method: Method,
    container: &str,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
) -> StorageResult<Response<Body>> {
    if query.get("restype").map(String::as_str) != Some("container") {
        return Err(StorageError::new(ErrorCode::InvalidQueryParameterValue));
    }
    let store = &state.store;

    match (method, query.get("comp").map(String::as_str)) {
        (Method::GET, Some("list")) => {
            let maxresults = query.get("maxresults").and_then(|m| m.parse().ok());
            let page: ListBlobsPage = store
                .list_blobs(
                    container,
                    query.get("prefix").map(String::as_str),
                    query.get("delimiter").map(String::as_str),
                    query.get("marker").map(String::as_str),
                    maxresults,
                )
                .await?;
            let xml = serialize_blob_list(
                &page,
                container,
                query.get("prefix").map(String::as_str),
                query.get("delimiter").map(String::as_str),
                query.get("marker").map(String::as_str),
            );
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "application/xml")
                .body(Body::from(xml))
                .unwrap())
        }
        (Method::HEAD, None) | (Method::GET, None) => {
            if store.container_exists(container).await? {
                Ok(empty_response(StatusCode::OK))
            } else {
                Err(StorageError::new(ErrorCode::ContainerNotFound))
            }
        }
        (Method::PUT, None) => {
            let options = ContainerOptions {
                metadata: metadata_from(headers),
            };
            store.create_container(container, &options).await?;
            Ok(empty_response(StatusCode::CREATED))
        }
        (Method::DELETE, None) => {
            store.delete_container(container).await?;
            Ok(empty_response(StatusCode::ACCEPTED))
        }
        _ => Err(StorageError::new(ErrorCode::InvalidQueryParameterValue)),
    }
}

async fn blob_handler(
    State(state): State<AppState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    Path((_account, container, blob)): Path<(String, String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    if let Err(err) = authorize(&state, &method, &uri, &headers) {
        return error_response(err);
    }
    handle_blob(&state, method, &container, &blob, &query, &headers, body)
        .await
        .unwrap_or_else(error_response)
}

async fn handle_blob(
    state: &AppState,
    method: Method,
    container: &str,
    blob: &str,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
    body: Bytes,
) -> StorageResult<Response<Body>> {
    let store = &state.store;

    match (method, query.get("comp").map(String::as_str)) {
        (Method::GET, None) => {
            let props = store.get_properties(container, blob).await?;
            let data = store.get_blob(container, blob).await?;
            Ok(properties_response(&props, Body::from(data)))
        }
        (Method::HEAD, None) => {
            let props = store.get_properties(container, blob).await?;
            Ok(properties_response(&props, Body::empty()))
        }
        (Method::PUT, Some("block")) => {
            let block_id = query
                .get("blockid")
                .ok_or_else(|| StorageError::new(ErrorCode::InvalidBlockId))?;
            store.put_block(container, blob, block_id, body).await?;
            Ok(empty_response(StatusCode::CREATED))
        }
        (Method::PUT, Some("blocklist")) => {
            let xml = String::from_utf8_lossy(&body);
            let block_ids = parse_block_list(&xml)?;
            let options = PutOptions {
                content_type: header_str(headers, "x-ms-blob-content-type").map(String::from),
                metadata: metadata_from(headers),
            };
            store
                .put_block_list(container, blob, &block_ids, &options)
                .await?;
            Ok(empty_response(StatusCode::CREATED))
        }
        (Method::PUT, None) => {
            if let Some(source) = header_str(headers, "x-ms-copy-source") {
                store.copy_from_url(container, blob, source).await?;
                let mut response = empty_response(StatusCode::ACCEPTED);
                response
                    .headers_mut()
                    .insert("x-ms-copy-status", HeaderValue::from_static("success"));
                return Ok(response);
            }
            let options = PutOptions {
                content_type: header_str(headers, "content-type").map(String::from),
                metadata: metadata_from(headers),
            };
            store.put_blob(container, blob, body, &options).await?;
            Ok(empty_response(StatusCode::CREATED))
        }
        (Method::DELETE, None) => {
            store.delete_blob(container, blob).await?;
            Ok(empty_response(StatusCode::ACCEPTED))
        }
        _ => Err(StorageError::new(ErrorCode::InvalidQueryParameterValue)),
    }
}

/// OAuth token endpoint issuing [`TEST_TOKEN`] for the client-credentials grant.
pub struct TokenServer {
    pub base_url: String,
    issued: Arc<AtomicUsize>,
}

impl TokenServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let issued = Arc::new(AtomicUsize::new(0));

        let app = Router::new()
            .route("/:tenant/oauth2/v2.0/token", post(token_handler))
            .with_state(issued.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            issued,
        }
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

async fn token_handler(
    State(issued): State<Arc<AtomicUsize>>,
    Path(_tenant): Path<String>,
    Form(form): Form<HashMap<String, String>>,
) -> Response<Body> {
    let valid = form.get("grant_type").map(String::as_str) == Some("client_credentials")
        && form.get("scope").map(String::as_str) == Some("https://storage.azure.com/.default")
        && form.get("client_secret").map(String::as_str) == Some("secret");
    if !valid {
        let body = Json(serde_json::json!({
            "error": "invalid_client",
            "error_description": "bad client credentials",
        }));
        return (StatusCode::UNAUTHORIZED, body).into_response();
    }

    issued.fetch_add(1, Ordering::SeqCst);
    Json(serde_json::json!({
        "token_type": "Bearer",
        "expires_in": 3600,
        "access_token": TEST_TOKEN,
    }))
    .into_response()
}

/// Backend wrapper that fails selected operations.
pub struct FaultyBackend {
    inner: MemoryBackend,
    pub fail_delete: AtomicBool,
    pub fail_copy: AtomicBool,
}

impl FaultyBackend {
    pub fn new(inner: MemoryBackend) -> Self {
        Self {
            inner,
            fail_delete: AtomicBool::new(false),
            fail_copy: AtomicBool::new(false),
        }
    }

    fn injected() -> StorageError {
        StorageError::with_message(ErrorCode::AuthorizationPermissionMismatch, "injected failure")
            .with_status(StatusCode::FORBIDDEN)
    }
}

#[async_trait]
impl BlobBackend for FaultyBackend {
    fn account(&self) -> &str {
        self.inner.account()
    }

    fn blob_url(&self, container: &str, blob: &str) -> String {
        self.inner.blob_url(container, blob)
    }

    fn shared_key(&self) -> Option<&SharedKeyCredential> {
        self.inner.shared_key()
    }

    async fn container_exists(&self, container: &str) -> StorageResult<bool> {
        self.inner.container_exists(container).await
    }

    async fn create_container(&self, container: &str, options: &ContainerOptions) -> StorageResult<()> {
        self.inner.create_container(container, options).await
    }

    async fn delete_container(&self, container: &str) -> StorageResult<()> {
        self.inner.delete_container(container).await
    }

    async fn blob_exists(&self, container: &str, blob: &str) -> StorageResult<bool> {
        self.inner.blob_exists(container, blob).await
    }

    async fn get_blob(&self, container: &str, blob: &str) -> StorageResult<Bytes> {
        self.inner.get_blob(container, blob).await
    }

    async fn get_blob_stream(&self, container: &str, blob: &str) -> StorageResult<ByteStream> {
        self.inner.get_blob_stream(container, blob).await
    }

    async fn put_blob(
        &self,
        container: &str,
        blob: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> StorageResult<()> {
        self.inner.put_blob(container, blob, data, options).await
    }

    async fn get_properties(&self, container: &str, blob: &str) -> StorageResult<BlobProperties> {
        self.inner.get_properties(container, blob).await
    }

    async fn delete_blob(&self, container: &str, blob: &str) -> StorageResult<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.delete_blob(container, blob).await
    }

    async fn copy_from_url(&self, container: &str, blob: &str, source_url: &str) -> StorageResult<()> {
        if self.fail_copy.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.copy_from_url(container, blob, source_url).await
    }

    async fn put_block(
        &self,
        container: &str,
        blob: &str,
        block_id: &str,
        data: Bytes,
    ) -> StorageResult<()> {
        self.inner.put_block(container, blob, block_id, data).await
    }

    async fn put_block_list(
        &self,
        container: &str,
        blob: &str,
        block_ids: &[String],
        options: &PutOptions,
    ) -> StorageResult<()> {
        self.inner
            .put_block_list(container, blob, block_ids, options)
            .await
    }

    async fn list_blobs(
        &self,
        container: &str,
        prefix: Option<&str>,
        delimiter: Option<&str>,
        marker: Option<&str>,
        maxresults: Option<u32>,
    ) -> StorageResult<ListBlobsPage> {
        self.inner
            .list_blobs(container, prefix, delimiter, marker, maxresults)
            .await
    }
}
