//! Blob service REST client.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use http::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Method, StatusCode};
use std::collections::HashMap;
use url::Url;

use super::{encode_blob_path, BlobBackend};
use crate::auth::SharedKeyCredential;
use crate::config::{DriveConfig, Endpoint, DEFAULT_API_VERSION};
use crate::credential::{self, Credential};
use crate::error::{DriveResult, ErrorCode, StorageError, StorageResult};
use crate::models::{BlobProperties, ByteStream, ContainerOptions, ListBlobsPage, PutOptions};
use crate::xml;

const META_PREFIX: &str = "x-ms-meta-";

/// [`BlobBackend`] speaking the Blob service REST API.
pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: Endpoint,
    credential: Credential,
}

impl HttpBackend {
    pub fn new(endpoint: Endpoint, credential: Credential) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint, credential)
    }

    pub fn with_client(client: reqwest::Client, endpoint: Endpoint, credential: Credential) -> Self {
        Self {
            client,
            endpoint,
            credential,
        }
    }

    /// Resolves endpoint and credential from a drive configuration.
    pub fn from_config(config: &DriveConfig) -> DriveResult<Self> {
        let client = reqwest::Client::new();
        let (endpoint, credential) = credential::resolve(config, &client)?;
        Ok(Self::with_client(client, endpoint, credential))
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    fn container_url(&self, container: &str) -> String {
        format!("{}/{}", self.endpoint.url, container)
    }

    fn request_url(
        &self,
        container: &str,
        blob: Option<&str>,
        query: &[(&str, &str)],
    ) -> StorageResult<Url> {
        let raw = match blob {
            Some(blob) => self.blob_url(container, blob),
            None => self.container_url(container),
        };
        let mut url = Url::parse(&raw)
            .map_err(|e| StorageError::with_message(ErrorCode::InvalidUri, e.to_string()))?;

        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        if let Credential::SharedAccessSignature(ref sas) = self.credential {
            let combined = match url.query() {
                Some(existing) if !existing.is_empty() => format!("{}&{}", existing, sas),
                _ => sas.clone(),
            };
            url.set_query(Some(&combined));
        }

        Ok(url)
    }

    /// Signs and sends a request, turning non-success responses into errors.
    async fn send(
        &self,
        method: Method,
        url: Url,
        mut headers: HeaderMap,
        body: Option<Bytes>,
    ) -> StorageResult<reqwest::Response> {
        headers.insert("x-ms-version", HeaderValue::from_static(DEFAULT_API_VERSION));
        headers.insert("x-ms-date", header_value(&xml::format_http_date(&Utc::now()))?);
        headers.insert(
            "x-ms-client-request-id",
            header_value(&uuid::Uuid::new_v4().to_string())?,
        );
        if let Some(ref body) = body {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        }

        match self.credential {
            Credential::SharedKey(ref key) => {
                let authorization = key.authorization(&method, &url, &headers)?;
                headers.insert(AUTHORIZATION, header_value(&authorization)?);
            }
            Credential::ClientSecret(ref identity) => {
                let token = identity.token().await?;
                headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", token))?);
            }
            Credential::SharedAccessSignature(_) | Credential::Anonymous => {}
        }

        tracing::debug!(method = %method, path = url.path(), "blob request");

        let mut request = self.client.request(method, url).headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }
        let response = request.send().await?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }

    async fn probe(&self, url: Url) -> StorageResult<bool> {
        match self.send(Method::HEAD, url, HeaderMap::new(), None).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn header_value(value: &str) -> StorageResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| {
        StorageError::with_message(
            ErrorCode::InvalidHeaderValue,
            format!("invalid header value {:?}", value),
        )
    })
}

fn insert_metadata(headers: &mut HeaderMap, metadata: &HashMap<String, String>) -> StorageResult<()> {
    for (key, value) in metadata {
        let name = format!("{}{}", META_PREFIX, key);
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
            StorageError::with_message(
                ErrorCode::InvalidHeaderValue,
                format!("invalid metadata name {:?}", key),
            )
        })?;
        headers.insert(name, header_value(value)?);
    }
    Ok(())
}

fn response_header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Decodes a failed response from the error code header or the XML body.
async fn error_from_response(response: reqwest::Response) -> StorageError {
    let status: StatusCode = response.status();
    let request_id = response_header(response.headers(), "x-ms-request-id").map(String::from);
    let header_code = response_header(response.headers(), "x-ms-error-code").map(String::from);

    let body = response.text().await.unwrap_or_default();
    let (body_code, body_message) = xml::parse_error_body(&body);

    let raw_code = header_code.or(body_code);
    let code = match raw_code.as_deref() {
        Some(raw) => ErrorCode::from_str(raw).unwrap_or(ErrorCode::Unrecognized),
        None => ErrorCode::from_status(status),
    };
    let message = body_message.unwrap_or_else(|| code.default_message().to_string());
    let message = match (code, raw_code) {
        (ErrorCode::Unrecognized, Some(raw)) => format!("{}: {}", raw, message),
        _ => message,
    };

    tracing::debug!(%status, %code, "blob request failed");

    let mut error = StorageError::with_message(code, message).with_status(status);
    if let Some(request_id) = request_id {
        error = error.with_request_id(request_id);
    }
    error
}

fn properties_from_headers(headers: &HeaderMap) -> StorageResult<BlobProperties> {
    let invalid = |what: &str| {
        StorageError::with_message(ErrorCode::InvalidResponse, format!("missing or invalid {}", what))
    };

    let content_length = response_header(headers, CONTENT_LENGTH.as_str())
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| invalid("Content-Length"))?;
    let last_modified = response_header(headers, "last-modified")
        .and_then(xml::parse_http_date)
        .ok_or_else(|| invalid("Last-Modified"))?;
    let etag = response_header(headers, "etag")
        .map(String::from)
        .ok_or_else(|| invalid("ETag"))?;

    let metadata = headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(META_PREFIX)?;
            Some((key.to_string(), value.to_str().ok()?.to_string()))
        })
        .collect();

    Ok(BlobProperties {
        content_length,
        content_type: response_header(headers, CONTENT_TYPE.as_str()).map(String::from),
        content_md5: response_header(headers, "content-md5").map(String::from),
        etag,
        last_modified,
        metadata,
    })
}

#[async_trait]
impl BlobBackend for HttpBackend {
    fn account(&self) -> &str {
        &self.endpoint.account
    }

    fn blob_url(&self, container: &str, blob: &str) -> String {
        format!("{}/{}/{}", self.endpoint.url, container, encode_blob_path(blob))
    }

    fn shared_key(&self) -> Option<&SharedKeyCredential> {
        self.credential.shared_key()
    }

    async fn container_exists(&self, container: &str) -> StorageResult<bool> {
        let url = self.request_url(container, None, &[("restype", "container")])?;
        self.probe(url).await
    }

    async fn create_container(&self, container: &str, options: &ContainerOptions) -> StorageResult<()> {
        let url = self.request_url(container, None, &[("restype", "container")])?;
        let mut headers = HeaderMap::new();
        insert_metadata(&mut headers, &options.metadata)?;
        self.send(Method::PUT, url, headers, Some(Bytes::new())).await?;
        Ok(())
    }

    async fn delete_container(&self, container: &str) -> StorageResult<()> {
        let url = self.request_url(container, None, &[("restype", "container")])?;
        self.send(Method::DELETE, url, HeaderMap::new(), None).await?;
        Ok(())
    }

    async fn blob_exists(&self, container: &str, blob: &str) -> StorageResult<bool> {
        let url = self.request_url(container, Some(blob), &[])?;
        self.probe(url).await
    }

    async fn get_blob(&self, container: &str, blob: &str) -> StorageResult<Bytes> {
        let url = self.request_url(container, Some(blob), &[])?;
        let response = self.send(Method::GET, url, HeaderMap::new(), None).await?;
        Ok(response.bytes().await?)
    }

    async fn get_blob_stream(&self, container: &str, blob: &str) -> StorageResult<ByteStream> {
        let url = self.request_url(container, Some(blob), &[])?;
        let response = self.send(Method::GET, url, HeaderMap::new(), None).await?;
        Ok(response.bytes_stream().map_err(StorageError::from).boxed())
    }

    async fn put_blob(
        &self,
        container: &str,
        blob: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> StorageResult<()> {
        let url = self.request_url(container, Some(blob), &[])?;
        let mut headers = HeaderMap::new();
        headers.insert("x-ms-blob-type", HeaderValue::from_static("BlockBlob"));
        if let Some(ref content_type) = options.content_type {
            headers.insert(CONTENT_TYPE, header_value(content_type)?);
        }
        insert_metadata(&mut headers, &options.metadata)?;
        self.send(Method::PUT, url, headers, Some(data)).await?;
        Ok(())
    }

    async fn get_properties(&self, container: &str, blob: &str) -> StorageResult<BlobProperties> {
        let url = self.request_url(container, Some(blob), &[])?;
        let response = self.send(Method::HEAD, url, HeaderMap::new(), None).await?;
        properties_from_headers(response.headers())
    }

    async fn delete_blob(&self, container: &str, blob: &str) -> StorageResult<()> {
        let url = self.request_url(container, Some(blob), &[])?;
        self.send(Method::DELETE, url, HeaderMap::new(), None).await?;
        Ok(())
    }

    async fn copy_from_url(&self, container: &str, blob: &str, source_url: &str) -> StorageResult<()> {
        let url = self.request_url(container, Some(blob), &[])?;
        let mut headers = HeaderMap::new();
        headers.insert("x-ms-copy-source", header_value(source_url)?);
        headers.insert("x-ms-requires-sync", HeaderValue::from_static("true"));
        self.send(Method::PUT, url, headers, Some(Bytes::new())).await?;
        Ok(())
    }

    async fn put_block(
        &self,
        container: &str,
        blob: &str,
        block_id: &str,
        data: Bytes,
    ) -> StorageResult<()> {
        let url = self.request_url(
            container,
            Some(blob),
            &[("comp", "block"), ("blockid", block_id)],
        )?;
        self.send(Method::PUT, url, HeaderMap::new(), Some(data)).await?;
        Ok(())
    }

    async fn put_block_list(
        &self,
        container: &str,
        blob: &str,
        block_ids: &[String],
        options: &PutOptions,
    ) -> StorageResult<()> {
        let url = self.request_url(container, Some(blob), &[("comp", "blocklist")])?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/xml"));
        if let Some(ref content_type) = options.content_type {
            headers.insert("x-ms-blob-content-type", header_value(content_type)?);
        }
        insert_metadata(&mut headers, &options.metadata)?;
        let body = Bytes::from(xml::serialize_block_list(block_ids));
        self.send(Method::PUT, url, headers, Some(body)).await?;
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
        let maxresults = maxresults.map(|m| m.to_string());
        let mut query = vec![("restype", "container"), ("comp", "list")];
        if let Some(prefix) = prefix.filter(|p| !p.is_empty()) {
            query.push(("prefix", prefix));
        }
        if let Some(delimiter) = delimiter {
            query.push(("delimiter", delimiter));
        }
        if let Some(marker) = marker.filter(|m| !m.is_empty()) {
            query.push(("marker", marker));
        }
        if let Some(ref maxresults) = maxresults {
            query.push(("maxresults", maxresults));
        }

        let url = self.request_url(container, None, &query)?;
        let response = self.send(Method::GET, url, HeaderMap::new(), None).await?;
        let body = response.text().await?;
        xml::parse_blob_list(&body)
    }
}
