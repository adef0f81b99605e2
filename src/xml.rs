//! XML bodies the Blob service client sends and reads.

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::{BlobItem, ListBlobsPage};

/// Escapes special XML characters.
fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Formats a DateTime as an HTTP date (RFC 1123).
pub fn format_http_date(dt: &DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parses an HTTP date as found in `Last-Modified` headers and listings.
pub fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Body of a Put Block List request committing `block_ids` in order.
pub fn serialize_block_list(block_ids: &[String]) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="utf-8"?>"#);
    xml.push_str("<BlockList>");
    for id in block_ids {
        xml.push_str(&format!("<Latest>{}</Latest>", xml_escape(id)));
    }
    xml.push_str("</BlockList>");
    xml
}

/// Parses one page of a List Blobs response.
pub fn parse_blob_list(xml: &str) -> StorageResult<ListBlobsPage> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut page = ListBlobsPage::default();
    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut current: Option<BlobItem> = None;

    let invalid = || {
        StorageError::with_message(ErrorCode::InvalidResponse, "malformed blob listing")
    };

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "Blob" && path.last().map(String::as_str) == Some("Blobs") {
                    current = Some(BlobItem {
                        name: String::new(),
                        content_length: 0,
                        content_type: None,
                        etag: None,
                        last_modified: None,
                    });
                }
                path.push(name);
            }
            Ok(Event::End(_)) => {
                if path.pop().as_deref() == Some("Blob") {
                    if let Some(blob) = current.take() {
                        page.blobs.push(blob);
                    }
                }
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().map_err(|_| invalid())?.to_string();
                let depth = path.len();
                let leaf = path.last().map(String::as_str).unwrap_or("");
                let parent = if depth >= 2 { path[depth - 2].as_str() } else { "" };

                match (parent, leaf) {
                    ("Blob", "Name") => {
                        if let Some(ref mut blob) = current {
                            blob.name = text;
                        }
                    }
                    ("Properties", field) => {
                        if let Some(ref mut blob) = current {
                            match field {
                                "Content-Length" => {
                                    blob.content_length = text.parse().map_err(|_| invalid())?
                                }
                                "Content-Type" => blob.content_type = Some(text),
                                "Etag" => blob.etag = Some(text),
                                "Last-Modified" => blob.last_modified = parse_http_date(&text),
                                _ => {}
                            }
                        }
                    }
                    ("BlobPrefix", "Name") => page.prefixes.push(text),
                    ("EnumerationResults", "NextMarker") if !text.is_empty() => {
                        page.next_marker = Some(text)
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(invalid()),
            _ => {}
        }
        buf.clear();
    }

    Ok(page)
}

/// Extracts `(Code, Message)` from a service error document.
pub fn parse_error_body(xml: &str) -> (Option<String>, Option<String>) {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut current_element: Option<String> = None;
    let mut code = None;
    let mut message = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                current_element = Some(String::from_utf8_lossy(e.name().as_ref()).to_string());
            }
            Ok(Event::End(_)) => {
                current_element = None;
            }
            Ok(Event::Text(e)) => {
                if let (Some(elem), Ok(text)) = (current_element.as_deref(), e.unescape()) {
                    match elem {
                        "Code" => code = Some(text.to_string()),
                        "Message" => message = Some(text.to_string()),
                        _ => {}
                    }
                }
            }
            // Error bodies are best effort
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    (code, message)
}
