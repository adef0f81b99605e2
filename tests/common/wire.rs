//! XML bodies the test endpoint reads and writes.

use quick_xml::events::Event;
use quick_xml::Reader;

use azure_drive::models::ListBlobsPage;
use azure_drive::xml::format_http_date;
use azure_drive::{ErrorCode, StorageError, StorageResult};

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Block ids of a Put Block List body, in document order.
pub fn parse_block_list(xml: &str) -> StorageResult<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut ids = Vec::new();
    let mut buf = Vec::new();
    let mut current_element: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                current_element = Some(String::from_utf8_lossy(e.name().as_ref()).to_string());
            }
            Ok(Event::End(_)) => {
                current_element = None;
            }
            Ok(Event::Text(e)) => {
                if let Some(ref elem) = current_element {
                    let block_id = e
                        .unescape()
                        .map_err(|_| StorageError::new(ErrorCode::InvalidXmlDocument))?
                        .to_string();
                    if matches!(elem.as_str(), "Latest" | "Committed" | "Uncommitted") {
                        ids.push(block_id);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(StorageError::new(ErrorCode::InvalidXmlDocument)),
            _ => {}
        }
        buf.clear();
    }

    Ok(ids)
}

/// Serializes one page of a blob listing.
pub fn serialize_blob_list(
    page: &ListBlobsPage,
    container: &str,
    prefix: Option<&str>,
    delimiter: Option<&str>,
    marker: Option<&str>,
) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="utf-8"?>"#);
    xml.push_str(&format!(
        r#"<EnumerationResults ContainerName="{}">"#,
        xml_escape(container)
    ));

    if let Some(p) = prefix {
        xml.push_str(&format!("<Prefix>{}</Prefix>", xml_escape(p)));
    }
    if let Some(m) = marker {
        xml.push_str(&format!("<Marker>{}</Marker>", xml_escape(m)));
    }
    if let Some(d) = delimiter {
        xml.push_str(&format!("<Delimiter>{}</Delimiter>", xml_escape(d)));
    }

    xml.push_str("<Blobs>");
    for blob in &page.blobs {
        xml.push_str("<Blob>");
        xml.push_str(&format!("<Name>{}</Name>", xml_escape(&blob.name)));
        xml.push_str("<Properties>");
        if let Some(ref modified) = blob.last_modified {
            xml.push_str(&format!(
                "<Last-Modified>{}</Last-Modified>",
                format_http_date(modified)
            ));
        }
        if let Some(ref etag) = blob.etag {
            xml.push_str(&format!("<Etag>{}</Etag>", xml_escape(etag)));
        }
        xml.push_str(&format!(
            "<Content-Length>{}</Content-Length>",
            blob.content_length
        ));
        if let Some(ref ct) = blob.content_type {
            xml.push_str(&format!("<Content-Type>{}</Content-Type>", xml_escape(ct)));
        }
        xml.push_str("<BlobType>BlockBlob</BlobType>");
        xml.push_str("</Properties>");
        xml.push_str("</Blob>");
    }
    for prefix in &page.prefixes {
        xml.push_str(&format!(
            "<BlobPrefix><Name>{}</Name></BlobPrefix>",
            xml_escape(prefix)
        ));
    }
    xml.push_str("</Blobs>");

    match page.next_marker {
        Some(ref nm) => xml.push_str(&format!("<NextMarker>{}</NextMarker>", xml_escape(nm))),
        None => xml.push_str("<NextMarker/>"),
    }

    xml.push_str("</EnumerationResults>");
    xml
}

/// Serializes a service error document.
pub fn serialize_error(code: ErrorCode, message: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><Error><Code>{}</Code><Message>{}</Message></Error>"#,
        code.as_str(),
        xml_escape(message)
    )
}

