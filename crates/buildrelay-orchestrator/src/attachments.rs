//! Attachment decoding
//!
//! `data:` URIs are decoded at admission. http(s) URLs are only recorded
//! there; a worker fetches them before generation, and each takes its media
//! type from the response.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use buildrelay_utils::types::{Attachment, RemoteAttachment};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::request::AttachmentRef;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Decode `data:<media>[;base64],<data>`.
///
/// A missing media type means `text/plain`, matching the data URI default.
///
/// # Errors
///
/// Returns a description of what is wrong with the URI.
pub fn decode_data_uri(name: &str, uri: &str) -> Result<Attachment, String> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| format!("attachment '{name}' is not a data URI"))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| format!("attachment '{name}' data URI has no ',' separator"))?;

    let (media, is_base64) = match meta.strip_suffix(";base64") {
        Some(media) => (media, true),
        None => (meta, false),
    };
    // Parameters such as `;charset=utf-8` are not part of the media type.
    let media = media.split(';').next().unwrap_or_default().trim();
    let media_type = if media.is_empty() {
        "text/plain".to_string()
    } else {
        media.to_ascii_lowercase()
    };

    let data = if is_base64 {
        let compact: String = payload.split_whitespace().collect();
        STANDARD
            .decode(compact)
            .map_err(|e| format!("attachment '{name}' has invalid base64: {e}"))?
    } else {
        percent_decode(payload)
    };

    Ok(Attachment {
        name: name.to_string(),
        media_type,
        data,
    })
}

fn percent_decode(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let (Some(hi), Some(lo)) = (
                char::from(bytes[i + 1]).to_digit(16),
                char::from(bytes[i + 2]).to_digit(16),
            )
        {
            out.push((hi * 16 + lo) as u8);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

/// Decode inline attachments and set aside the ones that need fetching.
///
/// Does no I/O, so admission can call it without waiting on the network.
///
/// # Errors
///
/// Returns a description of the first malformed data URI or unsupported
/// URL scheme.
pub fn split_attachments(
    refs: &[AttachmentRef],
) -> Result<(Vec<Attachment>, Vec<RemoteAttachment>), String> {
    let mut inline = Vec::new();
    let mut remote = Vec::new();
    for attachment in refs {
        if attachment.url.starts_with("data:") {
            inline.push(decode_data_uri(&attachment.name, &attachment.url)?);
        } else if attachment.url.starts_with("http://") || attachment.url.starts_with("https://")
        {
            remote.push(RemoteAttachment {
                name: attachment.name.clone(),
                url: attachment.url.clone(),
            });
        } else {
            return Err(format!(
                "attachment '{}' must be a data URI or http(s) URL",
                attachment.name
            ));
        }
    }
    Ok((inline, remote))
}

/// Fetches URL attachments into owned bytes.
#[derive(Clone)]
pub struct AttachmentResolver {
    client: Client,
}

impl AttachmentResolver {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Fetch every remote attachment in order, failing on the first bad one.
    ///
    /// # Errors
    ///
    /// Returns a description of the first attachment that could not be
    /// fetched.
    pub async fn fetch_all(&self, remote: &[RemoteAttachment]) -> Result<Vec<Attachment>, String> {
        let mut out = Vec::with_capacity(remote.len());
        for attachment in remote {
            let fetched = self.fetch(attachment).await?;
            debug!(
                name = %fetched.name,
                media_type = %fetched.media_type,
                bytes = fetched.data.len(),
                "Fetched attachment"
            );
            out.push(fetched);
        }
        Ok(out)
    }

    async fn fetch(&self, attachment: &RemoteAttachment) -> Result<Attachment, String> {
        let response = self
            .client
            .get(&attachment.url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| format!("fetching attachment '{}' failed: {e}", attachment.name))?;
        if !response.status().is_success() {
            return Err(format!(
                "fetching attachment '{}' returned {}",
                attachment.name,
                response.status().as_u16()
            ));
        }
        let media_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_ascii_lowercase())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let data = response
            .bytes()
            .await
            .map_err(|e| format!("reading attachment '{}' failed: {e}", attachment.name))?;
        Ok(Attachment {
            name: attachment.name.clone(),
            media_type,
            data: data.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_image_uri_decodes() {
        let a = decode_data_uri("dot.png", "data:image/png;base64,iVBORw0KGgo=").unwrap();
        assert_eq!(a.media_type, "image/png");
        assert_eq!(&a.data[1..4], b"PNG");
        assert!(a.is_image());
    }

    #[test]
    fn plain_uri_is_percent_decoded_text() {
        let a = decode_data_uri("n.txt", "data:,hello%20world").unwrap();
        assert_eq!(a.media_type, "text/plain");
        assert_eq!(a.data, b"hello world");
    }

    #[test]
    fn charset_parameter_is_dropped_from_media_type() {
        let a = decode_data_uri("d.csv", "data:text/csv;charset=utf-8;base64,YSxi").unwrap();
        assert_eq!(a.media_type, "text/csv");
        assert_eq!(a.data, b"a,b");
    }

    #[test]
    fn malformed_uris_are_rejected() {
        assert!(decode_data_uri("x", "data:image/png;base64").is_err());
        assert!(decode_data_uri("x", "data:image/png;base64,@@@").is_err());
        assert!(decode_data_uri("x", "https://example.com").is_err());
    }

    fn attachment(name: &str, url: &str) -> AttachmentRef {
        AttachmentRef {
            name: name.into(),
            url: url.into(),
        }
    }

    #[test]
    fn urls_are_set_aside_and_data_uris_decoded() {
        let refs = [
            attachment("logo.png", "https://example.com/logo.png"),
            attachment("n.txt", "data:,hi"),
        ];
        let (inline, remote) = split_attachments(&refs).unwrap();
        assert_eq!(inline.len(), 1);
        assert_eq!(inline[0].data, b"hi");
        assert_eq!(
            remote,
            vec![RemoteAttachment {
                name: "logo.png".into(),
                url: "https://example.com/logo.png".into(),
            }]
        );
    }

    #[test]
    fn non_http_urls_are_refused() {
        let refs = [attachment("x", "file:///etc/passwd")];
        assert!(split_attachments(&refs).is_err());
    }

    #[tokio::test]
    async fn unreachable_url_fails_the_fetch() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/a.png", listener.local_addr().unwrap());
        drop(listener);

        let resolver = AttachmentResolver::new(Client::new());
        let err = resolver
            .fetch_all(&[RemoteAttachment {
                name: "a.png".into(),
                url,
            }])
            .await
            .unwrap_err();
        assert!(err.contains("a.png"), "{err}");
    }
}
