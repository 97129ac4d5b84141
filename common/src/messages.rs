//! Wire codec for the P2P-CI protocol.
//!
//! Two framings coexist. Control frames between a peer and the server are
//! a one-byte type tag followed by a JSON object and a terminating `\n`.
//! Peer-to-peer GET responses are a JSON header followed immediately by
//! the raw file bytes, with a final `\n` at the very end of the stream;
//! the header/body boundary is found by brace counting, never by trusting
//! `ContentLength`.

use anyhow::{bail, ensure, Result};
use serde::{Deserialize, Serialize};

pub const ADD_TAG: u8 = 1;
pub const LIST_TAG: u8 = 2;
pub const LOOKUP_TAG: u8 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddRequest {
    #[serde(rename = "RFC_Number")]
    pub rfc_number: String,
    #[serde(rename = "RFC_Title")]
    pub rfc_title: String,
    #[serde(rename = "Client_IP")]
    pub client_ip: String,
    #[serde(rename = "Client_Upload_Port")]
    pub client_upload_port: String,
    #[serde(rename = "Client_Application_Version")]
    pub client_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupRequest {
    #[serde(rename = "RFC_Number")]
    pub rfc_number: String,
    #[serde(rename = "RFC_Title")]
    pub rfc_title: String,
    #[serde(rename = "Client_IP")]
    pub client_ip: String,
    #[serde(rename = "Client_Upload_Port")]
    pub client_upload_port: String,
    #[serde(rename = "Client_Application_Version")]
    pub client_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListRequest {
    #[serde(rename = "Client_IP")]
    pub client_ip: String,
    #[serde(rename = "Client_Upload_Port")]
    pub client_upload_port: String,
    #[serde(rename = "Client_Application_Version")]
    pub client_version: String,
}

/// A decoded server-bound control frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Add(AddRequest),
    List(ListRequest),
    Lookup(LookupRequest),
}

impl Request {
    fn tag(&self) -> u8 {
        match self {
            Self::Add(_) => ADD_TAG,
            Self::List(_) => LIST_TAG,
            Self::Lookup(_) => LOOKUP_TAG,
        }
    }

    pub fn client_version(&self) -> &str {
        match self {
            Self::Add(r) => &r.client_version,
            Self::List(r) => &r.client_version,
            Self::Lookup(r) => &r.client_version,
        }
    }

    /// Decodes a full control frame (tag byte, JSON payload, trailing
    /// newline). `Ok(None)` means the tag is unknown and the frame should
    /// be skipped; a decode error means the frame is malformed.
    pub fn decode(frame: &[u8]) -> Result<Option<Self>> {
        ensure!(frame.len() >= 2, "frame too short");
        let payload = frame[1..].strip_suffix(b"\n").unwrap_or(&frame[1..]);
        let req = match frame[0] {
            ADD_TAG => Self::Add(serde_json::from_slice(payload)?),
            LIST_TAG => Self::List(serde_json::from_slice(payload)?),
            LOOKUP_TAG => Self::Lookup(serde_json::from_slice(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(req))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = match self {
            Self::Add(r) => serde_json::to_vec(r)?,
            Self::List(r) => serde_json::to_vec(r)?,
            Self::Lookup(r) => serde_json::to_vec(r)?,
        };
        let mut frame = Vec::with_capacity(payload.len() + 2);
        frame.push(self.tag());
        frame.extend_from_slice(&payload);
        frame.push(b'\n');
        Ok(frame)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseHeader {
    #[serde(rename = "Response_Code")]
    pub code: u16,
    #[serde(rename = "Response_Phrase")]
    pub phrase: String,
    #[serde(rename = "Server_Application_Version")]
    pub server_version: String,
}

/// One row of a server response: an RFC and the peer that holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRow {
    #[serde(rename = "RFC_Number")]
    pub rfc_number: String,
    #[serde(rename = "RFC_Title")]
    pub rfc_title: String,
    #[serde(rename = "Client_IP")]
    pub client_ip: String,
    #[serde(rename = "Client_Upload_Port")]
    pub client_upload_port: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerResponse {
    #[serde(rename = "Header")]
    pub header: ResponseHeader,
    #[serde(rename = "Data")]
    pub data: Vec<ResponseRow>,
}

impl ServerResponse {
    pub fn new(code: u16, phrase: &str, data: Vec<ResponseRow>) -> Self {
        Self {
            header: ResponseHeader {
                code,
                phrase: phrase.to_owned(),
                server_version: crate::APPLICATION_VERSION.to_owned(),
            },
            data,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut frame = serde_json::to_vec(self)?;
        frame.push(b'\n');
        Ok(frame)
    }

    pub fn decode(frame: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(frame)?)
    }
}

/// Peer-to-peer GET request, sent as a single JSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetRequest {
    #[serde(rename = "RFC_Number")]
    pub rfc_number: String,
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Peer_IP")]
    pub peer_ip: String,
    #[serde(rename = "Peer_OS")]
    pub peer_os: String,
}

impl GetRequest {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut frame = serde_json::to_vec(self)?;
        frame.push(b'\n');
        Ok(frame)
    }

    pub fn decode(frame: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(frame)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetResponseHeader {
    #[serde(rename = "PeerApplicationVersion")]
    pub peer_version: String,
    #[serde(rename = "Status")]
    pub status: u16,
    #[serde(rename = "Phrase")]
    pub phrase: String,
    #[serde(rename = "CurrentDateandTime")]
    pub date: String,
    #[serde(rename = "OS")]
    pub os: String,
    #[serde(rename = "LastModifiedDateandTime")]
    pub last_modified: String,
    #[serde(rename = "ContentLength")]
    pub content_length: String,
    #[serde(rename = "ContentType")]
    pub content_type: String,
}

/// Encodes a peer GET response: header JSON, raw body bytes, and the
/// end-of-stream newline sentinel.
pub fn encode_get_response(header: &GetResponseHeader, body: &[u8]) -> Result<Vec<u8>> {
    let mut frame = serde_json::to_vec(header)?;
    frame.extend_from_slice(body);
    frame.push(b'\n');
    Ok(frame)
}

/// Splits a complete peer GET response into header and body.
///
/// The boundary is the first position where the brace balance returns to
/// zero; the header JSON is brace-balanced, so everything after that point
/// (minus the sentinel newline) is the body.
pub fn split_get_response(stream: &[u8]) -> Result<(GetResponseHeader, &[u8])> {
    ensure!(stream.first() == Some(&b'{'), "response does not start with a header");
    let mut depth = 0i64;
    let mut header_end = None;
    for (i, b) in stream.iter().enumerate() {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    header_end = Some(i + 1);
                    break;
                }
            }
            _ => {}
        }
    }
    let Some(header_end) = header_end else {
        bail!("unterminated header");
    };
    let header: GetResponseHeader = serde_json::from_slice(&stream[..header_end])?;
    let body = &stream[header_end..];
    let body = body.strip_suffix(b"\n").unwrap_or(body);
    Ok((header, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_request() -> AddRequest {
        AddRequest {
            rfc_number: "7230".to_owned(),
            rfc_title: "HTTP1.1".to_owned(),
            client_ip: "10.0.0.1:50000".to_owned(),
            client_upload_port: "4500".to_owned(),
            client_version: "P2P-CI/1.0".to_owned(),
        }
    }

    #[test]
    fn add_round_trip() -> Result<()> {
        let req = Request::Add(add_request());
        let frame = req.encode()?;
        assert_eq!(ADD_TAG, frame[0]);
        assert_eq!(Some(&b'\n'), frame.last());
        assert_eq!(Some(req), Request::decode(&frame)?);
        Ok(())
    }

    #[test]
    fn add_wire_field_names() -> Result<()> {
        let frame = Request::Add(add_request()).encode()?;
        let payload = std::str::from_utf8(&frame[1..frame.len() - 1])?;
        for key in [
            "RFC_Number",
            "RFC_Title",
            "Client_IP",
            "Client_Upload_Port",
            "Client_Application_Version",
        ] {
            assert!(payload.contains(key), "missing {key} in {payload}");
        }
        Ok(())
    }

    #[test]
    fn list_round_trip() -> Result<()> {
        let req = Request::List(ListRequest {
            client_ip: "10.0.0.2:50001".to_owned(),
            client_upload_port: "4501".to_owned(),
            client_version: "P2P-CI/1.0".to_owned(),
        });
        let frame = req.encode()?;
        assert_eq!(LIST_TAG, frame[0]);
        assert_eq!(Some(req), Request::decode(&frame)?);
        Ok(())
    }

    #[test]
    fn lookup_round_trip() -> Result<()> {
        let req = Request::Lookup(LookupRequest {
            rfc_number: "9110".to_owned(),
            rfc_title: "Semantics".to_owned(),
            client_ip: "10.0.0.1:50000".to_owned(),
            client_upload_port: "4500".to_owned(),
            client_version: "P2P-CI/1.0".to_owned(),
        });
        assert_eq!(Some(req.clone()), Request::decode(&req.encode()?)?);
        Ok(())
    }

    #[test]
    fn unknown_tag_is_skipped() -> Result<()> {
        assert_eq!(None, Request::decode(b"\x09{}\n")?);
        Ok(())
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(Request::decode(b"\x01{not json}\n").is_err());
        assert!(Request::decode(b"\x01").is_err());
    }

    #[test]
    fn server_response_round_trip() -> Result<()> {
        let resp = ServerResponse::new(
            200,
            "OK",
            vec![ResponseRow {
                rfc_number: "7230".to_owned(),
                rfc_title: "HTTP1.1".to_owned(),
                client_ip: "10.0.0.1".to_owned(),
                client_upload_port: "4500".to_owned(),
            }],
        );
        let frame = resp.encode()?;
        assert_eq!(Some(&b'\n'), frame.last());
        assert_eq!(resp, ServerResponse::decode(&frame)?);
        Ok(())
    }

    #[test]
    fn server_response_envelope_names() -> Result<()> {
        let frame = ServerResponse::new(404, "Not Found", vec![]).encode()?;
        let text = std::str::from_utf8(&frame)?;
        assert!(text.contains("\"Header\""));
        assert!(text.contains("\"Data\":[]"));
        assert!(text.contains("\"Response_Code\":404"));
        Ok(())
    }

    fn get_header(status: u16, body_len: usize) -> GetResponseHeader {
        GetResponseHeader {
            peer_version: "P2P-CI/1.0".to_owned(),
            status,
            phrase: crate::status_phrase(status).to_owned(),
            date: "Sat, 01 Aug 2026 12:00:00 +0000".to_owned(),
            os: "linux".to_owned(),
            last_modified: "Fri, 31 Jul 2026 09:30:00 +0000".to_owned(),
            content_length: body_len.to_string(),
            content_type: "text/plain".to_owned(),
        }
    }

    #[test]
    fn get_response_split() -> Result<()> {
        let header = get_header(200, 5);
        let frame = encode_get_response(&header, b"hello")?;
        let (decoded, body) = split_get_response(&frame)?;
        assert_eq!(header, decoded);
        assert_eq!(b"hello", body);
        Ok(())
    }

    #[test]
    fn get_response_split_ignores_braces_in_body() -> Result<()> {
        // Body braces sit below balance zero and must not move the boundary.
        let body = b"}{ not a header }{\nsecond line\n";
        let header = get_header(200, body.len());
        let frame = encode_get_response(&header, body)?;
        let (decoded, split_body) = split_get_response(&frame)?;
        assert_eq!(header, decoded);
        assert_eq!(body.as_slice(), split_body);
        Ok(())
    }

    #[test]
    fn get_response_split_empty_body() -> Result<()> {
        let header = get_header(404, 0);
        let frame = encode_get_response(&header, b"")?;
        let (decoded, body) = split_get_response(&frame)?;
        assert_eq!(header, decoded);
        assert!(body.is_empty());
        Ok(())
    }

    #[test]
    fn get_response_split_rejects_garbage() {
        assert!(split_get_response(b"hello\n").is_err());
        assert!(split_get_response(b"{\"Status\":").is_err());
    }

    #[test]
    fn get_request_round_trip() -> Result<()> {
        let req = GetRequest {
            rfc_number: "9110".to_owned(),
            version: "P2P-CI/1.0".to_owned(),
            peer_ip: "10.0.0.2:51000".to_owned(),
            peer_os: "linux".to_owned(),
        };
        let frame = req.encode()?;
        assert_eq!(Some(&b'\n'), frame.last());
        assert_eq!(req, GetRequest::decode(&frame[..frame.len() - 1])?);
        Ok(())
    }
}
