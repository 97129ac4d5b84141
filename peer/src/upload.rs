//! Upload server: answers GET requests from other peers with file bytes.

use anyhow::Result;
use chrono::{DateTime, Utc};
use p2p_ci_common::messages::{encode_get_response, GetRequest, GetResponseHeader};
use p2p_ci_common::{
    read_next_line, status_phrase, write_frame, APPLICATION_VERSION, STATUS_NOT_FOUND, STATUS_OK,
    STATUS_VERSION_NOT_SUPPORTED,
};
use std::path::{Path, PathBuf};
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::store;

pub async fn serve(listener: TcpListener, rfc_dir: PathBuf) -> Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        info!(%addr, "incoming GET connection");
        let rfc_dir = rfc_dir.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_get(stream, &rfc_dir).await {
                warn!(%addr, error = %e, "GET connection failed");
            }
        });
    }
}

async fn handle_get(stream: TcpStream, rfc_dir: &Path) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut read = BufReader::new(read);
    let line = read_next_line(&mut read).await?;
    let request = GetRequest::decode(line.strip_suffix(b"\n").unwrap_or(&line))?;
    info!(number = %request.rfc_number, from = %request.peer_ip, "GET request");
    let response = build_response(&request, rfc_dir)?;
    write_frame(&mut write, &response).await
}

fn build_response(request: &GetRequest, rfc_dir: &Path) -> Result<Vec<u8>> {
    if request.version != APPLICATION_VERSION {
        warn!(version = %request.version, "GET version mismatch");
        return encode_get_response(&header(STATUS_VERSION_NOT_SUPPORTED, 0, String::new()), b"");
    }
    let Some(rfc) = store::find(rfc_dir, &request.rfc_number)? else {
        return encode_get_response(&header(STATUS_NOT_FOUND, 0, String::new()), b"");
    };
    let body = std::fs::read(&rfc.path)?;
    let modified: DateTime<Utc> = std::fs::metadata(&rfc.path)?.modified()?.into();
    encode_get_response(
        &header(STATUS_OK, body.len(), modified.to_rfc2822()),
        &body,
    )
}

fn header(status: u16, content_length: usize, last_modified: String) -> GetResponseHeader {
    GetResponseHeader {
        peer_version: APPLICATION_VERSION.to_owned(),
        status,
        phrase: status_phrase(status).to_owned(),
        date: Utc::now().to_rfc2822(),
        os: std::env::consts::OS.to_owned(),
        last_modified,
        content_length: content_length.to_string(),
        content_type: "text/plain".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p2p_ci_common::messages::split_get_response;

    fn request(number: &str, version: &str) -> GetRequest {
        GetRequest {
            rfc_number: number.to_owned(),
            version: version.to_owned(),
            peer_ip: "10.0.0.2:51000".to_owned(),
            peer_os: "linux".to_owned(),
        }
    }

    fn rfc_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rfc-upload-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("9110_Semantics.txt"), "hello").unwrap();
        dir
    }

    #[test]
    fn serves_file_bytes() -> Result<()> {
        let dir = rfc_dir("hit");
        let response = build_response(&request("9110", APPLICATION_VERSION), &dir)?;
        let (header, body) = split_get_response(&response)?;

        assert_eq!(STATUS_OK, header.status);
        assert_eq!("5", header.content_length);
        assert_eq!("text/plain", header.content_type);
        assert!(!header.last_modified.is_empty());
        assert_eq!(b"hello", body);

        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn unknown_rfc_is_404() -> Result<()> {
        let dir = rfc_dir("miss");
        let response = build_response(&request("404404", APPLICATION_VERSION), &dir)?;
        let (header, body) = split_get_response(&response)?;

        assert_eq!(STATUS_NOT_FOUND, header.status);
        assert_eq!("0", header.content_length);
        assert!(body.is_empty());

        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn version_mismatch_is_505() -> Result<()> {
        let dir = rfc_dir("ver");
        let response = build_response(&request("9110", "P2P-CI/2.0"), &dir)?;
        let (header, body) = split_get_response(&response)?;

        assert_eq!(STATUS_VERSION_NOT_SUPPORTED, header.status);
        assert_eq!("P2P-CI Version Not Supported", header.phrase);
        assert!(body.is_empty());

        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
