//! Stdin command grammar and execution.
//!
//! ADD/LOOKUP/LIST go to the server over the control channel; GET opens a
//! direct connection to the peer named in the `Host:` header.

use anyhow::{bail, ensure, Context, Result};
use p2p_ci_common::messages::{
    split_get_response, AddRequest, GetRequest, GetResponseHeader, ListRequest, LookupRequest,
    Request, ServerResponse,
};
use p2p_ci_common::{
    read_next_line, write_frame, PEER_RESPONSE_TIMEOUT, SERVER_RESPONSE_TIMEOUT,
};
use std::collections::HashMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Add {
        number: String,
        title: String,
        host: String,
        port: String,
        version: String,
    },
    Lookup {
        number: String,
        title: String,
        host: String,
        port: String,
        version: String,
    },
    List {
        host: String,
        port: String,
        version: String,
    },
    Get {
        number: String,
        version: String,
        /// `ip:port` of the peer to fetch from.
        target: String,
        os: String,
    },
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

/// `Key:Value` tokens may appear in any order after the version.
fn parse_headers(parts: &[&str]) -> HashMap<String, String> {
    parts
        .iter()
        .filter_map(|part| part.split_once(':'))
        .map(|(key, value)| (key.trim().to_owned(), value.trim().to_owned()))
        .collect()
}

fn required(headers: &HashMap<String, String>, key: &str) -> Result<String> {
    headers
        .get(key)
        .cloned()
        .with_context(|| format!("missing {key} header"))
}

pub fn parse_command(input: &str) -> Result<Command> {
    let parts: Vec<&str> = input.split_whitespace().collect();
    ensure!(!parts.is_empty(), "empty command");

    let method = parts[0].to_ascii_uppercase();
    match method.as_str() {
        "ADD" | "LOOKUP" => {
            ensure!(parts.len() >= 4, "insufficient arguments");
            ensure!(parts[1] == "RFC", "{method} requires the RFC parameter");
            let number = parts[2];
            ensure!(is_numeric(number), "RFC number must be numeric");
            let version = parts[3].to_owned();
            let headers = parse_headers(&parts[4..]);
            let host = required(&headers, "Host")?;
            let port = required(&headers, "Port")?;
            let title = required(&headers, "Title")?;
            if method == "ADD" {
                Ok(Command::Add {
                    number: number.to_owned(),
                    title,
                    host,
                    port,
                    version,
                })
            } else {
                Ok(Command::Lookup {
                    number: number.to_owned(),
                    title,
                    host,
                    port,
                    version,
                })
            }
        }
        "LIST" => {
            ensure!(parts.len() >= 3, "insufficient arguments");
            ensure!(parts[1] == "ALL", "LIST requires the ALL parameter");
            let version = parts[2].to_owned();
            let headers = parse_headers(&parts[3..]);
            Ok(Command::List {
                host: required(&headers, "Host")?,
                port: required(&headers, "Port")?,
                version,
            })
        }
        "GET" => {
            ensure!(parts.len() >= 4, "insufficient arguments");
            ensure!(parts[1] == "RFC", "GET requires the RFC parameter");
            let number = parts[2];
            ensure!(is_numeric(number), "RFC number must be numeric");
            let version = parts[3].to_owned();
            let headers = parse_headers(&parts[4..]);
            Ok(Command::Get {
                number: number.to_owned(),
                version,
                target: required(&headers, "Host")?,
                os: required(&headers, "OS")?,
            })
        }
        other => bail!("invalid method: {other}"),
    }
}

/// Reads commands from stdin until EOF, printing each response or the
/// parse/transport error it produced. A failed command never ends the
/// session.
pub async fn interactive_loop(
    control_read: &mut (impl AsyncBufRead + Unpin),
    control_write: &mut (impl AsyncWrite + Unpin),
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match execute(control_read, control_write, &line).await {
            Ok(output) => println!("{output}"),
            Err(e) => println!("Error: {e}"),
        }
    }
    Ok(())
}

async fn execute(
    control_read: &mut (impl AsyncBufRead + Unpin),
    control_write: &mut (impl AsyncWrite + Unpin),
    input: &str,
) -> Result<String> {
    match parse_command(input)? {
        Command::Add {
            number,
            title,
            host,
            port,
            version,
        } => {
            let request = Request::Add(AddRequest {
                rfc_number: number,
                rfc_title: title,
                client_ip: host,
                client_upload_port: port,
                client_version: version,
            });
            send_request(control_read, control_write, request).await
        }
        Command::Lookup {
            number,
            title,
            host,
            port,
            version,
        } => {
            let request = Request::Lookup(LookupRequest {
                rfc_number: number,
                rfc_title: title,
                client_ip: host,
                client_upload_port: port,
                client_version: version,
            });
            send_request(control_read, control_write, request).await
        }
        Command::List {
            host,
            port,
            version,
        } => {
            let request = Request::List(ListRequest {
                client_ip: host,
                client_upload_port: port,
                client_version: version,
            });
            send_request(control_read, control_write, request).await
        }
        Command::Get {
            number,
            version,
            target,
            os,
        } => send_get(&number, &version, &target, &os).await,
    }
}

/// Sends one control frame and waits for the server's response line.
async fn send_request(
    control_read: &mut (impl AsyncBufRead + Unpin),
    control_write: &mut (impl AsyncWrite + Unpin),
    request: Request,
) -> Result<String> {
    write_frame(control_write, &request.encode()?).await?;
    let line = timeout(SERVER_RESPONSE_TIMEOUT, read_next_line(control_read))
        .await
        .context("timed out waiting for server response")??;
    let response = ServerResponse::decode(&line)?;
    Ok(format_server_response(&response))
}

/// Fetches an RFC directly from another peer.
async fn send_get(number: &str, version: &str, target: &str, os: &str) -> Result<String> {
    let stream = TcpStream::connect(target)
        .await
        .with_context(|| format!("connecting to peer {target}"))?;
    let local_addr = stream.local_addr()?;
    let (mut read, mut write) = stream.into_split();

    let request = GetRequest {
        rfc_number: number.to_owned(),
        version: version.to_owned(),
        peer_ip: local_addr.to_string(),
        peer_os: os.to_owned(),
    };
    write_frame(&mut write, &request.encode()?).await?;
    info!(number, target, "GET request sent");

    let mut raw = Vec::new();
    timeout(PEER_RESPONSE_TIMEOUT, read.read_to_end(&mut raw))
        .await
        .context("timed out waiting for peer response")??;
    let (header, body) = split_get_response(&raw)?;
    Ok(format_get_response(&header, body))
}

pub fn format_server_response(response: &ServerResponse) -> String {
    let mut out = format!(
        "{} {} {}\r\n",
        response.header.server_version, response.header.code, response.header.phrase
    );
    for row in &response.data {
        out.push_str(&format!(
            "{} {} {} {}\r\n",
            row.rfc_number, row.rfc_title, row.client_ip, row.client_upload_port
        ));
    }
    out
}

pub fn format_get_response(header: &GetResponseHeader, body: &[u8]) -> String {
    let mut out = format!(
        "{} {} {}\r\n",
        header.peer_version, header.status, header.phrase
    );
    out.push_str(&format!("Date: {}\r\n", header.date));
    out.push_str(&format!("OS: {}\r\n", header.os));
    out.push_str(&format!("Last-Modified: {}\r\n", header.last_modified));
    out.push_str(&format!("Content-Length: {}\r\n", header.content_length));
    out.push_str(&format!("Content-Type: {}\r\n", header.content_type));
    out.push_str("\r\n");
    out.push_str(&String::from_utf8_lossy(body));
    out
}
