//! The Profile Acquirer: opens a transient port-forward to a target
//! instance and issues pprof HTTP GETs against it.

use crate::crd::ProfileKind;
use crate::error::{Error, Result};
use crate::instance::Instance;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::Client;
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

const PORT_FORWARD_READY_TIMEOUT: Duration = Duration::from_secs(10);
const PROFILE_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// A single captured profile.
#[derive(Debug, Clone)]
pub struct Profile {
    pub kind: ProfileKind,
    pub bytes: Vec<u8>,
    pub captured_at: SystemTime,
}

/// Capture profiles for every kind in `kinds`, preserving their order.
/// Any failure aborts the whole capture; no partial success across kinds
///.
pub async fn capture(client: &Client, instance: &Instance, kinds: &[ProfileKind]) -> Result<Vec<Profile>> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), &instance.key.namespace);
    let port = instance.profile_port();

    let mut forwarder = timeout(
        PORT_FORWARD_READY_TIMEOUT,
        pods.portforward(&instance.key.name, &[port]),
    )
    .await
    .map_err(|_| Error::PortForward("timed out waiting for tunnel readiness".to_string()))?
    .map_err(|e| Error::PortForward(e.to_string()))?;

    let mut stream = forwarder
        .take_stream(port)
        .ok_or_else(|| Error::PortForward("no stream for forwarded port".to_string()))?;

    let mut profiles = Vec::with_capacity(kinds.len());
    for kind in kinds {
        let bytes = timeout(PROFILE_HTTP_TIMEOUT, fetch_pprof(&mut stream, *kind))
            .await
            .map_err(|_| Error::ProfileHttp(format!("{} capture timed out", kind.label())))??;
        profiles.push(Profile {
            kind: *kind,
            bytes,
            captured_at: SystemTime::now(),
        });
    }

    drop(stream);
    if let Some(result) = forwarder.join().await.err() {
        return Err(Error::PortForward(result.to_string()));
    }

    Ok(profiles)
}

/// Issue a single pprof HTTP GET over an already-established port-forward
/// stream and return the response body. Any non-success status aborts the
/// capture.
async fn fetch_pprof<S>(stream: &mut S, kind: ProfileKind) -> Result<Vec<u8>>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        kind.path()
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| Error::ProfileHttp(e.to_string()))?;

    let mut raw = Vec::new();
    stream
        .read_to_end(&mut raw)
        .await
        .map_err(|e| Error::ProfileHttp(e.to_string()))?;

    let header_end = find_header_end(&raw)
        .ok_or_else(|| Error::ProfileHttp("malformed HTTP response".to_string()))?;
    let status = parse_status_line(&raw[..header_end])?;
    if !(200..300).contains(&status) {
        return Err(Error::ProfileHttp(format!(
            "pprof endpoint returned status {status}"
        )));
    }

    Ok(raw[header_end..].to_vec())
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn parse_status_line(header: &[u8]) -> Result<u16> {
    let text = String::from_utf8_lossy(header);
    let line = text
        .lines()
        .next()
        .ok_or_else(|| Error::ProfileHttp("empty HTTP response".to_string()))?;
    line.split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| Error::ProfileHttp("malformed status line".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_parses_success() {
        assert_eq!(
            parse_status_line(b"HTTP/1.1 200 OK\r\n").unwrap(),
            200
        );
    }

    #[test]
    fn status_line_rejects_malformed_input() {
        assert!(parse_status_line(b"garbage").is_err());
    }

    #[test]
    fn header_end_is_found_after_blank_line() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\n\r\nBODY";
        let end = find_header_end(raw).unwrap();
        assert_eq!(&raw[end..], b"BODY");
    }

    #[test]
    fn kind_order_is_preserved_in_profile_list() {
        let kinds = vec![ProfileKind::Mutex, ProfileKind::Heap, ProfileKind::Cpu];
        let profiles: Vec<ProfileKind> = kinds
            .iter()
            .map(|k| Profile {
                kind: *k,
                bytes: vec![],
                captured_at: SystemTime::now(),
            })
            .map(|p| p.kind)
            .collect();
        assert_eq!(profiles, kinds);
    }
}
