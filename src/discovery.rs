//! Parsing for the ElastiCache auto-discovery extension.
//!
//! A configuration endpoint answers `config get cluster` with a version
//! line and one line of space-separated `<fqdn>|<ip>|<port>` node
//! descriptors, terminated by `\n\r\nEND\r\n`. The parsed endpoints feed
//! straight into [`HashClient`](crate::hash::HashClient).

use crate::client::Client;
use crate::error::Error;
use crate::serde::Serde;
use crate::transport::{ServerEndpoint, Transport};

/// Terminator of a `config get cluster` response.
pub const CONFIG_END_TOKEN: &[u8] = b"\n\r\nEND\r\n";

/// Ask a configuration endpoint for the cluster layout. `use_vpc`
/// selects each node's IP over its FQDN.
pub fn fetch_cluster_config<S: Serde, T: Transport>(
    client: &mut Client<S, T>,
    use_vpc: bool,
) -> Result<Vec<ServerEndpoint>, Error> {
    let payload = client.raw_command(b"config get cluster", CONFIG_END_TOKEN)?;
    parse_cluster_config(&payload, use_vpc)
}

/// Parse a `config get cluster` payload. The descriptor list is the
/// last content line before the terminator.
pub fn parse_cluster_config(payload: &[u8], use_vpc: bool) -> Result<Vec<ServerEndpoint>, Error> {
    let mut lines: Vec<&[u8]> = payload
        .split(|&b| b == b'\n')
        .map(strip_cr)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.last() == Some(&&b"END"[..]) {
        lines.pop();
    }
    let descriptors = match lines.last() {
        Some(line) => *line,
        None => return Err(Error::Unknown("empty cluster config".to_string())),
    };

    let mut servers = Vec::new();
    for descriptor in descriptors.split(|&b| b == b' ').filter(|d| !d.is_empty()) {
        let mut parts = descriptor.split(|&b| b == b'|');
        let fqdn = parts.next().unwrap_or(b"");
        let ip = parts.next().unwrap_or(b"");
        let port = parts
            .next()
            .and_then(|p| std::str::from_utf8(p).ok())
            .and_then(|p| p.trim().parse::<u16>().ok());

        let host = if use_vpc { ip } else { fqdn };
        let host = std::str::from_utf8(host).map_err(|_| bad_descriptor(descriptor))?;
        match port {
            Some(port) if !host.is_empty() => servers.push(ServerEndpoint::tcp(host, port)),
            _ => return Err(bad_descriptor(descriptor)),
        }
    }
    Ok(servers)
}

fn bad_descriptor(descriptor: &[u8]) -> Error {
    Error::Unknown(format!(
        "bad cluster descriptor: {}",
        String::from_utf8_lossy(descriptor)
    ))
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((&b'\r', rest)) => rest,
        _ => line,
    }
}
