//! Bootstrap peer loading.
//!
//! Reads a file of multiaddrs (one per line) for the gossip swarm to dial on
//! startup.

use std::fs;
use std::path::Path;

use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use tracing::{debug, info, warn};

/// Load bootstrap peer multiaddrs from `path`.
///
/// Empty lines and lines starting with `#` are ignored; malformed lines are
/// logged and skipped.  A missing file yields an empty list.
///
/// ```text
/// # courier nodes
/// /ip4/10.0.0.5/udp/4001/quic-v1/p2p/12D3KooW...
/// ```
pub fn load_bootstrap_peers(path: &Path) -> Vec<Multiaddr> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read bootstrap peers file");
            return Vec::new();
        }
    };

    let lines: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();

    let addrs = parse_multiaddrs(&lines);
    info!(count = addrs.len(), path = %path.display(), "Loaded bootstrap peers");
    addrs
}

/// Parse multiaddr strings, skipping the ones that do not parse.
pub fn parse_multiaddrs(raw: &[String]) -> Vec<Multiaddr> {
    raw.iter()
        .filter_map(|s| match s.parse::<Multiaddr>() {
            Ok(addr) => {
                debug!(addr = %addr, "Parsed peer address");
                Some(addr)
            }
            Err(e) => {
                warn!(addr = %s, error = %e, "Skipping invalid multiaddr");
                None
            }
        })
        .collect()
}

/// The `/p2p/…` component of a multiaddr, if present.
pub fn extract_peer_id(addr: &Multiaddr) -> Option<PeerId> {
    addr.iter().find_map(|p| match p {
        Protocol::P2p(peer_id) => Some(peer_id),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_nonexistent_file() {
        let peers = load_bootstrap_peers(Path::new("/nonexistent/bootstrap.txt"));
        assert!(peers.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("peers.txt");

        let mut f = fs::File::create(&file_path).unwrap();
        writeln!(f, "# bootstrap nodes").unwrap();
        writeln!(f, "/ip4/127.0.0.1/udp/4001/quic-v1").unwrap();
        writeln!(f).unwrap();
        writeln!(f, "invalid-addr").unwrap();
        writeln!(f, "  /ip4/127.0.0.2/udp/4001/quic-v1  ").unwrap();
        drop(f);

        assert_eq!(load_bootstrap_peers(&file_path).len(), 2);
    }

    #[test]
    fn test_extract_peer_id() {
        let peer = PeerId::random();
        let with_peer: Multiaddr = format!("/ip4/127.0.0.1/udp/4001/quic-v1/p2p/{peer}")
            .parse()
            .unwrap();
        let without: Multiaddr = "/ip4/127.0.0.1/udp/4001/quic-v1".parse().unwrap();

        assert_eq!(extract_peer_id(&with_peer), Some(peer));
        assert_eq!(extract_peer_id(&without), None);
    }
}
