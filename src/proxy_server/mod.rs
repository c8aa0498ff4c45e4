use std::time::Duration;

use pingora::upstreams::peer::PeerOptions;

use crate::upstream::REQUEST_TIMEOUT;

pub mod http_proxy;

/// Peer options for upstream file connections. Reads and writes share the
/// index client's per-call ceiling; file bodies stream chunk-by-chunk, so
/// the read timeout bounds each chunk rather than the whole transfer.
pub fn default_peer_opts() -> PeerOptions {
    let mut po = PeerOptions::new();

    po.connection_timeout = Some(Duration::from_secs(10));
    po.total_connection_timeout = Some(Duration::from_secs(20));
    po.read_timeout = Some(REQUEST_TIMEOUT);
    po.write_timeout = Some(REQUEST_TIMEOUT);
    po.idle_timeout = Some(Duration::from_secs(60));
    po.verify_hostname = true;
    po
}
