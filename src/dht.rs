//! Kademlia DHT reactor. A single bound UDP socket both answers incoming
//! queries and drives the outgoing sampling loop, generalized from the
//! teacher's one-shot `find_peers`/`send_udp` request-response pattern
//! into the long-lived node this crawler needs.
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use sha1::{Digest, Sha1};
use tokio::net::UdpSocket;

use crate::bencode::{parse_bencoded, BencodeValue};
use crate::intake::Intake;
use crate::model::{endpoint, ErrorKind, PeerSource};
use crate::ratelimit::RateLimiter;
use crate::routing::RoutingTable;
use crate::sink::Sink;
use crate::stats::Stats;
use crate::types::{InfoHash, NodeId};

pub const BOOTSTRAP_ROUTERS: &[&str] = &[
    "router.bittorrent.com:6881",
    "dht.transmissionbt.com:6881",
    "router.utorrent.com:6881",
];

pub const TRANSACTION_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_PACKET: usize = 1 << 16;
/// `interval` advertised in our own `sample_infohashes` replies: how long a
/// querier should wait before re-sampling us (spec.md 6's mandatory
/// `{id, interval, nodes, num, samples}` reply shape).
const SAMPLE_INFOHASHES_INTERVAL_SECS: i64 = 300;

#[derive(Clone, Copy, Debug)]
enum TxKind {
    Ping,
    FindNode,
    GetPeers { info_hash: InfoHash },
    SampleInfohashes,
    AnnouncePeer { info_hash: InfoHash },
}

struct Transaction {
    kind: TxKind,
    dest: SocketAddr,
    dest_id: Option<NodeId>,
}

/// DHT node identity plus everything needed to speak krpc: the bound
/// socket, the routing table, rate limiter, and the intake layer that
/// turns discoveries into queued work.
pub struct DhtEngine {
    node_id: NodeId,
    socket: UdpSocket,
    routing: Arc<RoutingTable>,
    rate_limiter: Arc<RateLimiter>,
    intake: Arc<Intake>,
    sink: Arc<dyn Sink>,
    stats: Arc<Stats>,
    transactions: Mutex<std::collections::HashMap<Vec<u8>, (Transaction, Instant)>>,
    bep51_peers: Mutex<HashSet<NodeId>>,
    bep51_enabled: bool,
    secret: [u8; 8],
}

impl DhtEngine {
    pub async fn bind(
        port: u16,
        node_id: NodeId,
        routing: Arc<RoutingTable>,
        rate_limiter: Arc<RateLimiter>,
        intake: Arc<Intake>,
        sink: Arc<dyn Sink>,
        stats: Arc<Stats>,
        bep51_enabled: bool,
    ) -> Result<DhtEngine> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).await.context("bind dht socket")?;
        let mut secret = [0u8; 8];
        rand::RngCore::fill_bytes(&mut thread_rng(), &mut secret);
        Ok(DhtEngine {
            node_id,
            socket,
            routing,
            rate_limiter,
            intake,
            sink,
            stats,
            transactions: Mutex::new(std::collections::HashMap::new()),
            bep51_peers: Mutex::new(HashSet::new()),
            bep51_enabled,
            secret,
        })
    }

    /// Resolves the well-known bootstrap routers and sends each a
    /// `find_node` for our own id to seed the routing table.
    pub async fn bootstrap(&self, routers: &[&str]) -> Result<()> {
        for router in routers {
            match tokio::net::lookup_host(router).await {
                Ok(mut addrs) => {
                    if let Some(addr) = addrs.next() {
                        if let Err(e) = self.send_find_node(addr, None, self.node_id).await {
                            warn!("bootstrap query to {} failed: {:#}", router, e);
                        }
                    }
                }
                Err(e) => warn!("bootstrap lookup of {} failed: {:#}", router, e),
            }
        }
        Ok(())
    }

    /// Runs forever (until the socket errors), reading packets and
    /// dispatching them. Intended to be the crawler's DHT reactor task.
    pub async fn run(&self) -> Result<()> {
        let mut buf = vec![0u8; MAX_PACKET];
        loop {
            let (n, from) = self.socket.recv_from(&mut buf).await.context("dht recv_from")?;
            if let Err(e) = self.handle_packet(&buf[..n], from).await {
                trace!("dht packet from {} ignored: {:#}", from, e);
            }
        }
    }

    /// Sweeps transactions past `TRANSACTION_TIMEOUT` and marks the
    /// corresponding routing-table node as timed out. Call periodically
    /// from the maintenance task.
    pub fn expire_transactions(&self, now: Instant) {
        let mut transactions = self.transactions.lock().expect("dht poisoned");
        let expired: Vec<_> = transactions
            .iter()
            .filter(|(_, (_, sent_at))| now.duration_since(*sent_at) > TRANSACTION_TIMEOUT)
            .map(|(tx_id, _)| tx_id.clone())
            .collect();
        for tx_id in expired {
            if let Some((tx, _)) = transactions.remove(&tx_id) {
                self.stats.incr_timeouts();
                if let Some(id) = tx.dest_id {
                    self.routing.mark_timeout(&id, now);
                }
            }
        }
    }

    /// Issues the highest-preference query this tick's node selection
    /// supports, per spec.md 4.2: (a) `sample_infohashes` to a Good node
    /// already known to support BEP51; (b) `get_peers` on a priority
    /// infohash (>=3 known peers, or seen within the last 10 min); (c)
    /// only once both of those are unavailable, `get_peers` on a random
    /// 20-byte target.
    pub async fn sample_tick(&self) -> Result<()> {
        let good = self.routing.good(8);
        let Some(first) = good.first() else { return Ok(()) };

        if self.bep51_enabled {
            let bep51_peers = self.bep51_peers.lock().expect("dht poisoned").clone();
            if let Some(node) = good.iter().find(|n| bep51_peers.contains(&n.id)) {
                return self.send_sample_infohashes(node.endpoint, node.id).await;
            }
        }

        if let Some(&info_hash) = self.intake.priority_targets(Instant::now()).first() {
            return self.send_get_peers(first.endpoint, first.id, info_hash).await;
        }

        let random_target = InfoHash::new(*NodeId::random().as_bytes());
        self.send_get_peers(first.endpoint, first.id, random_target).await
    }

    async fn send(&self, dest: SocketAddr, tx_id: Vec<u8>, body: BencodeValue, kind: TxKind, dest_id: Option<NodeId>) -> Result<()> {
        let now = Instant::now();
        if !self.rate_limiter.try_acquire(now) {
            self.stats.incr_queries_blocked();
            return Ok(());
        }
        self.transactions.lock().expect("dht poisoned").insert(tx_id, (Transaction { kind, dest, dest_id }, now));
        self.stats.incr_queries_sent();
        self.socket.send_to(&body.encode(), dest).await.context("dht send_to")?;
        Ok(())
    }

    /// Refreshes a node overdue per `RoutingTable::needs_ping`.
    pub async fn send_ping(&self, dest: SocketAddr, dest_id: NodeId) -> Result<()> {
        let tx_id = random_tx_id();
        let body = query_dict(&tx_id, "ping", self.node_id, []);
        self.routing.mark_ping_sent(&dest_id, Instant::now());
        self.send(dest, tx_id, body, TxKind::Ping, Some(dest_id)).await
    }

    async fn send_find_node(&self, dest: SocketAddr, dest_id: Option<NodeId>, target: NodeId) -> Result<()> {
        let tx_id = random_tx_id();
        let body = query_dict(&tx_id, "find_node", self.node_id, [("target".to_string(), BencodeValue::String(target.as_bytes().to_vec()))]);
        self.send(dest, tx_id, body, TxKind::FindNode, dest_id).await
    }

    async fn send_get_peers(&self, dest: SocketAddr, dest_id: NodeId, info_hash: InfoHash) -> Result<()> {
        let tx_id = random_tx_id();
        let body = query_dict(
            &tx_id,
            "get_peers",
            self.node_id,
            [("info_hash".to_string(), BencodeValue::String(info_hash.as_bytes().to_vec()))],
        );
        self.send(dest, tx_id, body, TxKind::GetPeers { info_hash }, Some(dest_id)).await
    }

    async fn send_sample_infohashes(&self, dest: SocketAddr, dest_id: NodeId) -> Result<()> {
        let tx_id = random_tx_id();
        let body = query_dict(
            &tx_id,
            "sample_infohashes",
            self.node_id,
            [("target".to_string(), BencodeValue::String(NodeId::random().as_bytes().to_vec()))],
        );
        self.send(dest, tx_id, body, TxKind::SampleInfohashes, Some(dest_id)).await
    }

    fn token_for(&self, addr: &SocketAddr) -> Vec<u8> {
        let mut hasher = Sha1::new();
        hasher.update(self.secret);
        hasher.update(addr.ip().to_string().as_bytes());
        hasher.finalize()[0..4].to_vec()
    }

    async fn handle_packet(&self, buf: &[u8], from: SocketAddr) -> Result<()> {
        let (value, _) = parse_bencoded(buf.to_vec());
        let dict = value.context("non-bencoded packet")?.as_dict().context("not a dict")?.clone();
        let tx_id = dict.get("t").and_then(|v| v.as_bytes()).context("no t")?.to_vec();
        let y = dict.get("y").and_then(|v| v.as_bytes()).context("no y")?.to_vec();

        match y.as_slice() {
            b"q" => self.handle_query(&dict, &tx_id, from).await,
            b"r" => self.handle_response(&dict, &tx_id, from).await,
            b"e" => {
                self.transactions.lock().expect("dht poisoned").remove(&tx_id);
                let _ = self.sink.record_error(ErrorKind::Protocol, &format!("krpc error from {}: {:?}", from, dict.get("e")));
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn handle_query(&self, dict: &std::collections::BTreeMap<String, BencodeValue>, tx_id: &[u8], from: SocketAddr) -> Result<()> {
        let q = dict.get("q").and_then(|v| v.as_bytes()).context("no q")?.to_vec();
        let a = dict.get("a").and_then(|v| v.as_dict()).context("no a")?.clone();
        let sender_id_bytes = a.get("id").and_then(|v| v.as_bytes()).context("no id")?;
        let sender_id = NodeId::try_from(sender_id_bytes)?;
        self.routing.insert(sender_id, from, Instant::now());

        let resp = match q.as_slice() {
            b"ping" => response_dict(tx_id, self.node_id, []),
            b"find_node" => {
                let target = a.get("target").and_then(|v| v.as_bytes()).context("no target")?;
                let target: [u8; 20] = target.try_into().map_err(|_| anyhow::anyhow!("bad target len"))?;
                let nodes = encode_compact_nodes(&self.routing.closest(&target, 8));
                response_dict(tx_id, self.node_id, [("nodes".to_string(), BencodeValue::String(nodes))])
            }
            b"get_peers" => {
                let info_hash_bytes = a.get("info_hash").and_then(|v| v.as_bytes()).context("no info_hash")?;
                let info_hash: [u8; 20] = info_hash_bytes.try_into().map_err(|_| anyhow::anyhow!("bad info_hash len"))?;
                self.intake.observe(InfoHash::new(info_hash), PeerSource::IncomingQuery, None, Instant::now());
                let nodes = encode_compact_nodes(&self.routing.closest(&info_hash, 8));
                let token = self.token_for(&from);
                response_dict(
                    tx_id,
                    self.node_id,
                    [
                        ("nodes".to_string(), BencodeValue::String(nodes)),
                        ("token".to_string(), BencodeValue::String(token)),
                    ],
                )
            }
            b"announce_peer" => {
                let info_hash_bytes = a.get("info_hash").and_then(|v| v.as_bytes()).context("no info_hash")?;
                let info_hash = InfoHash::try_from(info_hash_bytes)?;
                let expected_token = self.token_for(&from);
                let given_token = a.get("token").and_then(|v| v.as_bytes()).unwrap_or_default();
                if given_token == expected_token.as_slice() {
                    let implied_port = matches!(a.get("implied_port"), Some(BencodeValue::Int(1)));
                    let port = if implied_port {
                        from.port()
                    } else {
                        a.get("port").and_then(|v| v.as_int()).unwrap_or(from.port() as i64) as u16
                    };
                    let addr = endpoint(from.ip(), port);
                    self.intake.observe(info_hash, PeerSource::DhtAnnounce, Some(addr), Instant::now());
                }
                response_dict(tx_id, self.node_id, [])
            }
            b"sample_infohashes" => {
                let target = a.get("target").and_then(|v| v.as_bytes()).unwrap_or(self.node_id.as_bytes());
                let target: [u8; 20] = target.try_into().unwrap_or(*self.node_id.as_bytes());
                let nodes = encode_compact_nodes(&self.routing.closest(&target, 8));
                response_dict(
                    tx_id,
                    self.node_id,
                    [
                        ("nodes".to_string(), BencodeValue::String(nodes)),
                        ("interval".to_string(), BencodeValue::Int(SAMPLE_INFOHASHES_INTERVAL_SECS)),
                        ("num".to_string(), BencodeValue::Int(0)),
                        ("samples".to_string(), BencodeValue::String(vec![])),
                    ],
                )
            }
            _ => response_dict(tx_id, self.node_id, []),
        };

        self.socket.send_to(&resp.encode(), from).await.context("dht query reply")?;
        Ok(())
    }

    async fn handle_response(&self, dict: &std::collections::BTreeMap<String, BencodeValue>, tx_id: &[u8], from: SocketAddr) -> Result<()> {
        let (tx, _) = match self.transactions.lock().expect("dht poisoned").remove(tx_id) {
            Some(t) => t,
            None => return Ok(()),
        };
        self.stats.incr_responses_received();

        let r = dict.get("r").and_then(|v| v.as_dict()).context("no r")?.clone();
        let responder_id = r.get("id").and_then(|v| v.as_bytes()).and_then(|b| NodeId::try_from(b).ok());
        if let Some(id) = responder_id {
            self.routing.insert(id, from, Instant::now());
            self.routing.mark_response(&id, Instant::now());
        }

        let mut got_peer = false;
        if let Some(nodes_bytes) = r.get("nodes").and_then(|v| v.as_bytes()) {
            for (id, ep) in decode_compact_nodes(nodes_bytes) {
                self.routing.insert(id, ep, Instant::now());
            }
        }

        match tx.kind {
            TxKind::GetPeers { info_hash } => {
                if let Some(values) = r.get("values").and_then(|v| v.as_list()) {
                    for v in values {
                        if let Some(bytes) = v.as_bytes() {
                            if let Some(addr) = decode_compact_peer(bytes) {
                                got_peer = true;
                                self.intake.observe(info_hash, PeerSource::DhtPeers, Some(addr), Instant::now());
                            }
                        }
                    }
                }
            }
            TxKind::SampleInfohashes => {
                if let Some(id) = responder_id {
                    self.bep51_peers.lock().expect("dht poisoned").insert(id);
                }
                if let Some(samples) = r.get("samples").and_then(|v| v.as_bytes()) {
                    match decode_samples(samples) {
                        Some(hashes) => {
                            for info_hash in hashes {
                                got_peer = true;
                                self.intake.observe(info_hash, PeerSource::Bep51, Some(from), Instant::now());
                            }
                        }
                        None => self.stats.incr_parse_errors(),
                    }
                }
            }
            TxKind::AnnouncePeer { .. } | TxKind::Ping | TxKind::FindNode => {}
        }

        self.rate_limiter.record_outcome(got_peer, Instant::now());
        Ok(())
    }

    /// Sends `get_peers` to our best-known nodes and waits up to `wait`
    /// for the Intake to accumulate peer hints for this InfoHash
    /// (spec.md 4.3 step 1: "issue a fresh get_peers ... and wait up to
    /// 10 s for peers").
    pub async fn find_peers(&self, info_hash: InfoHash, wait: Duration) -> Vec<SocketAddr> {
        for node in self.routing.good(8) {
            let _ = self.send_get_peers(node.endpoint, node.id, info_hash).await;
        }
        let deadline = Instant::now() + wait;
        loop {
            let hints = self.intake.peer_hints(&info_hash);
            if !hints.is_empty() || Instant::now() >= deadline {
                return hints;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// Peer hints already accumulated for this InfoHash without issuing a
    /// new query (spec.md 4.3 step 1, first half: "start from the known
    /// peer list").
    pub fn known_peers(&self, info_hash: &InfoHash) -> Vec<SocketAddr> {
        self.intake.peer_hints(info_hash)
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn bep51_peer_count(&self) -> usize {
        self.bep51_peers.lock().expect("dht poisoned").len()
    }
}

fn random_tx_id() -> Vec<u8> {
    thread_rng().sample_iter(&Alphanumeric).take(2).collect()
}

fn query_dict(tx_id: &[u8], q: &str, id: NodeId, extra: impl IntoIterator<Item = (String, BencodeValue)>) -> BencodeValue {
    let mut a: std::collections::BTreeMap<String, BencodeValue> = [("id".to_string(), BencodeValue::String(id.as_bytes().to_vec()))].into_iter().collect();
    a.extend(extra);
    BencodeValue::Dict(
        [
            ("t".to_string(), BencodeValue::String(tx_id.to_vec())),
            ("y".to_string(), BencodeValue::from("q")),
            ("q".to_string(), BencodeValue::from(q)),
            ("a".to_string(), BencodeValue::Dict(a)),
        ]
        .into_iter()
        .collect(),
    )
}

fn response_dict(tx_id: &[u8], id: NodeId, extra: impl IntoIterator<Item = (String, BencodeValue)>) -> BencodeValue {
    let mut r: std::collections::BTreeMap<String, BencodeValue> = [("id".to_string(), BencodeValue::String(id.as_bytes().to_vec()))].into_iter().collect();
    r.extend(extra);
    BencodeValue::Dict(
        [
            ("t".to_string(), BencodeValue::String(tx_id.to_vec())),
            ("y".to_string(), BencodeValue::from("r")),
            ("r".to_string(), BencodeValue::Dict(r)),
        ]
        .into_iter()
        .collect(),
    )
}

fn encode_compact_nodes(nodes: &[crate::routing::DhtNode]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nodes.len() * 26);
    for node in nodes {
        if let SocketAddr::V4(v4) = node.endpoint {
            out.extend_from_slice(node.id.as_bytes());
            out.extend_from_slice(&v4.ip().octets());
            out.extend_from_slice(&v4.port().to_be_bytes());
        }
    }
    out
}

fn decode_compact_nodes(bytes: &[u8]) -> Vec<(NodeId, SocketAddr)> {
    bytes
        .chunks_exact(26)
        .filter_map(|chunk| {
            let id = NodeId::try_from(&chunk[0..20]).ok()?;
            let ip = std::net::Ipv4Addr::new(chunk[20], chunk[21], chunk[22], chunk[23]);
            let port = u16::from_be_bytes([chunk[24], chunk[25]]);
            Some((id, SocketAddr::from((ip, port))))
        })
        .collect()
}

/// Decodes a `sample_infohashes` reply's `samples` blob (a concatenation
/// of 20-byte infohashes). A blob whose length isn't a multiple of 20 is
/// rejected whole rather than truncated to its complete chunks.
fn decode_samples(bytes: &[u8]) -> Option<Vec<InfoHash>> {
    if bytes.len() % 20 != 0 {
        return None;
    }
    bytes.chunks_exact(20).map(|chunk| InfoHash::try_from(chunk).ok()).collect()
}

fn decode_compact_peer(bytes: &[u8]) -> Option<SocketAddr> {
    if bytes.len() != 6 {
        return None;
    }
    let ip = std::net::Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
    let port = u16::from_be_bytes([bytes[4], bytes[5]]);
    Some(SocketAddr::from((ip, port)))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn query_dict_round_trips_through_bencode() {
        let tx_id = vec![b'a', b'a'];
        let id = NodeId::new([9u8; 20]);
        let target = NodeId::new([1u8; 20]);
        let body = query_dict(&tx_id, "find_node", id, [("target".to_string(), BencodeValue::String(target.as_bytes().to_vec()))]);
        let encoded = body.encode();
        let (parsed, _) = parse_bencoded(encoded);
        let dict = parsed.unwrap();
        let dict = dict.as_dict().unwrap();
        assert_eq!(dict.get("q").unwrap().as_bytes().unwrap(), b"find_node");
        assert_eq!(dict.get("t").unwrap().as_bytes().unwrap(), tx_id.as_slice());
    }

    #[test]
    fn compact_nodes_round_trip() {
        let mut nodes = vec![];
        let now = Instant::now();
        for i in 0..3u8 {
            nodes.push(crate::routing::DhtNode {
                id: NodeId::new([i; 20]),
                endpoint: SocketAddr::from(([10, 0, 0, i], 6881 + i as u16)),
                status: crate::routing::NodeStatus::Unknown,
                quality: 0.5,
                last_seen: now,
                last_ping: None,
                pings: 0,
                responses: 0,
                failures: 0,
            });
        }
        let encoded = encode_compact_nodes(&nodes);
        let decoded = decode_compact_nodes(&encoded);
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].0, nodes[0].id);
        assert_eq!(decoded[0].1, nodes[0].endpoint);
    }

    #[test]
    fn compact_peer_rejects_wrong_length() {
        assert!(decode_compact_peer(&[1, 2, 3]).is_none());
    }

    #[test]
    fn samples_blob_of_exact_multiple_decodes_fully() {
        let bytes: Vec<u8> = (0..40u8).collect();
        let hashes = decode_samples(&bytes).expect("even multiple of 20 decodes");
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[0].as_bytes(), &bytes[0..20]);
    }

    #[test]
    fn samples_blob_with_odd_length_is_rejected_whole() {
        let bytes: Vec<u8> = (0..41u8).collect();
        assert!(decode_samples(&bytes).is_none());
    }

    #[tokio::test]
    async fn sample_tick_prefers_a_priority_infohash_over_a_random_target() {
        use crate::intake::Intake;
        use crate::model::PeerSource;
        use crate::sink::NullSink;

        let routing = Arc::new(crate::routing::RoutingTable::new(NodeId::random(), Default::default()));
        let stats = Arc::new(crate::stats::Stats::new());
        let queue = Arc::new(crate::queue::WorkQueue::new(16));
        let intake = Arc::new(Intake::new(Arc::clone(&queue), Arc::new(NullSink), Arc::clone(&stats)));
        let rate_limiter = Arc::new(crate::ratelimit::RateLimiter::new(Default::default(), Instant::now()));

        let engine = DhtEngine::bind(0, NodeId::random(), Arc::clone(&routing), rate_limiter, Arc::clone(&intake), Arc::new(NullSink), Arc::clone(&stats), false)
            .await
            .unwrap();

        let peer_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer_socket.local_addr().unwrap();
        let peer_id = NodeId::random();
        let now = Instant::now();
        routing.insert(peer_id, peer_addr, now);
        for _ in 0..10 {
            routing.mark_response(&peer_id, now);
        }

        let priority_target = InfoHash::new([7u8; 20]);
        for i in 0..3u16 {
            let addr = SocketAddr::from(([127, 0, 0, 1], 4000 + i));
            intake.observe(priority_target, PeerSource::DhtPeers, Some(addr), now);
        }

        engine.sample_tick().await.unwrap();

        let mut buf = vec![0u8; 2048];
        let (n, _) = tokio::time::timeout(Duration::from_secs(1), peer_socket.recv_from(&mut buf)).await.unwrap().unwrap();
        let (parsed, _) = parse_bencoded(buf[..n].to_vec());
        let dict = parsed.unwrap();
        let dict = dict.as_dict().unwrap();
        assert_eq!(dict.get("q").unwrap().as_bytes().unwrap(), b"get_peers");
        let a = dict.get("a").unwrap().as_dict().unwrap();
        assert_eq!(a.get("info_hash").unwrap().as_bytes().unwrap(), priority_target.as_bytes());
    }

    #[test]
    fn token_is_stable_for_same_ip_and_changes_by_secret() {
        let socket_secret_a = [1u8; 8];
        let socket_secret_b = [2u8; 8];
        let addr = SocketAddr::from(([1, 2, 3, 4], 6881));

        let token = |secret: [u8; 8]| {
            let mut hasher = Sha1::new();
            hasher.update(secret);
            hasher.update(addr.ip().to_string().as_bytes());
            hasher.finalize()[0..4].to_vec()
        };
        assert_eq!(token(socket_secret_a), token(socket_secret_a));
        assert_ne!(token(socket_secret_a), token(socket_secret_b));
    }
}
