//! Raw telemetry acquisition
//!
//! One fetch covers one host and writes every successful transport result
//! into the cache store under that transport's kind. Transports are
//! independent failure domains: an agent connection error never blocks
//! the SNMP result and vice versa, and a failed transport leaves the
//! previous cache entry for its kind untouched.
//!
//! Agent output may embed `<<<<host>>>>` markers: everything between such
//! a marker and the next one (or `<<<<>>>>`) is telemetry the agent
//! forwards on behalf of that host. The fetcher demultiplexes those
//! blocks into the piggyback cache area before caching its own payload.

use crate::cache::CacheStore;
use crate::models::{HostName, SourceKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("SNMP backend error: {0}")]
    Snmp(String),
}

/// Reads one agent's full output over TCP
#[derive(Debug, Clone)]
pub struct AgentTcpTransport {
    port: u16,
    timeout: Duration,
}

impl AgentTcpTransport {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    /// Connect and read until the agent closes the connection
    pub async fn fetch(&self, address: &str) -> Result<Vec<u8>, FetchError> {
        let read_all = async {
            let mut stream = TcpStream::connect((address, self.port)).await?;
            let mut payload = Vec::new();
            stream.read_to_end(&mut payload).await?;
            Ok::<_, FetchError>(payload)
        };
        tokio::time::timeout(self.timeout, read_all)
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))?
    }
}

/// Produces a full SNMP walk for one host
pub trait SnmpBackend: Send + Sync {
    fn walk(&self, host: &HostName) -> Result<Vec<u8>, FetchError>;
}

/// Backend replaying pre-recorded walks, one file per host
#[derive(Debug, Clone)]
pub struct StoredWalkBackend {
    dir: PathBuf,
}

impl StoredWalkBackend {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }
}

impl SnmpBackend for StoredWalkBackend {
    fn walk(&self, host: &HostName) -> Result<Vec<u8>, FetchError> {
        Ok(std::fs::read(self.dir.join(host.as_str()))?)
    }
}

/// Per-transport result of one host fetch: bytes cached on success
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub agent: Option<Result<usize, FetchError>>,
    pub snmp: Option<Result<usize, FetchError>>,
}

impl FetchOutcome {
    pub fn any_success(&self) -> bool {
        matches!(self.agent, Some(Ok(_))) || matches!(self.snmp, Some(Ok(_)))
    }
}

/// Acquires raw telemetry for one host and caches it
pub struct Fetcher {
    cache: CacheStore,
    agent: Option<AgentTcpTransport>,
    snmp: Option<Arc<dyn SnmpBackend>>,
}

impl Fetcher {
    pub fn new(cache: CacheStore) -> Self {
        Self { cache, agent: None, snmp: None }
    }

    pub fn with_agent(mut self, transport: AgentTcpTransport) -> Self {
        self.agent = Some(transport);
        self
    }

    pub fn with_snmp(mut self, backend: Arc<dyn SnmpBackend>) -> Self {
        self.snmp = Some(backend);
        self
    }

    /// Fetch every configured transport for `host`, concurrently.
    /// Ordering between the transports is not guaranteed; each completed
    /// cache write is atomic on its own.
    pub async fn fetch_host(&self, host: &HostName, address: &str) -> FetchOutcome {
        let agent_task = async {
            match &self.agent {
                Some(transport) => Some(self.fetch_agent(transport, host, address).await),
                None => None,
            }
        };
        let snmp_task = async {
            match &self.snmp {
                Some(backend) => Some(self.fetch_snmp(backend.as_ref(), host)),
                None => None,
            }
        };
        let (agent, snmp) = tokio::join!(agent_task, snmp_task);
        FetchOutcome { agent, snmp }
    }

    async fn fetch_agent(
        &self,
        transport: &AgentTcpTransport,
        host: &HostName,
        address: &str,
    ) -> Result<usize, FetchError> {
        let raw = transport.fetch(address).await.inspect_err(|e| {
            warn!(host = %host, "agent fetch failed: {e}");
        })?;
        let (own, forwarded) = split_piggyback(host, &raw);
        for (target, payload) in forwarded {
            if let Err(e) = self.cache.write_piggyback(&target, host, &payload) {
                warn!(host = %host, target = %target, "piggyback cache write failed: {e}");
            }
        }
        let len = own.len();
        self.cache.write(host, SourceKind::AgentTcp, &own)?;
        debug!(host = %host, len, "agent output cached");
        Ok(len)
    }

    fn fetch_snmp(&self, backend: &dyn SnmpBackend, host: &HostName) -> Result<usize, FetchError> {
        let walk = backend.walk(host).inspect_err(|e| {
            warn!(host = %host, "SNMP walk failed: {e}");
        })?;
        let len = walk.len();
        self.cache.write(host, SourceKind::SnmpWalk, &walk)?;
        debug!(host = %host, len, "SNMP walk cached");
        Ok(len)
    }
}

/// Split an agent payload into the host's own output and the payloads it
/// forwards for other hosts. Blocks for the same target merge in order.
/// A marker naming the source host itself folds back into its own output.
pub fn split_piggyback(source: &HostName, raw: &[u8]) -> (Vec<u8>, Vec<(HostName, Vec<u8>)>) {
    let mut own: Vec<&[u8]> = Vec::new();
    let mut forwarded: Vec<(HostName, Vec<Vec<u8>>)> = Vec::new();
    let mut current: Option<usize> = None;

    for line in raw.split(|b| *b == b'\n') {
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches('\r');
        if let Some(inner) = text.strip_prefix("<<<<").and_then(|t| t.strip_suffix(">>>>")) {
            if inner.is_empty() || inner == source.as_str() {
                current = None;
            } else if let Ok(target) = HostName::new(inner) {
                let at = forwarded
                    .iter()
                    .position(|(t, _)| *t == target)
                    .unwrap_or_else(|| {
                        forwarded.push((target, Vec::new()));
                        forwarded.len() - 1
                    });
                current = Some(at);
            } else {
                warn!(source = %source, marker = inner, "ignoring invalid piggyback marker");
                current = None;
            }
            continue;
        }
        match current {
            Some(at) => forwarded[at].1.push(line.to_vec()),
            None => own.push(line),
        }
    }

    let forwarded = forwarded
        .into_iter()
        .map(|(target, lines)| (target, lines.join(&b'\n')))
        .collect();
    (own.join(&b"\n"[..]), forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn host(name: &str) -> HostName {
        HostName::new(name).unwrap()
    }

    async fn one_shot_agent(payload: &'static [u8]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(payload).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        port
    }

    #[test]
    fn test_split_piggyback() {
        let raw = b"<<<cpu>>>\n0.1\n<<<<other>>>>\n<<<mem>>>\n1 2\n<<<<>>>>\n<<<uptime>>>\n42";
        let (own, forwarded) = split_piggyback(&host("h1"), raw);
        assert_eq!(own, b"<<<cpu>>>\n0.1\n<<<uptime>>>\n42");
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].0.as_str(), "other");
        assert_eq!(forwarded[0].1, b"<<<mem>>>\n1 2");
    }

    #[test]
    fn test_split_piggyback_self_marker_folds_back() {
        let raw = b"<<<cpu>>>\n0.1\n<<<<h1>>>>\n<<<extra>>>\nx";
        let (own, forwarded) = split_piggyback(&host("h1"), raw);
        assert_eq!(own, b"<<<cpu>>>\n0.1\n<<<extra>>>\nx");
        assert!(forwarded.is_empty());
    }

    #[tokio::test]
    async fn test_agent_fetch_caches_own_and_piggyback() {
        let port = one_shot_agent(b"<<<cpu>>>\n0.1\n<<<<db-01>>>>\n<<<mem>>>\n1 2\n").await;
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(dir.path());
        let fetcher = Fetcher::new(cache.clone())
            .with_agent(AgentTcpTransport::new(port, Duration::from_secs(5)));

        let h = host("web-01");
        let outcome = fetcher.fetch_host(&h, "127.0.0.1").await;
        assert!(matches!(outcome.agent, Some(Ok(_))));
        assert!(outcome.snmp.is_none());

        assert_eq!(cache.read(&h, SourceKind::AgentTcp).unwrap(), b"<<<cpu>>>\n0.1\n");
        assert_eq!(
            cache.read_piggyback(&host("db-01"), &h).unwrap(),
            b"<<<mem>>>\n1 2\n"
        );
    }

    #[tokio::test]
    async fn test_failed_transport_keeps_other_and_previous_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(dir.path());
        let h = host("web-01");
        // previous run's walk
        cache.write(&h, SourceKind::SnmpWalk, b"old walk").unwrap();

        let port = one_shot_agent(b"<<<cpu>>>\n0.2\n").await;
        let walks = tempfile::tempdir().unwrap(); // empty, so the walk fails
        let fetcher = Fetcher::new(cache.clone())
            .with_agent(AgentTcpTransport::new(port, Duration::from_secs(5)))
            .with_snmp(Arc::new(StoredWalkBackend::new(walks.path())));

        let outcome = fetcher.fetch_host(&h, "127.0.0.1").await;
        assert!(matches!(outcome.agent, Some(Ok(_))));
        assert!(matches!(outcome.snmp, Some(Err(_))));
        assert!(outcome.any_success());

        assert_eq!(cache.read(&h, SourceKind::AgentTcp).unwrap(), b"<<<cpu>>>\n0.2\n");
        // failed walk did not corrupt the previous entry
        assert_eq!(cache.read(&h, SourceKind::SnmpWalk).unwrap(), b"old walk");
    }

    #[tokio::test]
    async fn test_agent_fetch_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            // hold the connection open without sending anything
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let transport = AgentTcpTransport::new(port, Duration::from_millis(50));
        match transport.fetch("127.0.0.1").await {
            Err(FetchError::Timeout(_)) => {}
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
