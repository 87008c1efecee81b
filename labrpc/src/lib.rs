// Simulated RPC transport.
//
// Stands in for a real network: in-process, reliable-datagram-style delivery
// between named endpoints, with knobs to drop, delay, or partition traffic so
// tests can exercise the failure modes Raft is built to tolerate. Nothing in
// `raft` or `kvraft` talks to a socket directly; both go through the `Rpc`
// trait here, and `kvraft-server` swaps in a TCP-backed implementation of the
// same trait for real deployment.

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

pub type EndpointId = u64;

#[derive(Error, Debug, Clone)]
pub enum RpcError {
    #[error("no such endpoint: {0}")]
    NoSuchEndpoint(EndpointId),
    #[error("no such method: {0}")]
    NoSuchMethod(String),
    #[error("request dropped (simulated unreliability)")]
    Dropped,
    #[error("endpoint disconnected")]
    Disconnected,
    #[error("handler error: {0}")]
    Handler(String),
}

pub type RpcResult<T> = Result<T, RpcError>;

/// A single RPC handler: raw bytes in, raw bytes out. `raft` and `kvraft`
/// register one of these per message type (RequestVote, AppendEntries, ...)
/// and encode/decode their own typed payloads around it.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, args: Vec<u8>) -> RpcResult<Vec<u8>>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = RpcResult<Vec<u8>>> + Send + 'static,
{
    async fn call(&self, args: Vec<u8>) -> RpcResult<Vec<u8>> {
        (self)(args).await
    }
}

struct Endpoint {
    methods: HashMap<String, Arc<dyn Handler>>,
    connected: bool,
}

/// Per-link reliability model. Defaults are "reliable, no delay" so unit
/// tests of the happy path don't need to think about it; integration tests
/// dial these down to reproduce partitions, drops, and long delays.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub reliable: bool,
    pub long_delays: bool,
    pub drop_probability: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            reliable: true,
            long_delays: false,
            drop_probability: 0.0,
        }
    }
}

/// The simulated network: a registry of endpoints plus the reliability model
/// applied to every call. Cloning is cheap; all instances share state.
#[derive(Clone)]
pub struct Network {
    inner: Arc<RwLock<NetworkInner>>,
}

struct NetworkInner {
    endpoints: HashMap<EndpointId, Endpoint>,
    config: NetworkConfig,
}

impl Network {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(NetworkInner {
                endpoints: HashMap::new(),
                config,
            })),
        }
    }

    /// Register a named handler on an endpoint, creating the endpoint
    /// (connected by default) if it doesn't exist yet.
    pub fn register(&self, endpoint: EndpointId, method: &str, handler: Arc<dyn Handler>) {
        let mut inner = self.inner.write();
        let entry = inner.endpoints.entry(endpoint).or_insert_with(|| Endpoint {
            methods: HashMap::new(),
            connected: true,
        });
        entry.methods.insert(method.to_string(), handler);
    }

    /// Simulate a partition: calls to or from a disconnected endpoint are
    /// dropped as if the packet never arrived.
    pub fn set_connected(&self, endpoint: EndpointId, connected: bool) {
        let mut inner = self.inner.write();
        if let Some(e) = inner.endpoints.get_mut(&endpoint) {
            e.connected = connected;
        } else if connected {
            inner.endpoints.insert(
                endpoint,
                Endpoint {
                    methods: HashMap::new(),
                    connected: true,
                },
            );
        }
    }

    pub fn set_reliable(&self, reliable: bool) {
        self.inner.write().config.reliable = reliable;
    }

    pub fn set_long_delays(&self, long_delays: bool) {
        self.inner.write().config.long_delays = long_delays;
    }

    /// Whether `endpoint` currently accepts calls. Transports that want a
    /// symmetric partition (an isolated node can neither be called nor call
    /// out) should check this for their own id before dialing a peer.
    pub fn is_connected(&self, endpoint: EndpointId) -> bool {
        self.inner
            .read()
            .endpoints
            .get(&endpoint)
            .map(|e| e.connected)
            .unwrap_or(true)
    }

    /// A client handle bound to a specific peer, the way `raft::Peer` holds
    /// one end-point per remote peer.
    pub fn client(&self, target: EndpointId) -> NetworkClient {
        NetworkClient {
            network: self.clone(),
            target,
        }
    }
}

#[derive(Clone)]
pub struct NetworkClient {
    network: Network,
    target: EndpointId,
}

#[async_trait]
pub trait Rpc: Send + Sync {
    async fn call(&self, method: &str, args: Vec<u8>) -> RpcResult<Vec<u8>>;
}

#[async_trait]
impl Rpc for NetworkClient {
    async fn call(&self, method: &str, args: Vec<u8>) -> RpcResult<Vec<u8>> {
        let (handler, drop_it, delay) = {
            let inner = self.network.inner.read();
            let endpoint = inner
                .endpoints
                .get(&self.target)
                .ok_or(RpcError::NoSuchEndpoint(self.target))?;
            if !endpoint.connected {
                return Err(RpcError::Disconnected);
            }
            let handler = endpoint
                .methods
                .get(method)
                .cloned()
                .ok_or_else(|| RpcError::NoSuchMethod(method.to_string()))?;

            let mut rng = rand::rng();
            let drop_it = !inner.config.reliable
                && rng.random_bool(inner.config.drop_probability.clamp(0.0, 1.0).max(0.1));
            let delay = if inner.config.long_delays {
                Duration::from_millis(rng.random_range(200..7000))
            } else if !inner.config.reliable {
                Duration::from_millis(rng.random_range(0..27))
            } else {
                Duration::ZERO
            };
            (handler, drop_it, delay)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if drop_it {
            return Err(RpcError::Dropped);
        }

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = handler.call(args).await;
            let _ = tx.send(result);
        });
        rx.await.map_err(|_| RpcError::Dropped)?
    }
}

impl fmt::Debug for NetworkClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NetworkClient(target={})", self.target)
    }
}
