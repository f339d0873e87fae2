//! The cluster client: rendezvous-hashed routing over per-server
//! clients or pools, with failure detection and dead-node recovery.
//!
//! Each server moves through three states. A healthy server serves
//! traffic. An I/O error moves it to failing, where calls short-circuit
//! until a cooldown elapses and a retry is permitted. Once the retry
//! budget is spent the server is dead: it leaves the hasher entirely and
//! sits out `dead_timeout` before a sweep readmits it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::client::{CasToken, Client, ClientConfig};
use crate::error::Error;
use crate::pool::PooledClient;
use crate::rendezvous::{NodeHasher, RendezvousHash};
use crate::serde::{NoSerde, Serde};
use crate::transport::{NetTransport, ServerEndpoint, Transport};

/// Cluster-level policy on top of [`ClientConfig`].
#[derive(Clone)]
pub struct HashConfig {
    /// Options passed to every per-server client.
    pub client: ClientConfig,
    /// Failed attempts allowed before a server is declared dead. Zero or
    /// less kills a server on its first I/O error.
    pub retry_attempts: i32,
    /// Cooldown between retry attempts against a failing server.
    pub retry_timeout: Duration,
    /// How long a dead server sits out before it may rejoin.
    pub dead_timeout: Duration,
    /// Put a connection pool behind every server instead of one client.
    pub use_pooling: bool,
    /// Pool bound per server, when pooling.
    pub max_pool_size: Option<usize>,
    /// Pool idle eviction, when pooling.
    pub pool_idle_timeout: Option<Duration>,
}

impl Default for HashConfig {
    fn default() -> Self {
        HashConfig {
            client: ClientConfig::default(),
            retry_attempts: 2,
            retry_timeout: Duration::from_secs(1),
            dead_timeout: Duration::from_secs(60),
            use_pooling: false,
            max_pool_size: None,
            pool_idle_timeout: None,
        }
    }
}

/// A key, optionally pinned to a specific server instead of the one the
/// hasher would elect.
#[derive(Clone, Debug)]
pub struct RoutedKey {
    server: Option<String>,
    key: Vec<u8>,
}

impl RoutedKey {
    /// A key routed to the server owning `server_key`, bypassing the
    /// hasher.
    pub fn pinned(server_key: impl Into<String>, key: impl Into<Vec<u8>>) -> Self {
        RoutedKey {
            server: Some(server_key.into()),
            key: key.into(),
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

impl From<&[u8]> for RoutedKey {
    fn from(key: &[u8]) -> Self {
        RoutedKey {
            server: None,
            key: key.to_vec(),
        }
    }
}

impl<const N: usize> From<&[u8; N]> for RoutedKey {
    fn from(key: &[u8; N]) -> Self {
        RoutedKey {
            server: None,
            key: key.to_vec(),
        }
    }
}

impl From<Vec<u8>> for RoutedKey {
    fn from(key: Vec<u8>) -> Self {
        RoutedKey { server: None, key }
    }
}

impl From<(&str, &[u8])> for RoutedKey {
    fn from((server, key): (&str, &[u8])) -> Self {
        RoutedKey::pinned(server, key)
    }
}

enum Node<S: Serde, T: Transport> {
    Direct(Mutex<Client<S, T>>),
    Pooled(PooledClient<S, T>),
}

impl<S, T> Node<S, T>
where
    S: Serde + 'static,
    T: Transport + 'static,
{
    fn run<R>(&self, f: impl FnOnce(&mut Client<S, T>) -> Result<R, Error>) -> Result<R, Error> {
        match self {
            Node::Direct(client) => {
                let mut client = client.lock().unwrap_or_else(PoisonError::into_inner);
                f(&mut client)
            }
            Node::Pooled(pool) => pool.run(f),
        }
    }

    fn close(&self) {
        match self {
            Node::Direct(client) => client.lock().unwrap_or_else(PoisonError::into_inner).close(),
            Node::Pooled(pool) => pool.close(),
        }
    }
}

struct FailState {
    attempts: i32,
    first_failed: Instant,
}

struct HashState<S: Serde, T: Transport, H> {
    clients: HashMap<String, (ServerEndpoint, Arc<Node<S, T>>)>,
    hasher: H,
    failed: HashMap<String, FailState>,
    dead: HashMap<String, Instant>,
    last_dead_check: Instant,
}

/// A client for a cluster of memcached servers.
///
/// Routing, failure bookkeeping and the server table live behind one
/// mutex held only for state transitions, never across I/O. Per-server
/// clients surface all of their errors; `ignore_exc` and the failure
/// state machine are applied here.
pub struct HashClient<S: Serde = NoSerde, T: Transport = NetTransport, H: NodeHasher = RendezvousHash>
{
    config: HashConfig,
    serde: S,
    ignore_exc: bool,
    state: Mutex<HashState<S, T, H>>,
}

impl HashClient {
    /// A cluster client over `servers` with raw byte values and default
    /// policy.
    pub fn new(servers: Vec<ServerEndpoint>) -> Self {
        HashClient::with_config(servers, NoSerde, RendezvousHash::default(), HashConfig::default())
    }
}

impl<S, T, H> HashClient<S, T, H>
where
    S: Serde + 'static,
    T: Transport + 'static,
    H: NodeHasher,
{
    pub fn with_config(servers: Vec<ServerEndpoint>, serde: S, hasher: H, config: HashConfig) -> Self {
        let ignore_exc = config.client.ignore_exc;
        let client = HashClient {
            config,
            serde,
            ignore_exc,
            state: Mutex::new(HashState {
                clients: HashMap::new(),
                hasher,
                failed: HashMap::new(),
                dead: HashMap::new(),
                last_dead_check: Instant::now(),
            }),
        };
        {
            let mut state = client.lock_state();
            for server in servers {
                client.register(&mut state, server);
            }
        }
        client
    }

    fn lock_state(&self) -> MutexGuard<'_, HashState<S, T, H>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Per-server members surface every error so the failure machine can
    // see them; `ignore_exc` applies at this level instead.
    fn member_config(&self) -> ClientConfig {
        ClientConfig {
            ignore_exc: false,
            ..self.config.client.clone()
        }
    }

    fn make_node(&self, server: &ServerEndpoint) -> Node<S, T> {
        if self.config.use_pooling {
            Node::Pooled(PooledClient::new(
                server.clone(),
                self.serde.clone(),
                self.member_config(),
                self.config.max_pool_size,
                self.config.pool_idle_timeout,
            ))
        } else {
            Node::Direct(Mutex::new(Client::with_config(
                server.clone(),
                self.serde.clone(),
                self.member_config(),
            )))
        }
    }

    fn register(&self, state: &mut HashState<S, T, H>, server: ServerEndpoint) {
        let server_key = server.server_key();
        let node = Arc::new(self.make_node(&server));
        state.clients.insert(server_key.clone(), (server, node));
        state.hasher.add_node(&server_key);
    }

    /// Add a server to the cluster.
    pub fn add_server(&self, server: ServerEndpoint) {
        let mut state = self.lock_state();
        self.register(&mut state, server);
    }

    /// Remove a server from the cluster and close its connections.
    pub fn remove_server(&self, server: &ServerEndpoint) {
        let server_key = server.server_key();
        let removed = {
            let mut state = self.lock_state();
            state.hasher.remove_node(&server_key);
            state.failed.remove(&server_key);
            state.dead.remove(&server_key);
            state.clients.remove(&server_key)
        };
        if let Some((_, node)) = removed {
            node.close();
        }
    }

    /// Canonical keys of every registered server, including quarantined
    /// ones.
    pub fn servers(&self) -> Vec<String> {
        self.lock_state().clients.keys().cloned().collect()
    }

    /// Close every connection in the cluster.
    pub fn close(&self) {
        let nodes: Vec<Arc<Node<S, T>>> = {
            let mut state = self.lock_state();
            let server_keys: Vec<String> = state.clients.keys().cloned().collect();
            for server_key in &server_keys {
                state.hasher.remove_node(server_key);
            }
            state.failed.clear();
            state.dead.clear();
            state.clients.drain().map(|(_, (_, node))| node).collect()
        };
        for node in nodes {
            node.close();
        }
    }

    // -- dispatch ----------------------------------------------------------

    fn run_cmd<R>(
        &self,
        key: &RoutedKey,
        default: impl FnOnce() -> R,
        op: impl FnOnce(&mut Client<S, T>) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let (server_key, node) = {
            let mut state = self.lock_state();
            self.revive_dead(&mut state);
            let server_key = match self.elect(&state, key) {
                Some(server_key) => server_key,
                None => {
                    return if self.ignore_exc {
                        Ok(default())
                    } else {
                        Err(Error::NoServers)
                    }
                }
            };
            let node = match state.clients.get(&server_key) {
                Some((_, node)) => node.clone(),
                None => {
                    return if self.ignore_exc {
                        Ok(default())
                    } else {
                        Err(Error::NoServers)
                    }
                }
            };
            if !self.gate(&mut state, &server_key) {
                return Ok(default());
            }
            (server_key, node)
        };

        let result = node.run(op);
        self.record(&server_key, result, default)
    }

    fn elect(&self, state: &HashState<S, T, H>, key: &RoutedKey) -> Option<String> {
        match &key.server {
            Some(server_key) => Some(server_key.clone()),
            None => state.hasher.get_node(&key.key).map(str::to_string),
        }
    }

    // Decide whether a call may reach the server, applying the
    // failing-to-dead transition when the retry budget is spent.
    fn gate(&self, state: &mut HashState<S, T, H>, server_key: &str) -> bool {
        if state.dead.contains_key(server_key) {
            // only pinned routes can land here; hashed keys never elect
            // a dead server
            return false;
        }
        if let Some(fail) = state.failed.get(server_key) {
            if fail.attempts >= self.config.retry_attempts {
                self.mark_dead(state, server_key);
                return false;
            }
            if fail.first_failed.elapsed() <= self.config.retry_timeout {
                // still cooling down
                return false;
            }
            debug!("retrying failing server {}", server_key);
        }
        true
    }

    // Fold an op result into the failure state machine. I/O errors are
    // absorbed and yield the caller's default; everything else is
    // subject to `ignore_exc`.
    fn record<R>(
        &self,
        server_key: &str,
        result: Result<R, Error>,
        default: impl FnOnce() -> R,
    ) -> Result<R, Error> {
        match result {
            Ok(value) => {
                let mut state = self.lock_state();
                if state.failed.remove(server_key).is_some() {
                    debug!("server {} recovered", server_key);
                }
                Ok(value)
            }
            Err(err) if err.is_network() => {
                let mut state = self.lock_state();
                self.note_failure(&mut state, server_key, &err);
                Ok(default())
            }
            Err(err) => {
                if self.ignore_exc {
                    Ok(default())
                } else {
                    Err(err)
                }
            }
        }
    }

    fn note_failure(&self, state: &mut HashState<S, T, H>, server_key: &str, err: &Error) {
        match state.failed.get_mut(server_key) {
            Some(fail) => {
                // a permitted retry that failed again
                fail.attempts += 1;
                fail.first_failed = Instant::now();
                warn!(
                    "server {} failed again ({}), attempt {}",
                    server_key, err, fail.attempts
                );
            }
            None if self.config.retry_attempts > 0 => {
                warn!("server {} failed ({}), entering retry", server_key, err);
                state.failed.insert(
                    server_key.to_string(),
                    FailState {
                        attempts: 0,
                        first_failed: Instant::now(),
                    },
                );
            }
            None => {
                // no retry budget at all
                warn!("server {} failed ({})", server_key, err);
                self.mark_dead(state, server_key);
            }
        }
    }

    fn mark_dead(&self, state: &mut HashState<S, T, H>, server_key: &str) {
        warn!("server {} marked dead", server_key);
        state.failed.remove(server_key);
        state.dead.insert(server_key.to_string(), Instant::now());
        state.hasher.remove_node(server_key);
    }

    // Readmit servers whose dead_timeout has elapsed. Runs at most once
    // per dead_timeout, ahead of a dispatch.
    fn revive_dead(&self, state: &mut HashState<S, T, H>) {
        if state.dead.is_empty() || state.last_dead_check.elapsed() <= self.config.dead_timeout {
            return;
        }
        let due: Vec<String> = state
            .dead
            .iter()
            .filter(|(_, died_at)| died_at.elapsed() > self.config.dead_timeout)
            .map(|(server_key, _)| server_key.clone())
            .collect();
        for server_key in due {
            state.dead.remove(&server_key);
            if let Some((server, _)) = state.clients.remove(&server_key) {
                debug!("reviving dead server {}", server_key);
                self.register(state, server);
            }
        }
        // one bookkeeping update per sweep
        state.last_dead_check = Instant::now();
    }

    // -- single-key commands -----------------------------------------------

    pub fn set(
        &self,
        key: impl Into<RoutedKey>,
        value: &S::Value,
        expire: u32,
        noreply: Option<bool>,
        flags: Option<u16>,
    ) -> Result<bool, Error> {
        let key = key.into();
        self.run_cmd(&key, || false, |client| {
            client.set(key.key(), value, expire, noreply, flags)
        })
    }

    pub fn add(
        &self,
        key: impl Into<RoutedKey>,
        value: &S::Value,
        expire: u32,
        noreply: Option<bool>,
        flags: Option<u16>,
    ) -> Result<bool, Error> {
        let key = key.into();
        self.run_cmd(&key, || false, |client| {
            client.add(key.key(), value, expire, noreply, flags)
        })
    }

    pub fn replace(
        &self,
        key: impl Into<RoutedKey>,
        value: &S::Value,
        expire: u32,
        noreply: Option<bool>,
        flags: Option<u16>,
    ) -> Result<bool, Error> {
        let key = key.into();
        self.run_cmd(&key, || false, |client| {
            client.replace(key.key(), value, expire, noreply, flags)
        })
    }

    pub fn append(
        &self,
        key: impl Into<RoutedKey>,
        value: &S::Value,
        expire: u32,
        noreply: Option<bool>,
        flags: Option<u16>,
    ) -> Result<bool, Error> {
        let key = key.into();
        self.run_cmd(&key, || false, |client| {
            client.append(key.key(), value, expire, noreply, flags)
        })
    }

    pub fn prepend(
        &self,
        key: impl Into<RoutedKey>,
        value: &S::Value,
        expire: u32,
        noreply: Option<bool>,
        flags: Option<u16>,
    ) -> Result<bool, Error> {
        let key = key.into();
        self.run_cmd(&key, || false, |client| {
            client.prepend(key.key(), value, expire, noreply, flags)
        })
    }

    pub fn cas(
        &self,
        key: impl Into<RoutedKey>,
        value: &S::Value,
        cas: &CasToken,
        expire: u32,
        noreply: Option<bool>,
        flags: Option<u16>,
    ) -> Result<Option<bool>, Error> {
        let key = key.into();
        self.run_cmd(&key, || None, |client| {
            client.cas(key.key(), value, cas, expire, noreply, flags)
        })
    }

    pub fn get(&self, key: impl Into<RoutedKey>) -> Result<Option<S::Value>, Error> {
        let key = key.into();
        self.run_cmd(&key, || None, |client| client.get(key.key()))
    }

    pub fn gets(&self, key: impl Into<RoutedKey>) -> Result<Option<(S::Value, CasToken)>, Error> {
        let key = key.into();
        self.run_cmd(&key, || None, |client| client.gets(key.key()))
    }

    pub fn delete(&self, key: impl Into<RoutedKey>, noreply: Option<bool>) -> Result<bool, Error> {
        let key = key.into();
        self.run_cmd(&key, || false, |client| client.delete(key.key(), noreply))
    }

    pub fn incr(
        &self,
        key: impl Into<RoutedKey>,
        value: u64,
        noreply: Option<bool>,
    ) -> Result<Option<u64>, Error> {
        let key = key.into();
        self.run_cmd(&key, || None, |client| client.incr(key.key(), value, noreply))
    }

    pub fn decr(
        &self,
        key: impl Into<RoutedKey>,
        value: u64,
        noreply: Option<bool>,
    ) -> Result<Option<u64>, Error> {
        let key = key.into();
        self.run_cmd(&key, || None, |client| client.decr(key.key(), value, noreply))
    }

    pub fn touch(
        &self,
        key: impl Into<RoutedKey>,
        expire: u32,
        noreply: Option<bool>,
    ) -> Result<bool, Error> {
        let key = key.into();
        self.run_cmd(&key, || false, |client| client.touch(key.key(), expire, noreply))
    }

    /// The `stats` command against one server of the cluster.
    pub fn stats(
        &self,
        server: &ServerEndpoint,
        args: &[&str],
    ) -> Result<HashMap<Vec<u8>, Vec<u8>>, Error> {
        let key = RoutedKey::pinned(server.server_key(), Vec::new());
        self.run_cmd(&key, HashMap::new, |client| client.stats(args))
    }

    // -- multi-key commands ------------------------------------------------

    /// Fetch keys across the cluster with one batched command per
    /// server. The result may be partial: misses and keys owned by
    /// quarantined servers are simply absent.
    pub fn get_many(&self, keys: &[RoutedKey]) -> Result<HashMap<Vec<u8>, S::Value>, Error> {
        let mut result = HashMap::new();
        for (server_key, node, batch) in self.grouped(keys) {
            let key_bytes: Vec<&[u8]> = batch.iter().map(|key| key.key()).collect();
            let sub = node.run(|client| client.get_many(&key_bytes));
            result.extend(self.record(&server_key, sub, HashMap::new)?);
        }
        Ok(result)
    }

    /// Fetch keys and their CAS tokens across the cluster.
    pub fn gets_many(
        &self,
        keys: &[RoutedKey],
    ) -> Result<HashMap<Vec<u8>, (S::Value, CasToken)>, Error> {
        let mut result = HashMap::new();
        for (server_key, node, batch) in self.grouped(keys) {
            let key_bytes: Vec<&[u8]> = batch.iter().map(|key| key.key()).collect();
            let sub = node.run(|client| client.gets_many(&key_bytes));
            result.extend(self.record(&server_key, sub, HashMap::new)?);
        }
        Ok(result)
    }

    /// Store pairs across the cluster with one batched command per
    /// server, returning every key that was not stored. A server that
    /// fails or is quarantined contributes its whole batch.
    pub fn set_many(
        &self,
        values: &[(RoutedKey, S::Value)],
        expire: u32,
        noreply: Option<bool>,
        flags: Option<u16>,
    ) -> Result<Vec<Vec<u8>>, Error> {
        let mut failed = Vec::new();
        let keys: Vec<RoutedKey> = values.iter().map(|(key, _)| key.clone()).collect();
        let by_key: HashMap<&[u8], &S::Value> =
            values.iter().map(|(key, value)| (key.key(), value)).collect();

        let mut routed: Vec<Vec<u8>> = Vec::new();
        for (server_key, node, batch) in self.grouped(&keys) {
            let pairs: Vec<(&[u8], &S::Value)> = batch
                .iter()
                .filter_map(|key| by_key.get(key.key()).map(|value| (key.key(), *value)))
                .collect();
            routed.extend(batch.iter().map(|key| key.key().to_vec()));
            let batch_keys: Vec<Vec<u8>> = pairs.iter().map(|(key, _)| key.to_vec()).collect();
            let sub = node.run(|client| client.set_many(&pairs, expire, noreply, flags));
            failed.extend(self.record(&server_key, sub, || batch_keys)?);
        }

        // keys that found no live server cannot have been stored
        for (key, _) in values {
            if !routed.iter().any(|k| k == key.key()) {
                failed.push(key.key().to_vec());
            }
        }
        Ok(failed)
    }

    /// Delete keys across the cluster with one batched command per
    /// server. `true` only if every batch was acknowledged.
    pub fn delete_many(&self, keys: &[RoutedKey], noreply: Option<bool>) -> Result<bool, Error> {
        let mut all = true;
        let mut routed = 0;
        for (server_key, node, batch) in self.grouped(keys) {
            routed += batch.len();
            let key_bytes: Vec<&[u8]> = batch.iter().map(|key| key.key()).collect();
            let sub = node.run(|client| client.delete_many(&key_bytes, noreply));
            if !self.record(&server_key, sub, || false)? {
                all = false;
            }
        }
        if routed < keys.len() {
            all = false;
        }
        Ok(all)
    }

    // Group keys by their elected server, preserving the caller's order
    // within each batch, and resolve each group through the gate. Keys
    // whose server is quarantined or unknown produce no group entry.
    fn grouped<'a>(
        &self,
        keys: &'a [RoutedKey],
    ) -> Vec<(String, Arc<Node<S, T>>, Vec<&'a RoutedKey>)> {
        let mut state = self.lock_state();
        self.revive_dead(&mut state);

        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<&RoutedKey>> = HashMap::new();
        for key in keys {
            let server_key = match self.elect(&state, key) {
                Some(server_key) => server_key,
                None => continue,
            };
            if !groups.contains_key(&server_key) {
                order.push(server_key.clone());
            }
            groups.entry(server_key).or_insert_with(Vec::new).push(key);
        }

        let mut out = Vec::with_capacity(order.len());
        for server_key in order {
            let node = match state.clients.get(&server_key) {
                Some((_, node)) => node.clone(),
                None => continue,
            };
            if !self.gate(&mut state, &server_key) {
                continue;
            }
            if let Some(batch) = groups.remove(&server_key) {
                out.push((server_key, node, batch));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::time::{Duration, Instant};

    use assert_matches::assert_matches;

    use crate::client::ClientConfig;
    use crate::error::Error;
    use crate::rendezvous::{NodeHasher, RendezvousHash};
    use crate::serde::NoSerde;
    use crate::transport::testing::ScriptedTransport;
    use crate::transport::{NetConfig, ServerEndpoint, Transport};

    use super::{HashClient, HashConfig, RoutedKey};

    /// Refuses every connection, like a downed server.
    struct RefusedTransport;

    impl Transport for RefusedTransport {
        fn connect(_: &ServerEndpoint, _: &NetConfig) -> Result<Self, Error> {
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into())
        }

        fn recv(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::NotConnected, "not connected"))
        }

        fn send_all(&mut self, _: &[u8]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::NotConnected, "not connected"))
        }
    }

    /// Connects everywhere except port 12002, like one downed server in
    /// a healthy cluster.
    struct HalfClusterTransport(ScriptedTransport);

    impl Transport for HalfClusterTransport {
        fn connect(endpoint: &ServerEndpoint, config: &NetConfig) -> Result<Self, Error> {
            match endpoint {
                ServerEndpoint::Tcp { port: 12002, .. } => {
                    Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into())
                }
                _ => Ok(HalfClusterTransport(ScriptedTransport::connect(
                    endpoint, config,
                )?)),
            }
        }

        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.recv(buf)
        }

        fn send_all(&mut self, data: &[u8]) -> io::Result<()> {
            self.0.send_all(data)
        }
    }

    fn servers(n: u16) -> Vec<ServerEndpoint> {
        (0..n)
            .map(|i| ServerEndpoint::tcp("10.0.0.1", 12000 + i))
            .collect()
    }

    fn cluster<T: Transport + 'static>(
        n: u16,
        config: HashConfig,
    ) -> HashClient<NoSerde, T, RendezvousHash> {
        HashClient::with_config(servers(n), NoSerde, RendezvousHash::default(), config)
    }

    fn reply_config() -> HashConfig {
        HashConfig {
            client: ClientConfig {
                default_noreply: false,
                ..ClientConfig::default()
            },
            ..HashConfig::default()
        }
    }

    #[test]
    fn test_noreply_set_routes_somewhere() {
        let client = cluster::<ScriptedTransport>(3, HashConfig::default());
        assert!(client.set(b"key", &b"value".to_vec(), 0, Some(true), None).unwrap());
        assert_eq!(3, client.servers().len());
    }

    #[test]
    fn test_empty_cluster_raises_no_servers() {
        let client = cluster::<ScriptedTransport>(0, HashConfig::default());
        assert_matches!(client.get(b"key"), Err(Error::NoServers));
    }

    #[test]
    fn test_empty_cluster_with_ignore_exc_returns_default() {
        let mut config = HashConfig::default();
        config.client.ignore_exc = true;
        let client = cluster::<ScriptedTransport>(0, config);
        assert_eq!(None, client.get(b"key").unwrap());
        assert!(!client.set(b"key", &b"v".to_vec(), 0, None, None).unwrap());
    }

    #[test]
    fn test_io_error_moves_server_to_failing() {
        let client = cluster::<RefusedTransport>(1, HashConfig::default());
        // absorbed by the failure machine; the caller sees the default
        assert_eq!(None, client.get(b"key").unwrap());

        let state = client.lock_state();
        assert_eq!(1, state.failed.len());
        let fail = state.failed.values().next().unwrap();
        assert_eq!(0, fail.attempts);
        assert!(state.dead.is_empty());
    }

    #[test]
    fn test_zero_retry_attempts_kills_on_first_error() {
        let config = HashConfig {
            retry_attempts: 0,
            ..HashConfig::default()
        };
        let client = cluster::<RefusedTransport>(2, config);
        assert!(!client.set(b"key", &b"v".to_vec(), 0, Some(false), None).unwrap());

        let state = client.lock_state();
        assert_eq!(1, state.dead.len());
        assert!(state.failed.is_empty());
        // the dead server no longer routes
        assert_eq!(1, state.hasher.nodes().len());
    }

    #[test]
    fn test_failing_server_short_circuits_inside_cooldown() {
        let config = HashConfig {
            retry_timeout: Duration::from_secs(3600),
            ..HashConfig::default()
        };
        let client = cluster::<RefusedTransport>(1, config);
        assert_eq!(None, client.get(b"key").unwrap());

        // inside the cooldown no second attempt is made, so the attempt
        // counter stays put
        assert_eq!(None, client.get(b"key").unwrap());
        let state = client.lock_state();
        assert_eq!(0, state.failed.values().next().unwrap().attempts);
    }

    #[test]
    fn test_retry_after_cooldown_counts_attempts_then_dies() {
        let config = HashConfig {
            retry_attempts: 2,
            retry_timeout: Duration::from_secs(3600),
            ..HashConfig::default()
        };
        let client = cluster::<RefusedTransport>(1, config);
        let server_key = client.servers().remove(0);

        assert_eq!(None, client.get(b"key").unwrap());
        for expect_attempts in 1..=2 {
            // force the cooldown open
            {
                let mut state = client.lock_state();
                let fail = state.failed.get_mut(&server_key).unwrap();
                fail.first_failed = Instant::now() - Duration::from_secs(7200);
            }
            assert_eq!(None, client.get(b"key").unwrap());
            let state = client.lock_state();
            assert_eq!(
                expect_attempts,
                state.failed.get(&server_key).unwrap().attempts
            );
        }

        // budget exhausted: the next call performs the dead transition
        assert_eq!(None, client.get(b"key").unwrap());
        let state = client.lock_state();
        assert!(state.failed.is_empty());
        assert!(state.dead.contains_key(&server_key));
        assert!(state.hasher.nodes().is_empty());
    }

    #[test]
    fn test_dead_server_revives_after_timeout() {
        let config = HashConfig {
            retry_attempts: 0,
            dead_timeout: Duration::from_secs(60),
            ..HashConfig::default()
        };
        let client = cluster::<RefusedTransport>(1, config);
        let server_key = client.servers().remove(0);
        assert_eq!(None, client.get(b"key").unwrap());
        {
            let state = client.lock_state();
            assert!(state.dead.contains_key(&server_key));
        }

        // age both the corpse and the sweep clock past dead_timeout
        {
            let mut state = client.lock_state();
            let died_at = state.dead.get_mut(&server_key).unwrap();
            *died_at = Instant::now() - Duration::from_secs(300);
            state.last_dead_check = Instant::now() - Duration::from_secs(300);
        }

        // the next dispatch sweeps, readmits the server, and the still
        // refused connection kills it again on the spot
        assert_eq!(None, client.get(b"key").unwrap());
        let state = client.lock_state();
        assert_eq!(1, state.dead.len());
        assert!(state.failed.is_empty());
        // a fresh corpse, not the backdated one: the sweep did run
        let died_at = state.dead.get(&server_key).unwrap();
        assert!(died_at.elapsed() < Duration::from_secs(60));
    }

    #[test]
    fn test_set_many_partial_failure_across_servers() {
        // two servers, one refusing connections: the keys it owns come
        // back as failed, the rest succeed
        let client = cluster::<HalfClusterTransport>(3, reply_config());
        let values: Vec<(RoutedKey, Vec<u8>)> = (0..60)
            .map(|i| {
                (
                    RoutedKey::from(format!("key{}", i).into_bytes()),
                    b"v".to_vec(),
                )
            })
            .collect();

        let failed = client.set_many(&values, 0, Some(true), None).unwrap();

        let down = "10.0.0.1:12002";
        let state = client.lock_state();
        assert!(state.failed.contains_key(down));
        drop(state);

        // with noreply, healthy servers report nothing as failed, so
        // every failed key belongs to the downed server
        assert!(!failed.is_empty());
        let hasher = {
            let mut hasher = RendezvousHash::default();
            for i in 0..3 {
                hasher.add_node(&format!("10.0.0.1:{}", 12000 + i));
            }
            hasher
        };
        for key in &failed {
            assert_eq!(Some(down), hasher.get_node(key));
        }
        let expected: usize = values
            .iter()
            .filter(|(key, _)| hasher.get_node(key.key()) == Some(down))
            .count();
        assert_eq!(expected, failed.len());
    }

    #[test]
    fn test_get_many_omits_keys_of_quarantined_servers() {
        let client = cluster::<RefusedTransport>(2, reply_config());
        let keys: Vec<RoutedKey> = (0..10)
            .map(|i| RoutedKey::from(format!("key{}", i).into_bytes()))
            .collect();
        // both servers fail; the result is empty rather than an error
        let result = client.get_many(&keys).unwrap();
        assert!(result.is_empty());

        // with both servers now failing, a second call short-circuits
        // and still yields a partial (empty) map
        let result = client.get_many(&keys).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_non_network_errors_respect_ignore_exc() {
        // connects fine but hangs up immediately: UnexpectedClose is not
        // a network-class error, so it propagates...
        let client = cluster::<ScriptedTransport>(1, reply_config());
        assert_matches!(client.get(b"key"), Err(Error::UnexpectedClose));
        {
            let state = client.lock_state();
            assert!(state.failed.is_empty());
            assert!(state.dead.is_empty());
        }

        // ...unless ignore_exc is set
        let mut config = reply_config();
        config.client.ignore_exc = true;
        let client = cluster::<ScriptedTransport>(1, config);
        assert_eq!(None, client.get(b"key").unwrap());
    }

    #[test]
    fn test_pinned_key_overrides_the_hasher() {
        let client = cluster::<RefusedTransport>(2, HashConfig::default());
        let pinned = RoutedKey::pinned("10.0.0.1:12001", b"key".to_vec());
        assert_eq!(None, client.get(pinned).unwrap());

        let state = client.lock_state();
        assert!(state.failed.contains_key("10.0.0.1:12001"));
        assert_eq!(1, state.failed.len());
    }

    #[test]
    fn test_pinned_key_to_unknown_server() {
        let client = cluster::<ScriptedTransport>(1, HashConfig::default());
        let pinned = RoutedKey::pinned("nowhere:1", b"key".to_vec());
        assert_matches!(client.get(pinned), Err(Error::NoServers));
    }

    #[test]
    fn test_add_and_remove_server() {
        let client = cluster::<ScriptedTransport>(1, HashConfig::default());
        client.add_server(ServerEndpoint::tcp("10.0.0.9", 11211));
        assert_eq!(2, client.servers().len());

        client.remove_server(&ServerEndpoint::tcp("10.0.0.9", 11211));
        assert_eq!(1, client.servers().len());
        let state = client.lock_state();
        assert_eq!(1, state.hasher.nodes().len());
    }

    #[test]
    fn test_close_tears_everything_down() {
        let client = cluster::<ScriptedTransport>(3, HashConfig::default());
        client.close();
        assert!(client.servers().is_empty());
        let state = client.lock_state();
        assert!(state.hasher.nodes().is_empty());
    }

    #[test]
    fn test_use_pooling_builds_pooled_nodes() {
        let config = HashConfig {
            use_pooling: true,
            max_pool_size: Some(2),
            ..HashConfig::default()
        };
        let client = cluster::<ScriptedTransport>(2, config);
        assert!(client.set(b"key", &b"value".to_vec(), 0, Some(true), None).unwrap());
    }

    #[test]
    fn test_recovery_clears_failing_state() {
        // refuse once by pinning to the downed port, then succeed via a
        // healthy server to verify the bookkeeping resets
        let config = HashConfig {
            retry_timeout: Duration::from_secs(0),
            ..reply_config()
        };
        let client = cluster::<HalfClusterTransport>(3, config);
        let down_pin = RoutedKey::pinned("10.0.0.1:12002", b"key".to_vec());
        assert!(!client.set(down_pin.clone(), &b"v".to_vec(), 0, Some(true), None).unwrap());
        {
            let state = client.lock_state();
            assert!(state.failed.contains_key("10.0.0.1:12002"));
        }

        // age the failure so the gate lets a retry through, and point
        // the retry at a healthy server by swapping the node out
        {
            let mut state = client.lock_state();
            let fail = state.failed.get_mut("10.0.0.1:12002").unwrap();
            fail.first_failed = Instant::now() - Duration::from_secs(60);
            let healthy = ServerEndpoint::tcp("10.0.0.1", 12001);
            let (_, node) = state.clients.get("10.0.0.1:12001").cloned().unwrap();
            state
                .clients
                .insert("10.0.0.1:12002".to_string(), (healthy, node));
        }

        assert!(client.set(down_pin, &b"v".to_vec(), 0, Some(true), None).unwrap());
        let state = client.lock_state();
        assert!(state.failed.is_empty());
    }
}
