//! The client for a single memcached server.
//!
//! A [`Client`] holds one lazily opened connection and a carry buffer
//! for reply bytes that arrive ahead of their frame. Any framing or I/O
//! error tears the connection down before the error surfaces, so the
//! next command reconnects from a clean state.

use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::time::Duration;

use bytes::BytesMut;
use log::debug;

use crate::error::Error;
use crate::protocol::{self, StoreVerb};
use crate::serde::{NoSerde, Serde};
use crate::transport::{
    KeepaliveOpts, NetConfig, NetTransport, SecureWrapper, ServerEndpoint, Transport,
};

/// Longest key memcached accepts, measured after prefixing.
const MAX_KEY_LEN: usize = 250;

/// Options for a single-server client.
///
/// Timeouts default to indefinite; `default_noreply` is on, matching the
/// common fire-and-forget use of mutating commands.
#[derive(Clone)]
pub struct ClientConfig {
    /// Time allowed for establishing the connection; `None` waits
    /// indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Timeout applied to every send and recv; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Set TCP_NODELAY on TCP connections.
    pub no_delay: bool,
    /// TCP keepalive options, TCP connections only.
    pub keepalive: Option<KeepaliveOpts>,
    /// Bytes prepended to every key before validation, usable as a
    /// namespace.
    pub key_prefix: Vec<u8>,
    /// Default for the `noreply` argument of mutating commands. `cas`,
    /// `incr` and `decr` always default to waiting for the reply.
    pub default_noreply: bool,
    /// Accept arbitrary UTF-8 keys instead of ASCII only.
    pub allow_unicode_keys: bool,
    /// Treat any error on a fetch command as a miss.
    pub ignore_exc: bool,
    /// Wrap freshly connected TCP sockets, e.g. in TLS.
    pub secure_transport: Option<SecureWrapper>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            connect_timeout: None,
            timeout: None,
            no_delay: false,
            keepalive: None,
            key_prefix: Vec::new(),
            default_noreply: true,
            allow_unicode_keys: false,
            ignore_exc: false,
            secure_transport: None,
        }
    }
}

impl ClientConfig {
    pub(crate) fn net_config(&self) -> NetConfig {
        NetConfig {
            connect_timeout: self.connect_timeout,
            timeout: self.timeout,
            no_delay: self.no_delay,
            keepalive: self.keepalive,
            secure_transport: self.secure_transport.clone(),
        }
    }
}

/// Opaque version token returned by `gets` and consumed by `cas`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CasToken(Vec<u8>);

impl CasToken {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        CasToken(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Display for CasToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Validate a key and return it with the prefix applied.
pub(crate) fn check_key(
    key: &[u8],
    allow_unicode_keys: bool,
    key_prefix: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut full = Vec::with_capacity(key_prefix.len() + key.len());
    full.extend_from_slice(key_prefix);
    full.extend_from_slice(key);

    if !allow_unicode_keys && full.iter().any(|&b| b >= 0x80) {
        return Err(Error::IllegalInput(format!(
            "non-ASCII key: {}",
            String::from_utf8_lossy(&full)
        )));
    }
    if full.len() > MAX_KEY_LEN {
        return Err(Error::IllegalInput(format!(
            "key is too long: {}",
            String::from_utf8_lossy(&full)
        )));
    }
    if full
        .iter()
        .any(|&b| b == b' ' || b == b'\t' || b == b'\r' || b == b'\n')
    {
        return Err(Error::IllegalInput(format!(
            "key contains whitespace: {}",
            String::from_utf8_lossy(&full)
        )));
    }
    if full.contains(&0) {
        return Err(Error::IllegalInput(format!(
            "key contains null: {}",
            String::from_utf8_lossy(&full)
        )));
    }
    Ok(full)
}

fn require_sock<T>(sock: &mut Option<T>) -> Result<&mut T, Error> {
    match sock {
        Some(sock) => Ok(sock),
        None => Err(Error::UnexpectedClose),
    }
}

/// A client for a single memcached server.
///
/// The generic parameters pick the value encoding and the transport; the
/// defaults talk raw bytes over plain sockets. A client is not
/// reentrant: share it between threads through a
/// [`PooledClient`](crate::pool::PooledClient) instead.
pub struct Client<S: Serde = NoSerde, T: Transport = NetTransport> {
    server: ServerEndpoint,
    config: ClientConfig,
    serde: S,
    sock: Option<T>,
    readbuf: BytesMut,
}

impl Client {
    /// A client with raw byte values and default options. No connection
    /// is made until the first command.
    pub fn new(server: ServerEndpoint) -> Self {
        Client::with_config(server, NoSerde, ClientConfig::default())
    }
}

impl<S: Serde, T: Transport> Client<S, T> {
    /// A client with the given serde and options. No connection is made
    /// until the first command.
    pub fn with_config(server: ServerEndpoint, serde: S, config: ClientConfig) -> Self {
        Client {
            server,
            config,
            serde,
            sock: None,
            readbuf: BytesMut::new(),
        }
    }

    /// The endpoint this client talks to.
    pub fn server(&self) -> &ServerEndpoint {
        &self.server
    }

    /// Close the connection if one is open. The next command reopens it.
    pub fn close(&mut self) {
        if self.sock.take().is_some() {
            debug!("closed connection to {}", self.server);
        }
        self.readbuf.clear();
    }

    fn check_key(&self, key: &[u8]) -> Result<Vec<u8>, Error> {
        check_key(key, self.config.allow_unicode_keys, &self.config.key_prefix)
    }

    fn ensure_connected(&mut self) -> Result<(), Error> {
        if self.sock.is_none() {
            self.close();
            self.sock = Some(T::connect(&self.server, &self.config.net_config())?);
        }
        Ok(())
    }

    // -- storage family ----------------------------------------------------

    /// The memcached `set` command. Returns `true` unless an error
    /// surfaces; under `noreply` a `true` return does not guarantee the
    /// store happened.
    pub fn set(
        &mut self,
        key: &[u8],
        value: &S::Value,
        expire: u32,
        noreply: Option<bool>,
        flags: Option<u16>,
    ) -> Result<bool, Error> {
        let noreply = noreply.unwrap_or(self.config.default_noreply);
        let results = self.store_cmd(StoreVerb::Set, &[(key, value)], expire, noreply, flags, None)?;
        Ok(results.into_iter().next().flatten() == Some(true))
    }

    /// Store several pairs in one round trip, returning the keys that
    /// were not stored. Under `noreply` the list is always empty.
    pub fn set_many(
        &mut self,
        values: &[(&[u8], &S::Value)],
        expire: u32,
        noreply: Option<bool>,
        flags: Option<u16>,
    ) -> Result<Vec<Vec<u8>>, Error> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let noreply = noreply.unwrap_or(self.config.default_noreply);
        let results = self.store_cmd(StoreVerb::Set, values, expire, noreply, flags, None)?;
        Ok(values
            .iter()
            .zip(results)
            .filter(|(_, stored)| *stored != Some(true))
            .map(|((key, _), _)| key.to_vec())
            .collect())
    }

    /// The memcached `add` command: store only if the key is absent.
    /// `false` means the key already existed.
    pub fn add(
        &mut self,
        key: &[u8],
        value: &S::Value,
        expire: u32,
        noreply: Option<bool>,
        flags: Option<u16>,
    ) -> Result<bool, Error> {
        let noreply = noreply.unwrap_or(self.config.default_noreply);
        let results = self.store_cmd(StoreVerb::Add, &[(key, value)], expire, noreply, flags, None)?;
        Ok(results.into_iter().next().flatten() == Some(true))
    }

    /// The memcached `replace` command: store only if the key exists.
    pub fn replace(
        &mut self,
        key: &[u8],
        value: &S::Value,
        expire: u32,
        noreply: Option<bool>,
        flags: Option<u16>,
    ) -> Result<bool, Error> {
        let noreply = noreply.unwrap_or(self.config.default_noreply);
        let results =
            self.store_cmd(StoreVerb::Replace, &[(key, value)], expire, noreply, flags, None)?;
        Ok(results.into_iter().next().flatten() == Some(true))
    }

    /// The memcached `append` command.
    pub fn append(
        &mut self,
        key: &[u8],
        value: &S::Value,
        expire: u32,
        noreply: Option<bool>,
        flags: Option<u16>,
    ) -> Result<bool, Error> {
        let noreply = noreply.unwrap_or(self.config.default_noreply);
        let results =
            self.store_cmd(StoreVerb::Append, &[(key, value)], expire, noreply, flags, None)?;
        Ok(results.into_iter().next().flatten() == Some(true))
    }

    /// The memcached `prepend` command.
    pub fn prepend(
        &mut self,
        key: &[u8],
        value: &S::Value,
        expire: u32,
        noreply: Option<bool>,
        flags: Option<u16>,
    ) -> Result<bool, Error> {
        let noreply = noreply.unwrap_or(self.config.default_noreply);
        let results =
            self.store_cmd(StoreVerb::Prepend, &[(key, value)], expire, noreply, flags, None)?;
        Ok(results.into_iter().next().flatten() == Some(true))
    }

    /// The memcached `cas` command. `Some(true)` if stored, `Some(false)`
    /// if the token no longer matches, `None` if the key is absent.
    pub fn cas(
        &mut self,
        key: &[u8],
        value: &S::Value,
        cas: &CasToken,
        expire: u32,
        noreply: Option<bool>,
        flags: Option<u16>,
    ) -> Result<Option<bool>, Error> {
        let noreply = noreply.unwrap_or(false);
        let mut results =
            self.store_cmd(StoreVerb::Cas, &[(key, value)], expire, noreply, flags, Some(cas))?;
        Ok(results.pop().unwrap_or(None))
    }

    fn store_cmd(
        &mut self,
        verb: StoreVerb,
        values: &[(&[u8], &S::Value)],
        expire: u32,
        noreply: bool,
        flags: Option<u16>,
        cas: Option<&CasToken>,
    ) -> Result<Vec<Option<bool>>, Error> {
        // Validation and encoding happen before any bytes move, so an
        // illegal key or value leaves the connection untouched.
        let mut buf = Vec::new();
        for (key, value) in values {
            let key = self.check_key(key)?;
            let (data, serde_flags) = self.serde.serialize(&key, value)?;
            let flags = flags.unwrap_or(serde_flags);
            protocol::store_command(
                verb,
                &key,
                flags,
                expire,
                &data,
                cas.map(CasToken::as_bytes),
                noreply,
                &mut buf,
            );
        }

        match self.store_exchange(&buf, verb, values.len(), noreply) {
            Ok(results) => Ok(results),
            Err(err) => {
                self.close();
                Err(err)
            }
        }
    }

    fn store_exchange(
        &mut self,
        cmds: &[u8],
        verb: StoreVerb,
        count: usize,
        noreply: bool,
    ) -> Result<Vec<Option<bool>>, Error> {
        self.ensure_connected()?;
        let sock = require_sock(&mut self.sock)?;
        sock.send_all(cmds)?;
        if noreply {
            return Ok(vec![Some(true); count]);
        }

        // Replies come back in the order the commands were sent.
        let mut results = Vec::with_capacity(count);
        for _ in 0..count {
            let line = protocol::read_line(sock, &mut self.readbuf)?;
            protocol::check_error_reply(&line, verb.name())?;
            results.push(verb.parse_reply(&line)?);
        }
        Ok(results)
    }

    // -- fetch family ------------------------------------------------------

    /// Fetch one key. `None` is a miss.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<S::Value>, Error> {
        let mut result = self.fetch_cmd("get", &[key], false)?;
        Ok(result.remove(key).map(|(value, _)| value))
    }

    /// Fetch several keys in one command. Missing keys are absent from
    /// the map, which is keyed by the caller's unprefixed keys.
    pub fn get_many(&mut self, keys: &[&[u8]]) -> Result<HashMap<Vec<u8>, S::Value>, Error> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let result = self.fetch_cmd("get", keys, false)?;
        Ok(result
            .into_iter()
            .map(|(key, (value, _))| (key, value))
            .collect())
    }

    /// Fetch one key together with its CAS token.
    pub fn gets(&mut self, key: &[u8]) -> Result<Option<(S::Value, CasToken)>, Error> {
        let mut result = self.gets_many(&[key])?;
        Ok(result.remove(key))
    }

    /// Fetch several keys together with their CAS tokens.
    pub fn gets_many(
        &mut self,
        keys: &[&[u8]],
    ) -> Result<HashMap<Vec<u8>, (S::Value, CasToken)>, Error> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let result = self.fetch_cmd("gets", keys, true)?;
        let mut out = HashMap::with_capacity(result.len());
        for (key, (value, cas)) in result {
            match cas {
                Some(cas) => {
                    out.insert(key, (value, cas));
                }
                None => return Err(Error::Unknown("gets reply missing cas".to_string())),
            }
        }
        Ok(out)
    }

    fn fetch_cmd(
        &mut self,
        name: &str,
        keys: &[&[u8]],
        expect_cas: bool,
    ) -> Result<HashMap<Vec<u8>, (S::Value, Option<CasToken>)>, Error> {
        let mut prefixed = Vec::with_capacity(keys.len());
        let mut originals = HashMap::with_capacity(keys.len());
        for key in keys {
            let full = self.check_key(key)?;
            originals.insert(full.clone(), key.to_vec());
            prefixed.push(full);
        }
        let cmd = protocol::fetch_command(name, &prefixed);

        match self.fetch_exchange(&cmd, name, expect_cas, &originals) {
            Ok(result) => Ok(result),
            Err(err) => {
                self.close();
                if self.config.ignore_exc {
                    return Ok(HashMap::new());
                }
                Err(err)
            }
        }
    }

    fn fetch_exchange(
        &mut self,
        cmd: &[u8],
        name: &str,
        expect_cas: bool,
        originals: &HashMap<Vec<u8>, Vec<u8>>,
    ) -> Result<HashMap<Vec<u8>, (S::Value, Option<CasToken>)>, Error> {
        self.ensure_connected()?;
        let sock = require_sock(&mut self.sock)?;
        sock.send_all(cmd)?;

        let mut result = HashMap::new();
        loop {
            let line = protocol::read_line(sock, &mut self.readbuf)?;
            protocol::check_error_reply(&line, name)?;
            if line == b"END" || line == b"OK" {
                return Ok(result);
            } else if line.starts_with(b"VALUE ") {
                let header = protocol::parse_value_header(&line, expect_cas)?;
                let data = protocol::read_value(sock, &mut self.readbuf, header.size)?;
                let value = self.serde.deserialize(&header.key, data, header.flags)?;
                // map the reply back to the caller's unprefixed key
                let original = originals
                    .get(&header.key)
                    .cloned()
                    .ok_or_else(|| protocol::unknown_reply(&line))?;
                result.insert(original, (value, header.cas.map(CasToken::new)));
            } else {
                return Err(protocol::unknown_reply(&line));
            }
        }
    }

    /// The memcached `stats` command. Values are returned as raw bytes;
    /// `stats cachedump` `ITEM` lines land in the map with their
    /// remainder joined as the value.
    pub fn stats(&mut self, args: &[&str]) -> Result<HashMap<Vec<u8>, Vec<u8>>, Error> {
        let mut cmd = b"stats".to_vec();
        for arg in args {
            cmd.push(b' ');
            cmd.extend_from_slice(arg.as_bytes());
        }
        cmd.extend_from_slice(b"\r\n");

        match self.stats_exchange(&cmd) {
            Ok(result) => Ok(result),
            Err(err) => {
                self.close();
                if self.config.ignore_exc {
                    return Ok(HashMap::new());
                }
                Err(err)
            }
        }
    }

    fn stats_exchange(&mut self, cmd: &[u8]) -> Result<HashMap<Vec<u8>, Vec<u8>>, Error> {
        self.ensure_connected()?;
        let sock = require_sock(&mut self.sock)?;
        sock.send_all(cmd)?;

        let mut result = HashMap::new();
        loop {
            let line = protocol::read_line(sock, &mut self.readbuf)?;
            protocol::check_error_reply(&line, "stats")?;
            if line == b"END" || line == b"OK" {
                return Ok(result);
            }
            let mut parts = line.splitn(3, |&b| b == b' ');
            match parts.next() {
                Some(b"STAT") | Some(b"ITEM") => {
                    let name = parts.next().ok_or_else(|| protocol::unknown_reply(&line))?;
                    let value = parts.next().unwrap_or(b"");
                    result.insert(name.to_vec(), value.to_vec());
                }
                _ => return Err(protocol::unknown_reply(&line)),
            }
        }
    }

    /// The memcached `cache_memlimit` command, taking megabytes.
    pub fn cache_memlimit(&mut self, megabytes: u64) -> Result<bool, Error> {
        let arg = megabytes.to_string();
        let cmd = protocol::line_command(&[b"cache_memlimit", arg.as_bytes()], false);
        let result = self
            .misc_cmd(&[cmd], "cache_memlimit", false)
            .and_then(|lines| match lines.into_iter().next() {
                Some(ref line) if line == b"OK" => Ok(true),
                Some(line) => {
                    self.close();
                    Err(protocol::unknown_reply(&line))
                }
                None => Ok(true),
            });
        match result {
            Err(_) if self.config.ignore_exc => Ok(true),
            other => other,
        }
    }

    // -- misc family -------------------------------------------------------

    /// The memcached `delete` command. `true` if the key was deleted,
    /// `false` if it was not found; always `true` under `noreply`.
    pub fn delete(&mut self, key: &[u8], noreply: Option<bool>) -> Result<bool, Error> {
        let noreply = noreply.unwrap_or(self.config.default_noreply);
        let key = self.check_key(key)?;
        let cmd = protocol::line_command(&[b"delete", &key], noreply);
        let results = self.misc_cmd(&[cmd], "delete", noreply)?;
        Ok(noreply || results.first().map_or(false, |line| line == b"DELETED"))
    }

    /// Delete several keys, one command line each, in one write. `true`
    /// even if some keys were not found.
    pub fn delete_many(&mut self, keys: &[&[u8]], noreply: Option<bool>) -> Result<bool, Error> {
        if keys.is_empty() {
            return Ok(true);
        }
        let noreply = noreply.unwrap_or(self.config.default_noreply);
        let mut cmds = Vec::with_capacity(keys.len());
        for key in keys {
            let key = self.check_key(key)?;
            cmds.push(protocol::line_command(&[b"delete", &key], noreply));
        }
        self.misc_cmd(&cmds, "delete", noreply)?;
        Ok(true)
    }

    /// The memcached `incr` command. `None` when the key is absent;
    /// always `None` under `noreply`.
    pub fn incr(&mut self, key: &[u8], value: u64, noreply: Option<bool>) -> Result<Option<u64>, Error> {
        self.count_cmd(b"incr", "incr", key, value, noreply)
    }

    /// The memcached `decr` command. `None` when the key is absent;
    /// always `None` under `noreply`.
    pub fn decr(&mut self, key: &[u8], value: u64, noreply: Option<bool>) -> Result<Option<u64>, Error> {
        self.count_cmd(b"decr", "decr", key, value, noreply)
    }

    fn count_cmd(
        &mut self,
        token: &[u8],
        name: &str,
        key: &[u8],
        value: u64,
        noreply: Option<bool>,
    ) -> Result<Option<u64>, Error> {
        let noreply = noreply.unwrap_or(false);
        let key = self.check_key(key)?;
        let amount = value.to_string();
        let cmd = protocol::line_command(&[token, &key, amount.as_bytes()], noreply);
        let results = self.misc_cmd(&[cmd], name, noreply)?;
        if noreply {
            return Ok(None);
        }
        match results.into_iter().next() {
            Some(ref line) if line == b"NOT_FOUND" => Ok(None),
            Some(line) => match protocol::ascii_u64(&line) {
                Some(n) => Ok(Some(n)),
                None => {
                    self.close();
                    Err(protocol::unknown_reply(&line))
                }
            },
            None => Ok(None),
        }
    }

    /// The memcached `touch` command. `true` if the expiry was updated,
    /// `false` if the key was not found.
    pub fn touch(&mut self, key: &[u8], expire: u32, noreply: Option<bool>) -> Result<bool, Error> {
        let noreply = noreply.unwrap_or(self.config.default_noreply);
        let key = self.check_key(key)?;
        let expire = expire.to_string();
        let cmd = protocol::line_command(&[b"touch", &key, expire.as_bytes()], noreply);
        let results = self.misc_cmd(&[cmd], "touch", noreply)?;
        Ok(noreply || results.first().map_or(false, |line| line == b"TOUCHED"))
    }

    /// The memcached `flush_all` command, dropping every item after
    /// `delay` seconds.
    pub fn flush_all(&mut self, delay: u32, noreply: Option<bool>) -> Result<bool, Error> {
        let noreply = noreply.unwrap_or(self.config.default_noreply);
        let delay = delay.to_string();
        let cmd = protocol::line_command(&[b"flush_all", delay.as_bytes()], noreply);
        let results = self.misc_cmd(&[cmd], "flush_all", noreply)?;
        Ok(noreply || results.first().map_or(false, |line| line == b"OK"))
    }

    /// The memcached `version` command, returning the raw version string.
    pub fn version(&mut self) -> Result<Vec<u8>, Error> {
        let cmd = b"version\r\n".to_vec();
        let results = self.misc_cmd(&[cmd], "version", false)?;
        let line = results.into_iter().next().unwrap_or_default();
        if !line.starts_with(b"VERSION ") {
            self.close();
            return Err(protocol::unknown_reply(&line));
        }
        Ok(line[b"VERSION ".len()..].to_vec())
    }

    /// Send `quit` and drop the connection. The client can be reused;
    /// the next command reconnects.
    pub fn quit(&mut self) -> Result<(), Error> {
        let cmd = b"quit\r\n".to_vec();
        self.misc_cmd(&[cmd], "quit", true)?;
        self.close();
        Ok(())
    }

    fn misc_cmd(
        &mut self,
        cmds: &[Vec<u8>],
        name: &str,
        noreply: bool,
    ) -> Result<Vec<Vec<u8>>, Error> {
        match self.misc_exchange(cmds, name, noreply) {
            Ok(lines) => Ok(lines),
            Err(err) => {
                self.close();
                Err(err)
            }
        }
    }

    fn misc_exchange(
        &mut self,
        cmds: &[Vec<u8>],
        name: &str,
        noreply: bool,
    ) -> Result<Vec<Vec<u8>>, Error> {
        self.ensure_connected()?;
        let sock = require_sock(&mut self.sock)?;
        let mut buf = Vec::new();
        for cmd in cmds {
            buf.extend_from_slice(cmd);
        }
        sock.send_all(&buf)?;
        if noreply {
            return Ok(Vec::new());
        }

        let mut results = Vec::with_capacity(cmds.len());
        for _ in cmds {
            let line = protocol::read_line(sock, &mut self.readbuf)?;
            protocol::check_error_reply(&line, name)?;
            results.push(line);
        }
        Ok(results)
    }

    // -- raw commands ------------------------------------------------------

    /// Send a raw command line and read until `end_token`, returning
    /// everything before the token. For commands outside the core
    /// protocol, e.g. `config get cluster`.
    pub fn raw_command(&mut self, cmd: &[u8], end_token: &[u8]) -> Result<Vec<u8>, Error> {
        let mut line = cmd.to_vec();
        if !line.ends_with(b"\r\n") {
            line.extend_from_slice(b"\r\n");
        }
        match self.raw_exchange(&line, end_token) {
            Ok(payload) => Ok(payload),
            Err(err) => {
                self.close();
                Err(err)
            }
        }
    }

    fn raw_exchange(&mut self, cmd: &[u8], end_token: &[u8]) -> Result<Vec<u8>, Error> {
        self.ensure_connected()?;
        let sock = require_sock(&mut self.sock)?;
        sock.send_all(cmd)?;
        loop {
            if let Some(pos) = protocol::find_token(&self.readbuf, end_token) {
                let mut payload = self.readbuf.split_to(pos + end_token.len());
                payload.truncate(pos);
                return Ok(payload.to_vec());
            }
            protocol::recv_more(sock, &mut self.readbuf)?;
        }
    }
}
