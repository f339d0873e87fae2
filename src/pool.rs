//! Connection pooling. [`ObjectPool`] is the object-agnostic core;
//! [`PooledClient`] puts one in front of [`Client`]s for a single server
//! so concurrent callers each lease their own connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::debug;

use crate::client::{CasToken, Client, ClientConfig};
use crate::error::Error;
use crate::serde::{NoSerde, Serde};
use crate::transport::{NetTransport, ServerEndpoint, Transport};

/// A member leased from an [`ObjectPool`]. Cloning shares the same
/// underlying object.
pub type PoolMember<O> = Arc<Mutex<O>>;

struct IdleEntry<O> {
    member: PoolMember<O>,
    last_used: Instant,
}

struct PoolInner<O> {
    free: Vec<IdleEntry<O>>,
    used: Vec<PoolMember<O>>,
}

/// A bounded, thread-safe pool of reusable objects.
///
/// Members are created on demand up to `max_size` and returned to an
/// ordered free list tagged with their last-used time. Acquiring scans
/// the free list oldest-first and evicts members that sat idle longer
/// than `idle_timeout` through the `after_remove` hook, which always
/// runs outside the pool lock.
pub struct ObjectPool<O> {
    create: Box<dyn Fn() -> O + Send + Sync>,
    after_remove: Option<Box<dyn Fn(&mut O) + Send + Sync>>,
    max_size: usize,
    idle_timeout: Option<Duration>,
    inner: Mutex<PoolInner<O>>,
}

impl<O> ObjectPool<O> {
    /// A pool producing members with `create`. `max_size` of `None` is
    /// effectively unbounded; `idle_timeout` of `None` never expires
    /// idle members.
    pub fn new(
        create: impl Fn() -> O + Send + Sync + 'static,
        after_remove: Option<Box<dyn Fn(&mut O) + Send + Sync>>,
        max_size: Option<usize>,
        idle_timeout: Option<Duration>,
    ) -> Self {
        ObjectPool {
            create: Box::new(create),
            after_remove,
            max_size: max_size.unwrap_or(usize::MAX),
            idle_timeout,
            inner: Mutex::new(PoolInner {
                free: Vec::new(),
                used: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner<O>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of idle members.
    pub fn idle_count(&self) -> usize {
        self.lock().free.len()
    }

    /// Number of leased members.
    pub fn active_count(&self) -> usize {
        self.lock().used.len()
    }

    /// Lease a member, creating one if no usable idle member exists and
    /// the pool is below capacity.
    pub fn acquire(&self) -> Result<PoolMember<O>, Error> {
        let mut expired = Vec::new();
        let leased = {
            let mut inner = self.lock();
            let mut found = None;
            while !inner.free.is_empty() {
                let entry = inner.free.remove(0);
                match self.idle_timeout {
                    Some(idle) if entry.last_used.elapsed() > idle => {
                        expired.push(entry.member);
                    }
                    _ => {
                        found = Some(entry.member);
                        break;
                    }
                }
            }
            match found {
                Some(member) => {
                    inner.used.push(member.clone());
                    Some(member)
                }
                None if inner.used.len() < self.max_size => {
                    let member = Arc::new(Mutex::new((self.create)()));
                    inner.used.push(member.clone());
                    Some(member)
                }
                None => None,
            }
        };

        if !expired.is_empty() {
            debug!("evicting {} idle-expired pool member(s)", expired.len());
            self.remove_members(expired);
        }
        match leased {
            Some(member) => Ok(member),
            None => Err(Error::PoolExhausted),
        }
    }

    /// Return a leased member to the free list. Unknown members are
    /// ignored so a release racing a destroy stays silent.
    pub fn release(&self, member: &PoolMember<O>) {
        let mut inner = self.lock();
        if let Some(idx) = position(&inner.used, member) {
            let member = inner.used.remove(idx);
            inner.free.push(IdleEntry {
                member,
                last_used: Instant::now(),
            });
        }
    }

    /// Drop a leased member from the pool entirely, running
    /// `after_remove` on it. Unknown members are ignored.
    pub fn destroy(&self, member: &PoolMember<O>) {
        let removed = {
            let mut inner = self.lock();
            position(&inner.used, member).map(|idx| inner.used.remove(idx))
        };
        if let Some(member) = removed {
            self.remove_members(vec![member]);
        }
    }

    /// Drop every member, leased or idle, running `after_remove` on each.
    pub fn clear(&self) {
        let members = {
            let mut inner = self.lock();
            let mut members: Vec<_> = inner.free.drain(..).map(|entry| entry.member).collect();
            members.extend(inner.used.drain(..));
            members
        };
        self.remove_members(members);
    }

    /// Lease a member for the duration of `f`, releasing it on success.
    /// On error the member is destroyed when `destroy_on_fail` is set
    /// (a client that raised has an indeterminate socket state and must
    /// not be reused), released otherwise.
    pub fn run<R>(
        &self,
        destroy_on_fail: bool,
        f: impl FnOnce(&mut O) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let member = self.acquire()?;
        let result = {
            let mut obj = member.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut obj)
        };
        match result {
            Ok(value) => {
                self.release(&member);
                Ok(value)
            }
            Err(err) => {
                if destroy_on_fail {
                    self.destroy(&member);
                } else {
                    self.release(&member);
                }
                Err(err)
            }
        }
    }

    // Hooks run with the pool lock released; closing a socket under the
    // lock would stall every other caller.
    fn remove_members(&self, members: Vec<PoolMember<O>>) {
        if let Some(after_remove) = &self.after_remove {
            for member in members {
                let mut obj = member.lock().unwrap_or_else(PoisonError::into_inner);
                after_remove(&mut obj);
            }
        }
    }
}

fn position<O>(list: &[PoolMember<O>], member: &PoolMember<O>) -> Option<usize> {
    list.iter().position(|m| Arc::ptr_eq(m, member))
}

/// A client with the same command surface as [`Client`], backed by a
/// bounded pool of them.
///
/// Pool members are built with `ignore_exc` off so every failure reaches
/// the pool and the broken member can be destroyed; the configured
/// `ignore_exc` is applied here, to the fetch family only.
pub struct PooledClient<S: Serde = NoSerde, T: Transport = NetTransport> {
    server: ServerEndpoint,
    ignore_exc: bool,
    pool: ObjectPool<Client<S, T>>,
}

impl<S, T> PooledClient<S, T>
where
    S: Serde + 'static,
    T: Transport + 'static,
{
    pub fn new(
        server: ServerEndpoint,
        serde: S,
        config: ClientConfig,
        max_size: Option<usize>,
        idle_timeout: Option<Duration>,
    ) -> Self {
        let ignore_exc = config.ignore_exc;
        let member_config = ClientConfig {
            ignore_exc: false,
            ..config
        };
        let member_server = server.clone();
        let pool = ObjectPool::new(
            move || {
                Client::with_config(
                    member_server.clone(),
                    serde.clone(),
                    member_config.clone(),
                )
            },
            Some(Box::new(|client: &mut Client<S, T>| client.close())),
            max_size,
            idle_timeout,
        );
        PooledClient {
            server,
            ignore_exc,
            pool,
        }
    }

    /// The endpoint this pool connects to.
    pub fn server(&self) -> &ServerEndpoint {
        &self.server
    }

    /// Run `f` on a leased client, destroying the client if it fails.
    pub fn run<R>(&self, f: impl FnOnce(&mut Client<S, T>) -> Result<R, Error>) -> Result<R, Error> {
        self.pool.run(true, f)
    }

    /// Close every pooled connection.
    pub fn close(&self) {
        self.pool.clear();
    }

    fn fetch_default<R>(&self, default: R, result: Result<R, Error>) -> Result<R, Error> {
        match result {
            Err(_) if self.ignore_exc => Ok(default),
            other => other,
        }
    }

    pub fn set(
        &self,
        key: &[u8],
        value: &S::Value,
        expire: u32,
        noreply: Option<bool>,
        flags: Option<u16>,
    ) -> Result<bool, Error> {
        self.run(|client| client.set(key, value, expire, noreply, flags))
    }

    pub fn set_many(
        &self,
        values: &[(&[u8], &S::Value)],
        expire: u32,
        noreply: Option<bool>,
        flags: Option<u16>,
    ) -> Result<Vec<Vec<u8>>, Error> {
        self.run(|client| client.set_many(values, expire, noreply, flags))
    }

    pub fn add(
        &self,
        key: &[u8],
        value: &S::Value,
        expire: u32,
        noreply: Option<bool>,
        flags: Option<u16>,
    ) -> Result<bool, Error> {
        self.run(|client| client.add(key, value, expire, noreply, flags))
    }

    pub fn replace(
        &self,
        key: &[u8],
        value: &S::Value,
        expire: u32,
        noreply: Option<bool>,
        flags: Option<u16>,
    ) -> Result<bool, Error> {
        self.run(|client| client.replace(key, value, expire, noreply, flags))
    }

    pub fn append(
        &self,
        key: &[u8],
        value: &S::Value,
        expire: u32,
        noreply: Option<bool>,
        flags: Option<u16>,
    ) -> Result<bool, Error> {
        self.run(|client| client.append(key, value, expire, noreply, flags))
    }

    pub fn prepend(
        &self,
        key: &[u8],
        value: &S::Value,
        expire: u32,
        noreply: Option<bool>,
        flags: Option<u16>,
    ) -> Result<bool, Error> {
        self.run(|client| client.prepend(key, value, expire, noreply, flags))
    }

    pub fn cas(
        &self,
        key: &[u8],
        value: &S::Value,
        cas: &CasToken,
        expire: u32,
        noreply: Option<bool>,
        flags: Option<u16>,
    ) -> Result<Option<bool>, Error> {
        self.run(|client| client.cas(key, value, cas, expire, noreply, flags))
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<S::Value>, Error> {
        let result = self.run(|client| client.get(key));
        self.fetch_default(None, result)
    }

    pub fn get_many(&self, keys: &[&[u8]]) -> Result<HashMap<Vec<u8>, S::Value>, Error> {
        let result = self.run(|client| client.get_many(keys));
        self.fetch_default(HashMap::new(), result)
    }

    pub fn gets(&self, key: &[u8]) -> Result<Option<(S::Value, CasToken)>, Error> {
        let result = self.run(|client| client.gets(key));
        self.fetch_default(None, result)
    }

    pub fn gets_many(
        &self,
        keys: &[&[u8]],
    ) -> Result<HashMap<Vec<u8>, (S::Value, CasToken)>, Error> {
        let result = self.run(|client| client.gets_many(keys));
        self.fetch_default(HashMap::new(), result)
    }

    pub fn delete(&self, key: &[u8], noreply: Option<bool>) -> Result<bool, Error> {
        self.run(|client| client.delete(key, noreply))
    }

    pub fn delete_many(&self, keys: &[&[u8]], noreply: Option<bool>) -> Result<bool, Error> {
        self.run(|client| client.delete_many(keys, noreply))
    }

    pub fn incr(&self, key: &[u8], value: u64, noreply: Option<bool>) -> Result<Option<u64>, Error> {
        self.run(|client| client.incr(key, value, noreply))
    }

    pub fn decr(&self, key: &[u8], value: u64, noreply: Option<bool>) -> Result<Option<u64>, Error> {
        self.run(|client| client.decr(key, value, noreply))
    }

    pub fn touch(&self, key: &[u8], expire: u32, noreply: Option<bool>) -> Result<bool, Error> {
        self.run(|client| client.touch(key, expire, noreply))
    }

    pub fn stats(&self, args: &[&str]) -> Result<HashMap<Vec<u8>, Vec<u8>>, Error> {
        let result = self.run(|client| client.stats(args));
        self.fetch_default(HashMap::new(), result)
    }

    pub fn cache_memlimit(&self, megabytes: u64) -> Result<bool, Error> {
        self.run(|client| client.cache_memlimit(megabytes))
    }

    pub fn version(&self) -> Result<Vec<u8>, Error> {
        self.run(|client| client.version())
    }

    pub fn flush_all(&self, delay: u32, noreply: Option<bool>) -> Result<bool, Error> {
        self.run(|client| client.flush_all(delay, noreply))
    }

    /// Send `quit` on one leased connection and drop it. A quit
    /// connection must not return to the free list.
    pub fn quit(&self) -> Result<(), Error> {
        let member = self.pool.acquire()?;
        let result = {
            let mut client = member.lock().unwrap_or_else(PoisonError::into_inner);
            client.quit()
        };
        self.pool.destroy(&member);
        result
    }
}
