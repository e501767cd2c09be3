//! Cache key and dedupe key encoding.
//!
//! Each identity component is written netstring-style (`<len>:<bytes>,`), so
//! the encoding is deterministic and no two identities share a key even when
//! their components contain separator characters.
//!
//! Two variants exist: [`encode_key`] allocates a fresh buffer and is used on
//! the (rare) fill path, while [`KeyBufferPool::with_key`] reuses pooled
//! buffers on the hot lookup path.

use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

use waypoint_core::EntityIdentity;

/// Buffers above this capacity are dropped instead of pooled.
const MAX_POOLED_CAPACITY: usize = 1024;

/// Upper bound on idle buffers kept by a pool.
const DEFAULT_MAX_IDLE: usize = 256;

/// Append the encoded key for `identity` to `buf`.
pub fn encode_key_into(buf: &mut Vec<u8>, identity: &EntityIdentity) {
    for part in [identity.namespace(), identity.module_id(), identity.entity_id()] {
        push_decimal(buf, part.len());
        buf.push(b':');
        buf.extend_from_slice(part.as_bytes());
        buf.push(b',');
    }
}

/// Encode `identity` into a newly allocated key.
pub fn encode_key(identity: &EntityIdentity) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_len(identity));
    encode_key_into(&mut buf, identity);
    buf
}

/// Key under which concurrent fills for the same identity and exclusion set
/// are coalesced.
///
/// Distinct exclusion sets never share a dedupe key, so a request that must
/// avoid a server can start while an ordinary refresh is still in flight.
pub fn dedupe_key(identity: &EntityIdentity, excluded_server_ids: &[String]) -> String {
    let key = encode_key(identity);
    // Every component is a &str, so the encoding is valid UTF-8.
    let mut out = String::from_utf8_lossy(&key).into_owned();
    out.push_str("::");
    out.push_str(&excluded_server_ids.join(":"));
    out
}

fn encoded_len(identity: &EntityIdentity) -> usize {
    [identity.namespace(), identity.module_id(), identity.entity_id()]
        .iter()
        .map(|part| part.len() + 2 + decimal_width(part.len()))
        .sum()
}

fn decimal_width(mut n: usize) -> usize {
    let mut width = 1;
    while n >= 10 {
        n /= 10;
        width += 1;
    }
    width
}

fn push_decimal(buf: &mut Vec<u8>, n: usize) {
    let start = buf.len();
    let mut n = n;
    loop {
        buf.push(b'0' + (n % 10) as u8);
        n /= 10;
        if n == 0 {
            break;
        }
    }
    buf[start..].reverse();
}

/// Pool of reusable key buffers for the lookup hot path.
///
/// Buffers are only reachable through [`PooledBuffer`] guards or the
/// [`with_key`](Self::with_key) closure, so a pooled slice can never outlive
/// the operation that borrowed it. The guard returns its buffer on drop,
/// including during unwinding.
#[derive(Debug)]
pub struct KeyBufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    max_idle: usize,
}

impl Default for KeyBufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE)
    }
}

impl KeyBufferPool {
    pub fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// Borrow an empty buffer for the lifetime of the returned guard.
    pub fn acquire(&self) -> PooledBuffer<'_> {
        // A poisoned pool only costs us an allocation.
        let buf = self
            .idle
            .lock()
            .ok()
            .and_then(|mut idle| idle.pop())
            .unwrap_or_default();
        PooledBuffer { pool: self, buf }
    }

    /// Encode `identity` into a pooled buffer and hand the key to `f`.
    pub fn with_key<T>(&self, identity: &EntityIdentity, f: impl FnOnce(&[u8]) -> T) -> T {
        let mut buf = self.acquire();
        encode_key_into(&mut buf, identity);
        f(&buf)
    }

    /// Number of idle buffers currently pooled.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    fn release(&self, mut buf: Vec<u8>) {
        if buf.capacity() > MAX_POOLED_CAPACITY {
            return;
        }
        buf.clear();
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.max_idle {
                idle.push(buf);
            }
        }
    }
}

/// Scoped handle to a pooled buffer.
pub struct PooledBuffer<'a> {
    pool: &'a KeyBufferPool,
    buf: Vec<u8>,
}

impl Deref for PooledBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}
