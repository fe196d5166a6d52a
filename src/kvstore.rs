//! The KV store is an external collaborator (spec §1): a replicated,
//! multi-Raft key-value store this core treats as a black box behind
//! the contract in spec §6. This module carries only that contract
//! (the `KvStore` trait and the batch wire encoding) plus `MemKv`, an
//! in-memory implementation used to exercise the rest of the core in
//! tests — grounded on the teacher's `mem_store.rs` in-memory index.

use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::key::PartitionId;

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Remove(Vec<u8>),
    RemoveRange(Vec<u8>, Vec<u8>),
}

const OP_PUT: u8 = 0;
const OP_REMOVE: u8 = 1;
const OP_REMOVE_RANGE: u8 = 2;

/// An ordered list of `PUT`/`REMOVE`/`REMOVE_RANGE` operations, applied
/// atomically by the KV store (spec §6 "Batch encoding"). Encoding is a
/// one-byte tag per operation followed by length-prefixed byte
/// strings; it must round-trip bit-exactly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Batch::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put(key, value));
    }

    pub fn remove(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Remove(key));
    }

    pub fn remove_range(&mut self, lo: Vec<u8>, hi: Vec<u8>) {
        self.ops.push(BatchOp::RemoveRange(lo, hi));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn push_bytes(out: &mut Vec<u8>, b: &[u8]) {
        out.extend_from_slice(&(b.len() as u32).to_be_bytes());
        out.extend_from_slice(b);
    }

    fn read_bytes(buf: &[u8], off: &mut usize) -> Result<Vec<u8>> {
        let mut len_b = [0u8; 4];
        len_b.copy_from_slice(
            buf.get(*off..*off + 4)
                .ok_or_else(|| Error::InvalidData("truncated batch".into()))?,
        );
        *off += 4;
        let len = u32::from_be_bytes(len_b) as usize;
        let bytes = buf
            .get(*off..*off + len)
            .ok_or_else(|| Error::InvalidData("truncated batch".into()))?
            .to_vec();
        *off += len;
        Ok(bytes)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for op in &self.ops {
            match op {
                BatchOp::Put(k, v) => {
                    out.push(OP_PUT);
                    Self::push_bytes(&mut out, k);
                    Self::push_bytes(&mut out, v);
                }
                BatchOp::Remove(k) => {
                    out.push(OP_REMOVE);
                    Self::push_bytes(&mut out, k);
                }
                BatchOp::RemoveRange(lo, hi) => {
                    out.push(OP_REMOVE_RANGE);
                    Self::push_bytes(&mut out, lo);
                    Self::push_bytes(&mut out, hi);
                }
            }
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Batch> {
        let mut off = 0;
        let mut ops = Vec::new();
        while off < buf.len() {
            let tag = buf[off];
            off += 1;
            let op = match tag {
                OP_PUT => {
                    let k = Self::read_bytes(buf, &mut off)?;
                    let v = Self::read_bytes(buf, &mut off)?;
                    BatchOp::Put(k, v)
                }
                OP_REMOVE => BatchOp::Remove(Self::read_bytes(buf, &mut off)?),
                OP_REMOVE_RANGE => {
                    let lo = Self::read_bytes(buf, &mut off)?;
                    let hi = Self::read_bytes(buf, &mut off)?;
                    BatchOp::RemoveRange(lo, hi)
                }
                other => return Err(Error::InvalidData(format!("unknown batch op tag {}", other))),
            };
            ops.push(op);
        }
        Ok(Batch { ops })
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointInfo {
    pub name: String,
    pub path: String,
}

/// Completion callback for the async write methods below; invoked
/// exactly once. Implementations that are genuinely async (a real
/// Raft-backed store) fire it from their own I/O thread; `MemKv` fires
/// it synchronously, which is observably equivalent for a caller that
/// only waits on a completion latch (spec §5).
pub type Callback = Box<dyn FnOnce(Result<()>) + Send>;

/// The replicated KV store's contract (spec §6). Out of scope:
/// consensus, on-disk layout, snapshot internals — only the operations
/// this core calls.
pub trait KvStore: Send + Sync {
    fn get(&self, space: &str, part: PartitionId, key: &[u8]) -> Result<Vec<u8>>;

    /// Partial-result tolerant: per-key status is returned alongside
    /// the value so a caller can proceed with whatever resolved.
    fn multi_get(&self, space: &str, part: PartitionId, keys: &[Vec<u8>]) -> Vec<Result<Vec<u8>>>;

    /// Lexicographic scan over everything with the given `prefix`.
    fn prefix(&self, space: &str, part: PartitionId, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;

    fn async_append_batch(&self, space: &str, part: PartitionId, batch: Batch, cb: Callback);
    fn async_multi_put(&self, space: &str, part: PartitionId, kvs: Vec<(Vec<u8>, Vec<u8>)>, cb: Callback);
    fn async_multi_remove(&self, space: &str, part: PartitionId, keys: Vec<Vec<u8>>, cb: Callback);

    fn set_write_blocking(&self, space: &str, on: bool);
    fn create_checkpoint(&self, space: &str, name: &str) -> Result<CheckpointInfo>;
    fn drop_checkpoint(&self, space: &str, name: &str) -> Result<()>;
    fn all_leader(&self) -> Vec<(String, PartitionId)>;
}

/// In-memory `KvStore`, one `BTreeMap` per `(space, partition)` so
/// `prefix` is a simple range scan. Not a teaching aid for the KV
/// store's own design (explicitly out of scope, spec §1) — just
/// enough to drive the operators and the request driver in tests.
#[derive(Default)]
pub struct MemKv {
    data: RwLock<BTreeMap<(String, PartitionId), BTreeMap<Vec<u8>, Vec<u8>>>>,
    write_blocked: RwLock<BTreeMap<String, bool>>,
    checkpoints: Mutex<Vec<CheckpointInfo>>,
    leaders: Vec<(String, PartitionId)>,
}

impl MemKv {
    pub fn new() -> Self {
        MemKv::default()
    }

    pub fn with_leaders(leaders: Vec<(String, PartitionId)>) -> Self {
        MemKv { leaders, ..Default::default() }
    }

    fn apply(&self, space: &str, part: PartitionId, batch: &Batch) {
        let mut data = self.data.write().unwrap();
        let map = data.entry((space.to_string(), part)).or_default();
        for op in &batch.ops {
            match op {
                BatchOp::Put(k, v) => {
                    map.insert(k.clone(), v.clone());
                }
                BatchOp::Remove(k) => {
                    map.remove(k);
                }
                BatchOp::RemoveRange(lo, hi) => {
                    let keys: Vec<_> = map.range(lo.clone()..hi.clone()).map(|(k, _)| k.clone()).collect();
                    for k in keys {
                        map.remove(&k);
                    }
                }
            }
        }
    }
}

impl KvStore for MemKv {
    fn get(&self, space: &str, part: PartitionId, key: &[u8]) -> Result<Vec<u8>> {
        let data = self.data.read().unwrap();
        data.get(&(space.to_string(), part))
            .and_then(|m| m.get(key))
            .cloned()
            .ok_or(Error::KeyNotFound)
    }

    fn multi_get(&self, space: &str, part: PartitionId, keys: &[Vec<u8>]) -> Vec<Result<Vec<u8>>> {
        keys.iter().map(|k| self.get(space, part, k)).collect()
    }

    fn prefix(&self, space: &str, part: PartitionId, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let data = self.data.read().unwrap();
        match data.get(&(space.to_string(), part)) {
            None => Vec::new(),
            Some(m) => m
                .range(prefix.to_vec()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    fn async_append_batch(&self, space: &str, part: PartitionId, batch: Batch, cb: Callback) {
        self.apply(space, part, &batch);
        cb(Ok(()));
    }

    fn async_multi_put(&self, space: &str, part: PartitionId, kvs: Vec<(Vec<u8>, Vec<u8>)>, cb: Callback) {
        let mut batch = Batch::new();
        for (k, v) in kvs {
            batch.put(k, v);
        }
        self.async_append_batch(space, part, batch, cb);
    }

    fn async_multi_remove(&self, space: &str, part: PartitionId, keys: Vec<Vec<u8>>, cb: Callback) {
        let mut batch = Batch::new();
        for k in keys {
            batch.remove(k);
        }
        self.async_append_batch(space, part, batch, cb);
    }

    fn set_write_blocking(&self, space: &str, on: bool) {
        self.write_blocked.write().unwrap().insert(space.to_string(), on);
    }

    fn create_checkpoint(&self, space: &str, name: &str) -> Result<CheckpointInfo> {
        let info = CheckpointInfo { name: name.to_string(), path: format!("{}/{}", space, name) };
        self.checkpoints.lock().unwrap().push(info.clone());
        Ok(info)
    }

    fn drop_checkpoint(&self, _space: &str, name: &str) -> Result<()> {
        let mut cps = self.checkpoints.lock().unwrap();
        cps.retain(|c| c.name != name);
        Ok(())
    }

    fn all_leader(&self) -> Vec<(String, PartitionId)> {
        self.leaders.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_round_trips_bit_exactly() {
        let mut b = Batch::new();
        b.put(b"k1".to_vec(), b"v1".to_vec());
        b.remove(b"k2".to_vec());
        b.remove_range(b"a".to_vec(), b"z".to_vec());
        let encoded = b.encode();
        let decoded = Batch::decode(&encoded).unwrap();
        assert_eq!(b, decoded);
        assert_eq!(decoded.encode(), encoded);
    }

    #[test]
    fn mem_kv_prefix_scan() {
        let kv = MemKv::new();
        let mut batch = Batch::new();
        batch.put(b"a1".to_vec(), b"1".to_vec());
        batch.put(b"a2".to_vec(), b"2".to_vec());
        batch.put(b"b1".to_vec(), b"3".to_vec());
        kv.async_append_batch("s", 0, batch, Box::new(|_| {}));
        let rows = kv.prefix("s", 0, b"a");
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn mem_kv_missing_key_is_key_not_found() {
        let kv = MemKv::new();
        assert_eq!(kv.get("s", 0, b"nope"), Err(Error::KeyNotFound));
    }
}
