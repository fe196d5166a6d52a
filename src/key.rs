//! Key codec (spec §4.1).
//!
//! Every key starts with a one-byte type tag, then a big-endian
//! partition id, so a prefix scan over `(type, partition, ...)` is a
//! single lexicographic range scan against the KV store. Vid length is
//! validated against the space's fixed vid width (spec invariant 6);
//! mismatches are rejected with `Error::InvalidVid`, never silently
//! padded or truncated.

use crate::error::{Error, Result};

const TAG_VERTEX: u8 = 0x01;
const TAG_VERTEX_EXISTS: u8 = 0x02;
const TAG_EDGE: u8 = 0x03;
const TAG_INDEX: u8 = 0x04;
const TAG_OPERATION: u8 = 0x05;

/// Suffix distinguishing a soft-lock record from the edge row it
/// shadows (spec §3 "soft lock record", §4.1 lock-sort rule): the lock
/// sorts immediately before the edge row it guards.
const EDGE_SUFFIX_LOCK: u8 = 0x00;
const EDGE_SUFFIX_ROW: u8 = 0x01;

pub type PartitionId = u32;
pub type TagId = u32;
pub type EdgeType = i32;
pub type IndexId = u32;

/// Validates `vid.len() == vid_len`; the sole gate for invariant 6.
pub fn check_vid_len(vid: &[u8], vid_len: usize) -> Result<()> {
    if vid.len() != vid_len {
        Err(Error::InvalidVid {
            expected: vid_len,
            found: vid.len(),
        })
    } else {
        Ok(())
    }
}

fn encode_i32_ordered(v: i32) -> [u8; 4] {
    ((v as u32) ^ 0x8000_0000).to_be_bytes()
}

fn decode_i32_ordered(b: &[u8]) -> i32 {
    let mut a = [0u8; 4];
    a.copy_from_slice(&b[..4]);
    (u32::from_be_bytes(a) ^ 0x8000_0000) as i32
}

fn encode_i64_ordered(v: i64) -> [u8; 8] {
    ((v as u64) ^ 0x8000_0000_0000_0000).to_be_bytes()
}

pub(crate) fn decode_i64_ordered(b: &[u8]) -> i64 {
    let mut a = [0u8; 8];
    a.copy_from_slice(&b[..8]);
    (u64::from_be_bytes(a) ^ 0x8000_0000_0000_0000) as i64
}

/// Inverse of `encode_f64_ordered`.
pub(crate) fn decode_f64_ordered(b: &[u8]) -> f64 {
    let mut a = [0u8; 8];
    a.copy_from_slice(&b[..8]);
    let t = u64::from_be_bytes(a);
    let bits = if t >> 63 == 1 { t & 0x7FFF_FFFF_FFFF_FFFF } else { !t };
    f64::from_bits(bits)
}

/// Order-preserving f64 encoding (IEEE-754 total order trick): flips
/// the sign bit for positives, inverts all bits for negatives.
fn encode_f64_ordered(v: f64) -> [u8; 8] {
    let bits = v.to_bits();
    let t = if bits >> 63 == 1 { !bits } else { bits | 0x8000_0000_0000_0000 };
    t.to_be_bytes()
}

/// Escaped null-terminated string encoding: order-preserving across
/// lengths, used for index-key string columns (spec §4.1).
fn encode_string_ordered(s: &str, out: &mut Vec<u8>) {
    for &b in s.as_bytes() {
        if b == 0x00 {
            out.push(0x00);
            out.push(0xFF);
        } else {
            out.push(b);
        }
    }
    out.push(0x00);
    out.push(0x00);
}

fn push_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// `(space, partition, vid, tagId) -> encoded-row` key. `space` is not
/// embedded in the byte key: callers route to a per-space KV namespace
/// (the KV store trait takes `space` as a separate argument, per §6).
pub fn vertex_key(partition: PartitionId, vid: &[u8], vid_len: usize, tag_id: TagId) -> Result<Vec<u8>> {
    check_vid_len(vid, vid_len)?;
    let mut out = Vec::with_capacity(1 + 4 + vid_len + 4);
    out.push(TAG_VERTEX);
    out.extend_from_slice(&partition.to_be_bytes());
    out.extend_from_slice(vid);
    out.extend_from_slice(&tag_id.to_be_bytes());
    Ok(out)
}

/// `(space, partition, vid) -> empty` existence marker key.
pub fn vertex_exists_key(partition: PartitionId, vid: &[u8], vid_len: usize) -> Result<Vec<u8>> {
    check_vid_len(vid, vid_len)?;
    let mut out = Vec::with_capacity(1 + 4 + vid_len);
    out.push(TAG_VERTEX_EXISTS);
    out.extend_from_slice(&partition.to_be_bytes());
    out.extend_from_slice(vid);
    Ok(out)
}

/// Encodes the edge-row key. `is_lock = true` produces the adjacent
/// soft-lock record key instead (same ordering prefix, smaller
/// suffix, so it sorts immediately before its edge row).
pub fn edge_key(
    partition: PartitionId,
    src: &[u8],
    vid_len: usize,
    edge_type: EdgeType,
    rank: i64,
    dst: &[u8],
    is_lock: bool,
) -> Result<Vec<u8>> {
    check_vid_len(src, vid_len)?;
    check_vid_len(dst, vid_len)?;
    let mut out = Vec::with_capacity(1 + 4 + vid_len + 4 + 8 + vid_len + 1);
    out.push(TAG_EDGE);
    out.extend_from_slice(&partition.to_be_bytes());
    out.extend_from_slice(src);
    out.extend_from_slice(&encode_i32_ordered(edge_type));
    out.extend_from_slice(&encode_i64_ordered(rank));
    out.extend_from_slice(dst);
    out.push(if is_lock { EDGE_SUFFIX_LOCK } else { EDGE_SUFFIX_ROW });
    Ok(out)
}

/// Prefix covering every edge of `edge_type` rooted at `src` (locks and
/// rows both fall inside this prefix, per construction above).
pub fn edge_type_prefix(partition: PartitionId, src: &[u8], edge_type: EdgeType) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 4 + src.len() + 4);
    out.push(TAG_EDGE);
    out.extend_from_slice(&partition.to_be_bytes());
    out.extend_from_slice(src);
    out.extend_from_slice(&encode_i32_ordered(edge_type));
    out
}

/// Prefix covering every edge (of any type) rooted at `src`, used by
/// the multi-edge iterator (spec §4.4 `HashJoinNode`).
pub fn edge_src_prefix(partition: PartitionId, src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 4 + src.len());
    out.push(TAG_EDGE);
    out.extend_from_slice(&partition.to_be_bytes());
    out.extend_from_slice(src);
    out
}

pub struct DecodedEdgeKey {
    pub src: Vec<u8>,
    pub edge_type: EdgeType,
    pub rank: i64,
    pub dst: Vec<u8>,
    pub is_lock: bool,
}

pub fn decode_edge_key(key: &[u8], vid_len: usize) -> Result<DecodedEdgeKey> {
    if key.first() != Some(&TAG_EDGE) {
        return Err(Error::InvalidData("not an edge key".into()));
    }
    let mut off = 1 + 4;
    let src = key
        .get(off..off + vid_len)
        .ok_or_else(|| Error::InvalidData("truncated edge key".into()))?
        .to_vec();
    off += vid_len;
    let edge_type = decode_i32_ordered(&key[off..off + 4]);
    off += 4;
    let rank = decode_i64_ordered(&key[off..off + 8]);
    off += 8;
    let dst = key[off..off + vid_len].to_vec();
    off += vid_len;
    let is_lock = key[off] == EDGE_SUFFIX_LOCK;
    Ok(DecodedEdgeKey { src, edge_type, rank, dst, is_lock })
}

/// One encoded index-field value: null-byte prefix (0x00 = null,
/// 0x01 = present) followed by the typed, order-preserving encoding.
pub fn encode_index_field(v: &crate::value::Value, out: &mut Vec<u8>) {
    use crate::value::Value;
    match v {
        Value::Null => out.push(0x00),
        Value::Bool(b) => {
            out.push(0x01);
            out.push(if *b { 1 } else { 0 });
        }
        Value::Int(i) => {
            out.push(0x01);
            out.extend_from_slice(&encode_i64_ordered(*i));
        }
        Value::Float(f) => {
            out.push(0x01);
            out.extend_from_slice(&encode_f64_ordered(*f));
        }
        Value::String(s) => {
            out.push(0x01);
            encode_string_ordered(s, out);
        }
        Value::List(_) => unreachable!("index fields are scalar"),
    }
}

/// Inverse of `encode_index_field`, given the field's declared type
/// (the null/present tag alone can't tell a string from an int).
pub fn decode_index_field(ftype: &crate::value::FieldType, buf: &[u8], off: &mut usize) -> Result<crate::value::Value> {
    use crate::value::{FieldType, Value};
    let tag = *buf.get(*off).ok_or_else(|| Error::InvalidData("truncated index key".into()))?;
    *off += 1;
    if tag == 0x00 {
        return Ok(Value::Null);
    }
    match ftype {
        FieldType::Bool => {
            let b = *buf.get(*off).ok_or_else(|| Error::InvalidData("truncated index key".into()))?;
            *off += 1;
            Ok(Value::Bool(b != 0))
        }
        FieldType::Int => {
            let v = decode_i64_ordered(
                buf.get(*off..*off + 8)
                    .ok_or_else(|| Error::InvalidData("truncated index key".into()))?,
            );
            *off += 8;
            Ok(Value::Int(v))
        }
        FieldType::Float => {
            let v = decode_f64_ordered(
                buf.get(*off..*off + 8)
                    .ok_or_else(|| Error::InvalidData("truncated index key".into()))?,
            );
            *off += 8;
            Ok(Value::Float(v))
        }
        FieldType::String | FieldType::FixedString(_) => {
            let start = *off;
            loop {
                if *off + 1 >= buf.len() {
                    return Err(Error::InvalidData("unterminated index string field".into()));
                }
                if buf[*off] == 0x00 && buf[*off + 1] == 0x00 {
                    break;
                }
                if buf[*off] == 0x00 && buf[*off + 1] == 0xFF {
                    *off += 2;
                    continue;
                }
                *off += 1;
            }
            let raw = &buf[start..*off];
            let mut unescaped = Vec::with_capacity(raw.len());
            let mut i = 0;
            while i < raw.len() {
                if raw[i] == 0x00 && i + 1 < raw.len() && raw[i + 1] == 0xFF {
                    unescaped.push(0x00);
                    i += 2;
                } else {
                    unescaped.push(raw[i]);
                    i += 1;
                }
            }
            *off += 2;
            Ok(Value::String(String::from_utf8_lossy(&unescaped).into_owned()))
        }
    }
}

/// `(space, partition, indexId, encoded-fields, primary-key) -> [ttl]`
/// index-entry key. `primary` is the vid (vertex index) or the encoded
/// `(src, rank, dst)` tuple (edge index).
pub fn index_key(partition: PartitionId, index_id: IndexId, fields: &[crate::value::Value], primary: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    out.push(TAG_INDEX);
    out.extend_from_slice(&partition.to_be_bytes());
    out.extend_from_slice(&index_id.to_be_bytes());
    for f in fields {
        encode_index_field(f, &mut out);
    }
    push_len_prefixed(&mut out, primary);
    out
}

/// Prefix for an index scan: `indexId` plus a caller-supplied
/// longest-matching-prefix of already-encoded equality fields (spec
/// §4.3 `IndexScanNode`).
pub fn index_prefix(partition: PartitionId, index_id: IndexId, encoded_fields_prefix: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(9 + encoded_fields_prefix.len());
    out.push(TAG_INDEX);
    out.extend_from_slice(&partition.to_be_bytes());
    out.extend_from_slice(&index_id.to_be_bytes());
    out.extend_from_slice(encoded_fields_prefix);
    out
}

/// Operation-log entry key used during online index rebuild (spec §3
/// "operation record"): ordered by a monotonic sequence number so the
/// rebuilder can replay in write order.
pub fn operation_key(partition: PartitionId, index_id: IndexId, seq: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 4 + 4 + 8);
    out.push(TAG_OPERATION);
    out.extend_from_slice(&partition.to_be_bytes());
    out.extend_from_slice(&index_id.to_be_bytes());
    out.extend_from_slice(&seq.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_key_rejects_wrong_vid_len() {
        assert!(vertex_key(1, b"abc", 4, 7).is_err());
        assert!(vertex_key(1, b"abcd", 4, 7).is_ok());
    }

    #[test]
    fn edge_ordering_by_rank_is_numeric() {
        let lo = edge_key(0, b"aaaa", 4, 1, -5, b"bbbb", false).unwrap();
        let hi = edge_key(0, b"aaaa", 4, 1, 5, b"bbbb", false).unwrap();
        assert!(lo < hi, "negative rank must sort before positive rank");
    }

    #[test]
    fn lock_sorts_immediately_before_edge_row() {
        let lock = edge_key(0, b"aaaa", 4, 1, 0, b"bbbb", true).unwrap();
        let row = edge_key(0, b"aaaa", 4, 1, 0, b"bbbb", false).unwrap();
        assert!(lock < row);
        assert_eq!(lock.len(), row.len());
        assert_eq!(&lock[..lock.len() - 1], &row[..row.len() - 1]);
    }

    #[test]
    fn edge_type_orders_negative_before_positive() {
        let a = edge_type_prefix(0, b"aaaa", -1);
        let b = edge_type_prefix(0, b"aaaa", 1);
        assert!(a < b);
    }

    #[test]
    fn index_field_string_order_preserving() {
        let mut a = Vec::new();
        let mut b = Vec::new();
        encode_index_field(&crate::value::Value::String("ab".into()), &mut a);
        encode_index_field(&crate::value::Value::String("abc".into()), &mut b);
        assert!(a < b, "\"ab\" must sort before \"abc\"");
    }

    #[test]
    fn index_field_null_orders_before_value() {
        let mut n = Vec::new();
        let mut v = Vec::new();
        encode_index_field(&crate::value::Value::Null, &mut n);
        encode_index_field(&crate::value::Value::Int(-100), &mut v);
        assert!(n < v);
    }

    #[test]
    fn decode_edge_key_roundtrip() {
        let k = edge_key(3, b"src1", 4, -7, 42, b"dst1", false).unwrap();
        let d = decode_edge_key(&k, 4).unwrap();
        assert_eq!(d.src, b"src1");
        assert_eq!(d.edge_type, -7);
        assert_eq!(d.rank, 42);
        assert_eq!(d.dst, b"dst1");
        assert!(!d.is_lock);
    }
}
