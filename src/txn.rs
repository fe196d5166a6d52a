//! Transactional iterator for soft-locked cross-partition edge writes
//! (spec §4.9). `SingleEdgeNode` already suppresses edge rows shadowed
//! by an adjacent lock and collects the lock records it found (see
//! `SingleEdgeNode::locks`); this module resolves those locks against
//! an external transaction manager and turns the result into synthetic
//! edge rows the scan can append to its stream.

use rayon::prelude::*;

use crate::error::Result;
use crate::key::{DecodedEdgeKey, EdgeType, PartitionId};
use crate::nodes_scan::EdgeRow;
use crate::row::{self, RowReader, SchemaList};
use crate::value::Value;

/// External collaborator (spec §9 "Soft-lock resume"): completes the
/// two-phase edge write by contacting the owning partition's leader.
/// `resume_transaction` blocks the calling thread until the future the
/// original protocol describes would have resolved — this core drives
/// many of these concurrently via a thread pool rather than modeling
/// futures explicitly (spec §9 permits collapsing the resume into the
/// scan provided the testable properties hold).
pub trait TransactionManager: Send + Sync {
    /// `Ok(Some(bytes))` is the resolved edge row's encoded value;
    /// `Ok(None)` means the write was rolled back and no edge should be
    /// yielded for this lock. `Err` surfaces the resume failure (a
    /// timeout or conflict code) and aborts the whole scan per the
    /// contract in spec §4.9.
    fn resume_transaction(&self, part: PartitionId, lock: &DecodedEdgeKey) -> Result<Option<Vec<u8>>>;
}

/// Resolves every collected lock concurrently, then decodes the
/// resolved ones into synthetic `EdgeRow`s (spec §4.9 steps 1 and 3).
/// Locks whose slot comes back empty are silently omitted, matching "no
/// edge is yielded" for a rolled-back write.
pub fn resolve_locks(
    tm: &dyn TransactionManager,
    part: PartitionId,
    locks: &[DecodedEdgeKey],
    edge_type: EdgeType,
    schema: &SchemaList,
) -> Result<Vec<EdgeRow>> {
    let slots: Vec<Result<Option<Vec<u8>>>> = locks.par_iter().map(|lock| tm.resume_transaction(part, lock)).collect();

    let mut rows = Vec::new();
    for (lock, slot) in locks.iter().zip(slots) {
        let value = slot?;
        let bytes = match value {
            Some(b) => b,
            None => {
                log::debug!("soft lock rolled back for rank {} dst {} bytes", lock.rank, lock.dst.len());
                continue;
            }
        };
        log::debug!("soft lock resolved for rank {} dst {} bytes", lock.rank, lock.dst.len());
        let reader = RowReader::bind(schema, &bytes)?;
        if reader.is_expired() {
            continue;
        }
        let latest = row::latest(schema).expect("non-empty schema");
        let mut props = std::collections::HashMap::new();
        for f in &latest.fields {
            props.insert(f.name.clone(), reader.get(&f.name)?);
        }
        rows.push(EdgeRow {
            src: lock.src.clone(),
            edge_type,
            rank: lock.rank,
            dst: lock.dst.clone(),
            props,
        });
    }
    Ok(rows)
}

/// In-memory transaction manager for tests: every lock resolves to a
/// pre-seeded outcome, no actual cross-partition contact.
#[derive(Default)]
pub struct MemTransactionManager {
    outcomes: std::sync::RwLock<std::collections::HashMap<(i64, Vec<u8>), Result<Option<Vec<u8>>>>>,
}

impl MemTransactionManager {
    pub fn new() -> Self {
        MemTransactionManager::default()
    }

    pub fn seed(&self, rank: i64, dst: Vec<u8>, outcome: Result<Option<Vec<u8>>>) {
        self.outcomes.write().unwrap().insert((rank, dst), outcome);
    }
}

impl TransactionManager for MemTransactionManager {
    fn resume_transaction(&self, _part: PartitionId, lock: &DecodedEdgeKey) -> Result<Option<Vec<u8>>> {
        self.outcomes
            .read()
            .unwrap()
            .get(&(lock.rank, lock.dst.clone()))
            .cloned()
            .unwrap_or(Ok(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::{Field, RowWriter, SchemaVersion};
    use crate::value::FieldType;

    fn degree_schema() -> SchemaList {
        vec![SchemaVersion {
            version: 0,
            fields: vec![Field { name: "degree".into(), ftype: FieldType::Int, nullable: true, default: None }],
            ttl: None,
        }]
    }

    fn lock(rank: i64, dst: &[u8]) -> DecodedEdgeKey {
        DecodedEdgeKey { src: b"Ann1".to_vec(), edge_type: 1, rank, dst: dst.to_vec(), is_lock: true }
    }

    #[test]
    fn resolved_lock_yields_synthetic_edge_row() {
        let schema = degree_schema();
        let mut w = RowWriter::new();
        w.set("degree", Value::Int(7));
        let bytes = w.encode(&schema[0]).unwrap();

        let tm = MemTransactionManager::new();
        tm.seed(0, b"Bob1".to_vec(), Ok(Some(bytes)));

        let locks = vec![lock(0, b"Bob1")];
        let rows = resolve_locks(&tm, 0, &locks, 1, &schema).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].props.get("degree"), Some(&Value::Int(7)));
    }

    #[test]
    fn rolled_back_lock_yields_no_row() {
        let schema = degree_schema();
        let tm = MemTransactionManager::new();
        tm.seed(0, b"Bob1".to_vec(), Ok(None));

        let locks = vec![lock(0, b"Bob1")];
        let rows = resolve_locks(&tm, 0, &locks, 1, &schema).unwrap();
        assert!(rows.is_empty());
    }
}
