//! Runtime context: the per-request bundle threaded through every
//! operator (spec §2, GLOSSARY "Runtime context"). Carries the target
//! space, vid width, current-edge bookkeeping the join/filter chain
//! updates as it advances, result-status flags, and deadline/memory
//! guards.

use std::time::Instant;

use crate::error::{Error, Result};
use crate::key::{EdgeType, PartitionId};
use crate::row::SchemaList;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Bookkeeping for whichever edge the multi-edge cursor currently
/// points at (spec §4.4 `HashJoinNode`): downstream operators address
/// the right output column through this, rather than re-deriving it.
#[derive(Clone)]
pub struct CurrentEdge {
    pub edge_type: EdgeType,
    pub edge_name: String,
    pub schema: Arc<SchemaList>,
    pub column_idx: usize,
    pub props: HashMap<String, Value>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RequestStats {
    pub illegal_data: u64,
    pub ttl_expired: u64,
    pub rows_emitted: u64,
}

pub struct RuntimeContext {
    pub space: String,
    pub vid_len: usize,
    pub partition: PartitionId,
    pub deadline: Option<Instant>,
    pub memory_budget: Option<usize>,
    memory_used: usize,
    pub stats: RequestStats,
    pub current_edge: Option<CurrentEdge>,
    /// Set by `FilterNode`'s tag-only pre-pass (spec §4.4); a short
    /// circuit the full filter step checks before running.
    pub tag_filtered_out: bool,
}

impl RuntimeContext {
    pub fn new(space: impl Into<String>, vid_len: usize, partition: PartitionId) -> Self {
        RuntimeContext {
            space: space.into(),
            vid_len,
            partition,
            deadline: None,
            memory_budget: None,
            memory_used: 0,
            stats: RequestStats::default(),
            current_edge: None,
            tag_filtered_out: false,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    /// Checked at every operator boundary (spec §5 "Cancellation /
    /// timeouts"): `E_RPC_EXCEED_DEADLINE` once the deadline has
    /// elapsed.
    pub fn check_deadline(&self) -> Result<()> {
        if let Some(dl) = self.deadline {
            if Instant::now() >= dl {
                log::warn!("deadline exceeded on space {} partition {}", self.space, self.partition);
                return Err(Error::RpcExceedDeadline);
            }
        }
        Ok(())
    }

    /// The memory-check guard around a batch of work (spec §5):
    /// `E_STORAGE_MEMORY_EXCEEDED` once cumulative usage crosses the
    /// budget.
    pub fn charge_memory(&mut self, bytes: usize) -> Result<()> {
        self.memory_used += bytes;
        if let Some(budget) = self.memory_budget {
            if self.memory_used > budget {
                log::error!("memory budget exceeded: {} > {} on space {} partition {}", self.memory_used, budget, self.space, self.partition);
                return Err(Error::StorageMemoryExceeded);
            }
        }
        Ok(())
    }

    pub fn memory_used(&self) -> usize {
        self.memory_used
    }

    pub fn record_illegal_data(&mut self) {
        self.stats.illegal_data += 1;
    }

    pub fn record_ttl_expired(&mut self) {
        self.stats.ttl_expired += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_memory_trips_once_budget_exceeded() {
        let mut ctx = RuntimeContext::new("s", 4, 0).with_memory_budget(100);
        assert!(ctx.charge_memory(60).is_ok());
        assert_eq!(ctx.charge_memory(60), Err(Error::StorageMemoryExceeded));
        assert_eq!(ctx.memory_used(), 120);
    }

    #[test]
    fn check_deadline_fails_once_elapsed() {
        let ctx = RuntimeContext::new("s", 4, 0).with_deadline(Instant::now() - std::time::Duration::from_secs(1));
        assert_eq!(ctx.check_deadline(), Err(Error::RpcExceedDeadline));
    }
}
