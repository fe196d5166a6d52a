//! Write and update operators (spec §4.7): the read-modify-write upsert
//! sequence for tags and edges, plus `UpdateResNode`'s `YIELD`
//! evaluation. Grounded on the original `UpdateNode`/`UpdateTagNode`/
//! `UpdateEdgeNode`/`UpdateResNode` family, collapsed here into two
//! concrete nodes (tag, edge) sharing one index-maintenance routine
//! rather than a template hierarchy.

use std::collections::HashMap;
use std::sync::Arc;

use crate::catalog::{Catalog, IndexState};
use crate::context::RuntimeContext;
use crate::error::{Error, Result};
use crate::expr::{eval, ExprContext, ExprId, ExprPool};
use crate::key::{self, EdgeType, PartitionId, TagId};
use crate::kvstore::{Batch, KvStore};
use crate::lock::LockTable;
use crate::nodes_scan::{FetchEdgeNode, TagNode};
use crate::operator::{EdgeKeyInput, Elapsed, Operator, VidInput};
use crate::operator_boilerplate;
use crate::row::{self, RowWriter};
use crate::value::Value;

/// One `prop := expression` assignment (spec §4.7), applied in request
/// order. `field` names the column being assigned; `pool`/`expr` decode
/// the right-hand side, which may reference `<tag>.<other-field>` to
/// read the working copy built up by earlier assignments in the same
/// update (this crate's update expressions reuse the filter grammar's
/// dot-scoped property references rather than a separate bare-name
/// updater syntax).
pub struct Assignment {
    pub field: String,
    pub pool: ExprPool,
    pub expr: ExprId,
}

/// Outcome of a tag or edge upsert, staged for the driver to flush.
pub struct UpdateOutcome {
    pub found: bool,
    pub inserted: bool,
    pub post: HashMap<String, Value>,
    pub batch: Batch,
}

fn apply_assignments(scope: &str, baseline: &HashMap<String, Value>, assignments: &[Assignment]) -> Result<HashMap<String, Value>> {
    let mut working = baseline.clone();
    let mut ectx = ExprContext::new();
    ectx.set_tag(scope, working.clone());
    for a in assignments {
        let v = eval(&a.pool, a.expr, &ectx)?;
        working.insert(a.field.clone(), v);
        ectx.set_tag(scope, working.clone());
    }
    Ok(working)
}

const OP_DELETE: u8 = 0x00;
const OP_MODIFY: u8 = 0x01;

/// Encodes one operation-log record (spec §3 "operation record"): a
/// one-byte kind tag followed by the length-prefixed index key it
/// carries — `delete` carries the old index key, `modify` the new one.
fn encode_op_record(kind: u8, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 4 + key.len());
    out.push(kind);
    out.extend_from_slice(&(key.len() as u32).to_be_bytes());
    out.extend_from_slice(key);
    out
}

/// Stages remove/put of the index entries affected by one row changing
/// from `old` (`None` if the row didn't exist) to `new` (spec invariant
/// 3, §4.7 index-maintenance step). Indexes in `Rebuilding` state get an
/// operation-log entry instead of a direct index write; `Locked`
/// indexes reject the whole update before anything is staged (checked
/// by the caller up front).
fn stage_index_maintenance(
    batch: &mut Batch,
    part: PartitionId,
    index_id: u32,
    field_names: &[String],
    old: Option<&HashMap<String, Value>>,
    new: &HashMap<String, Value>,
    primary: &[u8],
    state: IndexState,
    op_seq: &mut u64,
) {
    let gather = |props: &HashMap<String, Value>| -> Vec<Value> {
        field_names.iter().map(|f| props.get(f).cloned().unwrap_or(Value::Null)).collect()
    };
    let new_fields = gather(new);
    let new_key = key::index_key(part, index_id, &new_fields, primary);

    match state {
        IndexState::Active => {
            if let Some(old_props) = old {
                let old_fields = gather(old_props);
                let old_key = key::index_key(part, index_id, &old_fields, primary);
                if old_key != new_key {
                    batch.remove(old_key);
                    batch.put(new_key, Vec::new());
                }
            } else {
                batch.put(new_key, Vec::new());
            }
        }
        IndexState::Rebuilding => match old {
            Some(old_props) => {
                let old_fields = gather(old_props);
                let old_key = key::index_key(part, index_id, &old_fields, primary);
                if old_key != new_key {
                    let del_key = key::operation_key(part, index_id, *op_seq);
                    *op_seq += 1;
                    batch.put(del_key, encode_op_record(OP_DELETE, &old_key));

                    let mod_key = key::operation_key(part, index_id, *op_seq);
                    *op_seq += 1;
                    batch.put(mod_key, encode_op_record(OP_MODIFY, &new_key));
                }
            }
            None => {
                let mod_key = key::operation_key(part, index_id, *op_seq);
                *op_seq += 1;
                batch.put(mod_key, encode_op_record(OP_MODIFY, &new_key));
            }
        },
        IndexState::Locked => unreachable!("caller must reject locked indexes before staging"),
    }
}

fn flush_batch_sync(kv: &Arc<dyn KvStore>, space: &str, part: PartitionId, batch: Batch) -> Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    kv.async_append_batch(space, part, batch, Box::new(move |r| {
        let _ = tx.send(r);
    }));
    rx.recv().map_err(|_| Error::Unknown("batch callback dropped".into()))?
}

/// Read-modify-write upsert for a vertex tag (spec §4.7). Acquires the
/// per-key memory lock for the duration of `do_execute`; contention
/// surfaces immediately as `Error::DataConflict`, never retried inside
/// this node (spec invariant 4, §9 "Per-key memory locks").
pub struct UpdateTagNode {
    kv: Arc<dyn KvStore>,
    catalog: Arc<dyn Catalog>,
    locks: Arc<LockTable>,
    tag_id: TagId,
    tag_name: String,
    insertable: bool,
    when: Option<(ExprPool, ExprId)>,
    assignments: Vec<Assignment>,
    maintain_index: bool,
    outcome: Option<UpdateOutcome>,
    elapsed: Elapsed,
}

impl UpdateTagNode {
    pub fn new(
        kv: Arc<dyn KvStore>,
        catalog: Arc<dyn Catalog>,
        locks: Arc<LockTable>,
        tag_id: TagId,
        tag_name: impl Into<String>,
        insertable: bool,
        when: Option<(ExprPool, ExprId)>,
        assignments: Vec<Assignment>,
    ) -> Self {
        UpdateTagNode {
            kv,
            catalog,
            locks,
            tag_id,
            tag_name: tag_name.into(),
            insertable,
            when,
            assignments,
            maintain_index: true,
            outcome: None,
            elapsed: Elapsed::default(),
        }
    }

    pub fn outcome(&self) -> Option<&UpdateOutcome> {
        self.outcome.as_ref()
    }

    fn step(&mut self, ctx: &mut RuntimeContext, part: PartitionId, input: &VidInput) -> Result<()> {
        self.outcome = None;
        let vertex_key = key::vertex_key(part, &input.0, ctx.vid_len, self.tag_id)?;
        let _guard = self.locks.try_acquire(vertex_key.clone())?;

        let mut tag = TagNode::new(self.kv.clone(), self.catalog.clone(), self.tag_id, self.tag_name.clone());
        tag.execute(ctx, part, input)?;
        let found = tag.found();

        if let Some((pool, expr)) = &self.when {
            let mut ectx = ExprContext::new();
            if found {
                ectx.set_tag(&self.tag_name, tag.props().clone());
            }
            let passed = crate::expr::eval_bool_filter(pool, *expr, &ectx)?;
            if !passed {
                return Err(Error::FilterOut);
            }
        }

        if !found && !self.insertable {
            return Err(Error::KeyNotFound);
        }

        let baseline: HashMap<String, Value> = if found { tag.props().clone() } else { HashMap::new() };
        let post = apply_assignments(&self.tag_name, &baseline, &self.assignments)?;

        let schema = self.catalog.tag_schema(&ctx.space, self.tag_id)?;
        let latest = row::latest(&schema).ok_or_else(|| Error::InvalidData("empty schema".into()))?;
        let mut writer = RowWriter::new();
        for (k, v) in &post {
            writer.set(k, v.clone());
        }
        let encoded = writer.encode(latest)?;

        let indexes = self.catalog.indexes_for_tag(&ctx.space, self.tag_id)?;
        if self.maintain_index && indexes.iter().any(|m| m.state == IndexState::Locked) {
            return Err(Error::IndexLocked);
        }

        let mut batch = Batch::new();
        if self.maintain_index {
            let mut seq = 0u64;
            for idx in &indexes {
                stage_index_maintenance(
                    &mut batch,
                    part,
                    idx.id,
                    &idx.fields,
                    if found { Some(&baseline) } else { None },
                    &post,
                    &input.0,
                    idx.state,
                    &mut seq,
                );
            }
        }
        batch.put(vertex_key, encoded);
        let exists_key = key::vertex_exists_key(part, &input.0, ctx.vid_len)?;
        batch.put(exists_key, Vec::new());

        self.outcome = Some(UpdateOutcome { found, inserted: !found, post, batch });
        Ok(())
    }

    /// Flushes the staged batch and returns the outcome, consuming it.
    /// Separate from `step` so the driver controls exactly when the
    /// write becomes visible (spec §5 "single-shot wait on the KV
    /// store's async batch write callback via a completion latch").
    pub fn flush(&mut self, space: &str, part: PartitionId) -> Result<UpdateOutcome> {
        let outcome = self.outcome.take().ok_or_else(|| Error::Unknown("flush called before a successful step".into()))?;
        flush_batch_sync(&self.kv, space, part, outcome.batch.clone())?;
        Ok(outcome)
    }
}

operator_boilerplate!(UpdateTagNode, VidInput, "UpdateTagNode", elapsed);

/// Read-modify-write upsert for an edge (spec §4.7), mirroring
/// `UpdateTagNode` but keyed by a full edge key rather than a vid.
pub struct UpdateEdgeNode {
    kv: Arc<dyn KvStore>,
    catalog: Arc<dyn Catalog>,
    locks: Arc<LockTable>,
    edge_type: EdgeType,
    edge_name: String,
    insertable: bool,
    when: Option<(ExprPool, ExprId)>,
    assignments: Vec<Assignment>,
    outcome: Option<UpdateOutcome>,
    elapsed: Elapsed,
}

impl UpdateEdgeNode {
    pub fn new(
        kv: Arc<dyn KvStore>,
        catalog: Arc<dyn Catalog>,
        locks: Arc<LockTable>,
        edge_type: EdgeType,
        edge_name: impl Into<String>,
        insertable: bool,
        when: Option<(ExprPool, ExprId)>,
        assignments: Vec<Assignment>,
    ) -> Self {
        UpdateEdgeNode {
            kv,
            catalog,
            locks,
            edge_type,
            edge_name: edge_name.into(),
            insertable,
            when,
            assignments,
            outcome: None,
            elapsed: Elapsed::default(),
        }
    }

    pub fn outcome(&self) -> Option<&UpdateOutcome> {
        self.outcome.as_ref()
    }

    fn step(&mut self, ctx: &mut RuntimeContext, part: PartitionId, input: &EdgeKeyInput) -> Result<()> {
        self.outcome = None;
        let edge_key = key::edge_key(part, &input.src, ctx.vid_len, input.edge_type, input.rank, &input.dst, false)?;
        let _guard = self.locks.try_acquire(edge_key.clone())?;

        let mut fetch = FetchEdgeNode::new(self.kv.clone(), self.catalog.clone());
        fetch.execute(ctx, part, input)?;
        let found = fetch.found();

        if let Some((pool, expr)) = &self.when {
            let mut ectx = ExprContext::new();
            if found {
                ectx.set_current_edge(&self.edge_name, fetch.props().clone());
            }
            let passed = crate::expr::eval_bool_filter(pool, *expr, &ectx)?;
            if !passed {
                return Err(Error::FilterOut);
            }
        }

        if !found && !self.insertable {
            return Err(Error::KeyNotFound);
        }

        let baseline: HashMap<String, Value> = if found { fetch.props().clone() } else { HashMap::new() };
        let post = apply_assignments(&self.edge_name, &baseline, &self.assignments)?;

        let schema = self.catalog.edge_schema(&ctx.space, self.edge_type)?;
        let latest = row::latest(&schema).ok_or_else(|| Error::InvalidData("empty schema".into()))?;
        let mut writer = RowWriter::new();
        for (k, v) in &post {
            writer.set(k, v.clone());
        }
        let encoded = writer.encode(latest)?;

        let indexes = self.catalog.indexes_for_edge(&ctx.space, self.edge_type)?;
        if indexes.iter().any(|m| m.state == IndexState::Locked) {
            return Err(Error::IndexLocked);
        }

        let primary = crate::nodes_scan::encode_edge_primary(&input.src, input.rank, &input.dst);
        let mut batch = Batch::new();
        let mut seq = 0u64;
        for idx in &indexes {
            stage_index_maintenance(
                &mut batch,
                part,
                idx.id,
                &idx.fields,
                if found { Some(&baseline) } else { None },
                &post,
                &primary,
                idx.state,
                &mut seq,
            );
        }
        batch.put(edge_key, encoded);

        self.outcome = Some(UpdateOutcome { found, inserted: !found, post, batch });
        Ok(())
    }

    pub fn flush(&mut self, space: &str, part: PartitionId) -> Result<UpdateOutcome> {
        let outcome = self.outcome.take().ok_or_else(|| Error::Unknown("flush called before a successful step".into()))?;
        flush_batch_sync(&self.kv, space, part, outcome.batch.clone())?;
        Ok(outcome)
    }
}

operator_boilerplate!(UpdateEdgeNode, EdgeKeyInput, "UpdateEdgeNode", elapsed);

/// Evaluates `YIELD` expressions against an update's post-image (spec
/// §4.7 step 4). Plain evaluator, not wired into the `Operator`
/// hierarchy: the driver calls it once after a successful
/// `UpdateTagNode`/`UpdateEdgeNode` flush, the same externally-driven
/// shape as `IndexResolveNode`.
pub struct UpdateResNode {
    yields: Vec<(String, ExprPool, ExprId)>,
}

impl UpdateResNode {
    pub fn new(yields: Vec<(String, ExprPool, ExprId)>) -> Self {
        UpdateResNode { yields }
    }

    pub fn evaluate(&self, scope: &str, inserted: bool, post: &HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        let mut ectx = ExprContext::new();
        ectx.set_tag(scope, post.clone());
        let mut row = HashMap::new();
        row.insert("_inserted".to_string(), Value::Bool(inserted));
        for (alias, pool, expr) in &self.yields {
            row.insert(alias.clone(), eval(pool, *expr, &ectx)?);
        }
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemCatalog;
    use crate::kvstore::{BatchOp, MemKv};
    use crate::row::{Field, SchemaVersion};
    use crate::value::FieldType;

    fn account_schema() -> SchemaVersion {
        SchemaVersion {
            version: 0,
            fields: vec![
                Field { name: "balance".into(), ftype: FieldType::Int, nullable: true, default: Some(Value::Int(0)) },
                Field { name: "currency".into(), ftype: FieldType::String, nullable: false, default: None },
            ],
            ttl: None,
        }
    }

    #[test]
    fn insert_missing_required_field_fails_with_no_write() {
        let catalog = Arc::new(MemCatalog::new());
        catalog.create_space("s", 1);
        catalog.add_tag("s", 1, "account", vec![account_schema()]);
        let kv: Arc<dyn KvStore> = Arc::new(MemKv::new());
        let locks = Arc::new(LockTable::new());

        let (pool, expr) = crate::expr::decode(b"account.balance + 100").unwrap();
        let assignments = vec![Assignment { field: "balance".to_string(), pool, expr }];
        let mut node = UpdateTagNode::new(kv.clone(), catalog, locks, 1, "account", true, None, assignments);
        let mut ctx = RuntimeContext::new("s", 1, 0);
        let err = node.execute(&mut ctx, 0, &VidInput(b"X".to_vec())).unwrap_err();
        assert_eq!(err, Error::InvalidFieldValue("field \"currency\" is required, non-nullable, and has no default".to_string()));
        assert!(kv.get("s", 0, &key::vertex_key(0, b"X", 1, 1).unwrap()).is_err());
    }

    #[test]
    fn update_existing_row_preserves_untouched_fields() {
        let catalog = Arc::new(MemCatalog::new());
        catalog.create_space("s", 1);
        catalog.add_tag("s", 1, "account", vec![account_schema()]);
        let kv: Arc<dyn KvStore> = Arc::new(MemKv::new());
        let locks = Arc::new(LockTable::new());

        let mut writer = RowWriter::new();
        writer.set("balance", Value::Int(50));
        writer.set("currency", Value::String("USD".into()));
        let bytes = writer.encode(&account_schema()).unwrap();
        let mut seed = Batch::new();
        seed.put(key::vertex_key(0, b"X", 1, 1).unwrap(), bytes);
        kv.async_append_batch("s", 0, seed, Box::new(|_| {}));

        let (pool, expr) = crate::expr::decode(b"account.balance + 100").unwrap();
        let assignments = vec![Assignment { field: "balance".to_string(), pool, expr }];
        let mut node = UpdateTagNode::new(kv.clone(), catalog, locks, 1, "account", false, None, assignments);
        let mut ctx = RuntimeContext::new("s", 1, 0);
        node.execute(&mut ctx, 0, &VidInput(b"X".to_vec())).unwrap();
        let outcome = node.flush("s", 0).unwrap();
        assert_eq!(outcome.post.get("balance"), Some(&Value::Int(150)));
        assert_eq!(outcome.post.get("currency"), Some(&Value::String("USD".into())));
        assert!(!outcome.inserted);
    }

    #[test]
    fn rebuilding_index_stages_delete_and_modify_when_key_changes() {
        let mut batch = Batch::new();
        let mut old_props = HashMap::new();
        old_props.insert("balance".to_string(), Value::Int(50));
        let mut new_props = HashMap::new();
        new_props.insert("balance".to_string(), Value::Int(150));
        let mut seq = 0u64;

        stage_index_maintenance(
            &mut batch,
            0,
            7,
            &["balance".to_string()],
            Some(&old_props),
            &new_props,
            b"X",
            IndexState::Rebuilding,
            &mut seq,
        );

        assert_eq!(seq, 2);
        assert_eq!(batch.ops.len(), 2);

        let old_fields = vec![Value::Int(50)];
        let old_key = key::index_key(0, 7, &old_fields, b"X");
        let new_fields = vec![Value::Int(150)];
        let new_key = key::index_key(0, 7, &new_fields, b"X");

        match &batch.ops[0] {
            BatchOp::Put(k, v) => {
                assert_eq!(k, &key::operation_key(0, 7, 0));
                assert_eq!(v, &encode_op_record(OP_DELETE, &old_key));
            }
            other => panic!("expected a delete op-record, got {:?}", other),
        }
        match &batch.ops[1] {
            BatchOp::Put(k, v) => {
                assert_eq!(k, &key::operation_key(0, 7, 1));
                assert_eq!(v, &encode_op_record(OP_MODIFY, &new_key));
            }
            other => panic!("expected a modify op-record, got {:?}", other),
        }
    }

    #[test]
    fn rebuilding_index_stages_only_modify_for_a_new_row() {
        let mut batch = Batch::new();
        let mut new_props = HashMap::new();
        new_props.insert("balance".to_string(), Value::Int(50));
        let mut seq = 0u64;

        stage_index_maintenance(&mut batch, 0, 7, &["balance".to_string()], None, &new_props, b"X", IndexState::Rebuilding, &mut seq);

        assert_eq!(seq, 1);
        assert_eq!(batch.ops.len(), 1);
        let new_key = key::index_key(0, 7, &[Value::Int(50)], b"X");
        match &batch.ops[0] {
            BatchOp::Put(k, v) => {
                assert_eq!(k, &key::operation_key(0, 7, 0));
                assert_eq!(v, &encode_op_record(OP_MODIFY, &new_key));
            }
            other => panic!("expected a modify op-record, got {:?}", other),
        }
    }

    #[test]
    fn rebuilding_index_stages_nothing_when_key_unchanged() {
        let mut batch = Batch::new();
        let mut props = HashMap::new();
        props.insert("balance".to_string(), Value::Int(50));
        let mut seq = 0u64;

        stage_index_maintenance(&mut batch, 0, 7, &["balance".to_string()], Some(&props), &props, b"X", IndexState::Rebuilding, &mut seq);

        assert_eq!(seq, 0);
        assert!(batch.ops.is_empty());
    }

    #[test]
    fn contended_lock_fails_immediately() {
        let catalog = Arc::new(MemCatalog::new());
        catalog.create_space("s", 1);
        catalog.add_tag("s", 1, "account", vec![account_schema()]);
        let kv: Arc<dyn KvStore> = Arc::new(MemKv::new());
        let locks = Arc::new(LockTable::new());
        let held = locks.try_acquire(key::vertex_key(0, b"X", 1, 1).unwrap()).unwrap();

        let (pool, expr) = crate::expr::decode(b"account.balance + 100").unwrap();
        let assignments = vec![Assignment { field: "balance".to_string(), pool, expr }];
        let mut node = UpdateTagNode::new(kv, catalog, Arc::clone(&locks), 1, "account", true, None, assignments);
        let mut ctx = RuntimeContext::new("s", 1, 0);
        let err = node.execute(&mut ctx, 0, &VidInput(b"X".to_vec())).unwrap_err();
        assert_eq!(err, Error::DataConflict);
        drop(held);
    }
}
