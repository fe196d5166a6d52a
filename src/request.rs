//! Wire-shaped request/response types (spec §6) and the plan builders
//! that turn one into the operator tree `crate::driver::run` drives.
//! `DataSet` is the final column-ordered projection of a plan's
//! `HashMap`-keyed rows — the column-naming convention
//! (`_vid`, `_tag:<name>:<prop>`, `_edge:<sign><name>:<prop>`,
//! `_stats:<alias>`) lives in `crate::nodes_emit` and is reused here
//! rather than redefined.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::driver::{self, DriverResult};
use crate::error::{Error, Result};
use crate::key::{EdgeType, IndexId, PartitionId, TagId};
use crate::kvstore::KvStore;
use crate::lock::LockTable;
use crate::nodes_agg::AggFunc;
use crate::nodes_emit::{GetEdgeKeysNode, GetEdgePropNode, GetNeighborsNode, GetTagPropNode, IndexOutputNode, ResultRow};
use crate::nodes_join::{FilterNode, HashJoinNode, MultiTagNode};
use crate::nodes_scan::{FetchEdgeNode, IndexResolveKind, IndexResolveNode, IndexScanNode, SingleEdgeNode, TagNode};
use crate::nodes_write::{Assignment, UpdateEdgeNode, UpdateResNode, UpdateTagNode};
use crate::operator::{ColumnHint, Operator, VidInput};
use crate::txn::TransactionManager;
use crate::value::{FieldType, Value};

/// Column-ordered result table (spec §6): `rows[i][j]` is the value of
/// `col_names[j]` for the i-th emitted row. Columns a given row never
/// populated (a vertex without the requested tag, say) come back
/// `Value::Null` rather than shrinking the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSet {
    pub col_names: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl DataSet {
    pub fn from_result_rows(col_names: Vec<String>, rows: &[ResultRow]) -> Self {
        let shaped = rows
            .iter()
            .map(|row| col_names.iter().map(|c| row.get(c).cloned().unwrap_or(Value::Null)).collect())
            .collect();
        DataSet { col_names, rows: shaped }
    }
}

/// One requested edge type for `GetNeighborsRequest` (spec §4.4/§4.6):
/// `reversed` controls both scan direction bookkeeping and the
/// `_edge:+`/`_edge:-` column-naming sign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub edge_type: EdgeType,
    pub edge_name: String,
    pub reversed: bool,
}

/// One requested tag for vertex-property projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagSpec {
    pub tag_id: TagId,
    pub tag_name: String,
}

/// Spec §3/§4.6 `GetNeighbors`: for each vid, every requested tag's
/// properties plus every requested edge type's rows, optionally
/// filtered and optionally summarized by running stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetNeighborsRequest {
    pub space: String,
    pub vid_len: usize,
    /// Pre-partitioned vids (spec §5: partitioning is the caller's
    /// concern, this core only fans out over whatever grouping it is
    /// handed).
    pub vids_by_partition: BTreeMap<PartitionId, Vec<Vec<u8>>>,
    pub tags: Vec<TagSpec>,
    pub edges: Vec<EdgeSpec>,
    pub filter: Option<String>,
    /// Whether `filter` references edge-scoped properties (spec §4.4
    /// tag+edge mode) as opposed to only vertex tags. The request layer
    /// already knows this from how the filter expression was compiled,
    /// so it is carried here rather than re-derived by inspecting the
    /// decoded tree.
    pub filter_has_edge_scope: bool,
    /// `(alias, function, source field)`, e.g. `("total", Sum, "degree")`
    /// for `SUM(follow.degree) AS total`. Fed from each edge row that
    /// passes `filter`, so stats are computed after filtering (spec §9).
    pub stats: Vec<(String, AggFunc, String)>,
}

/// Builds one `GetNeighborsNode` instance. Called once per
/// `(partition, input)` by `execute_get_neighbors`'s `build_plan`
/// closure, since scan state lives on the node itself, not the request.
/// `txn`, when given, is attached to every `SingleEdgeNode` so a
/// committed soft-locked edge resurfaces instead of vanishing (spec
/// §4.9); omit it for spaces with no in-flight two-phase edge writes.
pub fn build_get_neighbors_plan(
    kv: &Arc<dyn KvStore>,
    catalog: &Arc<dyn Catalog>,
    req: &GetNeighborsRequest,
    txn: Option<&Arc<dyn TransactionManager>>,
) -> Result<GetNeighborsNode> {
    let tag_nodes = |req: &GetNeighborsRequest| -> Vec<(Box<TagNode>, String)> {
        req.tags
            .iter()
            .map(|t| (Box::new(TagNode::new(kv.clone(), catalog.clone(), t.tag_id, t.tag_name.clone())), t.tag_name.clone()))
            .collect()
    };
    let vertex_tags = Box::new(MultiTagNode::new(tag_nodes(req)));

    let mut reversed_by_column = Vec::with_capacity(req.edges.len());
    let mut edge_names = Vec::with_capacity(req.edges.len());
    let mut edge_deps = Vec::with_capacity(req.edges.len());
    for e in &req.edges {
        let schema = Arc::new(catalog.edge_schema(&req.space, e.edge_type)?);
        let mut node = SingleEdgeNode::new(kv.clone(), catalog.clone(), e.edge_type, e.edge_name.clone());
        if let Some(tm) = txn {
            node = node.with_transaction_manager(tm.clone());
        }
        edge_deps.push((Box::new(node), e.edge_type, e.edge_name.clone(), schema));
        reversed_by_column.push(e.reversed);
        edge_names.push(e.edge_name.clone());
    }
    let edges = Box::new(HashJoinNode::new(edge_deps));

    let filter = match &req.filter {
        None => None,
        Some(text) => {
            let (pool, expr) = crate::expr::decode(text.as_bytes())?;
            let multi = Box::new(MultiTagNode::new(tag_nodes(req)));
            Some(Box::new(if req.filter_has_edge_scope {
                FilterNode::new_with_edges(multi, pool, expr)
            } else {
                FilterNode::new_tag_only(multi, pool, expr)
            }))
        }
    };

    let stats = if req.stats.is_empty() { None } else { Some(Box::new(crate::nodes_agg::AggregateNode::new(req.stats.clone()))) };

    Ok(GetNeighborsNode::new(vertex_tags, edges, filter, reversed_by_column, edge_names, stats))
}

/// Drives `build_get_neighbors_plan` across every requested vid via
/// `crate::driver::run` (spec §5). Builder errors (an unknown edge
/// type, say) are request-shape errors, not per-input errors, so they
/// are surfaced once up front rather than folded into `ILLEGAL_DATA`.
pub fn execute_get_neighbors(
    kv: &Arc<dyn KvStore>,
    catalog: &Arc<dyn Catalog>,
    config: &driver::Config,
    req: &GetNeighborsRequest,
    txn: Option<&Arc<dyn TransactionManager>>,
) -> Result<DriverResult<ResultRow>> {
    build_get_neighbors_plan(kv, catalog, req, txn)?;

    let inputs: BTreeMap<PartitionId, Vec<VidInput>> = req
        .vids_by_partition
        .iter()
        .map(|(part, vids)| (*part, vids.iter().cloned().map(VidInput).collect()))
        .collect();

    let kv = kv.clone();
    let catalog = catalog.clone();
    let txn = txn.cloned();
    Ok(driver::run(
        config,
        &req.space,
        req.vid_len,
        inputs,
        move || build_get_neighbors_plan(&kv, &catalog, req, txn.as_ref()).expect("request already validated"),
        |node: &GetNeighborsNode| node.rows().to_vec(),
    ))
}

/// Spec §4.6 `GetTagProp`: a point read over one vid per request,
/// projecting one tag's properties.
pub fn build_get_tag_prop_plan(kv: &Arc<dyn KvStore>, catalog: &Arc<dyn Catalog>, tag_id: TagId, tag_name: &str) -> GetTagPropNode {
    GetTagPropNode::new(Box::new(TagNode::new(kv.clone(), catalog.clone(), tag_id, tag_name)))
}

/// Spec §4.6 `GetEdgeProp`: a point read over one edge key per request.
pub fn build_get_edge_prop_plan(kv: &Arc<dyn KvStore>, catalog: &Arc<dyn Catalog>, edge_name: &str, reversed: bool) -> GetEdgePropNode {
    GetEdgePropNode::new(Box::new(FetchEdgeNode::new(kv.clone(), catalog.clone())), edge_name, reversed)
}

/// Spec §3 supplement `GetEdgeKeys`: lists edge keys rooted at a vid
/// without resolving properties.
pub fn build_get_edge_keys_plan(
    kv: &Arc<dyn KvStore>,
    catalog: &Arc<dyn Catalog>,
    space: &str,
    edge_specs: Vec<EdgeSpec>,
) -> Result<GetEdgeKeysNode> {
    let mut deps = Vec::with_capacity(edge_specs.len());
    for e in edge_specs {
        let schema = Arc::new(catalog.edge_schema(space, e.edge_type)?);
        let node = Box::new(SingleEdgeNode::new(kv.clone(), catalog.clone(), e.edge_type, e.edge_name.clone()));
        deps.push((node, e.edge_type, e.edge_name, schema));
    }
    Ok(GetEdgeKeysNode::new(Box::new(HashJoinNode::new(deps))))
}

/// Spec §4.7 `UpdateVertex`/`UpdateEdge`. `updated_props` pairs a field
/// name with the decoded right-hand-side expression text; `when` is
/// the optional precondition filter; `yields` pairs a result column
/// alias with its expression text, evaluated against the post-image by
/// `crate::nodes_write::UpdateResNode` after a successful flush. Both
/// requests address exactly one row, so unlike `GetNeighbors` they are
/// driven directly by `execute`+`flush`, not through `crate::driver`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateVertexRequest {
    pub space: String,
    pub tag_id: TagId,
    pub tag_name: String,
    pub vid: Vec<u8>,
    pub insertable: bool,
    pub when: Option<String>,
    pub updated_props: Vec<(String, String)>,
    pub yields: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateEdgeRequest {
    pub space: String,
    pub edge_type: EdgeType,
    pub edge_name: String,
    pub src: Vec<u8>,
    pub rank: i64,
    pub dst: Vec<u8>,
    pub insertable: bool,
    pub when: Option<String>,
    pub updated_props: Vec<(String, String)>,
    pub yields: Vec<(String, String)>,
}

fn decode_assignments(updated_props: &[(String, String)]) -> Result<Vec<Assignment>> {
    updated_props
        .iter()
        .map(|(field, text)| {
            let (pool, expr) = crate::expr::decode(text.as_bytes())?;
            Ok(Assignment { field: field.clone(), pool, expr })
        })
        .collect()
}

fn decode_when(when: &Option<String>) -> Result<Option<(crate::expr::ExprPool, crate::expr::ExprId)>> {
    when.as_ref().map(|text| crate::expr::decode(text.as_bytes())).transpose()
}

fn decode_yields(yields: &[(String, String)]) -> Result<Vec<(String, crate::expr::ExprPool, crate::expr::ExprId)>> {
    yields
        .iter()
        .map(|(alias, text)| {
            let (pool, expr) = crate::expr::decode(text.as_bytes())?;
            Ok((alias.clone(), pool, expr))
        })
        .collect()
}

pub fn build_update_vertex_plan(
    kv: &Arc<dyn KvStore>,
    catalog: &Arc<dyn Catalog>,
    locks: &Arc<LockTable>,
    req: &UpdateVertexRequest,
) -> Result<UpdateTagNode> {
    let assignments = decode_assignments(&req.updated_props)?;
    let when = decode_when(&req.when)?;
    Ok(UpdateTagNode::new(
        kv.clone(),
        catalog.clone(),
        locks.clone(),
        req.tag_id,
        req.tag_name.clone(),
        req.insertable,
        when,
        assignments,
    ))
}

pub fn build_update_edge_plan(
    kv: &Arc<dyn KvStore>,
    catalog: &Arc<dyn Catalog>,
    locks: &Arc<LockTable>,
    req: &UpdateEdgeRequest,
) -> Result<UpdateEdgeNode> {
    let assignments = decode_assignments(&req.updated_props)?;
    let when = decode_when(&req.when)?;
    Ok(UpdateEdgeNode::new(
        kv.clone(),
        catalog.clone(),
        locks.clone(),
        req.edge_type,
        req.edge_name.clone(),
        req.insertable,
        when,
        assignments,
    ))
}

pub fn build_update_res_node(yields: &[(String, String)]) -> Result<UpdateResNode> {
    Ok(UpdateResNode::new(decode_yields(yields)?))
}

/// Spec §4.8 `LookupIndex`: scan an index, optionally resolving each
/// row back to its backing tag/edge row (the *data*/*data+filter*
/// branches).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupIndexRequest {
    pub space: String,
    pub vid_len: usize,
    pub index_id: IndexId,
    pub field_names: Vec<String>,
    pub field_types: Vec<FieldType>,
    pub hints: Vec<ColumnHint>,
    pub resolve: Option<IndexResolveKind>,
}

pub fn build_index_lookup_plan(kv: &Arc<dyn KvStore>, catalog: &Arc<dyn Catalog>, req: LookupIndexRequest) -> IndexOutputNode {
    let scan = Box::new(IndexScanNode::new(kv.clone(), req.index_id, req.field_names, req.field_types, req.hints));
    let resolver = req.resolve.map(|kind| Box::new(IndexResolveNode::new(kv.clone(), catalog.clone(), kind)));
    IndexOutputNode::new(scan, resolver, req.vid_len)
}

/// Admin-plane requests (spec §3 supplement, grounded on the original
/// `AdminProcessor` family): index-rebuild task control, checkpoint
/// management, write blocking, and space teardown. These don't drive
/// the operator DAG — they call straight through `Catalog`/`KvStore`.
/// Task scheduling itself (the rebuild/compaction worker loop) is out
/// of this core's scope; only the control-plane request/response shape
/// lives here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTaskRequest {
    pub task_id: u64,
    pub job_type: String,
    pub params: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopTaskRequest {
    pub task_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCheckpointRequest {
    pub space: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropCheckpointRequest {
    pub space: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockingSignRequest {
    pub space: String,
    pub sign: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearSpaceRequest {
    pub space: String,
}

pub fn handle_create_checkpoint(kv: &Arc<dyn KvStore>, req: &CreateCheckpointRequest) -> Result<crate::kvstore::CheckpointInfo> {
    kv.create_checkpoint(&req.space, &req.name)
}

pub fn handle_drop_checkpoint(kv: &Arc<dyn KvStore>, req: &DropCheckpointRequest) -> Result<()> {
    kv.drop_checkpoint(&req.space, &req.name)
}

pub fn handle_blocking_sign(kv: &Arc<dyn KvStore>, req: &BlockingSignRequest) -> Result<()> {
    kv.set_write_blocking(&req.space, req.sign);
    Ok(())
}

/// Removes every key the space owns across the partitions it leads
/// (spec §3 "ClearSpace"): one `REMOVE_RANGE` per leading partition,
/// widest possible bound since this crate doesn't track per-space key
/// prefixes beyond what `crate::key` already encodes per tag/edge/index.
pub fn handle_clear_space(kv: &Arc<dyn KvStore>, req: &ClearSpaceRequest) -> Result<()> {
    for (space, part) in kv.all_leader() {
        if space != req.space {
            continue;
        }
        let mut batch = crate::kvstore::Batch::new();
        batch.remove_range(vec![0x00], vec![0xFF]);
        let (tx, rx) = std::sync::mpsc::channel();
        kv.async_append_batch(&space, part, batch, Box::new(move |r| {
            let _ = tx.send(r);
        }));
        rx.recv().map_err(|_| Error::Unknown("clear-space callback dropped".into()))??;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemCatalog;
    use crate::context::RuntimeContext;
    use crate::kvstore::MemKv;
    use crate::row::{Field, RowWriter, SchemaVersion};
    use crate::value::Value;

    fn player_schema() -> SchemaVersion {
        SchemaVersion {
            version: 0,
            fields: vec![Field { name: "age".into(), ftype: FieldType::Int, nullable: true, default: None }],
            ttl: None,
        }
    }

    fn seeded(vid: &[u8], age: i64, kv: &MemKv) {
        let mut w = RowWriter::new();
        w.set("age", Value::Int(age));
        let bytes = w.encode(&player_schema()).unwrap();
        let mut batch = crate::kvstore::Batch::new();
        batch.put(crate::key::vertex_key(0, vid, 4, 1).unwrap(), bytes);
        kv.async_append_batch("s", 0, batch, Box::new(|_| {}));
    }

    #[test]
    fn get_neighbors_request_builds_a_runnable_plan() {
        let mem = MemCatalog::new();
        mem.create_space("s", 4);
        mem.add_tag("s", 1, "player", vec![player_schema()]);
        let mem_kv = MemKv::new();
        seeded(b"Ann1", 21, &mem_kv);
        let catalog: Arc<dyn Catalog> = Arc::new(mem);
        let kv: Arc<dyn KvStore> = Arc::new(mem_kv);

        let req = GetNeighborsRequest {
            space: "s".into(),
            vid_len: 4,
            vids_by_partition: BTreeMap::from([(0u32, vec![b"Ann1".to_vec()])]),
            tags: vec![TagSpec { tag_id: 1, tag_name: "player".into() }],
            edges: vec![],
            filter: None,
            filter_has_edge_scope: false,
            stats: vec![],
        };
        let mut node = build_get_neighbors_plan(&kv, &catalog, &req, None).unwrap();
        let mut ctx = RuntimeContext::new("s", 4, 0);
        node.execute(&mut ctx, 0, &VidInput(b"Ann1".to_vec())).unwrap();
        let rows = node.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(&crate::nodes_emit::tag_column("player", "age")), Some(&Value::Int(21)));
    }

    #[test]
    fn execute_get_neighbors_fans_out_over_partitions() {
        let mem = MemCatalog::new();
        mem.create_space("s", 4);
        mem.add_tag("s", 1, "player", vec![player_schema()]);
        let kv = MemKv::new();
        seeded(b"Ann1", 30, &kv);
        seeded(b"Bob1", 40, &kv);
        let kv: Arc<dyn KvStore> = Arc::new(kv);
        let catalog: Arc<dyn Catalog> = Arc::new(mem);

        let req = GetNeighborsRequest {
            space: "s".into(),
            vid_len: 4,
            vids_by_partition: BTreeMap::from([(0u32, vec![b"Ann1".to_vec(), b"Bob1".to_vec()])]),
            tags: vec![TagSpec { tag_id: 1, tag_name: "player".into() }],
            edges: vec![],
            filter: None,
            filter_has_edge_scope: false,
            stats: vec![],
        };
        let result = execute_get_neighbors(&kv, &catalog, &driver::Config::default(), &req, None).unwrap();
        assert!(result.succeeded);
        assert_eq!(result.rows().len(), 2);
    }

    #[test]
    fn get_neighbors_with_stats_computed_after_filter() {
        let mem = MemCatalog::new();
        mem.create_space("s", 4);
        let player_fields =
            vec![Field { name: "name".into(), ftype: FieldType::String, nullable: true, default: None }, Field {
                name: "age".into(),
                ftype: FieldType::Int,
                nullable: true,
                default: None,
            }];
        mem.add_tag("s", 1, "player", vec![SchemaVersion { version: 0, fields: player_fields, ttl: None }]);
        let follow_fields = vec![Field { name: "degree".into(), ftype: FieldType::Int, nullable: true, default: None }];
        mem.add_edge("s", 1, "follow", vec![SchemaVersion { version: 0, fields: follow_fields, ttl: None }]);

        let kv = MemKv::new();
        let mut w = RowWriter::new();
        w.set("name", Value::String("Ann".into()));
        w.set("age", Value::Int(30));
        let player_bytes = w.encode(&mem.tag_schema("s", 1).unwrap()[0]).unwrap();
        let mut vertex_batch = crate::kvstore::Batch::new();
        vertex_batch.put(crate::key::vertex_key(0, b"Ann1", 4, 1).unwrap(), player_bytes);
        kv.async_append_batch("s", 0, vertex_batch, Box::new(|_| {}));

        let edge_schema = mem.edge_schema("s", 1).unwrap();
        let mut to_bob = RowWriter::new();
        to_bob.set("degree", Value::Int(5));
        let bob_bytes = to_bob.encode(&edge_schema[0]).unwrap();
        let mut to_cid = RowWriter::new();
        to_cid.set("degree", Value::Int(10));
        let cid_bytes = to_cid.encode(&edge_schema[0]).unwrap();
        let mut edge_batch = crate::kvstore::Batch::new();
        edge_batch.put(crate::key::edge_key(0, b"Ann1", 4, 1, 0, b"Bob1", false).unwrap(), bob_bytes);
        edge_batch.put(crate::key::edge_key(0, b"Ann1", 4, 1, 0, b"Cid1", false).unwrap(), cid_bytes);
        kv.async_append_batch("s", 0, edge_batch, Box::new(|_| {}));

        let catalog: Arc<dyn Catalog> = Arc::new(mem);
        let kv: Arc<dyn KvStore> = Arc::new(kv);

        let req = GetNeighborsRequest {
            space: "s".into(),
            vid_len: 4,
            vids_by_partition: BTreeMap::from([(0u32, vec![b"Ann1".to_vec()])]),
            tags: vec![TagSpec { tag_id: 1, tag_name: "player".into() }],
            edges: vec![EdgeSpec { edge_type: 1, edge_name: "follow".into(), reversed: false }],
            filter: Some("follow.degree >= 6".into()),
            filter_has_edge_scope: true,
            stats: vec![("total".into(), AggFunc::Sum, "degree".into())],
        };
        let mut node = build_get_neighbors_plan(&kv, &catalog, &req, None).unwrap();
        let mut ctx = RuntimeContext::new("s", 4, 0);
        node.execute(&mut ctx, 0, &VidInput(b"Ann1".to_vec())).unwrap();

        let rows = node.rows();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.get(&crate::nodes_emit::tag_column("player", "name")), Some(&Value::String("Ann".into())));
        assert_eq!(row.get(&crate::nodes_emit::tag_column("player", "age")), Some(&Value::Int(30)));
        let edges = row.get(&crate::nodes_emit::edge_list_column("follow", false)).unwrap();
        assert_eq!(
            edges,
            &Value::List(vec![Value::List(vec![
                Value::String("Ann1".into()),
                Value::Int(1),
                Value::Int(0),
                Value::String("Cid1".into()),
                Value::Int(10),
            ])])
        );
        assert_eq!(row.get(&crate::nodes_emit::stat_column("total")), Some(&Value::Float(10.0)));
    }

    #[test]
    fn get_neighbors_collapses_every_passing_edge_into_one_row_per_vid() {
        let mem = MemCatalog::new();
        mem.create_space("s", 4);
        mem.add_tag("s", 1, "player", vec![player_schema()]);
        let follow_fields = vec![Field { name: "degree".into(), ftype: FieldType::Int, nullable: true, default: None }];
        mem.add_edge("s", 1, "follow", vec![SchemaVersion { version: 0, fields: follow_fields, ttl: None }]);

        let kv = MemKv::new();
        seeded(b"Ann1", 30, &kv);

        let edge_schema = mem.edge_schema("s", 1).unwrap();
        let mut to_bob = RowWriter::new();
        to_bob.set("degree", Value::Int(5));
        let bob_bytes = to_bob.encode(&edge_schema[0]).unwrap();
        let mut to_cid = RowWriter::new();
        to_cid.set("degree", Value::Int(10));
        let cid_bytes = to_cid.encode(&edge_schema[0]).unwrap();
        let mut edge_batch = crate::kvstore::Batch::new();
        edge_batch.put(crate::key::edge_key(0, b"Ann1", 4, 1, 0, b"Bob1", false).unwrap(), bob_bytes);
        edge_batch.put(crate::key::edge_key(0, b"Ann1", 4, 1, 0, b"Cid1", false).unwrap(), cid_bytes);
        kv.async_append_batch("s", 0, edge_batch, Box::new(|_| {}));

        let catalog: Arc<dyn Catalog> = Arc::new(mem);
        let kv: Arc<dyn KvStore> = Arc::new(kv);

        let req = GetNeighborsRequest {
            space: "s".into(),
            vid_len: 4,
            vids_by_partition: BTreeMap::from([(0u32, vec![b"Ann1".to_vec()])]),
            tags: vec![TagSpec { tag_id: 1, tag_name: "player".into() }],
            edges: vec![EdgeSpec { edge_type: 1, edge_name: "follow".into(), reversed: false }],
            filter: Some("follow.degree >= 1".into()),
            filter_has_edge_scope: true,
            stats: vec![],
        };
        let mut node = build_get_neighbors_plan(&kv, &catalog, &req, None).unwrap();
        let mut ctx = RuntimeContext::new("s", 4, 0);
        node.execute(&mut ctx, 0, &VidInput(b"Ann1".to_vec())).unwrap();

        let rows = node.rows();
        assert_eq!(rows.len(), 1, "one row per vid, not one per edge");
        let edges = rows[0].get(&crate::nodes_emit::edge_list_column("follow", false)).unwrap();
        match edges {
            Value::List(instances) => assert_eq!(instances.len(), 2, "both edges land in the same vid's list"),
            other => panic!("expected a list-of-lists edge column, got {:?}", other),
        }
    }

    #[test]
    fn get_neighbors_resurfaces_a_committed_soft_locked_edge() {
        let mem = MemCatalog::new();
        mem.create_space("s", 4);
        mem.add_tag("s", 1, "player", vec![player_schema()]);
        let follow_fields = vec![Field { name: "degree".into(), ftype: FieldType::Int, nullable: true, default: None }];
        mem.add_edge("s", 1, "follow", vec![SchemaVersion { version: 0, fields: follow_fields, ttl: None }]);

        let kv = MemKv::new();
        seeded(b"Ann1", 30, &kv);

        let edge_schema = mem.edge_schema("s", 1).unwrap();
        let mut to_bob = RowWriter::new();
        to_bob.set("degree", Value::Int(5));
        let bob_bytes = to_bob.encode(&edge_schema[0]).unwrap();
        let mut lock_batch = crate::kvstore::Batch::new();
        lock_batch.put(crate::key::edge_key(0, b"Ann1", 4, 1, 0, b"Cid1", true).unwrap(), Vec::new());
        kv.async_append_batch("s", 0, lock_batch, Box::new(|_| {}));

        let catalog: Arc<dyn Catalog> = Arc::new(mem);
        let kv: Arc<dyn KvStore> = Arc::new(kv);

        let req = GetNeighborsRequest {
            space: "s".into(),
            vid_len: 4,
            vids_by_partition: BTreeMap::from([(0u32, vec![b"Ann1".to_vec()])]),
            tags: vec![TagSpec { tag_id: 1, tag_name: "player".into() }],
            edges: vec![EdgeSpec { edge_type: 1, edge_name: "follow".into(), reversed: false }],
            filter: None,
            filter_has_edge_scope: false,
            stats: vec![],
        };

        let mut resolved = RowWriter::new();
        resolved.set("degree", Value::Int(10));
        let resolved_bytes = resolved.encode(&edge_schema[0]).unwrap();
        let concrete = crate::txn::MemTransactionManager::new();
        concrete.seed(0, b"Cid1".to_vec(), Ok(Some(resolved_bytes)));
        let tm: Arc<dyn crate::txn::TransactionManager> = Arc::new(concrete);

        let mut node = build_get_neighbors_plan(&kv, &catalog, &req, Some(&tm)).unwrap();
        let mut ctx = RuntimeContext::new("s", 4, 0);
        node.execute(&mut ctx, 0, &VidInput(b"Ann1".to_vec())).unwrap();

        let rows = node.rows();
        assert_eq!(rows.len(), 1);
        let edges = rows[0].get(&crate::nodes_emit::edge_list_column("follow", false)).unwrap();
        match edges {
            Value::List(instances) => assert_eq!(instances.len(), 1, "the committed lock resurfaces as an edge instance"),
            other => panic!("expected a list-of-lists edge column, got {:?}", other),
        }
    }

    #[test]
    fn index_lookup_resolves_mixed_covered_and_uncovered_columns() {
        let mem = MemCatalog::new();
        mem.create_space("s", 4);
        let fields = vec![
            Field { name: "a".into(), ftype: FieldType::Int, nullable: true, default: None },
            Field { name: "b".into(), ftype: FieldType::Int, nullable: true, default: None },
            Field { name: "c".into(), ftype: FieldType::String, nullable: true, default: None },
        ];
        mem.add_tag("s", 1, "t", vec![SchemaVersion { version: 0, fields, ttl: None }]);
        let schema = mem.tag_schema("s", 1).unwrap();

        let kv = MemKv::new();
        let rows: [(Vec<u8>, i64, i64, &str); 3] =
            [(b"vid1".to_vec(), 1, 2, "x"), (b"vid2".to_vec(), 1, 2, "y"), (b"vid3".to_vec(), 1, 3, "x")];
        let mut batch = crate::kvstore::Batch::new();
        for (vid, a, b, c) in &rows {
            let mut w = RowWriter::new();
            w.set("a", Value::Int(*a));
            w.set("b", Value::Int(*b));
            w.set("c", Value::String((*c).into()));
            let bytes = w.encode(&schema[0]).unwrap();
            batch.put(crate::key::vertex_key(0, vid, 4, 1).unwrap(), bytes);
            let idx_key = crate::key::index_key(0, 7, &[Value::Int(*a), Value::Int(*b)], vid);
            batch.put(idx_key, Vec::new());
        }
        kv.async_append_batch("s", 0, batch, Box::new(|_| {}));

        let catalog: Arc<dyn Catalog> = Arc::new(mem);
        let kv: Arc<dyn KvStore> = Arc::new(kv);

        let req = LookupIndexRequest {
            space: "s".into(),
            vid_len: 4,
            index_id: 7,
            field_names: vec!["a".into(), "b".into()],
            field_types: vec![FieldType::Int, FieldType::Int],
            hints: vec![ColumnHint::Eq(Value::Int(1))],
            resolve: Some(IndexResolveKind::Vertex { tag_id: 1 }),
        };
        let mut node = build_index_lookup_plan(&kv, &catalog, req);
        let mut ctx = RuntimeContext::new("s", 4, 0);
        node.execute(&mut ctx, 0, &()).unwrap();

        // `idx_ab` only covers (a, b); filtering on the uncovered column `c`
        // is applied by the caller over the resolved rows, not inside the
        // index scan itself.
        let matching: Vec<_> = node.rows().iter().filter(|r| r.get("c") == Some(&Value::String("x".into()))).collect();
        assert_eq!(matching.len(), 2);
        let mut pairs: Vec<(i64, i64)> =
            matching.iter().map(|r| (r.get("a").unwrap().as_int().unwrap(), r.get("b").unwrap().as_int().unwrap())).collect();
        pairs.sort();
        assert_eq!(pairs, vec![(1, 2), (1, 3)]);
    }

    #[test]
    fn data_set_fills_missing_columns_with_null() {
        let mut row = ResultRow::new();
        row.insert("_vid".to_string(), Value::String("Ann1".into()));
        let ds = DataSet::from_result_rows(vec!["_vid".to_string(), "_tag:player:age".to_string()], &[row]);
        assert_eq!(ds.rows[0][0], Value::String("Ann1".into()));
        assert_eq!(ds.rows[0][1], Value::Null);
    }
}
