//! Emit operators (spec §4.6, §4.8): the plan roots that turn decoded
//! rows into result-set rows, keyed by the column-naming convention
//! (`_vid`, `_tag:<name>:<prop>`, `_edge:<sign><name>:<prop>`,
//! `_stats:<alias>`).

use std::collections::HashMap;
use std::sync::Arc;

use crate::context::RuntimeContext;
use crate::error::Result;
use crate::key::PartitionId;
use crate::nodes_agg::AggregateNode;
use crate::nodes_join::{FilterNode, HashJoinNode, MultiTagNode};
use crate::nodes_scan::{FetchEdgeNode, IndexResolveNode, IndexRow, IndexScanNode, TagNode};
use crate::operator::{Elapsed, IterateNode, Operator, VidInput};
use crate::operator_boilerplate;
use crate::value::Value;

pub fn tag_column(tag: &str, prop: &str) -> String {
    format!("_tag:{}:{}", tag, prop)
}

pub fn edge_column(edge: &str, reversed: bool, prop: &str) -> String {
    format!("_edge:{}{}:{}", if reversed { "-" } else { "+" }, edge, prop)
}

/// Group-level column for `GetNeighborsNode`'s per-edge-type shape (spec
/// §4.6): one column per requested edge type, holding a list of that
/// vid's passing edges, each itself a list of `[_src, _type, _rank,
/// _dst, prop...]` (spec §4.6 "edge columns are lists of lists").
pub fn edge_list_column(edge: &str, reversed: bool) -> String {
    format!("_edge:{}{}", if reversed { "-" } else { "+" }, edge)
}

pub fn stat_column(alias: &str) -> String {
    format!("_stats:{}", alias)
}

/// One result row: an ordered set of named columns (spec §4.6). Column
/// order is not semantically significant here; `DataSet` (in
/// `crate::request`) pins the final ordering against its own
/// `col_names`.
pub type ResultRow = HashMap<String, Value>;

/// Gathers a vertex's requested tags and, for each requested edge
/// type, every passing edge plus its properties, into a single row per
/// vid (spec §4.6 `GetNeighborsNode`): `_vid`, tag columns, one
/// list-of-lists column per requested edge type (null if no edge of
/// that type passed), and the stats columns if requested.
pub struct GetNeighborsNode {
    vertex_tags: Box<MultiTagNode>,
    edges: Box<HashJoinNode>,
    filter: Option<Box<FilterNode>>,
    reversed_by_column: Vec<bool>,
    edge_names: Vec<String>,
    stats: Option<Box<AggregateNode>>,
    rows: Vec<ResultRow>,
    elapsed: Elapsed,
}

impl GetNeighborsNode {
    pub fn new(
        vertex_tags: Box<MultiTagNode>,
        edges: Box<HashJoinNode>,
        filter: Option<Box<FilterNode>>,
        reversed_by_column: Vec<bool>,
        edge_names: Vec<String>,
        stats: Option<Box<AggregateNode>>,
    ) -> Self {
        GetNeighborsNode {
            vertex_tags,
            edges,
            filter,
            reversed_by_column,
            edge_names,
            stats,
            rows: Vec::new(),
            elapsed: Elapsed::default(),
        }
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    fn step(&mut self, ctx: &mut RuntimeContext, part: PartitionId, input: &VidInput) -> Result<()> {
        self.rows.clear();
        self.vertex_tags.execute(ctx, part, input)?;
        if let Some(filter) = &mut self.filter {
            filter.execute(ctx, part, input)?;
            if ctx.tag_filtered_out {
                return Ok(());
            }
        }
        self.edges.execute(ctx, part, input)?;

        let mut row = ResultRow::new();
        row.insert("_vid".to_string(), Value::String(String::from_utf8_lossy(&input.0).into_owned()));
        for (tag, props) in self.vertex_tags.found_tags() {
            for (k, v) in props {
                row.insert(tag_column(tag, k), v.clone());
            }
        }

        let mut per_edge_type: Vec<Vec<Value>> = vec![Vec::new(); self.edge_names.len()];
        while self.edges.valid() {
            let column_idx = ctx.current_edge.as_ref().map(|e| e.column_idx).unwrap_or(0);
            let edge_name = self.edge_names.get(column_idx).cloned().unwrap_or_default();
            let edge_props = self.edges.current_props().cloned().unwrap_or_default();

            let passes = match &self.filter {
                Some(f) if f.has_edge_mode() => f.check_edge(&edge_name, &edge_props)?,
                _ => true,
            };

            if passes {
                if let Some(current) = self.edges.current_row() {
                    let mut instance = vec![
                        Value::String(String::from_utf8_lossy(&current.src).into_owned()),
                        Value::Int(current.edge_type as i64),
                        Value::Int(current.rank),
                        Value::String(String::from_utf8_lossy(&current.dst).into_owned()),
                    ];
                    let mut keys: Vec<&String> = edge_props.keys().collect();
                    keys.sort();
                    for k in keys {
                        instance.push(edge_props[k].clone());
                    }
                    if let Some(bucket) = per_edge_type.get_mut(column_idx) {
                        bucket.push(Value::List(instance));
                    }
                }
                if let Some(stats) = &mut self.stats {
                    stats.feed(&edge_props)?;
                }
            }
            self.edges.advance(ctx, part, input)?;
        }

        for (idx, edge_name) in self.edge_names.iter().enumerate() {
            let reversed = self.reversed_by_column.get(idx).copied().unwrap_or(false);
            let bucket = std::mem::take(&mut per_edge_type[idx]);
            let value = if bucket.is_empty() { Value::Null } else { Value::List(bucket) };
            row.insert(edge_list_column(edge_name, reversed), value);
        }

        if let Some(stats) = &self.stats {
            for (alias, v) in stats.results() {
                row.insert(stat_column(&alias), v);
            }
        }

        ctx.charge_memory(row.values().map(Value::approx_size).sum())?;
        self.rows.push(row);
        Ok(())
    }
}

operator_boilerplate!(GetNeighborsNode, VidInput, "GetNeighborsNode", elapsed);

/// Projects one vertex's requested tag properties (spec §4.6
/// `GetTagPropNode`): `_vid` plus `_tag:<name>:<prop>` columns. Absent
/// tags (the vertex simply doesn't carry that tag) are skipped, not
/// errors.
pub struct GetTagPropNode {
    tag: Box<TagNode>,
    row: Option<ResultRow>,
    consumed: bool,
    elapsed: Elapsed,
}

impl GetTagPropNode {
    pub fn new(tag: Box<TagNode>) -> Self {
        GetTagPropNode { tag, row: None, consumed: false, elapsed: Elapsed::default() }
    }

    fn step(&mut self, ctx: &mut RuntimeContext, part: PartitionId, input: &VidInput) -> Result<()> {
        self.consumed = false;
        self.tag.execute(ctx, part, input)?;
        if !self.tag.found() {
            self.row = None;
            return Ok(());
        }
        let mut row = ResultRow::new();
        row.insert("_vid".to_string(), Value::String(String::from_utf8_lossy(&input.0).into_owned()));
        for (k, v) in self.tag.props() {
            row.insert(tag_column(self.tag.tag_name(), k), v.clone());
        }
        self.row = Some(row);
        Ok(())
    }
}

operator_boilerplate!(GetTagPropNode, VidInput, "GetTagPropNode", elapsed);

impl IterateNode<VidInput> for GetTagPropNode {
    fn valid(&self) -> bool {
        self.row.is_some() && !self.consumed
    }
    fn advance(&mut self, _ctx: &mut RuntimeContext, _part: PartitionId, _input: &VidInput) -> Result<()> {
        self.consumed = true;
        Ok(())
    }
    fn key(&self) -> &[u8] {
        &[]
    }
    fn val(&self) -> &[u8] {
        &[]
    }
    fn current_props(&self) -> Option<&HashMap<String, Value>> {
        None
    }
}

impl GetTagPropNode {
    pub fn row(&self) -> Option<&ResultRow> {
        self.row.as_ref()
    }
}

/// Projects one edge's requested properties (spec §4.6
/// `GetEdgePropNode`): `_src`/`_type`/`_rank`/`_dst` pseudo-columns plus
/// `_edge:<sign><name>:<prop>` columns.
pub struct GetEdgePropNode {
    fetch: Box<FetchEdgeNode>,
    edge_name: String,
    reversed: bool,
    row: Option<ResultRow>,
    elapsed: Elapsed,
}

impl GetEdgePropNode {
    pub fn new(fetch: Box<FetchEdgeNode>, edge_name: impl Into<String>, reversed: bool) -> Self {
        GetEdgePropNode { fetch, edge_name: edge_name.into(), reversed, row: None, elapsed: Elapsed::default() }
    }

    fn step(&mut self, ctx: &mut RuntimeContext, part: PartitionId, input: &crate::operator::EdgeKeyInput) -> Result<()> {
        self.fetch.execute(ctx, part, input)?;
        if !self.fetch.found() {
            self.row = None;
            return Ok(());
        }
        let mut row = ResultRow::new();
        row.insert("_src".to_string(), Value::String(String::from_utf8_lossy(&input.src).into_owned()));
        row.insert("_type".to_string(), Value::Int(input.edge_type as i64));
        row.insert("_rank".to_string(), Value::Int(input.rank));
        row.insert("_dst".to_string(), Value::String(String::from_utf8_lossy(&input.dst).into_owned()));
        for (k, v) in self.fetch.props() {
            row.insert(edge_column(&self.edge_name, self.reversed, k), v.clone());
        }
        self.row = Some(row);
        Ok(())
    }

    pub fn row(&self) -> Option<&ResultRow> {
        self.row.as_ref()
    }
}

operator_boilerplate!(GetEdgePropNode, crate::operator::EdgeKeyInput, "GetEdgePropNode", elapsed);

/// Lists the edge keys rooted at a vertex without fetching their
/// properties (spec §3 supplement, grounded on `QueryEdgeKeysProcessor`):
/// `_src`/`_type`/`_rank`/`_dst` only, one row per edge.
pub struct GetEdgeKeysNode {
    edges: Box<HashJoinNode>,
    rows: Vec<ResultRow>,
    elapsed: Elapsed,
}

impl GetEdgeKeysNode {
    pub fn new(edges: Box<HashJoinNode>) -> Self {
        GetEdgeKeysNode { edges, rows: Vec::new(), elapsed: Elapsed::default() }
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    fn step(&mut self, ctx: &mut RuntimeContext, part: PartitionId, input: &VidInput) -> Result<()> {
        self.rows.clear();
        self.edges.execute(ctx, part, input)?;
        while self.edges.valid() {
            if let Some(row) = self.edges.current_row() {
                let mut out = ResultRow::new();
                out.insert("_src".to_string(), Value::String(String::from_utf8_lossy(&input.0).into_owned()));
                out.insert("_type".to_string(), Value::Int(row.edge_type as i64));
                out.insert("_rank".to_string(), Value::Int(row.rank));
                out.insert("_dst".to_string(), Value::String(String::from_utf8_lossy(&row.dst).into_owned()));
                self.rows.push(out);
            }
            self.edges.advance(ctx, part, input)?;
        }
        Ok(())
    }
}

operator_boilerplate!(GetEdgeKeysNode, VidInput, "GetEdgeKeysNode", elapsed);

/// Terminal node for the plain index-lookup branch (spec §4.8
/// "basic"): emits the index's own columns directly without resolving
/// the backing row.
pub struct IndexOutputNode {
    scan: Box<IndexScanNode>,
    resolver: Option<Box<IndexResolveNode>>,
    vid_len: usize,
    rows: Vec<ResultRow>,
    elapsed: Elapsed,
}

impl IndexOutputNode {
    /// `resolver: None` is the "basic" branch (spec §4.8): emit the
    /// index columns only. `Some` is the "data"/"data+filter" branch:
    /// resolve each row's primary key against the backing tag/edge row
    /// and emit its properties instead.
    pub fn new(scan: Box<IndexScanNode>, resolver: Option<Box<IndexResolveNode>>, vid_len: usize) -> Self {
        IndexOutputNode { scan, resolver, vid_len, rows: Vec::new(), elapsed: Elapsed::default() }
    }

    fn step(&mut self, ctx: &mut RuntimeContext, part: PartitionId, input: &()) -> Result<()> {
        self.rows.clear();
        self.scan.execute(ctx, part, input)?;
        let field_names = self.scan.field_names().to_vec();
        let index_rows: Vec<IndexRow> = self.scan.rows().to_vec();
        for idx_row in &index_rows {
            match &mut self.resolver {
                None => {
                    let mut row = ResultRow::new();
                    for (name, v) in field_names.iter().zip(&idx_row.fields) {
                        row.insert(name.clone(), v.clone());
                    }
                    self.rows.push(row);
                }
                Some(resolver) => {
                    resolver.resolve(ctx, part, self.vid_len, &idx_row.primary)?;
                    if resolver.found() {
                        let mut row: ResultRow = resolver.props().clone();
                        for (name, v) in field_names.iter().zip(&idx_row.fields) {
                            row.insert(name.clone(), v.clone());
                        }
                        self.rows.push(row);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }
}

operator_boilerplate!(IndexOutputNode, (), "IndexOutputNode", elapsed);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemCatalog;
    use crate::kvstore::{Batch, KvStore, MemKv};
    use crate::row::{Field, RowWriter, SchemaVersion};
    use crate::value::FieldType;

    #[test]
    fn get_tag_prop_node_projects_columns() {
        let catalog = Arc::new(MemCatalog::new());
        catalog.create_space("s", 4);
        let schema = vec![SchemaVersion {
            version: 0,
            fields: vec![Field { name: "age".into(), ftype: FieldType::Int, nullable: true, default: None }],
            ttl: None,
        }];
        catalog.add_tag("s", 1, "player", schema.clone());
        let kv = Arc::new(MemKv::new());
        let mut w = RowWriter::new();
        w.set("age", Value::Int(42));
        let bytes = w.encode(&schema[0]).unwrap();
        let mut batch = Batch::new();
        batch.put(crate::key::vertex_key(0, b"Ann1", 4, 1).unwrap(), bytes);
        kv.async_append_batch("s", 0, batch, Box::new(|_| {}));

        let tag = Box::new(TagNode::new(kv, catalog, 1, "player"));
        let mut node = GetTagPropNode::new(tag);
        let mut ctx = RuntimeContext::new("s", 4, 0);
        node.execute(&mut ctx, 0, &VidInput(b"Ann1".to_vec())).unwrap();
        let row = node.row().unwrap();
        assert_eq!(row.get("_vid").unwrap(), &Value::String("Ann1".to_string()));
        assert_eq!(row.get(&tag_column("player", "age")).unwrap(), &Value::Int(42));
    }
}
