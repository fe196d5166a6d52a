//! Join and filter operators (spec §4.4): `HashJoinNode`, `MultiTagNode`,
//! `FilterNode`. These sit between the scan leaves and the emit/write
//! layer, widening a single vertex's scan results into the per-edge
//! or per-tag cursor downstream operators address.

use std::collections::HashMap;
use std::sync::Arc;

use crate::context::{CurrentEdge, RuntimeContext};
use crate::error::Result;
use crate::expr::{eval_bool_filter, ExprContext, ExprId, ExprPool};
use crate::key::{EdgeType, PartitionId};
use crate::nodes_scan::{EdgeRow, SingleEdgeNode, TagNode};
use crate::operator::{Elapsed, IterateNode, Operator, VidInput};
use crate::operator_boilerplate;
use crate::row::SchemaList;
use crate::value::Value;

/// Widens a vertex's multiple edge-type scans into one ordered cursor,
/// updating `ctx.current_edge` as it advances so the filter/emit chain
/// can address "the edge currently pointed at" without re-deriving it
/// (spec §4.4).
pub struct HashJoinNode {
    deps: Vec<(Box<SingleEdgeNode>, EdgeType, String, Arc<SchemaList>)>,
    flattened: Vec<(usize, EdgeRow)>,
    pos: usize,
    elapsed: Elapsed,
}

impl HashJoinNode {
    pub fn new(single_edges: Vec<(Box<SingleEdgeNode>, EdgeType, String, Arc<SchemaList>)>) -> Self {
        HashJoinNode { deps: single_edges, flattened: Vec::new(), pos: 0, elapsed: Elapsed::default() }
    }

    fn step(&mut self, ctx: &mut RuntimeContext, part: PartitionId, input: &VidInput) -> Result<()> {
        self.flattened.clear();
        self.pos = 0;
        for (column_idx, (node, _edge_type, _edge_name, _schema)) in self.deps.iter_mut().enumerate() {
            node.execute(ctx, part, input)?;
            for row in node.rows() {
                self.flattened.push((column_idx, row.clone()));
            }
        }
        self.update_current_edge(ctx);
        Ok(())
    }

    fn update_current_edge(&self, ctx: &mut RuntimeContext) {
        match self.flattened.get(self.pos) {
            None => ctx.current_edge = None,
            Some((column_idx, row)) => {
                let (_node, edge_type, edge_name, schema) = &self.deps[*column_idx];
                ctx.current_edge = Some(CurrentEdge {
                    edge_type: *edge_type,
                    edge_name: edge_name.clone(),
                    schema: schema.clone(),
                    column_idx: *column_idx,
                    props: row.props.clone(),
                });
            }
        }
    }
}

operator_boilerplate!(HashJoinNode, VidInput, "HashJoinNode", elapsed);

impl IterateNode<VidInput> for HashJoinNode {
    fn valid(&self) -> bool {
        self.pos < self.flattened.len()
    }
    fn advance(&mut self, ctx: &mut RuntimeContext, _part: PartitionId, _input: &VidInput) -> Result<()> {
        self.pos += 1;
        self.update_current_edge(ctx);
        Ok(())
    }
    fn key(&self) -> &[u8] {
        &[]
    }
    fn val(&self) -> &[u8] {
        &[]
    }
    fn current_props(&self) -> Option<&HashMap<String, Value>> {
        self.flattened.get(self.pos).map(|(_, r)| &r.props)
    }
}

impl HashJoinNode {
    /// The full decoded edge row (src/rank/dst plus properties) at the
    /// cursor's current position, for callers that need the edge key
    /// fields rather than just its properties.
    pub fn current_row(&self) -> Option<&EdgeRow> {
        self.flattened.get(self.pos).map(|(_, r)| r)
    }
}

/// Gathers one or more `TagNode`s for the same vertex into a single
/// per-tag property bag addressable by tag name (spec §4.4, used by
/// `GetNeighborsNode`'s vertex-property projection and by filters that
/// reference more than one tag).
pub struct MultiTagNode {
    deps: Vec<(Box<TagNode>, String)>,
    elapsed: Elapsed,
}

impl MultiTagNode {
    pub fn new(tags: Vec<(Box<TagNode>, String)>) -> Self {
        MultiTagNode { deps: tags, elapsed: Elapsed::default() }
    }

    fn step(&mut self, ctx: &mut RuntimeContext, part: PartitionId, input: &VidInput) -> Result<()> {
        for (node, _name) in self.deps.iter_mut() {
            node.execute(ctx, part, input)?;
        }
        Ok(())
    }

    pub fn populate_context(&self, ectx: &mut ExprContext) {
        for (node, name) in &self.deps {
            if node.found() {
                ectx.set_tag(name, node.props().clone());
            }
        }
    }

    pub fn tag_props(&self, name: &str) -> Option<&HashMap<String, Value>> {
        self.deps.iter().find(|(_, n)| n == name).and_then(|(node, _)| if node.found() { Some(node.props()) } else { None })
    }

    /// Every tag that was found on this vertex, paired with its name.
    pub fn found_tags(&self) -> impl Iterator<Item = (&str, &HashMap<String, Value>)> {
        self.deps.iter().filter(|(node, _)| node.found()).map(|(node, name)| (name.as_str(), node.props()))
    }
}

operator_boilerplate!(MultiTagNode, VidInput, "MultiTagNode", elapsed);

/// Applies a filter expression (spec §4.4). Two modes share one
/// evaluator: tag-only, run once per vertex via `Operator::execute`,
/// which short-circuits everything downstream through
/// `ctx.tag_filtered_out`; and tag+edge, where a parent like
/// `GetNeighborsNode` calls `check_edge` once per position as it
/// advances its own edge cursor, re-using the same tag baseline each
/// time. A filter that evaluates to `Null` is treated as `false`,
/// never as an error (three-valued logic, spec §4.4).
pub struct FilterNode {
    multi_tag: Box<MultiTagNode>,
    pool: ExprPool,
    expr: ExprId,
    has_edges: bool,
    passed: bool,
    elapsed: Elapsed,
}

impl FilterNode {
    pub fn new_tag_only(multi_tag: Box<MultiTagNode>, pool: ExprPool, expr: ExprId) -> Self {
        FilterNode { multi_tag, pool, expr, has_edges: false, passed: false, elapsed: Elapsed::default() }
    }

    pub fn new_with_edges(multi_tag: Box<MultiTagNode>, pool: ExprPool, expr: ExprId) -> Self {
        FilterNode { multi_tag, pool, expr, has_edges: true, passed: false, elapsed: Elapsed::default() }
    }

    fn step(&mut self, ctx: &mut RuntimeContext, part: PartitionId, input: &VidInput) -> Result<()> {
        self.multi_tag.execute(ctx, part, input)?;
        let ectx = self.tag_context();
        self.passed = eval_bool_filter(&self.pool, self.expr, &ectx)?;
        ctx.tag_filtered_out = !self.passed && !self.has_edges;
        Ok(())
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    /// Whether this filter was built in tag+edge mode (spec §4.4) —
    /// callers must drive `check_edge` per position rather than rely on
    /// `ctx.tag_filtered_out`.
    pub fn has_edge_mode(&self) -> bool {
        self.has_edges
    }

    /// The tag-only baseline context, reused by `check_edge` for each
    /// edge position a parent cursor advances to.
    pub fn tag_context(&self) -> ExprContext {
        let mut ectx = ExprContext::new();
        self.multi_tag.populate_context(&mut ectx);
        ectx
    }

    /// Re-evaluates this filter with `edge_name`/`edge_props` layered
    /// onto the tag baseline (spec §4.4 tag+edge mode).
    pub fn check_edge(&self, edge_name: &str, edge_props: &HashMap<String, Value>) -> Result<bool> {
        let mut ectx = self.tag_context();
        ectx.set_current_edge(edge_name, edge_props.clone());
        eval_bool_filter(&self.pool, self.expr, &ectx)
    }
}

operator_boilerplate!(FilterNode, VidInput, "FilterNode", elapsed);
