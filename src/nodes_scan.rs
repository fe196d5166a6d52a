//! Scan operators (spec §4.3): `TagNode`, `SingleEdgeNode`,
//! `FetchEdgeNode`, `IndexScanNode`. These are the leaves of every
//! plan — the only nodes that call into the KV store directly.

use std::collections::HashMap;
use std::convert::TryInto;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::context::RuntimeContext;
use crate::error::{Error, Result};
use crate::key::{self, EdgeType, IndexId, PartitionId, TagId};
use crate::kvstore::KvStore;
use crate::operator::{ColumnHint, EdgeKeyInput, Elapsed, IndexScanInput, IterateNode, Operator, VidInput};
use crate::operator_boilerplate;
use crate::row::{self, RowReader};
use crate::txn::TransactionManager;
use crate::value::Value;

/// Point-reads the vertex row for `(partId, vid)` at `tag_id` and
/// binds a reader over it. Yields at most one row (spec §4.3).
pub struct TagNode {
    kv: Arc<dyn KvStore>,
    catalog: Arc<dyn Catalog>,
    tag_id: TagId,
    tag_name: String,
    found: bool,
    consumed: bool,
    key_bytes: Vec<u8>,
    val_bytes: Vec<u8>,
    props: HashMap<String, Value>,
    elapsed: Elapsed,
}

impl TagNode {
    pub fn new(kv: Arc<dyn KvStore>, catalog: Arc<dyn Catalog>, tag_id: TagId, tag_name: impl Into<String>) -> Self {
        TagNode {
            kv,
            catalog,
            tag_id,
            tag_name: tag_name.into(),
            found: false,
            consumed: false,
            key_bytes: Vec::new(),
            val_bytes: Vec::new(),
            props: HashMap::new(),
            elapsed: Elapsed::default(),
        }
    }

    pub fn tag_name(&self) -> &str {
        &self.tag_name
    }

    pub fn found(&self) -> bool {
        self.found
    }

    pub fn props(&self) -> &HashMap<String, Value> {
        &self.props
    }

    fn step(&mut self, ctx: &mut RuntimeContext, part: PartitionId, input: &VidInput) -> Result<()> {
        self.consumed = false;
        let key = key::vertex_key(part, &input.0, ctx.vid_len, self.tag_id)?;
        match self.kv.get(&ctx.space, part, &key) {
            Ok(bytes) => {
                let schema = self.catalog.tag_schema(&ctx.space, self.tag_id)?;
                let reader = RowReader::bind(&schema, &bytes)?;
                if reader.is_expired() {
                    ctx.record_ttl_expired();
                    self.found = false;
                    return Ok(());
                }
                let latest = row::latest(&schema).expect("non-empty schema");
                let mut props = HashMap::new();
                for f in &latest.fields {
                    props.insert(f.name.clone(), reader.get(&f.name)?);
                }
                self.key_bytes = key;
                self.val_bytes = bytes;
                self.props = props;
                self.found = true;
            }
            Err(Error::KeyNotFound) => self.found = false,
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

operator_boilerplate!(TagNode, VidInput, "TagNode", elapsed);

impl IterateNode<VidInput> for TagNode {
    fn valid(&self) -> bool {
        self.found && !self.consumed
    }
    fn advance(&mut self, _ctx: &mut RuntimeContext, _part: PartitionId, _input: &VidInput) -> Result<()> {
        self.consumed = true;
        Ok(())
    }
    fn key(&self) -> &[u8] {
        &self.key_bytes
    }
    fn val(&self) -> &[u8] {
        &self.val_bytes
    }
    fn current_props(&self) -> Option<&HashMap<String, Value>> {
        if self.valid() {
            Some(&self.props)
        } else {
            None
        }
    }
}

/// One decoded edge, ready for a parent to address by column.
#[derive(Clone)]
pub struct EdgeRow {
    pub src: Vec<u8>,
    pub edge_type: EdgeType,
    pub rank: i64,
    pub dst: Vec<u8>,
    pub props: HashMap<String, Value>,
}

/// Prefix-scans edges of one `edge_type` rooted at `vid` (spec §4.3).
/// Skips illegal rows (bumping `ILLEGAL_DATA`), skips TTL-expired
/// rows, and suppresses an edge row that has an adjacent unresolved
/// soft lock until the prefix scan is exhausted. With a
/// `TransactionManager` attached (`with_transaction_manager`), every
/// lock found during the scan is then resolved and, if the guarded
/// write committed, appended as a synthetic `EdgeRow` (spec §4.9 step
/// 3); without one, locks are left in `self.locks` for a caller to
/// resolve itself.
pub struct SingleEdgeNode {
    kv: Arc<dyn KvStore>,
    catalog: Arc<dyn Catalog>,
    edge_type: EdgeType,
    edge_name: String,
    rows: Vec<EdgeRow>,
    pub locks: Vec<crate::key::DecodedEdgeKey>,
    pos: usize,
    txn: Option<Arc<dyn TransactionManager>>,
    elapsed: Elapsed,
}

impl SingleEdgeNode {
    pub fn new(kv: Arc<dyn KvStore>, catalog: Arc<dyn Catalog>, edge_type: EdgeType, edge_name: impl Into<String>) -> Self {
        SingleEdgeNode {
            kv,
            catalog,
            edge_type,
            edge_name: edge_name.into(),
            rows: Vec::new(),
            locks: Vec::new(),
            pos: 0,
            txn: None,
            elapsed: Elapsed::default(),
        }
    }

    /// Attaches the transaction manager used to resolve soft locks
    /// found during the scan (spec §4.9). Without one, locks are
    /// suppressed from the edge stream but never resurfaced.
    pub fn with_transaction_manager(mut self, tm: Arc<dyn TransactionManager>) -> Self {
        self.txn = Some(tm);
        self
    }

    pub fn edge_name(&self) -> &str {
        &self.edge_name
    }

    pub fn rows(&self) -> &[EdgeRow] {
        &self.rows
    }

    fn step(&mut self, ctx: &mut RuntimeContext, part: PartitionId, input: &VidInput) -> Result<()> {
        self.rows.clear();
        self.locks.clear();
        self.pos = 0;
        let prefix = key::edge_type_prefix(part, &input.0, self.edge_type);
        let schema = self.catalog.edge_schema(&ctx.space, self.edge_type)?;
        let scanned = self.kv.prefix(&ctx.space, part, &prefix);

        let mut suppressed: std::collections::HashSet<(i64, Vec<u8>)> = std::collections::HashSet::new();
        for (k, _v) in &scanned {
            if let Ok(d) = key::decode_edge_key(k, ctx.vid_len) {
                if d.is_lock {
                    suppressed.insert((d.rank, d.dst.clone()));
                    self.locks.push(d);
                }
            }
        }

        for (k, v) in &scanned {
            let d = match key::decode_edge_key(k, ctx.vid_len) {
                Ok(d) => d,
                Err(_) => {
                    ctx.record_illegal_data();
                    continue;
                }
            };
            if d.is_lock {
                continue;
            }
            if suppressed.contains(&(d.rank, d.dst.clone())) {
                continue;
            }
            let reader = match RowReader::bind(&schema, v) {
                Ok(r) => r,
                Err(_) => {
                    ctx.record_illegal_data();
                    continue;
                }
            };
            if reader.is_expired() {
                ctx.record_ttl_expired();
                continue;
            }
            let latest = row::latest(&schema).expect("non-empty schema");
            let mut props = HashMap::new();
            for f in &latest.fields {
                props.insert(f.name.clone(), reader.get(&f.name)?);
            }
            self.rows.push(EdgeRow { src: d.src, edge_type: d.edge_type, rank: d.rank, dst: d.dst, props });
        }

        if !self.locks.is_empty() {
            if let Some(tm) = &self.txn {
                let resolved = crate::txn::resolve_locks(tm.as_ref(), part, &self.locks, self.edge_type, &schema)?;
                self.rows.extend(resolved);
            }
        }
        Ok(())
    }
}

operator_boilerplate!(SingleEdgeNode, VidInput, "SingleEdgeNode", elapsed);

impl IterateNode<VidInput> for SingleEdgeNode {
    fn valid(&self) -> bool {
        self.pos < self.rows.len()
    }
    fn advance(&mut self, _ctx: &mut RuntimeContext, _part: PartitionId, _input: &VidInput) -> Result<()> {
        self.pos += 1;
        Ok(())
    }
    fn key(&self) -> &[u8] {
        &[]
    }
    fn val(&self) -> &[u8] {
        &[]
    }
    fn current_props(&self) -> Option<&HashMap<String, Value>> {
        self.rows.get(self.pos).map(|r| &r.props)
    }
}

/// Point-gets a single edge row (spec §4.3). `E_KEY_NOT_FOUND` is
/// treated as success-with-no-row: `GetEdgePropNode` emits nothing,
/// `UpdateEdgeNode` decides insert-or-error from `found()`.
pub struct FetchEdgeNode {
    kv: Arc<dyn KvStore>,
    catalog: Arc<dyn Catalog>,
    found: bool,
    consumed: bool,
    key_bytes: Vec<u8>,
    val_bytes: Vec<u8>,
    props: HashMap<String, Value>,
    elapsed: Elapsed,
}

impl FetchEdgeNode {
    pub fn new(kv: Arc<dyn KvStore>, catalog: Arc<dyn Catalog>) -> Self {
        FetchEdgeNode {
            kv,
            catalog,
            found: false,
            consumed: false,
            key_bytes: Vec::new(),
            val_bytes: Vec::new(),
            props: HashMap::new(),
            elapsed: Elapsed::default(),
        }
    }

    pub fn found(&self) -> bool {
        self.found
    }

    pub fn props(&self) -> &HashMap<String, Value> {
        &self.props
    }

    fn step(&mut self, ctx: &mut RuntimeContext, part: PartitionId, input: &EdgeKeyInput) -> Result<()> {
        self.consumed = false;
        let key = key::edge_key(part, &input.src, ctx.vid_len, input.edge_type, input.rank, &input.dst, false)?;
        match self.kv.get(&ctx.space, part, &key) {
            Ok(bytes) => {
                let schema = self.catalog.edge_schema(&ctx.space, input.edge_type)?;
                let reader = RowReader::bind(&schema, &bytes)?;
                if reader.is_expired() {
                    ctx.record_ttl_expired();
                    self.found = false;
                    return Ok(());
                }
                let latest = row::latest(&schema).expect("non-empty schema");
                let mut props = HashMap::new();
                for f in &latest.fields {
                    props.insert(f.name.clone(), reader.get(&f.name)?);
                }
                self.key_bytes = key;
                self.val_bytes = bytes;
                self.props = props;
                self.found = true;
            }
            Err(Error::KeyNotFound) => self.found = false,
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

operator_boilerplate!(FetchEdgeNode, EdgeKeyInput, "FetchEdgeNode", elapsed);

impl IterateNode<EdgeKeyInput> for FetchEdgeNode {
    fn valid(&self) -> bool {
        self.found && !self.consumed
    }
    fn advance(&mut self, _ctx: &mut RuntimeContext, _part: PartitionId, _input: &EdgeKeyInput) -> Result<()> {
        self.consumed = true;
        Ok(())
    }
    fn key(&self) -> &[u8] {
        &self.key_bytes
    }
    fn val(&self) -> &[u8] {
        &self.val_bytes
    }
    fn current_props(&self) -> Option<&HashMap<String, Value>> {
        if self.valid() {
            Some(&self.props)
        } else {
            None
        }
    }
}

/// One resolved index row: the encoded field values plus the primary
/// key it points at (spec §4.3).
#[derive(Clone)]
pub struct IndexRow {
    pub fields: Vec<Value>,
    pub primary: Vec<u8>,
}

/// Translates column hints into one or more prefix/range scans over an
/// index (spec §4.3). Hints chain as longest matching equality
/// prefix; the first non-equality hint becomes the range bound.
pub struct IndexScanNode {
    kv: Arc<dyn KvStore>,
    index_id: IndexId,
    field_names: Vec<String>,
    field_types: Vec<crate::value::FieldType>,
    hints: Vec<ColumnHint>,
    rows: Vec<IndexRow>,
    pos: usize,
    elapsed: Elapsed,
}

impl IndexScanNode {
    pub fn new(
        kv: Arc<dyn KvStore>,
        index_id: IndexId,
        field_names: Vec<String>,
        field_types: Vec<crate::value::FieldType>,
        hints: Vec<ColumnHint>,
    ) -> Self {
        IndexScanNode { kv, index_id, field_names, field_types, hints, rows: Vec::new(), pos: 0, elapsed: Elapsed::default() }
    }

    pub fn rows(&self) -> &[IndexRow] {
        &self.rows
    }

    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    fn equality_prefix_bytes(&self) -> (Vec<u8>, usize) {
        let mut bytes = Vec::new();
        let mut n = 0;
        for hint in &self.hints {
            match hint {
                ColumnHint::Eq(v) => {
                    key::encode_index_field(v, &mut bytes);
                    n += 1;
                }
                _ => break,
            }
        }
        (bytes, n)
    }

    fn step(&mut self, ctx: &mut RuntimeContext, part: PartitionId, _input: &IndexScanInput) -> Result<()> {
        self.rows.clear();
        self.pos = 0;
        let (eq_bytes, eq_count) = self.equality_prefix_bytes();
        let prefix = key::index_prefix(part, self.index_id, &eq_bytes);
        let scanned = self.kv.prefix(&ctx.space, part, &prefix);

        let range_hint = self.hints.get(eq_count);

        for (k, v) in &scanned {
            let (fields, primary) = match decode_index_row(k, &self.field_types) {
                Ok(p) => p,
                Err(_) => {
                    ctx.record_illegal_data();
                    continue;
                }
            };
            if let Some(hint) = range_hint {
                let candidate = &fields[eq_count];
                let keep = match hint {
                    ColumnHint::Ge(lo) => candidate.typed_cmp(lo) != std::cmp::Ordering::Less,
                    ColumnHint::Lt(hi) => candidate.typed_cmp(hi) == std::cmp::Ordering::Less,
                    ColumnHint::Between(lo, hi) => {
                        candidate.typed_cmp(lo) != std::cmp::Ordering::Less
                            && candidate.typed_cmp(hi) == std::cmp::Ordering::Less
                    }
                    ColumnHint::In(vs) => vs.iter().any(|x| x.typed_cmp(candidate) == std::cmp::Ordering::Equal),
                    ColumnHint::IsNull => candidate.is_null(),
                    ColumnHint::Eq(_) => true,
                };
                if !keep {
                    continue;
                }
            }
            // TTL for index entries is enforced by the backing row (invariant 3);
            // a bare value byte of length 0 here just means "no ttl stamp recorded".
            let _ = v;
            self.rows.push(IndexRow { fields, primary });
        }
        Ok(())
    }
}

/// Decodes an index key back into its typed field values and primary
/// key, using the index's declared field types to know each field's
/// width (`key::decode_index_field`).
fn decode_index_row(key: &[u8], field_types: &[crate::value::FieldType]) -> Result<(Vec<Value>, Vec<u8>)> {
    // layout: TAG(1) partition(4) indexId(4) [field]* len(4) primary
    let mut off = 1 + 4 + 4;
    let mut fields = Vec::with_capacity(field_types.len());
    for ftype in field_types {
        fields.push(key::decode_index_field(ftype, key, &mut off)?);
    }
    let mut len_b = [0u8; 4];
    len_b.copy_from_slice(key.get(off..off + 4).ok_or_else(|| Error::InvalidData("truncated index key".into()))?);
    off += 4;
    let len = u32::from_be_bytes(len_b) as usize;
    let primary = key.get(off..off + len).ok_or_else(|| Error::InvalidData("truncated index key".into()))?.to_vec();
    Ok((fields, primary))
}

operator_boilerplate!(IndexScanNode, IndexScanInput, "IndexScanNode", elapsed);

impl IterateNode<IndexScanInput> for IndexScanNode {
    fn valid(&self) -> bool {
        self.pos < self.rows.len()
    }
    fn advance(&mut self, _ctx: &mut RuntimeContext, _part: PartitionId, _input: &IndexScanInput) -> Result<()> {
        self.pos += 1;
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

/// Resolves an index row's primary key back to its backing vertex or
/// edge row (spec §4.8 *data*/*data+filter* branches) — `IndexVertexNode`
/// and `IndexEdgeNode` collapsed into one node parameterized on which
/// kind of primary key it's resolving, since their bodies differ only
/// in how the primary bytes decode into a fetch key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum IndexResolveKind {
    Vertex { tag_id: TagId },
    Edge { edge_type: EdgeType },
}

pub struct IndexResolveNode {
    kv: Arc<dyn KvStore>,
    catalog: Arc<dyn Catalog>,
    kind: IndexResolveKind,
    found: bool,
    props: HashMap<String, Value>,
    elapsed: Elapsed,
}

impl IndexResolveNode {
    pub fn new(kv: Arc<dyn KvStore>, catalog: Arc<dyn Catalog>, kind: IndexResolveKind) -> Self {
        IndexResolveNode { kv, catalog, kind, found: false, props: HashMap::new(), elapsed: Elapsed::default() }
    }

    pub fn found(&self) -> bool {
        self.found
    }

    pub fn props(&self) -> &HashMap<String, Value> {
        &self.props
    }

    /// Resolves `primary` (a vid, or an encoded `(src, rank, dst)`
    /// edge primary key) against the backing row.
    pub fn resolve(&mut self, ctx: &mut RuntimeContext, part: PartitionId, vid_len: usize, primary: &[u8]) -> Result<()> {
        self.found = false;
        self.props.clear();
        match &self.kind {
            IndexResolveKind::Vertex { tag_id } => {
                let k = key::vertex_key(part, primary, vid_len, *tag_id)?;
                match self.kv.get(&ctx.space, part, &k) {
                    Ok(bytes) => {
                        let schema = self.catalog.tag_schema(&ctx.space, *tag_id)?;
                        let reader = RowReader::bind(&schema, &bytes)?;
                        if !reader.is_expired() {
                            let latest = row::latest(&schema).expect("non-empty schema");
                            for f in &latest.fields {
                                self.props.insert(f.name.clone(), reader.get(&f.name)?);
                            }
                            self.found = true;
                        }
                    }
                    Err(Error::KeyNotFound) => {}
                    Err(e) => return Err(e),
                }
            }
            IndexResolveKind::Edge { edge_type } => {
                if primary.len() < vid_len * 2 + 8 {
                    return Err(Error::InvalidData("truncated edge primary key".into()));
                }
                let src = &primary[0..vid_len];
                let rank = i64::from_be_bytes(primary[vid_len..vid_len + 8].try_into().unwrap());
                let dst = &primary[vid_len + 8..vid_len + 8 + vid_len];
                let k = key::edge_key(part, src, vid_len, *edge_type, rank, dst, false)?;
                match self.kv.get(&ctx.space, part, &k) {
                    Ok(bytes) => {
                        let schema = self.catalog.edge_schema(&ctx.space, *edge_type)?;
                        let reader = RowReader::bind(&schema, &bytes)?;
                        if !reader.is_expired() {
                            let latest = row::latest(&schema).expect("non-empty schema");
                            for f in &latest.fields {
                                self.props.insert(f.name.clone(), reader.get(&f.name)?);
                            }
                            self.found = true;
                        }
                    }
                    Err(Error::KeyNotFound) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}

/// Encodes an edge index's primary key as `(src, rank, dst)`.
pub fn encode_edge_primary(src: &[u8], rank: i64, dst: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len() * 2 + 8);
    out.extend_from_slice(src);
    out.extend_from_slice(&rank.to_be_bytes());
    out.extend_from_slice(dst);
    out
}
