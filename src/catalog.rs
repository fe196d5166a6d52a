//! Schema, index, and membership catalog interface (spec §1, §4.1).
//!
//! The catalog itself is an external collaborator — meta-service state
//! this core only reads. `Catalog` is the seam; `MemCatalog` is an
//! in-memory implementation used by tests and by callers that embed
//! their own catalog snapshot rather than talking to a remote
//! meta-service.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};
use crate::key::{EdgeType, IndexId, TagId};
use crate::row::SchemaList;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOwner {
    Tag(TagId),
    Edge(EdgeType),
}

/// Index-rebuild state (spec §4.7): `Active` indexes are maintained
/// synchronously on every write; `Rebuilding` indexes instead receive
/// an operation-log entry for the background rebuilder to reconcile;
/// `Locked` indexes reject writes outright with `E_INDEX_LOCKED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Active,
    Rebuilding,
    Locked,
}

#[derive(Debug, Clone)]
pub struct IndexMeta {
    pub id: IndexId,
    pub owner: IndexOwner,
    pub fields: Vec<String>,
    pub state: IndexState,
}

pub trait Catalog: Send + Sync {
    fn vid_len(&self, space: &str) -> Result<usize>;

    fn tag_schema(&self, space: &str, tag_id: TagId) -> Result<SchemaList>;
    fn edge_schema(&self, space: &str, edge_type: EdgeType) -> Result<SchemaList>;

    fn tag_id(&self, space: &str, name: &str) -> Result<TagId>;
    fn tag_name(&self, space: &str, id: TagId) -> Result<String>;
    fn edge_type_of(&self, space: &str, name: &str) -> Result<EdgeType>;
    fn edge_name(&self, space: &str, edge_type: EdgeType) -> Result<String>;

    fn indexes_for_tag(&self, space: &str, tag_id: TagId) -> Result<Vec<IndexMeta>>;
    fn indexes_for_edge(&self, space: &str, edge_type: EdgeType) -> Result<Vec<IndexMeta>>;
    fn index(&self, space: &str, index_id: IndexId) -> Result<IndexMeta>;
}

#[derive(Default)]
struct SpaceCatalog {
    vid_len: usize,
    tag_schemas: HashMap<TagId, SchemaList>,
    edge_schemas: HashMap<EdgeType, SchemaList>,
    tag_names: HashMap<TagId, String>,
    edge_names: HashMap<EdgeType, String>,
    indexes: HashMap<IndexId, IndexMeta>,
}

/// In-memory catalog, sufficient to back tests and single-process
/// embeddings of this core.
#[derive(Clone)]
pub struct MemCatalog {
    spaces: Arc<RwLock<HashMap<String, SpaceCatalog>>>,
}

impl MemCatalog {
    pub fn new() -> Self {
        MemCatalog { spaces: Arc::new(RwLock::new(HashMap::new())) }
    }

    fn with_space<T>(&self, space: &str, f: impl FnOnce(&SpaceCatalog) -> Result<T>) -> Result<T> {
        let spaces = self.spaces.read().unwrap();
        let sc = spaces
            .get(space)
            .ok_or_else(|| Error::SpaceNotFound(space.to_string()))?;
        f(sc)
    }

    pub fn create_space(&self, space: &str, vid_len: usize) {
        let mut spaces = self.spaces.write().unwrap();
        spaces.entry(space.to_string()).or_insert_with(|| SpaceCatalog { vid_len, ..Default::default() });
    }

    pub fn add_tag(&self, space: &str, id: TagId, name: &str, schema: SchemaList) {
        let mut spaces = self.spaces.write().unwrap();
        let sc = spaces.get_mut(space).expect("space must exist");
        sc.tag_names.insert(id, name.to_string());
        sc.tag_schemas.insert(id, schema);
    }

    pub fn add_edge(&self, space: &str, edge_type: EdgeType, name: &str, schema: SchemaList) {
        let mut spaces = self.spaces.write().unwrap();
        let sc = spaces.get_mut(space).expect("space must exist");
        sc.edge_names.insert(edge_type, name.to_string());
        sc.edge_schemas.insert(edge_type, schema);
    }

    pub fn add_index(&self, space: &str, meta: IndexMeta) {
        let mut spaces = self.spaces.write().unwrap();
        let sc = spaces.get_mut(space).expect("space must exist");
        sc.indexes.insert(meta.id, meta);
    }

    pub fn set_index_state(&self, space: &str, index_id: IndexId, state: IndexState) {
        let mut spaces = self.spaces.write().unwrap();
        if let Some(sc) = spaces.get_mut(space) {
            if let Some(m) = sc.indexes.get_mut(&index_id) {
                m.state = state;
            }
        }
    }
}

impl Catalog for MemCatalog {
    fn vid_len(&self, space: &str) -> Result<usize> {
        self.with_space(space, |sc| Ok(sc.vid_len))
    }

    fn tag_schema(&self, space: &str, tag_id: TagId) -> Result<SchemaList> {
        self.with_space(space, |sc| {
            sc.tag_schemas.get(&tag_id).cloned().ok_or_else(|| Error::TagNotFound(tag_id.to_string()))
        })
    }

    fn edge_schema(&self, space: &str, edge_type: EdgeType) -> Result<SchemaList> {
        self.with_space(space, |sc| {
            sc.edge_schemas.get(&edge_type).cloned().ok_or_else(|| Error::EdgeNotFound(edge_type.to_string()))
        })
    }

    fn tag_id(&self, space: &str, name: &str) -> Result<TagId> {
        self.with_space(space, |sc| {
            sc.tag_names
                .iter()
                .find(|(_, n)| n.as_str() == name)
                .map(|(id, _)| *id)
                .ok_or_else(|| Error::TagNotFound(name.to_string()))
        })
    }

    fn tag_name(&self, space: &str, id: TagId) -> Result<String> {
        self.with_space(space, |sc| sc.tag_names.get(&id).cloned().ok_or_else(|| Error::TagNotFound(id.to_string())))
    }

    fn edge_type_of(&self, space: &str, name: &str) -> Result<EdgeType> {
        self.with_space(space, |sc| {
            sc.edge_names
                .iter()
                .find(|(_, n)| n.as_str() == name)
                .map(|(id, _)| *id)
                .ok_or_else(|| Error::EdgeNotFound(name.to_string()))
        })
    }

    fn edge_name(&self, space: &str, edge_type: EdgeType) -> Result<String> {
        self.with_space(space, |sc| {
            sc.edge_names.get(&edge_type).cloned().ok_or_else(|| Error::EdgeNotFound(edge_type.to_string()))
        })
    }

    fn indexes_for_tag(&self, space: &str, tag_id: TagId) -> Result<Vec<IndexMeta>> {
        self.with_space(space, |sc| {
            Ok(sc
                .indexes
                .values()
                .filter(|m| matches!(m.owner, IndexOwner::Tag(t) if t == tag_id))
                .cloned()
                .collect())
        })
    }

    fn indexes_for_edge(&self, space: &str, edge_type: EdgeType) -> Result<Vec<IndexMeta>> {
        self.with_space(space, |sc| {
            Ok(sc
                .indexes
                .values()
                .filter(|m| matches!(m.owner, IndexOwner::Edge(e) if e == edge_type))
                .cloned()
                .collect())
        })
    }

    fn index(&self, space: &str, index_id: IndexId) -> Result<IndexMeta> {
        self.with_space(space, |sc| {
            sc.indexes.get(&index_id).cloned().ok_or_else(|| Error::IndexNotFound(index_id.to_string()))
        })
    }
}
