//! Operator framework (spec §4.2, §9): `RelNode`/`QueryNode`/
//! `IterateNode`, and `StoragePlan<Input>` which owns operator
//! lifetimes and drives execution leaves-first.
//!
//! Grounded on the original `storage::exec::RelNode` (a CRTP-free base
//! with `execute` wrapping `doExecute` in a duration counter, and a
//! `dependencies_` vector executed before the node's own step) — kept
//! as a `dyn`-safe trait with a default `execute` method instead of a
//! virtual base class, and a `Vec<Box<dyn Operator<Input>>>` standing
//! in for the raw dependency pointers, since Rust ownership makes the
//! plan the natural sole owner (design note §9 "plan-owns-operators").

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::context::RuntimeContext;
use crate::error::Result;
use crate::key::PartitionId;
use crate::value::Value;

/// Per-vid plan input: get-neighbors, get-tag-prop, and upsert plans
/// are all driven one vertex id at a time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VidInput(pub Vec<u8>);

/// Per-edge-key plan input: get-edge-prop and edge upserts are driven
/// one fully-qualified edge key at a time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EdgeKeyInput {
    pub src: Vec<u8>,
    pub edge_type: crate::key::EdgeType,
    pub rank: i64,
    pub dst: Vec<u8>,
}

/// Index-lookup plans carry their scan parameters as node
/// configuration rather than per-call input (spec §2: "driven once per
/// input key ... one index scan").
pub type IndexScanInput = ();

/// One column hint in an `IndexScanNode` (spec §4.3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ColumnHint {
    Eq(Value),
    Ge(Value),
    Lt(Value),
    Between(Value, Value),
    In(Vec<Value>),
    IsNull,
}

/// Base capability set every operator has: execute (with its
/// dependencies run first), a name for diagnostics, and an elapsed-time
/// counter for profiling (spec §4.2).
pub trait Operator<In>: Send {
    fn execute(&mut self, ctx: &mut RuntimeContext, part: PartitionId, input: &In) -> Result<()> {
        ctx.check_deadline()?;
        let start = Instant::now();
        for dep in self.dependencies_mut() {
            dep.execute(ctx, part, input)?;
        }
        let r = self.do_execute(ctx, part, input);
        self.add_elapsed(start.elapsed());
        r
    }

    /// The node's own step, run after every dependency has succeeded.
    fn do_execute(&mut self, ctx: &mut RuntimeContext, part: PartitionId, input: &In) -> Result<()>;

    fn dependencies_mut(&mut self) -> &mut [Box<dyn Operator<In>>] {
        &mut []
    }

    fn name(&self) -> &'static str;

    fn elapsed(&self) -> Duration;
    fn add_elapsed(&mut self, d: Duration);
}

/// Produces a single `Value` slot its parent can reference (spec
/// §4.2 `QueryNode`), e.g. a gathered tag's property list.
pub trait QueryNode<In>: Operator<In> {
    fn value(&self) -> &Value;
}

/// A cursor: `valid`/`advance`/`key`/`val`/current decoded properties
/// (spec §4.2 `IterateNode`). `advance` corresponds to the original's
/// `next()`, which loops the upstream forward while `check()` rejects
/// rows; concrete iterate nodes fold that loop into their own
/// `advance` rather than exposing a separate `check` hook, since Rust
/// trait objects can't share a generic default body across unrelated
/// upstream types the way the C++ template could.
pub trait IterateNode<In>: Operator<In> {
    fn valid(&self) -> bool;
    fn advance(&mut self, ctx: &mut RuntimeContext, part: PartitionId, input: &In) -> Result<()>;
    fn key(&self) -> &[u8];
    fn val(&self) -> &[u8];
    fn current_props(&self) -> Option<&HashMap<String, Value>>;
}

/// Simple elapsed-time counter embedded in every concrete node,
/// equivalent to the original's `time::Duration duration_{true}`.
#[derive(Default, Clone, Copy)]
pub struct Elapsed(pub Duration);

impl Elapsed {
    pub fn add(&mut self, d: Duration) {
        self.0 += d;
    }
}

/// Generates the repetitive `name`/`elapsed`/`add_elapsed` trio (and,
/// for leaves, the default empty `dependencies_mut`) that every
/// concrete node otherwise hand-writes identically. Each node still
/// writes its own `do_execute`; this only removes the bookkeeping the
/// original C++ base class got for free via inheritance.
#[macro_export]
macro_rules! operator_boilerplate {
    ($ty:ty, $in:ty, $name:literal, $elapsed_field:ident) => {
        impl $crate::operator::Operator<$in> for $ty {
            fn do_execute(
                &mut self,
                ctx: &mut $crate::context::RuntimeContext,
                part: $crate::key::PartitionId,
                input: &$in,
            ) -> $crate::error::Result<()> {
                self.step(ctx, part, input)
            }
            fn name(&self) -> &'static str {
                $name
            }
            fn elapsed(&self) -> std::time::Duration {
                self.$elapsed_field.0
            }
            fn add_elapsed(&mut self, d: std::time::Duration) {
                self.$elapsed_field.add(d)
            }
        }
    };
    ($ty:ty, $in:ty, $name:literal, $elapsed_field:ident, $deps_field:ident) => {
        impl $crate::operator::Operator<$in> for $ty {
            fn do_execute(
                &mut self,
                ctx: &mut $crate::context::RuntimeContext,
                part: $crate::key::PartitionId,
                input: &$in,
            ) -> $crate::error::Result<()> {
                self.step(ctx, part, input)
            }
            fn dependencies_mut(&mut self) -> &mut [Box<dyn $crate::operator::Operator<$in>>] {
                &mut self.$deps_field
            }
            fn name(&self) -> &'static str {
                $name
            }
            fn elapsed(&self) -> std::time::Duration {
                self.$elapsed_field.0
            }
            fn add_elapsed(&mut self, d: std::time::Duration) {
                self.$elapsed_field.add(d)
            }
        }
    };
}

/// Owns the operator DAG for one request shape and drives it once per
/// `(partition, input)` tuple (spec §2).
pub struct StoragePlan<In> {
    root: Box<dyn Operator<In>>,
}

impl<In> StoragePlan<In> {
    pub fn new(root: Box<dyn Operator<In>>) -> Self {
        StoragePlan { root }
    }

    pub fn execute(&mut self, ctx: &mut RuntimeContext, part: PartitionId, input: &In) -> Result<()> {
        self.root.execute(ctx, part, input)
    }

    pub fn root_name(&self) -> &'static str {
        self.root.name()
    }

    pub fn elapsed(&self) -> Duration {
        self.root.elapsed()
    }
}
