//! Aggregation and cursor-shaping operators (spec §4.5): `AggregateNode`,
//! `GetNeighborsSampleNode`, `DeDupNode`, limit enforcement. Grounded on
//! the original `StatCollector.h`'s running-stat accumulators.

use std::collections::HashSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::context::RuntimeContext;
use crate::error::{Error, Result};
use crate::key::PartitionId;
use crate::operator::{Elapsed, IterateNode, Operator, VidInput};
use crate::operator_boilerplate;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggFunc {
    Sum,
    Count,
    Avg,
    Min,
    Max,
}

/// One running aggregate (spec §4.5). `Avg` is kept as a running
/// `(sum, count)` pair and divided only at read time, matching the
/// original's `StatCollector` rather than averaging a stream of partial
/// averages.
#[derive(Default, Clone)]
struct Accumulator {
    sum: f64,
    count: i64,
    min: Option<f64>,
    max: Option<f64>,
}

impl Accumulator {
    fn feed(&mut self, v: f64) {
        self.sum += v;
        self.count += 1;
        self.min = Some(self.min.map_or(v, |m| m.min(v)));
        self.max = Some(self.max.map_or(v, |m| m.max(v)));
    }

    fn result(&self, func: AggFunc) -> Value {
        match func {
            AggFunc::Sum => Value::Float(self.sum),
            AggFunc::Count => Value::Int(self.count),
            AggFunc::Avg => {
                if self.count == 0 {
                    Value::Null
                } else {
                    Value::Float(self.sum / self.count as f64)
                }
            }
            AggFunc::Min => self.min.map(Value::Float).unwrap_or(Value::Null),
            AggFunc::Max => self.max.map(Value::Float).unwrap_or(Value::Null),
        }
    }
}

/// Computes one or more named aggregates over a dependency's emitted
/// rows. Stats are computed *after* filtering (spec §9 decision):
/// callers feed `AggregateNode` only the rows that already passed
/// whatever filter runs upstream.
pub struct AggregateNode {
    specs: Vec<(String, AggFunc, String)>,
    accumulators: Vec<Accumulator>,
    elapsed: Elapsed,
}

impl AggregateNode {
    pub fn new(specs: Vec<(String, AggFunc, String)>) -> Self {
        let n = specs.len();
        AggregateNode { specs, accumulators: vec![Accumulator::default(); n], elapsed: Elapsed::default() }
    }

    /// Feeds one row's already-resolved field values (keyed by source
    /// field name) into every aggregate reading from that field.
    pub fn feed(&mut self, row: &std::collections::HashMap<String, Value>) -> Result<()> {
        for (i, (_alias, _func, field)) in self.specs.iter().enumerate() {
            if let Some(v) = row.get(field) {
                if let Some(f) = v.as_f64() {
                    self.accumulators[i].feed(f);
                } else if !v.is_null() {
                    return Err(Error::InvalidData(format!("aggregate field {:?} is not numeric", field)));
                }
            }
        }
        Ok(())
    }

    pub fn results(&self) -> Vec<(String, Value)> {
        self.specs
            .iter()
            .zip(&self.accumulators)
            .map(|((alias, func, _field), acc)| (alias.clone(), acc.result(*func)))
            .collect()
    }

    fn step(&mut self, _ctx: &mut RuntimeContext, _part: PartitionId, _input: &VidInput) -> Result<()> {
        Ok(())
    }
}

operator_boilerplate!(AggregateNode, VidInput, "AggregateNode", elapsed);

/// Reservoir-samples at most `k` rows out of an upstream cursor's full
/// output (spec §4.5 `GetNeighborsSampleNode`), without materializing
/// the whole edge set more than once.
pub struct GetNeighborsSampleNode {
    k: usize,
    seen: u64,
    reservoir: Vec<(Vec<u8>, std::collections::HashMap<String, Value>)>,
    pos: usize,
    elapsed: Elapsed,
}

impl GetNeighborsSampleNode {
    pub fn new(k: usize) -> Self {
        GetNeighborsSampleNode { k, seen: 0, reservoir: Vec::new(), pos: 0, elapsed: Elapsed::default() }
    }

    /// Feeds one candidate row through Algorithm R. Call once per
    /// upstream row before reading `reservoir()`.
    pub fn offer(&mut self, key: Vec<u8>, props: std::collections::HashMap<String, Value>, rng: &mut impl Rng) {
        self.seen += 1;
        if self.reservoir.len() < self.k {
            self.reservoir.push((key, props));
        } else {
            let j = rng.gen_range(0..self.seen);
            if (j as usize) < self.k {
                self.reservoir[j as usize] = (key, props);
            }
        }
    }

    pub fn reservoir(&self) -> &[(Vec<u8>, std::collections::HashMap<String, Value>)] {
        &self.reservoir
    }

    fn step(&mut self, _ctx: &mut RuntimeContext, _part: PartitionId, _input: &VidInput) -> Result<()> {
        Ok(())
    }
}

operator_boilerplate!(GetNeighborsSampleNode, VidInput, "GetNeighborsSampleNode", elapsed);

/// Suppresses rows whose dedup key has already been emitted (spec
/// §4.5). Keys are opaque bytes the caller derives however its plan's
/// dedup columns dictate.
#[derive(Default)]
pub struct DeDupNode {
    seen: HashSet<Vec<u8>>,
    elapsed: Elapsed,
}

impl DeDupNode {
    pub fn new() -> Self {
        DeDupNode::default()
    }

    /// `true` if `key` has not been seen before (and records it).
    pub fn admit(&mut self, key: &[u8]) -> bool {
        self.seen.insert(key.to_vec())
    }

    fn step(&mut self, _ctx: &mut RuntimeContext, _part: PartitionId, _input: &VidInput) -> Result<()> {
        Ok(())
    }
}

operator_boilerplate!(DeDupNode, VidInput, "DeDupNode", elapsed);

/// Caps the number of rows a cursor yields (spec §4.5 "limit
/// enforcement"). Wraps any `IterateNode<VidInput>`, stopping `valid()`
/// once the cap is reached regardless of what the wrapped cursor still
/// has left.
pub struct LimitNode {
    inner: Box<dyn IterateNode<VidInput>>,
    limit: u64,
    emitted: u64,
    elapsed: Elapsed,
}

impl LimitNode {
    pub fn new(inner: Box<dyn IterateNode<VidInput>>, limit: u64) -> Self {
        LimitNode { inner, limit, emitted: 0, elapsed: Elapsed::default() }
    }

    fn step(&mut self, ctx: &mut RuntimeContext, part: PartitionId, input: &VidInput) -> Result<()> {
        self.inner.execute(ctx, part, input)
    }
}

operator_boilerplate!(LimitNode, VidInput, "LimitNode", elapsed);

impl IterateNode<VidInput> for LimitNode {
    fn valid(&self) -> bool {
        self.emitted < self.limit && self.inner.valid()
    }
    fn advance(&mut self, ctx: &mut RuntimeContext, part: PartitionId, input: &VidInput) -> Result<()> {
        self.emitted += 1;
        self.inner.advance(ctx, part, input)
    }
    fn key(&self) -> &[u8] {
        self.inner.key()
    }
    fn val(&self) -> &[u8] {
        self.inner.val()
    }
    fn current_props(&self) -> Option<&std::collections::HashMap<String, Value>> {
        self.inner.current_props()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::collections::HashMap;

    #[test]
    fn aggregate_avg_is_running_sum_over_count() {
        let mut agg = AggregateNode::new(vec![("avgDeg".to_string(), AggFunc::Avg, "degree".to_string())]);
        agg.feed(&HashMap::from([("degree".to_string(), Value::Int(10))])).unwrap();
        agg.feed(&HashMap::from([("degree".to_string(), Value::Int(20))])).unwrap();
        agg.feed(&HashMap::from([("degree".to_string(), Value::Int(30))])).unwrap();
        let results = agg.results();
        assert_eq!(results[0], ("avgDeg".to_string(), Value::Float(20.0)));
    }

    #[test]
    fn aggregate_rejects_non_numeric_field() {
        let mut agg = AggregateNode::new(vec![("s".to_string(), AggFunc::Sum, "name".to_string())]);
        let err = agg.feed(&HashMap::from([("name".to_string(), Value::String("x".into()))]));
        assert!(err.is_err());
    }

    #[test]
    fn dedup_admits_each_key_once() {
        let mut d = DeDupNode::new();
        assert!(d.admit(b"a"));
        assert!(!d.admit(b"a"));
        assert!(d.admit(b"b"));
    }

    #[test]
    fn sample_reservoir_never_exceeds_k() {
        let mut node = GetNeighborsSampleNode::new(2);
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        for i in 0..10u8 {
            node.offer(vec![i], HashMap::new(), &mut rng);
        }
        assert_eq!(node.reservoir().len(), 2);
    }
}
