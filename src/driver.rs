//! Request driver (spec §5, §7): per-partition fan-out, single- vs
//! multi-threaded execution, deadline/memory guards, and the
//! hard-fault-vs-per-partition error propagation policy. Grounded on
//! the teacher's rayon-based worker-pool dispatch, generalized from
//! "one job per shard" to "one freshly-built plan per `(partition,
//! input)`" since an operator's scan state is per-call, not reusable
//! across inputs.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::context::{RequestStats, RuntimeContext};
use crate::error::{is_hard_fault, Error};
use crate::key::PartitionId;
use crate::operator::Operator;

/// Per-request tunables (spec §5). `parallel` selects the
/// parallel-across-partitions scheduling model; single-threaded is the
/// default for low fan-out requests.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    pub parallel: bool,
    pub deadline: Option<Duration>,
    pub memory_budget: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Config { parallel: false, deadline: None, memory_budget: None }
    }
}

/// One partition's slice of a response (spec §5 "Results from different
/// partitions are appended in partition order").
pub struct PartitionOutcome<T> {
    pub partition: PartitionId,
    pub rows: Vec<T>,
    pub stats: RequestStats,
    /// Set only by a hard fault (spec §7): `E_INVALID_VID`,
    /// `E_STORAGE_MEMORY_EXCEEDED`, `E_RPC_EXCEED_DEADLINE`. Any other
    /// per-input error is folded into `stats.illegal_data` and the loop
    /// continues with the next input in this partition.
    pub error: Option<Error>,
}

pub struct DriverResult<T> {
    /// `SUCCEEDED` in the wire sense: at least one partition succeeded
    /// (spec §7 propagation policy).
    pub succeeded: bool,
    /// The first partition's hard-fault code, if every partition failed.
    pub first_error: Option<Error>,
    pub partitions: Vec<PartitionOutcome<T>>,
}

impl<T> DriverResult<T> {
    /// Flattens every partition's rows in ascending partition order —
    /// the emit-ordering decision this crate settles on (spec §9 "Open
    /// question — emit ordering under parallel partitions").
    pub fn rows(&self) -> Vec<&T> {
        self.partitions.iter().flat_map(|p| p.rows.iter()).collect()
    }
}

fn run_partition<In, N, T>(
    config: &Config,
    space: &str,
    vid_len: usize,
    partition: PartitionId,
    inputs: &[In],
    build_plan: &(impl Fn() -> N + Sync),
    extract: &(impl Fn(&N) -> Vec<T> + Sync),
) -> PartitionOutcome<T>
where
    In: Send + Sync,
    N: Operator<In>,
{
    let mut ctx = RuntimeContext::new(space, vid_len, partition);
    if let Some(d) = config.deadline {
        ctx = ctx.with_deadline(Instant::now() + d);
    }
    if let Some(b) = config.memory_budget {
        ctx = ctx.with_memory_budget(b);
    }

    let mut rows = Vec::new();
    let mut error = None;
    for input in inputs {
        let mut node = build_plan();
        match node.execute(&mut ctx, partition, input) {
            Ok(()) => rows.extend(extract(&node)),
            Err(e) if is_hard_fault(&e) => {
                error = Some(e);
                break;
            }
            Err(Error::FilterOut) => {}
            Err(_) => ctx.record_illegal_data(),
        }
    }
    PartitionOutcome { partition, rows, stats: ctx.stats, error }
}

/// Runs `build_plan()` once per `(partition, input)` pair across every
/// partition in `inputs_by_partition`, single-threaded or fanned out
/// across a shared worker pool per `config.parallel` (spec §5).
/// `build_plan` constructs a fresh node per input since scan state
/// lives on the node itself; `extract` pulls that node's emitted rows
/// after a successful `execute`.
pub fn run<In, N, T>(
    config: &Config,
    space: &str,
    vid_len: usize,
    inputs_by_partition: BTreeMap<PartitionId, Vec<In>>,
    build_plan: impl Fn() -> N + Sync,
    extract: impl Fn(&N) -> Vec<T> + Sync,
) -> DriverResult<T>
where
    In: Send + Sync,
    N: Operator<In>,
    T: Send,
{
    let parts: Vec<(PartitionId, Vec<In>)> = inputs_by_partition.into_iter().collect();

    let outcomes: Vec<PartitionOutcome<T>> = if config.parallel {
        // Pool size defaults to the core count, same as the teacher's
        // `util::thread::Pool::new` (spec §5 fan-out across partitions).
        let pool = rayon::ThreadPoolBuilder::new().num_threads(num_cpus::get()).build();
        match pool {
            Ok(pool) => pool.install(|| {
                parts
                    .into_par_iter()
                    .map(|(p, inputs)| run_partition(config, space, vid_len, p, &inputs, &build_plan, &extract))
                    .collect()
            }),
            Err(_) => parts
                .into_par_iter()
                .map(|(p, inputs)| run_partition(config, space, vid_len, p, &inputs, &build_plan, &extract))
                .collect(),
        }
    } else {
        parts
            .into_iter()
            .map(|(p, inputs)| run_partition(config, space, vid_len, p, &inputs, &build_plan, &extract))
            .collect()
    };

    let succeeded = outcomes.iter().any(|o| o.error.is_none());
    let first_error = if succeeded { None } else { outcomes.first().and_then(|o| o.error.clone()) };
    DriverResult { succeeded, first_error, partitions: outcomes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemCatalog;
    use crate::kvstore::{Batch, KvStore, MemKv};
    use crate::nodes_scan::TagNode;
    use crate::operator::VidInput;
    use crate::row::{Field, RowWriter, SchemaVersion};
    use crate::value::{FieldType, Value};
    use std::sync::Arc;

    fn player_schema() -> SchemaVersion {
        SchemaVersion {
            version: 0,
            fields: vec![Field { name: "age".into(), ftype: FieldType::Int, nullable: true, default: None }],
            ttl: None,
        }
    }

    #[test]
    fn single_threaded_driver_collects_rows_in_partition_order() {
        let catalog = Arc::new(MemCatalog::new());
        catalog.create_space("s", 4);
        catalog.add_tag("s", 1, "player", vec![player_schema()]);
        let kv = Arc::new(MemKv::new());

        for (part, vid, age) in [(0u32, "Ann1", 30), (1u32, "Bob1", 40)] {
            let mut w = RowWriter::new();
            w.set("age", Value::Int(age));
            let bytes = w.encode(&player_schema()).unwrap();
            let mut batch = Batch::new();
            batch.put(crate::key::vertex_key(part, vid.as_bytes(), 4, 1).unwrap(), bytes);
            kv.async_append_batch("s", part, batch, Box::new(|_| {}));
        }

        let mut inputs = BTreeMap::new();
        inputs.insert(0u32, vec![VidInput(b"Ann1".to_vec())]);
        inputs.insert(1u32, vec![VidInput(b"Bob1".to_vec())]);

        let kv2 = kv.clone();
        let catalog2 = catalog.clone();
        let result = run(
            &Config::default(),
            "s",
            4,
            inputs,
            move || TagNode::new(kv2.clone(), catalog2.clone(), 1, "player"),
            |node: &TagNode| if node.found() { vec![node.props().get("age").cloned().unwrap()] } else { vec![] },
        );

        assert!(result.succeeded);
        let ages = result.rows();
        assert_eq!(ages, vec![&Value::Int(30), &Value::Int(40)]);
    }

    #[test]
    fn hard_fault_aborts_remaining_inputs_in_that_partition() {
        let catalog = Arc::new(MemCatalog::new());
        catalog.create_space("s", 4);
        catalog.add_tag("s", 1, "player", vec![player_schema()]);
        let kv = Arc::new(MemKv::new());

        let mut inputs = BTreeMap::new();
        inputs.insert(0u32, vec![VidInput(b"ok".to_vec()), VidInput(b"toolong!!".to_vec())]);

        let kv2 = kv.clone();
        let catalog2 = catalog.clone();
        let result = run(
            &Config::default(),
            "s",
            4,
            inputs,
            move || TagNode::new(kv2.clone(), catalog2.clone(), 1, "player"),
            |_node: &TagNode| Vec::<Value>::new(),
        );

        assert!(!result.succeeded);
        assert_eq!(result.first_error, Some(Error::InvalidVid { expected: 4, found: 9 }));
    }
}
