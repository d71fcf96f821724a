//  GRAPH.rs
//    by Lut99
//
//  Created:
//    07 Mar 2023, 13:02:55
//  Last edited:
//    19 Jun 2023, 17:02:19
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the in-memory dataset dependency graph: submission with
//!   its validations, parent/child bookkeeping, completion state and
//!   garbage-collection eligibility.
//

use std::collections::BTreeMap;

use specifications::data::{DatasetId, DatasetSpec};
use specifications::errors::SubmitError;

use crate::tasks::Task;


/***** LIBRARY *****/
/// The lifecycle state of a dataset.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DatasetState {
    /// Registered, but its tasks have not been materialized yet.
    Submitted,
    /// Its tasks exist and are being worked on.
    Materialized,
    /// All of its tasks are complete.
    Complete,
}

/// One node in the dataset graph.
#[derive(Clone, Debug)]
pub struct DatasetNode {
    /// The identifier of this dataset.
    pub id         : DatasetId,
    /// The submitted, immutable specification.
    pub spec       : DatasetSpec,
    /// The datasets consuming this one, in submission order.
    pub children   : Vec<DatasetId>,
    /// Where this dataset is in its lifecycle.
    pub state      : DatasetState,
    /// Whether the dataset has been closed.
    pub closed     : bool,
    /// Whether anything downstream actually needs this dataset's tasks to run: it has a consumer,
    /// or it appears in a wait/fetch call. Tasks are held back until then, so the output partition
    /// count can be fixed race-free.
    pub demanded   : bool,
    /// The number of buckets each task of this dataset writes. Fixed at materialization: the first
    /// consumer's split count, or our own as a fallback.
    pub out_splits : Option<u32>,
    /// The tasks, indexed by split, once materialized. May be empty for an empty local source.
    pub tasks      : Vec<Task>,
    /// Whether this dataset's buckets have already been garbage-collected.
    pub gc_done    : bool,
}

impl DatasetNode {
    /// Returns how many of this dataset's tasks are complete.
    #[inline]
    pub fn num_complete(&self) -> u32 {
        self.tasks.iter().filter(|task| task.is_done()).count() as u32
    }

    /// Returns the fraction of complete tasks, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        match self.state {
            DatasetState::Complete => 1.0,
            DatasetState::Submitted => 0.0,
            DatasetState::Materialized => {
                if self.tasks.is_empty() { return 0.0; }
                self.num_complete() as f64 / self.tasks.len() as f64
            },
        }
    }

    /// Returns the task for the given split, if materialized.
    #[inline]
    pub fn task(&self, split: u32) -> Option<&Task> {
        self.tasks.get(split as usize)
    }

    /// Returns the task for the given split, mutably.
    #[inline]
    pub fn task_mut(&mut self, split: u32) -> Option<&mut Task> {
        self.tasks.get_mut(split as usize)
    }
}



/// The dataset dependency graph of one job.
#[derive(Debug, Default)]
pub struct DatasetGraph {
    /// The nodes, in submission order (identifiers are monotonic).
    nodes : BTreeMap<DatasetId, DatasetNode>,
    /// The identifier for the next submission.
    next  : u64,
}

impl DatasetGraph {
    /// Constructor for an empty DatasetGraph.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and registers a new dataset.
    ///
    /// # Arguments
    /// - `spec`: The submitted [`DatasetSpec`]. For `Files` sources the split count is normalized
    ///   to the URL count.
    ///
    /// # Returns
    /// The identifier of the new node.
    ///
    /// # Errors
    /// A [`SubmitError`] when a referenced parent is missing or closed, the split count is zero,
    /// a source consumer is not split-aligned, a required function name is missing, or the
    /// submission conflicts with an already-fixed output partition count.
    pub fn submit(&mut self, mut spec: DatasetSpec) -> Result<DatasetId, SubmitError> {
        use specifications::data::DatasetKind::*;

        // Normalize and validate the split count
        if spec.kind == Files { spec.num_splits = spec.urls.len() as u32; }
        if spec.num_splits == 0 { return Err(SubmitError::ZeroSplits); }

        // Validate the function names the kind requires
        match spec.kind {
            Map if spec.mapper.is_none()        => { return Err(SubmitError::MissingFunction{ kind: "map", what: "mapper" }); },
            Reduce if spec.reducer.is_none()    => { return Err(SubmitError::MissingFunction{ kind: "reduce", what: "reducer" }); },
            ReduceMap if spec.reducer.is_none() => { return Err(SubmitError::MissingFunction{ kind: "reducemap", what: "reducer" }); },
            ReduceMap if spec.mapper.is_none()  => { return Err(SubmitError::MissingFunction{ kind: "reducemap", what: "mapper" }); },
            _ => {},
        }

        // Validate the parents
        for parent_id in &spec.sources {
            let parent: &DatasetNode = match self.nodes.get(parent_id) {
                Some(parent) => parent,
                None         => { return Err(SubmitError::UnknownParent{ id: *parent_id }); },
            };
            if parent.closed { return Err(SubmitError::ClosedParent{ id: *parent_id }); }

            if parent.spec.kind.is_source() {
                // Source parents deliver task-aligned input
                if parent.spec.num_splits != spec.num_splits {
                    return Err(SubmitError::SourceSplitMismatch{ parent: *parent_id, parent_splits: parent.spec.num_splits, splits: spec.num_splits });
                }
            } else {
                // Computed parents shuffle; their tasks must write one bucket per split of ours
                if let Some(fixed) = parent.out_splits {
                    if fixed != spec.num_splits { return Err(SubmitError::OutSplitsConflict{ parent: *parent_id, fixed, splits: spec.num_splits }); }
                } else if let Some(first_child) = parent.children.first() {
                    let first_splits: u32 = self.nodes[first_child].spec.num_splits;
                    if first_splits != spec.num_splits { return Err(SubmitError::OutSplitsConflict{ parent: *parent_id, fixed: first_splits, splits: spec.num_splits }); }
                }
            }
        }

        // All good; register the node and hook it into its parents
        let id: DatasetId = DatasetId(self.next);
        self.next += 1;
        for parent_id in &spec.sources {
            let parent: &mut DatasetNode = self.nodes.get_mut(parent_id).unwrap();
            parent.children.push(id);
            parent.demanded = true;
        }
        self.nodes.insert(id, DatasetNode {
            id,
            spec,
            children   : vec![],
            state      : DatasetState::Submitted,
            closed     : false,
            demanded   : false,
            out_splits : None,
            tasks      : vec![],
            gc_done    : false,
        });
        Ok(id)
    }

    /// Returns the node with the given identifier.
    #[inline]
    pub fn get(&self, id: DatasetId) -> Option<&DatasetNode> {
        self.nodes.get(&id)
    }

    /// Returns the node with the given identifier, mutably.
    #[inline]
    pub fn get_mut(&mut self, id: DatasetId) -> Option<&mut DatasetNode> {
        self.nodes.get_mut(&id)
    }

    /// Iterates all nodes in submission order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &DatasetNode> {
        self.nodes.values()
    }

    /// Iterates all nodes in submission order, mutably.
    #[inline]
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DatasetNode> {
        self.nodes.values_mut()
    }

    /// Marks a dataset as demanded (it appears in a wait or fetch call).
    pub fn demand(&mut self, id: DatasetId) {
        if let Some(node) = self.nodes.get_mut(&id) { node.demanded = true; }
    }

    /// Returns the submitted datasets whose tasks can be materialized now: every parent complete,
    /// and the dataset demanded. Sources never appear here; they complete through submission
    /// (file sources) or advertisement (local sources) instead.
    pub fn ready_to_materialize(&self) -> Vec<DatasetId> {
        self.nodes.values()
            .filter(|node| {
                node.state == DatasetState::Submitted
                    && !node.spec.kind.is_source()
                    && node.demanded
                    && node.spec.sources.iter().all(|parent| self.nodes[parent].state == DatasetState::Complete)
            })
            .map(|node| node.id)
            .collect()
    }

    /// Marks a dataset closed.
    ///
    /// # Returns
    /// `false` if it was closed already (closing twice is a no-op).
    pub fn close(&mut self, id: DatasetId) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) if !node.closed => {
                node.closed = true;
                true
            },
            _ => false,
        }
    }

    /// Returns the datasets whose buckets may be deleted now: closed, not yet collected, and
    /// without open dependents.
    pub fn gc_eligible(&self) -> Vec<DatasetId> {
        self.nodes.values()
            .filter(|node| {
                node.closed
                    && !node.gc_done
                    && node.children.iter().all(|child| self.nodes[child].closed)
            })
            .map(|node| node.id)
            .collect()
    }
}


/***** TESTS *****/
#[cfg(test)]
mod tests {
    use specifications::data::DatasetKind;
    use specifications::functions::{DEFAULT_PARTER, DEFAULT_SERIALIZER};

    use super::*;

    fn spec(kind: DatasetKind, sources: Vec<DatasetId>, splits: u32) -> DatasetSpec {
        DatasetSpec {
            kind,
            sources,
            urls             : if kind == DatasetKind::Files { (0..splits).map(|i| format!("file-{}", i)).collect() } else { vec![] },
            num_splits       : splits,
            outdir           : None,
            parter           : DEFAULT_PARTER.into(),
            mapper           : if matches!(kind, DatasetKind::Map | DatasetKind::ReduceMap) { Some("m".into()) } else { None },
            reducer          : if matches!(kind, DatasetKind::Reduce | DatasetKind::ReduceMap) { Some("r".into()) } else { None },
            combiner         : None,
            key_serializer   : DEFAULT_SERIALIZER.into(),
            value_serializer : DEFAULT_SERIALIZER.into(),
        }
    }

    #[test]
    fn submit_validates_parents() {
        let mut graph = DatasetGraph::new();
        let source: DatasetId = graph.submit(spec(DatasetKind::Files, vec![], 2)).unwrap();

        assert!(matches!(graph.submit(spec(DatasetKind::Map, vec![DatasetId(42)], 2)), Err(SubmitError::UnknownParent{ .. })));

        let map: DatasetId = graph.submit(spec(DatasetKind::Map, vec![source], 2)).unwrap();
        assert_eq!(graph.get(source).unwrap().children, vec![map]);
        assert!(graph.get(source).unwrap().demanded);

        graph.close(map);
        assert!(matches!(graph.submit(spec(DatasetKind::Reduce, vec![map], 2)), Err(SubmitError::ClosedParent{ .. })));
    }

    #[test]
    fn submit_validates_alignment_and_functions() {
        let mut graph = DatasetGraph::new();
        let source: DatasetId = graph.submit(spec(DatasetKind::Files, vec![], 2)).unwrap();

        // Consumers of sources must be split-aligned
        assert!(matches!(graph.submit(spec(DatasetKind::Map, vec![source], 3)), Err(SubmitError::SourceSplitMismatch{ .. })));

        // Required function names must be present
        let mut broken = spec(DatasetKind::Map, vec![source], 2);
        broken.mapper = None;
        assert!(matches!(graph.submit(broken), Err(SubmitError::MissingFunction{ .. })));

        assert!(matches!(graph.submit(spec(DatasetKind::Local, vec![], 0)), Err(SubmitError::ZeroSplits)));
    }

    #[test]
    fn submit_rejects_out_splits_conflicts() {
        let mut graph = DatasetGraph::new();
        let source: DatasetId = graph.submit(spec(DatasetKind::Files, vec![], 2)).unwrap();
        let map: DatasetId = graph.submit(spec(DatasetKind::Map, vec![source], 2)).unwrap();

        // First consumer fixes the partition count (here implicitly, via children)
        let _reduce: DatasetId = graph.submit(spec(DatasetKind::Reduce, vec![map], 4)).unwrap();
        assert!(matches!(graph.submit(spec(DatasetKind::Reduce, vec![map], 3)), Err(SubmitError::OutSplitsConflict{ .. })));

        // An explicitly fixed count is also binding
        graph.get_mut(map).unwrap().out_splits = Some(4);
        assert!(matches!(graph.submit(spec(DatasetKind::Reduce, vec![map], 5)), Err(SubmitError::OutSplitsConflict{ .. })));
    }

    #[test]
    fn gc_waits_for_dependents() {
        let mut graph = DatasetGraph::new();
        let source: DatasetId = graph.submit(spec(DatasetKind::Files, vec![], 1)).unwrap();
        let map: DatasetId = graph.submit(spec(DatasetKind::Map, vec![source], 1)).unwrap();

        assert!(graph.close(source));
        assert!(!graph.close(source), "closing twice must be a no-op");
        assert!(graph.gc_eligible().is_empty());

        graph.close(map);
        let eligible = graph.gc_eligible();
        assert!(eligible.contains(&source) && eligible.contains(&map));
    }
}
