//  QUEUE.rs
//    by Lut99
//
//  Created:
//    06 Mar 2023, 10:14:29
//  Last edited:
//    19 Jun 2023, 16:35:50
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the ready queues: one FIFO of dispatchable tasks per
//!   dataset, with a pick that prefers the candidate slave's local
//!   inputs and falls back on age.
//

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use specifications::data::DatasetId;
use specifications::tasks::TaskCoord;


/***** LIBRARY *****/
/// The set of ready (pending, dispatchable) tasks, FIFO per dataset.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    /// Per-dataset queues; a BTreeMap so iteration (and thus tie-breaking) is deterministic.
    queues  : BTreeMap<DatasetId, Vec<(u64, TaskCoord)>>,
    /// The enqueue counter with which age is tracked.
    counter : u64,
}

impl ReadyQueue {
    /// Constructor for an empty ReadyQueue.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a task at the back of its dataset's queue. Re-enqueueing a queued task is a no-op.
    pub fn push(&mut self, coord: TaskCoord) {
        let queue: &mut Vec<(u64, TaskCoord)> = self.queues.entry(coord.dataset).or_default();
        if queue.iter().any(|(_, c)| *c == coord) { return; }
        self.counter += 1;
        queue.push((self.counter, coord));
    }

    /// Removes a specific task from the queue, if present.
    pub fn remove(&mut self, coord: TaskCoord) {
        if let Entry::Occupied(mut entry) = self.queues.entry(coord.dataset) {
            entry.get_mut().retain(|(_, c)| *c != coord);
            if entry.get().is_empty() { entry.remove(); }
        }
    }

    /// Removes all tasks of the given dataset from the queue.
    pub fn remove_dataset(&mut self, dataset: DatasetId) {
        self.queues.remove(&dataset);
    }

    /// Picks the best task for one candidate slave and removes it from the queue.
    ///
    /// # Arguments
    /// - `score`: Scores a candidate: `None` if the task is not currently dispatchable (e.g., a
    ///   parent lost its completion again), otherwise the number of the task's inputs already held
    ///   by the slave on offer.
    ///
    /// # Returns
    /// The picked task: the highest-scoring dispatchable one, ties broken by age and then by task
    /// coordinates.
    pub fn pick(&mut self, mut score: impl FnMut(TaskCoord) -> Option<u32>) -> Option<TaskCoord> {
        let mut best: Option<(u32, u64, TaskCoord)> = None;
        for queue in self.queues.values() {
            for (age, coord) in queue {
                let score: u32 = match score(*coord) {
                    Some(score) => score,
                    None        => { continue; },
                };
                let better: bool = match &best {
                    Some((best_score, best_age, best_coord)) => {
                        score > *best_score
                            || (score == *best_score && *age < *best_age)
                            || (score == *best_score && *age == *best_age && *coord < *best_coord)
                    },
                    None => true,
                };
                if better { best = Some((score, *age, *coord)); }
            }
        }

        let (_, _, coord): (u32, u64, TaskCoord) = best?;
        self.remove(coord);
        Some(coord)
    }

    /// Returns whether no tasks are queued at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}


/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    fn coord(dataset: u64, split: u32) -> TaskCoord {
        TaskCoord::new(DatasetId(dataset), split)
    }

    #[test]
    fn fifo_within_dataset() {
        let mut queue = ReadyQueue::new();
        queue.push(coord(1, 2));
        queue.push(coord(1, 0));
        queue.push(coord(1, 1));

        // Equal scores: age wins
        assert_eq!(queue.pick(|_| Some(0)), Some(coord(1, 2)));
        assert_eq!(queue.pick(|_| Some(0)), Some(coord(1, 0)));
        assert_eq!(queue.pick(|_| Some(0)), Some(coord(1, 1)));
        assert_eq!(queue.pick(|_| Some(0)), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn locality_beats_age() {
        let mut queue = ReadyQueue::new();
        queue.push(coord(1, 0));
        queue.push(coord(1, 1));

        let picked = queue.pick(|c| Some(if c.split == 1 { 3 } else { 0 }));
        assert_eq!(picked, Some(coord(1, 1)));
    }

    #[test]
    fn undispatchable_tasks_stay() {
        let mut queue = ReadyQueue::new();
        queue.push(coord(1, 0));
        queue.push(coord(2, 0));

        // Dataset 1 is not dispatchable right now
        assert_eq!(queue.pick(|c| if c.dataset == DatasetId(1) { None } else { Some(0) }), Some(coord(2, 0)));
        assert_eq!(queue.pick(|_| None), None);
        assert!(!queue.is_empty());
    }

    #[test]
    fn push_is_idempotent() {
        let mut queue = ReadyQueue::new();
        queue.push(coord(1, 0));
        queue.push(coord(1, 0));
        assert_eq!(queue.pick(|_| Some(0)), Some(coord(1, 0)));
        assert_eq!(queue.pick(|_| Some(0)), None);
    }
}
