//  TASKS.rs
//    by Lut99
//
//  Created:
//    06 Mar 2023, 09:31:46
//  Last edited:
//    19 Jun 2023, 16:28:47
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the master-side task state machine: one record per
//!   `(dataset, split)`, tracking attempts, generations and the recorded
//!   outputs of completed tasks.
//

use std::fmt::{Display, Formatter, Result as FResult};

use specifications::driving::SlaveId;
use specifications::tasks::TaskCoord;


/***** LIBRARY *****/
/// The scheduling state of one task.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskState {
    /// Ready to be offered to a slave (or waiting for its parents to re-complete).
    Pending,
    /// An assignment offer is in flight to the given slave.
    Assigned(SlaveId),
    /// The given slave has accepted the task and is executing it.
    Running(SlaveId),
    /// The task completed and its outputs are recorded.
    Done,
    /// The task exhausted its retry bound; the job is aborting.
    FailedFatal,
}

impl TaskState {
    /// Returns the slave this task currently occupies, if any.
    #[inline]
    pub fn slave(&self) -> Option<SlaveId> {
        match self {
            Self::Assigned(slave) | Self::Running(slave) => Some(*slave),
            _ => None,
        }
    }
}

impl Display for TaskState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use TaskState::*;
        match self {
            Pending         => write!(f, "pending"),
            Assigned(slave) => write!(f, "assigned to {}", slave),
            Running(slave)  => write!(f, "running on {}", slave),
            Done            => write!(f, "complete"),
            FailedFatal     => write!(f, "failed fatally"),
        }
    }
}



/// What a completed task produced.
#[derive(Clone, Debug)]
pub enum TaskData {
    /// A computed task's sealed buckets: one URL per consumer split, plus the slave serving them.
    Buckets {
        /// The bucket URLs, indexed by consumer split.
        urls     : Vec<String>,
        /// The slave that produced (and primarily serves) them.
        producer : SlaveId,
    },
    /// A file-source task: the output simply is the source URL.
    SourceUrl(String),
    /// A local-source task: one pre-partitioned bucket served by the master.
    LocalBucket(String),
    /// A task that completed without producing anything (all of its inputs were empty).
    Empty,
}

/// The master-side record of one task.
#[derive(Clone, Debug)]
pub struct Task {
    /// The coordinates of this task.
    pub coord      : TaskCoord,
    /// The current scheduling state.
    pub state      : TaskState,
    /// The attempt counter. Increments when an attempt fails, not when a lost slave forces a
    /// reassignment.
    pub attempt    : u32,
    /// The generation counter. Increments whenever a recorded completion is invalidated, so
    /// consumers can tell stale outputs from fresh ones.
    pub generation : u64,
    /// The outputs, once the task is [`TaskState::Done`].
    pub data       : Option<TaskData>,
}

impl Task {
    /// Constructor for a pending Task.
    #[inline]
    pub fn new(coord: TaskCoord) -> Self {
        Self {
            coord,
            state      : TaskState::Pending,
            attempt    : 0,
            generation : 0,
            data       : None,
        }
    }

    /// Constructor for a Task that is already complete at materialization (source tasks and
    /// empty-input shortcuts).
    #[inline]
    pub fn completed(coord: TaskCoord, data: TaskData) -> Self {
        Self {
            coord,
            state      : TaskState::Done,
            attempt    : 0,
            generation : 0,
            data       : Some(data),
        }
    }

    /// Returns whether this task is complete.
    #[inline]
    pub fn is_done(&self) -> bool {
        matches!(self.state, TaskState::Done)
    }

    /// Invalidates a recorded completion: the outputs are forgotten, the generation advances and
    /// the task goes back to pending (with the same attempt; losing outputs is not the task's
    /// fault).
    pub fn invalidate(&mut self) {
        self.generation += 1;
        self.data = None;
        self.state = TaskState::Pending;
    }
}
