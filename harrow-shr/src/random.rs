//  RANDOM.rs
//    by Lut99
//
//  Created:
//    09 Feb 2023, 10:31:58
//  Last edited:
//    30 May 2023, 13:40:26
//  Auto updated?
//    Yes
//
//  Description:
//!   Provides the per-task deterministic random generator. Every task
//!   attempt gets a generator seeded from its identifying coordinates, so
//!   re-running the task reproduces its random choices and distinct tasks
//!   never share a stream.
//

use rand_mt::Mt19937GenRand64;

use specifications::functions::TaskContext;


/***** LIBRARY *****/
/// The generator handed to tasks: a 64-bit Mersenne Twister.
///
/// The 19937-bit state is seeded through the array-key constructor, so high-dimensional user
/// coordinates go in without collapsing onto a 64-bit seed.
pub type TaskRng = Mt19937GenRand64;

/// Builds the deterministic generator for the given task attempt.
///
/// # Arguments
/// - `ctx`: The coordinates of the running task attempt.
/// - `path`: Extra user-supplied integer coordinates (may be empty).
///
/// # Returns
/// A [`TaskRng`] that is identical for identical `(dataset, split, attempt, path)` and
/// statistically independent otherwise.
#[inline]
pub fn task_rng(ctx: &TaskContext, path: &[u64]) -> TaskRng {
    Mt19937GenRand64::new_with_key(ctx.seed_coords(path))
}


/***** TESTS *****/
#[cfg(test)]
mod tests {
    use rand::RngCore as _;

    use specifications::data::{DatasetId, JobId};

    use super::*;

    #[test]
    fn taskrng_deterministic_and_distinct() {
        let job = JobId::generate();
        let ctx = TaskContext{ job, dataset: DatasetId(1), split: 0, attempt: 0 };

        let mut a = task_rng(&ctx, &[42]);
        let mut b = task_rng(&ctx, &[42]);
        assert_eq!(a.next_u64(), b.next_u64());

        // A different path diverges, as does a different attempt
        let mut c = task_rng(&ctx, &[43]);
        let mut d = task_rng(&TaskContext{ attempt: 1, ..ctx }, &[42]);
        let mut a = task_rng(&ctx, &[42]);
        let base = a.next_u64();
        assert_ne!(base, c.next_u64());
        assert_ne!(base, d.next_u64());
    }
}
