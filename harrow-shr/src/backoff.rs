//  BACKOFF.rs
//    by Lut99
//
//  Created:
//    09 Feb 2023, 09:40:12
//  Last edited:
//    30 May 2023, 13:27:51
//  Auto updated?
//    Yes
//
//  Description:
//!   Provides the retry policy used for all RPC and bucket transfers:
//!   exponential backoff with jitter, bounded in both delay and attempt
//!   count.
//

use std::future::Future;
use std::time::Duration;

use log::warn;
use rand::Rng;


/***** LIBRARY *****/
/// Defines how a fallible operation is retried.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// The delay before the first retry.
    pub initial  : Duration,
    /// The cap on any single delay.
    pub max      : Duration,
    /// How many attempts to make in total (i.e., 1 means no retries).
    pub attempts : u32,
}

impl BackoffPolicy {
    /// The policy used for master/slave RPC calls.
    #[inline]
    pub fn rpc() -> Self {
        Self{ initial: Duration::from_millis(250), max: Duration::from_secs(8), attempts: 5 }
    }

    /// The policy used for bucket transfers.
    #[inline]
    pub fn transfer() -> Self {
        Self{ initial: Duration::from_millis(500), max: Duration::from_secs(15), attempts: 4 }
    }
}

impl Default for BackoffPolicy {
    #[inline]
    fn default() -> Self {
        Self::rpc()
    }
}



/// Runs the given operation, retrying on error with exponential backoff.
///
/// # Arguments
/// - `what`: A short description of the operation, used in the retry warnings.
/// - `policy`: The [`BackoffPolicy`] bounding delay and attempt count.
/// - `op`: The operation itself. Called once per attempt.
///
/// # Returns
/// The first `Ok` the operation produces.
///
/// # Errors
/// The error of the final attempt, once the policy's attempts are exhausted.
pub async fn retry<T, E, F, Fut>(what: &str, policy: BackoffPolicy, mut op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay: Duration = policy.initial;
    for attempt in 1.. {
        match op().await {
            Ok(res)  => { return Ok(res); },
            Err(err) => {
                if attempt >= policy.attempts { return Err(err); }
                warn!("Failed to {} (attempt {}/{}): {}; retrying in {:?}", what, attempt, policy.attempts, err, delay);
            },
        }

        // Sleep with up to 50% extra jitter, then double the base delay
        let jitter: f64 = rand::thread_rng().gen_range(1.0..1.5);
        tokio::time::sleep(delay.mul_f64(jitter)).await;
        delay = std::cmp::min(delay * 2, policy.max);
    }
    unreachable!()
}


/***** TESTS *****/
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn retry_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let policy = BackoffPolicy{ initial: Duration::from_millis(1), max: Duration::from_millis(2), attempts: 5 };
        let res: Result<u32, &str> = retry("test op", policy, || {
            let n: u32 = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err("nope") } else { Ok(n) } }
        }).await;
        assert_eq!(res, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_exhausts() {
        let policy = BackoffPolicy{ initial: Duration::from_millis(1), max: Duration::from_millis(1), attempts: 3 };
        let calls = AtomicU32::new(0);
        let res: Result<(), &str> = retry("test op", policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("always") }
        }).await;
        assert_eq!(res, Err("always"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
