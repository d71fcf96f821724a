//  SLAVES.rs
//    by Lut99
//
//  Created:
//    07 Mar 2023, 11:20:38
//  Last edited:
//    19 Jun 2023, 16:44:21
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the master's view of its slaves: registration, heartbeat
//!   deadlines, per-slave capacity and which buckets each slave is known
//!   to hold (its own sealed outputs plus reported caches).
//

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use specifications::driving::SlaveId;
use specifications::tasks::{BucketAddr, TaskCoord};


/***** LIBRARY *****/
/// The master-side record of one registered slave.
#[derive(Clone, Debug)]
pub struct SlaveInfo {
    /// The slave's identifier.
    pub id        : SlaveId,
    /// The `host:port` on which the slave serves RPC and buckets.
    pub endpoint  : String,
    /// How many tasks the slave runs concurrently.
    pub capacity  : u32,
    /// When we last heard from the slave.
    pub last_seen : Instant,
    /// The tasks currently assigned to or running on this slave.
    pub assigned  : HashSet<TaskCoord>,
    /// The buckets this slave is known to hold.
    pub holds     : HashSet<BucketAddr>,
    /// Whether this slave has been declared lost.
    pub lost      : bool,
}

impl SlaveInfo {
    /// Returns how many more tasks this slave can take.
    #[inline]
    pub fn free_capacity(&self) -> u32 {
        self.capacity.saturating_sub(self.assigned.len() as u32)
    }
}



/// The set of all slaves the master has ever seen.
#[derive(Debug, Default)]
pub struct SlaveSet {
    /// The slaves, by identifier.
    slaves : HashMap<SlaveId, SlaveInfo>,
    /// The identifier for the next registration.
    next   : u64,
}

impl SlaveSet {
    /// Constructor for an empty SlaveSet.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new slave.
    ///
    /// # Returns
    /// The identifier the slave uses in all further messages.
    pub fn register(&mut self, endpoint: impl Into<String>, capacity: u32) -> SlaveId {
        let id: SlaveId = SlaveId(self.next);
        self.next += 1;
        self.slaves.insert(id, SlaveInfo {
            id,
            endpoint  : endpoint.into(),
            capacity  : std::cmp::max(capacity, 1),
            last_seen : Instant::now(),
            assigned  : HashSet::new(),
            holds     : HashSet::new(),
            lost      : false,
        });
        id
    }

    /// Returns the slave with the given identifier, if registered.
    #[inline]
    pub fn get(&self, id: SlaveId) -> Option<&SlaveInfo> {
        self.slaves.get(&id)
    }

    /// Returns the slave with the given identifier, mutably.
    #[inline]
    pub fn get_mut(&mut self, id: SlaveId) -> Option<&mut SlaveInfo> {
        self.slaves.get_mut(&id)
    }

    /// Notes a sign of life from the given slave.
    ///
    /// # Returns
    /// `false` if the slave is unknown or already declared lost (a returned slave is not
    /// resurrected; it must re-register).
    pub fn heard_from(&mut self, id: SlaveId) -> bool {
        match self.slaves.get_mut(&id) {
            Some(info) if !info.lost => {
                info.last_seen = Instant::now();
                true
            },
            _ => false,
        }
    }

    /// Returns the live slaves whose heartbeat deadline has passed.
    pub fn expired(&self, lost_after: Duration) -> Vec<SlaveId> {
        let now: Instant = Instant::now();
        let mut expired: Vec<SlaveId> = self.slaves.values()
            .filter(|info| !info.lost && now.duration_since(info.last_seen) > lost_after)
            .map(|info| info.id)
            .collect();
        expired.sort();
        expired
    }

    /// Iterates all slave records mutably (lost ones included).
    #[inline]
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SlaveInfo> {
        self.slaves.values_mut()
    }

    /// Iterates the live slaves with free capacity, in identifier order.
    pub fn candidates(&self) -> impl Iterator<Item = &SlaveInfo> {
        let mut live: Vec<&SlaveInfo> = self.slaves.values().filter(|info| !info.lost && info.free_capacity() > 0).collect();
        live.sort_by_key(|info| info.id);
        live.into_iter()
    }

    /// Iterates all live slaves, in identifier order.
    pub fn live(&self) -> impl Iterator<Item = &SlaveInfo> {
        let mut live: Vec<&SlaveInfo> = self.slaves.values().filter(|info| !info.lost).collect();
        live.sort_by_key(|info| info.id);
        live.into_iter()
    }

    /// Returns a live slave (other than `except`, if given) holding the given bucket.
    pub fn replica_of(&self, addr: &BucketAddr, except: SlaveId) -> Option<&SlaveInfo> {
        let mut holders: Vec<&SlaveInfo> = self.slaves.values()
            .filter(|info| !info.lost && info.id != except && info.holds.contains(addr))
            .collect();
        holders.sort_by_key(|info| info.id);
        holders.into_iter().next()
    }
}


/***** TESTS *****/
#[cfg(test)]
mod tests {
    use specifications::data::DatasetId;

    use super::*;

    #[test]
    fn register_and_capacity() {
        let mut slaves = SlaveSet::new();
        let a: SlaveId = slaves.register("127.0.0.1:5001", 2);
        let b: SlaveId = slaves.register("127.0.0.1:5002", 0);
        assert_ne!(a, b);

        // Capacity 0 is clamped to 1
        assert_eq!(slaves.get(b).unwrap().free_capacity(), 1);

        slaves.get_mut(a).unwrap().assigned.insert(TaskCoord::new(DatasetId(1), 0));
        assert_eq!(slaves.get(a).unwrap().free_capacity(), 1);
        assert_eq!(slaves.candidates().count(), 2);
        slaves.get_mut(a).unwrap().assigned.insert(TaskCoord::new(DatasetId(1), 1));
        assert_eq!(slaves.candidates().count(), 1);
    }

    #[test]
    fn lost_slaves_are_not_resurrected() {
        let mut slaves = SlaveSet::new();
        let a: SlaveId = slaves.register("127.0.0.1:5001", 1);
        assert!(slaves.heard_from(a));

        slaves.get_mut(a).unwrap().lost = true;
        assert!(!slaves.heard_from(a));
        assert_eq!(slaves.candidates().count(), 0);
    }

    #[test]
    fn replicas_exclude_producer_and_lost() {
        let mut slaves = SlaveSet::new();
        let a: SlaveId = slaves.register("127.0.0.1:5001", 1);
        let b: SlaveId = slaves.register("127.0.0.1:5002", 1);
        let addr = BucketAddr::new(DatasetId(1), 0, 0);

        slaves.get_mut(a).unwrap().holds.insert(addr);
        slaves.get_mut(b).unwrap().holds.insert(addr);
        assert_eq!(slaves.replica_of(&addr, a).map(|info| info.id), Some(b));

        slaves.get_mut(b).unwrap().lost = true;
        assert!(slaves.replica_of(&addr, a).is_none());
    }
}
