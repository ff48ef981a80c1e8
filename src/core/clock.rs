//! Vector clocks for the causal partial order over node events.
//!
//! Each node owns one clock of fixed dimension `n` (one component per node).
//! A local event strictly increases the owner's component; receiving a
//! message merges the sender's view (componentwise max) before advancing
//! local time. Comparing two stamps yields the full four-valued partial
//! order — callers decide what counts as a violation, the kernel does not
//! collapse `Concurrent` and `After` into one signal.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::types::NodeId;

/// Outcome of comparing two vector-clock stamps.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CausalOrder {
    /// The first event happened before the second.
    Before,
    /// The second event happened before the first.
    After,
    /// Identical stamps.
    Equal,
    /// Neither stamp dominates: no causal relation.
    Concurrent,
}

/// Fixed-dimension logical clock, one component per node.
///
/// Components are monotonically non-decreasing for the lifetime of the
/// system.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VectorClock {
    components: Vec<u64>,
}

impl VectorClock {
    /// An all-zero clock of the given dimension.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            components: vec![0; dimension],
        }
    }

    /// A clock with the given components (mostly useful in tests and when
    /// deserializing stamps received from a peer).
    #[must_use]
    pub fn from_components(components: Vec<u64>) -> Self {
        Self { components }
    }

    /// Number of components.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.components.len()
    }

    /// The component for one node.
    ///
    /// # Panics
    ///
    /// Panics if `node` is out of range.
    #[must_use]
    pub fn get(&self, node: NodeId) -> u64 {
        self.components[node.index()]
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u64] {
        &self.components
    }

    /// Records a local event: strictly increases the owner's component.
    ///
    /// # Panics
    ///
    /// Panics if `own` is out of range; passing a foreign or stale id here
    /// is a programming error, not a recoverable condition.
    pub fn increment(&mut self, own: NodeId) {
        self.components[own.index()] += 1;
    }

    /// Merges a received stamp (componentwise max), then records the
    /// receive as a local event.
    ///
    /// # Panics
    ///
    /// Panics if `own` is out of range or the dimensions differ.
    pub fn update(&mut self, own: NodeId, other: &VectorClock) {
        assert_eq!(
            self.components.len(),
            other.components.len(),
            "vector clocks must have the same dimension"
        );
        for (mine, theirs) in self.components.iter_mut().zip(&other.components) {
            *mine = (*mine).max(*theirs);
        }
        self.increment(own);
    }

    /// The partial-order comparison between two stamps.
    ///
    /// `Before` iff every component of `self` is `<=` the other's and at
    /// least one is strictly `<`; `After` is the symmetric case; `Equal`
    /// iff all components match; `Concurrent` otherwise.
    ///
    /// # Panics
    ///
    /// Panics if the dimensions differ.
    #[must_use]
    pub fn compare(&self, other: &VectorClock) -> CausalOrder {
        assert_eq!(
            self.components.len(),
            other.components.len(),
            "vector clocks must have the same dimension"
        );
        let mut some_less = false;
        let mut some_greater = false;
        for (a, b) in self.components.iter().zip(&other.components) {
            match a.cmp(b) {
                std::cmp::Ordering::Less => some_less = true,
                std::cmp::Ordering::Greater => some_greater = true,
                std::cmp::Ordering::Equal => {}
            }
        }
        match (some_less, some_greater) {
            (false, false) => CausalOrder::Equal,
            (true, false) => CausalOrder::Before,
            (false, true) => CausalOrder::After,
            (true, true) => CausalOrder::Concurrent,
        }
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, c) in self.components.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{c}")?;
        }
        f.write_str("]")
    }
}
