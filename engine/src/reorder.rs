//! Reorder buffer - reassembling a strictly ordered operation stream.
//!
//! Committed operations can arrive out of order (push races a bulk fetch) or
//! with holes (a dropped push). The buffer keeps everything newer than the
//! cursor, keyed by sequence number, and hands out only runs that continue the
//! cursor without a hole.

use crate::{Operation, SequenceNumber};
use std::collections::{btree_map::Entry, BTreeMap};

/// What [`ReorderBuffer::insert`] did with an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// Stored for a later extraction
    Buffered,
    /// At or below the cursor; already applied
    Stale,
    /// Same sequence number already buffered; the first copy is kept
    Duplicate,
    /// No sequence number, so it cannot be ordered
    Unsequenced,
}

/// What [`ReorderBuffer::extract`] found.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// The cursor was at its initial value; everything buffered, in order,
    /// without gap checks
    Bootstrap(Vec<Operation>),
    /// A run of consecutive operations starting at `cursor + 1`
    Sequential(Vec<Operation>),
    /// The buffer holds operations but `expected` is missing
    Gap {
        expected: SequenceNumber,
        next_available: SequenceNumber,
    },
    /// Nothing buffered
    Idle,
}

/// Sparse map from sequence number to operation.
///
/// Every key is greater than the cursor the buffer was last pruned with.
#[derive(Debug, Clone, Default)]
pub struct ReorderBuffer {
    entries: BTreeMap<SequenceNumber, Operation>,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer an operation unless it is stale, duplicate or unsequenced.
    pub fn insert(&mut self, op: Operation, cursor: SequenceNumber) -> Insertion {
        let Some(seq) = op.sequence_number else {
            return Insertion::Unsequenced;
        };
        if seq <= cursor {
            return Insertion::Stale;
        }
        match self.entries.entry(seq) {
            Entry::Occupied(_) => Insertion::Duplicate,
            Entry::Vacant(slot) => {
                slot.insert(op);
                Insertion::Buffered
            }
        }
    }

    /// Drop every entry at or below `cursor`. Returns how many were dropped.
    pub fn prune(&mut self, cursor: SequenceNumber) -> usize {
        let before = self.entries.len();
        self.entries.retain(|seq, _| *seq > cursor);
        before - self.entries.len()
    }

    /// Remove the run of consecutive entries starting at `cursor + 1`.
    pub fn take_sequential(&mut self, cursor: SequenceNumber) -> Vec<Operation> {
        let mut run = Vec::new();
        let mut next = cursor + 1;
        while let Some(op) = self.entries.remove(&next) {
            run.push(op);
            next += 1;
        }
        run
    }

    /// Remove everything, in sequence order.
    pub fn drain_all(&mut self) -> Vec<Operation> {
        std::mem::take(&mut self.entries).into_values().collect()
    }

    /// Decide what can be applied on top of `cursor`.
    ///
    /// A cursor of 0 means nothing was ever applied, so the whole buffer is
    /// taken as is. Otherwise only a gap-free run qualifies; if the run is
    /// empty while entries remain, the missing number is reported.
    pub fn extract(&mut self, cursor: SequenceNumber) -> Extraction {
        self.prune(cursor);

        if self.entries.is_empty() {
            return Extraction::Idle;
        }
        if cursor == 0 {
            return Extraction::Bootstrap(self.drain_all());
        }

        let run = self.take_sequential(cursor);
        if !run.is_empty() {
            return Extraction::Sequential(run);
        }
        match self.first_sequence() {
            Some(next_available) => Extraction::Gap {
                expected: cursor + 1,
                next_available,
            },
            None => Extraction::Idle,
        }
    }

    /// Lowest buffered sequence number.
    pub fn first_sequence(&self) -> Option<SequenceNumber> {
        self.entries.keys().next().copied()
    }

    pub fn contains(&self, seq: SequenceNumber) -> bool {
        self.entries.contains_key(&seq)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Change, Entity};

    fn op(seq: SequenceNumber) -> Operation {
        Operation::new(
            "9b2f6c1e-3d4a-4c5b-8e7f-0a1b2c3d4e5f",
            "alice",
            Change::add_node(Entity::new(format!("p{seq}"))),
            1_000,
        )
        .with_sequence(seq)
    }

    fn seqs(ops: &[Operation]) -> Vec<SequenceNumber> {
        ops.iter().filter_map(|o| o.sequence_number).collect()
    }

    #[test]
    fn insert_outcomes() {
        let mut buffer = ReorderBuffer::new();
        assert_eq!(buffer.insert(op(5), 3), Insertion::Buffered);
        assert_eq!(buffer.insert(op(5), 3), Insertion::Duplicate);
        assert_eq!(buffer.insert(op(3), 3), Insertion::Stale);

        let mut unsequenced = op(9);
        unsequenced.sequence_number = None;
        assert_eq!(buffer.insert(unsequenced, 3), Insertion::Unsequenced);

        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn duplicate_keeps_first_copy() {
        let mut buffer = ReorderBuffer::new();
        let first = op(4);
        let mut second = op(4);
        second.author_id = "bob".into();

        buffer.insert(first.clone(), 0);
        buffer.insert(second, 0);
        assert_eq!(buffer.drain_all(), vec![first]);
    }

    #[test]
    fn bootstrap_takes_everything() {
        let mut buffer = ReorderBuffer::new();
        for seq in [7, 2, 4] {
            buffer.insert(op(seq), 0);
        }

        match buffer.extract(0) {
            Extraction::Bootstrap(ops) => assert_eq!(seqs(&ops), vec![2, 4, 7]),
            other => panic!("expected bootstrap, got {other:?}"),
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn sequential_stops_at_hole() {
        let mut buffer = ReorderBuffer::new();
        for seq in [2, 3, 5, 6] {
            buffer.insert(op(seq), 1);
        }

        match buffer.extract(1) {
            Extraction::Sequential(ops) => assert_eq!(seqs(&ops), vec![2, 3]),
            other => panic!("expected run, got {other:?}"),
        }
        assert_eq!(buffer.first_sequence(), Some(5));
    }

    #[test]
    fn reports_gap() {
        let mut buffer = ReorderBuffer::new();
        buffer.insert(op(4), 2);
        buffer.insert(op(5), 2);

        assert_eq!(
            buffer.extract(2),
            Extraction::Gap {
                expected: 3,
                next_available: 4
            }
        );
        // A gap leaves the buffer intact.
        assert_eq!(buffer.len(), 2);

        buffer.insert(op(3), 2);
        match buffer.extract(2) {
            Extraction::Sequential(ops) => assert_eq!(seqs(&ops), vec![3, 4, 5]),
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn extract_prunes_stale() {
        let mut buffer = ReorderBuffer::new();
        for seq in [3, 4, 6] {
            buffer.insert(op(seq), 2);
        }

        match buffer.extract(4) {
            Extraction::Gap {
                expected,
                next_available,
            } => {
                assert_eq!((expected, next_available), (5, 6));
            }
            other => panic!("expected gap, got {other:?}"),
        }
        assert!(!buffer.contains(3));
        assert_eq!(buffer.prune(10), 1);
        assert_eq!(buffer.extract(10), Extraction::Idle);
    }
}
