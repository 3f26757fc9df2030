//! A size table for relaxed interior nodes.
//!
//! The table stores the cumulative sizes of a node's children. Looking up the
//! child that holds a given index is a scan for the first cumulative size
//! greater than the index; the tables are at most [`RRB_WIDTH`] entries long
//! so the scan is cheap.

use crate::{Side, RRB_WIDTH};
use imbl_sized_chunks::Chunk;

/// Cumulative child sizes for a relaxed node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SizeTable {
    buffer: Chunk<usize, { RRB_WIDTH }>,
}

impl SizeTable {
    /// Constructs a new empty table.
    pub fn new() -> Self {
        SizeTable {
            buffer: Chunk::new(),
        }
    }

    /// Constructs a table from a sequence of child sizes.
    pub fn from_sizes<I: Iterator<Item = usize>>(sizes: I) -> Self {
        let mut total = 0;
        let buffer = sizes
            .map(|size| {
                total += size;
                total
            })
            .collect();
        SizeTable { buffer }
    }

    /// The number of children tracked by the table.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// The total size of the node the table is for.
    pub fn cumulative_size(&self) -> usize {
        self.buffer.last().copied().unwrap_or(0)
    }

    /// The cumulative size up to and including the given child.
    pub fn get_cumulative_child_size(&self, idx: usize) -> Option<usize> {
        self.buffer.get(idx).copied()
    }

    /// The size of the given child on its own.
    pub fn get_child_size(&self, idx: usize) -> Option<usize> {
        let end = self.get_cumulative_child_size(idx)?;
        let start = if idx == 0 {
            0
        } else {
            self.buffer[idx - 1]
        };
        Some(end - start)
    }

    /// Finds the child that holds the given index along with the index
    /// translated to be relative to that child. Returns `None` if the index
    /// lies past the end of the node.
    pub fn position_info_for(&self, idx: usize) -> Option<(usize, usize)> {
        for (child, cumulative) in self.buffer.iter().enumerate() {
            if idx < *cumulative {
                let skipped = if child == 0 {
                    0
                } else {
                    self.buffer[child - 1]
                };
                return Some((child, idx - skipped));
            }
        }
        None
    }

    /// Adds a new child of the given size to the given side of the table.
    pub fn push_child(&mut self, side: Side, size: usize) {
        match side {
            Side::Back => {
                let total = self.cumulative_size();
                self.buffer.push_back(total + size);
            }
            Side::Front => {
                let buffer = std::iter::once(size)
                    .chain(self.buffer.iter().map(|cumulative| cumulative + size))
                    .collect();
                self.buffer = buffer;
            }
        }
    }

    /// Grows the child on the given side of the table by an increment.
    pub fn increment_side_size(&mut self, side: Side, increment: usize) {
        match side {
            Side::Back => self.increment_child_size(self.len() - 1, increment),
            Side::Front => self.increment_child_size(0, increment),
        }
    }

    /// Grows the given child by an increment.
    pub fn increment_child_size(&mut self, idx: usize, increment: usize) {
        for cumulative in self.buffer.iter_mut().skip(idx) {
            *cumulative += increment;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    pub fn empty() {
        let table = SizeTable::new();
        assert_eq!(table.len(), 0);
        assert_eq!(table.cumulative_size(), 0);
        assert_eq!(table.position_info_for(0), None);
    }

    #[test]
    pub fn from_sizes() {
        let table = SizeTable::from_sizes([32, 30, 5].iter().copied());
        assert_eq!(table.len(), 3);
        assert_eq!(table.cumulative_size(), 67);
        assert_eq!(table.get_child_size(0), Some(32));
        assert_eq!(table.get_child_size(1), Some(30));
        assert_eq!(table.get_child_size(2), Some(5));
        assert_eq!(table.get_cumulative_child_size(1), Some(62));
        assert_eq!(table.get_child_size(3), None);
    }

    #[test]
    pub fn position_info() {
        let table = SizeTable::from_sizes([32, 30, 5].iter().copied());
        assert_eq!(table.position_info_for(0), Some((0, 0)));
        assert_eq!(table.position_info_for(31), Some((0, 31)));
        assert_eq!(table.position_info_for(32), Some((1, 0)));
        assert_eq!(table.position_info_for(61), Some((1, 29)));
        assert_eq!(table.position_info_for(62), Some((2, 0)));
        assert_eq!(table.position_info_for(66), Some((2, 4)));
        assert_eq!(table.position_info_for(67), None);
    }

    #[test]
    pub fn push_and_grow() {
        let mut table = SizeTable::new();
        table.push_child(Side::Back, 32);
        table.push_child(Side::Back, 7);
        assert_eq!(table.cumulative_size(), 39);

        table.increment_side_size(Side::Back, 3);
        assert_eq!(table.get_child_size(1), Some(10));
        assert_eq!(table.get_child_size(0), Some(32));
        assert_eq!(table.cumulative_size(), 42);

        table.push_child(Side::Front, 5);
        assert_eq!(table.len(), 3);
        assert_eq!(table.get_child_size(0), Some(5));
        assert_eq!(table.get_child_size(1), Some(32));
        assert_eq!(table.cumulative_size(), 47);

        table.increment_side_size(Side::Front, 2);
        assert_eq!(table.get_child_size(0), Some(7));
        assert_eq!(table.get_child_size(1), Some(32));
        assert_eq!(table.cumulative_size(), 49);
    }
}
