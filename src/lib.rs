//! A persistent vector backed by a relaxed radix balanced (RRB) tree.
//!
//! The vector keeps its first and last few elements in two inline buffers,
//! the prefix and the suffix, and stores everything in between in a wide
//! shallow tree of 32-element chunks. This makes reads and writes at either
//! end cheap while still allowing efficient concatenation and slicing at
//! arbitrary positions.
//!
//! All operations are persistent. Mutating a vector never changes other
//! handles that share structure with it; shared nodes are copied on write
//! while uniquely owned nodes are updated in place.
//!
//! # Features
//! 1) Clones are always cheap.
//! 2) O(1) amortized pushes and pops at either end of the vector.
//! 3) O(log n) random access reads and writes.
//! 4) O(log n) concatenation and slicing.
//! 5) Reference counting may be done with [`Rc`](std::rc::Rc) or
//! [`Arc`](std::sync::Arc). The [`Arc`](std::sync::Arc) flavour is
//! `Send` and `Sync` and may be read from many threads at once.
//!
//! # Terminology
//!
//! * RRB tree
//!
//! A relaxed radix balanced tree, a tree of fixed-width data chunks.
//! Branches that have never been disturbed by concatenation or slicing are
//! dense and can be indexed with shifts and masks alone; branches near a
//! splice point are relaxed and carry a table of cumulative child sizes.
//!
//! * Level
//!
//! The distance of a node from the leaves. Data chunks sit at level 0 and a
//! node at level `h` only ever holds children of level `h - 1`.
//!
//! * Phantom offset
//!
//! A vector whose front has grown addresses its dense root as if a whole
//! number of leading chunks existed before the first real element. The count
//! of these imaginary elements is the vector's offset. It is always a
//! multiple of [`RRB_WIDTH`] and only ever affects the leftmost branch of
//! the tree.
#![deny(missing_docs)]

#[macro_use]
pub mod vector;
pub mod focus;
pub(crate) mod nodes;
pub(crate) mod size_table;

pub use crate::focus::{Focus, Iter};
pub use crate::vector::{InternalVector, IntoIter, ThreadSafeVector, Vector};

/// The width of the RRB tree nodes. The maximum number of elements in a leaf
/// or children in an interior node.
pub const RRB_WIDTH: usize = 32;

/// The number of index bits consumed by one level of a dense branch.
pub(crate) const WIDTH_BITS: usize = 5;

/// Represents a side of a container.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Side {
    /// The front of a container.
    Front,
    /// The back of a container.
    Back,
}

impl Side {
    /// Returns the opposite of the given side.
    pub fn negate(self) -> Side {
        match self {
            Side::Front => Side::Back,
            Side::Back => Side::Front,
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{Side, RRB_WIDTH, WIDTH_BITS};

    #[test]
    pub fn width_is_power_of_two() {
        assert!(RRB_WIDTH.is_power_of_two());
        assert_eq!(1 << WIDTH_BITS, RRB_WIDTH);
    }

    #[test]
    pub fn negate_side() {
        assert_eq!(Side::Front.negate(), Side::Back);
        assert_eq!(Side::Back.negate(), Side::Front);
    }
}
