//! Focuses and iterators over the vector.
//!
//! A [`Focus`] remembers the path from the root of the tree down to the leaf
//! it last read from. Reads that stay inside that leaf cost a bounds check;
//! reads that leave it only climb as far up the remembered path as needed
//! before descending again. Sequential access through a focus therefore
//! touches each interior node a constant number of times, which is what the
//! borrowing iterator is built on.

use crate::nodes::{child_capacity, Internal, Node, Sizes};
use crate::vector::InternalVector;
use crate::WIDTH_BITS;
use archery::SharedPointerKind;
use std::fmt::Debug;
use std::iter::FusedIterator;
use std::ops::Range;

/// A cursor into a vector that caches the path to the most recently read
/// leaf.
pub struct Focus<'a, A: Clone + Debug, P: SharedPointerKind> {
    vector: &'a InternalVector<A, P>,
    path: Vec<(&'a Internal<A, P>, Range<usize>, usize, usize)>,
    leaf: &'a [A],
    leaf_range: Range<usize>,
}

impl<'a, A: Clone + Debug, P: SharedPointerKind> Clone for Focus<'a, A, P> {
    fn clone(&self) -> Self {
        Focus {
            vector: self.vector,
            path: self.path.clone(),
            leaf: self.leaf,
            leaf_range: self.leaf_range.clone(),
        }
    }
}

impl<'a, A: Clone + Debug, P: SharedPointerKind> Focus<'a, A, P> {
    /// Constructs a new focus over the vector. No path is cached until the
    /// first read.
    pub fn new(vector: &'a InternalVector<A, P>) -> Self {
        Focus {
            vector,
            path: Vec::new(),
            leaf: &[],
            leaf_range: 0..0,
        }
    }

    /// Reads the element at the given position, moving the focus there if
    /// necessary. Returns `None` if the position is out of bounds.
    pub fn get(&mut self, idx: usize) -> Option<&'a A> {
        if idx >= self.vector.len() {
            return None;
        }
        let prefix_len = self.vector.prefix_ref().len();
        if idx < prefix_len {
            return Some(&self.vector.prefix_ref()[prefix_len - 1 - idx]);
        }
        let suffix = self.vector.suffix_ref();
        let suffix_start = self.vector.len() - suffix.len();
        if idx >= suffix_start {
            return Some(&suffix[idx - suffix_start]);
        }
        let tree_idx = idx - prefix_len;
        if !self.leaf_range.contains(&tree_idx) {
            self.move_to(tree_idx, suffix_start - prefix_len);
        }
        Some(&self.leaf[tree_idx - self.leaf_range.start])
    }

    /// Repositions the cached path over the leaf holding `tree_idx`.
    fn move_to(&mut self, tree_idx: usize, tree_len: usize) {
        while let Some((_, range, _, _)) = self.path.last() {
            if range.contains(&tree_idx) {
                break;
            }
            self.path.pop();
        }
        if self.path.is_empty() {
            let root = self.vector.root_ref().expect("tree index with no root");
            match &**root {
                Node::Leaf(items) => {
                    self.leaf = items;
                    self.leaf_range = 0..tree_len;
                    return;
                }
                Node::Internal(internal) => {
                    self.path.push((
                        internal,
                        0..tree_len,
                        self.vector.depth(),
                        self.vector.offset(),
                    ));
                }
            }
        }
        loop {
            let (node, range, level, offset) = {
                let last = self.path.last().unwrap();
                (last.0, last.1.clone(), last.2, last.3)
            };
            let local = tree_idx - range.start;
            let (pos, child_offset, child_range) = match &node.sizes {
                Sizes::Relaxed(table) => {
                    let (pos, sub_idx) = table
                        .position_info_for(local)
                        .expect("cached range disagrees with size table");
                    let child_start = range.start + (local - sub_idx);
                    let child_len = table.get_child_size(pos).unwrap();
                    (pos, 0, child_start..child_start + child_len)
                }
                Sizes::Dense => {
                    let cap = child_capacity(level);
                    let adjusted = local + offset;
                    let slot = adjusted >> (WIDTH_BITS * level);
                    let first = offset >> (WIDTH_BITS * level);
                    if slot == first {
                        let child_offset = offset & (cap - 1);
                        let child_end = (range.start + cap - child_offset).min(range.end);
                        (0, child_offset, range.start..child_end)
                    } else {
                        let child_start = range.start + (slot * cap - offset);
                        let child_end = (child_start + cap).min(range.end);
                        (slot - first, 0, child_start..child_end)
                    }
                }
            };
            match &*node.children[pos] {
                Node::Leaf(items) => {
                    self.leaf = items;
                    self.leaf_range = child_range;
                    return;
                }
                Node::Internal(child) => {
                    self.path.push((child, child_range, level - 1, child_offset));
                }
            }
        }
    }
}

/// A double ended iterator over the elements of the vector.
pub struct Iter<'a, A: Clone + Debug, P: SharedPointerKind> {
    focus: Focus<'a, A, P>,
    front: usize,
    back: usize,
}

impl<'a, A: Clone + Debug, P: SharedPointerKind> Clone for Iter<'a, A, P> {
    fn clone(&self) -> Self {
        Iter {
            focus: self.focus.clone(),
            front: self.front,
            back: self.back,
        }
    }
}

impl<'a, A: Clone + Debug, P: SharedPointerKind> Iter<'a, A, P> {
    pub(crate) fn new(vector: &'a InternalVector<A, P>) -> Self {
        Iter {
            back: vector.len(),
            focus: Focus::new(vector),
            front: 0,
        }
    }
}

impl<'a, A: Clone + Debug, P: SharedPointerKind> Iterator for Iter<'a, A, P> {
    type Item = &'a A;

    fn next(&mut self) -> Option<&'a A> {
        if self.front < self.back {
            let item = self.focus.get(self.front);
            self.front += 1;
            item
        } else {
            None
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.back - self.front;
        (remaining, Some(remaining))
    }
}

impl<'a, A: Clone + Debug, P: SharedPointerKind> DoubleEndedIterator for Iter<'a, A, P> {
    fn next_back(&mut self) -> Option<&'a A> {
        if self.front < self.back {
            self.back -= 1;
            self.focus.get(self.back)
        } else {
            None
        }
    }
}

impl<'a, A: Clone + Debug, P: SharedPointerKind> ExactSizeIterator for Iter<'a, A, P> {}

impl<'a, A: Clone + Debug, P: SharedPointerKind> FusedIterator for Iter<'a, A, P> {}
