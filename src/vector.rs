//! A persistent vector.
//!
//! The vector is a handle over three parts. The prefix buffer holds the
//! first few elements in reverse order, the suffix buffer holds the last few
//! in order, and everything in between sits in an RRB tree of 32-element
//! chunks. Keeping both ends in inline buffers makes pushes and pops there
//! O(1) amortized; a push only touches the tree once a whole chunk has
//! accumulated and can be sunk down the tree's edge in one step.
//!
//! Two invariants tie the handle together. If the tree exists then both
//! buffers are non-empty, so the first and last element are always directly
//! at hand. And the tree is only ever addressed through the handle's phantom
//! offset, a multiple of 32 counting imaginary elements before the first
//! real one, which is what lets a dense tree grow at the front without
//! shifting anything.
//!
//! The vector is persistent. A clone is two buffer handles and a root
//! pointer, and mutating either copy afterwards leaves the other untouched.
//! Nodes that are uniquely owned are mutated in place; shared nodes are
//! copied first.

use crate::focus::{Focus, Iter};
use crate::nodes::{child_capacity, total_capacity, Buffer, ChildBuffer, Internal, Node, NodeRc, Sizes};
use crate::size_table::SizeTable;
use crate::RRB_WIDTH;
use archery::{ArcK, RcK, SharedPointer, SharedPointerKind};
use imbl_sized_chunks::Chunk;
use std::fmt::Debug;
use std::iter::{FromIterator, FusedIterator};
use std::mem;
use std::ops::{Bound, Index, IndexMut, RangeBounds};

/// A persistent vector backed by an RRB tree, generic over the kind of
/// reference counted pointer that links its nodes. You probably want one of
/// the [`Vector`] or [`ThreadSafeVector`] aliases rather than this type
/// directly.
#[derive(Debug)]
pub struct InternalVector<A: Clone + Debug, P: SharedPointerKind> {
    len: usize,
    depth: usize,
    offset: usize,
    prefix: SharedPointer<Buffer<A>, P>,
    suffix: SharedPointer<Buffer<A>, P>,
    root: Option<NodeRc<A, P>>,
}

/// A persistent vector linked with [`Rc`](std::rc::Rc) pointers.
pub type Vector<A> = InternalVector<A, RcK>;

/// A persistent vector linked with [`Arc`](std::sync::Arc) pointers. It may
/// be sent to and read from many threads at once.
pub type ThreadSafeVector<A> = InternalVector<A, ArcK>;

impl<A: Clone + Debug, P: SharedPointerKind> Clone for InternalVector<A, P> {
    fn clone(&self) -> Self {
        InternalVector {
            len: self.len,
            depth: self.depth,
            offset: self.offset,
            prefix: self.prefix.clone(),
            suffix: self.suffix.clone(),
            root: self.root.clone(),
        }
    }
}

impl<A: Clone + Debug, P: SharedPointerKind> InternalVector<A, P> {
    /// Constructs a new empty vector.
    ///
    /// # Examples
    ///
    /// ```
    /// # use rrbvec::Vector;
    /// let vector: Vector<u64> = Vector::new();
    /// assert!(vector.is_empty());
    /// ```
    pub fn new() -> Self {
        InternalVector {
            len: 0,
            depth: 0,
            offset: 0,
            prefix: SharedPointer::new(Chunk::new()),
            suffix: SharedPointer::new(Chunk::new()),
            root: None,
        }
    }

    /// Constructs a new vector with a single element.
    ///
    /// # Examples
    ///
    /// ```
    /// # use rrbvec::Vector;
    /// let vector = Vector::singleton(1);
    /// assert_eq!(vector.get(0), Some(&1));
    /// ```
    pub fn singleton(item: A) -> Self {
        let mut vector = Self::new();
        vector.push_back(item);
        vector
    }

    /// Constructs a new vector of `count` clones of the given element.
    pub fn repeat(item: A, count: usize) -> Self {
        let mut vector = Self::new();
        for _ in 0..count {
            vector.push_back(item.clone());
        }
        vector
    }

    /// The number of elements in the vector.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Tests whether the vector is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The number of elements stored in the tree rather than the buffers.
    fn tree_len(&self) -> usize {
        self.len - self.prefix.len() - self.suffix.len()
    }

    /// Reads the element at the given position. Returns `None` if the
    /// position is out of bounds.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[macro_use] extern crate rrbvec;
    /// # fn main() {
    /// let vector = vector![1, 2, 3];
    /// assert_eq!(vector.get(1), Some(&2));
    /// assert_eq!(vector.get(3), None);
    /// # }
    /// ```
    pub fn get(&self, idx: usize) -> Option<&A> {
        if idx >= self.len {
            return None;
        }
        let prefix_len = self.prefix.len();
        if idx < prefix_len {
            return self.prefix.get(prefix_len - 1 - idx);
        }
        let suffix_start = self.len - self.suffix.len();
        if idx >= suffix_start {
            return self.suffix.get(idx - suffix_start);
        }
        self.root.as_ref()?.get(self.depth, idx - prefix_len, self.offset)
    }

    /// Mutably borrows the element at the given position, copying any shared
    /// nodes on the way there. Returns `None` if the position is out of
    /// bounds.
    pub fn get_mut(&mut self, idx: usize) -> Option<&mut A> {
        if idx >= self.len {
            return None;
        }
        let prefix_len = self.prefix.len();
        if idx < prefix_len {
            return SharedPointer::make_mut(&mut self.prefix).get_mut(prefix_len - 1 - idx);
        }
        let suffix_start = self.len - self.suffix.len();
        if idx >= suffix_start {
            return SharedPointer::make_mut(&mut self.suffix).get_mut(idx - suffix_start);
        }
        let depth = self.depth;
        let offset = self.offset;
        Node::get_mut_in(self.root.as_mut()?, depth, idx - prefix_len, offset)
    }

    /// Replaces the element at the given position. Does nothing if the
    /// position is out of bounds.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[macro_use] extern crate rrbvec;
    /// # fn main() {
    /// let mut vector = vector![1, 2, 3];
    /// vector.update(1, 7);
    /// vector.update(9, 9);
    /// assert_eq!(vector.get(1), Some(&7));
    /// assert_eq!(vector.len(), 3);
    /// # }
    /// ```
    pub fn update(&mut self, idx: usize, item: A) {
        if let Some(slot) = self.get_mut(idx) {
            *slot = item;
        }
    }

    /// The first element of the vector.
    pub fn front(&self) -> Option<&A> {
        self.get(0)
    }

    /// The last element of the vector.
    pub fn back(&self) -> Option<&A> {
        if self.is_empty() {
            None
        } else {
            self.get(self.len - 1)
        }
    }

    /// Appends an element to the back of the vector.
    ///
    /// # Examples
    ///
    /// ```
    /// # use rrbvec::Vector;
    /// let mut vector = Vector::new();
    /// vector.push_back(1);
    /// vector.push_back(2);
    /// assert_eq!(vector.get(1), Some(&2));
    /// ```
    pub fn push_back(&mut self, item: A) {
        if self.suffix.len() < RRB_WIDTH {
            SharedPointer::make_mut(&mut self.suffix).push_back(item);
        } else if self.root.is_none() && self.prefix.is_empty() {
            // migrate the full suffix over to the prefix so both ends stay
            // buffered before a tree has to exist
            self.prefix = SharedPointer::new(self.suffix.iter().rev().cloned().collect());
            self.suffix = SharedPointer::new(Chunk::unit(item));
        } else {
            let full = mem::replace(&mut self.suffix, SharedPointer::new(Chunk::unit(item)));
            let chunk = match SharedPointer::try_unwrap(full) {
                Ok(chunk) => chunk,
                Err(shared) => (*shared).clone(),
            };
            self.push_down_back(chunk);
        }
        self.len += 1;
    }

    /// Prepends an element to the front of the vector.
    ///
    /// # Examples
    ///
    /// ```
    /// # use rrbvec::Vector;
    /// let mut vector = Vector::new();
    /// vector.push_front(1);
    /// vector.push_front(2);
    /// assert_eq!(vector.get(0), Some(&2));
    /// ```
    pub fn push_front(&mut self, item: A) {
        if self.prefix.len() < RRB_WIDTH {
            SharedPointer::make_mut(&mut self.prefix).push_back(item);
        } else if self.root.is_none() && self.suffix.is_empty() {
            self.suffix = SharedPointer::new(self.prefix.iter().rev().cloned().collect());
            self.prefix = SharedPointer::new(Chunk::unit(item));
        } else {
            let full = mem::replace(&mut self.prefix, SharedPointer::new(Chunk::unit(item)));
            let chunk: Buffer<A> = full.iter().rev().cloned().collect();
            self.push_down_front(chunk);
        }
        self.len += 1;
    }

    /// Removes and returns the last element of the vector.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[macro_use] extern crate rrbvec;
    /// # fn main() {
    /// let mut vector = vector![1, 2, 3];
    /// assert_eq!(vector.pop_back(), Some(3));
    /// assert_eq!(vector.len(), 2);
    /// # }
    /// ```
    pub fn pop_back(&mut self) -> Option<A> {
        if self.is_empty() {
            return None;
        }
        if self.suffix.len() > 1 || self.root.is_none() {
            let item = if self.suffix.is_empty() {
                SharedPointer::make_mut(&mut self.prefix).pop_front()
            } else {
                SharedPointer::make_mut(&mut self.suffix).pop_back()
            };
            self.len -= 1;
            return Some(item);
        }
        // the suffix is about to drain; slicing refills it from the tree
        let item = self.back().unwrap().clone();
        let end = self.len - 1;
        self.slice_from_start(end);
        Some(item)
    }

    /// Removes and returns the first element of the vector.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[macro_use] extern crate rrbvec;
    /// # fn main() {
    /// let mut vector = vector![1, 2, 3];
    /// assert_eq!(vector.pop_front(), Some(1));
    /// assert_eq!(vector.len(), 2);
    /// # }
    /// ```
    pub fn pop_front(&mut self) -> Option<A> {
        if self.is_empty() {
            return None;
        }
        if self.prefix.len() > 1 || self.root.is_none() {
            let item = if self.prefix.is_empty() {
                SharedPointer::make_mut(&mut self.suffix).pop_front()
            } else {
                SharedPointer::make_mut(&mut self.prefix).pop_back()
            };
            self.len -= 1;
            return Some(item);
        }
        let item = self.front().unwrap().clone();
        self.slice_to_end(1);
        Some(item)
    }

    /// Appends the given vector onto the back of this vector.
    ///
    /// Both trees are merged level by level and the children around the
    /// seam are redistributed, so chains of concatenations cannot degrade
    /// the tree beyond a constant factor.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[macro_use] extern crate rrbvec;
    /// # fn main() {
    /// let mut left = vector![1, 2, 3];
    /// let right = vector![4, 5, 6];
    /// left.append(right);
    /// assert_eq!(left, vector![1, 2, 3, 4, 5, 6]);
    /// # }
    /// ```
    pub fn append(&mut self, mut other: Self) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = other;
            return;
        }
        if other.root.is_none() {
            for item in other.prefix.iter().rev().chain(other.suffix.iter()) {
                self.push_back(item.clone());
            }
            return;
        }
        if self.root.is_none() {
            for item in self.suffix.iter().rev().chain(self.prefix.iter()) {
                other.push_front(item.clone());
            }
            *self = other;
            return;
        }
        self.relax_offset();
        other.relax_offset();
        // sink the buffers around the seam into their trees
        let left_suffix = mem::replace(&mut self.suffix, SharedPointer::new(Chunk::new()));
        self.push_down_back((*left_suffix).clone());
        let right_prefix: Buffer<A> = other.prefix.iter().rev().cloned().collect();
        other.push_down_front(right_prefix);
        // sinking a full chunk may have grown a fresh phantom offset
        other.relax_offset();
        let left_root = self.root.take().unwrap();
        let right_root = other.root.take().unwrap();
        let merged = Node::concat_sub_tree(&left_root, self.depth, &right_root, other.depth);
        let depth = self.depth.max(other.depth);
        let single = {
            let internal = merged.internal_ref();
            if internal.children.len() == 1 {
                Some(internal.children[0].clone())
            } else {
                None
            }
        };
        match single {
            Some(child) => {
                self.root = Some(child);
                self.depth = depth;
            }
            None => {
                self.root = Some(SharedPointer::new(merged));
                self.depth = depth + 1;
            }
        }
        self.suffix = other.suffix;
        self.offset = 0;
        self.len += other.len;
    }

    /// Restricts the vector to the elements inside the given range.
    ///
    /// Cuts that land in the tree extrude the boundary leaf into the
    /// matching buffer, so the buffer next to a surviving tree is never left
    /// empty.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[macro_use] extern crate rrbvec;
    /// # fn main() {
    /// let mut vector = vector![1, 2, 3, 4, 5];
    /// vector.slice(1..4);
    /// assert_eq!(vector, vector![2, 3, 4]);
    /// # }
    /// ```
    pub fn slice<R: RangeBounds<usize>>(&mut self, range: R) {
        let start = match range.start_bound() {
            Bound::Included(&start) => start,
            Bound::Excluded(&start) => start + 1,
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&end) => end + 1,
            Bound::Excluded(&end) => end,
            Bound::Unbounded => self.len,
        };
        let end = end.min(self.len);
        if start >= end {
            *self = InternalVector::new();
            return;
        }
        if start == 0 && end == self.len {
            return;
        }
        let prefix_len = self.prefix.len();
        let tree_len = self.tree_len();
        if end <= prefix_len {
            let kept: Buffer<A> = self.prefix[prefix_len - end..prefix_len - start]
                .iter()
                .cloned()
                .collect();
            self.prefix = SharedPointer::new(kept);
            self.suffix = SharedPointer::new(Chunk::new());
            self.root = None;
            self.depth = 0;
            self.offset = 0;
            self.len = end - start;
            return;
        }
        if start >= prefix_len + tree_len {
            let from = start - prefix_len - tree_len;
            let to = end - prefix_len - tree_len;
            let kept: Buffer<A> = self.suffix[from..to].iter().cloned().collect();
            self.suffix = SharedPointer::new(kept);
            self.prefix = SharedPointer::new(Chunk::new());
            self.root = None;
            self.depth = 0;
            self.offset = 0;
            self.len = end - start;
            return;
        }
        if end <= prefix_len + tree_len || start >= prefix_len {
            // at least one cut lands in the tree
            self.relax_offset();
        }
        if end > prefix_len + tree_len {
            SharedPointer::make_mut(&mut self.suffix).drop_right(end - prefix_len - tree_len);
        } else {
            let keep = end - prefix_len;
            let root = self.root.take().unwrap();
            let (kept, suffix) = root.slice_right(self.depth, keep);
            self.root = kept;
            self.suffix = SharedPointer::new(suffix);
        }
        if start < prefix_len {
            SharedPointer::make_mut(&mut self.prefix).drop_right(prefix_len - start);
        } else {
            // the right cut extruded its boundary leaf into the suffix, so
            // the left bound may now land past what is left of the tree
            let drop_count = start - prefix_len;
            let remaining = self.root.as_ref().map_or(0, |root| root.len(self.depth));
            if drop_count < remaining {
                let root = self.root.take().unwrap();
                let (kept, prefix) = root.slice_left(self.depth, drop_count);
                self.root = kept;
                self.prefix = SharedPointer::new(prefix.iter().rev().cloned().collect());
            } else {
                self.root = None;
                SharedPointer::make_mut(&mut self.suffix).drop_left(drop_count - remaining);
                self.prefix = SharedPointer::new(Chunk::new());
            }
        }
        if self.root.is_none() {
            self.depth = 0;
        }
        self.offset = 0;
        self.len = end - start;
        self.reduce_root();
    }

    /// Keeps only the first `len` elements of the vector.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[macro_use] extern crate rrbvec;
    /// # fn main() {
    /// let mut vector = vector![1, 2, 3];
    /// vector.slice_from_start(2);
    /// assert_eq!(vector, vector![1, 2]);
    /// # }
    /// ```
    pub fn slice_from_start(&mut self, len: usize) {
        self.slice(..len);
    }

    /// Drops the first `start` elements of the vector.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[macro_use] extern crate rrbvec;
    /// # fn main() {
    /// let mut vector = vector![1, 2, 3];
    /// vector.slice_to_end(1);
    /// assert_eq!(vector, vector![2, 3]);
    /// # }
    /// ```
    pub fn slice_to_end(&mut self, start: usize) {
        self.slice(start..);
    }

    /// Splits the vector at the given position. `self` keeps everything up
    /// to the position and the rest is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[macro_use] extern crate rrbvec;
    /// # fn main() {
    /// let mut vector = vector![1, 2, 3];
    /// let right = vector.split_off(1);
    /// assert_eq!(vector, vector![1]);
    /// assert_eq!(right, vector![2, 3]);
    /// # }
    /// ```
    pub fn split_off(&mut self, at: usize) -> Self {
        let mut right = self.clone();
        self.slice_from_start(at);
        right.slice_to_end(at);
        right
    }

    /// An iterator over the elements of the vector.
    pub fn iter(&self) -> Iter<'_, A, P> {
        Iter::new(self)
    }

    /// A focus over the vector, for repeated reads around the same area.
    pub fn focus(&self) -> Focus<'_, A, P> {
        Focus::new(self)
    }

    /// Copies the elements out into a `Vec`.
    pub fn to_vec(&self) -> Vec<A> {
        self.iter().cloned().collect()
    }

    /// Tests the vectors for equality with a caller supplied predicate
    /// instead of `PartialEq`.
    pub fn eq_by<F: FnMut(&A, &A) -> bool>(&self, other: &Self, mut eq: F) -> bool {
        self.len == other.len && self.iter().zip(other.iter()).all(|(a, b)| eq(a, b))
    }

    /// Checks every structural invariant of the vector, panicking on the
    /// first violation. Mainly useful as a debugging aid inside tests.
    pub fn assert_invariants(&self) -> bool {
        assert_eq!(self.offset % RRB_WIDTH, 0);
        match &self.root {
            Some(root) => {
                assert!(!self.prefix.is_empty());
                assert!(!self.suffix.is_empty());
                match &**root {
                    Node::Internal(internal) => {
                        assert!(internal.children.len() >= 2);
                        if let Sizes::Relaxed(_) = internal.sizes {
                            assert_eq!(self.offset, 0);
                        }
                    }
                    Node::Leaf(_) => {
                        assert_eq!(self.depth, 0);
                        assert_eq!(self.offset, 0);
                    }
                }
                let tree_len = root.check_invariants(self.depth, self.offset);
                assert_eq!(tree_len + self.prefix.len() + self.suffix.len(), self.len);
            }
            None => {
                assert_eq!(self.depth, 0);
                assert_eq!(self.offset, 0);
                assert_eq!(self.prefix.len() + self.suffix.len(), self.len);
            }
        }
        true
    }

    pub(crate) fn prefix_ref(&self) -> &Buffer<A> {
        &self.prefix
    }

    pub(crate) fn suffix_ref(&self) -> &Buffer<A> {
        &self.suffix
    }

    pub(crate) fn root_ref(&self) -> Option<&NodeRc<A, P>> {
        self.root.as_ref()
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    /// Sinks a chunk of elements below the suffix into the back of the
    /// tree, growing the tree if its right edge is full. Does not adjust
    /// `len`.
    fn push_down_back(&mut self, chunk: Buffer<A>) {
        debug_assert!(!chunk.is_empty());
        if self.root.is_none() {
            self.root = Some(SharedPointer::new(Node::Leaf(chunk)));
            self.depth = 0;
            return;
        }
        if self.depth == 0 {
            let root = self.root.take().unwrap();
            let old_len = root.len(0);
            let chunk_len = chunk.len();
            let mut children: ChildBuffer<A, P> = Chunk::unit(root);
            children.push_back(SharedPointer::new(Node::Leaf(chunk)));
            let sizes = if old_len == RRB_WIDTH {
                Sizes::Dense
            } else {
                Sizes::Relaxed(SizeTable::from_sizes(vec![old_len, chunk_len].into_iter()))
            };
            self.root = Some(SharedPointer::new(Node::Internal(Internal { children, sizes })));
            self.depth = 1;
            return;
        }
        let depth = self.depth;
        let offset = self.offset;
        let chunk = {
            let root = self.root.as_mut().unwrap();
            match SharedPointer::make_mut(root).push_leaf_back(depth, offset, chunk) {
                Ok(()) => return,
                Err(chunk) => chunk,
            }
        };
        let chunk = if self.offset > 0 {
            // the phantom offset pinned a node dense; renormalize and retry
            self.relax_offset();
            let root = self.root.as_mut().unwrap();
            match SharedPointer::make_mut(root).push_leaf_back(depth, 0, chunk) {
                Ok(()) => return,
                Err(chunk) => chunk,
            }
        } else {
            chunk
        };
        // every slot along the right edge is taken; grow a new root
        let old_root = self.root.take().unwrap();
        let old_len = old_root.len(self.depth);
        let dense = old_len == total_capacity(self.depth);
        let chunk_len = chunk.len();
        let path = SharedPointer::new(Node::new_path(self.depth, chunk));
        let mut children: ChildBuffer<A, P> = Chunk::unit(old_root);
        children.push_back(path);
        let sizes = if dense {
            Sizes::Dense
        } else {
            Sizes::Relaxed(SizeTable::from_sizes(vec![old_len, chunk_len].into_iter()))
        };
        self.root = Some(SharedPointer::new(Node::Internal(Internal { children, sizes })));
        self.depth += 1;
    }

    /// Sinks a chunk of elements, given in logical order, above the prefix
    /// into the front of the tree. Full chunks land in the phantom space of
    /// a dense tree; anything else relaxes the branch it moves down. Does
    /// not adjust `len`.
    fn push_down_front(&mut self, chunk: Buffer<A>) {
        debug_assert!(!chunk.is_empty());
        if self.root.is_none() {
            self.root = Some(SharedPointer::new(Node::Leaf(chunk)));
            self.depth = 0;
            self.offset = 0;
            return;
        }
        if self.depth == 0 {
            let root = self.root.take().unwrap();
            let old_len = root.len(0);
            let chunk_len = chunk.len();
            let mut children: ChildBuffer<A, P> = Chunk::unit(SharedPointer::new(Node::Leaf(chunk)));
            children.push_back(root);
            let sizes = if chunk_len == RRB_WIDTH {
                Sizes::Dense
            } else {
                Sizes::Relaxed(SizeTable::from_sizes(vec![chunk_len, old_len].into_iter()))
            };
            self.root = Some(SharedPointer::new(Node::Internal(Internal { children, sizes })));
            self.depth = 1;
            self.offset = 0;
            return;
        }
        let root_is_dense = matches!(
            self.root.as_ref().unwrap().internal_ref().sizes,
            Sizes::Dense
        );
        if root_is_dense && chunk.len() == RRB_WIDTH {
            if self.offset >= RRB_WIDTH {
                let depth = self.depth;
                let offset = self.offset;
                let root = self.root.as_mut().unwrap();
                SharedPointer::make_mut(root).prepend_leaf_dense(depth, offset, chunk);
                self.offset -= RRB_WIDTH;
                return;
            }
            debug_assert_eq!(self.offset, 0);
            // grow a dense root; the slots the new chunk does not use become
            // fresh phantom space
            let old_root = self.root.take().unwrap();
            let path = SharedPointer::new(Node::new_path(self.depth, chunk));
            let mut children: ChildBuffer<A, P> = Chunk::unit(path);
            children.push_back(old_root);
            self.root = Some(SharedPointer::new(Node::Internal(Internal {
                children,
                sizes: Sizes::Dense,
            })));
            self.depth += 1;
            self.offset = child_capacity(self.depth) - RRB_WIDTH;
            return;
        }
        // partial chunks and relaxed roots go down the relaxed path
        self.relax_offset();
        let depth = self.depth;
        let chunk = {
            let root = self.root.as_mut().unwrap();
            match SharedPointer::make_mut(root).push_leaf_front(depth, chunk) {
                Ok(()) => return,
                Err(chunk) => chunk,
            }
        };
        let old_root = self.root.take().unwrap();
        let old_len = old_root.len(self.depth);
        let chunk_len = chunk.len();
        let path = SharedPointer::new(Node::new_path(self.depth, chunk));
        let mut children: ChildBuffer<A, P> = Chunk::unit(path);
        children.push_back(old_root);
        let sizes = Sizes::Relaxed(SizeTable::from_sizes(vec![chunk_len, old_len].into_iter()));
        self.root = Some(SharedPointer::new(Node::Internal(Internal { children, sizes })));
        self.depth += 1;
        self.offset = 0;
    }

    /// Relaxes the leftmost branch of the tree so the phantom offset can be
    /// dropped. Concatenation and slicing need real sizes everywhere.
    fn relax_offset(&mut self) {
        if self.offset == 0 {
            return;
        }
        let depth = self.depth;
        let offset = self.offset;
        let root = self.root.as_mut().expect("phantom offset without a root");
        SharedPointer::make_mut(root).relax_left_spine(depth, offset);
        self.offset = 0;
    }

    /// Unwraps single-child roots left behind by slicing or concatenation.
    fn reduce_root(&mut self) {
        loop {
            let next = match self.root.as_deref() {
                Some(Node::Internal(internal)) if internal.children.len() == 1 => {
                    internal.children[0].clone()
                }
                _ => break,
            };
            self.root = Some(next);
            self.depth -= 1;
        }
    }
}

impl<A: Clone + Debug, P: SharedPointerKind> Default for InternalVector<A, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Clone + Debug + PartialEq, P: SharedPointerKind> PartialEq for InternalVector<A, P> {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().eq(other.iter())
    }
}

impl<A: Clone + Debug + Eq, P: SharedPointerKind> Eq for InternalVector<A, P> {}

impl<A: Clone + Debug, P: SharedPointerKind> Extend<A> for InternalVector<A, P> {
    fn extend<I: IntoIterator<Item = A>>(&mut self, iter: I) {
        for item in iter {
            self.push_back(item);
        }
    }
}

impl<A: Clone + Debug, P: SharedPointerKind> FromIterator<A> for InternalVector<A, P> {
    fn from_iter<I: IntoIterator<Item = A>>(iter: I) -> Self {
        let mut vector = InternalVector::new();
        vector.extend(iter);
        vector
    }
}

impl<A: Clone + Debug, P: SharedPointerKind> From<Vec<A>> for InternalVector<A, P> {
    fn from(items: Vec<A>) -> Self {
        items.into_iter().collect()
    }
}

impl<'a, A: Clone + Debug, P: SharedPointerKind> From<&'a [A]> for InternalVector<A, P> {
    fn from(items: &'a [A]) -> Self {
        items.iter().cloned().collect()
    }
}

impl<A: Clone + Debug, P: SharedPointerKind> Index<usize> for InternalVector<A, P> {
    type Output = A;

    fn index(&self, idx: usize) -> &A {
        self.get(idx)
            .unwrap_or_else(|| panic!("index out of bounds: the len is {} but the index is {}", self.len, idx))
    }
}

impl<A: Clone + Debug, P: SharedPointerKind> IndexMut<usize> for InternalVector<A, P> {
    fn index_mut(&mut self, idx: usize) -> &mut A {
        let len = self.len;
        self.get_mut(idx)
            .unwrap_or_else(|| panic!("index out of bounds: the len is {} but the index is {}", len, idx))
    }
}

impl<'a, A: Clone + Debug, P: SharedPointerKind> IntoIterator for &'a InternalVector<A, P> {
    type Item = &'a A;
    type IntoIter = Iter<'a, A, P>;

    fn into_iter(self) -> Iter<'a, A, P> {
        self.iter()
    }
}

impl<A: Clone + Debug, P: SharedPointerKind> IntoIterator for InternalVector<A, P> {
    type Item = A;
    type IntoIter = IntoIter<A, P>;

    fn into_iter(self) -> IntoIter<A, P> {
        let remaining = self.len;
        let prefix: Buffer<A> = self.prefix.iter().rev().cloned().collect();
        let suffix: Buffer<A> = (*self.suffix).clone();
        let stack = match self.root {
            Some(root) => vec![(root, 0)],
            None => Vec::new(),
        };
        IntoIter {
            prefix,
            stack,
            leaf: Chunk::new(),
            suffix,
            remaining,
        }
    }
}

/// A consuming iterator over the elements of the vector. Elements shared
/// with other vectors are cloned out as they are reached.
pub struct IntoIter<A: Clone + Debug, P: SharedPointerKind> {
    prefix: Buffer<A>,
    stack: Vec<(NodeRc<A, P>, usize)>,
    leaf: Buffer<A>,
    suffix: Buffer<A>,
    remaining: usize,
}

impl<A: Clone + Debug, P: SharedPointerKind> Iterator for IntoIter<A, P> {
    type Item = A;

    fn next(&mut self) -> Option<A> {
        if !self.prefix.is_empty() {
            self.remaining -= 1;
            return Some(self.prefix.pop_front());
        }
        if !self.leaf.is_empty() {
            self.remaining -= 1;
            return Some(self.leaf.pop_front());
        }
        while let Some((node, visited)) = self.stack.pop() {
            let descend = match &*node {
                Node::Leaf(items) => {
                    self.leaf = items.clone();
                    None
                }
                Node::Internal(internal) => {
                    if visited < internal.children.len() {
                        Some(internal.children[visited].clone())
                    } else {
                        continue;
                    }
                }
            };
            match descend {
                Some(child) => {
                    self.stack.push((node, visited + 1));
                    self.stack.push((child, 0));
                }
                None => {
                    self.remaining -= 1;
                    return Some(self.leaf.pop_front());
                }
            }
        }
        if !self.suffix.is_empty() {
            self.remaining -= 1;
            return Some(self.suffix.pop_front());
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<A: Clone + Debug, P: SharedPointerKind> ExactSizeIterator for IntoIter<A, P> {}

impl<A: Clone + Debug, P: SharedPointerKind> FusedIterator for IntoIter<A, P> {}

/// Derives a [`Vector`] from a list of elements.
///
/// # Examples
///
/// ```
/// # #[macro_use] extern crate rrbvec;
/// # fn main() {
/// let vector = vector![1, 2, 3];
/// assert_eq!(vector.len(), 3);
/// # }
/// ```
#[macro_export]
macro_rules! vector {
    () => {
        $crate::Vector::new()
    };
    ($($x:expr),+ $(,)?) => {{
        let mut result = $crate::Vector::new();
        $(
            result.push_back($x);
        )+
        result
    }};
}

/// Derives a [`ThreadSafeVector`] from a list of elements.
///
/// # Examples
///
/// ```
/// # #[macro_use] extern crate rrbvec;
/// # fn main() {
/// let vector = thread_safe_vector![1, 2, 3];
/// assert_eq!(vector.len(), 3);
/// # }
/// ```
#[macro_export]
macro_rules! thread_safe_vector {
    () => {
        $crate::ThreadSafeVector::new()
    };
    ($($x:expr),+ $(,)?) => {{
        let mut result = $crate::ThreadSafeVector::new();
        $(
            result.push_back($x);
        )+
        result
    }};
}

#[cfg(test)]
mod test {
    use crate::*;
    use ::proptest::prelude::*;
    use proptest_derive::Arbitrary;

    fn ascending(len: usize) -> Vector<usize> {
        let mut vector = Vector::new();
        for i in 0..len {
            vector.push_back(i);
        }
        vector
    }

    #[test]
    pub fn empty() {
        let vector: Vector<usize> = Vector::new();
        assert_eq!(vector.len(), 0);
        assert!(vector.is_empty());
        assert_eq!(vector.get(0), None);
        assert_eq!(vector.front(), None);
        assert_eq!(vector.back(), None);
        assert_eq!(vector.iter().next(), None);
        vector.assert_invariants();
    }

    #[test]
    pub fn indexes_round_trip_at_chunk_boundaries() {
        // one below, at and above each boundary the tree structure changes
        for &len in &[1, 31, 32, 33, 63, 64, 65, 1024, 1025, 32 * 32 * 32, 32 * 32 * 32 + 1] {
            let vector = ascending(len);
            assert_eq!(vector.len(), len);
            vector.assert_invariants();
            for i in 0..len {
                assert_eq!(vector.get(i), Some(&i), "length {} index {}", len, i);
            }
            assert_eq!(vector.get(len), None);
        }
    }

    #[test]
    pub fn push_front_builds_the_same_sequence() {
        for &len in &[31, 32, 33, 64, 65, 1024, 1025, 40_000] {
            let mut vector = Vector::new();
            for i in (0..len).rev() {
                vector.push_front(i);
            }
            vector.assert_invariants();
            for i in 0..len {
                assert_eq!(vector.get(i), Some(&i), "length {} index {}", len, i);
            }
        }
    }

    #[test]
    pub fn mixed_ends() {
        let mut vector = Vector::new();
        for i in 0..5000 {
            vector.push_back(5000 + i);
        }
        for i in (0..5000).rev() {
            vector.push_front(i);
        }
        vector.assert_invariants();
        assert_eq!(vector.len(), 10_000);
        for i in 0..10_000 {
            assert_eq!(vector.get(i), Some(&i));
        }

        // appending after a front-grown tree exercises the phantom offset
        for i in 10_000..20_000 {
            vector.push_back(i);
        }
        vector.assert_invariants();
        for i in 0..20_000 {
            assert_eq!(vector.get(i), Some(&i));
        }
    }

    #[test]
    pub fn ten_thousand_single_appends() {
        let mut vector = Vector::new();
        for i in 0..10_000 {
            vector.push_back(i);
            assert_eq!(vector.len(), i + 1);
            assert_eq!(vector.back(), Some(&i));
            if i % 1000 == 0 {
                vector.assert_invariants();
            }
        }
        vector.assert_invariants();
        assert!(vector.iter().copied().eq(0..10_000));
    }

    #[test]
    pub fn update_and_get_mut() {
        let mut vector = ascending(2000);
        for i in (0..2000).step_by(7) {
            vector.update(i, i * 10);
        }
        for i in 0..2000 {
            let expected = if i % 7 == 0 { i * 10 } else { i };
            assert_eq!(vector.get(i), Some(&expected));
        }
        *vector.get_mut(1999).unwrap() = 42;
        assert_eq!(vector.back(), Some(&42));
        // out of range updates are silently ignored
        vector.update(2000, 7);
        vector.update(usize::MAX, 7);
        assert_eq!(vector.len(), 2000);
        vector.assert_invariants();
    }

    #[test]
    pub fn clones_share_structure() {
        let original = ascending(10_000);
        let mut updated = original.clone();
        updated.update(5000, 0);
        updated.push_back(10_000);
        assert_eq!(original.get(5000), Some(&5000));
        assert_eq!(original.len(), 10_000);
        assert_eq!(updated.get(5000), Some(&0));
        assert_eq!(updated.len(), 10_001);
        original.assert_invariants();
        updated.assert_invariants();
    }

    #[test]
    pub fn concat_with_empty_is_identity() {
        let vector = ascending(1000);
        let mut left = vector.clone();
        left.append(Vector::new());
        assert_eq!(left, vector);
        let mut right = Vector::new();
        right.append(vector.clone());
        assert_eq!(right, vector);
    }

    #[test]
    pub fn concat_small_vectors() {
        let mut vector = vector![1, 2, 3];
        vector.append(vector![4, 5, 6, 7]);
        assert!(vector.iter().copied().eq(1..8));
        vector.assert_invariants();

        // small pieces glued onto a real tree
        let mut vector = ascending(5000);
        let mut tail = Vector::new();
        for i in 5000..5040 {
            tail.push_back(i);
        }
        vector.append(tail);
        assert!(vector.iter().copied().eq(0..5040));
        vector.assert_invariants();

        // a real tree glued onto a small piece
        let mut vector = Vector::new();
        for i in 0..40 {
            vector.push_back(i);
        }
        let mut tail = Vector::new();
        for i in 40..5040 {
            tail.push_back(i);
        }
        vector.append(tail);
        assert!(vector.iter().copied().eq(0..5040));
        vector.assert_invariants();
    }

    #[test]
    pub fn concat_five_large_vectors() {
        let sizes = [17_509usize, 19_454, 13_081, 16_115, 21_764];
        let mut vector = Vector::new();
        let mut next = 0;
        for &size in &sizes {
            let mut part = Vector::new();
            for _ in 0..size {
                part.push_back(next);
                next += 1;
            }
            part.assert_invariants();
            vector.append(part);
            vector.assert_invariants();
        }
        assert_eq!(vector.len(), sizes.iter().sum::<usize>());
        assert!(vector.iter().copied().eq(0..vector.len()));
    }

    #[test]
    pub fn concat_is_associative() {
        let a = ascending(700);
        let b: Vector<usize> = (700..2000).collect();
        let c: Vector<usize> = (2000..2100).collect();

        let mut left_first = a.clone();
        left_first.append(b.clone());
        left_first.append(c.clone());

        let mut right_first_tail = b;
        right_first_tail.append(c);
        let mut right_first = a;
        right_first.append(right_first_tail);

        assert_eq!(left_first, right_first);
        left_first.assert_invariants();
        right_first.assert_invariants();
    }

    #[test]
    pub fn repeated_concat_stays_balanced() {
        let mut vector = Vector::new();
        let mut expected = 0;
        for _ in 0..500 {
            let mut part = Vector::new();
            for i in 0..17 {
                part.push_back(expected + i);
            }
            expected += 17;
            vector.append(part);
        }
        vector.assert_invariants();
        assert!(vector.iter().copied().eq(0..expected));
    }

    #[test]
    pub fn split_at_inverts_concat() {
        let len = 4000;
        let vector = ascending(len);
        for &at in &[0, 1, 31, 32, 33, 1000, 2048, 3999, 4000] {
            let mut left = vector.clone();
            let right = left.split_off(at);
            assert_eq!(left.len(), at);
            assert_eq!(right.len(), len - at);
            left.assert_invariants();
            right.assert_invariants();
            left.append(right);
            assert_eq!(left, vector);
            left.assert_invariants();
        }
    }

    #[test]
    pub fn slicing() {
        let vector = ascending(4000);

        let mut inside_prefix = ascending(40);
        inside_prefix.slice(1..3);
        assert!(inside_prefix.iter().copied().eq(1..3));
        inside_prefix.assert_invariants();

        let mut inside_suffix = ascending(40);
        inside_suffix.slice(38..40);
        assert!(inside_suffix.iter().copied().eq(38..40));
        inside_suffix.assert_invariants();

        let mut middle = vector.clone();
        middle.slice(100..3900);
        assert!(middle.iter().copied().eq(100..3900));
        middle.assert_invariants();

        let mut tiny = vector.clone();
        tiny.slice(2000..2001);
        assert_eq!(tiny.len(), 1);
        assert_eq!(tiny.get(0), Some(&2000));
        tiny.assert_invariants();

        let mut whole = vector.clone();
        whole.slice(..);
        assert_eq!(whole, vector);

        let mut end_past_len = vector.clone();
        end_past_len.slice(3990..8000);
        assert!(end_past_len.iter().copied().eq(3990..4000));
        end_past_len.assert_invariants();

        let mut backwards = vector.clone();
        backwards.slice(7..3);
        assert!(backwards.is_empty());
        backwards.assert_invariants();

        let mut repeated = vector;
        for _ in 0..6 {
            let from = repeated.len() / 4;
            let to = repeated.len() - repeated.len() / 4;
            let expected: Vec<usize> = repeated.iter().copied().collect::<Vec<_>>()[from..to].to_vec();
            repeated.slice(from..to);
            assert!(repeated.iter().eq(expected.iter()));
            repeated.assert_invariants();
        }
    }

    #[test]
    pub fn slices_inside_a_single_leaf() {
        let vector = ascending(4000);
        for &(from, to) in &[(2000, 2001), (2000, 2010), (2016, 2020)] {
            let mut sliced = vector.clone();
            sliced.slice(from..to);
            assert!(sliced.iter().copied().eq(from..to), "{}..{}", from, to);
            sliced.assert_invariants();
        }

        // the right cut collapses the whole tree into the suffix and the
        // left bound lands inside what it extruded
        let mut collapsed = ascending(100);
        collapsed.slice(40..50);
        assert!(collapsed.iter().copied().eq(40..50));
        collapsed.assert_invariants();

        // the left bound lands past a tree that survived the right cut
        let mut crossing = ascending(100);
        crossing.slice(70..75);
        assert!(crossing.iter().copied().eq(70..75));
        crossing.assert_invariants();
    }

    #[test]
    pub fn slices_that_consume_the_tree() {
        let mut front = ascending(4000);
        front.slice(0..33);
        assert!(front.iter().copied().eq(0..33));
        front.assert_invariants();

        let mut back = ascending(4000);
        back.slice(3966..4000);
        assert!(back.iter().copied().eq(3966..4000));
        back.assert_invariants();

        let mut both_ends = ascending(4000);
        both_ends.slice(31..34);
        assert!(both_ends.iter().copied().eq(31..34));
        both_ends.assert_invariants();
    }

    #[test]
    pub fn pops_drain_in_order() {
        let mut back = ascending(3000);
        for i in (0..3000).rev() {
            assert_eq!(back.pop_back(), Some(i));
            if i % 500 == 0 {
                back.assert_invariants();
            }
        }
        assert_eq!(back.pop_back(), None);

        let mut front = ascending(3000);
        for i in 0..3000 {
            assert_eq!(front.pop_front(), Some(i));
            if i % 500 == 0 {
                front.assert_invariants();
            }
        }
        assert_eq!(front.pop_front(), None);
    }

    #[test]
    pub fn folds_run_both_ways() {
        let vector = ascending(100);
        let forwards = vector.iter().fold(Vec::new(), |mut acc, item| {
            acc.push(*item);
            acc
        });
        assert!(forwards.iter().copied().eq(0..100));
        let sum = vector.iter().rev().fold(0usize, |acc, item| acc + item);
        assert_eq!(sum, 4950);
        let evens: Vector<usize> = vector.iter().filter(|i| **i % 2 == 0).copied().collect();
        assert_eq!(evens.len(), 50);
        let doubled: Vector<usize> = vector.iter().map(|i| i * 2).collect();
        assert_eq!(doubled.get(50), Some(&100));
    }

    #[test]
    pub fn owned_iteration() {
        let vector = ascending(3000);
        let kept = vector.clone();
        assert!(vector.into_iter().eq(0..3000));
        assert_eq!(kept.len(), 3000);

        let mut sliced = ascending(4000);
        sliced.slice(100..3900);
        assert!(sliced.into_iter().eq(100..3900));
    }

    #[test]
    pub fn collects_round_trip() {
        let items: Vec<usize> = (0..2500).collect();
        let vector: Vector<usize> = items.clone().into();
        assert_eq!(vector.to_vec(), items);
        let from_slice: Vector<usize> = items.as_slice().into();
        assert_eq!(from_slice, vector);
        let repeated: Vector<usize> = Vector::repeat(7, 100);
        assert!(repeated.iter().all(|item| *item == 7));
        assert_eq!(repeated.len(), 100);
    }

    #[test]
    pub fn equality() {
        let a = ascending(500);
        let mut b = ascending(500);
        assert_eq!(a, b);
        b.update(250, 0);
        assert_ne!(a, b);
        assert!(a.eq_by(&b, |x, y| x % 250 == y % 250));
        assert_eq!(vector![1, 2, 3], vector![1, 2, 3]);
        assert_ne!(vector![1, 2, 3], vector![1, 2]);
    }

    #[test]
    pub fn indexing_operator() {
        let mut vector = ascending(100);
        assert_eq!(vector[99], 99);
        vector[3] = 33;
        assert_eq!(vector.get(3), Some(&33));
    }

    #[test]
    #[should_panic]
    pub fn indexing_out_of_bounds_panics() {
        let vector = ascending(10);
        let _ = vector[10];
    }

    #[test]
    pub fn shared_reads_across_threads() {
        let mut vector: ThreadSafeVector<usize> = ThreadSafeVector::new();
        for i in 0..10_000 {
            vector.push_back(i);
        }
        crossbeam::scope(|scope| {
            for _ in 0..4 {
                let vector = vector.clone();
                scope.spawn(move |_| {
                    for i in 0..10_000 {
                        assert_eq!(vector.get(i), Some(&i));
                    }
                });
            }
        })
        .unwrap();
    }

    #[derive(Arbitrary, Clone, Debug)]
    enum Action {
        PushFront(u64),
        PushBack(u64),
        PopFront,
        PopBack,
        Update(usize, u64),
        Slice(usize, usize),
        ConcatBack(Vec<u64>),
        SplitOff(usize),
    }

    fn apply(vector: &mut Vector<u64>, model: &mut Vec<u64>, action: Action) {
        match action {
            Action::PushFront(item) => {
                vector.push_front(item);
                model.insert(0, item);
            }
            Action::PushBack(item) => {
                vector.push_back(item);
                model.push(item);
            }
            Action::PopFront => {
                let expected = if model.is_empty() {
                    None
                } else {
                    Some(model.remove(0))
                };
                assert_eq!(vector.pop_front(), expected);
            }
            Action::PopBack => {
                assert_eq!(vector.pop_back(), model.pop());
            }
            Action::Update(idx, item) => {
                if !model.is_empty() {
                    let idx = idx % model.len();
                    vector.update(idx, item);
                    model[idx] = item;
                }
            }
            Action::Slice(a, b) => {
                let mut from = a % (model.len() + 1);
                let mut to = b % (model.len() + 1);
                if from > to {
                    std::mem::swap(&mut from, &mut to);
                }
                vector.slice(from..to);
                *model = model[from..to].to_vec();
            }
            Action::ConcatBack(items) => {
                let mut other = Vector::new();
                for item in &items {
                    other.push_back(*item);
                }
                vector.append(other);
                model.extend(items);
            }
            Action::SplitOff(at) => {
                let at = at % (model.len() + 1);
                let right = vector.split_off(at);
                let right_model = model.split_off(at);
                assert!(right.iter().eq(right_model.iter()));
                right.assert_invariants();
            }
        }
    }

    proptest! {
        #[test]
        fn random_actions_match_a_vec(actions: Vec<Action>) {
            let mut vector: Vector<u64> = Vector::new();
            let mut model: Vec<u64> = Vec::new();
            for action in actions {
                apply(&mut vector, &mut model, action);
                vector.assert_invariants();
                prop_assert_eq!(vector.len(), model.len());
            }
            prop_assert!(vector.iter().eq(model.iter()));
        }

        #[test]
        fn random_actions_on_a_large_vector(actions: Vec<Action>) {
            let mut vector: Vector<u64> = (0..3000u64).collect();
            let mut model: Vec<u64> = (0..3000u64).collect();
            for action in actions {
                apply(&mut vector, &mut model, action);
                vector.assert_invariants();
                prop_assert_eq!(vector.len(), model.len());
            }
            prop_assert!(vector.iter().eq(model.iter()));
        }
    }
}
