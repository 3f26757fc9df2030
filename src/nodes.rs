//! The nodes of the RRB tree.
//!
//! A tree is made of leaves holding chunks of elements and interior nodes
//! holding chunks of children. An interior node is either dense, meaning a
//! position can be turned into a child slot with shifts and masks, or
//! relaxed, meaning it carries a table of cumulative child sizes that must be
//! consulted instead. Dense nodes require every child but the last to be
//! completely full; concatenation and slicing break that property and
//! produce relaxed nodes in the branches they disturb.
//!
//! The leftmost branch of a dense tree may additionally be addressed through
//! a phantom offset, a count of imaginary elements that precede the first
//! real one. The offset lets the vector grow at the front without shifting
//! any chunk; it is threaded through every operation here as the `offset`
//! parameter and is zero everywhere except along that branch.

use crate::size_table::SizeTable;
use crate::{Side, RRB_WIDTH, WIDTH_BITS};
use archery::{SharedPointer, SharedPointerKind};
use imbl_sized_chunks::Chunk;
use std::fmt::Debug;

/// A chunk of elements stored in a leaf.
pub(crate) type Buffer<A> = Chunk<A, { RRB_WIDTH }>;

/// A reference counted node.
pub(crate) type NodeRc<A, P> = SharedPointer<Node<A, P>, P>;

/// A chunk of children stored in an interior node.
pub(crate) type ChildBuffer<A, P> = Chunk<NodeRc<A, P>, { RRB_WIDTH }>;

/// The maximum number of extra slots a rebalanced level may waste before the
/// concatenation algorithm redistributes its children.
pub(crate) const E_MAX: usize = 2;

/// The maximum number of elements a single child of a node at `level` can
/// hold.
pub(crate) fn child_capacity(level: usize) -> usize {
    1 << (WIDTH_BITS * level)
}

/// The maximum number of elements a node at `level` can hold.
pub(crate) fn total_capacity(level: usize) -> usize {
    1 << (WIDTH_BITS * (level + 1))
}

/// How an interior node keeps track of the sizes of its children.
#[derive(Clone, Debug)]
pub(crate) enum Sizes {
    /// Every child but the last is full for its level; positions are
    /// translated with shifts and masks.
    Dense,
    /// Children may be arbitrarily full; positions are translated through a
    /// table of cumulative sizes.
    Relaxed(SizeTable),
}

/// An interior node of the tree.
#[derive(Debug)]
pub(crate) struct Internal<A: Clone + Debug, P: SharedPointerKind> {
    pub children: ChildBuffer<A, P>,
    pub sizes: Sizes,
}

/// A node of the tree.
#[derive(Debug)]
pub(crate) enum Node<A: Clone + Debug, P: SharedPointerKind> {
    Leaf(Buffer<A>),
    Internal(Internal<A, P>),
}

impl<A: Clone + Debug, P: SharedPointerKind> Clone for Internal<A, P> {
    fn clone(&self) -> Self {
        Internal {
            children: self.children.clone(),
            sizes: self.sizes.clone(),
        }
    }
}

impl<A: Clone + Debug, P: SharedPointerKind> Clone for Node<A, P> {
    fn clone(&self) -> Self {
        match self {
            Node::Leaf(items) => Node::Leaf(items.clone()),
            Node::Internal(internal) => Node::Internal(internal.clone()),
        }
    }
}

impl<A: Clone + Debug, P: SharedPointerKind> Internal<A, P> {
    /// Builds a relaxed node at `level` from the given children.
    pub fn from_children(children: ChildBuffer<A, P>, level: usize) -> Self {
        let table = SizeTable::from_sizes(children.iter().map(|child| child.len(level - 1)));
        Internal {
            children,
            sizes: Sizes::Relaxed(table),
        }
    }

    /// Converts a dense node into its relaxed form. The node must not be
    /// addressed through a phantom offset.
    pub fn relax(&mut self, level: usize) {
        if let Sizes::Dense = self.sizes {
            let table = SizeTable::from_sizes(self.children.iter().map(|child| child.len(level - 1)));
            self.sizes = Sizes::Relaxed(table);
        }
    }

    /// Translates a position in this node into the child slot that holds it,
    /// the position relative to that child and the phantom offset the child
    /// must be addressed through. Returns `None` if the position lies past
    /// the end of a relaxed node.
    pub fn position_info_for(
        &self,
        level: usize,
        idx: usize,
        offset: usize,
    ) -> Option<(usize, usize, usize)> {
        match &self.sizes {
            Sizes::Relaxed(table) => {
                debug_assert_eq!(offset, 0);
                let (pos, sub_idx) = table.position_info_for(idx)?;
                Some((pos, sub_idx, 0))
            }
            Sizes::Dense => {
                let cap = child_capacity(level);
                let adjusted = idx + offset;
                let slot = adjusted >> (WIDTH_BITS * level);
                let first = offset >> (WIDTH_BITS * level);
                if slot == first {
                    Some((0, idx, offset & (cap - 1)))
                } else {
                    Some((slot - first, adjusted & (cap - 1), 0))
                }
            }
        }
    }
}

impl<A: Clone + Debug, P: SharedPointerKind> Node<A, P> {
    /// Builds a chain of single-child dense nodes of the given height with
    /// the leaf at the bottom.
    pub fn new_path(level: usize, leaf: Buffer<A>) -> Node<A, P> {
        let mut node = Node::Leaf(leaf);
        for _ in 0..level {
            let children: ChildBuffer<A, P> = Chunk::unit(SharedPointer::new(node));
            node = Node::Internal(Internal {
                children,
                sizes: Sizes::Dense,
            });
        }
        node
    }

    pub fn leaf_ref(&self) -> &Buffer<A> {
        match self {
            Node::Leaf(items) => items,
            Node::Internal(_) => panic!("failed to unwrap node as a leaf"),
        }
    }

    pub fn internal_ref(&self) -> &Internal<A, P> {
        match self {
            Node::Internal(internal) => internal,
            Node::Leaf(_) => panic!("failed to unwrap node as an interior node"),
        }
    }

    pub fn internal_mut(&mut self) -> &mut Internal<A, P> {
        match self {
            Node::Internal(internal) => internal,
            Node::Leaf(_) => panic!("failed to unwrap node as an interior node"),
        }
    }

    /// The number of occupied slots, elements for a leaf and children for an
    /// interior node.
    pub fn slots(&self) -> usize {
        match self {
            Node::Leaf(items) => items.len(),
            Node::Internal(internal) => internal.children.len(),
        }
    }

    /// The number of elements in the subtree. The subtree must not be
    /// addressed through a phantom offset.
    pub fn len(&self, level: usize) -> usize {
        match self {
            Node::Leaf(items) => items.len(),
            Node::Internal(internal) => match &internal.sizes {
                Sizes::Relaxed(table) => table.cumulative_size(),
                Sizes::Dense => {
                    let full_children = internal.children.len() - 1;
                    let last = internal.children.last().unwrap();
                    full_children * child_capacity(level) + last.len(level - 1)
                }
            },
        }
    }

    /// Reads the element at a position in the subtree.
    pub fn get(&self, level: usize, idx: usize, offset: usize) -> Option<&A> {
        match self {
            Node::Leaf(items) => {
                debug_assert_eq!(offset, 0);
                items.get(idx)
            }
            Node::Internal(internal) => {
                let (pos, sub_idx, sub_offset) = internal.position_info_for(level, idx, offset)?;
                internal.children.get(pos)?.get(level - 1, sub_idx, sub_offset)
            }
        }
    }

    /// Mutably borrows the element at a position in the subtree, copying
    /// shared nodes along the way.
    pub fn get_mut_in<'a>(
        this: &'a mut NodeRc<A, P>,
        level: usize,
        idx: usize,
        offset: usize,
    ) -> Option<&'a mut A> {
        match SharedPointer::make_mut(this) {
            Node::Leaf(items) => {
                debug_assert_eq!(offset, 0);
                items.get_mut(idx)
            }
            Node::Internal(internal) => {
                let (pos, sub_idx, sub_offset) = internal.position_info_for(level, idx, offset)?;
                Node::get_mut_in(internal.children.get_mut(pos)?, level - 1, sub_idx, sub_offset)
            }
        }
    }

    /// Pushes a leaf chunk down the rightmost edge of the subtree. Gives the
    /// chunk back if every node along that edge is out of slots, or if
    /// placing it would need to relax a node that a phantom offset pins
    /// dense.
    pub fn push_leaf_back(
        &mut self,
        level: usize,
        offset: usize,
        mut leaf: Buffer<A>,
    ) -> Result<(), Buffer<A>> {
        debug_assert!(level >= 1);
        let internal = self.internal_mut();
        let leaf_len = leaf.len();
        debug_assert!(offset == 0 || internal.children.len() > 1);
        if level > 1 {
            // the offset belongs to the leftmost branch, which is never the
            // last child of a node with more than one
            if let Some(last) = internal.children.last_mut() {
                match SharedPointer::make_mut(last).push_leaf_back(level - 1, 0, leaf) {
                    Ok(()) => {
                        if let Sizes::Relaxed(table) = &mut internal.sizes {
                            table.increment_side_size(Side::Back, leaf_len);
                        }
                        return Ok(());
                    }
                    Err(rejected) => leaf = rejected,
                }
            }
        }
        let first = offset >> (WIDTH_BITS * level);
        if first + internal.children.len() == RRB_WIDTH {
            return Err(leaf);
        }
        if let Sizes::Dense = internal.sizes {
            let last_full = internal
                .children
                .last()
                .map_or(true, |child| child.len(level - 1) == child_capacity(level));
            if !last_full || leaf_len < RRB_WIDTH {
                if offset != 0 {
                    return Err(leaf);
                }
                internal.relax(level);
            }
        }
        let node = if level == 1 {
            Node::Leaf(leaf)
        } else {
            Node::new_path(level - 1, leaf)
        };
        internal.children.push_back(SharedPointer::new(node));
        if let Sizes::Relaxed(table) = &mut internal.sizes {
            table.push_child(Side::Back, leaf_len);
        }
        Ok(())
    }

    /// Writes a full leaf chunk into the phantom space at the front of a
    /// dense subtree. The subtree's offset must cover at least one whole
    /// chunk.
    pub fn prepend_leaf_dense(&mut self, level: usize, offset: usize, leaf: Buffer<A>) {
        debug_assert!(offset >= RRB_WIDTH && offset % RRB_WIDTH == 0);
        debug_assert_eq!(leaf.len(), RRB_WIDTH);
        let internal = self.internal_mut();
        debug_assert!(matches!(internal.sizes, Sizes::Dense));
        let sub_offset = offset & (child_capacity(level) - 1);
        if sub_offset == 0 {
            let node = if level == 1 {
                Node::Leaf(leaf)
            } else {
                Node::new_path(level - 1, leaf)
            };
            internal.children.push_front(SharedPointer::new(node));
        } else {
            debug_assert!(level > 1);
            SharedPointer::make_mut(&mut internal.children[0]).prepend_leaf_dense(
                level - 1,
                sub_offset,
                leaf,
            );
        }
    }

    /// Pushes a leaf chunk down the leftmost edge of the subtree, relaxing
    /// every node along the way. Gives the chunk back if every node along
    /// that edge is out of slots. The subtree must not be addressed through
    /// a phantom offset.
    pub fn push_leaf_front(&mut self, level: usize, mut leaf: Buffer<A>) -> Result<(), Buffer<A>> {
        debug_assert!(level >= 1);
        let internal = self.internal_mut();
        let leaf_len = leaf.len();
        internal.relax(level);
        if level > 1 {
            match SharedPointer::make_mut(&mut internal.children[0]).push_leaf_front(level - 1, leaf)
            {
                Ok(()) => {
                    if let Sizes::Relaxed(table) = &mut internal.sizes {
                        table.increment_side_size(Side::Front, leaf_len);
                    }
                    return Ok(());
                }
                Err(rejected) => leaf = rejected,
            }
        }
        if internal.children.len() == RRB_WIDTH {
            return Err(leaf);
        }
        let node = if level == 1 {
            Node::Leaf(leaf)
        } else {
            Node::new_path(level - 1, leaf)
        };
        internal.children.push_front(SharedPointer::new(node));
        if let Sizes::Relaxed(table) = &mut internal.sizes {
            table.push_child(Side::Front, leaf_len);
        }
        Ok(())
    }

    /// Relaxes every node along the leftmost branch of the subtree so that
    /// it no longer depends on the phantom offset for indexing.
    pub fn relax_left_spine(&mut self, level: usize, offset: usize) {
        if offset == 0 {
            return;
        }
        let internal = self.internal_mut();
        let sub_offset = offset & (child_capacity(level) - 1);
        if sub_offset > 0 && level > 1 {
            SharedPointer::make_mut(&mut internal.children[0]).relax_left_spine(level - 1, sub_offset);
        }
        internal.relax(level);
    }

    /// Splits the subtree after its first `keep` elements. Returns what is
    /// left of the subtree along with the boundary leaf's kept elements,
    /// which always leave the tree so the caller can use them as a suffix
    /// buffer. The subtree must not be addressed through a phantom offset.
    pub fn slice_right(&self, level: usize, keep: usize) -> (Option<NodeRc<A, P>>, Buffer<A>) {
        debug_assert!(keep >= 1);
        match self {
            Node::Leaf(items) => {
                debug_assert!(keep <= items.len());
                (None, items[..keep].iter().cloned().collect())
            }
            Node::Internal(internal) => {
                let (pos, sub_idx, _) = internal
                    .position_info_for(level, keep - 1, 0)
                    .expect("slice position out of bounds");
                let (kept_child, suffix) = internal.children[pos].slice_right(level - 1, sub_idx + 1);
                let mut children: ChildBuffer<A, P> =
                    internal.children[..pos].iter().cloned().collect();
                if let Some(child) = kept_child {
                    children.push_back(child);
                }
                if children.is_empty() {
                    (None, suffix)
                } else {
                    let node = Node::Internal(Internal::from_children(children, level));
                    (Some(SharedPointer::new(node)), suffix)
                }
            }
        }
    }

    /// Drops the first `drop` elements of the subtree. Returns what is left
    /// of the subtree along with the boundary leaf's kept elements, which
    /// always leave the tree so the caller can use them as a prefix buffer.
    /// The subtree must not be addressed through a phantom offset.
    pub fn slice_left(&self, level: usize, drop: usize) -> (Option<NodeRc<A, P>>, Buffer<A>) {
        match self {
            Node::Leaf(items) => {
                debug_assert!(drop < items.len());
                (None, items[drop..].iter().cloned().collect())
            }
            Node::Internal(internal) => {
                let (pos, sub_idx, _) = internal
                    .position_info_for(level, drop, 0)
                    .expect("slice position out of bounds");
                let (kept_child, prefix) = internal.children[pos].slice_left(level - 1, sub_idx);
                let mut children: ChildBuffer<A, P> = Chunk::new();
                if let Some(child) = kept_child {
                    children.push_back(child);
                }
                children.extend(internal.children[pos + 1..].iter().cloned());
                if children.is_empty() {
                    (None, prefix)
                } else {
                    let node = Node::Internal(Internal::from_children(children, level));
                    (Some(SharedPointer::new(node)), prefix)
                }
            }
        }
    }

    /// Concatenates two subtrees. The result sits one level above the taller
    /// input and holds one or two children; the caller unwraps single-child
    /// results. Neither subtree may be addressed through a phantom offset.
    pub fn concat_sub_tree(
        left: &NodeRc<A, P>,
        left_level: usize,
        right: &NodeRc<A, P>,
        right_level: usize,
    ) -> Node<A, P> {
        if left_level > right_level {
            let left_internal = left.internal_ref();
            let middle = Node::concat_sub_tree(
                left_internal.children.last().unwrap(),
                left_level - 1,
                right,
                right_level,
            );
            Node::rebalance(Some(left_internal), middle, None, left_level)
        } else if right_level > left_level {
            let right_internal = right.internal_ref();
            let middle = Node::concat_sub_tree(
                left,
                left_level,
                right_internal.children.first().unwrap(),
                right_level - 1,
            );
            Node::rebalance(None, middle, Some(right_internal), right_level)
        } else if left_level == 0 {
            let left_items = left.leaf_ref();
            let right_items = right.leaf_ref();
            let mut children: ChildBuffer<A, P> = Chunk::new();
            if left_items.len() + right_items.len() <= RRB_WIDTH {
                let mut merged = left_items.clone();
                merged.extend(right_items.iter().cloned());
                children.push_back(SharedPointer::new(Node::Leaf(merged)));
            } else {
                children.push_back(left.clone());
                children.push_back(right.clone());
            }
            Node::Internal(Internal::from_children(children, 1))
        } else {
            let left_internal = left.internal_ref();
            let right_internal = right.internal_ref();
            let middle = Node::concat_sub_tree(
                left_internal.children.last().unwrap(),
                left_level - 1,
                right_internal.children.first().unwrap(),
                right_level - 1,
            );
            Node::rebalance(Some(left_internal), middle, Some(right_internal), left_level)
        }
    }

    /// Merges the children of two nodes around a freshly concatenated middle
    /// and redistributes them so that no level wastes more than [`E_MAX`]
    /// slots. `left` loses its last child and `right` its first; both were
    /// consumed by the middle.
    fn rebalance(
        left: Option<&Internal<A, P>>,
        middle: Node<A, P>,
        right: Option<&Internal<A, P>>,
        level: usize,
    ) -> Node<A, P> {
        let middle = match middle {
            Node::Internal(internal) => internal,
            Node::Leaf(_) => unreachable!("concatenation produced a bare leaf"),
        };
        let mut all: Vec<NodeRc<A, P>> = Vec::new();
        if let Some(left) = left {
            all.extend(left.children[..left.children.len() - 1].iter().cloned());
        }
        all.extend(middle.children.iter().cloned());
        if let Some(right) = right {
            all.extend(right.children[1..].iter().cloned());
        }
        let counts: Vec<usize> = all.iter().map(|node| node.slots()).collect();
        let plan = concat_plan(counts);
        let balanced = Node::execute_concat_plan(&all, &plan, level - 1);
        let mut parents: ChildBuffer<A, P> = Chunk::new();
        for group in balanced.chunks(RRB_WIDTH) {
            let children: ChildBuffer<A, P> = group.iter().cloned().collect();
            parents.push_back(SharedPointer::new(Node::Internal(Internal::from_children(
                children, level,
            ))));
        }
        Node::Internal(Internal::from_children(parents, level + 1))
    }

    /// Builds the nodes a rebalancing plan calls for. Nodes whose planned
    /// slot count matches their current one are reused without copying.
    fn execute_concat_plan(
        all: &[NodeRc<A, P>],
        plan: &[usize],
        node_level: usize,
    ) -> Vec<NodeRc<A, P>> {
        let mut balanced = Vec::with_capacity(plan.len());
        let mut source = 0;
        let mut consumed = 0;
        for &want in plan {
            if consumed == 0 && all[source].slots() == want {
                balanced.push(all[source].clone());
                source += 1;
                continue;
            }
            if node_level == 0 {
                let mut items: Buffer<A> = Chunk::new();
                while items.len() < want {
                    let leaf = all[source].leaf_ref();
                    let take = (want - items.len()).min(leaf.len() - consumed);
                    items.extend(leaf[consumed..consumed + take].iter().cloned());
                    consumed += take;
                    if consumed == leaf.len() {
                        source += 1;
                        consumed = 0;
                    }
                }
                balanced.push(SharedPointer::new(Node::Leaf(items)));
            } else {
                let mut children: ChildBuffer<A, P> = Chunk::new();
                while children.len() < want {
                    let source_children = &all[source].internal_ref().children;
                    let take = (want - children.len()).min(source_children.len() - consumed);
                    children.extend(source_children[consumed..consumed + take].iter().cloned());
                    consumed += take;
                    if consumed == source_children.len() {
                        source += 1;
                        consumed = 0;
                    }
                }
                balanced.push(SharedPointer::new(Node::Internal(Internal::from_children(
                    children, node_level,
                ))));
            }
        }
        debug_assert_eq!(source, all.len());
        debug_assert_eq!(consumed, 0);
        balanced
    }

    /// Walks the subtree checking every structural invariant and returns the
    /// subtree's element count. Panics on the first violation.
    pub fn check_invariants(&self, level: usize, offset: usize) -> usize {
        match self {
            Node::Leaf(items) => {
                assert_eq!(level, 0);
                assert_eq!(offset, 0);
                assert!(!items.is_empty());
                items.len()
            }
            Node::Internal(internal) => {
                assert!(level >= 1);
                assert!(!internal.children.is_empty());
                match &internal.sizes {
                    Sizes::Relaxed(table) => {
                        assert_eq!(offset, 0);
                        assert_eq!(table.len(), internal.children.len());
                        let mut total = 0;
                        for (pos, child) in internal.children.iter().enumerate() {
                            let size = child.check_invariants(level - 1, 0);
                            assert_eq!(table.get_child_size(pos), Some(size));
                            total += size;
                        }
                        total
                    }
                    Sizes::Dense => {
                        let cap = child_capacity(level);
                        let first = offset >> (WIDTH_BITS * level);
                        assert!(first + internal.children.len() <= RRB_WIDTH);
                        let mut total = 0;
                        for (pos, child) in internal.children.iter().enumerate() {
                            let child_offset = if pos == 0 { offset & (cap - 1) } else { 0 };
                            let size = child.check_invariants(level - 1, child_offset);
                            if pos + 1 < internal.children.len() {
                                assert_eq!(size + child_offset, cap);
                            }
                            total += size;
                        }
                        total
                    }
                }
            }
        }
    }
}

/// Plans how many slots each node of a rebalanced level should hold. Nodes
/// that are already nearly full keep their slots; under-full nodes are
/// poured into their right neighbours, removing one node per pass, until the
/// level wastes no more than [`E_MAX`] slots.
pub(crate) fn concat_plan(mut counts: Vec<usize>) -> Vec<usize> {
    let total: usize = counts.iter().sum();
    let optimal = (total + RRB_WIDTH - 1) / RRB_WIDTH;
    let mut i = 0;
    while counts.len() > optimal + E_MAX {
        while counts[i] > RRB_WIDTH - E_MAX / 2 {
            i += 1;
        }
        let mut remaining = counts[i];
        let mut j = i;
        while remaining > 0 {
            debug_assert!(j + 1 < counts.len());
            let merged = (remaining + counts[j + 1]).min(RRB_WIDTH);
            remaining = remaining + counts[j + 1] - merged;
            counts[j] = merged;
            j += 1;
        }
        counts.remove(j);
        i = i.saturating_sub(1);
    }
    counts
}
