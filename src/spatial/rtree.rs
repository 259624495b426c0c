//! Arena-backed R-tree over opaque items.
//!
//! Nodes live in a single `Vec` and refer to each other by [`NodeId`]. A split
//! never moves a node; it only rewrites child lists, so reparenting a fresh
//! sibling into an ancestor is a plain index push.
//!
//! Insertion follows the classic choose-subtree descent (least enlargement,
//! then least area) and splits overflowing nodes with the R*-tree axis and
//! index heuristics (minimum total margin, then minimum overlap, then minimum
//! area).

use crate::config::Envelope;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Default maximum number of children per node.
pub const DEFAULT_MAX_ENTRIES: usize = 9;

/// Smallest accepted `max_entries`; lower values are raised to this.
const MIN_MAX_ENTRIES: usize = 4;

/// Index of a node inside the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) struct NodeId(usize);

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Slot<T> {
    /// A stored item; only ever appears as a child of a leaf-level node.
    Item(T),
    /// A tree node. `leaf` is set when the children are items.
    Branch { leaf: bool, children: Vec<NodeId> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node<T> {
    envelope: Envelope,
    /// Distance to the leaf level: 1 for leaf-level nodes, 0 for items.
    height: u16,
    slot: Slot<T>,
}

impl<T> Node<T> {
    fn branch(height: u16, leaf: bool, children: Vec<NodeId>, envelope: Envelope) -> Self {
        Self {
            envelope,
            height,
            slot: Slot::Branch { leaf, children },
        }
    }

    fn is_leaf(&self) -> bool {
        matches!(self.slot, Slot::Branch { leaf: true, .. })
    }

    fn children(&self) -> &[NodeId] {
        match &self.slot {
            Slot::Branch { children, .. } => children,
            Slot::Item(_) => &[],
        }
    }

    fn item(&self) -> Option<&T> {
        match &self.slot {
            Slot::Item(item) => Some(item),
            Slot::Branch { .. } => None,
        }
    }
}

/// Height-balanced R-tree mapping bounding envelopes to items.
///
/// # Example
///
/// ```rust
/// use osm_index::{Envelope, RTree};
///
/// let mut tree = RTree::new();
/// tree.insert("museum", Envelope::new(13.39, 52.51, 13.40, 52.52));
/// tree.insert("harbour", Envelope::new(9.96, 53.54, 9.99, 53.55));
///
/// let hits = tree.search(&Envelope::new(13.0, 52.0, 14.0, 53.0));
/// assert_eq!(hits, vec![&"museum"]);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RTree<T> {
    nodes: Vec<Node<T>>,
    root: NodeId,
    max_entries: usize,
    min_entries: usize,
    len: usize,
}

impl<T> RTree<T> {
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_MAX_ENTRIES)
    }

    /// Create a tree whose nodes hold at most `max_entries` children.
    ///
    /// `max_entries` is raised to 4 if smaller. The minimum fill is
    /// `max(2, ceil(0.4 * max_entries))`.
    pub fn with_max_entries(max_entries: usize) -> Self {
        let max_entries = max_entries.max(MIN_MAX_ENTRIES);
        let min_entries = ((max_entries as f64 * 0.4).ceil() as usize).max(2);

        let mut tree = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            max_entries,
            min_entries,
            len: 0,
        };
        tree.clear();
        tree
    }

    /// Drop every item and reset to an empty leaf root of height 1.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = self.push(Node::branch(1, true, Vec::new(), Envelope::empty()));
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of node levels above the items; an empty tree has height 1.
    pub fn height(&self) -> u16 {
        self.node(self.root).height
    }

    /// Bounding envelope of everything in the tree.
    pub fn envelope(&self) -> Envelope {
        self.node(self.root).envelope
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn min_entries(&self) -> usize {
        self.min_entries
    }

    /// Iterate over every stored item in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.nodes.iter().filter_map(Node::item)
    }

    /// Insert `item` covering `bounds`.
    pub fn insert(&mut self, item: T, bounds: Envelope) {
        let id = self.push(Node {
            envelope: bounds,
            height: 0,
            slot: Slot::Item(item),
        });
        let level = usize::from(self.height()) - 1;
        self.insert_node(id, level);
        self.len += 1;
    }

    /// Return every item whose envelope intersects `query`.
    ///
    /// Subtrees fully covered by `query` are collected without further tests.
    pub fn search(&self, query: &Envelope) -> Vec<&T> {
        let mut results = Vec::new();

        if query.min_x.is_nan()
            || query.min_y.is_nan()
            || query.max_x.is_nan()
            || query.max_y.is_nan()
        {
            log::warn!("Rejecting envelope search with NaN coordinates");
            return results;
        }

        if !query.intersects(&self.node(self.root).envelope) {
            return results;
        }

        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            for &child_id in node.children() {
                let child = self.node(child_id);
                if !query.intersects(&child.envelope) {
                    continue;
                }

                if node.is_leaf() {
                    results.extend(child.item());
                } else if query.contains(&child.envelope) {
                    self.collect(child_id, &mut results);
                } else {
                    stack.push(child_id);
                }
            }
        }

        results
    }

    fn collect<'a>(&'a self, id: NodeId, results: &mut Vec<&'a T>) {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            if node.is_leaf() {
                results.extend(node.children().iter().filter_map(|&c| self.node(c).item()));
            } else {
                stack.extend_from_slice(node.children());
            }
        }
    }

    fn insert_node(&mut self, id: NodeId, level: usize) {
        let envelope = self.node(id).envelope;
        let mut path: SmallVec<[NodeId; 8]> = SmallVec::new();

        let target = self.choose_subtree(&envelope, level, &mut path);
        self.children_mut(target).push(id);
        self.node_mut(target).envelope.extend(&envelope);

        // Split overflowing nodes, walking up the insertion path.
        let mut depth = Some(path.len() - 1);
        while let Some(d) = depth {
            if self.node(path[d]).children().len() <= self.max_entries {
                break;
            }
            self.split(&path, d);
            depth = d.checked_sub(1);
        }

        // Nodes above the last split still have stale bounds.
        if let Some(d) = depth {
            for &ancestor in &path[..=d] {
                self.node_mut(ancestor).envelope.extend(&envelope);
            }
        }
    }

    fn choose_subtree(
        &self,
        envelope: &Envelope,
        level: usize,
        path: &mut SmallVec<[NodeId; 8]>,
    ) -> NodeId {
        let mut id = self.root;
        loop {
            path.push(id);
            let node = self.node(id);
            if node.is_leaf() || path.len() - 1 == level {
                return id;
            }

            let mut min_area = f64::MAX;
            let mut min_enlargement = f64::MAX;
            let mut target = None;

            for &child_id in node.children() {
                let child = &self.node(child_id).envelope;
                let area = child.area();
                let enlargement = Envelope::combined_area(envelope, child) - area;

                if enlargement < min_enlargement {
                    min_enlargement = enlargement;
                    min_area = area;
                    target = Some(child_id);
                } else if (enlargement - min_enlargement).abs() < f64::EPSILON && area < min_area {
                    min_area = area;
                    target = Some(child_id);
                }
            }

            debug_assert!(target.is_some(), "no subtree chosen during descent");
            // Non-leaf nodes always hold at least `min_entries` children.
            id = target.unwrap_or(node.children()[0]);
        }
    }

    /// Split the overflowing node at `path[depth]` into itself and a new sibling.
    fn split(&mut self, path: &[NodeId], depth: usize) {
        let id = path[depth];
        let mut children = std::mem::take(self.children_mut(id));

        self.choose_split_axis(&mut children);
        let index = self.choose_split_index(&children);
        let sibling_children = children.split_off(index);

        let node_envelope = self.bounds_of(&children);
        let sibling_envelope = self.bounds_of(&sibling_children);
        let (height, leaf) = {
            let node = self.node(id);
            (node.height, node.is_leaf())
        };

        *self.children_mut(id) = children;
        self.node_mut(id).envelope = node_envelope;
        let sibling = self.push(Node::branch(height, leaf, sibling_children, sibling_envelope));

        log::trace!("split node {:?} at index {} (height {})", id, index, height);

        if depth > 0 {
            self.children_mut(path[depth - 1]).push(sibling);
        } else {
            self.split_root(id, sibling);
        }
    }

    fn split_root(&mut self, node: NodeId, sibling: NodeId) {
        let height = self.node(node).height + 1;
        let children = vec![node, sibling];
        let envelope = self.bounds_of(&children);
        self.root = self.push(Node::branch(height, false, children, envelope));

        log::debug!("root split, tree height is now {}", height);
    }

    /// Leave `children` sorted along the axis with the smaller total margin.
    fn choose_split_axis(&self, children: &mut [NodeId]) {
        let x_margin = self.all_dist_margin(children, |e| e.min_x);
        let y_margin = self.all_dist_margin(children, |e| e.min_y);

        // Already sorted by min_y from the second pass.
        if x_margin < y_margin {
            self.sort_by_axis(children, |e| e.min_x);
        }
    }

    /// Sum of margins over every split distribution along one axis.
    fn all_dist_margin(&self, children: &mut [NodeId], axis: fn(&Envelope) -> f64) -> f64 {
        self.sort_by_axis(children, axis);

        let m = self.min_entries;
        let total = children.len();
        let mut left = self.bounds_of(&children[..m]);
        let mut right = self.bounds_of(&children[total - m..]);
        let mut margin = left.margin() + right.margin();

        for &child in &children[m..total - m] {
            left.extend(&self.node(child).envelope);
            margin += left.margin();
        }

        for &child in children[m..total - m].iter().rev() {
            right.extend(&self.node(child).envelope);
            margin += right.margin();
        }

        margin
    }

    fn choose_split_index(&self, children: &[NodeId]) -> usize {
        let m = self.min_entries;
        let total = children.len();

        let mut min_overlap = f64::MAX;
        let mut min_area = f64::MAX;
        let mut index = m;

        for i in m..=total - m {
            let left = self.bounds_of(&children[..i]);
            let right = self.bounds_of(&children[i..]);

            let overlap = Envelope::intersection_area(&left, &right);
            let area = left.area() + right.area();

            if overlap < min_overlap {
                min_overlap = overlap;
                min_area = area;
                index = i;
            } else if (overlap - min_overlap).abs() < f64::EPSILON && area < min_area {
                min_area = area;
                index = i;
            }
        }

        index
    }

    fn sort_by_axis(&self, children: &mut [NodeId], axis: fn(&Envelope) -> f64) {
        children.sort_by(|a, b| {
            axis(&self.node(*a).envelope).total_cmp(&axis(&self.node(*b).envelope))
        });
    }

    fn bounds_of(&self, ids: &[NodeId]) -> Envelope {
        let mut envelope = Envelope::empty();
        for &id in ids {
            envelope.extend(&self.node(id).envelope);
        }
        envelope
    }

    fn push(&mut self, node: Node<T>) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    fn node(&self, id: NodeId) -> &Node<T> {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<T> {
        &mut self.nodes[id.0]
    }

    fn children_mut(&mut self, id: NodeId) -> &mut Vec<NodeId> {
        match &mut self.node_mut(id).slot {
            Slot::Branch { children, .. } => children,
            Slot::Item(_) => unreachable!("items have no children"),
        }
    }

    /// Structural sanity check used after loading a persisted tree.
    ///
    /// Every node must be reachable from the root exactly once, items must
    /// sit directly under leaf-level nodes, and each child must be one level
    /// below its parent.
    pub(crate) fn is_well_formed(&self) -> bool {
        let Some(root) = self.nodes.get(self.root.0) else {
            return false;
        };
        if root.height == 0 || root.item().is_some() {
            return false;
        }

        let mut seen = vec![false; self.nodes.len()];
        seen[self.root.0] = true;
        let mut visited = 1;
        let mut items = 0;
        let mut stack = vec![self.root];

        while let Some(id) = stack.pop() {
            let node = self.node(id);
            let leaf = node.is_leaf();
            if leaf != (node.height == 1) {
                return false;
            }

            for &child in node.children() {
                let Some(child_node) = self.nodes.get(child.0) else {
                    return false;
                };
                if seen[child.0] || child_node.height + 1 != node.height {
                    return false;
                }
                seen[child.0] = true;
                visited += 1;

                match child_node.slot {
                    Slot::Item(_) if leaf => items += 1,
                    Slot::Branch { .. } if !leaf => stack.push(child),
                    _ => return false,
                }
            }
        }

        visited == self.nodes.len() && items == self.len
    }
}

impl<T> Default for RTree<T> {
    fn default() -> Self {
        Self::new()
    }
}
