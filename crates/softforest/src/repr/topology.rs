//! Forest shape and the array-backed perfect binary tree layout.
//!
//! Every tree in the forest is a perfect binary tree of `depth` levels, the
//! last of which holds the leaves. Internal nodes are stored in heap order:
//!
//! ```text
//!             0
//!          /     \
//!         1       2          node k: right child 2k+1 (odd), left child 2k+2 (even)
//!        / \     / \
//!      L0  L1  L2  L3        leaves of pre-leaf node k: 2k+1-n_nodes, 2k+2-n_nodes
//! ```
//!
//! The odd child is reached by routing right (gate `d`), the even child by
//! routing left (gate `1 - d`). Iterating internal nodes in ascending index
//! order always visits a parent before its children, which the forward pass
//! relies on.

use crate::config::ConfigError;

/// Largest supported depth (leaf level included).
pub const MAX_DEPTH: u32 = 30;

// =============================================================================
// Branch
// =============================================================================

/// Which way a sample is routed at an internal node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    /// Odd child, taken with probability `d`.
    Right,
    /// Even child, taken with probability `1 - d`.
    Left,
}

impl Branch {
    /// Probability of taking this branch given the node's routing activation.
    #[inline]
    pub fn gate(self, d: f32) -> f32 {
        match self {
            Branch::Right => d,
            Branch::Left => 1.0 - d,
        }
    }
}

// =============================================================================
// TreeTopology
// =============================================================================

/// Index arithmetic for one perfect binary tree.
///
/// All indices are local to the tree; add the tree's node/leaf offset from
/// [`ForestShape`] to address the flat per-sample buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeTopology {
    depth: u32,
    n_nodes: usize,
    n_leaves: usize,
    first_pre_leaf: usize,
}

impl TreeTopology {
    pub(crate) fn new(depth: u32) -> Self {
        debug_assert!((2..=MAX_DEPTH).contains(&depth));
        let n_leaves = 1usize << (depth - 1);
        Self {
            depth,
            n_nodes: n_leaves - 1,
            n_leaves,
            first_pre_leaf: (1usize << (depth - 2)) - 1,
        }
    }

    /// Depth including the leaf level.
    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Number of internal (routing) nodes.
    #[inline]
    pub fn n_nodes(&self) -> usize {
        self.n_nodes
    }

    /// Number of leaves.
    #[inline]
    pub fn n_leaves(&self) -> usize {
        self.n_leaves
    }

    /// Index of the first internal node whose children are leaves.
    #[inline]
    pub fn first_pre_leaf(&self) -> usize {
        self.first_pre_leaf
    }

    /// Whether both children of `node` are leaves.
    #[inline]
    pub fn is_pre_leaf(&self, node: usize) -> bool {
        node >= self.first_pre_leaf
    }

    /// Child reached by routing right (gate `d`).
    #[inline]
    pub fn right_child(&self, node: usize) -> usize {
        2 * node + 1
    }

    /// Child reached by routing left (gate `1 - d`).
    #[inline]
    pub fn left_child(&self, node: usize) -> usize {
        2 * node + 2
    }

    /// Parent of `node` and the branch that leads from it to `node`.
    ///
    /// Odd nodes hang off `node >> 1` on the right, even nodes off
    /// `(node >> 1) - 1` on the left. The root has no parent.
    #[inline]
    pub fn parent(&self, node: usize) -> Option<(usize, Branch)> {
        match node {
            0 => None,
            k if k % 2 == 1 => Some((k >> 1, Branch::Right)),
            k => Some(((k >> 1) - 1, Branch::Left)),
        }
    }

    /// Leaf indices `(right, left)` below a pre-leaf node.
    #[inline]
    pub fn leaf_pair(&self, node: usize) -> (usize, usize) {
        debug_assert!(self.is_pre_leaf(node) && node < self.n_nodes);
        let right = self.right_child(node) - self.n_nodes;
        (right, right + 1)
    }

    /// Internal nodes in forward (parents first) order.
    #[inline]
    pub fn nodes_top_down(&self) -> std::ops::Range<usize> {
        0..self.n_nodes
    }

    /// Internal nodes in backward (children first) order.
    #[inline]
    pub fn nodes_bottom_up(&self) -> std::iter::Rev<std::ops::Range<usize>> {
        (0..self.n_nodes).rev()
    }
}

// =============================================================================
// ForestShape
// =============================================================================

/// Validated dimensions of a soft decision forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForestShape {
    tree_num: usize,
    num_output: usize,
    topology: TreeTopology,
    node_num_total: usize,
    leaf_num_total: usize,
}

impl ForestShape {
    /// Validate and derive the forest dimensions.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidTreeNum`] if `tree_num == 0`
    /// - [`ConfigError::InvalidDepth`] if `depth < 2` or `depth > MAX_DEPTH`
    /// - [`ConfigError::InvalidNumOutput`] if `num_output == 0`
    /// - [`ConfigError::ShapeOverflow`] if the totals overflow `usize`
    pub fn new(tree_num: usize, depth: u32, num_output: usize) -> Result<Self, ConfigError> {
        if tree_num == 0 {
            return Err(ConfigError::InvalidTreeNum(tree_num));
        }
        if !(2..=MAX_DEPTH).contains(&depth) {
            return Err(ConfigError::InvalidDepth(depth));
        }
        if num_output == 0 {
            return Err(ConfigError::InvalidNumOutput(num_output));
        }

        let topology = TreeTopology::new(depth);
        let overflow = || ConfigError::ShapeOverflow { tree_num, depth };
        let node_num_total = tree_num.checked_mul(topology.n_nodes()).ok_or_else(overflow)?;
        let leaf_num_total = tree_num.checked_mul(topology.n_leaves()).ok_or_else(overflow)?;
        leaf_num_total.checked_mul(num_output).ok_or_else(overflow)?;

        Ok(Self {
            tree_num,
            num_output,
            topology,
            node_num_total,
            leaf_num_total,
        })
    }

    #[inline]
    pub fn tree_num(&self) -> usize {
        self.tree_num
    }

    #[inline]
    pub fn depth(&self) -> u32 {
        self.topology.depth()
    }

    #[inline]
    pub fn num_output(&self) -> usize {
        self.num_output
    }

    #[inline]
    pub fn topology(&self) -> &TreeTopology {
        &self.topology
    }

    #[inline]
    pub fn node_num_per_tree(&self) -> usize {
        self.topology.n_nodes()
    }

    #[inline]
    pub fn leaf_num_per_tree(&self) -> usize {
        self.topology.n_leaves()
    }

    /// Width of a node-indexed sample row (the expected input width).
    #[inline]
    pub fn node_num_total(&self) -> usize {
        self.node_num_total
    }

    /// Width of a leaf-indexed sample row.
    #[inline]
    pub fn leaf_num_total(&self) -> usize {
        self.leaf_num_total
    }

    /// Offset of `tree`'s first node in a node-indexed row.
    #[inline]
    pub fn node_offset(&self, tree: usize) -> usize {
        tree * self.topology.n_nodes()
    }

    /// Offset of `tree`'s first leaf in a leaf-indexed row.
    #[inline]
    pub fn leaf_offset(&self, tree: usize) -> usize {
        tree * self.topology.n_leaves()
    }
}

// =============================================================================
// Tests
// =============================================================================
