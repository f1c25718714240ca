use ndarray::{ArrayBase, Data, Ix1};

use linfa::Float;

/// The predicate of an internal node
///
/// Continuous columns compare against a threshold, categorical columns test membership in the
/// set of labels routed to the left child. Values not seen during training fall to the right.
#[derive(Debug, Clone, PartialEq)]
pub enum SplitRule<F> {
    /// Observations with `value < threshold` go left
    Threshold(F),
    /// Observations whose label is one of these go left, sorted ascending
    Categories(Vec<F>),
}

impl<F: Float> SplitRule<F> {
    /// Returns true if an observation with feature value `value` is routed to the left child
    pub fn goes_left(&self, value: F) -> bool {
        match self {
            SplitRule::Threshold(threshold) => value < *threshold,
            SplitRule::Categories(labels) => labels.iter().any(|label| *label == value),
        }
    }

    pub fn is_categorical(&self) -> bool {
        matches!(self, SplitRule::Categories(_))
    }
}

/// A node in an honest tree
///
/// Leaves carry statistics of the averaging rows which reached them; internal nodes exclusively
/// own both of their children.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeNode<F> {
    Leaf {
        /// Mean outcome of the averaging rows in this leaf
        prediction: F,
        /// Number of averaging rows in this leaf
        n_samples: usize,
        /// Population variance of the outcome of those rows
        variance: F,
        depth: usize,
    },
    Split {
        feature_idx: usize,
        rule: SplitRule<F>,
        /// Decrease of the splitting rows' sum of squared errors
        impurity_decrease: F,
        left: Box<TreeNode<F>>,
        right: Box<TreeNode<F>>,
        depth: usize,
    },
}

impl<F: Float> TreeNode<F> {
    /// Returns true if the node has no children
    pub fn is_leaf(&self) -> bool {
        matches!(self, TreeNode::Leaf { .. })
    }

    /// Returns the depth of the node in the tree
    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { depth, .. } | TreeNode::Split { depth, .. } => *depth,
        }
    }

    /// Returns `Some(prediction)` for leaf nodes and `None` for internal nodes.
    pub fn prediction(&self) -> Option<F> {
        match self {
            TreeNode::Leaf { prediction, .. } => Some(*prediction),
            TreeNode::Split { .. } => None,
        }
    }

    /// Returns the number of averaging rows for leaf nodes
    pub fn n_samples(&self) -> Option<usize> {
        match self {
            TreeNode::Leaf { n_samples, .. } => Some(*n_samples),
            TreeNode::Split { .. } => None,
        }
    }

    /// Returns both children, first left then right. Empty for leaves.
    pub fn children(&self) -> Vec<&TreeNode<F>> {
        match self {
            TreeNode::Leaf { .. } => Vec::new(),
            TreeNode::Split { left, right, .. } => vec![left.as_ref(), right.as_ref()],
        }
    }

    /// Return the split column and predicate if the node is internal
    pub fn split(&self) -> Option<(usize, &SplitRule<F>)> {
        match self {
            TreeNode::Leaf { .. } => None,
            TreeNode::Split {
                feature_idx, rule, ..
            } => Some((*feature_idx, rule)),
        }
    }

    /// Follows the path of `row` from this node down to a leaf and returns its prediction
    ///
    /// ### Panics
    ///
    /// If `row` has fewer columns than a split on the path refers to
    pub fn evaluate(&self, row: &ArrayBase<impl Data<Elem = F>, Ix1>) -> F {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { prediction, .. } => return *prediction,
                TreeNode::Split {
                    feature_idx,
                    rule,
                    left,
                    right,
                    ..
                } => {
                    node = if rule.goes_left(row[*feature_idx]) {
                        left.as_ref()
                    } else {
                        right.as_ref()
                    };
                }
            }
        }
    }
}
