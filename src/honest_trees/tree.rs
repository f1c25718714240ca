//! Honest regression trees
//!
use ndarray::{Array1, ArrayBase, Data, Ix1, Ix2};
use rand::{
    seq::{index::sample, SliceRandom},
    Rng,
};
use tracing::trace;

use linfa::{traits::PredictInplace, Float};

use super::splitter::{Moments, Splitter};
use super::{NodeIter, TreeNode};
use crate::{
    error::{Error, Result},
    DataFrame,
};

/// Per-tree growth settings, resolved against the shape of the training data
#[derive(Debug, Clone, Copy)]
pub(crate) struct GrowthSettings {
    pub mtry: usize,
    pub nodesize_spl: usize,
    pub nodesize_avg: usize,
    pub splitratio: f64,
}

/// A fitted honest regression tree.
///
/// ### Structure
/// The rows drawn for the tree are deduplicated and partitioned once into a splitting subset and
/// an averaging subset. Split selection only ever looks at the splitting rows; leaf values are
/// the mean outcome of the averaging rows that reach the leaf. When the averaging subset is
/// empty (`splitratio = 1`) the tree is not honest and the splitting rows estimate the leaves.
///
/// ### Algorithm
///
/// Starting with both subsets at the root, every node is treated as follows:
///
/// * Emit a leaf if there are fewer than `nodesize_spl` splitting or `nodesize_avg` averaging rows;
/// * Draw `mtry` distinct candidate columns;
/// * Find the admissible split with the smallest sum of squared errors of the splitting rows in
///   both children, see [`SplitRule`](enum.SplitRule.html) for the predicates;
/// * Emit a leaf if no split strictly improves on the node, otherwise route both subsets through
///   the split and recurse on each child.
#[derive(Debug, Clone, PartialEq)]
pub struct HonestTree<F> {
    root_node: TreeNode<F>,
    splitting_indices: Vec<usize>,
    averaging_indices: Vec<usize>,
    seed: u64,
    num_features: usize,
}

/// Mutable state of a single growth task
struct Grower<'a, F, R> {
    data: &'a DataFrame<F>,
    splitter: Splitter<'a, F>,
    settings: GrowthSettings,
    rng: &'a mut R,
}

/// Creates a leaf estimated from `rows`
fn leaf_from_rows<F: Float>(
    data: &DataFrame<F>,
    rows: &[usize],
    depth: usize,
) -> Result<TreeNode<F>> {
    if rows.is_empty() {
        return Err(Error::InvariantViolation(format!(
            "leaf at depth {} has no rows to estimate its value",
            depth
        )));
    }
    let moments = Moments::of_rows(data, rows);
    let prediction = moments.mean();
    let variance = moments.sse() / F::cast(moments.n);

    Ok(TreeNode::Leaf {
        prediction,
        n_samples: moments.n,
        variance,
        depth,
    })
}

/// Rebuilds `node` with the same splits and leaves re-estimated from `rows`
fn refit_node<F: Float>(
    node: &TreeNode<F>,
    data: &DataFrame<F>,
    rows: Vec<usize>,
) -> Result<TreeNode<F>> {
    match node {
        TreeNode::Leaf { depth, .. } => leaf_from_rows(data, &rows, *depth),
        TreeNode::Split {
            feature_idx,
            rule,
            impurity_decrease,
            left,
            right,
            depth,
        } => {
            let (rows_left, rows_right): (Vec<usize>, Vec<usize>) = rows
                .into_iter()
                .partition(|&row| rule.goes_left(data.value(row, *feature_idx)));

            Ok(TreeNode::Split {
                feature_idx: *feature_idx,
                rule: rule.clone(),
                impurity_decrease: *impurity_decrease,
                left: Box::new(refit_node(left, data, rows_left)?),
                right: Box::new(refit_node(right, data, rows_right)?),
                depth: *depth,
            })
        }
    }
}

impl<'a, F: Float, R: Rng> Grower<'a, F, R> {
    /// Recursively grows the subtree for a pair of row subsets
    fn grow(
        &mut self,
        splitting: Vec<usize>,
        averaging: Vec<usize>,
        depth: usize,
    ) -> Result<TreeNode<F>> {
        if splitting.len() < self.settings.nodesize_spl
            || averaging.len() < self.settings.nodesize_avg
        {
            return leaf_from_rows(self.data, &averaging, depth);
        }

        let mut features =
            sample(&mut *self.rng, self.data.ncols(), self.settings.mtry).into_vec();
        features.sort_unstable();

        let best = match self.splitter.best_split(&splitting, &averaging, &features) {
            Some(best) => best,
            None => return leaf_from_rows(self.data, &averaging, depth),
        };

        let parent = Moments::of_rows(self.data, &splitting);
        let impurity_decrease = parent.sse() - best.score;
        // differences below the rounding error of the running sums are no improvement
        let tolerance = F::epsilon() * F::cast(splitting.len()) * parent.sse();
        if impurity_decrease <= tolerance {
            return leaf_from_rows(self.data, &averaging, depth);
        }

        let data = self.data;
        let feature_idx = best.feature_idx;
        let rule = best.rule;
        let (splitting_left, splitting_right): (Vec<usize>, Vec<usize>) = splitting
            .into_iter()
            .partition(|&row| rule.goes_left(data.value(row, feature_idx)));
        let (averaging_left, averaging_right): (Vec<usize>, Vec<usize>) = averaging
            .into_iter()
            .partition(|&row| rule.goes_left(data.value(row, feature_idx)));

        if splitting_left.is_empty()
            || splitting_right.is_empty()
            || averaging_left.is_empty()
            || averaging_right.is_empty()
        {
            return Err(Error::InvariantViolation(format!(
                "split on column {} at depth {} routed ({}, {}) splitting and ({}, {}) averaging rows",
                feature_idx,
                depth,
                splitting_left.len(),
                splitting_right.len(),
                averaging_left.len(),
                averaging_right.len()
            )));
        }

        let left = self.grow(splitting_left, averaging_left, depth + 1)?;
        let right = self.grow(splitting_right, averaging_right, depth + 1)?;

        Ok(TreeNode::Split {
            feature_idx,
            rule,
            impurity_decrease,
            left: Box::new(left),
            right: Box::new(right),
            depth,
        })
    }
}

/// Deduplicates a bootstrap draw and partitions it into splitting and averaging rows
///
/// The first `floor(splitratio * n)` rows of a shuffle of the distinct rows become the
/// splitting subset, the rest the averaging subset. Both are returned sorted.
pub(crate) fn honest_partition(
    draw: &[usize],
    splitratio: f64,
    rng: &mut impl Rng,
) -> (Vec<usize>, Vec<usize>) {
    let mut rows = draw.to_vec();
    rows.sort_unstable();
    rows.dedup();
    rows.shuffle(rng);

    let n_splitting = ((rows.len() as f64) * splitratio).floor() as usize;
    let mut averaging = rows.split_off(n_splitting.min(rows.len()));
    let mut splitting = rows;

    splitting.sort_unstable();
    averaging.sort_unstable();

    (splitting, averaging)
}

impl<F: Float> HonestTree<F> {
    /// Grows a tree from the rows drawn for it
    ///
    /// `rng` must be the tree's private generator; it drives the honest partition and the
    /// candidate columns of every node.
    pub(crate) fn grow(
        data: &DataFrame<F>,
        draw: &[usize],
        settings: GrowthSettings,
        seed: u64,
        rng: &mut impl Rng,
    ) -> Result<Self> {
        if draw.is_empty() {
            return Err(Error::NotEnoughSamples);
        }

        let (splitting_indices, averaging_indices) =
            honest_partition(draw, settings.splitratio, rng);

        // without averaging rows the splitting rows estimate the leaves
        let estimation = if averaging_indices.is_empty() {
            splitting_indices.clone()
        } else {
            averaging_indices.clone()
        };

        let mut grower = Grower {
            data,
            splitter: Splitter::new(data, settings.nodesize_spl, settings.nodesize_avg),
            settings,
            rng,
        };
        let root_node = grower.grow(splitting_indices.clone(), estimation, 0)?;

        let tree = HonestTree {
            root_node,
            splitting_indices,
            averaging_indices,
            seed,
            num_features: data.ncols(),
        };

        trace!(
            seed,
            splitting = tree.splitting_indices.len(),
            averaging = tree.averaging_indices.len(),
            leaves = tree.num_leaves(),
            depth = tree.max_depth(),
            "grew honest tree"
        );

        Ok(tree)
    }

    /// Return root node of the tree
    pub fn root_node(&self) -> &TreeNode<F> {
        &self.root_node
    }

    /// Rows used to select the splits, sorted ascending
    pub fn splitting_indices(&self) -> &[usize] {
        &self.splitting_indices
    }

    /// Rows used to estimate the leaf values, sorted ascending
    pub fn averaging_indices(&self) -> &[usize] {
        &self.averaging_indices
    }

    /// Returns false if the leaves were estimated from the splitting rows
    pub fn is_honest(&self) -> bool {
        !self.averaging_indices.is_empty()
    }

    /// Seed of the tree's random generator
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns true if `row` was drawn for this tree
    pub fn contains(&self, row: usize) -> bool {
        self.splitting_indices.binary_search(&row).is_ok()
            || self.averaging_indices.binary_search(&row).is_ok()
    }

    /// Create a node iterator in level-order (BFT)
    pub fn iter_nodes(&self) -> NodeIter<F> {
        NodeIter::new(&self.root_node)
    }

    /// Return max depth of the tree
    pub fn max_depth(&self) -> usize {
        self.iter_nodes()
            .fold(0, |max, node| usize::max(max, node.depth()))
    }

    /// Return the number of leaves in this tree
    pub fn num_leaves(&self) -> usize {
        self.iter_nodes().filter(|node| node.is_leaf()).count()
    }

    /// Predicts the outcome of a single row
    pub fn predict_row(&self, row: &ArrayBase<impl Data<Elem = F>, Ix1>) -> F {
        self.root_node.evaluate(row)
    }

    /// Keeps the splits and re-estimates every leaf from the outcomes of `data`
    ///
    /// Only the rows which estimated the leaves during growth are used, so changing the outcome
    /// of a splitting row of an honest tree leaves the result untouched.
    ///
    /// ### Errors
    ///
    /// Fails if `data` has a different number of columns or too few rows for this tree.
    pub fn refit_leaves(&self, data: &DataFrame<F>) -> Result<Self> {
        if data.ncols() != self.num_features {
            return Err(Error::ShapeMismatch {
                expected: self.num_features,
                actual: data.ncols(),
            });
        }

        let rows = if self.is_honest() {
            self.averaging_indices.clone()
        } else {
            self.splitting_indices.clone()
        };
        if rows.last().map_or(false, |&row| row >= data.nrows()) {
            return Err(Error::Parameters(format!(
                "tree was grown on row {}, but the data frame has {} rows",
                rows[rows.len() - 1],
                data.nrows()
            )));
        }

        Ok(HonestTree {
            root_node: refit_node(&self.root_node, data, rows)?,
            splitting_indices: self.splitting_indices.clone(),
            averaging_indices: self.averaging_indices.clone(),
            seed: self.seed,
            num_features: self.num_features,
        })
    }
}

impl<F: Float, D: Data<Elem = F>> PredictInplace<ArrayBase<D, Ix2>, Array1<F>> for HonestTree<F> {
    /// Make predictions for each row of a matrix of features `x`.
    fn predict_inplace(&self, x: &ArrayBase<D, Ix2>, y: &mut Array1<F>) {
        assert_eq!(
            x.nrows(),
            y.len(),
            "The number of data points must match the number of output targets."
        );
        assert_eq!(
            x.ncols(),
            self.num_features,
            "The number of features must match the training data."
        );

        for (row, target) in x.rows().into_iter().zip(y.iter_mut()) {
            *target = self.predict_row(&row);
        }
    }

    fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array1<F> {
        Array1::zeros(x.nrows())
    }
}
