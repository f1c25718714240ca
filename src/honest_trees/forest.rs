//! Honest random forest
//!
//! An ensemble of honest trees, each grown on its own bootstrap draw with a private random
//! generator, so that the ensemble only depends on the seed and never on thread scheduling.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use linfa::{
    dataset::{AsSingleTargets, DatasetBase},
    traits::{Fit, PredictInplace},
    Float,
};
use ndarray::{Array1, Array2, ArrayBase, ArrayView2, Data, Ix2, Zip};
use rand::{rngs::StdRng, seq::index::sample, Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, dispatcher, info, instrument, Span};

use super::tree::GrowthSettings;
use super::{HonestForestValidParams, HonestTree};
use crate::{
    error::{Error, Result},
    DataFrame,
};

/// A fitted honest random forest for regression.
///
/// ### Algorithm
///
/// For tree `i` a seed is derived from the global seed and `i`. The tree's generator draws
/// `sampsize` rows (with or without replacement), partitions the distinct rows into splitting
/// and averaging subsets and grows an [honest tree](struct.HonestTree.html) from them. Trees are
/// grown in parallel on up to `nthread` threads and stored in index order.
///
/// ### Predictions
///
/// Every query row is passed through all trees and the leaf values are averaged. Rows are
/// predicted in parallel, each into its own output slot.
///
/// ### Example
///
/// ```rust
/// use linfa::ParamGuard;
/// use linfa_honest::{DataFrame, HonestForest};
/// use ndarray::Array2;
/// use std::sync::Arc;
///
/// let x = Array2::from_shape_fn((100, 2), |(i, j)| ((i * 7 + j * 13) % 100) as f64);
/// let y = x.column(0).to_owned();
/// let data = Arc::new(DataFrame::new(x, y, &[]).unwrap());
///
/// let params = HonestForest::params()
///     .ntree(10)
///     .mtry(Some(2))
///     .splitratio(0.5)
///     .nodesize_spl(5)
///     .nodesize_avg(5)
///     .check()
///     .unwrap();
/// let forest = HonestForest::build(Arc::clone(&data), &params).unwrap();
///
/// let queries = Array2::from_shape_vec((2, 2), vec![10., 50., 90., 50.]).unwrap();
/// let predictions = forest.predict_with_threads(&queries, 2).unwrap();
/// assert!(predictions[0] < predictions[1]);
/// ```
#[derive(Debug, Clone)]
pub struct HonestForest<F: Float> {
    data: Arc<DataFrame<F>>,
    trees: Vec<HonestTree<F>>,
    params: HonestForestValidParams<F>,
}

/// Runs `op` on a dedicated pool of `nthread` threads, or on the global pool if `nthread` is zero
fn install<T, OP>(nthread: usize, op: OP) -> Result<T>
where
    T: Send,
    OP: FnOnce() -> T + Send,
{
    if nthread == 0 {
        return Ok(op());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(nthread)
        .build()?;

    Ok(pool.install(op))
}

/// Draws the rows of one tree
pub(crate) fn bootstrap_sample(
    nrows: usize,
    sampsize: usize,
    replace: bool,
    rng: &mut impl Rng,
) -> Vec<usize> {
    if replace {
        (0..sampsize).map(|_| rng.gen_range(0..nrows)).collect()
    } else {
        sample(rng, nrows, sampsize).into_vec()
    }
}

/// Derives the seeds of the first `ntree` trees from the global seed
///
/// The seed of tree `i` only depends on `seed` and `i`.
pub(crate) fn tree_seeds(seed: u64, ntree: usize) -> Vec<u64> {
    let mut master = StdRng::seed_from_u64(seed);
    (0..ntree).map(|_| master.gen()).collect()
}

impl<F: Float> HonestForest<F> {
    /// Validates the parameters against the data frame and grows all trees
    ///
    /// Either every tree is grown or an error is returned, a failing tree fails the whole
    /// ensemble. Events of the growth tasks are delivered to the caller's subscriber, whichever
    /// thread runs them.
    #[instrument(skip_all, fields(ntree = params.ntree(), nrows = data.nrows(), ncols = data.ncols()))]
    pub fn build(data: Arc<DataFrame<F>>, params: &HonestForestValidParams<F>) -> Result<Self> {
        let (nrows, ncols) = (data.nrows(), data.ncols());
        params.check_shape(nrows, ncols)?;

        if !params.categorical_columns().is_empty() {
            let mut declared = params.categorical_columns().to_vec();
            declared.sort_unstable();
            declared.dedup();
            if declared != data.categorical_columns() {
                return Err(Error::Parameters(format!(
                    "categorical columns {:?} differ from the data frame's {:?}",
                    declared,
                    data.categorical_columns()
                )));
            }
        }

        let settings = GrowthSettings {
            mtry: params.resolved_mtry(ncols),
            nodesize_spl: params.nodesize_spl(),
            nodesize_avg: params.nodesize_avg(),
            splitratio: params.splitratio(),
        };
        let sampsize = params.resolved_sampsize(nrows);
        let replace = params.replace();
        let ntree = params.ntree();
        let verbose = params.verbose();

        if verbose {
            info!(
                ntree,
                sampsize,
                replace,
                mtry = settings.mtry,
                splitratio = settings.splitratio,
                nthread = params.nthread(),
                "growing honest forest"
            );
        } else {
            debug!(ntree, sampsize, mtry = settings.mtry, "growing honest forest");
        }

        let seeds = tree_seeds(params.seed(), ntree);
        let completed = AtomicUsize::new(0);
        let frame: &DataFrame<F> = &data;
        let dispatch = dispatcher::get_default(|current| current.clone());
        let span = Span::current();

        let trees = install(params.nthread(), || {
            seeds
                .par_iter()
                .enumerate()
                .map(|(tree_idx, &seed)| -> Result<HonestTree<F>> {
                    // worker threads do not inherit the caller's subscriber
                    dispatcher::with_default(&dispatch, || {
                        span.in_scope(|| -> Result<HonestTree<F>> {
                            let mut rng = StdRng::seed_from_u64(seed);
                            let draw = bootstrap_sample(nrows, sampsize, replace, &mut rng);
                            let tree = HonestTree::grow(frame, &draw, settings, seed, &mut rng)?;

                            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                            if verbose {
                                info!(
                                    tree_idx,
                                    done,
                                    ntree,
                                    leaves = tree.num_leaves(),
                                    "tree grown"
                                );
                            } else {
                                debug!(tree_idx, done, ntree, "tree grown");
                            }

                            Ok(tree)
                        })
                    })
                })
                .collect::<Result<Vec<_>>>()
        })??;

        if verbose {
            info!(ntree = trees.len(), "honest forest complete");
        }

        Ok(HonestForest {
            data,
            trees,
            params: params.clone(),
        })
    }

    /// The trees of the ensemble, in the order of their seeds
    pub fn trees(&self) -> &[HonestTree<F>] {
        &self.trees
    }

    pub fn ntree(&self) -> usize {
        self.trees.len()
    }

    /// The shared training data
    pub fn data(&self) -> &Arc<DataFrame<F>> {
        &self.data
    }

    /// The checked hyperparameters the forest was grown with
    pub fn valid_params(&self) -> &HonestForestValidParams<F> {
        &self.params
    }

    /// Averages the predictions of all trees for every row of `x` into `y`
    fn predict_into(&self, x: ArrayView2<F>, y: &mut Array1<F>) {
        let ntree = F::cast(self.trees.len());

        Zip::from(y).and(x.rows()).par_for_each(|target, row| {
            let sum = self
                .trees
                .iter()
                .map(|tree| tree.predict_row(&row))
                .sum::<F>();
            *target = sum / ntree;
        });
    }

    /// Predicts every row of `x` on a pool of `nthread` threads, zero uses the global pool
    ///
    /// ### Errors
    ///
    /// Fails if `x` has a different number of columns than the training data or if the
    /// thread pool cannot be created.
    pub fn predict_with_threads(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        nthread: usize,
    ) -> Result<Array1<F>> {
        if x.ncols() != self.data.ncols() {
            return Err(Error::ShapeMismatch {
                expected: self.data.ncols(),
                actual: x.ncols(),
            });
        }

        let x = x.view();
        let mut y = Array1::zeros(x.nrows());
        install(nthread, || self.predict_into(x, &mut y))?;

        Ok(y)
    }

    /// Predicts row-major nested vectors, see [`predict_with_threads`](#method.predict_with_threads)
    pub fn predict_rows(&self, rows: &[Vec<F>], nthread: usize) -> Result<Array1<F>> {
        let ncols = self.data.ncols();
        if let Some(row) = rows.iter().find(|row| row.len() != ncols) {
            return Err(Error::ShapeMismatch {
                expected: ncols,
                actual: row.len(),
            });
        }

        let flat = rows.iter().flatten().copied().collect();
        let x = Array2::from_shape_vec((rows.len(), ncols), flat)?;

        self.predict_with_threads(&x, nthread)
    }

    /// Predicts column-major nested vectors, one inner vector per training column
    ///
    /// ### Errors
    ///
    /// Fails if the number of columns differs from the training data or the columns differ
    /// in length.
    pub fn predict_columns(&self, columns: &[Vec<F>], nthread: usize) -> Result<Array1<F>> {
        let ncols = self.data.ncols();
        if columns.len() != ncols {
            return Err(Error::ShapeMismatch {
                expected: ncols,
                actual: columns.len(),
            });
        }

        let nrows = columns.first().map_or(0, Vec::len);
        if let Some((column, values)) = columns
            .iter()
            .enumerate()
            .find(|(_, values)| values.len() != nrows)
        {
            return Err(Error::Parameters(format!(
                "column {} has {} values, but column 0 has {}",
                column,
                values.len(),
                nrows
            )));
        }

        let flat = columns.iter().flatten().copied().collect();
        let x = Array2::from_shape_vec((ncols, nrows), flat)?.reversed_axes();

        self.predict_with_threads(&x, nthread)
    }

    /// Out-of-bag predictions of the training rows
    ///
    /// Each row is predicted by the trees which did not draw it. Rows drawn by every tree get
    /// `NaN`.
    pub fn oob_predict(&self) -> Array1<F> {
        let mut y = Array1::zeros(self.data.nrows());
        let features = self.data.features();

        Zip::indexed(&mut y)
            .and(features.rows())
            .par_for_each(|row_idx, target, row| {
                let (sum, count) = self
                    .trees
                    .iter()
                    .filter(|tree| !tree.contains(row_idx))
                    .fold((F::zero(), 0usize), |(sum, count), tree| {
                        (sum + tree.predict_row(&row), count + 1)
                    });
                *target = if count == 0 {
                    F::nan()
                } else {
                    sum / F::cast(count)
                };
            });

        y
    }

    /// Mean squared out-of-bag error over the rows with at least one out-of-bag tree
    pub fn oob_error(&self) -> Option<F> {
        let predictions = self.oob_predict();
        let (sum, count) = predictions
            .iter()
            .zip(self.data.outcomes().iter())
            .filter(|(prediction, _)| !prediction.is_nan())
            .fold((F::zero(), 0usize), |(sum, count), (&prediction, &y)| {
                (sum + (prediction - y) * (prediction - y), count + 1)
            });

        if count == 0 {
            None
        } else {
            Some(sum / F::cast(count))
        }
    }
}

impl<F: Float, D: Data<Elem = F>> PredictInplace<ArrayBase<D, Ix2>, Array1<F>>
    for HonestForest<F>
{
    /// Make predictions for each row of a matrix of features `x` on the global thread pool.
    fn predict_inplace(&self, x: &ArrayBase<D, Ix2>, y: &mut Array1<F>) {
        assert_eq!(
            x.nrows(),
            y.len(),
            "The number of data points must match the number of output targets."
        );
        assert_eq!(
            x.ncols(),
            self.data.ncols(),
            "The number of features must match the training data."
        );

        self.predict_into(x.view(), y);
    }

    fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array1<F> {
        Array1::zeros(x.nrows())
    }
}

impl<F: Float, D, T> Fit<ArrayBase<D, Ix2>, T, Error> for HonestForestValidParams<F>
where
    D: Data<Elem = F>,
    T: AsSingleTargets<Elem = F>,
{
    type Object = HonestForest<F>;

    /// Fit an honest forest on the records and single targets of a dataset, treating the
    /// configured categorical columns as labels.
    fn fit(&self, dataset: &DatasetBase<ArrayBase<D, Ix2>, T>) -> Result<Self::Object> {
        let data = DataFrame::from_dataset(dataset, self.categorical_columns())?;
        HonestForest::build(Arc::new(data), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;
    use linfa::{traits::Predict, Dataset, ParamGuard};
    use ndarray::{array, Array2};
    use rand::rngs::SmallRng;

    fn linear_dataset(nrows: usize) -> Dataset<f64, f64, ndarray::Ix1> {
        let x = Array2::from_shape_fn((nrows, 2), |(i, j)| ((i * (3 + j * 4)) % nrows) as f64);
        let y = x.column(0).mapv(|v| 3. * v + 1.);
        Dataset::new(x, y)
    }

    fn linear_frame(nrows: usize) -> Arc<DataFrame<f64>> {
        let dataset = linear_dataset(nrows);
        Arc::new(DataFrame::from_dataset(&dataset, &[]).unwrap())
    }

    #[test]
    fn bootstrap_without_replacement_is_a_permutation() {
        let mut rng = SmallRng::seed_from_u64(42);
        let mut draw = bootstrap_sample(50, 50, false, &mut rng);
        draw.sort_unstable();
        assert_eq!(draw, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn bootstrap_with_replacement_stays_in_range() {
        let mut rng = SmallRng::seed_from_u64(42);
        let draw = bootstrap_sample(10, 100, true, &mut rng);
        assert_eq!(draw.len(), 100);
        assert!(draw.iter().all(|&row| row < 10));
    }

    #[test]
    fn tree_seeds_are_prefix_stable() {
        let short = tree_seeds(7, 3);
        let long = tree_seeds(7, 10);
        assert_eq!(&long[..3], short.as_slice());
        assert_ne!(tree_seeds(8, 3), short);
    }

    #[test]
    fn thread_count_does_not_change_forest() -> Result<()> {
        let data = linear_frame(80);
        let params = HonestForest::params()
            .ntree(16)
            .mtry(Some(2))
            .splitratio(0.6)
            .nodesize_spl(3)
            .nodesize_avg(3)
            .seed(11);

        let single = HonestForest::build(Arc::clone(&data), &params.clone().nthread(1).check()?)?;
        let many = HonestForest::build(Arc::clone(&data), &params.nthread(4).check()?)?;

        assert_eq!(single.trees(), many.trees());

        Ok(())
    }

    #[test]
    fn prediction_is_mean_of_trees() -> Result<()> {
        let forest = HonestForest::params()
            .ntree(5)
            .mtry(Some(1))
            .splitratio(0.5)
            .fit(&linear_dataset(60))?;

        let x = array![[5., 1.], [40., 30.], [59., 2.]];
        let predictions = forest.predict_with_threads(&x, 2)?;
        assert_eq!(predictions, forest.predict(&x));

        for (row, prediction) in x.rows().into_iter().zip(predictions.iter()) {
            let mean = forest
                .trees()
                .iter()
                .map(|tree| tree.predict_row(&row))
                .sum::<f64>()
                / 5.;
            assert_abs_diff_eq!(*prediction, mean, epsilon = 1e-12);
        }

        Ok(())
    }

    #[test]
    fn predict_rejects_wrong_width() -> Result<()> {
        let forest = HonestForest::params().ntree(2).fit(&linear_dataset(30))?;

        let err = forest.predict_with_threads(&array![[1., 2., 3.]], 1);
        assert!(matches!(
            err,
            Err(Error::ShapeMismatch {
                expected: 2,
                actual: 3
            })
        ));

        let err = forest.predict_rows(&[vec![1., 2.], vec![1.]], 1);
        assert!(matches!(err, Err(Error::ShapeMismatch { .. })));

        let err = forest.predict_columns(&[vec![1., 2.]], 1);
        assert!(matches!(
            err,
            Err(Error::ShapeMismatch {
                expected: 2,
                actual: 1
            })
        ));

        let err = forest.predict_columns(&[vec![1., 2.], vec![1.]], 1);
        assert!(matches!(err, Err(Error::Parameters(_))));

        Ok(())
    }

    #[test]
    fn row_and_column_inputs_match_matrix_input() -> Result<()> {
        let forest = HonestForest::params()
            .ntree(4)
            .seed(3)
            .fit(&linear_dataset(40))?;

        let rows = vec![vec![3., 4.], vec![20., 1.], vec![7., 33.]];
        let columns = vec![vec![3., 20., 7.], vec![4., 1., 33.]];
        let from_matrix = forest.predict_with_threads(&array![[3., 4.], [20., 1.], [7., 33.]], 0)?;

        assert_eq!(forest.predict_rows(&rows, 1)?, from_matrix);
        assert_eq!(forest.predict_columns(&columns, 2)?, from_matrix);

        Ok(())
    }

    #[test]
    fn shape_checks_run_before_growth() {
        let dataset = linear_dataset(20);

        let mtry = HonestForest::params().mtry(Some(3)).fit(&dataset);
        assert!(matches!(mtry, Err(Error::Parameters(_))));

        let sampsize = HonestForest::params()
            .replace(false)
            .sampsize(Some(21))
            .fit(&dataset);
        assert!(matches!(sampsize, Err(Error::Parameters(_))));

        let categorical = HonestForest::params()
            .categorical_columns(vec![2])
            .fit(&dataset);
        assert!(matches!(
            categorical,
            Err(Error::InvalidCategoricalColumn { column: 2, ncols: 2 })
        ));
    }

    #[test]
    fn categorical_columns_must_agree_with_frame() -> Result<()> {
        let dataset = linear_dataset(20);
        let frame = Arc::new(DataFrame::from_dataset(&dataset, &[1])?);

        let params = HonestForest::params().ntree(2).categorical_columns(vec![0]);
        let err = HonestForest::build(Arc::clone(&frame), &params.check()?);
        assert!(matches!(err, Err(Error::Parameters(_))));

        let params = HonestForest::params().ntree(2).categorical_columns(vec![1, 1]);
        assert!(HonestForest::build(Arc::clone(&frame), &params.check()?).is_ok());

        // an empty list defers to the frame
        let params = HonestForest::params().ntree(2).check()?;
        let forest = HonestForest::build(frame, &params)?;
        assert_eq!(forest.data().categorical_columns(), vec![1]);

        Ok(())
    }

    #[test]
    fn oob_rows_are_never_drawn() -> Result<()> {
        let dataset = linear_dataset(50);
        let forest = HonestForest::params()
            .ntree(30)
            .sampsize(Some(25))
            .replace(false)
            .splitratio(0.5)
            .mtry(Some(1))
            .nodesize_spl(2)
            .nodesize_avg(2)
            .fit(&dataset)?;

        let oob = forest.oob_predict();
        assert_eq!(oob.len(), 50);
        assert!(oob.iter().all(|v| v.is_finite()));

        let mse = forest.oob_error().unwrap();
        let variance = dataset.targets().var(0.);
        assert!(mse < variance, "oob mse {} vs variance {}", mse, variance);

        Ok(())
    }

    #[test]
    fn full_draw_leaves_no_oob_rows() -> Result<()> {
        let forest = HonestForest::params()
            .ntree(3)
            .replace(false)
            .fit(&linear_dataset(20))?;

        assert!(forest.oob_predict().iter().all(|v| v.is_nan()));
        assert!(forest.oob_error().is_none());

        Ok(())
    }

    #[test]
    fn checked_params_are_kept() -> Result<()> {
        let params = HonestForest::params().ntree(3).seed(5).check()?;
        let forest = params.fit(&linear_dataset(20))?;

        assert_eq!(forest.ntree(), 3);
        assert_eq!(forest.valid_params().seed(), 5);
        assert_eq!(forest.data().nrows(), 20);

        Ok(())
    }
}
