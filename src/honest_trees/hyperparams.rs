use linfa::{Float, ParamGuard};
use std::marker::PhantomData;

use crate::error::{Error, Result};

use super::HonestForest;

/// The set of hyperparameters that can be specified for fitting an
/// [honest forest](struct.HonestForest.html).
///
/// ### Example
///
/// ```rust
/// use linfa::prelude::*;
/// use linfa_honest::HonestForest;
/// use ndarray::{Array1, Array2};
///
/// let x = Array2::from_shape_fn((60, 2), |(i, j)| (i * (j + 1) % 60) as f64);
/// let y = x.column(0).mapv(|v| 2. * v);
/// let dataset = Dataset::new(x.clone(), y);
///
/// // Initialize the default set of parameters and set the ones we care about
/// let params = HonestForest::params()
///     .ntree(20)
///     .mtry(Some(2))
///     .splitratio(0.5)
///     .seed(7);
///
/// let forest = params.fit(&dataset).unwrap();
/// let predictions: Array1<f64> = forest.predict(&x);
/// assert_eq!(predictions.len(), 60);
/// ```
///
#[derive(Clone, Debug, PartialEq)]
pub struct HonestForestValidParams<F> {
    categorical_columns: Vec<usize>,
    ntree: usize,
    replace: bool,
    sampsize: Option<usize>,
    splitratio: f64,
    mtry: Option<usize>,
    nodesize_spl: usize,
    nodesize_avg: usize,
    seed: u64,
    nthread: usize,
    verbose: bool,

    float_marker: PhantomData<F>,
}

impl<F: Float> HonestForestValidParams<F> {
    pub fn categorical_columns(&self) -> &[usize] {
        &self.categorical_columns
    }

    pub fn ntree(&self) -> usize {
        self.ntree
    }

    pub fn replace(&self) -> bool {
        self.replace
    }

    pub fn sampsize(&self) -> Option<usize> {
        self.sampsize
    }

    pub fn splitratio(&self) -> f64 {
        self.splitratio
    }

    pub fn mtry(&self) -> Option<usize> {
        self.mtry
    }

    pub fn nodesize_spl(&self) -> usize {
        self.nodesize_spl
    }

    pub fn nodesize_avg(&self) -> usize {
        self.nodesize_avg
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn nthread(&self) -> usize {
        self.nthread
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Sample size drawn for every tree of a data frame with `nrows` rows
    pub fn resolved_sampsize(&self, nrows: usize) -> usize {
        self.sampsize.unwrap_or(nrows)
    }

    /// Number of candidate columns per split for a data frame with `ncols` columns
    pub fn resolved_mtry(&self, ncols: usize) -> usize {
        self.mtry.unwrap_or_else(|| usize::max(ncols / 3, 1))
    }

    /// Checks the parameters which depend on the shape of the training data
    pub(crate) fn check_shape(&self, nrows: usize, ncols: usize) -> Result<()> {
        let mtry = self.resolved_mtry(ncols);
        if mtry > ncols {
            return Err(Error::Parameters(format!(
                "mtry should be at most the number of columns {}, but was {}",
                ncols, mtry
            )));
        }

        let sampsize = self.resolved_sampsize(nrows);
        if !self.replace && sampsize > nrows {
            return Err(Error::Parameters(format!(
                "sampsize {} exceeds the number of rows {} while sampling without replacement",
                sampsize, nrows
            )));
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HonestForestParams<F>(HonestForestValidParams<F>);

impl<F: Float> HonestForestParams<F> {
    pub fn new() -> Self {
        Self(HonestForestValidParams {
            categorical_columns: Vec::new(),
            ntree: 500,
            replace: true,
            sampsize: None,
            splitratio: 1.0,
            mtry: None,
            nodesize_spl: 3,
            nodesize_avg: 3,
            seed: 24750371,
            nthread: 0,
            verbose: false,
            float_marker: PhantomData,
        })
    }

    /// Sets the columns of the records whose values are category labels
    ///
    /// Used when fitting on a dataset. A data frame passed to
    /// [`HonestForest::build`](struct.HonestForest.html#method.build) carries its own categorical
    /// columns, which must then agree with this list unless it is empty.
    pub fn categorical_columns(mut self, categorical_columns: Vec<usize>) -> Self {
        self.0.categorical_columns = categorical_columns;
        self
    }

    /// Sets the number of trees in the ensemble
    pub fn ntree(mut self, ntree: usize) -> Self {
        self.0.ntree = ntree;
        self
    }

    /// Sets whether the rows of each tree are drawn with replacement
    pub fn replace(mut self, replace: bool) -> Self {
        self.0.replace = replace;
        self
    }

    /// Sets the number of rows drawn for every tree, `None` draws as many rows as there are
    /// in the training data
    pub fn sampsize(mut self, sampsize: Option<usize>) -> Self {
        self.0.sampsize = sampsize;
        self
    }

    /// Sets the fraction of each tree's rows used to select splits. The remaining rows estimate
    /// the leaf values.
    pub fn splitratio(mut self, splitratio: f64) -> Self {
        self.0.splitratio = splitratio;
        self
    }

    /// Sets the number of candidate columns drawn at every node, `None` uses a third of the
    /// columns
    pub fn mtry(mut self, mtry: Option<usize>) -> Self {
        self.0.mtry = mtry;
        self
    }

    /// Sets the minimum number of splitting rows a node needs to be split further
    pub fn nodesize_spl(mut self, nodesize_spl: usize) -> Self {
        self.0.nodesize_spl = nodesize_spl;
        self
    }

    /// Sets the minimum number of averaging rows a node needs to be split further
    pub fn nodesize_avg(mut self, nodesize_avg: usize) -> Self {
        self.0.nodesize_avg = nodesize_avg;
        self
    }

    /// Sets the seed every tree derives its random generator from
    pub fn seed(mut self, seed: u64) -> Self {
        self.0.seed = seed;
        self
    }

    /// Sets the number of worker threads, zero uses all available cores
    pub fn nthread(mut self, nthread: usize) -> Self {
        self.0.nthread = nthread;
        self
    }

    /// Sets whether progress is reported at `info` level while fitting
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.0.verbose = verbose;
        self
    }
}

impl<F: Float> Default for HonestForestParams<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Float> HonestForest<F> {
    /// Defaults are provided if the optional parameters are not specified:
    /// * `categorical_columns = []` (all columns continuous)
    /// * `ntree = 500`
    /// * `replace = true`
    /// * `sampsize = None` (number of rows)
    /// * `splitratio = 1.0`
    /// * `mtry = None` (a third of the columns, at least one)
    /// * `nodesize_spl = 3`
    /// * `nodesize_avg = 3`
    /// * `seed = 24750371`
    /// * `nthread = 0` (all cores)
    /// * `verbose = false`
    // Violates the convention that new should return a value of type `Self`
    #[allow(clippy::new_ret_no_self)]
    pub fn params() -> HonestForestParams<F> {
        HonestForestParams::new()
    }
}

impl<F: Float> ParamGuard for HonestForestParams<F> {
    type Checked = HonestForestValidParams<F>;
    type Error = Error;

    fn check_ref(&self) -> Result<&Self::Checked> {
        if self.0.ntree == 0 {
            Err(Error::Parameters(
                "ntree should be at least one, but was 0".into(),
            ))
        } else if !self.0.splitratio.is_finite() || !(0.0..=1.0).contains(&self.0.splitratio) {
            Err(Error::Parameters(format!(
                "splitratio should be in [0, 1], but was {}",
                self.0.splitratio
            )))
        } else if self.0.sampsize == Some(0) {
            Err(Error::Parameters(
                "sampsize should be at least one, but was 0".into(),
            ))
        } else if self.0.mtry == Some(0) {
            Err(Error::Parameters(
                "mtry should be at least one, but was 0".into(),
            ))
        } else if self.0.nodesize_spl == 0 || self.0.nodesize_avg == 0 {
            Err(Error::Parameters(format!(
                "node size floors should be at least one, but were {} and {}",
                self.0.nodesize_spl, self.0.nodesize_avg
            )))
        } else {
            Ok(&self.0)
        }
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_against_shape() {
        let params = HonestForest::<f64>::params().check_unwrap();

        assert_eq!(params.resolved_mtry(10), 3);
        assert_eq!(params.resolved_mtry(2), 1);
        assert_eq!(params.resolved_sampsize(42), 42);
    }

    #[test]
    fn rejects_invalid_values() {
        let base = HonestForest::<f64>::params;

        assert!(base().ntree(0).check().is_err());
        assert!(base().splitratio(-0.1).check().is_err());
        assert!(base().splitratio(1.1).check().is_err());
        assert!(base().splitratio(f64::NAN).check().is_err());
        assert!(base().mtry(Some(0)).check().is_err());
        assert!(base().sampsize(Some(0)).check().is_err());
        assert!(base().nodesize_spl(0).check().is_err());
        assert!(base().nodesize_avg(0).check().is_err());

        assert!(base().splitratio(0.0).check().is_ok());
        assert!(base().splitratio(1.0).check().is_ok());
        assert_eq!(
            base().categorical_columns(vec![2]).check_unwrap().categorical_columns(),
            &[2]
        );
    }

    #[test]
    fn shape_dependent_checks() {
        let params = HonestForest::<f64>::params()
            .mtry(Some(3))
            .check_unwrap();
        assert!(params.check_shape(10, 2).is_err());
        assert!(params.check_shape(10, 3).is_ok());

        let params = HonestForest::<f64>::params()
            .replace(false)
            .sampsize(Some(11))
            .check_unwrap();
        assert!(params.check_shape(10, 1).is_err());

        let params = HonestForest::<f64>::params()
            .replace(true)
            .sampsize(Some(11))
            .check_unwrap();
        assert!(params.check_shape(10, 1).is_ok());
    }

    #[test]
    #[should_panic]
    /// Check that a zero tree count panics on unwrap
    fn panic_zero_trees() {
        HonestForest::<f64>::params().ntree(0).check_unwrap();
    }
}
