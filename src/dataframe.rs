//! Data frame
//!
//! Immutable training data shared by every tree of a forest: a feature matrix, one outcome per
//! row and the set of columns whose values encode category labels.
use linfa::dataset::{AsSingleTargets, DatasetBase};
use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, Axis, Data, Ix2};

use crate::error::{Error, Result};

/// DataFrame
///
/// Column indices listed as categorical are treated as encoded labels: their values are only
/// compared for equality, never by magnitude.
///
/// # Fields
///
/// * `features`: a two-dimensional matrix with dimensionality (nrows, ncols)
/// * `outcome`: one numeric label per row
/// * `categorical`: a mask with one entry per column, `true` for categorical columns
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame<F> {
    features: Array2<F>,
    outcome: Array1<F>,
    categorical: Vec<bool>,
}

impl<F: Float> DataFrame<F> {
    /// Creates a data frame from a feature matrix and an outcome vector
    ///
    /// ### Parameters
    ///
    /// * `features`: the observations, one row per sample
    /// * `outcome`: the outcome of every row
    /// * `categorical_columns`: zero-based indices of the categorical columns
    ///
    /// ### Errors
    ///
    /// Fails if the frame has no rows or columns, if the outcome length differs from the row
    /// count, if a categorical index is out of range or if any value is NaN or infinite.
    pub fn new(
        features: Array2<F>,
        outcome: Array1<F>,
        categorical_columns: &[usize],
    ) -> Result<Self> {
        let (nrows, ncols) = features.dim();
        if nrows == 0 {
            return Err(Error::NotEnoughSamples);
        }
        if ncols == 0 {
            return Err(Error::Parameters(
                "data frame must contain at least one feature column".into(),
            ));
        }
        if outcome.len() != nrows {
            return Err(Error::Parameters(format!(
                "outcome has {} values, but there are {} rows",
                outcome.len(),
                nrows
            )));
        }

        let mut categorical = vec![false; ncols];
        for &column in categorical_columns {
            if column >= ncols {
                return Err(Error::InvalidCategoricalColumn { column, ncols });
            }
            categorical[column] = true;
        }

        for (row, values) in features.outer_iter().enumerate() {
            if let Some(column) = values.iter().position(|x| !x.is_finite()) {
                return Err(Error::NonFiniteValue {
                    row,
                    column: Some(column),
                });
            }
        }
        if let Some(row) = outcome.iter().position(|y| !y.is_finite()) {
            return Err(Error::NonFiniteValue { row, column: None });
        }

        Ok(DataFrame {
            features,
            outcome,
            categorical,
        })
    }

    /// Creates a data frame from the records and single targets of a linfa dataset
    pub fn from_dataset<D, T>(
        dataset: &DatasetBase<ArrayBase<D, Ix2>, T>,
        categorical_columns: &[usize],
    ) -> Result<Self>
    where
        D: Data<Elem = F>,
        T: AsSingleTargets<Elem = F>,
    {
        Self::new(
            dataset.records().to_owned(),
            dataset.as_single_targets().to_owned(),
            categorical_columns,
        )
    }

    /// Creates a data frame from row-major nested vectors and checks them against the declared
    /// shape
    pub fn from_rows(
        rows: Vec<Vec<F>>,
        outcome: Vec<F>,
        categorical_columns: &[usize],
        num_rows: usize,
        num_columns: usize,
    ) -> Result<Self> {
        if rows.len() != num_rows {
            return Err(Error::Parameters(format!(
                "declared {} rows, but received {}",
                num_rows,
                rows.len()
            )));
        }
        if let Some((row, values)) = rows
            .iter()
            .enumerate()
            .find(|(_, values)| values.len() != num_columns)
        {
            return Err(Error::Parameters(format!(
                "declared {} columns, but row {} has {}",
                num_columns,
                row,
                values.len()
            )));
        }

        let flat = rows.into_iter().flatten().collect();
        let features = Array2::from_shape_vec((num_rows, num_columns), flat)?;

        Self::new(features, Array1::from(outcome), categorical_columns)
    }

    /// Creates a data frame from column-major nested vectors and checks them against the
    /// declared shape
    pub fn from_columns(
        columns: Vec<Vec<F>>,
        outcome: Vec<F>,
        categorical_columns: &[usize],
        num_rows: usize,
        num_columns: usize,
    ) -> Result<Self> {
        if columns.len() != num_columns {
            return Err(Error::Parameters(format!(
                "declared {} columns, but received {}",
                num_columns,
                columns.len()
            )));
        }
        if let Some((column, values)) = columns
            .iter()
            .enumerate()
            .find(|(_, values)| values.len() != num_rows)
        {
            return Err(Error::Parameters(format!(
                "declared {} rows, but column {} has {}",
                num_rows,
                column,
                values.len()
            )));
        }

        let flat = columns.into_iter().flatten().collect();
        let features = Array2::from_shape_vec((num_columns, num_rows), flat)?
            .reversed_axes()
            .as_standard_layout()
            .into_owned();

        Self::new(features, Array1::from(outcome), categorical_columns)
    }

    /// Number of rows
    pub fn nrows(&self) -> usize {
        self.features.nrows()
    }

    /// Number of feature columns
    pub fn ncols(&self) -> usize {
        self.features.ncols()
    }

    pub fn features(&self) -> &Array2<F> {
        &self.features
    }

    pub fn outcomes(&self) -> &Array1<F> {
        &self.outcome
    }

    /// Returns the feature values of a single row
    ///
    /// ### Panics
    ///
    /// If `row` is out of bounds
    pub fn row(&self, row: usize) -> ArrayView1<'_, F> {
        self.features.index_axis(Axis(0), row)
    }

    /// Returns the values of `column` for the given rows, in the order of `rows`
    ///
    /// ### Panics
    ///
    /// If `column` or any of `rows` is out of bounds
    pub fn column(&self, column: usize, rows: &[usize]) -> Vec<F> {
        let values = self.features.index_axis(Axis(1), column);
        rows.iter().map(|&row| values[row]).collect()
    }

    /// Returns a single feature value
    pub fn value(&self, row: usize, column: usize) -> F {
        self.features[(row, column)]
    }

    /// Returns the outcome of a row
    pub fn outcome(&self, row: usize) -> F {
        self.outcome[row]
    }

    /// Returns true if the values of `column` are category labels
    pub fn is_categorical(&self, column: usize) -> bool {
        self.categorical[column]
    }

    /// Indices of the categorical columns in ascending order
    pub fn categorical_columns(&self) -> Vec<usize> {
        self.categorical
            .iter()
            .enumerate()
            .filter_map(|(column, &cat)| if cat { Some(column) } else { None })
            .collect()
    }

    /// Mean outcome of the given rows, `None` if `rows` is empty
    pub fn outcome_mean(&self, rows: &[usize]) -> Option<F> {
        if rows.is_empty() {
            return None;
        }
        let sum = rows.iter().map(|&row| self.outcome[row]).sum::<F>();
        Some(sum / F::cast(rows.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use linfa::Dataset;
    use ndarray::array;

    #[test]
    fn accessors_follow_row_major_layout() -> Result<()> {
        let frame = DataFrame::new(
            array![[1., 10.], [2., 20.], [3., 30.]],
            array![0.5, 1.5, 2.5],
            &[1],
        )?;

        assert_eq!(frame.nrows(), 3);
        assert_eq!(frame.ncols(), 2);
        assert_eq!(frame.row(1), array![2., 20.]);
        assert_eq!(frame.column(1, &[2, 0]), vec![30., 10.]);
        assert_eq!(frame.outcome(2), 2.5);
        assert!(frame.is_categorical(1));
        assert!(!frame.is_categorical(0));
        assert_eq!(frame.categorical_columns(), vec![1]);

        Ok(())
    }

    #[test]
    fn outcome_mean_of_subset() -> Result<()> {
        let frame = DataFrame::new(array![[0.], [0.], [0.], [0.]], array![1., 2., 3., 6.], &[])?;

        assert_abs_diff_eq!(frame.outcome_mean(&[0, 1, 3]).unwrap(), 3.0);
        assert!(frame.outcome_mean(&[]).is_none());

        Ok(())
    }

    #[test]
    fn columns_and_rows_build_the_same_frame() -> Result<()> {
        let by_rows = DataFrame::from_rows(
            vec![vec![1., 4.], vec![2., 5.], vec![3., 6.]],
            vec![7., 8., 9.],
            &[0],
            3,
            2,
        )?;
        let by_columns = DataFrame::from_columns(
            vec![vec![1., 2., 3.], vec![4., 5., 6.]],
            vec![7., 8., 9.],
            &[0],
            3,
            2,
        )?;

        assert_eq!(by_rows, by_columns);

        Ok(())
    }

    #[test]
    fn dataset_records_and_targets_are_copied() -> Result<()> {
        let dataset = Dataset::new(array![[1., 0.], [2., 1.]], array![3., 4.]);
        let frame = DataFrame::from_dataset(&dataset, &[1])?;

        assert_eq!(frame.features(), dataset.records());
        assert_eq!(frame.outcomes(), &array![3., 4.]);
        assert_eq!(frame.categorical_columns(), vec![1]);

        Ok(())
    }

    #[test]
    fn declared_shape_must_match() {
        let err = DataFrame::from_rows(vec![vec![1., 2.], vec![3.]], vec![0., 1.], &[], 2, 2);
        assert!(matches!(err, Err(Error::Parameters(_))));

        let err = DataFrame::from_columns(vec![vec![1., 2.]], vec![0., 1.], &[], 2, 2);
        assert!(matches!(err, Err(Error::Parameters(_))));
    }

    #[test]
    fn rejects_malformed_input() {
        let err = DataFrame::new(array![[1.], [2.]], array![1.], &[]);
        assert!(matches!(err, Err(Error::Parameters(_))));

        let err = DataFrame::new(array![[1.], [2.]], array![1., 2.], &[1]);
        assert!(matches!(
            err,
            Err(Error::InvalidCategoricalColumn { column: 1, ncols: 1 })
        ));

        let err = DataFrame::new(array![[1.], [f64::NAN]], array![1., 2.], &[]);
        assert!(matches!(
            err,
            Err(Error::NonFiniteValue {
                row: 1,
                column: Some(0)
            })
        ));

        let err = DataFrame::new(array![[1.], [2.]], array![1., f64::INFINITY], &[]);
        assert!(matches!(
            err,
            Err(Error::NonFiniteValue {
                row: 1,
                column: None
            })
        ));

        let err = DataFrame::<f64>::new(Array2::zeros((0, 2)), Array1::zeros(0), &[]);
        assert!(matches!(err, Err(Error::NotEnoughSamples)));
    }
}
