//!
//! # Honest random forests
//! `linfa-honest` provides a pure Rust implementation of honest random forests for regression.
//!
//! # The big picture
//!
//! `linfa-honest` is a crate in the [linfa](https://github.com/rust-ml/linfa) ecosystem,
//! an effort to create a toolkit for classical Machine Learning implemented in pure Rust, akin to Python's scikit-learn.
//!
//! A random forest averages many decision trees, each grown on a bootstrap draw of the training rows.
//! An honest tree additionally splits its draw in two: one part selects the splits, the other,
//! disjoint part estimates the values of the leaves. Leaf values are therefore never computed
//! from the rows which shaped the tree, which removes the optimistic bias of ordinary trees.
//!
//! # Current state
//!
//! `linfa-honest` provides a [data frame](DataFrame) with continuous and categorical columns,
//! single [honest trees](HonestTree) and the [forest](HonestForest) which grows and evaluates
//! them in parallel. The forest implements linfa's `Fit` and `Predict` traits; categorical
//! columns are declared in its hyperparameters. Progress is reported through `tracing` events;
//! install a subscriber to see them.
//!
//! # Example
//!
//! ```rust
//! use linfa::prelude::*;
//! use linfa_honest::HonestForest;
//! use ndarray::{array, Array2};
//!
//! let x = Array2::from_shape_fn((50, 1), |(i, _)| i as f64);
//! let y = x.column(0).mapv(|v| if v < 25. { 0. } else { 1. });
//! let dataset = Dataset::new(x, y);
//!
//! let forest = HonestForest::params()
//!     .ntree(25)
//!     .mtry(Some(1))
//!     .splitratio(0.5)
//!     .nodesize_spl(2)
//!     .nodesize_avg(2)
//!     .fit(&dataset)
//!     .unwrap();
//!
//! let predictions = forest.predict(&array![[5.], [45.]]);
//! assert!(predictions[0] < 0.5 && predictions[1] > 0.5);
//! ```
//!

pub mod dataframe;
pub mod error;
mod honest_trees;

pub use dataframe::DataFrame;
pub use error::{Error, Result};
pub use honest_trees::*;
