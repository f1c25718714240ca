//! Split search over the splitting rows of a node
//!
//! Candidates are scored by the sum of squared errors of the splitting rows in both children.
//! The averaging rows only take part through the admissibility check, which keeps every child
//! populated with enough averaging rows to estimate a leaf value.
use std::cmp::Ordering;

use linfa::Float;

use super::SplitRule;
use crate::DataFrame;

/// Running sums of a set of outcomes, taken relative to a fixed shift
///
/// Shifting by a value close to the mean keeps `sum_sq - sum^2 / n` free of cancellation when
/// the outcomes carry a large offset. Sums are only combined when their shifts are equal.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Moments<F> {
    pub n: usize,
    pub sum: F,
    pub sum_sq: F,
    shift: F,
}

impl<F: Float> Moments<F> {
    pub fn centered(shift: F) -> Self {
        Moments {
            n: 0,
            sum: F::zero(),
            sum_sq: F::zero(),
            shift,
        }
    }

    /// Moments of the outcomes of `rows`, shifted by their plain mean
    pub fn of_rows(data: &DataFrame<F>, rows: &[usize]) -> Self {
        let shift = data.outcome_mean(rows).unwrap_or_else(F::zero);
        let mut moments = Self::centered(shift);
        for &row in rows {
            moments.push(data.outcome(row));
        }
        moments
    }

    pub fn push(&mut self, y: F) {
        let y = y - self.shift;
        self.n += 1;
        self.sum += y;
        self.sum_sq += y * y;
    }

    pub fn merge(&mut self, other: &Self) {
        debug_assert!(self.shift == other.shift);
        self.n += other.n;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
    }

    pub fn minus(&self, other: &Self) -> Self {
        debug_assert!(self.shift == other.shift);
        Moments {
            n: self.n - other.n,
            sum: self.sum - other.sum,
            sum_sq: self.sum_sq - other.sum_sq,
            shift: self.shift,
        }
    }

    pub fn mean(&self) -> F {
        self.shift + self.sum / F::cast(self.n)
    }

    /// Sum of squared deviations from the mean
    pub fn sse(&self) -> F {
        if self.n == 0 {
            return F::zero();
        }
        let sse = self.sum_sq - self.sum * self.sum / F::cast(self.n);
        sse.max(F::zero())
    }
}

/// The winning split of a node
#[derive(Debug, Clone)]
pub(crate) struct BestSplit<F> {
    pub feature_idx: usize,
    pub rule: SplitRule<F>,
    /// Sum of both children's squared errors
    pub score: F,
}

/// Searches the admissible split with the lowest child impurity
pub(crate) struct Splitter<'a, F> {
    data: &'a DataFrame<F>,
    min_splitting: usize,
    min_averaging: usize,
}

impl<'a, F: Float> Splitter<'a, F> {
    pub fn new(data: &'a DataFrame<F>, nodesize_spl: usize, nodesize_avg: usize) -> Self {
        Splitter {
            data,
            min_splitting: nodesize_spl.max(1),
            min_averaging: nodesize_avg.max(1),
        }
    }

    fn admissible(&self, spl: (usize, usize), avg: (usize, usize)) -> bool {
        spl.0 >= self.min_splitting
            && spl.1 >= self.min_splitting
            && avg.0 >= self.min_averaging
            && avg.1 >= self.min_averaging
    }

    /// Finds the best split among `features`, which must be sorted ascending
    ///
    /// Ties keep the first candidate: the lowest column index, then the smallest threshold (or
    /// the shortest category prefix). Returns `None` if no column admits a split.
    pub fn best_split(
        &self,
        splitting: &[usize],
        averaging: &[usize],
        features: &[usize],
    ) -> Option<BestSplit<F>> {
        let shift = self.data.outcome_mean(splitting)?;
        let mut best: Option<BestSplit<F>> = None;

        for &feature_idx in features {
            let candidate = if self.data.is_categorical(feature_idx) {
                self.best_categorical(feature_idx, splitting, averaging, shift)
            } else {
                self.best_threshold(feature_idx, splitting, averaging, shift)
            };

            if let Some((rule, score)) = candidate {
                best = match best.take() {
                    Some(current) if current.score <= score => Some(current),
                    _ => Some(BestSplit {
                        feature_idx,
                        rule,
                        score,
                    }),
                };
            }
        }

        best
    }

    /// Scans the midpoints between consecutive distinct values of a continuous column
    fn best_threshold(
        &self,
        feature_idx: usize,
        splitting: &[usize],
        averaging: &[usize],
        shift: F,
    ) -> Option<(SplitRule<F>, F)> {
        let mut pairs: Vec<(F, F)> = splitting
            .iter()
            .map(|&row| (self.data.value(row, feature_idx), self.data.outcome(row)))
            .collect();
        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

        let mut averaging_values = self.data.column(feature_idx, averaging);
        averaging_values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

        let total = pairs.iter().fold(Moments::centered(shift), |mut acc, (_, y)| {
            acc.push(*y);
            acc
        });

        let mut left = Moments::centered(shift);
        let mut best: Option<(F, F)> = None;

        for i in 0..pairs.len().saturating_sub(1) {
            left.push(pairs[i].1);

            let (lower, upper) = (pairs[i].0, pairs[i + 1].0);
            // equal values always end up in the same child
            if lower >= upper {
                continue;
            }

            let right = total.minus(&left);
            let threshold = midpoint(lower, upper);
            let averaging_left = averaging_values.partition_point(|v| *v < threshold);
            let averaging_right = averaging_values.len() - averaging_left;

            if !self.admissible((left.n, right.n), (averaging_left, averaging_right)) {
                continue;
            }

            let score = left.sse() + right.sse();
            if best.map_or(true, |(_, best_score)| score < best_score) {
                best = Some((threshold, score));
            }
        }

        best.map(|(threshold, score)| (SplitRule::Threshold(threshold), score))
    }

    /// Orders the labels by mean outcome and scans every prefix as the left label set
    ///
    /// For squared error the optimal partition of the labels is always one of these prefixes,
    /// so this covers all subset partitions without enumerating them.
    fn best_categorical(
        &self,
        feature_idx: usize,
        splitting: &[usize],
        averaging: &[usize],
        shift: F,
    ) -> Option<(SplitRule<F>, F)> {
        let mut pairs: Vec<(F, F)> = splitting
            .iter()
            .map(|&row| (self.data.value(row, feature_idx), self.data.outcome(row)))
            .collect();
        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

        // (label, moments of its splitting rows)
        let mut groups: Vec<(F, Moments<F>)> = Vec::new();
        for (label, y) in pairs {
            if let Some((last, moments)) = groups.last_mut() {
                if *last == label {
                    moments.push(y);
                    continue;
                }
            }
            let mut moments = Moments::centered(shift);
            moments.push(y);
            groups.push((label, moments));
        }
        if groups.len() < 2 {
            return None;
        }

        groups.sort_by(|a, b| {
            a.1.mean()
                .partial_cmp(&b.1.mean())
                .unwrap_or(Ordering::Equal)
                .then(a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal))
        });

        let mut averaging_labels = self.data.column(feature_idx, averaging);
        averaging_labels.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let averaging_count = |label: F| {
            let lo = averaging_labels.partition_point(|v| *v < label);
            let hi = averaging_labels.partition_point(|v| *v <= label);
            hi - lo
        };

        let total = groups.iter().fold(Moments::centered(shift), |mut acc, (_, m)| {
            acc.merge(m);
            acc
        });

        let mut left = Moments::centered(shift);
        let mut averaging_left = 0;
        let mut best: Option<(usize, F)> = None;

        for (k, (label, moments)) in groups.iter().enumerate().take(groups.len() - 1) {
            left.merge(moments);
            averaging_left += averaging_count(*label);

            let right = total.minus(&left);
            let averaging_right = averaging_labels.len() - averaging_left;

            if !self.admissible((left.n, right.n), (averaging_left, averaging_right)) {
                continue;
            }

            let score = left.sse() + right.sse();
            if best.map_or(true, |(_, best_score)| score < best_score) {
                best = Some((k, score));
            }
        }

        best.map(|(k, score)| {
            let mut labels: Vec<F> = groups[..=k].iter().map(|(label, _)| *label).collect();
            labels.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            (SplitRule::Categories(labels), score)
        })
    }
}

/// Threshold strictly above `lower` and at most `upper`
fn midpoint<F: Float>(lower: F, upper: F) -> F {
    let mid = (lower + upper) / F::cast(2.0);
    if mid > lower {
        mid
    } else {
        upper
    }
}
