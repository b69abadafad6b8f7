use chrono::{Duration, NaiveDate};
use nalgebra_sparse::coo::CooMatrix;
use nalgebra_sparse::csc::CscMatrix;

use crate::ratings::RatingSource;

/// Which side of the train/test split a window keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Train,
    Test,
}

/// Schedule for the window iterator.
///
/// # Fields
/// - start_date: simulated date of the first window
/// - end_date: last date covered; iteration stops once the cursor passes
///   end_date plus one step
/// - step_days: days the cursor advances per window
/// - max_iter: optional cap on the number of windows produced
#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub step_days: i64,
    pub max_iter: Option<usize>,
}

/// Build one sparse snapshot: all ratings of `partition` with timestamp <=
/// `cutoff` seconds from the source epoch, at the source's full shape.
///
/// The other partition's ratings are never stored, so the result needs no
/// explicit zero elimination. The structural nonzero count must equal the
/// partition's rating count within the time prefix; a mismatch means the
/// store is corrupt (for instance duplicate (movie, customer) pairs collapsed
/// by the column-compressed conversion) and aborts.
pub fn partition_window(
    source: &RatingSource,
    cutoff: i64,
    partition: Partition,
) -> CscMatrix<f64> {
    let prefix = source.prefix_len(cutoff);
    let mut coo = CooMatrix::new(source.n_movies(), source.n_customers());
    let mut expected = 0usize;

    for &pos in &source.time_order[..prefix] {
        let pos = pos as usize;
        let keep = match partition {
            Partition::Train => source.is_train[pos],
            Partition::Test => !source.is_train[pos],
        };
        if keep {
            expected += 1;
            coo.push(
                source.movies[pos] as usize,
                source.customers[pos] as usize,
                f64::from(source.ratings[pos]),
            );
        }
    }

    let x = CscMatrix::from(&coo);
    assert_eq!(
        x.nnz(),
        expected,
        "partition window dropped or merged entries: {} stored, {} ratings in prefix",
        x.nnz(),
        expected
    );
    x
}

/// Lazy, forward-only sequence of partition windows, one per time step.
///
/// Exhaustion is permanent: once `next` returns `None` it keeps returning
/// `None`. Re-create the iterator to run the schedule again.
pub struct RatingWindows<'a> {
    source: &'a RatingSource,
    partition: Partition,
    current_date: NaiveDate,
    end_date: NaiveDate,
    step: Duration,
    max_iter: Option<usize>,
    produced: usize,
}

impl<'a> RatingWindows<'a> {
    pub fn new(source: &'a RatingSource, config: &WindowConfig, partition: Partition) -> Self {
        assert!(config.step_days > 0, "window step must be positive");
        Self {
            source,
            partition,
            current_date: config.start_date,
            end_date: config.end_date,
            step: Duration::days(config.step_days),
            max_iter: config.max_iter,
            produced: 0,
        }
    }

    /// Simulated date of the window `next` would produce.
    pub fn current_date(&self) -> NaiveDate {
        self.current_date
    }
}

impl Iterator for RatingWindows<'_> {
    type Item = CscMatrix<f64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_date > self.end_date + self.step {
            return None;
        }
        if self.max_iter == Some(self.produced) {
            return None;
        }

        let cutoff = self
            .current_date
            .signed_duration_since(self.source.epoch())
            .num_seconds();
        let x = partition_window(self.source, cutoff, self.partition);

        self.current_date = self.current_date + self.step;
        self.produced += 1;
        Some(x)
    }
}

impl RatingSource {
    pub fn windows<'a>(&'a self, config: &WindowConfig, partition: Partition) -> RatingWindows<'a> {
        RatingWindows::new(self, config, partition)
    }

    pub fn train_windows<'a>(&'a self, config: &WindowConfig) -> RatingWindows<'a> {
        self.windows(config, Partition::Train)
    }

    pub fn test_windows<'a>(&'a self, config: &WindowConfig) -> RatingWindows<'a> {
        self.windows(config, Partition::Test)
    }
}
