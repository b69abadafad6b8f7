use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashSet;

use crate::error::SoftImputeError;

/// A single timestamped rating.
///
/// # Fields
/// - movie: zero-based movie index
/// - customer: zero-based customer index
/// - rating: rating value, 1..=5
/// - timestamp: seconds since the source epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatingRecord {
    pub movie: u32,
    pub customer: u32,
    pub rating: u8,
    pub timestamp: i64,
}

/// Policy assigning every rating to the training or held-out partition.
///
/// Flags are computed once at construction and never change afterwards.
#[derive(Debug, Clone)]
pub enum Split {
    /// Independent draw per rating: training with probability `train_fraction`.
    Random { train_fraction: f64, seed: u64 },
    /// Ratings matching the given (movie, customer) pairs are held out,
    /// everything else trains. Every pair must match at least one rating.
    Probe(Vec<(u32, u32)>),
    /// One flag per record in record order; `true` marks training.
    Explicit(Vec<bool>),
}

/// Immutable rating store backing the window iterators.
///
/// Holds the four parallel record arrays, the raw-order partition flags, and a
/// timestamp-sorted permutation used for prefix lookups. Loaded once and
/// read-only thereafter.
pub struct RatingSource {
    pub(crate) movies: Vec<u32>,
    pub(crate) customers: Vec<u32>,
    pub(crate) ratings: Vec<u8>,
    pub(crate) timestamps: Vec<i64>,
    /// Aligned to record order, not the sorted order.
    pub(crate) is_train: Vec<bool>,
    /// Record positions ordered by ascending timestamp.
    pub(crate) time_order: Vec<u32>,
    /// timestamps[time_order[i]], cached for binary search.
    pub(crate) sorted_timestamps: Vec<i64>,
    pub(crate) n_movies: usize,
    pub(crate) n_customers: usize,
    pub(crate) epoch: NaiveDate,
}

impl RatingSource {
    /// Build a source from records, assigning partition flags per `split`.
    ///
    /// # Errors
    /// Rejects ratings outside 1..=5, an `Explicit` flag array of the wrong
    /// length, and `Probe` pairs that match no rating.
    pub fn from_records(
        records: &[RatingRecord],
        epoch: NaiveDate,
        split: Split,
    ) -> Result<Self, SoftImputeError> {
        let mut movies = Vec::with_capacity(records.len());
        let mut customers = Vec::with_capacity(records.len());
        let mut ratings = Vec::with_capacity(records.len());
        let mut timestamps = Vec::with_capacity(records.len());

        for (pos, r) in records.iter().enumerate() {
            if !(1..=5).contains(&r.rating) {
                return Err(SoftImputeError::RatingDataError(format!(
                    "rating {} at record {pos} is outside 1..=5",
                    r.rating
                )));
            }
            movies.push(r.movie);
            customers.push(r.customer);
            ratings.push(r.rating);
            timestamps.push(r.timestamp);
        }

        let is_train = assign_flags(records, split)?;

        let mut time_order: Vec<u32> = (0..records.len() as u32).collect();
        time_order.sort_by_key(|&i| timestamps[i as usize]);
        let sorted_timestamps: Vec<i64> =
            time_order.iter().map(|&i| timestamps[i as usize]).collect();

        let n_movies = movies.iter().max().map_or(0, |&m| m as usize + 1);
        let n_customers = customers.iter().max().map_or(0, |&c| c as usize + 1);

        Ok(Self {
            movies,
            customers,
            ratings,
            timestamps,
            is_train,
            time_order,
            sorted_timestamps,
            n_movies,
            n_customers,
            epoch,
        })
    }

    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }

    pub fn n_movies(&self) -> usize {
        self.n_movies
    }

    pub fn n_customers(&self) -> usize {
        self.n_customers
    }

    /// The date that timestamp zero corresponds to.
    pub fn epoch(&self) -> NaiveDate {
        self.epoch
    }

    /// Number of training-flagged ratings.
    pub fn n_train(&self) -> usize {
        self.is_train.iter().filter(|&&t| t).count()
    }

    /// Number of ratings with timestamp <= `cutoff` seconds from the epoch.
    pub fn prefix_len(&self, cutoff: i64) -> usize {
        self.sorted_timestamps.partition_point(|&t| t <= cutoff)
    }
}

fn assign_flags(records: &[RatingRecord], split: Split) -> Result<Vec<bool>, SoftImputeError> {
    match split {
        Split::Random {
            train_fraction,
            seed,
        } => {
            if !(0.0..=1.0).contains(&train_fraction) {
                return Err(SoftImputeError::RatingDataError(format!(
                    "train fraction {train_fraction} is outside [0, 1]"
                )));
            }
            let mut rng = StdRng::seed_from_u64(seed);
            Ok(records
                .iter()
                .map(|_| rng.random::<f64>() < train_fraction)
                .collect())
        }
        Split::Probe(pairs) => {
            let probe: FxHashSet<(u32, u32)> = pairs.iter().copied().collect();
            let mut matched: FxHashSet<(u32, u32)> = FxHashSet::default();
            let flags = records
                .iter()
                .map(|r| {
                    let key = (r.movie, r.customer);
                    if probe.contains(&key) {
                        matched.insert(key);
                        false
                    } else {
                        true
                    }
                })
                .collect();
            if matched.len() != probe.len() {
                return Err(SoftImputeError::RatingDataError(format!(
                    "{} probe pairs matched no rating",
                    probe.len() - matched.len()
                )));
            }
            Ok(flags)
        }
        Split::Explicit(flags) => {
            if flags.len() != records.len() {
                return Err(SoftImputeError::RatingDataError(format!(
                    "{} flags for {} records",
                    flags.len(),
                    records.len()
                )));
            }
            Ok(flags)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(movie: u32, customer: u32, rating: u8, timestamp: i64) -> RatingRecord {
        RatingRecord {
            movie,
            customer,
            rating,
            timestamp,
        }
    }

    fn epoch() -> NaiveDate {
        NaiveDate::from_ymd_opt(1998, 1, 1).unwrap()
    }

    #[test]
    fn rejects_out_of_range_rating() {
        let records = vec![record(0, 0, 6, 0)];
        let err = RatingSource::from_records(&records, epoch(), Split::Explicit(vec![true]));
        assert!(matches!(err, Err(SoftImputeError::RatingDataError(_))));
    }

    #[test]
    fn rejects_misaligned_flags() {
        let records = vec![record(0, 0, 3, 0), record(1, 1, 4, 10)];
        let err = RatingSource::from_records(&records, epoch(), Split::Explicit(vec![true]));
        assert!(matches!(err, Err(SoftImputeError::RatingDataError(_))));
    }

    #[test]
    fn random_split_is_deterministic_per_seed() {
        let records: Vec<RatingRecord> =
            (0..500).map(|i| record(i % 20, i / 20, 3, i as i64)).collect();
        let split = Split::Random {
            train_fraction: 0.8,
            seed: 7,
        };
        let a = RatingSource::from_records(&records, epoch(), split.clone()).unwrap();
        let b = RatingSource::from_records(&records, epoch(), split).unwrap();
        assert_eq!(a.is_train, b.is_train);

        // roughly the requested fraction
        let train = a.n_train() as f64 / a.len() as f64;
        assert!(train > 0.7 && train < 0.9, "train fraction {train}");
    }

    #[test]
    fn probe_split_holds_out_exactly_the_pairs() {
        let records = vec![
            record(0, 0, 1, 0),
            record(0, 1, 2, 5),
            record(1, 0, 3, 10),
            record(1, 1, 4, 15),
        ];
        let source =
            RatingSource::from_records(&records, epoch(), Split::Probe(vec![(0, 1), (1, 0)]))
                .unwrap();
        assert_eq!(source.is_train, vec![true, false, false, true]);
    }

    #[test]
    fn probe_split_rejects_unmatched_pair() {
        let records = vec![record(0, 0, 1, 0)];
        let err = RatingSource::from_records(&records, epoch(), Split::Probe(vec![(9, 9)]));
        assert!(matches!(err, Err(SoftImputeError::RatingDataError(_))));
    }

    #[test]
    fn prefix_len_counts_inclusive_cutoff() {
        let records = vec![
            record(0, 0, 1, 30),
            record(0, 1, 2, 10),
            record(1, 0, 3, 20),
            record(1, 1, 4, 20),
        ];
        let source =
            RatingSource::from_records(&records, epoch(), Split::Explicit(vec![true; 4])).unwrap();
        assert_eq!(source.prefix_len(-1), 0);
        assert_eq!(source.prefix_len(10), 1);
        assert_eq!(source.prefix_len(19), 1);
        assert_eq!(source.prefix_len(20), 3);
        assert_eq!(source.prefix_len(1000), 4);
    }

    #[test]
    fn dimensions_cover_the_largest_indices() {
        let records = vec![record(4, 9, 5, 0)];
        let source =
            RatingSource::from_records(&records, epoch(), Split::Explicit(vec![true])).unwrap();
        assert_eq!(source.n_movies(), 5);
        assert_eq!(source.n_customers(), 10);
    }
}
