//! Loader for the Netflix-prize text layout: one `mv_NNNNNNN.txt` file per
//! movie with `customerId,rating,YYYY-MM-DD` lines, and a probe file listing
//! held-out (movie, customer) pairs. Customer ids are sparse in the raw data
//! and get re-indexed densely in encounter order.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use rustc_hash::FxHashMap;

use crate::ratings::RatingRecord;
use crate::window::WindowConfig;

/// Date that rating timestamps are measured from in the canonical dataset.
pub fn netflix_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1998, 1, 1).expect("valid fixed date")
}

/// The canonical iteration schedule over the dataset: 30-day windows from
/// 2001-01-01 through 2005-12-31.
pub fn netflix_window() -> WindowConfig {
    WindowConfig {
        start_date: NaiveDate::from_ymd_opt(2001, 1, 1).expect("valid fixed date"),
        end_date: NaiveDate::from_ymd_opt(2005, 12, 31).expect("valid fixed date"),
        step_days: 30,
        max_iter: None,
    }
}

/// Parsed dataset: flat records plus the raw-customer-id to dense-index map
/// needed to resolve probe entries.
pub struct NetflixRatings {
    pub records: Vec<RatingRecord>,
    pub customer_index: FxHashMap<u32, u32>,
}

/// Read every `mv_*.txt` file under `dir`, in file-name order.
pub fn load_training_set(dir: &Path, epoch: NaiveDate) -> Result<NetflixRatings> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("reading rating directory {}", dir.display()))?
    {
        let path = entry?.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name.starts_with("mv_") && name.ends_with(".txt") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut movies = Vec::with_capacity(paths.len());
    for path in &paths {
        let file =
            File::open(path).with_context(|| format!("opening rating file {}", path.display()))?;
        let parsed = parse_movie_file(BufReader::new(file))
            .with_context(|| format!("parsing rating file {}", path.display()))?;
        movies.push(parsed);
    }

    Ok(assemble(movies, epoch))
}

/// One movie's ratings: the declared one-based movie id and the
/// (customer id, rating, date) rows in file order.
pub type MovieRatings = (u32, Vec<(u32, u8, NaiveDate)>);

/// Parse a single per-movie file: a `movieId:` header line followed by
/// `customerId,rating,YYYY-MM-DD` rows.
pub fn parse_movie_file<R: BufRead>(reader: R) -> Result<MovieRatings> {
    let mut lines = reader.lines();

    let header = match lines.next() {
        Some(line) => line?,
        None => bail!("empty rating file"),
    };
    let movie_id: u32 = header
        .trim()
        .strip_suffix(':')
        .with_context(|| format!("header line {header:?} is not 'movieId:'"))?
        .parse()
        .with_context(|| format!("header line {header:?} has no numeric movie id"))?;
    if movie_id == 0 {
        bail!("movie ids are one-based, got 0");
    }

    let mut rows = Vec::new();
    for line in lines {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.splitn(3, ',');
        let (customer, rating, date) = match (fields.next(), fields.next(), fields.next()) {
            (Some(c), Some(r), Some(d)) => (c, r, d),
            _ => bail!("rating line {line:?} is not 'customer,rating,date'"),
        };
        let customer: u32 = customer
            .trim()
            .parse()
            .with_context(|| format!("bad customer id in {line:?}"))?;
        let rating: u8 = rating
            .trim()
            .parse()
            .with_context(|| format!("bad rating in {line:?}"))?;
        let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
            .with_context(|| format!("bad date in {line:?}"))?;
        rows.push((customer, rating, date));
    }
    Ok((movie_id, rows))
}

/// Flatten parsed movie files into records, interning customer ids densely in
/// encounter order. Movie indices are the declared ids shifted to zero-based.
pub fn assemble(movies: Vec<MovieRatings>, epoch: NaiveDate) -> NetflixRatings {
    let mut customer_index: FxHashMap<u32, u32> = FxHashMap::default();
    let mut records = Vec::new();

    for (movie_id, rows) in movies {
        for (raw_customer, rating, date) in rows {
            let next = customer_index.len() as u32;
            let customer = *customer_index.entry(raw_customer).or_insert(next);
            records.push(RatingRecord {
                movie: movie_id - 1,
                customer,
                rating,
                timestamp: date.signed_duration_since(epoch).num_seconds(),
            });
        }
    }

    NetflixRatings {
        records,
        customer_index,
    }
}

/// Parse the probe file (`movieId:` headers, customer-id rows) into zero-based
/// (movie, customer) pairs, resolving customers through the dense index.
pub fn load_probe<R: BufRead>(
    reader: R,
    customer_index: &FxHashMap<u32, u32>,
) -> Result<Vec<(u32, u32)>> {
    let mut pairs = Vec::new();
    let mut current_movie: Option<u32> = None;

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(id) = line.strip_suffix(':') {
            let movie_id: u32 = id
                .parse()
                .with_context(|| format!("bad probe movie header {line:?}"))?;
            if movie_id == 0 {
                bail!("movie ids are one-based, got 0");
            }
            current_movie = Some(movie_id - 1);
        } else {
            let movie = match current_movie {
                Some(m) => m,
                None => bail!("probe customer line {line:?} before any movie header"),
            };
            let raw_customer: u32 = line
                .parse()
                .with_context(|| format!("bad probe customer id {line:?}"))?;
            let customer = *customer_index
                .get(&raw_customer)
                .with_context(|| format!("probe customer {raw_customer} not in the training set"))?;
            pairs.push((movie, customer));
        }
    }
    Ok(pairs)
}

pub fn load_probe_file(
    path: &Path,
    customer_index: &FxHashMap<u32, u32>,
) -> Result<Vec<(u32, u32)>> {
    let file =
        File::open(path).with_context(|| format!("opening probe file {}", path.display()))?;
    load_probe(BufReader::new(file), customer_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratings::{RatingSource, Split};
    use crate::window::{partition_window, Partition};
    use std::io::Cursor;

    const MOVIE_ONE: &str = "1:\n\
        1488844,3,2005-09-06\n\
        822109,5,2005-05-13\n\
        885013,4,2005-10-19\n";

    const MOVIE_TWO: &str = "2:\n\
        822109,1,2005-06-01\n\
        30878,4,2005-12-26\n";

    #[test]
    fn parses_a_movie_file() {
        let (movie_id, rows) = parse_movie_file(Cursor::new(MOVIE_ONE)).unwrap();
        assert_eq!(movie_id, 1);
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows[0],
            (
                1488844,
                3,
                NaiveDate::from_ymd_opt(2005, 9, 6).unwrap()
            )
        );
    }

    #[test]
    fn rejects_a_missing_header() {
        let broken = "1488844,3,2005-09-06\n";
        assert!(parse_movie_file(Cursor::new(broken)).is_err());
    }

    #[test]
    fn rejects_a_malformed_row() {
        let broken = "1:\n1488844,3\n";
        assert!(parse_movie_file(Cursor::new(broken)).is_err());
    }

    #[test]
    fn assemble_interns_customers_in_encounter_order() {
        let one = parse_movie_file(Cursor::new(MOVIE_ONE)).unwrap();
        let two = parse_movie_file(Cursor::new(MOVIE_TWO)).unwrap();
        let dataset = assemble(vec![one, two], netflix_epoch());

        assert_eq!(dataset.records.len(), 5);
        assert_eq!(dataset.customer_index.len(), 4);
        assert_eq!(dataset.customer_index[&1488844], 0);
        assert_eq!(dataset.customer_index[&822109], 1);
        assert_eq!(dataset.customer_index[&30878], 3);

        // 822109 keeps one dense index across movies
        assert_eq!(dataset.records[1].customer, 1);
        assert_eq!(dataset.records[3].customer, 1);
        assert_eq!(dataset.records[3].movie, 1);

        let expected = NaiveDate::from_ymd_opt(2005, 9, 6)
            .unwrap()
            .signed_duration_since(netflix_epoch())
            .num_seconds();
        assert_eq!(dataset.records[0].timestamp, expected);
    }

    #[test]
    fn probe_resolves_against_the_customer_index() {
        let one = parse_movie_file(Cursor::new(MOVIE_ONE)).unwrap();
        let two = parse_movie_file(Cursor::new(MOVIE_TWO)).unwrap();
        let dataset = assemble(vec![one, two], netflix_epoch());

        let probe = "1:\n822109\n2:\n30878\n";
        let pairs = load_probe(Cursor::new(probe), &dataset.customer_index).unwrap();
        assert_eq!(pairs, vec![(0, 1), (1, 3)]);
    }

    #[test]
    fn probe_rejects_unknown_customers() {
        let one = parse_movie_file(Cursor::new(MOVIE_ONE)).unwrap();
        let dataset = assemble(vec![one], netflix_epoch());
        let probe = "1:\n999999\n";
        assert!(load_probe(Cursor::new(probe), &dataset.customer_index).is_err());
    }

    #[test]
    fn probe_labelled_ratings_land_in_the_test_windows() {
        let one = parse_movie_file(Cursor::new(MOVIE_ONE)).unwrap();
        let two = parse_movie_file(Cursor::new(MOVIE_TWO)).unwrap();
        let dataset = assemble(vec![one, two], netflix_epoch());

        let probe = "1:\n822109\n2:\n30878\n";
        let pairs = load_probe(Cursor::new(probe), &dataset.customer_index).unwrap();
        let source =
            RatingSource::from_records(&dataset.records, netflix_epoch(), Split::Probe(pairs))
                .unwrap();

        let cutoff = NaiveDate::from_ymd_opt(2005, 12, 31)
            .unwrap()
            .signed_duration_since(netflix_epoch())
            .num_seconds();
        let train = partition_window(&source, cutoff, Partition::Train);
        let test = partition_window(&source, cutoff, Partition::Test);

        assert_eq!(train.nnz(), 3);
        assert_eq!(test.nnz(), 2);
        // (movie 0, customer 1) was probed out of training
        assert!(test.triplet_iter().any(|(i, j, _)| i == 0 && j == 1));
        assert!(!train.triplet_iter().any(|(i, j, _)| i == 0 && j == 1));
    }
}
