//! Readers for tab-separated interaction files.
//!
//! Each line holds `user_id`, `item_id`, a rating and an optional timestamp,
//! with no header. Any positive rating is read as an observed interaction
//! with label 1; zero or negative ratings get label 0.
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::data::{Dataset, DatasetError, Interaction, MISSING_TIMESTAMP};
use crate::{RawId, Timestamp};

fn parse_id(value: &str, column: usize) -> Result<RawId, DatasetError> {
    value
        .trim()
        .parse::<RawId>()
        .map_err(|_| DatasetError::InvalidId {
            column,
            value: value.to_owned(),
        })
}

fn parse_record(record: &csv::StringRecord, line: u64) -> Result<Interaction, DatasetError> {
    let malformed = |reason: String| DatasetError::MalformedRow { line, reason };

    if record.len() < 3 {
        return Err(malformed(format!(
            "expected at least 3 columns, found {}",
            record.len()
        )));
    }

    let user_id = parse_id(&record[0], 0)?;
    let item_id = parse_id(&record[1], 1)?;

    let rating = record[2]
        .trim()
        .parse::<f32>()
        .map_err(|_| malformed(format!("invalid rating {:?}", &record[2])))?;
    let label = if rating > 0.0 { 1.0 } else { 0.0 };

    let timestamp = match record.get(3).map(str::trim) {
        None | Some("") => MISSING_TIMESTAMP,
        Some(value) => value
            .parse::<Timestamp>()
            .map_err(|_| malformed(format!("invalid timestamp {:?}", value)))?,
    };

    Ok(Interaction::new(user_id, item_id, label, timestamp))
}

/// Read raw interactions from tab-separated data.
pub fn read_interactions<R: Read>(reader: R) -> Result<Vec<Interaction>, DatasetError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut interactions = Vec::new();

    for (idx, record) in reader.records().enumerate() {
        let line = idx as u64 + 1;
        let record = record.map_err(|error| DatasetError::MalformedRow {
            line: error.position().map_or(line, |position| position.line()),
            reason: error.to_string(),
        })?;

        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }

        let line = record.position().map_or(line, |position| position.line());
        interactions.push(parse_record(&record, line)?);
    }

    Ok(interactions)
}

/// Read a tab-separated interaction file into a (not yet normalized) dataset.
pub fn read_dataset<P: AsRef<Path>>(path: P) -> Result<Dataset, failure::Error> {
    let file = File::open(path.as_ref())?;
    let interactions = read_interactions(file)?;

    debug!(
        path = %path.as_ref().display(),
        rows = interactions.len(),
        "read interactions"
    );

    Ok(Dataset::from(interactions))
}

/// Paths of a train/test split sharing a common prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitPaths {
    /// Training interactions.
    pub train: PathBuf,
    /// Held-out interactions.
    pub test: PathBuf,
}

impl SplitPaths {
    /// `{prefix}.train.rating` and `{prefix}.test.rating`.
    pub fn from_prefix<P: AsRef<Path>>(prefix: P) -> Self {
        let prefix = prefix.as_ref().to_string_lossy().into_owned();

        SplitPaths {
            train: PathBuf::from(format!("{}.train.rating", prefix)),
            test: PathBuf::from(format!("{}.test.rating", prefix)),
        }
    }

    /// Whether both files exist.
    pub fn exist(&self) -> bool {
        self.train.is_file() && self.test.is_file()
    }

    /// Read both files, unnormalized.
    pub fn read(&self) -> Result<(Dataset, Dataset), failure::Error> {
        Ok((read_dataset(&self.train)?, read_dataset(&self.test)?))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write;

    use super::*;

    #[test]
    fn reads_rows_with_and_without_timestamps() {
        let data = "1\t10\t5\t881250949\n2\t20\t0\n\n3\t30\t3.5\t\n";
        let interactions = read_interactions(data.as_bytes()).unwrap();

        assert_eq!(
            interactions,
            vec![
                Interaction::new(1, 10, 1.0, 881250949),
                Interaction::new(2, 20, 0.0, MISSING_TIMESTAMP),
                Interaction::new(3, 30, 1.0, MISSING_TIMESTAMP),
            ]
        );
    }

    #[test]
    fn non_integer_ids_are_rejected() {
        match read_interactions("1\t2\t1\t0\nabc\t2\t1\t0\n".as_bytes()) {
            Err(DatasetError::InvalidId { column, value }) => {
                assert_eq!(column, 0);
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected result {:?}", other),
        }

        assert!(read_interactions("1\t2.5\t1\t0\n".as_bytes()).is_err());
    }

    #[test]
    fn malformed_rows_report_their_line() {
        match read_interactions("1\t2\t1\t0\n3\t4\n".as_bytes()) {
            Err(DatasetError::MalformedRow { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected result {:?}", other),
        }

        match read_interactions("1\t2\tgood\t0\n".as_bytes()) {
            Err(DatasetError::MalformedRow { line, .. }) => assert_eq!(line, 1),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn reads_split_files() {
        let dir = std::env::temp_dir().join(format!("fmrec-datasets-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let paths = SplitPaths::from_prefix(dir.join("toy"));
        assert!(!paths.exist());

        fs::File::create(&paths.train)
            .unwrap()
            .write_all(b"0\t0\t1\t1\n0\t1\t1\t2\n1\t1\t1\t3\n")
            .unwrap();
        fs::File::create(&paths.test)
            .unwrap()
            .write_all(b"1\t0\t1\t4\n")
            .unwrap();

        assert!(paths.exist());
        let (train, test) = paths.read().unwrap();
        assert_eq!(train.len(), 3);
        assert_eq!(test.len(), 1);
        assert!(train.idrange().is_none());

        fs::remove_dir_all(&dir).unwrap();
    }
}
