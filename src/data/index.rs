// --- File: src/data/index.rs ---

//! Label index: the flat (image path, class name) table a run starts from.

use super::DataError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// One row of the label index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledSample {
    /// Image path, relative to the dataset root.
    pub path: PathBuf,
    /// Human-readable class name.
    pub label: String,
}

impl LabeledSample {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(path: P, label: S) -> Self {
        Self {
            path: path.into(),
            label: label.into(),
        }
    }
}

/// Column layout of a label index file.
#[derive(Debug, Clone)]
pub struct IndexFormat {
    pub delimiter: char,
    /// Skip the first non-empty line.
    pub has_header: bool,
    pub path_column: usize,
    pub label_column: usize,
    /// Appended to each path, for indexes that store image ids.
    pub path_suffix: Option<String>,
}

impl Default for IndexFormat {
    fn default() -> Self {
        Self {
            delimiter: ',',
            has_header: true,
            path_column: 0,
            label_column: 1,
            path_suffix: None,
        }
    }
}

/// Parsed label index.
#[derive(Debug, Clone, Default)]
pub struct LabelIndex {
    samples: Vec<LabeledSample>,
}

impl LabelIndex {
    /// Wraps an existing sample list.
    pub fn new(samples: Vec<LabeledSample>) -> Self {
        Self { samples }
    }

    /// Reads and parses an index file.
    pub fn from_path<P: AsRef<Path>>(path: P, format: &IndexFormat) -> Result<Self, DataError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| DataError::IndexParse {
            path: path.to_path_buf(),
            line: 0,
            reason: e.to_string(),
        })?;
        Self::parse(&text, format, path)
    }

    /// Parses index text. `origin` only appears in error messages.
    pub fn parse(text: &str, format: &IndexFormat, origin: &Path) -> Result<Self, DataError> {
        let needed = format.path_column.max(format.label_column) + 1;
        let mut samples = Vec::new();
        let mut header_pending = format.has_header;

        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            if header_pending {
                header_pending = false;
                continue;
            }

            let fields: Vec<&str> = line
                .split(format.delimiter)
                .map(|f| f.trim().trim_matches('"'))
                .collect();
            if fields.len() < needed {
                return Err(DataError::IndexParse {
                    path: origin.to_path_buf(),
                    line: line_no + 1,
                    reason: format!("expected at least {} columns, found {}", needed, fields.len()),
                });
            }

            let raw_path = fields[format.path_column];
            let label = fields[format.label_column];
            if raw_path.is_empty() || label.is_empty() {
                return Err(DataError::IndexParse {
                    path: origin.to_path_buf(),
                    line: line_no + 1,
                    reason: "empty path or label".to_string(),
                });
            }

            let path = match &format.path_suffix {
                Some(suffix) => format!("{raw_path}{suffix}"),
                None => raw_path.to_string(),
            };
            samples.push(LabeledSample::new(path, label));
        }

        Ok(Self { samples })
    }

    pub fn samples(&self) -> &[LabeledSample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<LabeledSample> {
        self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mapping over the sorted distinct labels of this index.
    pub fn class_mapping(&self) -> ClassMapping {
        ClassMapping::from_labels(self.samples.iter().map(|s| s.label.as_str()))
    }

    /// Number of samples per class name.
    pub fn class_counts(&self) -> BTreeMap<String, usize> {
        count_labels(&self.samples)
    }
}

/// Number of samples per class name.
pub fn count_labels(samples: &[LabeledSample]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for sample in samples {
        *counts.entry(sample.label.clone()).or_insert(0) += 1;
    }
    counts
}

/// Bijection between class names and dense indices `0..n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMapping {
    names: Vec<String>,
    lookup: HashMap<String, usize>,
}

impl ClassMapping {
    /// Builds a mapping that keeps the given order.
    pub fn from_names(names: Vec<String>) -> Result<Self, DataError> {
        let mut lookup = HashMap::with_capacity(names.len());
        for (idx, name) in names.iter().enumerate() {
            if lookup.insert(name.clone(), idx).is_some() {
                return Err(DataError::DuplicateClass(name.clone()));
            }
        }
        Ok(Self { names, lookup })
    }

    /// Builds a mapping over the sorted distinct labels.
    pub fn from_labels<'a, I>(labels: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let distinct: BTreeSet<&str> = labels.into_iter().collect();
        let names: Vec<String> = distinct.into_iter().map(str::to_string).collect();
        let lookup = names
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect();
        Self { names, lookup }
    }

    /// Class index for a name.
    pub fn index_of(&self, name: &str) -> Result<usize, DataError> {
        self.lookup
            .get(name)
            .copied()
            .ok_or_else(|| DataError::UnknownLabel(name.to_string()))
    }

    /// Class name for an index.
    pub fn name_of(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Fails on the first sample whose label has no entry.
    pub fn validate(&self, samples: &[LabeledSample]) -> Result<(), DataError> {
        for sample in samples {
            self.index_of(&sample.label)?;
        }
        Ok(())
    }
}

/// Shuffles `samples` and splits off `val_fraction` of them for validation.
///
/// Returns `(train, val)`. With the same seed the split is identical.
pub fn train_val_split(
    mut samples: Vec<LabeledSample>,
    val_fraction: f32,
    seed: u64,
) -> (Vec<LabeledSample>, Vec<LabeledSample>) {
    let n = samples.len();
    let val_len = ((n as f32 * val_fraction).round() as usize).min(n);

    let mut rng = StdRng::seed_from_u64(seed);
    samples.shuffle(&mut rng);

    let val = samples.split_off(n - val_len);
    (samples, val)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> &'static Path {
        Path::new("labels.csv")
    }

    #[test]
    fn test_parse_with_header_and_blank_lines() {
        let text = "path,label\nimg/a.nii.gz,male\n\nimg/b.nii.gz, female \n";
        let index = LabelIndex::parse(text, &IndexFormat::default(), origin()).unwrap();

        assert_eq!(index.len(), 2);
        assert_eq!(index.samples()[0], LabeledSample::new("img/a.nii.gz", "male"));
        assert_eq!(index.samples()[1].label, "female");
    }

    #[test]
    fn test_parse_custom_columns_and_suffix() {
        let format = IndexFormat {
            delimiter: '\t',
            has_header: false,
            path_column: 2,
            label_column: 0,
            path_suffix: Some(".dcm".to_string()),
        };
        let text = "1\tignored\t1.2.276.0.7230010\n0\tignored\t1.2.276.0.7230011\n";
        let index = LabelIndex::parse(text, &format, origin()).unwrap();

        assert_eq!(index.samples()[0].path, PathBuf::from("1.2.276.0.7230010.dcm"));
        assert_eq!(index.samples()[1].label, "0");
    }

    #[test]
    fn test_short_row_reports_line() {
        let text = "path,label\na.png,x\nb.png\n";
        let err = LabelIndex::parse(text, &IndexFormat::default(), origin()).unwrap_err();
        match err {
            DataError::IndexParse { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_class_mapping_is_sorted_bijection() {
        let text = "p,l\na,male\nb,female\nc,male\n";
        let index = LabelIndex::parse(text, &IndexFormat::default(), origin()).unwrap();
        let mapping = index.class_mapping();

        assert_eq!(mapping.names(), &["female".to_string(), "male".to_string()]);
        assert_eq!(mapping.index_of("male").unwrap(), 1);
        assert_eq!(mapping.name_of(0), Some("female"));
        assert!(matches!(mapping.index_of("other"), Err(DataError::UnknownLabel(_))));

        let counts = index.class_counts();
        assert_eq!(counts["male"], 2);
        assert_eq!(counts["female"], 1);
    }

    #[test]
    fn test_explicit_mapping_and_validation() {
        let mapping = ClassMapping::from_names(vec!["no".into(), "yes".into()]).unwrap();
        let ok = vec![LabeledSample::new("a", "yes")];
        let bad = vec![LabeledSample::new("a", "yes"), LabeledSample::new("b", "maybe")];

        assert!(mapping.validate(&ok).is_ok());
        assert!(matches!(mapping.validate(&bad), Err(DataError::UnknownLabel(l)) if l == "maybe"));
        assert!(ClassMapping::from_names(vec!["a".into(), "a".into()]).is_err());
    }

    #[test]
    fn test_train_val_split_is_deterministic_partition() {
        let samples: Vec<_> = (0..10)
            .map(|i| LabeledSample::new(format!("{i}.nii"), if i % 2 == 0 { "a" } else { "b" }))
            .collect();

        let (train, val) = train_val_split(samples.clone(), 0.2, 3);
        let (train2, val2) = train_val_split(samples.clone(), 0.2, 3);

        assert_eq!(train.len(), 8);
        assert_eq!(val.len(), 2);
        assert_eq!(train, train2);
        assert_eq!(val, val2);

        let mut all: Vec<_> = train.iter().chain(val.iter()).map(|s| s.path.clone()).collect();
        all.sort();
        let mut expected: Vec<_> = samples.iter().map(|s| s.path.clone()).collect();
        expected.sort();
        assert_eq!(all, expected);
    }
}
