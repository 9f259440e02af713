//! Labeled feature tables built from image corpora.
//!
//! A corpus is a directory tree of images where the name of the directory containing an image is
//! its label:
//!
//! ```text
//! corpus/
//!   A/
//!     a_001.jpg
//!   B/
//!     b_001.png
//! ```
//!
//! [`DatasetBuilder::build`] runs the [`Extractor`] on every image and collects one [`Example`] per
//! detected hand. Images without a hand and files that cannot be read or decoded are recorded as
//! [`Miss`]es instead.
//!
//! A [`Dataset`] can be exported to a CSV file with 63 feature columns (named `0` to `62`) followed
//! by a `label` column, and read back for training.

use std::{
    collections::BTreeMap,
    fmt,
    fs::{self, File},
    io::{self, BufRead, BufReader, BufWriter, Write},
    iter::Peekable,
    path::{Path, PathBuf},
    str::Chars,
};

use crate::{
    error::{BuildError, CorpusReadError, DatasetFormatError, ExtractError},
    extract::{Extractor, HandDetector},
    image::Image,
    landmark::{FeatureVector, FEATURE_LEN},
    timer::ProgressLogger,
};

/// File extensions (compared case-insensitively) of corpus images.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

const LABEL_COLUMN: &str = "label";

/// One row of the feature table.
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub features: FeatureVector,
    pub label: String,
}

/// Why a corpus file did not produce an [`Example`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MissReason {
    /// The image was decoded, but no hand was detected.
    NoHand,
    /// The file could not be read.
    Unreadable,
    /// The file contents are not a supported image.
    Undecodable,
    /// The name of the directory containing the file is not valid UTF-8, so it has no label.
    InvalidLabel,
}

impl MissReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissReason::NoHand => "no-hand",
            MissReason::Unreadable => "unreadable",
            MissReason::Undecodable => "undecodable",
            MissReason::InvalidLabel => "invalid-label",
        }
    }
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A corpus file that was excluded from the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Miss {
    pub path: PathBuf,
    pub reason: MissReason,
}

/// A table of labeled feature vectors.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    examples: Vec<Example>,
    misses: Vec<Miss>,
}

impl Dataset {
    pub fn new(examples: Vec<Example>) -> Self {
        Self {
            examples,
            misses: Vec::new(),
        }
    }

    pub fn examples(&self) -> &[Example] {
        &self.examples
    }

    /// Returns the files that were skipped while building this dataset, in visiting order.
    pub fn misses(&self) -> &[Miss] {
        &self.misses
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Returns the number of examples per label.
    pub fn label_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for ex in &self.examples {
            *counts.entry(ex.label.as_str()).or_default() += 1;
        }
        counts
    }

    /// Writes the table to a CSV file at `path`.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write_csv_to(&mut out)?;
        out.flush()
    }

    /// Writes the table as CSV.
    pub fn write_csv_to<W: Write>(&self, mut out: W) -> io::Result<()> {
        for column in 0..FEATURE_LEN {
            write!(out, "{column},")?;
        }
        writeln!(out, "{LABEL_COLUMN}")?;

        for ex in &self.examples {
            for value in ex.features.as_slice() {
                write!(out, "{value},")?;
            }
            writeln!(out, "{}", CsvField(&ex.label))?;
        }
        Ok(())
    }

    /// Reads a table from a CSV file written by [`Dataset::write_csv`].
    pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Self, DatasetFormatError> {
        Self::read_csv_from(BufReader::new(File::open(path)?))
    }

    /// Reads a CSV table.
    ///
    /// The header and every row must have exactly 63 feature columns and one label column. Quoted
    /// labels may contain commas, quotes and line breaks.
    pub fn read_csv_from<R: BufRead>(mut reader: R) -> Result<Self, DatasetFormatError> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        let mut records = Records::new(&text);

        let header = match records.next() {
            Some(record) => record?,
            None => return Err(DatasetFormatError::Empty),
        };
        let expected_header = (0..FEATURE_LEN)
            .map(|i| i.to_string())
            .chain([LABEL_COLUMN.to_string()]);
        if header.fields.into_iter().ne(expected_header) {
            return Err(DatasetFormatError::Header {
                expected: FEATURE_LEN,
            });
        }

        let mut examples = Vec::new();
        for record in records {
            let record = record?;
            if record.is_blank() {
                continue;
            }
            examples.push(parse_row(record)?);
        }

        Ok(Self::new(examples))
    }

    /// Writes the miss list to `path`: one `path<TAB>reason` entry per line.
    pub fn write_misses<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        for miss in &self.misses {
            writeln!(out, "{}\t{}", miss.path.display(), miss.reason)?;
        }
        out.flush()
    }
}

fn parse_row(record: Record) -> Result<Example, DatasetFormatError> {
    let Record { line, mut fields } = record;
    if fields.len() != FEATURE_LEN + 1 {
        return Err(DatasetFormatError::ColumnCount {
            line,
            expected: FEATURE_LEN + 1,
            found: fields.len(),
        });
    }

    let label = fields.pop().unwrap_or_default();
    let mut values = [0.0; FEATURE_LEN];
    for (column, (value, field)) in values.iter_mut().zip(&fields).enumerate() {
        *value = field
            .trim()
            .parse::<f32>()
            .map_err(|_| DatasetFormatError::Number {
                line,
                column,
                value: field.clone(),
            })?;
    }

    if label.is_empty() {
        return Err(DatasetFormatError::EmptyLabel { line });
    }

    // NaN and infinities parse fine, but are not valid features.
    let features = FeatureVector::from_array(values).map_err(|err| {
        let column = match err {
            ExtractError::NonFinite { index } => index,
            _ => 0,
        };
        DatasetFormatError::Number {
            line,
            column,
            value: fields[column].clone(),
        }
    })?;
    Ok(Example { features, label })
}

/// One CSV record and the line it starts on.
struct Record {
    line: usize,
    fields: Vec<String>,
}

impl Record {
    fn is_blank(&self) -> bool {
        matches!(&self.fields[..], [field] if field.is_empty())
    }
}

/// Splits CSV text into [`Record`]s.
///
/// A record ends at an unquoted line break (`\n` or `\r\n`). Quoted fields may span lines, and
/// `""` inside quotes stands for a single quote.
struct Records<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
}

impl<'a> Records<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
            line: 1,
        }
    }

    fn record(&mut self) -> Result<Record, DatasetFormatError> {
        let line = self.line;
        let mut fields = Vec::new();
        loop {
            let field = if self.chars.next_if_eq(&'"').is_some() {
                self.quoted(line)?
            } else {
                self.unquoted()
            };
            fields.push(field);

            match self.chars.next() {
                Some(',') => {}
                Some('\n') => {
                    self.line += 1;
                    break;
                }
                Some('\r') if self.chars.next_if_eq(&'\n').is_some() => {
                    self.line += 1;
                    break;
                }
                None => break,
                Some(_) => return Err(DatasetFormatError::Quote { line: self.line }),
            }
        }
        Ok(Record { line, fields })
    }

    /// Reads an unquoted field, stopping before the next separator or line break.
    fn unquoted(&mut self) -> String {
        let mut field = String::new();
        while let Some(c) = self.chars.next_if(|&c| c != ',' && c != '\n') {
            field.push(c);
        }
        if self.chars.peek() != Some(&',') && field.ends_with('\r') {
            field.pop();
        }
        field
    }

    /// Reads the rest of a quoted field, up to and including the closing quote.
    fn quoted(&mut self, start: usize) -> Result<String, DatasetFormatError> {
        let mut field = String::new();
        loop {
            match self.chars.next() {
                Some('"') if self.chars.next_if_eq(&'"').is_some() => field.push('"'),
                Some('"') => return Ok(field),
                Some(c) => {
                    if c == '\n' {
                        self.line += 1;
                    }
                    field.push(c);
                }
                None => return Err(DatasetFormatError::Quote { line: start }),
            }
        }
    }
}

impl Iterator for Records<'_> {
    type Item = Result<Record, DatasetFormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.chars.peek()?;
        Some(self.record())
    }
}

/// Displays a CSV field, quoting it if needed.
struct CsvField<'a>(&'a str);

impl fmt::Display for CsvField<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.contains(&[',', '"', '\n', '\r'][..]) {
            write!(f, "\"{}\"", self.0.replace('"', "\"\""))
        } else {
            f.write_str(self.0)
        }
    }
}

/// Builds [`Dataset`]s from image corpora.
pub struct DatasetBuilder<D> {
    extractor: Extractor<D>,
}

impl<D: HandDetector> DatasetBuilder<D> {
    pub fn new(detector: D) -> Self {
        Self {
            extractor: Extractor::new(detector),
        }
    }

    /// Walks the corpus at `root` and extracts one example per image with a detectable hand.
    ///
    /// Files are visited in sorted path order, so the row order is stable. Hidden files and
    /// directories are skipped, as are files without an image extension and files placed directly
    /// in `root` (they have no label).
    pub fn build<P: AsRef<Path>>(&mut self, root: P) -> Result<Dataset, BuildError> {
        let root = root.as_ref();
        let mut files = Vec::new();
        walk(root, root, &mut files)?;
        log::info!("found {} images in '{}'", files.len(), root.display());

        let mut dataset = Dataset::default();
        let mut progress = ProgressLogger::new("extracting landmarks", files.len());
        for (path, label) in files {
            let miss = |reason| Miss {
                path: path.clone(),
                reason,
            };
            let Some(label) = label else {
                dataset.misses.push(miss(MissReason::InvalidLabel));
                progress.tick();
                continue;
            };
            match Image::load(&path) {
                Ok(image) => match self.extractor.extract(&image) {
                    Ok(Some(features)) => dataset.examples.push(Example { features, label }),
                    Ok(None) => {
                        log::debug!("no hand detected in '{}'", path.display());
                        dataset.misses.push(miss(MissReason::NoHand));
                    }
                    Err(source) => return Err(BuildError::Extract { path, source }),
                },
                Err(e) => {
                    log::debug!("{e}");
                    let reason = match e {
                        CorpusReadError::Io { .. } => MissReason::Unreadable,
                        CorpusReadError::Decode { .. } => MissReason::Undecodable,
                    };
                    dataset.misses.push(miss(reason));
                }
            }
            progress.tick_with(self.extractor.timers());
        }

        log_summary(&dataset);
        Ok(dataset)
    }

    pub fn into_detector(self) -> D {
        self.extractor.into_detector()
    }
}

fn log_summary(dataset: &Dataset) {
    log::info!(
        "extracted {} examples ({} labels), {} images skipped",
        dataset.len(),
        dataset.label_counts().len(),
        dataset.misses().len(),
    );
    for (label, count) in dataset.label_counts() {
        log::debug!("label '{label}': {count} examples");
    }

    if !dataset.misses().is_empty() {
        let mut by_reason = BTreeMap::new();
        for miss in dataset.misses() {
            *by_reason.entry(miss.reason).or_insert(0) += 1;
        }
        let summary = by_reason
            .iter()
            .map(|(reason, count)| format!("{reason}: {count}"))
            .collect::<Vec<_>>()
            .join(", ");
        log::warn!("skipped images by reason: {summary}");
    }
}

/// Recursively collects `(path, label)` pairs of all images below `dir`, in sorted order.
///
/// The label is [`None`] if the directory name is not valid UTF-8.
fn walk(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(PathBuf, Option<String>)>,
) -> Result<(), BuildError> {
    let walk_error = |source| BuildError::Walk {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = fs::read_dir(dir)
        .and_then(|entries| entries.collect::<io::Result<Vec<_>>>())
        .map_err(walk_error)?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        if entry.file_type().map_err(walk_error)?.is_dir() {
            walk(root, &path, out)?;
        } else if is_image(&path) {
            if dir == root {
                log::warn!("ignoring unlabeled image '{}'", path.display());
                continue;
            }
            let label = dir.file_name().and_then(|name| name.to_str());
            if label.is_none() {
                log::warn!("directory name of '{}' is not valid UTF-8", path.display());
            }
            out.push((path, label.map(str::to_string)));
        }
    }
    Ok(())
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}
