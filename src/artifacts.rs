//! Persistence of a trained classifier together with its label vocabulary.
//!
//! A classifier's output indices only mean something relative to the vocabulary it was trained
//! against, so the two are always saved and loaded as an [`ArtifactPair`]. Both files record the
//! same randomly generated run ID, and loading refuses files from different training runs.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    classifier::{train::TrainOutcome, Classifier},
    error::{ArtifactLoadError, ArtifactSaveError},
    landmark::FEATURE_LEN,
    vocab::LabelVocabulary,
};

/// File name of the classifier inside an artifact directory.
pub const CLASSIFIER_FILE: &str = "classifier.json";

/// File name of the vocabulary inside an artifact directory.
pub const VOCABULARY_FILE: &str = "vocabulary.json";

/// Version of the on-disk format written by this crate.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct ClassifierFile {
    format_version: u32,
    run_id: String,
    input_width: usize,
    labels: Vec<String>,
    classifier: Classifier,
}

#[derive(Serialize, Deserialize)]
struct VocabularyFile {
    format_version: u32,
    run_id: String,
    labels: Vec<String>,
}

/// A classifier and the vocabulary its output indices refer to.
#[derive(Debug, Clone)]
pub struct ArtifactPair {
    classifier: Classifier,
    vocabulary: LabelVocabulary,
    run_id: String,
}

impl ArtifactPair {
    /// Pairs a freshly trained classifier with its vocabulary under a new run ID.
    pub fn new(classifier: Classifier, vocabulary: LabelVocabulary) -> Self {
        Self {
            classifier,
            vocabulary,
            run_id: format!("{:016x}", fastrand::u64(..)),
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn vocabulary(&self) -> &LabelVocabulary {
        &self.vocabulary
    }

    /// Returns the ID shared by both artifacts of this pair.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn into_parts(self) -> (Classifier, LabelVocabulary) {
        (self.classifier, self.vocabulary)
    }

    /// Writes both artifacts into `dir`, creating it if necessary.
    ///
    /// Both files are written under temporary names first, and only renamed into place once both
    /// were written successfully. Temporary files are removed if saving fails.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<(), ArtifactSaveError> {
        let dir = dir.as_ref();
        let classifier = serde_json::to_vec(&ClassifierFile {
            format_version: FORMAT_VERSION,
            run_id: self.run_id.clone(),
            input_width: self.classifier.input_width(),
            labels: self.vocabulary.labels().to_vec(),
            classifier: self.classifier.clone(),
        })?;
        let vocabulary = serde_json::to_vec_pretty(&VocabularyFile {
            format_version: FORMAT_VERSION,
            run_id: self.run_id.clone(),
            labels: self.vocabulary.labels().to_vec(),
        })?;

        fs::create_dir_all(dir).map_err(|source| ArtifactSaveError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let staged = [
            (dir.join(CLASSIFIER_FILE), classifier),
            (dir.join(VOCABULARY_FILE), vocabulary),
        ]
        .map(|(path, data)| (tmp_path(&path), path, data));
        if let Err(e) = commit(&staged) {
            for (tmp, ..) in &staged {
                fs::remove_file(tmp).ok();
            }
            return Err(e);
        }

        log::info!(
            "saved classifier and vocabulary (run {}) to '{}'",
            self.run_id,
            dir.display()
        );
        Ok(())
    }

    /// Loads and cross-checks the artifact pair stored in `dir`.
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self, ArtifactLoadError> {
        let dir = dir.as_ref();
        let clf: ClassifierFile = read_json(&dir.join(CLASSIFIER_FILE))?;
        let vocab: VocabularyFile = read_json(&dir.join(VOCABULARY_FILE))?;

        for found in [clf.format_version, vocab.format_version] {
            if found != FORMAT_VERSION {
                return Err(ArtifactLoadError::FormatVersion {
                    expected: FORMAT_VERSION,
                    found,
                });
            }
        }

        let vocabulary = LabelVocabulary::from_labels(vocab.labels)?;
        let classifier = clf.classifier;
        classifier.validate()?;

        for found in [clf.input_width, classifier.input_width()] {
            if found != FEATURE_LEN {
                return Err(ArtifactLoadError::InputWidth {
                    expected: FEATURE_LEN,
                    found,
                });
            }
        }
        if classifier.output_width() != vocabulary.len() {
            return Err(ArtifactLoadError::OutputWidth {
                classifier: classifier.output_width(),
                vocabulary: vocabulary.len(),
            });
        }
        if clf.labels != vocabulary.labels() {
            return Err(ArtifactLoadError::LabelMismatch {
                classifier: clf.labels,
                vocabulary: vocabulary.labels().to_vec(),
            });
        }
        if clf.run_id != vocab.run_id {
            return Err(ArtifactLoadError::RunMismatch {
                classifier: clf.run_id,
                vocabulary: vocab.run_id,
            });
        }

        log::debug!(
            "loaded artifacts of run {} from '{}': {} classes",
            clf.run_id,
            dir.display(),
            vocabulary.len()
        );
        Ok(Self {
            classifier,
            vocabulary,
            run_id: clf.run_id,
        })
    }
}

impl From<TrainOutcome> for ArtifactPair {
    fn from(outcome: TrainOutcome) -> Self {
        Self::new(outcome.classifier, outcome.vocabulary)
    }
}

/// Writes every `(tmp, path, data)` entry to `tmp`, then renames all of them to `path`.
fn commit(staged: &[(PathBuf, PathBuf, Vec<u8>)]) -> Result<(), ArtifactSaveError> {
    for (tmp, _, data) in staged {
        fs::write(tmp, data).map_err(|source| ArtifactSaveError::Io {
            path: tmp.clone(),
            source,
        })?;
    }
    for (tmp, path, _) in staged {
        fs::rename(tmp, path).map_err(|source| ArtifactSaveError::Io {
            path: path.clone(),
            source,
        })?;
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ArtifactLoadError> {
    let data = fs::read(path).map_err(|source| ArtifactLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&data).map_err(|source| ArtifactLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TempDir;

    fn pair(labels: &[&str]) -> ArtifactPair {
        let mut rng = fastrand::Rng::with_seed(5);
        let vocabulary = LabelVocabulary::fit(labels);
        let classifier = Classifier::init(FEATURE_LEN, &[8], vocabulary.len(), &mut rng);
        ArtifactPair::new(classifier, vocabulary)
    }

    fn rewrite_json(path: &Path, f: impl FnOnce(&mut serde_json::Value)) {
        let mut value: serde_json::Value =
            serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
        f(&mut value);
        fs::write(path, serde_json::to_vec(&value).unwrap()).unwrap();
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = TempDir::new("artifacts-roundtrip");
        let saved = pair(&["A", "B", "C"]);
        saved.save(dir.path().join("model")).unwrap();

        let loaded = ArtifactPair::load(dir.path().join("model")).unwrap();
        assert_eq!(loaded.run_id(), saved.run_id());
        assert_eq!(loaded.vocabulary(), saved.vocabulary());
        assert_eq!(
            serde_json::to_string(loaded.classifier()).unwrap(),
            serde_json::to_string(saved.classifier()).unwrap()
        );
        assert!(!dir.path().join("model").join("classifier.json.tmp").exists());
    }

    #[test]
    fn failed_save_removes_staged_files() {
        let dir = TempDir::new("artifacts-failed-save");
        let model = dir.path().join("model");

        // A non-empty directory in place of the classifier file makes the rename fail.
        fs::create_dir_all(model.join(CLASSIFIER_FILE).join("occupied")).unwrap();

        assert!(matches!(
            pair(&["A", "B"]).save(&model),
            Err(ArtifactSaveError::Io { .. })
        ));
        let mut names = fs::read_dir(&model)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect::<Vec<_>>();
        names.sort();
        assert_eq!(names, [CLASSIFIER_FILE]);
    }

    #[test]
    fn rejects_vocabulary_from_another_run() {
        let dir = TempDir::new("artifacts-run");
        let (a, b) = (dir.path().join("a"), dir.path().join("b"));
        pair(&["A", "B"]).save(&a).unwrap();
        pair(&["A", "B"]).save(&b).unwrap();

        fs::copy(b.join(VOCABULARY_FILE), a.join(VOCABULARY_FILE)).unwrap();
        assert!(matches!(
            ArtifactPair::load(&a),
            Err(ArtifactLoadError::RunMismatch { .. })
        ));
    }

    #[test]
    fn rejects_mismatched_labels() {
        let dir = TempDir::new("artifacts-labels");
        let (a, b, c) = (
            dir.path().join("a"),
            dir.path().join("b"),
            dir.path().join("c"),
        );
        pair(&["A", "B"]).save(&a).unwrap();
        pair(&["A", "C"]).save(&b).unwrap();
        pair(&["A", "B", "C"]).save(&c).unwrap();

        fs::copy(b.join(VOCABULARY_FILE), a.join(VOCABULARY_FILE)).unwrap();
        assert!(matches!(
            ArtifactPair::load(&a),
            Err(ArtifactLoadError::LabelMismatch { .. })
        ));

        fs::copy(c.join(VOCABULARY_FILE), b.join(VOCABULARY_FILE)).unwrap();
        assert!(matches!(
            ArtifactPair::load(&b),
            Err(ArtifactLoadError::OutputWidth {
                classifier: 2,
                vocabulary: 3
            })
        ));
    }

    #[test]
    fn rejects_malformed_files() {
        let dir = TempDir::new("artifacts-malformed");
        let path = dir.path();

        assert!(matches!(
            ArtifactPair::load(path),
            Err(ArtifactLoadError::Io { .. })
        ));

        pair(&["A", "B"]).save(path).unwrap();
        rewrite_json(&path.join(VOCABULARY_FILE), |v| {
            v["format_version"] = 99.into();
        });
        assert!(matches!(
            ArtifactPair::load(path),
            Err(ArtifactLoadError::FormatVersion { found: 99, .. })
        ));

        pair(&["A", "B"]).save(path).unwrap();
        rewrite_json(&path.join(VOCABULARY_FILE), |v| {
            v["labels"] = serde_json::json!(["A", "A"]);
        });
        assert!(matches!(
            ArtifactPair::load(path),
            Err(ArtifactLoadError::DuplicateLabel(_))
        ));

        pair(&["A", "B"]).save(path).unwrap();
        rewrite_json(&path.join(CLASSIFIER_FILE), |v| {
            v["input_width"] = 42.into();
        });
        assert!(matches!(
            ArtifactPair::load(path),
            Err(ArtifactLoadError::InputWidth { found: 42, .. })
        ));

        fs::write(path.join(CLASSIFIER_FILE), b"{ not json").unwrap();
        assert!(matches!(
            ArtifactPair::load(path),
            Err(ArtifactLoadError::Parse { .. })
        ));
    }
}
