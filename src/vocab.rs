//! The label vocabulary: a bidirectional mapping between labels and dense class indices.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::ArtifactLoadError;

/// Maps labels to class indices `0..K` and back.
///
/// A fitted vocabulary keeps its labels in lexicographic order, so fitting the same set of labels
/// always assigns the same indices. Serialized as the plain list of labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LabelVocabulary {
    labels: Vec<String>,
    index: HashMap<String, usize>,
}

impl LabelVocabulary {
    /// Fits a vocabulary over the distinct labels in `labels`.
    pub fn fit<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let distinct: BTreeSet<String> = labels
            .into_iter()
            .map(|label| label.as_ref().to_string())
            .collect();
        Self::from_ordered(distinct.into_iter().collect())
    }

    /// Rebuilds a vocabulary from a persisted label list.
    ///
    /// The list order defines the indices. Fails if the list is empty or contains duplicates.
    pub fn from_labels(labels: Vec<String>) -> Result<Self, ArtifactLoadError> {
        if labels.is_empty() {
            return Err(ArtifactLoadError::EmptyVocabulary);
        }
        let vocab = Self::from_ordered(labels);
        if vocab.index.len() != vocab.labels.len() {
            let mut seen = BTreeSet::new();
            for label in &vocab.labels {
                if !seen.insert(label) {
                    return Err(ArtifactLoadError::DuplicateLabel(label.clone()));
                }
            }
        }
        Ok(vocab)
    }

    fn from_ordered(labels: Vec<String>) -> Self {
        let index = labels
            .iter()
            .enumerate()
            .map(|(i, label)| (label.clone(), i))
            .collect();
        Self { labels, index }
    }

    /// Returns the class index of `label`, or [`None`] if it is not part of the vocabulary.
    pub fn encode(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    /// Returns the label of class `index`, or [`None`] if `index` is out of range.
    pub fn decode(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Returns the number of classes, `K`.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Returns all labels, ordered by class index.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

impl TryFrom<Vec<String>> for LabelVocabulary {
    type Error = ArtifactLoadError;

    fn try_from(labels: Vec<String>) -> Result<Self, Self::Error> {
        Self::from_labels(labels)
    }
}

impl From<LabelVocabulary> for Vec<String> {
    fn from(vocab: LabelVocabulary) -> Self {
        vocab.labels
    }
}
