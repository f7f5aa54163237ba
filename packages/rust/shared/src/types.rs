//! Core domain types for clinical code retrieval.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CodeMatchError;

/// Codes extracted from a model answer, in emitted order (duplicates kept).
pub type ExtractedCodes = Vec<String>;

// ---------------------------------------------------------------------------
// CodeSystem
// ---------------------------------------------------------------------------

/// The standardized vocabulary a search index holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeSystem {
    /// LOINC laboratory and clinical observation codes.
    Loinc,
    /// ICD-10-CM diagnosis codes.
    #[serde(rename = "icd10cm")]
    Icd10Cm,
}

impl CodeSystem {
    /// Identifier used in config files and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loinc => "loinc",
            Self::Icd10Cm => "icd10cm",
        }
    }

    /// Human-facing vocabulary name used in prompts.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Loinc => "LOINC",
            Self::Icd10Cm => "ICD-10-CM",
        }
    }
}

impl std::fmt::Display for CodeSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodeSystem {
    type Err = CodeMatchError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "loinc" => Ok(Self::Loinc),
            "icd10cm" | "icd10" | "icd" => Ok(Self::Icd10Cm),
            other => Err(CodeMatchError::validation(format!(
                "unknown code system '{other}': expected 'loinc' or 'icd10cm'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Candidate
// ---------------------------------------------------------------------------

/// One retrieved code/label pair considered as a possible match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Code value from the index document (e.g. `718-7`).
    pub code: String,
    /// Human-readable description from the index document.
    pub label: String,
    /// Relevance score reported by the backend.
    pub score: f64,
    /// Zero-based position in the backend's ranked hit list.
    pub rank: usize,
}

// ---------------------------------------------------------------------------
// CandidateSet
// ---------------------------------------------------------------------------

/// Ranked candidates plus the derived code → label mapping.
///
/// The mapping treats codes as unique keys: a repeated code overwrites the
/// earlier label but keeps its first position, so iterating the mapping
/// follows descending relevance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateSet {
    candidates: Vec<Candidate>,
    labels: Vec<(String, String)>,
    positions: HashMap<String, usize>,
}

impl CandidateSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next hit in rank order.
    pub fn push(&mut self, code: impl Into<String>, label: impl Into<String>, score: f64) {
        let code = code.into();
        let label = label.into();
        let rank = self.candidates.len();

        match self.positions.get(&code) {
            Some(&pos) => self.labels[pos].1 = label.clone(),
            None => {
                self.positions.insert(code.clone(), self.labels.len());
                self.labels.push((code.clone(), label.clone()));
            }
        }

        self.candidates.push(Candidate {
            code,
            label,
            score,
            rank,
        });
    }

    /// All hits in backend order, including repeated codes.
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Unique `(code, label)` pairs in first-seen order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels.iter().map(|(c, l)| (c.as_str(), l.as_str()))
    }

    /// Label for a code, if it was retrieved.
    pub fn label(&self, code: &str) -> Option<&str> {
        self.positions
            .get(code)
            .map(|&pos| self.labels[pos].1.as_str())
    }

    /// Number of raw hits.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Number of distinct codes.
    pub fn code_count(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

impl<C, L> FromIterator<(C, L, f64)> for CandidateSet
where
    C: Into<String>,
    L: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (C, L, f64)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (code, label, score) in iter {
            set.push(code, label, score);
        }
        set
    }
}
