//! Persona descriptors and guided-journey progress.
//!
//! The backend walks the user through an ordered sequence of GEM personas.
//! [`GemProgress`] is the client-side picture of that walk: which personas
//! are done, which one is active, and how far along the journey is.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One persona the backend can answer as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GemDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Errors constructing a [`GemProgress`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProgressError {
    /// An identifier is not part of the journey sequence.
    #[error("unknown gem '{0}' in journey state")]
    UnknownGem(String),

    /// Completed identifiers are not a prefix of the sequence before the
    /// current persona.
    #[error("completed gems must form a prefix of the journey sequence")]
    BrokenPrefix,
}

/// Snapshot of the journey: ordered sequence, current pointer, completed set.
///
/// Construction validates the invariant that completed identifiers form a
/// prefix, in sequence order, of the identifiers preceding the current one,
/// and that `current` is `None` exactly when no persona is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GemProgress {
    sequence: Vec<String>,
    current: Option<String>,
    completed: Vec<String>,
}

impl GemProgress {
    pub fn new(
        sequence: Vec<String>,
        current: Option<String>,
        completed: Vec<String>,
    ) -> Result<Self, ProgressError> {
        let boundary = match &current {
            Some(id) => sequence
                .iter()
                .position(|g| g == id)
                .ok_or_else(|| ProgressError::UnknownGem(id.clone()))?,
            None => sequence.len(),
        };

        if completed.len() > boundary {
            return Err(ProgressError::BrokenPrefix);
        }
        for (done, expected) in completed.iter().zip(&sequence) {
            if done != expected {
                if !sequence.contains(done) {
                    return Err(ProgressError::UnknownGem(done.clone()));
                }
                return Err(ProgressError::BrokenPrefix);
            }
        }

        Ok(Self {
            sequence,
            current,
            completed,
        })
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn is_completed(&self, gem_id: &str) -> bool {
        self.completed.iter().any(|g| g == gem_id)
    }

    /// Completed count over total sequence length.
    pub fn fraction(&self) -> (usize, usize) {
        (self.completed.len(), self.sequence.len())
    }

    /// Next persona after the current one, if the journey is not finished.
    pub fn next_gem(&self) -> Option<&str> {
        match &self.current {
            Some(id) => {
                let idx = self.sequence.iter().position(|g| g == id)?;
                self.sequence.get(idx + 1).map(String::as_str)
            }
            None => self.sequence.get(self.completed.len()).map(String::as_str),
        }
    }

    pub fn sequence(&self) -> &[String] {
        &self.sequence
    }
}
