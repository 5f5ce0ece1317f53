//! Seams for the pieces that live outside the vault: image classification
//! and free-text chat responses.

use anyhow::{Result, bail};

/// Turns an uploaded scan image into a diagnosis label.
pub trait ImageClassifier {
    fn classify(&self, image: &[u8]) -> Result<String>;
}

/// Produces a reply to a free-text message.
pub trait TextResponder {
    fn respond(&self, message: &str) -> Result<String>;
}

pub const PLACEHOLDER_FINDING: &str = "Possible abnormality detected in the frontal lobe.";

/// Stand-in classifier that reports a fixed finding for any non-empty image.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderClassifier;

impl ImageClassifier for PlaceholderClassifier {
    fn classify(&self, image: &[u8]) -> Result<String> {
        if image.is_empty() {
            bail!("image is empty");
        }
        Ok(PLACEHOLDER_FINDING.to_string())
    }
}

/// Classifier that always returns the given label, e.g. a physician's
/// own reading.
#[derive(Debug, Clone)]
pub struct FixedDiagnosis(pub String);

impl ImageClassifier for FixedDiagnosis {
    fn classify(&self, _image: &[u8]) -> Result<String> {
        Ok(self.0.clone())
    }
}
