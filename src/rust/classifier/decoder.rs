use ndarray::{Array2, ArrayView1};
use serde::ser::{Serialize, SerializeMap, SerializeStruct, Serializer};

use super::error::ClassifierError;
use super::registry::ClassIndexRegistry;

/// Confidence grade shown alongside a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Moderate,
    High,
}

impl Severity {
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence > 0.85 {
            Severity::High
        } else if confidence > 0.65 {
            Severity::Moderate
        } else {
            Severity::Low
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Severity::Low => "low",
            Severity::Moderate => "moderate",
            Severity::High => "high",
        };
        f.write_str(label)
    }
}

/// Score of a single class, carried in registry order.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassScore {
    pub label: String,
    pub index: usize,
    pub score: f32,
}

/// Result of decoding one model output against a registry.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPrediction {
    pub class_name: String,
    pub class_index: usize,
    pub confidence: f32,
    /// Every class with its score, ordered by registry index.
    pub all_classes: Vec<ClassScore>,
}

impl DecodedPrediction {
    pub fn score_of(&self, label: &str) -> Option<f32> {
        self.all_classes
            .iter()
            .find(|class| class.label == label)
            .map(|class| class.score)
    }

    pub fn severity(&self) -> Severity {
        Severity::from_confidence(self.confidence)
    }
}

impl Serialize for DecodedPrediction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct OrderedScores<'a>(&'a [ClassScore]);

        impl Serialize for OrderedScores<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(self.0.len()))?;
                for class in self.0 {
                    map.serialize_entry(&class.label, &class.score)?;
                }
                map.end()
            }
        }

        let mut state = serializer.serialize_struct("DecodedPrediction", 5)?;
        state.serialize_field("class", &self.class_name)?;
        state.serialize_field("class_index", &self.class_index)?;
        state.serialize_field("confidence", &self.confidence)?;
        state.serialize_field("severity", &self.severity())?;
        state.serialize_field("all_classes", &OrderedScores(&self.all_classes))?;
        state.end()
    }
}

/// Maps a score vector onto registry names.
///
/// The top class is the highest score; on ties the lowest index wins. NaN scores never
/// win, and a vector made only of NaN resolves to index 0.
///
/// # Errors
/// * `ShapeMismatch` if `scores.len() != registry.len()`
pub fn decode(scores: &[f32], registry: &ClassIndexRegistry) -> Result<DecodedPrediction, ClassifierError> {
    if scores.len() != registry.len() {
        return Err(ClassifierError::shape_mismatch(
            format!("{} scores", registry.len()),
            format!("{} scores", scores.len()),
        ));
    }

    let mut best = 0;
    for (index, &score) in scores.iter().enumerate().skip(1) {
        // strict comparison keeps the earliest index on ties
        if score > scores[best] || (scores[best].is_nan() && !score.is_nan()) {
            best = index;
        }
    }

    let all_classes = registry
        .ordered_names()
        .iter()
        .zip(scores)
        .enumerate()
        .map(|(index, (label, &score))| ClassScore { label: label.clone(), index, score })
        .collect();

    Ok(DecodedPrediction {
        class_name: registry.ordered_names()[best].clone(),
        class_index: best,
        confidence: scores[best],
        all_classes,
    })
}

pub fn decode_view(scores: ArrayView1<f32>, registry: &ClassIndexRegistry) -> Result<DecodedPrediction, ClassifierError> {
    let scores = scores.to_vec();
    decode(&scores, registry)
}

/// Decodes a `[1, N]` model output.
pub fn decode_batch_output(output: &Array2<f32>, registry: &ClassIndexRegistry) -> Result<DecodedPrediction, ClassifierError> {
    let (batch, classes) = output.dim();
    if batch != 1 {
        return Err(ClassifierError::shape_mismatch(
            format!("[1, {}]", registry.len()),
            format!("[{}, {}]", batch, classes),
        ));
    }
    decode_view(output.row(0), registry)
}
