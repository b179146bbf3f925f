use std::path::Path;

use image::RgbImage;
use tract_onnx::prelude::*;

use crate::error::{InferenceError, LoadError};
use crate::labels::Labels;
use crate::models::ClassificationResult;
use crate::preprocess::Preprocessor;

pub const MODEL_FILE: &str = "model.onnx";
pub const MODEL_CONFIG_FILE: &str = "config.json";
pub const PREPROCESSOR_CONFIG_FILE: &str = "preprocessor_config.json";

/// A loaded, read-only image classifier shared by every request.
pub trait ImageClassifier: Send + Sync {
    fn classify(&self, image: &RgbImage) -> Result<ClassificationResult, InferenceError>;

    fn label_count(&self) -> usize;
}

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

pub struct OnnxClassifier {
    plan: Plan,
    labels: Labels,
    preprocessor: Preprocessor,
}

impl OnnxClassifier {
    /// Loads `model.onnx` together with its label mapping and processor settings
    /// from `model_dir`, and optimizes the graph for the processor's input shape.
    pub fn load(model_dir: &Path) -> Result<Self, LoadError> {
        let labels = Labels::from_model_config(&model_dir.join(MODEL_CONFIG_FILE))?;
        let preprocessor = Preprocessor::from_path(&model_dir.join(PREPROCESSOR_CONFIG_FILE))?;

        let model_path = model_dir.join(MODEL_FILE);
        let [n, c, h, w] = preprocessor.input_shape();
        let model = tract_onnx::onnx()
            .model_for_path(&model_path)
            .and_then(|m| {
                m.with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(n, c, h, w)))
            })
            .and_then(|m| m.into_optimized())
            .map_err(|e| LoadError::Model(format!("{}: {}", model_path.display(), e)))?;

        match output_width(&model) {
            Some(outputs) if outputs != labels.len() => {
                return Err(LoadError::OutputWidth {
                    labels: labels.len(),
                    outputs,
                })
            }
            Some(_) => {}
            None => tracing::warn!("model output shape is symbolic, checking width per request"),
        }

        let plan = model
            .into_runnable()
            .map_err(|e| LoadError::Model(e.to_string()))?;

        tracing::info!(
            "Loaded {} with {} labels, input {:?}",
            model_path.display(),
            labels.len(),
            [n, c, h, w]
        );

        Ok(Self {
            plan,
            labels,
            preprocessor,
        })
    }
}

fn output_width(model: &TypedModel) -> Option<usize> {
    let fact = model.output_fact(0).ok()?;
    fact.shape
        .as_concrete()
        .map(|dims| dims.iter().product::<usize>())
}

impl ImageClassifier for OnnxClassifier {
    fn classify(&self, image: &RgbImage) -> Result<ClassificationResult, InferenceError> {
        let tensor = self.preprocessor.to_tensor(image)?.into_tensor();

        let outputs = self
            .plan
            .run(tvec!(tensor.into()))
            .map_err(|e| InferenceError::Model(e.to_string()))?;

        let logits: Vec<f32> = outputs
            .first()
            .ok_or(InferenceError::InvalidOutput)?
            .to_array_view::<f32>()
            .map_err(|e| InferenceError::Model(e.to_string()))?
            .iter()
            .copied()
            .collect();

        classify_logits(&logits, &self.labels)
    }

    fn label_count(&self) -> usize {
        self.labels.len()
    }
}

/// Picks the most probable label from raw model logits.
pub fn classify_logits(logits: &[f32], labels: &Labels) -> Result<ClassificationResult, InferenceError> {
    if logits.len() != labels.len() {
        return Err(InferenceError::ShapeMismatch {
            expected: labels.len(),
            actual: logits.len(),
        });
    }

    let (index, confidence) = softmax_argmax(logits).ok_or(InferenceError::InvalidOutput)?;
    let label = labels.get(index).ok_or(InferenceError::InvalidOutput)?;

    Ok(ClassificationResult {
        label: label.to_string(),
        confidence,
    })
}

/// Numerically stable softmax. Returns `None` for empty or non-finite input.
pub fn softmax(logits: &[f32]) -> Option<Vec<f32>> {
    if logits.is_empty() || logits.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    Some(exps.into_iter().map(|e| e / sum).collect())
}

/// Index of the highest probability and the probability itself. Ties go to the lowest index.
pub fn softmax_argmax(logits: &[f32]) -> Option<(usize, f32)> {
    let probs = softmax(logits)?;
    let mut best = 0;
    for (i, p) in probs.iter().enumerate() {
        if *p > probs[best] {
            best = i;
        }
    }
    Some((best, probs[best]))
}
