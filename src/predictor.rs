//! Finishing-position predictors
//!
//! A [`Predictor`] maps one [`FeatureVector`] to a predicted finishing
//! position (lower is better). A [`Classifier`] answers a yes/no question
//! about a driver (podium finish) with a probability.
//!
//! Trained models are shipped as JSON artifacts holding the feature order,
//! coefficients and intercept. ONNX models are supported behind the `onnx`
//! cargo feature.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::data::features::{BASE_FEATURE_NAMES, WEATHER_FEATURE_NAMES};
use crate::error::PipelineError;
use crate::models::{Classification, FeatureVector};

/// Default decision threshold for classifiers
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Maps a feature vector to a predicted finishing position
pub trait Predictor {
    fn name(&self) -> &str;

    fn predict(&self, features: &FeatureVector) -> Result<f64, PipelineError>;

    /// Whether predictions read the weather columns
    fn uses_weather(&self) -> bool {
        true
    }

    /// Predict for a whole field; implementations may batch
    fn predict_batch(&self, features: &[FeatureVector]) -> Result<Vec<f64>, PipelineError> {
        features.iter().map(|f| self.predict(f)).collect()
    }
}

/// Binary yes/no with probability (e.g. podium finish)
pub trait Classifier {
    fn classify(&self, features: &FeatureVector) -> Result<Classification, PipelineError>;

    /// Whether classification reads the weather columns
    fn uses_weather(&self) -> bool {
        true
    }
}

impl<P: Predictor + ?Sized> Predictor for &P {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn predict(&self, features: &FeatureVector) -> Result<f64, PipelineError> {
        (**self).predict(features)
    }

    fn uses_weather(&self) -> bool {
        (**self).uses_weather()
    }

    fn predict_batch(&self, features: &[FeatureVector]) -> Result<Vec<f64>, PipelineError> {
        (**self).predict_batch(features)
    }
}

impl<P: Predictor + ?Sized> Predictor for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn predict(&self, features: &FeatureVector) -> Result<f64, PipelineError> {
        (**self).predict(features)
    }

    fn uses_weather(&self) -> bool {
        (**self).uses_weather()
    }

    fn predict_batch(&self, features: &[FeatureVector]) -> Result<Vec<f64>, PipelineError> {
        (**self).predict_batch(features)
    }
}

/// What a model artifact predicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Finishing position
    #[default]
    Regression,
    /// Probability of a yes label
    Classification,
}

/// Serialized linear/logistic model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    #[serde(default)]
    pub kind: ModelKind,
    pub features: Vec<String>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    #[serde(default)]
    pub threshold: Option<f64>,
}

impl ModelArtifact {
    /// Read an artifact from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let body = fs::read_to_string(path).map_err(|e| model_error(path, e))?;
        let artifact: ModelArtifact =
            serde_json::from_str(&body).map_err(|e| model_error(path, e))?;
        artifact.validate().map_err(|reason| model_error(path, reason))?;
        Ok(artifact)
    }

    /// Check shape and feature names
    pub fn validate(&self) -> Result<(), String> {
        if self.features.is_empty() {
            return Err("model has no features".to_string());
        }
        if self.features.len() != self.coefficients.len() {
            return Err(format!(
                "{} features but {} coefficients",
                self.features.len(),
                self.coefficients.len()
            ));
        }
        if let Some(unknown) = self.features.iter().find(|f| !is_known_feature(f)) {
            return Err(format!("unknown feature '{}'", unknown));
        }
        if !self.intercept.is_finite() || self.coefficients.iter().any(|c| !c.is_finite()) {
            return Err("non-finite coefficient".to_string());
        }
        if let Some(t) = self.threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(format!("threshold {} outside [0, 1]", t));
            }
        }
        Ok(())
    }

    /// True when any weather column is an input
    pub fn uses_weather(&self) -> bool {
        self.features
            .iter()
            .any(|f| WEATHER_FEATURE_NAMES.contains(&f.as_str()))
    }

    fn score(&self, features: &FeatureVector) -> Result<f64, PipelineError> {
        self.features
            .iter()
            .zip(&self.coefficients)
            .try_fold(self.intercept, |acc, (name, coef)| {
                let value = features.value(name).ok_or_else(|| {
                    PipelineError::Prediction(format!(
                        "feature '{}' missing for {}",
                        name, features.driver
                    ))
                })?;
                Ok(acc + coef * value)
            })
    }
}

fn is_known_feature(name: &str) -> bool {
    BASE_FEATURE_NAMES.contains(&name) || WEATHER_FEATURE_NAMES.contains(&name)
}

fn model_error(path: &Path, reason: impl ToString) -> PipelineError {
    PipelineError::Model {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Linear regression over named features
#[derive(Debug, Clone)]
pub struct LinearModel {
    artifact: ModelArtifact,
}

impl LinearModel {
    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, PipelineError> {
        artifact
            .validate()
            .map_err(|reason| PipelineError::Config(format!("invalid model: {}", reason)))?;
        if artifact.kind != ModelKind::Regression {
            return Err(PipelineError::Config(
                "classification artifact used as a regression model".to_string(),
            ));
        }
        Ok(Self { artifact })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let artifact = ModelArtifact::load(path)?;
        if artifact.kind != ModelKind::Regression {
            return Err(model_error(path, "expected a regression model"));
        }
        info!("Loaded linear model ({} features) from {:?}", artifact.features.len(), path);
        Ok(Self { artifact })
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }
}

impl Predictor for LinearModel {
    fn name(&self) -> &str {
        "linear"
    }

    fn predict(&self, features: &FeatureVector) -> Result<f64, PipelineError> {
        self.artifact.score(features)
    }

    fn uses_weather(&self) -> bool {
        self.artifact.uses_weather()
    }
}

/// Logistic regression for yes/no questions
#[derive(Debug, Clone)]
pub struct LogisticModel {
    artifact: ModelArtifact,
    threshold: f64,
}

impl LogisticModel {
    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, PipelineError> {
        artifact
            .validate()
            .map_err(|reason| PipelineError::Config(format!("invalid model: {}", reason)))?;
        if artifact.kind != ModelKind::Classification {
            return Err(PipelineError::Config(
                "regression artifact used as a classifier".to_string(),
            ));
        }
        let threshold = artifact.threshold.unwrap_or(DEFAULT_THRESHOLD);
        Ok(Self {
            artifact,
            threshold,
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let artifact = ModelArtifact::load(path)?;
        if artifact.kind != ModelKind::Classification {
            return Err(model_error(path, "expected a classification model"));
        }
        info!("Loaded logistic model ({} features) from {:?}", artifact.features.len(), path);
        let threshold = artifact.threshold.unwrap_or(DEFAULT_THRESHOLD);
        Ok(Self {
            artifact,
            threshold,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl Classifier for LogisticModel {
    fn classify(&self, features: &FeatureVector) -> Result<Classification, PipelineError> {
        let probability = sigmoid(self.artifact.score(features)?);
        Ok(Classification {
            label: probability >= self.threshold,
            probability,
        })
    }

    fn uses_weather(&self) -> bool {
        self.artifact.uses_weather()
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Heuristic predictor (when no trained model is available)
///
/// Weighted blend of grid slot and recent form.
#[derive(Debug, Clone)]
pub struct HeuristicPredictor {
    grid_weight: f64,
    driver_form_weight: f64,
    constructor_form_weight: f64,
}

impl HeuristicPredictor {
    pub fn new() -> Self {
        Self {
            grid_weight: 0.6,
            driver_form_weight: 0.25,
            constructor_form_weight: 0.15,
        }
    }
}

impl Default for HeuristicPredictor {
    fn default() -> Self {
        Self::new()
    }
}

impl Predictor for HeuristicPredictor {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn predict(&self, features: &FeatureVector) -> Result<f64, PipelineError> {
        Ok(self.grid_weight * features.grid as f64
            + self.driver_form_weight * features.driver_form
            + self.constructor_form_weight * features.constructor_form)
    }

    fn uses_weather(&self) -> bool {
        false
    }
}

impl Classifier for HeuristicPredictor {
    /// Podium odds fall off around a predicted position of 3.5
    fn classify(&self, features: &FeatureVector) -> Result<Classification, PipelineError> {
        let predicted = self.predict(features)?;
        let probability = sigmoid(3.5 - predicted);
        Ok(Classification {
            label: probability >= DEFAULT_THRESHOLD,
            probability,
        })
    }

    fn uses_weather(&self) -> bool {
        false
    }
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxPredictor;

#[cfg(feature = "onnx")]
mod onnx {
    use super::*;
    use ort::{
        session::{builder::GraphOptimizationLevel, Session},
        value::Tensor,
    };
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// ONNX regression model taking the flattened feature vector as `input`
    pub struct OnnxPredictor {
        session: Mutex<Session>,
        path: PathBuf,
    }

    impl OnnxPredictor {
        pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self, PipelineError> {
            let path = model_path.as_ref().to_path_buf();
            info!("Loading model: {:?}", path);

            let session = Session::builder()
                .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
                .and_then(|b| b.commit_from_file(&path))
                .map_err(|e| model_error(&path, e))?;

            Ok(Self {
                session: Mutex::new(session),
                path,
            })
        }

        fn run(&self, features: &[FeatureVector]) -> Result<Vec<f64>, PipelineError> {
            let width = features.first().map(|f| f.to_vec().len()).unwrap_or(0);
            if features.iter().any(|f| f.to_vec().len() != width) {
                return Err(PipelineError::Prediction(
                    "feature vectors of mixed width in one batch".to_string(),
                ));
            }

            let input: Vec<f32> = features
                .iter()
                .flat_map(|f| f.to_vec())
                .map(|x| x as f32)
                .collect();
            let prediction_error = |e: ort::Error| {
                PipelineError::Prediction(format!("{:?}: {}", self.path, e))
            };

            let tensor =
                Tensor::from_array(([features.len(), width], input)).map_err(prediction_error)?;
            let mut session = self
                .session
                .lock()
                .map_err(|_| PipelineError::Prediction("model session poisoned".to_string()))?;
            let outputs = session
                .run(ort::inputs!["input" => tensor])
                .map_err(prediction_error)?;
            let (_, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(prediction_error)?;

            if data.len() < features.len() {
                return Err(PipelineError::Prediction(format!(
                    "model returned {} values for {} drivers",
                    data.len(),
                    features.len()
                )));
            }
            Ok(data.iter().take(features.len()).map(|&v| v as f64).collect())
        }
    }

    impl Predictor for OnnxPredictor {
        fn name(&self) -> &str {
            "onnx"
        }

        fn predict(&self, features: &FeatureVector) -> Result<f64, PipelineError> {
            self.run(std::slice::from_ref(features))?
                .into_iter()
                .next()
                .ok_or_else(|| PipelineError::Prediction("empty model output".to_string()))
        }

        fn predict_batch(&self, features: &[FeatureVector]) -> Result<Vec<f64>, PipelineError> {
            if features.is_empty() {
                return Ok(Vec::new());
            }
            self.run(features)
        }
    }
}

/// Any predictor the pipeline can be configured with
pub enum UnifiedPredictor {
    Linear(LinearModel),
    Heuristic(HeuristicPredictor),
    #[cfg(feature = "onnx")]
    Onnx(OnnxPredictor),
}

impl UnifiedPredictor {
    /// Load by file extension: `.json` linear artifact, `.onnx` ONNX model
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(UnifiedPredictor::Linear(LinearModel::load(path)?)),
            #[cfg(feature = "onnx")]
            Some("onnx") => Ok(UnifiedPredictor::Onnx(OnnxPredictor::new(path)?)),
            #[cfg(not(feature = "onnx"))]
            Some("onnx") => Err(model_error(path, "built without the `onnx` feature")),
            _ => Err(model_error(path, "unsupported model file type")),
        }
    }

    /// Load the configured model, or use the heuristic when none is configured
    /// or loading fails
    pub fn load_or_fallback(path: Option<&Path>) -> Self {
        match path {
            Some(path) => match Self::load(path) {
                Ok(predictor) => predictor,
                Err(e) => {
                    warn!("{}. Using heuristic predictor.", e);
                    UnifiedPredictor::Heuristic(HeuristicPredictor::new())
                }
            },
            None => {
                info!("No model configured, using heuristic predictor");
                UnifiedPredictor::Heuristic(HeuristicPredictor::new())
            }
        }
    }

    /// True when running on the heuristic
    pub fn is_fallback(&self) -> bool {
        matches!(self, UnifiedPredictor::Heuristic(_))
    }

    fn inner(&self) -> &dyn Predictor {
        match self {
            UnifiedPredictor::Linear(p) => p,
            UnifiedPredictor::Heuristic(p) => p,
            #[cfg(feature = "onnx")]
            UnifiedPredictor::Onnx(p) => p,
        }
    }
}

impl Predictor for UnifiedPredictor {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn predict(&self, features: &FeatureVector) -> Result<f64, PipelineError> {
        self.inner().predict(features)
    }

    fn predict_batch(&self, features: &[FeatureVector]) -> Result<Vec<f64>, PipelineError> {
        self.inner().predict_batch(features)
    }

    fn uses_weather(&self) -> bool {
        self.inner().uses_weather()
    }
}

/// Podium classifier: a trained logistic model or the heuristic
pub enum PodiumClassifier {
    Logistic(LogisticModel),
    Heuristic(HeuristicPredictor),
}

impl PodiumClassifier {
    pub fn load_or_fallback(path: Option<&Path>) -> Self {
        match path.map(LogisticModel::load) {
            Some(Ok(model)) => PodiumClassifier::Logistic(model),
            Some(Err(e)) => {
                warn!("{}. Using heuristic classifier.", e);
                PodiumClassifier::Heuristic(HeuristicPredictor::new())
            }
            None => PodiumClassifier::Heuristic(HeuristicPredictor::new()),
        }
    }
}

impl Classifier for PodiumClassifier {
    fn classify(&self, features: &FeatureVector) -> Result<Classification, PipelineError> {
        match self {
            PodiumClassifier::Logistic(m) => m.classify(features),
            PodiumClassifier::Heuristic(h) => h.classify(features),
        }
    }

    fn uses_weather(&self) -> bool {
        match self {
            PodiumClassifier::Logistic(m) => m.uses_weather(),
            PodiumClassifier::Heuristic(h) => Classifier::uses_weather(h),
        }
    }
}
