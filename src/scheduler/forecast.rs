//! Forecast artifacts
//!
//! A trained predictor maps a fixed-size feature vector (recent inter-arrival
//! deltas plus cyclical time features) to the next inter-arrival delta. The
//! scheduler only depends on the [`Forecaster`] capability; [`DenseNetwork`]
//! is the shipped adapter for feed-forward regressors exported as JSON.
//!
//! ```text
//! features ─► input_scaler.transform ─► model.predict ─► output_scaler.inverse ─► delta (s)
//! ```

use crate::store::StoreResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while evaluating a forecast artifact
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForecastError {
    #[error("Feature vector has {actual} values, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Model produced {0} outputs, expected exactly one")]
    OutputShape(usize),

    #[error("Model produced a non-finite prediction")]
    NonFinite,

    #[error("Predicted delta of {0} seconds is outside the supported time range")]
    OutOfRange(f64),

    #[error("Model error: {0}")]
    Model(String),
}

/// Deterministic function of a fixed-size numeric feature vector
pub trait Forecaster: Send + Sync {
    fn predict(&self, features: &[f64]) -> Result<f64, ForecastError>;
}

/// Per-feature standardization, `(x - mean) / scale`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn new(mean: Vec<f64>, scale: Vec<f64>) -> Self {
        Self { mean, scale }
    }

    /// Scaler that leaves `len` features untouched
    pub fn identity(len: usize) -> Self {
        Self {
            mean: vec![0.0; len],
            scale: vec![1.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    pub fn transform(&self, values: &[f64]) -> Result<Vec<f64>, ForecastError> {
        if values.len() != self.mean.len() || self.scale.len() != self.mean.len() {
            return Err(ForecastError::DimensionMismatch {
                expected: self.mean.len(),
                actual: values.len(),
            });
        }

        Ok(values
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| (v - m) / effective_scale(*s))
            .collect())
    }

    /// Undo the scaling of a single-target scaler
    pub fn inverse_transform(&self, value: f64) -> Result<f64, ForecastError> {
        match (self.mean.as_slice(), self.scale.as_slice()) {
            ([m], [s]) => Ok(value * effective_scale(*s) + m),
            _ => Err(ForecastError::DimensionMismatch {
                expected: 1,
                actual: self.mean.len(),
            }),
        }
    }
}

// Constant features are stored with a zero scale; treat them as unscaled.
fn effective_scale(scale: f64) -> f64 {
    if scale == 0.0 {
        1.0
    } else {
        scale
    }
}

/// Fully connected layer, `weights[out][in]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

impl DenseLayer {
    fn forward(&self, input: &[f64]) -> Result<Vec<f64>, ForecastError> {
        if self.bias.len() != self.weights.len() {
            return Err(ForecastError::Model(format!(
                "layer has {} weight rows but {} biases",
                self.weights.len(),
                self.bias.len()
            )));
        }

        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(row, bias)| {
                if row.len() != input.len() {
                    return Err(ForecastError::DimensionMismatch {
                        expected: row.len(),
                        actual: input.len(),
                    });
                }
                Ok(row.iter().zip(input).map(|(w, x)| w * x).sum::<f64>() + bias)
            })
            .collect()
    }
}

/// Feed-forward regressor: ReLU hidden layers and a linear output unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseNetwork {
    #[serde(default)]
    pub hidden: Vec<DenseLayer>,
    pub output: DenseLayer,
}

impl Forecaster for DenseNetwork {
    fn predict(&self, features: &[f64]) -> Result<f64, ForecastError> {
        let mut activations = features.to_vec();
        for layer in &self.hidden {
            activations = layer
                .forward(&activations)?
                .into_iter()
                .map(|v| v.max(0.0))
                .collect();
        }

        let output = self.output.forward(&activations)?;
        match output.as_slice() {
            [value] if value.is_finite() => Ok(*value),
            [_] => Err(ForecastError::NonFinite),
            other => Err(ForecastError::OutputShape(other.len())),
        }
    }
}

/// A loaded predictor plus its scalers
#[derive(Clone)]
pub struct ForecastArtifact {
    pub model: Arc<dyn Forecaster>,
    pub input_scaler: StandardScaler,
    pub output_scaler: StandardScaler,
    /// Goodness of fit recorded at training time (higher is better)
    pub score: f64,
}

impl ForecastArtifact {
    /// Predicted inter-arrival delta in seconds
    pub fn predict_delta(&self, features: &[f64]) -> Result<f64, ForecastError> {
        let scaled = self.input_scaler.transform(features)?;
        let prediction = self.model.predict(&scaled)?;
        let delta = self.output_scaler.inverse_transform(prediction)?;
        if delta.is_finite() {
            Ok(delta)
        } else {
            Err(ForecastError::NonFinite)
        }
    }
}

impl fmt::Debug for ForecastArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForecastArtifact")
            .field("input_scaler", &self.input_scaler)
            .field("output_scaler", &self.output_scaler)
            .field("score", &self.score)
            .finish_non_exhaustive()
    }
}

/// Serialized form of an artifact as deposited by the training job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredArtifact {
    pub network: DenseNetwork,
    pub input_scaler: StandardScaler,
    pub output_scaler: StandardScaler,
    pub score: f64,
}

impl From<StoredArtifact> for ForecastArtifact {
    fn from(stored: StoredArtifact) -> Self {
        Self {
            model: Arc::new(stored.network),
            input_scaler: stored.input_scaler,
            output_scaler: stored.output_scaler,
            score: stored.score,
        }
    }
}

/// Source of trained predictors, keyed by tracked query
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// The artifact with the highest recorded goodness of fit
    async fn best_artifact(&self, tracked_query_id: i64) -> StoreResult<Option<ForecastArtifact>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear(weights: Vec<f64>, bias: f64) -> DenseNetwork {
        DenseNetwork {
            hidden: Vec::new(),
            output: DenseLayer {
                weights: vec![weights],
                bias: vec![bias],
            },
        }
    }

    #[test]
    fn test_scaler_roundtrip() {
        let scaler = StandardScaler::new(vec![10.0, 0.0], vec![2.0, 0.0]);
        let scaled = scaler.transform(&[14.0, 3.0]).unwrap();
        assert_eq!(scaled, vec![2.0, 3.0]);

        let target = StandardScaler::new(vec![3600.0], vec![60.0]);
        assert_eq!(target.inverse_transform(1.5).unwrap(), 3690.0);
    }

    #[test]
    fn test_scaler_dimension_mismatch() {
        let scaler = StandardScaler::identity(3);
        let err = scaler.transform(&[1.0]).unwrap_err();
        assert_eq!(
            err,
            ForecastError::DimensionMismatch {
                expected: 3,
                actual: 1
            }
        );

        assert!(scaler.inverse_transform(1.0).is_err());
    }

    #[test]
    fn test_dense_network_relu() {
        let network = DenseNetwork {
            hidden: vec![DenseLayer {
                weights: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
                bias: vec![0.0, 0.0],
            }],
            output: DenseLayer {
                weights: vec![vec![1.0, 1.0]],
                bias: vec![0.5],
            },
        };

        // Negative hidden activation is clamped to zero
        assert_eq!(network.predict(&[2.0, -3.0]).unwrap(), 2.5);
    }

    #[test]
    fn test_dense_network_rejects_wrong_input() {
        let network = linear(vec![1.0, 1.0], 0.0);
        assert!(matches!(
            network.predict(&[1.0]),
            Err(ForecastError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_artifact_predict_delta() {
        let artifact: ForecastArtifact = StoredArtifact {
            network: linear(vec![0.5, 0.5], 0.0),
            input_scaler: StandardScaler::identity(2),
            output_scaler: StandardScaler::new(vec![100.0], vec![10.0]),
            score: 90.0,
        }
        .into();

        // model output 2.0 → 2.0 * 10 + 100
        assert_eq!(artifact.predict_delta(&[2.0, 2.0]).unwrap(), 120.0);
    }

    #[test]
    fn test_stored_artifact_json() {
        let stored = StoredArtifact {
            network: linear(vec![1.0], 0.0),
            input_scaler: StandardScaler::identity(1),
            output_scaler: StandardScaler::identity(1),
            score: 75.5,
        };
        let json = serde_json::to_string(&stored).unwrap();
        let parsed: StoredArtifact = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, stored);
    }
}
