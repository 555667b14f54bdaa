// ── Vector and sample types ──

use std::time::Instant;

use crate::error::CoreError;

/// A fixed-length ordered list of numbers with optional axis labels.
///
/// Immutable once constructed: there is no mutating API, and the
/// elementwise operations return fresh vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct Vector {
    values: Vec<f64>,
    labels: Option<Vec<String>>,
}

impl Vector {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values,
            labels: None,
        }
    }

    /// Construct with axis labels. Label count must match the length.
    pub fn with_labels(values: Vec<f64>, labels: Vec<String>) -> Result<Self, CoreError> {
        if values.len() != labels.len() {
            return Err(CoreError::DimensionMismatch {
                left: values.len(),
                right: labels.len(),
            });
        }
        Ok(Self {
            values,
            labels: Some(labels),
        })
    }

    /// A 3-axis accelerometer vector in milli-g.
    pub fn accel(x: f64, y: f64, z: f64) -> Self {
        Self::new(vec![x, y, z])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn labels(&self) -> Option<&[String]> {
        self.labels.as_deref()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }

    pub fn add(&self, other: &Self) -> Result<Self, CoreError> {
        self.zip_with(other, |a, b| a + b)
    }

    pub fn subtract(&self, other: &Self) -> Result<Self, CoreError> {
        self.zip_with(other, |a, b| a - b)
    }

    pub fn divide(&self, other: &Self) -> Result<Self, CoreError> {
        self.zip_with(other, |a, b| a / b)
    }

    fn zip_with(&self, other: &Self, f: impl Fn(f64, f64) -> f64) -> Result<Self, CoreError> {
        if self.values.len() != other.values.len() {
            return Err(CoreError::DimensionMismatch {
                left: self.values.len(),
                right: other.values.len(),
            });
        }
        Ok(Self {
            values: self
                .values
                .iter()
                .zip(&other.values)
                .map(|(&a, &b)| f(a, b))
                .collect(),
            labels: self.labels.clone(),
        })
    }
}

/// A vector captured at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampedSample {
    pub value: Vector,
    pub timestamp: Instant,
}

impl TimestampedSample {
    pub fn now(value: Vector) -> Self {
        Self {
            value,
            timestamp: Instant::now(),
        }
    }

    pub fn at(value: Vector, timestamp: Instant) -> Self {
        Self { value, timestamp }
    }
}
