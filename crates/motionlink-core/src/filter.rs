// ── Feature filters ──
//
// Pure scalar reducers over per-axis sample windows. The pipeline's
// output ordering is axis-major -- all filters for axis 0, then all
// filters for axis 1, and so on -- and the trained model depends on that
// ordering, so it must never change underneath an existing model.

use strum::{Display, EnumIter};

use crate::model::Vector;

/// A feature-extraction reducer with a stable identity and a declared
/// minimum window size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum FilterKind {
    Max,
    Min,
    Mean,
    StdDev,
    Peaks,
    TotalAcc,
    Zcr,
    Rms,
}

impl FilterKind {
    /// Smallest window this filter produces a meaningful value for.
    pub fn min_samples(self) -> usize {
        match self {
            Self::Max | Self::Min | Self::Mean | Self::StdDev | Self::Rms => 1,
            Self::TotalAcc | Self::Zcr => 2,
            Self::Peaks => 3,
        }
    }

    /// Apply the reducer to one axis window. Callers guarantee
    /// `window.len() >= self.min_samples()`; shorter windows yield 0.
    pub fn apply(self, window: &[f64]) -> f64 {
        if window.len() < self.min_samples() {
            return 0.0;
        }
        match self {
            Self::Max => window.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Min => window.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Mean => mean(window),
            Self::StdDev => variance(window).sqrt(),
            Self::Peaks => peaks(window),
            Self::TotalAcc => total_acc(window),
            Self::Zcr => zero_crossing_rate(window),
            Self::Rms => rms(window),
        }
    }
}

fn mean(window: &[f64]) -> f64 {
    window.iter().sum::<f64>() / window.len() as f64
}

fn variance(window: &[f64]) -> f64 {
    let m = mean(window);
    window.iter().map(|v| (v - m).powi(2)).sum::<f64>() / window.len() as f64
}

/// Count of strict local maxima.
fn peaks(window: &[f64]) -> f64 {
    let mut count = 0u32;
    for i in 1..window.len() - 1 {
        if window[i] > window[i - 1] && window[i] > window[i + 1] {
            count += 1;
        }
    }
    f64::from(count)
}

/// Total acceleration: sum of absolute successive differences.
fn total_acc(window: &[f64]) -> f64 {
    window.windows(2).map(|pair| (pair[1] - pair[0]).abs()).sum()
}

/// Fraction of successive pairs that cross zero.
fn zero_crossing_rate(window: &[f64]) -> f64 {
    let crossings = window
        .windows(2)
        .filter(|pair| (pair[0] >= 0.0) != (pair[1] >= 0.0))
        .count();
    crossings as f64 / (window.len() - 1) as f64
}

fn rms(window: &[f64]) -> f64 {
    (window.iter().map(|v| v * v).sum::<f64>() / window.len() as f64).sqrt()
}

// ── Pipeline ─────────────────────────────────────────────────────────

/// An ordered set of active filters applied to every axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPipeline {
    filters: Vec<FilterKind>,
}

impl FilterPipeline {
    pub fn new(filters: Vec<FilterKind>) -> Self {
        Self { filters }
    }

    /// The full filter set in its canonical order.
    pub fn all() -> Self {
        Self::new(vec![
            FilterKind::Max,
            FilterKind::Min,
            FilterKind::Mean,
            FilterKind::StdDev,
            FilterKind::Peaks,
            FilterKind::TotalAcc,
            FilterKind::Zcr,
            FilterKind::Rms,
        ])
    }

    pub fn filters(&self) -> &[FilterKind] {
        &self.filters
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// The window-size floor for this pipeline: the largest
    /// `min_samples` among active filters (0 when no filters are
    /// active). The predictor derives its adaptive-search floor from
    /// this, never from a separate constant.
    pub fn required_samples(&self) -> usize {
        self.filters
            .iter()
            .map(|f| f.min_samples())
            .max()
            .unwrap_or(0)
    }

    /// Number of features produced for the given axis count.
    pub fn feature_count(&self, axes: usize) -> usize {
        self.filters.len() * axes
    }

    /// Compute the feature vector for per-axis windows, axis-major.
    pub fn compute(&self, axes: &[Vec<f64>]) -> Vector {
        let mut features = Vec::with_capacity(self.feature_count(axes.len()));
        for axis in axes {
            for filter in &self.filters {
                features.push(filter.apply(axis));
            }
        }
        Vector::new(features)
    }
}

impl Default for FilterPipeline {
    fn default() -> Self {
        Self::all()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
