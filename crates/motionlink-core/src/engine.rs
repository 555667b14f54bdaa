// ── Polling prediction engine ──
//
// Fixed-interval tick that pulls a window from the sample ring and runs
// the classifier. Buffer underrun is expected during reconnects and
// right after connect; the tick adapts by shrinking its requested window
// and, below the pipeline's floor, skips itself silently.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::buffer::SampleRing;
use crate::classifier::ClassifierEngine;
use crate::error::CoreError;

/// How much the requested sample count shrinks per underrun retry.
const SHRINK_STEP: usize = 8;

/// Engine lifecycle state, externally toggled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Running,
    Stopped,
}

/// Tick cadence and window shape.
#[derive(Debug, Clone)]
pub struct PredictorConfig {
    pub tick_interval: Duration,
    /// Time span a classification window covers.
    pub window: Duration,
    /// Ideal sample count per window; shrinks on underrun.
    pub target_samples: usize,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            window: Duration::from_millis(1000),
            target_samples: 40,
        }
    }
}

/// Timer-driven classification engine.
///
/// Each instance owns its tick task outright. Swapping the active sample
/// source means stopping the superseded instance before starting its
/// replacement -- two engines never tick against the same ring.
pub struct PollingPredictor {
    ring: Arc<SampleRing>,
    classifier: Arc<ClassifierEngine>,
    config: PredictorConfig,
    state: watch::Sender<EngineState>,
    cancel: CancellationToken,
}

impl PollingPredictor {
    pub fn new(
        ring: Arc<SampleRing>,
        classifier: Arc<ClassifierEngine>,
        config: PredictorConfig,
    ) -> Self {
        let (state, _) = watch::channel(EngineState::Stopped);
        Self {
            ring,
            classifier,
            config,
            state,
            cancel: CancellationToken::new(),
        }
    }

    /// Spawn the tick task. Idempotent while running; a stopped engine
    /// stays stopped -- build a new instance instead of restarting.
    pub fn start(&self) {
        if self.cancel.is_cancelled() || *self.state.borrow() == EngineState::Running {
            return;
        }
        let _ = self.state.send_replace(EngineState::Running);

        let ring = Arc::clone(&self.ring);
        let classifier = Arc::clone(&self.classifier);
        let config = self.config.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.tick_interval);
            interval.tick().await; // consume the immediate first tick
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => run_tick(&ring, &classifier, &config),
                }
            }
            tracing::debug!("predictor tick task exiting");
        });
    }

    /// Stop ticking. Terminal for this instance.
    pub fn stop(&self) {
        self.cancel.cancel();
        let _ = self.state.send_replace(EngineState::Stopped);
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    pub fn state_updates(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }
}

impl Drop for PollingPredictor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// One tick: skip when untrained, otherwise pull an adaptively sized
/// window and classify it.
fn run_tick(ring: &SampleRing, classifier: &ClassifierEngine, config: &PredictorConfig) {
    if !classifier.is_trained() {
        return;
    }
    // Floor derived from the active filter set, not a constant.
    let required = classifier.pipeline().required_samples();
    if required == 0 {
        return;
    }

    let mut target = config.target_samples.max(required);
    while target >= required {
        match ring.series(config.window, target) {
            Ok(samples) => {
                let axes = transpose(&samples);
                if let Err(e) = classifier.classify(&axes) {
                    tracing::debug!(error = %e, "classification failed");
                }
                return;
            }
            Err(CoreError::InsufficientData { .. }) => {
                target = target.saturating_sub(SHRINK_STEP);
            }
            Err(e) => {
                tracing::debug!(error = %e, "series read failed");
                return;
            }
        }
    }
    // Underrun below the floor: skip this tick, no error surfaced.
}

/// Samples-of-vectors to per-axis windows, preserving time order.
fn transpose(samples: &[crate::model::TimestampedSample]) -> Vec<Vec<f64>> {
    let Some(first) = samples.first() else {
        return Vec::new();
    };
    let axis_count = first.value.len();
    let mut axes = vec![Vec::with_capacity(samples.len()); axis_count];
    for sample in samples {
        for (axis, window) in axes.iter_mut().enumerate() {
            window.push(sample.value.get(axis).unwrap_or(0.0));
        }
    }
    axes
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::classifier::Model;
    use crate::filter::{FilterKind, FilterPipeline};
    use crate::model::{GestureId, GestureSetEvent, TimestampedSample, Vector};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    struct CountingModel {
        calls: Arc<AtomicUsize>,
    }

    impl Model for CountingModel {
        fn is_trained(&self) -> bool {
            true
        }

        fn predict(&self, _features: &Vector) -> Result<Vec<f64>, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1.0])
        }
    }

    fn setup(filters: Vec<FilterKind>) -> (Arc<SampleRing>, Arc<ClassifierEngine>, Arc<AtomicUsize>) {
        let ring = Arc::new(SampleRing::new(64));
        let classifier = Arc::new(ClassifierEngine::new(FilterPipeline::new(filters)));
        classifier.apply_gesture_event(GestureSetEvent::Added(GestureId::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        classifier.set_model(Arc::new(CountingModel {
            calls: Arc::clone(&calls),
        }));
        (ring, classifier, calls)
    }

    fn fill(ring: &SampleRing, n: usize) {
        let now = Instant::now();
        for i in 0..n {
            ring.push(TimestampedSample::at(
                Vector::accel(i as f64, 0.0, 0.0),
                now,
            ));
        }
    }

    #[test]
    fn tick_skips_when_untrained() {
        let ring = Arc::new(SampleRing::new(8));
        let classifier = Arc::new(ClassifierEngine::new(FilterPipeline::all()));
        fill(&ring, 8);

        run_tick(&ring, &classifier, &PredictorConfig::default());
        // No model installed: nothing published, nothing panicked.
        assert!(classifier.confidences().borrow().is_empty());
    }

    #[test]
    fn tick_classifies_at_full_target_when_data_suffices() {
        let (ring, classifier, calls) = setup(vec![FilterKind::Mean]);
        fill(&ring, 40);

        run_tick(&ring, &classifier, &PredictorConfig::default());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tick_shrinks_target_on_underrun() {
        let (ring, classifier, calls) = setup(vec![FilterKind::Peaks]);
        // 10 samples: 40, 32, 24, 16 all fail, 8 succeeds.
        fill(&ring, 10);

        run_tick(&ring, &classifier, &PredictorConfig::default());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tick_skips_below_derived_floor() {
        let (ring, classifier, calls) = setup(vec![FilterKind::Peaks]);
        // Floor for Peaks is 3; shrink path is 40, 32, ..., 8, 0 and the
        // 2 available samples never satisfy any attempt.
        fill(&ring, 2);

        run_tick(&ring, &classifier, &PredictorConfig::default());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn tick_is_noop_with_no_active_filters() {
        let (ring, classifier, calls) = setup(vec![]);
        fill(&ring, 40);

        run_tick(&ring, &classifier, &PredictorConfig::default());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn engine_ticks_while_running_and_stops_cleanly() {
        let (ring, classifier, calls) = setup(vec![FilterKind::Mean]);
        fill(&ring, 40);

        let engine = PollingPredictor::new(
            Arc::clone(&ring),
            Arc::clone(&classifier),
            PredictorConfig::default(),
        );
        assert_eq!(engine.state(), EngineState::Stopped);

        engine.start();
        assert_eq!(engine.state(), EngineState::Running);
        tokio::time::sleep(Duration::from_millis(350)).await;
        let ticked = calls.load(Ordering::SeqCst);
        assert!(ticked >= 3, "expected >= 3 ticks, saw {ticked}");

        engine.stop();
        assert_eq!(engine.state(), EngineState::Stopped);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(calls.load(Ordering::SeqCst), ticked, "ticks after stop");

        // A stopped engine must not restart.
        engine.start();
        assert_eq!(engine.state(), EngineState::Stopped);
    }
}
