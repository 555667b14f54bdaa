// ── Classification engine ──
//
// Owns the trained/untrained lifecycle and fans per-gesture confidences
// out to subscribers. Training itself happens elsewhere; the engine
// consumes an opaque `Model` and invalidates it when the gesture set's
// membership changes.

use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};

use tokio::sync::watch;
use tokio_stream::Stream;
use tokio_stream::wrappers::WatchStream;

use crate::error::CoreError;
use crate::filter::FilterPipeline;
use crate::model::{GestureId, GestureSetEvent, Vector};

/// An externally trained classifier.
///
/// `predict` returns one probability per gesture class, in the order the
/// model was trained with -- which the engine keeps aligned with its
/// gesture list.
pub trait Model: Send + Sync {
    fn is_trained(&self) -> bool;
    fn predict(&self, features: &Vector) -> Result<Vec<f64>, CoreError>;
}

/// One gesture's confidence from the latest classification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureConfidence {
    pub gesture: GestureId,
    pub confidence: f64,
}

/// Trained/untrained lifecycle, classification, and confidence fan-out.
pub struct ClassifierEngine {
    pipeline: FilterPipeline,
    model: RwLock<Option<Arc<dyn Model>>>,
    gestures: RwLock<Vec<GestureId>>,
    trained: watch::Sender<bool>,
    confidences: watch::Sender<Vec<GestureConfidence>>,
}

impl ClassifierEngine {
    pub fn new(pipeline: FilterPipeline) -> Self {
        let (trained, _) = watch::channel(false);
        let (confidences, _) = watch::channel(Vec::new());
        Self {
            pipeline,
            model: RwLock::new(None),
            gestures: RwLock::new(Vec::new()),
            trained,
            confidences,
        }
    }

    pub fn pipeline(&self) -> &FilterPipeline {
        &self.pipeline
    }

    /// Install a freshly trained model. The trained flag follows the
    /// model's own state.
    pub fn set_model(&self, model: Arc<dyn Model>) {
        let trained = model.is_trained();
        *self.write_model() = Some(model);
        let _ = self.trained.send_replace(trained);
    }

    pub fn is_trained(&self) -> bool {
        *self.trained.borrow()
    }

    /// Subscribe to trained/untrained transitions.
    pub fn trained_updates(&self) -> watch::Receiver<bool> {
        self.trained.subscribe()
    }

    /// Subscribe to per-gesture confidence updates.
    pub fn confidences(&self) -> watch::Receiver<Vec<GestureConfidence>> {
        self.confidences.subscribe()
    }

    /// Confidence updates as a `Stream`, for `StreamExt` consumers.
    /// The current value (initially empty) is yielded first.
    pub fn confidence_stream(&self) -> ConfidenceStream {
        ConfidenceStream {
            inner: WatchStream::new(self.confidences.subscribe()),
        }
    }

    /// Gesture ids in classification order.
    pub fn gesture_order(&self) -> Vec<GestureId> {
        self.read_gestures().clone()
    }

    /// Observe a gesture-set mutation.
    ///
    /// Membership changes (`Added`/`Removed`) invalidate the trained
    /// model; metadata changes (`OutputChanged`) never do. The variant
    /// alone decides -- no content is inspected.
    pub fn apply_gesture_event(&self, event: GestureSetEvent) {
        match event {
            GestureSetEvent::Added(id) => {
                self.write_gestures().push(id);
                self.invalidate();
            }
            GestureSetEvent::Removed(id) => {
                self.write_gestures().retain(|g| *g != id);
                self.invalidate();
            }
            GestureSetEvent::OutputChanged(_) => {}
        }
    }

    /// Run the pipeline over per-axis windows, predict, and publish
    /// confidences ordered to match the gesture list right now.
    pub fn classify(&self, axes: &[Vec<f64>]) -> Result<(), CoreError> {
        let model = self
            .read_model()
            .clone()
            .filter(|m| m.is_trained())
            .ok_or(CoreError::Untrained)?;

        let features = self.pipeline.compute(axes);
        let probabilities = model.predict(&features)?;

        let gestures = self.gesture_order();
        if probabilities.len() != gestures.len() {
            return Err(CoreError::ModelOutputMismatch {
                classes: probabilities.len(),
                gestures: gestures.len(),
            });
        }

        let update: Vec<GestureConfidence> = gestures
            .into_iter()
            .zip(probabilities)
            .map(|(gesture, confidence)| GestureConfidence {
                gesture,
                confidence,
            })
            .collect();
        let _ = self.confidences.send(update);
        Ok(())
    }

    fn invalidate(&self) {
        *self.write_model() = None;
        let _ = self.trained.send_replace(false);
    }

    fn read_model(&self) -> std::sync::RwLockReadGuard<'_, Option<Arc<dyn Model>>> {
        self.model.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_model(&self) -> std::sync::RwLockWriteGuard<'_, Option<Arc<dyn Model>>> {
        self.model.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn read_gestures(&self) -> std::sync::RwLockReadGuard<'_, Vec<GestureId>> {
        self.gestures.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_gestures(&self) -> std::sync::RwLockWriteGuard<'_, Vec<GestureId>> {
        self.gestures.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// `Stream` adapter backed by the confidence watch channel.
///
/// Yields a fresh `Vec<GestureConfidence>` each time a classification
/// publishes.
pub struct ConfidenceStream {
    inner: WatchStream<Vec<GestureConfidence>>,
}

impl Stream for ConfidenceStream {
    type Item = Vec<GestureConfidence>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::filter::FilterKind;

    /// Model that returns a fixed probability vector.
    struct FixedModel(Vec<f64>);

    impl Model for FixedModel {
        fn is_trained(&self) -> bool {
            true
        }

        fn predict(&self, _features: &Vector) -> Result<Vec<f64>, CoreError> {
            Ok(self.0.clone())
        }
    }

    fn engine_with_gestures(n: usize) -> (ClassifierEngine, Vec<GestureId>) {
        let engine = ClassifierEngine::new(FilterPipeline::new(vec![FilterKind::Mean]));
        let ids: Vec<GestureId> = (0..n)
            .map(|i| crate::model::Gesture::new(format!("gesture-{i}")).id)
            .collect();
        for id in &ids {
            engine.apply_gesture_event(GestureSetEvent::Added(*id));
        }
        (engine, ids)
    }

    #[test]
    fn adding_a_gesture_invalidates_training() {
        let (engine, _) = engine_with_gestures(2);
        engine.set_model(Arc::new(FixedModel(vec![0.5, 0.5])));
        assert!(engine.is_trained());

        engine.apply_gesture_event(GestureSetEvent::Added(GestureId::new()));
        assert!(!engine.is_trained());
    }

    #[test]
    fn removing_a_gesture_invalidates_training() {
        let (engine, ids) = engine_with_gestures(2);
        engine.set_model(Arc::new(FixedModel(vec![0.5, 0.5])));

        engine.apply_gesture_event(GestureSetEvent::Removed(ids[0]));
        assert!(!engine.is_trained());
        assert_eq!(engine.gesture_order(), vec![ids[1]]);
    }

    #[test]
    fn output_config_change_keeps_training() {
        let (engine, ids) = engine_with_gestures(2);
        engine.set_model(Arc::new(FixedModel(vec![0.5, 0.5])));

        engine.apply_gesture_event(GestureSetEvent::OutputChanged(ids[0]));
        assert!(engine.is_trained(), "metadata mutation must not invalidate");
    }

    #[test]
    fn classify_publishes_confidences_in_gesture_order() {
        let (engine, ids) = engine_with_gestures(3);
        engine.set_model(Arc::new(FixedModel(vec![0.1, 0.7, 0.2])));
        let confidences = engine.confidences();

        engine.classify(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();

        let update = confidences.borrow().clone();
        assert_eq!(update.len(), 3);
        assert_eq!(update[0].gesture, ids[0]);
        assert_eq!(update[1].gesture, ids[1]);
        assert_eq!(update[2].gesture, ids[2]);
        assert_eq!(update[1].confidence, 0.7);
    }

    #[tokio::test]
    async fn confidence_stream_yields_published_updates() {
        use tokio_stream::StreamExt;

        let (engine, _) = engine_with_gestures(1);
        engine.set_model(Arc::new(FixedModel(vec![0.9])));
        let mut stream = engine.confidence_stream();

        // WatchStream yields the current (empty) value first.
        assert!(stream.next().await.unwrap().is_empty());

        engine.classify(&[vec![1.0, 2.0]]).unwrap();
        let update = stream.next().await.unwrap();
        assert_eq!(update.len(), 1);
        assert_eq!(update[0].confidence, 0.9);
    }

    #[test]
    fn classify_without_model_is_untrained() {
        let (engine, _) = engine_with_gestures(1);
        assert!(matches!(
            engine.classify(&[vec![1.0]]),
            Err(CoreError::Untrained)
        ));
    }

    #[test]
    fn classify_rejects_misaligned_model_output() {
        let (engine, _) = engine_with_gestures(2);
        engine.set_model(Arc::new(FixedModel(vec![1.0])));

        assert!(matches!(
            engine.classify(&[vec![1.0]]),
            Err(CoreError::ModelOutputMismatch { classes: 1, gestures: 2 })
        ));
    }
}
