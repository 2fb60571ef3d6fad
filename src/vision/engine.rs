//! Detection engine capability and its lifecycle
//!
//! The engine is expensive to build (model files, ONNX sessions) and may not
//! be buildable at all on a given host. [`EngineLifecycle`] builds it on first
//! use, keeps the first success for its whole lifetime and retries on every
//! call until one succeeds.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, info};

use super::error::DetectionError;
use super::loader::ImageBuffer;

/// How an image is presented to the engine
#[derive(Debug, Clone, Copy)]
pub enum EngineInput<'a> {
    /// Original, full-resolution file on disk
    Path(&'a Path),
    /// In-memory pixels, possibly downsampled
    Array(&'a ImageBuffer),
}

impl EngineInput<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineInput::Path(_) => "path",
            EngineInput::Array(_) => "array",
        }
    }
}

/// A text detector that maps an image to loosely structured detections
///
/// Output is untrusted; see [`super::raw::parse_output`] for the accepted
/// shapes. Engines that cannot take one kind of input should return
/// [`DetectionError::UnsupportedInput`].
pub trait DetectionEngine: Send + Sync {
    /// Engine identifier for logs
    fn name(&self) -> &'static str;

    /// Run detection on one image
    fn detect(&self, input: EngineInput<'_>) -> Result<Value, DetectionError>;
}

/// Admits one `detect` call at a time for engines that are not safe to share
pub struct SerializedEngine {
    inner: Arc<dyn DetectionEngine>,
    gate: Mutex<()>,
}

impl SerializedEngine {
    pub fn new(inner: Arc<dyn DetectionEngine>) -> Self {
        Self {
            inner,
            gate: Mutex::new(()),
        }
    }
}

impl DetectionEngine for SerializedEngine {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn detect(&self, input: EngineInput<'_>) -> Result<Value, DetectionError> {
        let _guard = self.gate.lock();
        self.inner.detect(input)
    }
}

/// Builds a detection engine; called until it first succeeds
pub type EngineFactory =
    Box<dyn Fn() -> anyhow::Result<Arc<dyn DetectionEngine>> + Send + Sync>;

/// Lazily constructed, cached detection engine
pub struct EngineLifecycle {
    factory: EngineFactory,
    cached: RwLock<Option<Arc<dyn DetectionEngine>>>,
    /// Held while constructing so racing first callers build once
    construction: Mutex<()>,
    attempts: AtomicUsize,
}

impl EngineLifecycle {
    pub fn new(factory: EngineFactory) -> Self {
        Self {
            factory,
            cached: RwLock::new(None),
            construction: Mutex::new(()),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Lifecycle around an engine that is already built
    pub fn with_engine(engine: Arc<dyn DetectionEngine>) -> Self {
        let lifecycle = Self::new(Box::new(|| {
            anyhow::bail!("engine was supplied pre-built and cannot be rebuilt")
        }));
        *lifecycle.cached.write() = Some(engine);
        lifecycle
    }

    /// Get the cached engine, constructing it if no attempt has succeeded yet
    ///
    /// Failures are not cached: the next call tries again.
    pub fn acquire(&self) -> Result<Arc<dyn DetectionEngine>, DetectionError> {
        if let Some(engine) = self.cached.read().as_ref() {
            return Ok(Arc::clone(engine));
        }

        let _building = self.construction.lock();

        // Another caller may have finished while we waited
        if let Some(engine) = self.cached.read().as_ref() {
            return Ok(Arc::clone(engine));
        }

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        match (self.factory)() {
            Ok(engine) => {
                info!(
                    "Text detection engine '{}' ready (attempt {})",
                    engine.name(),
                    attempt
                );
                *self.cached.write() = Some(Arc::clone(&engine));
                Ok(engine)
            }
            Err(e) => {
                error!("Text detection engine initialization failed: {:#}", e);
                Err(DetectionError::EngineUnavailable(format!("{e:#}")))
            }
        }
    }

    /// Whether an engine has been constructed and cached
    pub fn is_ready(&self) -> bool {
        self.cached.read().is_some()
    }

    /// Number of times the factory has been invoked
    pub fn construction_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for EngineLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineLifecycle")
            .field("ready", &self.is_ready())
            .field("attempts", &self.construction_attempts())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use std::sync::Barrier;
    use std::time::Duration;

    struct NullEngine;

    impl DetectionEngine for NullEngine {
        fn name(&self) -> &'static str {
            "null"
        }

        fn detect(&self, _input: EngineInput<'_>) -> Result<Value, DetectionError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_success_is_cached() {
        let lifecycle = EngineLifecycle::new(Box::new(|| Ok(Arc::new(NullEngine) as Arc<dyn DetectionEngine>)));
        assert!(!lifecycle.is_ready());

        let first = lifecycle.acquire().unwrap();
        let second = lifecycle.acquire().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(lifecycle.construction_attempts(), 1);
        assert!(lifecycle.is_ready());
    }

    #[test]
    fn test_failure_is_retried() {
        let available = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&available);
        let lifecycle = EngineLifecycle::new(Box::new(move || {
            if flag.load(Ordering::SeqCst) {
                Ok(Arc::new(NullEngine) as Arc<dyn DetectionEngine>)
            } else {
                anyhow::bail!("det.onnx not downloaded yet")
            }
        }));

        for _ in 0..3 {
            let err = lifecycle.acquire().err().unwrap();
            assert!(matches!(err, DetectionError::EngineUnavailable(ref m) if m.contains("det.onnx")));
        }
        assert_eq!(lifecycle.construction_attempts(), 3);
        assert!(!lifecycle.is_ready());

        available.store(true, Ordering::SeqCst);
        assert!(lifecycle.acquire().is_ok());
        assert!(lifecycle.acquire().is_ok());
        assert_eq!(lifecycle.construction_attempts(), 4);
    }

    #[test]
    fn test_concurrent_first_use_builds_once() {
        let lifecycle = EngineLifecycle::new(Box::new(|| {
            std::thread::sleep(Duration::from_millis(20));
            Ok(Arc::new(NullEngine) as Arc<dyn DetectionEngine>)
        }));
        let barrier = Barrier::new(8);

        let engines: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        lifecycle.acquire().unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(lifecycle.construction_attempts(), 1);
        assert!(engines.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_with_engine_is_ready() {
        let lifecycle = EngineLifecycle::with_engine(Arc::new(NullEngine));
        assert!(lifecycle.is_ready());
        assert!(lifecycle.acquire().is_ok());
        assert_eq!(lifecycle.construction_attempts(), 0);
    }

    #[test]
    fn test_serialized_engine_delegates() {
        struct Echo;
        impl DetectionEngine for Echo {
            fn name(&self) -> &'static str {
                "echo"
            }
            fn detect(&self, input: EngineInput<'_>) -> Result<Value, DetectionError> {
                Ok(json!(input.kind()))
            }
        }

        let engine = SerializedEngine::new(Arc::new(Echo));
        assert_eq!(engine.name(), "echo");
        let buffer = ImageBuffer::from_rgb(image::RgbImage::new(1, 1));
        assert_eq!(engine.detect(EngineInput::Array(&buffer)).unwrap(), json!("array"));
        assert_eq!(
            engine.detect(EngineInput::Path(Path::new("/tmp/x.png"))).unwrap(),
            json!("path")
        );
    }

    /// Slow engine tracking how many calls overlap
    struct Slow {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl DetectionEngine for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn detect(&self, _input: EngineInput<'_>) -> Result<Value, DetectionError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    fn overlap_with(wrap: bool) -> usize {
        let inner = Arc::new(Slow {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        let engine: Arc<dyn DetectionEngine> = if wrap {
            Arc::new(SerializedEngine::new(inner.clone()))
        } else {
            inner.clone()
        };
        let buffer = ImageBuffer::from_rgb(image::RgbImage::new(1, 1));
        let barrier = Barrier::new(4);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    barrier.wait();
                    for _ in 0..3 {
                        engine.detect(EngineInput::Array(&buffer)).unwrap();
                    }
                });
            }
        });

        inner.max_in_flight.load(Ordering::SeqCst)
    }

    #[test]
    fn test_serialized_engine_admits_one_call_at_a_time() {
        assert_eq!(overlap_with(true), 1);
    }

    #[test]
    fn test_unwrapped_engine_runs_calls_concurrently() {
        assert!(overlap_with(false) > 1);
    }
}
