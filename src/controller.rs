//! Detection loop controller.
//!
//! Drives capture -> infer -> tally -> publish, one cycle at a time, until stopped.
//!
//! - The source is held only while `Running`: opened by `start`, released by `stop`,
//!   by any failing cycle, and on drop.
//! - Parameters are read once at the start of a cycle; updates apply from the next one.
//! - A failed cycle publishes nothing and ends the session. Failures are not retried.
//!
//! A `ControlHandle` lets another thread (dashboard server, signal handler) request a
//! stop or new parameters. Requests are observed at cycle boundaries only; an
//! in-flight inference is never interrupted.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::detect::Detector;
use crate::error::{describe, LoopError};
use crate::ingest::FrameSource;
use crate::params::{DetectionParameters, TrackedLabels};
use crate::sink::DisplaySink;
use crate::tally::{tally, CountSnapshot};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Stopped,
    Running,
}

/// Cross-thread requests to a running loop.
#[derive(Clone)]
pub struct ControlHandle {
    inner: Arc<ControlShared>,
}

struct ControlShared {
    run_requested: AtomicBool,
    generation: AtomicU64,
    parameters: Mutex<DetectionParameters>,
}

impl ControlHandle {
    pub fn new(initial: DetectionParameters) -> Self {
        Self {
            inner: Arc::new(ControlShared {
                run_requested: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                parameters: Mutex::new(initial),
            }),
        }
    }

    pub fn request_run(&self) {
        self.inner.run_requested.store(true, Ordering::SeqCst);
    }

    /// Ask the loop to stop at its next cycle boundary.
    pub fn request_stop(&self) {
        self.inner.run_requested.store(false, Ordering::SeqCst);
    }

    pub fn run_requested(&self) -> bool {
        self.inner.run_requested.load(Ordering::SeqCst)
    }

    /// Replace the parameters the loop will use from its next cycle on.
    pub fn set_parameters(&self, parameters: DetectionParameters) {
        let mut guard = match self.inner.parameters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = parameters;
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn parameters(&self) -> DetectionParameters {
        match self.inner.parameters.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }
}

struct AttachedControl {
    handle: ControlHandle,
    seen_generation: u64,
}

/// Pacing and length limits for `DetectionLoop::run`.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunLimits {
    /// Minimum wall time per cycle. `None` runs flat out.
    pub cycle_interval: Option<Duration>,
    /// Stop after this many completed cycles.
    pub max_cycles: Option<u64>,
}

/// Per-session counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoopStats {
    pub cycles: u64,
    pub last_cycle: Option<Duration>,
}

impl LoopStats {
    pub fn cycles_per_second(&self) -> f32 {
        match self.last_cycle {
            Some(d) if !d.is_zero() => 1.0 / d.as_secs_f32(),
            _ => 0.0,
        }
    }
}

pub struct DetectionLoop<S: FrameSource, D: Detector, K: DisplaySink> {
    source: S,
    detector: D,
    sink: K,
    parameters: DetectionParameters,
    tracked: TrackedLabels,
    state: LoopState,
    source_held: bool,
    control: Option<AttachedControl>,
    stats: LoopStats,
}

impl<S: FrameSource, D: Detector, K: DisplaySink> DetectionLoop<S, D, K> {
    /// Build a stopped loop. Nothing is acquired until `start`.
    pub fn new(
        source: S,
        detector: D,
        sink: K,
        parameters: DetectionParameters,
        tracked: TrackedLabels,
    ) -> Self {
        Self {
            source,
            detector,
            sink,
            parameters,
            tracked,
            state: LoopState::Stopped,
            source_held: false,
            control: None,
            stats: LoopStats::default(),
        }
    }

    /// Observe stop and parameter requests from `handle` at every cycle boundary.
    pub fn with_control(mut self, handle: ControlHandle) -> Self {
        self.control = Some(AttachedControl {
            seen_generation: handle.generation(),
            handle,
        });
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn parameters(&self) -> DetectionParameters {
        self.parameters
    }

    pub fn tracked_labels(&self) -> &TrackedLabels {
        &self.tracked
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Open the source and enter `Running`.
    ///
    /// On failure the source is released, the state stays `Stopped` and
    /// `SourceUnavailable` is returned. Starting a running loop does nothing.
    pub fn start(&mut self) -> Result<(), LoopError> {
        if self.state == LoopState::Running {
            log::warn!("detection loop already running on {}", self.source.describe());
            return Ok(());
        }

        if let Err(err) = self.source.open() {
            self.source.release();
            self.source_held = false;
            let err = LoopError::SourceUnavailable {
                source_name: self.source.describe(),
                reason: describe(&err),
            };
            log::error!("{}", err);
            self.sink.publish_status(LoopState::Stopped, Some(&err));
            return Err(err);
        }

        self.source_held = true;
        self.state = LoopState::Running;
        self.stats = LoopStats::default();
        log::info!(
            "detection loop started: source={} detector={} confidence={:.2} overlap={:.2} agnostic={}",
            self.source.describe(),
            self.detector.name(),
            self.parameters.confidence_threshold(),
            self.parameters.overlap_threshold(),
            self.parameters.class_agnostic_suppression()
        );
        self.sink.publish_status(LoopState::Running, None);
        Ok(())
    }

    /// Enter `Stopped` and release the source. Safe to call in any state.
    pub fn stop(&mut self) {
        self.source.release();
        self.source_held = false;
        if self.state == LoopState::Running {
            self.state = LoopState::Stopped;
            log::info!(
                "detection loop stopped after {} cycles on {}",
                self.stats.cycles,
                self.source.describe()
            );
            self.sink.publish_status(LoopState::Stopped, None);
        }
    }

    /// Use `parameters` from the next cycle on.
    pub fn update_parameters(&mut self, parameters: DetectionParameters) {
        self.parameters = parameters;
    }

    /// Run one full cycle.
    ///
    /// Returns `Ok(None)` without touching the source when the loop is not running or
    /// a stop was requested through the control handle.
    pub fn run_cycle(&mut self) -> Result<Option<CountSnapshot>, LoopError> {
        if self.state != LoopState::Running {
            return Ok(None);
        }
        if !self.apply_control() {
            self.stop();
            return Ok(None);
        }

        let started = Instant::now();
        let parameters = self.parameters;
        let expected_index = self.stats.cycles + 1;

        let frame = match self.source.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                return Err(self.fail(LoopError::CaptureFailure {
                    source_name: self.source.describe(),
                    frame: expected_index,
                    reason: "source returned no frame".to_string(),
                }))
            }
            Err(err) => {
                return Err(self.fail(LoopError::CaptureFailure {
                    source_name: self.source.describe(),
                    frame: expected_index,
                    reason: describe(&err),
                }))
            }
        };

        let inference = match self.detector.infer(&frame, &parameters) {
            Ok(inference) => inference,
            Err(err) => {
                return Err(self.fail(LoopError::DetectionFailure {
                    detector: self.detector.name().to_string(),
                    frame: expected_index,
                    reason: describe(&err),
                }))
            }
        };

        let counts = tally(&inference.detections, &self.tracked);

        let display = match inference.annotated.to_format(self.sink.expected_format()) {
            Ok(display) => display,
            Err(err) => {
                return Err(self.fail(LoopError::DetectionFailure {
                    detector: self.detector.name().to_string(),
                    frame: expected_index,
                    reason: format!("annotated frame unusable: {}", describe(&err)),
                }))
            }
        };

        self.sink.publish_frame(&display);
        self.sink.publish_counts(&counts);

        self.stats.cycles += 1;
        self.stats.last_cycle = Some(started.elapsed());
        Ok(Some(counts))
    }

    /// Cycle until stopped, failed, or `limits.max_cycles` is reached.
    ///
    /// Returns the number of cycles completed by this call.
    pub fn run(&mut self, limits: &RunLimits) -> Result<u64, LoopError> {
        let mut completed = 0u64;
        let mut last_health_log = Instant::now();

        while self.state == LoopState::Running {
            if limits.max_cycles.is_some_and(|max| completed >= max) {
                self.stop();
                break;
            }

            let cycle_start = Instant::now();
            if self.run_cycle()?.is_none() {
                break;
            }
            completed += 1;

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                log::info!(
                    "detection loop health: cycles={} last_cycle_ms={} fps={:.1}",
                    self.stats.cycles,
                    self.stats.last_cycle.map(|d| d.as_millis()).unwrap_or(0),
                    self.stats.cycles_per_second()
                );
                last_health_log = Instant::now();
            }

            if let Some(interval) = limits.cycle_interval {
                let spent = cycle_start.elapsed();
                if spent < interval {
                    std::thread::sleep(interval - spent);
                }
            }
        }
        Ok(completed)
    }

    /// Returns false when a stop was requested.
    fn apply_control(&mut self) -> bool {
        let Some(control) = self.control.as_mut() else {
            return true;
        };
        if !control.handle.run_requested() {
            return false;
        }
        let generation = control.handle.generation();
        if generation != control.seen_generation {
            control.seen_generation = generation;
            self.parameters = control.handle.parameters();
            log::info!(
                "detection parameters updated: confidence={:.2} overlap={:.2} agnostic={}",
                self.parameters.confidence_threshold(),
                self.parameters.overlap_threshold(),
                self.parameters.class_agnostic_suppression()
            );
        }
        true
    }

    fn fail(&mut self, err: LoopError) -> LoopError {
        self.source.release();
        self.source_held = false;
        self.state = LoopState::Stopped;
        log::error!("{}", err);
        self.sink.publish_status(LoopState::Stopped, Some(&err));
        err
    }
}

impl<S: FrameSource, D: Detector, K: DisplaySink> Drop for DetectionLoop<S, D, K> {
    fn drop(&mut self) {
        if self.source_held {
            self.source.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_handle_tracks_parameter_generations() -> anyhow::Result<()> {
        let handle = ControlHandle::new(DetectionParameters::default());
        assert!(!handle.run_requested());
        assert_eq!(handle.generation(), 0);

        let updated = DetectionParameters::new(0.8, 0.3, false)?;
        handle.clone().set_parameters(updated);
        assert_eq!(handle.generation(), 1);
        assert_eq!(handle.parameters(), updated);

        handle.request_run();
        assert!(handle.run_requested());
        handle.request_stop();
        assert!(!handle.run_requested());
        Ok(())
    }

    #[test]
    fn cycles_per_second_from_last_cycle() {
        let stats = LoopStats {
            cycles: 3,
            last_cycle: Some(Duration::from_millis(50)),
        };
        assert!((stats.cycles_per_second() - 20.0).abs() < 0.01);
        assert_eq!(LoopStats::default().cycles_per_second(), 0.0);
    }
}
