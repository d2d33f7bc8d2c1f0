//! Display sinks.
//!
//! A sink receives the annotated frame and the count snapshot of every completed cycle,
//! plus session state changes. Each sink declares the channel order it expects; the
//! detection loop converts frames before handing them over.

use crate::controller::LoopState;
use crate::error::LoopError;
use crate::frame::{Frame, PixelFormat};
use crate::tally::CountSnapshot;

pub trait DisplaySink {
    /// Channel order `publish_frame` must receive.
    fn expected_format(&self) -> PixelFormat {
        PixelFormat::Rgb24
    }

    fn publish_frame(&mut self, frame: &Frame);

    fn publish_counts(&mut self, counts: &CountSnapshot);

    /// Session started, stopped, or failed. `error` is set when a failure ended it.
    fn publish_status(&mut self, _state: LoopState, _error: Option<&LoopError>) {}
}

impl<K: DisplaySink + ?Sized> DisplaySink for Box<K> {
    fn expected_format(&self) -> PixelFormat {
        (**self).expected_format()
    }

    fn publish_frame(&mut self, frame: &Frame) {
        (**self).publish_frame(frame)
    }

    fn publish_counts(&mut self, counts: &CountSnapshot) {
        (**self).publish_counts(counts)
    }

    fn publish_status(&mut self, state: LoopState, error: Option<&LoopError>) {
        (**self).publish_status(state, error)
    }
}

/// Headless sink: logs counts whenever they change.
#[derive(Default)]
pub struct LogSink {
    last: Option<CountSnapshot>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DisplaySink for LogSink {
    fn publish_frame(&mut self, frame: &Frame) {
        log::debug!(
            "frame {} published ({}x{})",
            frame.index(),
            frame.width(),
            frame.height()
        );
    }

    fn publish_counts(&mut self, counts: &CountSnapshot) {
        if self.last.as_ref() == Some(counts) {
            return;
        }
        let summary = counts
            .iter()
            .map(|(label, count)| format!("{}={}", label, count))
            .collect::<Vec<_>>()
            .join(" ");
        log::info!("counts: {}", summary);
        self.last = Some(counts.clone());
    }

    fn publish_status(&mut self, state: LoopState, error: Option<&LoopError>) {
        match error {
            Some(err) => log::error!("detection loop {:?}: {}", state, err),
            None => log::info!("detection loop {:?}", state),
        }
    }
}
