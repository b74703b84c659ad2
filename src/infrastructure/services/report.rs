use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Sender;
use heapless::String;

use crate::domain::dto::ProgressReport;
use crate::domain::entity::AbortReason;
use crate::domain::ports::{StatusEvent, StatusSink};
use crate::fmt::{debug, warn};

/// Maximum length of an encoded progress report.
pub const REPORT_LEN: usize = 64;

pub const STEP_GENERAL_FAILED: i8 = -1;
pub const STEP_FETCH_FAILED: i8 = -2;
pub const STEP_CHECK_FAILED: i8 = -3;
pub const STEP_BURN_FAILED: i8 = -4;

/// Forwards events to a channel, e.g. for an LED or UI task.
///
/// Never blocks the session: events are dropped while the channel is full.
pub struct ChannelStatusSink<'a, M: RawMutex, const N: usize> {
    sender: Sender<'a, M, StatusEvent, N>,
}

impl<'a, M: RawMutex, const N: usize> ChannelStatusSink<'a, M, N> {
    pub fn new(sender: Sender<'a, M, StatusEvent, N>) -> Self {
        Self { sender }
    }
}

impl<M: RawMutex, const N: usize> StatusSink for ChannelStatusSink<'_, M, N> {
    fn on_event(&mut self, event: StatusEvent) {
        if self.sender.try_send(event).is_err() {
            debug!("fota: status channel full, event dropped");
        }
    }
}

/// Step code and description reported for `event`.
///
/// Steps are the completion percentage, or a negative failure code.
#[allow(clippy::cast_possible_wrap)]
pub fn report_step(event: &StatusEvent) -> (i8, &'static str) {
    match event {
        StatusEvent::Started { .. } => (0, "started"),
        StatusEvent::Progress(sample) => (sample.percent() as i8, "downloading"),
        StatusEvent::Completed { .. } => (100, "completed"),
        StatusEvent::Aborted { reason } => match reason {
            AbortReason::FetchExhausted | AbortReason::FetchFatal(_) => {
                (STEP_FETCH_FAILED, "fetch failed")
            }
            AbortReason::ValidationFailed => (STEP_CHECK_FAILED, "check failed"),
            AbortReason::WriteFailed(_) => (STEP_BURN_FAILED, "burn failed"),
            AbortReason::Cancelled | AbortReason::Truncated => {
                (STEP_GENERAL_FAILED, "update failed")
            }
        },
    }
}

/// JSON report for `event`, e.g. `{"step":42,"desc":"downloading"}`.
pub fn encode_report(event: &StatusEvent) -> Option<String<REPORT_LEN>> {
    let (step, desc) = report_step(event);
    serde_json_core::to_string(&ProgressReport { step, desc }).ok()
}

/// Destination of encoded progress reports (MQTT topic, HTTP callback).
pub trait ReportPublisher {
    fn publish(&mut self, payload: &str);
}

/// Sink that publishes every event as a JSON progress report.
pub struct ReportingSink<P: ReportPublisher> {
    publisher: P,
}

impl<P: ReportPublisher> ReportingSink<P> {
    pub fn new(publisher: P) -> Self {
        Self { publisher }
    }

    pub fn publisher(&mut self) -> &mut P {
        &mut self.publisher
    }

    pub fn into_inner(self) -> P {
        self.publisher
    }
}

impl<P: ReportPublisher> StatusSink for ReportingSink<P> {
    fn on_event(&mut self, event: StatusEvent) {
        match encode_report(&event) {
            Some(payload) => self.publisher.publish(&payload),
            None => warn!("fota: progress report does not fit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::string::ToString;
    use std::vec::Vec;

    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use embassy_sync::channel::Channel;
    use embassy_time::Instant;

    use super::*;
    use crate::domain::entity::ProgressSample;
    use crate::domain::ports::{FetchFault, StorageError};

    #[derive(Default)]
    struct Collect(Vec<std::string::String>);

    impl ReportPublisher for Collect {
        fn publish(&mut self, payload: &str) {
            self.0.push(payload.to_string());
        }
    }

    #[test]
    fn encodes_progress_and_failures() {
        let mut sink = ReportingSink::new(Collect::default());

        sink.on_event(StatusEvent::Progress(ProgressSample {
            bytes_done: 420,
            bytes_total: Some(1000),
            at: Instant::from_ticks(0),
        }));
        sink.on_event(StatusEvent::Aborted {
            reason: AbortReason::WriteFailed(StorageError::VerifyMismatch),
        });
        sink.on_event(StatusEvent::Completed { bytes: 1000 });

        assert_eq!(
            sink.into_inner().0,
            [
                r#"{"step":42,"desc":"downloading"}"#,
                r#"{"step":-4,"desc":"burn failed"}"#,
                r#"{"step":100,"desc":"completed"}"#,
            ]
        );
    }

    #[test]
    fn abort_reasons_map_to_step_codes() {
        let step = |reason| report_step(&StatusEvent::Aborted { reason }).0;

        assert_eq!(step(AbortReason::FetchExhausted), STEP_FETCH_FAILED);
        assert_eq!(step(AbortReason::FetchFatal(FetchFault::Rejected)), STEP_FETCH_FAILED);
        assert_eq!(step(AbortReason::ValidationFailed), STEP_CHECK_FAILED);
        assert_eq!(step(AbortReason::Cancelled), STEP_GENERAL_FAILED);
    }

    #[test]
    fn channel_sink_drops_when_full() {
        let channel = Channel::<NoopRawMutex, StatusEvent, 1>::new();
        let mut sink = ChannelStatusSink::new(channel.sender());

        sink.on_event(StatusEvent::Completed { bytes: 1 });
        sink.on_event(StatusEvent::Completed { bytes: 2 });

        assert_eq!(channel.try_receive().ok(), Some(StatusEvent::Completed { bytes: 1 }));
        assert!(channel.try_receive().is_err());
    }
}
