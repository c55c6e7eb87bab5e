//! Status stream for the generation-status endpoint.
//!
//! Generation runs inside a single request, so the server has no live
//! progress to report to a second connection. The status endpoint instead
//! walks through the pipeline's stage labels on a timer, which is enough for
//! a client to show something moving while it waits for the story response.
//! The stream ends after the last label; dropping it stops the timer.

use serde::Serialize;
use std::pin::Pin;
use std::time::Duration;
use futures::stream::{Stream, StreamExt};
use tokio_stream::wrappers::IntervalStream;

/// Labels emitted in order, one per tick.
pub const STAGE_LABELS: &[&str] = &[
    "Writing the story",
    "Imagining the main character",
    "Painting the cover",
    "Illustrating the pages",
    "Adding the finishing touches",
    "Binding the book",
];

/// One status tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    /// 1-based stage number.
    pub stage: usize,
    pub total_stages: usize,
    pub label: &'static str,
    /// Rough completion percentage.
    pub progress: u8,
}

impl StatusEvent {
    fn at(index: usize) -> Self {
        let total = STAGE_LABELS.len();
        Self {
            stage: index + 1,
            total_stages: total,
            label: STAGE_LABELS[index],
            progress: ((index + 1) * 100 / total) as u8,
        }
    }
}

/// A boxed stream of status events.
pub type StatusStream = Pin<Box<dyn Stream<Item = StatusEvent> + Send>>;

/// Emit every stage label, the first immediately, then one per `interval`.
pub fn status_stream(interval: Duration) -> StatusStream {
    let ticks = IntervalStream::new(tokio::time::interval(interval.max(Duration::from_millis(1))));
    Box::pin(
        ticks
            .take(STAGE_LABELS.len())
            .enumerate()
            .map(|(i, _)| StatusEvent::at(i)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn walks_through_every_stage_then_ends() {
        let events: Vec<StatusEvent> = status_stream(Duration::from_secs(3)).collect().await;
        assert_eq!(events.len(), STAGE_LABELS.len());
        assert_eq!(events[0].label, "Writing the story");
        assert_eq!(events[0].stage, 1);
        let last = events.last().unwrap();
        assert_eq!(last.progress, 100);
        assert_eq!(last.stage, last.total_stages);
    }

    #[test]
    fn serialises_camel_case() {
        let v = serde_json::to_value(StatusEvent::at(0)).unwrap();
        assert_eq!(v["totalStages"], STAGE_LABELS.len());
        assert_eq!(v["label"], STAGE_LABELS[0]);
    }
}
