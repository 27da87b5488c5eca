//! # Streaming Gateway
//!
//! Turns one job's history plus live tail into a frame stream for a single
//! remote reader. The HTTP layer only maps [`GatewayFrame`]s onto its
//! server-push encoding.
//!
//! Contract:
//! - a `connected` comment first, then every recorded event in order, then
//!   live events as they are appended
//! - a `heartbeat` comment whenever nothing was sent for `keep_alive`
//! - after forwarding `complete/completed`, wait `close_grace` and end
//! - dropping the stream drops its subscription

use std::collections::VecDeque;
use std::time::Duration;

use futures::stream::{self, Stream};

use super::events::ProgressEvent;
use super::store::{ProgressStore, Subscription};

pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(1);

/// One unit of output on a progress stream
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayFrame {
    /// Liveness comment; parsers reading only `data:` lines ignore it
    Comment(&'static str),
    /// A progress event, to be sent as JSON
    Event(ProgressEvent),
}

#[derive(Debug, Clone, Copy)]
pub struct GatewaySettings {
    pub keep_alive: Duration,
    pub close_grace: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            keep_alive: DEFAULT_KEEP_ALIVE,
            close_grace: DEFAULT_CLOSE_GRACE,
        }
    }
}

enum Phase {
    Greeting,
    Streaming,
    Closing,
}

struct GatewayState {
    phase: Phase,
    replay: VecDeque<ProgressEvent>,
    subscription: Subscription,
    last_sequence: Option<u64>,
    settings: GatewaySettings,
}

/// Open a progress stream for `job_id`
pub fn progress_stream(
    store: &ProgressStore,
    job_id: &str,
    settings: GatewaySettings,
) -> impl Stream<Item = GatewayFrame> + Send + 'static {
    let (history, subscription) = store.subscribe_with_history(job_id);
    tracing::debug!(job_id, replay = history.len(), "Progress stream opened");

    let state = GatewayState {
        phase: Phase::Greeting,
        replay: history.into(),
        subscription,
        last_sequence: None,
        settings,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            match state.phase {
                Phase::Greeting => {
                    state.phase = Phase::Streaming;
                    return Some((GatewayFrame::Comment("connected"), state));
                }
                Phase::Closing => {
                    tokio::time::sleep(state.settings.close_grace).await;
                    tracing::debug!(
                        job_id = %state.subscription.job_id(),
                        "Progress stream closed after completion"
                    );
                    return None;
                }
                Phase::Streaming => {
                    let event = match state.replay.pop_front() {
                        Some(event) => event,
                        None => {
                            let next = tokio::time::timeout(
                                state.settings.keep_alive,
                                state.subscription.recv(),
                            )
                            .await;
                            match next {
                                Ok(Some(event)) => event,
                                // The store discarded the job
                                Ok(None) => return None,
                                Err(_) => return Some((GatewayFrame::Comment("heartbeat"), state)),
                            }
                        }
                    };

                    if state.last_sequence.is_some_and(|last| event.sequence <= last) {
                        continue;
                    }
                    state.last_sequence = Some(event.sequence);
                    if event.ends_stream() {
                        state.phase = Phase::Closing;
                    }
                    return Some((GatewayFrame::Event(event), state));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::events::{ProgressUpdate, Step};
    use futures::StreamExt;
    use std::sync::Arc;

    fn fast() -> GatewaySettings {
        GatewaySettings {
            keep_alive: Duration::from_millis(40),
            close_grace: Duration::from_millis(5),
        }
    }

    fn sequences(frames: &[GatewayFrame]) -> Vec<u64> {
        frames
            .iter()
            .filter_map(|f| match f {
                GatewayFrame::Event(e) => Some(e.sequence),
                GatewayFrame::Comment(_) => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_replays_history_then_tails_and_closes() {
        let store = Arc::new(ProgressStore::default());
        store.append("doc", ProgressUpdate::processing(Step::Upload, "a"));
        store.append("doc", ProgressUpdate::completed(Step::Upload, "b"));

        let stream = progress_stream(&store, "doc", fast());

        let writer = Arc::clone(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            writer.append("doc", ProgressUpdate::completed(Step::Store, "stored"));
            writer.append("doc", ProgressUpdate::completed(Step::Complete, "done"));
        });

        let frames: Vec<GatewayFrame> =
            tokio::time::timeout(Duration::from_secs(2), stream.collect())
                .await
                .expect("stream should end after completion");

        assert_eq!(frames[0], GatewayFrame::Comment("connected"));
        assert_eq!(sequences(&frames), vec![0, 1, 2, 3]);
        assert!(matches!(frames.last(), Some(GatewayFrame::Event(e)) if e.ends_stream()));
    }

    #[tokio::test]
    async fn test_finished_job_replays_and_ends() {
        let store = ProgressStore::default();
        store.append("old", ProgressUpdate::completed(Step::Store, "stored"));
        store.append("old", ProgressUpdate::completed(Step::Complete, "done"));

        let frames: Vec<GatewayFrame> = progress_stream(&store, "old", fast()).collect().await;
        assert_eq!(sequences(&frames), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_idle_stream_sends_heartbeats() {
        let store = ProgressStore::default();
        let mut stream = Box::pin(progress_stream(&store, "idle", fast()));

        assert_eq!(stream.next().await, Some(GatewayFrame::Comment("connected")));
        assert_eq!(stream.next().await, Some(GatewayFrame::Comment("heartbeat")));
        assert_eq!(stream.next().await, Some(GatewayFrame::Comment("heartbeat")));
    }

    #[tokio::test]
    async fn test_error_event_does_not_close_stream() {
        let store = ProgressStore::default();
        let err = crate::error::PipelineError::UpstreamService("503".into());
        store.append("doc", ProgressUpdate::failed(Step::Extract, &err));

        let mut stream = Box::pin(progress_stream(&store, "doc", fast()));
        stream.next().await;
        assert!(matches!(stream.next().await, Some(GatewayFrame::Event(_))));
        assert_eq!(stream.next().await, Some(GatewayFrame::Comment("heartbeat")));
    }

    #[tokio::test]
    async fn test_dropping_stream_unsubscribes() {
        let store = ProgressStore::default();
        let stream = progress_stream(&store, "doc", fast());
        assert_eq!(store.subscriber_count("doc"), 1);
        drop(stream);
        assert_eq!(store.subscriber_count("doc"), 0);
    }
}
