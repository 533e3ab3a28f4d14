use std::time::Duration;

use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};

use super::{ByteStream, SseInterpreter, StreamEvent};

/// Turns a raw chat byte stream into the ordered event sequence of one turn.
///
/// The returned stream is lazy and finite. It always ends with exactly one
/// terminal event (`End` or `Error`) and yields nothing after it:
/// - a malformed frame becomes `Error { reason: Decode }`
/// - a transport failure, or the bytes ending before `End`, becomes
///   `Error { reason: Connection }`
/// - no frame within `idle_timeout` becomes `Error { reason: Connection }`
///
/// Lifecycle-only frames reset the idle timer but produce no event.
pub fn interpret(bytes: ByteStream, idle_timeout: Duration) -> BoxStream<'static, StreamEvent> {
    stream::unfold(Some(SseInterpreter::new(bytes)), move |state| async move {
        let mut frames = state?;
        let event = next_event(&mut frames, idle_timeout).await;
        let rest = (!event.is_terminal()).then_some(frames);
        Some((event, rest))
    })
    .boxed()
}

async fn next_event<S>(frames: &mut S, idle_timeout: Duration) -> StreamEvent
where
    S: Stream<Item = crate::error::EngineResult<Option<StreamEvent>>> + Unpin,
{
    loop {
        match tokio::time::timeout(idle_timeout, frames.next()).await {
            Err(_) => {
                tracing::warn!(idle_secs = idle_timeout.as_secs(), "chat stream idle timeout");
                return StreamEvent::connection_error(format!(
                    "No data received for {}s",
                    idle_timeout.as_secs()
                ));
            }
            Ok(None) => {
                tracing::warn!("chat stream closed before completion");
                return StreamEvent::connection_error("Stream ended before completion");
            }
            Ok(Some(Ok(None))) => {}
            Ok(Some(Ok(Some(event)))) => return event,
            Ok(Some(Err(err))) => {
                tracing::warn!(kind = %err.kind, "chat stream failed: {}", err.message);
                return StreamEvent::Error {
                    message: err.message,
                    reason: err.kind.into(),
                };
            }
        }
    }
}
