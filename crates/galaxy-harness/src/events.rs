//! Wait helpers over an engine's event stream

use std::fmt;
use std::time::Duration;

use galaxy_core::AppEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{timeout_at, Instant};
use tracing::warn;

pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventWaitError {
    Timeout(Duration),
    Closed,
}

impl fmt::Display for EventWaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventWaitError::Timeout(d) => write!(f, "no matching event within {:?}", d),
            EventWaitError::Closed => f.write_str("event stream closed"),
        }
    }
}

impl std::error::Error for EventWaitError {}

/// Wait for the first event satisfying `pred`, discarding the others
pub async fn next_event_matching<F>(
    events: &mut broadcast::Receiver<AppEvent>,
    within: Duration,
    mut pred: F,
) -> Result<AppEvent, EventWaitError>
where
    F: FnMut(&AppEvent) -> bool,
{
    let mut seen = collect_until(events, within, |e| pred(e)).await?;
    seen.pop().ok_or(EventWaitError::Closed)
}

/// Collect every event up to and including the first satisfying `pred`
pub async fn collect_until<F>(
    events: &mut broadcast::Receiver<AppEvent>,
    within: Duration,
    mut pred: F,
) -> Result<Vec<AppEvent>, EventWaitError>
where
    F: FnMut(&AppEvent) -> bool,
{
    let deadline = Instant::now() + within;
    let mut seen = Vec::new();
    loop {
        match timeout_at(deadline, events.recv()).await {
            Err(_) => return Err(EventWaitError::Timeout(within)),
            Ok(Err(RecvError::Closed)) => return Err(EventWaitError::Closed),
            Ok(Err(RecvError::Lagged(n))) => warn!("event subscriber lagged by {}", n),
            Ok(Ok(event)) => {
                let done = pred(&event);
                seen.push(event);
                if done {
                    return Ok(seen);
                }
            }
        }
    }
}
