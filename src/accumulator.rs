//! Pull-based consumption of one open increment stream.
//!
//! The reader never retries. It yields increments in arrival order and then a
//! single terminal [`StreamOutcome`]; reaching a terminal outcome drops the
//! source, which closes the underlying connection.

use digest_provider::{IncrementStream, StreamFault};
use futures_util::StreamExt;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    CompletedOk,
    TimedOut,
    TransportError(String),
    Aborted,
    StreamReadError(String),
    /// The service reported an error inside the stream.
    UpstreamError(String),
}

impl StreamOutcome {
    /// Whether partial output from this outcome is worth resuming.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TimedOut | Self::TransportError(_) | Self::Aborted | Self::StreamReadError(_)
        )
    }
}

impl From<StreamFault> for StreamOutcome {
    fn from(fault: StreamFault) -> Self {
        match fault {
            StreamFault::Transport(message) => Self::TransportError(message),
            StreamFault::Read(message) => Self::StreamReadError(message),
            StreamFault::Upstream(message) => Self::UpstreamError(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Increment(String),
    Finished(StreamOutcome),
}

pub struct IncrementReader {
    source: Option<IncrementStream>,
    deadline: Instant,
    cancel: CancellationToken,
    outcome: Option<StreamOutcome>,
    appended_chars: usize,
}

impl IncrementReader {
    #[must_use]
    pub fn new(source: IncrementStream, deadline: Instant, cancel: CancellationToken) -> Self {
        Self {
            source: Some(source),
            deadline,
            cancel,
            outcome: None,
            appended_chars: 0,
        }
    }

    /// Characters yielded as increments so far.
    #[must_use]
    pub fn appended_chars(&self) -> usize {
        self.appended_chars
    }

    /// Next increment, or the terminal outcome. Fused: once finished, the same
    /// outcome is returned forever.
    pub async fn next(&mut self) -> Step {
        if let Some(outcome) = &self.outcome {
            return Step::Finished(outcome.clone());
        }

        let outcome = match self.source.as_mut() {
            Some(source) => loop {
                let polled = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    item = timeout_at(self.deadline, source.next()) => Some(item),
                };
                let Some(item) = polled else {
                    break StreamOutcome::Aborted;
                };

                match item {
                    Err(_elapsed) => break StreamOutcome::TimedOut,
                    Ok(None) => break StreamOutcome::CompletedOk,
                    Ok(Some(Err(fault))) => break StreamOutcome::from(fault),
                    Ok(Some(Ok(text))) if text.is_empty() => continue,
                    Ok(Some(Ok(text))) => {
                        self.appended_chars += text.chars().count();
                        return Step::Increment(text);
                    }
                }
            },
            None => StreamOutcome::Aborted,
        };

        self.source = None;
        self.outcome = Some(outcome.clone());
        Step::Finished(outcome)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumed {
    pub outcome: StreamOutcome,
    pub appended_chars: usize,
}

/// Drains `reader`, handing each increment to `on_increment` before pulling the next.
pub async fn consume<F>(reader: &mut IncrementReader, mut on_increment: F) -> Consumed
where
    F: FnMut(&str),
{
    loop {
        match reader.next().await {
            Step::Increment(text) => on_increment(&text),
            Step::Finished(outcome) => {
                return Consumed {
                    outcome,
                    appended_chars: reader.appended_chars(),
                };
            }
        }
    }
}
