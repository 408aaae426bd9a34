//! Output delivery from the session reader to its single consumer

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// One unit of shell output handed to the consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUnit {
    /// A complete line, terminator removed
    Line(String),
    /// Pending text flushed without a terminator (prompt, idle, end of stream)
    Partial(String),
    /// Raw text as read, interactive mode only
    Chunk(String),
}

impl StreamUnit {
    pub fn text(&self) -> &str {
        match self {
            StreamUnit::Line(s) | StreamUnit::Partial(s) | StreamUnit::Chunk(s) => s,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            StreamUnit::Line(s) | StreamUnit::Partial(s) | StreamUnit::Chunk(s) => s,
        }
    }
}

/// Consumer registered at connect time; receives units in remote order
pub trait OutputSink: Send + Sync + 'static {
    fn deliver(&self, unit: StreamUnit);
}

impl<F> OutputSink for F
where
    F: Fn(StreamUnit) + Send + Sync + 'static,
{
    fn deliver(&self, unit: StreamUnit) {
        self(unit)
    }
}

impl OutputSink for mpsc::UnboundedSender<StreamUnit> {
    fn deliver(&self, unit: StreamUnit) {
        // receiver gone means nobody is listening anymore
        let _ = self.send(unit);
    }
}

pub type SharedSink = Arc<dyn OutputSink>;

/// Thread-safe accumulator of every delivered unit
#[derive(Clone, Default)]
pub struct CapturedOutput {
    units: Arc<Mutex<Vec<StreamUnit>>>,
}

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything captured so far
    pub fn units(&self) -> Vec<StreamUnit> {
        self.units.lock().clone()
    }

    /// Snapshot of the captured text, one entry per unit
    pub fn texts(&self) -> Vec<String> {
        self.units
            .lock()
            .iter()
            .map(|u| u.text().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.units.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.lock().is_empty()
    }
}

impl OutputSink for CapturedOutput {
    fn deliver(&self, unit: StreamUnit) {
        self.units.lock().push(unit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sink: SharedSink = Arc::new(move |unit: StreamUnit| {
            seen_clone.lock().push(unit.into_text());
        });

        sink.deliver(StreamUnit::Line("a".into()));
        sink.deliver(StreamUnit::Chunk("b".into()));

        assert_eq!(*seen.lock(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_channel_sink_preserves_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink: SharedSink = Arc::new(tx);

        for i in 0..5 {
            sink.deliver(StreamUnit::Line(i.to_string()));
        }
        drop(sink);

        let mut received = Vec::new();
        while let Some(unit) = rx.recv().await {
            received.push(unit.into_text());
        }
        assert_eq!(received, vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn test_captured_output_shared_between_clones() {
        let captured = CapturedOutput::new();
        let writer = captured.clone();

        std::thread::spawn(move || {
            for i in 0..100 {
                writer.deliver(StreamUnit::Line(i.to_string()));
            }
        })
        .join()
        .unwrap();

        assert_eq!(captured.len(), 100);
        assert_eq!(captured.texts()[99], "99");
    }
}
