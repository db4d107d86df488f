//! Typed event payloads (spec §6 "Events emitted", §9 "Dynamic event
//! emitter" redesign note). A single tagged-union enum, dispatched to a
//! subscriber trait rather than an ad hoc callback closure per event kind —
//! the spec calls this out explicitly as a redesign target.

/// One chunk of demultiplexed exec output (spec §4.6.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub data: Vec<u8>,
    pub is_stderr: bool,
}

/// A single event in temporal order, as observed by one subscriber (spec §5
/// "Ordering guarantees": order across subscribers is not defined).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CommandExecute {
        stage_idx: usize,
        command: String,
    },
    CommandOutput {
        stage_idx: usize,
        output: OutputChunk,
    },
    CommandReturn {
        stage_idx: usize,
        return_code: i64,
        command: String,
    },
    ContainerRestart {
        container_id: String,
    },
    Cancel,
}

/// Receives events as the orchestrator emits them. Implementors decide how
/// to fan events out (a channel, a log sink, a test-only recorder); the
/// orchestrator only requires that `on_event` not block indefinitely, since
/// it is called inline on the hot path between remote operations.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: Event);
}

/// An [`EventSink`] that records every event it receives, in order. Used by
/// tests and by any caller that wants to inspect a full run's event trace
/// after the fact rather than reacting to events as they arrive.
#[derive(Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("event sink mutex poisoned").clone()
    }
}

impl EventSink for RecordingSink {
    fn on_event(&self, event: Event) {
        self.events.lock().expect("event sink mutex poisoned").push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_preserves_order() {
        let sink = RecordingSink::new();
        sink.on_event(Event::CommandExecute {
            stage_idx: 0,
            command: "echo hi".to_string(),
        });
        sink.on_event(Event::Cancel);
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], Event::Cancel));
    }
}
