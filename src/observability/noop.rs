use super::traits::{EventSink, KernelEvent};

pub struct NoopSink;

impl EventSink for NoopSink {
    fn record(&self, _event: &KernelEvent) {}

    fn name(&self) -> &str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stance::Stance;

    #[test]
    fn noop_sink_accepts_events() {
        let sink = NoopSink;
        sink.record(&KernelEvent::StanceTransition {
            from: Stance::Sensemaking,
            to: Stance::Discovery,
            gate: None,
            success: false,
            reason: "test".into(),
        });
        sink.flush();
        assert_eq!(sink.name(), "noop");
    }
}
