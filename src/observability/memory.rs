use super::traits::{EventSink, KernelEvent};
use std::collections::VecDeque;
use std::sync::Mutex;

const DEFAULT_CAPACITY: usize = 4096;

/// Bounded in-process buffer. Oldest events are dropped first.
pub struct MemorySink {
    capacity: usize,
    events: Mutex<VecDeque<KernelEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    pub fn events(&self) -> Vec<KernelEvent> {
        self.lock().iter().cloned().collect()
    }

    pub fn drain(&self) -> Vec<KernelEvent> {
        self.lock().drain(..).collect()
    }

    pub fn count_where(&self, predicate: impl Fn(&KernelEvent) -> bool) -> usize {
        self.lock().iter().filter(|event| predicate(event)).count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<KernelEvent>> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: &KernelEvent) {
        let mut events = self.lock();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
    }

    fn name(&self) -> &str {
        "memory"
    }
}
