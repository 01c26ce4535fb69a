//! In-memory exporter. Keeps every record for later inspection.

use std::sync::{Arc, Mutex};

use crate::telemetry::{Attributes, ErrorRecord, FinishedSpan, SpanExporter, TelemetryRecord};

#[derive(Debug, Clone, Default)]
pub struct MemoryExporter {
    records: Arc<Mutex<Vec<TelemetryRecord>>>,
}

impl MemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.lock().clone()
    }

    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.lock()
            .iter()
            .filter_map(|r| match r {
                TelemetryRecord::Error(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn spans(&self) -> Vec<FinishedSpan> {
        self.lock()
            .iter()
            .filter_map(|r| match r {
                TelemetryRecord::Span(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    /// All attribute sets recorded against `span_id`.
    pub fn attributes_for(&self, span_id: &str) -> Vec<Attributes> {
        self.lock()
            .iter()
            .filter_map(|r| match r {
                TelemetryRecord::Attributes {
                    span_id: id,
                    attributes,
                    ..
                } if id == span_id => Some(attributes.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TelemetryRecord>> {
        // A poisoned buffer still holds valid records.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SpanExporter for MemoryExporter {
    fn export(&self, record: TelemetryRecord) {
        self.lock().push(record);
    }
}
