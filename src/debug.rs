use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// JSON-lines event log. The file is shared by every render of one renderer;
/// each record is written whole under the lock so concurrent renders
/// interleave by line. Counters belong to one logger handle, and
/// [`DebugLogger::for_render`] hands each render its own.
/// Write failures are ignored: logging never fails a render.
#[derive(Clone)]
pub(crate) struct DebugLogger {
    writer: Arc<Mutex<BufWriter<File>>>,
    counters: Arc<Mutex<BTreeMap<String, u64>>>,
}

impl DebugLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: Arc::new(Mutex::new(BufWriter::new(file))),
            counters: Arc::new(Mutex::new(BTreeMap::new())),
        })
    }

    /// Same log file, fresh counters.
    pub fn for_render(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
            counters: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn log(&self, event: Value) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{event}");
        }
    }

    pub fn increment(&self, key: &str, amount: u64) {
        if let Ok(mut counters) = self.counters.lock() {
            let entry = counters.entry(key.to_string()).or_insert(0);
            *entry = entry.saturating_add(amount);
        }
    }

    /// Writes and resets this handle's counters.
    pub fn emit_summary(&self, context: &str) {
        let counts: Map<String, Value> = match self.counters.lock() {
            Ok(mut counters) => std::mem::take(&mut *counters)
                .into_iter()
                .map(|(key, value)| (key, Value::from(value)))
                .collect(),
            Err(_) => return,
        };
        self.log(json!({
            "type": "debug.summary",
            "context": context,
            "counts": counts,
        }));
    }

    pub fn flush(&self) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.flush();
        }
    }
}
