use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// JSON-lines diagnostics sink shared by every document a stamper processes.
///
/// The logger holds no per-document state; each run keeps its own counts and hands them to
/// [`DebugLogger::summary`], so concurrent runs never mix totals.
#[derive(Clone)]
pub(crate) struct DebugLogger {
    inner: Arc<Mutex<DebugState>>,
}

struct DebugState {
    writer: Box<dyn Write + Send>,
}

impl DebugLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::from_writer(BufWriter::new(file)))
    }

    pub(crate) fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DebugState {
                writer: Box::new(writer),
            })),
        }
    }

    /// Writes one `{"type": kind, ...fields}` line.
    pub fn event(&self, kind: &str, fields: &[(&str, Value)]) {
        let mut obj = Map::new();
        obj.insert("type".to_string(), Value::from(kind));
        for (key, value) in fields {
            obj.insert((*key).to_string(), value.clone());
        }
        let line = Value::Object(obj).to_string();
        if let Ok(mut state) = self.inner.lock() {
            let _ = writeln!(state.writer, "{line}");
        }
    }

    pub fn summary(&self, context: &str, counts: &BTreeMap<String, u64>) {
        let counts: Map<String, Value> = counts
            .iter()
            .map(|(key, value)| (key.clone(), Value::from(*value)))
            .collect();
        self.event(
            "debug.summary",
            &[
                ("context", Value::from(context)),
                ("counts", Value::Object(counts)),
            ],
        );
    }

    pub fn flush(&self) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = state.writer.flush();
        }
    }
}
