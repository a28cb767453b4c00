use serde_json::{Value as Json, json};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// JSONL trace of layout decisions, one event object per line.
#[derive(Clone)]
pub struct LayoutTrace {
    inner: Arc<Mutex<TraceState>>,
}

struct TraceState {
    writer: Box<dyn Write + Send>,
    counters: BTreeMap<String, u64>,
}

impl LayoutTrace {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::from_writer(BufWriter::new(file)))
    }

    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TraceState {
                writer: Box::new(writer),
                counters: BTreeMap::new(),
            })),
        }
    }

    pub fn log_event(&self, event: Json) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = writeln!(state.writer, "{event}");
        }
    }

    pub fn increment(&self, key: &str, amount: u64) {
        if let Ok(mut state) = self.inner.lock() {
            let entry = state.counters.entry(key.to_string()).or_insert(0);
            *entry = entry.saturating_add(amount);
        }
    }

    pub fn page_break(
        &self,
        pass: &str,
        from_page: usize,
        reason: &str,
        flowable: &str,
        frame_index: usize,
    ) {
        self.log_event(json!({
            "type": "layout.page_break",
            "pass": pass,
            "reason": reason,
            "from_page": from_page,
            "to_page": from_page + 1,
            "frame_index": frame_index,
            "flowable": flowable,
        }));
        self.increment("layout.page_break", 1);
        self.increment(&format!("layout.page_break.{reason}"), 1);
    }

    /// Writes accumulated counters as a `debug.summary` event and resets them.
    pub fn emit_summary(&self, context: &str) {
        if let Ok(mut state) = self.inner.lock() {
            let counters = std::mem::take(&mut state.counters);
            let event = json!({
                "type": "debug.summary",
                "context": context,
                "counts": counters,
            });
            let _ = writeln!(state.writer, "{event}");
        }
    }

    pub fn flush(&self) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = state.writer.flush();
        }
    }
}

impl std::fmt::Debug for LayoutTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayoutTrace").finish_non_exhaustive()
    }
}
