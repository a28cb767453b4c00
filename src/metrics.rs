use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PassMetrics {
    pub pass: &'static str,
    pub page_count: usize,
    pub headings: usize,
    pub flowables: usize,
    pub page_breaks: usize,
    pub layout_ms: f64,
}

/// Outcome of a successful render.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RenderSummary {
    pub output: PathBuf,
    pub pages: usize,
    pub sections: usize,
    pub flagged_cells: usize,
    pub config_fingerprint: String,
    pub content_digest: String,
    pub fallback_front_page: bool,
    /// Characters drawn as `?` because the base fonts cannot encode them.
    pub replaced_chars: usize,
    pub passes: Vec<PassMetrics>,
    pub total_bytes: usize,
}

impl RenderSummary {
    pub fn total_layout_ms(&self) -> f64 {
        self.passes.iter().map(|pass| pass.layout_ms).sum()
    }
}
