// Progress bar management using indicatif.
// All bars live under one MultiProgress so they render on separate lines.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::fs;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct ProgressManager {
    multi: Option<Arc<MultiProgress>>,
}

impl ProgressManager {
    // Create a new manager. If enabled=false, no bars are created.
    pub fn new(enabled: bool) -> Self {
        let multi = enabled.then(|| Arc::new(MultiProgress::new()));
        Self { multi }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    // Create a bar for file-byte progress with a label.
    pub fn new_file_bar(&self, path: &str, label: &str) -> Option<ProgressBar> {
        let mp = self.multi.as_ref()?;
        let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let bar = mp.add(ProgressBar::new(size));
        bar.set_style(progress_style());
        bar.set_prefix(format!("{label} {}", basename(path)));
        Some(bar)
    }

    // Spinner counting emitted operations while a reconciliation runs.
    pub fn new_operation_spinner(&self, label: &str) -> Option<ProgressBar> {
        let mp = self.multi.as_ref()?;
        let bar = mp.add(ProgressBar::new_spinner());
        bar.set_style(spinner_style());
        bar.set_prefix(label.to_string());
        Some(bar)
    }
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix:30} {bytes:>10}/{total_bytes:<10} [{bar:57}] {percent:>3}%",
    )
    .map(|s| s.progress_chars("█ "))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}

// Alternative style for operation counters.
fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:30} {spinner} {pos:>8} operations")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

// Convenience for labels using filename only.
pub fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .to_string()
}
