//! Index and generation progress reporting.
//!
//! Reports observable progress during `cmap index` and `cmap generate` so
//! users see how much is left. Progress is emitted on **stderr** so stdout
//! remains parseable for scripts.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// Repository walk finished: `files` accepted, `skipped` rejected.
    Scanned { files: u64, skipped: u64 },
    /// Evidence units embedded so far.
    Embedding { n: u64, total: u64 },
    /// Files summarized so far.
    Summarizing { n: u64, total: u64 },
    /// One control finished generation.
    Generated {
        control_id: String,
        disposition: String,
        n: u64,
        total: u64,
    },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "embed  1,234 / 5,000 units".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Scanned { files, skipped } => format!(
                "scan  {} files ({} skipped)\n",
                format_number(*files),
                format_number(*skipped)
            ),
            ProgressEvent::Embedding { n, total } => format!(
                "embed  {} / {} units\n",
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::Summarizing { n, total } => format!(
                "summarize  {} / {} files\n",
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::Generated {
                control_id,
                disposition,
                n,
                total,
            } => format!(
                "generate  {} / {}  {} ({})\n",
                format_number(*n),
                format_number(*total),
                control_id,
                disposition
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Scanned { files, skipped } => serde_json::json!({
                "event": "progress",
                "phase": "scan",
                "files": files,
                "skipped": skipped
            }),
            ProgressEvent::Embedding { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "embed",
                "n": n,
                "total": total
            }),
            ProgressEvent::Summarizing { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "summarize",
                "n": n,
                "total": total
            }),
            ProgressEvent::Generated {
                control_id,
                disposition,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "generate",
                "control_id": control_id,
                "disposition": disposition,
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn reporter_for_each_mode() {
        for mode in [ProgressMode::Off, ProgressMode::Human, ProgressMode::Json] {
            mode.reporter().report(ProgressEvent::Embedding { n: 1, total: 2 });
        }
    }
}
