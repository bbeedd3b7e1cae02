//! Run progress reporting for the CLI.
//!
//! `distill analyze` writes the report itself to **stdout** as content
//! events arrive, so stdout can be redirected straight into a Markdown file.
//! Everything else (the artifact name, progress, the final status) goes to
//! **stderr** through a [`ProgressReporter`].

use std::io::Write;

use crate::events::PipelineEvent;

/// Reports non-content pipeline events. Implementations write to stderr.
pub trait ProgressReporter: Send + Sync {
    /// Called for every event except `content`.
    fn report(&self, event: &PipelineEvent);
}

/// Human-friendly progress on stderr: "[ 42%] Dehydrated chunk 3 (5 / 12 chunks)".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &PipelineEvent) {
        let line = match event {
            PipelineEvent::Filename { filename } => format!("report  {}\n", filename),
            PipelineEvent::Progress {
                percent,
                message,
                completed: Some(n),
                total: Some(total),
            } if *n > 0 => {
                // The message already carries "(n/total)"; show the counts in long form.
                let message = message.split(" (").next().unwrap_or(message);
                format!(
                    "[{:>3}%] {}  ({} / {} chunks)\n",
                    percent,
                    message,
                    format_number(*n as u64),
                    format_number(*total as u64)
                )
            }
            PipelineEvent::Progress {
                percent, message, ..
            } => format!("[{:>3}%] {}\n", percent, message),
            PipelineEvent::Content { .. } => return,
            PipelineEvent::Done {
                filename,
                storage_error: None,
            } => format!("done    saved {}\n", filename),
            PipelineEvent::Done {
                filename,
                storage_error: Some(e),
            } => format!("done    {} (not saved: {})\n", filename, e),
            PipelineEvent::Error {
                kind,
                message,
                hint,
            } => format!("error   {:?}: {}\n        {}\n", kind, message, hint),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON event per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &PipelineEvent) {
        if matches!(event, PipelineEvent::Content { .. }) {
            return;
        }
        if let Ok(line) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// Reporter used when progress is disabled. The final status is still printed.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, event: &PipelineEvent) {
        if event.is_terminal() {
            StderrProgress.report(event);
        }
    }
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
    fn reporters_ignore_content() {
        // Content belongs on stdout; reporters must accept it without output.
        let event = PipelineEvent::Content {
            text: "body".into(),
        };
        for mode in [ProgressMode::Off, ProgressMode::Human, ProgressMode::Json] {
            mode.reporter().report(&event);
        }
    }
}
