use std::io::IsTerminal;
use std::path::Path;
use std::time::Duration;

use anstyle::{AnsiColor, Effects, Style};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use lockstep_core::{OperationRecord, Outcome, Step};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn current_output_style() -> OutputStyle {
    if std::io::stdout().is_terminal() {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => {
            let badge = format!("[{}]", status.to_ascii_uppercase());
            format!("{} {}", colorize(status_style(status), &badge), message)
        }
    }
}

pub(crate) fn render_record_line(style: OutputStyle, record: &OperationRecord) -> String {
    let line = format!("{}  {}  {}", record.project, record.command, record.outcome);
    let status = match record.outcome {
        Outcome::Committed(_) => "commit",
        Outcome::Unchanged => "no-op",
    };
    render_status_line(style, status, &line)
}

pub(crate) fn render_records_json(
    run_root: &Path,
    log_path: &Path,
    records: &[OperationRecord],
) -> Result<String> {
    let document = serde_json::json!({
        "root": run_root.display().to_string(),
        "log": log_path.display().to_string(),
        "records": records,
    });
    serde_json::to_string_pretty(&document).context("failed to serialize operation records")
}

/// Progress across scenario steps; only drawn for interactive output.
pub(crate) struct StepProgress {
    progress_bar: Option<ProgressBar>,
}

impl StepProgress {
    pub(crate) fn start(style: OutputStyle, total: usize) -> Self {
        let progress_bar = (style == OutputStyle::Rich).then(|| {
            let progress_bar = ProgressBar::new(total.max(1) as u64);
            if let Ok(template) = ProgressStyle::with_template(
                "{spinner:.cyan.bold} [{bar:20.cyan/blue}] {pos:>3}/{len:3} {msg}",
            ) {
                progress_bar.set_style(template.progress_chars("=>-"));
            }
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            progress_bar
        });
        Self { progress_bar }
    }

    pub(crate) fn step(&self, index: usize, step: &Step) {
        if let Some(progress_bar) = &self.progress_bar {
            progress_bar.set_position(index as u64);
            progress_bar.set_message(format!("{} {}", step.project, step.action.label()));
        }
    }

    pub(crate) fn finish(self) {
        if let Some(progress_bar) = self.progress_bar {
            progress_bar.finish_and_clear();
        }
    }
}

fn status_style(status: &str) -> Style {
    let color = match status {
        "commit" | "ok" => AnsiColor::BrightGreen,
        "no-op" => AnsiColor::BrightYellow,
        "error" => AnsiColor::BrightRed,
        _ => AnsiColor::BrightBlue,
    };
    Style::new()
        .fg_color(Some(color.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}
