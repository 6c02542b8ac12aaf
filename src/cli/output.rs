//! CLI output formatting

use crate::{
    core::{Condition, ConditionStatus, ErrorList, Phase},
    execution::{DriveReport, DriveResult, EngineEvent},
    persistence::TargetSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a spinner shown while an operation is driven
pub fn create_spinner(message: impl Into<String>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message.into());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Width of the terminal, 80 when it can't be determined
pub fn terminal_width() -> usize {
    term_size::dimensions_stdout().map(|(w, _)| w).unwrap_or(80)
}

/// Cut `text` to `width` characters, marking the cut with an ellipsis
pub fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let kept: String = text.chars().take(width.saturating_sub(1)).collect();
    format!("{}…", kept)
}

/// Format a phase for display
pub fn format_phase(phase: Phase) -> String {
    match phase {
        Phase::Pending => style("PENDING").dim().to_string(),
        Phase::Processing => style("PROCESSING").yellow().to_string(),
        Phase::Running => style("RUNNING").green().to_string(),
        Phase::Upgrading => style("UPGRADING").yellow().to_string(),
        Phase::Terminating => style("TERMINATING").magenta().to_string(),
        Phase::Failed => style("FAILED").red().to_string(),
    }
}

/// Format one condition as a status line, fitted to `width`
pub fn format_condition(condition: &Condition, width: usize) -> String {
    let icon = match condition.status {
        ConditionStatus::True if condition.reason == crate::core::REASON_SKIP => SKIP,
        ConditionStatus::True => CHECK,
        ConditionStatus::False => CROSS,
        ConditionStatus::Unknown => SPINNER,
    };
    let head = format!("{:<24} {:<8} {:<20}", condition.type_, condition.status, condition.reason);
    let room = width.saturating_sub(head.chars().count() + 4);
    let message = truncate(&condition.message, room.max(10));

    let head = match condition.status {
        ConditionStatus::True => style(head).green(),
        ConditionStatus::False => style(head).red(),
        ConditionStatus::Unknown => style(head).yellow(),
    };
    format!("{}{} {}", icon, head, style(message).dim())
}

/// Format a stored target summary for display
pub fn format_target_summary(summary: &TargetSummary) -> String {
    let icon = match summary.phase {
        Phase::Running => CHECK,
        Phase::Failed => CROSS,
        Phase::Pending => INFO,
        _ => SPINNER,
    };
    format!(
        "{}{} - {} ({}/{}) - {}",
        icon,
        style(&summary.name).bold(),
        format_phase(summary.phase),
        summary.completed_steps,
        summary.recorded_steps,
        style(summary.updated_at.format("%Y-%m-%d %H:%M:%S").to_string()).dim()
    )
}

/// Format the end-of-run report
pub fn format_report(report: &DriveReport) -> String {
    let run = report.run_id.to_string();
    let head = match report.result {
        DriveResult::Completed => format!(
            "{}{} {} {}",
            CHECK,
            style(&report.target).bold(),
            report.operation,
            style("completed").green()
        ),
        DriveResult::Failed => format!(
            "{}{} {} {}",
            CROSS,
            style(&report.target).bold(),
            report.operation,
            style("failed").red()
        ),
    };
    let mut out = format!(
        "{} ({}) - {} calls, {} failures, {:.1}s",
        head,
        style(&run[..8]).dim(),
        report.calls,
        report.failures,
        report.elapsed.as_secs_f64()
    );
    if let (DriveResult::Failed, Some(err)) = (report.result, &report.last_error) {
        out.push_str(&format!("\n   {}", style(err).red()));
    }
    out
}

/// Format an engine event for display
pub fn format_engine_event(event: &EngineEvent) -> String {
    match event {
        EngineEvent::StepStarted { step, .. } => format!("{}{}", SPINNER, style(step).cyan()),
        EngineEvent::StepSucceeded { step, elapsed, .. } => format!(
            "{}{} {}",
            CHECK,
            style(step).green(),
            style(format!("({:.1}s)", elapsed.as_secs_f64())).dim()
        ),
        EngineEvent::StepSkipped { step, .. } => format!("{}{} {}", SKIP, style(step).dim(), style("skipped").dim()),
        EngineEvent::StepFailed { step, error, .. } => format!(
            "{}{}: {}",
            CROSS,
            style(step).red(),
            style(truncate(error, terminal_width().saturating_sub(step.len() + 6))).dim()
        ),
        EngineEvent::PipelineCompleted { target, operation } => format!(
            "{}{} {} pipeline {}",
            ROCKET,
            style(target).bold(),
            operation,
            style("finished").green()
        ),
    }
}

/// Format validation errors, one per line
pub fn format_errors(errors: &ErrorList) -> String {
    errors
        .iter()
        .map(|e| format!("  {}{}", CROSS, e))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer message", 8), "a longe…");
        assert_eq!(truncate("ünïcödé", 4), "ünï…");
    }

    #[test]
    fn test_format_condition_fits_width() {
        console::set_colors_enabled(false);
        let cond = Condition::new("initMaster", ConditionStatus::False, "FailedinitMaster", "x".repeat(500));
        let line = format_condition(&cond, 100);
        assert!(line.contains("initMaster"));
        assert!(line.chars().count() < 120);
    }
}
