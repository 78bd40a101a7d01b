//! CLI output formatting

use crate::{
    core::{FrameResult, Phase, Play},
    execution::PlayEvent,
    persistence::PlaySummary,
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
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a spinner for a running play
pub fn create_spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
        spinner.set_style(template);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Format a phase for display
pub fn format_phase(phase: Phase) -> String {
    match phase {
        Phase::Created | Phase::Init => style(phase.as_str().to_uppercase()).dim().to_string(),
        Phase::Running => style("RUNNING").yellow().to_string(),
        Phase::Complete => style("COMPLETE").green().to_string(),
        Phase::Failed => style("FAILED").red().to_string(),
        Phase::Error => style("ERROR").red().bold().to_string(),
    }
}

pub fn format_result(result: FrameResult) -> String {
    match result {
        FrameResult::Successful => style("success").green().to_string(),
        FrameResult::Failed => style("failed").red().to_string(),
    }
}

fn phase_icon(phase: Phase) -> Emoji<'static, 'static> {
    match phase {
        Phase::Complete => CHECK,
        Phase::Failed | Phase::Error => CROSS,
        Phase::Running => SPINNER,
        _ => INFO,
    }
}

/// Format a play summary for display
pub fn format_play_summary(summary: &PlaySummary) -> String {
    let started = summary
        .started_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{} {} - {} - {} concluded, {} failed - {}",
        phase_icon(summary.phase),
        style(summary.key.to_string()).bold(),
        format_phase(summary.phase),
        summary.concluded_frames,
        summary.failed_frames,
        style(started).dim()
    )
}

/// Format a play event for display
pub fn format_play_event(event: &PlayEvent) -> String {
    match event {
        PlayEvent::PhaseChanged { key, from, to } => format!(
            "{} {} {} → {}",
            if *to == Phase::Running { ROCKET } else { phase_icon(*to) },
            style(key.to_string()).bold(),
            style(from.as_str()).dim(),
            format_phase(*to)
        ),
        PlayEvent::FramesDispatched { frames, .. } => format!(
            "{} dispatched {}",
            SPINNER,
            style(frames.join(", ")).cyan()
        ),
        PlayEvent::FrameConcluded {
            frame_id, result, ..
        } => {
            let icon = match result {
                FrameResult::Successful => CHECK,
                FrameResult::Failed => CROSS,
            };
            format!("{} {} {}", icon, style(frame_id).cyan(), format_result(*result))
        }
        PlayEvent::Errored { key, error } => format!(
            "{} {}: {}",
            WARN,
            style(key.to_string()).bold(),
            style(error).red()
        ),
    }
}

/// Multi-line description of a play and its frames
pub fn format_play_details(play: &Play) -> String {
    let mut lines = vec![
        format!("{} Play {}", INFO, style(play.key().to_string()).bold()),
        format!("  Phase: {}", format_phase(play.status.phase)),
    ];
    if let Some(started) = play.status.started_at {
        lines.push(format!("  Started: {}", style(started.to_rfc3339()).dim()));
    }
    if let Some(completed) = play.status.completed_at {
        lines.push(format!("  Completed: {}", style(completed.to_rfc3339()).dim()));
    }

    lines.push("  Frames:".to_string());
    for frame in play.frames() {
        let result = match play.status.result(&frame.id) {
            Some(result) => format_result(result),
            None => style("pending").dim().to_string(),
        };
        lines.push(format!("    {} ({}) {}", frame.name, style(&frame.id).dim(), result));
    }
    // replicas are recorded under derived identities
    for (id, result) in &play.status.frames {
        if play.frame(id).is_none() {
            lines.push(format!("    {} {}", style(id).dim(), format_result(*result)));
        }
    }
    lines.join("\n")
}
