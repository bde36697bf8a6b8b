pub mod list;
pub mod start;
pub mod status;
pub mod stop;
pub mod update;

use indicatif::{ProgressBar, ProgressStyle};
use rigconf_core::service::Ack;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_UNREACHABLE: u8 = 2;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn plain_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Pad `state` to `width` columns, then color it. Padding after styling
/// would count the escape codes toward the width.
pub fn colorize_state(state: &str, width: usize) -> String {
    use console::Style;
    let padded = format!("{state:<width$}");
    match state {
        "running" => Style::new().green().bold().apply_to(padded).to_string(),
        "idle" => Style::new().dim().apply_to(padded).to_string(),
        _ => padded,
    }
}

/// Shared tail of the start/stop commands: report the acknowledgement and
/// map it to an exit code.
pub fn report_ack(
    ack: &Ack,
    pb: Option<&ProgressBar>,
    done: &str,
    json: bool,
) -> Result<u8, String> {
    if json {
        println!("{}", json_pretty(ack)?);
        return Ok(if ack.ok { EXIT_SUCCESS } else { EXIT_FAILURE });
    }
    if ack.ok {
        let done = match &ack.message {
            Some(note) => format!("{done} ({note})"),
            None => done.to_owned(),
        };
        if let Some(pb) = pb {
            spin_ok(pb, &done);
        } else {
            println!("{done}");
        }
        return Ok(EXIT_SUCCESS);
    }
    let message = ack.message.as_deref().unwrap_or("request failed");
    if let Some(pb) = pb {
        spin_fail(pb, message);
    }
    Err(message.to_owned())
}
