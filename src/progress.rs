use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner style used while a repository operation runs.
/// - Yellow spinner with animated braille-style frames.
/// - Displays the current message (`{wide_msg}`) next to the spinner.
pub fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("\x1b[33m{spinner}\x1b[0m {wide_msg}")
        .unwrap()
        .tick_strings(&["⣾", "⣽", "⣻", "⢿", "⡿", "⣟", "⣯", "⣷"])
}

/// Green check mark followed by the final message.
pub fn ok_style() -> ProgressStyle {
    ProgressStyle::with_template("\x1b[32m✔\x1b[0m {wide_msg}").unwrap()
}

/// Red cross followed by the error message.
pub fn err_style() -> ProgressStyle {
    ProgressStyle::with_template("\x1b[31m✘\x1b[0m {wide_msg}").unwrap()
}

/// Start a steady spinner showing `msg`.
pub fn spinner(msg: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(spinner_style());
    pb.set_message(msg.into());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Print a finished line in the ok or error style.
pub fn report_line(ok: bool, msg: String) {
    let pb = ProgressBar::new_spinner();
    pb.set_style(if ok { ok_style() } else { err_style() });
    pb.finish_with_message(msg);
}
