use crate::{
    error::PipelineError,
    observer::PipelineObserver,
    step::StepInfo,
    types::{Generation, Prompt},
};
use crossterm::style::{style, Color, Stylize};
use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Duration;

const BAR_WIDTH: usize = 50;
const RULE_WIDTH: usize = 78;

/// Human-readable transcript of a run: banner, progress bar, each step's
/// input and output with timing, and the final result.
///
/// Write failures are ignored; the transcript never affects the run.
pub struct ConsoleObserver {
    out: Mutex<Box<dyn Write + Send>>,
    colors: bool,
}

impl std::fmt::Debug for ConsoleObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleObserver")
            .field("colors", &self.colors)
            .finish()
    }
}

impl ConsoleObserver {
    /// Colored transcript on stdout.
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            colors: true,
        }
    }

    pub fn with_colors(mut self, enabled: bool) -> Self {
        self.colors = enabled;
        self
    }

    fn paint(&self, text: &str, color: Color, bold: bool) -> String {
        if !self.colors {
            return text.to_string();
        }
        let styled = style(text).with(color);
        if bold {
            styled.bold().to_string()
        } else {
            styled.to_string()
        }
    }

    fn block(&self, text: &str, color: Color) -> String {
        let mut rendered = String::new();
        for line in text.split('\n') {
            if !line.trim().is_empty() {
                rendered.push_str(&self.paint(line, color, false));
            }
            rendered.push('\n');
        }
        rendered
    }

    fn emit(&self, text: &str) {
        if let Ok(mut out) = self.out.lock() {
            let _ = out.write_all(text.as_bytes());
            let _ = out.flush();
        }
    }
}

/// `[████░░░░] 40% (2/5)`
pub fn progress_bar(current: usize, total: usize) -> String {
    let total = total.max(1);
    let current = current.min(total);
    let filled = current * BAR_WIDTH / total;
    let percentage = current * 100 / total;
    format!(
        "[{}{}] {}% ({}/{})",
        "█".repeat(filled),
        "░".repeat(BAR_WIDTH - filled),
        percentage,
        current,
        total
    )
}

impl PipelineObserver for ConsoleObserver {
    fn on_start(&self, total_steps: usize, input: &Prompt) {
        let border = "═".repeat(RULE_WIDTH);
        let mut text = String::new();
        text.push('\n');
        text.push_str(&self.paint(&format!("╔{}╗", border), Color::Blue, true));
        text.push('\n');
        text.push_str(&self.paint(
            &format!("║ CHAIN EXECUTION STARTED │ Steps: {}", total_steps),
            Color::Blue,
            true,
        ));
        text.push('\n');
        text.push_str(&self.paint(&format!("╚{}╝", border), Color::Blue, true));
        text.push_str("\n\n");
        text.push_str(&self.paint("INITIAL PROMPT", Color::Cyan, true));
        text.push('\n');
        text.push_str(&self.block(&input.to_string(), Color::Cyan));
        self.emit(&text);
    }

    fn on_step_start(&self, info: &StepInfo, total_steps: usize, input: &Prompt) {
        let mut text = String::new();
        if info.position > 1 {
            text.push('\n');
            text.push_str(&self.paint(&"─".repeat(RULE_WIDTH), Color::Magenta, true));
            text.push('\n');
        }
        text.push_str(&self.paint(
            &progress_bar(info.position, total_steps),
            Color::Yellow,
            false,
        ));
        text.push_str("\n\n");
        text.push_str(&self.paint(
            &format!("┌─ STEP {}: {} ─", info.position, info.name.to_uppercase()),
            Color::Green,
            true,
        ));
        text.push('\n');
        text.push_str(&self.paint(
            &format!("│ Instructions: {}", info.instructions),
            Color::Green,
            false,
        ));
        text.push('\n');
        text.push_str(&self.paint(&format!("└{}", "─".repeat(RULE_WIDTH)), Color::Green, true));
        text.push_str("\n\n");
        text.push_str(&self.paint("📥 INPUT:", Color::Blue, true));
        text.push('\n');
        text.push_str(&self.block(&input.to_string(), Color::Blue));
        self.emit(&text);
    }

    fn on_step_end(&self, _info: &StepInfo, output: &Generation, elapsed: Duration) {
        let mut text = String::new();
        text.push('\n');
        text.push_str(&self.paint("📤 OUTPUT:", Color::Green, true));
        text.push(' ');
        text.push_str(&self.paint(
            &format!("({:.2}s)", elapsed.as_secs_f64()),
            Color::Yellow,
            false,
        ));
        text.push('\n');
        text.push_str(&self.block(&output.text(), Color::Green));
        self.emit(&text);
    }

    fn on_error(&self, info: &StepInfo, error: &PipelineError) {
        let line = format!("\n❌ ERROR (step {}): {}\n", info.position, error);
        self.emit(&self.paint(&line, Color::Red, true));
    }

    fn on_finish(&self, result: &Generation) {
        let border = "═".repeat(RULE_WIDTH);
        let mut text = String::new();
        text.push('\n');
        text.push_str(&self.paint(&format!("╔{}╗", border), Color::Green, true));
        text.push('\n');
        text.push_str(&self.paint("║ 🎉 CHAIN EXECUTION COMPLETE! 🎉", Color::Green, true));
        text.push('\n');
        text.push_str(&self.paint(&format!("╚{}╝", border), Color::Green, true));
        text.push_str("\n\n");
        text.push_str(&self.paint("📋 FINAL RESULT:", Color::Cyan, true));
        text.push('\n');
        text.push_str(&self.block(&result.text(), Color::Cyan));
        self.emit(&text);
    }
}
