use std::cell::RefCell;
use std::fmt::Display;
use std::io::IsTerminal;
use std::time::{Duration, Instant};

use clap::ValueEnum;
use graphload::ingest::{Reporter, ResumeCursor, RunReport, RunStatus, TracingReporter};
use indicatif::{ProgressBar, ProgressStyle};
use nu_ansi_term::{Color, Style};

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Theme {
    Auto,
    Light,
    Dark,
    Plain,
}

pub struct Ui {
    palette: Palette,
    paint: bool,
    quiet: bool,
    spinner_style: ProgressStyle,
}

impl Ui {
    pub fn new(theme: Theme, quiet: bool) -> Self {
        let stdout_is_tty = std::io::stdout().is_terminal();
        let paint = match theme {
            Theme::Plain => false,
            Theme::Auto | Theme::Light | Theme::Dark => stdout_is_tty,
        } && !quiet;

        let palette = match theme {
            Theme::Plain => Palette::plain(),
            Theme::Light => Palette::light(),
            Theme::Dark | Theme::Auto => Palette::dark(),
        };

        let spinner_style = ProgressStyle::with_template("{prefix} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

        Self {
            palette,
            paint,
            quiet,
            spinner_style,
        }
    }

    pub fn section<'a, I, V>(&self, title: &str, rows: I)
    where
        I: IntoIterator<Item = (&'a str, V)>,
        V: Display,
    {
        let rows: Vec<(String, String)> = rows
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        if rows.is_empty() {
            return;
        }

        self.heading(title);
        let key_width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        for (key, value) in rows {
            if self.paint {
                println!(
                    "  {} {}",
                    self.palette.key.paint(format!("{key:>key_width$}:")),
                    self.palette.value.paint(value)
                );
            } else {
                println!("  {key:>key_width$}: {value}");
            }
        }
    }

    pub fn success(&self, message: &str) {
        self.line(SUCCESS_ICON, self.palette.success, message, false);
    }

    pub fn warn(&self, message: &str) {
        self.line(WARNING_ICON, self.palette.warn, message, true);
    }

    pub fn error(&self, message: &str) {
        self.line(ERROR_ICON, self.palette.error, message, true);
    }

    fn line(&self, icon: &str, style: Style, message: &str, to_stderr: bool) {
        let text = if self.quiet {
            message.to_string()
        } else if self.paint {
            format!("{} {message}", style.paint(icon))
        } else {
            format!("{icon} {message}")
        };
        if to_stderr {
            eprintln!("{text}");
        } else {
            println!("{text}");
        }
    }

    fn spinner(&self, label: &str) -> Option<ProgressBar> {
        if self.quiet || !std::io::stderr().is_terminal() {
            return None;
        }
        let pb = ProgressBar::new_spinner();
        pb.set_style(self.spinner_style.clone());
        let prefix = if self.paint {
            self.palette.info.paint(PROGRESS_ICON).to_string()
        } else {
            PROGRESS_ICON.to_string()
        };
        pb.set_prefix(prefix);
        pb.set_message(label.to_string());
        pb.enable_steady_tick(Duration::from_millis(120));
        Some(pb)
    }

    fn heading(&self, title: &str) {
        if self.quiet {
            println!("{title}");
            return;
        }
        let formatted = format!("{HEADING_ICON} {title}");
        if self.paint {
            println!("{}", self.palette.heading.paint(formatted));
        } else {
            println!("{formatted}");
        }
    }
}

/// Drives a spinner while steps run and keeps their terminal reports.
pub struct ProgressReporter {
    label: String,
    start: Instant,
    pb: RefCell<Option<ProgressBar>>,
    reports: RefCell<Vec<RunReport>>,
}

impl ProgressReporter {
    pub fn new(ui: &Ui, label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            pb: RefCell::new(ui.spinner(&label)),
            label,
            start: Instant::now(),
            reports: RefCell::new(Vec::new()),
        }
    }

    pub fn into_reports(self) -> Vec<RunReport> {
        if let Some(pb) = self.pb.borrow_mut().take() {
            pb.finish_and_clear();
        }
        self.reports.take()
    }
}

impl Reporter for ProgressReporter {
    fn batch_committed(&self, cursor: &ResumeCursor) {
        if let Some(pb) = self.pb.borrow().as_ref() {
            pb.set_message(format!(
                "{}: {} rows committed in {} batches",
                self.label,
                cursor.committed(),
                cursor.batches_committed()
            ));
        }
    }

    fn finished(&self, report: &RunReport) {
        if let Some(pb) = self.pb.borrow().as_ref() {
            let step = report.step.as_deref().unwrap_or(&self.label);
            let elapsed = format_duration(self.start.elapsed());
            match report.status {
                RunStatus::Done => pb.println(format!("{SUCCESS_ICON} {step} finished after {elapsed}")),
                RunStatus::Aborted => pb.println(format!("{ERROR_ICON} {step} aborted after {elapsed}")),
            }
        }
        TracingReporter.finished(report);
        self.reports.borrow_mut().push(report.clone());
    }
}

/// Text rendering of one terminal report.
pub fn print_report(ui: &Ui, report: &RunReport) {
    let title = report.step.as_deref().unwrap_or("load");
    let mut rows: Vec<(&str, String)> = Vec::new();
    if let Some(cursor) = &report.cursor {
        rows.push(("start offset", cursor.start_offset.to_string()));
        rows.push(("rows committed", cursor.committed.to_string()));
        rows.push(("batches", cursor.batches_committed.to_string()));
        rows.push(("resume offset", cursor.resume_offset.to_string()));
        if let Some(row) = &cursor.last_row {
            rows.push(("last row", row.to_string()));
        }
    }
    if let Some(totals) = &report.loop_outcome {
        rows.push(("iterations", totals.iterations.to_string()));
        rows.push(("processed", totals.processed.to_string()));
    }
    ui.section(title, rows);
    match report.status {
        RunStatus::Done => ui.success(&format!("{title} done")),
        RunStatus::Aborted => {
            ui.error(report.message.as_deref().unwrap_or("aborted"));
            if let Some(hint) = report.resume_hint() {
                ui.warn(&hint);
            }
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs_f64() >= 1.0 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{:.0}ms", duration.as_secs_f64() * 1_000.0)
    }
}

struct Palette {
    heading: Style,
    key: Style,
    value: Style,
    info: Style,
    success: Style,
    warn: Style,
    error: Style,
}

impl Palette {
    fn dark() -> Self {
        Self {
            heading: Style::new().fg(Color::Purple).bold(),
            key: Style::new().fg(Color::LightBlue).bold(),
            value: Style::new().fg(Color::White),
            info: Style::new().fg(Color::LightCyan),
            success: Style::new().fg(Color::LightGreen).bold(),
            warn: Style::new().fg(Color::Yellow).bold(),
            error: Style::new().fg(Color::LightRed).bold(),
        }
    }

    fn light() -> Self {
        Self {
            heading: Style::new().fg(Color::Blue).bold(),
            key: Style::new().fg(Color::Black).bold(),
            value: Style::new().fg(Color::Black),
            info: Style::new().fg(Color::Purple),
            success: Style::new().fg(Color::Green).bold(),
            warn: Style::new().fg(Color::Yellow).bold(),
            error: Style::new().fg(Color::Red).bold(),
        }
    }

    fn plain() -> Self {
        Self {
            heading: Style::new(),
            key: Style::new(),
            value: Style::new(),
            info: Style::new(),
            success: Style::new(),
            warn: Style::new(),
            error: Style::new(),
        }
    }
}

const HEADING_ICON: &str = "▸";
const SUCCESS_ICON: &str = "✔";
const WARNING_ICON: &str = "⚠";
const ERROR_ICON: &str = "✖";
const PROGRESS_ICON: &str = "▶";
