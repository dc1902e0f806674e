use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, Write};
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::fmt::MakeWriter;

const BAR_TEMPLATE: &str =
    "{prefix:.bold.dim} {spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({binary_bytes_per_sec}, {eta}) {msg}";
const SPINNER_TEMPLATE: &str = "{prefix:.bold.dim} {spinner:.green} {bytes} ({binary_bytes_per_sec}) {msg}";

/// Terminal progress bars shared by every transfer.
#[derive(Clone)]
pub struct Progress {
    multi: MultiProgress,
}

impl Progress {
    pub fn new(enabled: bool) -> Self {
        let multi = if enabled {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };
        Self { multi }
    }

    pub fn hidden() -> Self {
        Self::new(false)
    }

    /// Adds a byte bar, or a spinner when the size is unknown.
    pub fn transfer_bar(&self, name: &str, total: Option<u64>) -> ProgressBar {
        let bar = match total {
            Some(total) if total > 0 => {
                let bar = self.multi.add(ProgressBar::new(total));
                bar.set_style(
                    ProgressStyle::with_template(BAR_TEMPLATE)
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("##-"),
                );
                bar
            }
            _ => {
                let bar = self.multi.add(ProgressBar::new_spinner());
                bar.set_style(
                    ProgressStyle::with_template(SPINNER_TEMPLATE)
                        .unwrap_or_else(|_| ProgressStyle::default_spinner())
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
                );
                bar
            }
        };
        bar.set_prefix(format!("[{}]", name));
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    }

    /// Removes whatever is left of the last batch.
    pub fn clear(&self) {
        if let Err(e) = self.multi.clear() {
            debug!("could not clear progress bars: {}", e);
        }
    }

    /// A log writer that pauses the bars while a line is printed.
    pub fn writer(&self) -> ProgressWriter {
        ProgressWriter {
            multi: self.multi.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ProgressWriter {
    multi: MultiProgress,
}

impl Write for ProgressWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.multi.suspend(|| io::stdout().write(buf))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.multi.suspend(|| io::stdout().write_all(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()
    }
}

impl<'a> MakeWriter<'a> for ProgressWriter {
    type Writer = ProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
