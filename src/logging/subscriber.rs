//! Tracing subscriber setup: console formatter, file layer, and initialisation.
//!
//! Events are routed by target:
//!
//! | target              | console                 | log file                         |
//! |---------------------|-------------------------|----------------------------------|
//! | `converge::stage`   | `==> msg` (bold)        | `==> msg`                        |
//! | `converge::dry_run` | `[dry run] msg`         | `[dry run] msg`                  |
//! | `converge::run`     | verbose only            | `root:` / `manifest:` / `platform:` header rows |
//! | `converge::app`     | verbose only            | `[app] id status (detail)`       |
use std::fs;
use std::io::Write as _;
use std::sync::{Arc, Mutex};

use tracing::Level;
use tracing::field::{Field, Visit};

use super::types::ProgressLine;
use super::utils::{format_utc_datetime, format_utc_time, log_file_path, strip_ansi};

/// Target of stage headers.
pub(super) const STAGE: &str = "converge::stage";
/// Target of dry-run action lines.
pub(super) const DRY_RUN: &str = "converge::dry_run";
/// Target of the once-per-run root/manifest/platform event.
pub(super) const RUN: &str = "converge::run";
/// Target of per-app outcome events.
pub(super) const APP: &str = "converge::app";

const RULE: &str = "==========================================";

/// The fields of one event that the converge formats care about.
#[derive(Debug, Default)]
struct EventFields {
    message: String,
    app: Option<String>,
    status: Option<String>,
    detail: Option<String>,
    root: Option<String>,
    manifest: Option<String>,
    platform: Option<String>,
}

impl EventFields {
    fn of(event: &tracing::Event<'_>) -> Self {
        let mut fields = Self::default();
        event.record(&mut fields);
        fields
    }

    fn slot(&mut self, name: &str) -> Option<&mut Option<String>> {
        match name {
            "app" => Some(&mut self.app),
            "status" => Some(&mut self.status),
            "detail" => Some(&mut self.detail),
            "root" => Some(&mut self.root),
            "manifest" => Some(&mut self.manifest),
            "platform" => Some(&mut self.platform),
            _ => None,
        }
    }

    /// `id status (detail)` for an app outcome event.
    fn app_line(&self) -> String {
        let app = self.app.as_deref().unwrap_or("?");
        let status = self.status.as_deref().unwrap_or("?");
        match self.detail.as_deref().filter(|d| !d.is_empty()) {
            Some(detail) => format!("{app} {status} ({detail})"),
            None => format!("{app} {status}"),
        }
    }

    /// Header rows for a run event; absent fields are left out.
    fn run_rows(&self) -> Vec<String> {
        [
            ("root", &self.root),
            ("manifest", &self.manifest),
            ("platform", &self.platform),
        ]
        .into_iter()
        .filter_map(|(label, value)| {
            let label = format!("{label}:");
            value.as_deref().map(|v| format!("{label:<10}{v}"))
        })
        .collect()
    }
}

impl Visit for EventFields {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let text = format!("{value:?}");
        if field.name() == "message" {
            self.message = text;
        } else if let Some(slot) = self.slot(field.name()) {
            *slot = Some(text);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else if let Some(slot) = self.slot(field.name()) {
            *slot = Some(value.to_string());
        }
    }
}

/// A [`tracing_subscriber::Layer`] that appends all events to the persistent
/// log file with timestamps and ANSI codes stripped.
///
/// The file opens with a banner naming the converge version and start time.
/// The run event that follows adds the root, manifest, and platform rows,
/// so every log identifies what it converged.
#[derive(Debug)]
pub(super) struct FileLayer {
    file: Mutex<fs::File>,
}

impl FileLayer {
    /// Truncate the log file for `command`, write the banner, and return a
    /// layer appending to it.
    ///
    /// Returns `None` if the cache directory cannot be created or the file
    /// cannot be opened.
    pub(super) fn new(command: &str) -> Option<Self> {
        let path = log_file_path(command)?;
        let version =
            option_env!("CONVERGE_VERSION").unwrap_or(concat!("dev-", env!("CARGO_PKG_VERSION")));
        let banner = format!(
            "{RULE}\nconverge {command} {version} {}\n{RULE}\n",
            format_utc_datetime(),
        );
        fs::write(&path, banner).ok()?;
        let file = fs::OpenOptions::new().append(true).open(&path).ok()?;
        Some(Self {
            file: Mutex::new(file),
        })
    }

    fn render(level: Level, target: &str, fields: &EventFields) -> Vec<String> {
        let msg = strip_ansi(&fields.message);
        let ts = format_utc_time();
        let line = match (level, target) {
            (_, RUN) => {
                let mut rows = fields.run_rows();
                rows.push("-".repeat(RULE.len()));
                return rows;
            }
            (_, APP) => format!("[{ts}]     [app] {}", strip_ansi(&fields.app_line())),
            (Level::INFO, STAGE) => format!("[{ts}] ==> {msg}"),
            (Level::INFO, DRY_RUN) => format!("[{ts}]     [dry run] {msg}"),
            (Level::ERROR, _) => format!("[{ts}]     [error] {msg}"),
            (Level::WARN, _) => format!("[{ts}]     [warn] {msg}"),
            (Level::DEBUG | Level::TRACE, _) => format!("[{ts}]     [debug] {msg}"),
            _ => format!("[{ts}]     {msg}"),
        };
        vec![line]
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for FileLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let metadata = event.metadata();
        let lines = Self::render(*metadata.level(), metadata.target(), &EventFields::of(event));
        if let Ok(mut f) = self.file.lock() {
            for line in lines {
                writeln!(f, "{line}").ok();
            }
        }
    }
}

/// Console formatter: stage arrows, dry-run tags, dimmed debug lines.
///
/// Any event printed while the progress row is on screen first erases that
/// row, so worker output never lands mid-line. The engine redraws the row
/// on its next tick.
struct ConvergeFormatter {
    progress: Arc<ProgressLine>,
}

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for ConvergeFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        if self.progress.take() {
            write!(writer, "\r\x1b[K")?;
        }
        let metadata = event.metadata();
        let fields = EventFields::of(event);
        let msg = &fields.message;

        match (*metadata.level(), metadata.target()) {
            (Level::ERROR, _) => writeln!(writer, "\x1b[31mERROR\x1b[0m {msg}"),
            (Level::WARN, _) => writeln!(writer, "\x1b[33mWARN\x1b[0m  {msg}"),
            (_, RUN) => writeln!(writer, "  \x1b[2m{}\x1b[0m", fields.run_rows().join("  ")),
            (_, APP) => writeln!(writer, "  \x1b[2m{}\x1b[0m", fields.app_line()),
            (Level::INFO, STAGE) => writeln!(writer, "\x1b[1;34m==>\x1b[0m \x1b[1m{msg}\x1b[0m"),
            (Level::INFO, DRY_RUN) => writeln!(writer, "  \x1b[33m[dry run]\x1b[0m {msg}"),
            (Level::INFO, _) => writeln!(writer, "  {msg}"),
            _ => writeln!(writer, "  \x1b[2m{msg}\x1b[0m"),
        }
    }
}

/// Initialise the global [`tracing`] subscriber.
///
/// The console layer honours `verbose`; the file layer always records
/// `debug` and above to `$XDG_CACHE_HOME/converge/<command>.log`. `progress`
/// must be the same handle the [`Logger`](super::Logger) draws through.
/// Must be called once at program startup, before any logging.
pub fn init_subscriber(verbose: bool, command: &str, progress: Arc<ProgressLine>) {
    use tracing_subscriber::fmt::writer::MakeWriterExt as _;
    use tracing_subscriber::{
        Layer as _, filter::LevelFilter, fmt, layer::SubscriberExt as _,
        util::SubscriberInitExt as _,
    };

    let console_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let make_writer = std::io::stderr
        .with_max_level(Level::WARN)
        .and(std::io::stdout.with_min_level(Level::INFO));

    let console_layer = fmt::layer()
        .event_format(ConvergeFormatter { progress })
        .with_writer(make_writer)
        .with_filter(console_level);

    let file_layer = FileLayer::new(command).map(|l| l.with_filter(LevelFilter::DEBUG));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();
}
