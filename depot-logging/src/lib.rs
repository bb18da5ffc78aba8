//! Tracing setup shared by the depot binaries.
//!
//! Settings come from the `logging` section of the depot configuration file and
//! may be overridden by `DEPOT_LOG_LEVEL`, `DEPOT_LOG_FORMAT`, `DEPOT_LOG_OUTPUT`,
//! `DEPOT_LOG_FILE` and `DEPOT_LOG_TAGS`.

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Debug;
use std::path::Path;
use std::str::FromStr;
use tracing::field::{Field, Visit};
use tracing::{span, Metadata, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Line format of emitted events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Human,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "human" => Ok(LogFormat::Human),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Where events go. Console output is always stderr so stdout stays free for
/// command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Console,
    File,
    Both,
}

impl LogOutput {
    fn console(self) -> bool {
        matches!(self, LogOutput::Console | LogOutput::Both)
    }

    fn file(self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }
}

impl FromStr for LogOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" => Ok(LogOutput::Both),
            other => Err(format!("unknown log output: {other}")),
        }
    }
}

/// Logging section of the depot configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive, e.g. `info` or `depot_server=debug`
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Log file used when output includes the file; rotated daily
    pub file_path: String,
    /// `key:value` span field filters, e.g. `repository:npm-proxy`
    pub tags: Vec<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Human,
            output: LogOutput::Console,
            file_path: "/tmp/depot.log".to_string(),
            tags: Vec::new(),
        }
    }
}

impl LoggingSettings {
    /// Apply `DEPOT_LOG_*` environment overrides on top of these settings.
    ///
    /// Unparseable format or output values leave the configured value in place.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(level) = env::var("DEPOT_LOG_LEVEL") {
            self.level = level;
        }
        if let Some(format) = env::var("DEPOT_LOG_FORMAT").ok().and_then(|v| v.parse().ok()) {
            self.format = format;
        }
        if let Some(output) = env::var("DEPOT_LOG_OUTPUT").ok().and_then(|v| v.parse().ok()) {
            self.output = output;
        }
        if let Ok(path) = env::var("DEPOT_LOG_FILE") {
            self.file_path = path;
        }
        if let Ok(tags) = env::var("DEPOT_LOG_TAGS") {
            self.tags = tags.split(',').map(str::to_string).collect();
        }
        self
    }
}

/// Field values recorded on a span, stored in its extensions.
#[derive(Default)]
struct SpanFields(Vec<(String, String)>);

impl Visit for SpanFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.push((field.name().to_string(), value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        self.0.push((field.name().to_string(), format!("{value:?}")));
    }
}

/// Passes only events inside a span chain that carries every `key:value` tag.
///
/// A value of `*` only requires the key to be present. Sync runs and remote
/// fetches record `storage` and `repository`, so `repository:npm-proxy`
/// narrows output to one repository.
struct SpanTagFilter {
    tags: Vec<(String, String)>,
}

impl SpanTagFilter {
    fn new(tags: &[String]) -> Self {
        let tags = tags
            .iter()
            .filter_map(|tag| {
                let (key, value) = tag.split_once(':')?;
                Some((key.trim().to_string(), value.trim().to_string()))
            })
            .filter(|(key, _)| !key.is_empty())
            .collect();
        Self { tags }
    }

    fn accepts(&self, recorded: &[(String, String)]) -> bool {
        self.tags.iter().all(|(key, wanted)| {
            recorded
                .iter()
                .any(|(k, v)| k == key && (wanted == "*" || v.contains(wanted.as_str())))
        })
    }
}

impl<S> Layer<S> for SpanTagFilter
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        if self.tags.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            let mut fields = SpanFields::default();
            attrs.record(&mut fields);
            span.extensions_mut().insert(fields);
        }
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        if self.tags.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            let mut extensions = span.extensions_mut();
            if let Some(fields) = extensions.get_mut::<SpanFields>() {
                values.record(fields);
            }
        }
    }

    fn enabled(&self, _metadata: &Metadata<'_>, ctx: Context<'_, S>) -> bool {
        if self.tags.is_empty() {
            return true;
        }
        let Some(current) = ctx.lookup_current() else {
            return false;
        };
        let recorded: Vec<(String, String)> = current
            .scope()
            .filter_map(|span| {
                span.extensions()
                    .get::<SpanFields>()
                    .map(|fields| fields.0.clone())
            })
            .flatten()
            .collect();
        self.accepts(&recorded)
    }
}

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

fn format_layer<S, W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer<S>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup> + 'static,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_ansi(ansi)
        .with_writer(writer);
    match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Human => layer.boxed(),
    }
}

fn env_filter(level: &str) -> EnvFilter {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    ["tokio=warn", "hyper=warn", "reqwest=warn"]
        .into_iter()
        .filter_map(|directive| directive.parse().ok())
        .fold(filter, EnvFilter::add_directive)
}

/// Install the global tracing subscriber.
///
/// Returns the appender guard when logging to a file; keep it alive for the
/// lifetime of the process or buffered lines are lost.
pub fn init_subscriber(settings: &LoggingSettings) -> Option<WorkerGuard> {
    let mut outputs = Vec::new();
    let mut guard = None;

    if settings.output.console() {
        outputs.push(format_layer(settings.format, std::io::stderr, true));
    }
    if settings.output.file() {
        let path = Path::new(&settings.file_path);
        let directory = path.parent().unwrap_or_else(|| Path::new("."));
        let file_name = path.file_name().unwrap_or("depot.log".as_ref());
        let (writer, file_guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(directory, file_name));
        outputs.push(format_layer(settings.format, writer, false));
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(env_filter(&settings.level))
        .with(SpanTagFilter::new(&settings.tags))
        .with(outputs)
        .init();

    guard
}
