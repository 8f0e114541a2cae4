use std::collections::HashMap;
use std::env;
use std::fmt::Write;
use std::fs::File;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::{fmt, sync::atomic::AtomicUsize};
use tracing::{
    field::{Field, Visit},
    Id, Level, Subscriber,
};

/// Flattens an event into one line. A `file` field is kept out of the line
/// and routes it to `{logs_dir}/{file}.log` instead of stdout.
pub struct StringVisitor<'a> {
    string: &'a mut String,
    fields: HashMap<String, String>,
}

impl<'a> StringVisitor<'a> {
    pub(crate) fn new(string: &'a mut String) -> Self {
        StringVisitor {
            string,
            fields: HashMap::new(),
        }
    }
}

impl Visit for StringVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let val = format!("{value:?}").trim_matches('"').to_string();
        let name = field.name();
        self.fields.insert(name.to_string(), val);

        if name == "message" {
            _ = write!(self.string, "{value:?} ");
        } else if name != "file" {
            _ = write!(self.string, "{} = {:?}; ", field.name(), value);
        }
    }
}

#[derive(Debug, PartialEq)]
struct LogFilter {
    target: Option<String>,
    level: Option<Level>,
}

type SharedFilesHashMap = Arc<RwLock<HashMap<String, File>>>;
pub struct MinimalTracer {
    filters: Vec<LogFilter>,

    logs_base: PathBuf,
    files: SharedFilesHashMap,
}

fn string_to_level(string: &str) -> Option<Level> {
    match string.to_lowercase().as_str() {
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "warn" | "warning" => Some(Level::WARN),
        "trace" => Some(Level::TRACE),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

fn level_to_usize(level: &Level) -> usize {
    match *level {
        Level::ERROR => 0,
        Level::WARN => 1,
        Level::INFO => 2,
        Level::DEBUG => 3,
        Level::TRACE => 4,
    }
}

fn level_to_color(level: &Level) -> &'static str {
    match *level {
        Level::INFO => "\x1b[32m",
        Level::WARN => "\x1b[33m",
        Level::ERROR => "\x1b[31m",
        Level::DEBUG => "\x1b[34m",
        Level::TRACE => "\x1b[35m",
    }
}

/// `RUST_LOG`-style list: `info`, `station=debug`, `tower_http=warn`, ...
fn parse_filters(value: &str) -> Vec<LogFilter> {
    value
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(|filter| match filter.split_once('=') {
            Some((target, level)) => LogFilter {
                target: Some(target.to_string()),
                level: string_to_level(level),
            },
            None => match string_to_level(filter) {
                Some(level) => LogFilter {
                    target: None,
                    level: Some(level),
                },
                None => LogFilter {
                    target: Some(filter.to_string()),
                    level: None,
                },
            },
        })
        .collect()
}

impl MinimalTracer {
    pub fn register(base_dir: PathBuf) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
        _ = std::fs::create_dir_all(&base_dir);

        let filters = match env::var("RUST_LOG") {
            Ok(value) => parse_filters(&value),
            Err(_) => vec![LogFilter {
                target: None,
                level: Some(Level::INFO),
            }],
        };

        tracing::subscriber::set_global_default(MinimalTracer {
            filters,
            logs_base: base_dir,
            files: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    fn matches(&self, metadata: &tracing::Metadata<'_>) -> bool {
        if self.filters.is_empty() {
            return true;
        }

        self.filters.iter().any(|filter| {
            let level_ok = filter
                .level
                .map_or(true, |l| level_to_usize(metadata.level()) <= level_to_usize(&l));
            let target_ok = filter
                .target
                .as_ref()
                .map_or(true, |t| metadata.target().starts_with(t.as_str()));

            level_ok && target_ok
        })
    }

    fn write_to_file(&self, name: &str, line: &str) -> std::io::Result<()> {
        if let Ok(files) = self.files.read() {
            if let Some(mut file) = files.get(name) {
                return file.write_all(line.as_bytes());
            }
        }

        let mut files = self
            .files
            .write()
            .map_err(|_| std::io::Error::other("log file map poisoned"))?;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.logs_base.join(format!("{name}.log")))?;

        file.write_all(line.as_bytes())?;
        files.insert(name.to_string(), file);
        Ok(())
    }
}

static AUTO_ID: AtomicUsize = AtomicUsize::new(1);
impl Subscriber for MinimalTracer {
    fn enabled(&self, metadata: &tracing::Metadata<'_>) -> bool {
        self.matches(metadata)
    }

    fn new_span(&self, _span: &tracing::span::Attributes<'_>) -> tracing::span::Id {
        Id::from_u64(AUTO_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed) as u64)
    }

    fn record(&self, _span: &tracing::span::Id, _values: &tracing::span::Record<'_>) {}

    fn record_follows_from(&self, _span: &tracing::span::Id, _follows: &tracing::span::Id) {}

    fn event(&self, event: &tracing::Event<'_>) {
        let metadata = event.metadata();
        let level = metadata.level();
        let target = metadata.target();

        let mut text = String::new();
        let mut visitor = StringVisitor::new(&mut text);
        event.record(&mut visitor);

        let time = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
        let color = level_to_color(level);

        match visitor.fields.get("file") {
            Some(file) => {
                let line = format!("{time} {level: >5} {target}: {text}\n");
                if let Err(e) = self.write_to_file(file, &line) {
                    eprintln!("Cannot write {file}.log: {e}");
                }
            }
            None => println!("{time} {color}{level: >5}\x1b[0m {target}: {text}"),
        }
    }

    fn enter(&self, _span: &tracing::span::Id) {}

    fn exit(&self, _span: &tracing::span::Id) {}
}
