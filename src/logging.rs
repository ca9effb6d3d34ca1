use std::cell::RefCell;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::Location;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use chrono::Local;
use serde_json::{json, Map, Value as JsonValue};

/// Environment variable holdin' a full filter spec, e.g. `mutter,haversbench::runner=whisper`
pub const LOG_ENV: &str = "HAVERSBENCH_LOG";
/// Environment variable holdin' a bare level
pub const LOG_LEVEL_ENV: &str = "HAVERSBENCH_LOG_LEVEL";

/// Log levels, quietest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    /// Off
    Wheesht = 0,
    /// Error
    Roar = 1,
    /// Warn
    Holler = 2,
    /// Info
    Blether = 3,
    /// Debug
    Mutter = 4,
    /// Trace
    Whisper = 5,
}

impl LogLevel {
    pub fn name(&self) -> &'static str {
        match self {
            LogLevel::Wheesht => "WHEESHT",
            LogLevel::Roar => "ROAR",
            LogLevel::Holler => "HOLLER",
            LogLevel::Blether => "BLETHER",
            LogLevel::Mutter => "MUTTER",
            LogLevel::Whisper => "WHISPER",
        }
    }

    /// Accepts the Scots names an' the usual English ones
    pub fn parse_level(s: &str) -> Option<LogLevel> {
        match s.trim().to_lowercase().as_str() {
            "wheesht" | "off" | "none" => Some(LogLevel::Wheesht),
            "roar" | "error" => Some(LogLevel::Roar),
            "holler" | "warn" | "warning" => Some(LogLevel::Holler),
            "blether" | "info" => Some(LogLevel::Blether),
            "mutter" | "debug" => Some(LogLevel::Mutter),
            "whisper" | "trace" => Some(LogLevel::Whisper),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
    Compact,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogFilter {
    pub default: LogLevel,
    pub rules: Vec<(String, LogLevel)>,
}

impl LogFilter {
    /// Longest matchin' target prefix wins
    pub fn level_for_target(&self, target: &str) -> LogLevel {
        let mut best: Option<(usize, LogLevel)> = None;
        for (rule_target, level) in &self.rules {
            if rule_target.is_empty() || !target.starts_with(rule_target.as_str()) {
                continue;
            }
            let len = rule_target.len();
            if best.map(|(best_len, _)| len > best_len).unwrap_or(true) {
                best = Some((len, *level));
            }
        }
        best.map(|(_, level)| level).unwrap_or(self.default)
    }
}

static LOG_FILTER: OnceLock<Mutex<LogFilter>> = OnceLock::new();

fn filter_state() -> &'static Mutex<LogFilter> {
    LOG_FILTER.get_or_init(|| {
        Mutex::new(LogFilter {
            default: LogLevel::Blether,
            rules: Vec::new(),
        })
    })
}

pub fn parse_filter(spec: &str) -> Result<LogFilter, String> {
    let mut default = None;
    let mut rules = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if let Some((target, level_str)) = part.split_once('=') {
            let level = LogLevel::parse_level(level_str)
                .ok_or_else(|| format!("Invalid log level '{}'", level_str.trim()))?;
            rules.push((target.trim().to_string(), level));
        } else {
            let level = LogLevel::parse_level(part)
                .ok_or_else(|| format!("Invalid log level '{}'", part))?;
            default = Some(level);
        }
    }

    Ok(LogFilter {
        default: default.unwrap_or(LogLevel::Blether),
        rules,
    })
}

pub fn set_filter(spec: &str) -> Result<(), String> {
    let filter = parse_filter(spec)?;
    let mut guard = filter_state()
        .lock()
        .map_err(|_| "log filter lock poisoned".to_string())?;
    *guard = filter;
    Ok(())
}

pub fn log_enabled(level: LogLevel, target: &str) -> bool {
    if level == LogLevel::Wheesht {
        return false;
    }
    let filter = filter_state().lock().unwrap_or_else(|e| e.into_inner());
    level <= filter.level_for_target(target)
}

pub fn set_global_log_level(level: LogLevel) {
    if let Ok(mut guard) = filter_state().lock() {
        guard.default = level;
    }
}

/// Read `HAVERSBENCH_LOG` or `HAVERSBENCH_LOG_LEVEL`, the filter spec winnin'
pub fn init_from_env() -> Result<(), String> {
    if let Ok(spec) = std::env::var(LOG_ENV) {
        return set_filter(&spec);
    }
    if let Ok(level_str) = std::env::var(LOG_LEVEL_ENV) {
        let level = LogLevel::parse_level(&level_str)
            .ok_or_else(|| format!("Invalid log level '{}'", level_str))?;
        set_global_log_level(level);
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub target: String,
    pub file: String,
    pub line: usize,
    pub fields: Vec<(String, JsonValue)>,
    pub span_path: Vec<String>,
}

#[derive(Debug)]
pub enum LogSink {
    Stderr,
    File {
        path: String,
        append: bool,
        file: Option<std::fs::File>,
    },
    Memory {
        entries: Vec<String>,
        max: usize,
    },
}

#[derive(Debug)]
pub struct LoggerCore {
    pub format: LogFormat,
    pub timestamps: bool,
    pub sinks: Vec<LogSink>,
}

impl LoggerCore {
    pub fn new() -> Self {
        LoggerCore {
            format: LogFormat::Text,
            timestamps: true,
            sinks: vec![LogSink::Stderr],
        }
    }

    /// A logger that only keeps the last `max` lines in memory
    pub fn in_memory(format: LogFormat, max: usize) -> Self {
        LoggerCore {
            format,
            timestamps: false,
            sinks: vec![LogSink::Memory {
                entries: Vec::new(),
                max,
            }],
        }
    }

    /// A text logger appendin' tae `path`, opened on the first record
    pub fn to_file(path: &str) -> Self {
        LoggerCore {
            format: LogFormat::Text,
            timestamps: true,
            sinks: vec![LogSink::File {
                path: path.to_string(),
                append: true,
                file: None,
            }],
        }
    }

    /// Build a record fae the caller's location an' the current span stack, then log it
    #[track_caller]
    pub fn emit(
        &mut self,
        level: LogLevel,
        target: &str,
        message: impl Into<String>,
        fields: Vec<(String, JsonValue)>,
    ) {
        if !log_enabled(level, target) {
            return;
        }
        let location = Location::caller();
        let record = LogRecord {
            level,
            message: message.into(),
            target: target.to_string(),
            file: location.file().to_string(),
            line: location.line() as usize,
            fields,
            span_path: span_path(),
        };
        self.log(&record);
    }

    pub fn log(&mut self, record: &LogRecord) {
        let formatted = self.format_record(record);
        for sink in &mut self.sinks {
            match sink {
                LogSink::Stderr => {
                    eprintln!("{}", formatted);
                }
                LogSink::File { path, append, file } => {
                    if file.is_none() {
                        let mut opts = OpenOptions::new();
                        opts.create(true).write(true);
                        if *append {
                            opts.append(true);
                        } else {
                            opts.truncate(true);
                        }
                        match opts.open(path.as_str()) {
                            Ok(handle) => {
                                *file = Some(handle);
                            }
                            Err(err) => {
                                eprintln!("Warning: Couldnae open log file '{}': {}", path, err);
                            }
                        }
                    }
                    if let Some(handle) = file {
                        let _ = writeln!(handle, "{}", formatted);
                    }
                }
                LogSink::Memory { entries, max } => {
                    entries.push(formatted.clone());
                    if entries.len() > *max {
                        let drain = entries.len() - *max;
                        entries.drain(0..drain);
                    }
                }
            }
        }
    }

    /// Lines held by any memory sinks, oldest first
    pub fn memory_entries(&self) -> Vec<String> {
        self.sinks
            .iter()
            .filter_map(|sink| match sink {
                LogSink::Memory { entries, .. } => Some(entries.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn format_record(&self, record: &LogRecord) -> String {
        match self.format {
            LogFormat::Json => self.format_json(record),
            LogFormat::Compact => self.format_compact(record),
            LogFormat::Text => self.format_text(record),
        }
    }

    fn format_text(&self, record: &LogRecord) -> String {
        let mut parts = Vec::new();
        parts.push(format!("[{:7}]", record.level.name()));
        if self.timestamps {
            parts.push(timestamp_string());
        }
        if !record.target.is_empty() {
            parts.push(record.target.clone());
        }
        parts.push(format!("{}:{}", record.file, record.line));

        format!("{} | {}", parts.join(" "), message_with_context(record))
    }

    fn format_compact(&self, record: &LogRecord) -> String {
        format!("[{}] {}", record.level.name(), message_with_context(record))
    }

    fn format_json(&self, record: &LogRecord) -> String {
        let mut obj = Map::new();
        obj.insert("ts".to_string(), JsonValue::String(timestamp_string()));
        obj.insert(
            "level".to_string(),
            JsonValue::String(record.level.name().to_string()),
        );
        obj.insert(
            "target".to_string(),
            JsonValue::String(record.target.clone()),
        );
        obj.insert("file".to_string(), JsonValue::String(record.file.clone()));
        obj.insert("line".to_string(), json!(record.line));
        obj.insert("msg".to_string(), JsonValue::String(record.message.clone()));

        let fields: Map<String, JsonValue> = record.fields.iter().cloned().collect();
        obj.insert("fields".to_string(), JsonValue::Object(fields));
        obj.insert("span".to_string(), json!(record.span_path));

        JsonValue::Object(obj).to_string()
    }
}

impl Default for LoggerCore {
    fn default() -> Self {
        Self::new()
    }
}

fn message_with_context(record: &LogRecord) -> String {
    let mut msg = record.message.clone();
    if !record.fields.is_empty() {
        msg = format!("{} {}", msg, format_fields(&record.fields));
    }
    if !record.span_path.is_empty() {
        msg = format!("{} span={}", msg, record.span_path.join(">"));
    }
    msg
}

fn format_fields(fields: &[(String, JsonValue)]) -> String {
    fields
        .iter()
        .map(|(k, v)| match v {
            JsonValue::String(s) => format!("{}={}", k, s),
            other => format!("{}={}", k, other),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Shorthand fer buildin' a field list
pub fn field(key: &str, value: impl Into<JsonValue>) -> (String, JsonValue) {
    (key.to_string(), value.into())
}

#[derive(Debug)]
pub struct LogSpan {
    pub id: u64,
    pub name: String,
    pub level: LogLevel,
    pub target: String,
}

thread_local! {
    static LOG_SPAN_STACK: RefCell<Vec<Rc<LogSpan>>> = const { RefCell::new(Vec::new()) };
}

static LOG_SPAN_ID: AtomicU64 = AtomicU64::new(1);

pub fn new_span(name: String, level: LogLevel, target: String) -> Rc<LogSpan> {
    let id = LOG_SPAN_ID.fetch_add(1, Ordering::Relaxed);
    Rc::new(LogSpan {
        id,
        name,
        level,
        target,
    })
}

pub fn span_enter(span: Rc<LogSpan>) {
    LOG_SPAN_STACK.with(|stack| stack.borrow_mut().push(span));
}

pub fn span_exit(span_id: u64) -> Result<(), String> {
    LOG_SPAN_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        if let Some(top) = stack.pop() {
            if top.id != span_id {
                stack.push(top);
                return Err("span_exit() got a mismatched span".to_string());
            }
            Ok(())
        } else {
            Err("span_exit() called wi' nae active spans".to_string())
        }
    })
}

pub fn span_current() -> Option<Rc<LogSpan>> {
    LOG_SPAN_STACK.with(|stack| stack.borrow().last().cloned())
}

pub fn span_path() -> Vec<String> {
    LOG_SPAN_STACK.with(|stack| stack.borrow().iter().map(|s| s.name.clone()).collect())
}

/// Enters a span on creation an' leaves it on drop
#[derive(Debug)]
pub struct SpanGuard {
    id: u64,
}

impl SpanGuard {
    pub fn enter(name: &str, level: LogLevel, target: &str) -> Self {
        let span = new_span(name.to_string(), level, target.to_string());
        let id = span.id;
        span_enter(span);
        SpanGuard { id }
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        let _ = span_exit(self.id);
    }
}

pub fn timestamp_string() -> String {
    format!("{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
}
