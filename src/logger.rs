//! Container log formatting and the reopenable log writer (spec.md §4.C).
//!
//! Two wire formats are registered by name, matched against
//! [`crate::config::Config::log_format`]: `kubernetes` (the
//! `<timestamp> <stream>F <line>\n` format CRI log readers expect) and
//! `json`, a line-delimited JSON record per write. Both timestamp with
//! `chrono`'s RFC3339 formatting.

use crate::error::SupervisorError;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use strum::{AsRefStr, EnumString};

#[derive(AsRefStr, Clone, Copy, Debug, Eq, EnumString, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

/// A formatter turns one chunk of output plus its stream into wire bytes.
/// `partial` marks a line that was split across reads/writes without a
/// trailing newline (the `kubernetes` format encodes this as `P` instead
/// of `F`); formats that don't track partial lines may ignore it.
pub trait LogFormatter: Send + Sync {
    fn format(&self, stream: Stream, partial: bool, line: &[u8]) -> Vec<u8>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct KubernetesFormatter;

impl LogFormatter for KubernetesFormatter {
    fn format(&self, stream: Stream, partial: bool, line: &[u8]) -> Vec<u8> {
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        let tag = if partial { 'P' } else { 'F' };
        let mut out = format!("{} {}{} ", ts, stream.as_ref(), tag).into_bytes();
        out.extend_from_slice(line);
        out.push(b'\n');
        out
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonFormatter;

#[derive(Serialize)]
struct JsonRecord<'a> {
    time: String,
    stream: &'a str,
    partial: bool,
    #[serde(with = "serde_bytes_as_lossy_str")]
    log: &'a [u8],
}

mod serde_bytes_as_lossy_str {
    use serde::Serializer;

    pub fn serialize<S>(bytes: &&[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&String::from_utf8_lossy(bytes))
    }
}

impl LogFormatter for JsonFormatter {
    fn format(&self, stream: Stream, partial: bool, line: &[u8]) -> Vec<u8> {
        let record = JsonRecord {
            time: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
            stream: stream.as_ref(),
            partial,
            log: line,
        };
        let mut out = serde_json::to_vec(&record).unwrap_or_default();
        out.push(b'\n');
        out
    }
}

/// Look up a formatter by the name used in `--log-format`.
pub fn formatter_for(name: &str) -> Option<Box<dyn LogFormatter>> {
    match name {
        "kubernetes" => Some(Box::new(KubernetesFormatter)),
        "json" => Some(Box::new(JsonFormatter)),
        _ => None,
    }
}

/// Append-only log writer that can be closed and reopened at the same
/// path, for the `reopen_log` control request (spec.md §4.E.2) issued
/// after external log rotation.
pub struct ReopenableWriter {
    path: PathBuf,
    file: File,
}

impl ReopenableWriter {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SupervisorError> {
        let path = path.into();
        let file = open_append(&path)?;
        Ok(Self { path, file })
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<(), SupervisorError> {
        self.file
            .write_all(bytes)
            .map_err(|e| SupervisorError::Logger(e.to_string()))
    }

    pub fn reopen(&mut self) -> Result<(), SupervisorError> {
        self.file = open_append(&self.path)?;
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File, SupervisorError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SupervisorError::Logger(e.to_string()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| SupervisorError::Logger(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn kubernetes_format_marks_full_lines() {
        let out = KubernetesFormatter.format(Stream::Stdout, false, b"hello");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains(" stdoutF hello\n"));
    }

    #[test]
    fn kubernetes_format_marks_partial_lines() {
        let out = KubernetesFormatter.format(Stream::Stderr, true, b"chunk");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains(" stderrP chunk\n"));
    }

    #[test]
    fn json_format_is_valid_json_per_line() {
        let out = JsonFormatter.format(Stream::Stdout, false, b"hi");
        let text = String::from_utf8(out).expect("utf8");
        let value: serde_json::Value = serde_json::from_str(text.trim_end()).expect("parse");
        assert_eq!(value["stream"], "stdout");
        assert_eq!(value["log"], "hi");
    }

    #[test]
    fn unknown_format_name_is_none() {
        assert!(formatter_for("xml").is_none());
    }

    #[test]
    fn reopen_creates_a_fresh_handle() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("c.log");
        let mut writer = ReopenableWriter::open(&path).expect("open");
        writer.write(b"before\n").expect("write");
        std::fs::rename(&path, dir.path().join("c.log.1")).expect("rotate");
        writer.reopen().expect("reopen");
        writer.write(b"after\n").expect("write");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "after\n");
    }
}
