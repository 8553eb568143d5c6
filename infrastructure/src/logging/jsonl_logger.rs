//! JSONL transcript of workflow runs.
//!
//! Every [`TranscriptEntry`] becomes one JSON line carrying `type`, `timestamp`
//! and a per-process `seq`. The file is opened in append mode so successive
//! runs share one transcript.

use parley_application::{ConversationLogger, TranscriptEntry};
use serde_json::{Map, Value};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

struct TranscriptWriter {
    out: BufWriter<File>,
    seq: u64,
}

/// Append-only JSONL transcript sink.
pub struct JsonlConversationLogger {
    writer: Mutex<TranscriptWriter>,
    path: PathBuf,
}

impl JsonlConversationLogger {
    /// Open (or create) the transcript at `path`, creating parent directories.
    ///
    /// Returns `None` when the file cannot be opened; callers fall back to
    /// [`NoConversationLogger`](parley_application::NoConversationLogger).
    pub fn open(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            warn!("Could not create transcript directory {}: {}", parent.display(), e);
            return None;
        }

        let file = match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => f,
            Err(e) => {
                warn!("Could not open transcript {}: {}", path.display(), e);
                return None;
            }
        };

        Some(Self {
            writer: Mutex::new(TranscriptWriter {
                out: BufWriter::new(file),
                seq: 0,
            }),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record(entry: TranscriptEntry, seq: u64) -> Value {
        let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let mut map = match entry.payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        map.insert("type".to_string(), Value::String(entry.event_type.to_string()));
        map.insert("timestamp".to_string(), Value::String(timestamp));
        map.insert("seq".to_string(), Value::from(seq));
        Value::Object(map)
    }
}

impl ConversationLogger for JsonlConversationLogger {
    fn log(&self, entry: TranscriptEntry) {
        if let Ok(mut writer) = self.writer.lock() {
            writer.seq += 1;
            let record = Self::record(entry, writer.seq);
            let Ok(line) = serde_json::to_string(&record) else {
                return;
            };
            let _ = writeln!(writer.out, "{}", line);
            let _ = writer.out.flush();
        }
    }
}

impl Drop for JsonlConversationLogger {
    fn drop(&mut self) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.out.flush();
        }
    }
}
