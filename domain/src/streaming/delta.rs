//! Streaming delta computation.
//!
//! Providers report cumulative full-text snapshots, not increments. The
//! [`DeltaTracker`] remembers the last snapshot per key and turns each new
//! snapshot into the minimal text to append on the caller's side.
//!
//! - first snapshot → the whole text
//! - growing text sharing most of the previous snapshot → the new suffix
//! - growing text that diverged early → everything from the divergence point
//! - identical text → nothing
//! - shrinking text → absorbed (never a negative delta); large regressions are
//!   flagged for reporting, rate-limited per key

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Tuning knobs for delta computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaConfig {
    /// Share of the previous snapshot the common prefix must cover for the
    /// new text to count as an append.
    pub append_prefix_ratio: f64,
    /// Regressions up to this many bytes are absorbed silently.
    pub shrink_tolerance_chars: usize,
    /// Regressions up to this share of the previous length are absorbed silently.
    pub shrink_tolerance_ratio: f64,
    /// Length of the window in which regression reports are counted.
    pub warning_window_secs: u64,
    /// Reports allowed per key per window.
    pub max_warnings_per_window: u32,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            append_prefix_ratio: 0.7,
            shrink_tolerance_chars: 200,
            shrink_tolerance_ratio: 0.05,
            warning_window_secs: 5,
            max_warnings_per_window: 2,
        }
    }
}

impl DeltaConfig {
    pub fn warning_window(&self) -> Duration {
        Duration::from_secs(self.warning_window_secs)
    }
}

/// Outcome of feeding one snapshot to the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    /// New text to emit.
    Text(String),
    /// Nothing changed; no event should fire.
    Unchanged,
    /// The snapshot shrank. State was updated, nothing is emitted.
    Absorbed {
        regression: usize,
        /// The regression exceeded tolerance and the per-key report budget
        /// allows logging it.
        report: bool,
    },
}

impl Delta {
    pub fn text(&self) -> Option<&str> {
        match self {
            Delta::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Key for a provider's stream within a session.
pub fn delta_key(session_id: &str, provider_id: &str) -> String {
    format!("{}:{}", session_id, provider_id)
}

#[derive(Debug, Default)]
struct KeyState {
    last: String,
    window_start: Option<Instant>,
    warnings_in_window: u32,
}

impl KeyState {
    fn allow_report(&mut self, now: Instant, config: &DeltaConfig) -> bool {
        let window_expired = self
            .window_start
            .is_none_or(|start| now.duration_since(start) >= config.warning_window());
        if window_expired {
            self.window_start = Some(now);
            self.warnings_in_window = 0;
        }
        if self.warnings_in_window < config.max_warnings_per_window {
            self.warnings_in_window += 1;
            true
        } else {
            false
        }
    }
}

/// Last-snapshot cache owned by a single workflow execution.
#[derive(Debug, Default)]
pub struct DeltaTracker {
    config: DeltaConfig,
    entries: HashMap<String, KeyState>,
}

impl DeltaTracker {
    pub fn new(config: DeltaConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
        }
    }

    pub fn make_delta(&mut self, key: &str, text: &str) -> Delta {
        self.make_delta_at(key, text, Instant::now())
    }

    /// Same as [`make_delta`](Self::make_delta) with an explicit clock.
    pub fn make_delta_at(&mut self, key: &str, text: &str, now: Instant) -> Delta {
        let Some(state) = self.entries.get_mut(key) else {
            self.entries.insert(
                key.to_string(),
                KeyState {
                    last: text.to_string(),
                    ..Default::default()
                },
            );
            return if text.is_empty() {
                Delta::Unchanged
            } else {
                Delta::Text(text.to_string())
            };
        };

        if state.last == text {
            return Delta::Unchanged;
        }

        let previous_len = state.last.len();

        if text.len() < previous_len {
            let regression = previous_len - text.len();
            let tolerated = regression <= self.config.shrink_tolerance_chars
                || regression as f64 <= previous_len as f64 * self.config.shrink_tolerance_ratio;
            let report = !tolerated && state.allow_report(now, &self.config);
            state.last = text.to_string();
            return Delta::Absorbed { regression, report };
        }

        let prefix = common_prefix_len(&state.last, text);
        let is_append = prefix as f64 >= previous_len as f64 * self.config.append_prefix_ratio
            && text.is_char_boundary(previous_len);
        let start = if is_append { previous_len } else { prefix };
        let delta = text[start..].to_string();
        state.last = text.to_string();

        if delta.is_empty() {
            Delta::Unchanged
        } else {
            Delta::Text(delta)
        }
    }

    /// Drop the state of one key so its next snapshot starts fresh.
    pub fn forget(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Byte length of the longest common prefix, always on a char boundary.
fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .find(|((_, ca), cb)| ca != cb)
        .map(|((i, _), _)| i)
        .unwrap_or_else(|| a.len().min(b.len()))
}
