use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Request-scoped annotations left for logging layers.
///
/// Cloning a `Notes` yields another handle to the same map, so a handle put in
/// the request extensions can be read back once the response body has ended.
#[derive(Debug, Clone, Default)]
pub struct Notes {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl Notes {
    /// Creates an empty annotation map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`, overwriting any previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.lock().insert(key.into(), value.into());
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().get(key).cloned()
    }

    /// Returns a copy of every annotation.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.inner.lock().clone()
    }
}

/// Annotation keys under which compression totals are recorded.
///
/// Each key is optional; an unset key means that value is not recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct NoteNames {
    /// Key for the output/input ratio in percent.
    pub ratio: Option<String>,
    /// Key for the number of uncompressed bytes.
    pub input: Option<String>,
    /// Key for the number of compressed bytes.
    pub output: Option<String>,
}

/// Formats the compression ratio as `output * 100 / input`, or `-` when no
/// input was seen.
pub fn ratio(total_in: u64, total_out: u64) -> String {
    if total_in > 0 {
        (total_out * 100 / total_in).to_string()
    } else {
        "-".to_string()
    }
}

/// Writes the totals under whichever keys are configured.
pub(crate) fn record(names: &NoteNames, notes: &Notes, total_in: u64, total_out: u64) {
    if let Some(key) = &names.input {
        notes.set(key.as_str(), total_in.to_string());
    }
    if let Some(key) = &names.output {
        notes.set(key.as_str(), total_out.to_string());
    }
    if let Some(key) = &names.ratio {
        notes.set(key.as_str(), ratio(total_in, total_out));
    }
}
