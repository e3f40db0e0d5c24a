use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One sampled call stack: the frame-info strings from the thread identifier
/// down to the innermost frame, and the time attributed to the sample.
///
/// Serializes as a two-element JSON array, matching the on-disk session
/// format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRecord(pub Vec<String>, pub f64);

impl FrameRecord {
    pub fn stack(&self) -> &[String] {
        &self.0
    }

    pub fn time(&self) -> f64 {
        self.1
    }
}

/// The persisted profile session document.
///
/// Fields that were added to the format over time carry serde defaults so
/// that older session files still load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub frame_records: Vec<FrameRecord>,
    pub start_time: f64,
    #[serde(default)]
    pub thread_start_times: HashMap<String, f64>,
    pub duration: f64,
    #[serde(default = "default_interval")]
    pub min_interval: f64,
    #[serde(default = "default_interval")]
    pub max_interval: f64,
    pub sample_count: u64,
    #[serde(default)]
    pub start_call_stack: Vec<String>,
    #[serde(default)]
    pub target_description: String,
    /// May be null in files written by profilers that could not measure it.
    #[serde(default)]
    pub cpu_time: Option<f64>,
    /// Module search paths of the profiled interpreter, used for path
    /// shortening.
    #[serde(default)]
    pub sys_path: Vec<String>,
    /// Paths considered library code (interpreter install dirs, virtualenvs).
    #[serde(default)]
    pub sys_prefixes: Vec<String>,
}

fn default_interval() -> f64 {
    0.001
}
