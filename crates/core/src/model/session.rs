use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;

use log::debug;
use stackprune_protocol::frame_info::frame_info_identifier;
use stackprune_protocol::session_data::{FrameRecord, SessionData};
use stackprune_protocol::shared_str::SharedStr;
use thiserror::Error;

use crate::model::frame::{FrameContext, FrameId, FrameTree, FrameTreeError};
use crate::model::frame_ops::build_frame_tree;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// One profile session: the recorded samples, the metadata captured
/// alongside them, and the path-shortening context that frame classification
/// depends on.
///
/// A session exclusively owns the frame trees it builds and its shortening
/// cache; neither is shared across sessions.
#[derive(Debug)]
pub struct Session {
    pub frame_records: Vec<FrameRecord>,
    pub start_time: f64,
    pub thread_start_times: HashMap<String, f64>,
    pub duration: f64,
    pub min_interval: f64,
    pub max_interval: f64,
    pub sample_count: u64,
    pub start_call_stack: Vec<String>,
    pub target_description: String,
    pub cpu_time: f64,
    pub sys_path: Vec<String>,
    pub sys_prefixes: Vec<String>,
    // memoized, advisory: keyed by absolute path, rebuildable at any time
    short_path_cache: RefCell<HashMap<String, String>>,
}

impl Session {
    pub fn from_data(data: SessionData) -> Self {
        Self {
            frame_records: data.frame_records,
            start_time: data.start_time,
            thread_start_times: data.thread_start_times,
            duration: data.duration,
            min_interval: data.min_interval,
            max_interval: data.max_interval,
            sample_count: data.sample_count,
            start_call_stack: data.start_call_stack,
            target_description: data.target_description,
            cpu_time: data.cpu_time.unwrap_or(0.0),
            sys_path: data.sys_path,
            sys_prefixes: data.sys_prefixes,
            short_path_cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn to_data(&self) -> SessionData {
        SessionData {
            frame_records: self.frame_records.clone(),
            start_time: self.start_time,
            thread_start_times: self.thread_start_times.clone(),
            duration: self.duration,
            min_interval: self.min_interval,
            max_interval: self.max_interval,
            sample_count: self.sample_count,
            start_call_stack: self.start_call_stack.clone(),
            target_description: self.target_description.clone(),
            cpu_time: Some(self.cpu_time),
            sys_path: self.sys_path.clone(),
            sys_prefixes: self.sys_prefixes.clone(),
        }
    }

    /// Loads a previously saved session from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let bytes = std::fs::read(path.as_ref())?;
        let data: SessionData = serde_json::from_slice(&bytes)?;
        debug!(
            "loaded session: {} records, {} samples",
            data.frame_records.len(),
            data.sample_count
        );
        Ok(Self::from_data(data))
    }

    /// Saves the session to disk as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let json = serde_json::to_vec(&self.to_data())?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    /// Combines two sessions by concatenating their samples.
    ///
    /// The result shouldn't be interpreted as a timeline, since samples
    /// are simply appended, but aggregate views of the data work.
    pub fn combine(session1: Session, session2: Session) -> Session {
        let (session1, session2) = if session1.start_time > session2.start_time {
            (session2, session1)
        } else {
            (session1, session2)
        };

        let mut frame_records = session1.frame_records;
        frame_records.extend(session2.frame_records);

        let mut thread_start_times = session1.thread_start_times;
        thread_start_times.extend(session2.thread_start_times);

        let mut sys_path = session1.sys_path;
        for path in session2.sys_path {
            if !sys_path.contains(&path) {
                sys_path.push(path);
            }
        }

        let mut sys_prefixes = session1.sys_prefixes;
        for prefix in session2.sys_prefixes {
            if !sys_prefixes.contains(&prefix) {
                sys_prefixes.push(prefix);
            }
        }

        Session {
            frame_records,
            start_time: session1.start_time,
            thread_start_times,
            duration: session1.duration + session2.duration,
            min_interval: session1.min_interval.min(session2.min_interval),
            max_interval: session1.max_interval.max(session2.max_interval),
            sample_count: session1.sample_count + session2.sample_count,
            start_call_stack: session1.start_call_stack,
            target_description: session1.target_description,
            cpu_time: session1.cpu_time + session2.cpu_time,
            sys_path,
            sys_prefixes,
            short_path_cache: RefCell::new(HashMap::new()),
        }
    }

    /// Parses the frame records into per-thread trees. Returns `None` for an
    /// empty session. Each call builds a fresh tree; a pipeline run owns
    /// its tree exclusively.
    pub fn root_frames(
        &self,
        trim_stem: bool,
    ) -> Result<Option<(FrameTree, HashMap<SharedStr, FrameId>)>, FrameTreeError> {
        if self.frame_records.is_empty() {
            return Ok(None);
        }

        let mut tree = FrameTree::new();
        let mut roots = build_frame_tree(&mut tree, &self.frame_records)?;

        if trim_stem {
            for root in roots.values_mut() {
                *root = self.trim_stem(&mut tree, *root);
            }
        }

        Ok(Some((tree, roots)))
    }

    /// Trims the start of the tree before any branches, without trimming
    /// beyond the point the profiler was started at.
    fn trim_stem(&self, tree: &mut FrameTree, frame: FrameId) -> FrameId {
        let mut start_stack = self
            .start_call_stack
            .iter()
            .map(|info| frame_info_identifier(info));

        if start_stack.next() != Some(tree.identifier(frame).as_str()) {
            // the frame doesn't match where the profiler was started; don't
            // trim
            return frame;
        }

        let mut frame = frame;
        while tree.total_self_time(frame) == 0.0 && tree.children(frame).len() == 1 {
            let child = tree.children(frame)[0];
            // stop descending once the start call stack stops matching
            match start_stack.next() {
                Some(identifier) if tree.identifier(child) == identifier => frame = child,
                _ => break,
            }
        }

        tree.remove_from_parent(frame);
        frame
    }

    /// Shortens a path to its most readable form relative to `sys_path`.
    /// Memoized per session.
    pub fn shorten_path(&self, path: &str) -> String {
        if let Some(cached) = self.short_path_cache.borrow().get(path) {
            return cached.clone();
        }

        let mut result = path.to_string();
        // a single-component string probably isn't a file path at all, more
        // likely <built-in> or similar
        if path_split(path).len() > 1 {
            for sys_path_entry in &self.sys_path {
                let candidate = rel_path(path, sys_path_entry);
                if path_split(&candidate).len() < path_split(&result).len() {
                    result = candidate;
                }
            }
        }

        self.short_path_cache
            .borrow_mut()
            .insert(path.to_string(), result.clone());
        result
    }
}

impl FrameContext for Session {
    fn shorten_path(&self, path: &str) -> String {
        Session::shorten_path(self, path)
    }

    fn sys_prefixes(&self) -> &[String] {
        &self.sys_prefixes
    }
}

fn path_split(path: &str) -> Vec<&str> {
    path.split(['/', '\\']).collect()
}

fn path_drive(path: &str) -> Option<&str> {
    path_split(path)
        .first()
        .copied()
        .filter(|part| part.ends_with(':'))
}

/// The relative path from `start` to `path`, e.g. `/a/b/c` from `/a/d` is
/// `../b/c`. Paths on different drives can't be made relative; `path` is
/// returned unchanged.
fn rel_path(path: &str, start: &str) -> String {
    if path_drive(path) != path_drive(start) {
        return path.to_string();
    }

    let parts = path_split(path);
    let start_parts = path_split(start);

    let common = parts
        .iter()
        .zip(&start_parts)
        .take_while(|(a, b)| *a == *b)
        .count();

    let mut relative: Vec<&str> = start_parts[common..].iter().map(|_| "..").collect();
    relative.extend(&parts[common..]);
    relative.join("/")
}
