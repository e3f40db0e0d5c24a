use serde::Deserialize;

use crate::model::frame::{FrameId, FrameTree};

/// File-path markers identifying the frames a command-line profiler pushes
/// onto the stack before the profiled program starts. These are data, not
/// code: point them elsewhere to trim a different launcher.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EntryFrameMarkers {
    /// The launcher's entry module; matched against the root frame.
    pub launcher_path: String,
    /// The eval/exec layer the launcher runs the target through.
    pub exec_path: String,
    /// Module-runner shims between the exec layer and the program.
    pub shim_paths: Vec<String>,
}

impl Default for EntryFrameMarkers {
    fn default() -> Self {
        Self {
            launcher_path: "pyinstrument/__main__.py".to_string(),
            exec_path: "<string>".to_string(),
            shim_paths: vec!["runpy.py".to_string(), "<frozen runpy>".to_string()],
        }
    }
}

/// Removes the initial frames specific to command-line use of the profiler:
/// launcher, then exec layer, then any stack of module-runner shims, each
/// holding more than 80% of its parent's time. The frame below becomes the
/// new root. If the stack doesn't match the expected shape at any layer, the
/// original root is returned untouched.
pub fn remove_first_profiler_frames(
    tree: &mut FrameTree,
    root: FrameId,
    markers: &EntryFrameMarkers,
) -> FrameId {
    let path_contains = |tree: &FrameTree, frame: FrameId, needle: &str| {
        tree.file_path(frame).is_some_and(|path| path.contains(needle))
    };

    let is_launcher_frame = |tree: &FrameTree, frame: FrameId| {
        path_contains(tree, frame, &markers.launcher_path) && !tree.children(frame).is_empty()
    };

    let is_exec_frame = |tree: &FrameTree, frame: FrameId| {
        tree.proportion_of_parent(frame) > 0.8
            && path_contains(tree, frame, &markers.exec_path)
            && !tree.children(frame).is_empty()
    };

    let is_shim_frame = |tree: &FrameTree, frame: FrameId| {
        tree.proportion_of_parent(frame) > 0.8
            && markers
                .shim_paths
                .iter()
                .any(|shim| path_contains(tree, frame, shim))
            && !tree.children(frame).is_empty()
    };

    if !is_launcher_frame(tree, root) {
        return root;
    }
    let Some(mut result) = longest_child(tree, root) else {
        return root;
    };

    if !is_exec_frame(tree, result) {
        return root;
    }
    let Some(next) = longest_child(tree, result) else {
        return root;
    };
    result = next;

    if !is_shim_frame(tree, result) {
        return root;
    }
    while is_shim_frame(tree, result) {
        // nonempty children just checked
        let Some(next) = longest_child(tree, result) else {
            return root;
        };
        result = next;
    }

    tree.remove_from_parent(result);
    result
}

fn longest_child(tree: &FrameTree, frame: FrameId) -> Option<FrameId> {
    tree.children(frame)
        .iter()
        .copied()
        .max_by(|&a, &b| tree.time(a).total_cmp(&tree.time(b)))
}
