use crate::model::frame::{FrameId, FrameTree, FrameTreeError};
use crate::model::frame_ops::{ReplaceWith, delete_frame_from_tree};
use crate::processors::ProcessorOptions;

const IMPORTLIB_MARKER: &str = "<frozen importlib._bootstrap";

/// Removes `<frozen importlib._bootstrap` frames, splicing their children
/// into their place.
pub fn remove_importlib(tree: &mut FrameTree, root: FrameId) -> Result<FrameId, FrameTreeError> {
    for child in tree.children(root).to_vec() {
        remove_importlib(tree, child)?;

        let is_importlib = tree
            .file_path(child)
            .is_some_and(|path| path.contains(IMPORTLIB_MARKER));
        if is_importlib {
            delete_frame_from_tree(tree, child, ReplaceWith::Children)?;
        }
    }

    Ok(root)
}

/// Removes frames whose code marked itself hidden with `__traceback_hide__`.
pub fn remove_tracebackhide(
    tree: &mut FrameTree,
    root: FrameId,
) -> Result<FrameId, FrameTreeError> {
    for child in tree.children(root).to_vec() {
        remove_tracebackhide(tree, child)?;

        if tree.has_tracebackhide(child) {
            delete_frame_from_tree(tree, child, ReplaceWith::Children)?;
        }
    }

    Ok(root)
}

/// Removes nodes that account for less than `filter_threshold` of the total
/// time of the tree. The baseline is the root's time at the start of the
/// pass, so the cutoff doesn't drift as nodes are deleted.
pub fn remove_irrelevant_nodes(
    tree: &mut FrameTree,
    root: FrameId,
    options: &ProcessorOptions,
) -> Result<FrameId, FrameTreeError> {
    let mut total_time = tree.time(root);
    if total_time <= 0.0 {
        // prevent divide by zero
        total_time = 1e-44;
    }
    remove_irrelevant_nodes_inner(tree, root, options.filter_threshold, total_time)?;
    Ok(root)
}

fn remove_irrelevant_nodes_inner(
    tree: &mut FrameTree,
    frame: FrameId,
    filter_threshold: f64,
    total_time: f64,
) -> Result<(), FrameTreeError> {
    for child in tree.children(frame).to_vec() {
        let proportion_of_total = tree.time(child) / total_time;
        if proportion_of_total < filter_threshold {
            delete_frame_from_tree(tree, child, ReplaceWith::Nothing)?;
        }
    }

    for child in tree.children(frame).to_vec() {
        remove_irrelevant_nodes_inner(tree, child, filter_threshold, total_time)?;
    }

    Ok(())
}
