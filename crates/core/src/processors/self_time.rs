use crate::model::frame::{FrameId, FrameTree, FrameTreeError, SELF_TIME_FRAME_IDENTIFIER};
use crate::model::frame_ops::{ReplaceWith, delete_frame_from_tree};

/// Combines runs of consecutive `[self]` frames into one. Non-consecutive
/// self-time frames are left alone; merging those would reorder a timeline.
pub fn merge_consecutive_self_time(tree: &mut FrameTree, frame: FrameId, recursive: bool) {
    let mut previous_self_time_frame: Option<FrameId> = None;

    for child in tree.children(frame).to_vec() {
        if tree.identifier(child) == SELF_TIME_FRAME_IDENTIFIER {
            if let Some(previous) = previous_self_time_frame {
                let merged_time = tree.time(child);
                tree.add_time(previous, merged_time);
                tree.remove_from_parent(child);
            } else {
                previous_self_time_frame = Some(child);
            }
        } else {
            previous_self_time_frame = None;
        }
    }

    if recursive {
        for child in tree.children(frame).to_vec() {
            merge_consecutive_self_time(tree, child, true);
        }
    }
}

/// When a frame's only child is a `[self]` frame, the child is redundant:
/// the frame's own time already tells the whole story. Deletes it, folding
/// the time into the parent's absorbed time.
pub fn remove_unnecessary_self_time_nodes(
    tree: &mut FrameTree,
    root: FrameId,
) -> Result<FrameId, FrameTreeError> {
    if let &[only_child] = tree.children(root)
        && tree.identifier(only_child) == SELF_TIME_FRAME_IDENTIFIER
    {
        delete_frame_from_tree(tree, only_child, ReplaceWith::Nothing)?;
    }

    for child in tree.children(root).to_vec() {
        remove_unnecessary_self_time_nodes(tree, child)?;
    }

    Ok(root)
}
