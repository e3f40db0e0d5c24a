use std::collections::HashMap;

use stackprune_protocol::shared_str::SharedStr;

use crate::model::frame::{FrameId, FrameTree, FrameTreeError};
use crate::model::frame_ops::combine_frames;

/// Converts a timeline into a time-aggregate summary.
///
/// Sibling frames with the same identifier are merged into the first
/// occurrence, then siblings are sorted by total time descending. Applying
/// this twice is a no-op: a merged child list has no duplicate identifiers
/// left to combine.
pub fn aggregate_repeated_calls(
    tree: &mut FrameTree,
    root: FrameId,
) -> Result<FrameId, FrameTreeError> {
    let mut children_by_identifier: HashMap<SharedStr, FrameId> = HashMap::new();

    for child in tree.children(root).to_vec() {
        match children_by_identifier.get(tree.identifier(child)) {
            Some(&aggregate) => combine_frames(tree, child, aggregate)?,
            None => {
                children_by_identifier.insert(tree.identifier(child).clone(), child);
            }
        }
    }

    for child in tree.children(root).to_vec() {
        aggregate_repeated_calls(tree, child)?;
    }

    tree.sort_children_by_time(root);
    Ok(root)
}
