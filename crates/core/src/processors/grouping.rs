use crate::model::frame::{FrameContext, FrameId, FrameTree, FrameTreeError};
use crate::model::group::GroupId;
use crate::processors::ProcessorOptions;

/// Groups runs of library frames so a renderer can collapse them.
///
/// A frame qualifies for hiding if the show regex doesn't match its file
/// path, the hide regex does (show wins over hide), or, with no regex
/// opinion, it isn't application code. A group starts at an ungrouped
/// qualifying child that has at least one qualifying child of its own, and
/// absorbs qualifying descendants until a non-qualifying frame stops the
/// descent.
pub fn group_library_frames(
    tree: &mut FrameTree,
    root: FrameId,
    ctx: &dyn FrameContext,
    options: &ProcessorOptions,
) -> Result<FrameId, FrameTreeError> {
    for child in tree.children(root).to_vec() {
        if tree.group_of(child).is_none()
            && should_hide(tree, child, ctx, options)
            && tree
                .children(child)
                .iter()
                .any(|&grandchild| should_hide(tree, grandchild, ctx, options))
        {
            let group = tree.new_group(child);
            for grandchild in tree.children(child).to_vec() {
                if should_hide(tree, grandchild, ctx, options) {
                    add_frames_to_group(tree, grandchild, group, ctx, options);
                }
            }
        }

        group_library_frames(tree, child, ctx, options)?;
    }

    Ok(root)
}

fn should_hide(
    tree: &FrameTree,
    frame: FrameId,
    ctx: &dyn FrameContext,
    options: &ProcessorOptions,
) -> bool {
    let file_path = tree.file_path(frame).unwrap_or("");

    if let Some(show) = &options.show_regex
        && show.is_match(file_path)
    {
        return false;
    }
    if let Some(hide) = &options.hide_regex
        && hide.is_match(file_path)
    {
        return true;
    }

    !tree.is_application_code(frame, ctx)
}

fn add_frames_to_group(
    tree: &mut FrameTree,
    frame: FrameId,
    group: GroupId,
    ctx: &dyn FrameContext,
    options: &ProcessorOptions,
) {
    tree.add_frame_to_group(group, frame);
    for child in tree.children(frame).to_vec() {
        if should_hide(tree, child, ctx, options) {
            add_frames_to_group(tree, child, group, ctx, options);
        }
    }
}

/// Dissolves groups too small to be worth collapsing. A group with only two
/// frames still prints its root, so collapsing saves a single line at the
/// cost of an expander.
pub fn remove_useless_groups(
    tree: &mut FrameTree,
    root: FrameId,
) -> Result<FrameId, FrameTreeError> {
    for child in tree.children(root).to_vec() {
        remove_useless_groups(tree, child)?;
    }

    if let Some(group) = tree.group_of(root)
        && tree.group_frames(group).len() < 3
    {
        tree.remove_frame_from_group(group, root)?;
    }

    Ok(root)
}
