use std::collections::HashMap;

use stackprune_protocol::frame_info::frame_info_identifier;
use stackprune_protocol::session_data::FrameRecord;
use stackprune_protocol::shared_str::SharedStr;

use crate::model::frame::{
    DUMMY_ROOT_FRAME_IDENTIFIER, FrameId, FrameTree, FrameTreeError, SELF_TIME_FRAME_IDENTIFIER,
};

/// What to put in a deleted frame's place. Whatever the policy, the frame's
/// recorded time is conserved somewhere in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceWith {
    /// Splice the frame's children into its former position.
    Children,
    /// Replace the frame with a synthetic self-time frame carrying its time.
    /// The frame's children are discarded.
    SelfTime,
    /// Remove the frame and its children, folding its time into the parent's
    /// absorbed time.
    Nothing,
}

/// Deletes a frame from the tree, replacing it according to the policy.
///
/// The frame (and, transitively, its discarded descendants) is also removed
/// from any groups, dissolving groups left without a meaningful membership.
/// Fails on the root frame.
pub fn delete_frame_from_tree(
    tree: &mut FrameTree,
    frame: FrameId,
    replace_with: ReplaceWith,
) -> Result<(), FrameTreeError> {
    let parent = tree.parent(frame).ok_or(FrameTreeError::CannotDeleteRoot)?;

    match replace_with {
        ReplaceWith::Children => {
            let children = tree.children(frame).to_vec();
            tree.add_children(parent, &children, Some(frame))?;
            // the reparented children account for the frame's time minus
            // its absorbed component, so only that component moves up
            tree.add_absorbed_time(parent, tree.absorbed_time(frame));
        }
        ReplaceWith::SelfTime => {
            // the frame's time already includes anything it absorbed
            let thread_id = tree.thread_id(frame).clone();
            let self_time = tree.new_frame(thread_id, SELF_TIME_FRAME_IDENTIFIER, tree.time(frame));
            tree.add_child(parent, self_time, Some(frame))?;
        }
        ReplaceWith::Nothing => {
            tree.add_absorbed_time(parent, tree.time(frame));
        }
    }

    tree.remove_from_parent(frame);
    // recursive even for ReplaceWith::Children: by now the surviving
    // children have been reparented, so only discarded frames are visited
    remove_frame_from_groups(tree, frame, true);
    Ok(())
}

/// Merges `frame` into its sibling `into`: times and absorbed times add,
/// attribute observations add key-wise, children are reparented under
/// `into`, and `frame` leaves the tree and its group.
pub fn combine_frames(
    tree: &mut FrameTree,
    frame: FrameId,
    into: FrameId,
) -> Result<(), FrameTreeError> {
    if tree.parent(frame) != tree.parent(into) {
        return Err(FrameTreeError::DifferentParents);
    }

    tree.add_absorbed_time(into, tree.absorbed_time(frame));
    tree.add_time(into, tree.time(frame));

    let attributes: Vec<(String, f64)> = tree
        .attributes(frame)
        .iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    for (attribute, time) in attributes {
        *tree.node_mut(into).attributes.entry(attribute).or_insert(0.0) += time;
    }

    let children = tree.children(frame).to_vec();
    tree.add_children(into, &children, None)?;
    tree.remove_from_parent(frame);
    // descendants now belong to `into`'s subtree and keep their groups
    remove_frame_from_groups(tree, frame, false);
    Ok(())
}

/// Removes a frame (and with `recursive`, its descendants) from any group it
/// belongs to. Used when frames leave the tree, so groups don't keep
/// references to removed frames. A group reduced to a single member is
/// meaningless and is dissolved entirely.
pub fn remove_frame_from_groups(tree: &mut FrameTree, frame: FrameId, recursive: bool) {
    if recursive {
        for child in tree.children(frame).to_vec() {
            remove_frame_from_groups(tree, child, true);
        }
    }

    if let Some(group) = tree.group_of(frame) {
        // membership was just read, so removal can't fail
        let _ = tree.remove_frame_from_group(group, frame);

        if let [last] = tree.group_frames(group) {
            let last = *last;
            let _ = tree.remove_frame_from_group(group, last);
        }
    }
}

/// Replays sampled frame records into per-thread call trees.
///
/// A record's stack starts at the thread-identity frame and is matched
/// against the previous record's stack; frames diverge where identifiers
/// stop matching, and a synthetic self-time leaf is appended per sample.
/// Threads whose placeholder root ends up with a single child are re-rooted
/// at that child.
pub fn build_frame_tree(
    tree: &mut FrameTree,
    records: &[FrameRecord],
) -> Result<HashMap<SharedStr, FrameId>, FrameTreeError> {
    let mut root_frames: HashMap<SharedStr, FrameId> = HashMap::new();
    // the currently-open stack per thread, rooted at the placeholder frame
    let mut frame_stacks: HashMap<SharedStr, Vec<FrameId>> = HashMap::new();

    for record in records {
        let stack = record.stack();
        let time = record.time();
        let Some(first) = stack.first() else {
            continue;
        };

        let thread_id: SharedStr = frame_info_identifier(first).into();

        let root = *root_frames
            .entry(thread_id.clone())
            .or_insert_with(|| tree.new_frame(thread_id.clone(), DUMMY_ROOT_FRAME_IDENTIFIER, 0.0));
        tree.record_time(root, DUMMY_ROOT_FRAME_IDENTIFIER, time);

        let frames = frame_stacks
            .entry(thread_id.clone())
            .or_insert_with(|| vec![root]);

        let mut depth = 0;
        for (index, frame_info) in stack.iter().enumerate() {
            depth = index + 1;
            let identifier = frame_info_identifier(frame_info);

            let frame = match frames.get(depth).copied() {
                Some(frame) if tree.identifier(frame) == identifier => frame,
                mismatch => {
                    // the stack diverges here; trim it and start a new branch
                    if mismatch.is_some() {
                        frames.truncate(depth);
                    }
                    let parent = frames[depth - 1];
                    let frame = tree.new_frame(thread_id.clone(), frame_info, 0.0);
                    tree.add_child(parent, frame, None)?;
                    debug_assert_eq!(frames.len(), depth);
                    frames.push(frame);
                    frame
                }
            };

            tree.record_time(frame, frame_info, time);
        }

        frames.truncate(depth + 1);

        let final_frame = *frames.last().unwrap_or(&root);
        if !tree.is_synthetic_leaf(final_frame) {
            let self_time = tree.new_frame(thread_id.clone(), SELF_TIME_FRAME_IDENTIFIER, time);
            tree.add_child(final_frame, self_time, None)?;
        }
    }

    // unwrap single-child dummy roots
    for root in root_frames.values_mut() {
        if let [only_child] = tree.children(*root) {
            let only_child = *only_child;
            tree.remove_from_parent(only_child);
            *root = only_child;
        }
    }

    Ok(root_frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::frame::NullContext;

    fn frame(tree: &mut FrameTree, info: &str, time: f64) -> FrameId {
        tree.new_frame("MainThread", info, time)
    }

    /// root(time=10) with children a(6) and b(4), each with a self-time leaf.
    fn small_tree(tree: &mut FrameTree) -> (FrameId, FrameId, FrameId) {
        let root = frame(tree, "root\u{0}/app/main.py\u{0}1", 10.0);
        let a = frame(tree, "a\u{0}/app/a.py\u{0}1", 6.0);
        let b = frame(tree, "b\u{0}/app/b.py\u{0}1", 4.0);
        tree.add_children(root, &[a, b], None).expect("add");
        let a_self = frame(tree, SELF_TIME_FRAME_IDENTIFIER, 6.0);
        let b_self = frame(tree, SELF_TIME_FRAME_IDENTIFIER, 4.0);
        tree.add_child(a, a_self, None).expect("add");
        tree.add_child(b, b_self, None).expect("add");
        (root, a, b)
    }

    #[test]
    fn cannot_delete_root() {
        let mut tree = FrameTree::new();
        let (root, _, _) = small_tree(&mut tree);
        assert_eq!(
            delete_frame_from_tree(&mut tree, root, ReplaceWith::Children),
            Err(FrameTreeError::CannotDeleteRoot)
        );
    }

    #[test]
    fn delete_replacing_with_children_preserves_position() {
        let mut tree = FrameTree::new();
        let (root, a, b) = small_tree(&mut tree);
        let a_self = tree.children(a)[0];

        delete_frame_from_tree(&mut tree, a, ReplaceWith::Children).expect("delete");

        // a's self-time child takes a's position, before b
        assert_eq!(tree.children(root), &[a_self, b]);
        assert_eq!(tree.parent(a), None);
    }

    #[test]
    fn delete_replacing_with_self_time_conserves_time() {
        let mut tree = FrameTree::new();
        let (root, a, b) = small_tree(&mut tree);

        delete_frame_from_tree(&mut tree, a, ReplaceWith::SelfTime).expect("delete");

        let children = tree.children(root).to_vec();
        assert_eq!(children.len(), 2);
        let replacement = children[0];
        assert_eq!(tree.identifier(replacement).as_str(), SELF_TIME_FRAME_IDENTIFIER);
        assert!((tree.time(replacement) - 6.0).abs() < f64::EPSILON);
        assert_eq!(children[1], b);
        assert!(tree.self_check(root, true).is_ok());
    }

    #[test]
    fn delete_replacing_with_nothing_absorbs_time() {
        let mut tree = FrameTree::new();
        let (root, a, _) = small_tree(&mut tree);

        delete_frame_from_tree(&mut tree, a, ReplaceWith::Nothing).expect("delete");

        assert_eq!(tree.children(root).len(), 1);
        assert!((tree.absorbed_time(root) - 6.0).abs() < f64::EPSILON);
        assert!((tree.time(root) - 10.0).abs() < f64::EPSILON);
        assert!(tree.self_check(root, false).is_ok());
    }

    #[test]
    fn delete_propagates_absorbed_time_to_parent() {
        let mut tree = FrameTree::new();
        let (root, a, _) = small_tree(&mut tree);
        let a_self = tree.children(a)[0];

        // absorb a's leaf into a, then delete a replacing with children
        delete_frame_from_tree(&mut tree, a_self, ReplaceWith::Nothing).expect("delete");
        assert!((tree.absorbed_time(a) - 6.0).abs() < f64::EPSILON);

        delete_frame_from_tree(&mut tree, a, ReplaceWith::Children).expect("delete");
        assert!((tree.absorbed_time(root) - 6.0).abs() < f64::EPSILON);
        assert!(tree.self_check(root, true).is_ok());
    }

    #[test]
    fn delete_with_nothing_counts_absorbed_time_once() {
        let mut tree = FrameTree::new();
        let (root, a, _) = small_tree(&mut tree);
        let a_self = tree.children(a)[0];

        // give a nonzero absorbed time, then delete it entirely
        delete_frame_from_tree(&mut tree, a_self, ReplaceWith::Nothing).expect("delete");
        assert!((tree.absorbed_time(a) - 6.0).abs() < f64::EPSILON);
        delete_frame_from_tree(&mut tree, a, ReplaceWith::Nothing).expect("delete");

        // a's time of 6 already includes the absorbed 6; the parent must
        // receive it once, not once per bookkeeping field
        assert!((tree.absorbed_time(root) - 6.0).abs() < f64::EPSILON);
        assert!(tree.self_check(root, true).is_ok());
    }

    #[test]
    fn delete_with_self_time_counts_absorbed_time_once() {
        let mut tree = FrameTree::new();
        let (root, a, b) = small_tree(&mut tree);
        let a_self = tree.children(a)[0];

        delete_frame_from_tree(&mut tree, a_self, ReplaceWith::Nothing).expect("delete");
        delete_frame_from_tree(&mut tree, a, ReplaceWith::SelfTime).expect("delete");

        // the replacement self-time frame carries all of a's 6 seconds, so
        // nothing extra lands in the parent's absorbed time
        let replacement = tree.children(root)[0];
        assert_eq!(tree.identifier(replacement).as_str(), SELF_TIME_FRAME_IDENTIFIER);
        assert!((tree.time(replacement) - 6.0).abs() < f64::EPSILON);
        assert!(tree.absorbed_time(root).abs() < f64::EPSILON);
        assert_eq!(tree.children(root), &[replacement, b]);
        assert!(tree.self_check(root, true).is_ok());
    }

    #[test]
    fn delete_removes_subtree_from_groups() {
        let mut tree = FrameTree::new();
        let (_, a, b) = small_tree(&mut tree);
        let a_self = tree.children(a)[0];
        let group = tree.new_group(a);
        tree.add_frame_to_group(group, a_self);
        tree.add_frame_to_group(group, b);

        delete_frame_from_tree(&mut tree, a, ReplaceWith::Nothing).expect("delete");

        // a and its child left the group; b alone is meaningless, so the
        // group dissolved entirely
        assert!(tree.group(group).is_none());
        assert_eq!(tree.group_of(b), None);
    }

    #[test]
    fn two_member_group_dissolves_when_one_leaves() {
        let mut tree = FrameTree::new();
        let (_, a, b) = small_tree(&mut tree);
        let group = tree.new_group(a);
        tree.add_frame_to_group(group, b);

        remove_frame_from_groups(&mut tree, a, false);

        assert!(tree.group(group).is_none());
        assert_eq!(tree.group_of(a), None);
        assert_eq!(tree.group_of(b), None);
    }

    #[test]
    fn combine_requires_shared_parent() {
        let mut tree = FrameTree::new();
        let (_, a, _) = small_tree(&mut tree);
        let orphan = frame(&mut tree, "orphan", 1.0);
        assert_eq!(
            combine_frames(&mut tree, orphan, a),
            Err(FrameTreeError::DifferentParents)
        );
    }

    #[test]
    fn combine_sums_times_and_attributes() {
        let mut tree = FrameTree::new();
        let root = frame(&mut tree, "root", 15.0);
        let first = frame(&mut tree, "f\u{0}/app/f.py\u{0}3\u{1}cWorker", 10.0);
        let second = frame(&mut tree, "f\u{0}/app/f.py\u{0}3\u{1}cWorker\u{1}h1", 5.0);
        tree.add_children(root, &[first, second], None).expect("add");
        let grandchild = frame(&mut tree, "g\u{0}/app/g.py\u{0}9", 2.0);
        tree.add_child(second, grandchild, None).expect("add");
        tree.add_absorbed_time(second, 1.5);

        combine_frames(&mut tree, second, first).expect("combine");

        assert_eq!(tree.children(root), &[first]);
        assert!((tree.time(first) - 15.0).abs() < f64::EPSILON);
        assert!((tree.absorbed_time(first) - 1.5).abs() < f64::EPSILON);
        assert_eq!(tree.parent(grandchild), Some(first));
        assert_eq!(tree.parent(second), None);
        // cWorker appears in both, h1 only in the merged frame
        assert!((tree.attributes(first)["cWorker"] - 15.0).abs() < f64::EPSILON);
        assert!((tree.attributes(first)["h1"] - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn combine_keeps_descendant_group_membership() {
        let mut tree = FrameTree::new();
        let root = frame(&mut tree, "root", 6.0);
        let first = frame(&mut tree, "f\u{0}/app/f.py\u{0}1", 4.0);
        let second = frame(&mut tree, "f\u{0}/app/f.py\u{0}1", 2.0);
        tree.add_children(root, &[first, second], None).expect("add");
        let inner = frame(&mut tree, "g\u{0}/lib/g.py\u{0}1", 2.0);
        let deeper = frame(&mut tree, "h\u{0}/lib/h.py\u{0}1", 1.0);
        tree.add_child(second, inner, None).expect("add");
        tree.add_child(inner, deeper, None).expect("add");
        let group = tree.new_group(inner);
        tree.add_frame_to_group(group, deeper);

        combine_frames(&mut tree, second, first).expect("combine");

        assert_eq!(tree.group_of(inner), Some(group));
        assert_eq!(tree.group_of(deeper), Some(group));
    }

    fn record(stack: &[&str], time: f64) -> FrameRecord {
        FrameRecord(stack.iter().map(|s| (*s).to_string()).collect(), time)
    }

    const MAIN_THREAD: &str = "MainThread\u{0}<thread>\u{0}1";
    const WORKER_THREAD: &str = "Worker-1\u{0}<thread>\u{0}2";

    #[test]
    fn build_frame_tree_merges_shared_stack_prefixes() {
        let mut tree = FrameTree::new();
        let records = vec![
            record(&[MAIN_THREAD, "main\u{0}/app/main.py\u{0}1", "a\u{0}/app/a.py\u{0}4"], 0.1),
            record(&[MAIN_THREAD, "main\u{0}/app/main.py\u{0}1", "a\u{0}/app/a.py\u{0}4"], 0.1),
            record(&[MAIN_THREAD, "main\u{0}/app/main.py\u{0}1", "b\u{0}/app/b.py\u{0}9"], 0.2),
        ];
        let roots = build_frame_tree(&mut tree, &records).expect("build");

        assert_eq!(roots.len(), 1);
        // the placeholder root held only the thread frame and was unwrapped
        let root = roots[MAIN_THREAD];
        assert_eq!(tree.function(root), "MainThread");
        assert!((tree.time(root) - 0.4).abs() < 1e-9);

        let main = tree.children(root)[0];
        assert_eq!(tree.function(main), "main");
        assert!((tree.time(main) - 0.4).abs() < 1e-9);

        let children = tree.children(main).to_vec();
        assert_eq!(children.len(), 2);
        assert_eq!(tree.function(children[0]), "a");
        assert!((tree.time(children[0]) - 0.2).abs() < 1e-9);
        assert_eq!(tree.function(children[1]), "b");
        assert!((tree.time(children[1]) - 0.2).abs() < 1e-9);

        // every leaf got a self-time frame, so times are conserved
        assert!(tree.self_check(root, true).is_ok());
    }

    #[test]
    fn build_frame_tree_separates_threads() {
        let mut tree = FrameTree::new();
        let records = vec![
            record(&[MAIN_THREAD, "main\u{0}/app/main.py\u{0}1"], 0.1),
            record(&[WORKER_THREAD, "work\u{0}/app/work.py\u{0}8"], 0.3),
            record(&[MAIN_THREAD, "main\u{0}/app/main.py\u{0}1"], 0.1),
        ];
        let roots = build_frame_tree(&mut tree, &records).expect("build");

        assert_eq!(roots.len(), 2);
        assert!((tree.time(roots[MAIN_THREAD]) - 0.2).abs() < 1e-9);
        assert!((tree.time(roots[WORKER_THREAD]) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn build_frame_tree_empty_records() {
        let mut tree = FrameTree::new();
        let roots = build_frame_tree(&mut tree, &[]).expect("build");
        assert!(roots.is_empty());
    }

    #[test]
    fn deleted_frames_file_paths_stay_out_of_derived_fields() {
        // a deleted frame's derived getters still work, but it is detached
        let mut tree = FrameTree::new();
        let (root, a, _) = small_tree(&mut tree);
        delete_frame_from_tree(&mut tree, a, ReplaceWith::Nothing).expect("delete");
        assert_eq!(tree.parent(a), None);
        assert!(tree.file_path_short(a, &NullContext).is_some());
        assert!(!tree.children(root).contains(&a));
    }
}
