//! Ordered application of processors to the trees of a session.

use std::collections::HashMap;

use log::{debug, trace};
use stackprune_protocol::shared_str::SharedStr;

use crate::model::frame::{FrameContext, FrameId, FrameTree, FrameTreeError};
use crate::processors::{Processor, ProcessorOptions};

/// The standard view pipeline: importlib noise out, timeline collapsed to
/// an aggregate, library runs grouped, self-time and sub-threshold clutter
/// removed, and the profiler's own entry frames trimmed.
pub fn default_processors() -> Vec<Processor> {
    vec![
        Processor::RemoveImportlib,
        Processor::MergeConsecutiveSelfTime,
        Processor::AggregateRepeatedCalls,
        Processor::GroupLibraryFrames,
        Processor::RemoveUnnecessarySelfTimeNodes,
        Processor::RemoveIrrelevantNodes,
        Processor::RemoveFirstProfilerFrames,
    ]
}

/// Applies processors in order, threading the (possibly re-rooted) tree
/// through. Returns `None` if any processor discards the root.
pub fn apply_processors(
    tree: &mut FrameTree,
    root: FrameId,
    processors: &[Processor],
    ctx: &dyn FrameContext,
    options: &ProcessorOptions,
) -> Result<Option<FrameId>, FrameTreeError> {
    let mut current = root;

    for processor in processors {
        match processor.apply(tree, current, ctx, options)? {
            Some(next) => {
                debug!(
                    "{}: {} frames under root",
                    processor.name(),
                    tree.subtree_size(next)
                );
                current = next;
            }
            None => {
                trace!("{} discarded the tree", processor.name());
                return Ok(None);
            }
        }
    }

    Ok(Some(current))
}

/// Runs the full processor list over each named root, dropping threads whose
/// tree is discarded entirely.
pub fn apply_processors_to_roots(
    tree: &mut FrameTree,
    roots: HashMap<SharedStr, FrameId>,
    processors: &[Processor],
    ctx: &dyn FrameContext,
    options: &ProcessorOptions,
) -> Result<HashMap<SharedStr, FrameId>, FrameTreeError> {
    let mut processed = HashMap::with_capacity(roots.len());

    for (thread_id, root) in roots {
        if let Some(new_root) = apply_processors(tree, root, processors, ctx, options)? {
            processed.insert(thread_id, new_root);
        }
    }

    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::frame::{NullContext, SELF_TIME_FRAME_IDENTIFIER};
    use stackprune_protocol::frame_info::IDENTIFIER_SEP;

    fn frame(tree: &mut FrameTree, name: &str, time: f64) -> FrameId {
        let identifier = format!("{name}{IDENTIFIER_SEP}/app/{name}.py{IDENTIFIER_SEP}1");
        tree.new_frame("main", &identifier, time)
    }

    #[test]
    fn processors_apply_in_order() {
        let mut tree = FrameTree::new();
        let root = frame(&mut tree, "main", 1.0);
        let a1 = frame(&mut tree, "a", 0.3);
        let a2 = frame(&mut tree, "a", 0.7);
        let s1 = tree.new_frame("main", SELF_TIME_FRAME_IDENTIFIER, 0.3);
        let s2 = tree.new_frame("main", SELF_TIME_FRAME_IDENTIFIER, 0.7);
        tree.add_children(root, &[a1, a2], None).expect("attach");
        tree.add_child(a1, s1, None).expect("attach");
        tree.add_child(a2, s2, None).expect("attach");

        let options = ProcessorOptions::new();
        let result = apply_processors(
            &mut tree,
            root,
            &default_processors(),
            &NullContext,
            &options,
        )
        .expect("pipeline");

        // aggregation merges the repeated a frames, then the sole self-time
        // child below the merged frame is absorbed
        let root = result.expect("tree kept");
        assert_eq!(tree.children(root), [a1]);
        assert!((tree.time(a1) - 1.0).abs() < 1e-12);
        assert!(tree.children(a1).is_empty());
        tree.self_check(root, true).expect("time conserved");
    }

    #[test]
    fn time_stays_conserved_when_absorbed_frames_are_filtered_out() {
        // self-time absorption gives the tiny frame a nonzero absorbed
        // time before the threshold filter deletes it; the root must end
        // up accounting for its time exactly once
        let mut tree = FrameTree::new();
        let root = frame(&mut tree, "main", 1.0);
        let big = frame(&mut tree, "big", 0.995);
        let tiny = frame(&mut tree, "tiny", 0.005);
        tree.add_children(root, &[big, tiny], None).expect("attach");
        for (leaf, time) in [(big, 0.995), (tiny, 0.005)] {
            let leaf_self = tree.new_frame("main", SELF_TIME_FRAME_IDENTIFIER, time);
            tree.add_child(leaf, leaf_self, None).expect("attach");
        }

        let options = ProcessorOptions::new();
        let result = apply_processors(
            &mut tree,
            root,
            &default_processors(),
            &NullContext,
            &options,
        )
        .expect("pipeline");

        let root = result.expect("tree kept");
        assert_eq!(tree.children(root), [big]);
        assert!((tree.absorbed_time(root) - 0.005).abs() < 1e-12);
        tree.self_check(root, true).expect("time conserved");
    }

    #[test]
    fn empty_processor_list_is_identity() {
        let mut tree = FrameTree::new();
        let root = frame(&mut tree, "main", 1.0);

        let options = ProcessorOptions::new();
        let result = apply_processors(&mut tree, root, &[], &NullContext, &options)
            .expect("pipeline");
        assert_eq!(result, Some(root));
    }

    #[test]
    fn each_root_is_processed_independently() {
        let mut tree = FrameTree::new();
        let main_root = frame(&mut tree, "main", 1.0);
        let worker_root = frame(&mut tree, "worker", 1.0);
        let m1 = frame(&mut tree, "handle", 0.6);
        let m2 = frame(&mut tree, "handle", 0.4);
        tree.add_children(main_root, &[m1, m2], None).expect("attach");

        let mut roots = HashMap::new();
        roots.insert(SharedStr::from("thread-1"), main_root);
        roots.insert(SharedStr::from("thread-2"), worker_root);

        let options = ProcessorOptions::new();
        let processed = apply_processors_to_roots(
            &mut tree,
            roots,
            &default_processors(),
            &NullContext,
            &options,
        )
        .expect("pipeline");

        assert_eq!(processed.len(), 2);
        assert_eq!(tree.children(processed["thread-1"]), [m1]);
    }
}
