//! The JSON view payload: processed frame trees plus session header fields,
//! in the shape a renderer consumes.
//!
//! Every field here is derived, read-only data; nothing in this module
//! mutates the tree.

use serde_json::{Map, Value, json};

use crate::model::frame::{FrameContext, FrameId, FrameTree, FrameTreeError};
use crate::model::session::Session;
use crate::pipeline::apply_processors;
use crate::processors::{Processor, ProcessorOptions};

/// Serializes one processed frame and its subtree.
pub fn frame_to_json(tree: &FrameTree, frame: FrameId, ctx: &dyn FrameContext) -> Value {
    let mut object = Map::new();
    object.insert("function".to_string(), json!(tree.function(frame)));
    object.insert(
        "file_path_short".to_string(),
        json!(tree.file_path_short(frame, ctx).unwrap_or_default()),
    );
    object.insert(
        "file_path".to_string(),
        json!(tree.file_path(frame).unwrap_or_default()),
    );
    object.insert("line_no".to_string(), json!(tree.line_no(frame).unwrap_or(0)));
    object.insert("time".to_string(), json!(tree.time(frame)));
    object.insert("await_time".to_string(), json!(tree.await_time(frame)));
    object.insert(
        "is_application_code".to_string(),
        json!(tree.is_application_code(frame, ctx)),
    );

    let children: Vec<Value> = tree
        .children(frame)
        .iter()
        .map(|&child| frame_to_json(tree, child, ctx))
        .collect();
    object.insert("children".to_string(), Value::Array(children));

    if let Some(group) = tree.group_of(frame) {
        object.insert("group_id".to_string(), json!(group.as_label()));
    }
    if let Some(class_name) = tree.class_name(frame) {
        object.insert("class_name".to_string(), json!(class_name));
    }

    Value::Object(object)
}

/// Runs the processor list over the session's trees and serializes the
/// result with the session header. With several threads, the busiest
/// thread's tree becomes `root_frame`.
pub fn session_to_json(
    session: &Session,
    processors: &[Processor],
    options: &ProcessorOptions,
) -> Result<Value, FrameTreeError> {
    let root_frame = match session.root_frames(true)? {
        None => Value::Null,
        Some((mut tree, roots)) => {
            let mut processed: Vec<FrameId> = Vec::new();
            for root in roots.into_values() {
                if let Some(new_root) =
                    apply_processors(&mut tree, root, processors, session, options)?
                {
                    processed.push(new_root);
                }
            }
            processed
                .into_iter()
                .max_by(|&a, &b| tree.time(a).total_cmp(&tree.time(b)))
                .map_or(Value::Null, |root| frame_to_json(&tree, root, session))
        }
    };

    Ok(json!({
        "start_time": session.start_time,
        "duration": session.duration,
        "sample_count": session.sample_count,
        "target_description": session.target_description,
        "cpu_time": session.cpu_time,
        "root_frame": root_frame,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::frame::NullContext;
    use stackprune_protocol::frame_info::{ATTRIBUTE_MARKER_CLASS_NAME, ATTRIBUTES_SEP, IDENTIFIER_SEP};

    #[test]
    fn frame_payload_has_the_full_field_set() {
        let mut tree = FrameTree::new();
        let identifier = format!(
            "run{IDENTIFIER_SEP}/app/job.py{IDENTIFIER_SEP}40\
             {ATTRIBUTES_SEP}{ATTRIBUTE_MARKER_CLASS_NAME}Worker"
        );
        let root = tree.new_frame("main", &identifier, 1.5);
        let child_identifier = format!("step{IDENTIFIER_SEP}/app/step.py{IDENTIFIER_SEP}7");
        let child = tree.new_frame("main", &child_identifier, 1.5);
        tree.add_child(root, child, None).expect("attach");

        let value = frame_to_json(&tree, root, &NullContext);
        assert_eq!(value["function"], "run");
        assert_eq!(value["file_path"], "/app/job.py");
        assert_eq!(value["line_no"], 40);
        assert_eq!(value["class_name"], "Worker");
        assert_eq!(value["is_application_code"], true);
        assert_eq!(value["children"].as_array().map(Vec::len), Some(1));
        assert_eq!(value["children"][0]["function"], "step");
        // ungrouped frames have no group_id key at all
        assert!(value.get("group_id").is_none());
    }

    #[test]
    fn grouped_frames_carry_a_group_label() {
        let mut tree = FrameTree::new();
        let identifier = format!("a{IDENTIFIER_SEP}/lib/a.py{IDENTIFIER_SEP}1");
        let root = tree.new_frame("main", &identifier, 1.0);
        tree.new_group(root);

        let value = frame_to_json(&tree, root, &NullContext);
        assert_eq!(value["group_id"], "group-0");
    }
}
