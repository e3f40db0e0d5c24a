use std::collections::HashMap;

use stackprune_protocol::frame_info::{
    ATTRIBUTE_MARKER_CLASS_NAME, ATTRIBUTE_MARKER_TRACEBACKHIDE, IDENTIFIER_SEP,
    frame_info_identifier, parse_frame_info,
};
use stackprune_protocol::shared_str::SharedStr;
use thiserror::Error;

use crate::model::group::{FrameGroup, GroupId};

/// Synthetic frame spent awaiting a coroutine.
pub const AWAIT_FRAME_IDENTIFIER: &str = "[await]";
/// Synthetic frame holding time spent directly in the parent frame.
pub const SELF_TIME_FRAME_IDENTIFIER: &str = "[self]";
/// Synthetic frame for samples captured outside the profiled context.
pub const OUT_OF_CONTEXT_FRAME_IDENTIFIER: &str = "[out-of-context]";
/// Synthetic placeholder root holding a thread's frames together.
pub const DUMMY_ROOT_FRAME_IDENTIFIER: &str = "[root]";

/// Identifiers that don't correspond to real code locations. They are never
/// parsed as function/path/line triples.
pub fn is_synthetic_identifier(identifier: &str) -> bool {
    matches!(
        identifier,
        AWAIT_FRAME_IDENTIFIER
            | SELF_TIME_FRAME_IDENTIFIER
            | OUT_OF_CONTEXT_FRAME_IDENTIFIER
            | DUMMY_ROOT_FRAME_IDENTIFIER
    )
}

/// Synthetic identifiers that can have no children. Correspondingly, their
/// time is not the sum of their children's time.
pub fn is_synthetic_leaf_identifier(identifier: &str) -> bool {
    matches!(
        identifier,
        AWAIT_FRAME_IDENTIFIER | SELF_TIME_FRAME_IDENTIFIER | OUT_OF_CONTEXT_FRAME_IDENTIFIER
    )
}

/// Structural violations raised by the mutation primitives.
///
/// These indicate a programming error in a processor. The tree is never
/// silently corrected; a failed mutation leaves an explicitly erroring state
/// (e.g. the frame detached) rather than a guessed-at recovered one.
#[derive(Debug, Error, PartialEq)]
pub enum FrameTreeError {
    #[error("cannot delete the root frame")]
    CannotDeleteRoot,
    #[error("both frames must have the same parent")]
    DifferentParents,
    #[error("insertion point is not a child of the target frame")]
    InsertionPointNotFound,
    #[error("cannot add children to a leaf-only frame")]
    LeafCannotHaveChildren,
    #[error("insert would make the frame its own ancestor")]
    WouldCreateCycle,
    #[error("frame is not a member of the group")]
    FrameNotInGroup,
    #[error("frame time {actual} does not match children + absorbed time {expected}")]
    InconsistentTime { expected: f64, actual: f64 },
}

/// Stable handle to a frame in a [`FrameTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub(crate) u32);

/// Context a frame tree depends on for path-sensitive derived properties.
/// Supplied by the session that loaded the profile.
pub trait FrameContext {
    /// Shortest relative form of an absolute path against the known root
    /// paths.
    fn shorten_path(&self, path: &str) -> String;
    /// Paths considered library code (interpreter install dirs, virtualenvs).
    fn sys_prefixes(&self) -> &[String];
}

/// Context for trees without session data: paths are left unshortened and no
/// prefix is treated as library code.
#[derive(Debug, Default)]
pub struct NullContext;

impl FrameContext for NullContext {
    fn shorten_path(&self, path: &str) -> String {
        path.to_string()
    }

    fn sys_prefixes(&self) -> &[String] {
        &[]
    }
}

#[derive(Debug)]
pub(crate) struct FrameNode {
    pub(crate) thread_id: SharedStr,
    pub(crate) identifier: SharedStr,
    pub(crate) time: f64,
    /// Time folded in from frames deleted during processing.
    pub(crate) absorbed_time: f64,
    /// Marker-prefixed observations mapped to the duration they were
    /// observed for.
    pub(crate) attributes: HashMap<String, f64>,
    pub(crate) parent: Option<FrameId>,
    pub(crate) children: Vec<FrameId>,
    pub(crate) group: Option<GroupId>,
}

/// Arena owning every frame of a parsed profile, one or more trees deep.
///
/// Parent/child links are index handles into the arena, updated only by the
/// mutation primitives here and in [`crate::model::frame_ops`], never by
/// direct list edits. Frames detached during processing stay allocated but
/// unreachable.
#[derive(Debug, Default)]
pub struct FrameTree {
    nodes: Vec<FrameNode>,
    pub(crate) groups: Vec<Option<FrameGroup>>,
}

impl FrameTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a frame from a frame-info string, recording its initial
    /// time and attribute observations.
    pub fn new_frame(
        &mut self,
        thread_id: impl Into<SharedStr>,
        frame_info: &str,
        time: f64,
    ) -> FrameId {
        let id = FrameId(self.nodes.len() as u32);
        self.nodes.push(FrameNode {
            thread_id: thread_id.into(),
            identifier: frame_info_identifier(frame_info).into(),
            time: 0.0,
            absorbed_time: 0.0,
            attributes: HashMap::new(),
            parent: None,
            children: Vec::new(),
            group: None,
        });
        self.record_time(id, frame_info, time);
        id
    }

    /// Adds sampled time to a frame, attributing it to any attribute
    /// observations carried by the frame-info string.
    pub fn record_time(&mut self, id: FrameId, frame_info: &str, time: f64) {
        let (_, attributes) = parse_frame_info(frame_info);
        let node = self.node_mut(id);
        node.time += time;
        for attribute in attributes {
            *node.attributes.entry(attribute.to_string()).or_insert(0.0) += time;
        }
    }

    pub(crate) fn node(&self, id: FrameId) -> &FrameNode {
        &self.nodes[id.0 as usize]
    }

    pub(crate) fn node_mut(&mut self, id: FrameId) -> &mut FrameNode {
        &mut self.nodes[id.0 as usize]
    }

    pub(crate) fn add_time(&mut self, id: FrameId, delta: f64) {
        self.node_mut(id).time += delta;
    }

    pub(crate) fn add_absorbed_time(&mut self, id: FrameId, delta: f64) {
        self.node_mut(id).absorbed_time += delta;
    }

    // --- Mutation primitives ---

    /// Inserts `child` as a child of `parent`, detaching it from its current
    /// parent first. With `after`, the child is inserted immediately after
    /// that sibling instead of at the end.
    ///
    /// Fails with [`FrameTreeError::InsertionPointNotFound`] if `after` is
    /// not currently a child of `parent`; the child is left detached.
    pub fn add_child(
        &mut self,
        parent: FrameId,
        child: FrameId,
        after: Option<FrameId>,
    ) -> Result<(), FrameTreeError> {
        if self.is_synthetic_leaf(parent) {
            return Err(FrameTreeError::LeafCannotHaveChildren);
        }
        if child == parent || self.is_ancestor_of(child, parent) {
            return Err(FrameTreeError::WouldCreateCycle);
        }

        self.remove_from_parent(child);

        let position = match after {
            None => self.node(parent).children.len(),
            Some(after) => {
                self.node(parent)
                    .children
                    .iter()
                    .position(|&c| c == after)
                    .ok_or(FrameTreeError::InsertionPointNotFound)?
                    + 1
            }
        };
        self.node_mut(parent).children.insert(position, child);
        self.node_mut(child).parent = Some(parent);
        Ok(())
    }

    /// Adds multiple frames, preserving their relative order. With `after`,
    /// the whole run is inserted as a contiguous block immediately following
    /// that sibling.
    pub fn add_children(
        &mut self,
        parent: FrameId,
        children: &[FrameId],
        after: Option<FrameId>,
    ) -> Result<(), FrameTreeError> {
        if after.is_some() {
            // insert in reverse so the order is preserved
            for &child in children.iter().rev() {
                self.add_child(parent, child, after)?;
            }
        } else {
            for &child in children {
                self.add_child(parent, child, None)?;
            }
        }
        Ok(())
    }

    /// Splices the frame out of its parent's child list and clears the
    /// parent link. No-op if the frame has no parent.
    pub fn remove_from_parent(&mut self, id: FrameId) {
        if let Some(parent) = self.node(id).parent {
            let children = &mut self.node_mut(parent).children;
            if let Some(position) = children.iter().position(|&c| c == id) {
                children.remove(position);
            }
            self.node_mut(id).parent = None;
        }
    }

    /// Reorders a frame's children by time, longest first.
    pub fn sort_children_by_time(&mut self, id: FrameId) {
        let mut children = std::mem::take(&mut self.node_mut(id).children);
        children.sort_by(|&a, &b| self.node(b).time.total_cmp(&self.node(a).time));
        self.node_mut(id).children = children;
    }

    fn is_ancestor_of(&self, ancestor: FrameId, frame: FrameId) -> bool {
        let mut current = self.node(frame).parent;
        while let Some(f) = current {
            if f == ancestor {
                return true;
            }
            current = self.node(f).parent;
        }
        false
    }

    // --- Structure accessors ---

    pub fn parent(&self, id: FrameId) -> Option<FrameId> {
        self.node(id).parent
    }

    /// Direct children in call order. Processors that mutate while iterating
    /// must copy this slice first.
    pub fn children(&self, id: FrameId) -> &[FrameId] {
        &self.node(id).children
    }

    pub fn group_of(&self, id: FrameId) -> Option<GroupId> {
        self.node(id).group
    }

    pub fn thread_id(&self, id: FrameId) -> &SharedStr {
        &self.node(id).thread_id
    }

    pub fn identifier(&self, id: FrameId) -> &SharedStr {
        &self.node(id).identifier
    }

    pub fn time(&self, id: FrameId) -> f64 {
        self.node(id).time
    }

    pub fn absorbed_time(&self, id: FrameId) -> f64 {
        self.node(id).absorbed_time
    }

    pub fn attributes(&self, id: FrameId) -> &HashMap<String, f64> {
        &self.node(id).attributes
    }

    /// Number of frames in the subtree rooted at `id`, including `id`.
    pub fn subtree_size(&self, id: FrameId) -> usize {
        1 + self
            .children(id)
            .iter()
            .map(|&c| self.subtree_size(c))
            .sum::<usize>()
    }

    // --- Derived properties ---

    pub fn is_synthetic(&self, id: FrameId) -> bool {
        is_synthetic_identifier(&self.node(id).identifier)
    }

    pub fn is_synthetic_leaf(&self, id: FrameId) -> bool {
        is_synthetic_leaf_identifier(&self.node(id).identifier)
    }

    pub fn function(&self, id: FrameId) -> &str {
        let identifier = self.node(id).identifier.as_str();
        identifier.split(IDENTIFIER_SEP).next().unwrap_or(identifier)
    }

    pub fn file_path(&self, id: FrameId) -> Option<&str> {
        self.node(id)
            .identifier
            .split(IDENTIFIER_SEP)
            .nth(1)
            .filter(|p| !p.is_empty())
    }

    pub fn line_no(&self, id: FrameId) -> Option<u32> {
        self.node(id)
            .identifier
            .split(IDENTIFIER_SEP)
            .nth(2)
            .and_then(|n| n.parse().ok())
    }

    /// This frame's share of its parent's time. NaN for a zero-time parent,
    /// 1.0 at the root.
    pub fn proportion_of_parent(&self, id: FrameId) -> f64 {
        match self.node(id).parent {
            Some(parent) => {
                let parent_time = self.node(parent).time;
                if parent_time == 0.0 {
                    f64::NAN
                } else {
                    self.node(id).time / parent_time
                }
            }
            None => 1.0,
        }
    }

    /// Time in this frame not attributed to real children. Includes time
    /// recorded by synthetic self-time and await children.
    pub fn total_self_time(&self, id: FrameId) -> f64 {
        let mut self_time = self.node(id).time;
        for &child in self.children(id) {
            if !self.is_synthetic(child) {
                self_time -= self.node(child).time;
            }
        }
        self_time
    }

    /// Total await time in this subtree.
    pub fn await_time(&self, id: FrameId) -> f64 {
        let mut total = if self.node(id).identifier == AWAIT_FRAME_IDENTIFIER {
            self.node(id).time
        } else {
            0.0
        };
        for &child in self.children(id) {
            total += self.await_time(child);
        }
        total
    }

    /// The value of the attribute with the given marker. If conflicting
    /// observations were recorded, the one observed for the longest wins.
    pub fn attribute_value(&self, id: FrameId, marker: char) -> Option<&str> {
        self.node(id)
            .attributes
            .iter()
            .filter(|(key, _)| key.starts_with(marker))
            .max_by(|&(ak, av), &(bk, bv)| av.total_cmp(bv).then_with(|| ak.cmp(bk)))
            .map(|(key, _)| &key[marker.len_utf8()..])
    }

    pub fn class_name(&self, id: FrameId) -> Option<&str> {
        self.attribute_value(id, ATTRIBUTE_MARKER_CLASS_NAME)
    }

    /// Whether the frame carried a truthy `__traceback_hide__` local.
    pub fn has_tracebackhide(&self, id: FrameId) -> bool {
        self.attribute_value(id, ATTRIBUTE_MARKER_TRACEBACKHIDE) == Some("1")
    }

    /// The file path resolved against the closest known root path. Synthetic
    /// frames inherit their parent's.
    pub fn file_path_short(&self, id: FrameId, ctx: &dyn FrameContext) -> Option<String> {
        if self.is_synthetic(id) {
            return self.parent(id).and_then(|p| self.file_path_short(p, ctx));
        }
        self.file_path(id).map(|p| ctx.shorten_path(p))
    }

    /// Whether this frame belongs to the profiled program rather than
    /// library or interpreter internals.
    pub fn is_application_code(&self, id: FrameId, ctx: &dyn FrameContext) -> bool {
        if self.is_synthetic(id) {
            return false;
        }

        let Some(file_path) = self.file_path(id) else {
            return false;
        };

        if ctx.sys_prefixes().iter().any(|p| file_path.starts_with(p.as_str())) {
            // lives in the interpreter install dir or a virtualenv
            return false;
        }

        if file_path.starts_with('<') {
            if file_path.starts_with("<ipython-input-") {
                // lines typed at a console or in a notebook are app code
                return true;
            }
            if file_path == "<string>" || file_path == "<stdin>" {
                // eval/exec is app code if started by a frame that is app
                // code; at the root it must have been started with -c
                return match self.parent(id) {
                    Some(parent) => self.is_application_code(parent, ctx),
                    None => true,
                };
            }
            // probably library-internal code generation
            return false;
        }

        true
    }

    /// The library a frame belongs to: the first segment of its shortened
    /// file path, with leading separators and dots stripped.
    pub fn library(&self, id: FrameId, ctx: &dyn FrameContext) -> Option<String> {
        let short = self.file_path_short(id, ctx)?;
        let trimmed = short.trim_start_matches(['/', '\\', '.']);
        let library = trimmed.split(['/', '\\', '.']).next().unwrap_or("");
        if library.is_empty() {
            None
        } else {
            Some(library.to_string())
        }
    }

    /// Checks the time-conservation invariant: a non-leaf frame's time must
    /// equal the sum of its children's times plus its absorbed time.
    pub fn self_check(&self, id: FrameId, recursive: bool) -> Result<(), FrameTreeError> {
        if self.is_synthetic_leaf(id) {
            if !self.children(id).is_empty() {
                return Err(FrameTreeError::LeafCannotHaveChildren);
            }
            // leaf frames carry time not attributable to children
            return Ok(());
        }

        let calculated: f64 = self
            .children(id)
            .iter()
            .map(|&c| self.node(c).time)
            .sum::<f64>()
            + self.node(id).absorbed_time;
        let actual = self.node(id).time;
        if !is_close(calculated, actual) {
            return Err(FrameTreeError::InconsistentTime {
                expected: calculated,
                actual,
            });
        }

        if recursive {
            for &child in self.children(id) {
                self.self_check(child, true)?;
            }
        }
        Ok(())
    }
}

fn is_close(a: f64, b: f64) -> bool {
    let diff = (a - b).abs();
    diff <= 1e-9 * a.abs().max(b.abs()) || diff < 1e-12
}
