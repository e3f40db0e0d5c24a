use crate::model::frame::{FrameContext, FrameId, FrameTree, FrameTreeError};

/// Stable handle to a [`FrameGroup`] in a [`FrameTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub(crate) u32);

impl GroupId {
    /// Stable textual form, used as the group key in render payloads.
    pub fn as_label(&self) -> String {
        format!("group-{}", self.0)
    }
}

/// A labeled cluster of frames that collapse together for display, typically
/// library internals. Groups don't own frames, they track membership.
#[derive(Debug)]
pub struct FrameGroup {
    pub(crate) root: FrameId,
    /// Members in insertion order.
    pub(crate) frames: Vec<FrameId>,
}

impl FrameTree {
    /// Creates a group rooted at `root`, with `root` as its first member.
    /// Membership is exclusive: joining a group leaves any previous one.
    pub fn new_group(&mut self, root: FrameId) -> GroupId {
        let id = GroupId(self.groups.len() as u32);
        self.groups.push(Some(FrameGroup {
            root,
            frames: Vec::new(),
        }));
        self.add_frame_to_group(id, root);
        id
    }

    /// The group, if it hasn't been dissolved.
    pub fn group(&self, id: GroupId) -> Option<&FrameGroup> {
        self.groups.get(id.0 as usize).and_then(Option::as_ref)
    }

    /// All groups that still have members.
    pub fn live_groups(&self) -> impl Iterator<Item = (GroupId, &FrameGroup)> {
        self.groups
            .iter()
            .enumerate()
            .filter_map(|(i, g)| g.as_ref().map(|g| (GroupId(i as u32), g)))
    }

    pub fn group_root(&self, id: GroupId) -> Option<FrameId> {
        self.group(id).map(|g| g.root)
    }

    /// Members of the group, in insertion order. Empty if dissolved.
    pub fn group_frames(&self, id: GroupId) -> &[FrameId] {
        self.group(id).map_or(&[], |g| g.frames.as_slice())
    }

    pub fn add_frame_to_group(&mut self, group: GroupId, frame: FrameId) {
        if let Some(previous) = self.node(frame).group {
            // ignore the phantom error: membership was just read
            let _ = self.remove_frame_from_group(previous, frame);
        }
        if let Some(Some(g)) = self.groups.get_mut(group.0 as usize) {
            g.frames.push(frame);
            self.node_mut(frame).group = Some(group);
        }
    }

    /// Removes a frame from a group it is a member of. A group left with no
    /// members is discarded.
    pub fn remove_frame_from_group(
        &mut self,
        group: GroupId,
        frame: FrameId,
    ) -> Result<(), FrameTreeError> {
        if self.node(frame).group != Some(group) {
            return Err(FrameTreeError::FrameNotInGroup);
        }
        let slot = self
            .groups
            .get_mut(group.0 as usize)
            .ok_or(FrameTreeError::FrameNotInGroup)?;
        let Some(g) = slot else {
            return Err(FrameTreeError::FrameNotInGroup);
        };
        let Some(position) = g.frames.iter().position(|&f| f == frame) else {
            return Err(FrameTreeError::FrameNotInGroup);
        };
        g.frames.remove(position);
        if g.frames.is_empty() {
            *slot = None;
        }
        self.node_mut(frame).group = None;
        Ok(())
    }

    /// Members whose children include a frame outside the group.
    pub fn exit_frames(&self, id: GroupId) -> Vec<FrameId> {
        self.group_frames(id)
            .iter()
            .copied()
            .filter(|&frame| {
                self.children(frame)
                    .iter()
                    .any(|&child| self.group_of(child) != Some(id))
            })
            .collect()
    }

    /// The distinct libraries the group's members come from, in member
    /// order.
    pub fn group_libraries(&self, id: GroupId, ctx: &dyn FrameContext) -> Vec<String> {
        let mut libraries: Vec<String> = Vec::new();
        for &frame in self.group_frames(id) {
            if let Some(library) = self.library(frame, ctx)
                && !libraries.contains(&library)
            {
                libraries.push(library);
            }
        }
        libraries
    }
}
