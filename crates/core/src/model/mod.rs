pub mod frame;
pub mod frame_ops;
pub mod group;
pub mod session;

pub use frame::{FrameContext, FrameId, FrameTree, FrameTreeError, NullContext};
pub use frame_ops::{
    ReplaceWith, build_frame_tree, combine_frames, delete_frame_from_tree,
    remove_frame_from_groups,
};
pub use group::{FrameGroup, GroupId};
pub use session::{Session, SessionError};
