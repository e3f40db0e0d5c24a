pub mod frame_info;
pub mod session_data;
pub mod shared_str;

pub use frame_info::{
    ATTRIBUTE_MARKER_CLASS_NAME, ATTRIBUTE_MARKER_LINE_NUMBER, ATTRIBUTE_MARKER_TRACEBACKHIDE,
    frame_info_identifier, parse_frame_info,
};
pub use session_data::{FrameRecord, SessionData};
pub use shared_str::SharedStr;
