//! The frame-info wire encoding.
//!
//! A frame-info string packs a frame identifier and its invocation-specific
//! attributes into one string:
//!
//! ```text
//! function\x00file_path\x00line_no [\x01attribute]*
//! ```
//!
//! The identifier is a `\x00`-delimited triple. Attributes are appended with
//! `\x01` separators; the first character of each attribute is a marker
//! describing what kind of observation it is, the rest is the data.

/// Separates the function/file-path/line-no parts of an identifier.
pub const IDENTIFIER_SEP: char = '\u{0}';

/// Separates the identifier from attributes, and attributes from each other.
pub const ATTRIBUTES_SEP: char = '\u{1}';

/// Attribute marker: the class name of the `self` argument, if any.
pub const ATTRIBUTE_MARKER_CLASS_NAME: char = 'c';
/// Attribute marker: a line-number override observed at sample time.
pub const ATTRIBUTE_MARKER_LINE_NUMBER: char = 'l';
/// Attribute marker: a truthy `__traceback_hide__` local was present.
pub const ATTRIBUTE_MARKER_TRACEBACKHIDE: char = 'h';

/// Splits a frame-info string into its identifier and attribute list.
pub fn parse_frame_info(frame_info: &str) -> (&str, Vec<&str>) {
    match frame_info.split_once(ATTRIBUTES_SEP) {
        Some((identifier, attributes)) => (identifier, attributes.split(ATTRIBUTES_SEP).collect()),
        None => (frame_info, Vec::new()),
    }
}

/// Equivalent to `parse_frame_info(frame_info).0`, without collecting the
/// attributes.
pub fn frame_info_identifier(frame_info: &str) -> &str {
    match frame_info.find(ATTRIBUTES_SEP) {
        Some(index) => &frame_info[..index],
        None => frame_info,
    }
}
