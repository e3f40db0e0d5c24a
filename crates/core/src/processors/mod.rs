//! Tree transformations that reshape a raw frame tree into something worth
//! displaying.
//!
//! Processors mutate the tree in place but may also change which frame is
//! the root, so they are always applied through [`Processor::apply`] and the
//! returned id used from then on.

mod aggregate;
mod entry_trim;
mod filters;
mod grouping;
mod self_time;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::model::frame::{FrameContext, FrameId, FrameTree, FrameTreeError};

pub use entry_trim::EntryFrameMarkers;

/// The built-in processors, as a closed set. Callers assemble an ordered
/// list; [`crate::pipeline::default_processors`] gives the standard one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processor {
    RemoveImportlib,
    RemoveTracebackHide,
    AggregateRepeatedCalls,
    GroupLibraryFrames,
    MergeConsecutiveSelfTime,
    RemoveUnnecessarySelfTimeNodes,
    RemoveIrrelevantNodes,
    RemoveFirstProfilerFrames,
    RemoveUselessGroups,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorCategory {
    Normal,
    Advanced,
}

/// A typed description of one option a processor reads, for building
/// configuration UIs.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionSpec {
    pub key: &'static str,
    pub label: &'static str,
    pub value: OptionValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Text {
        default: &'static str,
    },
    Number {
        default: f64,
        min: Option<f64>,
        max: Option<f64>,
        slider_min: Option<f64>,
        slider_max: Option<f64>,
        slider_logarithmic: bool,
    },
    Toggle {
        default: bool,
    },
}

impl Processor {
    pub fn name(self) -> &'static str {
        match self {
            Self::RemoveImportlib => "remove_importlib",
            Self::RemoveTracebackHide => "remove_tracebackhide",
            Self::AggregateRepeatedCalls => "aggregate_repeated_calls",
            Self::GroupLibraryFrames => "group_library_frames",
            Self::MergeConsecutiveSelfTime => "merge_consecutive_self_time",
            Self::RemoveUnnecessarySelfTimeNodes => "remove_unnecessary_self_time_nodes",
            Self::RemoveIrrelevantNodes => "remove_irrelevant_nodes",
            Self::RemoveFirstProfilerFrames => "remove_first_profiler_frames",
            Self::RemoveUselessGroups => "remove_useless_groups",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::RemoveImportlib => {
                "Removes <frozen importlib._bootstrap frames that clutter the output."
            }
            Self::RemoveTracebackHide => {
                "Removes frames that have set a local __traceback_hide__, to remove \
                 them from the output."
            }
            Self::AggregateRepeatedCalls => {
                "Converts a timeline into a time-aggregate summary. Adds together calls \
                 along the same call stack, so that repeated calls appear as the same \
                 frame. Removes time-linearity - frames are sorted according to total \
                 time spent."
            }
            Self::GroupLibraryFrames => "Groups frames that should be hidden.",
            Self::MergeConsecutiveSelfTime => "Combines consecutive 'self time' frames.",
            Self::RemoveUnnecessarySelfTimeNodes => "Removes unnecessary self-time nodes.",
            Self::RemoveIrrelevantNodes => {
                "Removes nodes that represent less than a certain percentage of the output."
            }
            Self::RemoveFirstProfilerFrames => {
                "Removes the initial frames specific to command line use of the profiler."
            }
            Self::RemoveUselessGroups => {
                "Dissolves groups too small to be worth collapsing."
            }
        }
    }

    pub fn category(self) -> ProcessorCategory {
        match self {
            Self::RemoveImportlib
            | Self::AggregateRepeatedCalls
            | Self::GroupLibraryFrames
            | Self::RemoveIrrelevantNodes => ProcessorCategory::Normal,
            Self::RemoveTracebackHide
            | Self::MergeConsecutiveSelfTime
            | Self::RemoveUnnecessarySelfTimeNodes
            | Self::RemoveFirstProfilerFrames
            | Self::RemoveUselessGroups => ProcessorCategory::Advanced,
        }
    }

    pub fn options_spec(self) -> Vec<OptionSpec> {
        match self {
            Self::GroupLibraryFrames => vec![
                OptionSpec {
                    key: "hide_regex",
                    label: "Hide regex",
                    value: OptionValue::Text { default: "" },
                },
                OptionSpec {
                    key: "show_regex",
                    label: "Show regex",
                    value: OptionValue::Text { default: "" },
                },
            ],
            Self::RemoveIrrelevantNodes => vec![OptionSpec {
                key: "filter_threshold",
                label: "Filter threshold",
                value: OptionValue::Number {
                    default: 0.01,
                    min: Some(0.0),
                    max: Some(1.0),
                    slider_min: Some(0.0001),
                    slider_max: Some(1.0),
                    slider_logarithmic: true,
                },
            }],
            _ => Vec::new(),
        }
    }

    /// Runs this processor over the tree rooted at `root`. Returns the new
    /// root, or `None` if the whole subtree was discarded.
    pub fn apply(
        self,
        tree: &mut FrameTree,
        root: FrameId,
        ctx: &dyn FrameContext,
        options: &ProcessorOptions,
    ) -> Result<Option<FrameId>, FrameTreeError> {
        match self {
            Self::RemoveImportlib => filters::remove_importlib(tree, root).map(Some),
            Self::RemoveTracebackHide => filters::remove_tracebackhide(tree, root).map(Some),
            Self::AggregateRepeatedCalls => {
                aggregate::aggregate_repeated_calls(tree, root).map(Some)
            }
            Self::GroupLibraryFrames => {
                grouping::group_library_frames(tree, root, ctx, options).map(Some)
            }
            Self::MergeConsecutiveSelfTime => {
                self_time::merge_consecutive_self_time(tree, root, true);
                Ok(Some(root))
            }
            Self::RemoveUnnecessarySelfTimeNodes => {
                self_time::remove_unnecessary_self_time_nodes(tree, root).map(Some)
            }
            Self::RemoveIrrelevantNodes => {
                filters::remove_irrelevant_nodes(tree, root, options).map(Some)
            }
            Self::RemoveFirstProfilerFrames => {
                Ok(Some(entry_trim::remove_first_profiler_frames(
                    tree,
                    root,
                    &options.entry_frame_markers,
                )))
            }
            Self::RemoveUselessGroups => {
                grouping::remove_useless_groups(tree, root).map(Some)
            }
        }
    }
}

/// Validated options, ready for processors to read.
#[derive(Debug)]
pub struct ProcessorOptions {
    pub filter_threshold: f64,
    pub hide_regex: Option<Regex>,
    pub show_regex: Option<Regex>,
    pub entry_frame_markers: EntryFrameMarkers,
}

impl ProcessorOptions {
    pub fn new() -> Self {
        Self {
            filter_threshold: 0.01,
            hide_regex: None,
            show_regex: None,
            entry_frame_markers: EntryFrameMarkers::default(),
        }
    }
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("invalid {key} pattern: {source}")]
    InvalidRegex {
        key: &'static str,
        #[source]
        source: regex::Error,
    },
}

/// The stringly configuration form of [`ProcessorOptions`], as read from a
/// config file or query string. Empty regex strings mean "unset".
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProcessorOptionsConfig {
    pub filter_threshold: Option<f64>,
    pub hide_regex: Option<String>,
    pub show_regex: Option<String>,
    pub entry_frame_markers: Option<EntryFrameMarkers>,
}

impl ProcessorOptionsConfig {
    pub fn build(self) -> Result<ProcessorOptions, OptionsError> {
        let compile = |key: &'static str, pattern: Option<String>| {
            match pattern.as_deref() {
                None | Some("") => Ok(None),
                Some(pattern) => Regex::new(pattern)
                    .map(Some)
                    .map_err(|source| OptionsError::InvalidRegex { key, source }),
            }
        };

        Ok(ProcessorOptions {
            filter_threshold: self.filter_threshold.unwrap_or(0.01).clamp(0.0, 1.0),
            hide_regex: compile("hide_regex", self.hide_regex)?,
            show_regex: compile("show_regex", self.show_regex)?,
            entry_frame_markers: self.entry_frame_markers.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_regex_strings_are_unset() {
        let config = ProcessorOptionsConfig {
            hide_regex: Some(String::new()),
            show_regex: None,
            ..Default::default()
        };
        let options = config.build().expect("valid config");
        assert!(options.hide_regex.is_none());
        assert!(options.show_regex.is_none());
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let config = ProcessorOptionsConfig {
            hide_regex: Some("[unclosed".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            config.build(),
            Err(OptionsError::InvalidRegex { key: "hide_regex", .. })
        ));
    }

    #[test]
    fn threshold_clamps_to_unit_range() {
        let config = ProcessorOptionsConfig {
            filter_threshold: Some(3.0),
            ..Default::default()
        };
        let options = config.build().expect("valid config");
        assert!((options.filter_threshold - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn names_are_stable() {
        assert_eq!(Processor::RemoveImportlib.name(), "remove_importlib");
        assert_eq!(
            Processor::AggregateRepeatedCalls.category(),
            ProcessorCategory::Normal
        );
        assert_eq!(
            Processor::RemoveUselessGroups.category(),
            ProcessorCategory::Advanced
        );
        assert_eq!(Processor::RemoveIrrelevantNodes.options_spec().len(), 1);
    }
}
