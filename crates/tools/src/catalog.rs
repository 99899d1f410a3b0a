//! The closed set of tools this crate knows how to interpret.
//!
//! The registry stays open (any name can be registered), but turning a
//! stored output back into something meaningful is an explicit match over
//! [`ToolKind`].

use std::fmt;

use toolrelay_common::{ToolRelayError, ValidatedOutput};

use crate::handlers::add_numbers::{self, AddNumbersOutput};
use crate::handlers::make_note::{self, MakeNoteOutput};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ToolKind {
    AddNumbers,
    MakeNote,
}

impl ToolKind {
    pub const ALL: [ToolKind; 2] = [ToolKind::AddNumbers, ToolKind::MakeNote];

    pub fn name(self) -> &'static str {
        match self {
            Self::AddNumbers => add_numbers::NAME,
            Self::MakeNote => make_note::NAME,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A stored tool output, decoded into the tool's typed result.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolOutcome {
    AddNumbers(AddNumbersOutput),
    MakeNote(MakeNoteOutput),
}

impl ToolOutcome {
    pub fn decode(kind: ToolKind, output: &ValidatedOutput) -> Result<Self, ToolRelayError> {
        let outcome = match kind {
            ToolKind::AddNumbers => Self::AddNumbers(output.deserialize()?),
            ToolKind::MakeNote => Self::MakeNote(output.deserialize()?),
        };
        Ok(outcome)
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            Self::AddNumbers(_) => ToolKind::AddNumbers,
            Self::MakeNote(_) => ToolKind::MakeNote,
        }
    }

    /// One-line, human-readable rendering of the result.
    pub fn summary(&self) -> String {
        match self {
            Self::AddNumbers(o) => format!(
                "The sum of {} and {} is {}.",
                o.input.a, o.input.b, o.output
            ),
            Self::MakeNote(o) => {
                if o.confirmation {
                    format!("Note stored: \"{}\"", o.input.content)
                } else {
                    "The note could not be confirmed.".to_string()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ToolKind::from_name("delete_everything"), None);
    }

    #[test]
    fn test_decode_add_numbers() {
        let output = add_numbers::output_schema()
            .parse_output(&json!({"input": {"a": 3, "b": 5}, "output": 8}))
            .unwrap();
        let outcome = ToolOutcome::decode(ToolKind::AddNumbers, &output).unwrap();
        assert_eq!(outcome.kind(), ToolKind::AddNumbers);
        assert_eq!(outcome.summary(), "The sum of 3 and 5 is 8.");
    }

    #[test]
    fn test_decode_make_note() {
        let output = make_note::output_schema()
            .parse_output(&json!({"input": {"content": "call mom"}, "confirmation": true}))
            .unwrap();
        let outcome = ToolOutcome::decode(ToolKind::MakeNote, &output).unwrap();
        assert_eq!(outcome.summary(), "Note stored: \"call mom\"");
    }

    #[test]
    fn test_decode_with_wrong_kind_fails() {
        let output = make_note::output_schema()
            .parse_output(&json!({"input": {"content": "call mom"}, "confirmation": true}))
            .unwrap();
        assert!(ToolOutcome::decode(ToolKind::AddNumbers, &output).is_err());
    }
}
