//! Text applicator.

use serde::{Deserialize, Serialize};
use syncobj_protocol::Applicator;

/// A splice against a text: delete `to_delete` characters at `index`, then
/// insert `text` there.
///
/// Positions count Unicode scalar values. A missing `index` addresses the
/// end of the text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextCommand {
    /// Text to insert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Splice position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// Number of characters removed at `index`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_delete: Option<usize>,
}

impl TextCommand {
    /// Inserts `text` at `index`.
    pub fn insert(index: usize, text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            index: Some(index),
            to_delete: None,
        }
    }

    /// Deletes `count` characters at `index`.
    pub fn delete(index: usize, count: usize) -> Self {
        Self {
            text: None,
            index: Some(index),
            to_delete: Some(count),
        }
    }

    /// Replaces `count` characters at `index` with `text`.
    pub fn replace(index: usize, count: usize, text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            index: Some(index),
            to_delete: Some(count),
        }
    }

    fn inserted(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    fn inserted_len(&self) -> usize {
        self.inserted().chars().count()
    }

    fn deleted(&self) -> usize {
        self.to_delete.unwrap_or(0)
    }
}

/// Applies [`TextCommand`]s to a `String`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextApplicator;

impl TextApplicator {
    /// Creates a new text applicator.
    pub fn new() -> Self {
        Self
    }
}

impl Applicator for TextApplicator {
    type State = String;
    type Command = TextCommand;

    fn apply(&self, state: Option<String>, commands: &[TextCommand]) -> String {
        let mut data = state.unwrap_or_default();
        for command in commands {
            let start = match command.index {
                Some(index) => byte_offset(&data, index),
                None => data.len(),
            };
            let end = byte_offset(&data[start..], command.deleted()) + start;
            data.replace_range(start..end, command.inserted());
        }
        data
    }
}

/// Byte offset of the `chars`-th character, clamped to the end.
fn byte_offset(s: &str, chars: usize) -> usize {
    s.char_indices()
        .nth(chars)
        .map(|(offset, _)| offset)
        .unwrap_or(s.len())
}

/// Merges runs of contiguous commands into single splices.
///
/// A command continues the previous one when it starts right after the text
/// the previous one inserted. Applying the normalized list produces the same
/// text as applying the original one.
pub fn normalize(commands: &[TextCommand]) -> Vec<TextCommand> {
    let Some((first, rest)) = commands.split_first() else {
        return Vec::new();
    };

    let mut normalized = Vec::new();
    let mut current = first.clone();

    for command in rest {
        let contiguous = match (current.index, command.index) {
            (Some(prev), Some(next)) => next.checked_sub(current.inserted_len()) == Some(prev),
            _ => false,
        };

        if contiguous {
            current = TextCommand {
                text: Some(format!("{}{}", current.inserted(), command.inserted())),
                index: current.index,
                to_delete: Some(current.deleted() + command.deleted()),
            };
        } else {
            normalized.push(std::mem::replace(&mut current, command.clone()));
        }
    }

    normalized.push(current);
    normalized
}
