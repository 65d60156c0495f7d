//! Property-based test generators using proptest.

use proptest::prelude::*;
use syncobj_applicators::{ArrayCommand, TextCommand};

/// Strategy for short row payloads.
pub fn row_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,6}").expect("Invalid regex")
}

/// Strategy for array commands over string rows, including out-of-range
/// indices.
pub fn array_command_strategy() -> impl Strategy<Value = ArrayCommand<String>> {
    prop_oneof![
        3 => row_strategy().prop_map(ArrayCommand::push),
        2 => (0usize..8, row_strategy()).prop_map(|(i, row)| ArrayCommand::insert(i, row)),
        1 => Just(ArrayCommand::pop()),
        2 => (0usize..8).prop_map(ArrayCommand::remove),
        2 => (0usize..8, row_strategy()).prop_map(|(i, row)| ArrayCommand::set(i, row)),
    ]
}

/// Strategy for text commands, including indices past the end.
pub fn text_command_strategy() -> impl Strategy<Value = TextCommand> {
    prop_oneof![
        3 => (0usize..24, "[a-zé ]{1,4}").prop_map(|(i, text)| TextCommand::insert(i, text)),
        1 => (0usize..24, 1usize..4).prop_map(|(i, n)| TextCommand::delete(i, n)),
        1 => (0usize..24, 0usize..3, "[A-Z]{0,3}")
            .prop_map(|(i, n, text)| TextCommand::replace(i, n, text)),
    ]
}

/// Strategy for a script of `(client index, command)` steps.
pub fn script_strategy<T: std::fmt::Debug>(
    clients: usize,
    command: impl Strategy<Value = T>,
    max_len: usize,
) -> impl Strategy<Value = Vec<(usize, T)>> {
    prop::collection::vec((0..clients, command), 0..max_len)
}
