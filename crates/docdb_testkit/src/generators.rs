//! Property-based test generators using proptest.
//!
//! Generated commands never carry etag preconditions, attachment puts or
//! collection metadata, so any generated batch is expected to commit.

use docdb_batch::Command;
use docdb_storage::PatchRequest;
use proptest::prelude::*;
use serde_json::{Map, Value};

/// Strategy for generating document keys from a small key space, so
/// batches revisit the same documents.
pub fn key_strategy() -> impl Strategy<Value = String> {
    (prop::sample::select(vec!["users", "orders", "items"]), 0u8..16)
        .prop_map(|(prefix, n)| format!("{prefix}/{n}"))
}

/// Strategy for generating collection names.
pub fn collection_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{0,11}").expect("Invalid regex")
}

fn field_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        "[a-z ]{0,16}".prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
    ]
}

fn fields_strategy() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map("[a-z]{1,6}", field_value_strategy(), 0..6)
        .prop_map(|fields| fields.into_iter().collect())
}

/// Strategy for generating document bodies, optionally tagged with a
/// collection.
pub fn document_strategy() -> impl Strategy<Value = Value> {
    (fields_strategy(), prop::option::of(collection_name_strategy())).prop_map(
        |(mut fields, collection)| {
            if let Some(collection) = collection {
                let mut metadata = Map::new();
                metadata.insert("@collection".to_string(), Value::from(collection));
                fields.insert("@metadata".to_string(), Value::Object(metadata));
            }
            Value::Object(fields)
        },
    )
}

/// Strategy for generating merge patches that never touch metadata.
pub fn patch_strategy() -> impl Strategy<Value = PatchRequest> {
    prop::collection::btree_map(
        "[a-z]{1,6}",
        prop_oneof![3 => field_value_strategy(), 1 => Just(Value::Null)],
        1..4,
    )
    .prop_map(|fields| PatchRequest::new(Value::Object(fields.into_iter().collect())))
}

/// Strategy for generating a single command.
pub fn command_strategy() -> impl Strategy<Value = Command> {
    prop_oneof![
        4 => (key_strategy(), fields_strategy())
            .prop_map(|(key, fields)| Command::put(key, Value::Object(fields))),
        2 => (key_strategy(), patch_strategy(), prop::option::of(patch_strategy())).prop_map(
            |(key, patch, fallback)| Command::Patch {
                key,
                etag: None,
                patch,
                patch_if_missing: fallback,
                require_document: false,
            }
        ),
        2 => key_strategy().prop_map(Command::delete),
        1 => prop::sample::select(vec!["users/", "orders/1", "items/"])
            .prop_map(Command::delete_prefix),
    ]
}

/// Strategy for generating a command list.
pub fn command_batch_strategy(
    min_commands: usize,
    max_commands: usize,
) -> impl Strategy<Value = Vec<Command>> {
    prop::collection::vec(command_strategy(), min_commands..max_commands)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn generated_commands_need_no_stream(command in command_strategy()) {
            prop_assert!(!command.needs_attachment_stream());
            prop_assert!(!command.key().is_empty());
        }

        #[test]
        fn documents_are_objects(document in document_strategy()) {
            prop_assert!(document.is_object());
        }

        #[test]
        fn collection_names_start_upper(name in collection_name_strategy()) {
            let first = name.chars().next();
            prop_assert!(first.map_or(false, |c| c.is_ascii_uppercase()));
        }
    }
}
