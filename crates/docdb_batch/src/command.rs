//! Batch commands and their JSON form.

use crate::error::{BatchError, BatchResult};
use docdb_storage::{Etag, PatchRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Wire name of a command kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandType {
    /// Document insert or replace.
    #[serde(rename = "PUT")]
    Put,
    /// Scripted patch.
    #[serde(rename = "PATCH")]
    Patch,
    /// Single or prefix delete.
    #[serde(rename = "DELETE")]
    Delete,
    /// Attachment upload.
    #[serde(rename = "AttachmentPUT")]
    AttachmentPut,
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandType::Put => "PUT",
            CommandType::Patch => "PATCH",
            CommandType::Delete => "DELETE",
            CommandType::AttachmentPut => "AttachmentPUT",
        };
        f.write_str(name)
    }
}

/// A single mutation inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Insert or replace a document.
    Put {
        /// Document key. Empty or ending in `/` asks for a generated key.
        key: String,
        /// Expected current etag.
        etag: Option<Etag>,
        /// Document body.
        document: Value,
    },
    /// Patch a document.
    Patch {
        /// Document key.
        key: String,
        /// Expected current etag.
        etag: Option<Etag>,
        /// Patch applied to an existing document.
        patch: PatchRequest,
        /// Patch applied to an empty document when the key is missing.
        patch_if_missing: Option<PatchRequest>,
        /// Fail the batch when the document is missing.
        require_document: bool,
    },
    /// Delete a single document.
    Delete {
        /// Document key.
        key: String,
        /// Expected current etag.
        etag: Option<Etag>,
    },
    /// Delete every document whose key starts with a prefix.
    DeletePrefix {
        /// Key prefix.
        prefix: String,
    },
    /// Store the next staged attachment stream on a document.
    AttachmentPut {
        /// Owning document key.
        key: String,
        /// Attachment name.
        name: String,
        /// MIME content type.
        content_type: String,
        /// Expected etag of an existing attachment with this name.
        etag: Option<Etag>,
    },
}

impl Command {
    /// Creates a put without an etag precondition.
    pub fn put(key: impl Into<String>, document: Value) -> Self {
        Command::Put {
            key: key.into(),
            etag: None,
            document,
        }
    }

    /// Creates a patch without a fallback.
    pub fn patch(key: impl Into<String>, patch: PatchRequest) -> Self {
        Command::Patch {
            key: key.into(),
            etag: None,
            patch,
            patch_if_missing: None,
            require_document: false,
        }
    }

    /// Creates a delete without an etag precondition.
    pub fn delete(key: impl Into<String>) -> Self {
        Command::Delete {
            key: key.into(),
            etag: None,
        }
    }

    /// Creates a prefix delete.
    pub fn delete_prefix(prefix: impl Into<String>) -> Self {
        Command::DeletePrefix {
            prefix: prefix.into(),
        }
    }

    /// Creates an attachment put.
    pub fn attachment_put(
        key: impl Into<String>,
        name: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Command::AttachmentPut {
            key: key.into(),
            name: name.into(),
            content_type: content_type.into(),
            etag: None,
        }
    }

    /// Sets the expected etag. No effect on prefix deletes.
    #[must_use]
    pub fn with_etag(mut self, expected: Etag) -> Self {
        match &mut self {
            Command::Put { etag, .. }
            | Command::Patch { etag, .. }
            | Command::Delete { etag, .. }
            | Command::AttachmentPut { etag, .. } => *etag = Some(expected),
            Command::DeletePrefix { .. } => {}
        }
        self
    }

    /// Returns the wire type.
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Put { .. } => CommandType::Put,
            Command::Patch { .. } => CommandType::Patch,
            Command::Delete { .. } | Command::DeletePrefix { .. } => CommandType::Delete,
            Command::AttachmentPut { .. } => CommandType::AttachmentPut,
        }
    }

    /// Returns the document key, or the prefix for prefix deletes.
    pub fn key(&self) -> &str {
        match self {
            Command::Put { key, .. }
            | Command::Patch { key, .. }
            | Command::Delete { key, .. }
            | Command::AttachmentPut { key, .. } => key,
            Command::DeletePrefix { prefix } => prefix,
        }
    }

    /// Returns true if the command consumes a staged attachment stream.
    pub fn needs_attachment_stream(&self) -> bool {
        matches!(self, Command::AttachmentPut { .. })
    }
}

/// JSON shape of a command as sent by clients.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawCommand {
    #[serde(rename = "Type")]
    kind: CommandType,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    etag: Option<Etag>,
    #[serde(default)]
    document: Option<Value>,
    #[serde(default)]
    patch: Option<PatchRequest>,
    #[serde(default)]
    patch_if_missing: Option<PatchRequest>,
    #[serde(default)]
    require_document: bool,
    #[serde(default)]
    key_prefixed: bool,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
}

fn required_key(key: Option<String>, kind: CommandType) -> BatchResult<String> {
    match key {
        Some(key) if !key.is_empty() => Ok(key),
        _ => Err(BatchError::malformed(format!("{kind} command requires a 'Key'"))),
    }
}

impl TryFrom<RawCommand> for Command {
    type Error = BatchError;

    fn try_from(raw: RawCommand) -> BatchResult<Self> {
        let kind = raw.kind;
        match kind {
            CommandType::Put => {
                let document = match raw.document {
                    Some(doc @ Value::Object(_)) => doc,
                    Some(_) => {
                        return Err(BatchError::malformed(
                            "PUT command 'Document' must be a JSON object",
                        ))
                    }
                    None => return Err(BatchError::malformed("PUT command requires a 'Document'")),
                };
                Ok(Command::Put {
                    key: raw.key.unwrap_or_default(),
                    etag: raw.etag,
                    document,
                })
            }
            CommandType::Patch => {
                let key = required_key(raw.key, kind)?;
                let patch = raw
                    .patch
                    .ok_or_else(|| BatchError::malformed("PATCH command requires a 'Patch'"))?;
                Ok(Command::Patch {
                    key,
                    etag: raw.etag,
                    patch,
                    patch_if_missing: raw.patch_if_missing,
                    require_document: raw.require_document,
                })
            }
            CommandType::Delete if raw.key_prefixed => Ok(Command::DeletePrefix {
                prefix: required_key(raw.key, kind)?,
            }),
            CommandType::Delete => Ok(Command::Delete {
                key: required_key(raw.key, kind)?,
                etag: raw.etag,
            }),
            CommandType::AttachmentPut => {
                let key = required_key(raw.key, kind)?;
                let name = match raw.name {
                    Some(name) if !name.is_empty() => name,
                    _ => {
                        return Err(BatchError::malformed(
                            "AttachmentPUT command requires a 'Name'",
                        ))
                    }
                };
                Ok(Command::AttachmentPut {
                    key,
                    name,
                    content_type: raw.content_type.unwrap_or_default(),
                    etag: raw.etag,
                })
            }
        }
    }
}

/// Parses a JSON command list.
///
/// Accepts either a bare array of commands or an object with a
/// `Commands` array.
pub fn parse_commands(body: &[u8]) -> BatchResult<Vec<Command>> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| BatchError::malformed(format!("invalid JSON: {e}")))?;
    parse_command_value(value)
}

/// Parses commands from an already decoded JSON value.
pub fn parse_command_value(value: Value) -> BatchResult<Vec<Command>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("Commands") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(BatchError::malformed(
                    "expected a 'Commands' array in the request body",
                ))
            }
        },
        _ => return Err(BatchError::malformed("expected an array of commands")),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let raw: RawCommand = serde_json::from_value(item)
                .map_err(|e| BatchError::malformed(format!("command #{i}: {e}")))?;
            Command::try_from(raw)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> BatchResult<Vec<Command>> {
        parse_commands(value.to_string().as_bytes())
    }

    #[test]
    fn parse_mixed_batch() {
        let commands = parse(json!([
            {"Type": "PUT", "Key": "users/1", "Etag": null, "Document": {"name": "A"}},
            {"Type": "PATCH", "Key": "users/1", "Etag": 4, "Patch": {"Script": {"age": 3}}},
            {"Type": "DELETE", "Key": "users/2"},
            {"Type": "DELETE", "Key": "users/", "KeyPrefixed": true},
            {"Type": "AttachmentPUT", "Key": "users/1", "Name": "photo", "ContentType": "image/png"}
        ]))
        .unwrap();

        assert_eq!(commands.len(), 5);
        assert_eq!(commands[0], Command::put("users/1", json!({"name": "A"})));
        assert!(matches!(
            &commands[1],
            Command::Patch { etag: Some(e), require_document: false, .. } if *e == Etag::new(4)
        ));
        assert_eq!(commands[2], Command::delete("users/2"));
        assert_eq!(commands[3], Command::delete_prefix("users/"));
        assert_eq!(
            commands[4],
            Command::attachment_put("users/1", "photo", "image/png")
        );
    }

    #[test]
    fn parse_wrapped_body() {
        let commands = parse(json!({
            "Commands": [{"Type": "DELETE", "Key": "a"}]
        }))
        .unwrap();
        assert_eq!(commands, vec![Command::delete("a")]);
    }

    #[test]
    fn patch_with_fallback() {
        let commands = parse(json!([{
            "Type": "PATCH",
            "Key": "a",
            "Patch": {"Script": {"x": 1}},
            "PatchIfMissing": {"Script": {"x": 0}},
            "RequireDocument": true
        }]))
        .unwrap();
        match &commands[0] {
            Command::Patch {
                patch_if_missing,
                require_document,
                ..
            } => {
                assert!(patch_if_missing.is_some());
                assert!(*require_document);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn put_without_key_is_allowed() {
        let commands = parse(json!([{"Type": "PUT", "Document": {}}])).unwrap();
        assert_eq!(commands[0].key(), "");
    }

    #[test]
    fn malformed_commands() {
        let cases = [
            json!({"Type": "PUT"}),
            json!([{"Type": "PUT", "Key": "a"}]),
            json!([{"Type": "PUT", "Key": "a", "Document": [1]}]),
            json!([{"Type": "PATCH", "Key": "a"}]),
            json!([{"Type": "DELETE"}]),
            json!([{"Type": "AttachmentPUT", "Key": "a"}]),
            json!([{"Type": "COUNTERS", "Key": "a"}]),
            json!([{"Type": "PUT", "Key": "a", "Etag": "abc", "Document": {}}]),
            json!("nope"),
        ];
        for case in cases {
            let err = parse(case.clone()).unwrap_err();
            assert!(
                matches!(err, BatchError::MalformedInput(_)),
                "expected malformed input for {case}"
            );
        }
    }

    #[test]
    fn error_names_command_index() {
        let err = parse(json!([
            {"Type": "DELETE", "Key": "a"},
            {"Type": "BOGUS"}
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("command #1"));
    }

    #[test]
    fn invalid_json() {
        assert!(matches!(
            parse_commands(b"[{").unwrap_err(),
            BatchError::MalformedInput(_)
        ));
    }

    #[test]
    fn with_etag_sets_precondition() {
        let cmd = Command::delete("a").with_etag(Etag::new(3));
        assert_eq!(
            cmd,
            Command::Delete {
                key: "a".into(),
                etag: Some(Etag::new(3))
            }
        );
        assert_eq!(cmd.command_type(), CommandType::Delete);
        assert_eq!(CommandType::AttachmentPut.to_string(), "AttachmentPUT");
    }
}
