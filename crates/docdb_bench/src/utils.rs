//! Benchmark utilities.

use docdb_batch::Command;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Value};

/// Generate a random alphanumeric string of the specified length.
pub fn random_text(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate a document body with a payload of roughly `size` bytes.
pub fn random_document(size: usize) -> Value {
    json!({
        "payload": random_text(size),
        "score": rand::thread_rng().gen::<u32>(),
        "@metadata": {"@collection": "Bench"}
    })
}

/// Generate put commands for `count` distinct keys under `prefix`.
pub fn put_commands(prefix: &str, count: usize, payload_size: usize) -> Vec<Command> {
    (0..count)
        .map(|i| Command::put(format!("{prefix}/{i}"), random_document(payload_size)))
        .collect()
}

/// Generate a JSON command list body for `count` puts.
pub fn put_body(count: usize, payload_size: usize) -> Vec<u8> {
    let commands: Vec<Value> = (0..count)
        .map(|i| {
            json!({
                "Type": "PUT",
                "Key": format!("bench/{i}"),
                "Document": random_document(payload_size)
            })
        })
        .collect();
    Value::Array(commands).to_string().into_bytes()
}

/// Generate random attachment content.
pub fn random_bytes(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}
