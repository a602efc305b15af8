//! JSON input/output for CLI commands
//!
//! Responses go to stdout, errors to stderr, one JSON document each.

use std::io::{self, Write};

use serde::Serialize;
use serde_json::{json, Value};

use super::errors::{CliError, CliResult};

/// Write a JSON value to a writer, pretty-printed, newline-terminated
pub fn write_json<W: Write, T: Serialize + ?Sized>(writer: &mut W, value: &T) -> CliResult<()> {
    serde_json::to_writer_pretty(&mut *writer, value)
        .map_err(|e| CliError::io_error(format!("Failed to serialize response: {}", e)))?;
    writeln!(writer).map_err(|e| CliError::io_error(format!("Failed to write response: {}", e)))?;
    writer
        .flush()
        .map_err(|e| CliError::io_error(format!("Failed to flush output: {}", e)))
}

/// Write a successful response to stdout
pub fn write_response(response: Value) -> CliResult<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    write_json(&mut handle, &response)
}

/// Error document for a CLI error
pub fn error_document(err: &CliError) -> Value {
    json!({
        "error": {
            "code": err.code().as_str(),
            "kind": err.kind(),
            "message": err.message(),
        }
    })
}

/// Write an error to stderr
pub fn write_error(err: &CliError) -> CliResult<()> {
    let stderr = io::stderr();
    let mut handle = stderr.lock();
    write_json(&mut handle, &error_document(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_json_to_buffer() {
        let mut buf: Vec<u8> = Vec::new();
        write_json(&mut buf, &json!({"applied": ["a1"]})).unwrap();

        let text = String::from_utf8(buf).unwrap();
        assert!(text.ends_with('\n'));
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["applied"][0], "a1");
    }

    #[test]
    fn test_error_document() {
        let doc = error_document(&CliError::config_error("database is required"));
        assert_eq!(doc["error"]["code"], "CONFIG_ERROR");
        assert_eq!(doc["error"]["message"], "database is required");
    }
}
