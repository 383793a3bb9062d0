//! JSON I/O for the CLI
//!
//! Requests are one JSON document read from a file or stdin. Responses are a
//! single JSON object on stdout.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::errors::{CliError, CliResult};

/// Reads a request document from `path`, or stdin when absent.
pub fn read_request<T: DeserializeOwned>(path: Option<&Path>) -> CliResult<T> {
    let content = match path {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            io::stdin().lock().read_to_string(&mut buf)?;
            buf
        }
    };
    if content.trim().is_empty() {
        return Err(CliError::EmptyInput);
    }
    Ok(serde_json::from_str(&content)?)
}

fn write_line(response: &Value) -> CliResult<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, response)?;
    writeln!(stdout)?;
    stdout.flush()?;
    Ok(())
}

pub fn write_response(data: Value) -> CliResult<()> {
    write_line(&serde_json::json!({
        "status": "ok",
        "data": data
    }))
}

pub fn write_error(code: &str, message: &str) -> CliResult<()> {
    write_line(&serde_json::json!({
        "status": "error",
        "code": code,
        "message": message
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryRequest;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_request_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"filter": {{"acc_type": {{"eq": 1}}}}, "limit": 5}}"#).unwrap();
        let request: QueryRequest = read_request(Some(file.path())).unwrap();
        assert_eq!(request.limit, Some(5));
        assert_eq!(request.filter["acc_type"]["eq"], 1);
    }

    #[test]
    fn test_blank_request_is_rejected() {
        let file = NamedTempFile::new().unwrap();
        let err = read_request::<QueryRequest>(Some(file.path())).unwrap_err();
        assert!(matches!(err, CliError::EmptyInput));
    }
}
