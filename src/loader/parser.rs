use serde::de::DeserializeOwned;
use std::fs;

use crate::error::Result;

/// Reads a JSON document (config, scenario or inventory) from `file_path`.
///
/// An unreadable file is an `Error::IoError`; malformed JSON or a document of the
/// wrong shape is an `Error::DeserializationError`.
pub fn parse_json_file<T: DeserializeOwned>(file_path: &str) -> Result<T> {
    let data = fs::read_to_string(file_path)?;
    log::debug!("Read {} bytes from '{}'", data.len(), file_path);
    parse_json_str(&data)
}

pub fn parse_json_str<T: DeserializeOwned>(data: &str) -> Result<T> {
    Ok(serde_json::from_str(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::config_dto::FerryConfigDto;
    use crate::error::Error;

    #[test]
    fn test_missing_file_is_io_error() {
        let result: Result<FerryConfigDto> = parse_json_file("does/not/exist.json");
        assert!(matches!(result, Err(Error::IoError(_))));
    }

    #[test]
    fn test_wrong_shape_is_deserialization_error() {
        let result: Result<FerryConfigDto> = parse_json_str(r#"{"src": {"host": "a"}}"#);
        assert!(matches!(result, Err(Error::DeserializationError(_))));
    }
}
