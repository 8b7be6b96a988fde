use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Serialize to deterministic bincode bytes (signing and hashing input)
pub fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    bincode::serialize(value).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Deserialize from bincode bytes
pub fn from_bytes<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, CoreError> {
    bincode::deserialize(bytes).map_err(|e| CoreError::Deserialization(e.to_string()))
}

/// Serialize to a single JSON line, newline terminated (deliver stream framing)
pub fn to_json_line<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    let mut line = serde_json::to_vec(value).map_err(|e| CoreError::Serialization(e.to_string()))?;
    line.push(b'\n');
    Ok(line)
}

/// Deserialize from JSON bytes
pub fn from_json_bytes<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, CoreError> {
    serde_json::from_slice(bytes).map_err(|e| CoreError::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SeekContent, SeekInfo, SeekPosition};

    #[test]
    fn test_bincode_is_deterministic() {
        let seek = SeekInfo::from_position(SeekPosition::Specified(42), SeekContent::Block);

        let bytes1 = to_bytes(&seek).unwrap();
        let bytes2 = to_bytes(&seek).unwrap();
        assert_eq!(bytes1, bytes2);

        let recovered: SeekInfo = from_bytes(&bytes1).unwrap();
        assert_eq!(recovered, seek);
    }

    #[test]
    fn test_json_line_is_newline_terminated() {
        let seek = SeekInfo::from_position(SeekPosition::Oldest, SeekContent::HeaderWithSig);
        let line = to_json_line(&seek).unwrap();

        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);

        let recovered: SeekInfo = from_json_bytes(&line[..line.len() - 1]).unwrap();
        assert_eq!(recovered, seek);
    }

    #[test]
    fn test_truncated_bytes_rejected() {
        let seek = SeekInfo::from_position(SeekPosition::Specified(7), SeekContent::Block);
        let bytes = to_bytes(&seek).unwrap();

        let result: Result<SeekInfo, _> = from_bytes(&bytes[..2]);
        assert!(matches!(result, Err(CoreError::Deserialization(_))));
    }
}
