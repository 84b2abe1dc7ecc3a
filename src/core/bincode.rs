/*!
 * Binary Serialization with bincode
 * Compact encoding for checkpoint records of detached sockets
 */

use serde::{de::DeserializeOwned, Serialize};

/// Result type for bincode operations
pub type BincodeResult<T> = Result<T, BincodeError>;

/// Binary serialization errors
#[derive(Debug, thiserror::Error)]
pub enum BincodeError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

/// Serialize to binary bytes using bincode
#[inline]
pub fn to_vec<T: Serialize>(value: &T) -> BincodeResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| BincodeError::Serialization(e.to_string()))
}

/// Deserialize from binary bytes produced by [`to_vec`]
#[inline]
pub fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> BincodeResult<T> {
    bincode::deserialize(bytes).map_err(|e| BincodeError::Deserialization(e.to_string()))
}

/// Serialized size of a value without serializing it
#[inline]
pub fn serialized_size<T: Serialize>(value: &T) -> BincodeResult<u64> {
    bincode::serialized_size(value).map_err(|e| BincodeError::Serialization(e.to_string()))
}

/// Serialize with a 4-byte little-endian length prefix
///
/// Format: [4-byte length][bincode data]. Several records can be
/// concatenated into one checkpoint image and read back in order.
pub fn to_vec_with_size<T: Serialize>(value: &T) -> BincodeResult<Vec<u8>> {
    let data = to_vec(value)?;
    let len = u32::try_from(data.len())
        .map_err(|_| BincodeError::Serialization("record exceeds 4 GiB".to_string()))?;

    let mut result = Vec::with_capacity(4 + data.len());
    result.extend_from_slice(&len.to_le_bytes());
    result.extend_from_slice(&data);
    Ok(result)
}

/// Deserialize one size-prefixed record, returning it and the bytes consumed
pub fn from_slice_with_size<T: DeserializeOwned>(bytes: &[u8]) -> BincodeResult<(T, usize)> {
    let Some(prefix) = bytes.get(..4) else {
        return Err(BincodeError::Deserialization(
            "Buffer too small for size prefix".to_string(),
        ));
    };
    let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;

    let Some(data) = bytes.get(4..4 + len) else {
        return Err(BincodeError::Deserialization(format!(
            "Buffer too small: expected {} bytes, got {}",
            4 + len,
            bytes.len()
        )));
    };

    Ok((from_slice(data)?, 4 + len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Record {
        domain: i32,
        nonblocking: bool,
        path: Vec<u8>,
    }

    fn record(path: &[u8]) -> Record {
        Record {
            domain: 10,
            nonblocking: true,
            path: path.to_vec(),
        }
    }

    #[test]
    fn test_serialized_size_matches() {
        let value = record(b"/run/app.sock");
        let size = serialized_size(&value).unwrap();
        assert_eq!(size as usize, to_vec(&value).unwrap().len());
    }

    #[test]
    fn test_concatenated_records() {
        let mut image = to_vec_with_size(&record(b"a")).unwrap();
        image.extend(to_vec_with_size(&record(b"bb")).unwrap());

        let (first, used): (Record, usize) = from_slice_with_size(&image).unwrap();
        let (second, _): (Record, usize) = from_slice_with_size(&image[used..]).unwrap();
        assert_eq!(first.path, b"a");
        assert_eq!(second.path, b"bb");
    }

    #[test]
    fn test_truncated_input() {
        let result: BincodeResult<Record> = from_slice(&[0xFF, 0xFF]);
        assert!(result.is_err());

        let result: BincodeResult<(Record, usize)> = from_slice_with_size(&[0, 0]);
        assert!(result.is_err());

        let result: BincodeResult<(Record, usize)> = from_slice_with_size(&[100, 0, 0, 0, 1]);
        assert!(result.is_err());
    }
}
