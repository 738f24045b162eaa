//! ABI word encoding
//!
//! Hand-rolled encoding for the few tuples the ledger consumes. Every value
//! occupies one 32-byte word; dynamic arrays are referenced by offset from
//! the start of the tuple.

use xlayer_core::Hash;

/// ABI word size
pub const WORD: usize = 32;

/// ABI decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbiError {
    /// Input ends before the value
    #[error("data too short: need {needed} bytes at offset {offset}, have {len}")]
    TooShort {
        /// Read offset
        offset: usize,
        /// Bytes needed
        needed: usize,
        /// Input length
        len: usize,
    },
    /// Word does not fit in a u64
    #[error("value at offset {0} does not fit in u64")]
    ValueTooLarge(usize),
}

/// Left-pad a u64 into a word
pub fn encode_u64(value: u64) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[24..32].copy_from_slice(&value.to_be_bytes());
    word
}

/// Read the word at `offset`
pub fn read_word(data: &[u8], offset: usize) -> Result<[u8; WORD], AbiError> {
    let end = offset.checked_add(WORD).ok_or(AbiError::TooShort {
        offset,
        needed: WORD,
        len: data.len(),
    })?;
    let slice = data.get(offset..end).ok_or(AbiError::TooShort {
        offset,
        needed: WORD,
        len: data.len(),
    })?;
    let mut word = [0u8; WORD];
    word.copy_from_slice(slice);
    Ok(word)
}

/// Read the word at `offset` as a u64
pub fn read_u64(data: &[u8], offset: usize) -> Result<u64, AbiError> {
    let word = read_word(data, offset)?;
    if word[..24].iter().any(|b| *b != 0) {
        return Err(AbiError::ValueTooLarge(offset));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&word[24..32]);
    Ok(u64::from_be_bytes(bytes))
}

/// Encode a tuple of `bytes32[]` arrays
pub fn encode_hash_arrays(arrays: &[&[Hash]]) -> Vec<u8> {
    let head_len = arrays.len() * WORD;
    let tail_len: usize = arrays.iter().map(|a| WORD + a.len() * WORD).sum();
    let mut out = Vec::with_capacity(head_len + tail_len);

    let mut offset = head_len as u64;
    for array in arrays {
        out.extend_from_slice(&encode_u64(offset));
        offset += (WORD + array.len() * WORD) as u64;
    }
    for array in arrays {
        out.extend_from_slice(&encode_u64(array.len() as u64));
        for hash in *array {
            out.extend_from_slice(hash);
        }
    }
    out
}

/// Decode a tuple of `count` `bytes32[]` arrays
pub fn decode_hash_arrays(data: &[u8], count: usize) -> Result<Vec<Vec<Hash>>, AbiError> {
    let mut arrays = Vec::with_capacity(count);
    for i in 0..count {
        let offset = usize::try_from(read_u64(data, i * WORD)?).map_err(|_| AbiError::ValueTooLarge(i * WORD))?;
        let len = usize::try_from(read_u64(data, offset)?).map_err(|_| AbiError::ValueTooLarge(offset))?;
        let needed = len.checked_mul(WORD).ok_or(AbiError::ValueTooLarge(offset))?;
        let start = offset + WORD;
        if data.len() < start || data.len() - start < needed {
            return Err(AbiError::TooShort {
                offset: start,
                needed,
                len: data.len(),
            });
        }
        let mut array = Vec::with_capacity(len);
        for j in 0..len {
            array.push(read_word(data, start + j * WORD)?);
        }
        arrays.push(array);
    }
    Ok(arrays)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u64_word() {
        let word = encode_u64(0x1234);
        assert_eq!(word[30], 0x12);
        assert_eq!(word[31], 0x34);
        assert_eq!(read_u64(&word, 0).unwrap(), 0x1234);
    }

    #[test]
    fn test_read_u64_rejects_wide_values() {
        let mut word = [0u8; WORD];
        word[0] = 1;
        assert_eq!(read_u64(&word, 0), Err(AbiError::ValueTooLarge(0)));
    }

    #[test]
    fn test_layout_of_two_arrays() {
        let a = [[1u8; 32], [2u8; 32]];
        let b = [[3u8; 32]];
        let data = encode_hash_arrays(&[&a[..], &b[..]]);
        // head (2 words) + a (len + 2) + b (len + 1)
        assert_eq!(data.len(), 7 * WORD);
        assert_eq!(read_u64(&data, 0).unwrap(), 64);
        assert_eq!(read_u64(&data, WORD).unwrap(), 64 + 3 * 32);
        let decoded = decode_hash_arrays(&data, 2).unwrap();
        assert_eq!(decoded, vec![a.to_vec(), b.to_vec()]);
    }

    #[test]
    fn test_truncated_input() {
        let data = encode_hash_arrays(&[&[[1u8; 32]][..]]);
        assert!(matches!(
            decode_hash_arrays(&data[..data.len() - 1], 1),
            Err(AbiError::TooShort { .. })
        ));
    }
}
