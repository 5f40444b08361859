use crate::ConvertError;
use crate::Result;

/// Converts a `u64` to an 8-byte array in big-endian byte order.
///
/// Big-endian keeps the lexicographic order of sled keys equal to numeric order.
pub const fn safe_kv(num: u64) -> [u8; 8] {
    num.to_be_bytes()
}

pub fn safe_vk<K: AsRef<[u8]>>(bytes: K) -> Result<u64> {
    let bytes = bytes.as_ref();
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| ConvertError::InvalidLength(bytes.len()))?;
    Ok(u64::from_be_bytes(array))
}
