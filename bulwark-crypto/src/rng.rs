//! CSPRNG access.

use getrandom::getrandom;

use crate::error::PrimitiveError;

/// Draw `n` bytes from the operating system CSPRNG.
pub fn random_bytes(n: usize) -> Result<Vec<u8>, PrimitiveError> {
    let mut buf = vec![0u8; n];
    getrandom(&mut buf).map_err(|_| PrimitiveError::RngFailure)?;
    Ok(buf)
}

/// Fixed-size variant of [`random_bytes`].
pub fn random_array<const N: usize>() -> Result<[u8; N], PrimitiveError> {
    let mut buf = [0u8; N];
    getrandom(&mut buf).map_err(|_| PrimitiveError::RngFailure)?;
    Ok(buf)
}
