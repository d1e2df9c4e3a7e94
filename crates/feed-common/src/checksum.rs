//! MD5 checksum utilities for SIP and AIP verification
//!
//! The repository records MD5 digests for every content file; checksums are
//! compared case-insensitively because provider manifests disagree on case.

use crate::error::{CommonError, Result};
use std::io::Read;
use std::path::Path;

/// Compute the MD5 digest of a byte slice as lowercase hex
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Compute the MD5 digest of a file, streaming in 64 KiB blocks
pub fn md5_file(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path.as_ref())?;
    let mut ctx = md5::Context::new();
    let mut buffer = [0u8; 65536];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        ctx.consume(&buffer[..n]);
    }

    Ok(format!("{:x}", ctx.compute()))
}

/// Verify that data matches the expected MD5
pub fn verify_md5(data: &[u8], expected: &str) -> bool {
    md5_hex(data).eq_ignore_ascii_case(expected)
}

/// Verify that a file matches the expected MD5
pub fn verify_file_md5(path: impl AsRef<Path>, expected: &str) -> Result<()> {
    let path = path.as_ref();
    let actual = md5_file(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(CommonError::checksum_mismatch(
            path.display().to_string(),
            expected.to_string(),
            actual,
        ))
    }
}
