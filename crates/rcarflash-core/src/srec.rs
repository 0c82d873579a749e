//! Motorola S-record load address extraction
//!
//! Loaders are shipped as S-record text files. The monitor wants the image's
//! load address as printed in the first `S3` record: the eight hex digits
//! following the record type and byte count (`S3` `cc` `aaaaaaaa` ...).

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{FileError, FormatError, Result};

/// Number of leading lines searched for an `S3` record
pub const SCAN_LINES: usize = 20;

/// Record type carrying a 32-bit address
const S3_MARKER: &[u8] = b"S3";

/// Column range of the address field in an `S3` line
const ADDR_FIELD: core::ops::Range<usize> = 4..12;

/// Extract the load address field from one line, if it is an `S3` record
pub fn parse_s3_address(line: &[u8]) -> Option<String> {
    if !line.starts_with(S3_MARKER) {
        return None;
    }
    let field = line.get(ADDR_FIELD)?;
    if !field.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    // all hex digits, so this cannot fail
    core::str::from_utf8(field).ok().map(str::to_string)
}

/// Find the load address in the first [`SCAN_LINES`] lines of `reader`
pub fn load_address_from<R: BufRead>(reader: R) -> std::io::Result<Option<String>> {
    for line in reader.split(b'\n').take(SCAN_LINES) {
        if let Some(addr) = parse_s3_address(&line?) {
            return Ok(Some(addr));
        }
    }
    Ok(None)
}

/// Read the load address of an S-record file
pub fn load_address(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|source| FileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let addr = load_address_from(BufReader::new(file)).map_err(|source| FileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    match addr {
        Some(addr) => {
            log::debug!("Load address of {} is {}", path.display(), addr);
            Ok(addr)
        }
        None => Err(FormatError::NoLoadAddress(path.to_path_buf()).into()),
    }
}
