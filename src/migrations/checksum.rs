//! # Revision Checksum
//!
//! MANIFESTO ALIGNMENT: Deterministic checksum for tamper detection.
//!
//! Revision files may embed a `checksum: crc32:XXXXXXXX` line computed over the
//! rest of the file. A mismatch at load time means the file was edited after
//! it was generated.

use crc32fast::Hasher;

const PREFIX: &str = "crc32:";

/// Compute CRC32 checksum for revision content
pub fn compute_checksum(content: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(content.as_bytes());
    format!("{}{:08X}", PREFIX, hasher.finalize())
}

/// Parse "crc32:ABC12345" into its numeric value
pub fn parse_checksum(formatted: &str) -> Option<u32> {
    let hex_part = formatted.strip_prefix(PREFIX)?;
    if hex_part.len() != 8 {
        return None;
    }
    u32::from_str_radix(hex_part, 16).ok()
}

/// Checksum of a revision file, ignoring its own `checksum:` line
pub fn checksum_for_file(content: &str) -> String {
    let without_checksum = content
        .lines()
        .filter(|line| !line.trim_start().starts_with("checksum:"))
        .collect::<Vec<_>>()
        .join("\n");

    compute_checksum(&without_checksum)
}

/// Verify a revision file against the checksum it declares
///
/// Comparison is on the parsed value, so hex case does not matter.
pub fn verify_file(content: &str, declared: &str) -> bool {
    match (parse_checksum(declared), parse_checksum(&checksum_for_file(content))) {
        (Some(expected), Some(actual)) => expected == actual,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_checksum_format() {
        let checksum = compute_checksum("test");
        assert!(checksum.starts_with("crc32:"));
        assert_eq!(checksum.len(), 6 + 8);
        assert_eq!(checksum, compute_checksum("test"));
    }

    #[test]
    fn test_parse_checksum() {
        assert_eq!(parse_checksum("crc32:ABC12345"), Some(0xABC12345));
        assert_eq!(parse_checksum("crc32:abc12345"), Some(0xABC12345));
        assert!(parse_checksum("md5:ABC12345").is_none());
        assert!(parse_checksum("crc32:ABC").is_none());
    }

    #[test]
    fn test_file_checksum_excludes_checksum_line() {
        let content = "id: a\nchecksum: crc32:OLD\nparent_ids: []";
        assert_eq!(
            checksum_for_file(content),
            compute_checksum("id: a\nparent_ids: []")
        );
    }

    #[test]
    fn test_verify_file_detects_edits() {
        let original = "id: a\nparent_ids: []";
        let declared = checksum_for_file(original);
        let with_line = format!("id: a\nchecksum: \"{}\"\nparent_ids: []", declared);

        assert!(verify_file(&with_line, &declared));
        assert!(verify_file(&with_line, &declared.to_lowercase()));
        assert!(!verify_file("id: b\nparent_ids: []", &declared));
    }
}
