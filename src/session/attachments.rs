use crate::types::AttachedFile;
use crate::util::expand_home;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

pub const MAX_ATTACHMENT_BYTES: u64 = 2 * 1024 * 1024;

/// Reads a text file for attachment to the next request.
pub fn load_attachment(raw_path: &str, base_dir: &Path) -> Result<AttachedFile> {
    let path = expand_home(raw_path);
    let path = if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    };
    let metadata =
        fs::metadata(&path).with_context(|| format!("cannot access {}", path.display()))?;
    if !metadata.is_file() {
        bail!("{} is not a regular file", path.display());
    }
    if metadata.len() > MAX_ATTACHMENT_BYTES {
        bail!(
            "{} is {} bytes; attachments are limited to {MAX_ATTACHMENT_BYTES} bytes",
            path.display(),
            metadata.len()
        );
    }

    let bytes = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let (content, encoding) =
        decode_text(&bytes).with_context(|| format!("cannot decode {}", path.display()))?;
    let abs_path = fs::canonicalize(&path).unwrap_or(path);
    Ok(AttachedFile {
        path: raw_path.trim().to_string(),
        abs_path,
        encoding: encoding.to_string(),
        content,
    })
}

/// Detects UTF-8 (with or without BOM) and BOM-marked UTF-16.
pub fn decode_text(bytes: &[u8]) -> Result<(String, &'static str)> {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        let text = String::from_utf8(rest.to_vec()).context("invalid UTF-8 after BOM")?;
        return Ok((text, "utf-8-sig"));
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return Ok((decode_utf16(rest, u16::from_le_bytes)?, "utf-16-le"));
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return Ok((decode_utf16(rest, u16::from_be_bytes)?, "utf-16-be"));
    }
    if bytes.contains(&0) {
        bail!("looks like binary data");
    }
    let text = String::from_utf8(bytes.to_vec()).context("not valid UTF-8 text")?;
    Ok((text, "utf-8"))
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Result<String> {
    if bytes.len() % 2 != 0 {
        bail!("odd byte count in UTF-16 data");
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).context("invalid UTF-16 text")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodings_are_detected() {
        assert_eq!(decode_text(b"plain").unwrap(), ("plain".to_string(), "utf-8"));
        assert_eq!(
            decode_text(b"\xEF\xBB\xBFbom").unwrap(),
            ("bom".to_string(), "utf-8-sig")
        );
        assert_eq!(
            decode_text(&[0xFF, 0xFE, b'h', 0, b'i', 0]).unwrap(),
            ("hi".to_string(), "utf-16-le")
        );
        assert_eq!(
            decode_text(&[0xFE, 0xFF, 0, b'h', 0, b'i']).unwrap(),
            ("hi".to_string(), "utf-16-be")
        );
        assert!(decode_text(b"\x00\x01binary").is_err());
        assert!(decode_text(b"\xC3\x28").is_err());
    }

    #[test]
    fn relative_paths_resolve_against_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "remember\n").unwrap();

        let file = load_attachment("notes.txt", dir.path()).unwrap();
        assert_eq!(file.path, "notes.txt");
        assert_eq!(file.content, "remember\n");
        assert_eq!(file.encoding, "utf-8");
        assert!(file.abs_path.is_absolute());
    }

    #[test]
    fn oversized_and_missing_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let big = dir.path().join("big.txt");
        fs::write(&big, vec![b'a'; (MAX_ATTACHMENT_BYTES + 1) as usize]).unwrap();

        let error = load_attachment("big.txt", dir.path()).unwrap_err();
        assert!(error.to_string().contains("limited to"));
        assert!(load_attachment("absent.txt", dir.path()).is_err());
        assert!(load_attachment(".", dir.path()).is_err());
    }
}
