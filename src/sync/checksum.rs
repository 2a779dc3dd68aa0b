use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

pub const HASH_BUFFER_SIZE: usize = 256 * 1024;

/// Hex-encoded blake3 digest of a file's bytes, streamed in fixed chunks.
pub fn file_digest(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(HASH_BUFFER_SIZE, file);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

/// Digest of `path`, or `None` when the file does not exist.
pub fn digest_if_exists(path: &Path) -> std::io::Result<Option<String>> {
    match file_digest(path) {
        Ok(digest) => Ok(Some(digest)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
