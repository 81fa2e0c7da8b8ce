//! Streaming MD5 hashing.
//!
//! Blob identity is `md5(content)` rendered as 32 lowercase hex characters.
//! Files are fed through the accumulator in fixed-size buffers so hashing
//! never loads a whole file into memory.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use md5::{Digest, Md5};

const BUF_SIZE: usize = 1024;

/// Hash everything a reader yields, returning 32 lowercase hex characters.
pub fn hash_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Md5::new();
    let mut buf = [0u8; BUF_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash a file's byte content.
pub fn hash_file<P: AsRef<Path>>(path: P) -> io::Result<String> {
    hash_reader(&mut File::open(path)?)
}

/// Hash an in-memory byte slice.
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}
