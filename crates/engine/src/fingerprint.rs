use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use blake3::Hasher;
use core_types::Fingerprint;

use crate::{EngineError, Result};

/// Streaming chunk size; the working set stays at this size regardless of file length.
const CHUNK_SIZE: usize = 64 * 1024;

pub fn fingerprint_reader<R: Read>(mut reader: R) -> io::Result<Fingerprint> {
    let mut hasher = Hasher::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let read = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        hasher.update(&buf[..read]);
    }

    Ok(Fingerprint::from_digest(hasher.finalize().as_bytes()))
}

pub fn fingerprint_bytes(bytes: &[u8]) -> Fingerprint {
    Fingerprint::from_digest(blake3::hash(bytes).as_bytes())
}

pub fn fingerprint_file(path: &Path) -> Result<Fingerprint> {
    let file = File::open(path).map_err(|err| EngineError::read(path, err))?;
    fingerprint_reader(file).map_err(|err| EngineError::read(path, err))
}
