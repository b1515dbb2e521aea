use crate::models::Fingerprint;
use sha2::{Digest, Sha256};
use std::io::{Read, Seek, SeekFrom};

const BLOCK_SIZE: usize = 4096;

/// Hashes a stream block by block and rewinds it so callers can read it again.
pub fn fingerprint_stream<R: Read + Seek>(stream: &mut R) -> std::io::Result<Fingerprint> {
    stream.seek(SeekFrom::Start(0))?;

    let mut hasher = Sha256::new();
    let mut block = [0u8; BLOCK_SIZE];
    loop {
        let read = match stream.read(&mut block) {
            Ok(0) => break,
            Ok(read) => read,
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        };
        hasher.update(&block[..read]);
    }

    stream.seek(SeekFrom::Start(0))?;
    Ok(Fingerprint::from_hex(format!("{:x}", hasher.finalize())))
}

pub fn fingerprint_bytes(bytes: &[u8]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Fingerprint::from_hex(format!("{:x}", hasher.finalize()))
}
