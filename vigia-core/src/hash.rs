//! Content fingerprints.
//!
//! Files at or under [`STRONG_DIGEST_LIMIT`] get a SHA-256 digest; larger
//! files fall back to MD5 for throughput. A fingerprint is advisory data:
//! an unreadable or vanished file yields `None`, never an error.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use md5::Md5;
use sha2::{Digest, Sha256};
use tracing::warn;

/// Files larger than this (bytes) use the cheaper digest. 100 MiB.
pub const STRONG_DIGEST_LIMIT: u64 = 100 * 1024 * 1024;

const READ_BUF_SIZE: usize = 1024 * 1024;

/// Compute the content fingerprint for `path` as lowercase hex.
///
/// Returns `None` when the file cannot be read (permission error, vanished
/// mid-hash) - absence of a hash is a representable state downstream.
pub fn fingerprint(path: &Path) -> Option<String> {
    let size = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "could not stat file for hashing");
            return None;
        }
    };

    let result = if size > STRONG_DIGEST_LIMIT {
        digest_file::<Md5>(path)
    } else {
        digest_file::<Sha256>(path)
    };

    match result {
        Ok(hash) => Some(hash),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "could not hash file");
            None
        }
    }
}

fn digest_file<D: Digest>(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = D::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
