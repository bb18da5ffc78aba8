//! Digest computation for artifact checksums

use crate::layout::DigestAlgorithm;
use digest::Digest;

fn hex_digest<D: Digest>(data: &[u8]) -> String
where
    digest::Output<D>: std::fmt::LowerHex,
{
    let mut hasher = D::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Calculate SHA256 hash of data as lowercase hex.
///
/// ```
/// # use depot_server::hash_utils::sha256_hash;
/// assert_eq!(sha256_hash(b"hello world").len(), 64);
/// ```
pub fn sha256_hash(data: &[u8]) -> String {
    hex_digest::<sha2::Sha256>(data)
}

/// Calculate SHA1 hash of data as lowercase hex (npm `shasum`).
pub fn sha1_hash(data: &[u8]) -> String {
    hex_digest::<sha1::Sha1>(data)
}

pub fn sha512_hash(data: &[u8]) -> String {
    hex_digest::<sha2::Sha512>(data)
}

pub fn md5_hash(data: &[u8]) -> String {
    hex_digest::<md5::Md5>(data)
}

/// Hex digest of `data` under `algorithm`.
pub fn digest_hex(algorithm: DigestAlgorithm, data: &[u8]) -> String {
    match algorithm {
        DigestAlgorithm::Md5 => md5_hash(data),
        DigestAlgorithm::Sha1 => sha1_hash(data),
        DigestAlgorithm::Sha256 => sha256_hash(data),
        DigestAlgorithm::Sha512 => sha512_hash(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hash() {
        assert_eq!(
            sha256_hash(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_sha1_hash() {
        assert_eq!(
            sha1_hash(b"hello world"),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
    }

    #[test]
    fn test_md5_hash() {
        assert_eq!(md5_hash(b"hello world"), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn test_digest_hex_dispatches_by_algorithm() {
        assert_eq!(digest_hex(DigestAlgorithm::Md5, b"hello world").len(), 32);
        assert_eq!(digest_hex(DigestAlgorithm::Sha1, b"hello world").len(), 40);
        assert_eq!(digest_hex(DigestAlgorithm::Sha256, b"hello world").len(), 64);
        assert_eq!(digest_hex(DigestAlgorithm::Sha512, b"hello world").len(), 128);
    }
}
