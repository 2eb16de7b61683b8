//! Content hasher.
//!
//! Streams bytes through SHA-256 in fixed-size blocks so arbitrarily large
//! files never need to be buffered. Read errors propagate; an interrupted
//! read is retried, any other error aborts the hash.

use sha2::{Digest, Sha256};
use std::io::{self, Read};

use crate::models::Fingerprint;

/// Block size for streaming reads.
pub const READ_BLOCK_BYTES: usize = 64 * 1024;

/// Fingerprint everything `reader` yields until EOF.
///
/// Returns the fingerprint and the number of bytes consumed.
pub fn fingerprint_reader<R: Read>(mut reader: R) -> io::Result<(Fingerprint, u64)> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BLOCK_BYTES];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((Fingerprint::from_bytes(hasher.finalize().into()), total))
}

/// Fingerprint an in-memory byte slice.
pub fn fingerprint_bytes(bytes: &[u8]) -> Fingerprint {
    Fingerprint::from_bytes(Sha256::digest(bytes).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reader that hands out one byte per call, then fails.
    struct Trickle<'a> {
        data: &'a [u8],
        fail_at_end: bool,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.data.split_first() {
                Some((b, rest)) => {
                    buf[0] = *b;
                    self.data = rest;
                    Ok(1)
                }
                None if self.fail_at_end => Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "denied",
                )),
                None => Ok(0),
            }
        }
    }

    #[test]
    fn known_digest() {
        // sha256("abc")
        assert_eq!(
            fingerprint_bytes(b"abc").to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn streaming_matches_one_shot() {
        let data: Vec<u8> = (0..(READ_BLOCK_BYTES * 3 + 17))
            .map(|i| (i % 251) as u8)
            .collect();
        let (fp, n) = fingerprint_reader(data.as_slice()).unwrap();
        assert_eq!(n, data.len() as u64);
        assert_eq!(fp, fingerprint_bytes(&data));

        let (fp2, _) = fingerprint_reader(Trickle {
            data: &data,
            fail_at_end: false,
        })
        .unwrap();
        assert_eq!(fp2, fp);
    }

    #[test]
    fn single_bit_flip_changes_everything() {
        let a = b"The quick brown fox".to_vec();
        let mut b = a.clone();
        b[3] ^= 0x01;
        let fa = fingerprint_bytes(&a);
        let fb = fingerprint_bytes(&b);
        let differing = fa
            .as_bytes()
            .iter()
            .zip(fb.as_bytes())
            .filter(|(x, y)| x != y)
            .count();
        assert!(differing > 20, "only {} bytes differ", differing);
    }

    #[test]
    fn read_error_propagates() {
        let err = fingerprint_reader(Trickle {
            data: b"partial",
            fail_at_end: true,
        })
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }
}
