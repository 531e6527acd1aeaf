use crate::crypto::HashAlgorithm;
use sha1::Sha1;
use sha2::Sha256;

/// Computes the digest of the given bytes with the given hash algorithm.
pub fn digest(hash_alg: HashAlgorithm, bytes: &[u8]) -> Box<[u8]> {
    use digest::Digest;

    match hash_alg {
        HashAlgorithm::Sha256 => Box::from(&Sha256::digest(bytes)[..]),
        HashAlgorithm::Sha1 => Box::from(&Sha1::digest(bytes)[..]),
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InsufficientInput;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HashStatus {
    AllConsumed,  // input was digested entirely
    Truncated,  // input was only partially digested, part of it was ignored
}

/// A hasher that digests at most a given number of input bytes, and keeps count
/// of how many bytes it has digested.
pub struct CountingHasher {
    digest: Box<dyn digest::DynDigest + Send>,
    length: Option<usize>,
    bytes_written: usize,
}

impl CountingHasher {
    pub fn new(hash_alg: HashAlgorithm, length: Option<usize>) -> Self {
        let digest: Box<dyn digest::DynDigest + Send> = match hash_alg {
            HashAlgorithm::Sha256 => Box::new(Sha256::default()),
            HashAlgorithm::Sha1 => Box::new(Sha1::default()),
        };

        Self {
            length,
            digest,
            bytes_written: 0,
        }
    }

    pub fn update(&mut self, bytes: &[u8]) -> HashStatus {
        match self.length {
            Some(len) => {
                let bytes_left_to_write = len - self.bytes_written;

                if bytes_left_to_write >= bytes.len() {
                    self.digest.update(bytes);
                    self.bytes_written += bytes.len();
                    HashStatus::AllConsumed
                } else {
                    let partial_bytes = &bytes[..bytes_left_to_write];
                    self.digest.update(partial_bytes);
                    self.bytes_written += partial_bytes.len();
                    HashStatus::Truncated
                }
            }
            None => {
                self.digest.update(bytes);
                self.bytes_written += bytes.len();
                HashStatus::AllConsumed
            }
        }
    }

    pub fn finish(self) -> Result<(Box<[u8]>, usize), InsufficientInput> {
        if self.length.is_some() && !self.is_done() {
            return Err(InsufficientInput);
        }

        let bytes = self.digest.finalize();

        Ok((bytes, self.bytes_written))
    }

    pub fn is_done(&self) -> bool {
        matches!(self.length, Some(len) if len == self.bytes_written)
    }
}
