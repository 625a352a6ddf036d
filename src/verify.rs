// src/verify.rs
//! `verify`: stream-hash files in parallel and compare with expected digests.

use rayon::prelude::*;
use serde::{
    Deserialize,
    Serialize
};
use sha1::Sha1;
use sha2::{
    Digest,
    Sha256
};
use std::{
    fmt,
    fs::File,
    io::{
        self,
        Read
    },
    path::{
        Path,
        PathBuf
    },
    str::FromStr,
    time::Instant
};
use tracing::info;

use crate::util;

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Sha256,
    Sha1,
    Md5,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedAlgorithm(pub String);

impl fmt::Display for UnsupportedAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported algorithm: {}", self.0)
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = UnsupportedAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha1" => Ok(Self::Sha1),
            "md5" => Ok(Self::Md5),
            _ => Err(UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl ChecksumAlgorithm {
    /// Lowercase hex digest of everything `reader` yields.
    pub fn digest_reader(self, mut reader: impl Read) -> io::Result<String> {
        let mut buf = vec![0u8; READ_CHUNK];
        match self {
            Self::Sha256 => {
                let mut h = Sha256::new();
                pump(&mut reader, &mut buf, |chunk| h.update(chunk))?;
                Ok(hex::encode(h.finalize()))
            }
            Self::Sha1 => {
                let mut h = Sha1::new();
                pump(&mut reader, &mut buf, |chunk| h.update(chunk))?;
                Ok(hex::encode(h.finalize()))
            }
            Self::Md5 => {
                let mut ctx = md5::Context::new();
                pump(&mut reader, &mut buf, |chunk| ctx.consume(chunk))?;
                Ok(format!("{:x}", ctx.compute()))
            }
        }
    }

    pub fn digest_file(self, path: &Path) -> io::Result<String> {
        self.digest_reader(File::open(path)?)
    }
}

fn pump(reader: &mut impl Read, buf: &mut [u8], mut sink: impl FnMut(&[u8])) -> io::Result<()> {
    loop {
        match reader.read(buf) {
            Ok(0) => return Ok(()),
            Ok(n) => sink(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyTarget {
    pub path: PathBuf,
    pub name: String,
    pub algorithm: String,
    pub expected_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyFailure {
    pub name: String,
    pub expected: String,
    /// Empty when the file could not be hashed.
    pub actual: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub verified: usize,
    pub total: usize,
    pub failed: Vec<VerifyFailure>,
    pub elapsed_ms: u64,
}

pub fn run(targets: &[VerifyTarget]) -> VerifyReport {
    let start = Instant::now();
    let failed: Vec<VerifyFailure> = targets.par_iter().filter_map(check).collect();
    let report = VerifyReport {
        verified: targets.len() - failed.len(),
        total: targets.len(),
        failed,
        elapsed_ms: util::elapsed_ms(start),
    };
    info!(verified = report.verified, total = report.total, elapsed_ms = report.elapsed_ms, "verify finished");
    report
}

fn check(target: &VerifyTarget) -> Option<VerifyFailure> {
    let failure = |actual: String, error: Option<String>| VerifyFailure {
        name: target.name.clone(),
        expected: target.expected_hash.clone(),
        actual,
        error,
    };

    let algorithm = match target.algorithm.parse::<ChecksumAlgorithm>() {
        Ok(a) => a,
        Err(e) => return Some(failure(String::new(), Some(e.to_string()))),
    };
    match algorithm.digest_file(&target.path) {
        Ok(actual) if actual.eq_ignore_ascii_case(target.expected_hash.trim()) => None,
        Ok(actual) => Some(failure(actual, None)),
        Err(e) => Some(failure(String::new(), Some(e.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
    const HELLO_SHA1: &str = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";
    const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";

    fn target(path: PathBuf, name: &str, algorithm: &str, expected: &str) -> VerifyTarget {
        VerifyTarget { path, name: name.into(), algorithm: algorithm.into(), expected_hash: expected.into() }
    }

    #[test]
    fn known_digests() {
        for (alg, want) in [("sha256", HELLO_SHA256), ("sha1", HELLO_SHA1), ("md5", HELLO_MD5)] {
            let a: ChecksumAlgorithm = alg.parse().unwrap();
            assert_eq!(a.digest_reader(&b"hello"[..]).unwrap(), want, "{alg}");
        }
    }

    #[test]
    fn streaming_matches_one_shot_across_chunks() {
        let data = vec![7u8; READ_CHUNK * 2 + 17];
        let streamed = ChecksumAlgorithm::Sha256.digest_reader(&data[..]).unwrap();
        assert_eq!(streamed, hex::encode(Sha256::digest(&data)));
    }

    #[test]
    fn counts_matches_and_mismatches() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("pkg.zip");
        fs::write(&file, "hello").unwrap();

        let report = run(&[
            target(file.clone(), "good", "sha256", HELLO_SHA256),
            target(file.clone(), "upper", "SHA1", &HELLO_SHA1.to_uppercase()),
            target(file.clone(), "bad", "md5", "00000000000000000000000000000000"),
            target(tmp.path().join("missing.zip"), "gone", "sha256", HELLO_SHA256),
        ]);

        assert_eq!(report.total, 4);
        assert_eq!(report.verified, 2);
        assert_eq!(report.failed.len(), 2);

        let bad = &report.failed[0];
        assert_eq!(bad.name, "bad");
        assert_eq!(bad.actual, HELLO_MD5);
        assert!(bad.error.is_none());

        let gone = &report.failed[1];
        assert_eq!(gone.name, "gone");
        assert_eq!(gone.actual, "");
        assert!(gone.error.is_some());
    }

    #[test]
    fn unknown_algorithm_is_a_per_target_failure() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("f");
        fs::write(&file, "hello").unwrap();
        let report = run(&[target(file, "x", "crc32", "abc")]);
        assert_eq!(report.verified, 0);
        assert_eq!(report.failed[0].error.as_deref(), Some("unsupported algorithm: crc32"));
    }

    #[test]
    fn empty_input() {
        let report = run(&[]);
        assert_eq!((report.verified, report.total), (0, 0));
        assert!(report.failed.is_empty());
    }
}
