// src/extract.rs
//! `extract`: unpack package archives in parallel, one job per archive.

use anyhow::{
    bail,
    Context,
    Result
};
use flate2::read::GzDecoder;
use rayon::prelude::*;
use serde::{
    Deserialize,
    Serialize
};
use std::{
    fs::{
        self,
        File
    },
    io::{
        self,
        BufReader,
        Read
    },
    path::{
        Path,
        PathBuf
    },
    time::Instant
};
use tracing::{
    debug,
    info
};

use crate::{
    clean::FailedTarget,
    util
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionJob {
    #[serde(rename = "zip", alias = "archive")]
    pub archive: PathBuf,
    pub dest: PathBuf,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractReport {
    pub extracted: usize,
    pub total_files: usize,
    pub failed: Vec<FailedTarget>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveFormat {
    fn detect(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if name.ends_with(".zip") {
            Ok(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Ok(Self::TarGz)
        } else if name.ends_with(".tar") {
            Ok(Self::Tar)
        } else {
            let ext = path.extension().map(|e| e.to_string_lossy().into_owned()).unwrap_or_default();
            bail!("unsupported archive format: {ext}")
        }
    }
}

pub fn run(jobs: &[ExtractionJob]) -> ExtractReport {
    let start = Instant::now();
    let results: Vec<Result<usize, FailedTarget>> = jobs
        .par_iter()
        .map(|job| {
            extract_one(job).map_err(|e| FailedTarget { name: job.name.clone(), error: format!("{e:#}") })
        })
        .collect();

    let mut report = ExtractReport::default();
    for r in results {
        match r {
            Ok(files) => {
                report.extracted += 1;
                report.total_files += files;
            }
            Err(f) => report.failed.push(f),
        }
    }
    report.elapsed_ms = util::elapsed_ms(start);
    info!(
        extracted = report.extracted,
        files = report.total_files,
        failed = report.failed.len(),
        elapsed_ms = report.elapsed_ms,
        "extract finished"
    );
    report
}

/// Returns the number of files written.
fn extract_one(job: &ExtractionJob) -> Result<usize> {
    let format = ArchiveFormat::detect(&job.archive)?;

    if job.dest.exists() {
        fs::remove_dir_all(&job.dest).with_context(|| format!("clearing {}", job.dest.display()))?;
    }
    fs::create_dir_all(&job.dest).with_context(|| format!("creating {}", job.dest.display()))?;

    let file = File::open(&job.archive).with_context(|| format!("opening {}", job.archive.display()))?;
    // Only zip downloads wrap the package in a generated top-level directory.
    let files = match format {
        ArchiveFormat::Zip => {
            let files = unpack_zip(file, &job.dest)?;
            flatten_single_dir(&job.dest)?;
            files
        }
        ArchiveFormat::Tar => unpack_tar(BufReader::new(file), &job.dest)?,
        ArchiveFormat::TarGz => unpack_tar(GzDecoder::new(BufReader::new(file)), &job.dest)?,
    };
    debug!(name = %job.name, files, "extracted");
    Ok(files)
}

fn unpack_zip(file: File, dest: &Path) -> Result<usize> {
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).context("reading zip directory")?;
    let mut files = 0usize;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).with_context(|| format!("reading zip entry {i}"))?;
        let Some(relative) = entry.enclosed_name() else {
            bail!("entry escapes destination: {}", entry.name());
        };
        let out = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out).with_context(|| format!("creating {}", out.display()))?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut outfile = File::create(&out).with_context(|| format!("creating {}", out.display()))?;
        io::copy(&mut entry, &mut outfile).with_context(|| format!("writing {}", out.display()))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out, fs::Permissions::from_mode(mode & 0o7777))
                .with_context(|| format!("setting mode on {}", out.display()))?;
        }
        files += 1;
    }
    Ok(files)
}

fn unpack_tar(reader: impl Read, dest: &Path) -> Result<usize> {
    let mut archive = tar::Archive::new(reader);
    let mut files = 0usize;

    for entry in archive.entries().context("reading tar entries")? {
        let mut entry = entry.context("reading tar entry")?;
        let is_file = !entry.header().entry_type().is_dir();
        let name = entry.path().map(|p| p.display().to_string()).unwrap_or_default();
        let unpacked = entry.unpack_in(dest).with_context(|| format!("unpacking {name}"))?;
        if !unpacked {
            bail!("entry escapes destination: {name}");
        }
        if is_file {
            files += 1;
        }
    }
    Ok(files)
}

/// When the zip held exactly one top-level directory, hoist its contents
/// into `dest`.
fn flatten_single_dir(dest: &Path) -> Result<()> {
    let entries: Vec<fs::DirEntry> = fs::read_dir(dest)
        .with_context(|| format!("listing {}", dest.display()))?
        .collect::<io::Result<_>>()?;
    let [only] = entries.as_slice() else {
        return Ok(());
    };
    if !only.file_type()?.is_dir() {
        return Ok(());
    }

    // Move aside first so a child sharing the directory's name can't collide.
    let holding = dest.join(format!(".extract-{}", std::process::id()));
    fs::rename(only.path(), &holding).context("moving top-level directory aside")?;
    for child in fs::read_dir(&holding)? {
        let child = child?;
        fs::rename(child.path(), dest.join(child.file_name()))
            .with_context(|| format!("hoisting {}", child.path().display()))?;
    }
    fs::remove_dir(&holding).with_context(|| format!("removing {}", holding.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn make_zip(path: &Path, files: &[(&str, &[u8])]) {
        let mut w = zip::ZipWriter::new(File::create(path).unwrap());
        let opts = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, data) in files {
            w.start_file(*name, opts).unwrap();
            w.write_all(data).unwrap();
        }
        w.finish().unwrap();
    }

    fn append_tar<W: Write>(builder: &mut tar::Builder<W>, files: &[(&str, &[u8])]) {
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, *name, *data).unwrap();
        }
    }

    fn job(archive: PathBuf, dest: PathBuf, name: &str) -> ExtractionJob {
        ExtractionJob { archive, dest, name: name.into() }
    }

    #[test]
    fn zip_with_common_top_dir_is_hoisted() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("pkg.zip");
        make_zip(&archive, &[("acme-util-1a2b/src/Foo.php", b"<?php class Foo {}"), ("acme-util-1a2b/README.md", b"# util")]);
        let dest = tmp.path().join("vendor/acme/util");

        let report = run(&[job(archive, dest.clone(), "acme/util")]);
        assert_eq!(report.extracted, 1);
        assert_eq!(report.total_files, 2);
        assert!(report.failed.is_empty());
        assert_eq!(fs::read_to_string(dest.join("src/Foo.php")).unwrap(), "<?php class Foo {}");
        assert_eq!(fs::read_to_string(dest.join("README.md")).unwrap(), "# util");
    }

    #[test]
    fn zip_without_common_dir_is_kept() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("flat.zip");
        make_zip(&archive, &[("hello.txt", b"Hello"), ("sub/nested.txt", b"Nested")]);
        let dest = tmp.path().join("out");

        let report = run(&[job(archive, dest.clone(), "flat")]);
        assert_eq!(report.total_files, 2);
        assert_eq!(fs::read_to_string(dest.join("sub/nested.txt")).unwrap(), "Nested");
    }

    #[test]
    fn top_dir_containing_same_name_child() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("same.zip");
        make_zip(&archive, &[("pkg/pkg/inner.txt", b"inner")]);
        let dest = tmp.path().join("out");

        run(&[job(archive, dest.clone(), "same")]);
        assert_eq!(fs::read_to_string(dest.join("pkg/inner.txt")).unwrap(), "inner");
    }

    #[test]
    fn tar_and_tgz() {
        let tmp = TempDir::new().unwrap();

        let tar_path = tmp.path().join("a.tar");
        let mut b = tar::Builder::new(File::create(&tar_path).unwrap());
        append_tar(&mut b, &[("file1.txt", b"one"), ("dir/file2.txt", b"two")]);
        b.finish().unwrap();

        let tgz_path = tmp.path().join("b.tgz");
        let enc = flate2::write::GzEncoder::new(File::create(&tgz_path).unwrap(), flate2::Compression::fast());
        let mut b = tar::Builder::new(enc);
        append_tar(&mut b, &[("package/src/x.php", b"<?php")]);
        b.into_inner().unwrap().finish().unwrap();

        let report = run(&[
            job(tar_path, tmp.path().join("out-a"), "a"),
            job(tgz_path, tmp.path().join("out-b"), "b"),
        ]);
        assert_eq!(report.extracted, 2);
        assert_eq!(report.total_files, 3);
        assert_eq!(fs::read_to_string(tmp.path().join("out-a/dir/file2.txt")).unwrap(), "two");
        assert_eq!(fs::read_to_string(tmp.path().join("out-b/package/src/x.php")).unwrap(), "<?php");
        assert!(!tmp.path().join("out-b/src").exists());
    }

    #[test]
    fn tar_keeps_single_top_dir() {
        let tmp = TempDir::new().unwrap();
        let tar_path = tmp.path().join("pkg.tar");
        let mut b = tar::Builder::new(File::create(&tar_path).unwrap());
        append_tar(&mut b, &[("package/src/A.php", b"<?php class A {}"), ("package/README", b"r")]);
        b.finish().unwrap();
        let dest = tmp.path().join("out");

        let report = run(&[job(tar_path, dest.clone(), "pkg")]);
        assert_eq!(report.extracted, 1);
        assert!(dest.join("package/src/A.php").is_file());
        assert!(!dest.join("src").exists());
    }

    #[test]
    fn zip_entry_escaping_destination_fails_the_job() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("evil.zip");
        make_zip(&archive, &[("../evil.txt", b"gotcha"), ("ok.txt", b"ok")]);
        let dest = tmp.path().join("out");

        let report = run(&[job(archive, dest, "evil/zip")]);
        assert_eq!(report.extracted, 0);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].name, "evil/zip");
        assert!(report.failed[0].error.contains("entry escapes destination"), "{}", report.failed[0].error);
        assert!(!tmp.path().join("evil.txt").exists());
    }

    #[test]
    fn tar_entry_escaping_destination_fails_the_job() {
        let tmp = TempDir::new().unwrap();
        let tar_path = tmp.path().join("evil.tar");
        let mut b = tar::Builder::new(File::create(&tar_path).unwrap());
        let data: &[u8] = b"gotcha";
        let mut header = tar::Header::new_old();
        // `set_path` refuses `..`, so write the raw name field.
        let name = b"../evil.txt";
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        b.append(&header, data).unwrap();
        b.finish().unwrap();
        let dest = tmp.path().join("out");

        let report = run(&[job(tar_path, dest, "evil/tar")]);
        assert_eq!(report.extracted, 0);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].name, "evil/tar");
        assert!(report.failed[0].error.contains("entry escapes destination"), "{}", report.failed[0].error);
        assert!(!tmp.path().join("evil.txt").exists());
    }

    #[test]
    fn destination_is_cleared_first() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("pkg.zip");
        make_zip(&archive, &[("new.txt", b"new"), ("other.txt", b"o")]);
        let dest = tmp.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("stale.txt"), "old").unwrap();

        run(&[job(archive, dest.clone(), "pkg")]);
        assert!(!dest.join("stale.txt").exists());
        assert!(dest.join("new.txt").exists());
    }

    #[test]
    fn failures_are_per_job() {
        let tmp = TempDir::new().unwrap();
        let good = tmp.path().join("good.zip");
        make_zip(&good, &[("a.txt", b"a")]);
        let rar = tmp.path().join("pkg.rar");
        fs::write(&rar, "not really").unwrap();
        let corrupt = tmp.path().join("corrupt.zip");
        fs::write(&corrupt, "not a zip").unwrap();

        let report = run(&[
            job(rar, tmp.path().join("o1"), "rar/pkg"),
            job(good, tmp.path().join("o2"), "good/pkg"),
            job(corrupt, tmp.path().join("o3"), "corrupt/pkg"),
        ]);
        assert_eq!(report.extracted, 1);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[0].name, "rar/pkg");
        assert_eq!(report.failed[0].error, "unsupported archive format: rar");
        assert_eq!(report.failed[1].name, "corrupt/pkg");
    }

    #[test]
    fn job_accepts_zip_or_archive_key() {
        let a: ExtractionJob = serde_json::from_str(r#"{"zip":"/a.zip","dest":"/d","name":"n"}"#).unwrap();
        let b: ExtractionJob = serde_json::from_str(r#"{"archive":"/a.zip","dest":"/d","name":"n"}"#).unwrap();
        assert_eq!(a, b);
    }
}
