// src/vendor_check.rs
//! `vendor-check`: is every installed package actually on disk?

use rayon::prelude::*;
use serde::{
    Deserialize,
    Serialize
};
use std::{
    fs,
    io::ErrorKind,
    path::PathBuf,
    time::Instant
};
use tracing::info;

use crate::util;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckPackage {
    pub name: String,
    pub install_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageState {
    Present,
    Missing,
    /// The install path exists but holds nothing.
    Incomplete,
}

impl CheckPackage {
    pub fn state(&self) -> PackageState {
        match fs::metadata(&self.install_path) {
            Ok(meta) if meta.is_file() => PackageState::Present,
            Ok(_) => match fs::read_dir(&self.install_path).map(|mut entries| entries.next().is_some()) {
                Ok(true) => PackageState::Present,
                _ => PackageState::Incomplete,
            },
            Err(e) if e.kind() == ErrorKind::NotFound => PackageState::Missing,
            Err(_) => PackageState::Incomplete,
        }
    }
}

/// Every package lands in exactly one of the three buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VendorReport {
    pub present: usize,
    pub missing: Vec<String>,
    pub incomplete: Vec<String>,
    pub total: usize,
    pub elapsed_ms: u64,
}

pub fn run(packages: &[CheckPackage]) -> VendorReport {
    let start = Instant::now();
    let states: Vec<PackageState> = packages.par_iter().map(CheckPackage::state).collect();

    let mut report = VendorReport { total: packages.len(), ..VendorReport::default() };
    for (pkg, state) in packages.iter().zip(states) {
        match state {
            PackageState::Present => report.present += 1,
            PackageState::Missing => report.missing.push(pkg.name.clone()),
            PackageState::Incomplete => report.incomplete.push(pkg.name.clone()),
        }
    }
    report.missing.sort();
    report.incomplete.sort();
    report.elapsed_ms = util::elapsed_ms(start);

    info!(
        present = report.present,
        missing = report.missing.len(),
        incomplete = report.incomplete.len(),
        elapsed_ms = report.elapsed_ms,
        "vendor check finished"
    );
    report
}
