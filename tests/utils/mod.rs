// Shared helpers for the integration tests
//
// Fixtures live in tests/fixtures and are compiled with `rustc -g` into a
// fresh temporary directory, so each test traces its own binary and the
// temporary directory is the own-code root.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

pub fn fixture_source(name: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(format!("{}.rs", name));
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("read {}: {}", path.display(), e))
}

/// Compile a fixture with debug info, returning the temp dir and binary path
pub fn compile_fixture(name: &str) -> (TempDir, PathBuf) {
    compile_source(name, &fixture_source(name), &["-g"])
}

/// Compile a fixture without any debug info
pub fn compile_fixture_stripped(name: &str) -> (TempDir, PathBuf) {
    compile_source(
        name,
        &fixture_source(name),
        &["-C", "debuginfo=0", "-C", "strip=debuginfo"],
    )
}

fn compile_source(name: &str, source: &str, flags: &[&str]) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let src_file = temp_dir.path().join(format!("{}.rs", name));
    let bin_file = temp_dir.path().join(name);

    fs::write(&src_file, source).unwrap();

    let status = Command::new("rustc")
        .arg(&src_file)
        .arg("-o")
        .arg(&bin_file)
        .arg("-C")
        .arg("opt-level=0")
        .args(flags)
        .status()
        .expect("Failed to run rustc");
    assert!(status.success(), "Failed to compile fixture {}", name);

    (temp_dir, bin_file)
}

/// 1-based line of the first source line containing `needle`
pub fn line_of(source: &str, needle: &str) -> u32 {
    source
        .lines()
        .position(|line| line.contains(needle))
        .map(|idx| idx as u32 + 1)
        .unwrap_or_else(|| panic!("{:?} not found in fixture", needle))
}
