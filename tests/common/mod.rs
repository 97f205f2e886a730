#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::{TempDir, tempdir};

pub const TERMOS_FILE: &str = "termos.csv";

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// The binary under test with logging quieted to warnings.
pub fn facets() -> Command {
    let mut cmd = Command::cargo_bin("sheet-facets").expect("binary exists");
    cmd.env("RUST_LOG", "warn");
    cmd
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file contents");
        path
    }

    /// Writes a config file naming `sources` as `(name, path)` pairs.
    pub fn write_config(&self, sources: &[(&str, &Path)]) -> PathBuf {
        let mut yaml = String::from("cache_ttl_secs: 60\nsources:\n");
        for (name, path) in sources {
            yaml.push_str(&format!("  {name}:\n    path: '{}'\n", path.display()));
        }
        self.write("facets.yaml", &yaml)
    }
}
