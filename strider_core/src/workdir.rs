//! Layout of the shared working directory.
//!
//! The corpus files live directly under `workdir` and are shared by every
//! binary fuzzed against the same corpus. Feature files are tied to one
//! instrumented binary, so they live in a subdirectory named after the
//! binary and a fingerprint of its contents: rebuild the target and the
//! features are recomputed from scratch while the corpus carries over.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::Environment;

/// Resolves every engine-owned path under one working directory.
#[derive(Clone, Debug)]
pub struct WorkdirLayout {
    workdir: PathBuf,
    binary_name: String,
    binary_fingerprint: String,
}

impl WorkdirLayout {
    pub fn new(env: &Environment) -> Self {
        Self::for_workdir(&env.workdir, &env.binary)
    }

    /// Lays out `workdir` for `binary`. Used directly when loading a shard
    /// from a foreign working directory (`merge_from`).
    pub fn for_workdir(workdir: &Path, binary: &str) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
            binary_name: binary_name(binary),
            binary_fingerprint: binary_fingerprint(binary),
        }
    }

    /// Creates the directories every shard writes into.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(&self.workdir)?;
        fs::create_dir_all(self.features_dir())?;
        Ok(())
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// The append-only corpus blob file owned by `shard_index`.
    pub fn corpus_path(&self, shard_index: usize) -> PathBuf {
        self.workdir.join(format!("corpus.{shard_index:06}"))
    }

    /// The binary-fingerprinted directory holding feature files.
    pub fn features_dir(&self) -> PathBuf {
        self.workdir
            .join(format!("{}-{}", self.binary_name, self.binary_fingerprint))
    }

    /// The append-only features blob file owned by `shard_index`.
    pub fn features_path(&self, shard_index: usize) -> PathBuf {
        self.features_dir().join(format!("features.{shard_index:06}"))
    }

    pub fn coverage_report_path(&self, shard_index: usize) -> PathBuf {
        self.workdir.join(format!(
            "coverage-report-{}.{shard_index:06}.txt",
            self.binary_name
        ))
    }

    pub fn corpus_stats_path(&self, shard_index: usize) -> PathBuf {
        self.workdir.join(format!(
            "corpus-stats-{}.{shard_index:06}.json",
            self.binary_name
        ))
    }

    pub fn distilled_path(&self, shard_index: usize) -> PathBuf {
        self.workdir
            .join(format!("distilled-{}.{shard_index:06}", self.binary_name))
    }

    /// The directory crash reproducers are dumped into, one file per input,
    /// named by input hash.
    pub fn crash_reproducer_dir(&self) -> PathBuf {
        self.workdir.join("crashes")
    }
}

/// Writes `data` into `dir` under its hash, creating the directory if
/// needed. Identical inputs overwrite each other, which is the point: the
/// directory ends up holding one file per distinct input.
pub fn write_to_local_hashed_file_in_dir(dir: &Path, data: &[u8]) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join(crate::blob::input_hash_hex(data)), data)
}

fn binary_name(binary: &str) -> String {
    Path::new(binary)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown-binary".to_string())
}

/// Fingerprints the binary's contents when the file is readable, otherwise
/// its command line. Two builds of the same target thus get distinct
/// feature directories.
fn binary_fingerprint(binary: &str) -> String {
    let digest = match fs::read(binary) {
        Ok(contents) => md5::compute(&contents),
        Err(_) => md5::compute(binary.as_bytes()),
    };
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_sharded_and_fingerprinted() {
        let layout = WorkdirLayout::for_workdir(Path::new("/tmp/wd"), "/bins/target");
        assert_eq!(
            layout.corpus_path(3),
            PathBuf::from("/tmp/wd/corpus.000003")
        );
        let features = layout.features_path(12345);
        assert!(features.starts_with("/tmp/wd"));
        assert!(features.to_string_lossy().contains("target-"));
        assert!(features.ends_with("features.012345"));
        assert_eq!(
            layout.crash_reproducer_dir(),
            PathBuf::from("/tmp/wd/crashes")
        );
        assert!(layout
            .coverage_report_path(0)
            .ends_with("coverage-report-target.000000.txt"));
        assert!(layout
            .corpus_stats_path(1)
            .ends_with("corpus-stats-target.000001.json"));
        assert!(layout
            .distilled_path(2)
            .ends_with("distilled-target.000002"));
    }

    #[test]
    fn fingerprint_tracks_binary_contents() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("bin");
        std::fs::write(&binary, b"build one").unwrap();
        let layout_one = WorkdirLayout::for_workdir(dir.path(), binary.to_str().unwrap());
        std::fs::write(&binary, b"build two").unwrap();
        let layout_two = WorkdirLayout::for_workdir(dir.path(), binary.to_str().unwrap());
        assert_ne!(layout_one.features_dir(), layout_two.features_dir());
    }

    #[test]
    fn ensure_dirs_creates_workdir_and_features_dir() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().join("wd");
        let layout = WorkdirLayout::for_workdir(&workdir, "some-binary");
        layout.ensure_dirs().unwrap();
        assert!(workdir.is_dir());
        assert!(layout.features_dir().is_dir());
    }
}
