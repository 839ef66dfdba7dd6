//! Read-only repository inspection.
//!
//! A [`RepositoryInspector`] produces a [`RepositorySnapshot`] for one
//! repository root. Ref state (changed paths and the `HEAD` commit time)
//! comes from a [`RefReader`]; conflict markers are found by walking the
//! working tree and reading file contents, never from repository metadata.
//!
//! Nothing here writes to the repository. [`GitCli`] passes
//! `--no-optional-locks` so `git status` does not refresh the index.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use vigil_types::{FailureKind, RepositorySnapshot};

use crate::clock::{TimeSource, age_seconds};
use crate::config::EngineConfig;

/// Bytes inspected when deciding whether a file is binary.
const BINARY_SNIFF_BYTES: usize = 8000;

const MARKER_OURS: &[u8] = b"<<<<<<<";
const MARKER_SPLIT: &[u8] = b"=======";
const MARKER_THEIRS: &[u8] = b">>>>>>>";

/// Errors that can occur while inspecting a repository.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    /// The path is not a repository root.
    #[error("not a repository root: {path}")]
    NotFound {
        /// The path that was inspected.
        path: String,
    },

    /// A permission or I/O failure while reading repository state.
    #[error("cannot read repository {path}: {reason}")]
    Unreadable {
        /// The repository root.
        path: String,
        /// What failed.
        reason: String,
    },
}

impl RepositoryError {
    /// Category recorded in scan-failure events.
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::NotFound { .. } => FailureKind::NotFound,
            Self::Unreadable { .. } => FailureKind::Unreadable,
        }
    }

    fn unreadable(path: &Path, reason: impl Into<String>) -> Self {
        Self::Unreadable {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Ref state
// ---------------------------------------------------------------------------

/// Source of a repository's ref and index state.
pub trait RefReader: Send + Sync + core::fmt::Debug {
    /// Modified, staged, and untracked paths relative to `root`, sorted.
    fn changed_paths(&self, root: &Path) -> Result<Vec<String>, RepositoryError>;

    /// Commit time of `HEAD`, or `None` when the repository has no commits.
    fn head_commit_time(&self, root: &Path) -> Result<Option<DateTime<Utc>>, RepositoryError>;
}

/// [`RefReader`] backed by the `git` command-line client.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitCli;

impl GitCli {
    /// Create a reader that shells out to `git`.
    pub const fn new() -> Self {
        Self
    }

    fn run(root: &Path, args: &[&str]) -> Result<Output, RepositoryError> {
        Command::new("git")
            .arg("--no-optional-locks")
            .arg("-C")
            .arg(root)
            .args(args)
            .output()
            .map_err(|e| {
                RepositoryError::unreadable(
                    root,
                    format!("failed to execute `git {}`: {e}", args.join(" ")),
                )
            })
    }

    fn stdout_checked(root: &Path, args: &[&str]) -> Result<String, RepositoryError> {
        let output = Self::run(root, args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            return Err(RepositoryError::unreadable(
                root,
                format!(
                    "`git {}` failed: {}",
                    args.join(" "),
                    if stderr.is_empty() {
                        "unknown error"
                    } else {
                        &stderr
                    }
                ),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl RefReader for GitCli {
    fn changed_paths(&self, root: &Path) -> Result<Vec<String>, RepositoryError> {
        let out = Self::stdout_checked(
            root,
            &["status", "--porcelain=v1", "-z", "--untracked-files=all"],
        )?;
        Ok(parse_porcelain_z(&out))
    }

    fn head_commit_time(&self, root: &Path) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        // An unborn HEAD makes rev-parse exit non-zero without output.
        if !Self::run(root, &["rev-parse", "-q", "--verify", "HEAD"])?
            .status
            .success()
        {
            return Ok(None);
        }
        let out = Self::stdout_checked(root, &["log", "-1", "--format=%ct", "HEAD"])?;
        let secs: i64 = out.trim().parse().map_err(|e| {
            RepositoryError::unreadable(root, format!("unexpected commit time {:?}: {e}", out.trim()))
        })?;
        Ok(DateTime::<Utc>::from_timestamp(secs, 0))
    }
}

/// Extract paths from `git status --porcelain=v1 -z` output.
///
/// Each record is `XY <path>`; rename and copy records are followed by a
/// second NUL-terminated field holding the original path, which is skipped.
fn parse_porcelain_z(out: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut fields = out.split('\0');
    while let Some(record) = fields.next() {
        let Some(path) = record.get(3..) else {
            continue;
        };
        if path.is_empty() {
            continue;
        }
        // Renames and copies on either side carry the original path next.
        if record.bytes().take(2).any(|b| b == b'R' || b == b'C') {
            let _ = fields.next();
        }
        paths.push(path.to_owned());
    }
    paths.sort();
    paths.dedup();
    paths
}

/// A [`RefReader`] that returns whatever it was last told.
///
/// Used in tests and dry runs where no `git` binary should be involved.
#[derive(Debug, Default)]
pub struct StubRefReader {
    state: Mutex<(Vec<String>, Option<DateTime<Utc>>)>,
}

impl StubRefReader {
    /// Create a reader reporting `changed` paths and a `HEAD` time.
    pub fn new(changed: Vec<String>, head: Option<DateTime<Utc>>) -> Self {
        Self {
            state: Mutex::new((changed, head)),
        }
    }

    /// Replace the reported changed paths.
    pub fn set_changed(&self, changed: Vec<String>) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).0 = changed;
    }

    /// Replace the reported `HEAD` commit time.
    pub fn set_head(&self, head: Option<DateTime<Utc>>) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).1 = head;
    }
}

impl RefReader for StubRefReader {
    fn changed_paths(&self, _root: &Path) -> Result<Vec<String>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .0
            .clone())
    }

    fn head_commit_time(&self, _root: &Path) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        Ok(self.state.lock().unwrap_or_else(PoisonError::into_inner).1)
    }
}

// ---------------------------------------------------------------------------
// Inspector
// ---------------------------------------------------------------------------

/// Produces [`RepositorySnapshot`]s.
#[derive(Debug, Clone)]
pub struct RepositoryInspector {
    clock: Arc<dyn TimeSource>,
    refs: Arc<dyn RefReader>,
}

impl RepositoryInspector {
    /// Create an inspector reading ref state from `refs`.
    pub fn new(clock: Arc<dyn TimeSource>, refs: Arc<dyn RefReader>) -> Self {
        Self { clock, refs }
    }

    /// Inspect the repository rooted at `path`.
    ///
    /// `config` supplies the conflict-walk limits (`ignored_dirs` and
    /// `max_file_bytes`).
    ///
    /// # Errors
    ///
    /// [`RepositoryError::NotFound`] if `path` has no `.git` entry,
    /// [`RepositoryError::Unreadable`] on any I/O failure.
    pub fn inspect(
        &self,
        path: &Path,
        config: &EngineConfig,
    ) -> Result<RepositorySnapshot, RepositoryError> {
        match path.join(".git").try_exists() {
            Ok(true) => {}
            Ok(false) => {
                return Err(RepositoryError::NotFound {
                    path: path.display().to_string(),
                });
            }
            Err(e) => return Err(RepositoryError::unreadable(path, e.to_string())),
        }

        let uncommitted_files = self.refs.changed_paths(path)?;
        let last_commit_at = self.refs.head_commit_time(path)?;
        let conflicted_files = find_conflicted_files(path, config)?;
        let now = self.clock.now();

        Ok(RepositorySnapshot {
            uncommitted_file_count: uncommitted_files.len(),
            uncommitted_files,
            last_commit_at,
            last_commit_age_seconds: last_commit_at.map(|at| age_seconds(now, at)),
            has_conflict_markers: !conflicted_files.is_empty(),
            conflicted_files,
        })
    }
}

/// Walk the working tree under `root` and return the files holding a
/// complete conflict block, relative to `root` with `/` separators.
fn find_conflicted_files(root: &Path, config: &EngineConfig) -> Result<Vec<String>, RepositoryError> {
    let mut found = Vec::new();
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries =
            std::fs::read_dir(&dir).map_err(|e| RepositoryError::unreadable(root, e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| RepositoryError::unreadable(root, e.to_string()))?;
            let file_type = entry
                .file_type()
                .map_err(|e| RepositoryError::unreadable(root, e.to_string()))?;
            let path = entry.path();

            if file_type.is_dir() {
                let name = entry.file_name();
                if !config.ignored_dirs.iter().any(|d| name.as_os_str() == d.as_str()) {
                    pending.push(path);
                }
                continue;
            }
            // Symlinks are not followed.
            if !file_type.is_file() {
                continue;
            }

            let len = entry
                .metadata()
                .map_err(|e| RepositoryError::unreadable(root, e.to_string()))?
                .len();
            if len > config.max_file_bytes {
                continue;
            }
            let bytes =
                std::fs::read(&path).map_err(|e| RepositoryError::unreadable(root, e.to_string()))?;
            if is_binary(&bytes) || !has_conflict_block(&bytes) {
                continue;
            }
            found.push(relative_slash_path(root, &path));
        }
    }

    found.sort();
    Ok(found)
}

fn is_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(BINARY_SNIFF_BYTES).any(|b| *b == 0)
}

/// Whether `bytes` contain `<<<<<<<`, `=======`, `>>>>>>>` line starts in
/// that order.
fn has_conflict_block(bytes: &[u8]) -> bool {
    let mut seen_ours = false;
    let mut seen_split = false;
    for line in bytes.split(|b| *b == b'\n') {
        if line.starts_with(MARKER_OURS) {
            seen_ours = true;
            seen_split = false;
        } else if seen_ours && line.starts_with(MARKER_SPLIT) {
            seen_split = true;
        } else if seen_split && line.starts_with(MARKER_THEIRS) {
            return true;
        }
    }
    false
}

fn relative_slash_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeDelta, TimeZone};

    use super::*;
    use crate::clock::ManualClock;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()
    }

    fn inspector(refs: StubRefReader) -> RepositoryInspector {
        RepositoryInspector::new(Arc::new(ManualClock::new(now())), Arc::new(refs))
    }

    fn fake_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        dir
    }

    const CONFLICT: &str = "fn main() {\n<<<<<<< HEAD\n    a();\n=======\n    b();\n>>>>>>> feature\n}\n";

    #[test]
    fn missing_git_entry_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = inspector(StubRefReader::default())
            .inspect(dir.path(), &EngineConfig::default())
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::NotFound);
    }

    #[test]
    fn snapshot_reports_counts_and_age() {
        let repo = fake_repo();
        let head = now() - TimeDelta::minutes(45);
        let refs = StubRefReader::new(vec!["a.py".to_owned(), "b.py".to_owned()], Some(head));
        let snap = inspector(refs)
            .inspect(repo.path(), &EngineConfig::default())
            .unwrap();
        assert_eq!(snap.uncommitted_file_count, 2);
        assert_eq!(snap.last_commit_at, Some(head));
        assert_eq!(snap.last_commit_age_seconds, Some(45 * 60));
        assert!(!snap.has_conflict_markers);
    }

    #[test]
    fn no_commits_means_no_age() {
        let repo = fake_repo();
        let snap = inspector(StubRefReader::default())
            .inspect(repo.path(), &EngineConfig::default())
            .unwrap();
        assert_eq!(snap.last_commit_age_seconds, None);
    }

    #[test]
    fn conflict_markers_found_in_nested_files() {
        let repo = fake_repo();
        std::fs::create_dir_all(repo.path().join("src/deep")).unwrap();
        std::fs::write(repo.path().join("src/deep/main.rs"), CONFLICT).unwrap();
        std::fs::write(repo.path().join("README.md"), "no markers\n").unwrap();
        let snap = inspector(StubRefReader::default())
            .inspect(repo.path(), &EngineConfig::default())
            .unwrap();
        assert!(snap.has_conflict_markers);
        assert_eq!(snap.conflicted_files, vec!["src/deep/main.rs".to_owned()]);
    }

    #[test]
    fn ignored_dirs_and_binaries_are_skipped() {
        let repo = fake_repo();
        std::fs::create_dir_all(repo.path().join("node_modules/pkg")).unwrap();
        std::fs::write(repo.path().join("node_modules/pkg/index.js"), CONFLICT).unwrap();
        let mut binary = CONFLICT.as_bytes().to_vec();
        binary.insert(0, 0);
        std::fs::write(repo.path().join("blob.bin"), binary).unwrap();
        let snap = inspector(StubRefReader::default())
            .inspect(repo.path(), &EngineConfig::default())
            .unwrap();
        assert!(!snap.has_conflict_markers);
    }

    #[test]
    fn oversized_files_are_skipped_by_marker_walk() {
        let repo = fake_repo();
        std::fs::write(repo.path().join("big.rs"), CONFLICT).unwrap();
        let config = EngineConfig {
            max_file_bytes: 8,
            ..EngineConfig::default()
        };
        let snap = inspector(StubRefReader::default())
            .inspect(repo.path(), &config)
            .unwrap();
        assert!(snap.conflicted_files.is_empty());
    }

    #[test]
    fn incomplete_blocks_do_not_count() {
        assert!(!has_conflict_block(b"<<<<<<< HEAD\nonly ours\n"));
        assert!(!has_conflict_block(b"=======\n>>>>>>> x\n"));
        assert!(!has_conflict_block(b"  <<<<<<< indented\n=======\n>>>>>>> x\n"));
        assert!(has_conflict_block(CONFLICT.as_bytes()));
    }

    #[test]
    fn porcelain_parsing_handles_renames_and_untracked() {
        let out = " M src/lib.rs\0?? notes.txt\0R  new.rs\0old.rs\0A  added.py\0";
        assert_eq!(
            parse_porcelain_z(out),
            vec!["added.py", "new.rs", "notes.txt", "src/lib.rs"]
        );
    }

    #[test]
    fn worktree_side_rename_skips_original_path() {
        let out = " R moved.rs\0before.rs\0MC twin.py\0orig.py\0 M kept.rs\0";
        assert_eq!(
            parse_porcelain_z(out),
            vec!["kept.rs", "moved.rs", "twin.py"]
        );
    }

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    fn git(root: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args([
                "-c",
                "user.email=vigil@example.com",
                "-c",
                "user.name=Vigil",
                "-c",
                "commit.gpgsign=false",
            ])
            .arg("-C")
            .arg(root)
            .args(args)
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    #[test]
    fn git_cli_reads_real_repository() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        git(dir.path(), &["init", "-q"]);

        let cli = GitCli::new();
        assert_eq!(cli.head_commit_time(dir.path()).unwrap(), None);

        std::fs::write(dir.path().join("tracked.py"), "x = 1\n").unwrap();
        git(dir.path(), &["add", "tracked.py"]);
        git(dir.path(), &["commit", "-q", "-m", "init"]);
        assert!(cli.head_commit_time(dir.path()).unwrap().is_some());
        assert!(cli.changed_paths(dir.path()).unwrap().is_empty());

        std::fs::write(dir.path().join("tracked.py"), "x = 2\n").unwrap();
        std::fs::write(dir.path().join("fresh.py"), "y = 1\n").unwrap();
        assert_eq!(
            cli.changed_paths(dir.path()).unwrap(),
            vec!["fresh.py".to_owned(), "tracked.py".to_owned()]
        );
    }
}
