//! Repository access backed by the `git` binary.
//!
//! Every clone lands in a fresh directory under the cache root and is
//! removed when its handle is dropped, so a re-clone never disturbs a scan
//! still reading the previous copy. Directories named after a process that
//! is no longer running are swept before the first clone.
//!
//! | Operation | Command |
//! |-----------|---------|
//! | clone | `git clone --no-checkout --single-branch --branch <b> --origin <r> [--depth <n>] <url> <dir>` |
//! | fetch | `git fetch [--deepen=<n>] <remote> <refspec>` |
//! | tags | `git for-each-ref refs/tags` (with peeled ids and committer dates) |
//! | commit | `git show -s --format=%H %ct <id>` |

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

use announcer_core::error::RepositoryError;
use announcer_core::models::{Commit, ObjectId, Reference};
use announcer_core::repository::{CloneOptions, FetchOptions, Git, Repository};
use announcer_core::stream::{ReferenceStream, VecStream};

const TAG_FORMAT: &str =
    "%(refname)%09%(objectname)%09%(*objectname)%09%(committerdate:unix)%09%(*committerdate:unix)";

/// [`Git`] implementation that shells out to `git`.
pub struct GitCli {
    cache_dir: PathBuf,
    generation: AtomicU64,
}

impl GitCli {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            generation: AtomicU64::new(0),
        }
    }

    fn next_dir(&self) -> PathBuf {
        let n = self.generation.fetch_add(1, Ordering::Relaxed);
        if n == 0 {
            sweep_stale_clones(&self.cache_dir);
        }
        self.cache_dir
            .join(format!("clone-{}-{}", std::process::id(), n))
    }
}

/// Removes `clone-<pid>-<n>` directories under `cache_dir` whose process
/// is no longer running. Returns how many were removed.
pub fn sweep_stale_clones(cache_dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(cache_dir) else {
        return 0;
    };
    let own = std::process::id();
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(clone_owner) else {
            continue;
        };
        if pid == own || process_alive(pid) {
            continue;
        }
        let path = entry.path();
        match std::fs::remove_dir_all(&path) {
            Ok(()) => {
                tracing::info!(dir = %path.display(), pid, "removed stale clone");
                removed += 1;
            }
            Err(e) => tracing::warn!(dir = %path.display(), error = %e, "failed to remove stale clone"),
        }
    }
    removed
}

/// The pid encoded in a `clone-<pid>-<n>` directory name.
fn clone_owner(name: &str) -> Option<u32> {
    let (pid, generation) = name.strip_prefix("clone-")?.split_once('-')?;
    generation.parse::<u64>().ok()?;
    pid.parse().ok()
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// Without a cheap liveness check every owner is assumed to be running.
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

impl Git for GitCli {
    fn clone_repository(
        &self,
        options: &CloneOptions,
    ) -> std::result::Result<Box<dyn Repository>, RepositoryError> {
        let dir = self.next_dir();
        git_clone(options, &dir).map_err(|e| {
            // A failed clone may leave a partial directory behind.
            let _ = std::fs::remove_dir_all(&dir);
            RepositoryError::Clone {
                url: options.url.clone(),
                message: format!("{:#}", e),
            }
        })?;
        Ok(Box::new(GitRepository::open(dir)))
    }
}

/// A local clone managed by [`GitCli`].
pub struct GitRepository {
    dir: PathBuf,
    /// Committer times learned while listing tags.
    commits: Mutex<HashMap<ObjectId, Commit>>,
}

impl GitRepository {
    pub fn open(dir: PathBuf) -> Self {
        Self {
            dir,
            commits: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn is_shallow(&self) -> bool {
        git_output(&self.dir, &["rev-parse", "--is-shallow-repository"])
            .map(|out| out.trim() == "true")
            .unwrap_or(false)
    }
}

impl Drop for GitRepository {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            tracing::debug!(dir = %self.dir.display(), error = %e, "failed to remove clone");
        }
    }
}

impl Repository for GitRepository {
    fn tags(&self) -> std::result::Result<Box<dyn ReferenceStream>, RepositoryError> {
        let format = format!("--format={}", TAG_FORMAT);
        let output = git_output(&self.dir, &["for-each-ref", format.as_str(), "refs/tags"])
        .map_err(|e| RepositoryError::Tags {
            message: format!("{:#}", e),
        })?;

        let mut refs = Vec::new();
        let mut commits = self.commits.lock();
        for line in output.lines().filter(|l| !l.is_empty()) {
            match parse_tag_line(line) {
                Some((reference, commit)) => {
                    if let Some(commit) = commit {
                        commits.insert(commit.id, commit);
                    }
                    refs.push(reference);
                }
                None => tracing::warn!(line, "unparseable for-each-ref output"),
            }
        }
        Ok(Box::new(VecStream::new(refs)))
    }

    fn commit(&self, id: &ObjectId) -> std::result::Result<Commit, RepositoryError> {
        if let Some(commit) = self.commits.lock().get(id) {
            return Ok(*commit);
        }
        let hex = id.to_hex();
        let output = git_output(&self.dir, &["show", "-s", "--format=%H %ct", hex.as_str()]).map_err(
            |e| RepositoryError::CommitLookup {
                id: *id,
                message: format!("{:#}", e),
            },
        )?;
        let commit = parse_commit_line(output.trim()).ok_or_else(|| RepositoryError::CommitLookup {
            id: *id,
            message: format!("unexpected git show output: {}", output.trim()),
        })?;
        self.commits.lock().insert(*id, commit);
        Ok(commit)
    }

    fn fetch(&mut self, options: &FetchOptions) -> std::result::Result<(), RepositoryError> {
        let mut args = vec!["fetch".to_string()];
        if let Some(n) = options.deepen {
            // --deepen only makes sense against a shallow boundary.
            if self.is_shallow() {
                args.push(format!("--deepen={}", n));
            }
        }
        args.push(options.remote.clone());
        args.push(options.refspec.clone());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        git_output(&self.dir, &args).map_err(|e| RepositoryError::Fetch {
            message: format!("{:#}", e),
        })?;
        Ok(())
    }
}

fn git_clone(options: &CloneOptions, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create cache directory: {}", parent.display()))?;
    }

    let mut cmd = Command::new("git");
    cmd.args(["clone", "--no-checkout", "--single-branch"]);
    cmd.args([
        "--branch",
        options.branch.as_str(),
        "--origin",
        options.remote.as_str(),
    ]);
    if options.depth > 0 {
        cmd.arg("--depth").arg(options.depth.to_string());
    }
    cmd.arg(&options.url);
    cmd.arg(dest);

    let output = cmd
        .output()
        .with_context(|| "Failed to execute 'git clone'. Is git installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git clone failed: {}", stderr.trim());
    }

    Ok(())
}

fn git_output(repo_dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .with_context(|| format!("Failed to execute 'git {}'", args.first().unwrap_or(&"")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {}", args.join(" "), stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Parses one `for-each-ref` line into a reference to the (peeled) commit.
fn parse_tag_line(line: &str) -> Option<(Reference, Option<Commit>)> {
    let mut fields = line.split('\t');
    let name = fields.next()?;
    let object = fields.next()?;
    let peeled = fields.next().unwrap_or("");
    let date = fields.next().unwrap_or("");
    let peeled_date = fields.next().unwrap_or("");

    // Annotated tags carry the commit in the peeled fields.
    let (target, date) = if peeled.is_empty() {
        (object, date)
    } else {
        (peeled, peeled_date)
    };
    let target: ObjectId = target.parse().ok()?;
    let commit = date
        .parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .map(|time| Commit { id: target, time });
    Some((Reference::new(name, target), commit))
}

fn parse_commit_line(line: &str) -> Option<Commit> {
    let (hash, secs) = line.split_once(' ')?;
    let id: ObjectId = hash.parse().ok()?;
    let time = Utc.timestamp_opt(secs.trim().parse().ok()?, 0).single()?;
    Some(Commit { id, time })
}

/// First 12 hex characters of the SHA-256 of `input`.
pub fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())[..12].to_string()
}
