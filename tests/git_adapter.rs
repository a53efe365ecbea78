use std::path::Path;
use std::process::{Command, Output};
use std::sync::Arc;

use announcer_core::models::ObjectId;
use announcer_core::repository::{CloneOptions, Git, SharedRepository};
use announcer_core::stream::collect;
use revision_announcer::git::GitCli;
use tempfile::TempDir;

fn run_git(dir: &Path, args: &[&str]) -> Output {
    Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run git {:?}: {}", args, e))
}

/// Six commits an hour apart starting 2018-04-09T00:00:00Z, each tagged
/// `merged_pr_<n>`; the last also carries an annotated tag.
fn setup_repo(root: &Path) -> (String, Vec<ObjectId>) {
    let repo = root.join("source");
    std::fs::create_dir_all(&repo).unwrap();
    run_git(&repo, &["init", "-b", "main"]);
    run_git(&repo, &["config", "user.email", "test@test.com"]);
    run_git(&repo, &["config", "user.name", "Test"]);
    run_git(&repo, &["config", "commit.gpgsign", "false"]);
    run_git(&repo, &["config", "tag.gpgsign", "false"]);

    let mut ids = Vec::new();
    for n in 1..=6i64 {
        let date = format!("@{} +0000", 1523232000 + (n - 1) * 3600);
        let message = format!("commit {}", n);
        let output = Command::new("git")
            .args(["commit", "--allow-empty", "-m", message.as_str()])
            .env("GIT_AUTHOR_DATE", &date)
            .env("GIT_COMMITTER_DATE", &date)
            .current_dir(&repo)
            .output()
            .unwrap();
        assert!(output.status.success(), "git commit failed: {:?}", output);

        let tag = format!("merged_pr_{}", n);
        run_git(&repo, &["tag", tag.as_str()]);
        let head = run_git(&repo, &["rev-parse", "HEAD"]);
        ids.push(String::from_utf8_lossy(&head.stdout).trim().parse().unwrap());
    }
    run_git(&repo, &["tag", "-a", "release", "-m", "release"]);

    (format!("file://{}", repo.display()), ids)
}

fn options(url: &str, depth: u32) -> CloneOptions {
    CloneOptions {
        url: url.to_string(),
        remote: "origin".to_string(),
        branch: "main".to_string(),
        depth,
    }
}

fn tag_names(shared: &SharedRepository) -> Vec<String> {
    let repo = shared.read().unwrap();
    let mut names: Vec<String> = collect(&mut repo.tags().unwrap())
        .unwrap()
        .into_iter()
        .map(|r| r.short_name().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn test_full_clone_lists_tags_and_commits() {
    let tmp = TempDir::new().unwrap();
    let (url, ids) = setup_repo(tmp.path());
    let git = GitCli::new(tmp.path().join("cache"));

    let repo = git.clone_repository(&options(&url, 0)).unwrap();
    let refs = collect(&mut repo.tags().unwrap()).unwrap();
    assert_eq!(refs.len(), 7);

    // The annotated tag is peeled to its commit.
    let release = refs.iter().find(|r| r.short_name() == "release").unwrap();
    assert_eq!(release.target, ids[5]);

    let commit = repo.commit(&ids[2]).unwrap();
    assert_eq!(commit.time.timestamp(), 1523232000 + 2 * 3600);
}

#[test]
fn test_commit_lookup_without_tag_listing() {
    let tmp = TempDir::new().unwrap();
    let (url, ids) = setup_repo(tmp.path());
    let git = GitCli::new(tmp.path().join("cache"));

    let repo = git.clone_repository(&options(&url, 0)).unwrap();
    let commit = repo.commit(&ids[0]).unwrap();
    assert_eq!(commit.id, ids[0]);
    assert_eq!(commit.time.timestamp(), 1523232000);

    let missing: ObjectId = "0123456789012345678901234567890123456789".parse().unwrap();
    assert!(repo.commit(&missing).is_err());
}

#[test]
fn test_shallow_clone_deepens() {
    let tmp = TempDir::new().unwrap();
    let (url, _) = setup_repo(tmp.path());
    let git = Arc::new(GitCli::new(tmp.path().join("cache")));

    let shared = SharedRepository::new(git, options(&url, 2));
    shared.clone_remote().unwrap();
    let shallow = tag_names(&shared);
    assert!(shallow.contains(&"merged_pr_6".to_string()));
    assert!(!shallow.contains(&"merged_pr_3".to_string()));

    shared.fetch(Some(2)).unwrap();
    let deeper = tag_names(&shared);
    assert!(deeper.contains(&"merged_pr_3".to_string()));
    assert!(!deeper.contains(&"merged_pr_1".to_string()));
}

#[test]
fn test_clone_directory_removed_on_drop() {
    let tmp = TempDir::new().unwrap();
    let (url, _) = setup_repo(tmp.path());
    let cache = tmp.path().join("cache");
    let git = GitCli::new(&cache);

    let repo = git.clone_repository(&options(&url, 0)).unwrap();
    assert_eq!(std::fs::read_dir(&cache).unwrap().count(), 1);
    drop(repo);
    assert_eq!(std::fs::read_dir(&cache).unwrap().count(), 0);
}

#[test]
fn test_clone_failure_is_reported() {
    let tmp = TempDir::new().unwrap();
    let cache = tmp.path().join("cache");
    let git = GitCli::new(&cache);

    let url = format!("file://{}", tmp.path().join("nope").display());
    let err = git.clone_repository(&options(&url, 0)).err().unwrap();
    assert!(err.to_string().contains("git clone failed"));
    assert_eq!(std::fs::read_dir(&cache).unwrap().count(), 0);
}

#[cfg(target_os = "linux")]
#[test]
fn test_first_clone_sweeps_dead_clones() {
    let tmp = TempDir::new().unwrap();
    let (url, _) = setup_repo(tmp.path());
    let cache = tmp.path().join("cache");
    let stale = cache.join("clone-4000000000-0");
    std::fs::create_dir_all(stale.join("objects")).unwrap();

    let git = GitCli::new(&cache);
    let repo = git.clone_repository(&options(&url, 0)).unwrap();
    assert!(!stale.exists());
    assert_eq!(std::fs::read_dir(&cache).unwrap().count(), 1);
    drop(repo);
}
