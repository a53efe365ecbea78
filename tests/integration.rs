use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

fn announcer_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("announcer");
    path
}

fn run_announcer(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = announcer_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run announcer binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn run_git(dir: &Path, args: &[&str]) -> Output {
    Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run git {:?}: {}", args, e))
}

// 2018-04-09T00:00:00Z
const APR_9: i64 = 1523232000;
const HOUR: i64 = 3600;
const DAY: i64 = 24 * HOUR;

/// Commits on `main` as `(committer time, merged PR number)`, oldest first.
const HISTORY: &[(i64, Option<u32>)] = &[
    (APR_9 - 2 * DAY + 12 * HOUR, Some(1)), // Apr 7 12:00
    (APR_9 - DAY + 12 * HOUR, Some(2)),     // Apr 8 12:00
    (APR_9 + 12 * HOUR, Some(3)),           // Apr 9 12:00
    (APR_9 + DAY + HOUR, Some(4)),          // Apr 10 01:00
    (APR_9 + DAY + HOUR + 1800, None),      // Apr 10 01:30, untagged
];

const NOW: &str = "2018-04-10T02:00:00Z";
const START: &str = "2018-04-01T00:00:00Z";

/// Creates a repository with `HISTORY` and returns it with the hashes of
/// the tagged commits, keyed by PR number.
fn setup_source_repo(root: &Path) -> (PathBuf, Vec<(u32, String)>) {
    let repo = root.join("source");
    fs::create_dir_all(&repo).unwrap();
    run_git(&repo, &["init", "-b", "main"]);
    run_git(&repo, &["config", "user.email", "test@test.com"]);
    run_git(&repo, &["config", "user.name", "Test"]);
    run_git(&repo, &["config", "commit.gpgsign", "false"]);

    let mut tagged = Vec::new();
    for (i, (time, pr)) in HISTORY.iter().enumerate() {
        let date = format!("@{} +0000", time);
        let message = format!("commit {}", i);
        let output = Command::new("git")
            .args(["commit", "--allow-empty", "-m", message.as_str()])
            .env("GIT_AUTHOR_DATE", &date)
            .env("GIT_COMMITTER_DATE", &date)
            .current_dir(&repo)
            .output()
            .unwrap();
        assert!(output.status.success(), "git commit failed: {:?}", output);

        if let Some(number) = pr {
            let tag = format!("merged_pr_{}", number);
            run_git(&repo, &["tag", tag.as_str()]);
            let head = run_git(&repo, &["rev-parse", "HEAD"]);
            let hash = String::from_utf8_lossy(&head.stdout).trim().to_string();
            tagged.push((*number, hash));
        }
    }
    // A tag outside the merge marker namespace.
    run_git(&repo, &["tag", "v1.0"]);

    (repo, tagged)
}

fn hash_of(tagged: &[(u32, String)], pr: u32) -> String {
    tagged
        .iter()
        .find(|(n, _)| *n == pr)
        .map(|(_, h)| h.clone())
        .unwrap()
}

fn write_config(root: &Path, repo: &Path, port: u16, extra: &str) -> PathBuf {
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_content = format!(
        r#"[repository]
url = "file://{}"
branch = "main"
cache_dir = "{}/cache"
{}

[server]
bind = "127.0.0.1:{}"

[refresh]
interval_secs = 3600

[logging]
level = "info"
"#,
        repo.display(),
        root.display(),
        extra,
        port
    );
    let config_path = config_dir.join("announcer.toml");
    fs::write(&config_path, config_content).unwrap();
    config_path
}

fn setup_test_env(extra: &str) -> (TempDir, PathBuf, Vec<(u32, String)>) {
    let tmp = TempDir::new().unwrap();
    let (repo, tagged) = setup_source_repo(tmp.path());
    let config_path = write_config(tmp.path(), &repo, 7341, extra);
    (tmp, config_path, tagged)
}

fn parse_json(stdout: &str) -> serde_json::Value {
    serde_json::from_str(stdout).unwrap_or_else(|e| panic!("invalid JSON ({}): {}", e, stdout))
}

#[test]
fn test_epochs_without_config() {
    let (stdout, stderr, success) =
        run_announcer(Path::new("/nonexistent/announcer.toml"), &["epochs"]);
    assert!(success, "epochs failed: stderr={}", stderr);

    let epochs = parse_json(&stdout);
    let ids: Vec<&str> = epochs
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap())
        .collect();
    assert_eq!(
        ids,
        vec!["monthly", "weekly", "daily", "eight_hourly", "four_hourly", "two_hourly", "hourly"]
    );
    assert_eq!(epochs[2]["max_duration_sec"], 86400);
}

#[test]
fn test_missing_config_errors() {
    let (_, stderr, success) =
        run_announcer(Path::new("/nonexistent/announcer.toml"), &["revisions"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_revisions_daily_and_hourly() {
    let (_tmp, config_path, tagged) = setup_test_env("");

    let (stdout, stderr, success) = run_announcer(
        &config_path,
        &[
            "revisions", "--epoch", "daily", "--epoch", "hourly", "--now", NOW, "--start", START,
        ],
    );
    assert!(success, "revisions failed: stdout={}, stderr={}", stdout, stderr);

    let response = parse_json(&stdout);
    assert_eq!(response["revisions"]["daily"][0]["hash"], hash_of(&tagged, 3));
    assert_eq!(
        response["revisions"]["daily"][0]["commit_time"],
        "2018-04-09T12:00:00Z"
    );
    // Hourly picks up where daily stopped in the shared scan.
    assert_eq!(response["revisions"]["hourly"][0]["hash"], hash_of(&tagged, 2));
    assert_eq!(
        response["revisions"]["hourly"][0]["commit_time"],
        "2018-04-08T12:00:00Z"
    );
    assert!(response.get("error").is_none());

    let epochs: Vec<&str> = response["epochs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap())
        .collect();
    assert_eq!(epochs, vec!["daily", "hourly"]);
}

#[test]
fn test_revisions_multiple_per_epoch() {
    let (_tmp, config_path, tagged) = setup_test_env("");

    let (stdout, stderr, success) = run_announcer(
        &config_path,
        &["revisions", "--epoch", "daily", "--num", "2", "--now", NOW, "--start", START],
    );
    assert!(success, "revisions failed: stdout={}, stderr={}", stdout, stderr);

    let response = parse_json(&stdout);
    let daily = response["revisions"]["daily"].as_array().unwrap();
    assert_eq!(daily.len(), 2);
    assert_eq!(daily[0]["hash"], hash_of(&tagged, 3));
    assert_eq!(daily[1]["hash"], hash_of(&tagged, 2));
}

#[test]
fn test_revisions_partial_result_fails() {
    let (_tmp, config_path, tagged) = setup_test_env("");

    // Only four merge markers exist; the fifth daily revision is missing.
    let (stdout, stderr, success) = run_announcer(
        &config_path,
        &["revisions", "--epoch", "daily", "--num", "5", "--now", NOW, "--start", START],
    );
    assert!(!success);
    assert!(stderr.contains("not all epochs consumed"), "stderr={}", stderr);

    let response = parse_json(&stdout);
    assert_eq!(response["revisions"]["daily"][0]["hash"], hash_of(&tagged, 3));
    assert!(response["error"].as_str().unwrap().contains("daily"));
}

#[test]
fn test_revisions_extend_shallow_clone() {
    // The first clone sees only the two newest commits; the daily revision
    // sits behind them.
    let (_tmp, config_path, tagged) = setup_test_env("clone_depth = 2\nfetch_chunk = 2");

    let (stdout, stderr, success) = run_announcer(
        &config_path,
        &["revisions", "--epoch", "daily", "--now", NOW, "--start", START],
    );
    assert!(success, "revisions failed: stdout={}, stderr={}", stdout, stderr);

    let response = parse_json(&stdout);
    assert_eq!(response["revisions"]["daily"][0]["hash"], hash_of(&tagged, 3));
}

#[test]
fn test_revisions_rejects_unknown_epoch() {
    let (_tmp, config_path, _) = setup_test_env("");

    let (_, stderr, success) = run_announcer(&config_path, &["revisions", "--epoch", "yearly"]);
    assert!(!success);
    assert!(stderr.contains("unknown epoch: yearly"));
}

#[test]
fn test_revisions_rejects_bad_time() {
    let (_tmp, config_path, _) = setup_test_env("");

    let (_, stderr, success) = run_announcer(&config_path, &["revisions", "--now", "tomorrow"]);
    assert!(!success);
    assert!(stderr.contains("RFC 3339"));
}

#[test]
fn test_revisions_clone_failure() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path(), &tmp.path().join("missing"), 7342, "");

    let (_, stderr, success) = run_announcer(&config_path, &["revisions"]);
    assert!(!success);
    assert!(stderr.contains("git clone failed"), "stderr={}", stderr);
}

// ============ Server ============

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn start_server(config_path: &Path) -> std::process::Child {
    let binary = announcer_binary();
    Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("serve")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap_or_else(|e| panic!("Failed to start server: {}", e))
}

/// Wait for the server to be ready by polling the health endpoint.
fn wait_for_server(port: u16) {
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        std::thread::sleep(std::time::Duration::from_millis(100));
        if let Ok(resp) = reqwest::blocking::get(&url) {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

/// Wait for the initial clone by polling until `/list` stops answering 503.
fn wait_for_clone(port: u16) {
    let url = format!(
        "http://127.0.0.1:{}/api/revisions/list?epochs=hourly&now={}&start={}",
        port, NOW, START
    );
    for _ in 0..100 {
        if let Ok(resp) = reqwest::blocking::get(&url) {
            if resp.status() != 503 {
                return;
            }
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
    }
    panic!("Repository was not cloned within 10 seconds");
}

#[test]
fn test_server_endpoints() {
    let port = find_free_port();
    let tmp = TempDir::new().unwrap();
    let (repo, tagged) = setup_source_repo(tmp.path());
    let config_path = write_config(tmp.path(), &repo, port, "");

    let mut server = start_server(&config_path);
    wait_for_server(port);

    let base = format!("http://127.0.0.1:{}", port);

    let health: serde_json::Value = reqwest::blocking::get(format!("{}/health", base))
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert!(health["version"].is_string());

    let resp = reqwest::blocking::get(format!("{}/api/revisions/epochs", base)).unwrap();
    assert_eq!(resp.status(), 200);
    let epochs: serde_json::Value = resp.json().unwrap();
    assert_eq!(epochs.as_array().unwrap().len(), 7);

    wait_for_clone(port);

    let resp = reqwest::blocking::get(format!(
        "{}/api/revisions/list?epochs=daily&num_revisions=2&now={}&start={}",
        base, NOW, START
    ))
    .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["revisions"]["daily"][0]["hash"], hash_of(&tagged, 3));
    assert_eq!(body["revisions"]["daily"][1]["hash"], hash_of(&tagged, 2));

    // Short results come back with the partial revisions and an error.
    let resp = reqwest::blocking::get(format!(
        "{}/api/revisions/list?epochs=daily&num_revisions=5&now={}&start={}",
        base, NOW, START
    ))
    .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["revisions"]["daily"].as_array().unwrap().len(), 3);
    assert!(body["error"].is_string());

    // Bad parameters.
    for query in [
        "epochs=fortnightly",
        "num_revisions=0",
        "now=yesterday",
        "now=2018-04-10T00:00:00Z&now=2018-04-11T00:00:00Z",
        "start=2018-04-11T00:00:00Z&now=2018-04-10T00:00:00Z",
    ] {
        let resp =
            reqwest::blocking::get(format!("{}/api/revisions/list?{}", base, query)).unwrap();
        assert_eq!(resp.status(), 400, "query {}", query);
        let body: serde_json::Value = resp.json().unwrap();
        assert_eq!(body["error"]["code"], "bad_request");
    }

    // All history is years older than the default window.
    let resp = reqwest::blocking::get(format!("{}/api/revisions/latest", base)).unwrap();
    assert_eq!(resp.status(), 500);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["error"]["code"], "missing_revision");

    server.kill().ok();
    server.wait().ok();
}

// ============ GitHub ============

/// Serves `/rate_limit` and commit lookups on a background runtime and
/// returns the base url.
fn start_fake_github(remaining: u64) -> String {
    use axum::extract::Path as UrlPath;
    use axum::routing::get;
    use axum::{Json, Router};

    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async move {
            let app = Router::new()
                .route(
                    "/rate_limit",
                    get(move || async move {
                        Json(serde_json::json!({
                            "resources": {"core": {"limit": 5000, "remaining": remaining, "reset": 1523232000}}
                        }))
                    }),
                )
                .route(
                    "/repos/{owner}/{repo}/git/commits/{sha}",
                    get(|UrlPath((_, _, sha)): UrlPath<(String, String, String)>| async move {
                        Json(serde_json::json!({
                            "sha": sha,
                            "committer": {"name": "bot", "date": "2018-04-09T12:00:00Z"},
                            "message": "Merge pull request"
                        }))
                    }),
                );
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            tx.send(listener.local_addr().unwrap()).unwrap();
            axum::serve(listener, app).await.ok();
        });
    });
    let addr = rx.recv().unwrap();
    format!("http://{}", addr)
}

fn github_section(api_url: &str) -> String {
    format!(
        "\n[github]\nowner = \"web-platform-tests\"\nrepo = \"wpt\"\napi_url = \"{}\"\nbatch_size = 2\n",
        api_url
    )
}

#[test]
fn test_github_commits_in_input_order() {
    let api_url = start_fake_github(100);
    let (_tmp, config_path, tagged) = setup_test_env(&github_section(&api_url));
    let hashes: Vec<String> = [3, 1, 2].iter().map(|n| hash_of(&tagged, *n)).collect();

    let mut args = vec!["github", "commits"];
    args.extend(hashes.iter().map(String::as_str));
    let (stdout, stderr, success) = run_announcer(&config_path, &args);
    assert!(success, "github commits failed: stdout={}, stderr={}", stdout, stderr);

    let commits = parse_json(&stdout);
    let got: Vec<&str> = commits
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["sha"].as_str().unwrap())
        .collect();
    let want: Vec<&str> = hashes.iter().map(String::as_str).collect();
    assert_eq!(got, want);
}

#[test]
fn test_github_commits_rate_limited() {
    let api_url = start_fake_github(1);
    let (_tmp, config_path, tagged) = setup_test_env(&github_section(&api_url));
    let first = hash_of(&tagged, 1);
    let second = hash_of(&tagged, 2);

    let (_, stderr, success) = run_announcer(
        &config_path,
        &["github", "commits", first.as_str(), second.as_str()],
    );
    assert!(!success);
    assert!(stderr.contains("insufficient for 2 requests"), "stderr={}", stderr);
}

#[test]
fn test_github_commits_rejects_bad_hash() {
    let (_tmp, config_path, _) = setup_test_env("");

    let (_, stderr, success) = run_announcer(&config_path, &["github", "commits", "abc"]);
    assert!(!success);
    assert!(stderr.contains("Invalid commit hash: abc"), "stderr={}", stderr);
}
