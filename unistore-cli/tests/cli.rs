use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use unistore_test::dsm::FakeDsm;

const UNISTORE_EXE: &str = env!("CARGO_BIN_EXE_unistore");

fn unistore(envs: &[(&str, &str)], args: &[&str]) -> Command {
    let mut command = Command::new(UNISTORE_EXE);
    command
        .args(args)
        .env_remove("RUST_LOG")
        .envs(envs.iter().copied())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    command
}

fn filesystem(dir: &Path, args: &[&str]) -> Output {
    let root = dir.to_str().unwrap();
    unistore(
        &[
            ("UNISTORE__STORAGE__TYPE", "filesystem"),
            ("UNISTORE__STORAGE__PATH", root),
        ],
        args,
    )
    .output()
    .unwrap()
}

fn stdout(output: &Output) -> String {
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout.clone()).unwrap()
}

#[test]
fn version() {
    let output = unistore(&[], &["version"]).output().unwrap();
    assert_eq!(stdout(&output).trim(), env!("CARGO_PKG_VERSION"));
}

#[test]
fn put_ls_cat_rm() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source.txt");
    std::fs::write(&source, "from a file").unwrap();
    let store = dir.path().join("store");

    let output = filesystem(&store, &["put", "/docs/a.txt", source.to_str().unwrap()]);
    assert_eq!(stdout(&output), "docs/a.txt\t11\n");

    let output = filesystem(&store, &["ls", "docs/"]);
    assert!(stdout(&output).trim_end().ends_with("  docs/a.txt"));

    let output = filesystem(&store, &["cat", "docs\\a.txt"]);
    assert_eq!(stdout(&output), "from a file");

    let output = filesystem(&store, &["rm", "docs/a.txt"]);
    assert_eq!(stdout(&output), "docs/a.txt\n");

    let output = filesystem(&store, &["cat", "docs/a.txt"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("not found"));
}

#[test]
fn put_reads_stdin() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_str().unwrap();

    let mut child = unistore(
        &[
            ("UNISTORE__STORAGE__TYPE", "filesystem"),
            ("UNISTORE__STORAGE__PATH", root),
        ],
        &["put", "piped.bin"],
    )
    .stdin(Stdio::piped())
    .spawn()
    .unwrap();
    child.stdin.take().unwrap().write_all(b"piped").unwrap();
    let output = child.wait_with_output().unwrap();

    assert_eq!(stdout(&output), "piped.bin\t5\n");
    assert_eq!(std::fs::read(dir.path().join("piped.bin")).unwrap(), b"piped");
}

#[test]
fn reads_yaml_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("unistore.yml");
    let root = dir.path().join("data");
    std::fs::write(
        &config,
        format!("storage:\n  type: filesystem\n  path: {}\n", root.display()),
    )
    .unwrap();

    let output = unistore(&[], &["-c", config.to_str().unwrap(), "endpoint"])
        .output()
        .unwrap();
    assert_eq!(stdout(&output).trim(), root.display().to_string());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn synology_round_trip() {
    let dsm = FakeDsm::start("admin", "hunter2", "home");
    let endpoint = dsm.endpoint();
    let envs = [
        ("UNISTORE__STORAGE__TYPE", "synology"),
        ("UNISTORE__STORAGE__ENDPOINT", endpoint.as_str()),
        ("UNISTORE__STORAGE__ACCOUNT", "admin"),
        ("UNISTORE__STORAGE__PASSWORD", "hunter2"),
        ("UNISTORE__STORAGE__SHARED_FOLDER", "/home"),
    ];

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("notes.txt");
    std::fs::write(&source, "on the nas").unwrap();

    let output = unistore(&envs, &["put", "notes/today.txt", source.to_str().unwrap()])
        .output()
        .unwrap();
    assert_eq!(stdout(&output), "notes/today.txt\t10\n");
    assert_eq!(dsm.file("/home/notes/today.txt").unwrap(), b"on the nas");

    let output = unistore(&envs, &["cat", "notes/today.txt"]).output().unwrap();
    assert_eq!(stdout(&output), "on the nas");

    // Each invocation logs in once and logs out on exit.
    assert_eq!(dsm.logins(), 2);
}
