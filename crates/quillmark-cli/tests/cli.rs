use std::env;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn bin_path() -> PathBuf {
    if let Some(path) = env::var_os("CARGO_BIN_EXE_quillmark-cli") {
        return PathBuf::from(path);
    }
    let exe = env::current_exe().expect("current exe");
    let mut dir = exe.as_path();
    while let Some(parent) = dir.parent() {
        if parent.file_name().and_then(|name| name.to_str()) == Some("debug") {
            let candidate = parent.join("quillmark-cli");
            if candidate.exists() {
                return candidate;
            }
        }
        dir = parent;
    }
    panic!("binary path missing");
}

fn temp_file(name: &str, contents: &str) -> PathBuf {
    let mut path = env::temp_dir();
    let now = SystemTime::now().duration_since(UNIX_EPOCH).expect("time");
    path.push(format!(
        "quillmark_cli_{}_{}_{}.md",
        name,
        now.as_secs(),
        now.subsec_nanos()
    ));
    fs::write(&path, contents).expect("write temp file");
    path
}

#[test]
fn renders_commonmark_from_file() {
    let input = temp_file("basic", "# Hi *there*\n");
    let output = Command::new(bin_path())
        .arg(input.to_str().expect("path"))
        .output()
        .expect("run");
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "<h1>Hi <em>there</em></h1>\n"
    );
    let _ = fs::remove_file(input);
}

#[test]
fn reads_stdin_when_no_file_given() {
    let mut child = Command::new(bin_path())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("spawn");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(b"plain text\n")
        .expect("write stdin");
    let output = child.wait_with_output().expect("wait");
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "<p>plain text</p>\n");
}

#[test]
fn gfm_flag_enables_tables_and_tagfilter() {
    let input = temp_file("gfm", "| a |\n|---|\n| 1 |\n\nx <xmp> y\n");
    let output = Command::new(bin_path())
        .args(["--gfm", input.to_str().expect("path")])
        .output()
        .expect("run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    assert!(stdout.contains("<table>"));
    assert!(stdout.contains("&lt;xmp>"));
    let _ = fs::remove_file(input);
}

#[test]
fn single_extension_via_e_flag() {
    let input = temp_file("strike", "~~x~~ and | no | table |\n");
    let output = Command::new(bin_path())
        .args(["-e", "strikethrough", input.to_str().expect("path")])
        .output()
        .expect("run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    assert!(stdout.contains("<del>x</del>"));
    assert!(!stdout.contains("<table>"));
    let _ = fs::remove_file(input);
}

#[test]
fn smart_and_unsafe_flags() {
    let input = temp_file("smart", "\"hi\" <b>raw</b>\n");
    let output = Command::new(bin_path())
        .args(["--smart", "--unsafe", input.to_str().expect("path")])
        .output()
        .expect("run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    assert!(stdout.contains("\u{201C}hi\u{201D}"));
    // --unsafe is a no-op: raw HTML passes through either way.
    assert!(stdout.contains("<b>raw</b>"));
    let _ = fs::remove_file(input);
}

#[test]
fn unknown_flag_exits_with_usage_error() {
    let output = Command::new(bin_path())
        .arg("--bogus")
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn unknown_extension_exits_with_usage_error() {
    let output = Command::new(bin_path())
        .args(["-e", "bogus"])
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn missing_file_is_an_io_failure() {
    let output = Command::new(bin_path())
        .arg("/definitely/not/a/real/file.md")
        .output()
        .expect("run");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn sanitized_output_stays_within_the_allow_list() {
    let input = temp_file("sani", "<div onclick=\"evil()\">x</div>\n\n**ok**\n");
    let output = Command::new(bin_path())
        .args(["--sanitized", input.to_str().expect("path")])
        .output()
        .expect("run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    assert!(!stdout.contains("onclick"));
    assert!(!stdout.contains("<div"));
    assert!(stdout.contains("<strong>ok</strong>"));
    let _ = fs::remove_file(input);
}
