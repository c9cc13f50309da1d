// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmexec contributors
//
// Command layer tests: allow-list, external capture, built-ins.

use std::sync::atomic::{AtomicUsize, Ordering};

use shmexec::commands::{help_text, is_command_available};
use shmexec::{AdmissionRecord, CommandHandler, CommandSet, HandlerOutcome, RequestContext};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn scratch_dir(prefix: &str) -> std::path::PathBuf {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("shmexec_cmd_{prefix}_{}_{n}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn caller_record() -> AdmissionRecord {
    let pid = std::process::id() as i32;
    AdmissionRecord::new(
        &format!("./tmp/pipe_request_{pid}"),
        &format!("./tmp/pipe_response_{pid}"),
        pid,
        unsafe { libc::getuid() },
    )
    .unwrap()
}

fn run(cmd: &str) -> (HandlerOutcome, Vec<u8>) {
    let record = caller_record();
    let ctx = RequestContext::new(&record);
    let mut sink = Vec::new();
    let outcome = CommandSet.handle(&ctx, cmd, &mut sink);
    (outcome, sink)
}

#[test]
fn allow_list_matches_catalogue() {
    for cmd in ["ls -la", "ps aux", "pwd", "rm -f x", "exit", "help", "info", "ccp", "lsl", "uinfo"] {
        assert!(is_command_available(cmd), "{cmd:?}");
    }
    for cmd in ["cat x", "sh", "exitx", ""] {
        assert!(!is_command_available(cmd), "{cmd:?}");
    }
}

#[test]
fn unknown_command_is_invalid_with_diagnostic() {
    let (outcome, sink) = run("definitely-not-a-command");
    assert_eq!(outcome, HandlerOutcome::InvalidCommand);
    assert!(String::from_utf8_lossy(&sink).contains("definitely-not-a-command"));
}

#[test]
fn empty_command_is_invalid() {
    let (outcome, sink) = run("   ");
    assert_eq!(outcome, HandlerOutcome::InvalidCommand);
    assert!(!sink.is_empty());
}

#[test]
fn pwd_reports_current_directory() {
    let (outcome, sink) = run("pwd");
    assert_eq!(outcome, HandlerOutcome::Ok);
    let cwd = std::env::current_dir().unwrap();
    let text = String::from_utf8_lossy(&sink);
    assert_eq!(text.trim_end(), cwd.to_string_lossy());
}

#[test]
fn external_command_captures_stderr_too() {
    let (outcome, sink) = run("ls /shmexec/definitely/not/here");
    // The child ran and produced its complaint on stderr; running it is not
    // a handler failure.
    assert_eq!(outcome, HandlerOutcome::Ok);
    assert!(!sink.is_empty());
}

#[test]
fn help_prints_the_catalogue() {
    let (outcome, sink) = run("help");
    assert_eq!(outcome, HandlerOutcome::Ok);
    let text = String::from_utf8_lossy(&sink);
    for name in ["ls", "ps", "pwd", "rm", "exit", "info", "ccp", "lsl", "uinfo"] {
        assert!(text.contains(name), "help text misses {name}");
    }
    assert_eq!(sink, help_text().as_bytes());
}

#[test]
fn info_defaults_to_the_calling_pid() {
    let (outcome, sink) = run("info");
    assert_eq!(outcome, HandlerOutcome::Ok);
    let text = String::from_utf8_lossy(&sink);
    assert!(text.contains(&format!("Process {}", std::process::id())));
    assert!(text.contains("Command :"));
    assert!(text.contains("State:"));
    assert!(text.contains("PPid:"));
}

#[test]
fn info_rejects_garbage_pid() {
    let (outcome, sink) = run("info not-a-pid");
    assert_eq!(outcome, HandlerOutcome::Failed);
    assert!(String::from_utf8_lossy(&sink).contains("Usage"));
}

#[test]
fn ccp_copies_a_byte_range() {
    let dir = scratch_dir("ccp_range");
    let src = dir.join("src.txt");
    let dest = dir.join("dest.txt");
    std::fs::write(&src, b"0123456789").unwrap();

    let cmd = format!(
        "ccp -f {} -d {} -b 2 -e 5",
        src.display(),
        dest.display()
    );
    let (outcome, _) = run(&cmd);
    assert_eq!(outcome, HandlerOutcome::Ok);
    assert_eq!(std::fs::read(&dest).unwrap(), b"234");
}

#[test]
fn ccp_verify_refuses_to_overwrite() {
    let dir = scratch_dir("ccp_verify");
    let src = dir.join("src.txt");
    let dest = dir.join("dest.txt");
    std::fs::write(&src, b"new").unwrap();
    std::fs::write(&dest, b"old").unwrap();

    let cmd = format!("ccp -f {} -d {} -v", src.display(), dest.display());
    let (outcome, sink) = run(&cmd);
    assert_eq!(outcome, HandlerOutcome::Failed);
    assert!(String::from_utf8_lossy(&sink).contains("already exists"));
    assert_eq!(std::fs::read(&dest).unwrap(), b"old");
}

#[test]
fn ccp_append_extends_destination() {
    let dir = scratch_dir("ccp_append");
    let src = dir.join("src.txt");
    let dest = dir.join("dest.txt");
    std::fs::write(&src, b"tail").unwrap();
    std::fs::write(&dest, b"head-").unwrap();

    let cmd = format!("ccp -f {} -d {} -a", src.display(), dest.display());
    let (outcome, _) = run(&cmd);
    assert_eq!(outcome, HandlerOutcome::Ok);
    assert_eq!(std::fs::read(&dest).unwrap(), b"head-tail");
}

#[test]
fn ccp_without_operands_fails_with_usage() {
    let (outcome, sink) = run("ccp -v");
    assert_eq!(outcome, HandlerOutcome::Failed);
    assert!(String::from_utf8_lossy(&sink).contains("Usage"));
}

#[test]
fn lsl_lists_entries_sorted() {
    let dir = scratch_dir("lsl");
    std::fs::write(dir.join("bbb"), b"2").unwrap();
    std::fs::write(dir.join("aaa"), b"1").unwrap();

    let (outcome, sink) = run(&format!("lsl {}", dir.display()));
    assert_eq!(outcome, HandlerOutcome::Ok);
    let text = String::from_utf8_lossy(&sink);
    let pos_a = text.find("aaa").unwrap();
    let pos_b = text.find("bbb").unwrap();
    assert!(pos_a < pos_b, "entries must be sorted: {text}");
    // Every line carries inode, mode string, link count, size, name.
    for line in text.lines() {
        assert!(line.contains("-rw") || line.contains("drw") || line.contains('-'));
    }
}

#[test]
fn lsl_missing_directory_fails() {
    let (outcome, sink) = run("lsl /shmexec/definitely/not/here");
    assert_eq!(outcome, HandlerOutcome::Failed);
    assert!(!sink.is_empty());
}

#[test]
fn uinfo_reports_the_calling_uid() {
    let (outcome, sink) = run("uinfo");
    assert_eq!(outcome, HandlerOutcome::Ok);
    let uid = unsafe { libc::getuid() };
    assert!(String::from_utf8_lossy(&sink).contains(&format!("uid: {uid}")));
}
