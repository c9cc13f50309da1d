// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmexec contributors
//
// In-process session loop tests over real FIFOs: request/response
// alternation, sentinel exchange, diagnostics, response-deadline exit.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use shmexec::dispatcher::{serve_session, SessionEnd};
use shmexec::{
    AdmissionRecord, CommandHandler, CommandSet, HandlerOutcome, RequestContext, RequestPipe,
    ResponseReceiver, Session, EXIT_SENTINEL, FAREWELL,
};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_path(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir()
        .join(format!("shmexec_disp_{prefix}_{}_{n}", std::process::id()))
        .to_string_lossy()
        .into_owned()
}

const DEADLINE: Option<Duration> = Some(Duration::from_secs(5));

/// Minimal handler echoing the command line back.
struct Echo;

impl CommandHandler for Echo {
    fn handle(
        &self,
        _ctx: &RequestContext<'_>,
        command_line: &str,
        sink: &mut Vec<u8>,
    ) -> HandlerOutcome {
        let _ = write!(sink, "echo: {command_line}");
        HandlerOutcome::Ok
    }
}

struct Endpoints {
    request: RequestPipe,
    response: ResponseReceiver,
    record: AdmissionRecord,
}

fn client_endpoints(prefix: &str) -> Endpoints {
    let req_path = unique_path(&format!("{prefix}_req"));
    let res_path = unique_path(&format!("{prefix}_res"));
    let request = RequestPipe::create(&req_path).unwrap();
    let response = ResponseReceiver::create(&res_path).unwrap();
    let record = AdmissionRecord::new(
        &req_path,
        &res_path,
        std::process::id() as i32,
        unsafe { libc::getuid() },
    )
    .unwrap();
    Endpoints {
        request,
        response,
        record,
    }
}

#[test]
fn alternation_then_sentinel_farewell() {
    let ep = client_endpoints("alt");
    let record = ep.record;

    let server = thread::spawn(move || {
        let mut session = Session::open(record).unwrap();
        serve_session(&mut session, &Echo, -1, DEADLINE)
    });

    assert!(ep.request.send("ls -l", DEADLINE).unwrap());
    let first = ep.response.recv(DEADLINE).unwrap().unwrap();
    assert_eq!(first, b"echo: ls -l");

    assert!(ep.request.send("pwd", DEADLINE).unwrap());
    let second = ep.response.recv(DEADLINE).unwrap().unwrap();
    assert_eq!(second, b"echo: pwd");

    assert!(ep.request.send(EXIT_SENTINEL, DEADLINE).unwrap());
    let farewell = ep.response.recv(DEADLINE).unwrap().unwrap();
    assert_eq!(farewell, FAREWELL.as_bytes());

    assert!(matches!(server.join().unwrap(), SessionEnd::Sentinel));
}

#[test]
fn empty_command_gets_diagnostic_and_session_survives() {
    let ep = client_endpoints("empty");
    let record = ep.record;

    let server = thread::spawn(move || {
        let mut session = Session::open(record).unwrap();
        serve_session(&mut session, &CommandSet, -1, DEADLINE)
    });

    assert!(ep.request.send("", DEADLINE).unwrap());
    let diag = ep.response.recv(DEADLINE).unwrap().unwrap();
    assert!(!diag.is_empty());

    // Still in Receiving: a valid command works afterwards.
    assert!(ep.request.send("pwd", DEADLINE).unwrap());
    let payload = ep.response.recv(DEADLINE).unwrap().unwrap();
    let cwd = std::env::current_dir().unwrap();
    assert_eq!(
        String::from_utf8_lossy(&payload).trim_end(),
        cwd.to_string_lossy()
    );

    assert!(ep.request.send(EXIT_SENTINEL, DEADLINE).unwrap());
    let _ = ep.response.recv(DEADLINE).unwrap().unwrap();
    assert!(matches!(server.join().unwrap(), SessionEnd::Sentinel));
}

#[test]
fn response_limit_applies_to_session_responses() {
    let ep = client_endpoints("limit");
    let record = ep.record;

    let server = thread::spawn(move || {
        let mut session = Session::open(record).unwrap();
        serve_session(&mut session, &Echo, 4, DEADLINE)
    });

    assert!(ep.request.send("abcdefgh", DEADLINE).unwrap());
    let payload = ep.response.recv(DEADLINE).unwrap().unwrap();
    assert_eq!(payload, b"echo"); // "echo: abcdefgh" capped at 4 bytes

    assert!(ep.request.send(EXIT_SENTINEL, DEADLINE).unwrap());
    let _ = ep.response.recv(DEADLINE).unwrap();
    assert!(matches!(server.join().unwrap(), SessionEnd::Sentinel));
}

#[test]
fn response_deadline_signals_client_and_ends_session() {
    let req_path = unique_path("deadline_req");
    let res_path = unique_path("deadline_res");
    let request = RequestPipe::create(&req_path).unwrap();
    // The response FIFO exists but no reader ever opens it — the shape of a
    // client that died right after sending its command.
    let cpath = std::ffi::CString::new(res_path.clone()).unwrap();
    assert_eq!(
        unsafe { libc::mkfifo(cpath.as_ptr(), libc::S_IRUSR | libc::S_IWUSR) },
        0
    );

    // A throwaway child stands in for the dead client so the worker's
    // warning signal does not land on this test process.
    let mut child = std::process::Command::new("sleep")
        .arg("30")
        .spawn()
        .unwrap();

    let record = AdmissionRecord::new(&req_path, &res_path, child.id() as i32, unsafe {
        libc::getuid()
    })
    .unwrap();

    let server = thread::spawn(move || {
        let mut session = Session::open(record).unwrap();
        serve_session(&mut session, &Echo, -1, Some(Duration::from_millis(300)))
    });

    assert!(request.send("pwd", DEADLINE).unwrap());
    assert!(matches!(
        server.join().unwrap(),
        SessionEnd::ResponseDeadline
    ));
    // The deadline signal has terminate-by-default semantics, so the child
    // should be gone shortly after the worker gave up.
    let status = child.wait().unwrap();
    assert!(!status.success());
    unsafe { libc::unlink(cpath.as_ptr()) };
}

#[test]
fn missing_request_pipe_is_a_pipe_error() {
    let record = AdmissionRecord::new(
        &unique_path("nopipe_req"),
        &unique_path("nopipe_res"),
        std::process::id() as i32,
        0,
    )
    .unwrap();
    assert!(matches!(
        Session::open(record),
        Err(shmexec::Error::Pipe(_))
    ));
}
