// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmexec contributors
//
// The command catalogue behind the dispatcher's handler seam. Four system
// utilities run as child processes with stdout and stderr merged into the
// sink; the rest are in-process built-ins. Anything outside the allow-list
// is rejected before a process is ever spawned.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::FromRawFd;
use std::process::{Command, Stdio};

use log::debug;

use crate::session::{CommandHandler, HandlerOutcome, RequestContext};

/// Commands executed as child processes.
const EXTERNAL: &[&str] = &["ls", "ps", "pwd", "rm"];

/// Commands implemented in-process.
const BUILTIN: &[&str] = &["help", "info", "ccp", "lsl", "uinfo"];

/// Whether `cmd`'s first token is in the catalogue. The sentinel `exit`
/// counts: the client validates it locally even though the server-side
/// handler never sees it.
pub fn is_command_available(cmd: &str) -> bool {
    match cmd.split_whitespace().next() {
        None => false,
        Some(prefix) => {
            prefix == crate::EXIT_SENTINEL
                || EXTERNAL.contains(&prefix)
                || BUILTIN.contains(&prefix)
        }
    }
}

/// The catalogue text shared by the `help` command and `--help`.
pub fn help_text() -> &'static str {
    "Usual commands:\n\
     \x20   - ls ...          : any variant of ls\n\
     \x20   - ps ...          : any variant of ps\n\
     \x20   - pwd ...         : any variant of pwd\n\
     \x20   - rm ...          : any variant of rm\n\
     \x20   - exit            : disconnect from the server\n\
     Custom commands:\n\
     \x20   - help            : print this catalogue\n\
     \x20   - info [pid]      : process information (defaults to your pid)\n\
     \x20   - ccp -f <src> -d <dest> [-v] [-a] [-b N] [-e N]\n\
     \x20                     : copy src to dest; -v refuses to overwrite,\n\
     \x20                       -a appends, -b/-e bound the copied byte range\n\
     \x20   - lsl [dir]       : long listing with inodes\n\
     \x20   - uinfo           : your user identity as the server sees it\n"
}

/// The default command handler wired into the server binary.
pub struct CommandSet;

impl CommandHandler for CommandSet {
    fn handle(
        &self,
        ctx: &RequestContext<'_>,
        command_line: &str,
        sink: &mut Vec<u8>,
    ) -> HandlerOutcome {
        let tokens: Vec<&str> = command_line.split_whitespace().collect();
        let Some(&prefix) = tokens.first() else {
            let _ = writeln!(sink, "Empty command");
            return HandlerOutcome::InvalidCommand;
        };
        debug!("dispatching {prefix:?} for pid {}", ctx.pid());
        match prefix {
            _ if EXTERNAL.contains(&prefix) => run_external(&tokens, sink),
            "help" => {
                sink.extend_from_slice(help_text().as_bytes());
                HandlerOutcome::Ok
            }
            "info" => run_info(ctx, &tokens, sink),
            "ccp" => run_ccp(&tokens, sink),
            "lsl" => run_lsl(&tokens, sink),
            "uinfo" => run_uinfo(ctx, sink),
            _ => {
                let _ = writeln!(sink, "Unknown command: {prefix}");
                HandlerOutcome::InvalidCommand
            }
        }
    }
}

// ---------------------------------------------------------------------------
// External commands
// ---------------------------------------------------------------------------

/// Fork/exec the command with stdout and stderr redirected into one pipe and
/// drain that pipe into the sink, so the client sees both streams interleaved
/// the way the child produced them.
fn run_external(tokens: &[&str], sink: &mut Vec<u8>) -> HandlerOutcome {
    let mut fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        let _ = writeln!(sink, "Cannot run {}: pipe failed", tokens[0]);
        return HandlerOutcome::Failed;
    }
    let [read_fd, write_fd] = fds;
    let stdout_fd = unsafe { libc::dup(write_fd) };
    if stdout_fd == -1 {
        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
        let _ = writeln!(sink, "Cannot run {}: dup failed", tokens[0]);
        return HandlerOutcome::Failed;
    }

    let spawned = {
        let mut cmd = Command::new(tokens[0]);
        cmd.args(&tokens[1..])
            .stdin(Stdio::null())
            .stdout(unsafe { Stdio::from_raw_fd(stdout_fd) })
            .stderr(unsafe { Stdio::from_raw_fd(write_fd) });
        cmd.spawn()
        // `cmd` drops here, closing the parent's copies of the write end.
    };

    let mut reader = unsafe { File::from_raw_fd(read_fd) };
    let mut child = match spawned {
        Ok(child) => child,
        Err(err) => {
            let _ = writeln!(sink, "Cannot run {}: {err}", tokens[0]);
            return HandlerOutcome::Failed;
        }
    };

    if let Err(err) = reader.read_to_end(sink) {
        let _ = writeln!(sink, "Cannot capture output of {}: {err}", tokens[0]);
        let _ = child.wait();
        return HandlerOutcome::Failed;
    }
    match child.wait() {
        Ok(_) => HandlerOutcome::Ok,
        Err(err) => {
            let _ = writeln!(sink, "Cannot reap {}: {err}", tokens[0]);
            HandlerOutcome::Failed
        }
    }
}

// ---------------------------------------------------------------------------
// info
// ---------------------------------------------------------------------------

fn run_info(ctx: &RequestContext<'_>, tokens: &[&str], sink: &mut Vec<u8>) -> HandlerOutcome {
    let pid: i32 = match tokens.get(1) {
        None => ctx.pid(),
        Some(arg) => match arg.parse() {
            Ok(pid) => pid,
            Err(_) => {
                let _ = writeln!(sink, "Usage: info [pid]");
                return HandlerOutcome::Failed;
            }
        },
    };
    let _ = writeln!(sink, "----- Process {pid} -----");

    let cmdline = match std::fs::read(format!("/proc/{pid}/cmdline")) {
        Ok(bytes) => bytes,
        Err(err) => {
            let _ = writeln!(sink, "Cannot read /proc/{pid}/cmdline: {err}");
            return HandlerOutcome::Failed;
        }
    };
    // cmdline separates arguments with NULs.
    let printable: Vec<u8> = cmdline
        .iter()
        .map(|&b| if b == 0 { b' ' } else { b })
        .collect();
    let _ = writeln!(
        sink,
        "[{pid}] Command : {}",
        String::from_utf8_lossy(&printable).trim_end()
    );

    let status = match std::fs::read_to_string(format!("/proc/{pid}/status")) {
        Ok(text) => text,
        Err(err) => {
            let _ = writeln!(sink, "Cannot read /proc/{pid}/status: {err}");
            return HandlerOutcome::Failed;
        }
    };
    for line in status.lines() {
        if line.starts_with("State:") || line.starts_with("Tgid:") || line.starts_with("PPid:") {
            let _ = writeln!(sink, "[{pid}] {line}");
        }
    }
    HandlerOutcome::Ok
}

// ---------------------------------------------------------------------------
// ccp
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CcpArgs {
    src: Option<String>,
    dest: Option<String>,
    verify: bool,
    append: bool,
    begin: Option<u64>,
    end: Option<u64>,
}

fn parse_ccp(tokens: &[&str]) -> Result<CcpArgs, String> {
    let mut args = CcpArgs::default();
    let mut it = tokens[1..].iter();
    while let Some(&tok) = it.next() {
        match tok {
            "-f" => {
                args.src = Some(
                    it.next()
                        .ok_or_else(|| "-f requires a source path".to_string())?
                        .to_string(),
                )
            }
            "-d" => {
                args.dest = Some(
                    it.next()
                        .ok_or_else(|| "-d requires a destination path".to_string())?
                        .to_string(),
                )
            }
            "-v" => args.verify = true,
            "-a" => args.append = true,
            "-b" => {
                let v = it.next().ok_or_else(|| "-b requires an offset".to_string())?;
                args.begin = Some(v.parse().map_err(|_| format!("bad -b offset: {v}"))?);
            }
            "-e" => {
                let v = it.next().ok_or_else(|| "-e requires an offset".to_string())?;
                args.end = Some(v.parse().map_err(|_| format!("bad -e offset: {v}"))?);
            }
            other => return Err(format!("unknown flag: {other}")),
        }
    }
    if args.src.is_none() || args.dest.is_none() {
        return Err("both -f <src> and -d <dest> are required".to_string());
    }
    if let (Some(b), Some(e)) = (args.begin, args.end) {
        if e < b {
            return Err(format!("-e {e} is before -b {b}"));
        }
    }
    Ok(args)
}

fn run_ccp(tokens: &[&str], sink: &mut Vec<u8>) -> HandlerOutcome {
    let args = match parse_ccp(tokens) {
        Ok(args) => args,
        Err(msg) => {
            let _ = writeln!(sink, "ccp: {msg}");
            let _ = writeln!(sink, "Usage: ccp -f <src> -d <dest> [-v] [-a] [-b N] [-e N]");
            return HandlerOutcome::Failed;
        }
    };
    let src_path = args.src.unwrap();
    let dest_path = args.dest.unwrap();

    if args.verify && std::path::Path::new(&dest_path).exists() {
        let _ = writeln!(sink, "ccp: {dest_path} already exists");
        return HandlerOutcome::Failed;
    }

    let mut src = match File::open(&src_path) {
        Ok(f) => f,
        Err(err) => {
            let _ = writeln!(sink, "ccp: cannot open {src_path}: {err}");
            return HandlerOutcome::Failed;
        }
    };
    let src_len = match src.metadata() {
        Ok(meta) => meta.len(),
        Err(err) => {
            let _ = writeln!(sink, "ccp: cannot stat {src_path}: {err}");
            return HandlerOutcome::Failed;
        }
    };

    let begin = args.begin.unwrap_or(0).min(src_len);
    let end = args.end.unwrap_or(src_len).min(src_len);
    let to_copy = end.saturating_sub(begin);

    if begin > 0 {
        if let Err(err) = src.seek(SeekFrom::Start(begin)) {
            let _ = writeln!(sink, "ccp: cannot seek in {src_path}: {err}");
            return HandlerOutcome::Failed;
        }
    }

    let dest = OpenOptions::new()
        .write(true)
        .create(true)
        .append(args.append)
        .truncate(!args.append)
        .open(&dest_path);
    let mut dest = match dest {
        Ok(f) => f,
        Err(err) => {
            let _ = writeln!(sink, "ccp: cannot open {dest_path}: {err}");
            return HandlerOutcome::Failed;
        }
    };

    match std::io::copy(&mut src.take(to_copy), &mut dest) {
        Ok(copied) => {
            let _ = writeln!(sink, "ccp: copied {copied} bytes from {src_path} to {dest_path}");
            HandlerOutcome::Ok
        }
        Err(err) => {
            let _ = writeln!(sink, "ccp: copy failed: {err}");
            HandlerOutcome::Failed
        }
    }
}

// ---------------------------------------------------------------------------
// lsl
// ---------------------------------------------------------------------------

fn mode_string(mode: u32) -> String {
    let kind = match mode & libc::S_IFMT {
        libc::S_IFDIR => 'd',
        libc::S_IFLNK => 'l',
        libc::S_IFIFO => 'p',
        libc::S_IFSOCK => 's',
        libc::S_IFBLK => 'b',
        libc::S_IFCHR => 'c',
        _ => '-',
    };
    let mut out = String::with_capacity(10);
    out.push(kind);
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

fn run_lsl(tokens: &[&str], sink: &mut Vec<u8>) -> HandlerOutcome {
    let dir = tokens.get(1).copied().unwrap_or(".");
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            let _ = writeln!(sink, "lsl: cannot read {dir}: {err}");
            return HandlerOutcome::Failed;
        }
    };
    let mut names: Vec<String> = Vec::new();
    for entry in entries {
        match entry {
            Ok(e) => names.push(e.file_name().to_string_lossy().into_owned()),
            Err(err) => {
                let _ = writeln!(sink, "lsl: error while listing {dir}: {err}");
                return HandlerOutcome::Failed;
            }
        }
    }
    names.sort();
    for name in names {
        let path = std::path::Path::new(dir).join(&name);
        match std::fs::symlink_metadata(&path) {
            Ok(meta) => {
                let _ = writeln!(
                    sink,
                    "{:>10} {} {:>3} {:>10} {name}",
                    meta.ino(),
                    mode_string(meta.mode()),
                    meta.nlink(),
                    meta.len(),
                );
            }
            Err(err) => {
                let _ = writeln!(sink, "{name}: {err}");
            }
        }
    }
    HandlerOutcome::Ok
}

// ---------------------------------------------------------------------------
// uinfo
// ---------------------------------------------------------------------------

fn run_uinfo(ctx: &RequestContext<'_>, sink: &mut Vec<u8>) -> HandlerOutcome {
    let uid = ctx.uid();
    let _ = writeln!(sink, "uid: {uid}");
    match std::fs::read_to_string("/etc/passwd") {
        Ok(passwd) => {
            // name:passwd:uid:gid:gecos:home:shell
            for line in passwd.lines() {
                let fields: Vec<&str> = line.split(':').collect();
                if fields.len() >= 7 && fields[2] == uid.to_string() {
                    let _ = writeln!(sink, "user: {}", fields[0]);
                    let _ = writeln!(sink, "home: {}", fields[5]);
                    let _ = writeln!(sink, "shell: {}", fields[6]);
                    break;
                }
            }
            HandlerOutcome::Ok
        }
        Err(err) => {
            let _ = writeln!(sink, "uinfo: cannot read /etc/passwd: {err}");
            HandlerOutcome::Failed
        }
    }
}
