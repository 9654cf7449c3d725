//! Interactive children under a timeout
//!
//! The locker runs on a pseudo-terminal; a timed child must still be able to
//! read from it.

use portable_pty::{ChildKiller, CommandBuilder, PtySize};
use std::io::{self, Read, Write};
use std::process::Command;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const BIN: &str = env!("CARGO_BIN_EXE_agent-locker");

fn captured_until(rx: &mpsc::Receiver<Vec<u8>>, needle: &str, limit: Duration) -> String {
    let deadline = Instant::now() + limit;
    let mut captured = Vec::new();
    while !String::from_utf8_lossy(&captured).contains(needle) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(chunk) => captured.extend_from_slice(&chunk),
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&captured).into_owned()
}

#[test]
fn timed_child_can_read_the_terminal() -> io::Result<()> {
    let dir = TempDir::new()?;
    let home = dir.path().join("home");
    let work = dir.path().join("work");
    std::fs::create_dir_all(&home)?;
    std::fs::create_dir_all(&work)?;
    let policy = dir.path().join("policy.json");
    let audit = dir.path().join("audit.log");

    let init = Command::new(BIN)
        .env("HOME", &home)
        .env("AGENT_LOCKER_POLICY", &policy)
        .arg("init")
        .status()?;
    assert!(init.success());

    let pair = portable_pty::native_pty_system()
        .openpty(PtySize {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|err| io::Error::other(err.to_string()))?;

    let mut cmd = CommandBuilder::new(BIN);
    cmd.cwd(&work);
    cmd.env("HOME", &home);
    cmd.env("AGENT_LOCKER_POLICY", &policy);
    cmd.env("AGENT_LOCKER_AUDIT_LOG", &audit);
    cmd.env_remove("AGENT_LOCKER_TEST_MODE");
    cmd.args([
        "run",
        "--execute",
        "--timeout-sec",
        "10",
        "--",
        "sh",
        "-c",
        "read x; echo got:$x",
    ]);
    let mut child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|err| io::Error::other(err.to_string()))?;
    drop(pair.slave);

    let mut reader = pair
        .master
        .try_clone_reader()
        .map_err(|err| io::Error::other(err.to_string()))?;
    let mut writer = pair
        .master
        .take_writer()
        .map_err(|err| io::Error::other(err.to_string()))?;

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    writer.write_all(b"typed\n")?;
    writer.flush()?;

    let output = captured_until(&rx, "got:typed", Duration::from_secs(8));
    if !output.contains("got:typed") {
        let _ = child.kill();
        panic!("child never read the terminal; output: {output:?}");
    }

    let status = child.wait()?;
    assert!(status.success(), "exit status {:?}; output: {output:?}", status);
    Ok(())
}
