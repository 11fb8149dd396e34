use std::io::Read;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

pub fn command_exists(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Runs `program` with `args` (no shell involved) and returns its output.
/// A non-zero exit status is an error carrying the child's stderr.
pub fn run_command(program: &str, args: &[String], timeout: Option<Duration>) -> Result<Output> {
    if !command_exists(program) {
        return Err(Error::CommandMissing {
            command: program.to_owned(),
        });
    }

    let rendered = format!("{} {}", program, args.join(" "));
    tracing::debug!(command = %rendered, "spawning");

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let output = match timeout {
        None => command.output()?,
        Some(limit) => wait_with_timeout(command, &rendered, limit)?,
    };

    if !output.status.success() {
        return Err(Error::from_command_failure(
            rendered,
            output.status.code().unwrap_or(-1),
            &output.stderr,
        ));
    }
    Ok(output)
}

fn wait_with_timeout(mut command: Command, rendered: &str, limit: Duration) -> Result<Output> {
    let mut child = command.spawn()?;
    let started_at = Instant::now();

    // Drain both pipes on their own threads so a chatty child cannot block on a full pipe.
    let stdout_reader = child.stdout.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    });
    let stderr_reader = child.stderr.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    });

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if started_at.elapsed() >= limit {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::CommandTimedOut {
                command: rendered.to_owned(),
                timeout_ms: limit.as_millis() as u64,
            });
        }
        thread::sleep(Duration::from_millis(20));
    };

    let stdout = stdout_reader
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    let stderr = stderr_reader
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    Ok(Output {
        status,
        stdout,
        stderr,
    })
}
