//! Running the project's build command before tracing.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const WAIT_POLL: Duration = Duration::from_millis(50);

/// Result of running a shell command
#[derive(Debug)]
pub struct CommandResult {
    pub success: bool,
    pub output: String,
    pub duration_ms: u64,
}

/// Run `command` through `sh -c` in `working_dir`, killing it after `timeout_seconds`.
pub fn run_command_with_timeout(working_dir: &Path, command: &str, timeout_seconds: u64) -> CommandResult {
    let start = Instant::now();

    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(working_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();

    let mut child = match child {
        Ok(c) => c,
        Err(e) => {
            return CommandResult {
                success: false,
                output: format!("Failed to spawn command: {}", e),
                duration_ms: start.elapsed().as_millis() as u64,
            };
        }
    };

    // pipes are drained concurrently with the wait
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let timeout = Duration::from_secs(timeout_seconds);
    let status = wait_until(&mut child, start + timeout);
    let duration_ms = start.elapsed().as_millis() as u64;
    let output = format!("{}{}", collect(stdout), collect(stderr));

    match status {
        Ok(Some(status)) => CommandResult {
            success: status.success(),
            output,
            duration_ms,
        },
        Ok(None) => CommandResult {
            success: false,
            output: format!("Command timed out after {} seconds\n{}", timeout_seconds, output),
            duration_ms,
        },
        Err(e) => CommandResult {
            success: false,
            output: format!("Command execution error: {}", e),
            duration_ms,
        },
    }
}

fn wait_until(child: &mut Child, deadline: Instant) -> std::io::Result<Option<std::process::ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            child.kill()?;
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(WAIT_POLL);
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<thread::JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn collect(handle: Option<thread::JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}
