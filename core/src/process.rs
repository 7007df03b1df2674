//! Blocking external-process invocation with a wall-clock budget.

use std::io::{self, Read};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Non-negative seconds from configuration; NaN and negatives become zero.
pub fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value.min(1.0e9))
    } else {
        Duration::ZERO
    }
}

/// Captured result of a process that exited on its own.
#[derive(Debug, Clone)]
pub struct CompletedProcess {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl CompletedProcess {
    /// stdout followed by stderr; some tools report on either stream.
    pub fn combined_output(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    Completed(CompletedProcess),
    TimedOut { elapsed: Duration },
}

/// Runs `command` to completion or until `budget` elapses.
///
/// Both output pipes are drained on reader threads while the child runs, so
/// a chatty process cannot stall on a full pipe. A process still running at
/// the deadline is reported as `TimedOut`; it is killed and reaped so no
/// zombie is left behind.
pub fn run_with_timeout(command: &mut Command, budget: Duration) -> io::Result<ProcessOutcome> {
    let started = Instant::now();
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let stdout = collect(child.stdout.take());
    let stderr = collect(child.stderr.take());

    loop {
        if let Some(status) = child.try_wait()? {
            // Grandchildren may still hold the pipes; wait no longer than the budget allows.
            let linger = budget.saturating_sub(started.elapsed()).max(POLL_INTERVAL);
            return Ok(ProcessOutcome::Completed(CompletedProcess {
                success: status.success(),
                code: status.code(),
                stdout: finish(&stdout, linger)?,
                stderr: finish(&stderr, linger)?,
                elapsed: started.elapsed(),
            }));
        }

        if started.elapsed() >= budget {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(ProcessOutcome::TimedOut {
                elapsed: started.elapsed(),
            });
        }

        thread::sleep(POLL_INTERVAL);
    }
}

/// Reads `pipe` to EOF on its own thread.
fn collect<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<io::Result<Vec<u8>>> {
    let (sender, receiver) = mpsc::channel();
    match pipe {
        Some(mut pipe) => {
            thread::spawn(move || {
                let mut buffer = Vec::new();
                let result = pipe.read_to_end(&mut buffer).map(|_| buffer);
                let _ = sender.send(result);
            });
        }
        None => {
            let _ = sender.send(Ok(Vec::new()));
        }
    }
    receiver
}

fn finish(output: &Receiver<io::Result<Vec<u8>>>, linger: Duration) -> io::Result<String> {
    let bytes = match output.recv_timeout(linger) {
        Ok(result) => result?,
        Err(_) => {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "output pipe still open after the process exited",
            ))
        }
    };
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
