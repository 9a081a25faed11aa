//! Single-attempt execution of local commands and remote calls.

use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::job::{Job, JobType};
use crate::template;

/// Captured output is truncated to this many bytes.
pub const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Result of one attempt. Retries and JobStat bookkeeping live in the
/// controller; the executor only reports what happened.
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub success: bool,
    pub output: String,
}

impl AttemptOutcome {
    fn success(output: String) -> Self {
        Self {
            success: true,
            output,
        }
    }

    fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Stateless attempt runner; safe to share across all job controllers.
pub struct Executor {
    http: reqwest::Client,
    clock: SharedClock,
}

impl Executor {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            http: reqwest::Client::new(),
            clock,
        }
    }

    /// Run one attempt of `job`, honoring `cancel`.
    pub async fn attempt(&self, job: &Job, cancel: &CancellationToken) -> AttemptOutcome {
        match job.job_type {
            JobType::Local => self.attempt_local(job, cancel).await,
            JobType::Remote => self.attempt_remote(job, cancel).await,
        }
    }

    async fn attempt_local(&self, job: &Job, cancel: &CancellationToken) -> AttemptOutcome {
        let mut cmd = Command::new(&job.command);
        cmd.args(&job.args)
            .envs(&job.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return AttemptOutcome::failure(format!(
                    "failed to spawn {:?}: {e}",
                    job.command
                ));
            }
        };
        let pid = child.id();

        let wait = child.wait_with_output();
        tokio::pin!(wait);

        tokio::select! {
            out = &mut wait => match out {
                Ok(out) => {
                    let stdout = truncate(&out.stdout);
                    if out.status.success() {
                        AttemptOutcome::success(stdout)
                    } else {
                        let mut output = stdout;
                        let stderr = truncate(&out.stderr);
                        if !stderr.is_empty() {
                            if !output.is_empty() {
                                output.push('\n');
                            }
                            output.push_str(&stderr);
                        }
                        let code = out.status.code().unwrap_or(-1);
                        if output.is_empty() {
                            output = format!("exit code {code}");
                        }
                        debug!(job_id = %job.id, code, "local attempt failed");
                        AttemptOutcome::failure(output)
                    }
                }
                Err(e) => AttemptOutcome::failure(format!("wait failed: {e}")),
            },
            _ = cancel.cancelled() => {
                #[cfg(unix)]
                if let Some(pid) = pid {
                    terminate_process_group(pid);
                }
                // Dropping the wait future reaps the child via kill_on_drop.
                let _ = pid;
                AttemptOutcome::failure("attempt cancelled")
            }
        }
    }

    async fn attempt_remote(&self, job: &Job, cancel: &CancellationToken) -> AttemptOutcome {
        let now = self.clock.now();
        let props = &job.remote_properties;

        let url = match template::render(&props.url, now) {
            Ok(url) => url,
            Err(e) => return AttemptOutcome::failure(e.to_string()),
        };
        let body = match template::render(&props.body, now) {
            Ok(body) => body,
            Err(e) => return AttemptOutcome::failure(e.to_string()),
        };

        let method = if props.method.is_empty() {
            reqwest::Method::GET
        } else {
            match reqwest::Method::from_bytes(props.method.to_uppercase().as_bytes()) {
                Ok(m) => m,
                Err(_) => {
                    return AttemptOutcome::failure(format!(
                        "invalid http method {:?}",
                        props.method
                    ));
                }
            }
        };

        let mut req = self.http.request(method, &url);
        if let Some(timeout) = props.response_timeout() {
            req = req.timeout(timeout);
        }
        for (name, value) in &props.headers {
            req = req.header(name, value);
        }
        if !body.is_empty() {
            req = req.body(body);
        }

        let send = req.send();
        tokio::pin!(send);

        let response = tokio::select! {
            res = &mut send => res,
            _ = cancel.cancelled() => {
                return AttemptOutcome::failure("attempt cancelled");
            }
        };

        match response {
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                let body = truncate(body.as_bytes());
                if props.is_expected(status.as_u16()) {
                    AttemptOutcome::success(body)
                } else {
                    debug!(job_id = %job.id, %status, "unexpected response status");
                    AttemptOutcome::failure(status.to_string())
                }
            }
            Err(e) if e.is_timeout() => {
                warn!(job_id = %job.id, %url, "remote attempt timed out");
                AttemptOutcome::failure(format!("timeout calling {url}"))
            }
            Err(e) => AttemptOutcome::failure(format!("request failed: {e}")),
        }
    }
}

fn truncate(bytes: &[u8]) -> String {
    let cut = bytes.len().min(MAX_OUTPUT_BYTES);
    String::from_utf8_lossy(&bytes[..cut]).into_owned()
}

/// Signal the child's process group so grandchildren go down with it.
#[cfg(unix)]
fn terminate_process_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        debug!(pid, "failed to signal process group: {e}");
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
