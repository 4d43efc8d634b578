//! Command builder — turns a validated push into a process invocation.
//!
//! The executable comes from configuration only. Payload values become
//! discrete argv entries and never pass through a shell.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::config::CommandConfig;
use crate::models::job::JobId;
use crate::models::push_event::PushEvent;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("build script {path} unavailable: {reason}")]
    ScriptNotFound { path: PathBuf, reason: String },
}

/// A fully resolved build command.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: PathBuf,
    /// Always `[clone_url, branch]`.
    pub args: Vec<String>,
    pub work_dir: Option<PathBuf>,
    /// Sanitized environment, captured from the parent's pass-through list.
    pub env: Vec<(String, OsString)>,
}

/// Resolve the invocation for `event`.
pub fn build(event: &PushEvent, config: &CommandConfig) -> Result<Invocation, BuildError> {
    check_script(&config.script_path)?;

    let env = config
        .env_passthrough
        .iter()
        .filter_map(|name| std::env::var_os(name).map(|value| (name.clone(), value)))
        .collect();

    Ok(Invocation {
        program: config.script_path.clone(),
        args: vec![event.clone_url().to_string(), event.branch().to_string()],
        work_dir: config.work_dir.clone(),
        env,
    })
}

/// Check that `path` is an existing, executable regular file.
pub fn check_script(path: &Path) -> Result<(), BuildError> {
    let not_found = |reason: &str| BuildError::ScriptNotFound {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let meta = std::fs::metadata(path).map_err(|e| not_found(&e.to_string()))?;
    if !meta.is_file() {
        return Err(not_found("not a regular file"));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(not_found("not executable"));
        }
    }

    Ok(())
}

impl Invocation {
    /// Process command for `job_id`: argv only, cleared environment,
    /// piped output, own process group.
    pub fn command(&self, job_id: JobId) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env_clear()
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_os_str())))
            .env("SHIPIRU_JOB_ID", job_id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Lets a timeout kill everything the script started, not just the script.
        #[cfg(unix)]
        cmd.process_group(0);

        if let Some(dir) = &self.work_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}
