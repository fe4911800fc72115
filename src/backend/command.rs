use std::path::PathBuf;
use std::process::Stdio;

use chrono::Utc;
use tokio::process::Command;
use tokio::time::{Instant, timeout_at};

use crate::backend::{ExternalOpener, FetchRequest, LogBackend};
use crate::error::{ExternalProcessError, FetchError};
use crate::logging::LogEntry;

/// Splits a configured command line into program and arguments.
///
/// Placeholders (`{filter}`, `{project}`, `{limit}`) are kept intact and
/// substituted per argument at call time, so a filter is always passed as
/// one argument and never goes through a shell.
pub fn parse_command_template(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// Log backend that shells out to a CLI (by default `gcloud logging read`)
/// and parses its JSON array output.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    fetch_command: Vec<String>,
    projects_command: Vec<String>,
}

impl CommandBackend {
    pub fn new(fetch_command: Vec<String>, projects_command: Vec<String>) -> Self {
        Self {
            fetch_command,
            projects_command,
        }
    }

    fn render_fetch_args(&self, request: &FetchRequest) -> Vec<String> {
        let limit = request.limit.to_string();
        self.fetch_command
            .iter()
            .map(|arg| {
                arg.replace("{project}", request.project.as_str())
                    .replace("{limit}", &limit)
                    .replace("{filter}", &request.filter)
            })
            .collect()
    }
}

impl LogBackend for CommandBackend {
    async fn fetch(&self, request: FetchRequest) -> Result<Vec<LogEntry>, FetchError> {
        let argv = self.render_fetch_args(&request);
        tracing::info!(
            "Fetching logs for project '{}' (limit {}, timeout {}s)",
            request.project,
            request.limit,
            request.timeout.as_secs()
        );
        tracing::debug!("Backend filter: {}", request.filter);

        let stdout = run_captured(&argv, "fetch", request.deadline, request.timeout.as_secs()).await?;
        parse_entries(&stdout)
    }

    async fn list_projects(&self) -> Result<Vec<String>, FetchError> {
        // Project discovery has no caller-supplied deadline
        let timeout_secs = 30;
        let deadline = Instant::now() + std::time::Duration::from_secs(timeout_secs);
        let stdout = run_captured(&self.projects_command, "projects", deadline, timeout_secs).await?;

        let projects: Vec<String> = String::from_utf8_lossy(&stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        tracing::info!("Discovered {} projects", projects.len());
        Ok(projects)
    }
}

async fn run_captured(
    argv: &[String],
    purpose: &'static str,
    deadline: Instant,
    timeout_secs: u64,
) -> Result<Vec<u8>, FetchError> {
    let (program, args) = argv
        .split_first()
        .ok_or(FetchError::NotConfigured(purpose))?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .env("NO_COLOR", "1")
        .env("CLICOLOR", "0");

    let child = cmd.spawn().map_err(|e| FetchError::Launch {
        program: program.clone(),
        message: e.to_string(),
    })?;

    let output = match timeout_at(deadline, child.wait_with_output()).await {
        Ok(output) => output.map_err(|e| FetchError::Launch {
            program: program.clone(),
            message: e.to_string(),
        })?,
        Err(_) => {
            tracing::error!("Backend command '{program}' timed out after {timeout_secs} seconds");
            return Err(FetchError::DeadlineExceeded { timeout_secs });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        tracing::error!("Backend command '{program}' failed: {stderr}");
        return Err(FetchError::Backend {
            code: output.status.code(),
            stderr,
        });
    }

    Ok(output.stdout)
}

fn parse_entries(stdout: &[u8]) -> Result<Vec<LogEntry>, FetchError> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(stdout).map_err(|e| FetchError::Malformed(e.to_string()))
}

/// Opens content in an external program, e.g. `$EDITOR` or a pager.
#[derive(Debug, Clone)]
pub struct CommandOpener {
    command: Vec<String>,
    staging_dir: PathBuf,
}

impl CommandOpener {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            staging_dir: std::env::temp_dir(),
        }
    }

    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    fn staging_path(&self, extension: &str) -> PathBuf {
        let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let extension = extension.trim_start_matches('.');
        self.staging_dir
            .join(format!("logdeck-{}-{stamp}.{extension}", std::process::id()))
    }
}

impl ExternalOpener for CommandOpener {
    async fn open(&self, content: Vec<u8>, extension: &str) -> Result<(), ExternalProcessError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or(ExternalProcessError::NotConfigured)?;

        let path = self.staging_path(extension);
        tokio::fs::write(&path, content)
            .await
            .map_err(|source| ExternalProcessError::Stage {
                program: program.clone(),
                source,
            })?;

        tracing::info!("Opening {} with {program}", path.display());
        let status = Command::new(program).args(args).arg(&path).status().await;

        // Staged copies never outlive the viewer.
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!("Failed to remove staged file {}: {e}", path.display());
        }

        let status = status.map_err(|source| ExternalProcessError::Launch {
            program: program.clone(),
            source,
        })?;

        if !status.success() {
            return Err(ExternalProcessError::ExitStatus {
                program: program.clone(),
                code: status.code(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProjectId;
    use std::time::Duration;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn request(filter: &str, timeout: Duration) -> FetchRequest {
        FetchRequest::new(ProjectId::new("p1"), filter.to_string(), 50, timeout)
    }

    #[test]
    fn test_template_substitution() {
        let backend = CommandBackend::new(
            parse_command_template("gcloud logging read {filter} --project={project} --limit={limit}"),
            Vec::new(),
        );
        let args = backend.render_fetch_args(&request("severity>=ERROR AND x=\"a b\"", Duration::from_secs(1)));
        assert_eq!(
            args,
            [
                "gcloud",
                "logging",
                "read",
                "severity>=ERROR AND x=\"a b\"",
                "--project=p1",
                "--limit=50"
            ]
        );
    }

    #[test]
    fn test_parse_entries_accepts_empty_output() {
        assert!(parse_entries(b"  \n").unwrap().is_empty());
        assert!(matches!(parse_entries(b"{oops"), Err(FetchError::Malformed(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fetch_parses_stdout() {
        let backend = CommandBackend::new(
            sh(r#"printf '[{"timestamp":"2024-01-15T12:00:00Z","severity":"ERROR","textPayload":"%s"}]' '{project}'"#),
            Vec::new(),
        );
        let entries = backend
            .fetch(request("ignored", Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message(), "p1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fetch_reports_exit_status() {
        let backend = CommandBackend::new(sh("echo denied >&2; exit 3"), Vec::new());
        let err = backend
            .fetch(request("x", Duration::from_secs(5)))
            .await
            .unwrap_err();
        match err {
            FetchError::Backend { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "denied");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fetch_honours_deadline() {
        let backend = CommandBackend::new(sh("sleep 5"), Vec::new());
        let err = backend
            .fetch(request("x", Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::DeadlineExceeded { .. }));
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_error() {
        let backend = CommandBackend::new(
            vec!["/nonexistent/logdeck-backend".to_string()],
            Vec::new(),
        );
        let err = backend
            .fetch(request("x", Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Launch { .. }));

        let err = backend.list_projects().await.unwrap_err();
        assert!(matches!(err, FetchError::NotConfigured("projects")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_projects_splits_lines() {
        let backend = CommandBackend::new(Vec::new(), sh("printf 'alpha\\n\\n beta \\n'"));
        let projects = backend.list_projects().await.unwrap();
        assert_eq!(projects, ["alpha", "beta"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_opener_stages_file_and_reports_status() {
        let dir = tempfile::tempdir().unwrap();
        let staged = |dir: &tempfile::TempDir| std::fs::read_dir(dir.path()).unwrap().count();

        // `test -s` only succeeds when the staged file exists and is non-empty
        let opener = CommandOpener::new(vec!["test".to_string(), "-s".to_string()])
            .with_staging_dir(dir.path());
        opener.open(b"{}".to_vec(), ".json").await.unwrap();
        assert_eq!(staged(&dir), 0);

        let failing = CommandOpener::new(vec!["false".to_string()]).with_staging_dir(dir.path());
        let err = failing.open(b"{}".to_vec(), "json").await.unwrap_err();
        assert!(matches!(err, ExternalProcessError::ExitStatus { .. }));
        assert_eq!(staged(&dir), 0);

        let missing = CommandOpener::new(vec!["logdeck-no-such-viewer".to_string()])
            .with_staging_dir(dir.path());
        let err = missing.open(b"{}".to_vec(), "json").await.unwrap_err();
        assert!(matches!(err, ExternalProcessError::Launch { .. }));
        assert_eq!(staged(&dir), 0);
    }
}
