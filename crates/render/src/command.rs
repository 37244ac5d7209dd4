use crate::error::{ErrorKind, Result};
use crate::{Renderer, Response, cgi};
use async_trait::async_trait;
use exn::ResultExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::instrument;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Renders pages by running the CMS front controller once per URL, CGI-style.
///
/// The request is described entirely through the environment (`REQUEST_URI`,
/// `HTTP_HOST`, `HTTPS` and friends); the program writes headers, a blank
/// line and the body to stdout. Nothing goes over the network.
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}
impl CommandRenderer {
    /// Locate `command` (a path, or a name looked up on `PATH`).
    pub fn discover(command: impl AsRef<str>) -> Result<Self> {
        let command = command.as_ref();
        let program = which::which(command).or_raise(|| ErrorKind::CommandNotFound(command.to_string()))?;
        tracing::debug!(program = %program.display(), "discovered render command");
        Ok(Self { program, args: Vec::new(), working_dir: None, timeout: DEFAULT_TIMEOUT })
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    /// CGI/1.1 meta-variables describing a `GET` of `url`.
    fn environment(url: &Url) -> Vec<(&'static str, String)> {
        let host = url.host_str().unwrap_or_default().to_string();
        let port = url.port_or_known_default().unwrap_or(80);
        let http_host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.clone(),
        };
        let query = url.query().unwrap_or_default().to_string();
        let request_uri = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_string(),
        };
        let mut env = vec![
            ("GATEWAY_INTERFACE", "CGI/1.1".to_string()),
            ("SERVER_PROTOCOL", "HTTP/1.1".to_string()),
            ("REQUEST_METHOD", "GET".to_string()),
            ("REQUEST_URI", request_uri),
            ("PATH_INFO", url.path().to_string()),
            ("QUERY_STRING", query),
            ("HTTP_HOST", http_host),
            ("SERVER_NAME", host),
            ("SERVER_PORT", port.to_string()),
            // php-cgi refuses to run without it.
            ("REDIRECT_STATUS", "200".to_string()),
            ("STATICPUB_URL", url.to_string()),
        ];
        if url.scheme() == "https" {
            env.push(("HTTPS", "on".to_string()));
        }
        env
    }
}

#[async_trait]
impl Renderer for CommandRenderer {
    #[instrument(skip(self), fields(program = %self.program.display()))]
    async fn render(&self, url: &str) -> Result<Response> {
        let parsed = Url::parse(url).or_raise(|| ErrorKind::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            exn::bail!(ErrorKind::InvalidUrl(url.to_string()));
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(Self::environment(&parsed))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| ErrorKind::Timeout)?
            .or_raise(|| ErrorKind::Io)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(status = ?output.status, stderr = %stderr.trim(), "render command failed");
            exn::bail!(ErrorKind::Failed(output.status.code().unwrap_or(-1)));
        }
        if !output.stderr.is_empty() {
            tracing::debug!(stderr = %String::from_utf8_lossy(&output.stderr).trim(), "render command wrote to stderr");
        }
        cgi::parse(&output.stdout)
    }
}
