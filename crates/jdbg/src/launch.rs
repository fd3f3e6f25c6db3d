//! Starting the debuggee JVM under the JDWP agent and attaching to it.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr, TcpListener},
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::Duration,
};

use jdbg_jdwp::{JdwpClient, JdwpClientConfig, JdwpError};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    task::JoinHandle,
};

/// Banner the JDWP agent prints on the debuggee's stdout when it starts listening.
const AGENT_BANNER: &str = "Listening for transport dt_socket at address:";

const ATTACH_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub java: PathBuf,
    pub classpath: String,
    pub vm_args: Vec<String>,
    pub main_class: String,
    pub args: Vec<String>,
    pub client: JdwpClientConfig,
    pub attach_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("class {class} not found on classpath {classpath}")]
    ClassNotFound { class: String, classpath: String },
    #[error("failed to start {java}: {source}")]
    Spawn {
        java: String,
        #[source]
        source: io::Error,
    },
    #[error("the JVM exited before the debugger could attach ({0})")]
    ExitedBeforeAttach(ExitStatus),
    #[error("timed out after {0:?} waiting for the JVM to accept the debugger")]
    AttachTimeout(Duration),
    #[error("jdwp: {0}")]
    Jdwp(#[from] JdwpError),
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
}

/// Best-effort check that `main_class` exists on a classpath of directories.
///
/// Jar and wildcard entries cannot be checked without reading archives, so
/// their presence skips the check.
pub fn check_main_class(classpath: &str, main_class: &str) -> Result<(), LaunchError> {
    let entries: Vec<PathBuf> = std::env::split_paths(classpath).collect();
    let opaque = entries.iter().any(|entry| {
        entry.is_file() || entry.file_name().is_some_and(|name| name == "*")
    });
    if opaque {
        return Ok(());
    }

    let relative = Path::new(&main_class.replace('.', "/")).with_extension("class");
    if entries.iter().any(|dir| dir.join(&relative).is_file()) {
        return Ok(());
    }
    Err(LaunchError::ClassNotFound {
        class: main_class.to_string(),
        classpath: classpath.to_string(),
    })
}

/// The debuggee process and the drain of its standard output.
pub struct Debuggee {
    pub child: Child,
    pub output: OutputCapture,
}

/// Start the JVM suspended under the JDWP agent and attach to it.
pub async fn launch(spec: &LaunchSpec) -> Result<(JdwpClient, Debuggee), LaunchError> {
    let port = pick_free_port()?;
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let agent = format!("-agentlib:jdwp=transport=dt_socket,server=y,suspend=y,address={addr}");

    let mut command = Command::new(&spec.java);
    command
        .args(&spec.vm_args)
        .arg(agent)
        .arg("-cp")
        .arg(&spec.classpath)
        .arg(&spec.main_class)
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    tracing::info!(
        target: "jdbg.launch",
        java = %spec.java.display(),
        main_class = %spec.main_class,
        %addr,
        "starting debuggee"
    );
    let mut child = command.spawn().map_err(|source| LaunchError::Spawn {
        java: spec.java.display().to_string(),
        source,
    })?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("debuggee stdout was not captured"))?;
    let output = OutputCapture::spawn(stdout);

    let client = attach(&mut child, addr, spec).await?;
    Ok((client, Debuggee { child, output }))
}

async fn attach(
    child: &mut Child,
    addr: SocketAddr,
    spec: &LaunchSpec,
) -> Result<JdwpClient, LaunchError> {
    let deadline = tokio::time::Instant::now() + spec.attach_timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Err(LaunchError::ExitedBeforeAttach(status));
        }

        match JdwpClient::connect_with_config(addr, spec.client.clone()).await {
            Ok(client) => {
                tracing::info!(target: "jdbg.launch", %addr, "attached to debuggee");
                return Ok(client);
            }
            Err(JdwpError::Io(err)) if err.kind() == io::ErrorKind::ConnectionRefused => {
                tracing::trace!(target: "jdbg.launch", %addr, "agent not listening yet");
            }
            Err(err) => return Err(err.into()),
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(LaunchError::AttachTimeout(spec.attach_timeout));
        }
        tokio::time::sleep(ATTACH_RETRY_DELAY).await;
    }
}

fn pick_free_port() -> io::Result<u16> {
    Ok(TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?
        .local_addr()?
        .port())
}

/// Lines written by the debuggee, drained in the background so the process
/// never blocks on a full pipe.
pub struct OutputCapture {
    task: Option<JoinHandle<Vec<String>>>,
    lines: Vec<String>,
}

impl OutputCapture {
    pub fn spawn<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut lines = Vec::new();
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        let line = line.trim_end_matches(['\n', '\r']);
                        if lines.is_empty() && line.starts_with(AGENT_BANNER) {
                            continue;
                        }
                        lines.push(line.to_string());
                    }
                    Err(err) => {
                        tracing::warn!(target: "jdbg.launch", error = %err, "failed to read debuggee output");
                        break;
                    }
                }
            }
            lines
        });
        Self {
            task: Some(task),
            lines: Vec::new(),
        }
    }

    /// A capture with fixed content, for targets without a local process.
    pub fn from_lines(lines: Vec<String>) -> Self {
        Self { task: None, lines }
    }

    /// Wait for the output to end and return every captured line.
    pub async fn collect(&mut self) -> Vec<String> {
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(lines) => self.lines = lines,
                Err(err) => {
                    tracing::error!(target: "jdbg.launch", error = %err, "output capture task failed");
                }
            }
        }
        self.lines.clone()
    }
}
