//! The interactive loop run while the debuggee is stopped.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    breakpoints::BreakpointRegistry,
    command::Command,
    error::{DebugError, DebugResult},
    format, inspect,
    target::{DebugTarget, StepDepth, StopFrame, Value},
};

pub const PROMPT: &str = "$> ";

pub const NO_LOCAL_INFO: &str = "Local variable information is not available (compile with -g)";

/// The human side of the session: line input and text output.
pub struct Operator<R, W> {
    input: R,
    output: W,
    eof: bool,
}

impl<R, W> Operator<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            eof: false,
        }
    }

    /// Write `line` followed by a newline.
    pub async fn say(&mut self, line: &str) -> io::Result<()> {
        self.output.write_all(line.as_bytes()).await?;
        self.output.write_all(b"\n").await?;
        self.output.flush().await
    }

    /// Show `prompt` and read one line. `None` once input is exhausted.
    ///
    /// Bytes that are not UTF-8 are replaced, so junk input still reaches the parser.
    pub async fn prompt(&mut self, prompt: &str) -> io::Result<Option<String>> {
        if self.eof {
            return Ok(None);
        }
        self.output.write_all(prompt.as_bytes()).await?;
        self.output.flush().await?;

        let mut line = Vec::new();
        if self.input.read_until(b'\n', &mut line).await? == 0 {
            self.eof = true;
            // Keep whatever follows off the prompt's line.
            self.output.write_all(b"\n").await?;
            self.output.flush().await?;
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    pub fn at_eof(&self) -> bool {
        self.eof
    }

    pub fn into_output(self) -> W {
        self.output
    }
}

/// A suspended thread and what it could see when it stopped.
#[derive(Debug, Clone)]
pub struct StopContext {
    pub frame: StopFrame,
    /// `None` when the class has no local variable information.
    pub variables: Option<Vec<(String, Value)>>,
}

/// How the operator left the command loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resumption {
    Continue,
    Step(StepDepth),
    Quit,
}

/// Read and run commands until one of them hands control back.
///
/// Exhausted input counts as `continue`.
pub async fn run_command_loop<T, R, W>(
    stop: &StopContext,
    registry: &mut BreakpointRegistry,
    target: &mut T,
    operator: &mut Operator<R, W>,
) -> DebugResult<Resumption>
where
    T: DebugTarget,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let Some(line) = operator.prompt(PROMPT).await? else {
            tracing::debug!(target: "jdbg.repl", "operator input closed; continuing");
            return Ok(Resumption::Continue);
        };

        match Command::parse(&line) {
            Command::PrintAll => {
                for (name, value) in stop.variables.iter().flatten() {
                    operator
                        .say(&format!("{name}: {}", format::summary(value)))
                        .await?;
                }
            }
            Command::Print(name) => {
                let matches: Vec<&Value> = stop
                    .variables
                    .iter()
                    .flatten()
                    .filter(|(candidate, _)| *candidate == name)
                    .map(|(_, value)| value)
                    .collect();
                if matches.is_empty() {
                    operator
                        .say(&format!("No variable found with the name: {name}"))
                        .await?;
                }
                for value in matches {
                    operator
                        .say(&format!("{name}: {}", format::summary(value)))
                        .await?;
                    if value.is_composite() {
                        match inspect::inspect(target, value).await {
                            Ok(inspected) => operator.say(&format::format(&inspected)).await?,
                            Err(err) => report(operator, err).await?,
                        }
                    }
                }
            }
            Command::Breakpoints => {
                operator
                    .say(&format!(
                        "Enabled breakpoints (line numbers): {:?}",
                        registry.list_enabled()
                    ))
                    .await?;
            }
            Command::Breakpoint(line) => match registry.request(target, line).await {
                Ok(outcome) => {
                    if let Some(message) = outcome.message() {
                        operator.say(&message).await?;
                    }
                }
                Err(err) => report(operator, err).await?,
            },
            Command::InvalidBreakpoint(arg) => {
                operator
                    .say(&format!("Invalid breakpoint line: {arg}"))
                    .await?;
            }
            Command::Step(depth) => match target.arm_step(stop.frame.thread, depth).await {
                Ok(_) => return Ok(Resumption::Step(depth)),
                Err(err) => report(operator, err).await?,
            },
            Command::Continue => return Ok(Resumption::Continue),
            Command::Quit => {
                target.terminate().await?;
                return Ok(Resumption::Quit);
            }
            Command::Invalid => operator.say("Invalid command").await?,
        }
    }
}

/// Show a failed target operation as one line, unless the target is gone.
pub(crate) async fn report<R, W>(operator: &mut Operator<R, W>, err: DebugError) -> DebugResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if err.is_disconnect() {
        return Err(err);
    }
    tracing::warn!(target: "jdbg.repl", error = %err, "target operation failed");
    operator.say(&format!("Error: {err}")).await?;
    Ok(())
}
