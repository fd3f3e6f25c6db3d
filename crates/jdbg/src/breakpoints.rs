//! Breakpoint bookkeeping: lines the operator asked for, and the requests
//! installed for them once the debuggee's class is loaded.

use std::fmt;

use crate::{
    error::DebugResult,
    target::{CodeLocation, DebugTarget, EventRequest, LoadedClass},
};

/// What happened to a breakpoint request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointOutcome {
    /// The class is not loaded yet; the line is replayed when it is.
    Pending(u32),
    Installed(u32),
    AlreadyActive(u32),
    NoCode(u32),
}

impl BreakpointOutcome {
    /// The line shown to the operator, if the outcome warrants one.
    pub fn message(&self) -> Option<String> {
        match self {
            BreakpointOutcome::Pending(_) | BreakpointOutcome::Installed(_) => None,
            BreakpointOutcome::AlreadyActive(line) => Some(format!(
                "There is already an active breakpoint at line {line}"
            )),
            BreakpointOutcome::NoCode(line) => {
                Some(format!("No code location found at line {line}"))
            }
        }
    }
}

impl fmt::Display for BreakpointOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakpointOutcome::Pending(line) => write!(f, "line {line} pending"),
            BreakpointOutcome::Installed(line) => write!(f, "line {line} installed"),
            BreakpointOutcome::AlreadyActive(line) => write!(f, "line {line} already active"),
            BreakpointOutcome::NoCode(line) => write!(f, "line {line} has no code"),
        }
    }
}

#[derive(Debug, Clone)]
struct ResolvedBreakpoint {
    line: u32,
    location: CodeLocation,
    request: EventRequest,
    enabled: bool,
}

#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    pending: Vec<u32>,
    class: Option<LoadedClass>,
    resolved: Vec<ResolvedBreakpoint>,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding `lines` until the class is loaded.
    pub fn with_pending(lines: impl IntoIterator<Item = u32>) -> Self {
        let mut registry = Self::new();
        for line in lines {
            if !registry.pending.contains(&line) {
                registry.pending.push(line);
            }
        }
        registry
    }

    /// Ask for a breakpoint at `line`, installing it now if the class is loaded.
    pub async fn request<T: DebugTarget>(
        &mut self,
        target: &mut T,
        line: u32,
    ) -> DebugResult<BreakpointOutcome> {
        if self.class.is_none() {
            if self.pending.contains(&line) {
                return Ok(BreakpointOutcome::AlreadyActive(line));
            }
            self.pending.push(line);
            return Ok(BreakpointOutcome::Pending(line));
        }
        self.resolve(target, line).await
    }

    /// Resolve `line` against the loaded class and install the first location.
    pub async fn resolve<T: DebugTarget>(
        &mut self,
        target: &mut T,
        line: u32,
    ) -> DebugResult<BreakpointOutcome> {
        let Some(class) = self.class.as_ref() else {
            return Ok(BreakpointOutcome::Pending(line));
        };

        let locations = target.resolve_line(class, line).await?;
        let Some(location) = locations.first().copied() else {
            tracing::info!(target: "jdbg.breakpoints", line, "no code location for breakpoint");
            return Ok(BreakpointOutcome::NoCode(line));
        };

        let existing = self
            .resolved
            .iter()
            .position(|bp| bp.location == location);
        if existing.is_some_and(|index| self.resolved[index].enabled) {
            return Ok(BreakpointOutcome::AlreadyActive(line));
        }

        let request = target.install_breakpoint(&location).await?;
        tracing::info!(
            target: "jdbg.breakpoints",
            line,
            code_index = location.code_index,
            request_id = request.id,
            "breakpoint installed"
        );
        match existing {
            Some(index) => {
                let bp = &mut self.resolved[index];
                bp.line = line;
                bp.request = request;
                bp.enabled = true;
            }
            None => self.resolved.push(ResolvedBreakpoint {
                line,
                location,
                request,
                enabled: true,
            }),
        }
        Ok(BreakpointOutcome::Installed(line))
    }

    /// Record the class load and replay the pending lines in the order they were added.
    ///
    /// Only the first load of the class replays anything. Each line's result
    /// is returned so one failing line does not hide the others.
    pub async fn on_class_loaded<T: DebugTarget>(
        &mut self,
        target: &mut T,
        class: LoadedClass,
    ) -> Vec<DebugResult<BreakpointOutcome>> {
        if self.class.is_some() {
            return Vec::new();
        }
        tracing::debug!(
            target: "jdbg.breakpoints",
            class = %class.name,
            pending = self.pending.len(),
            "class loaded; replaying breakpoints"
        );
        self.class = Some(class);

        let mut outcomes = Vec::with_capacity(self.pending.len());
        for line in std::mem::take(&mut self.pending) {
            outcomes.push(self.resolve(target, line).await);
        }
        outcomes
    }

    /// Mark the breakpoint behind `request` as spent. Returns its line.
    pub fn on_fired(&mut self, request: EventRequest) -> Option<u32> {
        let bp = self
            .resolved
            .iter_mut()
            .find(|bp| bp.enabled && bp.request == request)?;
        bp.enabled = false;
        Some(bp.line)
    }

    /// Distinct lines of the enabled breakpoints, ascending.
    pub fn list_enabled(&self) -> Vec<u32> {
        let mut lines: Vec<u32> = self
            .resolved
            .iter()
            .filter(|bp| bp.enabled)
            .map(|bp| bp.line)
            .collect();
        lines.sort_unstable();
        lines.dedup();
        lines
    }
}
