//! The session controller: pulls event batches from the target, dispatches
//! them, and hands stopped threads to the operator.

use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::{
    breakpoints::BreakpointRegistry,
    command::parse_initial_breakpoints,
    error::{DebugError, DebugResult},
    repl::{self, Operator, Resumption, StopContext, NO_LOCAL_INFO},
    target::{DebugTarget, EventBatch, EventRequest, LoadedClass, TargetEvent, ThreadId},
};

pub const BREAKPOINT_PROMPT: &str = "Enter breakpoints (line numbers separated by spaces): ";

/// Ask the operator for the breakpoints to start with and echo the accepted lines.
pub async fn read_initial_breakpoints<R, W>(operator: &mut Operator<R, W>) -> DebugResult<Vec<u32>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let input = operator
        .prompt(BREAKPOINT_PROMPT)
        .await?
        .unwrap_or_default();
    let lines = parse_initial_breakpoints(&input);
    operator
        .say(&format!("Starting debugging with breakpoints: {lines:?}"))
        .await?;
    Ok(lines)
}

/// Where the controller is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingEvents,
    Dispatching,
    Stopped,
    Terminated,
}

pub struct Session<T, R, W> {
    target: T,
    operator: Operator<R, W>,
    registry: BreakpointRegistry,
    state: State,
    /// Set once `quit` asked the VM to exit; nothing is resumed after that.
    quitting: bool,
}

impl<T, R, W> Session<T, R, W>
where
    T: DebugTarget,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(target: T, operator: Operator<R, W>, breakpoints: Vec<u32>) -> Self {
        Self {
            target,
            operator,
            registry: BreakpointRegistry::with_pending(breakpoints),
            state: State::AwaitingEvents,
            quitting: false,
        }
    }

    /// Drive the session until the debuggee disconnects.
    ///
    /// Returns `Ok` after the ordered disconnect and the debuggee's output have
    /// been printed. Losing the connection any other way is an error.
    pub async fn run(mut self) -> DebugResult<()> {
        loop {
            self.state = State::AwaitingEvents;
            let Some(batch) = self.target.next_batch().await? else {
                tracing::error!(target: "jdbg.session", "event stream ended without a disconnect event");
                return Err(DebugError::Disconnected);
            };

            self.state = State::Dispatching;
            let vm_dead = batch.contains(&TargetEvent::VmDeath);
            self.dispatch(batch).await?;
            if self.state == State::Terminated {
                return Ok(());
            }

            if vm_dead || self.quitting {
                continue;
            }
            self.target.resume().await?;
        }
    }

    async fn dispatch(&mut self, batch: EventBatch) -> DebugResult<()> {
        tracing::debug!(target: "jdbg.session", events = batch.len(), "dispatching event batch");

        // Every triggering request is spent before the operator sees the stop.
        for event in &batch {
            match event {
                TargetEvent::Breakpoint { request, .. } => {
                    self.registry.on_fired(*request);
                    self.disable(*request).await?;
                }
                TargetEvent::StepComplete { request, .. } => self.disable(*request).await?,
                _ => {}
            }
        }

        let mut stopped_threads: Vec<ThreadId> = Vec::new();
        for event in batch {
            match event {
                TargetEvent::VmStart => {
                    tracing::debug!(target: "jdbg.session", "debuggee started");
                }
                TargetEvent::ClassPrepare(class) => self.on_class_loaded(class).await?,
                TargetEvent::Breakpoint { thread, .. } | TargetEvent::StepComplete { thread, .. } => {
                    self.on_stop(thread, &mut stopped_threads).await?;
                }
                TargetEvent::VmDeath => {
                    tracing::debug!(target: "jdbg.session", "debuggee VM died");
                }
                TargetEvent::Disconnect => {
                    self.finish().await?;
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    async fn on_class_loaded(&mut self, class: LoadedClass) -> DebugResult<()> {
        let outcomes = self.registry.on_class_loaded(&mut self.target, class).await;
        for outcome in outcomes {
            match outcome {
                Ok(outcome) => {
                    tracing::debug!(target: "jdbg.session", %outcome, "replayed breakpoint");
                    if let Some(message) = outcome.message() {
                        self.operator.say(&message).await?;
                    }
                }
                Err(err) => repl::report(&mut self.operator, err).await?,
            }
        }
        Ok(())
    }

    async fn disable(&mut self, request: EventRequest) -> DebugResult<()> {
        if let Err(err) = self.target.disable(request).await {
            repl::report(&mut self.operator, err).await?;
        }
        Ok(())
    }

    /// Give the operator one interaction per thread and batch.
    async fn on_stop(
        &mut self,
        thread: ThreadId,
        stopped_threads: &mut Vec<ThreadId>,
    ) -> DebugResult<()> {
        if stopped_threads.contains(&thread) || self.quitting {
            return Ok(());
        }
        stopped_threads.push(thread);

        self.state = State::Stopped;
        let frame = match self.target.stop_frame(thread).await {
            Ok(frame) => frame,
            Err(err) => return self.skip_stop(err).await,
        };
        self.operator.say("").await?;
        self.operator
            .say(&format!("Stopped at {}", frame.location))
            .await?;
        tracing::debug!(target: "jdbg.session", thread, location = %frame.location, "thread stopped");

        if self.operator.at_eof() {
            self.state = State::Dispatching;
            return Ok(());
        }

        let variables = match self.target.visible_variables(&frame).await {
            Ok(variables) => variables,
            Err(err) => return self.skip_stop(err).await,
        };
        if variables.is_none() {
            self.operator.say(NO_LOCAL_INFO).await?;
        }
        let stop = StopContext { frame, variables };

        let resumption =
            repl::run_command_loop(&stop, &mut self.registry, &mut self.target, &mut self.operator)
                .await?;
        tracing::debug!(target: "jdbg.session", ?resumption, "command loop finished");
        if resumption == Resumption::Quit {
            self.quitting = true;
        }
        self.state = State::Dispatching;
        Ok(())
    }

    /// A stop whose frame could not be read runs on as if continued.
    async fn skip_stop(&mut self, err: DebugError) -> DebugResult<()> {
        repl::report(&mut self.operator, err).await?;
        self.state = State::Dispatching;
        Ok(())
    }

    async fn finish(&mut self) -> DebugResult<()> {
        tracing::info!(target: "jdbg.session", "debuggee disconnected");
        let output = self.target.captured_output().await?;
        self.operator
            .say("Debugging is done. Printing the output of the debuggee:")
            .await?;
        for line in output {
            self.operator.say(&line).await?;
        }
        self.state = State::Terminated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        target::{RequestKind, StepDepth, Value},
        testing::{breakpoint_hit, step_done, Call, FakeTarget, MAIN_THREAD},
    };

    async fn run_session(
        target: FakeTarget,
        input: &str,
        breakpoints: Vec<u32>,
    ) -> (DebugResult<()>, String) {
        let mut output = Vec::new();
        let result = {
            let operator = Operator::new(input.as_bytes(), &mut output);
            Session::new(target, operator, breakpoints).run().await
        };
        (result, String::from_utf8(output).unwrap())
    }

    fn class_loaded() -> TargetEvent {
        TargetEvent::ClassPrepare(FakeTarget::main_class())
    }

    #[tokio::test]
    async fn initial_breakpoints_are_deduplicated_and_echoed() {
        let mut output = Vec::new();
        let mut operator = Operator::new("12 x 7 12\n".as_bytes(), &mut output);
        let lines = read_initial_breakpoints(&mut operator).await.unwrap();
        assert_eq!(lines, vec![12, 7]);
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "Enter breakpoints (line numbers separated by spaces): \
             Starting debugging with breakpoints: [12, 7]\n"
        );
    }

    #[tokio::test]
    async fn breakpoint_stop_then_continue_to_disconnect() {
        let target = FakeTarget::new()
            .with_code_at(12, &[30])
            .with_variables(Some(vec![("n".to_string(), Value::Int(10))]))
            .with_stops(&["Main:12"])
            .with_output(&["Hello", "World"])
            .with_batch(vec![TargetEvent::VmStart])
            .with_batch(vec![class_loaded()])
            .with_batch(vec![breakpoint_hit(1)])
            .with_batch(vec![TargetEvent::VmDeath])
            .with_batch(vec![TargetEvent::Disconnect]);

        let (result, output) = run_session(target, "print\ncontinue\n", vec![12]).await;
        result.unwrap();
        assert_eq!(
            output,
            "\nStopped at Main:12\n$> n: 10\n$> \
             Debugging is done. Printing the output of the debuggee:\nHello\nWorld\n"
        );
    }

    #[tokio::test]
    async fn resumes_after_each_batch_until_vm_death() {
        let target = FakeTarget::new()
            .with_code_at(12, &[30])
            .with_batch(vec![TargetEvent::VmStart])
            .with_batch(vec![class_loaded()])
            .with_batch(vec![breakpoint_hit(1)])
            .with_batch(vec![TargetEvent::VmDeath])
            .with_batch(vec![TargetEvent::Disconnect]);
        let log = target.call_log();

        let (result, output) = run_session(target, "step over\n", vec![12]).await;
        result.unwrap();
        assert!(output.ends_with("Debugging is done. Printing the output of the debuggee:\n"));

        let breakpoint = EventRequest {
            kind: RequestKind::Breakpoint,
            id: 1,
        };
        assert_eq!(
            log.calls(),
            vec![
                Call::Resume,
                Call::Install(12),
                Call::Resume,
                Call::Disable(breakpoint),
                Call::ArmStep(MAIN_THREAD, StepDepth::Over),
                Call::Resume,
            ]
        );
    }

    #[tokio::test]
    async fn step_ending_on_a_breakpoint_prompts_once() {
        let target = FakeTarget::new()
            .with_code_at(12, &[30])
            .with_code_at(13, &[38])
            .with_stops(&["Main:12", "Main:13"])
            .with_batch(vec![class_loaded()])
            .with_batch(vec![breakpoint_hit(1)])
            // The step is request 3; the breakpoint at line 13 is request 2.
            .with_batch(vec![step_done(3), breakpoint_hit(2)])
            .with_batch(vec![TargetEvent::Disconnect]);

        let (result, output) = run_session(
            target,
            "breakpoint 13\nstep over\ncontinue\n",
            vec![12, 13],
        )
        .await;
        result.unwrap();
        assert_eq!(
            output,
            "\nStopped at Main:12\n$> There is already an active breakpoint at line 13\n$> \
             \nStopped at Main:13\n$> \
             Debugging is done. Printing the output of the debuggee:\n"
        );
    }

    #[tokio::test]
    async fn unresolvable_initial_breakpoint_is_reported_on_class_load() {
        let target = FakeTarget::new()
            .with_batch(vec![class_loaded()])
            .with_batch(vec![TargetEvent::Disconnect]);

        let (result, output) = run_session(target, "", vec![11]).await;
        result.unwrap();
        assert_eq!(
            output,
            "No code location found at line 11\n\
             Debugging is done. Printing the output of the debuggee:\n"
        );
    }

    #[tokio::test]
    async fn operator_eof_keeps_running_without_prompts() {
        let target = FakeTarget::new()
            .with_code_at(5, &[0])
            .with_code_at(6, &[4])
            .with_stops(&["Main:5", "Main:6"])
            .with_batch(vec![class_loaded()])
            .with_batch(vec![breakpoint_hit(1)])
            .with_batch(vec![breakpoint_hit(2)])
            .with_batch(vec![TargetEvent::Disconnect]);

        let (result, output) = run_session(target, "", vec![5, 6]).await;
        result.unwrap();
        assert_eq!(
            output,
            "\nStopped at Main:5\n$> \n\
             \nStopped at Main:6\n\
             Debugging is done. Printing the output of the debuggee:\n"
        );
    }

    #[tokio::test]
    async fn missing_variable_info_is_announced_at_the_stop() {
        let target = FakeTarget::new()
            .with_code_at(5, &[0])
            .with_variables(None)
            .with_stops(&["Main:5"])
            .with_batch(vec![class_loaded()])
            .with_batch(vec![breakpoint_hit(1)])
            .with_batch(vec![TargetEvent::Disconnect]);

        let (result, output) = run_session(target, "continue\n", vec![5]).await;
        result.unwrap();
        assert!(output.starts_with(
            "\nStopped at Main:5\nLocal variable information is not available (compile with -g)\n$> "
        ));
    }

    #[tokio::test]
    async fn quit_terminates_and_waits_for_the_disconnect() {
        let target = FakeTarget::new()
            .with_code_at(5, &[0])
            .with_stops(&["Main:5"])
            .with_output(&["partial"])
            .with_batch(vec![class_loaded()])
            .with_batch(vec![breakpoint_hit(1)])
            .with_batch(vec![TargetEvent::Disconnect]);
        let log = target.call_log();

        let (result, output) = run_session(target, "quit\n", vec![5]).await;
        result.unwrap();
        assert_eq!(
            output,
            "\nStopped at Main:5\n$> \
             Debugging is done. Printing the output of the debuggee:\npartial\n"
        );
        // Nothing is resumed once the VM was asked to exit.
        assert_eq!(
            log.calls(),
            vec![
                Call::Install(5),
                Call::Resume,
                Call::Disable(EventRequest {
                    kind: RequestKind::Breakpoint,
                    id: 1,
                }),
                Call::Terminate,
            ]
        );
    }

    #[tokio::test]
    async fn unreadable_stop_is_reported_and_continued() {
        let target = FakeTarget::new()
            .with_code_at(5, &[0])
            .with_broken_frames()
            .with_batch(vec![class_loaded()])
            .with_batch(vec![breakpoint_hit(1)])
            .with_batch(vec![TargetEvent::Disconnect]);
        let log = target.call_log();

        let (result, output) = run_session(target, "print\n", vec![5]).await;
        result.unwrap();
        assert_eq!(
            output,
            "Error: no stack frame for thread 0x1\n\
             Debugging is done. Printing the output of the debuggee:\n"
        );
        assert_eq!(log.calls().last(), Some(&Call::Resume));

        let target = FakeTarget::new()
            .with_code_at(5, &[0])
            .with_stops(&["Main:5"])
            .with_broken_variables()
            .with_batch(vec![class_loaded()])
            .with_batch(vec![breakpoint_hit(1)])
            .with_batch(vec![TargetEvent::Disconnect]);
        let (result, output) = run_session(target, "print\n", vec![5]).await;
        result.unwrap();
        assert!(output.starts_with("\nStopped at Main:5\nError: jdwp: "), "{output}");
        assert!(!output.contains("$> "));
    }

    #[tokio::test]
    async fn losing_the_connection_is_an_error() {
        let target = FakeTarget::new().with_batch(vec![TargetEvent::VmStart]);
        let (result, _) = run_session(target, "", Vec::new()).await;
        assert!(matches!(result, Err(DebugError::Disconnected)));

        let target = FakeTarget::new()
            .disconnecting_on_resume()
            .with_batch(vec![TargetEvent::VmStart]);
        let (result, _) = run_session(target, "", Vec::new()).await;
        assert!(result.unwrap_err().is_disconnect());
    }
}
