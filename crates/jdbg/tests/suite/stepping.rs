use jdbg::target::{DebugTarget, StepDepth};
use jdbg_jdwp::wire::{
    mock::MockJdwpServer,
    types::{EVENT_KIND_BREAKPOINT, EVENT_KIND_SINGLE_STEP, STEP_DEPTH_OVER, STEP_SIZE_LINE},
    EventModifier,
};

use crate::harness::{attach, debug, epilogue};

#[tokio::test]
async fn step_over_stops_on_the_next_line() {
    let server = MockJdwpServer::spawn().await.unwrap();
    let (result, output) = debug(&server, &[6], "step over\nprint n\ncontinue\n").await;
    result.unwrap();

    assert_eq!(
        output,
        format!(
            "\nStopped at org.ssw.Debuggee:6\n$> \
             \nStopped at org.ssw.Debuggee:7\n$> n: 10\n$> {}",
            epilogue()
        )
    );
    // The spent breakpoint (request 2) and the completed step (request 3) were cleared.
    assert_eq!(
        server.cleared_requests(),
        vec![(EVENT_KIND_BREAKPOINT, 2), (EVENT_KIND_SINGLE_STEP, 3)]
    );
}

#[tokio::test]
async fn step_request_targets_the_stopped_thread_by_line() {
    let server = MockJdwpServer::spawn().await.unwrap();
    let (result, _) = debug(&server, &[6], "step over\nstep into\ncontinue\n").await;
    result.unwrap();

    // Only the class-prepare request survives; both steps were single-use.
    let requests = server.event_requests();
    assert_eq!(requests.len(), 1, "{requests:?}");
    assert!(server
        .cleared_requests()
        .iter()
        .filter(|(kind, _)| *kind == EVENT_KIND_SINGLE_STEP)
        .eq([(EVENT_KIND_SINGLE_STEP, 3), (EVENT_KIND_SINGLE_STEP, 4)].iter()));
}

#[tokio::test]
async fn armed_step_uses_line_granularity() {
    let server = MockJdwpServer::spawn().await.unwrap();
    let mut target = attach(&server).await;

    let thread = 0x8000_0000_0000_1001;
    let request = target.arm_step(thread, StepDepth::Over).await.unwrap();
    let armed = server
        .event_requests()
        .into_iter()
        .find(|req| req.request_id == request.id)
        .unwrap();
    assert_eq!(armed.event_kind, EVENT_KIND_SINGLE_STEP);
    assert_eq!(
        armed.modifiers,
        vec![EventModifier::Step {
            thread,
            size: STEP_SIZE_LINE,
            depth: STEP_DEPTH_OVER,
        }]
    );

    // Arming again replaces the earlier request.
    let second = target.arm_step(thread, StepDepth::Out).await.unwrap();
    assert_eq!(server.cleared_requests(), vec![(EVENT_KIND_SINGLE_STEP, request.id)]);
    assert_ne!(second.id, request.id);
}

#[tokio::test]
async fn step_ending_on_a_breakpoint_stops_once() {
    let server = MockJdwpServer::spawn().await.unwrap();
    let (result, output) = debug(&server, &[8, 10], "step over\nbreakpoints\ncontinue\n").await;
    result.unwrap();

    assert_eq!(
        output,
        format!(
            "\nStopped at org.ssw.Debuggee:8\n$> \
             \nStopped at org.ssw.Debuggee:10\n$> Enabled breakpoints (line numbers): []\n$> {}",
            epilogue()
        )
    );
    assert!(server
        .cleared_requests()
        .contains(&(EVENT_KIND_BREAKPOINT, 3)));
}

#[tokio::test]
async fn step_out_of_main_runs_to_completion() {
    let server = MockJdwpServer::spawn().await.unwrap();
    let (result, output) = debug(&server, &[13], "step out\n").await;
    result.unwrap();

    assert_eq!(
        output,
        format!("\nStopped at org.ssw.Debuggee:13\n$> {}", epilogue())
    );
}
