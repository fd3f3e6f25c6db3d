use jdbg_jdwp::wire::{
    mock::MockJdwpServer,
    types::{EVENT_KIND_BREAKPOINT, EVENT_KIND_CLASS_PREPARE, SUSPEND_POLICY_ALL},
    EventModifier,
};

use crate::harness::{debug, epilogue};

#[tokio::test]
async fn class_prepare_request_is_armed_on_attach() {
    let server = MockJdwpServer::spawn().await.unwrap();
    let _target = crate::harness::attach(&server).await;

    let requests = server.event_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].event_kind, EVENT_KIND_CLASS_PREPARE);
    assert_eq!(requests[0].suspend_policy, SUSPEND_POLICY_ALL);
    assert_eq!(
        requests[0].modifiers,
        vec![EventModifier::ClassMatch {
            pattern: "org.ssw.Debuggee".to_string()
        }]
    );
}

#[tokio::test]
async fn no_breakpoints_runs_to_completion() {
    let server = MockJdwpServer::spawn().await.unwrap();
    let (result, output) = debug(&server, &[], "").await;
    result.unwrap();

    assert_eq!(output, epilogue());
    // VMStart and ClassPrepare were resumed; the VM died on its own.
    assert_eq!(server.vm_resume_calls(), 2);
}

#[tokio::test]
async fn initial_breakpoints_stop_in_line_order() {
    let server = MockJdwpServer::spawn().await.unwrap();
    let (result, output) = debug(&server, &[14, 7], "continue\ncontinue\n").await;
    result.unwrap();

    assert_eq!(
        output,
        format!(
            "\nStopped at org.ssw.Debuggee:7\n$> \
             \nStopped at org.ssw.Debuggee:14\n$> {}",
            epilogue()
        )
    );
    let installed: Vec<_> = server
        .cleared_requests()
        .into_iter()
        .filter(|(kind, _)| *kind == EVENT_KIND_BREAKPOINT)
        .collect();
    assert_eq!(installed.len(), 2, "both breakpoints fire once");
}

#[tokio::test]
async fn lines_without_code_are_reported() {
    let server = MockJdwpServer::spawn().await.unwrap();
    let (result, output) = debug(
        &server,
        &[9, 12],
        "breakpoint 11\nbreakpoint 12\nbreakpoint 13\nbreakpoint 13\nbreakpoints\ncontinue\ncontinue\n",
    )
    .await;
    result.unwrap();

    assert_eq!(
        output,
        format!(
            "No code location found at line 9\n\
             \nStopped at org.ssw.Debuggee:12\n\
             $> No code location found at line 11\n\
             $> $> $> There is already an active breakpoint at line 13\n\
             $> Enabled breakpoints (line numbers): [12, 13]\n\
             $> \nStopped at org.ssw.Debuggee:13\n$> {}",
            epilogue()
        )
    );
}

#[tokio::test]
async fn quit_exits_the_vm_and_prints_its_output() {
    let server = MockJdwpServer::spawn().await.unwrap();
    let (result, output) = debug(&server, &[12], "quit\n").await;
    result.unwrap();

    assert_eq!(
        output,
        format!("\nStopped at org.ssw.Debuggee:12\n$> {}", epilogue())
    );
    assert_eq!(server.exit_code(), Some(1));
}

#[tokio::test]
async fn invalid_commands_keep_the_prompt() {
    let server = MockJdwpServer::spawn().await.unwrap();
    let (result, output) = debug(
        &server,
        &[12],
        "Print\nbreakpoint twelve\n\ncontinue\n",
    )
    .await;
    result.unwrap();

    assert!(output.contains(
        "$> Invalid command\n$> Invalid breakpoint line: twelve\n$> Invalid command\n$> "
    ));
}
