use std::time::Duration;

use jdbg::{launch::OutputCapture, DebugResult, JdwpTarget, Operator, Session};
use jdbg_jdwp::{wire::mock::MockJdwpServer, JdwpClient};

pub const DEBUGGEE_OUTPUT: &[&str] = &["Hello from the debuggee", "done"];

const SESSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Attach a [`JdwpTarget`] to `server` with canned debuggee output.
pub async fn attach(server: &MockJdwpServer) -> JdwpTarget {
    let client = JdwpClient::connect(server.addr()).await.unwrap();
    let output = OutputCapture::from_lines(DEBUGGEE_OUTPUT.iter().map(|s| s.to_string()).collect());
    JdwpTarget::attach(client, server.main_class_name(), output, None)
        .await
        .unwrap()
}

/// Run a whole session against `server`, feeding `input` as operator text.
///
/// Returns the session result and everything written to the operator.
pub async fn debug(
    server: &MockJdwpServer,
    breakpoints: &[u32],
    input: &str,
) -> (DebugResult<()>, String) {
    let target = attach(server).await;
    let mut output = Vec::new();
    let result = {
        let operator = Operator::new(input.as_bytes(), &mut output);
        let session = Session::new(target, operator, breakpoints.to_vec());
        tokio::time::timeout(SESSION_TIMEOUT, session.run())
            .await
            .expect("session did not finish")
    };
    (result, String::from_utf8(output).unwrap())
}

/// The text printed after the disconnect.
pub fn epilogue() -> String {
    let mut text = "Debugging is done. Printing the output of the debuggee:\n".to_string();
    for line in DEBUGGEE_OUTPUT {
        text.push_str(line);
        text.push('\n');
    }
    text
}
