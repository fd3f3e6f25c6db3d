use jdbg_jdwp::wire::mock::{MockJdwpServer, MockJdwpServerConfig};

use crate::harness::{debug, epilogue};

#[tokio::test]
async fn print_summarises_every_local() {
    let server = MockJdwpServer::spawn().await.unwrap();
    let (result, output) = debug(&server, &[12], "print\ncontinue\n").await;
    result.unwrap();

    let expected = [
        "",
        "Stopped at org.ssw.Debuggee:12",
        "$> args: instance of java.lang.String[0] (id=20481)",
        "n: 10",
        "pi: 3.0",
        "arr: instance of int[4] (id=20482)",
        "words: instance of java.lang.String[2] (id=20483)",
        "list: instance of java.util.ArrayList(id=20484)",
        "node: instance of org.ssw.Node(id=20486)",
        "greeting: \"hi\"",
        "$> ",
    ]
    .join("\n");
    assert_eq!(output, format!("{expected}{}", epilogue()));
}

#[tokio::test]
async fn print_name_expands_arrays_and_objects() {
    let server = MockJdwpServer::spawn().await.unwrap();
    let (result, output) = debug(
        &server,
        &[12],
        "print arr\nprint words\nprint args\nprint list\nprint n\ncontinue\n",
    )
    .await;
    result.unwrap();

    assert!(output.contains("$> arr: instance of int[4] (id=20482)\nContent: [2, 3, 6, 2]\n"));
    assert!(output.contains(
        "$> words: instance of java.lang.String[2] (id=20483)\nContent: [\"hello\", null]\n"
    ));
    assert!(output.contains("$> args: instance of java.lang.String[0] (id=20481)\nContent: []\n"));
    assert!(
        output.contains(
            "$> list: instance of java.util.ArrayList(id=20484)\n\
             Fields: {java.util.ArrayList.serialVersionUID=8683452581122892189, \
             java.util.ArrayList.elementData=Content: [\"hi\", null], \
             java.util.ArrayList.size=1, java.util.AbstractList.modCount=1}\n"
        ),
        "{output}"
    );
    // Scalars print without an expansion line.
    assert!(output.contains("$> n: 10\n$> "));
}

#[tokio::test]
async fn self_referencing_object_terminates() {
    let server = MockJdwpServer::spawn().await.unwrap();
    let (result, output) = debug(&server, &[12], "print node\ncontinue\n").await;
    result.unwrap();

    assert!(output.contains(
        "$> node: instance of org.ssw.Node(id=20486)\n\
         Fields: {org.ssw.Node.count=1, org.ssw.Node.value=7, \
         org.ssw.Node.next=<cycle: instance of org.ssw.Node(id=20486)>}\n"
    ));
}

#[tokio::test]
async fn only_variables_in_scope_are_visible() {
    let server = MockJdwpServer::spawn().await.unwrap();
    let (result, output) = debug(&server, &[6], "print\nprint pi\ncontinue\n").await;
    result.unwrap();

    assert!(output.contains(
        "Stopped at org.ssw.Debuggee:6\n$> args: instance of java.lang.String[0] (id=20481)\nn: 10\n$> "
    ));
    assert!(output.contains("$> No variable found with the name: pi\n"));
}

#[tokio::test]
async fn classes_without_debug_info_report_it() {
    let server = MockJdwpServer::spawn_with_config(MockJdwpServerConfig {
        absent_variable_info: true,
        ..Default::default()
    })
    .await
    .unwrap();
    let (result, output) = debug(&server, &[12], "print\nprint n\ncontinue\n").await;
    result.unwrap();

    assert!(output.starts_with(
        "\nStopped at org.ssw.Debuggee:12\n\
         Local variable information is not available (compile with -g)\n\
         $> $> No variable found with the name: n\n$> "
    ));
}
