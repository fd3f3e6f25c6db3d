use jdbg::target::{DebugTarget, LoadedClass, TargetEvent};
use jdbg_jdwp::wire::mock::MockJdwpServer;

use crate::harness::attach;

fn main_class() -> LoadedClass {
    LoadedClass {
        id: 0x3001,
        name: "org.ssw.Debuggee".to_string(),
    }
}

#[tokio::test]
async fn events_arrive_as_batches_up_to_the_disconnect() {
    let server = MockJdwpServer::spawn().await.unwrap();
    let mut target = attach(&server).await;

    assert_eq!(
        target.next_batch().await.unwrap(),
        Some(vec![TargetEvent::VmStart])
    );
    target.resume().await.unwrap();
    assert_eq!(
        target.next_batch().await.unwrap(),
        Some(vec![TargetEvent::ClassPrepare(main_class())])
    );
    target.resume().await.unwrap();
    assert_eq!(
        target.next_batch().await.unwrap(),
        Some(vec![TargetEvent::VmDeath])
    );
    assert_eq!(
        target.next_batch().await.unwrap(),
        Some(vec![TargetEvent::Disconnect])
    );
    assert_eq!(target.next_batch().await.unwrap(), None);
}

#[tokio::test]
async fn lines_resolve_across_methods() {
    let server = MockJdwpServer::spawn().await.unwrap();
    let mut target = attach(&server).await;
    let class = main_class();

    let constructor = target.resolve_line(&class, 3).await.unwrap();
    assert_eq!(constructor.len(), 1);
    assert_eq!(constructor[0].code_index, 0);

    let body = target.resolve_line(&class, 12).await.unwrap();
    assert_eq!(body.len(), 1);
    assert_eq!(body[0].code_index, 30);

    // Line 9 has no code; the native method has no line table and is skipped.
    assert!(target.resolve_line(&class, 9).await.unwrap().is_empty());
}

#[tokio::test]
async fn captured_output_is_returned_in_order() {
    let server = MockJdwpServer::spawn().await.unwrap();
    let mut target = attach(&server).await;
    assert_eq!(
        target.captured_output().await.unwrap(),
        crate::harness::DEBUGGEE_OUTPUT
    );
}
