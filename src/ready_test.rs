use super::*;
use std::time::Duration;

#[tokio::test]
async fn opened_gate_resolves_immediately() {
    let gate = ReadyGate::opened();
    assert!(gate.is_open());
    assert_eq!(gate.wait().await, Ok(()));
}

#[tokio::test]
async fn closed_gate_waits_for_open() {
    let gate = ReadyGate::closed();
    let waiter = {
        let gate = gate.clone();
        tokio::spawn(async move { gate.wait().await })
    };
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    gate.open();
    let result = tokio::time::timeout(Duration::from_millis(500), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result, Ok(()));
}
