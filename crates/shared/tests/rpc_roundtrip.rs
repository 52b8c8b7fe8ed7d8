//! RPC 层集成测试
//!
//! 通过内存总线验证客户端与消费组之间的完整往返：正常应答、拒绝、
//! 未知命令、处理器 panic、超时、过期应答与优雅停止。

use std::sync::Arc;
use std::time::Duration;

use menu_shared::bus::{BusMessage, MessageBus};
use menu_shared::memory_bus::InMemoryBus;
use menu_shared::rpc::{
    CommandError, CommandResponse, ConsumerGroup, RpcClient, RpcReply, RpcRequest, handler_fn,
};
use menu_shared::test_utils::{UnreachableBus, unique_service_name};
use serde_json::{Value, json};

const CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// 构造一个注册了常用测试命令的消费组
///
/// - `echo`：原样返回请求体
/// - `reject`：以请求体中的 message 拒绝
/// - `explode`：请求体 explode=true 时 panic
/// - `slow`：睡眠 delay_ms 毫秒后返回请求体
fn test_group(service: &str, bus: Arc<InMemoryBus>) -> ConsumerGroup {
    ConsumerGroup::new(service, bus)
        .register("echo", handler_fn(|body| async move { Ok::<_, CommandError>(body) }))
        .register(
            "reject",
            handler_fn(|body: Value| async move {
                let message = body["message"].as_str().unwrap_or("rejected").to_string();
                Err::<Value, _>(CommandError::Rejected(message))
            }),
        )
        .register(
            "explode",
            handler_fn(|body: Value| async move {
                if body["explode"].as_bool().unwrap_or(false) {
                    panic!("handler exploded");
                }
                Ok::<_, CommandError>(body)
            }),
        )
        .register(
            "slow",
            handler_fn(|body: Value| async move {
                let delay = body["delay_ms"].as_u64().unwrap_or(100);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok::<_, CommandError>(body)
            }),
        )
}

async fn setup() -> (Arc<InMemoryBus>, String, ConsumerGroup, RpcClient) {
    let bus = Arc::new(InMemoryBus::new());
    let service = unique_service_name("svc");
    let group = test_group(&service, bus.clone());
    group.start().await.unwrap();
    let client = RpcClient::connect(bus.clone(), "tester", CALL_TIMEOUT)
        .await
        .unwrap();
    (bus, service, group, client)
}

#[tokio::test]
async fn test_call_returns_result() {
    let (_bus, service, group, client) = setup().await;

    let response = client
        .call(&service, "echo", json!({"name": "pizza", "price": 9.5}), None)
        .await;

    assert_eq!(
        response,
        CommandResponse::Result(json!({"name": "pizza", "price": 9.5}))
    );
    assert_eq!(client.pending_calls(), 0);

    group.stop().await;
}

#[tokio::test]
async fn test_rejection_message_is_passed_through() {
    let (_bus, service, group, client) = setup().await;

    let response = client
        .call(&service, "reject", json!({"message": "could not find menu"}), None)
        .await;

    assert_eq!(response, CommandResponse::error("could not find menu"));

    group.stop().await;
}

#[tokio::test]
async fn test_unknown_command_gets_error_reply() {
    let (bus, service, group, client) = setup().await;

    // 请求 topic 存在，但信封里的命令名没有注册
    let mut replies = bus
        .subscribe(&["observer.reply".to_string()], "observer")
        .await
        .unwrap();
    let request = RpcRequest {
        correlation_id: "corr-unknown".to_string(),
        reply_to: "observer.reply".to_string(),
        command: "bogus".to_string(),
        body: json!({}),
    };
    bus.publish(BusMessage::new(
        format!("{service}.echo"),
        "corr-unknown",
        serde_json::to_vec(&request).unwrap(),
    ))
    .await
    .unwrap();

    let msg = tokio::time::timeout(CALL_TIMEOUT, replies.recv())
        .await
        .unwrap()
        .unwrap();
    let reply: RpcReply = msg.deserialize_payload().unwrap();
    assert_eq!(reply.correlation_id, "corr-unknown");
    assert_eq!(reply.response, CommandResponse::error("unknown command"));

    // 消费组继续服务
    let response = client.call(&service, "echo", json!(1), None).await;
    assert_eq!(response, CommandResponse::Result(json!(1)));

    group.stop().await;
}

#[tokio::test]
async fn test_malformed_request_is_dropped() {
    let (bus, service, group, client) = setup().await;

    bus.publish(BusMessage::new(
        format!("{service}.echo"),
        "garbage",
        b"not an envelope".to_vec(),
    ))
    .await
    .unwrap();

    let response = client.call(&service, "echo", json!("still alive"), None).await;
    assert_eq!(response, CommandResponse::Result(json!("still alive")));

    group.stop().await;
}

#[tokio::test]
async fn test_handler_panic_is_isolated() {
    let (_bus, service, group, client) = setup().await;

    let response = client
        .call(&service, "explode", json!({"explode": true}), None)
        .await;
    assert_eq!(response, CommandResponse::error("internal error"));

    let response = client
        .call(&service, "explode", json!({"explode": false}), None)
        .await;
    assert_eq!(response, CommandResponse::Result(json!({"explode": false})));

    group.stop().await;
}

#[tokio::test]
async fn test_call_without_responder_times_out() {
    let bus = Arc::new(InMemoryBus::new());
    let client = RpcClient::connect(bus, "tester", CALL_TIMEOUT).await.unwrap();

    let response = client
        .call("nobody", "ping", json!({}), Some(Duration::from_millis(50)))
        .await;

    assert_eq!(response, CommandResponse::error("timeout"));
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn test_stale_reply_is_discarded() {
    let (_bus, service, group, client) = setup().await;

    let response = client
        .call(
            &service,
            "slow",
            json!({"delay_ms": 150, "tag": "late"}),
            Some(Duration::from_millis(20)),
        )
        .await;
    assert_eq!(response, CommandResponse::error("timeout"));

    // 迟到的应答到达后被丢弃，不会被下一次调用误收
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(client.pending_calls(), 0);

    let response = client.call(&service, "echo", json!({"tag": "fresh"}), None).await;
    assert_eq!(response, CommandResponse::Result(json!({"tag": "fresh"})));

    group.stop().await;
}

#[tokio::test]
async fn test_concurrent_calls_are_isolated() {
    let (_bus, service, group, client) = setup().await;
    let client = Arc::new(client);

    let calls = (0..32).map(|i| {
        let client = client.clone();
        let service = service.clone();
        async move {
            let body = json!({"delay_ms": (i % 4) * 10, "i": i});
            (i, client.call(&service, "slow", body, None).await)
        }
    });

    for (i, response) in futures::future::join_all(calls).await {
        let value = response.into_result().unwrap();
        assert_eq!(value["i"], json!(i));
    }
    assert_eq!(client.pending_calls(), 0);

    group.stop().await;
}

#[tokio::test]
async fn test_stop_drains_in_flight_requests() {
    let (bus, service, group, client) = setup().await;
    let group = Arc::new(group);
    let client = Arc::new(client);

    let waiter = {
        let group = group.clone();
        tokio::spawn(async move { group.wait().await })
    };

    let in_flight = {
        let client = client.clone();
        let service = service.clone();
        tokio::spawn(async move {
            client
                .call(&service, "slow", json!({"delay_ms": 150}), None)
                .await
        })
    };

    // 确保请求已被调度
    tokio::time::sleep(Duration::from_millis(50)).await;
    group.stop().await;

    assert_eq!(
        in_flight.await.unwrap(),
        CommandResponse::Result(json!({"delay_ms": 150}))
    );
    waiter.await.unwrap();
    assert_eq!(bus.subscriber_count(&format!("{service}.slow")), 0);

    // 停止后不再处理新请求
    let response = client
        .call(&service, "echo", json!({}), Some(Duration::from_millis(50)))
        .await;
    assert_eq!(response, CommandResponse::error("timeout"));
}

#[tokio::test]
async fn test_stop_answers_buffered_requests() {
    let bus = Arc::new(InMemoryBus::new());
    let service = unique_service_name("svc");
    // 一次只处理一条，其余请求停留在订阅缓冲区
    let group = test_group(&service, bus.clone()).with_max_in_flight(1);
    group.start().await.unwrap();
    let client = Arc::new(
        RpcClient::connect(bus.clone(), "tester", CALL_TIMEOUT)
            .await
            .unwrap(),
    );

    let calls: Vec<_> = (0..3)
        .map(|i| {
            let client = client.clone();
            let service = service.clone();
            tokio::spawn(async move {
                client
                    .call(&service, "slow", json!({"delay_ms": 100, "i": i}), None)
                    .await
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(30)).await;
    group.stop().await;

    for (i, call) in calls.into_iter().enumerate() {
        assert_eq!(
            call.await.unwrap(),
            CommandResponse::Result(json!({"delay_ms": 100, "i": i}))
        );
    }
    assert_eq!(bus.subscriber_count(&format!("{service}.slow")), 0);
}

#[tokio::test]
async fn test_abandoned_call_is_unregistered() {
    let bus = Arc::new(InMemoryBus::new());
    let client = RpcClient::connect(bus, "tester", CALL_TIMEOUT).await.unwrap();

    // 外层超时先于调用自身的超时触发，调用 future 被中途丢弃
    let abandoned = tokio::time::timeout(
        Duration::from_millis(30),
        client.call("nobody", "ping", json!({}), None),
    )
    .await;

    assert!(abandoned.is_err());
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn test_second_start_fails() {
    let (_bus, _service, group, _client) = setup().await;

    assert!(group.start().await.is_err());

    group.stop().await;
}

#[tokio::test]
async fn test_publish_failure_is_returned_as_error() {
    let bus = Arc::new(UnreachableBus::new(InMemoryBus::new(), "broker unreachable"));
    let client = RpcClient::connect(bus, "tester", CALL_TIMEOUT).await.unwrap();

    let response = client.call("svc", "echo", json!({}), None).await;

    assert_eq!(response, CommandResponse::error("bus error: broker unreachable"));
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn test_shutdown_fails_waiting_calls() {
    let bus = Arc::new(InMemoryBus::new());
    let client = Arc::new(RpcClient::connect(bus, "tester", CALL_TIMEOUT).await.unwrap());

    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.call("nobody", "ping", json!({}), None).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    client.shutdown();

    assert_eq!(
        call.await.unwrap(),
        CommandResponse::error("rpc client closed")
    );
}
