//! Stream contract: termination, idempotent close, ordering, usage sums.

mod common;

use std::sync::Arc;

use common::{CannedTool, MockProvider, Turn};
use llm_conduit::usage::{MemoryUsageSink, record_usage};
use llm_conduit::{Engine, Event, EventStream, Message, Request, Tool, ToolCall};

#[tokio::test]
async fn test_done_is_last_event_then_eof() {
    let provider = Arc::new(MockProvider::scripted(vec![
        Turn::text("answer").with_usage(3, 1),
    ]));
    let engine = Engine::new(provider);

    let req = Request::builder()
        .model("m")
        .message(Message::user("hi"))
        .build()
        .unwrap();

    let mut stream = engine.stream(req).await.unwrap();
    let mut events = Vec::new();
    while let Some(item) = stream.recv().await {
        events.push(item.unwrap());
    }
    assert!(matches!(events.last(), Some(Event::Done)));
    assert!(stream.recv().await.is_none());
    assert!(stream.recv().await.is_none());
}

#[tokio::test]
async fn test_error_is_terminal_for_engine_stream() {
    // An unexpected tool name during the pre-emptive search turn fails.
    let provider = Arc::new(MockProvider::scripted(vec![Turn::calls(vec![
        ToolCall::new("x", "not_a_search_tool", "{}"),
    ])]));
    let engine = Engine::new(provider);
    engine.register_tool(Arc::new(CannedTool::new("web_search", "r")));

    let req = Request::builder()
        .model("m")
        .message(Message::user("hi"))
        .search(true)
        .build()
        .unwrap();

    let mut stream = engine.stream(req).await.unwrap();
    let mut saw_error = false;
    while let Some(item) = stream.recv().await {
        if let Err(e) = item {
            saw_error = true;
            assert!(e.to_string().contains("unexpected tool call"));
        }
    }
    assert!(saw_error);
    assert!(stream.recv().await.is_none());
}

#[tokio::test]
async fn test_close_is_idempotent_and_cancels_producer() {
    let mut stream = EventStream::spawn(|tx| async move {
        loop {
            if !tx.text("tick").await {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
    });

    assert!(stream.recv().await.is_some());
    stream.close();
    stream.close();
    assert!(stream.recv().await.is_none());
}

#[tokio::test]
async fn test_close_mid_loop_stops_engine() {
    let provider = Arc::new(MockProvider::looping(Turn::calls(vec![ToolCall::new(
        "l",
        "slow_tool",
        "{}",
    )])));
    let engine = Engine::new(provider);
    engine.register_tool(Arc::new(CannedTool::new("slow_tool", "out")));

    let req = Request::builder()
        .model("m")
        .message(Message::user("go"))
        .tool(llm_conduit::ToolSpec::new(
            "slow_tool",
            "slow",
            serde_json::json!({ "type": "object", "properties": {} }),
        ))
        .max_turns(20)
        .build()
        .unwrap();

    let mut stream = engine.stream(req).await.unwrap();
    // Take a couple of events, then walk away.
    let _ = stream.recv().await;
    let _ = stream.recv().await;
    stream.close();
    assert!(stream.recv().await.is_none());
}

#[tokio::test]
async fn test_usage_accumulates_across_loop_turns() {
    let provider = Arc::new(MockProvider::scripted(vec![
        Turn::calls(vec![ToolCall::new("a", "test_tool", "{}")]).with_usage(10, 4),
        Turn::text("final").with_usage(25, 6),
    ]));
    let engine = Engine::new(provider.clone());
    let tool = Arc::new(CannedTool::new("test_tool", "out"));
    engine.register_tool(tool.clone());

    let req = Request::builder()
        .model("test-model")
        .message(Message::user("go"))
        .tool(tool.spec())
        .build()
        .unwrap();

    let stream = engine.stream(req).await.unwrap();
    let sink = Arc::new(MemoryUsageSink::new());
    let mut wrapped = record_usage(stream, sink.clone(), "mock", "test-model", "mock-credential");

    let mut usage_events = 0;
    while let Some(item) = wrapped.recv().await {
        if matches!(item.unwrap(), Event::Usage(_)) {
            usage_events += 1;
        }
    }
    // Both per-turn usage events were forwarded...
    assert_eq!(usage_events, 2);

    // ...and the sink saw their sum, exactly once.
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].input_tokens, 35);
    assert_eq!(records[0].output_tokens, 10);
    assert_eq!(records[0].provider, "mock");
    assert_eq!(records[0].credential, "mock-credential");
}
