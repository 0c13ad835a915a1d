//! End-to-end behaviour of nodes over the mock backend: ordering, progress,
//! abort, retry bounds and memoization.

use mpx_client::{
    Backend, GenerationRequest, MockClient, MockReply, RequestKind, RetryPolicy, StatusPoller,
};
use mpx_core::MpxError;
use mpx_nodes::nodes::{
    ImagesTo3DModels, ImagesTo3DModelsInput, StringListToStringList, StringListToStringListInput,
    TextToText, TextToTextInput,
};
use mpx_nodes::{run_parallel, ImageTensor, Node, NodeContext};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn ctx(client: Arc<MockClient>) -> NodeContext {
    NodeContext::new(Backend::new(client).with_poller(StatusPoller::new(Duration::from_millis(1))))
}

fn user_prompt(request: &GenerationRequest) -> &str {
    match request {
        GenerationRequest::LlmCall { user_prompt, .. } => user_prompt,
        _ => "",
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_output_order_survives_staggered_completion() {
    // "a" stays pending longest, "c" completes first
    let client = Arc::new(MockClient::new(|request| {
        let prompt = user_prompt(request);
        let (word, pending_polls) = if prompt.contains("item-a") {
            ("A", 8)
        } else if prompt.contains("item-b") {
            ("B", 4)
        } else {
            ("C", 0)
        };
        MockReply::CompleteAfter {
            pending_polls,
            outputs: json!({
                "output": json!({"updated_text": word, "reasoning": "r"}).to_string()
            }),
        }
    }));

    let out = StringListToStringList
        .execute(
            &ctx(client),
            StringListToStringListInput {
                strings: strings(&["item-a", "item-b", "item-c"]),
                workers: Some(3),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(out.items, vec!["A", "B", "C"]);
}

#[test]
fn test_executor_order_with_sleeps() {
    let finished = Mutex::new(Vec::new());
    let delays = [30u64, 15, 0];
    let out = run_parallel(&delays, 3, &|_: usize, _: usize| {}, |delay, item| {
        std::thread::sleep(Duration::from_millis(*delay));
        finished.lock().push(item.index);
        Ok(item.index * 10)
    })
    .unwrap();

    assert_eq!(out, vec![0, 10, 20]);
    assert_eq!(finished.lock().first(), Some(&2));
}

#[test]
fn test_progress_reaches_total_once_each() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let client = Arc::new(MockClient::canned());
    let context = ctx(client).with_progress(Arc::new(move |done: usize, total: usize| {
        recorder.lock().push((done, total));
    }));

    StringListToStringList
        .execute(
            &context,
            StringListToStringListInput {
                strings: strings(&["one", "two", "three", "four", "five"]),
                workers: Some(3),
                ..Default::default()
            },
        )
        .unwrap();

    let mut updates = seen.lock().clone();
    updates.sort();
    assert_eq!(updates, (1..=5).map(|n| (n, 5)).collect::<Vec<_>>());
}

#[test]
fn test_failing_item_aborts_batch() {
    let client = Arc::new(MockClient::new(|request| {
        if user_prompt(request).contains("broken") {
            MockReply::SubmitError("connection reset".into())
        } else {
            MockReply::Complete(json!({
                "output": json!({"updated_text": "ok", "reasoning": "r"}).to_string()
            }))
        }
    }));

    let err = StringListToStringList
        .execute(
            &ctx(client.clone()),
            StringListToStringListInput {
                strings: strings(&["broken", "fine"]),
                workers: Some(2),
                ..Default::default()
            },
        )
        .unwrap_err();

    match err {
        MpxError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, MpxError::Transport(_)));
        }
        other => panic!("expected exhausted retries, got {other:?}"),
    }
}

#[test]
fn test_attempts_bounded_by_policy() {
    let client = Arc::new(MockClient::new(|_| {
        MockReply::Complete(json!({"output": "not json at all"}))
    }));
    let context = NodeContext::new(
        Backend::new(client.clone())
            .with_poller(StatusPoller::new(Duration::from_millis(1)))
            .with_retry(RetryPolicy::new(5).unwrap()),
    );

    let err = TextToText
        .execute(
            &context,
            TextToTextInput {
                text: "hello".into(),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, MpxError::RetriesExhausted { attempts: 5, .. }));
    assert_eq!(client.submit_count(), 5);
}

#[test]
fn test_backend_failure_then_success() {
    let calls = Arc::new(Mutex::new(0u32));
    let counter = calls.clone();
    let client = Arc::new(MockClient::new(move |_| {
        let mut n = counter.lock();
        *n += 1;
        if *n == 1 {
            MockReply::Failed("gpu unavailable".into())
        } else {
            MockReply::Complete(json!({
                "output": json!({"updated_text": "second try", "reasoning": "r"}).to_string()
            }))
        }
    }));

    let out = TextToText
        .execute(
            &ctx(client.clone()),
            TextToTextInput {
                text: "x".into(),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(out.text, "second try");
    assert_eq!(client.submit_count(), 2);
}

#[test]
fn test_fenced_reply_is_parsed() {
    let client = Arc::new(MockClient::new(|_| {
        MockReply::Complete(json!({
            "output": "```json\n{\"updated_text\": \"X\", \"reasoning\": \"Y\"}\n```"
        }))
    }));
    let out = TextToText
        .execute(
            &ctx(client.clone()),
            TextToTextInput {
                text: "x".into(),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!((out.text.as_str(), out.reasoning.as_str()), ("X", "Y"));
    assert_eq!(client.submit_count(), 1);
}

#[test]
fn test_models_memoized_until_inputs_change() {
    let client = Arc::new(MockClient::canned());
    let context = ctx(client.clone());
    let mut node = ImagesTo3DModels::new();
    let input = ImagesTo3DModelsInput {
        images: vec![ImageTensor::solid(2, 2, [0.2, 0.4, 0.6])],
        ..Default::default()
    };

    let first = node.execute(&context, input.clone()).unwrap();
    let second = node.execute(&context, input.clone()).unwrap();
    assert_eq!(first.glb_urls, second.glb_urls);
    assert_eq!(client.submit_count_of(RequestKind::ImageTo3d), 1);

    node.execute(
        &context,
        ImagesTo3DModelsInput {
            seed: 7,
            ..input
        },
    )
    .unwrap();
    assert_eq!(client.submit_count_of(RequestKind::ImageTo3d), 2);
}
