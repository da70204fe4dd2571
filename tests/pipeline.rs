//! End-to-end behaviour of the worker: ingest, list, fetch, search, clear,
//! driven only through requests and events.

use futures::TryStreamExt;
use serde_json::json;
use tempfile::TempDir;

use memora::config::Config;
use memora::export::{self, ExportFormat};
use memora::models::{sort_by_timestamp, Message, ThreadSummary};
use memora::protocol::{Event, Request, SearchId, SearchRequest};
use memora::store::Store;
use memora::worker::{Worker, WorkerHandle};

fn config_in(tmp: &TempDir) -> Config {
    Config::with_db_path(tmp.path().join("data").join("memora.sqlite"))
}

async fn start_with(config: Config) -> WorkerHandle {
    Worker::spawn(config).await.unwrap()
}

async fn start() -> (TempDir, Config, WorkerHandle) {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);
    let handle = start_with(config.clone()).await;
    (tmp, config, handle)
}

/// Send one file and collect its events up to the thread-list refresh.
async fn ingest(handle: &mut WorkerHandle, name: &str, text: &str) -> Vec<Event> {
    assert!(handle.send(Request::IngestFile {
        name: name.into(),
        text: text.into(),
    }));
    let mut events = Vec::new();
    loop {
        let event = handle.recv().await.unwrap();
        let refreshed = matches!(event, Event::Threads { .. });
        events.push(event);
        if refreshed {
            return events;
        }
    }
}

async fn list_threads(handle: &mut WorkerHandle) -> Vec<ThreadSummary> {
    handle.send(Request::ListThreads);
    loop {
        if let Event::Threads { threads } = handle.recv().await.unwrap() {
            return threads;
        }
    }
}

fn search_request(query: &str, batch: usize, max: usize, id: u64) -> SearchRequest {
    SearchRequest {
        query: query.into(),
        batch: Some(batch),
        max_matches: Some(max),
        search_id: SearchId(id),
        for_recall: false,
    }
}

/// Run a search and collect its events through the final progress report.
async fn search(handle: &mut WorkerHandle, req: SearchRequest) -> Vec<Event> {
    let id = req.search_id;
    handle.send(Request::Search(req));
    let mut events = Vec::new();
    let mut done = false;
    loop {
        let event = handle.recv().await.unwrap();
        if event.search_id() != Some(id) {
            continue;
        }
        let last = done && matches!(event, Event::SearchProgress { .. });
        done |= event.is_search_done();
        events.push(event);
        if last {
            return events;
        }
    }
}

fn hits(events: &[Event]) -> Vec<Message> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::SearchBatch { batch, .. } => Some(batch.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

async fn all_messages(config: &Config) -> Vec<Message> {
    let store = Store::open(config).await.unwrap();
    let messages: Vec<Message> = store.scan_messages().try_collect().await.unwrap();
    store.close().await;
    messages
}

fn two_thread_fixture() -> String {
    json!([
        {
            "id": "alpha",
            "title": "Alpha plans",
            "create_time": 1_700_000_000,
            "mapping": {
                "root": {"message": null},
                "n1": {"message": {"author": {"role": "user"}, "create_time": 1_700_000_300,
                                    "content": {"parts": ["note three"]}}},
                "n2": {"message": {"author": {"role": "assistant"}, "create_time": 1_700_000_100,
                                    "content": {"parts": ["note one"]}}},
                "n3": {"message": {"author": {"role": "user"}, "create_time": 1_700_000_200,
                                    "content": {"parts": ["note", "two"]}}},
                "n4": {"message": {"author": {"role": "user"}, "content": {"parts": ["   "]}}}
            }
        },
        {
            "conversation_id": "beta",
            "messages": [
                {"role": "user", "content": "Beta note first", "timestamp": "2024-02-01T10:00:00Z"},
                {"role": "assistant", "content": "", "timestamp": "2024-02-01T10:00:30Z"},
                {"role": "assistant", "content": "beta NOTE second", "timestamp": "2024-02-01T10:01:00Z"}
            ]
        }
    ])
    .to_string()
}

#[tokio::test]
async fn persisted_messages_never_have_blank_text() {
    let (_tmp, config, mut handle) = start().await;
    let events = ingest(&mut handle, "conversations.json", &two_thread_fixture()).await;
    assert!(events
        .iter()
        .any(|e| e == &Event::status("Done. Threads: 2, Messages: 5")));
    handle.shutdown().await;

    let messages = all_messages(&config).await;
    assert_eq!(messages.len(), 5);
    assert!(messages.iter().all(|m| !m.text.trim().is_empty()));
}

#[tokio::test]
async fn reingesting_a_file_keeps_counts_stable() {
    let (_tmp, config, mut handle) = start().await;
    ingest(&mut handle, "conversations.json", &two_thread_fixture()).await;
    let first = list_threads(&mut handle).await;
    ingest(&mut handle, "conversations.json", &two_thread_fixture()).await;
    let second = list_threads(&mut handle).await;
    handle.shutdown().await;

    assert_eq!(first, second);
    assert_eq!(all_messages(&config).await.len(), 5);
}

#[tokio::test]
async fn clear_empties_threads_and_messages() {
    let (_tmp, config, mut handle) = start().await;
    ingest(&mut handle, "conversations.json", &two_thread_fixture()).await;
    handle.send(Request::ClearAll);
    assert_eq!(handle.recv().await, Some(Event::status("DB cleared")));
    assert!(list_threads(&mut handle).await.is_empty());
    handle.shutdown().await;

    assert!(all_messages(&config).await.is_empty());
}

#[tokio::test]
async fn max_matches_caps_the_stream() {
    let (_tmp, _config, mut handle) = start().await;
    let convs: Vec<_> = (0..4)
        .map(|t| {
            let messages: Vec<_> = (0..5)
                .map(|i| json!({"role": "user", "content": format!("match {t}-{i}")}))
                .collect();
            json!({"id": format!("t{t}"), "messages": messages})
        })
        .collect();
    ingest(&mut handle, "conversations.json", &json!(convs).to_string()).await;

    let events = search(&mut handle, search_request("match", 3, 7, 1)).await;
    handle.shutdown().await;

    assert_eq!(hits(&events).len(), 7);
    let batches: Vec<&Event> = events
        .iter()
        .filter(|e| matches!(e, Event::SearchBatch { .. }))
        .collect();
    assert!(batches.last().unwrap().is_search_done());
    assert_eq!(batches.iter().filter(|e| e.is_search_done()).count(), 1);
}

#[tokio::test]
async fn ledger_search_finds_all_and_only_matches() {
    let (_tmp, _config, mut handle) = start().await;
    let archive = json!([
        {"id": "t1", "messages": [
            {"role": "user", "content": "Open the LEDGER", "create_time": 1_700_000_001},
            {"role": "assistant", "content": "done", "create_time": 1_700_000_002}
        ]},
        {"id": "t2", "messages": [
            {"role": "user", "content": "unrelated", "create_time": 1_700_000_003},
            {"role": "user", "content": "ledger entry", "create_time": 1_700_000_004}
        ]},
        {"id": "t3", "messages": [
            {"role": "assistant", "content": "the Ledger closes", "create_time": 1_700_000_005},
            {"role": "user", "content": "thanks", "create_time": 1_700_000_006}
        ]}
    ]);
    ingest(&mut handle, "conversations.json", &archive.to_string()).await;

    let events = search(&mut handle, search_request("ledger", 2, 100, 1)).await;
    handle.shutdown().await;

    assert_eq!(
        events.first(),
        Some(&Event::SearchMeta {
            total: 6,
            search_id: SearchId(1)
        })
    );
    let found: Vec<String> = hits(&events).into_iter().map(|m| m.text).collect();
    assert_eq!(found, vec!["Open the LEDGER", "ledger entry", "the Ledger closes"]);

    let sizes: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            Event::SearchBatch { batch, .. } => Some(batch.len()),
            _ => None,
        })
        .collect();
    assert_eq!(sizes, vec![2, 1, 0]);
    assert_eq!(
        events.last(),
        Some(&Event::SearchProgress {
            scanned: 6,
            matched: 3,
            total: 6,
            search_id: SearchId(1)
        })
    );
}

#[tokio::test]
async fn empty_query_matches_nothing() {
    let (_tmp, _config, mut handle) = start().await;
    ingest(&mut handle, "conversations.json", &two_thread_fixture()).await;
    let events = search(&mut handle, search_request("  ", 10, 10, 1)).await;
    handle.shutdown().await;

    assert!(hits(&events).is_empty());
    assert!(events.iter().any(Event::is_search_done));
}

#[tokio::test]
async fn newer_search_silences_the_older_one() {
    let tmp = TempDir::new().unwrap();
    let mut config = config_in(&tmp);
    config.search.progress_every = 5;
    let mut handle = start_with(config).await;

    let messages: Vec<_> = (0..1500)
        .map(|i| json!({"role": "user", "content": format!("needle {i}")}))
        .collect();
    ingest(
        &mut handle,
        "conversations.json",
        &json!([{"id": "big", "messages": messages}]).to_string(),
    )
    .await;

    handle.send(Request::Search(search_request("needle", 1, 10_000, 1)));
    let mut events = Vec::new();
    loop {
        let event = handle.recv().await.unwrap();
        let progressed = matches!(event, Event::SearchProgress { .. });
        events.push(event);
        if progressed {
            break;
        }
    }

    handle.send(Request::Search(search_request("needle 14", 50, 10_000, 2)));
    let mut done = false;
    loop {
        let event = handle.recv().await.unwrap();
        let last = done && matches!(event, Event::SearchProgress { search_id: SearchId(2), .. });
        done |= event.is_search_done() && event.search_id() == Some(SearchId(2));
        events.push(event);
        if last {
            break;
        }
    }
    events.extend(handle.shutdown().await);

    let b_start = events
        .iter()
        .position(|e| e.search_id() == Some(SearchId(2)))
        .unwrap();
    assert!(events[b_start..]
        .iter()
        .all(|e| e.search_id() != Some(SearchId(1))));
    assert!(!events
        .iter()
        .any(|e| e.search_id() == Some(SearchId(1)) && e.is_search_done()));
}

#[tokio::test]
async fn search_export_regroups_by_thread() {
    let (_tmp, config, mut handle) = start().await;
    ingest(&mut handle, "conversations.json", &two_thread_fixture()).await;
    let events = search(&mut handle, search_request("note", 2, 100, 1)).await;
    handle.shutdown().await;

    let exported = export::render(&hits(&events), ExportFormat::Jsonl, "note").unwrap();
    let reparsed: Vec<Message> = exported
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let mut regrouped = export::group_by_thread(&reparsed);
    regrouped.sort_by(|a, b| a.0.cmp(&b.0));

    let mut stored = all_messages(&config).await;
    sort_by_timestamp(&mut stored);
    let expected: Vec<(String, Vec<Message>)> = ["alpha", "beta"]
        .iter()
        .map(|tid| {
            (
                tid.to_string(),
                stored.iter().filter(|m| m.thread_id == *tid).cloned().collect(),
            )
        })
        .collect();

    assert_eq!(regrouped, expected);
    let alpha: Vec<&str> = regrouped[0].1.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(alpha, vec!["note one", "note\ntwo", "note three"]);
}

#[tokio::test]
async fn html_without_content_blocks_is_a_status_not_an_error() {
    let (_tmp, config, mut handle) = start().await;
    let events = ingest(
        &mut handle,
        "chat.html",
        "<html><body><p>nothing to see</p></body></html>",
    )
    .await;
    handle.shutdown().await;

    assert!(events.iter().all(|e| !matches!(e, Event::Error { .. })));
    assert!(events.contains(&Event::status(
        "Parsed 0 messages from chat.html (HTML parsing is best-effort)."
    )));
    assert!(all_messages(&config).await.is_empty());
}

#[tokio::test]
async fn json_lines_dump_ingests_one_conversation_per_line() {
    let (_tmp, _config, mut handle) = start().await;
    let text = [
        json!({"id": "l1", "messages": [{"role": "user", "content": "first line"}]}),
        json!({"id": "l2", "messages": [{"role": "user", "content": "second line"}]}),
    ]
    .iter()
    .map(|v| v.to_string())
    .collect::<Vec<_>>()
    .join("\n");
    ingest(&mut handle, "conversations.jsonl", &text).await;
    let mut ids: Vec<String> = list_threads(&mut handle)
        .await
        .into_iter()
        .map(|t| t.id)
        .collect();
    handle.shutdown().await;
    ids.sort();
    assert_eq!(ids, vec!["l1", "l2"]);
}

#[tokio::test]
async fn reopening_keeps_data() {
    let (_tmp, config, mut handle) = start().await;
    ingest(&mut handle, "conversations.json", &two_thread_fixture()).await;
    handle.shutdown().await;

    let mut reopened = start_with(config).await;
    assert_eq!(list_threads(&mut reopened).await.len(), 2);
    reopened.shutdown().await;
}
