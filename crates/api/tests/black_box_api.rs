use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};

use jobq_client::{
    Client, Error, ProcessorConfig, ProcessorHandle, Task, TaskFilter, TaskStatus,
};
use jobq_queue::QueueService;
use jobq_storage::MemoryStore;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Long sweep interval keeps the sweeper quiet unless a test wants it.
        Self::spawn_with_sweep(Duration::from_secs(3600)).await
    }

    async fn spawn_with_sweep(sweep_interval: Duration) -> Self {
        let service = Arc::new(QueueService::with_sweep_interval(
            Arc::new(MemoryStore::new()),
            sweep_interval,
        ));
        let app = jobq_api::app::build_app(service);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{addr}");

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn create_queue(client: &reqwest::Client, base: &str, name: &str, timeout_secs: u64) {
    let res = client
        .put(format!("{base}/api/v1/queues/{name}"))
        .json(&json!({ "task_timeout": timeout_secs }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

async fn create_task(client: &reqwest::Client, base: &str, queue: &str, data: Value) -> Value {
    let res = client
        .post(format!("{base}/api/v1/tasks"))
        .json(&json!({ "queue_name": queue, "data": data }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    res.json().await.unwrap()
}

async fn lease(
    client: &reqwest::Client,
    base: &str,
    queue: &str,
    consumer: &str,
) -> reqwest::Response {
    client
        .get(format!("{base}/api/v1/tasks/next"))
        .query(&[("queue", queue)])
        .header("X-Client-ID", consumer)
        .send()
        .await
        .unwrap()
}

/// There is intentionally no single-task GET endpoint; observe state
/// through the listing like an operator would.
async fn fetch_task(client: &reqwest::Client, base: &str, queue: &str, id: &str) -> Value {
    let tasks: Vec<Value> = client
        .get(format!("{base}/api/v1/tasks"))
        .query(&[("queue", queue), ("limit", "100")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    tasks
        .into_iter()
        .find(|t| t["id"] == json!(id))
        .expect("task present in listing")
}

#[tokio::test]
async fn health_reports_ok_with_version() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/health", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].as_str().is_some());
    assert!(body["timestamp"].as_str().is_some());
}

#[tokio::test]
async fn queue_upsert_fetch_and_validation() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let base = &srv.base_url;

    create_queue(&client, base, "emails", 10).await;

    let res = client
        .get(format!("{base}/api/v1/queues/emails"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let queue: Value = res.json().await.unwrap();
    assert_eq!(queue["name"], "emails");
    assert_eq!(queue["task_timeout"], 10);

    // Upsert is idempotent and updates the timeout.
    create_queue(&client, base, "emails", 25).await;
    let res = client
        .get(format!("{base}/api/v1/queues/emails"))
        .send()
        .await
        .unwrap();
    let queue: Value = res.json().await.unwrap();
    assert_eq!(queue["task_timeout"], 25);

    let res = client
        .get(format!("{base}/api/v1/queues/ghost"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .put(format!("{base}/api/v1/queues/bad"))
        .json(&json!({ "task_timeout": 0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("positive"));

    // The rejected queue was never created; listing stays name-sorted.
    create_queue(&client, base, "alpha", 5).await;
    let queues: Vec<Value> = client
        .get(format!("{base}/api/v1/queues"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = queues.iter().map(|q| q["name"].as_str().unwrap()).collect();
    assert_eq!(names, ["alpha", "emails"]);
}

#[tokio::test]
async fn happy_path_create_lease_complete() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let base = &srv.base_url;

    create_queue(&client, base, "q", 10).await;
    let task = create_task(&client, base, "q", json!({ "n": 1 })).await;
    assert_eq!(task["status"], "pending");
    let id = task["id"].as_str().unwrap().to_string();

    let res = lease(&client, base, "q", "C1").await;
    assert_eq!(res.status(), StatusCode::OK);
    let leased: Value = res.json().await.unwrap();
    assert_eq!(leased["id"], json!(id));
    assert_eq!(leased["status"], "running");
    assert_eq!(leased["assigned_to"], "C1");
    assert!(leased["started_at"].as_str().is_some());

    let res = client
        .put(format!("{base}/api/v1/tasks/{id}"))
        .json(&json!({ "status": "completed", "data": { "n": 1, "result": "ok" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let done: Value = res.json().await.unwrap();
    assert_eq!(done["status"], "completed");
    assert_eq!(done["assigned_to"], "C1");
    assert_eq!(done["data"], json!({ "n": 1, "result": "ok" }));
    assert!(done["completed_at"].as_str().is_some());
}

#[tokio::test]
async fn simultaneous_leases_hand_out_each_task_once() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let base = &srv.base_url;

    create_queue(&client, base, "q", 10).await;
    let mut created = Vec::new();
    for n in 0..3 {
        let task = create_task(&client, base, "q", json!({ "n": n })).await;
        created.push(task["id"].as_str().unwrap().to_string());
    }

    let (a, b, c) = tokio::join!(
        lease(&client, base, "q", "C1"),
        lease(&client, base, "q", "C2"),
        lease(&client, base, "q", "C3"),
    );

    let mut leased = Vec::new();
    for res in [a, b, c] {
        assert_eq!(res.status(), StatusCode::OK);
        let task: Value = res.json().await.unwrap();
        leased.push(task["id"].as_str().unwrap().to_string());
    }

    leased.sort();
    let mut expected = created.clone();
    expected.sort();
    assert_eq!(leased, expected, "every task leased exactly once");

    // Queue is drained now.
    let res = lease(&client, base, "q", "C4").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn consecutive_leases_are_fifo() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let base = &srv.base_url;

    create_queue(&client, base, "q", 10).await;
    let mut created = Vec::new();
    for n in 0..3 {
        let task = create_task(&client, base, "q", json!({ "n": n })).await;
        created.push(task["id"].as_str().unwrap().to_string());
    }

    for expected in created {
        let leased: Value = lease(&client, base, "q", "C1").await.json().await.unwrap();
        assert_eq!(leased["id"], json!(expected));
    }
}

#[tokio::test]
async fn abandoned_lease_is_reclaimed_by_the_sweeper() {
    let srv = TestServer::spawn_with_sweep(Duration::from_secs(1)).await;
    let client = reqwest::Client::new();
    let base = &srv.base_url;

    create_queue(&client, base, "q", 2).await;
    let task = create_task(&client, base, "q", json!({ "n": 1 })).await;
    let id = task["id"].as_str().unwrap().to_string();

    let res = lease(&client, base, "q", "C1").await;
    assert_eq!(res.status(), StatusCode::OK);

    // Consumer never reports back: within task_timeout + a few sweep
    // intervals the task must be failed with the timeout annotation.
    let mut reclaimed = None;
    for _ in 0..100 {
        let task = fetch_task(&client, base, "q", &id).await;
        if task["status"] == "failed" {
            reclaimed = Some(task);
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let task = reclaimed.expect("sweeper did not reclaim the lease");
    assert_eq!(task["data"]["error"], "Task timeout exceeded");
    assert_eq!(task["data"]["n"], 1);
}

#[tokio::test]
async fn failed_task_can_be_reenqueued_and_leased_again() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let base = &srv.base_url;

    create_queue(&client, base, "q", 10).await;
    let task = create_task(&client, base, "q", json!({ "n": 1 })).await;
    let id = task["id"].as_str().unwrap().to_string();

    lease(&client, base, "q", "C1").await;
    let res = client
        .put(format!("{base}/api/v1/tasks/{id}"))
        .json(&json!({ "status": "failed", "data": { "n": 1, "error": "boom" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .put(format!("{base}/api/v1/tasks/{id}"))
        .json(&json!({ "status": "pending" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let requeued: Value = res.json().await.unwrap();
    assert!(requeued["assigned_to"].is_null());

    let leased: Value = lease(&client, base, "q", "C2").await.json().await.unwrap();
    assert_eq!(leased["id"], json!(id));
    assert_eq!(leased["assigned_to"], "C2");
}

#[tokio::test]
async fn illegal_transition_conflicts() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let base = &srv.base_url;

    create_queue(&client, base, "q", 10).await;
    let task = create_task(&client, base, "q", json!({})).await;
    let id = task["id"].as_str().unwrap().to_string();

    lease(&client, base, "q", "C1").await;
    client
        .put(format!("{base}/api/v1/tasks/{id}"))
        .json(&json!({ "status": "completed" }))
        .send()
        .await
        .unwrap();

    let res = client
        .put(format!("{base}/api/v1/tasks/{id}"))
        .json(&json!({ "status": "running" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("invalid status transition"));
}

#[tokio::test]
async fn lease_requires_queue_and_client_id() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let base = &srv.base_url;

    create_queue(&client, base, "q", 10).await;

    // Missing client id.
    let res = client
        .get(format!("{base}/api/v1/tasks/next"))
        .query(&[("queue", "q")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // Missing queue parameter.
    let res = client
        .get(format!("{base}/api/v1/tasks/next"))
        .header("X-Client-ID", "C1")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // Unknown queue.
    let res = lease(&client, base, "ghost", "C1").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn listing_clamps_limits_and_summary_aggregates() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let base = &srv.base_url;

    create_queue(&client, base, "q", 10).await;
    for n in 0..15 {
        create_task(&client, base, "q", json!({ "n": n })).await;
    }
    lease(&client, base, "q", "C1").await;

    // Default limit is 10.
    let tasks: Vec<Value> = client
        .get(format!("{base}/api/v1/tasks"))
        .query(&[("queue", "q")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(tasks.len(), 10);

    // A hostile sort_by is ignored by the whitelist rather than reaching
    // the storage layer.
    let res = client
        .get(format!("{base}/api/v1/tasks"))
        .query(&[("queue", "q"), ("sort_by", "created_at; DROP TABLE tasks")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let stats: Value = client
        .get(format!("{base}/api/v1/tasks"))
        .query(&[("queue", "q"), ("summary", "true")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["all"], 15);
    assert_eq!(stats["pending"], 14);
    assert_eq!(stats["running"], 1);
    let sum = stats["pending"].as_i64().unwrap()
        + stats["running"].as_i64().unwrap()
        + stats["completed"].as_i64().unwrap()
        + stats["failed"].as_i64().unwrap()
        + stats["deleted"].as_i64().unwrap();
    assert_eq!(stats["all"].as_i64().unwrap(), sum);
}

#[tokio::test]
async fn delete_returns_no_content_and_is_terminal() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let base = &srv.base_url;

    create_queue(&client, base, "q", 10).await;
    let task = create_task(&client, base, "q", json!({})).await;
    let id = task["id"].as_str().unwrap().to_string();

    let res = client
        .delete(format!("{base}/api/v1/tasks/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    // No way out of deleted, on either path.
    let res = client
        .put(format!("{base}/api/v1/tasks/{id}"))
        .json(&json!({ "status": "pending" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = client
        .delete(format!("{base}/api/v1/tasks/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = client
        .delete(format!(
            "{base}/api/v1/tasks/00000000-0000-7000-8000-000000000000"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_bodies_are_rejected() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let base = &srv.base_url;

    let res = client
        .post(format!("{base}/api/v1/tasks"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    create_queue(&client, base, "q", 10).await;
    let task = create_task(&client, base, "q", json!({})).await;
    let id = task["id"].as_str().unwrap().to_string();

    let res = client
        .put(format!("{base}/api/v1/tasks/{id}"))
        .json(&json!({ "status": "archived" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .put(format!("{base}/api/v1/tasks/not-a-task-id"))
        .json(&json!({ "status": "deleted" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn dashboard_is_served() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/dashboard/", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.text().await.unwrap().contains("Job Queue Dashboard"));

    let res = client
        .get(format!("{}/dashboard/dashboard.js", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn processor_completes_tasks_end_to_end() {
    let srv = TestServer::spawn().await;
    let client = Client::builder(srv.base_url.as_str())
        .client_id("worker-1")
        .build()
        .unwrap();

    client
        .upsert_queue("q", Duration::from_secs(10))
        .await
        .unwrap();
    let task = client.create_task("q", json!({ "n": 7 })).await.unwrap();

    let mut config = ProcessorConfig::new("q");
    config.retry_interval = Duration::from_millis(50);
    config.worker_count = 2;

    let handle = ProcessorHandle::spawn(client.clone(), config, |task: Task| async move {
        let mut data = task.data;
        data["result"] = json!("ok");
        Ok::<_, Error>(data)
    });

    let mut completed = None;
    for _ in 0..100 {
        let tasks = client
            .list_tasks(&TaskFilter::new().with_queue("q"))
            .await
            .unwrap();
        if let Some(t) = tasks
            .iter()
            .find(|t| t.id == task.id && t.status == TaskStatus::Completed)
        {
            completed = Some(t.clone());
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let completed = completed.expect("processor should complete the task");
    assert_eq!(completed.data, json!({ "n": 7, "result": "ok" }));
    assert_eq!(completed.assigned_to.as_deref(), Some("worker-1"));

    let err = handle.shutdown().await.unwrap_err();
    assert!(matches!(err, Error::Canceled));
}

#[tokio::test]
async fn processor_times_out_slow_tasks_and_preserves_data() {
    let srv = TestServer::spawn().await;
    let client = Client::builder(srv.base_url.as_str())
        .client_id("worker-slow")
        .build()
        .unwrap();

    client
        .upsert_queue("q", Duration::from_secs(1))
        .await
        .unwrap();
    let task = client.create_task("q", json!({ "n": 1 })).await.unwrap();

    let mut config = ProcessorConfig::new("q");
    config.retry_interval = Duration::from_millis(50);

    let handle = ProcessorHandle::spawn(client.clone(), config, |_task: Task| async move {
        // Far beyond the queue's 1 s deadline.
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok::<_, Error>(json!({}))
    });

    let mut failed = None;
    for _ in 0..100 {
        let tasks = client
            .list_tasks(&TaskFilter::new().with_queue("q").with_status(TaskStatus::Failed))
            .await
            .unwrap();
        if let Some(t) = tasks.iter().find(|t| t.id == task.id) {
            failed = Some(t.clone());
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let failed = failed.expect("slow task should fail by deadline");
    assert_eq!(failed.data["n"], 1);
    assert!(failed.data["error"]
        .as_str()
        .unwrap()
        .contains("exceeded timeout"));

    handle.shutdown().await.unwrap_err();
}

#[tokio::test]
async fn processor_cancellation_drains_and_nothing_stays_running() {
    let srv = TestServer::spawn_with_sweep(Duration::from_secs(1)).await;
    let client = Client::builder(srv.base_url.as_str())
        .client_id("worker-pool")
        .build()
        .unwrap();

    client
        .upsert_queue("q", Duration::from_secs(2))
        .await
        .unwrap();
    for n in 0..6 {
        client.create_task("q", json!({ "n": n })).await.unwrap();
    }

    let mut config = ProcessorConfig::new("q");
    config.worker_count = 4;
    config.worker_buffer = 4;
    config.retry_interval = Duration::from_millis(50);

    let handle = ProcessorHandle::spawn(client.clone(), config, |task: Task| async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok::<_, Error>(task.data)
    });

    tokio::time::sleep(Duration::from_millis(400)).await;
    let err = handle.shutdown().await.unwrap_err();
    assert!(matches!(err, Error::Canceled));

    // Anything still leased at cancellation is either reported failed by
    // the drain or reclaimed by the sweeper; nothing may sit in running
    // past task_timeout + sweep interval.
    let mut running = i64::MAX;
    for _ in 0..80 {
        let stats = client
            .task_stats(&TaskFilter::new().with_queue("q"))
            .await
            .unwrap();
        running = stats.running;
        if running == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(running, 0);
}

#[tokio::test]
async fn processor_rejects_unknown_queue() {
    let srv = TestServer::spawn().await;
    let client = Client::builder(srv.base_url.as_str())
        .client_id("worker-x")
        .build()
        .unwrap();

    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let err = client
        .process_tasks(
            ProcessorConfig::new("ghost"),
            shutdown_rx,
            |task: Task| async move { Ok::<_, Error>(task.data) },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}
