//! HTTP queue client against a scripted in-process server.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use precise_indexer::queue::{HttpQueueClient, QueueClient, QueueError};

const TOKEN: &str = "s3cret";
/// `indexer:s3cret`, base64-encoded.
const EXPECTED_AUTH: &str = "Basic aW5kZXhlcjpzM2NyZXQ=";

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    path: String,
    authorization: Option<String>,
    body: Value,
}

struct StubServer {
    url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl StubServer {
    /// Serves `responses` in order, one per request.
    async fn start(responses: Vec<(u16, &'static str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            for (status, body) in responses {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                serve_one(stream, status, body, &recorded).await;
            }
        });

        Self { url, requests }
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    fn client(&self) -> HttpQueueClient {
        HttpQueueClient::new(&self.url, "indexer-1", TOKEN).unwrap()
    }
}

/// Reads one request, records it, then writes the scripted response.
async fn serve_one(
    mut stream: TcpStream,
    status: u16,
    body: &str,
    recorded: &Mutex<Vec<Recorded>>,
) -> Option<()> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();

    let mut content_length = 0usize;
    let mut authorization = None;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            match name.trim().to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.trim().parse().ok()?,
                "authorization" => authorization = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }

    while buffer.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
    let body_bytes = &buffer[header_end..(header_end + content_length).min(buffer.len())];
    let request_body = serde_json::from_slice(body_bytes).unwrap_or(Value::Null);
    recorded.lock().unwrap().push(Recorded {
        method,
        path,
        authorization,
        body: request_body,
    });

    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason(status),
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await.ok()?;
    stream.shutdown().await.ok()?;
    Some(())
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        404 => "Not Found",
        409 => "Conflict",
        _ => "Error",
    }
}

#[tokio::test]
async fn dequeue_returns_claimed_job() {
    let server = StubServer::start(vec![(
        200,
        r#"{"id":42,"repositoryName":"acme/widgets","commit":"deadbeef","state":"processing"}"#,
    )])
    .await;

    let job = server.client().dequeue().await.unwrap().unwrap();
    assert_eq!(job.id, 42);
    assert_eq!(job.repository_name, "acme/widgets");
    assert_eq!(job.commit, "deadbeef");
    assert_eq!(job.state.as_deref(), Some("processing"));

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path, "/.internal-code-intel/index-queue/dequeue");
    assert_eq!(requests[0].authorization.as_deref(), Some(EXPECTED_AUTH));
    assert_eq!(requests[0].body, json!({"indexerName": "indexer-1"}));
}

#[tokio::test]
async fn dequeue_empty_queue() {
    let server = StubServer::start(vec![(204, "")]).await;
    assert!(server.client().dequeue().await.unwrap().is_none());
}

#[tokio::test]
async fn complete_sends_outcome() {
    let server = StubServer::start(vec![(200, ""), (200, "")]).await;
    let client = server.client();

    client.complete(42, None).await.unwrap();
    client.complete(43, Some("failed to index repository")).await.unwrap();

    let requests = server.requests();
    assert_eq!(requests[0].path, "/.internal-code-intel/index-queue/complete");
    assert_eq!(
        requests[0].body,
        json!({"indexerName": "indexer-1", "indexId": 42})
    );
    assert_eq!(
        requests[1].body,
        json!({
            "indexerName": "indexer-1",
            "indexId": 43,
            "errorMessage": "failed to index repository"
        })
    );
}

#[tokio::test]
async fn complete_unclaimed_job_conflicts() {
    let server = StubServer::start(vec![(409, r#"{"error":"not claimed"}"#)]).await;
    let err = server.client().complete(42, None).await.unwrap_err();
    assert!(matches!(err, QueueError::Conflict(42)));
}

#[tokio::test]
async fn requeue_unknown_job_conflicts() {
    let server = StubServer::start(vec![(200, ""), (404, "")]).await;
    let client = server.client();

    client.requeue(7, "over budget").await.unwrap();
    let err = client.requeue(8, "over budget").await.unwrap_err();
    assert!(matches!(err, QueueError::Conflict(8)));

    let requests = server.requests();
    assert_eq!(requests[0].path, "/.internal-code-intel/index-queue/requeue");
    assert_eq!(
        requests[0].body,
        json!({"indexerName": "indexer-1", "indexId": 7, "reason": "over budget"})
    );
}

#[tokio::test]
async fn heartbeat_sends_ids() {
    let server = StubServer::start(vec![(200, "")]).await;
    server.client().heartbeat(&[3, 5]).await.unwrap();

    let requests = server.requests();
    assert_eq!(requests[0].path, "/.internal-code-intel/index-queue/heartbeat");
    assert_eq!(
        requests[0].body,
        json!({"indexerName": "indexer-1", "indexIds": [3, 5]})
    );
}

#[tokio::test]
async fn server_error_is_surfaced() {
    let server = StubServer::start(vec![(500, "database is down")]).await;
    let err = server.client().dequeue().await.unwrap_err();
    match err {
        QueueError::UnexpectedStatus { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "database is down");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn malformed_job_is_a_decode_error() {
    let server = StubServer::start(vec![(200, r#"{"id":"not-a-number"}"#)]).await;
    let err = server.client().dequeue().await.unwrap_err();
    assert!(matches!(err, QueueError::Decode(_)));
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let client = HttpQueueClient::new(&url, "indexer-1", TOKEN).unwrap();
    let err = client.dequeue().await.unwrap_err();
    assert!(matches!(err, QueueError::Transport(_)));
}
