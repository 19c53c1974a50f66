use prep_core::model::{ProgressRecord, QuestionId, QuestionProgressPatch, QuestionStatus};
use prep_core::time::fixed_now;
use reqwest::StatusCode;
use services::{HttpConfig, HttpProgressClient, ProgressApi, TransportError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Serves one canned response and hands back the raw request, lowercased.
async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        let response = format!(
            "HTTP/1.1 {status}\r\n\
             content-type: application/json\r\n\
             content-length: {}\r\n\
             connection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        request.to_ascii_lowercase()
    });
    (format!("http://{addr}"), handle)
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0_u8; 1024];
    loop {
        let read = socket.read(&mut chunk).await.unwrap();
        if read == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..read]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn client(base_url: String, token: Option<&str>) -> HttpProgressClient {
    let http = reqwest::Client::builder().no_proxy().build().unwrap();
    HttpProgressClient::with_client(
        http,
        HttpConfig {
            base_url,
            token: token.map(str::to_string),
        },
    )
}

#[tokio::test]
async fn load_sends_bearer_token_and_reads_envelope() {
    let body = r#"{"success":true,"progress":{"studyStreak":4}}"#;
    let (base, server) = serve_once("200 OK", body).await;

    let response = client(base, Some("secret-token"))
        .load_progress()
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.data.unwrap().progress.study_streak(), 4);
    let request = server.await.unwrap();
    assert!(request.starts_with("get /api/progress/load http/1.1"));
    assert!(request.contains("authorization: bearer secret-token"));
}

#[tokio::test]
async fn rejection_with_message_becomes_unsuccessful_envelope() {
    let (base, server) = serve_once(
        "403 Forbidden",
        r#"{"error":"Invalid token","code":"INVALID_TOKEN"}"#,
    )
    .await;

    let response = client(base, Some("stale")).load_progress().await.unwrap();

    assert!(!response.success);
    assert!(response.data.is_none());
    assert_eq!(response.error.as_deref(), Some("Invalid token"));
    server.await.unwrap();
}

#[tokio::test]
async fn error_status_without_message_is_a_transport_error() {
    let (base, server) = serve_once("500 Internal Server Error", "<html>oops</html>").await;

    let result = client(base, None).load_progress().await;

    assert!(matches!(
        result,
        Err(TransportError::HttpStatus(status)) if status == StatusCode::INTERNAL_SERVER_ERROR
    ));
    server.await.unwrap();
}

#[tokio::test]
async fn save_posts_record_as_json() {
    let (base, server) = serve_once("200 OK", r#"{"success":true,"progress":{}}"#).await;
    let mut record = ProgressRecord::new();
    record.update_question(
        QuestionId::new(17),
        QuestionProgressPatch::status(QuestionStatus::Mastered),
        fixed_now(),
    );

    let response = client(base, None).save_progress(&record).await.unwrap();

    assert!(response.success);
    let request = server.await.unwrap();
    assert!(request.starts_with("post /api/progress/save http/1.1"));
    assert!(request.contains("content-type: application/json"));
    assert!(request.contains(r#""masteredquestions":1"#));
    assert!(!request.contains("authorization:"));
}
