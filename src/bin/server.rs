//! HTTP front end for the metrics assistant.
//! Plain tokio TCP handling, one request at a time.

use metrics_assistant::logging::init_logging;
use metrics_assistant::{AssistantConfig, MetricsAssistant, SchemaStore};

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{info, warn};

const MAX_REQUEST_BYTES: usize = 64 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_logging("info");

    let config = AssistantConfig::from_env().context("Failed to load configuration")?;
    let schema = SchemaStore::load(&config.schema_path).context("Failed to load metric schema")?;
    let assistant =
        MetricsAssistant::from_config(&config, schema).context("Failed to initialize assistant")?;

    let listener = TcpListener::bind(&config.server_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server_addr))?;
    info!("Server listening on {}", config.server_addr);

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("New connection from: {}", addr);
        handle_connection(stream, &assistant).await;
    }
}

async fn handle_connection(mut stream: TcpStream, assistant: &MetricsAssistant) {
    let request = match read_request(&mut stream, READ_TIMEOUT).await {
        Ok(request) => request,
        Err(e) => {
            warn!("Failed to read request: {}", e);
            return;
        }
    };
    if request.is_empty() {
        return;
    }

    let response = handle_request(&request, assistant).await;
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        warn!("Failed to write response: {}", e);
    }
}

/// Read the header block, then as much body as `Content-Length` announces.
/// A client that stalls longer than `read_timeout` gets dropped.
async fn read_request<S>(stream: &mut S, read_timeout: Duration) -> std::io::Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let read_result = timeout(read_timeout, async {
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buffer);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let wanted = (header_end + 4).saturating_add(content_length(&text[..header_end]));
                if buffer.len() >= wanted {
                    break;
                }
            }
            if buffer.len() > MAX_REQUEST_BYTES {
                break;
            }
        }
        Ok::<(), std::io::Error>(())
    })
    .await;

    match read_result {
        Ok(result) => result?,
        Err(_) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "request read timed out",
            ))
        }
    }

    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn content_length(headers: &str) -> usize {
    headers
        .lines()
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .map(|len| len.min(MAX_REQUEST_BYTES))
        .unwrap_or(0)
}

async fn handle_request(request: &str, assistant: &MetricsAssistant) -> String {
    let request_line = request.lines().next().unwrap_or_default();
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return create_response(400, "Bad Request", r#"{"error":"Malformed request"}"#);
    }

    let method = parts[0];
    let path = parts[1].split('?').next().unwrap_or("/");
    let path = match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };
    info!("Request: {} {}", method, path);

    match (method, path) {
        ("GET", "/health") => {
            let body = serde_json::json!({
                "status": "healthy",
                "metrics_loaded": assistant.schema().len(),
            });
            create_response(200, "OK", &body.to_string())
        }
        ("POST", "/api/query") => {
            let body = request
                .split_once("\r\n\r\n")
                .map(|(_, body)| body.trim())
                .unwrap_or_default();

            let json: serde_json::Value = match serde_json::from_str(body) {
                Ok(json) => json,
                Err(_) => {
                    return create_response(400, "Bad Request", r#"{"error":"Body must be JSON"}"#)
                }
            };

            let query = json
                .get("query")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .unwrap_or_default();
            if query.is_empty() {
                return create_response(400, "Bad Request", r#"{"error":"No query provided"}"#);
            }

            let answer = assistant.handle_turn(query).await;
            let body = serde_json::json!({ "query": query, "answer": answer });
            create_response(200, "OK", &body.to_string())
        }
        _ => create_response(404, "Not Found", r#"{"error":"Not found"}"#),
    }
}

fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Connection: close\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use metrics_assistant::formatter::ResponseFormatter;
    use metrics_assistant::gateway::{MetricsGateway, Sample};
    use metrics_assistant::llm::IntentExtractor;
    use metrics_assistant::{CompiledQuery, Intent, MetricSpec};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    struct CpuExtractor;

    #[async_trait]
    impl IntentExtractor for CpuExtractor {
        async fn extract(&self, _: &str, _: &[MetricSpec]) -> metrics_assistant::Result<Intent> {
            Ok(Intent::new("cpu_usage", "avg", "5m", 0.9))
        }
    }

    struct OneSample;

    #[async_trait]
    impl MetricsGateway for OneSample {
        async fn query(&self, _: &CompiledQuery) -> metrics_assistant::Result<Vec<Sample>> {
            Ok(vec![Sample {
                labels: BTreeMap::new(),
                timestamp_seconds: 1.0,
                value: 0.25,
            }])
        }
    }

    fn assistant() -> MetricsAssistant {
        let schema = SchemaStore::from_json_str(
            r#"{"metrics": {"cpu_usage": {"query_template": "avg_over_time(cpu_pct[5m])",
                "unit": "percent_fraction", "display_name": "CPU usage"}}}"#,
        )
        .unwrap();
        MetricsAssistant::new(
            Arc::new(schema),
            Arc::new(CpuExtractor),
            Arc::new(OneSample),
            ResponseFormatter::default(),
            0.5,
        )
    }

    fn post(body: &str) -> String {
        format!(
            "POST /api/query HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )
    }

    #[tokio::test]
    async fn test_query_route() {
        let response = handle_request(&post(r#"{"query": "cpu?"}"#), &assistant()).await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains(r#""answer":"Average CPU usage over the last 5m is 25.0%.""#));
    }

    #[tokio::test]
    async fn test_query_route_rejects_blank_and_malformed() {
        let blank = handle_request(&post(r#"{"query": "  "}"#), &assistant()).await;
        assert!(blank.starts_with("HTTP/1.1 400"));

        let malformed = handle_request(&post("query=cpu"), &assistant()).await;
        assert!(malformed.starts_with("HTTP/1.1 400"));
    }

    #[tokio::test]
    async fn test_health_and_not_found() {
        let health = handle_request("GET /health HTTP/1.1\r\n\r\n", &assistant()).await;
        assert!(health.starts_with("HTTP/1.1 200 OK"));
        assert!(health.contains(r#""metrics_loaded":1"#));

        let missing = handle_request("GET /nope HTTP/1.1\r\n\r\n", &assistant()).await;
        assert!(missing.starts_with("HTTP/1.1 404"));
    }

    #[test]
    fn test_content_length() {
        assert_eq!(content_length("POST / HTTP/1.1\r\ncontent-length: 17\r\nHost: x"), 17);
        assert_eq!(content_length("GET / HTTP/1.1\r\nHost: x"), 0);
        assert_eq!(
            content_length("POST / HTTP/1.1\r\nContent-Length: 18446744073709551615"),
            MAX_REQUEST_BYTES
        );
    }

    #[tokio::test]
    async fn test_read_request_with_huge_content_length() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client
            .write_all(b"POST /api/query HTTP/1.1\r\nContent-Length: 18446744073709551615\r\n\r\n{}")
            .await
            .unwrap();
        drop(client);

        let request = read_request(&mut server, Duration::from_secs(1)).await.unwrap();
        assert!(request.ends_with("{}"));
    }

    #[tokio::test]
    async fn test_read_request_reads_declared_body() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let raw = post(r#"{"query": "cpu?"}"#);
        client.write_all(raw.as_bytes()).await.unwrap();

        // Client stays open; the declared length alone ends the read.
        let request = read_request(&mut server, Duration::from_secs(1)).await.unwrap();
        assert_eq!(request, raw);
        drop(client);
    }

    #[tokio::test]
    async fn test_idle_client_times_out() {
        let (_client, mut server) = tokio::io::duplex(1024);

        let started = std::time::Instant::now();
        let err = read_request(&mut server, Duration::from_millis(100))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
