use metrics_assistant::config::QueryMode;
use metrics_assistant::gateway::{HttpMetricsGateway, MetricsGateway};
use metrics_assistant::{AssistantError, Intent, MetricSpec, QueryCompiler, Unit};
use mockito::{Matcher, Server};
use std::time::Duration;

fn cpu_query(time_range: &str) -> metrics_assistant::CompiledQuery {
    let spec = MetricSpec {
        id: "cpu_usage".to_string(),
        query_template: "avg_over_time(cpu_pct[5m])".to_string(),
        unit: Unit::PercentFraction,
        display_name: "CPU usage".to_string(),
        description: "Share of CPU time spent busy".to_string(),
    };
    QueryCompiler::compile(&spec, &Intent::new("cpu_usage", "avg", time_range, 0.9)).unwrap()
}

fn gateway(url: String, mode: QueryMode) -> HttpMetricsGateway {
    HttpMetricsGateway::new(url, 3, "test-token".to_string(), mode, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_instant_query_through_datasource_proxy() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/datasources/proxy/3/api/v1/query")
        .match_header("authorization", "Bearer test-token")
        .match_query(Matcher::UrlEncoded(
            "query".into(),
            "avg(avg_over_time(cpu_pct[1h]))".into(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"status":"success","data":{"resultType":"vector","result":[
                {"metric":{"instance":"node-1"},"value":[1700000000,"0.37"]}
            ]}}"#,
        )
        .create_async()
        .await;

    let samples = gateway(server.url(), QueryMode::Instant)
        .query(&cpu_query("1h"))
        .await
        .unwrap();

    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].labels["instance"], "node-1");
    assert_eq!(samples[0].value, 0.37);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_range_query_sends_window_and_step() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/datasources/proxy/3/api/v1/query_range")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("query".into(), "avg(avg_over_time(cpu_pct[1h]))".into()),
            Matcher::UrlEncoded("step".into(), "60".into()),
            Matcher::Regex("start=[0-9]+".into()),
            Matcher::Regex("end=[0-9]+".into()),
        ]))
        .with_status(200)
        .with_body(
            r#"{"status":"success","data":{"resultType":"matrix","result":[
                {"metric":{},"values":[[1700000060,"0.2"],[1700000000,"0.1"]]}
            ]}}"#,
        )
        .create_async()
        .await;

    let samples = gateway(server.url(), QueryMode::Range)
        .query(&cpu_query("1h"))
        .await
        .unwrap();

    assert_eq!(samples.len(), 2);
    assert_eq!(samples[1].timestamp_seconds, 1700000060.0);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_non_success_status_keeps_upstream_body() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/datasources/proxy/3/api/v1/query")
        .match_query(Matcher::Any)
        .with_status(503)
        .with_body("upstream prometheus unavailable")
        .create_async()
        .await;

    let err = gateway(server.url(), QueryMode::Instant)
        .query(&cpu_query("5m"))
        .await
        .unwrap_err();

    match err {
        AssistantError::Gateway { status, body, .. } => {
            assert_eq!(status, Some(503));
            assert_eq!(body.as_deref(), Some("upstream prometheus unavailable"));
        }
        other => panic!("expected gateway error, got {:?}", other),
    }

    mock.assert_async().await;
}

#[tokio::test]
async fn test_api_error_payload_is_gateway_error() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/api/datasources/proxy/3/api/v1/query")
        .with_status(200)
        .with_body(r#"{"status":"error","errorType":"bad_data","error":"unknown function"}"#)
        .create_async()
        .await;

    let err = gateway(server.url(), QueryMode::Instant)
        .query(&cpu_query("5m"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "gateway_error");
}

#[tokio::test]
async fn test_unreachable_backend_is_gateway_error() {
    // Nothing listens on port 9 locally.
    let err = gateway("http://127.0.0.1:9".to_string(), QueryMode::Instant)
        .query(&cpu_query("5m"))
        .await
        .unwrap_err();

    assert!(matches!(err, AssistantError::Gateway { status: None, .. }));
}
