//! Integration tests for the HTTP execution path.

use std::time::Duration;

use graphql_conduit::{
    ExecutionRequest, Executor, SubscriptionProtocol, TransportError,
};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn graphql_url(server: &MockServer) -> String {
    format!("{}/graphql", server.uri())
}

#[tokio::test]
async fn test_ping_round_trip_posts_exact_json_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_json(json!({
            "query": "{ ping }",
            "variables": {},
            "operationName": null,
            "extensions": null,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"ping": "pong"}})))
        .expect(1)
        .mount(&server)
        .await;

    let executor = Executor::builder(graphql_url(&server)).build().unwrap();
    let result = executor
        .execute(&ExecutionRequest::new("{ ping }"))
        .await
        .unwrap()
        .into_single()
        .unwrap();

    assert_eq!(result.data.unwrap()["ping"], "pong");
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn test_get_for_queries_omits_empty_variables() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/graphql"))
        .and(query_param("query", "{ ping }"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"ping": "pong"}})))
        .expect(1)
        .mount(&server)
        .await;

    let executor = Executor::builder(graphql_url(&server))
        .use_get_for_queries(true)
        .build()
        .unwrap();
    let result = executor
        .execute(&ExecutionRequest::new("{ ping }"))
        .await
        .unwrap()
        .into_single()
        .unwrap();
    assert_eq!(result.data.unwrap()["ping"], "pong");

    let requests = server.received_requests().await.unwrap();
    let query = requests[0].url.query().unwrap();
    assert!(!query.contains("variables="));
    assert!(!query.contains("extensions="));
}

#[tokio::test]
async fn test_mutations_post_even_when_get_is_preferred() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": {"create": true}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let executor = Executor::builder(graphql_url(&server))
        .use_get_for_queries(true)
        .build()
        .unwrap();
    executor
        .execute(&ExecutionRequest::new("mutation { create }"))
        .await
        .unwrap()
        .into_single()
        .unwrap();
}

#[tokio::test]
async fn test_headers_merge_with_request_overrides_winning() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("x-static", "base"))
        .and(header("x-tenant", "override"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let executor = Executor::builder(graphql_url(&server))
        .header("x-static", "base")
        .header("x-tenant", "builder")
        .build()
        .unwrap();
    executor
        .execute(&ExecutionRequest::new("{ ping }").header("x-tenant", "override"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_per_request_endpoint_override() {
    let main = MockServer::start().await;
    let other = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/other"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"ok": 1}})))
        .expect(1)
        .mount(&other)
        .await;

    let executor = Executor::builder(graphql_url(&main)).build().unwrap();
    let result = executor
        .execute(
            &ExecutionRequest::new("{ ping }").endpoint(format!("{}/other", other.uri())),
        )
        .await
        .unwrap()
        .into_single()
        .unwrap();
    assert_eq!(result.data.unwrap()["ok"], 1);
    assert!(main.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_error_status_body_decoded_without_retry() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(json!({"errors": [{"message": "internal"}]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let executor = Executor::builder(graphql_url(&server)).build().unwrap();
    let result = executor
        .execute(&ExecutionRequest::new("{ ping }"))
        .await
        .unwrap()
        .into_single()
        .unwrap();
    assert_eq!(result.errors[0].message, "internal");
}

#[tokio::test]
async fn test_error_status_raises_and_retries_when_retry_configured() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let executor = Executor::builder(graphql_url(&server))
        .retries(2)
        .build()
        .unwrap();
    let outcome = executor.execute(&ExecutionRequest::new("{ ping }")).await;

    assert!(matches!(
        outcome,
        Err(TransportError::HttpStatus { status: 503, .. })
    ));
}

#[tokio::test]
async fn test_errors_bearing_result_retried_and_last_returned() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"errors": [{"message": "transient"}]})),
        )
        .expect(3)
        .mount(&server)
        .await;

    let executor = Executor::builder(graphql_url(&server))
        .retries(2)
        .build()
        .unwrap();
    let result = executor
        .execute(&ExecutionRequest::new("{ ping }"))
        .await
        .unwrap()
        .into_single()
        .unwrap();
    assert_eq!(result.errors[0].message, "transient");
}

#[tokio::test]
async fn test_timeout_settles_as_timeout_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": {}}))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let executor = Executor::builder(graphql_url(&server))
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let outcome = executor.execute(&ExecutionRequest::new("{ ping }")).await;

    assert!(matches!(outcome, Err(TransportError::Timeout)));
}

#[tokio::test]
async fn test_multipart_mixed_response_streams_merged_snapshots() {
    let server = MockServer::start().await;

    let body = "--graphql\r\ncontent-type: application/json\r\n\r\n\
                {\"data\":{\"feed\":{\"id\":\"1\"}},\"hasNext\":true}\r\n\
                --graphql\r\ncontent-type: application/json\r\n\r\n\
                {\"path\":[\"feed\"],\"data\":{\"title\":\"later\"},\"hasNext\":false}\r\n\
                --graphql--\r\n";
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(body, "multipart/mixed; boundary=\"graphql\""),
        )
        .mount(&server)
        .await;

    let executor = Executor::builder(graphql_url(&server)).build().unwrap();
    let mut stream = executor
        .execute(&ExecutionRequest::new("query { feed { id title } }"))
        .await
        .unwrap()
        .into_stream();

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.data.unwrap()["feed"]["id"], "1");

    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(
        second.data.unwrap()["feed"],
        json!({"id": "1", "title": "later"})
    );

    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_sse_protocol_subscribes_over_http_get() {
    let server = MockServer::start().await;

    let body = "event: next\ndata: {\"data\":{\"tick\":1}}\n\n\
                event: next\ndata: {\"data\":{\"tick\":2}}\n\n\
                event: complete\ndata: null\n\n";
    Mock::given(method("GET"))
        .and(path("/graphql"))
        .and(header("accept", "text/event-stream,application/json;q=0.9"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let executor = Executor::builder(graphql_url(&server))
        .subscription_protocol(SubscriptionProtocol::Sse)
        .build()
        .unwrap();
    let mut stream = executor
        .subscribe(&ExecutionRequest::new("subscription { tick }"))
        .await
        .unwrap();

    assert_eq!(stream.next().await.unwrap().unwrap().data.unwrap()["tick"], 1);
    assert_eq!(stream.next().await.unwrap().unwrap().data.unwrap()["tick"], 2);
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_live_query_routes_to_subscription_transport() {
    let server = MockServer::start().await;

    let body = "event: next\ndata: {\"data\":{\"viewer\":1}}\n\nevent: complete\ndata: null\n\n";
    Mock::given(method("GET"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let executor = Executor::builder(graphql_url(&server))
        .subscription_protocol(SubscriptionProtocol::Sse)
        .build()
        .unwrap();

    // A @live query dispatches through the subscription transport even via
    // the uniform execute entry point.
    let execution = executor
        .execute(&ExecutionRequest::new("query Feed @live { viewer }"))
        .await
        .unwrap();
    let mut stream = execution.into_stream();
    assert_eq!(
        stream.next().await.unwrap().unwrap().data.unwrap()["viewer"],
        1
    );
}

#[tokio::test]
async fn test_malformed_json_body_is_a_decode_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html>oops</html>", "text/html"))
        .mount(&server)
        .await;

    let executor = Executor::builder(graphql_url(&server)).build().unwrap();
    let outcome = executor.execute(&ExecutionRequest::new("{ ping }")).await;

    assert!(matches!(outcome, Err(TransportError::Json(_))));
}

#[tokio::test]
async fn test_upload_request_sends_multipart_form() {
    use graphql_conduit::FileUpload;

    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": {"upload": true}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let executor = Executor::builder(graphql_url(&server))
        .multipart(true)
        .build()
        .unwrap();
    let request = ExecutionRequest::new("mutation($file: Upload!) { upload(file: $file) }")
        .variable("file", serde_json::Value::Null)
        .upload("file", FileUpload::from_bytes("hello.txt", "hello"));

    executor.execute(&request).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let content_type = requests[0]
        .headers
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.starts_with("multipart/form-data"));

    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("name=\"operations\""));
    assert!(body.contains("name=\"map\""));
    assert!(body.contains("name=\"0\""));
    assert!(body.contains("hello"));
}

#[tokio::test]
async fn test_uploads_without_multipart_flag_are_a_config_error() {
    let server = MockServer::start().await;
    let executor = Executor::builder(graphql_url(&server)).build().unwrap();

    let request = ExecutionRequest::new("mutation($file: Upload!) { upload(file: $file) }")
        .upload(
            "file",
            graphql_conduit::FileUpload::from_bytes("a.txt", "a"),
        );
    let outcome = executor.execute(&request).await;

    assert!(matches!(outcome, Err(TransportError::Config(_))));
}
