//! End-to-end capture tests
//!
//! Drives the capture pipeline through both interceptor surfaces and checks
//! what lands in the store.

use async_trait::async_trait;
use axum::http::{Request, Response, StatusCode};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use parking_lot::Mutex;
use reasonkit_apiscope::{
    CaptureConfig, CapturePipeline, CapturedExchange, HttpTransport, InboundResponse,
    InstallFlag, Interceptor, KnownApiRegistry, OutboundRequest, RequestBody, UnknownApiStore,
};
use serde_json::json;
use reasonkit_apiscope::interceptor::ABORTED_ERROR;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Waker};
use tower::{service_fn, Layer, Service, ServiceExt};

const CREATE_TWEET_URL: &str = "https://x.com/i/api/graphql/abc123/CreateTweet";

fn create_pipeline(registry: KnownApiRegistry) -> Arc<CapturePipeline> {
    let store = Arc::new(UnknownApiStore::new(Arc::new(registry)));
    Arc::new(CapturePipeline::new(CaptureConfig::default(), store))
}

fn create_tweet_body() -> serde_json::Value {
    json!({
        "operationName": "CreateTweet",
        "variables": {"tweet_text": "hi"},
    })
}

fn known_registry() -> KnownApiRegistry {
    KnownApiRegistry::from_json(&json!({
        "query": {
            "tweetDetail": {
                "match": {"method": "GET", "operationName": "TweetDetail"}
            }
        },
        "action": {
            "createTweet": {
                "match": {
                    "method": "POST",
                    "path": "/i/api/graphql/*/CreateTweet",
                    "operationName": "CreateTweet"
                },
                "description": "Post a tweet"
            }
        }
    }))
    .unwrap()
}

// ============================================================================
// Pipeline Scenarios
// ============================================================================

mod pipeline_scenarios {
    use super::*;

    #[test]
    fn test_create_tweet_recorded_once() {
        let pipeline = create_pipeline(KnownApiRegistry::empty());
        let call = || {
            CapturedExchange::new("POST", CREATE_TWEET_URL)
                .header("content-type", "application/json")
                .header("x-csrf-token", "abc")
                .request_body(RequestBody::Json(create_tweet_body()))
                .response(200, r#"{"data":{"create_tweet":{"rest_id":"1"}}}"#)
        };

        let first = pipeline.observe(call()).unwrap();
        assert!(first.is_graphql);
        assert_eq!(first.operation_name.as_deref(), Some("CreateTweet"));
        assert_eq!(first.hits, 1);
        assert!(first
            .key
            .as_str()
            .starts_with("gql|POST|/i/api/graphql/abc123/CreateTweet|CreateTweet|"));
        assert_eq!(first.headers["x-csrf-token"], "[REDACTED]");

        let second = pipeline.observe(call()).unwrap();
        assert_eq!(second.key, first.key);
        assert_eq!(second.hits, 2);
        assert_eq!(second.first_seen, first.first_seen);
        assert_eq!(pipeline.store().len(), 1);
    }

    #[test]
    fn test_tweet_ids_do_not_split_records() {
        let pipeline = create_pipeline(KnownApiRegistry::empty());
        let call = |tweet_id: &str, user_id: &str| {
            CapturedExchange::new("GET", "https://x.com/i/api/graphql/q1/TweetDetail")
                .request_body(RequestBody::Json(json!({
                    "variables": {"focalTweetId": tweet_id, "user_id": user_id}
                })))
                .response(200, "{}")
        };

        let a = pipeline.observe(call("1790000000000000001", "7")).unwrap();
        let b = pipeline.observe(call("1790000000000000002", "7")).unwrap();
        assert_eq!(a.key, b.key);
        assert_eq!(b.hits, 2);

        let c = pipeline.observe(call("1790000000000000001", "8")).unwrap();
        assert_ne!(a.key, c.key);
        assert_eq!(pipeline.store().len(), 2);
    }

    #[test]
    fn test_graphql_from_query_string() {
        let pipeline = create_pipeline(KnownApiRegistry::empty());
        let url = "https://x.com/i/api/graphql/q9/UserByScreenName?variables=%7B%22screen_name%22%3A%22me%22%7D";
        let record = pipeline
            .observe(CapturedExchange::new("GET", url).response(200, "{}"))
            .unwrap();
        assert!(record.is_graphql);
        assert_eq!(record.operation_name.as_deref(), Some("UserByScreenName"));
        assert!(record.variables_shape_hash.is_some());
    }

    #[test]
    fn test_known_call_suppressed() {
        let pipeline = create_pipeline(known_registry());
        for query_id in ["y362cgN7cwMppu6Hy3JzrQ", "anythingElse"] {
            let url = format!("https://x.com/i/api/graphql/{}/CreateTweet", query_id);
            let record = pipeline.observe(
                CapturedExchange::new("post", url)
                    .request_body(RequestBody::Json(create_tweet_body()))
                    .response(200, "{}"),
            );
            assert!(record.is_none());
        }

        assert!(pipeline.store().is_empty());
        assert_eq!(pipeline.store().stats().known_skipped, 2);
    }

    #[test]
    fn test_search_and_export() {
        let pipeline = create_pipeline(KnownApiRegistry::empty());
        pipeline.observe(
            CapturedExchange::new("POST", CREATE_TWEET_URL)
                .request_body(RequestBody::Json(create_tweet_body())),
        );
        pipeline.observe(CapturedExchange::new("GET", "https://x.com/1.1/help/settings.json"));

        let store = pipeline.store();
        assert_eq!(store.search("createtweet").len(), 1);
        assert_eq!(store.search(["settings", "CreateTweet"]).len(), 2);

        let exported: Vec<serde_json::Value> = serde_json::from_str(&store.to_json(true)).unwrap();
        assert_eq!(exported.len(), 2);
        assert!(exported.iter().all(|r| r.get("lastSeen").is_some()));
    }
}

// ============================================================================
// Tower Layer
// ============================================================================

mod tower_layer {
    use super::*;

    #[tokio::test]
    async fn test_layer_records_and_forwards_body() {
        let flag = InstallFlag::new();
        let pipeline = create_pipeline(KnownApiRegistry::empty());
        let interceptor = Interceptor::install(&flag, Arc::clone(&pipeline)).unwrap();

        let inner = service_fn(|_request: Request<String>| async {
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(
                br#"{"data":{"create_tweet":{"rest_id":"1"}}}"#,
            ))))
        });
        let service = interceptor.layer().layer(inner);

        let request = Request::builder()
            .method("POST")
            .uri(CREATE_TWEET_URL)
            .header("content-type", "application/json")
            .header("authorization", "Bearer secret")
            .body(create_tweet_body().to_string())
            .unwrap();

        let response = service.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"data":{"create_tweet":{"rest_id":"1"}}}"#);

        let records = pipeline.store().list();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert!(record.is_graphql);
        assert_eq!(record.operation_name.as_deref(), Some("CreateTweet"));
        assert_eq!(record.status, Some(200));
        assert_eq!(record.headers["authorization"], "[REDACTED]");
        assert_eq!(
            record.response_sample,
            Some(json!({"data": {"create_tweet": {"rest_id": "1"}}}))
        );
    }

    #[tokio::test]
    async fn test_layer_passes_errors_through() {
        let pipeline = create_pipeline(KnownApiRegistry::empty());
        let inner = service_fn(|_request: Request<String>| async {
            Err::<Response<Full<Bytes>>, _>(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset",
            ))
        });
        let service = reasonkit_apiscope::CaptureLayer::new(Arc::clone(&pipeline)).layer(inner);

        let request = Request::get("https://x.com/api/timeline")
            .body(String::new())
            .unwrap();
        let err = service.oneshot(request).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionReset);

        let records = pipeline.store().list();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error.as_deref(), Some("connection reset"));
        assert_eq!(records[0].status, None);
    }

    #[tokio::test]
    async fn test_known_call_through_layer_not_stored() {
        let pipeline = create_pipeline(known_registry());
        let inner = service_fn(|_request: Request<String>| async {
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(b"{}"))))
        });
        let service = reasonkit_apiscope::CaptureLayer::new(Arc::clone(&pipeline)).layer(inner);

        let request = Request::post("https://x.com/i/api/graphql/zzz/CreateTweet")
            .body(create_tweet_body().to_string())
            .unwrap();
        let response = service.oneshot(request).await.unwrap();
        let _ = response.into_body().collect().await.unwrap();

        assert!(pipeline.store().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_call_recorded_as_aborted() {
        let pipeline = create_pipeline(KnownApiRegistry::empty());
        let inner = service_fn(|_request: Request<String>| {
            std::future::pending::<Result<Response<Full<Bytes>>, Infallible>>()
        });
        let mut service =
            reasonkit_apiscope::CaptureLayer::new(Arc::clone(&pipeline)).layer(inner);

        let request = Request::get("https://x.com/i/api/2/notifications/all.json")
            .body(String::new())
            .unwrap();
        let mut future = Box::pin(service.ready().await.unwrap().call(request));
        let mut cx = Context::from_waker(Waker::noop());
        assert!(future.as_mut().poll(&mut cx).is_pending());
        assert!(pipeline.store().is_empty());
        drop(future);

        let records = pipeline.store().list();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error.as_deref(), Some(ABORTED_ERROR));
        assert_eq!(records[0].status, None);
    }

    #[tokio::test]
    async fn test_buffered_json_request_classified_from_payload() {
        let pipeline = create_pipeline(KnownApiRegistry::empty());
        let inner = service_fn(|_request: Request<Full<Bytes>>| async {
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(b"{}"))))
        });
        let service = reasonkit_apiscope::CaptureLayer::new(Arc::clone(&pipeline)).layer(inner);

        // the path carries no operation name, so only the payload can supply it
        let request = Request::post("https://x.com/i/api/graphql")
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(create_tweet_body().to_string())))
            .unwrap();
        let response = service.oneshot(request).await.unwrap();
        let _ = response.into_body().collect().await.unwrap();

        let records = pipeline.store().list();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_graphql);
        assert_eq!(records[0].operation_name.as_deref(), Some("CreateTweet"));
        assert_eq!(
            records[0].request_sample,
            Some(json!({"operationName": "CreateTweet", "variables": {"tweet_text": "hi"}}))
        );
    }

    #[tokio::test]
    async fn test_repeated_request_headers_joined() {
        let pipeline = create_pipeline(KnownApiRegistry::empty());
        let inner = service_fn(|_request: Request<String>| async {
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::new())))
        });
        let service = reasonkit_apiscope::CaptureLayer::new(Arc::clone(&pipeline)).layer(inner);

        let request = Request::get("https://x.com/api/timeline")
            .header("accept", "a")
            .header("accept", "b")
            .body(String::new())
            .unwrap();
        let response = service.oneshot(request).await.unwrap();
        let _ = response.into_body().collect().await.unwrap();

        assert_eq!(pipeline.store().list()[0].headers["accept"], "a, b");
    }
}

// ============================================================================
// Transport Decorator
// ============================================================================

mod transport_decorator {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("transport failed: {0}")]
    struct TransportError(String);

    #[derive(Default)]
    struct MockTransport {
        sent: Mutex<Vec<OutboundRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        type Error = TransportError;

        async fn execute(&self, request: OutboundRequest) -> Result<InboundResponse, TransportError> {
            self.sent.lock().push(request);
            if self.fail {
                return Err(TransportError("timeout".to_string()));
            }
            Ok(InboundResponse {
                status: 201,
                headers: vec![("content-type".to_string(), "application/json".to_string())],
                body: Bytes::from_static(br#"{"ok":true}"#),
            })
        }
    }

    #[tokio::test]
    async fn test_staged_call_captured() {
        let flag = InstallFlag::new();
        let pipeline = create_pipeline(KnownApiRegistry::empty());
        let interceptor = Interceptor::install(&flag, Arc::clone(&pipeline)).unwrap();
        let transport = interceptor.wrap_transport(MockTransport::default());

        let mut call = transport.open("POST", "https://x.com/i/api/1.1/jot/client_event.json");
        call.set_request_header("Content-Type", "application/x-www-form-urlencoded")
            .set_request_header("Cookie", "auth_token=secret");
        let response = call
            .send(RequestBody::Text("category=perftown&log=%5B%5D".to_string()))
            .await
            .unwrap();

        assert_eq!(response.status, 201);
        assert_eq!(&response.body[..], br#"{"ok":true}"#);
        assert_eq!(transport.get_ref().sent.lock().len(), 1);

        let record = &pipeline.store().list()[0];
        assert!(!record.is_graphql);
        assert_eq!(record.status, Some(201));
        assert_eq!(record.headers["cookie"], "[REDACTED]");
        assert_eq!(
            record.request_sample,
            Some(json!({"category": "perftown", "log": "[]"}))
        );
    }

    #[tokio::test]
    async fn test_transport_error_returned_and_recorded() {
        let pipeline = create_pipeline(KnownApiRegistry::empty());
        let transport = reasonkit_apiscope::CapturingTransport::new(
            MockTransport {
                fail: true,
                ..Default::default()
            },
            Arc::clone(&pipeline),
        );

        let err = transport
            .execute(OutboundRequest {
                method: "GET".to_string(),
                url: "/api/feed".to_string(),
                headers: Vec::new(),
                body: RequestBody::Empty,
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "transport failed: timeout");

        let records = pipeline.store().list();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error.as_deref(), Some("transport failed: timeout"));
    }

    #[tokio::test]
    async fn test_binary_body_described_not_read() {
        let pipeline = create_pipeline(KnownApiRegistry::empty());
        let transport =
            reasonkit_apiscope::CapturingTransport::new(MockTransport::default(), Arc::clone(&pipeline));

        transport
            .open("POST", "https://upload.x.com/i/media/upload.json")
            .send(RequestBody::Blob {
                size: 2048,
                content_type: Some("image/jpeg".to_string()),
            })
            .await
            .unwrap();

        let sent = transport.get_ref().sent.lock();
        assert!(matches!(sent[0].body, RequestBody::Blob { size: 2048, .. }));

        let record = &pipeline.store().list()[0];
        assert_eq!(
            record.request_sample,
            Some(json!("[Blob size=2048 type=image/jpeg]"))
        );
    }
    struct HangingTransport;

    #[async_trait]
    impl HttpTransport for HangingTransport {
        type Error = TransportError;

        async fn execute(&self, _request: OutboundRequest) -> Result<InboundResponse, TransportError> {
            std::future::pending().await
        }
    }

    #[test]
    fn test_dropped_execute_recorded_as_aborted() {
        let pipeline = create_pipeline(KnownApiRegistry::empty());
        let transport =
            reasonkit_apiscope::CapturingTransport::new(HangingTransport, Arc::clone(&pipeline));

        let mut future = transport.execute(OutboundRequest {
            method: "POST".to_string(),
            url: "https://x.com/i/api/1.1/dm/new2.json".to_string(),
            headers: Vec::new(),
            body: RequestBody::Text("{\"text\":\"hi\"}".to_string()),
        });
        let mut cx = Context::from_waker(Waker::noop());
        assert!(future.as_mut().poll(&mut cx).is_pending());
        drop(future);

        let records = pipeline.store().list();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error.as_deref(), Some(ABORTED_ERROR));
        assert_eq!(records[0].status, None);
        assert_eq!(records[0].request_sample, Some(json!({"text": "hi"})));
    }
}
