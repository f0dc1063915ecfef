use axum::{
    extract::{RawQuery, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use rango::model::SearchResult;
use rango::search::{self, BingClient, CredentialError, ProviderError, SearchError, SearchService};

const ONE_RESULT: &str = r#"{"d":{"results":[
    {"__metadata":{"type":"WebResult"},"ID":"abc","Title":"Django","Url":"https://djangoproject.com","Description":"web framework","DisplayUrl":"djangoproject.com"}
]}}"#;

#[derive(Debug, Clone)]
struct Captured {
    query: Option<String>,
    authorization: Option<String>,
}

#[derive(Clone)]
struct Provider {
    status: StatusCode,
    body: &'static str,
    delay: Duration,
    calls: Arc<Mutex<Vec<Captured>>>,
}

async fn provider_handler(
    State(p): State<Provider>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> (StatusCode, &'static str) {
    p.calls.lock().await.push(Captured {
        query,
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    });
    if !p.delay.is_zero() {
        tokio::time::sleep(p.delay).await;
    }
    (p.status, p.body)
}

/// Serve a canned provider response on a random local port.
async fn spawn_provider(
    status: StatusCode,
    body: &'static str,
    delay: Duration,
) -> (String, Arc<Mutex<Vec<Captured>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let provider = Provider {
        status,
        body,
        delay,
        calls: calls.clone(),
    };
    let app = Router::new()
        .route("/Bing/Search/Web", get(provider_handler))
        .with_state(provider);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/Bing/Search/Web", addr), calls)
}

fn key_file(dir: &tempfile::TempDir, contents: &str) -> std::path::PathBuf {
    let p = dir.path().join("bing.key");
    std::fs::write(&p, contents).unwrap();
    p
}

#[tokio::test]
async fn returns_mapped_results_from_provider() {
    let td = tempfile::tempdir().unwrap();
    let key = key_file(&td, "ABC123\n");
    let (endpoint, calls) = spawn_provider(StatusCode::OK, ONE_RESULT, Duration::ZERO).await;
    let client = BingClient::new(endpoint, key, Duration::from_secs(5)).unwrap();

    let results = search::run_query(&client, "django testing").await.unwrap();
    assert_eq!(
        results,
        vec![SearchResult {
            title: "Django".into(),
            link: "https://djangoproject.com".into(),
            summary: "web framework".into(),
        }]
    );

    let calls = calls.lock().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].query.as_deref(),
        Some("$format=json&$top=10&$skip=0&Query=%27django%20testing%27")
    );
    // base64(":ABC123")
    assert_eq!(calls[0].authorization.as_deref(), Some("Basic OkFCQzEyMw=="));
}

#[tokio::test]
async fn unreachable_endpoint_yields_empty_list() {
    let td = tempfile::tempdir().unwrap();
    let key = key_file(&td, "ABC123");
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = BingClient::new(
        format!("http://{}/Bing/Search/Web", addr),
        key,
        Duration::from_secs(2),
    )
    .unwrap();

    assert!(matches!(
        client.search("rust").await,
        Err(SearchError::Provider(ProviderError::Transport(_)))
    ));
    assert!(search::run_query(&client, "rust").await.unwrap().is_empty());
}

#[tokio::test]
async fn malformed_or_failed_responses_yield_empty_list() {
    let td = tempfile::tempdir().unwrap();
    let key = key_file(&td, "ABC123");

    let (endpoint, _) = spawn_provider(StatusCode::OK, "{\"d\":{}}", Duration::ZERO).await;
    let client = BingClient::new(endpoint, key.clone(), Duration::from_secs(5)).unwrap();
    assert!(matches!(
        client.search("rust").await,
        Err(SearchError::Provider(ProviderError::Decode(_)))
    ));
    assert!(search::run_query(&client, "rust").await.unwrap().is_empty());

    let (endpoint, _) = spawn_provider(StatusCode::UNAUTHORIZED, "denied", Duration::ZERO).await;
    let client = BingClient::new(endpoint, key, Duration::from_secs(5)).unwrap();
    match client.search("rust").await {
        Err(SearchError::Provider(ProviderError::Status { status, body })) => {
            assert_eq!(status.as_u16(), 401);
            assert_eq!(body, "denied");
        }
        other => panic!("expected status error, got {:?}", other),
    }
    assert!(search::run_query(&client, "rust").await.unwrap().is_empty());
}

#[tokio::test]
async fn slow_provider_times_out_to_empty_list() {
    let td = tempfile::tempdir().unwrap();
    let key = key_file(&td, "ABC123");
    let (endpoint, _) = spawn_provider(StatusCode::OK, ONE_RESULT, Duration::from_secs(3)).await;
    let client = BingClient::new(endpoint, key, Duration::from_millis(200)).unwrap();

    assert!(matches!(
        client.search("rust").await,
        Err(SearchError::Provider(ProviderError::Timeout))
    ));
    assert!(search::run_query(&client, "rust").await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_or_empty_credentials_fail_fast() {
    let td = tempfile::tempdir().unwrap();
    let (endpoint, calls) = spawn_provider(StatusCode::OK, ONE_RESULT, Duration::ZERO).await;

    let client = BingClient::new(
        endpoint.clone(),
        td.path().join("absent.key"),
        Duration::from_secs(5),
    )
    .unwrap();
    assert!(matches!(
        search::run_query(&client, "rust").await,
        Err(CredentialError::Unreadable { .. })
    ));

    let key = key_file(&td, "\n");
    let client = BingClient::new(endpoint, key, Duration::from_secs(5)).unwrap();
    assert!(matches!(
        search::run_query(&client, "rust").await,
        Err(CredentialError::Empty(_))
    ));

    assert!(calls.lock().await.is_empty());
}

#[tokio::test]
async fn blank_terms_never_reach_the_provider() {
    let td = tempfile::tempdir().unwrap();
    let key = key_file(&td, "ABC123");
    let (endpoint, calls) = spawn_provider(StatusCode::OK, ONE_RESULT, Duration::ZERO).await;
    let client = BingClient::new(endpoint, key, Duration::from_secs(5)).unwrap();

    assert!(search::run_query(&client, "   ").await.unwrap().is_empty());
    assert!(calls.lock().await.is_empty());
}
