use axum::{
    http::{header, Method},
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::WebConfig;
use crate::storage::Storage;

use super::api::{get_device_records, get_file_status, health_check, AppState};

/// Build the read API router over the given storage backend
pub fn create_router(storage: Arc<dyn Storage>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/devices/:device_id", get(get_device_records))
        .route("/api/files/:file_name", get(get_file_status))
        .with_state(AppState { storage })
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serve the read API until `shutdown` is cancelled
pub async fn run_server(
    storage: Arc<dyn Storage>,
    web_config: WebConfig,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let app = create_router(storage);

    let listener = tokio::net::TcpListener::bind(&web_config.listen).await?;
    tracing::info!("Web server listening on {}", web_config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!("Web server shutting down gracefully");
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeviceRecord, Job, PaginatedResult, ProcessedFileEntry, ProcessingErrorEntry};
    use crate::storage::MemoryStorage;
    use crate::web::api::FileStatusResponse;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::{Duration, Utc};
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn seeded_storage() -> MemoryStorage {
        let storage = MemoryStorage::new();
        let base = Utc::now();
        let records: Vec<DeviceRecord> = (0..12)
            .map(|i| DeviceRecord {
                id: Uuid::new_v4(),
                sequence_number: i,
                inventory_id: "INV1".to_string(),
                device_id: "GUID1".to_string(),
                message_id: format!("MSG{}", i),
                text: "text".to_string(),
                message_class: "working".to_string(),
                level: 1,
                area: "ZoneA".to_string(),
                address: "Addr1".to_string(),
                source_file: "a.tsv".to_string(),
                created_at: base + Duration::seconds(i),
            })
            .collect();
        storage.insert_records(&records).await.unwrap();
        storage
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_device_page_two() {
        let app = create_router(Arc::new(seeded_storage().await));
        let (status, body) = get(app, "/api/devices/GUID1?page=2&limit=5").await;
        assert_eq!(status, StatusCode::OK);

        let page: PaginatedResult = serde_json::from_slice(&body).unwrap();
        assert_eq!(page.total, 12);
        assert_eq!(page.page, 2);
        assert_eq!(page.limit, 5);
        assert_eq!(page.total_pages, 3);
        let seqs: Vec<i64> = page.records.iter().map(|r| r.sequence_number).collect();
        assert_eq!(seqs, vec![6, 5, 4, 3, 2]);
    }

    #[tokio::test]
    async fn test_device_paging_defaults_and_clamps() {
        let storage = Arc::new(seeded_storage().await);

        let (_, body) = get(create_router(storage.clone()), "/api/devices/GUID1").await;
        let page: PaginatedResult = serde_json::from_slice(&body).unwrap();
        assert_eq!((page.page, page.limit, page.records.len()), (1, 10, 10));

        let (_, body) = get(
            create_router(storage.clone()),
            "/api/devices/GUID1?page=0&limit=500",
        )
        .await;
        let page: PaginatedResult = serde_json::from_slice(&body).unwrap();
        assert_eq!((page.page, page.limit, page.total_pages), (1, 100, 1));

        let (status, body) = get(create_router(storage), "/api/devices/GUID1?page=x&limit=-4").await;
        assert_eq!(status, StatusCode::OK);
        let page: PaginatedResult = serde_json::from_slice(&body).unwrap();
        assert_eq!((page.page, page.limit), (1, 10));
    }

    #[tokio::test]
    async fn test_unknown_device_is_empty_page() {
        let app = create_router(Arc::new(MemoryStorage::new()));
        let (status, body) = get(app, "/api/devices/nobody").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["total"], 0);
        assert_eq!(json["total_pages"], 0);
        assert_eq!(json["data"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_file_status() {
        let storage = MemoryStorage::new();
        let job = Job::new("/in/bad.tsv".into(), "bad.tsv");
        storage
            .record(&ProcessedFileEntry::error(&job, "row 3: missing required fields device_id"))
            .await
            .unwrap();
        storage
            .append_error(&ProcessingErrorEntry::for_file("bad.tsv", "row 3: missing required fields device_id"))
            .await
            .unwrap();
        let storage = Arc::new(storage);

        let (status, body) = get(create_router(storage.clone()), "/api/files/bad.tsv").await;
        assert_eq!(status, StatusCode::OK);
        let resp: FileStatusResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.entry.file_name, "bad.tsv");
        assert_eq!(resp.errors.len(), 1);

        let (status, body) = get(create_router(storage), "/api/files/missing.tsv").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "file not found: missing.tsv");
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(Arc::new(MemoryStorage::new()));
        let (status, body) = get(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");
    }
}
