use std::sync::Arc;
use std::time::Duration;

use orderflow_infra::object_store::ObjectStore;
use orderflow_infra::webhooks::RecordingTransport;
use orderflow_infra::{Pipeline, PipelineConfig, PipelineWorkers};
use reqwest::StatusCode;
use serde_json::json;

struct TestServer {
    base_url: String,
    pipeline: Arc<Pipeline>,
    workers: Option<PipelineWorkers>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, in-memory backends, ephemeral port.
        let config = PipelineConfig::default()
            .with_queue_pool(1, 1)
            .with_bus_pool(1, 1)
            .with_queue_visibility(Duration::from_millis(200));
        let pipeline = Pipeline::builder(config)
            .with_transport(Arc::new(RecordingTransport::new()))
            .build()
            .expect("failed to assemble pipeline");
        let pipeline = Arc::new(pipeline);

        let app = orderflow_api::app::build_app(pipeline.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            pipeline,
            workers: None,
            handle,
        }
    }

    fn start_workers(&mut self) {
        self.workers = Some(self.pipeline.start().expect("failed to start workers"));
    }

    fn upload(&self, key: &str, body: &str) {
        self.pipeline
            .objects()
            .put("orders", key, body.as_bytes().to_vec())
            .expect("upload failed");
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(workers) = self.workers.take() {
            workers.shutdown();
        }
        self.handle.abort();
    }
}

async fn set_stock(client: &reqwest::Client, srv: &TestServer, sku: &str, quantity: i64) {
    let res = client
        .put(srv.url("/inventory"))
        .json(&json!({
            "tenant_id": "T1",
            "seller_id": "S1",
            "hub_code": "HUB-1",
            "sku_code": sku,
            "quantity": quantity,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

async fn orders_eventually(
    client: &reqwest::Client,
    srv: &TestServer,
    tenant: &str,
    expected: usize,
) -> Vec<serde_json::Value> {
    // Ingestion and finalization run on worker threads; poll until they settle.
    for _ in 0..200 {
        let res = client
            .get(srv.url(&format!("/orders?tenant_id={tenant}")))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let orders: Vec<serde_json::Value> = res.json().await.unwrap();
        if orders.len() == expected && orders.iter().all(|o| o["status"] == "new_order") {
            return orders;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    panic!("orders for {tenant} did not settle within timeout");
}

#[tokio::test]
async fn health_is_ok() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn submitted_csv_becomes_confirmed_orders() {
    let mut srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    set_stock(&client, &srv, "SKU-1", 10).await;
    srv.upload(
        "uploads/batch.csv",
        "tenant_id,seller_id,hub_id,sku_id,quantity\nT1,S1,HUB-1,SKU-1,2\nT1,S1,HUB-1,SKU-1,-5\nT1,S1,HUB-1,SKU-1,3\n",
    );
    srv.start_workers();

    let res = client
        .post(srv.url("/orders/csv"))
        .json(&json!({ "path": "/uploads/batch.csv" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let receipt: serde_json::Value = res.json().await.unwrap();
    assert_eq!(receipt["bucket"], "orders");
    assert_eq!(receipt["key"], "uploads/batch.csv");
    assert!(!receipt["message_id"].as_str().unwrap().is_empty());

    let orders = orders_eventually(&client, &srv, "T1", 2).await;
    let id = orders[0]["id"].as_str().unwrap().to_string();

    let res = client.get(srv.url(&format!("/orders/{id}"))).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let order: serde_json::Value = res.json().await.unwrap();
    assert_eq!(order["id"], id.as_str());
    assert_eq!(order["status"], "new_order");

    let res = client
        .get(srv.url(
            "/inventory/query?tenant_id=T1&seller_id=S1&hub_code=HUB-1&sku_code=SKU-1",
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let record: serde_json::Value = res.json().await.unwrap();
    assert_eq!(record["quantity"], 5);
}

#[tokio::test]
async fn intake_rejects_missing_upload_and_empty_path() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/orders/csv"))
        .json(&json!({ "path": "nowhere.csv" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");

    let res = client
        .post(srv.url("/orders/csv"))
        .json(&json!({ "path": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn consume_is_conditional() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    set_stock(&client, &srv, "SKU-1", 10).await;

    let consume = |quantity: i64, sku: &'static str| {
        client
            .post(srv.url("/inventory/consume"))
            .json(&json!({
                "tenant_id": "T1",
                "seller_id": "S1",
                "hub_code": "HUB-1",
                "sku_code": sku,
                "quantity": quantity,
            }))
            .send()
    };

    let res = consume(6, "SKU-1").await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "remaining": 4 }));

    let res = consume(6, "SKU-1").await.unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["available"], 4);
    assert_eq!(body["requested"], 6);

    let res = consume(1, "SKU-404").await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(srv.url(
            "/inventory/query?tenant_id=T1&seller_id=S1&hub_code=HUB-1&sku_code=SKU-404",
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn catalog_lookups_follow_stocked_codes() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    set_stock(&client, &srv, "SKU-1", 1).await;

    let res = client.get(srv.url("/skus/code/SKU-1")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let res = client.get(srv.url("/hubs/code/HUB-1")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let res = client.get(srv.url("/skus/code/NOPE")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webhook_registration_is_tenant_scoped() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/webhooks"))
        .json(&json!({
            "tenant_id": "T1",
            "callback_url": "https://hooks.test/orders",
            "events": ["order.updated"],
            "secret": "s3cret",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let sub: serde_json::Value = res.json().await.unwrap();
    assert_eq!(sub["is_active"], true);
    assert!(sub.get("secret").is_none());
    let id = sub["id"].as_str().unwrap().to_string();

    let res = client.get(srv.url("/webhooks/T1")).send().await.unwrap();
    let listed: Vec<serde_json::Value> = res.json().await.unwrap();
    assert_eq!(listed.len(), 1);

    let res = client.get(srv.url("/webhooks/T2")).send().await.unwrap();
    let listed: Vec<serde_json::Value> = res.json().await.unwrap();
    assert!(listed.is_empty());

    // Another tenant cannot deactivate it.
    let res = client.delete(srv.url(&format!("/webhooks/T2/{id}"))).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client.delete(srv.url(&format!("/webhooks/T1/{id}"))).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    let res = client.get(srv.url("/webhooks/T1")).send().await.unwrap();
    let listed: Vec<serde_json::Value> = res.json().await.unwrap();
    assert_eq!(listed[0]["is_active"], false);
}

#[tokio::test]
async fn invalid_webhook_registration_is_400() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/webhooks"))
        .json(&json!({
            "tenant_id": "T1",
            "callback_url": "ftp://hooks.test",
            "events": ["order.updated"],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn order_lookup_validates_id() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/orders/not-a-uuid")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .get(srv.url("/orders/01890a5d-ac96-774b-bcce-b302099a8057"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
