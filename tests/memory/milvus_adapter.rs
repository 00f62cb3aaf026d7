use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mnemo::error::StoreError;
use mnemo::memory::{EpisodicMemory, MemoryKind, MilvusVectorStore, RecordFilter, VectorStore};

use crate::harness::at;

fn memory(id: &str, mins: i64) -> EpisodicMemory {
    EpisodicMemory {
        id: id.into(),
        user_id: "u1".into(),
        chat_id: "c1".into(),
        text: format!("text of {id}"),
        embedding: vec![0.1, 0.2, 0.3],
        created_at: at(mins),
    }
}

fn store(server: &MockServer) -> MilvusVectorStore {
    MilvusVectorStore::new(&server.uri(), Some("root:Milvus"), "memories", 3)
}

#[tokio::test]
async fn upsert_sends_filterable_scalar_fields() {
    let server = MockServer::start().await;
    let m = memory("e1", 0);

    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/upsert"))
        .and(header("authorization", "Bearer root:Milvus"))
        .and(body_partial_json(json!({
            "collectionName": "memories",
            "data": [{
                "id": "e1",
                "namespace": "episodic",
                "user_id": "u1",
                "chat_id": "c1",
                "created_at": m.created_at.timestamp_micros(),
            }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": {"upsertCount": 1}
        })))
        .expect(1)
        .mount(&server)
        .await;

    store(&server)
        .upsert(MemoryKind::Episodic, m.to_record().unwrap())
        .await
        .unwrap();
    server.verify().await;
}

#[tokio::test]
async fn search_orders_hits_and_omits_vectors() {
    let server = MockServer::start().await;
    let low = memory("e1", 0).to_record().unwrap();
    let high = memory("e2", 1).to_record().unwrap();

    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/search"))
        .and(body_partial_json(json!({
            "limit": 2,
            "filter": "namespace == \"episodic\" && user_id == \"u1\""
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": [
                {"id": "e1", "distance": 0.42, "payload": low.payload},
                {"id": "e2", "distance": 0.91, "payload": high.payload}
            ]
        })))
        .mount(&server)
        .await;

    let hits = store(&server)
        .search(MemoryKind::Episodic, &[0.1, 0.2, 0.3], 2, &RecordFilter::for_user("u1"))
        .await
        .unwrap();

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].record.id, "e2");
    assert!((hits[0].score - 0.91).abs() < 1e-6);
    assert!(hits[0].record.vector.is_empty());
    assert_eq!(hits[1].record.payload["text"], "text of e1");
}

#[tokio::test]
async fn query_returns_vectors_in_creation_order() {
    let server = MockServer::start().await;
    let older = memory("e1", 0).to_record().unwrap();
    let newer = memory("e2", 5).to_record().unwrap();

    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": [
                {"id": "e2", "vector": [0.1, 0.2, 0.3], "payload": newer.payload},
                {"id": "e1", "vector": [0.1, 0.2, 0.3], "payload": older.payload}
            ]
        })))
        .mount(&server)
        .await;

    let records = store(&server)
        .query(MemoryKind::Episodic, &RecordFilter::for_user("u1"), None)
        .await
        .unwrap();

    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["e1", "e2"]);
    let first = EpisodicMemory::from_record(records[0].clone()).unwrap();
    assert_eq!(first.created_at, at(0));
    assert_eq!(first.embedding.len(), 3);
}

#[tokio::test]
async fn nonzero_code_is_a_backend_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/delete"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 1100,
            "message": "collection not found"
        })))
        .mount(&server)
        .await;

    let err = store(&server)
        .delete(MemoryKind::Semantic, "s1")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::Backend { ref message, .. } if message.contains("collection not found")
    ));
}

#[tokio::test]
async fn existing_collection_is_not_recreated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/has"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": {"has": true}})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": {}})))
        .expect(0)
        .mount(&server)
        .await;

    store(&server).ensure_collection().await.unwrap();
    server.verify().await;
}

#[tokio::test]
async fn wrong_dimension_never_reaches_the_server() {
    let server = MockServer::start().await;
    let mut m = memory("e1", 0);
    m.embedding = vec![1.0; 4];

    let err = store(&server)
        .upsert(MemoryKind::Episodic, m.to_record().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::DimensionMismatch { expected: 3, actual: 4, .. }));
    assert!(server.received_requests().await.unwrap().is_empty());
}
