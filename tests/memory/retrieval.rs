use mnemo::config::RetrievalConfig;
use mnemo::memory::{InMemoryVectorStore, MemoryKind, Retriever, SemanticMemory, VectorStore};

use crate::harness::{DIMS, at, embedder, episode};

async fn seeded() -> (InMemoryVectorStore, mnemo::memory::EmbeddingGateway) {
    let embedder = embedder();
    let store = InMemoryVectorStore::new(DIMS);
    for (i, text) in ["User likes jazz.", "User has two sisters.", "User is allergic to nuts."]
        .iter()
        .enumerate()
    {
        let fact = SemanticMemory {
            id: format!("s{i}"),
            user_id: "u1".into(),
            text: (*text).to_string(),
            embedding: embedder.embed_one(text).await.unwrap(),
            created_at: at(i64::try_from(i).unwrap()),
        };
        store
            .upsert(MemoryKind::Semantic, fact.to_record().unwrap())
            .await
            .unwrap();
    }
    for (id, user, text) in [("e1", "u1", "jazz night"), ("e2", "u2", "jazz night")] {
        let m = episode(&embedder, id, user, "c1", text, at(10)).await;
        store
            .upsert(MemoryKind::Episodic, m.to_record().unwrap())
            .await
            .unwrap();
    }
    (store, embedder)
}

#[tokio::test]
async fn exhaustive_mode_returns_every_fact() {
    let (store, embedder) = seeded().await;
    let config = RetrievalConfig {
        k_semantic: 1,
        ..RetrievalConfig::default()
    };

    let ctx = Retriever::new(&store, &embedder, &config)
        .retrieve("u1", "jazz night")
        .await
        .unwrap();

    assert_eq!(ctx.semantic.len(), 3);
    assert!(ctx.semantic.iter().all(|m| m.score.is_none()));
    assert_eq!(ctx.episodic.len(), 1);
    assert_eq!(ctx.episodic[0].id, "e1");
}

#[tokio::test]
async fn similarity_mode_ranks_by_score() {
    let (store, embedder) = seeded().await;
    let config = RetrievalConfig {
        k_semantic: 1,
        use_all_semantic: false,
        ..RetrievalConfig::default()
    };

    let ctx = Retriever::new(&store, &embedder, &config)
        .retrieve("u1", "User is allergic to nuts.")
        .await
        .unwrap();

    assert_eq!(ctx.semantic.len(), 1);
    assert_eq!(ctx.semantic[0].text, "User is allergic to nuts.");
    assert!(ctx.semantic[0].score.unwrap() > 0.99);
    assert!(ctx.render().contains("[Known facts]"));
}

#[tokio::test]
async fn unknown_user_gets_empty_context() {
    let (store, embedder) = seeded().await;
    let ctx = Retriever::new(&store, &embedder, &RetrievalConfig::default())
        .retrieve("nobody", "jazz")
        .await
        .unwrap();
    assert!(ctx.is_empty());
    assert_eq!(ctx.render(), "");
}
