use mnemo::config::ConsolidationConfig;
use mnemo::memory::{
    CommitTarget, ConsolidationOrchestrator, ConsolidationPhase, InMemoryVectorStore, MemoryKind,
    RecordFilter, SemanticMemory, VectorStore,
};

use crate::harness::{DIMS, ScriptedModel, at, embedder, episode, is_extraction};

const FACTS: &str = r#"```json
{"write_semantic": true, "facts": ["User's dog is named Bolt.", "User lives in Lisbon."]}
```"#;

#[tokio::test]
async fn batch_rewrites_episode_and_writes_facts() {
    let embedder = embedder();
    let store = InMemoryVectorStore::new(DIMS);
    let config = ConsolidationConfig::default();

    let first = episode(&embedder, "e1", "u1", "c1", "User got a puppy named Bolt", at(0)).await;
    let second = episode(
        &embedder,
        "e2",
        "u1",
        "c1",
        "Actually the puppy is a rescue dog",
        at(5),
    )
    .await;
    for m in [&first, &second] {
        store
            .upsert(MemoryKind::Episodic, m.to_record().unwrap())
            .await
            .unwrap();
    }

    let llm = ScriptedModel::new(|system, user| {
        if is_extraction(system) {
            Some(FACTS.to_string())
        } else if user.contains("User got a puppy named Bolt") {
            Some("User adopted Bolt, a rescue dog.".to_string())
        } else {
            Some(String::new())
        }
    });

    let mut orchestrator = ConsolidationOrchestrator::new(&llm, &embedder, &store, &config);
    let report = orchestrator
        .consolidate("u1", vec![second.clone(), first.clone()])
        .await
        .unwrap();

    assert_eq!(orchestrator.phase(), ConsolidationPhase::Idle);
    assert!(report.is_clean());
    assert_eq!(report.batch_len, 2);
    assert_eq!(report.rewritten, 1);
    assert_eq!(report.semantic_written(), 2);
    assert_eq!(report.consolidated_through, Some(at(5)));
    // One rewrite for e1 (e2 has no later context) plus one extraction.
    assert_eq!(llm.call_count(), 2);

    let episodes = store
        .query(MemoryKind::Episodic, &RecordFilter::for_user("u1"), None)
        .await
        .unwrap();
    assert_eq!(episodes.len(), 2);
    let rewritten = episodes.iter().find(|r| r.id == "e1").unwrap();
    assert_eq!(rewritten.payload["text"], "User adopted Bolt, a rescue dog.");
    assert_eq!(rewritten.payload["created_at"], first.to_record().unwrap().payload["created_at"]);
    assert_ne!(rewritten.vector, first.embedding);

    let facts = store
        .query(MemoryKind::Semantic, &RecordFilter::for_user("u1"), None)
        .await
        .unwrap();
    let texts: Vec<String> = facts
        .into_iter()
        .map(|r| SemanticMemory::from_record(r).unwrap().text)
        .collect();
    assert!(texts.contains(&"User's dog is named Bolt.".to_string()));
    assert!(texts.contains(&"User lives in Lisbon.".to_string()));
}

#[tokio::test]
async fn repeated_fact_is_not_written_twice() {
    let embedder = embedder();
    let store = InMemoryVectorStore::new(DIMS);
    let config = ConsolidationConfig::default();
    let llm = ScriptedModel::new(|system, _| {
        Some(if is_extraction(system) {
            r#"{"write_semantic": true, "facts": ["User lives in Lisbon."]}"#.to_string()
        } else {
            String::new()
        })
    });

    let day1 = episode(&embedder, "e1", "u1", "c1", "I live in Lisbon", at(0)).await;
    let mut orchestrator = ConsolidationOrchestrator::new(&llm, &embedder, &store, &config);
    orchestrator.consolidate("u1", vec![day1]).await.unwrap();

    let day2 = episode(&embedder, "e2", "u1", "c2", "Lisbon is sunny today", at(60)).await;
    let report = orchestrator.consolidate("u1", vec![day2]).await.unwrap();

    assert_eq!(report.semantic_written(), 0);
    assert_eq!(report.duplicate_facts, vec!["User lives in Lisbon.".to_string()]);
    assert_eq!(store.len(MemoryKind::Semantic).await, 1);
}

#[tokio::test]
async fn existing_facts_are_passed_to_extraction() {
    let embedder = embedder();
    let store = InMemoryVectorStore::new(DIMS);
    let config = ConsolidationConfig::default();
    let known = SemanticMemory {
        id: "s1".into(),
        user_id: "u1".into(),
        text: "User is vegetarian.".into(),
        embedding: embedder.embed_one("User is vegetarian.").await.unwrap(),
        created_at: at(-100),
    };
    store
        .upsert(MemoryKind::Semantic, known.to_record().unwrap())
        .await
        .unwrap();

    let llm = ScriptedModel::new(|_, _| Some(r#"{"write_semantic": false, "facts": []}"#.into()));
    let e = episode(&embedder, "e1", "u1", "c1", "Had a salad", at(0)).await;
    let mut orchestrator = ConsolidationOrchestrator::new(&llm, &embedder, &store, &config);
    let report = orchestrator.consolidate("u1", vec![e]).await.unwrap();

    assert!(report.entries.is_empty());
    let prompts = llm.prompts.lock().unwrap();
    let (_, user) = prompts.last().unwrap();
    assert!(user.contains("User is vegetarian."));
    assert!(user.contains("Had a salad"));
}

#[tokio::test]
async fn offline_model_leaves_store_untouched() {
    let embedder = embedder();
    let store = InMemoryVectorStore::new(DIMS);
    let config = ConsolidationConfig::default();
    let a = episode(&embedder, "e1", "u1", "c1", "first", at(0)).await;
    let b = episode(&embedder, "e2", "u1", "c1", "second", at(1)).await;
    for m in [&a, &b] {
        store
            .upsert(MemoryKind::Episodic, m.to_record().unwrap())
            .await
            .unwrap();
    }

    let llm = ScriptedModel::new(|_, _| None);
    let mut orchestrator = ConsolidationOrchestrator::new(&llm, &embedder, &store, &config);
    let report = orchestrator.consolidate("u1", vec![a, b]).await.unwrap();

    assert_eq!(report.rewritten, 0);
    assert!(!report.extraction.write_semantic);
    assert!(report.entries.is_empty());
    assert_eq!(store.len(MemoryKind::Semantic).await, 0);
    let stored = store
        .query(MemoryKind::Episodic, &RecordFilter::for_user("u1"), None)
        .await
        .unwrap();
    assert_eq!(stored[0].payload["text"], "first");
}

#[tokio::test]
async fn updated_fact_supersedes_close_match() {
    let embedder = embedder();
    let store = InMemoryVectorStore::new(DIMS);
    let config = ConsolidationConfig::default();
    // Same direction as the incoming fact, different wording.
    let old = SemanticMemory {
        id: "s-old".into(),
        user_id: "u1".into(),
        text: "User works at Acme.".into(),
        embedding: embedder.embed_one("User works at Globex.").await.unwrap(),
        created_at: at(-10),
    };
    store
        .upsert(MemoryKind::Semantic, old.to_record().unwrap())
        .await
        .unwrap();

    let llm = ScriptedModel::new(|system, _| {
        Some(if is_extraction(system) {
            r#"{"write_semantic": true, "facts": ["User works at Globex."]}"#.to_string()
        } else {
            String::new()
        })
    });
    let e = episode(&embedder, "e1", "u1", "c1", "Started at Globex today", at(0)).await;
    let mut orchestrator = ConsolidationOrchestrator::new(&llm, &embedder, &store, &config);
    let report = orchestrator.consolidate("u1", vec![e]).await.unwrap();

    assert!(report.duplicate_facts.is_empty());
    assert!(matches!(
        report.entries[0].target,
        CommitTarget::SemanticSupersede { ref old_ids, .. } if old_ids == &["s-old"]
    ));
    let facts = store
        .query(MemoryKind::Semantic, &RecordFilter::for_user("u1"), None)
        .await
        .unwrap();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].payload["text"], "User works at Globex.");
}
