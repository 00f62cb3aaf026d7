use mnemo::config::ConsolidationConfig;
use mnemo::memory::{
    ConsolidationScheduler, InMemoryVectorStore, MemoryKind, SchedulerRun, VectorStore,
};
use tempfile::TempDir;

use crate::harness::{DIMS, ScriptedModel, at, embedder, episode, is_extraction};

fn config(min_new_episodes: usize, batch_size: usize) -> ConsolidationConfig {
    ConsolidationConfig {
        min_new_episodes,
        batch_size,
        ..ConsolidationConfig::default()
    }
}

fn fact_model() -> ScriptedModel<impl Fn(&str, &str) -> Option<String> + Send + Sync> {
    ScriptedModel::new(|system, _| {
        Some(if is_extraction(system) {
            r#"{"write_semantic": true, "facts": ["User plays chess."]}"#.to_string()
        } else {
            String::new()
        })
    })
}

#[tokio::test]
async fn second_run_without_new_episodes_is_a_no_op() {
    let tmp = TempDir::new().unwrap();
    let embedder = embedder();
    let store = InMemoryVectorStore::new(DIMS);
    for (i, text) in ["Played chess", "Won a chess game", "Chess club tonight"]
        .iter()
        .enumerate()
    {
        let m = episode(&embedder, &format!("e{i}"), "u1", "c1", text, at(i as i64)).await;
        store
            .upsert(MemoryKind::Episodic, m.to_record().unwrap())
            .await
            .unwrap();
    }

    let scheduler = ConsolidationScheduler::new(tmp.path(), &config(3, 50));
    let llm = fact_model();

    assert!(scheduler.should_consolidate(&store, "u1").await.unwrap());
    let first = scheduler
        .run_once(&llm, &embedder, &store, "u1", false)
        .await
        .unwrap();
    let SchedulerRun::Consolidated {
        report,
        previous_watermark,
        applied_watermark,
        abandoned,
    } = first
    else {
        panic!("expected a consolidation run");
    };
    assert_eq!(report.batch_len, 3);
    assert_eq!(previous_watermark, None);
    assert_eq!(applied_watermark, Some(at(2)));
    assert!(abandoned.is_empty());
    assert_eq!(store.len(MemoryKind::Semantic).await, 1);

    let calls_after_first = llm.call_count();
    let second = scheduler
        .run_once(&llm, &embedder, &store, "u1", true)
        .await
        .unwrap();
    assert!(matches!(second, SchedulerRun::Skipped { pending: 0 }));
    assert_eq!(llm.call_count(), calls_after_first);
    assert_eq!(store.len(MemoryKind::Semantic).await, 1);
}

#[tokio::test]
async fn watermark_survives_a_new_scheduler_instance() {
    let tmp = TempDir::new().unwrap();
    let embedder = embedder();
    let store = InMemoryVectorStore::new(DIMS);
    let m = episode(&embedder, "e1", "u1", "c1", "Moved to Porto", at(0)).await;
    store
        .upsert(MemoryKind::Episodic, m.to_record().unwrap())
        .await
        .unwrap();

    let llm = fact_model();
    ConsolidationScheduler::new(tmp.path(), &config(1, 50))
        .run_once(&llm, &embedder, &store, "u1", false)
        .await
        .unwrap();

    let restarted = ConsolidationScheduler::new(tmp.path(), &config(1, 50));
    assert_eq!(restarted.watermark("u1").unwrap(), Some(at(0)));
    assert!(restarted.pending(&store, "u1").await.unwrap().is_empty());
    assert_eq!(restarted.watermark("u2").unwrap(), None);
}

#[tokio::test]
async fn backlog_is_drained_in_batches() {
    let tmp = TempDir::new().unwrap();
    let embedder = embedder();
    let store = InMemoryVectorStore::new(DIMS);
    for i in 0..5 {
        let m = episode(&embedder, &format!("e{i}"), "u1", "c1", &format!("note {i}"), at(i)).await;
        store
            .upsert(MemoryKind::Episodic, m.to_record().unwrap())
            .await
            .unwrap();
    }

    let scheduler = ConsolidationScheduler::new(tmp.path(), &config(1, 2));
    let llm = ScriptedModel::new(|_, _| Some(String::new()));

    let mut sizes = Vec::new();
    loop {
        match scheduler
            .run_once(&llm, &embedder, &store, "u1", false)
            .await
            .unwrap()
        {
            SchedulerRun::Consolidated { report, .. } => sizes.push(report.batch_len),
            SchedulerRun::Skipped { .. } => break,
        }
    }
    assert_eq!(sizes, vec![2, 2, 1]);
    assert_eq!(scheduler.watermark("u1").unwrap(), Some(at(4)));
}

#[tokio::test]
async fn below_trigger_is_skipped_unless_forced() {
    let tmp = TempDir::new().unwrap();
    let embedder = embedder();
    let store = InMemoryVectorStore::new(DIMS);
    let m = episode(&embedder, "e1", "u1", "c1", "Quiet day", at(0)).await;
    store
        .upsert(MemoryKind::Episodic, m.to_record().unwrap())
        .await
        .unwrap();

    let scheduler = ConsolidationScheduler::new(tmp.path(), &config(5, 50));
    let llm = fact_model();

    let run = scheduler
        .run_once(&llm, &embedder, &store, "u1", false)
        .await
        .unwrap();
    assert!(matches!(run, SchedulerRun::Skipped { pending: 1 }));
    assert_eq!(llm.call_count(), 0);

    let forced = scheduler
        .run_once(&llm, &embedder, &store, "u1", true)
        .await
        .unwrap();
    assert!(matches!(forced, SchedulerRun::Consolidated { .. }));
}
