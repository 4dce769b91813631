use super::*;
use crate::sinks::{DailyUsageGate, MemoryHistory, SearchedTranslation, UnlimitedGate};
use crate::translate::scripted::ScriptedTranslator;
use crate::translate::Meaning;
use crate::util::ManualClock;
use std::time::Duration;

struct Harness<G> {
    orchestrator: Orchestrator<ScriptedTranslator, G, MemoryHistory>,
    translator: ScriptedTranslator,
    gate: Arc<G>,
    history: Arc<MemoryHistory>,
    clock: ManualClock,
}

fn lang(code: &str) -> LanguageCode {
    LanguageCode::new(code).expect("valid")
}

fn langs(codes: &[&str]) -> Vec<LanguageCode> {
    codes.iter().map(|c| lang(c)).collect()
}

fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_retry(RetryPolicy::immediate(2))
        .with_sweep_probability(0.0)
        .expect("valid probability")
}

fn harness_with<G: UsageGate + 'static>(
    translator: ScriptedTranslator,
    gate: G,
    config: EngineConfig,
) -> Harness<G> {
    let clock = ManualClock::default();
    let cache = Arc::new(TranslationCache::new(
        config.cache_ttl,
        Arc::new(clock.clone()),
    ));
    let gate = Arc::new(gate);
    let history = Arc::new(MemoryHistory::new(config.history_capacity));
    let orchestrator = Orchestrator::new(
        translator.clone(),
        cache,
        gate.clone(),
        history.clone(),
        config,
    )
    .with_clock(Arc::new(clock.clone()));
    Harness {
        orchestrator,
        translator,
        gate,
        history,
        clock,
    }
}

fn harness(translator: ScriptedTranslator) -> Harness<UnlimitedGate> {
    harness_with(translator, UnlimitedGate::new(), test_config())
}

fn text_at(snapshot: &BatchSnapshot, index: usize) -> Option<&str> {
    snapshot.results[index]
        .as_ref()
        .map(|r| r.translated_text.as_str())
}

#[tokio::test(start_paused = true)]
async fn translates_into_every_target_and_records_one_history_entry() {
    let translator = ScriptedTranslator::new()
        .ok("ko", "안녕하세요")
        .ok("ja", "こんにちは");
    let h = harness(translator);

    let mut handle = h
        .orchestrator
        .start_batch("hello", &lang("en"), &langs(&["ko", "ja"]))
        .expect("batch starts");
    let done = handle.wait_complete().await;

    assert!(done.complete);
    assert_eq!(done.status_of(0), Some(UnitStatusKind::Success));
    assert_eq!(done.status_of(1), Some(UnitStatusKind::Success));
    assert_eq!(text_at(&done, 0), Some("안녕하세요"));
    assert_eq!(text_at(&done, 1), Some("こんにちは"));

    let records = h.history.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.source_text, "hello");
    assert_eq!(record.target_language, "multiple");
    assert_eq!(record.translated_text, "2 translations");
    assert_eq!(
        record.searched_data,
        vec![
            SearchedTranslation {
                lng: "ko".into(),
                text: "안녕하세요".into()
            },
            SearchedTranslation {
                lng: "ja".into(),
                text: "こんにちは".into()
            },
        ]
    );
    assert_eq!(h.gate.total(), 2);
}

#[tokio::test(start_paused = true)]
async fn results_keep_requested_order_whatever_the_resolution_order() {
    let translator = ScriptedTranslator::new()
        .ok("ko", "KO")
        .delay("ko", Duration::from_millis(300))
        .ok("ja", "JA")
        .delay("ja", Duration::from_millis(100))
        .ok("fr", "FR")
        .delay("fr", Duration::from_millis(200));
    let h = harness(translator);

    let mut handle = h
        .orchestrator
        .start_batch("hello", &lang("en"), &langs(&["ko", "ja", "fr"]))
        .expect("batch starts");

    tokio::time::sleep(Duration::from_millis(150)).await;
    let partial = handle.snapshot();
    assert!(!partial.complete);
    assert_eq!(text_at(&partial, 0), None);
    assert_eq!(text_at(&partial, 1), Some("JA"));
    assert_eq!(text_at(&partial, 2), None);

    let done = handle.wait_complete().await;
    let texts: Vec<_> = (0..3).map(|i| text_at(&done, i)).collect();
    assert_eq!(texts, vec![Some("KO"), Some("JA"), Some("FR")]);
    let targets: Vec<_> = done
        .units
        .iter()
        .map(|u| u.target_language.as_str())
        .collect();
    assert_eq!(targets, vec!["ko", "ja", "fr"]);
}

#[tokio::test(start_paused = true)]
async fn partial_failure_records_only_successes() {
    let translator = ScriptedTranslator::new()
        .ok("ko", "안녕하세요")
        .fail("ja", "HTTP 500")
        .ok("fr", "bonjour");
    let h = harness(translator);

    let mut handle = h
        .orchestrator
        .start_batch("hello", &lang("en"), &langs(&["ko", "ja", "fr"]))
        .expect("batch starts");
    let done = handle.wait_complete().await;

    assert_eq!(done.status_of(1), Some(UnitStatusKind::Error));
    assert!(done.units[1].can_retry);
    assert!(done.units[1].error.is_some());
    let failed = done.results[1].as_ref().expect("failed slot is kept");
    assert_eq!(failed.confidence, 0.0);
    assert_eq!(done.successes().count(), 2);

    let records = h.history.records();
    assert_eq!(records.len(), 1);
    let langs: Vec<_> = records[0]
        .searched_data
        .iter()
        .map(|s| s.lng.as_str())
        .collect();
    assert_eq!(langs, vec!["ko", "fr"]);
    assert_eq!(h.gate.total(), 2);
}

#[tokio::test(start_paused = true)]
async fn source_language_is_never_a_target() {
    let h = harness(ScriptedTranslator::new());

    let mut handle = h
        .orchestrator
        .start_batch("hello", &lang("en"), &langs(&["en", "ko", "EN", "ko"]))
        .expect("batch starts");
    let done = handle.wait_complete().await;

    assert_eq!(done.units.len(), 1);
    assert_eq!(done.units[0].target_language.as_str(), "ko");
    assert_eq!(h.translator.calls("en"), 0);
    assert_eq!(h.translator.calls("EN"), 0);
    assert_eq!(h.translator.total_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn rejects_invalid_batches_before_creating_units() {
    let h = harness(ScriptedTranslator::new());

    assert!(matches!(
        h.orchestrator
            .start_batch("   ", &lang("en"), &langs(&["ko"])),
        Err(BatchError::EmptyText)
    ));
    assert!(matches!(
        h.orchestrator.start_batch("hello", &lang("en"), &[]),
        Err(BatchError::NoTargets)
    ));
    assert!(matches!(
        h.orchestrator
            .start_batch("hello", &lang("en"), &langs(&["en"])),
        Err(BatchError::NoTargets)
    ));
    assert_eq!(h.translator.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn quota_denial_starts_nothing() {
    let clock = ManualClock::default();
    let gate = DailyUsageGate::new(1, Arc::new(clock));
    let h = harness_with(ScriptedTranslator::new(), gate, test_config());

    let err = h
        .orchestrator
        .start_batch("hello", &lang("en"), &langs(&["ko", "ja"]))
        .err();
    assert_eq!(err, Some(BatchError::QuotaExceeded { requested: 2 }));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.translator.total_calls(), 0);
    assert!(h.history.is_empty());
    assert_eq!(h.gate.used_today(), 0);
}

#[tokio::test(start_paused = true)]
async fn timeout_settles_the_unit_and_ignores_the_late_answer() {
    let translator = ScriptedTranslator::new()
        .ok("ko", "late")
        .delay("ko", Duration::from_secs(15));
    let h = harness(translator);

    let mut handle = h
        .orchestrator
        .start_batch("hello", &lang("en"), &langs(&["ko"]))
        .expect("batch starts");
    let timed_out = handle
        .wait_for(|s| s.status_of(0) == Some(UnitStatusKind::Timeout))
        .await;
    assert!(timed_out.complete);
    assert!(timed_out.units[0].can_retry);
    assert_eq!(text_at(&timed_out, 0), None);

    tokio::time::sleep(Duration::from_secs(10)).await;
    let after = handle.snapshot();
    assert_eq!(after.status_of(0), Some(UnitStatusKind::Timeout));
    assert_eq!(text_at(&after, 0), None);
    assert!(h
        .orchestrator
        .cache()
        .lookup("hello", &lang("en"), &lang("ko"))
        .is_none());
    assert!(h.history.is_empty());
    assert_eq!(h.gate.total(), 0);
}

#[tokio::test(start_paused = true)]
async fn retries_stop_after_two() {
    let translator = ScriptedTranslator::new().fail("ko", "boom");
    let h = harness(translator);

    let mut handle = h
        .orchestrator
        .start_batch("hello", &lang("en"), &langs(&["ko"]))
        .expect("batch starts");
    let first = handle.wait_complete().await;
    assert_eq!(first.status_of(0), Some(UnitStatusKind::Error));

    for expected in 1..=2 {
        handle.retry(0).await.expect("retry allowed");
        let settled = handle
            .wait_for(|s| s.all_settled() && s.units[0].retry_count == expected)
            .await;
        assert_eq!(settled.status_of(0), Some(UnitStatusKind::Error));
    }

    let last = handle.snapshot();
    assert_eq!(last.units[0].retry_count, 2);
    assert!(!last.units[0].can_retry);
    assert!(last.units[0].retries_exhausted);
    assert_eq!(
        handle.retry(0).await,
        Err(BatchError::RetryNotAllowed {
            index: 0,
            reason: RetryRefusal::Exhausted
        })
    );
    assert_eq!(h.translator.calls("ko"), 3);
}

#[tokio::test(start_paused = true)]
async fn retry_success_after_completion_is_billed_alone() {
    let translator = ScriptedTranslator::new()
        .fail("ko", "boom")
        .ok("ko", "안녕하세요")
        .ok("ja", "こんにちは");
    let h = harness(translator);

    let mut handle = h
        .orchestrator
        .start_batch("hello", &lang("en"), &langs(&["ko", "ja"]))
        .expect("batch starts");
    handle.wait_complete().await;
    assert_eq!(h.gate.total(), 1);

    handle.retry(0).await.expect("retry allowed");
    let done = handle
        .wait_for(|s| s.status_of(0) == Some(UnitStatusKind::Success))
        .await;
    assert_eq!(text_at(&done, 0), Some("안녕하세요"));
    assert_eq!(done.units[0].retry_count, 1);
    assert_eq!(h.gate.total(), 2);
    assert_eq!(h.history.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn retry_waits_for_backoff() {
    let translator = ScriptedTranslator::new()
        .fail("ko", "boom")
        .ok("ko", "안녕하세요");
    let config = test_config().with_retry(RetryPolicy::new(2, Duration::from_millis(500)));
    let h = harness_with(translator, UnlimitedGate::new(), config);

    let mut handle = h
        .orchestrator
        .start_batch("hello", &lang("en"), &langs(&["ko"]))
        .expect("batch starts");
    handle.wait_complete().await;

    handle.retry(0).await.expect("retry allowed");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.snapshot().status_of(0), Some(UnitStatusKind::Retrying));
    assert_eq!(h.translator.calls("ko"), 1);

    let done = handle
        .wait_for(|s| s.status_of(0) == Some(UnitStatusKind::Success))
        .await;
    assert_eq!(text_at(&done, 0), Some("안녕하세요"));
    assert_eq!(h.translator.calls("ko"), 2);
}

#[tokio::test(start_paused = true)]
async fn cancelled_unit_stays_cancelled() {
    let translator = ScriptedTranslator::new()
        .ok("ko", "late")
        .delay("ko", Duration::from_secs(5))
        .ok("ja", "こんにちは");
    let h = harness(translator);

    let mut handle = h
        .orchestrator
        .start_batch("hello", &lang("en"), &langs(&["ko", "ja"]))
        .expect("batch starts");
    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.cancel_unit(0).await.expect("batch alive");

    tokio::time::sleep(Duration::from_secs(6)).await;
    let done = handle.wait_complete().await;
    assert_eq!(done.status_of(0), Some(UnitStatusKind::Cancelled));
    assert_eq!(text_at(&done, 0), None);
    assert_eq!(text_at(&done, 1), Some("こんにちは"));
    assert!(!done.units[0].can_retry);
    assert!(h
        .orchestrator
        .cache()
        .lookup("hello", &lang("en"), &lang("ko"))
        .is_none());
    assert_eq!(h.gate.total(), 1);
    assert_eq!(
        handle.retry(0).await,
        Err(BatchError::RetryNotAllowed {
            index: 0,
            reason: RetryRefusal::Cancelled
        })
    );
}

#[tokio::test(start_paused = true)]
async fn cancelling_the_batch_clears_everything() {
    let translator = ScriptedTranslator::new()
        .delay("ko", Duration::from_secs(5))
        .delay("ja", Duration::from_secs(5));
    let h = harness(translator);

    let handle = h
        .orchestrator
        .start_batch("hello", &lang("en"), &langs(&["ko", "ja"]))
        .expect("batch starts");
    handle.cancel().await.expect("batch alive");

    let snapshot = handle.snapshot();
    assert!(snapshot.cancelled);
    assert!(!snapshot.complete);
    assert!(snapshot.results.iter().all(Option::is_none));
    assert!(snapshot
        .units
        .iter()
        .all(|u| u.status == UnitStatusKind::Cancelled));

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(h.history.is_empty());
    assert_eq!(h.gate.total(), 0);
    assert!(h.orchestrator.cache().is_empty());
    assert_eq!(handle.retry(0).await, Err(BatchError::Closed));
}

#[tokio::test(start_paused = true)]
async fn new_batch_supersedes_the_previous_one() {
    let translator = ScriptedTranslator::new()
        .ok("ko", "안녕하세요")
        .delay("ko", Duration::from_secs(5))
        .ok("ja", "こんにちは");
    let h = harness(translator);

    let mut first = h
        .orchestrator
        .start_batch("hello", &lang("en"), &langs(&["ko"]))
        .expect("batch starts");
    let mut second = h
        .orchestrator
        .start_batch("hello", &lang("en"), &langs(&["ja"]))
        .expect("batch starts");
    assert_ne!(first.id(), second.id());

    let superseded = first.wait_complete().await;
    assert!(superseded.cancelled);
    let done = second.wait_complete().await;
    assert!(done.complete);

    tokio::time::sleep(Duration::from_secs(6)).await;
    let records = h.history.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].searched_data[0].lng, "ja");
    assert_eq!(h.gate.total(), 1);
}

#[tokio::test(start_paused = true)]
async fn cache_hit_skips_the_provider() {
    let h = harness(ScriptedTranslator::new());
    h.orchestrator.cache().store(
        "hello",
        &lang("en"),
        &lang("ko"),
        "안녕하세요".into(),
        Vec::new(),
    );

    let handle = h
        .orchestrator
        .start_batch("Hello", &lang("en"), &langs(&["ko"]))
        .expect("batch starts");
    let snapshot = handle.snapshot();

    assert!(snapshot.complete);
    assert_eq!(snapshot.status_of(0), Some(UnitStatusKind::Success));
    assert_eq!(text_at(&snapshot, 0), Some("안녕하세요"));
    assert_eq!(h.translator.total_calls(), 0);
    assert_eq!(h.gate.total(), 1);
}

#[tokio::test(start_paused = true)]
async fn success_is_written_through_to_the_cache() {
    let translator = ScriptedTranslator::new().ok("ko", "좋은 아침");
    let h = harness(translator);

    let mut handle = h
        .orchestrator
        .start_batch("Good morning", &lang("en"), &langs(&["ko"]))
        .expect("batch starts");
    handle.wait_complete().await;

    let entry = h
        .orchestrator
        .cache()
        .lookup("good morning", &lang("en"), &lang("ko"))
        .expect("cached");
    assert_eq!(entry.translation, "좋은 아침");
    assert_eq!(entry.created_at, h.clock.now());
    // multi-word output is never glossed
    assert_eq!(h.translator.gloss_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn single_word_results_are_enriched_with_glosses() {
    let meanings = vec![Meaning {
        translation: "a round fruit".into(),
        part_of_speech: "noun".into(),
        pronunciation: Some("/sa.gwa/".into()),
    }];
    let translator = ScriptedTranslator::new()
        .ok("ko", "사과")
        .gloss("ko", meanings.clone());
    let h = harness(translator);

    let mut handle = h
        .orchestrator
        .start_batch("apple", &lang("en"), &langs(&["ko"]))
        .expect("batch starts");
    let enriched = handle
        .wait_for(|s| {
            s.results[0]
                .as_ref()
                .is_some_and(|r| !r.meanings.is_empty())
        })
        .await;

    let result = enriched.results[0].as_ref().expect("success");
    assert_eq!(result.meanings, meanings);
    assert_eq!(result.pronunciation.as_deref(), Some("/sa.gwa/"));

    let entry = h
        .orchestrator
        .cache()
        .lookup("apple", &lang("en"), &lang("ko"))
        .expect("cached");
    assert_eq!(entry.meanings, meanings);
}

#[tokio::test(start_paused = true)]
async fn batch_start_can_sweep_expired_entries() {
    let config = test_config()
        .with_sweep_probability(1.0)
        .expect("valid probability");
    let translator = ScriptedTranslator::new().delay("ko", Duration::from_secs(1));
    let h = harness_with(translator, UnlimitedGate::new(), config);
    h.orchestrator
        .cache()
        .store("old", &lang("en"), &lang("fr"), "vieux".into(), Vec::new());
    h.clock.advance(Duration::from_secs(31 * 60));

    let _handle = h
        .orchestrator
        .start_batch("new", &lang("en"), &langs(&["ko"]))
        .expect("batch starts");
    assert!(h.orchestrator.cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_cancels_in_flight_units() {
    let translator = ScriptedTranslator::new()
        .ok("ko", "안녕하세요")
        .delay("ko", Duration::from_secs(2));
    let h = harness(translator);

    let handle = h
        .orchestrator
        .start_batch("hello", &lang("en"), &langs(&["ko"]))
        .expect("batch starts");
    drop(handle);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(h.history.is_empty());
    assert!(h.orchestrator.cache().is_empty());
}
