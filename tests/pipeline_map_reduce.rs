use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use digest_harness::dataset::{Dataset, PROMPT_RESULT_COLUMN};
use digest_harness::gateway::vertex::PredictionProvider;
use digest_harness::gateway::{
    BackoffPolicy, Clock, InvocationPolicy, ManualClock, NoopUsageSink, PredictRequest,
    PredictResponse, PredictionError, PredictionGateway, ProviderGateway, RateLimiter,
    RawSampling, SamplingConfig,
};
use digest_harness::pipeline::{
    map_invoke, reduce, run_digest, DigestMode, DigestOutcome, DigestRequest, PipelineError,
};
use digest_harness::registry::{InstanceField, ModelType};
use serde_json::{json, Value};

/// Records every request and answers from a script (default: echo a counter).
#[derive(Default)]
struct ScriptedGateway {
    seen: Mutex<Vec<PredictRequest>>,
    fail_on_call: Option<usize>,
}

impl ScriptedGateway {
    fn failing_on(call: usize) -> Self {
        Self {
            fail_on_call: Some(call),
            ..Default::default()
        }
    }

    fn prompts(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.prompt.clone())
            .collect()
    }

    fn callers(&self) -> Vec<&'static str> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.attribution.caller)
            .collect()
    }
}

#[async_trait]
impl PredictionGateway for ScriptedGateway {
    async fn predict(&self, req: PredictRequest) -> Result<PredictResponse, PredictionError> {
        let mut seen = self.seen.lock().unwrap();
        seen.push(req);
        let n = seen.len();
        if self.fail_on_call == Some(n) {
            return Err(PredictionError::invalid_request("scripted failure"));
        }
        Ok(PredictResponse::text(format!("narrative {n}")))
    }
}

fn rows(n: usize) -> Value {
    Value::Array((0..n).map(|i| json!({"id": i, "sales": i * 10})).collect())
}

fn request(data: Value, mode: DigestMode) -> DigestRequest {
    DigestRequest {
        data: data.to_string(),
        question: "What stands out?".into(),
        mode,
        model_type: "text-bison".into(),
        sampling: RawSampling::default(),
    }
}

#[tokio::test]
async fn large_dataset_maps_in_order_then_reduces_once() {
    let gateway = ScriptedGateway::default();
    let outcome = run_digest(&gateway, &request(rows(120), DigestMode::All))
        .await
        .unwrap();

    let prompts = gateway.prompts();
    assert_eq!(prompts.len(), 4);
    assert!(prompts[0].contains(r#"{"id":0,"#) && prompts[0].contains(r#"{"id":49,"#));
    assert!(!prompts[0].contains(r#"{"id":50,"#));
    assert!(prompts[1].contains(r#"{"id":50,"#) && prompts[1].contains(r#"{"id":99,"#));
    assert!(prompts[2].contains(r#"{"id":100,"#) && prompts[2].contains(r#"{"id":119,"#));
    assert!(prompts[3].contains("```narrative 1\nnarrative 2\nnarrative 3```"));
    assert_eq!(
        gateway.callers(),
        vec!["pipeline::map", "pipeline::map", "pipeline::map", "pipeline::reduce"]
    );

    match outcome {
        DigestOutcome::Aggregate {
            narrative,
            partials,
            dataset,
        } => {
            assert_eq!(narrative, "narrative 4");
            assert_eq!(partials, vec!["narrative 1", "narrative 2", "narrative 3"]);
            assert_eq!(dataset.len(), 120);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn single_chunk_skips_reduce() {
    let gateway = ScriptedGateway::default();
    let outcome = run_digest(&gateway, &request(rows(7), DigestMode::All))
        .await
        .unwrap();

    assert_eq!(gateway.prompts().len(), 1);
    match outcome {
        DigestOutcome::Aggregate {
            narrative, partials, ..
        } => {
            assert_eq!(narrative, "narrative 1");
            assert_eq!(partials, vec!["narrative 1"]);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn empty_dataset_makes_no_calls() {
    let gateway = ScriptedGateway::default();
    let outcome = run_digest(&gateway, &request(json!([]), DigestMode::All))
        .await
        .unwrap();

    assert!(gateway.prompts().is_empty());
    match outcome {
        DigestOutcome::Aggregate {
            narrative, partials, ..
        } => {
            assert!(narrative.is_empty());
            assert!(partials.is_empty());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn per_row_mode_merges_narratives_onto_rows() {
    let gateway = ScriptedGateway::default();
    let outcome = run_digest(&gateway, &request(rows(3), DigestMode::Row))
        .await
        .unwrap();

    assert_eq!(gateway.prompts().len(), 3);
    assert!(gateway.callers().iter().all(|c| *c == "pipeline::map"));

    let DigestOutcome::PerRow { dataset } = outcome else {
        panic!("expected per-row outcome");
    };
    for (i, row) in dataset.rows().iter().enumerate() {
        assert_eq!(row["id"], json!(i));
        assert_eq!(row[PROMPT_RESULT_COLUMN], json!(format!("narrative {}", i + 1)));
    }
}

#[tokio::test]
async fn failure_mid_map_discards_partials() {
    let gateway = ScriptedGateway::failing_on(2);
    let err = run_digest(&gateway, &request(rows(120), DigestMode::All))
        .await
        .unwrap_err();

    assert_eq!(gateway.prompts().len(), 2);
    match err {
        PipelineError::Map { start, end, source } => {
            assert_eq!((start, end), (50, 100));
            assert!(matches!(source, PredictionError::InvalidRequest { .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn reduce_failure_is_reported_separately() {
    let gateway = ScriptedGateway::failing_on(3);
    let err = run_digest(&gateway, &request(rows(60), DigestMode::All))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Reduce(_)), "{err:?}");
}

#[tokio::test]
async fn unknown_model_is_rejected_before_any_call() {
    let gateway = ScriptedGateway::default();
    let mut req = request(rows(3), DigestMode::All);
    req.model_type = "gpt-4".into();

    let err = run_digest(&gateway, &req).await.unwrap_err();
    assert!(matches!(err, PipelineError::UnknownModel(ref m) if m == "gpt-4"));
    assert!(gateway.prompts().is_empty());
}

#[tokio::test]
async fn empty_question_is_rejected() {
    let gateway = ScriptedGateway::default();
    let mut req = request(rows(3), DigestMode::All);
    req.question = "   ".into();

    let err = run_digest(&gateway, &req).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidRequest(_)));
    assert!(gateway.prompts().is_empty());
}

#[tokio::test]
async fn stray_quote_in_attachment_is_repaired() {
    let gateway = ScriptedGateway::default();
    let mut req = request(json!([]), DigestMode::All);
    req.data = r#"[{"name": "the "best" store", "sales": 3}]"#.into();

    run_digest(&gateway, &req).await.unwrap();
    let prompts = gateway.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains(r#"the \"best\" store"#), "{}", prompts[0]);
}

#[tokio::test]
async fn unrepairable_attachment_fails_without_calls() {
    let gateway = ScriptedGateway::default();
    let mut req = request(json!([]), DigestMode::All);
    req.data = r#"[{"a": 1}"#.into();

    let err = run_digest(&gateway, &req).await.unwrap_err();
    assert!(matches!(err, PipelineError::Dataset(_)), "{err:?}");
    assert!(gateway.prompts().is_empty());
}

#[tokio::test]
async fn code_model_sampling_is_routed_by_capability() {
    let gateway = ScriptedGateway::default();
    let mut req = request(rows(2), DigestMode::All);
    req.model_type = "code-bison".into();
    req.sampling = RawSampling {
        temperature: Some("0.9".into()),
        max_output_tokens: Some("2048".into()),
        top_k: Some("5".into()),
        top_p: Some("0.1".into()),
    };

    run_digest(&gateway, &req).await.unwrap();
    let seen = gateway.seen.lock().unwrap();
    let call = &seen[0];
    assert_eq!(call.model.version, "code-bison@001");
    assert_eq!(call.model.instance_field, InstanceField::Prefix);
    assert_eq!(call.parameters.temperature, 0.9);
    assert_eq!(call.parameters.max_output_tokens, 2048);
    assert_eq!(call.parameters.top_k, None);
    assert_eq!(call.parameters.top_p, None);
    assert!(call.attribution.run_id.is_some());
}

#[tokio::test]
async fn map_and_reduce_are_usable_directly() {
    let gateway = ScriptedGateway::default();
    let handle = ModelType::TextBison.descriptor().handle();
    let dataset = Dataset::from_value(rows(5)).unwrap();
    let sampling = SamplingConfig::default();

    let partials = map_invoke(&gateway, &handle, &dataset, "q", 2, &sampling, None)
        .await
        .unwrap();
    assert_eq!(partials.len(), 3);

    let summary = reduce(&gateway, &handle, &partials, &sampling, None)
        .await
        .unwrap();
    assert_eq!(summary, "narrative 4");
    assert_eq!(gateway.prompts().len(), 4);

    let err = map_invoke(&gateway, &handle, &dataset, "q", 0, &sampling, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidRequest(_)));
}

/// Provider that is over quota for its first `failures` calls.
struct FlakyProvider {
    calls: Mutex<usize>,
    failures: usize,
}

#[async_trait]
impl PredictionProvider for FlakyProvider {
    async fn predict(&self, _req: &PredictRequest) -> Result<PredictResponse, PredictionError> {
        let mut calls = self.calls.lock().unwrap();
        *calls += 1;
        if *calls <= self.failures {
            Err(PredictionError::resource_exhausted("quota", None))
        } else {
            Ok(PredictResponse::text(format!("ok {calls}")))
        }
    }
}

#[tokio::test]
async fn quota_errors_during_map_are_absorbed_by_backoff() {
    let clock = ManualClock::new();
    let dyn_clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let limiter = Arc::new(RateLimiter::with_clock(
        50,
        Duration::from_secs(60),
        dyn_clock.clone(),
    ));
    let policy = InvocationPolicy::new(BackoffPolicy::default(), limiter, dyn_clock);
    let gateway = ProviderGateway::with_policy(
        Arc::new(FlakyProvider {
            calls: Mutex::new(0),
            failures: 2,
        }),
        Arc::new(NoopUsageSink),
        policy,
    );

    let outcome = run_digest(&gateway, &request(rows(3), DigestMode::All))
        .await
        .unwrap();
    let DigestOutcome::Aggregate { narrative, .. } = outcome else {
        panic!("expected aggregate outcome");
    };
    assert_eq!(narrative, "ok 3");
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
}

#[tokio::test]
async fn many_chunks_are_paced_by_the_rate_limiter() {
    let clock = ManualClock::new();
    let dyn_clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let limiter = Arc::new(RateLimiter::with_clock(
        2,
        Duration::from_secs(60),
        dyn_clock.clone(),
    ));
    let policy = InvocationPolicy::new(BackoffPolicy::default(), limiter, dyn_clock);
    let gateway = ProviderGateway::with_policy(
        Arc::new(FlakyProvider {
            calls: Mutex::new(0),
            failures: 0,
        }),
        Arc::new(NoopUsageSink),
        policy,
    );

    // 150 rows: three map calls and one reduce call, two admitted per minute.
    run_digest(&gateway, &request(rows(150), DigestMode::All))
        .await
        .unwrap();
    assert_eq!(clock.total_slept(), Duration::from_secs(60));
}
