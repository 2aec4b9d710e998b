use sensemake::models::{Backend, Config, ModelConfig, VoteTally};
use sensemake::reconcile::UNSPECIFIED_SUBTOPIC;
use sensemake::{
    CategorizationPipeline, PartialRecord, Record, RetryPolicy, SensemakeError, build_model,
    generate_data, group_by_subtopic, hydrate, retry_call,
};
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(uri: &str) -> Config {
    Config {
        model: ModelConfig {
            backend: Backend::Ollama,
            base_url: uri.to_string(),
            timeout_secs: 5,
            ..Default::default()
        },
        ..Default::default()
    }
}

async fn mount_reply(server: &MockServer, response: &str, times: Option<u64>) {
    let mock = Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": response })));
    match times {
        Some(n) => mock.up_to_n_times(n).mount(server).await,
        None => mock.mount(server).await,
    }
}

fn comments() -> Vec<Record> {
    vec![
        Record::new("1", "Traffic near the school is dangerous")
            .with_votes("group-a", VoteTally::new(10, 2, 1)),
        Record::new("2", "We need more bike lanes"),
    ]
}

#[tokio::test]
async fn test_retry_hydrate_group_end_to_end() {
    let mock_server = MockServer::start().await;
    // First answer drops record "2"; second covers both.
    mount_reply(
        &mock_server,
        r#"[{"id":"1","topics":[{"name":"Safety","subtopics":[{"name":"Traffic"}]}]}]"#,
        Some(1),
    )
    .await;
    mount_reply(
        &mock_server,
        r#"[
            {"id":"1","topics":[{"name":"Safety","subtopics":[{"name":"Traffic"}]}]},
            {"id":"2","topics":[{"name":"Transport","subtopics":[]}]},
            {"id":"99","topics":[{"name":"Invented","subtopics":[]}]}
        ]"#,
        None,
    )
    .await;

    let model = build_model(&config_for(&mock_server.uri())).unwrap();
    let records = comments();
    let expected: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();

    let model_ref = model.as_ref();
    let partials = retry_call(
        move || generate_data::<Vec<PartialRecord>>(model_ref, "Categorize these"),
        |partials: &Vec<PartialRecord>| {
            let seen: HashSet<&str> = partials.iter().map(|p| p.id.as_str()).collect();
            expected.is_subset(&seen)
        },
        &RetryPolicy::new(3, Duration::ZERO),
        "Topic categorization",
    )
    .await
    .unwrap();

    assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);

    let hydrated = hydrate(partials, &records);
    assert_eq!(hydrated.len(), 2);
    assert_eq!(hydrated[0].text, "Traffic near the school is dangerous");
    assert_eq!(hydrated[0].vote_tally, records[0].vote_tally);

    let index = group_by_subtopic(&hydrated);
    assert_eq!(index.len(), 2);
    assert_eq!(index["Safety"]["Traffic"]["1"].id, "1");
    assert_eq!(index["Transport"][UNSPECIFIED_SUBTOPIC]["2"].id, "2");
    assert!(!index.contains_key("Invented"));
}

#[tokio::test]
async fn test_retry_exhausted_after_configured_attempts() {
    let mock_server = MockServer::start().await;
    mount_reply(&mock_server, "not json at all", None).await;

    let model = build_model(&config_for(&mock_server.uri())).unwrap();
    let model_ref = model.as_ref();
    let err = retry_call(
        move || generate_data::<Vec<PartialRecord>>(model_ref, "Categorize"),
        |_: &Vec<PartialRecord>| true,
        &RetryPolicy::new(3, Duration::ZERO),
        "Topic categorization",
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        SensemakeError::RetryExhausted { attempts: 3, .. }
    ));
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_pipeline_run_writes_index() {
    let mock_server = MockServer::start().await;
    mount_reply(
        &mock_server,
        r#"[
            {"id":"1","topics":[{"name":"Safety","subtopics":[{"name":"Traffic"}]}]},
            {"id":"2","topics":[{"name":"Transport","subtopics":[{"name":"Cycling"}]}]}
        ]"#,
        None,
    )
    .await;

    let config = config_for(&mock_server.uri());
    let model = build_model(&config).unwrap();
    let pipeline = CategorizationPipeline::new(&config, model)
        .with_policy(RetryPolicy::new(2, Duration::ZERO));

    let topics = vec!["Safety".to_string(), "Transport".to_string()];
    let run = pipeline.run(&comments(), &topics).await.unwrap();

    assert_eq!(run.stats.categorized, 2);
    assert_eq!(run.stats.failed_batches, 0);
    assert!(run.grouping.unannotated_ids.is_empty());

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("index.json");
    CategorizationPipeline::write_index(&output, &run.grouping.index).unwrap();

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(
        written["Transport"]["Cycling"]["2"]["text"],
        "We need more bike lanes"
    );
}
