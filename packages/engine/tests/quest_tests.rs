//! Execution-level tests for the three pipeline stages, driven directly
//! against the in-memory fakes.

mod common;

use bisect_engine::attempt::Attempt;
use bisect_engine::kernel::test_dependencies::TestDeps;
use bisect_engine::kernel::{IsolateCache, IsolateRef};
use bisect_engine::quest::run_test::SWARMING_POOL;
use bisect_engine::quest::{
    FindIsolate, Quest, ReadChartJson, ReadGraphJson, ResultArguments, RunTest,
};
use bisect_engine::services::swarming::{Dimension, OutputsRef, TaskResult};
use serde_json::json;

use common::{change, isolate_arguments, patched_change, BUILDER, ISOLATE_SERVER, TARGET};

fn isolate(hash: &str) -> IsolateRef {
    IsolateRef {
        isolate_server: ISOLATE_SERVER.to_string(),
        isolate_hash: hash.to_string(),
    }
}

fn completed_result(bot_id: &str, output: &str) -> TaskResult {
    TaskResult {
        state: "COMPLETED".to_string(),
        bot_id: Some(bot_id.to_string()),
        exit_code: Some(0),
        failure: false,
        outputs_ref: Some(OutputsRef {
            isolated: output.to_string(),
        }),
    }
}

fn test_dimensions() -> Vec<Dimension> {
    vec![
        Dimension::new("cores", "8"),
        Dimension::new("os", "Mac-10.11"),
    ]
}

fn run_test_quest() -> Quest {
    Quest::RunTest(RunTest::new(
        test_dimensions(),
        vec![
            "benchmark".to_string(),
            "--results-label".to_string(),
            String::new(),
        ],
    ))
}

// ============================================================================
// FindIsolate
// ============================================================================

#[tokio::test]
async fn isolate_cache_hit_completes_on_first_poll() {
    let test_deps = TestDeps::new();
    let deps = test_deps.deps();
    let change = change("f9f2b720");

    test_deps
        .isolate_cache
        .put(BUILDER, &change.id_string(), TARGET, &isolate("7c7e90be"))
        .await
        .unwrap();

    let mut quest = Quest::FindIsolate(FindIsolate::new(BUILDER, TARGET));
    let mut execution = quest.start(&change, &ResultArguments::new());
    execution.poll(&mut quest, &deps).await;

    assert!(execution.completed());
    assert!(!execution.failed());
    assert_eq!(execution.result_arguments(), &isolate_arguments("7c7e90be"));
    assert_eq!(test_deps.builds.put_count(), 0);
}

#[tokio::test]
async fn build_lifecycle_dispatches_waits_and_completes() {
    let test_deps = TestDeps::new();
    let deps = test_deps.deps();
    let change = bisect_engine::model::Change::new(
        vec![
            bisect_engine::model::Commit::new("chromium", "base git hash"),
            bisect_engine::model::Commit::new("catapult", "dep git hash"),
        ],
        Some(bisect_engine::model::Patch::new(
            "https://example.org",
            672011,
            "2f0d",
        )),
    )
    .unwrap();

    let mut quest = Quest::FindIsolate(FindIsolate::new(BUILDER, TARGET));
    let mut execution = quest.start(&change, &ResultArguments::new());

    // First poll requests a build.
    execution.poll(&mut quest, &deps).await;
    assert!(!execution.completed());

    let requests = test_deps.builds.requests();
    assert_eq!(requests.len(), 1);
    let (bucket, request) = &requests[0];
    assert_eq!(bucket, "perf.try");
    assert_eq!(request.builder_name, BUILDER);
    assert_eq!(request.properties["clobber"], json!(true));
    assert_eq!(request.properties["parent_got_revision"], "base git hash");
    assert_eq!(
        request.properties["deps_revision_overrides"],
        json!({"https://example.googlesource.com/catapult": "dep git hash"})
    );
    assert_eq!(request.properties["patch_storage"], "gerrit");
    assert_eq!(request.properties["patch_gerrit_url"], "https://example.org");

    // Build in progress: no completion, status polled.
    test_deps.builds.set_status("STARTED", None, Some("build_url"));
    execution.poll(&mut quest, &deps).await;
    assert!(!execution.completed());
    assert_eq!(test_deps.builds.status_call_count(), 1);

    // Build succeeds and the isolate shows up in the cache.
    test_deps.builds.set_status("COMPLETED", Some("SUCCESS"), None);
    test_deps
        .isolate_cache
        .put(BUILDER, &change.id_string(), TARGET, &isolate("isolate git hash"))
        .await
        .unwrap();
    execution.poll(&mut quest, &deps).await;

    assert!(execution.completed());
    assert!(!execution.failed());
    assert_eq!(
        execution.result_arguments().get("isolate_hash").unwrap(),
        "isolate git hash"
    );
    assert_eq!(test_deps.builds.put_count(), 1);
}

#[tokio::test]
async fn simultaneous_builds_for_one_change_coalesce() {
    let test_deps = TestDeps::new();
    let deps = test_deps.deps();
    let change = change("base git hash");

    let mut quest = Quest::FindIsolate(FindIsolate::new(BUILDER, TARGET));
    let mut execution_1 = quest.start(&change, &ResultArguments::new());
    let mut execution_2 = quest.start(&change, &ResultArguments::new());

    execution_1.poll(&mut quest, &deps).await;
    execution_2.poll(&mut quest, &deps).await;
    assert_eq!(test_deps.builds.put_count(), 1);

    test_deps.builds.set_status("STARTED", None, None);
    execution_1.poll(&mut quest, &deps).await;
    execution_2.poll(&mut quest, &deps).await;
    assert_eq!(test_deps.builds.put_count(), 1);
    assert_eq!(test_deps.builds.status_call_count(), 2);

    test_deps.builds.set_status("COMPLETED", Some("SUCCESS"), None);
    test_deps
        .isolate_cache
        .put(BUILDER, &change.id_string(), TARGET, &isolate("isolate git hash"))
        .await
        .unwrap();
    execution_1.poll(&mut quest, &deps).await;
    execution_2.poll(&mut quest, &deps).await;

    assert!(execution_1.completed() && !execution_1.failed());
    assert!(execution_2.completed() && !execution_2.failed());
}

#[tokio::test]
async fn build_failure_fails_the_execution() {
    let test_deps = TestDeps::new();
    let deps = test_deps.deps();
    let change = change("base git hash");

    let mut quest = Quest::FindIsolate(FindIsolate::new(BUILDER, TARGET));
    let mut execution = quest.start(&change, &ResultArguments::new());
    execution.poll(&mut quest, &deps).await;

    test_deps.builds.set_status("COMPLETED", Some("FAILURE"), None);
    execution.poll(&mut quest, &deps).await;

    assert!(execution.completed());
    assert!(execution.failed());
    assert!(execution
        .exception()
        .unwrap()
        .contains("completed with result \"FAILURE\""));
}

#[tokio::test]
async fn missing_isolate_after_successful_build_fails() {
    let test_deps = TestDeps::new();
    let deps = test_deps.deps();
    let change = change("base git hash");

    let mut quest = Quest::FindIsolate(FindIsolate::new(BUILDER, TARGET));
    let mut execution = quest.start(&change, &ResultArguments::new());
    execution.poll(&mut quest, &deps).await;

    test_deps.builds.set_status("COMPLETED", Some("SUCCESS"), None);
    execution.poll(&mut quest, &deps).await;

    assert!(execution.failed());
    assert!(execution
        .exception()
        .unwrap()
        .contains("did not upload an isolate"));
}

// ============================================================================
// RunTest and device affinity
// ============================================================================

#[tokio::test]
async fn device_affinity_pins_by_execution_ordinal() {
    let test_deps = TestDeps::new();
    let deps = test_deps.deps();
    let change_1 = change("c1");
    let change_2 = change("c2");
    let arguments = isolate_arguments("input isolate hash");

    let mut quest = run_test_quest();

    // The first execution on change_1 is canonical at ordinal 0 and uses
    // the generic dimensions.
    let mut execution_1 = quest.start(&change_1, &arguments);
    execution_1.poll(&mut quest, &deps).await;

    let requests = test_deps.swarming.requests();
    assert_eq!(requests.len(), 1);
    let properties = &requests[0].1.properties;
    assert_eq!(properties.dimensions[0], Dimension::new("pool", SWARMING_POOL));
    assert_eq!(&properties.dimensions[1..], test_dimensions().as_slice());
    assert_eq!(
        properties.extra_args,
        vec!["benchmark".to_string(), "--results-label".to_string(), change_1.to_string()]
    );
    assert_eq!(properties.inputs_ref.isolated, "input isolate hash");

    test_deps
        .swarming
        .set_result("task-0", completed_result("bot id", "output isolate hash"));
    execution_1.poll(&mut quest, &deps).await;
    assert!(execution_1.completed() && !execution_1.failed());
    assert_eq!(
        execution_1.result_arguments().get("isolate_hash").unwrap(),
        "output isolate hash"
    );

    // Ordinal 0 on change_2 pins to the canonical bot.
    let mut execution_2 = quest.start(&change_2, &arguments);
    execution_2.poll(&mut quest, &deps).await;
    let requests = test_deps.swarming.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[1].1.properties.dimensions,
        vec![
            Dimension::new("pool", SWARMING_POOL),
            Dimension::new("id", "bot id"),
        ]
    );
    assert_eq!(
        requests[1].1.properties.extra_args[2],
        change_2.to_string()
    );

    // A second execution on change_2 is ordinal 1: a new canonical with
    // generic dimensions again.
    let mut execution_3 = quest.start(&change_2, &arguments);
    execution_3.poll(&mut quest, &deps).await;
    let requests = test_deps.swarming.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(&requests[2].1.properties.dimensions[1..], test_dimensions().as_slice());
}

#[tokio::test]
async fn dependent_execution_waits_for_canonical_bot() {
    let test_deps = TestDeps::new();
    let deps = test_deps.deps();
    let arguments = isolate_arguments("input isolate hash");

    let mut quest = run_test_quest();
    let mut execution_1 = quest.start(&change("c1"), &arguments);
    let mut execution_2 = quest.start(&change("c2"), &arguments);

    // Canonical dispatched; dependent must hold back until a bot is known.
    execution_1.poll(&mut quest, &deps).await;
    execution_2.poll(&mut quest, &deps).await;
    assert_eq!(test_deps.swarming.new_task_count(), 1);

    test_deps.swarming.set_result(
        "task-0",
        TaskResult {
            state: "RUNNING".to_string(),
            bot_id: Some("bot id".to_string()),
            exit_code: None,
            failure: false,
            outputs_ref: None,
        },
    );
    execution_1.poll(&mut quest, &deps).await;
    execution_2.poll(&mut quest, &deps).await;

    assert_eq!(test_deps.swarming.new_task_count(), 2);
    let requests = test_deps.swarming.requests();
    assert_eq!(
        requests[1].1.properties.dimensions,
        vec![
            Dimension::new("pool", SWARMING_POOL),
            Dimension::new("id", "bot id"),
        ]
    );
}

#[tokio::test]
async fn canonical_failure_without_bot_fails_dependents_fast() {
    let test_deps = TestDeps::new();
    let deps = test_deps.deps();
    let arguments = isolate_arguments("input isolate hash");

    let mut quest = run_test_quest();
    let mut execution_1 = quest.start(&change("c1"), &arguments);
    execution_1.poll(&mut quest, &deps).await;

    test_deps.swarming.set_result(
        "task-0",
        TaskResult {
            state: "EXPIRED".to_string(),
            bot_id: None,
            exit_code: None,
            failure: false,
            outputs_ref: None,
        },
    );
    execution_1.poll(&mut quest, &deps).await;
    assert!(execution_1.failed());
    assert!(execution_1.exception().unwrap().contains("EXPIRED"));

    // The dependent at the same ordinal fails on its first poll without
    // dispatching anything.
    let mut execution_2 = quest.start(&change("c2"), &arguments);
    execution_2.poll(&mut quest, &deps).await;

    assert!(execution_2.completed());
    assert!(execution_2.failed());
    assert!(execution_2
        .exception()
        .unwrap()
        .contains("no bots available"));
    assert_eq!(test_deps.swarming.new_task_count(), 1);
}

#[tokio::test]
async fn test_program_failure_is_distinguished_from_task_failure() {
    let test_deps = TestDeps::new();
    let deps = test_deps.deps();
    let arguments = isolate_arguments("input isolate hash");

    let mut quest = run_test_quest();
    let mut execution = quest.start(&change("c1"), &arguments);
    execution.poll(&mut quest, &deps).await;

    test_deps.swarming.set_result(
        "task-0",
        TaskResult {
            state: "COMPLETED".to_string(),
            bot_id: Some("bot id".to_string()),
            exit_code: Some(1),
            failure: true,
            outputs_ref: None,
        },
    );
    execution.poll(&mut quest, &deps).await;

    assert!(execution.failed());
    assert!(execution.exception().unwrap().contains("exited with code 1"));
}

#[tokio::test]
async fn completed_execution_never_polls_again() {
    let test_deps = TestDeps::new();
    let deps = test_deps.deps();
    let arguments = isolate_arguments("input isolate hash");

    let mut quest = run_test_quest();
    let mut execution = quest.start(&change("c1"), &arguments);
    execution.poll(&mut quest, &deps).await;
    test_deps
        .swarming
        .set_result("task-0", completed_result("bot id", "output isolate hash"));
    execution.poll(&mut quest, &deps).await;
    assert!(execution.completed());

    let values_before = execution.result_values().to_vec();
    let arguments_before = execution.result_arguments().clone();
    let requests_before = test_deps.swarming.new_task_count();

    execution.poll(&mut quest, &deps).await;

    assert_eq!(execution.result_values(), values_before.as_slice());
    assert_eq!(execution.result_arguments(), &arguments_before);
    assert_eq!(test_deps.swarming.new_task_count(), requests_before);
}

// ============================================================================
// ReadValue
// ============================================================================

#[tokio::test]
async fn chart_json_list_of_scalars_is_read() {
    let test_deps = TestDeps::new();
    let deps = test_deps.deps();

    test_deps.isolates.put_json(
        "output hash",
        json!({"files": {"chartjson-output.json": {"h": "data hash"}}}),
    );
    test_deps.isolates.put_json(
        "data hash",
        json!({"charts": {
            "timeToFirst": {
                "summary": {"type": "list_of_scalar_values", "values": [1.0, 2.0]},
            },
        }}),
    );

    let mut quest = Quest::ReadChartJson(ReadChartJson::new("timeToFirst", None, None));
    let mut execution = quest.start(&change("c1"), &isolate_arguments("output hash"));
    execution.poll(&mut quest, &deps).await;

    assert!(execution.completed() && !execution.failed());
    assert_eq!(execution.result_values(), &[1.0, 2.0]);
}

#[tokio::test]
async fn chart_json_tir_label_prefixes_the_chart_key() {
    let test_deps = TestDeps::new();
    let deps = test_deps.deps();

    test_deps.isolates.put_json(
        "output hash",
        json!({"files": {"chartjson-output.json": {"h": "data hash"}}}),
    );
    test_deps.isolates.put_json(
        "data hash",
        json!({"charts": {
            "cold@@timeToFirst": {
                "trace one": {"type": "scalar", "value": 7.5},
            },
        }}),
    );

    let mut quest = Quest::ReadChartJson(ReadChartJson::new(
        "timeToFirst",
        Some("cold".to_string()),
        Some("trace one".to_string()),
    ));
    let mut execution = quest.start(&change("c1"), &isolate_arguments("output hash"));
    execution.poll(&mut quest, &deps).await;

    assert!(execution.completed() && !execution.failed());
    assert_eq!(execution.result_values(), &[7.5]);
}

#[tokio::test]
async fn chart_json_missing_chart_fails() {
    let test_deps = TestDeps::new();
    let deps = test_deps.deps();

    test_deps.isolates.put_json(
        "output hash",
        json!({"files": {"chartjson-output.json": {"h": "data hash"}}}),
    );
    test_deps
        .isolates
        .put_json("data hash", json!({"charts": {}}));

    let mut quest = Quest::ReadChartJson(ReadChartJson::new("timeToFirst", None, None));
    let mut execution = quest.start(&change("c1"), &isolate_arguments("output hash"));
    execution.poll(&mut quest, &deps).await;

    assert!(execution.failed());
    assert!(execution
        .exception()
        .unwrap()
        .contains("\"timeToFirst\" is not in the results"));
}

#[tokio::test]
async fn chart_json_captures_trace_urls_in_page_order() {
    let test_deps = TestDeps::new();
    let deps = test_deps.deps();

    test_deps.isolates.put_json(
        "output hash",
        json!({"files": {"chartjson-output.json": {"h": "data hash"}}}),
    );
    test_deps.isolates.put_json(
        "data hash",
        json!({"charts": {
            "trace": {
                "page_b": {"page_id": 2, "cloud_url": "https://trace/b"},
                "page_a": {"page_id": 1, "cloud_url": "https://trace/a"},
            },
            "timeToFirst": {
                "summary": {"type": "scalar", "value": 3.0},
            },
        }}),
    );

    let mut quest = Quest::ReadChartJson(ReadChartJson::new("timeToFirst", None, None));
    let mut execution = quest.start(&change("c1"), &isolate_arguments("output hash"));
    execution.poll(&mut quest, &deps).await;

    assert!(execution.completed() && !execution.failed());
    let details = execution.as_dict()["details"].clone();
    assert_eq!(details["traces"][0]["name"], "page_a");
    assert_eq!(details["traces"][1]["name"], "page_b");
}

#[tokio::test]
async fn graph_json_reads_a_single_value() {
    let test_deps = TestDeps::new();
    let deps = test_deps.deps();

    common::seed_graph_json(&test_deps, "output hash", "chart_name", "trace_name", 42.0);

    let mut quest = Quest::ReadGraphJson(ReadGraphJson::new("chart_name", "trace_name"));
    let mut execution = quest.start(&change("c1"), &isolate_arguments("output hash"));
    execution.poll(&mut quest, &deps).await;

    assert!(execution.completed() && !execution.failed());
    assert_eq!(execution.result_values(), &[42.0]);
}

// ============================================================================
// Attempt short-circuiting
// ============================================================================

#[tokio::test]
async fn failed_stage_short_circuits_the_attempt() {
    let test_deps = TestDeps::new();
    let deps = test_deps.deps();
    let change = change("base git hash");

    let mut quests = vec![
        Quest::FindIsolate(FindIsolate::new(BUILDER, TARGET)),
        run_test_quest(),
    ];
    let mut attempt = Attempt::new(change);

    // Create the build execution, dispatch, then let the build fail.
    attempt.schedule_work(&mut quests, &deps).await;
    attempt.schedule_work(&mut quests, &deps).await;
    test_deps.builds.set_status("COMPLETED", Some("FAILURE"), None);
    attempt.schedule_work(&mut quests, &deps).await;

    assert!(attempt.completed(quests.len()));
    assert!(attempt.exception().unwrap().contains("FAILURE"));
    assert_eq!(attempt.executions().len(), 1);
    assert_eq!(test_deps.swarming.new_task_count(), 0);
}

#[tokio::test]
async fn patched_change_builds_with_patch_parameters() {
    let test_deps = TestDeps::new();
    let deps = test_deps.deps();
    let change = patched_change("base git hash");

    let mut quest = Quest::FindIsolate(FindIsolate::new(BUILDER, TARGET));
    let mut execution = quest.start(&change, &ResultArguments::new());
    execution.poll(&mut quest, &deps).await;

    let requests = test_deps.builds.requests();
    assert_eq!(requests[0].1.properties["patch_change"], json!(672011));
    assert_eq!(requests[0].1.properties["patch_set"], "2f0d");
}
