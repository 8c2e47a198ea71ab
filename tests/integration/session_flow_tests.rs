//! End-to-end session tests over the in-memory transport.
//!
//! # Scenarios covered
//!
//! | Scenario | Expectation |
//! |----------|-------------|
//! | Stage without clarifications | Never enters `AwaitingUserInput`; only the stage's own events, in order |
//! | K clarifications | K requests and K replies strictly alternate; the K-th reply answers the K-th request |
//! | Churn feasibility | `is_feasible` and `task_type` merged, features unchanged |
//! | "What time horizon?" / "30 days" | The consumed reply reaches the merged rationale |
//! | Reply before any request | Discarded; later pairing unaffected |
//! | Reply tagged with another request id | Discarded; the matching reply is used |
//! | Many progress events | All delivered before the sentinel, in order |
//! | `all_agents` | Stages chain; KPI agent picked from the task type; duplicates marked |

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use specwright::models::event::OutboundEvent;
use specwright::models::session::SessionState;
use specwright::models::stage::{AgentKind, StageSelector};
use specwright::transport::memory::ClientFrame;

use super::test_helpers::{
    churn_feasibility, churn_input, converse, finish, kinds, read_processed, start_session,
    test_config, test_state, write_input, Script, ScriptedAgent, Step, TASK,
};

#[tokio::test]
async fn stage_without_clarification_never_awaits_input() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_input(temp.path(), TASK, &churn_input());
    let agent = ScriptedAgent::new().with(
        AgentKind::FeasibilityCheck,
        Script::new(
            vec![
                Step::Progress("reading overview".into()),
                Step::Progress("deciding".into()),
            ],
            |_| churn_feasibility("clear enough"),
        ),
    );
    let state = test_state(test_config(temp.path(), ""), Arc::new(agent));

    let (handle, mut client) = start_session(&state, StageSelector::FeasibilityCheck);
    let events = converse(&mut client, &[]).await;
    let report = finish(handle).await;

    assert_eq!(
        kinds(&events),
        vec!["agent-start", "progress", "progress", "end-of-stage", "end"]
    );
    assert_eq!(
        events[1],
        OutboundEvent::Progress {
            content: "reading overview".into()
        }
    );
    assert_eq!(report.final_state, SessionState::Completed);
    assert_eq!(
        report.history,
        vec![
            SessionState::Initializing,
            SessionState::Running { stage: 0 },
            SessionState::Finalizing,
            SessionState::Completed,
        ]
    );
    assert_eq!(report.stages_completed, vec!["feasibility_check"]);
}

#[tokio::test]
async fn churn_feasibility_merges_overview_and_keeps_features() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_input(temp.path(), TASK, &churn_input());
    let agent = ScriptedAgent::new().with(
        AgentKind::FeasibilityCheck,
        Script::answer(churn_feasibility("binary outcome")),
    );
    let state = test_state(test_config(temp.path(), ""), Arc::new(agent));

    let (handle, mut client) = start_session(&state, StageSelector::FeasibilityCheck);
    converse(&mut client, &[]).await;
    finish(handle).await;

    let doc = read_processed(temp.path(), TASK).expect("processed document written");
    assert_eq!(doc["overview"]["is_feasible"], true);
    assert_eq!(doc["overview"]["task_type"], "Classification");
    assert_eq!(doc["overview"]["original"], "predict churn");
    assert_eq!(doc["features"], json!({ "age": "customer age" }));
    assert_eq!(doc["target"]["description"], "1 if the customer churned, else 0");
    assert_eq!(doc["target"]["field_name"], "churned");
    assert_eq!(doc["pipeline"]["version"], 1);
    assert_eq!(doc["pipeline"]["completed_stages"], json!(["feasibility_check"]));
}

#[tokio::test]
async fn clarifications_alternate_request_and_reply() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_input(temp.path(), TASK, &churn_input());
    let agent = ScriptedAgent::new().with(
        AgentKind::FeasibilityCheck,
        Script::new(
            vec![
                Step::Ask("first?".into()),
                Step::Ask("second?".into()),
                Step::Ask("third?".into()),
            ],
            |replies| churn_feasibility(&replies.join("|")),
        ),
    );
    let state = test_state(test_config(temp.path(), ""), Arc::new(agent));

    let (handle, mut client) = start_session(&state, StageSelector::FeasibilityCheck);
    let events = converse(&mut client, &["one", "two", "three"]).await;
    let report = finish(handle).await;

    let questions: Vec<&str> = events
        .iter()
        .filter_map(|event| match event {
            OutboundEvent::UserInputRequest { content, .. } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(questions, vec!["first?", "second?", "third?"]);

    let awaiting = report
        .history
        .iter()
        .filter(|state| matches!(state, SessionState::AwaitingUserInput { .. }))
        .count();
    assert_eq!(awaiting, 3);
    // Each suspension is followed by a resume of the same stage.
    for pair in report.history.windows(2) {
        if let SessionState::AwaitingUserInput { stage } = pair[0] {
            assert_eq!(pair[1], SessionState::Running { stage });
        }
    }

    let doc = read_processed(temp.path(), TASK).expect("processed");
    assert_eq!(doc["overview"]["decision_rationale"], "one|two|three");

    let Some(OutboundEvent::EndOfStage { tools, .. }) = events
        .iter()
        .find(|event| matches!(event, OutboundEvent::EndOfStage { .. }))
    else {
        panic!("end-of-stage event expected");
    };
    assert_eq!(tools.len(), 3);
    assert_eq!(tools[2].args["question_for_user"], "third?");
}

#[tokio::test]
async fn clarification_reply_reaches_merged_rationale() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_input(temp.path(), TASK, &churn_input());
    let agent = ScriptedAgent::new().with(
        AgentKind::FeasibilityCheck,
        Script::new(vec![Step::Ask("What time horizon?".into())], |replies| {
            churn_feasibility(&format!("user said: {}", replies[0]))
        }),
    );
    let state = test_state(test_config(temp.path(), ""), Arc::new(agent));

    let (handle, mut client) = start_session(&state, StageSelector::FeasibilityCheck);
    let events = converse(&mut client, &["30 days"]).await;
    finish(handle).await;

    assert_eq!(
        kinds(&events),
        vec![
            "agent-start",
            "tool-call",
            "user-input-request",
            "end-of-stage",
            "end"
        ]
    );
    let doc = read_processed(temp.path(), TASK).expect("processed");
    assert_eq!(doc["overview"]["decision_rationale"], "user said: 30 days");
}

#[tokio::test]
async fn reply_before_request_is_discarded() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_input(temp.path(), TASK, &churn_input());
    let agent = ScriptedAgent::new().with(
        AgentKind::FeasibilityCheck,
        Script::new(
            vec![
                Step::Progress("warming up".into()),
                Step::Pause(Duration::from_millis(200)),
                Step::Ask("horizon?".into()),
            ],
            |replies| churn_feasibility(&replies.join("|")),
        ),
    );
    let state = test_state(test_config(temp.path(), ""), Arc::new(agent));

    let (handle, mut client) = start_session(&state, StageSelector::FeasibilityCheck);
    loop {
        match client.next_event().await.expect("event") {
            OutboundEvent::Progress { .. } => {
                assert!(client.send_text("unsolicited"));
            }
            OutboundEvent::UserInputRequest { .. } => {
                assert!(client.send_text("30 days"));
            }
            OutboundEvent::End => break,
            _ => {}
        }
    }
    let report = finish(handle).await;

    assert_eq!(report.final_state, SessionState::Completed);
    let doc = read_processed(temp.path(), TASK).expect("processed");
    assert_eq!(doc["overview"]["decision_rationale"], "30 days");
}

#[tokio::test]
async fn reply_for_another_request_is_discarded() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_input(temp.path(), TASK, &churn_input());
    let agent = ScriptedAgent::new().with(
        AgentKind::FeasibilityCheck,
        Script::new(vec![Step::Ask("horizon?".into())], |replies| {
            churn_feasibility(&replies.join("|"))
        }),
    );
    let state = test_state(test_config(temp.path(), ""), Arc::new(agent));

    let (handle, mut client) = start_session(&state, StageSelector::FeasibilityCheck);
    loop {
        match client.next_event().await.expect("event") {
            OutboundEvent::UserInputRequest { request_id, .. } => {
                let wrong = json!({ "type": "user-reply", "request_id": "nope", "content": "wrong" });
                let right =
                    json!({ "type": "user-reply", "request_id": request_id, "content": "right" });
                assert!(client.send_text(wrong.to_string()));
                assert!(client.send_text(right.to_string()));
            }
            OutboundEvent::End => break,
            _ => {}
        }
    }
    finish(handle).await;

    let doc = read_processed(temp.path(), TASK).expect("processed");
    assert_eq!(doc["overview"]["decision_rationale"], "right");
}

#[tokio::test]
async fn every_event_is_delivered_before_the_sentinel() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_input(temp.path(), TASK, &churn_input());
    let steps = (0..250).map(|n| Step::Progress(format!("step {n}"))).collect();
    let agent = ScriptedAgent::new().with(
        AgentKind::FeasibilityCheck,
        Script::new(steps, |_| churn_feasibility("")),
    );
    let state = test_state(test_config(temp.path(), ""), Arc::new(agent));

    let (handle, mut client) = start_session(&state, StageSelector::FeasibilityCheck);
    let frames = client.drain().await;
    finish(handle).await;

    let progress: Vec<String> = frames
        .iter()
        .filter_map(|frame| match frame {
            ClientFrame::Event(OutboundEvent::Progress { content }) => Some(content.clone()),
            _ => None,
        })
        .collect();
    let expected: Vec<String> = (0..250).map(|n| format!("step {n}")).collect();
    assert_eq!(progress, expected);

    let tail: Vec<&ClientFrame> = frames.iter().rev().take(2).collect();
    assert_eq!(tail[0], &ClientFrame::Closed);
    assert_eq!(tail[1], &ClientFrame::Event(OutboundEvent::End));
}

#[tokio::test]
async fn all_agents_chains_every_stage() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_input(
        temp.path(),
        TASK,
        &json!({
            "overview": "predict churn",
            "features": { "age": "customer age", "age_years": "age in years", "row_id": "row number" }
        }),
    );
    let agent = Arc::new(
        ScriptedAgent::new()
            .with(
                AgentKind::FeasibilityCheck,
                Script::answer(churn_feasibility("")),
            )
            .with(
                AgentKind::FindClassificationKpi,
                Script::new(vec![Step::Ask("precision or recall?".into())], |_| {
                    json!({ "chosen_metric": "recall" })
                }),
            )
            .with(
                AgentKind::FeatureEngineering,
                Script::answer(json!({
                    "refined_description": "refined",
                    "feature_type": "Necessary",
                    "feature_engineering_type": "numeric",
                    "decision_rationale": "useful"
                })),
            )
            .with(
                AgentKind::DropFeatureDups,
                Script::answer(json!({ "age_years": "age" })),
            ),
    );
    let state = test_state(test_config(temp.path(), ""), Arc::clone(&agent));

    let (handle, mut client) = start_session(&state, StageSelector::AllAgents);
    converse(&mut client, &["recall"]).await;
    let report = finish(handle).await;

    assert_eq!(report.final_state, SessionState::Completed);
    assert_eq!(
        report.stages_completed,
        vec![
            "feasibility_check",
            "find_kpi",
            "feature_engineering:age",
            "feature_engineering:age_years",
            "feature_engineering:row_id",
            "drop_feature_dups",
        ]
    );
    let kinds_run: Vec<AgentKind> = agent.calls().into_iter().map(|(kind, _)| kind).collect();
    assert_eq!(kinds_run[1], AgentKind::FindClassificationKpi);

    let doc = read_processed(temp.path(), TASK).expect("processed");
    assert_eq!(doc["overview"]["kpi"], "recall");
    assert_eq!(doc["features"]["age_years"]["feature_type"], "Duplicate");
    assert_eq!(doc["features"]["age_years"]["duplicate_of"], "age");
    assert_eq!(doc["features"]["age"]["feature_type"], "Necessary");
    assert_eq!(doc["pipeline"]["version"], 6);
}
