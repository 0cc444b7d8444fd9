//! End-to-end tests for headless sessions.
//!
//! Drives the runner over in-memory streams, records transcripts to temp
//! files and replays them.

use std::io::Cursor;
use std::path::PathBuf;

use gateway_core::prelude::*;
use gateway_headless::{
    HeadlessRunner, Response, Scenario, ScenarioError, Session, Transcript, TranscriptError,
};
use tempfile::tempdir;

fn duel_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../scenarios/duel.ron")
}

fn duel() -> Scenario {
    Scenario::load(duel_path()).expect("bundled scenario loads")
}

fn run_lines(session: Session, lines: &[&str]) -> (HeadlessRunner, Vec<Response>) {
    let mut runner = HeadlessRunner::new(session);
    let input = Cursor::new(lines.join("\n"));
    let mut output = Vec::new();
    runner.run(input, &mut output).expect("in-memory io");
    let responses = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).expect("runner writes valid json"))
        .collect();
    (runner, responses)
}

const SESSION: &[&str] = &[
    r#"{"op":"call","ctx":{"scope":{"team":0}},"verb":"UseTeamResource","args":[0,"metal",50]}"#,
    "not json",
    r#"{"op":"tick","count":30}"#,
    r#"{"op":"call","verb":"Explode"}"#,
    r#"{"op":"hash"}"#,
    r#"{"op":"quit"}"#,
    r#"{"op":"tick"}"#,
];

#[test]
fn bundled_scenario_builds() {
    let gateway = duel().build_gateway(GatewayConfig::default()).unwrap();
    assert_eq!(gateway.registry().units.len(), 4);
    assert_eq!(gateway.registry().features.len(), 3);
    assert_eq!(gateway.registry().teams.len(), 3);
}

#[test]
fn scenario_loads_from_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tiny.ron");
    std::fs::write(&path, r#"(name: "tiny", ally_teams: 1, teams: [(ally_team: 0)])"#).unwrap();
    let scenario = Scenario::load(&path).unwrap();
    assert_eq!(scenario.name, "tiny");
    assert!(scenario.units.is_empty());
}

#[test]
fn malformed_scenario_reports_parse_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.ron");
    std::fs::write(&path, "(name: ").unwrap();
    assert!(matches!(Scenario::load(&path), Err(ScenarioError::ParseError(_))));
}

#[test]
fn session_answers_every_line_between_ready_and_bye() {
    let session = Session::recording(duel(), GatewayConfig::default()).unwrap();
    let (_, responses) = run_lines(session, SESSION);

    assert_eq!(responses.len(), 7);
    assert!(matches!(responses[0], Response::Ready { frame: 0, .. }));
    assert_eq!(
        responses[1],
        Response::Result {
            verb: "UseTeamResource".to_string(),
            values: vec![ScriptValue::Bool(true)],
        }
    );
    assert!(matches!(&responses[2], Response::Error { op: None, .. }));
    assert!(matches!(responses[3], Response::Ticked { frame: 30, .. }));
    assert!(matches!(&responses[4], Response::Error { op: Some(op), .. } if op == "call"));
    let &Response::Hash { frame, hash } = &responses[5] else {
        panic!("expected a hash, got {:?}", responses[5]);
    };
    assert_eq!(frame, 30);
    assert_eq!(responses[6], Response::Bye { frame, hash });
}

#[test]
fn end_of_input_still_says_bye() {
    let session = Session::new(duel().build_gateway(GatewayConfig::default()).unwrap());
    let (_, responses) = run_lines(session, &[r#"{"op":"tick","count":2}"#]);
    assert_eq!(responses.len(), 3);
    assert!(matches!(responses[2], Response::Bye { frame: 2, .. }));
}

#[test]
fn recorded_transcript_replays_to_the_same_hash() {
    let session = Session::recording(duel(), GatewayConfig::default()).unwrap();
    let (mut runner, responses) = run_lines(session, SESSION);
    let Some(Response::Bye { hash, .. }) = responses.last() else {
        panic!("session must end with bye");
    };
    let transcript = runner.session_mut().finish().unwrap();
    assert_eq!(transcript.final_hash, *hash);
    // two calls and one tick; hash, quit and unreadable lines are not recorded
    assert_eq!(transcript.len(), 3);

    let dir = tempdir().unwrap();
    let path = dir.path().join("duel.json");
    transcript.save(&path).unwrap();
    let loaded = Transcript::load(&path).unwrap();
    assert_eq!(loaded, transcript);

    let outcome = loaded.verify().unwrap();
    assert!(outcome.matches);
    assert_eq!(outcome.frame, 30);
}

#[test]
fn transcript_from_another_version_is_rejected() {
    let mut transcript = Transcript::new(duel(), GatewayConfig::default());
    transcript.version = 99;
    let dir = tempdir().unwrap();
    let path = dir.path().join("old.json");
    transcript.save(&path).unwrap();

    let err = Transcript::load(&path).unwrap_err();
    assert!(matches!(err, TranscriptError::VersionMismatch { found: 99, .. }));
}
