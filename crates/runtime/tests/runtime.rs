use std::sync::Arc;

use engine_core::{
    Amount, GameArtifacts, InstructionSet, Instructions, MutationError, Operation, Phase,
    Precondition, PreconditionStatus, StateTree, Transition,
};
use engine_runtime::{BatchRequest, Runtime, RuntimeConfig, RuntimeError};
use serde_json::{Map, json};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// init -> play (waits for players) -> finished once the game is marked
/// ended.
fn artifacts() -> GameArtifacts {
    let mut instructions = InstructionSet::default();
    instructions.transitions.insert(
        "start".into(),
        Instructions::new(vec![Operation::set("game.round", json!(1))])
            .with_public_message("Game on"),
    );
    instructions.transitions.insert(
        "end".into(),
        Instructions::new(vec![Operation::set("game.winner", json!("{{winner}}"))])
            .with_public_message("Winner: {{winner}}"),
    );
    instructions.phases.insert(
        "play".into(),
        Instructions::new(vec![Operation::increment("game.round", 1)])
            .with_public_message("Round advanced by {{player}}"),
    );

    GameArtifacts::new(
        vec![
            Phase::new("init"),
            Phase::new("play").with_player_input(),
            Phase::new("finished"),
        ],
        vec![
            Transition::new("start", "init", "play"),
            Transition::new("end", "play", "finished")
                .with_checked_field("game.gameEnded")
                .with_precondition(Precondition::deterministic(
                    "game_ended",
                    json!({"==": [{"var": "game.gameEnded"}, true]}),
                )),
        ],
    )
    .with_instructions(instructions)
}

fn runtime_with_game(game_id: &str) -> Runtime {
    init_tracing();
    let runtime = Runtime::builder().build();
    let mut state = StateTree::new_game(["alice", "bob"]).into_value();
    state["game"]["counter"] = json!(0);
    state["players"]["alice"]["chips"] = json!(10);
    runtime
        .register_game(game_id, artifacts(), StateTree::from_value(state).unwrap())
        .unwrap();
    runtime
}

#[tokio::test]
async fn game_runs_from_init_to_finished() {
    let runtime = runtime_with_game("g1");
    assert_eq!(runtime.phase("g1").unwrap(), "init");

    let started = runtime.advance("g1").await.unwrap();
    assert_eq!(started.fired, vec!["start"]);
    assert_eq!(started.phase, "play");
    assert_eq!(started.state.get("game.round"), Some(&json!(1)));
    assert_eq!(started.state.get("game.publicMessage"), Some(&json!("Game on")));
    assert_eq!(started.messages[0].source, "start");

    let scored = runtime
        .submit(
            "g1",
            BatchRequest::new(vec![Operation::set("players.{{pid}}.score", json!("{{points}}"))])
                .with_variable("pid", json!("alice"))
                .with_variable("points", json!(5)),
        )
        .await
        .unwrap();
    assert!(scored.fired.is_empty());
    assert_eq!(scored.phase, "play");
    assert_eq!(scored.state.get("players.alice.score"), Some(&json!(5)));
    assert_eq!(scored.checks.len(), 1);
    assert_eq!(
        scored.checks[0].report.outcomes[0].status,
        PreconditionStatus::Unsatisfied
    );

    let ended = runtime
        .submit(
            "g1",
            BatchRequest::new(vec![Operation::set("game.gameEnded", json!(true))])
                .with_variable("winner", json!("alice")),
        )
        .await
        .unwrap();
    assert_eq!(ended.fired, vec!["end"]);
    assert_eq!(ended.phase, "finished");
    assert_eq!(ended.state.get("game.winner"), Some(&json!("alice")));
    assert_eq!(
        ended.messages[0].messages.public.as_deref(),
        Some("Winner: alice")
    );
    assert_eq!(
        runtime.state("g1").unwrap().get("game.publicMessage"),
        Some(&json!("Winner: alice"))
    );
    assert_eq!(runtime.phase("g1").unwrap(), "finished");

    let graph = runtime.graph("g1").unwrap();
    let setters: Vec<_> = graph
        .field_setters("game.round")
        .iter()
        .map(|t| t.id.as_str())
        .collect();
    assert_eq!(setters, vec!["start"]);
    let path = &graph.all_paths("init", "finished")[0];
    assert!(graph.path_sets_field(path, "game.winner"));
    assert!(!graph.path_sets_field(path, "game.gameEnded"));
}

#[tokio::test]
async fn failed_batch_leaves_state_untouched() {
    let runtime = runtime_with_game("g1");
    let before = runtime.state("g1").unwrap();

    let result = runtime
        .submit(
            "g1",
            BatchRequest::new(vec![
                Operation::set("game.round", json!(3)),
                Operation::transfer(
                    "players.alice.chips",
                    "players.bob.chips",
                    Some(Amount::from(11)),
                ),
            ]),
        )
        .await;

    match result {
        Err(RuntimeError::Mutation(MutationError::Halted { applied, failure, .. })) => {
            assert_eq!(applied.len(), 1);
            assert_eq!(failure.index, 1);
        }
        other => panic!("expected halted batch, got {other:?}"),
    }
    assert_eq!(runtime.state("g1").unwrap(), before);
    assert_eq!(runtime.phase("g1").unwrap(), "init");
}

#[tokio::test]
async fn transfer_conserves_chips() {
    let runtime = runtime_with_game("g1");
    let outcome = runtime
        .submit(
            "g1",
            BatchRequest::new(vec![Operation::transfer(
                "players.alice.chips",
                "players.bob.chips",
                Some(Amount::from(4)),
            )]),
        )
        .await
        .unwrap();

    assert_eq!(outcome.state.get("players.alice.chips"), Some(&json!(6)));
    assert_eq!(outcome.state.get("players.bob.chips"), Some(&json!(4)));
}

#[tokio::test]
async fn unknown_and_duplicate_games_are_rejected() {
    let runtime = runtime_with_game("g1");

    assert!(matches!(
        runtime.advance("missing").await,
        Err(RuntimeError::UnknownGame { ref game_id }) if game_id == "missing"
    ));
    assert!(matches!(
        runtime.register_game("g1", artifacts(), StateTree::new_game(["carol"])),
        Err(RuntimeError::GameExists { .. })
    ));
}

#[tokio::test]
async fn act_applies_current_phase_instructions() {
    let runtime = runtime_with_game("g1");
    runtime.advance("g1").await.unwrap();

    let mut variables = Map::new();
    variables.insert("player".into(), json!("bob"));
    let outcome = runtime.act("g1", variables, None).await.unwrap();

    assert_eq!(outcome.state.get("game.round"), Some(&json!(2)));
    assert_eq!(outcome.messages[0].source, "play");
    assert_eq!(
        outcome.state.get("game.publicMessage"),
        Some(&json!("Round advanced by bob"))
    );
    assert!(outcome.fired.is_empty());
}

#[tokio::test]
async fn concurrent_batches_for_one_game_are_serialized() {
    let runtime = runtime_with_game("g1");

    let mut handles = Vec::new();
    for _ in 0..16 {
        let runtime = runtime.clone();
        handles.push(tokio::spawn(async move {
            runtime
                .submit(
                    "g1",
                    BatchRequest::new(vec![Operation::increment("game.counter", 1)]),
                )
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(
        runtime.state("g1").unwrap().get("game.counter"),
        Some(&json!(16))
    );
}

#[tokio::test]
async fn seeded_rng_is_reproducible() {
    init_tracing();
    let runtime = Runtime::builder().build();
    for id in ["a", "b"] {
        runtime
            .register_game(id, artifacts(), StateTree::new_game(["alice"]))
            .unwrap();
    }

    let request = BatchRequest::new(vec![Operation::rng(
        "game.weather",
        vec![json!("sun"), json!("rain"), json!("snow")],
        vec![0.5, 0.3, 0.2],
    )])
    .with_seed(1234);

    let a = runtime.submit("a", request.clone()).await.unwrap();
    let b = runtime.submit("b", request).await.unwrap();
    assert!(a.state.get("game.weather").is_some());
    assert_eq!(a.state.get("game.weather"), b.state.get("game.weather"));
}

#[tokio::test]
async fn configured_seed_applies_to_unseeded_batches() {
    init_tracing();
    let config = RuntimeConfig {
        default_seed: Some(99),
        ..RuntimeConfig::default()
    };
    let runtime = Runtime::builder().config(config).build();
    let request = BatchRequest::new(vec![Operation::rng(
        "game.roll",
        (1..=6).map(|n| json!(n)).collect(),
        vec![1.0 / 6.0; 6],
    )]);

    let mut rolls = Vec::new();
    for id in ["a", "b"] {
        runtime
            .register_game(id, artifacts(), StateTree::new_game(["alice"]))
            .unwrap();
        let outcome = runtime.submit(id, request.clone()).await.unwrap();
        rolls.push(outcome.state.get("game.roll").cloned());
    }
    assert_eq!(rolls[0], rolls[1]);
}

#[tokio::test]
async fn updating_artifacts_rebuilds_the_graph() {
    let runtime = runtime_with_game("g1");
    let before = runtime.graph("g1").unwrap();
    assert!(Arc::ptr_eq(&before, &runtime.graph("g1").unwrap()));

    let mut changed = artifacts();
    changed.phases.push(Phase::new("overtime"));
    changed
        .transitions
        .push(Transition::new("extend", "play", "overtime"));
    let after = runtime.update_artifacts("g1", changed).await.unwrap();

    assert!(!Arc::ptr_eq(&before, &after));
    assert!(after.phase("overtime").is_some());
    assert!(Arc::ptr_eq(&after, &runtime.graph("g1").unwrap()));

    let broken = GameArtifacts::new(
        vec![Phase::new("init")],
        vec![Transition::new("loop", "init", "nowhere")],
    );
    assert!(matches!(
        runtime.update_artifacts("g1", broken).await,
        Err(RuntimeError::Graph(_))
    ));
    assert!(Arc::ptr_eq(&after, &runtime.graph("g1").unwrap()));
}

#[tokio::test]
async fn removed_games_release_their_resources() {
    let runtime = runtime_with_game("g1");
    runtime.advance("g1").await.unwrap();

    let last = runtime.remove_game("g1").await.unwrap();
    assert_eq!(last.get("game.round"), Some(&json!(1)));

    assert!(runtime.game_ids().is_empty());
    assert!(runtime.cache().get("g1").is_none());
    assert!(runtime.queue().active_keys().is_empty());
    assert!(matches!(
        runtime.state("g1"),
        Err(RuntimeError::UnknownGame { .. })
    ));

    runtime.shutdown().await.unwrap();
}
