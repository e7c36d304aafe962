//! Turn flow tests against a scripted backend.
//!
//! Every scripted generation is serialized to newline-delimited JSON and cut
//! into small fragments, so these tests exercise the stream decoder, the tag
//! parser, the fallback extractor and memory together.

use adventure_core::testing::{assert_at, assert_has_item, assert_no_item, assert_npc_here};
use adventure_core::{Command, Importance, Script, SessionConfig, SessionError, TestHarness};
use std::time::Duration;

// =============================================================================
// COMPLETED TURNS
// =============================================================================

#[tokio::test]
async fn test_commands_apply_exactly_once_across_fragments() {
    let mut harness = TestHarness::new();
    harness.expect(Script::narrate_in(
        "You lift it from the sconce. [ITEM_ADD: Torch|Burning low|1] The hall brightens.",
        3,
        Some(vec![1, 2, 3]),
    ));

    let outcome = harness.input("I take the torch").await.expect("turn should succeed");

    assert_eq!(
        outcome.commands,
        vec![Command::add_item("Torch", "Burning low", 1)]
    );
    assert_has_item(harness.memory(), "torch", 1);
    assert_eq!(harness.memory().generations_applied(), 1);
    assert_eq!(harness.memory().context(), Some(&[1, 2, 3][..]));
    assert_eq!(harness.memory().messages().len(), 2);
    assert_eq!(harness.memory().messages()[0].content, "I take the torch");
    assert_eq!(harness.memory().messages()[1].content, outcome.narrative);
}

#[tokio::test]
async fn test_display_updates_only_grow_and_never_show_tags() {
    let mut harness = TestHarness::new();
    harness.expect(Script::narrate_in(
        "A stranger waves. [NPC: Hollis|Ferry Landing|A nervous clerk] He looks away. \
         [EVENT: Hollis noticed you]",
        2,
        None,
    ));

    let outcome = harness.input("I wave back").await.unwrap();

    assert!(!harness.updates.is_empty());
    for pair in harness.updates.windows(2) {
        assert!(pair[1].starts_with(&pair[0]), "{:?} shrank to {:?}", pair[0], pair[1]);
    }
    for update in &harness.updates {
        assert!(!update.contains('['), "tag leaked into display: {update:?}");
    }
    assert_eq!(harness.last_shown(), Some(outcome.narrative.as_str()));
    assert_eq!(outcome.narrative, "A stranger waves.  He looks away.");
}

#[tokio::test]
async fn test_quantities_merge_across_turns() {
    let mut harness = TestHarness::new();
    harness
        .expect_narration("[ITEM_ADD: Torch] You take a spare torch.")
        .expect_narration("[ITEM_ADD: Torch||2] Two more torches.");

    harness.input("I take a torch").await.unwrap();
    harness.input("I take more torches").await.unwrap();

    assert_has_item(harness.memory(), "torch", 3);
    assert_eq!(harness.memory().generations_applied(), 2);
}

#[tokio::test]
async fn test_fallback_fills_untagged_narration() {
    let mut harness = TestHarness::new();
    harness.expect_narration(
        "You enter the old chapel. On the altar you pick up a silver bell. \
         You discover that the bell has no clapper at all.",
    );

    let outcome = harness.input("I look around").await.unwrap();

    assert_has_item(harness.memory(), "silver-bell", 1);
    assert_at(harness.memory(), "old-chapel");
    assert!(outcome.commands.contains(&Command::story_fact(
        "The bell has no clapper at all",
        Importance::Minor
    )));
}

#[tokio::test]
async fn test_tagged_items_suppress_item_fallback() {
    let mut harness = TestHarness::new();
    harness.expect_narration("[ITEM_ADD: Rope] You grab the rope and a shiny coin.");

    harness.input("I search the crate").await.unwrap();

    assert_has_item(harness.memory(), "rope", 1);
    assert_no_item(harness.memory(), "shiny-coin");
}

#[tokio::test]
async fn test_npc_without_location_is_placed_here() {
    let mut harness = TestHarness::new();
    harness.expect_narration(
        "[LOCATION: Lantern Market|Stalls under paper lights] [NPC: Vell] A fence eyes you.",
    );

    harness.input("I wander in").await.unwrap();

    assert_at(harness.memory(), "lantern-market");
    assert_npc_here(harness.memory(), "vell");
}

// =============================================================================
// REQUEST CONSTRUCTION
// =============================================================================

#[tokio::test]
async fn test_next_request_carries_token_and_reminder() {
    let mut harness = TestHarness::new();
    harness
        .expect(Script::narrate_in(
            "[LOCATION: Ferry Landing] [ITEM_ADD: Coin||3] [FACT: The ferry only runs at night|critical] You wait.",
            5,
            Some(vec![7, 8, 9]),
        ))
        .expect_narration("Night falls.");

    harness.input("I wait for the ferry").await.unwrap();
    harness.input("I keep waiting").await.unwrap();

    let request = harness.backend.last_request().expect("two requests were sent");
    assert_eq!(request.context, Some(vec![7, 8, 9]));
    assert_eq!(request.model.as_deref(), Some("llama3.2"));
    assert_eq!(request.num_ctx, Some(4096));
    assert!(request.system.as_deref().unwrap_or_default().contains("ITEM_ADD"));
    assert!(request.prompt.contains("Critical facts: The ferry only runs at night"));
    assert!(request.prompt.contains("Current location: Ferry Landing"));
    assert!(request.prompt.contains("Inventory: Coin x3"));
    assert!(request.prompt.ends_with("I keep waiting"));
}

#[tokio::test]
async fn test_first_request_has_no_reminder() {
    let mut harness = TestHarness::new();
    harness.expect_narration("Fog.");

    harness.input("I open my eyes").await.unwrap();

    let request = harness.backend.last_request().unwrap();
    assert_eq!(request.prompt, "I open my eyes");
    assert_eq!(request.context, None);
}

#[tokio::test]
async fn test_movement_directive_is_added() {
    let mut harness = TestHarness::new();
    harness
        .expect_narration("[LOCATION: The Docks] Salt air.")
        .expect_narration("You are already there.");

    let outcome = harness.input("I go to the docks").await.unwrap();
    assert!(matches!(
        outcome.movement,
        Some(adventure_core::MovementIntent::Travel { .. })
    ));
    let prompt = harness.backend.last_request().unwrap().prompt;
    assert!(prompt.contains("The player travels to the docks"));

    harness.input("I arrive at the docks").await.unwrap();
    let prompt = harness.backend.last_request().unwrap().prompt;
    assert!(prompt.contains("already arrived at the docks"));
}

#[tokio::test]
async fn test_num_predict_is_forwarded() {
    let mut harness = TestHarness::with_config(SessionConfig::default().with_num_predict(128));
    harness.expect_narration("Short.");

    harness.input("Hello").await.unwrap();

    assert_eq!(harness.backend.last_request().unwrap().num_predict, Some(128));
}

// =============================================================================
// FAILED TURNS LEAVE MEMORY UNTOUCHED
// =============================================================================

#[tokio::test]
async fn test_refused_request_is_visible_and_harmless() {
    let mut harness = TestHarness::new();
    harness.expect(Script::Refuse("connection refused".to_string()));

    let err = harness.input("I look around").await.unwrap_err();

    assert!(matches!(err, SessionError::Transport(_)));
    assert!(err.is_user_visible());
    assert!(harness.memory().messages().is_empty());
    assert_eq!(harness.memory().generations_applied(), 0);
}

#[tokio::test]
async fn test_broken_stream_applies_nothing() {
    let mut harness = TestHarness::new();
    harness.expect(Script::break_after(
        "You grab it. [ITEM_ADD: Rope|Coiled|1] Then the line",
        "connection reset",
    ));

    let err = harness.input("I grab the rope").await.unwrap_err();

    assert!(matches!(err, SessionError::Transport(ollama::Error::Network(_))));
    assert_no_item(harness.memory(), "rope");
    assert!(harness.memory().messages().is_empty());
    assert_eq!(harness.memory().generations_applied(), 0);
}

#[tokio::test]
async fn test_timeout_is_reported_distinctly() {
    let config = SessionConfig::default().with_generation_timeout(Duration::from_millis(100));
    let mut harness = TestHarness::with_config(config);
    harness.expect(Script::stall_after("The model is still thinking about [ITEM_ADD: Lamp"));

    let err = harness.input("I wait").await.unwrap_err();

    assert!(matches!(err, SessionError::Timeout { .. }));
    assert!(err.player_message().contains("loading the model"));
    assert_no_item(harness.memory(), "lamp");
    assert_eq!(harness.memory().generations_applied(), 0);
}

#[tokio::test]
async fn test_cancellation_is_silent_and_harmless() {
    let mut harness = TestHarness::new();
    harness
        .expect(Script::stall_after("You reach for the [ITEM_ADD: Idol|Gold|1] and"))
        .expect_narration("You step back.");

    let cancel = harness.session.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let err = harness.input("I grab the idol").await.unwrap_err();
    assert!(matches!(err, SessionError::Cancelled));
    assert!(!err.is_user_visible());
    assert_no_item(harness.memory(), "idol");
    assert!(harness.memory().messages().is_empty());

    // The session is usable again right away.
    harness.input("I step back").await.expect("next turn should succeed");
    assert_eq!(harness.memory().generations_applied(), 1);
    assert_eq!(harness.memory().messages().len(), 2);
}

#[tokio::test]
async fn test_interrupt_only_cancels_a_running_generation() {
    let mut harness = TestHarness::new();
    harness
        .expect(Script::stall_after("The lamp gutters and"))
        .expect_narration("Quiet.");

    let cancel = harness.session.cancel_handle();
    assert!(!cancel.interrupt(), "nothing is generating yet");

    let during = cancel.clone();
    let interrupter = tokio::spawn(async move {
        while !during.is_generating() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        during.interrupt()
    });

    let err = harness.input("I wait").await.unwrap_err();
    assert!(matches!(err, SessionError::Cancelled));
    assert!(interrupter.await.unwrap());
    assert!(!cancel.is_generating());

    // An idle interrupt does not poison the next turn.
    assert!(!cancel.interrupt());
    harness.input("I listen").await.expect("next turn should succeed");
    assert!(!cancel.is_generating());
}

#[tokio::test]
async fn test_oversized_token_is_dropped_but_turn_succeeds() {
    let mut harness = TestHarness::new();
    harness.expect(Script::narrate_in(
        "[ITEM_ADD: Map] A very long conversation.",
        256,
        Some(vec![0; 25_000]),
    ));

    harness.input("I read the map").await.expect("turn should succeed");

    assert!(harness.memory().context().is_none());
    assert_has_item(harness.memory(), "map", 1);
}

// =============================================================================
// MODEL MANAGEMENT
// =============================================================================

#[tokio::test]
async fn test_switch_model_unloads_previous_and_drops_token() {
    let mut harness = TestHarness::new();
    harness
        .expect(Script::narrate_in("Hello.", 7, Some(vec![1])))
        .expect_narration("Bonjour.");

    harness.input("Hi").await.unwrap();
    assert!(harness.memory().context().is_some());

    harness.session.switch_model("mistral").await;
    assert_eq!(harness.backend.unloaded(), vec!["llama3.2".to_string()]);
    assert!(harness.memory().context().is_none());

    harness.input("Hi again").await.unwrap();
    let request = harness.backend.last_request().unwrap();
    assert_eq!(request.model.as_deref(), Some("mistral"));
    assert_eq!(request.context, None);

    harness.session.switch_model("mistral").await;
    assert_eq!(harness.backend.unloaded().len(), 1);
}

#[tokio::test]
async fn test_available_models() {
    let harness = TestHarness::new();
    harness.backend.set_models(&["llama3.2", "mistral"]);

    let models = harness.session.available_models().await.unwrap();
    let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["llama3.2", "mistral"]);
}

#[tokio::test]
async fn test_trim_history_restarts_server_context() {
    let mut harness = TestHarness::new();
    for i in 0..3 {
        harness.expect(Script::narrate_in(&format!("Reply {i}."), 7, Some(vec![i])));
        harness.input(&format!("Turn {i}")).await.unwrap();
    }

    harness.session.trim_history(2);

    assert_eq!(harness.memory().messages().len(), 2);
    assert!(harness.memory().context().is_none());
}
