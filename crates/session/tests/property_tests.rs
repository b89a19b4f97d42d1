use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;

use proto::{HubCall, HubEvent, UserId};
use session::{Command, ConnectionState, Effect, Input, SessionState};

const USERS: [&str; 3] = ["bob911", "carol", "dave"];

#[derive(Debug, Clone)]
enum Step {
    Request(usize, bool),
    Disconnect(usize),
    Pickup(usize, bool),
    Message(usize),
    Send,
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..USERS.len(), any::<bool>()).prop_map(|(u, support)| Step::Request(u, support)),
        (0..USERS.len()).prop_map(Step::Disconnect),
        (0..USERS.len(), any::<bool>()).prop_map(|(u, ack)| Step::Pickup(u, ack)),
        (0..USERS.len()).prop_map(Step::Message),
        Just(Step::Send),
    ]
}

fn at(tick: usize) -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + Duration::milliseconds(tick as i64)
}

fn live_state() -> SessionState {
    let mut state = SessionState::new("alice");
    for next in [
        ConnectionState::Connecting,
        ConnectionState::Authenticating,
        ConnectionState::Live,
    ] {
        state = state.apply(Input::Connection(next), at(0)).0;
    }
    state
}

/// Feeds a command through the state and acknowledges every call it issues.
fn run_command(
    state: SessionState,
    command: Command,
    ack: bool,
    now: DateTime<Utc>,
) -> SessionState {
    let (mut state, effects) = state.apply(Input::Command(command), now);
    for effect in effects {
        if let Effect::Invoke(call) = effect {
            let outcome = if ack {
                Ok(())
            } else {
                Err(proto::InvokeError::Remote {
                    target: call.target().to_string(),
                    message: "refused".to_string(),
                })
            };
            state = state.apply(Input::Completed { call, outcome }, now).0;
        }
    }
    state
}

fn assert_exclusive(state: &SessionState) -> Result<(), TestCaseError> {
    for user in USERS {
        let id = UserId::from(user);
        let pending = state.pending().iter().any(|r| r.requester == id);
        let active = state.active().is_some_and(|a| a.requester == id);
        prop_assert!(!(pending && active), "{user} is both pending and active");
    }
    Ok(())
}

proptest! {
    #[test]
    fn requester_is_never_pending_and_active(steps in prop::collection::vec(arb_step(), 0..60)) {
        let mut state = live_state();
        let mut logged = 0usize;

        for (tick, step) in steps.into_iter().enumerate() {
            let now = at(tick + 1);
            state = match step {
                Step::Request(u, support) => {
                    let chat_type = if support { "support" } else { "general" };
                    state.apply(Input::Hub(HubEvent::ChatRequest {
                        user: UserId::from(USERS[u]),
                        chat_type: chat_type.to_string(),
                    }), now).0
                }
                Step::Disconnect(u) => {
                    let id = UserId::from(USERS[u]);
                    let next = state.apply(Input::Hub(HubEvent::UserDisconnected { user: id.clone() }), now).0;
                    prop_assert!(!next.pending().iter().any(|r| r.requester == id));
                    prop_assert!(!next.active().is_some_and(|a| a.requester == id));
                    next
                }
                Step::Pickup(u, ack) => {
                    let id = UserId::from(USERS[u]);
                    let was_pending = state.pending().iter().any(|r| r.requester == id);
                    let before_active = state.active().cloned();
                    let next = run_command(state, Command::Pickup(id.clone()), ack, now);
                    if was_pending && ack {
                        prop_assert_eq!(next.active().map(|a| a.requester.clone()), Some(id.clone()));
                        prop_assert!(!next.pending().iter().any(|r| r.requester == id));
                    } else {
                        prop_assert_eq!(next.active().cloned(), before_active);
                    }
                    next
                }
                Step::Message(u) => state.apply(Input::Hub(HubEvent::IncomingMessage {
                    text: format!("m{tick}"),
                    sender: UserId::from(USERS[u]),
                }), now).0,
                Step::Send => run_command(state, Command::Send(format!("r{tick}")), true, now),
            };

            assert_exclusive(&state)?;
            prop_assert!(state.log().len() >= logged, "transcripts never shrink");
            logged = state.log().len();
        }
    }

    #[test]
    fn transcript_preserves_arrival_order(texts in prop::collection::vec("[a-z]{1,8}", 1..30)) {
        let mut state = live_state();
        for (tick, text) in texts.iter().enumerate() {
            state = state.apply(Input::Hub(HubEvent::IncomingMessage {
                text: text.clone(),
                sender: UserId::from("bob911"),
            }), at(tick)).0;
        }
        let read: Vec<String> = state
            .transcript(&UserId::from("bob911"))
            .iter()
            .map(|m| m.text.clone())
            .collect();
        prop_assert_eq!(read, texts);
    }
}

#[test]
fn replaying_the_same_inputs_is_deterministic() {
    let inputs = vec![
        Input::Hub(HubEvent::ChatRequest {
            user: UserId::from("bob911"),
            chat_type: "support".to_string(),
        }),
        Input::Completed {
            call: HubCall::PickupChat {
                target: UserId::from("bob911"),
                chat_type: "support".to_string(),
            },
            outcome: Ok(()),
        },
        Input::Hub(HubEvent::IncomingMessage {
            text: "Hello".to_string(),
            sender: UserId::from("bob911"),
        }),
    ];

    let replay = |inputs: &[Input]| {
        let mut state = live_state();
        let mut all_effects = Vec::new();
        for (tick, input) in inputs.iter().enumerate() {
            let (next, effects) = state.apply(input.clone(), at(tick));
            state = next;
            all_effects.extend(effects);
        }
        (state.snapshot(), all_effects)
    };

    assert_eq!(replay(&inputs), replay(&inputs));
}
