//! Envelope dispatch for established sessions.
//!
//! [`dispatch`] is a pure function: it maps one inbound envelope to the
//! [`Action`] the session task should perform.  It never touches the network,
//! so every branch is unit-testable.

use remotelink_core::{Envelope, Payload};

/// Server state visible to the `info` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSnapshot {
    pub connections: usize,
    pub port: u16,
}

/// What the session task does with an inbound envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send this envelope back.
    Reply(Envelope),
    /// Send this envelope back, then close the session.
    ReplyThenClose(Envelope),
    /// Hand `bytes` to the data sink, then send `reply`.
    ForwardData {
        reply: Envelope,
        key: String,
        bytes: Vec<u8>,
    },
    /// Nothing to do.
    Ignore,
}

/// Command verbs understood by the server.  Matched case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandVerb {
    Ping,
    Echo,
    Info,
    Disconnect,
}

impl CommandVerb {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "ping" => Some(CommandVerb::Ping),
            "echo" => Some(CommandVerb::Echo),
            "info" => Some(CommandVerb::Info),
            "disconnect" => Some(CommandVerb::Disconnect),
            _ => None,
        }
    }
}

/// Decides how to answer `envelope`.
pub fn dispatch(envelope: Envelope, snapshot: &ServerSnapshot) -> Action {
    let (request_id, priority) = (envelope.id(), envelope.priority());
    let respond = |success: bool, message: String| {
        Envelope::response_for(request_id, priority, success, message, None)
    };

    match envelope.into_payload() {
        Payload::Text { .. } => Action::Reply(respond(true, "message received".to_string())),
        Payload::Command { name, params } => match CommandVerb::parse(&name) {
            Some(CommandVerb::Ping) => Action::Reply(respond(true, "pong".to_string())),
            Some(CommandVerb::Echo) => match params.get("message") {
                Some(message) => Action::Reply(respond(true, message.clone())),
                None => Action::Reply(respond(
                    false,
                    "echo requires a 'message' parameter".to_string(),
                )),
            },
            Some(CommandVerb::Info) => Action::Reply(respond(
                true,
                format!(
                    "connections: {}, port: {}",
                    snapshot.connections, snapshot.port
                ),
            )),
            Some(CommandVerb::Disconnect) => {
                Action::ReplyThenClose(respond(true, "goodbye".to_string()))
            }
            None => Action::Reply(respond(false, format!("unknown command: {name}"))),
        },
        Payload::Data { key, bytes } => {
            let reply = respond(true, format!("received {} bytes for '{key}'", bytes.len()));
            Action::ForwardData { reply, key, bytes }
        }
        Payload::Heartbeat { .. } => Action::Reply(Envelope::heartbeat()),
        Payload::Response { .. } | Payload::KeyExchange { .. } => Action::Ignore,
    }
}

#[cfg(test)]
mod tests {
    use remotelink_core::Priority;

    use super::*;

    const SNAPSHOT: ServerSnapshot = ServerSnapshot {
        connections: 3,
        port: 7878,
    };

    /// Unwraps a `Reply` and returns `(success, message)`.
    fn reply_of(action: Action) -> (bool, String) {
        match action {
            Action::Reply(env) | Action::ReplyThenClose(env) => match env.into_payload() {
                Payload::Response {
                    success, message, ..
                } => (success, message),
                other => panic!("expected Response, got {other:?}"),
            },
            other => panic!("expected a reply, got {other:?}"),
        }
    }

    #[test]
    fn test_text_is_acknowledged() {
        let (ok, msg) = reply_of(dispatch(Envelope::text("hello"), &SNAPSHOT));
        assert!(ok);
        assert_eq!(msg, "message received");
    }

    #[test]
    fn test_reply_correlates_with_request() {
        let request = Envelope::command("ping", std::iter::empty::<(&str, &str)>());
        let id = request.id();
        match dispatch(request, &SNAPSHOT) {
            Action::Reply(env) => assert_eq!(env.correlation_id(), Some(id)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_ping_answers_pong_case_insensitively() {
        for verb in ["ping", "PING", "Ping"] {
            let env = Envelope::command(verb, std::iter::empty::<(&str, &str)>());
            assert_eq!(reply_of(dispatch(env, &SNAPSHOT)), (true, "pong".into()));
        }
    }

    #[test]
    fn test_echo_returns_message_param() {
        let env = Envelope::command("echo", [("message", "hi")]);
        assert_eq!(reply_of(dispatch(env, &SNAPSHOT)), (true, "hi".into()));
    }

    #[test]
    fn test_echo_without_message_fails() {
        let env = Envelope::command("Echo", std::iter::empty::<(&str, &str)>());
        let (ok, _) = reply_of(dispatch(env, &SNAPSHOT));
        assert!(!ok);
    }

    #[test]
    fn test_info_reports_snapshot() {
        let env = Envelope::command("info", std::iter::empty::<(&str, &str)>());
        assert_eq!(
            reply_of(dispatch(env, &SNAPSHOT)),
            (true, "connections: 3, port: 7878".into())
        );
    }

    #[test]
    fn test_disconnect_replies_then_closes() {
        let env = Envelope::command("DISCONNECT", std::iter::empty::<(&str, &str)>());
        let action = dispatch(env, &SNAPSHOT);
        assert!(matches!(action, Action::ReplyThenClose(_)));
        assert!(reply_of(action).0);
    }

    #[test]
    fn test_unknown_verb_is_failure_response() {
        let env = Envelope::command("reboot", std::iter::empty::<(&str, &str)>());
        assert_eq!(
            reply_of(dispatch(env, &SNAPSHOT)),
            (false, "unknown command: reboot".into())
        );
    }

    #[test]
    fn test_data_is_forwarded_and_acknowledged() {
        // Arrange
        let env = Envelope::data("clip", vec![1, 2, 3]);

        // Act
        let action = dispatch(env, &SNAPSHOT);

        // Assert
        match action {
            Action::ForwardData { reply, key, bytes } => {
                assert_eq!(key, "clip");
                assert_eq!(bytes, vec![1, 2, 3]);
                assert!(matches!(
                    reply.payload(),
                    Payload::Response { success: true, .. }
                ));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_data_reply_correlates_and_keeps_priority() {
        // Arrange
        let env = Envelope::builder(Payload::Data {
            key: "frame".into(),
            bytes: vec![0; 8],
        })
        .priority(Priority::High)
        .build();
        let id = env.id();

        // Act
        let action = dispatch(env, &SNAPSHOT);

        // Assert
        let Action::ForwardData { reply, .. } = action else {
            panic!("expected ForwardData, got {action:?}");
        };
        assert_eq!(reply.correlation_id(), Some(id));
        assert_eq!(reply.priority(), Priority::High);
        assert!(matches!(
            reply.payload(),
            Payload::Response { message, .. } if message == "received 8 bytes for 'frame'"
        ));
    }

    #[test]
    fn test_heartbeat_is_answered_with_fresh_heartbeat() {
        let ping = Envelope::builder(Payload::Heartbeat { timestamp_us: 1 }).build();
        match dispatch(ping.clone(), &SNAPSHOT) {
            Action::Reply(env) => {
                assert_ne!(env.id(), ping.id());
                assert!(matches!(env.payload(), Payload::Heartbeat { timestamp_us } if *timestamp_us > 1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_response_and_key_exchange_are_ignored() {
        let response = Envelope::response_to(&Envelope::text("q"), true, "ok", None);
        assert_eq!(dispatch(response, &SNAPSHOT), Action::Ignore);
        assert_eq!(
            dispatch(Envelope::key_exchange(vec![0; 32]), &SNAPSHOT),
            Action::Ignore
        );
    }
}
