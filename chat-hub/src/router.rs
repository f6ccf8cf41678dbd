//! Dispatches one inbound line from a session to the hub.
//!
//! Replies, confirmations and errors are queued on the requesting session
//! only; nothing here is ever broadcast except plain chat.

use tracing::debug;

use crate::{
    command::Command,
    error::HubResult,
    hub::Hub,
    session::Session,
};

/// Routes `line` from `session`. User errors become a reply line.
pub async fn route(hub: &Hub, session: &Session, line: &str) {
    if let Err(error) = dispatch(hub, session, line).await {
        debug!(peer = %session.addr(), name = %session.name(), %error, "command rejected");
        session.enqueue(format!("error: {error}"));
    }
}

async fn dispatch(hub: &Hub, session: &Session, line: &str) -> HubResult<()> {
    match Command::parse(line)? {
        Command::Who => list_online(hub, session).await,
        Command::Rename { name } => {
            hub.registry().rename(&session.name(), &name).await?;
            session.enqueue(format!("you are now known as {name}"));
        }
        Command::DirectMessage { to, text } => {
            hub.direct_message(&session.name(), &to, &text).await?;
        }
        Command::Chat(text) => hub.broadcast(&session.name(), session.addr(), &text),
    }
    Ok(())
}

async fn list_online(hub: &Hub, requester: &Session) {
    // The roster is taken and released before anything is queued.
    for (name, addr) in hub.registry().roster().await {
        requester.enqueue(format!("[{addr}]{name}: online"));
    }
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, sync::Arc, time::Duration};

    use tokio::time::timeout;

    use super::*;
    use crate::session::Outbox;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    async fn join(hub: &Hub, name: &str, port: u16) -> (Arc<Session>, Outbox) {
        let (session, outbox) = Session::new(addr(port));
        hub.registry()
            .register(name, Arc::clone(&session))
            .await
            .expect("register session");
        (session, outbox)
    }

    async fn next(outbox: &mut Outbox) -> String {
        timeout(Duration::from_secs(1), outbox.recv())
            .await
            .expect("timed out waiting for a line")
            .expect("queue closed unexpectedly")
    }

    /// Pushes a marker broadcast through the dispatch loop so that anything
    /// queued before it has certainly been fanned out.
    async fn settle(hub: &Hub, outboxes: &mut [&mut Outbox]) -> Vec<Vec<String>> {
        hub.broadcast("probe", addr(9), "settled");
        let marker = "[127.0.0.1:9]probe: settled";
        let mut seen = Vec::new();
        for outbox in outboxes.iter_mut() {
            let mut lines = Vec::new();
            loop {
                let line = next(outbox).await;
                if line == marker {
                    break;
                }
                lines.push(line);
            }
            seen.push(lines);
        }
        seen
    }

    #[tokio::test]
    async fn who_lists_everyone_to_the_requester_only() {
        let hub = Hub::spawn();
        let (alice, mut alice_box) = join(&hub, "alice", 1).await;
        let (_bob, mut bob_box) = join(&hub, "bob", 2).await;

        route(&hub, &alice, "who").await;

        assert_eq!(next(&mut alice_box).await, "[127.0.0.1:1]alice: online");
        assert_eq!(next(&mut alice_box).await, "[127.0.0.1:2]bob: online");
        assert!(bob_box.try_recv().is_none());
    }

    #[tokio::test]
    async fn direct_message_goes_to_target_only() {
        let hub = Hub::spawn();
        let (alice, mut alice_box) = join(&hub, "alice", 1).await;
        let (_bob, mut bob_box) = join(&hub, "bob", 2).await;
        let (_carol, mut carol_box) = join(&hub, "carol", 3).await;

        route(&hub, &alice, "to|bob|hi").await;

        let seen = settle(&hub, &mut [&mut alice_box, &mut bob_box, &mut carol_box]).await;
        assert_eq!(seen[0], Vec::<String>::new());
        assert_eq!(seen[1], vec!["[private]alice: hi"]);
        assert_eq!(seen[2], Vec::<String>::new());
    }

    #[tokio::test]
    async fn unknown_target_is_reported_to_sender_only() {
        let hub = Hub::spawn();
        let (alice, mut alice_box) = join(&hub, "alice", 1).await;
        let (_bob, mut bob_box) = join(&hub, "bob", 2).await;

        route(&hub, &alice, "to|ghost|hi").await;

        let seen = settle(&hub, &mut [&mut alice_box, &mut bob_box]).await;
        assert_eq!(seen[0], vec!["error: no user named 'ghost' is online"]);
        assert_eq!(seen[1], Vec::<String>::new());
    }

    #[tokio::test]
    async fn malformed_direct_message_is_reported_to_sender_only() {
        let hub = Hub::spawn();
        let (alice, mut alice_box) = join(&hub, "alice", 1).await;
        let (_bob, mut bob_box) = join(&hub, "bob", 2).await;

        route(&hub, &alice, "to|bob").await;

        let seen = settle(&hub, &mut [&mut alice_box, &mut bob_box]).await;
        assert_eq!(seen[0].len(), 1);
        assert!(seen[0][0].starts_with("error: malformed command"));
        assert_eq!(seen[1], Vec::<String>::new());
    }

    #[tokio::test]
    async fn rename_confirms_and_rejects_privately() {
        let hub = Hub::spawn();
        let (alice, mut alice_box) = join(&hub, "alice", 1).await;
        let (_bob, mut bob_box) = join(&hub, "bob", 2).await;

        route(&hub, &alice, "rename|bob").await;
        route(&hub, &alice, "rename|alicia").await;

        let seen = settle(&hub, &mut [&mut alice_box, &mut bob_box]).await;
        assert_eq!(
            seen[0],
            vec![
                "error: name 'bob' is already taken",
                "you are now known as alicia",
            ]
        );
        assert_eq!(seen[1], Vec::<String>::new());
        assert_eq!(alice.name(), "alicia");
    }

    #[tokio::test]
    async fn chat_is_broadcast_with_sender_identity() {
        let hub = Hub::spawn();
        let (alice, mut alice_box) = join(&hub, "alice", 1).await;
        let (_bob, mut bob_box) = join(&hub, "bob", 2).await;

        route(&hub, &alice, "hello | everyone").await;

        let seen = settle(&hub, &mut [&mut alice_box, &mut bob_box]).await;
        for lines in seen {
            assert_eq!(lines, vec!["[127.0.0.1:1]alice: hello | everyone"]);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_rename_race_has_one_winner() {
        let hub = Hub::spawn();
        let (alice, mut alice_box) = join(&hub, "alice", 1).await;
        let (bob, mut bob_box) = join(&hub, "bob", 2).await;

        tokio::join!(
            route(&hub, &alice, "rename|same"),
            route(&hub, &bob, "rename|same"),
        );

        let alice_reply = next(&mut alice_box).await;
        let bob_reply = next(&mut bob_box).await;
        let replies = [alice_reply.as_str(), bob_reply.as_str()];

        assert_eq!(
            replies
                .iter()
                .filter(|reply| **reply == "you are now known as same")
                .count(),
            1
        );
        assert_eq!(
            replies
                .iter()
                .filter(|reply| **reply == "error: name 'same' is already taken")
                .count(),
            1
        );
        assert_eq!(hub.registry().len().await, 2);
    }
}
