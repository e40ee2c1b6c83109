//! A lobby server and two scripted players in one process.
//!
//! Alice invites Bob through the lobby. The lobby forwards the invite to
//! Bob's connection, and once he accepts it deals a short game to both.
//!
//! ```text
//! cargo run -p dobble-lobby -- 127.0.0.1:7878
//! ```

mod dto;
mod game;
mod lobby;

use std::time::Duration;

use duel::prelude::*;
use tokio::sync::oneshot;

use crate::dto::{GameInvite, LobbyInvite, LobbyLogin, Login};
use crate::game::Player;

async fn log_in(addr: &str, player: &std::sync::Arc<Player>) -> Result<ProtocolSession, DuelError> {
    let session = game::client(player.clone())?.connect_tcp(addr).await?;
    session
        .call::<LobbyLogin>(&Login { user_name: player.name().into() }, None)
        .await?;
    Ok(session)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let bind = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:0".to_string());
    let server = lobby::server(&bind)?.build_tcp().await?;
    let addr = server.local_addr()?.to_string();
    tracing::info!(%addr, "lobby listening");

    let (stop, stopped) = oneshot::channel::<()>();
    let running = tokio::spawn(server.run_until(async {
        let _ = stopped.await;
    }));

    let alice = Player::new("alice", true);
    let bob = Player::with_think_time("bob", true, Duration::from_millis(200));
    let alice_session = log_in(&addr, &alice).await?;
    let bob_session = log_in(&addr, &bob).await?;

    let reply = alice_session
        .call::<LobbyInvite>(&GameInvite { opponent_user_name: "bob".into() }, None)
        .await?;
    tracing::info!(accepted = reply.accepted, "bob answered");

    if reply.accepted {
        let over = alice.final_result().await;
        tracing::info!(
            game_id = over.game_id,
            winner = over.winner.as_deref().unwrap_or("nobody"),
            score = %format!("{}:{}", over.score1, over.score2),
            "game finished"
        );
    }

    alice_session.dispose().await;
    bob_session.dispose().await;
    let _ = stop.send(());
    running.await??;
    Ok(())
}
