//! The server's side: who is online, and forwarding invites between them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use duel::prelude::*;

use crate::dto::{
    Card, EndGame, GameInvite, GameNextTurn, GameOver, InvitePlayer, Login, NextTurn,
};

/// Turns played per game.
const TURNS: u32 = 3;

/// Logged-in players and the handle for calling each of them.
#[derive(Default)]
pub struct Lobby {
    players: Mutex<HashMap<String, RequestManager>>,
    next_game: AtomicU64,
}

impl Lobby {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claims `name`. The returned guard gives it back when dropped.
    fn join(self: &Arc<Self>, name: &str, requests: RequestManager) -> Option<Membership> {
        let mut players = self.lock();
        if players.contains_key(name) {
            return None;
        }
        players.insert(name.to_string(), requests);
        Some(Membership {
            lobby: Arc::clone(self),
            name: name.to_string(),
        })
    }

    pub fn find(&self, name: &str) -> Option<RequestManager> {
        self.lock().get(name).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RequestManager>> {
        self.players.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Kept in the connection state; logs the player out when the
/// connection goes away.
struct Membership {
    lobby: Arc<Lobby>,
    name: String,
}

impl Drop for Membership {
    fn drop(&mut self) {
        self.lobby.lock().remove(&self.name);
        tracing::info!(user = %self.name, "left lobby");
    }
}

#[derive(Clone)]
struct UserName(String);

/// Handles `"lobby"` requests from players.
pub struct LobbyController {
    ctx: ConnectionContext,
}

impl LobbyController {
    pub fn new(ctx: &ConnectionContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    fn login(&self, lobby: &Arc<Lobby>, login: Login) -> Result<Response, HandlerError> {
        if self.ctx.state::<UserName>().is_some() {
            return Err(HandlerError::BadRequest("already logged in".into()));
        }
        let membership = lobby
            .join(&login.user_name, self.ctx.requests().clone())
            .ok_or_else(|| HandlerError::BadRequest(format!("{} is taken", login.user_name)))?;
        self.ctx.insert_state(membership);
        self.ctx.insert_state(UserName(login.user_name.clone()));
        tracing::info!(conn_id = %self.ctx.connection_id(), user = %login.user_name, "logged in");
        Ok(Response::ok())
    }

    async fn invite(
        &self,
        lobby: &Arc<Lobby>,
        invite: GameInvite,
        cancel: CancellationToken,
    ) -> Result<Response, HandlerError> {
        let UserName(me) = self
            .ctx
            .state::<UserName>()
            .ok_or(HandlerError::Unauthorized)?;
        let them = invite.opponent_user_name;
        if them == me {
            return Err(HandlerError::BadRequest("cannot invite yourself".into()));
        }
        let opponent = lobby
            .find(&them)
            .ok_or_else(|| HandlerError::Gone(format!("{them} is not online")))?;

        // Ask the opponent, on their connection, with our caller's cancel.
        let reply = opponent
            .call::<InvitePlayer>(&GameInvite { opponent_user_name: me.clone() }, Some(cancel))
            .await?;
        tracing::info!(from = %me, to = %them, accepted = reply.accepted, "invite answered");

        if reply.accepted {
            let game_id = lobby.next_game.fetch_add(1, Ordering::Relaxed) + 1;
            let host = (me, self.ctx.requests().clone());
            tokio::spawn(play(game_id, host, (them, opponent)));
        }
        Ok(Response::ok_with(&reply)?)
    }
}

impl Controller for LobbyController {
    fn process<'a>(
        &'a self,
        request: &'a Envelope,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<Response, HandlerError>> {
        Box::pin(async move {
            let lobby = self.ctx.service::<Lobby>()?;
            match request.verb.as_str() {
                "login" => self.login(&lobby, request.body()?),
                "invite" => self.invite(&lobby, request.body()?, cancel).await,
                _ => Ok(Response::method_not_allowed()),
            }
        })
    }
}

type Seat = (String, RequestManager);

async fn play(game_id: u64, first: Seat, second: Seat) {
    if let Err(e) = run_game(game_id, &first, &second).await {
        tracing::warn!(game_id, error = %e, "game abandoned");
    }
}

/// Deals `TURNS` rounds to both players, then reports the result. The
/// turn winner alternates, starting with the host.
async fn run_game(game_id: u64, first: &Seat, second: &Seat) -> Result<(), RequestError> {
    let (name1, player1) = first;
    let (name2, player2) = second;
    let mut scores = [0_u32; 2];
    let mut previous_turn_winner = None;

    for turn in 0..TURNS {
        let update = GameNextTurn {
            game_id,
            player1: name1.clone(),
            score1: scores[0],
            player2: name2.clone(),
            score2: scores[1],
            cards: deal(turn),
            previous_turn_winner: previous_turn_winner.clone(),
        };
        let (a, b) = tokio::join!(
            player1.call::<NextTurn>(&update, None),
            player2.call::<NextTurn>(&update, None),
        );
        a?;
        b?;

        let winner = (turn % 2) as usize;
        scores[winner] += 1;
        previous_turn_winner = Some(if winner == 0 { name1 } else { name2 }.clone());
    }

    let winner = match scores[0].cmp(&scores[1]) {
        std::cmp::Ordering::Greater => Some(name1.clone()),
        std::cmp::Ordering::Less => Some(name2.clone()),
        std::cmp::Ordering::Equal => None,
    };
    let over = GameOver {
        game_id,
        winner,
        player1: name1.clone(),
        score1: scores[0],
        player2: name2.clone(),
        score2: scores[1],
    };
    let (a, b) = tokio::join!(
        player1.call::<EndGame>(&over, None),
        player2.call::<EndGame>(&over, None),
    );
    a?;
    b?;
    Ok(())
}

/// Two cards sharing exactly one symbol, like every pair in a Dobble deck.
fn deal(turn: u32) -> Vec<Card> {
    let shared = (turn % 8) as u8;
    let mut left = [0_u8; 8];
    let mut right = [0_u8; 8];
    left[0] = shared;
    right[0] = shared;
    for i in 1..8_u8 {
        left[usize::from(i)] = 8 + i;
        right[usize::from(i)] = 16 + i;
    }
    vec![left, right]
}

/// A server builder with the lobby service and route installed.
pub fn server(bind: &str) -> Result<DuelServerBuilder, DuelError> {
    DuelServer::builder()
        .bind(bind)
        .service(Lobby::new())
        .route("lobby", LobbyController::new)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dto::{LobbyInvite, LobbyLogin};
    use crate::game::{self, Player};

    struct Running {
        addr: String,
        _stop: tokio::sync::oneshot::Sender<()>,
    }

    async fn start() -> Running {
        let server = server("127.0.0.1:0").unwrap().build_tcp().await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(server.run_until(async {
            let _ = stopped.await;
        }));
        Running { addr, _stop: stop }
    }

    async fn login(server: &Running, player: &Arc<Player>) -> ProtocolSession {
        let session = game::client(Arc::clone(player))
            .unwrap()
            .connect_tcp(&server.addr)
            .await
            .unwrap();
        session
            .call::<LobbyLogin>(&Login { user_name: player.name().into() }, None)
            .await
            .unwrap();
        session
    }

    fn invite(name: &str) -> GameInvite {
        GameInvite { opponent_user_name: name.into() }
    }

    #[test]
    fn test_dealt_cards_share_exactly_one_symbol() {
        for turn in 0..TURNS {
            let cards = deal(turn);
            let shared = cards[0].iter().filter(|s| cards[1].contains(s)).count();
            assert_eq!(shared, 1);
        }
    }

    #[tokio::test]
    async fn test_membership_drop_leaves_lobby() {
        let lobby = Lobby::new();
        let (conn, _peer) = duel::transport::MemoryConnection::pair();
        let session = DuelClient::builder().start(conn);

        let membership = lobby.join("alice", session.requests().clone()).unwrap();
        assert!(lobby.join("alice", session.requests().clone()).is_none());
        assert!(lobby.find("alice").is_some());

        drop(membership);
        assert!(lobby.find("alice").is_none());
    }

    #[tokio::test]
    async fn test_invite_plays_a_game() {
        let server = start().await;
        let alice = Player::new("alice", true);
        let bob = Player::new("bob", true);
        let alice_session = login(&server, &alice).await;
        let _bob_session = login(&server, &bob).await;

        let reply = alice_session
            .call::<LobbyInvite>(&invite("bob"), None)
            .await
            .unwrap();
        assert!(reply.accepted);
        assert_eq!(bob.invites(), vec!["alice".to_string()]);

        let over = tokio::time::timeout(Duration::from_secs(5), alice.final_result())
            .await
            .unwrap();
        assert_eq!(over, bob.final_result().await);
        assert_eq!(over.winner.as_deref(), Some("alice"));
        assert_eq!((over.score1, over.score2), (2, 1));
        assert_eq!(alice.turns().len(), TURNS as usize);
        assert_eq!(bob.turns(), alice.turns());
    }

    #[tokio::test]
    async fn test_declined_invite_starts_nothing() {
        let server = start().await;
        let alice = Player::new("alice", true);
        let carol = Player::new("carol", false);
        let alice_session = login(&server, &alice).await;
        let _carol_session = login(&server, &carol).await;

        let reply = alice_session
            .call::<LobbyInvite>(&invite("carol"), None)
            .await
            .unwrap();
        assert!(!reply.accepted);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(alice.turns().is_empty());
    }

    #[tokio::test]
    async fn test_name_taken() {
        let server = start().await;
        let _first = login(&server, &Player::new("alice", true)).await;

        let second = game::client(Player::new("alice", true))
            .unwrap()
            .connect_tcp(&server.addr)
            .await
            .unwrap();
        let err = second
            .call::<LobbyLogin>(&Login { user_name: "alice".into() }, None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn test_invite_requires_login() {
        let server = start().await;
        let anonymous = game::client(Player::new("anon", true))
            .unwrap()
            .connect_tcp(&server.addr)
            .await
            .unwrap();
        let err = anonymous
            .call::<LobbyInvite>(&invite("bob"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_invite_offline_player_is_gone() {
        let server = start().await;
        let alice = login(&server, &Player::new("alice", true)).await;
        let err = alice
            .call::<LobbyInvite>(&invite("nobody"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Gone(ref m) if m == "Resource is gone."));
    }

    #[tokio::test]
    async fn test_disconnect_logs_out() {
        let server = start().await;
        let alice = login(&server, &Player::new("alice", true)).await;
        let bob = login(&server, &Player::new("bob", true)).await;

        bob.dispose().await;

        let mut last = None;
        for _ in 0..100 {
            match alice.call::<LobbyInvite>(&invite("bob"), None).await {
                Err(RequestError::Gone(_)) => return,
                other => last = Some(other),
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("bob never left the lobby: {last:?}");
    }
}
