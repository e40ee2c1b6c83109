//! The player's side: the "game" controller the lobby calls into.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use duel::prelude::*;
use tokio::sync::watch;

use crate::dto::{GameInvite, GameInviteUserResponse, GameNextTurn, GameOver};

/// What the game controller needs from the application.
pub trait GameService: Send + Sync {
    /// Decides whether to play `from`. Should give up when `cancel` fires.
    fn invite_requested<'a>(&'a self, from: &'a str, cancel: CancellationToken) -> BoxFuture<'a, bool>;
    fn next_turn(&self, turn: GameNextTurn);
    fn game_over(&self, over: GameOver);
}

/// Handles requests the lobby sends to a player.
pub struct GameController {
    ctx: ConnectionContext,
}

impl GameController {
    pub fn new(ctx: &ConnectionContext) -> Self {
        Self { ctx: ctx.clone() }
    }
}

impl Controller for GameController {
    fn process<'a>(
        &'a self,
        request: &'a Envelope,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<Response, HandlerError>> {
        Box::pin(async move {
            let game = self.ctx.service::<dyn GameService>()?;
            match request.verb.as_str() {
                "invite" => {
                    let invite: GameInvite = request.body()?;
                    let accepted = game
                        .invite_requested(&invite.opponent_user_name, cancel.clone())
                        .await;
                    if cancel.is_cancelled() {
                        return Err(HandlerError::Cancelled);
                    }
                    Ok(Response::ok_with(&GameInviteUserResponse { accepted })?)
                }
                "nextTurn" => {
                    game.next_turn(request.body()?);
                    Ok(Response::ok())
                }
                "gameOver" => {
                    game.game_over(request.body()?);
                    Ok(Response::ok())
                }
                _ => Ok(Response::method_not_allowed()),
            }
        })
    }
}

/// A scripted player: answers invites after `think`, logs every turn.
pub struct Player {
    name: String,
    accept_invites: bool,
    think: Duration,
    invites: Mutex<Vec<String>>,
    turns: Mutex<Vec<GameNextTurn>>,
    result: watch::Sender<Option<GameOver>>,
}

impl Player {
    pub fn new(name: &str, accept_invites: bool) -> Arc<Self> {
        Self::with_think_time(name, accept_invites, Duration::ZERO)
    }

    pub fn with_think_time(name: &str, accept_invites: bool, think: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            accept_invites,
            think,
            invites: Mutex::new(Vec::new()),
            turns: Mutex::new(Vec::new()),
            result: watch::channel(None).0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Who has invited this player so far.
    pub fn invites(&self) -> Vec<String> {
        self.invites.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn turns(&self) -> Vec<GameNextTurn> {
        self.turns.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Resolves with the final result once the lobby reports it.
    pub async fn final_result(&self) -> GameOver {
        let mut result = self.result.subscribe();
        loop {
            if let Some(over) = result.borrow_and_update().clone() {
                return over;
            }
            // The sender lives in `self`, so this only returns Ok.
            let _ = result.changed().await;
        }
    }
}

impl GameService for Player {
    fn invite_requested<'a>(&'a self, from: &'a str, cancel: CancellationToken) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            tracing::info!(player = %self.name, from, "invite received");
            self.invites
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(from.to_string());
            tokio::select! {
                () = tokio::time::sleep(self.think) => self.accept_invites,
                () = cancel.cancelled() => false,
            }
        })
    }

    fn next_turn(&self, turn: GameNextTurn) {
        tracing::info!(
            player = %self.name,
            game_id = turn.game_id,
            score1 = turn.score1,
            score2 = turn.score2,
            "next turn"
        );
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(turn);
    }

    fn game_over(&self, over: GameOver) {
        tracing::info!(player = %self.name, game_id = over.game_id, winner = ?over.winner, "game over");
        self.result.send_replace(Some(over));
    }
}

/// A client builder wired to `player`.
pub fn client(player: Arc<Player>) -> Result<duel::DuelClientBuilder, DuelError> {
    DuelClient::builder()
        .service::<dyn GameService>(player)
        .route("game", GameController::new)
}
