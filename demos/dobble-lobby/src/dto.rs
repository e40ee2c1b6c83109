//! Request bodies and the address + verb each one travels under.

use duel::prelude::Method;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Login {
    pub user_name: String,
}

/// Sent to the lobby: the player to invite. Forwarded to that player:
/// the player who is inviting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameInvite {
    pub opponent_user_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameInviteUserResponse {
    pub accepted: bool,
}

/// One Dobble card: eight symbol ids.
pub type Card = [u8; 8];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameNextTurn {
    pub game_id: u64,
    pub player1: String,
    pub score1: u32,
    pub player2: String,
    pub score2: u32,
    pub cards: Vec<Card>,
    pub previous_turn_winner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOver {
    pub game_id: u64,
    pub winner: Option<String>,
    pub player1: String,
    pub score1: u32,
    pub player2: String,
    pub score2: u32,
}

// Server routes.

pub struct LobbyLogin;

impl Method for LobbyLogin {
    const ADDRESS: &'static str = "lobby";
    const VERB: &'static str = "login";
    type Body = Login;
    type Reply = ();
}

pub struct LobbyInvite;

impl Method for LobbyInvite {
    const ADDRESS: &'static str = "lobby";
    const VERB: &'static str = "invite";
    type Body = GameInvite;
    type Reply = GameInviteUserResponse;
}

// Client routes.

pub struct InvitePlayer;

impl Method for InvitePlayer {
    const ADDRESS: &'static str = "game";
    const VERB: &'static str = "invite";
    type Body = GameInvite;
    type Reply = GameInviteUserResponse;
}

pub struct NextTurn;

impl Method for NextTurn {
    const ADDRESS: &'static str = "game";
    const VERB: &'static str = "nextTurn";
    type Body = GameNextTurn;
    type Reply = ();
}

pub struct EndGame;

impl Method for EndGame {
    const ADDRESS: &'static str = "game";
    const VERB: &'static str = "gameOver";
    type Body = GameOver;
    type Reply = ();
}
