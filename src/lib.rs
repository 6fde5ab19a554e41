//! warden - chat-driven operations for a game-server fleet.
//!
//! Commands arriving over the chat webhook are dispatched to three kinds of
//! work: ordered shell/git sequences ([`task`], [`branch`], [`fleet`]), calls
//! on the game service's private TCP protocol ([`game`]), and synchronization
//! of the secondary "patcher" file host over an encrypted HTTP channel
//! ([`patcher`]).

pub mod branch;
pub mod config;
pub mod crypto;
pub mod fleet;
pub mod game;
pub mod notify;
pub mod patcher;
pub mod task;
pub mod web;
