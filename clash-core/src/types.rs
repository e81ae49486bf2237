use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

/// Opaque, stable player identifier issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PlayerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Team identifier. Team ids are contiguous and start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamId(u32);

impl TeamId {
    pub const FIRST: TeamId = TeamId(1);

    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whole token amount.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Tokens(u64);

impl Tokens {
    pub const ZERO: Tokens = Tokens(0);

    pub const fn new(amount: u64) -> Self {
        Self(amount)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, rhs: Tokens) -> Option<Tokens> {
        self.0.checked_add(rhs.0).map(Tokens)
    }

    pub fn checked_sub(self, rhs: Tokens) -> Option<Tokens> {
        self.0.checked_sub(rhs.0).map(Tokens)
    }

    pub fn saturating_sub(self, rhs: Tokens) -> Tokens {
        Tokens(self.0.saturating_sub(rhs.0))
    }

    /// `self * numerator / denominator`, floored. Returns zero when the
    /// denominator is zero.
    pub fn mul_div(self, numerator: Tokens, denominator: Tokens) -> Tokens {
        if denominator.0 == 0 {
            return Tokens::ZERO;
        }
        let value = u128::from(self.0) * u128::from(numerator.0) / u128::from(denominator.0);
        Tokens(u64::try_from(value).unwrap_or(u64::MAX))
    }
}

impl Add for Tokens {
    type Output = Tokens;

    fn add(self, rhs: Tokens) -> Tokens {
        Tokens(self.0.saturating_add(rhs.0))
    }
}

impl std::iter::Sum for Tokens {
    fn sum<I: Iterator<Item = Tokens>>(iter: I) -> Tokens {
        iter.fold(Tokens::ZERO, |acc, t| acc + t)
    }
}

impl fmt::Display for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a lobby record held by the matchmaking backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LobbyId(String);

impl LobbyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LobbyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Local mirror of a remote lobby record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyDescriptor {
    pub id: LobbyId,
    pub name: String,
    pub host: PlayerId,
    /// Players in join order as reported by the backend.
    pub players: Vec<PlayerId>,
    pub capacity: usize,
    /// Free-form data blob; carries the encoded roster once teams are set.
    pub data: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LobbyDescriptor {
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn available_slots(&self) -> usize {
        self.capacity.saturating_sub(self.players.len())
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.capacity
    }

    pub fn is_host(&self, player: &PlayerId) -> bool {
        &self.host == player
    }
}

/// Metadata supplied when creating a lobby.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyMetadata {
    pub name: String,
    pub is_private: bool,
    pub data: Option<String>,
}

/// Result of a quick-join request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuickJoin {
    Joined(LobbyDescriptor),
    NoOpenLobbies,
}
