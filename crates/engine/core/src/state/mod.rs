//! Game state tree.
//!
//! The tree is plain JSON split into a shared `game` section and a
//! per-player `players` section. Each level carries required bookkeeping
//! fields seeded by [`StateTree::new_game`]. Mutation happens only through
//! [`crate::mutation::apply_operations`], which works on a private clone;
//! callers only ever see shared references.

pub mod path;

use serde_json::{Map, Value};

/// Identifier of a player inside a game instance.
pub type PlayerId = String;

/// JSON keys of the sections and bookkeeping fields.
pub mod fields {
    pub const GAME: &str = "game";
    pub const PLAYERS: &str = "players";

    pub const GAME_ENDED: &str = "gameEnded";
    pub const PUBLIC_MESSAGE: &str = "publicMessage";

    pub const ILLEGAL_ACTION_COUNT: &str = "illegalActionCount";
    pub const PRIVATE_MESSAGE: &str = "privateMessage";
    pub const ACTIONS_ALLOWED: &str = "actionsAllowed";
    pub const ACTION_REQUIRED: &str = "actionRequired";

    /// Bookkeeping fields required on the `game` section.
    pub const GAME_REQUIRED: [&str; 2] = [GAME_ENDED, PUBLIC_MESSAGE];

    /// Bookkeeping fields required on every player record.
    pub const PLAYER_REQUIRED: [&str; 4] = [
        ILLEGAL_ACTION_COUNT,
        PRIVATE_MESSAGE,
        ACTIONS_ALLOWED,
        ACTION_REQUIRED,
    ];
}

/// Error raised when a value cannot be used as a state tree root.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("state tree root must be an object, got {found}")]
pub struct StateShapeError {
    pub found: &'static str,
}

/// Nested mapping of named fields, the authoritative state of one game.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct StateTree(Map<String, Value>);

impl StateTree {
    /// Creates an empty tree (no sections, no bookkeeping).
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Creates a tree with the `game` and `players` sections and all required
    /// bookkeeping fields at their defaults.
    pub fn new_game<I, S>(player_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<PlayerId>,
    {
        let mut game = Map::new();
        game.insert(fields::GAME_ENDED.into(), Value::Bool(false));
        game.insert(fields::PUBLIC_MESSAGE.into(), Value::String(String::new()));

        let players = player_ids
            .into_iter()
            .map(|id| (id.into(), Value::Object(Self::player_defaults())))
            .collect::<Map<_, _>>();

        let mut root = Map::new();
        root.insert(fields::GAME.into(), Value::Object(game));
        root.insert(fields::PLAYERS.into(), Value::Object(players));
        Self(root)
    }

    /// Default bookkeeping record for a newly joined player.
    pub fn player_defaults() -> Map<String, Value> {
        let mut player = Map::new();
        player.insert(fields::ILLEGAL_ACTION_COUNT.into(), Value::from(0));
        player.insert(fields::PRIVATE_MESSAGE.into(), Value::String(String::new()));
        player.insert(fields::ACTIONS_ALLOWED.into(), Value::Bool(true));
        player.insert(fields::ACTION_REQUIRED.into(), Value::Bool(false));
        player
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn from_value(value: Value) -> Result<Self, StateShapeError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(StateShapeError {
                found: value_kind(&other),
            }),
        }
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        path::get(&self.0, path)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub(crate) fn as_map_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn game(&self) -> Option<&Map<String, Value>> {
        self.0.get(fields::GAME).and_then(Value::as_object)
    }

    pub fn players(&self) -> Option<&Map<String, Value>> {
        self.0.get(fields::PLAYERS).and_then(Value::as_object)
    }

    pub fn player(&self, id: &str) -> Option<&Map<String, Value>> {
        self.players()?.get(id).and_then(Value::as_object)
    }

    pub fn player_ids(&self) -> Vec<&str> {
        self.players()
            .map(|players| players.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn is_game_ended(&self) -> bool {
        self.game()
            .and_then(|game| game.get(fields::GAME_ENDED))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Lists required bookkeeping fields that are absent, as dotted paths.
    pub fn missing_bookkeeping(&self) -> Vec<String> {
        let mut missing = Vec::new();

        match self.game() {
            Some(game) => missing.extend(
                fields::GAME_REQUIRED
                    .iter()
                    .filter(|field| !game.contains_key(**field))
                    .map(|field| format!("{}.{field}", fields::GAME)),
            ),
            None => missing.push(fields::GAME.to_owned()),
        }

        match self.players() {
            Some(players) => {
                for (id, record) in players {
                    let record = record.as_object();
                    missing.extend(
                        fields::PLAYER_REQUIRED
                            .iter()
                            .filter(|field| record.is_none_or(|r| !r.contains_key(**field)))
                            .map(|field| format!("{}.{id}.{field}", fields::PLAYERS)),
                    );
                }
            }
            None => missing.push(fields::PLAYERS.to_owned()),
        }

        missing
    }
}

impl From<Map<String, Value>> for StateTree {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Short type name of a JSON value, for diagnostics.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
