//! Identifiers and the identity record shared by clients and the server.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque user identifier.
///
/// Any non-null JSON scalar is accepted. The original value is kept for the
/// wire, while equality, hashing and ordering use a canonical key so `7`,
/// `7.0` and `"7"` name the same user.
#[derive(Debug, Clone)]
pub struct UserId {
    key: String,
    raw: Value,
}

impl UserId {
    /// Create a string user ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let key = id.into();
        Self {
            raw: Value::String(key.clone()),
            key,
        }
    }

    /// Build a user ID from a JSON value.
    ///
    /// Returns `None` for null, arrays and objects.
    #[must_use]
    pub fn from_value(raw: Value) -> Option<Self> {
        let key = match &raw {
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => canonical_number(n),
            Value::Null | Value::Array(_) | Value::Object(_) => return None,
        };
        Some(Self { key, raw })
    }

    /// Get the canonical key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Get the value as it appeared on the wire.
    #[must_use]
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

/// Integral numbers, including floats like `7.0`, share the integer key.
fn canonical_number(n: &serde_json::Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 => {
            format!("{}", f as i64)
        }
        _ => n.to_string(),
    }
}

impl PartialEq for UserId {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for UserId {}

impl Hash for UserId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for UserId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for UserId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

impl Serialize for UserId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        Self::from_value(raw)
            .ok_or_else(|| D::Error::custom("user ID must be a non-null JSON scalar"))
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<u64> for UserId {
    fn from(n: u64) -> Self {
        Self {
            key: n.to_string(),
            raw: Value::from(n),
        }
    }
}

/// Counter backing [`ConnectionId::next`].
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identifier of a live transport connection, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw connection number.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocate the next connection ID.
    #[must_use]
    pub fn next() -> Self {
        Self(CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw connection number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// A user record as returned by identity lookup.
///
/// Anything besides `id` and `username` is carried in `attributes` and
/// serialised flat next to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// User ID.
    pub id: UserId,
    /// Display name.
    pub username: String,
    /// Remaining fields of the record.
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Identity {
    /// Create an identity with no extra attributes.
    #[must_use]
    pub fn new(id: impl Into<UserId>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            attributes: Map::new(),
        }
    }

    /// Add an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Get an attribute by name.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}
