//! # Core Type Definitions
//!
//! Fundamental types for the home registry: owner identifiers, world
//! locations, and the `Home` value itself.
//!
//! ## Design Principles
//!
//! - **Type Safety**: `OwnerId` wraps a UUID so owner identifiers cannot be
//!   confused with other IDs in the host server.
//! - **Value Semantics**: a `Home` is an immutable value; updates replace it
//!   wholesale, so readers never observe a partially mutated home.
//! - **Serialization**: all types derive serde support so the host can ship
//!   them over whatever wire format it uses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for the player that owns a set of homes.
///
/// This is a wrapper around UUID that provides type safety and ensures
/// owner IDs cannot be confused with other kinds of IDs in the system.
///
/// # Examples
///
/// ```rust
/// use hearth_registry::OwnerId;
///
/// // Create a new random owner ID
/// let owner = OwnerId::new();
///
/// // Parse from string
/// let owner = OwnerId::from_str("550e8400-e29b-41d4-a716-446655440000")?;
///
/// println!("Owner: {}", owner);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub Uuid);

impl OwnerId {
    /// Creates a new random owner ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses an owner ID from a string representation.
    ///
    /// # Arguments
    ///
    /// * `s` - A string slice containing a valid UUID
    ///
    /// # Returns
    ///
    /// `Ok(OwnerId)` if the string is a valid UUID, otherwise the underlying
    /// `uuid::Error`.
    pub fn from_str(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::str::FromStr for OwnerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str(s)
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A saved position in a game world.
///
/// Coordinates use double precision for accurate positioning in large
/// worlds; yaw/pitch use single precision, matching what game engines
/// typically provide for view orientation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Identifier of the world this location belongs to
    pub world: String,
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
    /// Z coordinate
    pub z: f64,
    /// Horizontal view rotation in degrees
    pub yaw: f32,
    /// Vertical view rotation in degrees
    pub pitch: f32,
}

impl Location {
    /// Creates a location with zeroed orientation.
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
        }
    }
}

/// A named saved location owned by one player.
///
/// Identity is the `(OwnerId, name)` pair with the name compared
/// case-insensitively; [`Home::key`] yields the canonical lowercase form
/// used for lookups and store-level uniqueness. A `Home` is immutable once
/// constructed - setting a home with an existing name replaces the whole
/// value, so concurrent readers never see a half-updated home.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Home {
    /// Home name as the player typed it (display form)
    pub name: String,
    /// The saved position and orientation
    pub location: Location,
    /// When this home was first created (UTC, millisecond precision)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Home {
    /// Creates a new home stamped with the current time.
    pub fn new(name: impl Into<String>, location: Location) -> Self {
        Self {
            name: name.into(),
            location,
            created_at: Utc::now(),
        }
    }

    /// Canonical lowercase lookup key for this home's name.
    pub fn key(&self) -> String {
        self.name.to_lowercase()
    }
}
