//! Tick Subsystem
//!
//! Periodic work and its broadcast path. The dispatcher owns the
//! registry of processors a game module installs; the scheduler runs one
//! compensated loop per registered kind.

pub mod dispatcher;
pub mod scheduler;

use serde::{Deserialize, Serialize};

pub use dispatcher::{TickDispatcher, TickHooks};
pub use scheduler::TickScheduler;

/// The fixed enumeration of periodic work categories. The wire protocol
/// encodes the discriminant as a little-endian `i32` in every tick
/// datagram, so these values are frozen. Diagnostic output (the status
/// snapshot) serializes the kind by name instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum TickKind {
    /// Player movement integration.
    Movement = 0,
    /// Chat and system messaging.
    Messaging = 1,
    /// Spawning of world objects.
    ObjectSpawning = 2,
    /// Reaping of expired world objects.
    ObjectCleanup = 3,
    /// Combat resolution.
    Combat = 4,
    /// Background world simulation.
    WorldSimulation = 5,
    /// Periodic state persistence hook.
    AutoSave = 6,
}

impl TickKind {
    /// Every kind, in wire order.
    pub const ALL: [TickKind; 7] = [
        TickKind::Movement,
        TickKind::Messaging,
        TickKind::ObjectSpawning,
        TickKind::ObjectCleanup,
        TickKind::Combat,
        TickKind::WorldSimulation,
        TickKind::AutoSave,
    ];

    /// The `i32` value this kind encodes to on the wire.
    pub fn wire_value(self) -> i32 {
        self as i32
    }

    /// Decode a wire value back to a kind.
    pub fn from_wire(value: i32) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.wire_value() == value)
    }
}

impl std::fmt::Display for TickKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TickKind::Movement => "movement",
            TickKind::Messaging => "messaging",
            TickKind::ObjectSpawning => "object_spawning",
            TickKind::ObjectCleanup => "object_cleanup",
            TickKind::Combat => "combat",
            TickKind::WorldSimulation => "world_simulation",
            TickKind::AutoSave => "auto_save",
        };
        f.write_str(name)
    }
}
