use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Liveness of a room that still exists
///
/// A room is created Live on its first join and can only move to Draining
/// (the live session was explicitly ended). Destroyed rooms are simply
/// absent from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Live,
    Draining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MemberFlags {
    is_host: bool,
    is_speaker: bool,
}

struct Room {
    members: BTreeMap<String, MemberFlags>,
    lifecycle: Lifecycle,
    episode_id: Option<String>,
    screen_sharer: Option<String>,
    created_at: DateTime<Utc>,
}

impl Room {
    fn new() -> Self {
        Self {
            members: BTreeMap::new(),
            lifecycle: Lifecycle::Live,
            episode_id: None,
            screen_sharer: None,
            created_at: Utc::now(),
        }
    }

    fn presence(&self) -> PresenceSnapshot {
        let members = self
            .members
            .iter()
            .map(|(client_id, flags)| PresenceEntry {
                client_id: client_id.clone(),
                is_host: flags.is_host,
                is_speaker: flags.is_speaker,
                is_screen_sharing: self.screen_sharer.as_deref() == Some(client_id.as_str()),
            })
            .collect();

        PresenceSnapshot {
            members,
            screen_sharer: self.screen_sharer.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub client_id: String,
    pub is_host: bool,
    pub is_speaker: bool,
    pub is_screen_sharing: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    pub members: Vec<PresenceEntry>,
    pub screen_sharer: Option<String>,
}

impl PresenceSnapshot {
    pub fn member(&self, client_id: &str) -> Option<&PresenceEntry> {
        self.members.iter().find(|m| m.client_id == client_id)
    }
}

/// Point-in-time view of a room for status queries
#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub lifecycle: Lifecycle,
    pub episode_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub presence: PresenceSnapshot,
}

/// Handed out exactly once per room lifetime by `take_for_teardown`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownTicket {
    pub room_id: String,
    pub episode_id: Option<String>,
}

/// Membership and presence metadata for every room
///
/// Holds client ids and presence flags only; outbound handles belong to the
/// connection manager. All mutators are no-ops on unknown ids.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
    client_rooms: HashMap<String, String>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `client_id` to `room_id`, creating the room if unseen.
    ///
    /// A client already in another room is moved out of it first.
    pub fn join(&mut self, room_id: &str, client_id: &str, is_host: bool) -> PresenceSnapshot {
        if let Some(previous) = self.client_rooms.get(client_id).cloned() {
            if previous != room_id {
                debug!("Client {} moving from {} to {}", client_id, previous, room_id);
                self.leave(&previous, client_id);
            }
        }

        let room = self.rooms.entry(room_id.to_string()).or_insert_with(|| {
            info!("Room {} created", room_id);
            Room::new()
        });

        room.members.insert(
            client_id.to_string(),
            MemberFlags {
                is_host,
                is_speaker: is_host,
            },
        );
        self.client_rooms
            .insert(client_id.to_string(), room_id.to_string());

        room.presence()
    }

    /// Remove `client_id`; returns whether the room is now empty.
    ///
    /// Unknown rooms report `false` and unknown clients change nothing.
    pub fn leave(&mut self, room_id: &str, client_id: &str) -> bool {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return false;
        };

        if room.members.remove(client_id).is_some()
            && self.client_rooms.get(client_id).map(String::as_str) == Some(room_id)
        {
            self.client_rooms.remove(client_id);
        }
        if room.screen_sharer.as_deref() == Some(client_id) {
            room.screen_sharer = None;
        }

        room.members.is_empty()
    }

    /// Set a member's speaker flag within `room_id`; returns whether the
    /// client was a member there and the flag was applied.
    pub fn set_speaker(&mut self, room_id: &str, client_id: &str, is_speaker: bool) -> bool {
        match self
            .rooms
            .get_mut(room_id)
            .and_then(|room| room.members.get_mut(client_id))
        {
            Some(flags) => {
                flags.is_speaker = is_speaker;
                true
            }
            None => false,
        }
    }

    /// Point the room's screen share at a member, or clear it with `None`.
    /// Non-members are ignored.
    pub fn set_screen_sharer(&mut self, room_id: &str, client_id: Option<&str>) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        match client_id {
            Some(client_id) if room.members.contains_key(client_id) => {
                room.screen_sharer = Some(client_id.to_string());
            }
            Some(_) => {}
            None => room.screen_sharer = None,
        }
    }

    /// Set-once: later calls with a different id are ignored
    pub fn associate_episode(&mut self, room_id: &str, episode_id: &str) {
        if let Some(room) = self.rooms.get_mut(room_id) {
            if room.episode_id.is_none() {
                info!("Room {} associated with episode {}", room_id, episode_id);
                room.episode_id = Some(episode_id.to_string());
            }
        }
    }

    pub fn is_live(&self, room_id: &str) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|room| room.lifecycle == Lifecycle::Live)
    }

    /// Only Live → Draining is honoured; an ended room never goes live again
    pub fn mark_live(&mut self, room_id: &str, live: bool) {
        if let Some(room) = self.rooms.get_mut(room_id) {
            if !live && room.lifecycle == Lifecycle::Live {
                info!("Room {} draining", room_id);
                room.lifecycle = Lifecycle::Draining;
            }
        }
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn room_of(&self, client_id: &str) -> Option<&str> {
        self.client_rooms.get(client_id).map(String::as_str)
    }

    pub fn members(&self, room_id: &str) -> Vec<String> {
        self.rooms
            .get(room_id)
            .map(|room| room.members.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn presence(&self, room_id: &str) -> Option<PresenceSnapshot> {
        self.rooms.get(room_id).map(Room::presence)
    }

    pub fn episode_id(&self, room_id: &str) -> Option<String> {
        self.rooms.get(room_id).and_then(|room| room.episode_id.clone())
    }

    pub fn screen_sharer(&self, room_id: &str) -> Option<String> {
        self.rooms
            .get(room_id)
            .and_then(|room| room.screen_sharer.clone())
    }

    pub fn is_host(&self, room_id: &str, client_id: &str) -> bool {
        self.rooms
            .get(room_id)
            .and_then(|room| room.members.get(client_id))
            .is_some_and(|flags| flags.is_host)
    }

    pub fn snapshot(&self, room_id: &str) -> Option<RoomSnapshot> {
        self.rooms.get(room_id).map(|room| RoomSnapshot {
            room_id: room_id.to_string(),
            lifecycle: room.lifecycle,
            episode_id: room.episode_id.clone(),
            created_at: room.created_at,
            presence: room.presence(),
        })
    }

    pub fn room_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rooms.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Remove an empty room, handing back what teardown needs.
    ///
    /// Returns `None` for unknown (already torn down) or non-empty rooms, so
    /// at most one caller ever receives a ticket for a given room lifetime.
    pub fn take_for_teardown(&mut self, room_id: &str) -> Option<TeardownTicket> {
        if !self.rooms.get(room_id)?.members.is_empty() {
            return None;
        }
        let room = self.rooms.remove(room_id)?;
        info!("Room {} destroyed", room_id);

        Some(TeardownTicket {
            room_id: room_id.to_string(),
            episode_id: room.episode_id,
        })
    }
}
