use std::{fmt, str::FromStr};

use uuid::Uuid;

use crate::Error;

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct WorkspaceId(pub Uuid);

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct EntityId(pub Uuid);

/// Kind of object a discussion thread is attached to
#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Task,
    Project,
    Workspace,
    CalendarEvent,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Task => "task",
            EntityType::Project => "project",
            EntityType::Workspace => "workspace",
            EntityType::CalendarEvent => "calendar_event",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<EntityType, Error> {
        match s {
            "task" => Ok(EntityType::Task),
            "project" => Ok(EntityType::Project),
            "workspace" => Ok(EntityType::Workspace),
            "calendar_event" => Ok(EntityType::CalendarEvent),
            _ => Err(Error::InvalidInput(format!("unknown entity type {s:?}"))),
        }
    }
}

/// Identifies one discussion thread
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ThreadKey {
    pub workspace_id: WorkspaceId,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
}

impl ThreadKey {
    pub fn new(workspace_id: WorkspaceId, entity_type: EntityType, entity_id: EntityId) -> Self {
        ThreadKey {
            workspace_id,
            entity_type,
            entity_id,
        }
    }

    /// Name of the realtime channel carrying this thread's notifications
    pub fn channel_name(&self) -> String {
        format!("comments:{}:{}", self.entity_type, self.entity_id.0)
    }
}
