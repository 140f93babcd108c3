//! The four ingested entity collections

use serde::{Deserialize, Serialize};

/// One of the four upstream collections. Fixed, closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Users,
    Carts,
    Posts,
    Todos,
}

impl EntityKind {
    /// All entities, in the order the pipelines are reported.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Users,
        EntityKind::Carts,
        EntityKind::Posts,
        EntityKind::Todos,
    ];

    /// Plural collection name; doubles as the API endpoint path and the
    /// top-level key of the fetch response body.
    pub fn plural(&self) -> &'static str {
        match self {
            EntityKind::Users => "users",
            EntityKind::Carts => "carts",
            EntityKind::Posts => "posts",
            EntityKind::Todos => "todos",
        }
    }

    /// Append-only warehouse table for this entity.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Users => "raw_users",
            EntityKind::Carts => "raw_carts",
            EntityKind::Posts => "raw_posts",
            EntityKind::Todos => "raw_todos",
        }
    }

    /// Local snapshot file name, one per entity per run.
    pub fn snapshot_file_name(&self) -> String {
        format!("{}.json", self.plural())
    }

    /// Staging object key, fixed per entity so reruns overwrite.
    pub fn staging_key(&self) -> String {
        format!("output/{}.json", self.plural())
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.plural())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "users" => Ok(EntityKind::Users),
            "carts" => Ok(EntityKind::Carts),
            "posts" => Ok(EntityKind::Posts),
            "todos" => Ok(EntityKind::Todos),
            _ => Err(format!("unknown entity: {}", s)),
        }
    }
}
