//! Saved servers and demo datasets
//!
//! Known servers come from configuration. A server carrying a `demo_id`
//! is a demo: reconnecting to it after an engine reset replays the demo's
//! schema and sample data.

use crate::session::ConnectionMode;
use serde::{Deserialize, Serialize};

/// A server the user has saved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedServer {
    /// Stable reference stored in the session
    pub id: String,
    /// Display name
    pub name: String,
    /// Embedded or remote
    pub mode: ConnectionMode,
    /// Remote address, if remote
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Demo dataset backing this server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demo_id: Option<String>,
}

impl SavedServer {
    /// Whether this server is backed by a demo dataset
    pub fn is_demo(&self) -> bool {
        self.demo_id.is_some()
    }

    /// Whether this server runs on the in-process engine
    pub fn is_local(&self) -> bool {
        self.mode == ConnectionMode::Embedded
    }
}

/// Schema and sample data for a demo server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoDefinition {
    /// Demo id, also used as the database name
    pub id: String,
    /// Display name
    pub name: String,
    /// Schema definition, run as one schema query
    pub schema: String,
    /// Sample data statements, run one by one
    pub sample_data: Vec<String>,
}

/// Registry of saved servers and available demos
#[derive(Debug, Clone, Default)]
pub struct ServerRegistry {
    servers: Vec<SavedServer>,
    demos: Vec<DemoDefinition>,
}

impl ServerRegistry {
    /// Registry over the given servers with the built-in demos
    pub fn new(servers: Vec<SavedServer>) -> Self {
        Self {
            servers,
            demos: builtin_demos(),
        }
    }

    /// Add or replace a demo
    pub fn with_demo(mut self, demo: DemoDefinition) -> Self {
        self.demos.retain(|d| d.id != demo.id);
        self.demos.push(demo);
        self
    }

    /// Look up a saved server
    pub fn get(&self, id: &str) -> Option<&SavedServer> {
        self.servers.iter().find(|s| s.id == id)
    }

    /// Look up a demo
    pub fn demo(&self, id: &str) -> Option<&DemoDefinition> {
        self.demos.iter().find(|d| d.id == id)
    }

    /// All saved servers
    pub fn servers(&self) -> &[SavedServer] {
        &self.servers
    }

    /// Demo backing a saved server, if any
    pub fn demo_for(&self, server: &SavedServer) -> Option<&DemoDefinition> {
        server.demo_id.as_deref().and_then(|id| self.demo(id))
    }
}

/// Servers present in a fresh configuration
pub fn default_servers() -> Vec<SavedServer> {
    vec![
        SavedServer {
            id: "local".to_string(),
            name: "Local engine".to_string(),
            mode: ConnectionMode::Embedded,
            address: None,
            demo_id: None,
        },
        SavedServer {
            id: "demo-social-network".to_string(),
            name: "Social network demo".to_string(),
            mode: ConnectionMode::Embedded,
            address: None,
            demo_id: Some(SOCIAL_NETWORK_DEMO.to_string()),
        },
    ]
}

/// Id of the built-in social network demo
pub const SOCIAL_NETWORK_DEMO: &str = "social-network";

/// Demos shipped with the studio
pub fn builtin_demos() -> Vec<DemoDefinition> {
    vec![DemoDefinition {
        id: SOCIAL_NETWORK_DEMO.to_string(),
        name: "Social network".to_string(),
        schema: r#"define
  attribute name value string;
  attribute email value string;
  attribute since value date;
  entity person, owns name, owns email, plays friendship:friend;
  relation friendship, relates friend, owns since;"#
            .to_string(),
        sample_data: vec![
            r#"insert $p isa person, has name "Alice", has email "alice@example.com";"#.to_string(),
            r#"insert $p isa person, has name "Bob", has email "bob@example.com";"#.to_string(),
            r#"insert $p isa person, has name "Charlie";"#.to_string(),
            r#"match $a isa person, has name "Alice"; $b isa person, has name "Bob"; insert $f isa friendship, links (friend: $a, friend: $b), has since 2021-05-04;"#.to_string(),
        ],
    }]
}
