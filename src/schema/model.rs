//! Schema data structures
//!
//! This module defines the typed catalog of a graph database schema:
//! entity, relation and attribute types with their ownerships, roles and
//! value types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityType {
    /// Type label
    pub label: String,
    /// Whether instances may not be created directly
    pub is_abstract: bool,
    /// Direct supertype label, if not a root type
    pub supertype: Option<String>,
    /// Attribute types this entity owns
    pub owned_attributes: Vec<String>,
    /// Roles (`relation:role`) this entity plays
    pub played_roles: Vec<String>,
}

impl EntityType {
    /// Create a new concrete entity type
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            is_abstract: false,
            supertype: None,
            owned_attributes: Vec::new(),
            played_roles: Vec::new(),
        }
    }
}

/// A relation type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationType {
    /// Type label
    pub label: String,
    /// Whether instances may not be created directly
    pub is_abstract: bool,
    /// Direct supertype label, if not a root type
    pub supertype: Option<String>,
    /// Role names this relation relates
    pub related_roles: Vec<String>,
    /// Attribute types this relation owns
    pub owned_attributes: Vec<String>,
    /// Roles this relation plays in other relations
    pub played_roles: Vec<String>,
}

impl RelationType {
    /// Create a new concrete relation type
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            is_abstract: false,
            supertype: None,
            related_roles: Vec::new(),
            owned_attributes: Vec::new(),
            played_roles: Vec::new(),
        }
    }
}

/// An attribute type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeType {
    /// Type label
    pub label: String,
    /// Whether instances may not be created directly
    pub is_abstract: bool,
    /// Direct supertype label, if not a root type
    pub supertype: Option<String>,
    /// Value type (e.g. "string", "integer"), when declared
    pub value_type: Option<String>,
}

impl AttributeType {
    /// Create a new attribute type without a value type
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            is_abstract: false,
            supertype: None,
            value_type: None,
        }
    }
}

/// Complete schema of one database
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaCatalog {
    /// Database this catalog describes
    pub database: Option<String>,
    /// Entity types, sorted by label
    pub entities: Vec<EntityType>,
    /// Relation types, sorted by label
    pub relations: Vec<RelationType>,
    /// Attribute types, sorted by label
    pub attributes: Vec<AttributeType>,
    /// When this catalog was fetched
    pub synced_at: Option<DateTime<Utc>>,
}

impl SchemaCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no types are known
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty() && self.attributes.is_empty()
    }

    /// Sort every type list by label for deterministic display
    pub fn sort(&mut self) {
        self.entities.sort_by(|a, b| a.label.cmp(&b.label));
        self.relations.sort_by(|a, b| a.label.cmp(&b.label));
        self.attributes.sort_by(|a, b| a.label.cmp(&b.label));
    }

    /// Get an entity type by label
    pub fn entity(&self, label: &str) -> Option<&EntityType> {
        self.entities.iter().find(|e| e.label == label)
    }

    /// Get a relation type by label
    pub fn relation(&self, label: &str) -> Option<&RelationType> {
        self.relations.iter().find(|r| r.label == label)
    }

    /// Get an attribute type by label
    pub fn attribute(&self, label: &str) -> Option<&AttributeType> {
        self.attributes.iter().find(|a| a.label == label)
    }

    /// Direct supertype of any type
    pub fn supertype_of(&self, label: &str) -> Option<&str> {
        self.entity(label)
            .and_then(|e| e.supertype.as_deref())
            .or_else(|| self.relation(label).and_then(|r| r.supertype.as_deref()))
            .or_else(|| self.attribute(label).and_then(|a| a.supertype.as_deref()))
    }

    /// Whether `label` is `ancestor` or one of its subtypes
    ///
    /// `thing` is the supertype of everything.
    pub fn is_subtype_of(&self, label: &str, ancestor: &str) -> bool {
        if ancestor == "thing" {
            return true;
        }
        let mut current = Some(label);
        let mut hops = 0;
        while let Some(l) = current {
            if l == ancestor {
                return true;
            }
            hops += 1;
            if hops > self.entities.len() + self.relations.len() + self.attributes.len() {
                return false;
            }
            current = self.supertype_of(l);
        }
        false
    }

    /// Format the schema as a readable tree
    pub fn format_tree(&self) -> String {
        let mut result = String::new();

        if let Some(ref db) = self.database {
            result.push_str(&format!("Database: {}\n", db));
        }
        result.push_str(&format!(
            "Contains {} entities, {} relations and {} attributes\n",
            self.entities.len(),
            self.relations.len(),
            self.attributes.len()
        ));

        if !self.entities.is_empty() {
            result.push_str("\nEntities:\n");
            for entity in &self.entities {
                result.push_str(&format!("  {}\n", entity));
            }
        }
        if !self.relations.is_empty() {
            result.push_str("\nRelations:\n");
            for relation in &self.relations {
                result.push_str(&format!("  {}\n", relation));
            }
        }
        if !self.attributes.is_empty() {
            result.push_str("\nAttributes:\n");
            for attribute in &self.attributes {
                result.push_str(&format!("  {}\n", attribute));
            }
        }

        result
    }
}

fn write_header(
    f: &mut fmt::Formatter<'_>,
    label: &str,
    is_abstract: bool,
    supertype: &Option<String>,
) -> fmt::Result {
    write!(f, "{}", label)?;
    if let Some(ref sup) = supertype {
        write!(f, " sub {}", sup)?;
    }
    if is_abstract {
        write!(f, " @abstract")?;
    }
    Ok(())
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_header(f, &self.label, self.is_abstract, &self.supertype)?;
        if !self.owned_attributes.is_empty() {
            write!(f, " owns [{}]", self.owned_attributes.join(", "))?;
        }
        if !self.played_roles.is_empty() {
            write!(f, " plays [{}]", self.played_roles.join(", "))?;
        }
        Ok(())
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_header(f, &self.label, self.is_abstract, &self.supertype)?;
        if !self.related_roles.is_empty() {
            write!(f, " relates [{}]", self.related_roles.join(", "))?;
        }
        if !self.owned_attributes.is_empty() {
            write!(f, " owns [{}]", self.owned_attributes.join(", "))?;
        }
        Ok(())
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_header(f, &self.label, self.is_abstract, &self.supertype)?;
        if let Some(ref value_type) = self.value_type {
            write!(f, " value {}", value_type)?;
        }
        Ok(())
    }
}

impl fmt::Display for SchemaCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_tree())
    }
}
