//! Entity and relationship types for the Synapse knowledge store.
//!
//! Nouns are typed, vectorized, metadata-bearing objects; verbs are typed
//! directed edges between them. Both vocabularies are closed: tags outside
//! the set are rejected at the boundary.

use crate::error::{Result, SynapseError};
use crate::id::SynapseId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Closed vocabulary of noun types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NounType {
    Person,
    Organization,
    Location,
    Event,
    Document,
    Product,
    Concept,
    Topic,
    Task,
    Project,
    Message,
    File,
    Dataset,
    Tool,
    Service,
    Skill,
    Language,
    Technology,
    Process,
    Metric,
    Goal,
    Report,
    Meeting,
    Contract,
    Account,
    Transaction,
    Resource,
    Category,
    Media,
    Note,
    Thing,
}

impl NounType {
    /// All noun types, in declaration order.
    pub const ALL: [NounType; 31] = [
        NounType::Person,
        NounType::Organization,
        NounType::Location,
        NounType::Event,
        NounType::Document,
        NounType::Product,
        NounType::Concept,
        NounType::Topic,
        NounType::Task,
        NounType::Project,
        NounType::Message,
        NounType::File,
        NounType::Dataset,
        NounType::Tool,
        NounType::Service,
        NounType::Skill,
        NounType::Language,
        NounType::Technology,
        NounType::Process,
        NounType::Metric,
        NounType::Goal,
        NounType::Report,
        NounType::Meeting,
        NounType::Contract,
        NounType::Account,
        NounType::Transaction,
        NounType::Resource,
        NounType::Category,
        NounType::Media,
        NounType::Note,
        NounType::Thing,
    ];

    /// Wire name of this type tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            NounType::Person => "Person",
            NounType::Organization => "Organization",
            NounType::Location => "Location",
            NounType::Event => "Event",
            NounType::Document => "Document",
            NounType::Product => "Product",
            NounType::Concept => "Concept",
            NounType::Topic => "Topic",
            NounType::Task => "Task",
            NounType::Project => "Project",
            NounType::Message => "Message",
            NounType::File => "File",
            NounType::Dataset => "Dataset",
            NounType::Tool => "Tool",
            NounType::Service => "Service",
            NounType::Skill => "Skill",
            NounType::Language => "Language",
            NounType::Technology => "Technology",
            NounType::Process => "Process",
            NounType::Metric => "Metric",
            NounType::Goal => "Goal",
            NounType::Report => "Report",
            NounType::Meeting => "Meeting",
            NounType::Contract => "Contract",
            NounType::Account => "Account",
            NounType::Transaction => "Transaction",
            NounType::Resource => "Resource",
            NounType::Category => "Category",
            NounType::Media => "Media",
            NounType::Note => "Note",
            NounType::Thing => "Thing",
        }
    }

    /// Parse a wire name; unknown tags are rejected.
    pub fn parse(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| SynapseError::invalid_input(format!("unknown noun type: {s}")))
    }
}

impl fmt::Display for NounType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed vocabulary of verb types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VerbType {
    RelatedTo,
    PartOf,
    Contains,
    CreatedBy,
    Created,
    OwnedBy,
    Owns,
    MemberOf,
    HasMember,
    LocatedIn,
    LocationOf,
    WorksAt,
    Employs,
    Knows,
    Manages,
    ReportsTo,
    ParticipatesIn,
    HasParticipant,
    Uses,
    UsedBy,
    Produces,
    ProducedBy,
    DependsOn,
    DependencyOf,
    References,
    ReferencedBy,
    Precedes,
    Follows,
    CauseOf,
    CausedBy,
    SimilarTo,
    OppositeOf,
    InstanceOf,
    TypeOf,
    DerivedFrom,
    SourceOf,
    AttachedTo,
    Tagged,
    Mentions,
    MentionedIn,
}

impl VerbType {
    /// All verb types, in declaration order.
    pub const ALL: [VerbType; 40] = [
        VerbType::RelatedTo,
        VerbType::PartOf,
        VerbType::Contains,
        VerbType::CreatedBy,
        VerbType::Created,
        VerbType::OwnedBy,
        VerbType::Owns,
        VerbType::MemberOf,
        VerbType::HasMember,
        VerbType::LocatedIn,
        VerbType::LocationOf,
        VerbType::WorksAt,
        VerbType::Employs,
        VerbType::Knows,
        VerbType::Manages,
        VerbType::ReportsTo,
        VerbType::ParticipatesIn,
        VerbType::HasParticipant,
        VerbType::Uses,
        VerbType::UsedBy,
        VerbType::Produces,
        VerbType::ProducedBy,
        VerbType::DependsOn,
        VerbType::DependencyOf,
        VerbType::References,
        VerbType::ReferencedBy,
        VerbType::Precedes,
        VerbType::Follows,
        VerbType::CauseOf,
        VerbType::CausedBy,
        VerbType::SimilarTo,
        VerbType::OppositeOf,
        VerbType::InstanceOf,
        VerbType::TypeOf,
        VerbType::DerivedFrom,
        VerbType::SourceOf,
        VerbType::AttachedTo,
        VerbType::Tagged,
        VerbType::Mentions,
        VerbType::MentionedIn,
    ];

    /// Wire name of this verb tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            VerbType::RelatedTo => "RelatedTo",
            VerbType::PartOf => "PartOf",
            VerbType::Contains => "Contains",
            VerbType::CreatedBy => "CreatedBy",
            VerbType::Created => "Created",
            VerbType::OwnedBy => "OwnedBy",
            VerbType::Owns => "Owns",
            VerbType::MemberOf => "MemberOf",
            VerbType::HasMember => "HasMember",
            VerbType::LocatedIn => "LocatedIn",
            VerbType::LocationOf => "LocationOf",
            VerbType::WorksAt => "WorksAt",
            VerbType::Employs => "Employs",
            VerbType::Knows => "Knows",
            VerbType::Manages => "Manages",
            VerbType::ReportsTo => "ReportsTo",
            VerbType::ParticipatesIn => "ParticipatesIn",
            VerbType::HasParticipant => "HasParticipant",
            VerbType::Uses => "Uses",
            VerbType::UsedBy => "UsedBy",
            VerbType::Produces => "Produces",
            VerbType::ProducedBy => "ProducedBy",
            VerbType::DependsOn => "DependsOn",
            VerbType::DependencyOf => "DependencyOf",
            VerbType::References => "References",
            VerbType::ReferencedBy => "ReferencedBy",
            VerbType::Precedes => "Precedes",
            VerbType::Follows => "Follows",
            VerbType::CauseOf => "CauseOf",
            VerbType::CausedBy => "CausedBy",
            VerbType::SimilarTo => "SimilarTo",
            VerbType::OppositeOf => "OppositeOf",
            VerbType::InstanceOf => "InstanceOf",
            VerbType::TypeOf => "TypeOf",
            VerbType::DerivedFrom => "DerivedFrom",
            VerbType::SourceOf => "SourceOf",
            VerbType::AttachedTo => "AttachedTo",
            VerbType::Tagged => "Tagged",
            VerbType::Mentions => "Mentions",
            VerbType::MentionedIn => "MentionedIn",
        }
    }

    /// Parse a wire name; unknown tags are rejected with `InvalidVerb`.
    pub fn parse(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| SynapseError::invalid_verb(s))
    }
}

impl fmt::Display for VerbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A noun: the unit of storage and retrieval.
///
/// The vector is empty unless the read requested it; default reads never
/// materialize vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Noun {
    pub id: SynapseId,
    #[serde(rename = "type")]
    pub noun_type: NounType,
    /// Display name, derived from the payload when not supplied
    pub name: String,
    /// Arbitrary key -> scalar/array/nested metadata
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// Dense embedding; empty when the read skipped the vector stream
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vector: Vec<f32>,
}

/// A verb: a directed labeled edge between two nouns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verb {
    pub id: SynapseId,
    pub source: SynapseId,
    pub target: SynapseId,
    pub verb: VerbType,
    /// Edge weight in [0, 1]
    pub weight: f32,
    /// Classifier confidence in [0, 1], when scored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Persisted vector + HNSW connection record (`nouns/{id}.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NounRecord {
    pub id: SynapseId,
    pub vector: Vec<f32>,
    /// Per-layer neighbor lists, keyed by layer number
    #[serde(default)]
    pub connections: BTreeMap<usize, Vec<SynapseId>>,
    #[serde(default)]
    pub level: usize,
}

/// Persisted metadata record (`nouns-metadata/{id}.json`).
///
/// Stored in a separate stream from the vector so that metadata-only reads
/// stay cheap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NounMetadataRecord {
    pub id: SynapseId,
    pub name: String,
    #[serde(rename = "type")]
    pub noun_type: NounType,
    #[serde(rename = "_data", default)]
    pub data: serde_json::Value,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "vfsPath", default, skip_serializing_if = "Option::is_none")]
    pub vfs_path: Option<String>,
    /// Service tag attached at write time for per-service statistics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

/// Persisted edge record (`verbs/{id}.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerbRecord {
    pub id: SynapseId,
    #[serde(rename = "sourceId")]
    pub source_id: SynapseId,
    #[serde(rename = "targetId")]
    pub target_id: SynapseId,
    pub verb: VerbType,
    pub weight: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Persisted edge metadata record (`verbs-metadata/{id}.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerbMetadataRecord {
    pub id: SynapseId,
    #[serde(rename = "_data", default)]
    pub data: serde_json::Value,
}

/// A normalized record produced by a format parser: one row, section, or
/// object from the source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Text content to be embedded and classified
    pub text: String,
    /// Structural metadata carried alongside (row index, heading path, ...)
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl SourceRecord {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noun_type_roundtrip() {
        for t in NounType::ALL {
            assert_eq!(NounType::parse(t.as_str()).unwrap(), t);
        }
        assert_eq!(NounType::ALL.len(), 31);
    }

    #[test]
    fn test_noun_type_case_insensitive() {
        assert_eq!(NounType::parse("person").unwrap(), NounType::Person);
        assert!(NounType::parse("Wizard").is_err());
    }

    #[test]
    fn test_verb_type_roundtrip() {
        for t in VerbType::ALL {
            assert_eq!(VerbType::parse(t.as_str()).unwrap(), t);
        }
        assert_eq!(VerbType::ALL.len(), 40);
    }

    #[test]
    fn test_unknown_verb_error_kind() {
        let err = VerbType::parse("Befriends").unwrap_err();
        assert!(matches!(err, crate::error::SynapseError::InvalidVerb(_)));
    }

    #[test]
    fn test_noun_record_connections_serde() {
        let mut connections = BTreeMap::new();
        connections.insert(0usize, vec![SynapseId::new(), SynapseId::new()]);
        connections.insert(1usize, vec![SynapseId::new()]);

        let record = NounRecord {
            id: SynapseId::new(),
            vector: vec![0.1, 0.2, 0.3],
            connections,
            level: 1,
        };

        let json = serde_json::to_string(&record).unwrap();
        let back: NounRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.level, 1);
        assert_eq!(back.connections[&0].len(), 2);
    }
}
