//! Request provenance.
//!
//! Every create request records who asked for the dump; the pair survives
//! in the entry for audit.

use serde::{Deserialize, Serialize};

/// Where a dump request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginatorType {
    /// An external management client.
    Client,
    /// The manager itself (fault sweep, eviction bookkeeping).
    Internal,
    /// Another service on the controller acting on a client's behalf.
    SupportingService,
}

impl Default for OriginatorType {
    fn default() -> Self {
        OriginatorType::Internal
    }
}

impl OriginatorType {
    /// Parse the wire form used in the request parameter map.
    pub fn parse(s: &str) -> Option<OriginatorType> {
        match s {
            "client" => Some(OriginatorType::Client),
            "internal" => Some(OriginatorType::Internal),
            "supporting_service" => Some(OriginatorType::SupportingService),
            _ => None,
        }
    }
}

impl std::fmt::Display for OriginatorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OriginatorType::Client => write!(f, "client"),
            OriginatorType::Internal => write!(f, "internal"),
            OriginatorType::SupportingService => write!(f, "supporting_service"),
        }
    }
}
