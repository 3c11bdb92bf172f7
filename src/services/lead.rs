//! Lead service — schema-tagged lead ids, lead records, and contacts.
//!
//! DESIGN
//! ======
//! Leads live in two table families: `leads` (uuid keys) and the older
//! `leads_lead` (integer keys). Callers pass an id string; [`LeadRef::parse`]
//! resolves the family once so nothing downstream re-checks the string.
//! Every query that differs by family matches on [`LeadRef`].

use std::fmt;
use std::str::FromStr;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::ErrorCode;

const LEGACY_PREFIX: &str = "legacy_";

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LeadError {
    #[error("invalid lead id: {0}")]
    InvalidId(String),
    #[error("lead not found: {0}")]
    NotFound(LeadRef),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for LeadError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidId(_) => "E_INVALID_LEAD_ID",
            Self::NotFound(_) => "E_LEAD_NOT_FOUND",
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn http_status(&self) -> StatusCode {
        match self {
            Self::InvalidId(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// =============================================================================
// LEAD REF
// =============================================================================

/// A lead identifier tagged with its schema family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeadRef {
    New(Uuid),
    Legacy(i64),
}

impl LeadRef {
    /// Parse `legacy_<n>`, a bare integer (legacy), or a bare uuid (new).
    ///
    /// # Errors
    ///
    /// Returns [`LeadError::InvalidId`] for anything else.
    pub fn parse(raw: &str) -> Result<Self, LeadError> {
        let trimmed = raw.trim();
        if let Some(rest) = trimmed.strip_prefix(LEGACY_PREFIX) {
            return rest
                .parse::<i64>()
                .ok()
                .filter(|n| *n > 0)
                .map(Self::Legacy)
                .ok_or_else(|| LeadError::InvalidId(raw.to_owned()));
        }
        if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return trimmed
                .parse::<i64>()
                .ok()
                .filter(|n| *n > 0)
                .map(Self::Legacy)
                .ok_or_else(|| LeadError::InvalidId(raw.to_owned()));
        }
        Uuid::parse_str(trimmed)
            .map(Self::New)
            .map_err(|_| LeadError::InvalidId(raw.to_owned()))
    }

    #[must_use]
    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy(_))
    }

    /// The uuid key when this is a new-schema lead.
    #[must_use]
    pub fn new_id(&self) -> Option<Uuid> {
        match self {
            Self::New(id) => Some(*id),
            Self::Legacy(_) => None,
        }
    }

    /// The integer key when this is a legacy lead.
    #[must_use]
    pub fn legacy_id(&self) -> Option<i64> {
        match self {
            Self::New(_) => None,
            Self::Legacy(id) => Some(*id),
        }
    }
}

/// Canonical string form: `legacy_<n>` or the hyphenated uuid.
impl fmt::Display for LeadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New(id) => write!(f, "{id}"),
            Self::Legacy(id) => write!(f, "{LEGACY_PREFIX}{id}"),
        }
    }
}

impl FromStr for LeadRef {
    type Err = LeadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for LeadRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LeadRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// RECORDS
// =============================================================================

/// A lead record from either schema family.
#[derive(Debug, Clone, Serialize)]
pub struct Lead {
    pub id: LeadRef,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub mobile: Option<String>,
    /// Raw manual-interaction entries (new schema only; empty for legacy).
    #[serde(skip_serializing)]
    pub manual_interactions: Vec<serde_json::Value>,
}

impl Lead {
    /// Preferred WhatsApp number: mobile first, then phone.
    #[must_use]
    pub fn whatsapp_number(&self) -> Option<&str> {
        [self.mobile.as_deref(), self.phone.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|p| !p.is_empty())
    }
}

/// A person attached to a lead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Contact {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub mobile: Option<String>,
    pub is_main: bool,
}

#[derive(FromRow)]
struct LeadRow {
    name: String,
    email: Option<String>,
    phone: Option<String>,
    mobile: Option<String>,
    manual_interactions: Option<serde_json::Value>,
}

// =============================================================================
// QUERIES
// =============================================================================

/// Load one lead from the table family its ref points at.
///
/// # Errors
///
/// Returns [`LeadError::NotFound`] if no row exists, or a database error.
pub async fn load_lead(pool: &PgPool, lead: LeadRef) -> Result<Lead, LeadError> {
    let row = match lead {
        LeadRef::New(id) => {
            sqlx::query_as::<_, LeadRow>(
                "SELECT name, email, phone, mobile, manual_interactions FROM leads WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(pool)
            .await?
        }
        LeadRef::Legacy(id) => {
            sqlx::query_as::<_, LeadRow>(
                "SELECT name, email, phone, mobile, NULL::jsonb AS manual_interactions
                 FROM leads_lead WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(pool)
            .await?
        }
    };

    let row = row.ok_or(LeadError::NotFound(lead))?;
    Ok(Lead {
        id: lead,
        name: row.name,
        email: row.email,
        phone: row.phone,
        mobile: row.mobile,
        manual_interactions: manual_entries(row.manual_interactions),
    })
}

/// Load every contact attached to a lead, main contact first.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn load_contacts(pool: &PgPool, lead: LeadRef) -> Result<Vec<Contact>, LeadError> {
    let rows = match lead {
        LeadRef::New(id) => {
            sqlx::query_as::<_, Contact>(
                "SELECT id, name, email, phone, mobile, is_main
                 FROM lead_contacts WHERE lead_id = $1
                 ORDER BY is_main DESC, id ASC",
            )
            .bind(id)
            .fetch_all(pool)
            .await?
        }
        LeadRef::Legacy(id) => {
            sqlx::query_as::<_, Contact>(
                "SELECT id, name, email, phone, mobile, is_main
                 FROM lead_contacts WHERE legacy_lead_id = $1
                 ORDER BY is_main DESC, id ASC",
            )
            .bind(id)
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows)
}

/// Unwrap the `manual_interactions` jsonb column into its entries.
/// Anything other than an array is treated as empty.
pub(crate) fn manual_entries(raw: Option<serde_json::Value>) -> Vec<serde_json::Value> {
    match raw {
        Some(serde_json::Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

#[cfg(test)]
#[path = "lead_test.rs"]
mod tests;
