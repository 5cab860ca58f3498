//! Core domain types for the engagement store.
//!
//! Records mirror the persisted table layout column for column. Identifiers
//! are store-assigned integers and are the only handle collaborators keep.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

// ── Identifiers ───────────────────────────────────────────────────

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

row_id!(
    /// Row id in the `computers` table.
    HostId
);
row_id!(
    /// Row id in the `users` table.
    CredentialId
);
row_id!(
    /// Row id in the `groups` table.
    GroupId
);
row_id!(
    /// Row id in the `shares` table.
    ShareId
);
row_id!(
    /// Row id in any of the relation tables.
    RelationId
);

// ── Entities ──────────────────────────────────────────────────────

/// A discovered machine. The address is the natural dedup key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Host {
    pub id: HostId,
    pub ip: String,
    pub hostname: Option<String>,
    pub domain: Option<String>,
    pub os: Option<String>,
    pub dc: Option<bool>,
    pub smbv1: Option<bool>,
    pub signing: Option<bool>,
    pub spooler: Option<bool>,
    pub zerologon: Option<bool>,
    pub petitpotam: Option<bool>,
}

/// A harvested credential, or a bare user placeholder when `secret` and
/// `kind` are both unset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub id: CredentialId,
    pub domain: String,
    pub username: String,
    pub secret: Option<String>,
    pub kind: Option<CredentialKind>,
    pub pillaged_from: Option<HostId>,
}

impl Credential {
    /// True when the row carries no secret material and no provenance.
    pub fn is_placeholder(&self) -> bool {
        self.secret.is_none() && self.kind.is_none() && self.pillaged_from.is_none()
    }
}

/// A directory group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub id: GroupId,
    pub domain: String,
    pub name: String,
}

/// A file share as seen by one credential on one host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Share {
    pub id: ShareId,
    pub host_id: HostId,
    pub credential_id: CredentialId,
    pub name: String,
    pub remark: Option<String>,
    pub read: bool,
    pub write: bool,
}

// ── Relations ─────────────────────────────────────────────────────

/// Credential has administrative access over a host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdminRelation {
    pub id: RelationId,
    pub credential_id: CredentialId,
    pub host_id: HostId,
}

/// Credential was observed with a session on a host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggedInRelation {
    pub id: RelationId,
    pub credential_id: CredentialId,
    pub host_id: HostId,
}

/// Credential is a member of a group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupRelation {
    pub id: RelationId,
    pub credential_id: CredentialId,
    pub group_id: GroupId,
}

// ── Credential kinds ──────────────────────────────────────────────

/// The `credtype` tag of a credential row.
///
/// Stored as lowercase text. Unknown tags written by other tooling are kept
/// verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum CredentialKind {
    Hash,
    Plaintext,
    Other(String),
}

impl CredentialKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Hash => "hash",
            Self::Plaintext => "plaintext",
            Self::Other(s) => s,
        }
    }

    /// Parse a stored tag. Empty text is the placeholder marker and yields `None`.
    pub fn from_stored(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(match trimmed.to_ascii_lowercase().as_str() {
            "hash" => Self::Hash,
            "plaintext" => Self::Plaintext,
            _ => Self::Other(trimmed.to_string()),
        })
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<CredentialKind> for String {
    fn from(kind: CredentialKind) -> Self {
        kind.as_str().to_string()
    }
}

impl From<String> for CredentialKind {
    fn from(raw: String) -> Self {
        Self::from_stored(&raw).unwrap_or(Self::Other(raw))
    }
}

impl FromStr for CredentialKind {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_stored(s)
            .ok_or_else(|| HarvestError::InvalidValue("empty credential kind".to_string()))
    }
}

// ── Share permissions ─────────────────────────────────────────────

/// Enumerated share permission filter: `r`, `w` or `rw`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SharePermission {
    #[serde(rename = "r")]
    Read,
    #[serde(rename = "w")]
    Write,
    #[serde(rename = "rw")]
    ReadWrite,
}

impl SharePermission {
    pub fn requires_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub fn requires_write(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

impl FromStr for SharePermission {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "r" => Ok(Self::Read),
            "w" => Ok(Self::Write),
            "rw" => Ok(Self::ReadWrite),
            other => Err(HarvestError::InvalidValue(format!(
                "share permission must be r, w or rw (got {other:?})"
            ))),
        }
    }
}

// ── Observations ──────────────────────────────────────────────────

/// One scan's view of a host. Every `None` field is "not observed" and
/// leaves the stored value untouched on merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostObservation {
    pub ip: String,
    pub hostname: Option<String>,
    pub domain: Option<String>,
    pub os: Option<String>,
    pub dc: Option<bool>,
    pub smbv1: Option<bool>,
    pub signing: Option<bool>,
    pub spooler: Option<bool>,
    pub zerologon: Option<bool>,
    pub petitpotam: Option<bool>,
}

impl HostObservation {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            ..Default::default()
        }
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn os(mut self, os: impl Into<String>) -> Self {
        self.os = Some(os.into());
        self
    }

    pub fn dc(mut self, dc: bool) -> Self {
        self.dc = Some(dc);
        self
    }

    pub fn smbv1(mut self, smbv1: bool) -> Self {
        self.smbv1 = Some(smbv1);
        self
    }

    pub fn signing(mut self, signing: bool) -> Self {
        self.signing = Some(signing);
        self
    }

    pub fn spooler(mut self, spooler: bool) -> Self {
        self.spooler = Some(spooler);
        self
    }

    pub fn zerologon(mut self, zerologon: bool) -> Self {
        self.zerologon = Some(zerologon);
        self
    }

    pub fn petitpotam(mut self, petitpotam: bool) -> Self {
        self.petitpotam = Some(petitpotam);
        self
    }

    /// The same observation with `domain` normalized.
    pub fn normalized(&self) -> Self {
        Self {
            domain: self.domain.as_deref().map(normalize_domain),
            ..self.clone()
        }
    }
}

/// A harvested secret for `upsert_credential`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialObservation {
    pub kind: CredentialKind,
    pub domain: String,
    pub username: String,
    pub secret: String,
    pub group: Option<GroupId>,
    pub pillaged_from: Option<HostId>,
}

impl CredentialObservation {
    pub fn new(
        kind: CredentialKind,
        domain: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            domain: domain.into(),
            username: username.into(),
            secret: secret.into(),
            group: None,
            pillaged_from: None,
        }
    }

    pub fn in_group(mut self, group: GroupId) -> Self {
        self.group = Some(group);
        self
    }

    pub fn pillaged_from(mut self, host: HostId) -> Self {
        self.pillaged_from = Some(host);
        self
    }
}

/// A share as enumerated by one credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShareObservation {
    pub host_id: HostId,
    pub credential_id: CredentialId,
    pub name: String,
    pub remark: Option<String>,
    pub read: bool,
    pub write: bool,
}

// ── Helpers ───────────────────────────────────────────────────────

/// Reduce a domain to its upper-cased leftmost label: `corp.local` → `CORP`.
pub fn normalize_domain(domain: &str) -> String {
    domain
        .split('.')
        .next()
        .unwrap_or_default()
        .trim()
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_is_reduced_to_leftmost_label() {
        assert_eq!(normalize_domain("corp.local"), "CORP");
        assert_eq!(normalize_domain("CORP"), "CORP");
        assert_eq!(normalize_domain("sub.corp.local"), "SUB");
        assert_eq!(normalize_domain(""), "");
    }

    #[test]
    fn test_credential_kind_parsing() {
        assert_eq!(CredentialKind::from_stored("HASH"), Some(CredentialKind::Hash));
        assert_eq!(
            CredentialKind::from_stored("plaintext"),
            Some(CredentialKind::Plaintext)
        );
        assert_eq!(CredentialKind::from_stored(""), None);
        assert_eq!(
            CredentialKind::from_stored("aesKey"),
            Some(CredentialKind::Other("aesKey".to_string()))
        );
        assert!("".parse::<CredentialKind>().is_err());
    }

    #[test]
    fn test_credential_kind_serializes_as_tag() {
        let json = serde_json::to_string(&CredentialKind::Hash).unwrap();
        assert_eq!(json, "\"hash\"");
        let back: CredentialKind = serde_json::from_str("\"Plaintext\"").unwrap();
        assert_eq!(back, CredentialKind::Plaintext);
    }

    #[test]
    fn test_share_permission_parsing() {
        assert_eq!("r".parse::<SharePermission>().unwrap(), SharePermission::Read);
        assert_eq!("RW".parse::<SharePermission>().unwrap(), SharePermission::ReadWrite);
        assert!("x".parse::<SharePermission>().is_err());
        assert!(SharePermission::ReadWrite.requires_read());
        assert!(SharePermission::ReadWrite.requires_write());
        assert!(!SharePermission::Write.requires_read());
    }

    #[test]
    fn test_host_observation_normalizes_domain() {
        let obs = HostObservation::new("10.0.0.5").domain("corp.local").dc(true);
        let normalized = obs.normalized();
        assert_eq!(normalized.domain.as_deref(), Some("CORP"));
        assert_eq!(normalized.dc, Some(true));
        assert_eq!(normalized.ip, "10.0.0.5");
    }

    #[test]
    fn test_placeholder_detection() {
        let cred = Credential {
            id: CredentialId(1),
            domain: "CORP".to_string(),
            username: "bob".to_string(),
            secret: None,
            kind: None,
            pillaged_from: None,
        };
        assert!(cred.is_placeholder());
        let populated = Credential {
            secret: Some("pw".to_string()),
            ..cred
        };
        assert!(!populated.is_placeholder());
    }
}
