//! Identifier validation shared by the write and read paths.

use rusqlite::{params, Connection};

use harvest_core::{CredentialId, GroupId, HostId, ShareId};

use crate::client::{Result, StoreClient};
use crate::schema;

/// Entity kinds that can be named by a bare identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Host,
    Credential,
    Group,
    Share,
}

impl EntityKind {
    pub fn table(self) -> &'static str {
        match self {
            Self::Host => schema::COMPUTERS,
            Self::Credential => schema::USERS,
            Self::Group => schema::GROUPS,
            Self::Share => schema::SHARES,
        }
    }
}

/// True when exactly one live row of `kind` carries `id`.
pub(crate) fn exists(conn: &Connection, kind: EntityKind, id: i64) -> Result<bool> {
    let sql = format!("SELECT COUNT(*) FROM \"{}\" WHERE id = ?1", kind.table());
    let count: i64 = conn.query_row(&sql, params![id], |r| r.get(0))?;
    tracing::trace!(kind = ?kind, id, valid = count == 1, "Validated identifier");
    Ok(count == 1)
}

/// Interpret a free-text filter as an identifier of `kind`, if it is one.
pub(crate) fn as_live_id(conn: &Connection, kind: EntityKind, term: &str) -> Result<Option<i64>> {
    match term.trim().parse::<i64>() {
        Ok(id) if exists(conn, kind, id)? => Ok(Some(id)),
        _ => Ok(None),
    }
}

impl StoreClient {
    /// Whether `id` names a live row of `kind`.
    pub fn is_valid(&self, kind: EntityKind, id: i64) -> Result<bool> {
        self.read(|conn| exists(conn, kind, id))
    }

    pub fn is_host_valid(&self, id: HostId) -> Result<bool> {
        self.is_valid(EntityKind::Host, id.0)
    }

    pub fn is_credential_valid(&self, id: CredentialId) -> Result<bool> {
        self.is_valid(EntityKind::Credential, id.0)
    }

    pub fn is_group_valid(&self, id: GroupId) -> Result<bool> {
        self.is_valid(EntityKind::Group, id.0)
    }

    pub fn is_share_valid(&self, id: ShareId) -> Result<bool> {
        self.is_valid(EntityKind::Share, id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::HostObservation;

    #[test]
    fn test_unknown_ids_do_not_validate() {
        let store = StoreClient::open_in_memory().unwrap();
        assert!(!store.is_host_valid(HostId(1)).unwrap());
        assert!(!store.is_credential_valid(CredentialId(1)).unwrap());
        assert!(!store.is_group_valid(GroupId(1)).unwrap());
        assert!(!store.is_share_valid(ShareId(1)).unwrap());
    }

    #[test]
    fn test_live_ids_validate_per_kind() {
        let store = StoreClient::open_in_memory().unwrap();
        let host = store.upsert_host(&HostObservation::new("10.0.0.1")).unwrap();
        let group = store.upsert_group("corp.local", "Domain Admins").unwrap();

        assert!(store.is_host_valid(host).unwrap());
        assert!(store.is_group_valid(group).unwrap());
        // The same integer is not a credential.
        assert!(!store.is_valid(EntityKind::Credential, host.0).unwrap());
    }

    #[test]
    fn test_free_text_resolves_only_live_ids() {
        let store = StoreClient::open_in_memory().unwrap();
        let host = store.upsert_host(&HostObservation::new("10.0.0.1")).unwrap();

        let found = store
            .read(|conn| as_live_id(conn, EntityKind::Host, &host.0.to_string()))
            .unwrap();
        assert_eq!(found, Some(host.0));

        let missing = store
            .read(|conn| as_live_id(conn, EntityKind::Host, "999"))
            .unwrap();
        assert_eq!(missing, None);

        let text = store
            .read(|conn| as_live_id(conn, EntityKind::Host, "web"))
            .unwrap();
        assert_eq!(text, None);
    }
}
