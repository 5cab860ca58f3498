//! Relation manager: admin, logged-in and group-membership edges.
//!
//! An edge is only ever created after both endpoints validate, and at most
//! one edge exists per (credential, target) pair. Dangling references are
//! skipped silently so noisy batch input never aborts.

use rusqlite::{params, Connection, OptionalExtension};

use harvest_core::{
    normalize_domain, AdminRelation, Credential, CredentialId, CredentialKind, GroupId,
    GroupRelation, Host, HostId, LoggedInRelation, RelationId,
};

use crate::client::{Result, StoreClient};
use crate::rows::{contains_pattern, select, Record};
use crate::schema;
use crate::validate::{exists, EntityKind};

/// The three edge tables, all keyed by `userid` on the credential side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Edge {
    Admin,
    LoggedIn,
    Group,
}

impl Edge {
    fn table(self) -> &'static str {
        match self {
            Self::Admin => schema::ADMIN_RELATIONS,
            Self::LoggedIn => schema::LOGGEDIN_RELATIONS,
            Self::Group => schema::GROUP_RELATIONS,
        }
    }

    fn target_column(self) -> &'static str {
        match self {
            Self::Admin | Self::LoggedIn => "computerid",
            Self::Group => "groupid",
        }
    }

    fn target_kind(self) -> EntityKind {
        match self {
            Self::Admin | Self::LoggedIn => EntityKind::Host,
            Self::Group => EntityKind::Group,
        }
    }
}

/// How `grant_admin` identifies the credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialRef {
    Id(CredentialId),
    /// Exact (kind, domain, username, secret); domain and username compare
    /// case-insensitively.
    Match {
        kind: CredentialKind,
        domain: String,
        username: String,
        secret: String,
    },
}

/// Which edges a relation lookup returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeFilter<T> {
    All,
    ByCredential(CredentialId),
    ByTarget(T),
    Pair(CredentialId, T),
}

/// Which edges a revoke deletes: every edge naming one of the credentials,
/// or every edge naming one of the targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevokeScope<T> {
    Credentials(Vec<CredentialId>),
    Targets(Vec<T>),
}

/// Insert the edge unless it already exists. Endpoints must already be valid.
/// Returns the edge id and whether it was created.
pub(crate) fn link(
    conn: &Connection,
    edge: Edge,
    credential: CredentialId,
    target: i64,
) -> Result<(RelationId, bool)> {
    let table = edge.table();
    let column = edge.target_column();

    let existing: Option<i64> = conn
        .query_row(
            &format!("SELECT id FROM \"{table}\" WHERE userid = ?1 AND {column} = ?2 ORDER BY id"),
            params![credential.0, target],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok((RelationId(id), false));
    }

    conn.execute(
        &format!("INSERT INTO \"{table}\" (userid, {column}) VALUES (?1, ?2)"),
        params![credential.0, target],
    )?;
    let id = RelationId(conn.last_insert_rowid());
    tracing::debug!(edge = ?edge, relation_id = %id, credential_id = %credential, target, "Edge created");
    Ok((id, true))
}

/// Validate both endpoints, then `link`. `None` when either is dangling.
fn link_validated(
    conn: &Connection,
    edge: Edge,
    credential: CredentialId,
    target: i64,
) -> Result<Option<RelationId>> {
    if !exists(conn, EntityKind::Credential, credential.0)?
        || !exists(conn, edge.target_kind(), target)?
    {
        tracing::debug!(edge = ?edge, credential_id = %credential, target, "Dangling edge endpoint, skipping");
        return Ok(None);
    }
    Ok(Some(link(conn, edge, credential, target)?.0))
}

fn resolve_credentials(conn: &Connection, credential: &CredentialRef) -> Result<Vec<Credential>> {
    match credential {
        CredentialRef::Id(id) => select(conn, Some("id = ?1"), params![id.0]),
        CredentialRef::Match {
            kind,
            domain,
            username,
            secret,
        } => select(
            conn,
            Some(
                "LOWER(credtype) = LOWER(?1) AND LOWER(domain) = LOWER(?2) \
                 AND LOWER(username) = LOWER(?3) AND password = ?4",
            ),
            params![kind.as_str(), normalize_domain(domain), username, secret],
        ),
    }
}

pub(crate) fn grant_admin(
    conn: &Connection,
    credential: &CredentialRef,
    host_pattern: &str,
) -> Result<usize> {
    let credentials = resolve_credentials(conn, credential)?;
    let hosts: Vec<Host> = select(
        conn,
        Some("LOWER(ip) LIKE ?1 ESCAPE '\\'"),
        params![contains_pattern(host_pattern)],
    )?;

    // Positional pairing: the n-th credential goes with the n-th host.
    let mut created = 0;
    for (cred, host) in credentials.iter().zip(hosts.iter()) {
        if link(conn, Edge::Admin, cred.id, host.id.0)?.1 {
            created += 1;
        }
    }

    tracing::debug!(
        credentials = credentials.len(),
        hosts = hosts.len(),
        created,
        host_pattern,
        "Admin grant processed"
    );
    Ok(created)
}

fn revoke<T: Copy + Into<i64>>(
    conn: &Connection,
    edge: Edge,
    scope: &RevokeScope<T>,
) -> Result<usize> {
    let table = edge.table();
    let mut deleted = 0;
    match scope {
        RevokeScope::Credentials(ids) => {
            for id in ids {
                deleted += conn.execute(
                    &format!("DELETE FROM \"{table}\" WHERE userid = ?1"),
                    params![id.0],
                )?;
            }
        }
        RevokeScope::Targets(ids) => {
            let column = edge.target_column();
            for id in ids {
                let raw: i64 = (*id).into();
                deleted += conn.execute(
                    &format!("DELETE FROM \"{table}\" WHERE {column} = ?1"),
                    params![raw],
                )?;
            }
        }
    }
    Ok(deleted)
}

fn edges<R: Record, T: Copy>(
    conn: &Connection,
    edge: Edge,
    filter: EdgeFilter<T>,
) -> Result<Vec<R>>
where
    i64: From<T>,
{
    let column = edge.target_column();
    match filter {
        EdgeFilter::All => select(conn, None, params![]),
        EdgeFilter::ByCredential(cred) => select(conn, Some("userid = ?1"), params![cred.0]),
        EdgeFilter::ByTarget(target) => select(
            conn,
            Some(format!("{column} = ?1").as_str()),
            params![i64::from(target)],
        ),
        EdgeFilter::Pair(cred, target) => select(
            conn,
            Some(format!("userid = ?1 AND {column} = ?2").as_str()),
            params![cred.0, i64::from(target)],
        ),
    }
}

impl StoreClient {
    /// Link the resolved credential(s) to every host whose address contains
    /// `host_pattern`, pairing them positionally. Returns the number of new
    /// edges; an unresolvable credential yields zero.
    pub fn grant_admin(&self, credential: &CredentialRef, host_pattern: &str) -> Result<usize> {
        self.write("grant_admin", |conn| grant_admin(conn, credential, host_pattern))
    }

    pub fn revoke_admin(&self, scope: &RevokeScope<HostId>) -> Result<usize> {
        self.write("revoke_admin", |conn| revoke(conn, Edge::Admin, scope))
    }

    pub fn get_admin_relations(&self, filter: EdgeFilter<HostId>) -> Result<Vec<AdminRelation>> {
        self.read(|conn| edges(conn, Edge::Admin, filter))
    }

    /// Record that `credential` holds a session on `host`. Idempotent;
    /// `None` when either endpoint does not validate.
    pub fn record_logged_in(
        &self,
        credential: CredentialId,
        host: HostId,
    ) -> Result<Option<RelationId>> {
        self.write("record_logged_in", |conn| {
            link_validated(conn, Edge::LoggedIn, credential, host.0)
        })
    }

    pub fn revoke_logged_in(&self, scope: &RevokeScope<HostId>) -> Result<usize> {
        self.write("revoke_logged_in", |conn| revoke(conn, Edge::LoggedIn, scope))
    }

    pub fn get_loggedin_relations(
        &self,
        filter: EdgeFilter<HostId>,
    ) -> Result<Vec<LoggedInRelation>> {
        self.read(|conn| edges(conn, Edge::LoggedIn, filter))
    }

    pub fn revoke_group_membership(&self, scope: &RevokeScope<GroupId>) -> Result<usize> {
        self.write("revoke_group_membership", |conn| revoke(conn, Edge::Group, scope))
    }

    pub fn get_group_relations(&self, filter: EdgeFilter<GroupId>) -> Result<Vec<GroupRelation>> {
        self.read(|conn| edges(conn, Edge::Group, filter))
    }
}
