//! Write operations: reconcile re-observed entities into the store.
//!
//! Every upsert matches on the entity's natural key before inserting, and
//! merges into the matching row(s) instead of duplicating them. All calls
//! run inside the client's single write transaction.

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use harvest_core::{
    normalize_domain, Credential, CredentialId, CredentialObservation, Group, GroupId, HostId,
    HostObservation, ShareId, ShareObservation,
};

use crate::client::{Result, StoreClient};
use crate::relations::{self, Edge};
use crate::rows::select;
use crate::schema;
use crate::validate::{exists, EntityKind};

// ── Hosts ────────────────────────────────────────────────────────

/// Columns the observation actually supplies, with their values.
fn host_assignments(obs: &HostObservation) -> Vec<(&'static str, Value)> {
    let mut fields = Vec::new();

    for (column, value) in [
        ("hostname", &obs.hostname),
        ("domain", &obs.domain),
        ("os", &obs.os),
    ] {
        if let Some(v) = value {
            fields.push((column, Value::Text(v.clone())));
        }
    }

    for (column, value) in [
        ("dc", obs.dc),
        ("smbv1", obs.smbv1),
        ("signing", obs.signing),
        ("spooler", obs.spooler),
        ("zerologon", obs.zerologon),
        ("petitpotam", obs.petitpotam),
    ] {
        if let Some(v) = value {
            fields.push((column, Value::Integer(i64::from(v))));
        }
    }

    fields
}

fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn upsert_host(conn: &Connection, observed: &HostObservation) -> Result<HostId> {
    let obs = observed.normalized();
    let fields = host_assignments(&obs);

    let matches = {
        let mut stmt = conn.prepare_cached("SELECT id FROM computers WHERE ip = ?1 ORDER BY id")?;
        let ids = stmt
            .query_map(params![obs.ip], |r| r.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        ids
    };

    let Some(&first) = matches.first() else {
        let mut columns = vec!["ip"];
        let mut values = vec![Value::Text(obs.ip.clone())];
        for (column, value) in fields {
            columns.push(column);
            values.push(value);
        }
        let sql = format!(
            "INSERT INTO computers ({}) VALUES ({})",
            columns.join(", "),
            placeholders(columns.len())
        );
        conn.execute(&sql, params_from_iter(values))?;

        let id = HostId(conn.last_insert_rowid());
        tracing::debug!(host_id = %id, ip = %obs.ip, "Host created");
        return Ok(id);
    };

    if !fields.is_empty() {
        let assignments = fields
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{column} = ?{}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE computers SET {assignments} WHERE id = ?{}",
            fields.len() + 1
        );
        let values: Vec<Value> = fields.into_iter().map(|(_, v)| v).collect();

        // An address can match more than one legacy row; keep them identical.
        for id in &matches {
            let mut bound = values.clone();
            bound.push(Value::Integer(*id));
            conn.execute(&sql, params_from_iter(bound))?;
        }
    }

    tracing::debug!(host_id = first, ip = %obs.ip, rows = matches.len(), "Host merged");
    Ok(HostId(first))
}

// ── Credentials ──────────────────────────────────────────────────

pub(crate) fn upsert_credential(
    conn: &Connection,
    obs: &CredentialObservation,
) -> Result<Option<CredentialId>> {
    if let Some(group) = obs.group {
        if !exists(conn, EntityKind::Group, group.0)? {
            tracing::debug!(group_id = %group, "Unknown group, credential not recorded");
            return Ok(None);
        }
    }
    if let Some(host) = obs.pillaged_from {
        if !exists(conn, EntityKind::Host, host.0)? {
            tracing::debug!(host_id = %host, "Unknown pillaged-from host, credential not recorded");
            return Ok(None);
        }
    }

    let domain = normalize_domain(&obs.domain);
    let kind = obs.kind.as_str();
    let pillaged = obs.pillaged_from.map(|h| h.0);

    let matches: Vec<Credential> = select(
        conn,
        Some(
            "LOWER(domain) = LOWER(?1) AND LOWER(username) = LOWER(?2) \
             AND LOWER(credtype) = LOWER(?3)",
        ),
        params![domain, obs.username, kind],
    )?;

    if matches.is_empty() {
        conn.execute(
            "INSERT INTO users (domain, username, password, credtype, pillaged_from_computerid)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![domain, obs.username, obs.secret, kind, pillaged],
        )?;
        let id = CredentialId(conn.last_insert_rowid());
        if let Some(group) = obs.group {
            relations::link(conn, Edge::Group, id, group.0)?;
        }
        tracing::debug!(credential_id = %id, %domain, username = %obs.username, kind, "Credential created");
        return Ok(Some(id));
    }

    // Only an empty row is upgraded; a populated one is never clobbered.
    let mut updated = None;
    for existing in &matches {
        if existing.secret.is_none() && existing.pillaged_from.is_none() {
            conn.execute(
                "UPDATE users SET password = ?1, credtype = ?2, pillaged_from_computerid = ?3
                 WHERE id = ?4",
                params![obs.secret, kind, pillaged, existing.id.0],
            )?;
            updated.get_or_insert(existing.id);
        }
        if let Some(group) = obs.group {
            relations::link(conn, Edge::Group, existing.id, group.0)?;
        }
    }

    tracing::debug!(
        matched = matches.len(),
        updated = ?updated,
        username = %obs.username,
        "Credential reconciled"
    );
    Ok(updated)
}

pub(crate) fn upsert_user(
    conn: &Connection,
    domain: &str,
    username: &str,
    group: Option<GroupId>,
) -> Result<Option<CredentialId>> {
    if let Some(group) = group {
        if !exists(conn, EntityKind::Group, group.0)? {
            tracing::debug!(group_id = %group, "Unknown group, user not recorded");
            return Ok(None);
        }
    }

    let domain = normalize_domain(domain);
    let matches: Vec<Credential> = select(
        conn,
        Some("LOWER(domain) = LOWER(?1) AND LOWER(username) = LOWER(?2)"),
        params![domain, username],
    )?;

    let Some(first) = matches.first() else {
        conn.execute(
            "INSERT INTO users (domain, username, password, credtype, pillaged_from_computerid)
             VALUES (?1, ?2, '', '', NULL)",
            params![domain, username],
        )?;
        let id = CredentialId(conn.last_insert_rowid());
        if let Some(group) = group {
            relations::link(conn, Edge::Group, id, group.0)?;
        }
        tracing::debug!(credential_id = %id, %domain, username, "User placeholder created");
        return Ok(Some(id));
    };

    if let Some(group) = group {
        for existing in &matches {
            relations::link(conn, Edge::Group, existing.id, group.0)?;
        }
    }
    Ok(Some(first.id))
}

pub(crate) fn remove_credentials(conn: &Connection, ids: &[CredentialId]) -> Result<usize> {
    let mut removed = 0;
    for id in ids {
        for table in [
            schema::ADMIN_RELATIONS,
            schema::LOGGEDIN_RELATIONS,
            schema::GROUP_RELATIONS,
            schema::SHARES,
        ] {
            conn.execute(
                &format!("DELETE FROM \"{table}\" WHERE userid = ?1"),
                params![id.0],
            )?;
        }
        removed += conn.execute("DELETE FROM users WHERE id = ?1", params![id.0])?;
    }
    Ok(removed)
}

// ── Groups ───────────────────────────────────────────────────────

pub(crate) fn upsert_group(conn: &Connection, domain: &str, name: &str) -> Result<GroupId> {
    let domain = normalize_domain(domain);
    let matches: Vec<Group> = select(
        conn,
        Some("LOWER(domain) = LOWER(?1) AND LOWER(name) = LOWER(?2)"),
        params![domain, name],
    )?;

    if let Some(existing) = matches.first() {
        return Ok(existing.id);
    }

    conn.execute(
        "INSERT INTO \"groups\" (domain, name) VALUES (?1, ?2)",
        params![domain, name],
    )?;
    let id = GroupId(conn.last_insert_rowid());
    tracing::debug!(group_id = %id, %domain, name, "Group created");
    Ok(id)
}

// ── Shares ───────────────────────────────────────────────────────

pub(crate) fn add_share(conn: &Connection, obs: &ShareObservation) -> Result<Option<ShareId>> {
    if !exists(conn, EntityKind::Host, obs.host_id.0)?
        || !exists(conn, EntityKind::Credential, obs.credential_id.0)?
    {
        tracing::debug!(
            host_id = %obs.host_id,
            credential_id = %obs.credential_id,
            share = %obs.name,
            "Share names an unknown host or credential, skipping"
        );
        return Ok(None);
    }

    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM shares WHERE computerid = ?1 AND userid = ?2 AND name = ?3",
            params![obs.host_id.0, obs.credential_id.0, obs.name],
            |r| r.get(0),
        )
        .optional()?;

    if let Some(id) = existing {
        conn.execute(
            "UPDATE shares SET remark = ?1, \"read\" = ?2, \"write\" = ?3 WHERE id = ?4",
            params![obs.remark, obs.read, obs.write, id],
        )?;
        tracing::debug!(share_id = id, share = %obs.name, "Share refreshed");
        return Ok(Some(ShareId(id)));
    }

    conn.execute(
        "INSERT INTO shares (computerid, userid, name, remark, \"read\", \"write\")
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            obs.host_id.0,
            obs.credential_id.0,
            obs.name,
            obs.remark,
            obs.read,
            obs.write
        ],
    )?;
    let id = ShareId(conn.last_insert_rowid());
    tracing::debug!(share_id = %id, share = %obs.name, "Share created");
    Ok(Some(id))
}

// ── Public API ───────────────────────────────────────────────────

impl StoreClient {
    /// Insert a host, or merge every supplied field into the host(s) already
    /// recorded at the same address. Absent fields never erase stored values.
    pub fn upsert_host(&self, obs: &HostObservation) -> Result<HostId> {
        self.write("upsert_host", |conn| upsert_host(conn, obs))
    }

    /// Record a harvested credential.
    ///
    /// Returns `None` when the group or pillaged-from host does not validate,
    /// and also when a matching row exists but was already populated.
    pub fn upsert_credential(&self, obs: &CredentialObservation) -> Result<Option<CredentialId>> {
        self.write("upsert_credential", |conn| upsert_credential(conn, obs))
    }

    /// Record a bare user (no secret), or attach a group to existing rows for
    /// that user without touching their secrets.
    pub fn upsert_user(
        &self,
        domain: &str,
        username: &str,
        group: Option<GroupId>,
    ) -> Result<Option<CredentialId>> {
        self.write("upsert_user", |conn| upsert_user(conn, domain, username, group))
    }

    pub fn upsert_group(&self, domain: &str, name: &str) -> Result<GroupId> {
        self.write("upsert_group", |conn| upsert_group(conn, domain, name))
    }

    /// Record a share; re-discovery by the same credential refreshes the
    /// remark and access flags in place.
    pub fn add_share(&self, obs: &ShareObservation) -> Result<Option<ShareId>> {
        self.write("add_share", |conn| add_share(conn, obs))
    }

    /// Delete credentials together with every edge and share naming them.
    pub fn remove_credentials(&self, ids: &[CredentialId]) -> Result<usize> {
        let removed = self.write("remove_credentials", |conn| remove_credentials(conn, ids))?;
        tracing::info!(removed, "Credentials removed");
        Ok(removed)
    }
}
