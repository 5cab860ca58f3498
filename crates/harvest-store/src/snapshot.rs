//! Engagement interchange: export every table to a serializable snapshot,
//! and merge a snapshot from another engagement into this one.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use harvest_core::{
    AdminRelation, Credential, CredentialId, CredentialObservation, Group, GroupId,
    GroupRelation, Host, HostId, HostObservation, LoggedInRelation, Share, ShareObservation,
};

use crate::client::{Result, StoreClient, StoreError};
use crate::reconcile;
use crate::relations::{self, Edge};
use crate::rows::select;

/// Snapshot layout version written by `export` and accepted by `merge`.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Every row of one engagement, ordered by id within each table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    pub hosts: Vec<Host>,
    pub credentials: Vec<Credential>,
    pub groups: Vec<Group>,
    pub shares: Vec<Share>,
    pub admin_relations: Vec<AdminRelation>,
    pub loggedin_relations: Vec<LoggedInRelation>,
    pub group_relations: Vec<GroupRelation>,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Outcome of a merge. Entity counts are rows reconciled (created or
/// matched); `edges_created` counts only new edges.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MergeReport {
    pub hosts: usize,
    pub credentials: usize,
    pub groups: usize,
    pub shares: usize,
    pub edges_created: usize,
    /// Hosts without an address, and rows naming an entity the snapshot
    /// did not carry or that was itself skipped.
    pub skipped: usize,
}

fn host_observation(host: &Host) -> HostObservation {
    HostObservation {
        ip: host.ip.clone(),
        hostname: host.hostname.clone(),
        domain: host.domain.clone(),
        os: host.os.clone(),
        dc: host.dc,
        smbv1: host.smbv1,
        signing: host.signing,
        spooler: host.spooler,
        zerologon: host.zerologon,
        petitpotam: host.petitpotam,
    }
}

/// Reconcile one incoming credential and return the local row it maps to.
fn merge_credential(
    conn: &Connection,
    cred: &Credential,
    pillaged_from: Option<HostId>,
) -> Result<Option<CredentialId>> {
    let Some(kind) = cred.kind.clone() else {
        return reconcile::upsert_user(conn, &cred.domain, &cred.username, None);
    };

    let secret = cred.secret.clone().unwrap_or_default();
    let mut obs = CredentialObservation::new(kind.clone(), &cred.domain, &cred.username, &secret);
    obs.pillaged_from = pillaged_from;
    if let Some(id) = reconcile::upsert_credential(conn, &obs)? {
        return Ok(Some(id));
    }

    // Already populated locally: map onto the row with the same secret if
    // there is one, else the first row for the natural key.
    let candidates: Vec<Credential> = select(
        conn,
        Some(
            "LOWER(domain) = LOWER(?1) AND LOWER(username) = LOWER(?2) \
             AND LOWER(credtype) = LOWER(?3)",
        ),
        params![
            harvest_core::normalize_domain(&cred.domain),
            cred.username,
            kind.as_str()
        ],
    )?;
    Ok(candidates
        .iter()
        .find(|c| c.secret.as_deref() == Some(secret.as_str()))
        .or_else(|| candidates.first())
        .map(|c| c.id))
}

fn merge(conn: &Connection, snapshot: &Snapshot) -> Result<MergeReport> {
    let mut report = MergeReport::default();

    let mut hosts: HashMap<HostId, HostId> = HashMap::new();
    for host in &snapshot.hosts {
        // Address is the merge key; rows without one would all collapse together.
        if host.ip.trim().is_empty() {
            tracing::debug!(host_id = host.id.0, "Skipping snapshot host without an address");
            report.skipped += 1;
            continue;
        }
        hosts.insert(host.id, reconcile::upsert_host(conn, &host_observation(host))?);
        report.hosts += 1;
    }

    let mut groups: HashMap<GroupId, GroupId> = HashMap::new();
    for group in &snapshot.groups {
        groups.insert(group.id, reconcile::upsert_group(conn, &group.domain, &group.name)?);
        report.groups += 1;
    }

    let mut credentials: HashMap<CredentialId, CredentialId> = HashMap::new();
    for cred in &snapshot.credentials {
        let pillaged_from = cred.pillaged_from.and_then(|h| hosts.get(&h).copied());
        match merge_credential(conn, cred, pillaged_from)? {
            Some(local) => {
                credentials.insert(cred.id, local);
                report.credentials += 1;
            }
            None => report.skipped += 1,
        }
    }

    for share in &snapshot.shares {
        let (Some(&host_id), Some(&credential_id)) =
            (hosts.get(&share.host_id), credentials.get(&share.credential_id))
        else {
            report.skipped += 1;
            continue;
        };
        let obs = ShareObservation {
            host_id,
            credential_id,
            name: share.name.clone(),
            remark: share.remark.clone(),
            read: share.read,
            write: share.write,
        };
        match reconcile::add_share(conn, &obs)? {
            Some(_) => report.shares += 1,
            None => report.skipped += 1,
        }
    }

    let host_edges = snapshot
        .admin_relations
        .iter()
        .map(|r| (Edge::Admin, r.credential_id, hosts.get(&r.host_id).map(|h| h.0)))
        .chain(
            snapshot
                .loggedin_relations
                .iter()
                .map(|r| (Edge::LoggedIn, r.credential_id, hosts.get(&r.host_id).map(|h| h.0))),
        );
    let group_edges = snapshot
        .group_relations
        .iter()
        .map(|r| (Edge::Group, r.credential_id, groups.get(&r.group_id).map(|g| g.0)));

    for (edge, credential, target) in host_edges.chain(group_edges) {
        let (Some(&credential), Some(target)) = (credentials.get(&credential), target) else {
            report.skipped += 1;
            continue;
        };
        if relations::link(conn, edge, credential, target)?.1 {
            report.edges_created += 1;
        }
    }

    Ok(report)
}

impl StoreClient {
    /// Read every table in one snapshot.
    pub fn export(&self) -> Result<Snapshot> {
        let snapshot = self.read(|conn| {
            Ok(Snapshot {
                format_version: SNAPSHOT_FORMAT_VERSION,
                exported_at: Utc::now(),
                hosts: select(conn, None, params![])?,
                credentials: select(conn, None, params![])?,
                groups: select(conn, None, params![])?,
                shares: select(conn, None, params![])?,
                admin_relations: select(conn, None, params![])?,
                loggedin_relations: select(conn, None, params![])?,
                group_relations: select(conn, None, params![])?,
            })
        })?;
        tracing::info!(
            hosts = snapshot.hosts.len(),
            credentials = snapshot.credentials.len(),
            "Engagement exported"
        );
        Ok(snapshot)
    }

    /// Replay `snapshot` through the reconciler as one transaction. Ids are
    /// remapped onto this store's rows; dangling edges and shares are skipped.
    pub fn merge(&self, snapshot: &Snapshot) -> Result<MergeReport> {
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(StoreError::InvalidSnapshot(format!(
                "unsupported format version {} (expected {SNAPSHOT_FORMAT_VERSION})",
                snapshot.format_version
            )));
        }

        let report = self.write("merge", |conn| merge(conn, snapshot))?;
        tracing::info!(
            hosts = report.hosts,
            credentials = report.credentials,
            edges_created = report.edges_created,
            skipped = report.skipped,
            "Snapshot merged"
        );
        Ok(report)
    }
}
