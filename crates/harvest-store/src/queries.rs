//! Query surface: the uniform lookup protocol over every entity kind.
//!
//! A free-text filter resolves once per call, in priority order, into a
//! [`Lookup`]: a live identifier wins, then a kind-specific keyword, then a
//! case-insensitive substring, and an absent filter returns everything.
//! Reads are total; an unmatched filter is an empty result, never an error.

use std::convert::Infallible;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;

use harvest_core::{
    normalize_domain, Credential, CredentialId, CredentialKind, Group, GroupId, Host, HostId,
    Share, SharePermission, ShareId,
};

use crate::client::{Result, StoreClient};
use crate::rows::{contains_pattern, select};
use crate::schema;
use crate::validate::{as_live_id, EntityKind};

/// A filter term resolved for one entity kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Lookup<K> {
    ById(i64),
    ByKeyword(K),
    BySubstring(String),
    All,
}

impl<K> Lookup<K> {
    pub(crate) fn resolve(
        conn: &Connection,
        kind: EntityKind,
        filter: Option<&str>,
        keyword: Option<K>,
    ) -> Result<Self> {
        if let Some(term) = filter {
            if let Some(id) = as_live_id(conn, kind, term)? {
                return Ok(Self::ById(id));
            }
        }
        if let Some(keyword) = keyword {
            return Ok(Self::ByKeyword(keyword));
        }
        Ok(match filter {
            Some(term) if !term.is_empty() => Self::BySubstring(term.to_string()),
            _ => Self::All,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HostKeyword {
    /// `dc`: hosts flagged as domain controllers, optionally in one domain.
    DomainControllers { domain: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CredentialKeyword {
    Kind(CredentialKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum GroupKeyword {
    Exact { name: String, domain: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ShareKeyword {
    /// Permission filter, optionally narrowed to one host and a name substring.
    Access {
        permission: SharePermission,
        host: Option<HostId>,
        name: Option<String>,
    },
}

const DC_KEYWORD: &str = "dc";

fn domain_filter(domain: Option<&str>) -> Option<String> {
    domain
        .map(normalize_domain)
        .filter(|d| !d.is_empty())
}

fn access_predicate(permission: SharePermission) -> &'static str {
    match permission {
        SharePermission::Read => "\"read\" = 1",
        SharePermission::Write => "\"write\" = 1",
        SharePermission::ReadWrite => "\"read\" = 1 AND \"write\" = 1",
    }
}

fn hosts(conn: &Connection, lookup: &Lookup<HostKeyword>) -> Result<Vec<Host>> {
    match lookup {
        Lookup::ById(id) => select(conn, Some("id = ?1"), params![*id]),
        Lookup::ByKeyword(HostKeyword::DomainControllers { domain: Some(domain) }) => select(
            conn,
            Some("dc = 1 AND LOWER(domain) = LOWER(?1)"),
            params![domain],
        ),
        Lookup::ByKeyword(HostKeyword::DomainControllers { domain: None }) => {
            select(conn, Some("dc = 1"), params![])
        }
        Lookup::BySubstring(term) => select(
            conn,
            Some("LOWER(ip) LIKE ?1 ESCAPE '\\' OR LOWER(hostname) LIKE ?1 ESCAPE '\\'"),
            params![contains_pattern(term)],
        ),
        Lookup::All => select(conn, None, params![]),
    }
}

fn credentials(conn: &Connection, lookup: &Lookup<CredentialKeyword>) -> Result<Vec<Credential>> {
    match lookup {
        Lookup::ById(id) => select(conn, Some("id = ?1"), params![*id]),
        Lookup::ByKeyword(CredentialKeyword::Kind(kind)) => select(
            conn,
            Some("LOWER(credtype) = LOWER(?1)"),
            params![kind.as_str()],
        ),
        Lookup::BySubstring(term) => select(
            conn,
            Some("LOWER(username) LIKE ?1 ESCAPE '\\'"),
            params![contains_pattern(term)],
        ),
        Lookup::All => select(conn, None, params![]),
    }
}

fn users(conn: &Connection, lookup: &Lookup<Infallible>) -> Result<Vec<Credential>> {
    match lookup {
        Lookup::ById(id) => select(conn, Some("id = ?1"), params![*id]),
        Lookup::ByKeyword(never) => match *never {},
        Lookup::BySubstring(term) => select(
            conn,
            Some("LOWER(username) LIKE ?1 ESCAPE '\\'"),
            params![contains_pattern(term)],
        ),
        Lookup::All => select(conn, None, params![]),
    }
}

fn groups(conn: &Connection, lookup: &Lookup<GroupKeyword>) -> Result<Vec<Group>> {
    match lookup {
        Lookup::ById(id) => select(conn, Some("id = ?1"), params![*id]),
        Lookup::ByKeyword(GroupKeyword::Exact { name, domain }) => select(
            conn,
            Some("LOWER(name) = LOWER(?1) AND LOWER(domain) = LOWER(?2)"),
            params![name, domain],
        ),
        Lookup::BySubstring(term) => select(
            conn,
            Some("LOWER(name) LIKE ?1 ESCAPE '\\'"),
            params![contains_pattern(term)],
        ),
        Lookup::All => select(conn, None, params![]),
    }
}

fn shares(conn: &Connection, lookup: &Lookup<ShareKeyword>) -> Result<Vec<Share>> {
    match lookup {
        Lookup::ById(id) => select(conn, Some("id = ?1"), params![*id]),
        Lookup::ByKeyword(ShareKeyword::Access {
            permission,
            host,
            name,
        }) => {
            let mut clause = access_predicate(*permission).to_string();
            let mut values = Vec::new();
            if let Some(host) = host {
                values.push(Value::Integer(host.0));
                clause.push_str(&format!(" AND computerid = ?{}", values.len()));
            }
            if let Some(name) = name {
                values.push(Value::Text(contains_pattern(name)));
                clause.push_str(&format!(" AND LOWER(name) LIKE ?{} ESCAPE '\\'", values.len()));
            }
            select(conn, Some(clause.as_str()), params_from_iter(values))
        }
        Lookup::BySubstring(term) => select(
            conn,
            Some("LOWER(name) LIKE ?1 ESCAPE '\\'"),
            params![contains_pattern(term)],
        ),
        Lookup::All => select(conn, None, params![]),
    }
}

/// Row count of every table.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TableCounts {
    pub hosts: u64,
    pub credentials: u64,
    pub groups: u64,
    pub shares: u64,
    pub admin_relations: u64,
    pub loggedin_relations: u64,
    pub group_relations: u64,
}

fn count(conn: &Connection, table: &str) -> Result<u64> {
    let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |r| r.get(0))?;
    Ok(u64::try_from(n).unwrap_or_default())
}

impl StoreClient {
    /// Hosts by id, the `dc` keyword (optionally within `domain`), or
    /// address/hostname substring.
    pub fn list_hosts(&self, filter: Option<&str>, domain: Option<&str>) -> Result<Vec<Host>> {
        self.read(|conn| {
            let keyword = filter
                .filter(|term| term.eq_ignore_ascii_case(DC_KEYWORD))
                .map(|_| HostKeyword::DomainControllers {
                    domain: domain_filter(domain),
                });
            let lookup = Lookup::resolve(conn, EntityKind::Host, filter, keyword)?;
            tracing::trace!(lookup = ?lookup, "Listing hosts");
            hosts(conn, &lookup)
        })
    }

    pub fn domain_controllers(&self, domain: Option<&str>) -> Result<Vec<Host>> {
        self.read(|conn| {
            hosts(
                conn,
                &Lookup::ByKeyword(HostKeyword::DomainControllers {
                    domain: domain_filter(domain),
                }),
            )
        })
    }

    pub fn get_host(&self, id: HostId) -> Result<Option<Host>> {
        self.read(|conn| Ok(hosts(conn, &Lookup::ById(id.0))?.into_iter().next()))
    }

    /// Credentials by id, by kind, or by username substring.
    pub fn list_credentials(
        &self,
        filter: Option<&str>,
        kind: Option<CredentialKind>,
    ) -> Result<Vec<Credential>> {
        self.read(|conn| {
            let lookup = Lookup::resolve(
                conn,
                EntityKind::Credential,
                filter,
                kind.map(CredentialKeyword::Kind),
            )?;
            credentials(conn, &lookup)
        })
    }

    pub fn get_credential(&self, id: CredentialId) -> Result<Option<Credential>> {
        self.read(|conn| Ok(credentials(conn, &Lookup::ById(id.0))?.into_iter().next()))
    }

    /// Every credential row, placeholders included, by id or username substring.
    pub fn list_users(&self, filter: Option<&str>) -> Result<Vec<Credential>> {
        self.read(|conn| {
            let lookup = Lookup::resolve(conn, EntityKind::Credential, filter, None)?;
            users(conn, &lookup)
        })
    }

    /// All rows for one (domain, username) pair.
    pub fn get_user(&self, domain: &str, username: &str) -> Result<Vec<Credential>> {
        self.read(|conn| {
            select(
                conn,
                Some("LOWER(domain) = LOWER(?1) AND LOWER(username) = LOWER(?2)"),
                params![normalize_domain(domain), username],
            )
        })
    }

    /// Groups by id, exact `(name, domain)`, or name substring.
    pub fn list_groups(
        &self,
        filter: Option<&str>,
        exact: Option<(&str, &str)>,
    ) -> Result<Vec<Group>> {
        self.read(|conn| {
            let keyword = exact.map(|(name, domain)| GroupKeyword::Exact {
                name: name.to_string(),
                domain: normalize_domain(domain),
            });
            let lookup = Lookup::resolve(conn, EntityKind::Group, filter, keyword)?;
            groups(conn, &lookup)
        })
    }

    pub fn get_group(&self, id: GroupId) -> Result<Option<Group>> {
        self.read(|conn| Ok(groups(conn, &Lookup::ById(id.0))?.into_iter().next()))
    }

    /// Shares by id, access permission (optionally on one host), or name
    /// substring. With both `access` and a non-id filter, the filter narrows
    /// the permission match by name.
    pub fn list_shares(
        &self,
        filter: Option<&str>,
        access: Option<(SharePermission, Option<HostId>)>,
    ) -> Result<Vec<Share>> {
        self.read(|conn| {
            let name = filter.filter(|term| !term.is_empty()).map(str::to_string);
            let keyword = access.map(|(permission, host)| ShareKeyword::Access {
                permission,
                host,
                name,
            });
            let lookup = Lookup::resolve(conn, EntityKind::Share, filter, keyword)?;
            shares(conn, &lookup)
        })
    }

    pub fn shares_by_access(
        &self,
        permission: SharePermission,
        host: Option<HostId>,
    ) -> Result<Vec<Share>> {
        self.read(|conn| {
            shares(
                conn,
                &Lookup::ByKeyword(ShareKeyword::Access {
                    permission,
                    host,
                    name: None,
                }),
            )
        })
    }

    pub fn get_share(&self, id: ShareId) -> Result<Option<Share>> {
        self.read(|conn| Ok(shares(conn, &Lookup::ById(id.0))?.into_iter().next()))
    }

    /// Credentials that reached `share_name` on `host` with at least
    /// `permission`.
    pub fn credentials_with_share_access(
        &self,
        host: HostId,
        share_name: &str,
        permission: SharePermission,
    ) -> Result<Vec<CredentialId>> {
        self.read(|conn| {
            let sql = format!(
                "SELECT DISTINCT userid FROM shares \
                 WHERE computerid = ?1 AND name = ?2 AND {} ORDER BY userid",
                access_predicate(permission)
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let ids = stmt
                .query_map(params![host.0, share_name], |r| r.get::<_, i64>(0))?
                .map(|id| id.map(CredentialId))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
    }

    /// True when the credential's domain is the hostname of a stored host,
    /// i.e. it is a local account of that machine.
    pub fn is_credential_local(&self, id: CredentialId) -> Result<bool> {
        self.read(|conn| {
            let domain: Option<Option<String>> = conn
                .query_row("SELECT domain FROM users WHERE id = ?1", params![id.0], |r| {
                    r.get(0)
                })
                .optional()?;
            let Some(Some(domain)) = domain else {
                return Ok(false);
            };
            let matches: i64 = conn.query_row(
                "SELECT COUNT(*) FROM computers WHERE LOWER(hostname) = LOWER(?1)",
                params![domain],
                |r| r.get(0),
            )?;
            Ok(matches > 0)
        })
    }

    pub fn counts(&self) -> Result<TableCounts> {
        self.read(|conn| {
            Ok(TableCounts {
                hosts: count(conn, schema::COMPUTERS)?,
                credentials: count(conn, schema::USERS)?,
                groups: count(conn, schema::GROUPS)?,
                shares: count(conn, schema::SHARES)?,
                admin_relations: count(conn, schema::ADMIN_RELATIONS)?,
                loggedin_relations: count(conn, schema::LOGGEDIN_RELATIONS)?,
                group_relations: count(conn, schema::GROUP_RELATIONS)?,
            })
        })
    }
}
