//! Row decoding: one `Record` impl per table.

use rusqlite::{Connection, Params, Row};

use harvest_core::{
    AdminRelation, Credential, CredentialId, CredentialKind, Group, GroupId, GroupRelation, Host,
    HostId, LoggedInRelation, RelationId, Share, ShareId,
};

use crate::client::Result;
use crate::schema;

/// A type decoded from one row of a fixed table.
pub(crate) trait Record: Sized {
    const TABLE: &'static str;
    /// Select list, in the table's column order.
    const COLUMNS: &'static str;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// `SELECT` rows of `R`, optionally restricted by a `WHERE` clause, ordered by id.
pub(crate) fn select<R: Record, P: Params>(
    conn: &Connection,
    clause: Option<&str>,
    params: P,
) -> Result<Vec<R>> {
    let sql = match clause {
        Some(clause) => format!(
            "SELECT {} FROM \"{}\" WHERE {clause} ORDER BY id",
            R::COLUMNS,
            R::TABLE
        ),
        None => format!("SELECT {} FROM \"{}\" ORDER BY id", R::COLUMNS, R::TABLE),
    };

    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(params, R::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Build a `LIKE` pattern matching `term` as a literal, lowercased substring.
/// Pair with `LIKE ? ESCAPE '\'`.
pub(crate) fn contains_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

impl Record for Host {
    const TABLE: &'static str = schema::COMPUTERS;
    const COLUMNS: &'static str =
        "id, ip, hostname, domain, os, dc, smbv1, signing, spooler, zerologon, petitpotam";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Host {
            id: HostId(row.get(0)?),
            ip: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            hostname: row.get(2)?,
            domain: row.get(3)?,
            os: row.get(4)?,
            dc: row.get(5)?,
            smbv1: row.get(6)?,
            signing: row.get(7)?,
            spooler: row.get(8)?,
            zerologon: row.get(9)?,
            petitpotam: row.get(10)?,
        })
    }
}

impl Record for Credential {
    const TABLE: &'static str = schema::USERS;
    // Older tooling writes '' into the integer pillaged column.
    const COLUMNS: &'static str = "id, domain, username, password, credtype, \
         NULLIF(CAST(pillaged_from_computerid AS INTEGER), 0)";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let kind: Option<String> = row.get(4)?;
        Ok(Credential {
            id: CredentialId(row.get(0)?),
            domain: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            username: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            secret: non_empty(row.get(3)?),
            kind: kind.as_deref().and_then(CredentialKind::from_stored),
            pillaged_from: row.get::<_, Option<i64>>(5)?.map(HostId),
        })
    }
}

impl Record for Group {
    const TABLE: &'static str = schema::GROUPS;
    const COLUMNS: &'static str = "id, domain, name";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Group {
            id: GroupId(row.get(0)?),
            domain: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        })
    }
}

impl Record for Share {
    const TABLE: &'static str = schema::SHARES;
    // computerid is declared text; host ids round-trip through it as digits.
    const COLUMNS: &'static str =
        "id, CAST(computerid AS INTEGER), userid, name, remark, \"read\", \"write\"";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Share {
            id: ShareId(row.get(0)?),
            host_id: HostId(row.get(1)?),
            credential_id: CredentialId(row.get(2)?),
            name: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            remark: row.get(4)?,
            read: row.get::<_, Option<bool>>(5)?.unwrap_or(false),
            write: row.get::<_, Option<bool>>(6)?.unwrap_or(false),
        })
    }
}

impl Record for AdminRelation {
    const TABLE: &'static str = schema::ADMIN_RELATIONS;
    const COLUMNS: &'static str = "id, userid, computerid";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(AdminRelation {
            id: RelationId(row.get(0)?),
            credential_id: CredentialId(row.get(1)?),
            host_id: HostId(row.get(2)?),
        })
    }
}

impl Record for LoggedInRelation {
    const TABLE: &'static str = schema::LOGGEDIN_RELATIONS;
    const COLUMNS: &'static str = "id, userid, computerid";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(LoggedInRelation {
            id: RelationId(row.get(0)?),
            credential_id: CredentialId(row.get(1)?),
            host_id: HostId(row.get(2)?),
        })
    }
}

impl Record for GroupRelation {
    const TABLE: &'static str = schema::GROUP_RELATIONS;
    const COLUMNS: &'static str = "id, userid, groupid";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(GroupRelation {
            id: RelationId(row.get(0)?),
            credential_id: CredentialId(row.get(1)?),
            group_id: GroupId(row.get(2)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    #[test]
    fn test_contains_pattern_escapes_wildcards() {
        assert_eq!(contains_pattern("Admin"), "%admin%");
        assert_eq!(contains_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(contains_pattern("a\\b"), "%a\\\\b%");
    }

    #[test]
    fn test_legacy_placeholder_rows_decode_as_empty() {
        let conn = Connection::open_in_memory().unwrap();
        schema::initialize(&conn).unwrap();
        // Older engagement files hold '' in the pillaged-from column, which
        // the foreign key would reject on insert.
        conn.pragma_update(None, "foreign_keys", "OFF").unwrap();
        conn.execute(
            "INSERT INTO users (domain, username, password, credtype, pillaged_from_computerid)
             VALUES ('CORP', 'bob', '', '', '')",
            [],
        )
        .unwrap();

        let creds: Vec<Credential> = select(&conn, None, params![]).unwrap();
        assert_eq!(creds.len(), 1);
        assert!(creds[0].is_placeholder());
        assert_eq!(creds[0].username, "bob");
        assert_eq!(creds[0].secret, None);
        assert_eq!(creds[0].kind, None);
        assert_eq!(creds[0].pillaged_from, None);
    }

    #[test]
    fn test_share_host_id_decodes_from_text_column() {
        let conn = Connection::open_in_memory().unwrap();
        schema::initialize(&conn).unwrap();
        conn.execute("INSERT INTO computers (id, ip) VALUES (7, '10.0.0.7')", [])
            .unwrap();
        conn.execute("INSERT INTO users (id, domain, username) VALUES (3, 'CORP', 'a')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO shares (computerid, userid, name, remark, read, write)
             VALUES (?1, 3, 'C$', 'Default share', 1, 0)",
            [7_i64],
        )
        .unwrap();

        let shares: Vec<Share> = select(&conn, None, params![]).unwrap();
        assert_eq!(shares[0].host_id, HostId(7));
        assert!(shares[0].read);
        assert!(!shares[0].write);
    }
}
