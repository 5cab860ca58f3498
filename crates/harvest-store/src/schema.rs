//! Engagement table layout.
//!
//! Table names, column names and column types are the interchange format
//! between engagement files and must not change. Creation is idempotent so
//! existing engagements open as-is.

use rusqlite::Connection;

use crate::client::Result;

pub const COMPUTERS: &str = "computers";
pub const USERS: &str = "users";
pub const GROUPS: &str = "groups";
pub const SHARES: &str = "shares";
pub const ADMIN_RELATIONS: &str = "admin_relations";
pub const LOGGEDIN_RELATIONS: &str = "loggedin_relations";
pub const GROUP_RELATIONS: &str = "group_relations";

/// Every table, children before parents, so deletes respect foreign keys.
pub const TABLES: [&str; 7] = [
    ADMIN_RELATIONS,
    LOGGEDIN_RELATIONS,
    GROUP_RELATIONS,
    SHARES,
    USERS,
    GROUPS,
    COMPUTERS,
];

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS "computers" (
    "id" integer PRIMARY KEY,
    "ip" text,
    "hostname" text,
    "domain" text,
    "os" text,
    "dc" boolean,
    "smbv1" boolean,
    "signing" boolean,
    "spooler" boolean,
    "zerologon" boolean,
    "petitpotam" boolean
);

CREATE TABLE IF NOT EXISTS "users" (
    "id" integer PRIMARY KEY,
    "domain" text,
    "username" text,
    "password" text,
    "credtype" text,
    "pillaged_from_computerid" integer,
    FOREIGN KEY(pillaged_from_computerid) REFERENCES computers(id)
);

CREATE TABLE IF NOT EXISTS "groups" (
    "id" integer PRIMARY KEY,
    "domain" text,
    "name" text
);

CREATE TABLE IF NOT EXISTS "admin_relations" (
    "id" integer PRIMARY KEY,
    "userid" integer,
    "computerid" integer,
    FOREIGN KEY(userid) REFERENCES users(id),
    FOREIGN KEY(computerid) REFERENCES computers(id)
);

CREATE TABLE IF NOT EXISTS "loggedin_relations" (
    "id" integer PRIMARY KEY,
    "userid" integer,
    "computerid" integer,
    FOREIGN KEY(userid) REFERENCES users(id),
    FOREIGN KEY(computerid) REFERENCES computers(id)
);

CREATE TABLE IF NOT EXISTS "group_relations" (
    "id" integer PRIMARY KEY,
    "userid" integer,
    "groupid" integer,
    FOREIGN KEY(userid) REFERENCES users(id),
    FOREIGN KEY(groupid) REFERENCES groups(id)
);

CREATE TABLE IF NOT EXISTS "shares" (
    "id" integer PRIMARY KEY,
    "computerid" text,
    "userid" integer,
    "name" text,
    "remark" text,
    "read" boolean,
    "write" boolean,
    FOREIGN KEY(userid) REFERENCES users(id),
    UNIQUE(computerid, userid, name)
);
"#;

/// Create any missing tables.
pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch(DDL)?;
    tracing::debug!(tables = TABLES.len(), "Engagement schema ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        initialize(&conn).unwrap();

        for table in TABLES {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }

    #[test]
    fn test_column_layout_matches_engagement_format() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let expected: [(&str, &[(&str, &str)]); 7] = [
            (
                COMPUTERS,
                &[
                    ("id", "integer"),
                    ("ip", "text"),
                    ("hostname", "text"),
                    ("domain", "text"),
                    ("os", "text"),
                    ("dc", "boolean"),
                    ("smbv1", "boolean"),
                    ("signing", "boolean"),
                    ("spooler", "boolean"),
                    ("zerologon", "boolean"),
                    ("petitpotam", "boolean"),
                ],
            ),
            (
                USERS,
                &[
                    ("id", "integer"),
                    ("domain", "text"),
                    ("username", "text"),
                    ("password", "text"),
                    ("credtype", "text"),
                    ("pillaged_from_computerid", "integer"),
                ],
            ),
            (GROUPS, &[("id", "integer"), ("domain", "text"), ("name", "text")]),
            (
                ADMIN_RELATIONS,
                &[("id", "integer"), ("userid", "integer"), ("computerid", "integer")],
            ),
            (
                LOGGEDIN_RELATIONS,
                &[("id", "integer"), ("userid", "integer"), ("computerid", "integer")],
            ),
            (
                GROUP_RELATIONS,
                &[("id", "integer"), ("userid", "integer"), ("groupid", "integer")],
            ),
            (
                SHARES,
                &[
                    ("id", "integer"),
                    ("computerid", "text"),
                    ("userid", "integer"),
                    ("name", "text"),
                    ("remark", "text"),
                    ("read", "boolean"),
                    ("write", "boolean"),
                ],
            ),
        ];

        for (table, want) in expected {
            let mut stmt = conn
                .prepare(&format!("PRAGMA table_info(\"{table}\")"))
                .unwrap();
            let columns: Vec<(String, String)> = stmt
                .query_map([], |r| Ok((r.get(1)?, r.get(2)?)))
                .unwrap()
                .collect::<std::result::Result<_, _>>()
                .unwrap();
            assert_eq!(columns.len(), want.len(), "column count of {table}");
            for ((name, ty), (want_name, want_ty)) in columns.iter().zip(want) {
                assert_eq!(name, want_name, "column order of {table}");
                // SQLite may report declared types in another case.
                assert!(
                    ty.eq_ignore_ascii_case(want_ty),
                    "{table}.{name} is {ty}, expected {want_ty}"
                );
            }
        }
    }
}
