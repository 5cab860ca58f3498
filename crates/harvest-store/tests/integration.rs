//! Integration tests for harvest-store against on-disk engagement files.
//!
//! Run with: cargo test --package harvest-store --test integration

use std::thread;

use harvest_core::config::DatabaseConfig;
use harvest_core::{CredentialKind, CredentialObservation, HostObservation, ShareObservation};
use harvest_store::{CredentialRef, EdgeFilter, RevokeScope, Snapshot, StoreClient, StoreError};

fn db_config(dir: &tempfile::TempDir) -> DatabaseConfig {
    DatabaseConfig {
        path: dir.path().join("engagement.db").display().to_string(),
        ..DatabaseConfig::default()
    }
}

#[test]
fn test_recon_flow_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let store = StoreClient::open(&db_config(&dir)).unwrap();

    let host = store
        .upsert_host(&HostObservation::new("10.0.0.5").domain("corp.local").dc(true))
        .unwrap();
    let cred = store
        .upsert_credential(&CredentialObservation::new(
            CredentialKind::Hash,
            "corp.local",
            "Administrator",
            "aad3b435b51404eeaad3b435b51404ee:31d6cfe0d16ae931b73c59d7e0c089c0",
        ))
        .unwrap()
        .unwrap();
    assert_eq!(store.grant_admin(&CredentialRef::Id(cred), "10.0.0.5").unwrap(), 1);

    let edges = store.get_admin_relations(EdgeFilter::ByTarget(host)).unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].credential_id, cred);
    assert_eq!(edges[0].host_id, host);

    let stored_host = store.get_host(host).unwrap().unwrap();
    let stored_cred = store.get_credential(cred).unwrap().unwrap();
    assert_eq!(stored_host.domain.as_deref(), Some("CORP"));
    assert_eq!(stored_cred.domain, "CORP");

    // Re-running the same sweep changes nothing.
    let before = store.counts().unwrap();
    store
        .upsert_host(&HostObservation::new("10.0.0.5").domain("corp.local").dc(true))
        .unwrap();
    store.grant_admin(&CredentialRef::Id(cred), "10.0.0.5").unwrap();
    assert_eq!(store.counts().unwrap(), before);
}

#[test]
fn test_engagement_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = db_config(&dir);

    let (host, cred) = {
        let store = StoreClient::open(&config).unwrap();
        let host = store
            .upsert_host(&HostObservation::new("10.0.0.20").hostname("SQL01").signing(false))
            .unwrap();
        let cred = store
            .upsert_credential(&CredentialObservation::new(
                CredentialKind::Plaintext,
                "CORP",
                "sqlsvc",
                "Summer2024!",
            ))
            .unwrap()
            .unwrap();
        store.record_logged_in(cred, host).unwrap();
        (host, cred)
    };

    let store = StoreClient::open(&config).unwrap();
    let hosts = store.list_hosts(Some("sql"), None).unwrap();
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].id, host);
    assert_eq!(hosts[0].signing, Some(false));

    let sessions = store.get_loggedin_relations(EdgeFilter::Pair(cred, host)).unwrap();
    assert_eq!(sessions.len(), 1);
}

#[test]
fn test_open_without_create_fails_on_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        create_if_missing: false,
        ..db_config(&dir)
    };
    assert!(matches!(
        StoreClient::open(&config),
        Err(StoreError::StorageUnavailable(_))
    ));
}

#[test]
fn test_concurrent_writers_do_not_duplicate() {
    let dir = tempfile::tempdir().unwrap();
    let config = db_config(&dir);
    let shared = StoreClient::open(&config).unwrap();

    thread::scope(|s| {
        for worker in 0..4 {
            // Half the workers share a handle, half open their own connection.
            let store = if worker % 2 == 0 {
                shared.clone()
            } else {
                StoreClient::open(&config).unwrap()
            };
            s.spawn(move || {
                for round in 0..25 {
                    store
                        .upsert_host(
                            &HostObservation::new("10.0.0.99")
                                .hostname("RACE01")
                                .smbv1(round % 2 == 0),
                        )
                        .unwrap();
                    store.upsert_group("corp.local", "Domain Users").unwrap();
                    store.upsert_user("CORP", "racer", None).unwrap();
                }
            });
        }
    });

    assert_eq!(shared.list_hosts(Some("10.0.0.99"), None).unwrap().len(), 1);
    assert_eq!(shared.list_groups(None, None).unwrap().len(), 1);
    assert_eq!(shared.get_user("CORP", "racer").unwrap().len(), 1);
}

#[test]
fn test_export_and_merge_between_engagements() {
    let dir = tempfile::tempdir().unwrap();
    let source = StoreClient::open(&DatabaseConfig {
        path: dir.path().join("source.db").display().to_string(),
        ..DatabaseConfig::default()
    })
    .unwrap();
    let target = StoreClient::open(&DatabaseConfig {
        path: dir.path().join("target.db").display().to_string(),
        ..DatabaseConfig::default()
    })
    .unwrap();

    let src_host = source
        .upsert_host(&HostObservation::new("10.1.0.10").hostname("FS01"))
        .unwrap();
    let src_cred = source
        .upsert_credential(&CredentialObservation::new(
            CredentialKind::Plaintext,
            "LAB",
            "backup",
            "pw",
        ))
        .unwrap()
        .unwrap();
    source
        .add_share(&ShareObservation {
            host_id: src_host,
            credential_id: src_cred,
            name: "Backups".to_string(),
            remark: Some("nightly".to_string()),
            read: true,
            write: true,
        })
        .unwrap();
    source.grant_admin(&CredentialRef::Id(src_cred), "10.1.0.10").unwrap();

    // The target already knows the host under another id.
    target.upsert_host(&HostObservation::new("10.9.9.9")).unwrap();
    target.upsert_host(&HostObservation::new("10.1.0.10").os("Windows Server 2022")).unwrap();

    let json = source.export().unwrap().to_json().unwrap();
    let report = target.merge(&Snapshot::from_json(&json).unwrap()).unwrap();
    assert_eq!(report.hosts, 1);
    assert_eq!(report.credentials, 1);
    assert_eq!(report.shares, 1);
    assert_eq!(report.edges_created, 1);
    assert_eq!(report.skipped, 0);

    let merged = &target.list_hosts(Some("10.1.0.10"), None).unwrap()[0];
    assert_eq!(merged.hostname.as_deref(), Some("FS01"));
    assert_eq!(merged.os.as_deref(), Some("Windows Server 2022"));

    let rw = target
        .shares_by_access(harvest_core::SharePermission::ReadWrite, Some(merged.id))
        .unwrap();
    assert_eq!(rw.len(), 1);

    // Merging the same snapshot again is a no-op.
    let again = target.merge(&Snapshot::from_json(&json).unwrap()).unwrap();
    assert_eq!(again.edges_created, 0);
    assert_eq!(target.counts().unwrap().shares, 1);
}

#[test]
fn test_revocations_and_removal() {
    let dir = tempfile::tempdir().unwrap();
    let store = StoreClient::open(&db_config(&dir)).unwrap();

    let web = store.upsert_host(&HostObservation::new("10.0.2.1")).unwrap();
    let app = store.upsert_host(&HostObservation::new("10.0.2.2")).unwrap();
    let cred = store
        .upsert_credential(&CredentialObservation::new(
            CredentialKind::Hash,
            "CORP",
            "helpdesk",
            "nt",
        ))
        .unwrap()
        .unwrap();
    store.grant_admin(&CredentialRef::Id(cred), "10.0.2.1").unwrap();
    store.grant_admin(&CredentialRef::Id(cred), "10.0.2.2").unwrap();
    store.record_logged_in(cred, app).unwrap();

    assert_eq!(store.revoke_admin(&RevokeScope::Targets(vec![web])).unwrap(), 1);
    let remaining = store.get_admin_relations(EdgeFilter::ByCredential(cred)).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].host_id, app);

    assert_eq!(store.remove_credentials(&[cred]).unwrap(), 1);
    let counts = store.counts().unwrap();
    assert_eq!(counts.credentials, 0);
    assert_eq!(counts.admin_relations, 0);
    assert_eq!(counts.loggedin_relations, 0);
    assert_eq!(counts.hosts, 2);
}
