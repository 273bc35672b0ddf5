//! Integration tests for topology operations against a fake cluster.

mod common;

use common::{host, manager, Call, FakeCluster, CONF_DIR, DATA_DIR, DEFAULT_HBA};
use pgtopo_core::{AuthorizationOutcome, NodeRole, PromoteOptions, TopoError};

const ENTRY_FOR_2: &str = "host replication postgres 10.0.0.2/32 trust";
const ENTRY_FOR_3: &str = "host replication postgres 10.0.0.3/32 trust";

fn hba(cluster: &FakeCluster, h: &str) -> String {
    cluster
        .file(h, &format!("{CONF_DIR}/pg_hba.conf"))
        .unwrap_or_default()
}

#[tokio::test]
async fn setup_primary_pushes_config_and_restarts() {
    let cluster = FakeCluster::new();
    let topo = manager(&cluster);

    let node = topo
        .setup_primary(&host("10.0.0.1"), "9.3", "main", 5432)
        .await
        .unwrap();

    assert_eq!(node.role, NodeRole::Primary);
    assert_eq!(node.replicates_from, None);

    let conf = cluster
        .file("10.0.0.1", &format!("{CONF_DIR}/postgresql.conf"))
        .unwrap();
    assert!(conf.contains("unix_socket_directories"));
    assert!(conf.contains("port = 5432"));

    let cmds = cluster.commands_on("10.0.0.1");
    assert_eq!(
        cmds,
        vec![
            format!("chown -R postgres:postgres {DATA_DIR}"),
            format!("chown -R postgres:postgres {CONF_DIR}"),
            "/etc/init.d/postgresql stop".to_string(),
            "/etc/init.d/postgresql start".to_string(),
        ]
    );
    assert!(!cluster.calls().iter().any(|c| matches!(c, Call::Confirm { .. })));
}

#[tokio::test]
async fn attach_is_idempotent_on_the_primary() {
    let cluster = FakeCluster::new();
    let topo = manager(&cluster);
    let (p, s) = (host("10.0.0.1"), host("10.0.0.2"));
    topo.setup_primary(&p, "9.3", "main", 5432).await.unwrap();

    let first = topo.attach_standby(&p, &s, "9.3", "main", 5432).await.unwrap();
    assert_eq!(first.authorization, AuthorizationOutcome::Appended);

    cluster.clear_calls();
    let second = topo.attach_standby(&p, &s, "9.3", "main", 5432).await.unwrap();
    assert_eq!(second.authorization, AuthorizationOutcome::AlreadyPresent);

    let text = hba(&cluster, "10.0.0.1");
    assert_eq!(text.lines().filter(|l| *l == ENTRY_FOR_2).count(), 1);
    assert!(text.starts_with(DEFAULT_HBA));

    let on_primary = cluster.commands_on("10.0.0.1");
    assert!(!on_primary.iter().any(|c| c.starts_with("tee")));
    assert!(!on_primary.iter().any(|c| c.ends_with("reload")));
}

#[tokio::test]
async fn grant_precedes_base_backup() {
    let cluster = FakeCluster::new();
    let topo = manager(&cluster);
    topo.setup_primary(&host("10.0.0.1"), "9.3", "main", 5432)
        .await
        .unwrap();
    cluster.clear_calls();

    topo.attach_standby(&host("10.0.0.1"), &host("10.0.0.2"), "9.3", "main", 5432)
        .await
        .unwrap();

    let append = cluster
        .position(|c| c.program() == Some("tee") && c.host().map(|h| h.as_str()) == Some("10.0.0.1"))
        .expect("entry appended on primary");
    let reload = cluster
        .position(|c| matches!(c, Call::Run { command, .. } if command.arg_list().last().map(String::as_str) == Some("reload")))
        .expect("primary reloaded");
    let first_standby_call = cluster
        .position(|c| c.host().map(|h| h.as_str()) == Some("10.0.0.2"))
        .unwrap();
    let backup = cluster
        .position(|c| c.program() == Some("pg_basebackup"))
        .expect("base backup issued");

    assert!(append < reload);
    assert!(reload < first_standby_call);
    assert!(reload < backup);
}

#[tokio::test]
async fn base_backup_targets_primary_from_standby() {
    let cluster = FakeCluster::new();
    cluster.seed_hba("10.0.0.1");
    let topo = manager(&cluster);
    topo.attach_standby(&host("10.0.0.1"), &host("10.0.0.2"), "9.3", "main", 5433)
        .await
        .unwrap();

    let cmds = cluster.commands_on("10.0.0.2");
    assert!(cmds.contains(&format!("find {DATA_DIR} -mindepth 1 -delete")));
    assert!(cmds.contains(&format!(
        "pg_basebackup -D {DATA_DIR} -U postgres -h 10.0.0.1 -p 5433"
    )));
    assert!(cmds.contains(&"pg_ctlcluster 9.3 main stop".to_string()));

    let recovery = cluster
        .file("10.0.0.2", &format!("{DATA_DIR}/recovery.conf"))
        .unwrap();
    assert!(recovery.contains("standby_mode = 'on'"));
    assert!(recovery.contains("host=10.0.0.1 port=5433 user=postgres"));

    let prompt = cluster
        .calls()
        .into_iter()
        .find_map(|c| match c {
            Call::Confirm { prompt } => Some(prompt),
            _ => None,
        })
        .unwrap();
    assert!(prompt.contains("10.0.0.2"));
    assert!(prompt.contains("List of databases"));
}

#[tokio::test]
async fn declined_reset_skips_destruction_but_still_restarts() {
    let cluster = FakeCluster::new();
    cluster.answer(false);
    cluster.seed_hba("10.0.0.1");
    let topo = manager(&cluster);

    let report = topo
        .attach_standby(&host("10.0.0.1"), &host("10.0.0.2"), "9.3", "main", 5432)
        .await
        .unwrap();
    assert!(report.reset_declined);

    let cmds = cluster.commands_on("10.0.0.2");
    assert!(!cmds.iter().any(|c| c.starts_with("find")));
    assert!(!cmds.iter().any(|c| c.starts_with("pg_basebackup")));
    assert!(!cmds.iter().any(|c| c.starts_with("pg_ctlcluster")));
    assert!(!cluster.calls().iter().any(|c| c.is_upload_to("recovery.conf")));

    assert!(cmds.contains(&format!("chown -R postgres:postgres {DATA_DIR}")));
    assert!(cmds.contains(&format!("chown -R postgres:postgres {CONF_DIR}")));
    assert_eq!(cmds[cmds.len() - 2], "/etc/init.d/postgresql stop");
    assert_eq!(cmds[cmds.len() - 1], "/etc/init.d/postgresql start");
}

#[tokio::test]
async fn failed_base_backup_aborts_and_keeps_grant() {
    let cluster = FakeCluster::new();
    cluster.fail_program("pg_basebackup");
    cluster.seed_hba("10.0.0.1");
    let topo = manager(&cluster);

    let err = topo
        .attach_standby(&host("10.0.0.1"), &host("10.0.0.2"), "9.3", "main", 5432)
        .await
        .unwrap_err();
    match err {
        TopoError::Exec(e) => assert!(e.to_string().contains("injected failure")),
        other => panic!("unexpected error: {other}"),
    }

    assert!(hba(&cluster, "10.0.0.1").contains(ENTRY_FOR_2));
    let cmds = cluster.commands_on("10.0.0.2");
    assert!(!cmds.iter().any(|c| c.starts_with("chown")));
    assert!(!cluster.calls().iter().any(|c| c.is_upload_to("recovery.conf")));
}

#[tokio::test]
async fn failed_start_is_fatal_but_failed_stop_is_not() {
    let cluster = FakeCluster::new();
    // pg_ctlcluster stop always reports "not running" in the fake.
    cluster.seed_hba("10.0.0.1");
    let topo = manager(&cluster);
    topo.attach_standby(&host("10.0.0.1"), &host("10.0.0.2"), "9.3", "main", 5432)
        .await
        .unwrap();

    let cluster = FakeCluster::new();
    cluster.fail_program("/etc/init.d/postgresql");
    let topo = manager(&cluster);
    assert!(topo
        .setup_primary(&host("10.0.0.1"), "9.3", "main", 5432)
        .await
        .is_err());
}

#[tokio::test]
async fn self_attach_is_rejected_before_any_remote_call() {
    let cluster = FakeCluster::new();
    let topo = manager(&cluster);
    let err = topo
        .attach_standby(&host("10.0.0.1"), &host("10.0.0.1"), "9.3", "main", 5432)
        .await
        .unwrap_err();
    assert!(matches!(err, TopoError::Context(_)));
    assert!(cluster.calls().is_empty());
}

#[tokio::test]
async fn promote_only_touches_the_promoted_node() {
    let cluster = FakeCluster::new();
    cluster.seed_hba("10.0.0.1");
    let topo = manager(&cluster);
    topo.attach_standby(&host("10.0.0.1"), &host("10.0.0.2"), "9.3", "main", 5432)
        .await
        .unwrap();
    cluster.clear_calls();

    let options = PromoteOptions {
        push_key: true,
        generate_key: true,
        ..PromoteOptions::default()
    };
    let node = topo
        .promote(&host("10.0.0.2"), "9.3", "main", &options)
        .await
        .unwrap();
    assert_eq!(node.role, NodeRole::Primary);

    let calls = cluster.calls();
    assert!(calls
        .iter()
        .filter_map(Call::host)
        .all(|h| h.as_str() == "10.0.0.2"));
    for call in &calls {
        if let Call::Run { command, .. } = call {
            assert!(!command.to_shell().contains("10.0.0.1"));
        }
    }

    let promote = calls
        .iter()
        .find_map(|c| match c {
            Call::Run { target, command } if command.program().ends_with("/pg_ctl") => {
                Some((target.clone(), command.to_shell()))
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(promote.0.user.as_deref(), Some("postgres"));
    assert_eq!(
        promote.1,
        format!("/usr/lib/postgresql/9.3/bin/pg_ctl -D {DATA_DIR}/ promote")
    );
    assert_eq!(cluster.replicates_from("10.0.0.2"), Some(None));
}

#[tokio::test]
async fn promote_of_a_primary_surfaces_remote_error() {
    let cluster = FakeCluster::new();
    let topo = manager(&cluster);
    topo.setup_primary(&host("10.0.0.1"), "9.3", "main", 5432)
        .await
        .unwrap();

    let err = topo
        .promote(&host("10.0.0.1"), "9.3", "main", &PromoteOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not in standby mode"));
}

#[tokio::test]
async fn unexpected_grep_status_is_fatal() {
    let cluster = FakeCluster::new();
    let topo = manager(&cluster);
    // No pg_hba.conf on the primary: grep exits 2.
    let err = topo
        .attach_standby(&host("10.0.0.1"), &host("10.0.0.2"), "9.3", "main", 5432)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("status 2"));
    assert!(cluster.commands_on("10.0.0.2").is_empty());
}

#[tokio::test]
async fn plan_exposes_phases() {
    let cluster = FakeCluster::new();
    let topo = manager(&cluster);
    topo.setup_primary(&host("10.0.0.1"), "9.3", "main", 5432)
        .await
        .unwrap();
    cluster.clear_calls();

    let plan = topo
        .plan_attach(&host("10.0.0.1"), &host("10.0.0.3"), "9.3", "main", 5432)
        .unwrap();
    assert_eq!(plan.authorization_entry().unwrap(), ENTRY_FOR_3);
    assert!(cluster.calls().is_empty());

    let authorized = plan.authorize().await.unwrap();
    assert_eq!(authorized.authorization(), AuthorizationOutcome::Appended);
    assert!(cluster.commands_on("10.0.0.3").is_empty());

    let report = authorized.provision().await.unwrap();
    assert_eq!(report.standby.replicates_from, Some(host("10.0.0.1")));
}

#[tokio::test]
async fn failover_scenario() {
    let cluster = FakeCluster::new();
    let topo = manager(&cluster);
    let (n1, n2, n3) = (host("10.0.0.1"), host("10.0.0.2"), host("10.0.0.3"));

    topo.setup_primary(&n1, "9.3", "main", 5432).await.unwrap();
    topo.attach_standby(&n1, &n2, "9.3", "main", 5432).await.unwrap();
    topo.attach_standby(&n1, &n3, "9.3", "main", 5432).await.unwrap();
    assert_eq!(cluster.replicates_from("10.0.0.3"), Some(Some("10.0.0.1".to_string())));

    let promoted = topo
        .promote(&n2, "9.3", "main", &PromoteOptions::default())
        .await
        .unwrap();
    let report = topo.attach_standby(&n2, &n3, "9.3", "main", 5432).await.unwrap();

    assert_eq!(promoted.role, NodeRole::Primary);
    assert_eq!(report.standby.role, NodeRole::Standby);
    assert_eq!(report.standby.replicates_from, Some(n2.clone()));

    assert_eq!(cluster.replicates_from("10.0.0.2"), Some(None));
    assert_eq!(cluster.replicates_from("10.0.0.3"), Some(Some("10.0.0.2".to_string())));
    assert!(hba(&cluster, "10.0.0.2").lines().any(|l| l == ENTRY_FOR_3));
    assert!(hba(&cluster, "10.0.0.1").lines().any(|l| l == ENTRY_FOR_2));
    assert!(hba(&cluster, "10.0.0.1").lines().any(|l| l == ENTRY_FOR_3));
}

#[tokio::test]
async fn tolerated_failures_do_not_abort() {
    let cluster = FakeCluster::new();
    cluster.fail_program("su");
    cluster.seed_hba("10.0.0.1");
    let topo = manager(&cluster);
    let report = topo
        .attach_standby(&host("10.0.0.1"), &host("10.0.0.2"), "9.3", "main", 5432)
        .await
        .unwrap();
    assert!(!report.reset_declined);

    let prompt = cluster
        .calls()
        .into_iter()
        .find_map(|c| match c {
            Call::Confirm { prompt } => Some(prompt),
            _ => None,
        })
        .unwrap();
    assert!(prompt.contains("injected failure"));
}

#[tokio::test]
async fn versions_after_11_are_rejected_before_any_remote_call() {
    let cluster = FakeCluster::new();
    cluster.put_file("10.0.0.1", "/etc/postgresql/11/main/pg_hba.conf", DEFAULT_HBA);
    let topo = manager(&cluster);

    topo.attach_standby(&host("10.0.0.1"), &host("10.0.0.2"), "11", "main", 5432)
        .await
        .unwrap();
    assert!(cluster.calls().iter().any(|c| c.is_upload_to("recovery.conf")));

    cluster.clear_calls();
    let err = topo
        .attach_standby(&host("10.0.0.1"), &host("10.0.0.3"), "13", "main", 5432)
        .await
        .unwrap_err();
    assert!(matches!(err, TopoError::Context(_)));
    assert!(cluster.calls().is_empty());
}

#[tokio::test]
async fn hostname_standby_gets_a_bare_hba_address() {
    let cluster = FakeCluster::new();
    cluster.seed_hba("db1.internal");
    let topo = manager(&cluster);

    topo.attach_standby(&host("db1.internal"), &host("db2.internal"), "9.3", "main", 5432)
        .await
        .unwrap();

    let text = hba(&cluster, "db1.internal");
    assert!(text
        .lines()
        .any(|l| l == "host replication postgres db2.internal trust"));
    assert!(!text.contains("/32"));
}

#[tokio::test]
async fn ipv6_hosts_are_unbracketed_for_postgres() {
    let cluster = FakeCluster::new();
    cluster.seed_hba("[fd00::1]");
    let topo = manager(&cluster);

    topo.attach_standby(&host("[fd00::1]"), &host("[fd00::2]"), "9.3", "main", 5432)
        .await
        .unwrap();

    assert!(hba(&cluster, "[fd00::1]")
        .lines()
        .any(|l| l == "host replication postgres fd00::2/128 trust"));
    assert!(cluster
        .commands_on("[fd00::2]")
        .contains(&format!("pg_basebackup -D {DATA_DIR} -U postgres -h fd00::1 -p 5432")));
    let recovery = cluster
        .file("[fd00::2]", &format!("{DATA_DIR}/recovery.conf"))
        .unwrap();
    assert!(recovery.contains("host=fd00::1 port=5432"));
}

#[tokio::test]
async fn service_user_is_validated_once_and_used_everywhere() {
    let cluster = FakeCluster::new();
    assert!(manager(&cluster).with_service_user("pg; rm").is_err());
    assert!(manager(&cluster).with_service_user("").is_err());

    let topo = manager(&cluster).with_service_user("pgsql").unwrap();
    topo.setup_primary(&host("10.0.0.1"), "9.3", "main", 5432)
        .await
        .unwrap();
    assert!(cluster
        .commands_on("10.0.0.1")
        .contains(&format!("chown -R pgsql:pgsql {DATA_DIR}")));
}
