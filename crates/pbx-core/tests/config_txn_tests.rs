//! Endpoint configuration transactions against the in-memory switch

mod common;

use std::sync::Arc;

use common::{creates_section, deletes_section, FakePbx, Section};
use ispbx_ami_core::{AmiError, ConfigVerb};
use ispbx_pbx_core::{ConfigTransactions, EndpointUpdate, NewEndpoint, PbxConfig, UpdateResult};

fn setup() -> (Arc<FakePbx>, ConfigTransactions) {
    let pbx = Arc::new(FakePbx::new());
    let txn = ConfigTransactions::new(pbx.clone(), PbxConfig::default());
    (pbx, txn)
}

fn dialplan() -> Vec<Section> {
    vec![Section::new(
        "from-internal",
        &[
            ("exten", "1001,1,Dial(PJSIP/1001,30)"),
            ("exten", "1001,n,Hangup()"),
            ("exten", "10010,1,Dial(PJSIP/10010)"),
            ("exten", "1002,1,Dial(PJSIP/1002,30)"),
        ],
    )]
}

#[tokio::test]
async fn create_builds_three_linked_sections() {
    let (pbx, txn) = setup();
    txn.create(&NewEndpoint::new("1001", "s3cret").with_name("Alice")).await.unwrap();

    let endpoint = pbx.section_of_type("1001", "endpoint").unwrap();
    assert_eq!(endpoint.get("auth"), Some("1001"));
    assert_eq!(endpoint.get("aors"), Some("1001"));
    assert_eq!(endpoint.get("context"), Some("from-internal"));
    assert_eq!(endpoint.get("callerid"), Some("\"Alice\" <1001>"));
    assert_eq!(endpoint.get("allow"), Some("ulaw,alaw"));

    let auth = pbx.section_of_type("1001", "auth").unwrap();
    assert_eq!(auth.get("password"), Some("s3cret"));
    assert_eq!(auth.get("username"), Some("1001"));
    // the endpoint section must not have received the auth lines
    assert_eq!(endpoint.get("password"), None);

    let aor = pbx.section_of_type("1001", "aor").unwrap();
    assert_eq!(aor.get("max_contacts"), Some("1"));
    assert_eq!(pbx.sections_named("1001").len(), 3);

    assert_eq!(pbx.reloads(), vec!["res_pjsip.so".to_string()]);
}

#[tokio::test]
async fn reload_is_requested_only_on_the_last_step() {
    let (pbx, txn) = setup();
    txn.create(&NewEndpoint::new("1001", "pw")).await.unwrap();

    let updates = pbx.actions_named("UpdateConfig");
    assert_eq!(updates.len(), 3);
    assert_eq!(updates[0].get_param("Reload"), Some("no"));
    assert_eq!(updates[1].get_param("Reload"), Some("no"));
    assert_eq!(updates[2].get_param("Reload"), Some("res_pjsip.so"));
    assert!(updates[2]
        .config_ops()
        .iter()
        .any(|op| op.verb == ConfigVerb::Append && op.value.as_deref() == Some("aor")));
}

#[tokio::test]
async fn create_twice_leaves_one_set_of_sections() {
    let (pbx, txn) = setup();
    txn.create(&NewEndpoint::new("1001", "first")).await.unwrap();
    txn.create(&NewEndpoint::new("1001", "second")).await.unwrap();

    assert_eq!(pbx.sections_named("1001").len(), 3);
    assert_eq!(pbx.section_of_type("1001", "auth").unwrap().get("password"), Some("second"));
    // transport section untouched
    assert_eq!(pbx.file("pjsip.conf").len(), 4);
}

#[tokio::test]
async fn fault_before_aor_step_issues_no_reload() {
    let (pbx, txn) = setup();
    pbx.fail_next(creates_section("auth"), "Failed to create auth section");

    let err = txn.create(&NewEndpoint::new("1001", "pw")).await.unwrap_err();
    match &err {
        AmiError::PartialFailure { completed, failed } => {
            assert_eq!(completed, &vec!["create endpoint section".to_string()]);
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].step, "create auth section");
            assert_eq!(failed[0].message, "Failed to create auth section");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.user_message(), "Failed to create auth section");

    assert!(pbx.reloads().is_empty());
    assert!(pbx.actions_named("Reload").is_empty());
    assert!(pbx
        .actions_named("UpdateConfig")
        .iter()
        .all(|a| a.get_param("Reload") == Some("no")));
    assert!(pbx.section_of_type("1001", "aor").is_none());
}

#[tokio::test]
async fn first_step_failure_is_a_protocol_error() {
    let (pbx, txn) = setup();
    pbx.fail_next(creates_section("endpoint"), "Permission denied");

    let err = txn.create(&NewEndpoint::new("1001", "pw")).await.unwrap_err();
    assert!(matches!(err, AmiError::Protocol { ref message, .. } if message == "Permission denied"));
    assert!(pbx.sections_named("1001").is_empty());
}

#[tokio::test]
async fn create_then_delete_leaves_nothing_and_second_delete_is_not_found() {
    let (pbx, txn) = setup();
    pbx.set_file("extensions.conf", dialplan());
    txn.create(&NewEndpoint::new("1001", "pw")).await.unwrap();

    let report = txn.delete("1001").await.unwrap();
    assert_eq!(report.removed.len(), 3);
    assert!(report.failed.is_empty());
    assert_eq!(report.dialplan_lines_removed, 2);
    assert!(pbx.sections_named("1001").is_empty());

    let remaining: Vec<String> = pbx.file("extensions.conf")[0]
        .fields
        .iter()
        .map(|(_, v)| v.clone())
        .collect();
    assert_eq!(remaining, vec!["10010,1,Dial(PJSIP/10010)", "1002,1,Dial(PJSIP/1002,30)"]);
    assert!(pbx.reloads().contains(&"res_pjsip.so".to_string()));

    let second = txn.delete("1001").await.unwrap_err();
    assert!(matches!(second, AmiError::NotFound { .. }));
}

#[tokio::test]
async fn delete_finds_suffixed_sections_through_references() {
    let (pbx, txn) = setup();
    let mut sections = pbx.file("pjsip.conf");
    sections.extend([
        Section::new("2001", &[("type", "endpoint"), ("auth", "2001-auth"), ("aors", "2001-aor")]),
        Section::new("2001-auth", &[("type", "auth"), ("password", "pw")]),
        Section::new("2001-aor", &[("type", "aor")]),
    ]);
    pbx.set_file("pjsip.conf", sections);

    let report = txn.delete("2001").await.unwrap();
    assert_eq!(report.removed.len(), 3);
    assert_eq!(pbx.file("pjsip.conf").len(), 1);
}

#[tokio::test]
async fn dialplan_failure_does_not_block_delete() {
    let (pbx, txn) = setup();
    txn.create(&NewEndpoint::new("1001", "pw")).await.unwrap();
    pbx.remove_file("extensions.conf");

    let report = txn.delete("1001").await.unwrap();
    assert_eq!(report.dialplan_lines_removed, 0);
    assert!(report.failed.is_empty());
    assert!(pbx.sections_named("1001").is_empty());
}

#[tokio::test]
async fn endpoint_left_behind_is_a_partial_failure() {
    let (pbx, txn) = setup();
    txn.create(&NewEndpoint::new("1001", "pw")).await.unwrap();
    pbx.fail_next(deletes_section("endpoint"), "Delete did not complete successfully");

    let err = txn.delete("1001").await.unwrap_err();
    match err {
        AmiError::PartialFailure { completed, failed } => {
            assert_eq!(completed.len(), 2);
            assert!(failed.iter().any(|f| f.message == "Delete did not complete successfully"));
            assert!(failed.iter().any(|f| f.step == "verify"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(pbx.section_of_type("1001", "endpoint").is_some());
    assert!(pbx.section_of_type("1001", "auth").is_none());
}

#[tokio::test]
async fn auth_delete_failure_is_reported_but_not_fatal() {
    let (pbx, txn) = setup();
    txn.create(&NewEndpoint::new("1001", "pw")).await.unwrap();
    pbx.fail_next(deletes_section("auth"), "Given category does not exist");

    let report = txn.delete("1001").await.unwrap();
    assert_eq!(report.removed.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].step, "delete auth section 1001");
}

#[tokio::test]
async fn update_without_fields_is_no_changes() {
    let (pbx, txn) = setup();
    let result = txn.update("1001", &EndpointUpdate::default()).await.unwrap();
    assert_eq!(result, UpdateResult::NoChanges);
    assert!(pbx.log().is_empty());
}

#[tokio::test]
async fn update_of_missing_endpoint_is_not_found() {
    let (pbx, txn) = setup();
    let changes = EndpointUpdate {
        context: Some("office".into()),
        ..Default::default()
    };
    let err = txn.update("4242", &changes).await.unwrap_err();
    assert!(matches!(err, AmiError::NotFound { .. }));
    assert!(pbx.actions_named("UpdateConfig").is_empty());
}

#[tokio::test]
async fn update_is_one_batched_action() {
    let (pbx, txn) = setup();
    txn.create(&NewEndpoint::new("1001", "old")).await.unwrap();
    pbx.clear_log();

    let changes = EndpointUpdate {
        name: Some("Bob".into()),
        password: Some("new".into()),
        qualify_timeout: Some(3),
        ..Default::default()
    };
    let result = txn.update("1001", &changes).await.unwrap();
    assert_eq!(
        result,
        UpdateResult::Updated {
            fields: vec!["name".into(), "password".into(), "qualify_timeout".into()]
        }
    );

    let updates = pbx.actions_named("UpdateConfig");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].get_param("Reload"), Some("res_pjsip.so"));
    assert_eq!(updates[0].config_ops().len(), 3);
    assert!(updates[0]
        .config_ops()
        .iter()
        .all(|op| op.match_filter.as_deref().map(|m| m.starts_with("type=")).unwrap_or(false)));

    assert_eq!(pbx.section_of_type("1001", "endpoint").unwrap().get("callerid"), Some("\"Bob\" <1001>"));
    assert_eq!(pbx.section_of_type("1001", "auth").unwrap().get("password"), Some("new"));
    assert_eq!(pbx.section_of_type("1001", "aor").unwrap().get("qualify_timeout"), Some("3"));
}

#[tokio::test]
async fn update_surfaces_the_switch_message() {
    let (pbx, txn) = setup();
    txn.create(&NewEndpoint::new("1001", "pw")).await.unwrap();
    pbx.fail_next(|a| a.name() == "UpdateConfig", "Update did not complete successfully");

    let changes = EndpointUpdate {
        transport: Some("transport-tcp".into()),
        ..Default::default()
    };
    let err = txn.update("1001", &changes).await.unwrap_err();
    assert_eq!(err.user_message(), "Update did not complete successfully");
}
