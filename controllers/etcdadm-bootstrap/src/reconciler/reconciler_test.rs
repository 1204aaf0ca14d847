//! Unit tests for the EtcdadmConfig reconciler

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::materializer::recorded_fingerprint;
    use crate::test_utils::*;
    use bootstrap_store::MockBootstrapStore;
    use crds::{
        ConditionStatus, DATA_SECRET_AVAILABLE_CONDITION, DATA_SECRET_VALUE_KEY, EtcdadmConfigStatus, File,
        FileSource, PERSIST_FAILED_REASON, READY_CONDITION, SecretKeySelector,
    };

    const NS: &str = "default";
    const NAME: &str = "etcd-0";

    fn setup(spec: crds::EtcdadmConfigSpec) -> (MockBootstrapStore, Reconciler) {
        let store = MockBootstrapStore::new();
        store.add_config(create_test_config(NAME, NS, spec));
        let reconciler = create_test_reconciler(&store, fast_settings());
        (store, reconciler)
    }

    /// The runtime hands the reconciler its cached copy; only the name matters.
    async fn reconcile(reconciler: &Reconciler) -> Result<Action, ControllerError> {
        reconciler.reconcile(&create_test_config(NAME, NS, Default::default())).await
    }

    fn status(store: &MockBootstrapStore) -> EtcdadmConfigStatus {
        store.config(NS, NAME).unwrap().status.unwrap_or_default()
    }

    fn payload(store: &MockBootstrapStore) -> String {
        let secret = store.secret(NS, NAME).unwrap();
        String::from_utf8(secret.data.unwrap()[DATA_SECRET_VALUE_KEY].0.clone()).unwrap()
    }

    fn assert_readiness_invariant(status: &EtcdadmConfigStatus) {
        if status.ready {
            assert!(status.is_condition_true(DATA_SECRET_AVAILABLE_CONDITION));
            assert!(status.data_secret_name.as_deref().is_some_and(|n| !n.is_empty()));
        }
    }

    fn ca_file_spec() -> crds::EtcdadmConfigSpec {
        crds::EtcdadmConfigSpec {
            files: vec![File {
                path: "/etc/etcd/pki/ca.crt".to_string(),
                content_from: Some(FileSource {
                    secret: SecretKeySelector { name: "etcd-ca".to_string(), key: "tls.crt".to_string() },
                }),
                ..Default::default()
            }],
            ..builtin_cloud_config_spec()
        }
    }

    #[tokio::test]
    async fn test_happy_path_cloud_config() {
        let (store, reconciler) = setup(crds::EtcdadmConfigSpec {
            pre_etcdadm_commands: vec!["echo pre".to_string()],
            post_etcdadm_commands: vec!["echo post".to_string()],
            ..builtin_cloud_config_spec()
        });

        reconcile(&reconciler).await.unwrap();

        assert_eq!(store.secrets_in(NS).len(), 1);
        assert_eq!(store.calls().secret_creates, 1);
        let data = payload(&store);
        let pre = data.find("echo pre").unwrap();
        let init = data.find("etcdadm init").unwrap();
        let post = data.find("echo post").unwrap();
        assert!(pre < init && init < post);

        let status = status(&store);
        assert!(status.ready);
        assert_eq!(status.data_secret_name.as_deref(), Some(NAME));
        assert_eq!(status.observed_generation, Some(1));
        assert!(status.is_condition_true(DATA_SECRET_AVAILABLE_CONDITION));
        assert_eq!(status.conditions[0].type_, READY_CONDITION);
        assert_readiness_invariant(&status);
        assert_eq!(reconciler.metrics.reconciliations("ready"), 1);
        assert_eq!(reconciler.metrics.secret_writes("create"), 1);
    }

    #[tokio::test]
    async fn test_second_pass_is_a_no_op() {
        let (store, reconciler) = setup(builtin_cloud_config_spec());
        reconcile(&reconciler).await.unwrap();
        let first_status = status(&store);
        let first_calls = store.calls();

        reconcile(&reconciler).await.unwrap();

        let calls = store.calls();
        assert_eq!(calls.secret_creates, first_calls.secret_creates);
        assert_eq!(calls.secret_replaces, 0);
        assert_eq!(calls.status_patches, first_calls.status_patches);
        assert_eq!(status(&store), first_status);
    }

    #[tokio::test]
    async fn test_spec_change_updates_secret_once() {
        let (store, reconciler) = setup(builtin_cloud_config_spec());
        reconcile(&reconciler).await.unwrap();
        let before = recorded_fingerprint(&store.secret(NS, NAME).unwrap()).map(str::to_string);

        store.edit_config_spec(NS, NAME, |spec| spec.post_etcdadm_commands.push("echo done".to_string()));
        reconcile(&reconciler).await.unwrap();
        reconcile(&reconciler).await.unwrap();

        assert_eq!(store.calls().secret_replaces, 1);
        let secret = store.secret(NS, NAME).unwrap();
        assert_ne!(recorded_fingerprint(&secret).map(str::to_string), before);
        assert!(payload(&store).contains("echo done"));
        assert_eq!(status(&store).observed_generation, Some(2));
        assert_eq!(store.secrets_in(NS).len(), 1);
    }

    #[tokio::test]
    async fn test_metadata_change_does_not_write_secret() {
        let (store, reconciler) = setup(builtin_cloud_config_spec());
        reconcile(&reconciler).await.unwrap();
        let patches = store.calls().status_patches;

        store.edit_config_metadata(NS, NAME, |meta| {
            meta.annotations
                .get_or_insert_with(Default::default)
                .insert("example.com/note".to_string(), "irrelevant".to_string());
        });
        reconcile(&reconciler).await.unwrap();

        assert_eq!(store.calls().secret_replaces, 0);
        assert_eq!(store.calls().status_patches, patches);
    }

    #[tokio::test]
    async fn test_invalid_configuration() {
        let (store, reconciler) = setup(crds::EtcdadmConfigSpec {
            bottlerocket_config: None,
            ..bottlerocket_spec()
        });

        let action = reconcile(&reconciler).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert!(store.secret(NS, NAME).is_none());
        let status = status(&store);
        assert!(!status.ready);
        let dsa = status.condition(DATA_SECRET_AVAILABLE_CONDITION).unwrap();
        assert_eq!(dsa.status, ConditionStatus::False);
        assert_eq!(dsa.reason.as_deref(), Some(INVALID_CONFIGURATION_REASON));
        assert!(dsa.message.as_deref().unwrap().contains("bottlerocketConfig"));
        assert_readiness_invariant(&status);
    }

    #[tokio::test]
    async fn test_missing_reference_then_resolved() {
        let (store, reconciler) = setup(ca_file_spec());

        let action = reconcile(&reconciler).await.unwrap();
        assert_eq!(action, Action::requeue(fast_settings().missing_reference_resync));
        assert!(store.secret(NS, NAME).is_none());
        let waiting = status(&store);
        assert!(!waiting.ready);
        assert_eq!(
            waiting.condition(DATA_SECRET_AVAILABLE_CONDITION).unwrap().reason.as_deref(),
            Some(MISSING_REFERENCE_REASON)
        );

        store.add_secret(create_test_secret("etcd-ca", NS, &[("tls.crt", "-----BEGIN CERTIFICATE-----")]));
        reconcile(&reconciler).await.unwrap();

        let ready = status(&store);
        assert!(ready.ready);
        assert!(payload(&store).contains("-----BEGIN CERTIFICATE-----"));
        assert_readiness_invariant(&ready);
    }

    #[tokio::test]
    async fn test_referenced_secret_rotation_updates_data() {
        let (store, reconciler) = setup(ca_file_spec());
        store.add_secret(create_test_secret("etcd-ca", NS, &[("tls.crt", "old-ca")]));
        reconcile(&reconciler).await.unwrap();

        store.add_secret(create_test_secret("etcd-ca", NS, &[("tls.crt", "new-ca")]));
        reconcile(&reconciler).await.unwrap();

        assert_eq!(store.calls().secret_replaces, 1);
        assert!(payload(&store).contains("new-ca"));
    }

    #[tokio::test]
    async fn test_conflict_retry_converges_to_one_update() {
        let (store, reconciler) = setup(builtin_cloud_config_spec());
        reconcile(&reconciler).await.unwrap();

        store.edit_config_spec(NS, NAME, |spec| spec.pre_etcdadm_commands.push("echo pre".to_string()));
        store.fail_secret_writes_with_conflict(2);
        reconcile(&reconciler).await.unwrap();

        assert_eq!(store.calls().secret_replaces, 1);
        assert_eq!(store.secrets_in(NS).len(), 1);
        assert!(payload(&store).contains("echo pre"));
        assert!(status(&store).ready);
        assert_eq!(reconciler.metrics.secret_writes("update"), 1);
    }

    #[tokio::test]
    async fn test_create_retry_after_unavailable() {
        let (store, reconciler) = setup(builtin_cloud_config_spec());
        store.fail_secret_writes_unavailable(1);

        reconcile(&reconciler).await.unwrap();

        assert_eq!(store.calls().secret_creates, 1);
        assert!(status(&store).ready);
    }

    #[tokio::test]
    async fn test_persist_failed_after_exhausting_retries() {
        let (store, reconciler) = setup(builtin_cloud_config_spec());
        store.fail_secret_writes_unavailable(100);

        let err = reconcile(&reconciler).await.unwrap_err();

        assert!(matches!(err, ControllerError::PersistFailed { attempts: 5, .. }), "{err}");
        assert!(store.secret(NS, NAME).is_none());
        let status = status(&store);
        assert!(!status.ready);
        assert_eq!(
            status.condition(DATA_SECRET_AVAILABLE_CONDITION).unwrap().reason.as_deref(),
            Some(PERSIST_FAILED_REASON)
        );
        assert_eq!(reconciler.metrics.reconciliations("persist_failed"), 1);
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_published_data_available() {
        let (store, reconciler) = setup(builtin_cloud_config_spec());
        reconcile(&reconciler).await.unwrap();
        let published = status(&store);

        store.edit_config_spec(NS, NAME, |spec| spec.post_etcdadm_commands.push("echo post".to_string()));
        store.fail_secret_writes_with_conflict(100);
        assert!(reconcile(&reconciler).await.is_err());

        let status = status(&store);
        assert!(status.is_condition_true(DATA_SECRET_AVAILABLE_CONDITION));
        assert_eq!(
            status.condition(DATA_SECRET_AVAILABLE_CONDITION).unwrap().last_transition_time,
            published.condition(DATA_SECRET_AVAILABLE_CONDITION).unwrap().last_transition_time
        );
        assert_readiness_invariant(&status);
    }

    #[tokio::test]
    async fn test_foreign_secret_is_left_alone() {
        let (store, reconciler) = setup(builtin_cloud_config_spec());
        store.add_secret(create_test_secret(NAME, NS, &[("value", "hand-written")]));

        let action = reconcile(&reconciler).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(payload(&store), "hand-written");
        assert_eq!(store.calls().secret_replaces, 0);
        let status = status(&store);
        assert!(!status.ready);
        assert!(
            status
                .condition(DATA_SECRET_AVAILABLE_CONDITION)
                .unwrap()
                .message
                .as_deref()
                .unwrap()
                .contains("not controlled")
        );
    }

    #[tokio::test]
    async fn test_foreign_secret_after_publish_clears_ready() {
        let (store, reconciler) = setup(builtin_cloud_config_spec());
        reconcile(&reconciler).await.unwrap();
        assert!(status(&store).ready);

        store.add_secret(create_test_secret(NAME, NS, &[("value", "foreign payload")]));
        let action = reconcile(&reconciler).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(payload(&store), "foreign payload");
        assert_eq!(store.calls().secret_replaces, 0);
        let status = status(&store);
        assert!(!status.ready);
        assert_eq!(status.data_secret_name.as_deref(), Some(NAME));
        let dsa = status.condition(DATA_SECRET_AVAILABLE_CONDITION).unwrap();
        assert_eq!(dsa.status, ConditionStatus::False);
        assert_eq!(dsa.reason.as_deref(), Some(PERSIST_FAILED_REASON));
        assert!(dsa.message.as_deref().unwrap().contains("not controlled"));
        assert_eq!(
            status.condition(READY_CONDITION).unwrap().status,
            ConditionStatus::False
        );
        assert_readiness_invariant(&status);
        assert_eq!(reconciler.metrics.reconciliations("ownership_conflict"), 1);
    }

    #[tokio::test]
    async fn test_pass_deadline_surfaces_as_timeout() {
        let store = MockBootstrapStore::new();
        store.add_config(create_test_config(NAME, NS, builtin_cloud_config_spec()));
        let reconciler = create_test_reconciler(
            &store,
            ReconcilerSettings {
                reconcile_timeout: Duration::from_millis(20),
                persist_max_attempts: 1_000,
                persist_backoff_min: Duration::from_millis(5),
                persist_backoff_max: Duration::from_millis(5),
                ..fast_settings()
            },
        );
        store.fail_secret_writes_unavailable(u32::MAX);

        let err = reconcile(&reconciler).await.unwrap_err();

        assert!(matches!(err, ControllerError::Timeout(_)), "{err}");
        assert!(store.secret(NS, NAME).is_none());
        assert_eq!(store.calls().secret_creates, 0);
        assert_eq!(reconciler.metrics.reconciliations("timeout"), 1);
        let config = create_test_config(NAME, NS, Default::default());
        assert_eq!(reconciler.error_action(&config, &err), Action::requeue(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_deleted_config_is_abandoned() {
        let (store, reconciler) = setup(builtin_cloud_config_spec());
        store.delete_config(NS, NAME);

        let action = reconcile(&reconciler).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(store.calls().status_patches, 0);
        assert!(store.secrets_in(NS).is_empty());
        assert_eq!(reconciler.metrics.reconciliations("gone"), 1);
    }

    #[tokio::test]
    async fn test_bottlerocket_secret_records_format() {
        let (store, reconciler) = setup(bottlerocket_spec());
        reconcile(&reconciler).await.unwrap();

        let secret = store.secret(NS, NAME).unwrap();
        let data = secret.data.unwrap();
        assert_eq!(data[crds::DATA_SECRET_FORMAT_KEY].0, b"bottlerocket");
        let settings: toml::Table = toml::from_str(std::str::from_utf8(&data[DATA_SECRET_VALUE_KEY].0).unwrap()).unwrap();
        assert_eq!(settings["settings"]["kubernetes"]["standalone-mode"].as_bool(), Some(true));
    }

    #[tokio::test]
    async fn test_bottlerocket_ignores_password_fields() {
        let (store, reconciler) = setup(crds::EtcdadmConfigSpec {
            users: vec![crds::User {
                name: "ec2-user".to_string(),
                ssh_authorized_keys: vec!["ssh-ed25519 AAAA key-1".to_string()],
                passwd_from: Some(crds::PasswdSource {
                    secret: SecretKeySelector { name: "absent".to_string(), key: "passwd".to_string() },
                }),
                ..Default::default()
            }],
            ..bottlerocket_spec()
        });

        assert_eq!(reconcile(&reconciler).await.unwrap(), Action::await_change());
        assert!(status(&store).ready);

        store.edit_config_spec(NS, NAME, |spec| spec.users[0].gecos = Some("Operator".to_string()));
        reconcile(&reconciler).await.unwrap();
        assert_eq!(store.calls().secret_creates, 1);
        assert_eq!(store.calls().secret_replaces, 0);
    }

    #[tokio::test]
    async fn test_format_switch_rewrites_secret() {
        let (store, reconciler) = setup(bottlerocket_spec());
        reconcile(&reconciler).await.unwrap();

        store.edit_config_spec(NS, NAME, |spec| {
            spec.format = crds::Format::CloudConfig;
            spec.etcdadm_builtin = true;
        });
        reconcile(&reconciler).await.unwrap();

        assert!(payload(&store).starts_with("## template: jinja\n#cloud-config\n"));
        assert_eq!(store.calls().secret_replaces, 1);
    }

    #[test]
    fn test_error_backoff_grows_and_resets() {
        let store = MockBootstrapStore::new();
        let reconciler = create_test_reconciler(&store, fast_settings());
        let config = create_test_config(NAME, NS, Default::default());
        let err = ControllerError::Timeout(Duration::from_secs(1));

        assert_eq!(reconciler.error_action(&config, &err), Action::requeue(Duration::from_secs(5)));
        assert_eq!(reconciler.error_action(&config, &err), Action::requeue(Duration::from_secs(10)));
        reconciler.reset_backoff(&config);
        assert_eq!(reconciler.error_action(&config, &err), Action::requeue(Duration::from_secs(5)));
    }
}
