//! Shared fixture: a single-node cluster, its host filesystem and a hub.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use lca_agent::crd::{seedgen_ref, seedgen_resource, SeedGenStage, SeedGenerator, SeedGeneratorSpec, SEEDGEN_NAME};
use lca_agent::exec::MockExecutor;
use lca_agent::health::MockHealthChecker;
use lca_agent::seedgen::status::MSG_WAITING_FOR_STABILITY;
use lca_agent::seedgen::{KUBELET_AUTH_FILE, SEEDGEN_SECRET_NAME};
use lca_agent::{Config, SeedGenReconciler};
use lca_cluster::fake::{InMemoryCluster, MockHubConnector};
use lca_cluster::{get_as, resources, to_dynamic, DynamicObject, ObjectRef};
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::watch;

pub const NAMESPACE: &str = "openshift-lifecycle-agent";
pub const CLUSTER_NAME: &str = "spoke1";
pub const AGENT_IMAGE: &str = "quay.io/openshift-kni/lifecycle-agent-operator:4.16";
pub const SEED_IMAGE: &str = "quay.io/org/seed:4.16";
pub const ORIGINAL_PULL_SECRET: &str = r#"{"auths":{"quay.io":{"auth":"c2VjcmV0"}}}"#;
pub const SEED_AUTH: &str = r#"{"auths":{"quay.io":{"auth":"cHVzaA=="}}}"#;
pub const HUB_KUBECONFIG: &str = "apiVersion: v1\nkind: Config\n";

pub const IMAGER_EXITED_OK: &str = r#"[{"State":{"Status":"exited","ExitCode":0}}]"#;

pub struct Fixture {
    pub host: TempDir,
    pub config: Config,
    pub cluster: Arc<InMemoryCluster>,
    pub hub: Arc<InMemoryCluster>,
    pub connector: Arc<MockHubConnector>,
    pub exec: Arc<MockExecutor>,
    pub health: Arc<MockHealthChecker>,
    pub shutdown_tx: watch::Sender<bool>,
}

fn secret(namespace: &str, name: &str, data: &[(&str, &str)]) -> DynamicObject {
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Default::default()
    };
    to_dynamic(&secret).unwrap()
}

fn namespace(name: &str) -> DynamicObject {
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    to_dynamic(&ns).unwrap()
}

impl Fixture {
    /// A cluster ready for seed generation, with a hub that manages it.
    pub fn new() -> Self {
        let host = tempfile::tempdir().unwrap();
        let config = Config {
            host_root: host.path().to_path_buf(),
            agent_image: Some(AGENT_IMAGE.to_string()),
            use_nsenter: false,
            ..Default::default()
        };

        let hub = Arc::new(InMemoryCluster::new());
        let fixture = Self {
            host,
            config,
            cluster: Arc::new(InMemoryCluster::new()),
            connector: Arc::new(MockHubConnector::new(hub.clone())),
            hub,
            exec: Arc::new(MockExecutor::new()),
            health: Arc::new(MockHealthChecker::healthy()),
            shutdown_tx: watch::channel(false).0,
        };

        fixture.write_host_file("/usr/local/bin/dnsmasq_config.sh", "#!/bin/sh\n");
        fixture.write_host_file(KUBELET_AUTH_FILE, ORIGINAL_PULL_SECRET);
        fixture.seed_cluster();
        fixture.seed_hub();
        fixture.script_host();
        fixture
    }

    fn seed_cluster(&self) {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some("cluster-config-v1".to_string()),
                namespace: Some("kube-system".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "install-config".to_string(),
                format!("apiVersion: v1\nmetadata:\n  name: {CLUSTER_NAME}\n"),
            )])),
            ..Default::default()
        };
        self.cluster.insert(&resources::config_map(), to_dynamic(&cm).unwrap());

        self.cluster.insert(
            &resources::secret(),
            secret(NAMESPACE, SEEDGEN_SECRET_NAME, &[("seedAuth", SEED_AUTH), ("hubKubeconfig", HUB_KUBECONFIG)]),
        );
        self.cluster.insert(
            &resources::secret(),
            secret("openshift-config", "pull-secret", &[(".dockerconfigjson", ORIGINAL_PULL_SECRET)]),
        );
        self.cluster.insert(
            &resources::secret(),
            secret("kube-system", "kubeadmin", &[("kubeadmin", "hash")]),
        );

        for ns in [NAMESPACE, "open-cluster-management-agent", "open-cluster-management-agent-addon"] {
            self.cluster.insert(&resources::namespace(), namespace(ns));
        }

        // The node daemon renders the pull secret to the kubelet auth file.
        let auth_file = self.host_path(KUBELET_AUTH_FILE);
        self.cluster.on_write(move |obj| {
            if obj.name_any() != "pull-secret" || obj.namespace().as_deref() != Some("openshift-config") {
                return;
            }
            if let Ok(ByteString(bytes)) = serde_json::from_value(obj.data["data"][".dockerconfigjson"].clone()) {
                std::fs::write(&auth_file, bytes).unwrap();
            }
        });
    }

    fn seed_hub(&self) {
        self.hub.insert(
            &resources::managed_cluster(),
            DynamicObject::new(CLUSTER_NAME, &resources::managed_cluster()).data(json!({
                "spec": { "hubAcceptsClient": true }
            })),
        );
    }

    fn script_host(&self) {
        self.exec.respond(
            "ostree",
            "Usage:\n  ostree admin [OPTION...] --print-current-dir|COMMAND\n\n  set-default   Set the default deployment\n",
        );
        self.exec.on("podman", |args| match args.first().map(String::as_str) {
            Some("inspect") => Ok(IMAGER_EXITED_OK.to_string()),
            _ => Ok(String::new()),
        });
    }

    pub fn host_path(&self, path: &str) -> PathBuf {
        self.config.host_path(path)
    }

    pub fn write_host_file(&self, path: &str, contents: &str) {
        let path = self.host_path(path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    pub fn read_host_file(&self, path: &str) -> String {
        std::fs::read_to_string(self.host_path(path)).unwrap()
    }

    pub fn reconciler(&self) -> SeedGenReconciler {
        SeedGenReconciler::new(
            self.config.clone(),
            self.cluster.clone(),
            self.connector.clone(),
            self.exec.clone(),
            self.health.clone(),
            self.shutdown_tx.subscribe(),
        )
    }

    /// Store a request, with `prepare` applied to it first.
    pub fn insert_request(&self, prepare: impl FnOnce(&mut SeedGenerator)) {
        let mut seedgen = SeedGenerator::new(
            SEEDGEN_NAME,
            SeedGeneratorSpec {
                seed_image: SEED_IMAGE.to_string(),
                recert_image: None,
            },
        );
        prepare(&mut seedgen);
        self.cluster.insert(&seedgen_resource(), to_dynamic(&seedgen).unwrap());
    }

    /// Store a request that passed validation.
    pub fn insert_validated_request(&self) {
        self.insert_request(|sg| sg.set_in_progress(MSG_WAITING_FOR_STABILITY, SeedGenStage::WaitingForStability));
    }

    pub async fn request(&self) -> SeedGenerator {
        get_as(self.cluster.as_ref(), &seedgen_ref(SEEDGEN_NAME)).await.unwrap()
    }

    pub fn has(&self, obj: &ObjectRef) -> bool {
        self.cluster.object(obj).is_some()
    }

    pub fn seedgen_secret_ref() -> ObjectRef {
        ObjectRef::namespaced(resources::secret(), NAMESPACE, SEEDGEN_SECRET_NAME)
    }

    pub fn managed_cluster_ref() -> ObjectRef {
        ObjectRef::cluster(resources::managed_cluster(), CLUSTER_NAME)
    }

    /// Position of the first journal entry starting with `prefix`.
    pub fn journal_index(&self, prefix: &str) -> usize {
        let journal = self.cluster.journal();
        journal
            .iter()
            .position(|entry| entry.starts_with(prefix))
            .unwrap_or_else(|| panic!("no journal entry starting with {prefix:?} in {journal:#?}"))
    }
}
