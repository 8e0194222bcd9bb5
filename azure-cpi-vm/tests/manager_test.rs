//! Integration tests for the VM manager.
//!
//! These tests drive the public API against the in-memory provider and
//! executor.

use std::sync::Arc;

use azure_cpi_vm::identity;
use azure_cpi_vm::{
    CloudOptions, CpiError, MockExecutor, MockProvider, NetworkConfig, PowerState, ResourcePool,
    StaticRegistry, StaticStorageAccount, VmManager,
};

fn cloud() -> CloudOptions {
    CloudOptions {
        ssh_user: "vcap".to_string(),
        location: "eastus".to_string(),
        password: "x".to_string(),
        vm_authorized_keys: None,
        resource_group_name: "rg1".to_string(),
    }
}

fn network() -> NetworkConfig {
    NetworkConfig {
        domain_name: "dg1".to_string(),
        virtual_network_name: "vnet1".to_string(),
        subnet_name: "sub1".to_string(),
        ip: "10.0.0.4".to_string(),
        dns: vec!["8.8.8.8".to_string()],
        tcp_endpoints: "22:22".to_string(),
        udp_endpoints: String::new(),
    }
}

fn pool() -> ResourcePool {
    ResourcePool {
        instance_type: "Standard_A1".to_string(),
    }
}

fn manager_with(provider: Arc<MockProvider>, executor: Arc<MockExecutor>) -> VmManager {
    VmManager::new(
        provider,
        executor,
        Arc::new(StaticRegistry::new("http://registry:25777")),
        Arc::new(StaticStorageAccount::new("storage1")),
    )
}

fn setup() -> (Arc<MockProvider>, Arc<MockExecutor>, VmManager) {
    let provider = Arc::new(MockProvider::new());
    let executor = Arc::new(MockExecutor::succeeding().with_provider(provider.clone()));
    let manager = manager_with(provider.clone(), executor.clone());
    (provider, executor, manager)
}

/// Create a VM from the reference inputs and return its id.
async fn create_vm(manager: &VmManager) -> String {
    manager
        .create("abc", "stemcell-1", &cloud(), &network(), &pool())
        .await
        .expect("create should succeed")
}

#[tokio::test]
async fn test_create_end_to_end() {
    let (_, executor, manager) = setup();

    let instance_id = create_vm(&manager).await;

    let id = identity::decode(&instance_id).unwrap();
    assert_eq!(id.deployment_group, "dg1");
    assert_eq!(id.vm_name, "bosh-vm-abc");

    let requests = executor.requests();
    assert_eq!(requests.len(), 1);
    let descriptor = &requests[0].descriptor;
    assert_eq!(requests[0].resource_group, "rg1");
    assert_eq!(descriptor.endpoints.len(), 1);
    assert_eq!(descriptor.endpoints[0].name, "tcp22");
    assert_eq!(descriptor.image, "stemcell-1");
    assert_eq!(descriptor.storage_account_name, "storage1");

    let vm = manager.find(&instance_id).await.unwrap().unwrap();
    assert_eq!(vm.state, PowerState::Running);
}

#[tokio::test]
async fn test_create_failure_returns_log() {
    let provider = Arc::new(MockProvider::new());
    let executor = Arc::new(
        MockExecutor::with_result(1, "error:   Deployment provisioning state was not successful")
            .with_provider(provider.clone()),
    );
    let manager = manager_with(provider.clone(), executor);

    let err = manager
        .create("abc", "stemcell-1", &cloud(), &network(), &pool())
        .await
        .unwrap_err();

    match err {
        CpiError::ProvisioningFailed { vm_name, exit_code, log } => {
            assert_eq!(vm_name, "bosh-vm-abc");
            assert_eq!(exit_code, 1);
            assert!(log.contains("not successful"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(provider.vm("dg1", "bosh-vm-abc").is_none());
}

#[tokio::test]
async fn test_create_rejects_bad_endpoints_without_submitting() {
    let (_, executor, manager) = setup();
    let mut network = network();
    network.tcp_endpoints = "22:22, 8080".to_string();

    let err = manager
        .create("abc", "stemcell-1", &cloud(), &network, &pool())
        .await
        .unwrap_err();

    assert!(matches!(err, CpiError::InvalidEndpoint { operation: "create", .. }));
    assert!(executor.requests().is_empty());
}

#[tokio::test]
async fn test_power_lifecycle() {
    let (provider, _, manager) = setup();
    let instance_id = create_vm(&manager).await;

    manager.shutdown(&instance_id).await.unwrap();
    assert_eq!(provider.vm("dg1", "bosh-vm-abc").unwrap().state, PowerState::Stopped);

    manager.reboot(&instance_id).await.unwrap();
    assert_eq!(provider.vm("dg1", "bosh-vm-abc").unwrap().state, PowerState::Running);

    manager.shutdown(&instance_id).await.unwrap();
    manager.start(&instance_id).await.unwrap();
    assert_eq!(provider.vm("dg1", "bosh-vm-abc").unwrap().state, PowerState::Running);

    manager.delete(&instance_id).await.unwrap();
    assert!(manager.find(&instance_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_provider_errors_pass_through() {
    let (provider, _, manager) = setup();
    let instance_id = create_vm(&manager).await;
    provider.fail_with("ServiceUnavailable: try again later");

    let err = manager.reboot(&instance_id).await.unwrap_err();
    assert!(matches!(err, CpiError::Provider(ref m) if m == "ServiceUnavailable: try again later"));
}

#[tokio::test]
async fn test_sequential_attaches_get_increasing_luns() {
    let (provider, _, manager) = setup();
    let instance_id = create_vm(&manager).await;

    let mut devices = Vec::new();
    for disk in ["disk-0", "disk-1", "disk-2"] {
        devices.push(manager.attach_disk(&instance_id, disk).await.unwrap());
    }
    assert_eq!(devices, vec!["/dev/sdc", "/dev/sdd", "/dev/sde"]);

    let vm = provider.vm("dg1", "bosh-vm-abc").unwrap();
    let luns: Vec<&str> = vm.data_disks.iter().map(|d| d.lun.as_str()).collect();
    assert_eq!(luns, vec!["0", "1", "2"]);

    assert_eq!(
        manager.get_disks(&instance_id).await.unwrap(),
        vec!["disk-0", "disk-1", "disk-2"]
    );
}

#[tokio::test]
async fn test_concurrent_attaches_do_not_collide() {
    let (provider, _, manager) = setup();
    let instance_id = create_vm(&manager).await;

    let attaches = (0..4).map(|i| {
        let manager = &manager;
        let instance_id = instance_id.as_str();
        async move { manager.attach_disk(instance_id, &format!("disk-{}", i)).await }
    });
    let results = futures::future::join_all(attaches).await;

    let mut devices: Vec<String> = results.into_iter().map(|r| r.unwrap()).collect();
    devices.sort();
    assert_eq!(devices, vec!["/dev/sdc", "/dev/sdd", "/dev/sde", "/dev/sdf"]);
    assert_eq!(provider.vm("dg1", "bosh-vm-abc").unwrap().data_disks.len(), 4);
}

#[tokio::test]
async fn test_detach_disk() {
    let (provider, _, manager) = setup();
    let instance_id = create_vm(&manager).await;

    manager.attach_disk(&instance_id, "disk-0").await.unwrap();
    manager.attach_disk(&instance_id, "disk-1").await.unwrap();

    manager.detach_disk(&instance_id, "disk-1").await.unwrap();
    assert_eq!(manager.get_disks(&instance_id).await.unwrap(), vec!["disk-0"]);

    let vm = provider.vm("dg1", "bosh-vm-abc").unwrap();
    assert_eq!(vm.data_disks[0].lun, "0");
}

#[tokio::test]
async fn test_attach_after_detaching_first_disk() {
    let (provider, _, manager) = setup();
    let instance_id = create_vm(&manager).await;

    manager.attach_disk(&instance_id, "disk-0").await.unwrap();
    manager.attach_disk(&instance_id, "disk-1").await.unwrap();
    manager.detach_disk(&instance_id, "disk-0").await.unwrap();

    // LUN 1 is still taken by disk-1; the freed LUN 0 is reused.
    assert_eq!(manager.attach_disk(&instance_id, "disk-2").await.unwrap(), "/dev/sdc");
    assert_eq!(manager.attach_disk(&instance_id, "disk-3").await.unwrap(), "/dev/sde");

    let vm = provider.vm("dg1", "bosh-vm-abc").unwrap();
    let mut luns: Vec<&str> = vm.data_disks.iter().map(|d| d.lun.as_str()).collect();
    luns.sort();
    assert_eq!(luns, vec!["0", "1", "2"]);
    assert_eq!(manager.volume_name(&instance_id, "disk-1").await.unwrap(), "/dev/sdd");
}

#[tokio::test]
async fn test_detach_unattached_disk() {
    let (provider, _, manager) = setup();
    let instance_id = create_vm(&manager).await;
    manager.attach_disk(&instance_id, "disk-0").await.unwrap();
    let mutations = provider.mutation_count();

    let err = manager.detach_disk(&instance_id, "disk-9").await.unwrap_err();

    assert!(matches!(
        err,
        CpiError::DiskNotAttached { ref disk_name, .. } if disk_name == "disk-9"
    ));
    assert_eq!(provider.mutation_count(), mutations);
    assert_eq!(manager.get_disks(&instance_id).await.unwrap(), vec!["disk-0"]);
}

#[tokio::test]
async fn test_disk_operations_on_missing_instance() {
    let (_, _, manager) = setup();
    let instance_id = identity::encode("dg1", "bosh-vm-missing");

    assert!(matches!(
        manager.detach_disk(&instance_id, "disk-0").await,
        Err(CpiError::InstanceNotFound { operation: "detach_disk", .. })
    ));
    assert!(matches!(
        manager.get_disks(&instance_id).await,
        Err(CpiError::InstanceNotFound { operation: "get_disks", .. })
    ));
}
