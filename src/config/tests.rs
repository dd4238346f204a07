use super::*;

#[test]
fn test_defaults() {
    let config = ComputeConfig::default();
    assert_eq!(config.workgroup_size, 256);
    assert_eq!(config.queue_slots, 1);
    assert_eq!(
        config.memory_preference,
        vec![
            MemoryPlacement::DeviceLocalHostVisible,
            MemoryPlacement::HostVisible
        ]
    );
    assert_eq!(config.adapter, AdapterPreference::HighPerformance);
    assert!(config.validate().is_ok());
}

#[test]
fn test_empty_document_is_default() {
    let config = ComputeConfig::from_toml_str("").unwrap();
    assert_eq!(config, ComputeConfig::default());
}

#[test]
fn test_partial_document() {
    let config = ComputeConfig::from_toml_str(
        r#"
workgroup_size = 64
memory_preference = ["host_visible"]
adapter = "low_power"
"#,
    )
    .unwrap();
    assert_eq!(config.workgroup_size, 64);
    assert_eq!(config.queue_slots, 1);
    assert_eq!(config.memory_preference, vec![MemoryPlacement::HostVisible]);
    assert_eq!(config.adapter, AdapterPreference::LowPower);
}

#[test]
fn test_rejects_invalid_values() {
    assert!(ComputeConfig::from_toml_str("workgroup_size = 0").is_err());
    assert!(ComputeConfig::from_toml_str("workgroup_size = 2048").is_err());
    assert!(ComputeConfig::from_toml_str("queue_slots = 0").is_err());
    assert!(ComputeConfig::from_toml_str("memory_preference = []").is_err());
    assert!(ComputeConfig::from_toml_str("memory_preference = [\"swap\"]").is_err());
    assert!(ComputeConfig::from_toml_str("unknown_key = 1").is_err());
}

#[test]
fn test_builders() {
    let config = ComputeConfig::default()
        .with_workgroup_size(32)
        .with_queue_slots(4)
        .with_memory_preference(vec![MemoryPlacement::HostVisible]);
    assert_eq!(config.workgroup_size, 32);
    assert_eq!(config.queue_slots, 4);
    assert_eq!(config.memory_preference, vec![MemoryPlacement::HostVisible]);
}

#[test]
fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("compute.toml");
    std::fs::write(
        &path,
        r#"
workgroup_size = 128
queue_slots = 2
label = "bench"
"#,
    )
    .unwrap();
    let config = ComputeConfig::load(&path).unwrap();
    assert_eq!(config.workgroup_size, 128);
    assert_eq!(config.queue_slots, 2);
    assert_eq!(config.label, "bench");
}

#[test]
fn test_load_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "queue_slots = 0\n").unwrap();
    match ComputeConfig::load(&path) {
        Err(ComputeError::Config(msg)) => {
            assert!(msg.contains("bad.toml"), "{msg}");
            assert!(msg.contains("queue_slots"), "{msg}");
        }
        other => panic!("expected config error, got {other:?}"),
    }
    assert!(ComputeConfig::load(&dir.path().join("missing.toml")).is_err());
}
