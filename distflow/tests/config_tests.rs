//! Tests for environment-driven settings
//!
//! The noteworthy memory threshold is read from the environment once per
//! process, so only one test in this binary may read the defaults.

use distflow::config::{Settings, NOTEWORTHY_MEMORY_USAGE_ENV};
use distflow::mon::MemoryMonitor;
use distflow::ServerSettings;
use serial_test::serial;

#[test]
#[serial]
fn test_noteworthy_threshold_from_env() {
    std::env::set_var(NOTEWORTHY_MEMORY_USAGE_ENV, "65536");
    let settings = ServerSettings::default();
    std::env::remove_var(NOTEWORTHY_MEMORY_USAGE_ENV);
    assert_eq!(settings.noteworthy_memory_bytes, 65536);

    let root = MemoryMonitor::new_root("root", 1 << 20, settings.noteworthy_memory_bytes);
    let account = root.make_bound_account();
    account.grow(60_000).unwrap();
    assert_eq!(root.noteworthy_events(), 0);
    account.grow(10_000).unwrap();
    assert_eq!(root.noteworthy_events(), 1);
}

#[test]
#[serial]
fn test_runtime_settings_clamp_limit() {
    let settings = Settings::new(false, 10);
    settings.set_max_running_flows(0);
    assert_eq!(settings.max_running_flows(), 1);
    settings.set_use_temp_storage(true);
    assert!(settings.use_temp_storage());
}
