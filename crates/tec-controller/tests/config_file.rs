//! Integration tests for loading the boot configuration from disk.

use std::path::PathBuf;

use tec_controller::infrastructure::storage::config::{load_config, ConfigError};
use tec_core::domain::BoardRole;

/// A file in the temp directory that is removed on drop.
struct TempFile(PathBuf);

impl TempFile {
    fn with_contents(contents: &str) -> Self {
        let path = std::env::temp_dir().join(format!("tec-config-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).expect("write temp config");
        Self(path)
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

#[test]
fn test_peripheral_config_loads_from_disk() {
    // Arrange
    let file = TempFile::with_contents(
        r#"
        [controller]
        box_no = 3
        board_no = 2
        role = "peripheral"

        [limits]
        collection_period_ms = 250

        [[tec]]
        id = 10
        board = 2
        channel = 4
        "#,
    );

    // Act
    let cfg = load_config(&file.0).expect("load");
    let controller = cfg.controller_config().expect("valid");

    // Assert
    assert_eq!(controller.box_no, 3);
    assert_eq!(controller.board_no, 2);
    assert_eq!(controller.role, BoardRole::Peripheral);
    assert_eq!(cfg.collection_period().as_millis(), 250);
    assert_eq!(controller.tecs.lookup(10).map(|t| t.channel_no), Some(4));
}

#[test]
fn test_invalid_toml_on_disk_is_a_parse_error() {
    let file = TempFile::with_contents("[[tec]]\nid = \"one\"\n");
    assert!(matches!(load_config(&file.0), Err(ConfigError::Parse(_))));
}

#[test]
fn test_unknown_role_is_rejected() {
    let file = TempFile::with_contents("[controller]\nrole = \"observer\"\n");
    assert!(load_config(&file.0).is_err());
}
