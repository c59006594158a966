//! Integration tests for initialising the logger.
use smoothmarket::log::{LOG_LEVEL_ENV_VAR, init, is_logger_initialised};
use tempfile::tempdir;

#[test]
fn test_init_logger_once() {
    unsafe { std::env::set_var(LOG_LEVEL_ENV_VAR, "off") };
    let dir = tempdir().unwrap();

    assert!(!is_logger_initialised());
    init(None, Some(dir.path())).unwrap();
    assert!(is_logger_initialised());
    assert!(dir.path().join("smoothmarket_info.log").exists());

    assert!(init(None, None).is_err());
}
