use std::time::Duration;

use jobq::config::Config;

// Environment is process-wide, so every case runs in one test.
#[test]
fn config_from_env() {
    unsafe {
        std::env::remove_var("JOBQ_WORKERS");
        std::env::remove_var("JOBQ_JOB_EXPIRY_MS");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.workers, 4);
    assert_eq!(config.job_expiry, Duration::from_secs(300));
    assert!(!config.log_level.is_empty());

    unsafe {
        std::env::set_var("JOBQ_WORKERS", "10");
        std::env::set_var("JOBQ_JOB_EXPIRY_MS", "1500");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.workers, 10);
    assert_eq!(config.job_expiry, Duration::from_millis(1500));
    let dispatcher = config.dispatcher();
    assert_eq!(dispatcher.workers, 10);
    assert_eq!(dispatcher.job_expiry, Duration::from_millis(1500));

    unsafe {
        std::env::set_var("JOBQ_WORKERS", "many");
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::remove_var("JOBQ_WORKERS");
        std::env::remove_var("JOBQ_JOB_EXPIRY_MS");
    }
}
