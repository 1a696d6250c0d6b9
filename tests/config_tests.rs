// tests/config_tests.rs
//
// Config presets, YAML files and overrides.

use std::io::Write;

use aerolearn::{EngineConfig, Error, TrainingProfile};

#[test]
fn yaml_file_loads_with_defaults_for_missing_fields() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "network:\n  hidden_layers: [32, 16]\ntraining:\n  batch_size: 16\n  gamma: 0.95\nepisode:\n  max_steps: 500"
    )
    .unwrap();

    let cfg = EngineConfig::load_yaml(file.path()).expect("config loads");
    assert_eq!(cfg.network.hidden_layers, vec![32, 16]);
    assert_eq!(cfg.training.batch_size, 16);
    assert_eq!(cfg.training.gamma, 0.95);
    assert_eq!(cfg.episode.max_steps, 500);
    assert_eq!(cfg.network.input_size, 40, "unspecified fields keep defaults");
    assert_eq!(cfg.reward, EngineConfig::default().reward);
}

#[test]
fn missing_file_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = EngineConfig::load_yaml(dir.path().join("absent.yaml")).unwrap_err();
    assert!(matches!(err, Error::LoadError { .. }));
}

#[test]
fn yaml_round_trips_every_profile() {
    for profile in [
        TrainingProfile::Quick,
        TrainingProfile::Standard,
        TrainingProfile::Thorough,
    ] {
        let cfg = EngineConfig::for_profile(profile);
        cfg.validate().expect("presets are valid");
        let yaml = cfg.to_yaml_string().unwrap();
        assert_eq!(
            EngineConfig::from_yaml_str(&yaml).unwrap(),
            cfg,
            "profile {} must round-trip",
            profile.as_str()
        );
    }
}

#[test]
fn seed_override_reseeds_every_component() {
    let mut cfg = EngineConfig::default();
    cfg.apply_overrides_from(|name| (name == "AEROLEARN_SEED").then(|| "100".to_string()));
    assert_eq!(cfg.network.seed, 100);
    assert_eq!(cfg.training.seed, 101);
    assert_eq!(cfg.imitation.seed, 102);
}
