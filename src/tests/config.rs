use crate::{
    controller::EpochController,
    prelude::{Config, Error},
};

#[test]
fn missing_nominal_position() {
    assert_eq!(
        EpochController::new(Config::default()).err(),
        Some(Error::MissingConfiguration("station.nominal_ecef"))
    );
}

#[cfg(feature = "serde")]
#[test]
fn deserialization() {
    use crate::prelude::{Divergence, OutputPolicy};

    let content = r#"
    {
        "station": {
            "name": "TEST",
            "nominal_ecef": [4027881.0, 306998.0, 4919499.0]
        },
        "between": true,
        "policy": "PreFit",
        "mixture": {
            "batch_size": 500,
            "divergence": "SymmetricKl"
        },
        "output": {
            "ecef": true,
            "ambiguities": true
        }
    }"#;

    let cfg: Config = serde_json::from_str(content).unwrap();

    assert_eq!(cfg.station.name, "TEST");
    assert_eq!(cfg.nominal_ecef(), Ok((4027881.0, 306998.0, 4919499.0)));
    assert!(cfg.between);
    assert_eq!(cfg.policy, OutputPolicy::PreFit);
    assert_eq!(cfg.min_observations, 5);
    assert_eq!(cfg.warm_up_epochs, 1200);
    assert_eq!(cfg.mixture.batch_size, 500);
    assert_eq!(cfg.mixture.divergence, Divergence::SymmetricKl);
    assert_eq!(cfg.mixture.max_components, 20);
    assert!(cfg.output.ecef && cfg.output.enu && cfg.output.ambiguities);
    assert!(cfg.validate().is_ok());
}
