use crate::{
    controller::EpochController,
    tests::{init_logger, Scenario},
};

#[test]
fn recurrent_multipath() {
    init_logger();

    let mut scenario = Scenario::new(10, 40).with_noise(0.5, 0.05, 7);
    let faulty = scenario.sv(5);

    for key in 10..40 {
        scenario = scenario.with_fault(key, faulty, 40.0);
    }

    let mut cfg = scenario.config();
    cfg.mixture.batch_size = 8;
    cfg.mixture.max_components = 4;

    let mut controller = EpochController::new(cfg).unwrap();
    let solutions = controller.run(&scenario.stream()).unwrap();

    assert_eq!(solutions.len(), 40);

    let summary = controller.summary();
    assert!(summary.reclusterings >= 1);

    let model = controller.mixture().model();
    assert!(model.len() >= 2, "multipath was not learned:\n{}", model);
    assert!(model.len() <= 4);

    for component in model.iter() {
        assert!(component.covariance.cholesky().is_some());
    }

    // learned components remember where they come from
    assert!(model.iter().skip(1).all(|c| c.key >= 10 && c.sv.is_some()));

    // the residual batch was consumed
    assert!(controller.mixture().batch().len() < 8);

    for solution in solutions.iter().take(10) {
        assert_eq!(solution.outliers, 0);
    }

    let last = solutions.last().unwrap();
    assert!(last.enu.norm() < 2.0, "last solution: {}", last.enu);
}
