use crate::{
    controller::EpochController,
    estimator::Key,
    tests::{init_logger, Scenario},
};

#[test]
fn arc_break() {
    init_logger();

    let scenario = Scenario::new(6, 10);
    let sv = scenario.sv(2);
    let scenario = scenario.with_arc_break(5, sv);

    let mut controller = EpochController::new(scenario.config()).unwrap();
    let solutions = controller.run(&scenario.stream()).unwrap();

    assert_eq!(solutions.len(), 10);
    assert_eq!(solutions[0].new_arcs, 6);

    for solution in solutions.iter().skip(1) {
        if solution.key == 5 {
            assert_eq!(solution.new_arcs, 1);
        } else {
            assert_eq!(solution.new_arcs, 0);
        }
        assert_eq!(solution.outliers, 0, "outlier at key {}", solution.key);
    }

    assert_eq!(controller.arcs().arc(&sv), Some(1));

    let estimator = controller.estimator();
    let values = estimator.estimate();

    assert!(values.contains(&Key::Bias(sv, 0)));
    assert!(values.contains(&Key::Bias(sv, 1)));
    assert!(!estimator.is_active(&Key::Bias(sv, 0)));
    assert!(estimator.is_active(&Key::Bias(sv, 1)));

    let expected = Scenario::ambiguity(sv, 1);
    let amb = values.bias(sv, 1).unwrap();
    assert!((amb - expected).abs() < 1.0E-3, "new arc ambiguity: {}", amb);

    // the interrupted arc kept its last estimate
    let expected = Scenario::ambiguity(sv, 0);
    let amb = values.bias(sv, 0).unwrap();
    assert!((amb - expected).abs() < 1.0E-3, "old arc ambiguity: {}", amb);

    // ambiguities follow the current arc
    let (_, arc, _) = solutions[9]
        .ambiguities
        .iter()
        .find(|(s, _, _)| *s == sv)
        .unwrap();
    assert_eq!(*arc, 1);
}
