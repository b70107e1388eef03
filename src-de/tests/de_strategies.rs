use hypertune_de::{Candidate, DE, DEConfigBuilder, DEError, EvalResult, Objective, Strategy};
use hypertune_testfunctions::sphere;

fn sphere_objective() -> Objective {
    Box::new(|candidate: &Candidate, _fidelity: Option<f64>| {
        let v = candidate.as_vector().expect("vector-mode driver");
        EvalResult::new(sphere(v), 0.0)
    })
}

#[test]
fn every_strategy_pair_runs_and_improves_monotonically() {
    for mutation in ["rand1", "rand2", "rand2dir", "best1", "best2", "currenttobest1", "randtobest1"] {
        for crossover in ["bin", "exp"] {
            let name = format!("{}_{}", mutation, crossover);
            let strategy: Strategy = name.parse().unwrap();
            let cfg = DEConfigBuilder::new()
                .dimensions(3)
                .pop_size(12)
                .mutation_factor(0.5)
                .crossover_prob(0.7)
                .strategy(strategy)
                .seed(17)
                .objective(sphere_objective())
                .build();
            let mut de = DE::new(cfg).unwrap();
            let result = de.run(3, false, None, true).unwrap();
            assert_eq!(result.traj.len(), 48, "{}", name);
            for w in result.traj.to_vec().windows(2) {
                assert!(w[1] <= w[0], "{} incumbent worsened", name);
            }
            assert!(de.incumbent().score.is_finite(), "{}", name);
        }
    }
}

#[test]
fn strategy_parsing_rejects_unknown_names() {
    for bad in ["rand3_bin", "rand1_tri", "rand1bin", "best", ""] {
        let err = bad.parse::<Strategy>().unwrap_err();
        assert!(matches!(err, DEError::UnknownStrategy(_)), "{:?} should not parse", bad);
    }
}

#[test]
fn strategy_parsing_is_case_insensitive() {
    let strategy: Strategy = "Best1_Bin".parse().unwrap();
    assert_eq!(strategy.to_string(), "best1_bin");
}
