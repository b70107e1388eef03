use hypertune_de::{
    Candidate, DE, DEConfigBuilder, DEError, EvalResult, Objective,
};

fn sphere_on_vector(candidate: &Candidate) -> f64 {
    let v = candidate.as_vector().expect("vector-mode driver");
    v.iter().map(|&x| x * x).sum()
}

fn driver(pop_size: usize, seed: u32) -> DE {
    let cfg = DEConfigBuilder::new()
        .dimensions(3)
        .pop_size(pop_size)
        .mutation_factor(0.5)
        .crossover_prob(0.5)
        .strategy("rand1_bin".parse().unwrap())
        .seed(seed)
        .build();
    DE::new(cfg).unwrap()
}

#[test]
fn second_ask_without_tell_is_rejected() {
    let mut de = driver(5, 0);
    let _pending = de.ask(None).unwrap();
    let err = de.ask(None).unwrap_err();
    assert!(matches!(err, DEError::PendingTell));
}

#[test]
fn tell_clears_the_pending_guard() {
    let mut de = driver(5, 0);
    for _ in 0..20 {
        let (candidate, trial_id, target_idx) = de.ask(None).unwrap();
        let fitness = sphere_on_vector(&candidate);
        de.tell(&candidate, trial_id, target_idx, EvalResult::new(fitness, 1.0), None).unwrap();
    }
}

#[test]
fn init_phase_hands_out_the_population_in_order() {
    let mut de = driver(6, 3);
    for expected_idx in 0..6 {
        let (candidate, trial_id, target_idx) = de.ask(None).unwrap();
        assert_eq!(target_idx, expected_idx);
        assert_eq!(trial_id, expected_idx, "init ids come from the announced population");
        let v = candidate.as_vector().unwrap();
        assert!(v.iter().all(|&x| (0.0..=1.0).contains(&x)));
        let fitness = sphere_on_vector(&candidate);
        de.tell(&candidate, trial_id, target_idx, EvalResult::new(fitness, 0.5), None).unwrap();
    }
    // next batch is a fresh generation of trials with fresh ids
    let (_, trial_id, target_idx) = de.ask(None).unwrap();
    assert_eq!(target_idx, 0);
    assert_eq!(trial_id, 6);
}

#[test]
fn announced_ids_increase_by_one_across_asks() {
    let mut de = driver(5, 1);
    let mut seen = Vec::new();
    for _ in 0..25 {
        let (candidate, trial_id, target_idx) = de.ask(None).unwrap();
        seen.push(trial_id);
        let fitness = sphere_on_vector(&candidate);
        de.tell(&candidate, trial_id, target_idx, EvalResult::new(fitness, 0.0), None).unwrap();
    }
    for (i, id) in seen.iter().enumerate() {
        assert_eq!(*id, i);
    }
    assert_eq!(de.repository().len(), 25);
}

#[test]
fn incumbent_is_monotone_and_arrays_stay_aligned_across_tells() {
    let mut de = driver(4, 9);
    let mut last = f64::INFINITY;
    for step in 0..40 {
        let (candidate, trial_id, target_idx) = de.ask(None).unwrap();
        let fitness = sphere_on_vector(&candidate);
        de.tell(&candidate, trial_id, target_idx, EvalResult::new(fitness, 2.0), None).unwrap();

        assert_eq!(de.traj().len(), step + 1);
        assert_eq!(de.runtime().len(), step + 1);
        assert_eq!(de.history().len(), step + 1);

        let score = de.incumbent().score;
        assert!(score <= last, "incumbent worsened at step {}", step);
        last = score;
        assert_eq!(de.traj()[step], score);
    }
}

#[test]
fn ages_decrement_on_losses_and_reset_on_wins() {
    let mut de = driver(4, 2);
    // ever-worsening objective: after the init phase every trial loses
    let mut calls = 0u32;
    let mut objective = move |_: &Candidate| {
        calls += 1;
        calls as f64
    };
    for _ in 0..4 {
        let (candidate, trial_id, target_idx) = de.ask(None).unwrap();
        let fitness = objective(&candidate);
        de.tell(&candidate, trial_id, target_idx, EvalResult::new(fitness, 0.0), None).unwrap();
    }
    // init phase: +inf parents, every tell wins and resets age
    assert!(de.population().unwrap().age.iter().all(|a| a.is_infinite()));

    let cfg = DEConfigBuilder::new()
        .dimensions(2)
        .pop_size(3)
        .max_age(10.0)
        .seed(5)
        .build();
    let mut de = DE::new(cfg).unwrap();
    let mut calls = 0u32;
    for _ in 0..6 {
        let (candidate, trial_id, target_idx) = de.ask(None).unwrap();
        calls += 1;
        de.tell(&candidate, trial_id, target_idx, EvalResult::new(calls as f64, 0.0), None).unwrap();
    }
    // one full generation of losses after init
    assert!(de.population().unwrap().age.iter().all(|&a| a == 9.0));
}

#[test]
fn tell_with_nan_fitness_panics() {
    let mut de = driver(4, 0);
    let (candidate, trial_id, target_idx) = de.ask(None).unwrap();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        de.tell(&candidate, trial_id, target_idx, EvalResult::new(f64::NAN, 0.0), None).unwrap();
    }));
    assert!(result.is_err());
}

#[test]
fn run_objective_sees_fidelity() {
    let objective: Objective = Box::new(|candidate: &Candidate, fidelity: Option<f64>| {
        assert_eq!(fidelity, Some(27.0));
        EvalResult::new(sphere_on_vector(candidate), 0.0)
    });
    let cfg = DEConfigBuilder::new()
        .dimensions(2)
        .pop_size(4)
        .seed(0)
        .objective(objective)
        .build();
    let mut de = DE::new(cfg).unwrap();
    let result = de.run(1, false, Some(27.0), true).unwrap();
    assert!(result.history.iter().all(|h| h.fidelity == 27.0));
}
