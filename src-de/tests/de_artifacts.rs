use hypertune_de::{Candidate, DE, DEConfigBuilder, EvalResult, Objective};

fn sphere_objective() -> Objective {
    Box::new(|candidate: &Candidate, _fidelity: Option<f64>| {
        let v = candidate.as_vector().expect("vector-mode driver");
        EvalResult::new(v.iter().map(|&x| x * x).sum(), 0.25)
    })
}

#[test]
fn trajectory_csv_lands_in_the_output_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = DEConfigBuilder::new()
        .dimensions(2)
        .pop_size(6)
        .seed(42)
        .objective(sphere_objective())
        .output_path(dir.path())
        .build();
    let mut de = DE::new(cfg).unwrap();
    let result = de.run(2, false, Some(3.0), true).unwrap();

    let csv_path = de.save_trajectory_csv().unwrap();
    assert!(csv_path.exists());

    let content = std::fs::read_to_string(&csv_path).expect("failed to read CSV");
    let lines: Vec<&str> = content.trim().split('\n').collect();
    assert_eq!(lines.len(), result.traj.len() + 1, "header plus one row per evaluation");
    assert!(lines[0].starts_with("eval,incumbent,cost,fitness,fidelity"));
    // every runtime entry is the objective's fixed cost
    for line in &lines[1..] {
        let cols: Vec<&str> = line.split(',').collect();
        assert_eq!(cols.len(), 5);
        assert_eq!(cols[2], "0.25");
        assert_eq!(cols[4], "3");
    }
}

#[test]
fn output_directory_is_created_at_construction() {
    let dir = tempfile::tempdir().expect("tempdir");
    let nested = dir.path().join("runs").join("de");
    let cfg = DEConfigBuilder::new().dimensions(2).seed(0).output_path(&nested).build();
    let _de = DE::new(cfg).unwrap();
    assert!(nested.is_dir());
}
