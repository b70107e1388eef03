//! Asynchronous Differential Evolution.
//!
//! Same data model as [`DE`], different commit discipline: `deferred` keeps
//! the synchronous batch-then-select generation, while `immediate`, `random`
//! and `worst` commit each selection winner into the population before the
//! next trial is built, so the in-generation mutation pool reflects earlier
//! winners. Parent sampling always excludes the current target and pads the
//! pool with fresh individuals when the strategy needs more parents than
//! remain.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::{
    Candidate, DE, DEConfig, DEError, EvalResult, HistoryRecord, Incumbent, RunResult, SampleMode,
    stack_rows,
};

/// Target-selection policy of the asynchronous driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncStrategy {
    /// Full batch of trials, then batched selection (matches [`DE`]).
    Deferred,
    /// Targets walk the population in order; winners commit immediately.
    Immediate,
    /// Target drawn uniformly each iteration, with replacement.
    Random,
    /// Target is the worst (maximum-fitness) member each iteration.
    Worst,
}

impl AsyncStrategy {
    fn token(&self) -> &'static str {
        match self {
            AsyncStrategy::Deferred => "deferred",
            AsyncStrategy::Immediate => "immediate",
            AsyncStrategy::Random => "random",
            AsyncStrategy::Worst => "worst",
        }
    }
}

impl FromStr for AsyncStrategy {
    type Err = DEError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deferred" => Ok(AsyncStrategy::Deferred),
            "immediate" => Ok(AsyncStrategy::Immediate),
            "random" => Ok(AsyncStrategy::Random),
            "worst" => Ok(AsyncStrategy::Worst),
            _ => Err(DEError::UnknownAsyncStrategy(s.to_string())),
        }
    }
}

impl fmt::Display for AsyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Asynchronous Differential Evolution driver wrapping a [`DE`].
pub struct AsyncDE {
    de: DE,
    async_strategy: AsyncStrategy,
}

impl AsyncDE {
    pub fn new(config: DEConfig, async_strategy: AsyncStrategy) -> Result<Self, DEError> {
        Ok(Self { de: DE::new(config)?, async_strategy })
    }

    pub fn async_strategy(&self) -> AsyncStrategy {
        self.async_strategy
    }

    /// The wrapped synchronous driver.
    pub fn de(&self) -> &DE {
        &self.de
    }

    pub fn de_mut(&mut self) -> &mut DE {
        &mut self.de
    }

    pub fn reset(&mut self, reset_seeds: bool) {
        self.de.reset(reset_seeds);
    }

    pub fn incumbent(&self) -> &Incumbent {
        self.de.incumbent()
    }

    pub fn traj(&self) -> &[f64] {
        self.de.traj()
    }

    pub fn runtime(&self) -> &[f64] {
        self.de.runtime()
    }

    pub fn history(&self) -> &[HistoryRecord] {
        self.de.history()
    }

    pub fn init_eval_pop(&mut self, fidelity: Option<f64>, eval: bool) -> Result<(), DEError> {
        self.de.init_eval_pop(fidelity, eval)
    }

    /// Donor vector with the current target excluded from the parent pool.
    pub fn mutation(
        &mut self,
        current: Option<&Array1<f64>>,
        best: Option<&Array1<f64>>,
        alt_pop: Option<ArrayView2<f64>>,
    ) -> Result<Array1<f64>, DEError> {
        self.de.mutation_with(SampleMode::ExcludeTarget, current, best, alt_pop)
    }

    /// Appends `pop_size` freshly sampled individuals (announced, +inf
    /// fitness, full age) to the population and returns their ids.
    pub fn add_random_population(
        &mut self,
        pop_size: usize,
        fidelity: Option<f64>,
    ) -> Result<Vec<usize>, DEError> {
        let fid = fidelity.unwrap_or(0.0);
        let fresh = self.de.init_population(pop_size)?;
        let ids = self.de.repository.announce_population(fresh.view(), fid);
        let max_age = self.de.max_age;
        let pop = self.de.population.as_mut().expect("population not initialized");
        pop.extend(fresh.view(), &ids, max_age);
        Ok(ids)
    }

    /// Generates `size` donors from the passed population.
    pub fn init_mutant_population(
        &mut self,
        size: usize,
        population: ArrayView2<f64>,
        target: Option<&Array1<f64>>,
        best: Option<&Array1<f64>>,
    ) -> Result<Array2<f64>, DEError> {
        let mut mutants = Array2::zeros((size, self.de.dimensions));
        for i in 0..size {
            let donor =
                self.de.mutation_with(SampleMode::ExcludeTarget, target, best, Some(population))?;
            mutants.row_mut(i).assign(&donor);
        }
        Ok(mutants)
    }

    /// Generates `size` boundary-checked donors, each built against a
    /// randomly drawn target with the incumbent as `best`.
    pub fn sample_mutants(
        &mut self,
        size: usize,
        population: Option<ArrayView2<f64>>,
    ) -> Result<Array2<f64>, DEError> {
        let pool: Array2<f64> = match population {
            Some(p) => p.to_owned(),
            None => self.de.population.as_ref().expect("population not initialized").vectors.clone(),
        };
        let mut mutants = Array2::zeros((size, self.de.dimensions));
        for i in 0..size {
            let j = self.de.rng.pick(pool.nrows());
            let current = pool.row(j).to_owned();
            let best = self.de.incumbent.vector.clone();
            let donor = self.de.mutation_with(
                SampleMode::ExcludeTarget,
                Some(&current),
                best.as_ref(),
                Some(pool.view()),
            )?;
            let donor = self.de.boundary_check(donor);
            mutants.row_mut(i).assign(&donor);
        }
        Ok(mutants)
    }

    /// One asynchronous generation under the configured policy.
    pub fn evolve_generation(
        &mut self,
        fidelity: Option<f64>,
        best: Option<&Array1<f64>>,
        alt_pop: Option<ArrayView2<f64>>,
    ) -> Result<(), DEError> {
        let fid = fidelity.unwrap_or(0.0);
        match self.async_strategy {
            AsyncStrategy::Deferred => {
                let pop_size = self.de.pop_size;
                let mut trials = Vec::with_capacity(pop_size);
                let mut trial_ids = Vec::with_capacity(pop_size);
                for j in 0..pop_size {
                    let target = self
                        .de
                        .population
                        .as_ref()
                        .expect("population not initialized")
                        .member(j)
                        .to_owned();
                    let donor =
                        self.de.mutation_with(SampleMode::ExcludeTarget, Some(&target), best, alt_pop)?;
                    let trial = self.de.crossover(&target, &donor)?;
                    let trial = self.de.boundary_check(trial);
                    let id = self.de.repository.announce_config(trial.view(), fid);
                    trials.push(trial);
                    trial_ids.push(id);
                }
                let trials = stack_rows(&trials, self.de.dimensions);
                self.de.selection(&trials, &trial_ids, fidelity)
            }

            AsyncStrategy::Immediate => {
                for i in 0..self.de.pop_size {
                    let target = self
                        .de
                        .population
                        .as_ref()
                        .expect("population not initialized")
                        .member(i)
                        .to_owned();
                    let donor =
                        self.de.mutation_with(SampleMode::ExcludeTarget, Some(&target), best, alt_pop)?;
                    let trial = self.de.crossover(&target, &donor)?;
                    let trial = self.de.boundary_check(trial);
                    let id = self.de.repository.announce_config(trial.view(), fid);
                    let trial_mat = trial.view().insert_axis(Axis(0));
                    let (fitnesses, _ages) = self.de.eval_pop(Some((trial_mat, &[id])), fidelity)?;
                    // the winner enters the population before trial i+1 is built
                    let pop = self.de.population.as_mut().expect("population not initialized");
                    if fitnesses[0] <= pop.fitness[i] {
                        pop.vectors.row_mut(i).assign(&trial);
                        pop.ids[i] = id;
                        pop.fitness[i] = fitnesses[0];
                    }
                }
                Ok(())
            }

            AsyncStrategy::Random | AsyncStrategy::Worst => {
                for _ in 0..self.de.pop_size {
                    let i = match self.async_strategy {
                        AsyncStrategy::Random => self.de.rng.pick(self.de.pop_size),
                        _ => self
                            .de
                            .population
                            .as_ref()
                            .expect("population not initialized")
                            .argmax_fitness(),
                    };
                    let target = self
                        .de
                        .population
                        .as_ref()
                        .expect("population not initialized")
                        .member(i)
                        .to_owned();
                    let donor =
                        self.de.mutation_with(SampleMode::ExcludeTarget, Some(&target), best, alt_pop)?;
                    let trial = self.de.crossover(&target, &donor)?;
                    let trial = self.de.boundary_check(trial);
                    let id = self.de.repository.announce_config(trial.view(), fid);
                    let trial_mat = trial.view().insert_axis(Axis(0));
                    let (fitnesses, _ages) = self.de.eval_pop(Some((trial_mat, &[id])), fidelity)?;
                    let pop = self.de.population.as_mut().expect("population not initialized");
                    if fitnesses[0] <= pop.fitness[i] {
                        // ids are deliberately not relinked on this path
                        pop.vectors.row_mut(i).assign(&trial);
                        pop.fitness[i] = fitnesses[0];
                    }
                }
                Ok(())
            }
        }
    }

    /// Runs `generations` asynchronous steps, passing the incumbent as
    /// `best` each generation.
    pub fn run(
        &mut self,
        generations: usize,
        verbose: bool,
        fidelity: Option<f64>,
        reset: bool,
    ) -> Result<RunResult, DEError> {
        if self.de.objective.is_none() {
            return Err(DEError::MissingObjective);
        }
        if reset || self.de.population.is_none() {
            self.de.reset(true);
            if verbose {
                eprintln!("Initializing and evaluating new population...");
            }
            self.de.init_eval_pop(fidelity, true)?;
        }
        if verbose {
            eprintln!("Running asynchronous evolutionary search...");
        }
        for g in 0..generations {
            if verbose {
                eprintln!(
                    "Generation {:>2}/{:<2} -- best {:.7e}",
                    g + 1,
                    generations,
                    self.de.incumbent.score
                );
            }
            let best = self.de.incumbent.vector.clone();
            self.evolve_generation(fidelity, best.as_ref(), None)?;
        }
        if verbose {
            eprintln!("Run complete: best {:.7e}", self.de.incumbent.score);
        }
        Ok(self.de.run_result())
    }

    /// As [`DE::ask`], with trials built using target-excluding sampling.
    pub fn ask(&mut self, fidelity: Option<f64>) -> Result<(Candidate, usize, usize), DEError> {
        self.de.ask_with(fidelity, SampleMode::ExcludeTarget)
    }

    /// As [`DE::tell`].
    pub fn tell(
        &mut self,
        trial: &Candidate,
        trial_id: usize,
        target_idx: usize,
        result: EvalResult,
        fidelity: Option<f64>,
    ) -> Result<(), DEError> {
        self.de.tell(trial, trial_id, target_idx, result, fidelity)
    }

    pub fn save_trajectory_csv(&self) -> Result<std::path::PathBuf, DEError> {
        self.de.save_trajectory_csv()
    }
}
