//! Differential Evolution (DE) kernel for multi-fidelity hyperparameter
//! optimization, in pure Rust using ndarray
//!
//! The optimizer searches the unit hypercube [0,1]^D. When a
//! [`ConfigurationSpace`] is attached, candidates are decoded into typed
//! [`Configuration`]s before evaluation and re-encoded on the way back;
//! without one, objectives receive raw vectors.
//!
//! Supported features:
//! - Strategies named `<mut>_<xover>` with mut in {rand1, rand2, rand2dir,
//!   best1, best2, currenttobest1, randtobest1} and xover in {bin, exp}
//! - Binomial and exponential crossover
//! - Boundary repair by uniform resampling or clipping
//! - Synchronous generation loop (`run`) and an asynchronous driver with
//!   four target-selection policies (`AsyncDE`)
//! - An ask/tell surface producing the same trajectory as `run` under
//!   identical seeds and evaluation order
//! - A config registry assigning monotone ids to every announced candidate
//!
//! All randomness is consumed from one seeded stream per instance in a fixed
//! total order; two instances with the same seed, configuration and objective
//! replay the same trajectory.

mod async_de;
mod population;
mod repository;
mod rng;

pub use async_de::{AsyncDE, AsyncStrategy};
pub use hypertune_space::{
    Condition, Configuration, ConfigurationSpace, Hyperparameter, ParamValue, SpaceError,
};
pub use population::Population;
pub use repository::{ConfigEntry, ConfigRepository, FidelityResult, Info};
pub use rng::SeededRng;

use std::fmt;
use std::fs::create_dir_all;
use std::path::PathBuf;
use std::str::FromStr;

use ndarray::{Array1, Array2, ArrayView2, Axis, concatenate};
use serde::Serialize;

/// Errors surfaced by the DE kernel.
#[derive(Debug, thiserror::Error)]
pub enum DEError {
    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("unknown asynchronous strategy: {0}")]
    UnknownAsyncStrategy(String),

    #[error("an objective function is required for this operation")]
    MissingObjective,

    #[error("no evolution strategy configured")]
    MissingStrategy,

    #[error("search space dimensionality unknown: provide dimensions or a configuration space")]
    UnknownDimensions,

    #[error("a configuration was passed but no configuration space is attached")]
    MissingSpace,

    #[error("previous ask() has not been told yet: call tell() before asking again")]
    PendingTell,

    #[error("failed to prepare output path {path:?}: {source}")]
    OutputPath {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write trajectory: {0}")]
    TrajectoryExport(#[from] csv::Error),

    #[error(transparent)]
    Space(#[from] SpaceError),
}

/// Mutation half of a DE strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStrategy {
    Rand1,
    Rand2,
    Rand2Dir,
    Best1,
    Best2,
    CurrentToBest1,
    RandToBest1,
}

impl MutationStrategy {
    /// Fewest distinct parents the donor formula draws.
    pub fn min_pop_size(&self) -> usize {
        match self {
            MutationStrategy::Rand1 | MutationStrategy::Rand2Dir | MutationStrategy::RandToBest1 => 3,
            MutationStrategy::CurrentToBest1 | MutationStrategy::Best1 => 2,
            MutationStrategy::Best2 => 4,
            MutationStrategy::Rand2 => 5,
        }
    }

    fn token(&self) -> &'static str {
        match self {
            MutationStrategy::Rand1 => "rand1",
            MutationStrategy::Rand2 => "rand2",
            MutationStrategy::Rand2Dir => "rand2dir",
            MutationStrategy::Best1 => "best1",
            MutationStrategy::Best2 => "best2",
            MutationStrategy::CurrentToBest1 => "currenttobest1",
            MutationStrategy::RandToBest1 => "randtobest1",
        }
    }
}

/// Crossover half of a DE strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossoverStrategy {
    Bin,
    Exp,
}

impl CrossoverStrategy {
    fn token(&self) -> &'static str {
        match self {
            CrossoverStrategy::Bin => "bin",
            CrossoverStrategy::Exp => "exp",
        }
    }
}

/// A full DE strategy, e.g. `rand1_bin` or `best2_exp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strategy {
    pub mutation: MutationStrategy,
    pub crossover: CrossoverStrategy,
}

impl FromStr for Strategy {
    type Err = DEError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.to_lowercase();
        let (mutation, crossover) =
            t.split_once('_').ok_or_else(|| DEError::UnknownStrategy(s.to_string()))?;
        let mutation = match mutation {
            "rand1" => MutationStrategy::Rand1,
            "rand2" => MutationStrategy::Rand2,
            "rand2dir" => MutationStrategy::Rand2Dir,
            "best1" => MutationStrategy::Best1,
            "best2" => MutationStrategy::Best2,
            "currenttobest1" => MutationStrategy::CurrentToBest1,
            "randtobest1" => MutationStrategy::RandToBest1,
            _ => return Err(DEError::UnknownStrategy(s.to_string())),
        };
        let crossover = match crossover {
            "bin" => CrossoverStrategy::Bin,
            "exp" => CrossoverStrategy::Exp,
            _ => return Err(DEError::UnknownStrategy(s.to_string())),
        };
        Ok(Strategy { mutation, crossover })
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.mutation.token(), self.crossover.token())
    }
}

/// How out-of-range coordinates are repaired after crossover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundaryFix {
    /// Resample the offending coordinate uniformly in (0, 1).
    #[default]
    Random,
    /// Snap to 0 or 1, whichever is nearer.
    Clip,
}

/// What an objective evaluation reports back.
///
/// `fitness` is minimized; +inf is legal, NaN is not. `cost` is the resource
/// spent by the evaluation and must be non-negative.
#[derive(Debug, Clone)]
pub struct EvalResult {
    pub fitness: f64,
    pub cost: f64,
    pub info: Info,
}

impl EvalResult {
    pub fn new(fitness: f64, cost: f64) -> Self {
        Self { fitness, cost, info: Info::new() }
    }

    pub fn with_info(mut self, info: Info) -> Self {
        self.info = info;
        self
    }

    pub(crate) fn validate(&self) {
        assert!(!self.fitness.is_nan(), "objective returned a NaN fitness");
        assert!(self.cost >= 0.0, "objective returned a negative cost");
    }
}

/// What the objective receives and `ask` hands out: a decoded configuration
/// when a space is attached, the raw search vector otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    Vector(Array1<f64>),
    Config(Configuration),
}

impl Candidate {
    pub fn as_vector(&self) -> Option<&Array1<f64>> {
        match self {
            Candidate::Vector(v) => Some(v),
            Candidate::Config(_) => None,
        }
    }

    pub fn as_config(&self) -> Option<&Configuration> {
        match self {
            Candidate::Config(c) => Some(c),
            Candidate::Vector(_) => None,
        }
    }
}

/// The objective function contract: candidate and optional fidelity in,
/// fitness/cost/info out.
pub type Objective = Box<dyn FnMut(&Candidate, Option<f64>) -> EvalResult + Send>;

/// One row of the evaluation history.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub vector: Vec<f64>,
    pub fitness: f64,
    pub fidelity: f64,
    pub info: Info,
}

/// The three aligned trajectory arrays returned by `run`.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Running incumbent score, one entry per evaluation.
    pub traj: Array1<f64>,
    /// Per-evaluation cost.
    pub runtime: Array1<f64>,
    /// Per-evaluation record of what was evaluated.
    pub history: Vec<HistoryRecord>,
}

/// Best-so-far individual observed by a DE instance.
#[derive(Debug, Clone)]
pub struct Incumbent {
    pub score: f64,
    pub vector: Option<Array1<f64>>,
    pub id: Option<usize>,
}

impl Default for Incumbent {
    fn default() -> Self {
        Self { score: f64::INFINITY, vector: None, id: None }
    }
}

/// Configuration for a DE instance.
pub struct DEConfig {
    pub space: Option<ConfigurationSpace>,
    pub dimensions: Option<usize>,
    pub objective: Option<Objective>,
    pub pop_size: usize,
    pub mutation_factor: f64,
    pub crossover_prob: f64,
    pub strategy: Option<Strategy>,
    /// Age an individual starts with and is reset to on a selection win.
    pub max_age: f64,
    pub boundary_fix_type: BoundaryFix,
    /// 32-bit seed; `None` draws one from the system and records it.
    pub seed: Option<u32>,
    /// Directory for driver artifacts, created at construction.
    pub output_path: PathBuf,
    /// Optional projection to a lower-dimensional evaluation vector: output
    /// dimension i aggregates the listed input dimensions by max.
    pub dim_map: Option<Vec<Vec<usize>>>,
}

impl Default for DEConfig {
    fn default() -> Self {
        Self {
            space: None,
            dimensions: None,
            objective: None,
            pop_size: 20,
            mutation_factor: 0.5,
            crossover_prob: 0.5,
            strategy: Some(Strategy {
                mutation: MutationStrategy::Rand1,
                crossover: CrossoverStrategy::Bin,
            }),
            max_age: f64::INFINITY,
            boundary_fix_type: BoundaryFix::Random,
            seed: None,
            output_path: PathBuf::from("."),
            dim_map: None,
        }
    }
}

/// Fluent builder for [`DEConfig`].
pub struct DEConfigBuilder {
    cfg: DEConfig,
}

impl DEConfigBuilder {
    pub fn new() -> Self {
        Self { cfg: DEConfig::default() }
    }
    pub fn space(mut self, v: ConfigurationSpace) -> Self {
        self.cfg.space = Some(v);
        self
    }
    pub fn dimensions(mut self, v: usize) -> Self {
        self.cfg.dimensions = Some(v);
        self
    }
    pub fn objective(mut self, v: Objective) -> Self {
        self.cfg.objective = Some(v);
        self
    }
    pub fn pop_size(mut self, v: usize) -> Self {
        self.cfg.pop_size = v;
        self
    }
    pub fn mutation_factor(mut self, v: f64) -> Self {
        self.cfg.mutation_factor = v;
        self
    }
    pub fn crossover_prob(mut self, v: f64) -> Self {
        self.cfg.crossover_prob = v;
        self
    }
    pub fn strategy(mut self, v: Strategy) -> Self {
        self.cfg.strategy = Some(v);
        self
    }
    pub fn max_age(mut self, v: f64) -> Self {
        self.cfg.max_age = v;
        self
    }
    pub fn boundary_fix(mut self, v: BoundaryFix) -> Self {
        self.cfg.boundary_fix_type = v;
        self
    }
    pub fn seed(mut self, v: u32) -> Self {
        self.cfg.seed = Some(v);
        self
    }
    pub fn output_path(mut self, v: impl Into<PathBuf>) -> Self {
        self.cfg.output_path = v.into();
        self
    }
    pub fn dim_map(mut self, v: Vec<Vec<usize>>) -> Self {
        self.cfg.dim_map = Some(v);
        self
    }
    pub fn build(self) -> DEConfig {
        self.cfg
    }
}

/// Which sampling operation feeds the mutation operator: the plain pool, or
/// the pool with the current target removed (asynchronous variants).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SampleMode {
    Plain,
    ExcludeTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AskPhase {
    Fresh,
    Init,
    Generation,
}

#[derive(Debug)]
struct AskState {
    phase: AskPhase,
    counter: usize,
    trials: Vec<Array1<f64>>,
    trial_ids: Vec<usize>,
    cursor: usize,
    pending: bool,
}

impl Default for AskState {
    fn default() -> Self {
        Self {
            phase: AskPhase::Fresh,
            counter: 0,
            trials: Vec::new(),
            trial_ids: Vec::new(),
            cursor: 0,
            pending: false,
        }
    }
}

/// Synchronous Differential Evolution driver.
pub struct DE {
    space: Option<ConfigurationSpace>,
    objective: Option<Objective>,
    dimensions: usize,
    pop_size: usize,
    mutation_factor: f64,
    crossover_prob: f64,
    strategy: Option<Strategy>,
    max_age: f64,
    fix_type: BoundaryFix,
    dim_map: Option<Vec<Vec<usize>>>,
    output_path: PathBuf,
    rng: SeededRng,
    repository: ConfigRepository,
    population: Option<Population>,
    incumbent: Incumbent,
    traj: Vec<f64>,
    runtime: Vec<f64>,
    history: Vec<HistoryRecord>,
    ask_state: AskState,
}

impl DE {
    pub fn new(config: DEConfig) -> Result<Self, DEError> {
        let DEConfig {
            mut space,
            dimensions,
            objective,
            pop_size,
            mutation_factor,
            crossover_prob,
            strategy,
            max_age,
            boundary_fix_type,
            seed,
            output_path,
            dim_map,
        } = config;

        let rng = SeededRng::new(seed);
        // the space gets the same seed so its sampling stream replays too
        if let Some(space) = space.as_mut() {
            space.reseed(rng.original_seed());
        }
        let dimensions = match dimensions {
            Some(d) => d,
            None => space.as_ref().map(|s| s.len()).ok_or(DEError::UnknownDimensions)?,
        };
        create_dir_all(&output_path)
            .map_err(|source| DEError::OutputPath { path: output_path.clone(), source })?;

        Ok(Self {
            space,
            objective,
            dimensions,
            pop_size,
            mutation_factor,
            crossover_prob,
            strategy,
            max_age,
            fix_type: boundary_fix_type,
            dim_map,
            output_path,
            rng,
            repository: ConfigRepository::new(),
            population: None,
            incumbent: Incumbent::default(),
            traj: Vec::new(),
            runtime: Vec::new(),
            history: Vec::new(),
            ask_state: AskState::default(),
        })
    }

    /// Clears trajectory arrays, population and incumbent; with
    /// `reset_seeds` the RNG (and the space's sampling stream) restart from
    /// the original seed. The config registry is kept.
    pub fn reset(&mut self, reset_seeds: bool) {
        self.incumbent = Incumbent::default();
        self.population = None;
        self.traj.clear();
        self.runtime.clear();
        self.history.clear();
        self.ask_state = AskState::default();
        if reset_seeds {
            self.rng.reset();
            let seed = self.rng.original_seed();
            if let Some(space) = self.space.as_mut() {
                space.reseed(seed);
            }
        }
    }

    // ------------------------------ accessors ------------------------------

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn pop_size(&self) -> usize {
        self.pop_size
    }

    pub fn strategy(&self) -> Option<Strategy> {
        self.strategy
    }

    pub fn seed(&self) -> u32 {
        self.rng.original_seed()
    }

    pub fn incumbent(&self) -> &Incumbent {
        &self.incumbent
    }

    pub fn population(&self) -> Option<&Population> {
        self.population.as_ref()
    }

    pub fn repository(&self) -> &ConfigRepository {
        &self.repository
    }

    pub fn traj(&self) -> &[f64] {
        &self.traj
    }

    pub fn runtime(&self) -> &[f64] {
        &self.runtime
    }

    pub fn history(&self) -> &[HistoryRecord] {
        &self.history
    }

    /// Fewest distinct parents the configured mutation strategy needs.
    pub fn min_pop_size(&self) -> usize {
        self.strategy.map(|s| s.mutation.min_pop_size()).unwrap_or(1)
    }

    // ------------------------------ sampling ------------------------------

    /// Builds a population of `pop_size` vectors in [0,1]^D: sampled through
    /// the configuration space when one is attached, uniform otherwise.
    pub fn init_population(&mut self, pop_size: usize) -> Result<Array2<f64>, DEError> {
        let dims = self.dimensions;
        match self.space.as_mut() {
            Some(space) => {
                let mut pop = Array2::zeros((pop_size, dims));
                for i in 0..pop_size {
                    let config = space.sample();
                    let vector = space.to_vector(&config)?;
                    pop.row_mut(i).assign(&vector);
                }
                Ok(pop)
            }
            None => Ok(self.rng.uniform_matrix(pop_size, dims)),
        }
    }

    /// Draws `size` members without replacement from the own population, or
    /// from `alt_pop` when given. An alternate pool with fewer than 3 rows is
    /// first extended with the own population.
    pub fn sample_population(&mut self, size: usize, alt_pop: Option<ArrayView2<f64>>) -> Array2<f64> {
        let own = self.population.as_ref().expect("population not initialized");
        let pool: Array2<f64> = match alt_pop {
            Some(alt) if alt.nrows() < 3 => concatenate![Axis(0), alt, own.vectors.view()],
            Some(alt) => alt.to_owned(),
            None => own.vectors.clone(),
        };
        let idx = self.rng.choice(pool.nrows(), size);
        pool.select(Axis(0), &idx)
    }

    /// The asynchronous variant of [`DE::sample_population`]: the target is
    /// removed from the pool (it must not be its own parent) and the pool is
    /// padded with freshly sampled individuals up to the strategy's minimum
    /// parent count if the removal underflowed.
    pub fn sample_population_excluding(
        &mut self,
        size: usize,
        alt_pop: Option<ArrayView2<f64>>,
        target: Option<&Array1<f64>>,
    ) -> Result<Array2<f64>, DEError> {
        let own = self.population.as_ref().expect("population not initialized");
        let mut pool: Array2<f64> = match alt_pop {
            Some(alt) => alt.to_owned(),
            None => own.vectors.clone(),
        };
        if let Some(target) = target {
            if pool.nrows() > 1 {
                let hit = pool.rows().into_iter().position(|row| row == target.view());
                if let Some(pos) = hit {
                    let keep: Vec<usize> = (0..pool.nrows()).filter(|&i| i != pos).collect();
                    pool = pool.select(Axis(0), &keep);
                }
            }
        }
        let min_pop = self.min_pop_size();
        if pool.nrows() < min_pop {
            let filler = min_pop - pool.nrows();
            let fresh = self.init_population(filler)?;
            pool = concatenate![Axis(0), pool.view(), fresh.view()];
        }
        let idx = self.rng.choice(pool.nrows(), size);
        Ok(pool.select(Axis(0), &idx))
    }

    fn sample_parents(
        &mut self,
        mode: SampleMode,
        size: usize,
        alt_pop: Option<ArrayView2<f64>>,
        target: Option<&Array1<f64>>,
    ) -> Result<Array2<f64>, DEError> {
        match mode {
            SampleMode::Plain => Ok(self.sample_population(size, alt_pop)),
            SampleMode::ExcludeTarget => self.sample_population_excluding(size, alt_pop, target),
        }
    }

    // ------------------------------ operators ------------------------------

    /// Produces a donor vector for the configured strategy.
    pub fn mutation(
        &mut self,
        current: Option<&Array1<f64>>,
        best: Option<&Array1<f64>>,
        alt_pop: Option<ArrayView2<f64>>,
    ) -> Result<Array1<f64>, DEError> {
        self.mutation_with(SampleMode::Plain, current, best, alt_pop)
    }

    pub(crate) fn mutation_with(
        &mut self,
        mode: SampleMode,
        current: Option<&Array1<f64>>,
        best: Option<&Array1<f64>>,
        alt_pop: Option<ArrayView2<f64>>,
    ) -> Result<Array1<f64>, DEError> {
        let strategy = self.strategy.ok_or(DEError::MissingStrategy)?;
        self.donor_for(strategy.mutation, mode, current, best, alt_pop)
    }

    pub(crate) fn donor_for(
        &mut self,
        strategy: MutationStrategy,
        mode: SampleMode,
        current: Option<&Array1<f64>>,
        best: Option<&Array1<f64>>,
        alt_pop: Option<ArrayView2<f64>>,
    ) -> Result<Array1<f64>, DEError> {
        let f = self.mutation_factor;
        let donor = match strategy {
            MutationStrategy::Rand1 => {
                let p = self.sample_parents(mode, 3, alt_pop, current)?;
                donor_rand1(p.row(0).to_owned(), p.row(1).to_owned(), p.row(2).to_owned(), f)
            }
            MutationStrategy::Rand2 => {
                let p = self.sample_parents(mode, 5, alt_pop, current)?;
                donor_rand2(
                    p.row(0).to_owned(),
                    p.row(1).to_owned(),
                    p.row(2).to_owned(),
                    p.row(3).to_owned(),
                    p.row(4).to_owned(),
                    f,
                )
            }
            MutationStrategy::Rand2Dir => {
                let p = self.sample_parents(mode, 3, alt_pop, current)?;
                donor_rand2dir(p.row(0).to_owned(), p.row(1).to_owned(), p.row(2).to_owned(), f)
            }
            MutationStrategy::Best1 => {
                let p = self.sample_parents(mode, 2, alt_pop, current)?;
                let best = self.best_or_argmin(best);
                donor_rand1(best, p.row(0).to_owned(), p.row(1).to_owned(), f)
            }
            MutationStrategy::Best2 => {
                let p = self.sample_parents(mode, 4, alt_pop, current)?;
                let best = self.best_or_argmin(best);
                donor_rand2(
                    best,
                    p.row(0).to_owned(),
                    p.row(1).to_owned(),
                    p.row(2).to_owned(),
                    p.row(3).to_owned(),
                    f,
                )
            }
            MutationStrategy::CurrentToBest1 => {
                let p = self.sample_parents(mode, 2, alt_pop, current)?;
                let best = self.best_or_argmin(best);
                let current = current.expect("currenttobest1 requires a current target");
                donor_current_to_best1(
                    current.clone(),
                    best,
                    p.row(0).to_owned(),
                    p.row(1).to_owned(),
                    f,
                )
            }
            MutationStrategy::RandToBest1 => {
                let p = self.sample_parents(mode, 3, alt_pop, current)?;
                let best = self.best_or_argmin(best);
                donor_current_to_best1(
                    p.row(0).to_owned(),
                    best,
                    p.row(1).to_owned(),
                    p.row(2).to_owned(),
                    f,
                )
            }
        };
        Ok(donor)
    }

    fn best_or_argmin(&self, best: Option<&Array1<f64>>) -> Array1<f64> {
        match best {
            Some(b) => b.clone(),
            None => {
                let pop = self.population.as_ref().expect("population not initialized");
                pop.member(pop.argmin_fitness()).to_owned()
            }
        }
    }

    /// Recombines target and donor with the configured crossover.
    pub(crate) fn crossover(&mut self, target: &Array1<f64>, donor: &Array1<f64>) -> Result<Array1<f64>, DEError> {
        let strategy = self.strategy.ok_or(DEError::MissingStrategy)?;
        let offspring = match strategy.crossover {
            CrossoverStrategy::Bin => crossover_bin(&mut self.rng, target, donor, self.crossover_prob),
            CrossoverStrategy::Exp => crossover_exp(&mut self.rng, target, donor, self.crossover_prob),
        };
        Ok(offspring)
    }

    /// Repairs coordinates outside [0,1] with the configured boundary
    /// policy. In-range coordinates are untouched.
    pub fn boundary_check(&mut self, mut vector: Array1<f64>) -> Array1<f64> {
        for j in 0..vector.len() {
            let v = vector[j];
            if !(0.0..=1.0).contains(&v) {
                vector[j] = match self.fix_type {
                    BoundaryFix::Random => self.rng.random(),
                    BoundaryFix::Clip => v.clamp(0.0, 1.0),
                };
            }
        }
        vector
    }

    // ------------------------------ evaluation ------------------------------

    /// Projects a search vector through the `dim_map`: output dimension i is
    /// the max over its mapped input dimensions.
    pub fn map_to_original(&self, vector: &Array1<f64>) -> Array1<f64> {
        let dim_map = self.dim_map.as_ref().expect("map_to_original requires a dim_map");
        let mut out = Array1::zeros(dim_map.len());
        for (i, dims) in dim_map.iter().enumerate() {
            out[i] = dims.iter().map(|&d| vector[d]).fold(f64::NEG_INFINITY, f64::max);
        }
        out
    }

    /// Decodes the vector into the objective's input and evaluates it.
    pub fn f_objective(&mut self, x: &Array1<f64>, fidelity: Option<f64>) -> Result<EvalResult, DEError> {
        if self.objective.is_none() {
            return Err(DEError::MissingObjective);
        }
        let vector = match &self.dim_map {
            Some(_) => self.map_to_original(x),
            None => x.clone(),
        };
        let candidate = match &self.space {
            Some(space) => Candidate::Config(space.from_vector(vector.view())),
            None => Candidate::Vector(vector),
        };
        let objective = self.objective.as_mut().expect("objective presence checked above");
        let result = objective(&candidate, fidelity);
        result.validate();
        Ok(result)
    }

    /// Creates a fresh population of `pop_size`, announces it, and (unless
    /// `eval` is false) evaluates every member, updating incumbent and
    /// trajectory.
    pub fn init_eval_pop(&mut self, fidelity: Option<f64>, eval: bool) -> Result<(), DEError> {
        let fid = fidelity.unwrap_or(0.0);
        let vectors = self.init_population(self.pop_size)?;
        let ids = self.repository.announce_population(vectors.view(), fid);
        self.population = Some(Population::new(vectors, ids, self.max_age));

        if !eval {
            return Ok(());
        }

        for i in 0..self.pop_size {
            let (vector, id) = {
                let pop = self.population.as_ref().expect("population just created");
                (pop.member(i).to_owned(), pop.ids[i])
            };
            let res = self.f_objective(&vector, fidelity)?;
            self.population.as_mut().expect("population just created").fitness[i] = res.fitness;
            if res.fitness < self.incumbent.score {
                self.incumbent.score = res.fitness;
                self.incumbent.vector = Some(vector.clone());
                self.incumbent.id = Some(id);
            }
            self.repository.tell_result(id, fid, res.fitness, res.cost, res.info.clone());
            self.traj.push(self.incumbent.score);
            self.runtime.push(res.cost);
            self.history.push(HistoryRecord {
                vector: vector.to_vec(),
                fitness: res.fitness,
                fidelity: fid,
                info: res.info,
            });
        }
        Ok(())
    }

    /// Evaluates a population: the own one in place when `population` is
    /// `None`, a supplied one otherwise. Returns the fitness and age arrays
    /// of the evaluated members.
    pub fn eval_pop(
        &mut self,
        population: Option<(ArrayView2<f64>, &[usize])>,
        fidelity: Option<f64>,
    ) -> Result<(Array1<f64>, Array1<f64>), DEError> {
        let fid = fidelity.unwrap_or(0.0);
        let (vectors, ids, in_place) = match population {
            Some((p, ids)) => (p.to_owned(), ids.to_vec(), false),
            None => {
                let pop = self.population.as_ref().expect("population not initialized");
                (pop.vectors.clone(), pop.ids.clone(), true)
            }
        };
        let n = vectors.nrows();
        let mut fitnesses = Array1::zeros(n);
        let ages = Array1::from_elem(n, self.max_age);

        for i in 0..n {
            let vector = vectors.row(i).to_owned();
            let res = self.f_objective(&vector, fidelity)?;
            if in_place {
                self.population.as_mut().expect("population not initialized").fitness[i] = res.fitness;
            }
            if res.fitness <= self.incumbent.score {
                self.incumbent.score = res.fitness;
                self.incumbent.vector = Some(vector.clone());
                self.incumbent.id = Some(ids[i]);
            }
            self.repository.tell_result(ids[i], fid, res.fitness, res.cost, res.info.clone());
            self.traj.push(self.incumbent.score);
            self.runtime.push(res.cost);
            self.history.push(HistoryRecord {
                vector: vector.to_vec(),
                fitness: res.fitness,
                fidelity: fid,
                info: res.info,
            });
            fitnesses[i] = res.fitness;
        }
        Ok((fitnesses, ages))
    }

    /// Parent-vs-child competition over a batch of trials.
    pub(crate) fn selection(
        &mut self,
        trials: &Array2<f64>,
        trial_ids: &[usize],
        fidelity: Option<f64>,
    ) -> Result<(), DEError> {
        let fid = fidelity.unwrap_or(0.0);
        let max_age = self.max_age;
        for i in 0..trials.nrows() {
            let trial = trials.row(i).to_owned();
            let res = self.f_objective(&trial, fidelity)?;
            self.repository.tell_result(trial_ids[i], fid, res.fitness, res.cost, res.info.clone());
            let pop = self.population.as_mut().expect("population not initialized");
            // equality replaces: ties matter for landscape exploration
            if res.fitness <= pop.fitness[i] {
                pop.replace(i, trial.view(), trial_ids[i], res.fitness, max_age);
            } else {
                pop.age[i] -= 1.0;
            }
            if pop.fitness[i] < self.incumbent.score {
                self.incumbent.score = pop.fitness[i];
                self.incumbent.vector = Some(pop.member(i).to_owned());
                self.incumbent.id = Some(pop.ids[i]);
            }
            self.traj.push(self.incumbent.score);
            self.runtime.push(res.cost);
            self.history.push(HistoryRecord {
                vector: trial.to_vec(),
                fitness: res.fitness,
                fidelity: fid,
                info: res.info,
            });
        }
        Ok(())
    }

    /// One full generation: mutation, crossover, boundary repair and
    /// announcement for every index, then batched selection.
    pub fn evolve_generation(
        &mut self,
        fidelity: Option<f64>,
        best: Option<&Array1<f64>>,
        alt_pop: Option<ArrayView2<f64>>,
    ) -> Result<(), DEError> {
        let fid = fidelity.unwrap_or(0.0);
        let mut trials = Vec::with_capacity(self.pop_size);
        let mut trial_ids = Vec::with_capacity(self.pop_size);
        for j in 0..self.pop_size {
            let target = self
                .population
                .as_ref()
                .expect("population not initialized")
                .member(j)
                .to_owned();
            let donor = self.mutation(Some(&target), best, alt_pop)?;
            let trial = self.crossover(&target, &donor)?;
            let trial = self.boundary_check(trial);
            let id = self.repository.announce_config(trial.view(), fid);
            trials.push(trial);
            trial_ids.push(id);
        }
        let trials = stack_rows(&trials, self.dimensions);
        self.selection(&trials, &trial_ids, fidelity)
    }

    /// Generates `size` boundary-checked rand1 donors from a population
    /// (outer drivers use this to spawn candidates).
    pub fn sample_mutants(
        &mut self,
        size: usize,
        population: Option<ArrayView2<f64>>,
    ) -> Result<Array2<f64>, DEError> {
        let pool: Array2<f64> = match population {
            Some(p) if p.nrows() < 3 => {
                let own = self.population.as_ref().expect("population not initialized");
                concatenate![Axis(0), own.vectors.view(), p]
            }
            Some(p) => p.to_owned(),
            None => self.population.as_ref().expect("population not initialized").vectors.clone(),
        };
        let mut mutants = Array2::zeros((size, self.dimensions));
        for i in 0..size {
            let donor =
                self.donor_for(MutationStrategy::Rand1, SampleMode::Plain, None, None, Some(pool.view()))?;
            let donor = self.boundary_check(donor);
            mutants.row_mut(i).assign(&donor);
        }
        Ok(mutants)
    }

    /// Runs `generations` evolution steps, (re)initializing the population
    /// first when needed, and returns the accumulated trajectory arrays.
    pub fn run(
        &mut self,
        generations: usize,
        verbose: bool,
        fidelity: Option<f64>,
        reset: bool,
    ) -> Result<RunResult, DEError> {
        if self.objective.is_none() {
            return Err(DEError::MissingObjective);
        }
        if reset || self.population.is_none() {
            self.reset(true);
            if verbose {
                eprintln!("Initializing and evaluating new population...");
            }
            self.init_eval_pop(fidelity, true)?;
        }
        if verbose {
            eprintln!("Running evolutionary search...");
        }
        for g in 0..generations {
            if verbose {
                eprintln!(
                    "Generation {:>2}/{:<2} -- best {:.7e}",
                    g + 1,
                    generations,
                    self.incumbent.score
                );
            }
            self.evolve_generation(fidelity, None, None)?;
        }
        if verbose {
            eprintln!("Run complete: best {:.7e}", self.incumbent.score);
        }
        Ok(self.run_result())
    }

    pub(crate) fn run_result(&self) -> RunResult {
        RunResult {
            traj: Array1::from(self.traj.clone()),
            runtime: Array1::from(self.runtime.clone()),
            history: self.history.clone(),
        }
    }

    // ------------------------------ ask / tell ------------------------------

    /// Hands out one candidate for external evaluation.
    ///
    /// The first `pop_size` asks return the (unevaluated) initial population
    /// in order; afterwards each batch of `pop_size` asks returns one
    /// generation of trials. At most one ask may be outstanding.
    pub fn ask(&mut self, fidelity: Option<f64>) -> Result<(Candidate, usize, usize), DEError> {
        self.ask_with(fidelity, SampleMode::Plain)
    }

    pub(crate) fn ask_with(
        &mut self,
        fidelity: Option<f64>,
        mode: SampleMode,
    ) -> Result<(Candidate, usize, usize), DEError> {
        if self.ask_state.pending {
            return Err(DEError::PendingTell);
        }
        if self.population.is_none() {
            self.reset(true);
            self.init_eval_pop(fidelity, false)?;
            self.ask_state.phase = AskPhase::Init;
            self.ask_state.counter = 0;
        } else if self.ask_state.phase == AskPhase::Fresh {
            // a population already exists (e.g. from run); keep evolving it
            self.ask_state.phase = AskPhase::Generation;
        }

        let (trial, trial_id, target_idx) = match self.ask_state.phase {
            AskPhase::Init => {
                let target_idx = self.ask_state.counter % self.pop_size;
                let (trial, trial_id) = {
                    let pop = self.population.as_ref().expect("population initialized above");
                    (pop.member(target_idx).to_owned(), pop.ids[target_idx])
                };
                self.ask_state.counter += 1;
                if self.ask_state.counter >= self.pop_size {
                    self.ask_state.phase = AskPhase::Generation;
                }
                (trial, trial_id, target_idx)
            }
            AskPhase::Generation => {
                if self.ask_state.trials.is_empty() || self.ask_state.cursor >= self.ask_state.trials.len() {
                    self.build_trial_batch(fidelity, mode)?;
                }
                let cursor = self.ask_state.cursor;
                let trial = self.ask_state.trials[cursor].clone();
                let trial_id = self.ask_state.trial_ids[cursor];
                self.ask_state.cursor += 1;
                (trial, trial_id, cursor)
            }
            AskPhase::Fresh => unreachable!("ask phase resolved above"),
        };

        self.ask_state.pending = true;

        let handed = match &self.dim_map {
            Some(_) => self.map_to_original(&trial),
            None => trial,
        };
        let candidate = match &self.space {
            Some(space) => Candidate::Config(space.from_vector(handed.view())),
            None => Candidate::Vector(handed),
        };
        Ok((candidate, trial_id, target_idx))
    }

    /// Builds one generation worth of trials against the current population,
    /// using the incumbent as `best`.
    fn build_trial_batch(&mut self, fidelity: Option<f64>, mode: SampleMode) -> Result<(), DEError> {
        let fid = fidelity.unwrap_or(0.0);
        let mut trials = Vec::with_capacity(self.pop_size);
        let mut trial_ids = Vec::with_capacity(self.pop_size);
        let best = self.incumbent.vector.clone();
        for j in 0..self.pop_size {
            let target = self
                .population
                .as_ref()
                .expect("population not initialized")
                .member(j)
                .to_owned();
            let donor = self.mutation_with(mode, Some(&target), best.as_ref(), None)?;
            let trial = self.crossover(&target, &donor)?;
            let trial = self.boundary_check(trial);
            let id = self.repository.announce_config(trial.view(), fid);
            trials.push(trial);
            trial_ids.push(id);
        }
        self.ask_state.trials = trials;
        self.ask_state.trial_ids = trial_ids;
        self.ask_state.cursor = 0;
        Ok(())
    }

    /// Accepts an externally evaluated candidate: one-vs-one selection
    /// against the target, full-scan incumbent refresh, trajectory append.
    pub fn tell(
        &mut self,
        trial: &Candidate,
        trial_id: usize,
        target_idx: usize,
        result: EvalResult,
        fidelity: Option<f64>,
    ) -> Result<(), DEError> {
        result.validate();
        let fid = fidelity.unwrap_or(0.0);
        let vector = match trial {
            Candidate::Config(config) => {
                self.space.as_ref().ok_or(DEError::MissingSpace)?.to_vector(config)?
            }
            Candidate::Vector(v) => v.clone(),
        };
        self.ask_state.pending = false;

        self.repository.tell_result(trial_id, fid, result.fitness, result.cost, result.info.clone());

        let max_age = self.max_age;
        let pop = self.population.as_mut().expect("tell() requires an initialized population");
        if result.fitness <= pop.fitness[target_idx] {
            pop.replace(target_idx, vector.view(), trial_id, result.fitness, max_age);
        } else {
            pop.age[target_idx] -= 1.0;
        }
        let best_idx = pop.argmin_fitness();
        self.incumbent.score = pop.fitness[best_idx];
        self.incumbent.vector = Some(pop.member(best_idx).to_owned());
        self.incumbent.id = Some(pop.ids[best_idx]);

        self.traj.push(self.incumbent.score);
        self.runtime.push(result.cost);
        self.history.push(HistoryRecord {
            vector: vector.to_vec(),
            fitness: result.fitness,
            fidelity: fid,
            info: result.info,
        });
        Ok(())
    }

    // ------------------------------ artifacts ------------------------------

    /// Writes the trajectory arrays to `<output_path>/trajectory.csv`.
    pub fn save_trajectory_csv(&self) -> Result<PathBuf, DEError> {
        let path = self.output_path.join("trajectory.csv");
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(["eval", "incumbent", "cost", "fitness", "fidelity"])?;
        for i in 0..self.traj.len() {
            writer.write_record(&[
                i.to_string(),
                self.traj[i].to_string(),
                self.runtime[i].to_string(),
                self.history[i].fitness.to_string(),
                self.history[i].fidelity.to_string(),
            ])?;
        }
        writer.flush().map_err(csv::Error::from)?;
        Ok(path)
    }
}

// ------------------------------ donor formulas ------------------------------

pub(crate) fn donor_rand1(r1: Array1<f64>, r2: Array1<f64>, r3: Array1<f64>, f: f64) -> Array1<f64> {
    &r1 + &((&r2 - &r3) * f)
}

pub(crate) fn donor_rand2(
    r1: Array1<f64>,
    r2: Array1<f64>,
    r3: Array1<f64>,
    r4: Array1<f64>,
    r5: Array1<f64>,
    f: f64,
) -> Array1<f64> {
    &r1 + &((&r2 - &r3) * f) + &((&r4 - &r5) * f)
}

pub(crate) fn donor_rand2dir(r1: Array1<f64>, r2: Array1<f64>, r3: Array1<f64>, f: f64) -> Array1<f64> {
    let diff = &(&r1 - &r2) - &r3;
    &r1 + &(diff * (f / 2.0))
}

pub(crate) fn donor_current_to_best1(
    current: Array1<f64>,
    best: Array1<f64>,
    r1: Array1<f64>,
    r2: Array1<f64>,
    f: f64,
) -> Array1<f64> {
    &current + &((&best - &current) * f) + &((&r1 - &r2) * f)
}

// ------------------------------ crossover ------------------------------

/// Binomial crossover: each coordinate takes the donor's value with
/// probability `cr`; one random coordinate is forced to the donor when none
/// was selected, so the offspring always differs from the target.
pub(crate) fn crossover_bin(
    rng: &mut SeededRng,
    target: &Array1<f64>,
    donor: &Array1<f64>,
    cr: f64,
) -> Array1<f64> {
    let d = target.len();
    let mut picks = vec![false; d];
    let mut any = false;
    for pick in picks.iter_mut() {
        *pick = rng.random() < cr;
        any |= *pick;
    }
    if !any {
        picks[rng.integer(0, d)] = true;
    }
    let mut offspring = target.clone();
    for (j, picked) in picks.iter().enumerate() {
        if *picked {
            offspring[j] = donor[j];
        }
    }
    offspring
}

/// Exponential crossover: from a uniform start index, walk cyclically taking
/// the donor's value while a fresh draw stays below `cr`. The test precedes
/// the copy, so zero replacements are possible.
pub(crate) fn crossover_exp(
    rng: &mut SeededRng,
    target: &Array1<f64>,
    donor: &Array1<f64>,
    cr: f64,
) -> Array1<f64> {
    let d = target.len();
    let mut offspring = target.clone();
    let n = rng.integer(0, d);
    let mut l = 0;
    while rng.random() < cr && l < d {
        let idx = (n + l) % d;
        offspring[idx] = donor[idx];
        l += 1;
    }
    offspring
}

// ------------------------------ utilities ------------------------------

pub(crate) fn stack_rows(rows: &[Array1<f64>], dims: usize) -> Array2<f64> {
    let mut out = Array2::zeros((rows.len(), dims));
    for (i, row) in rows.iter().enumerate() {
        out.row_mut(i).assign(row);
    }
    out
}
