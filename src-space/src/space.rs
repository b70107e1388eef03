use std::collections::HashMap;

use ndarray::{Array1, ArrayView1};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::hyperparameter::{Hyperparameter, ParamValue};

/// Errors raised while building or using a [`ConfigurationSpace`].
#[derive(Debug, thiserror::Error)]
pub enum SpaceError {
    #[error("hyperparameter {0:?} is already defined")]
    DuplicateParameter(String),

    #[error("unknown hyperparameter {0:?}")]
    UnknownParameter(String),

    #[error("invalid domain for {name:?}: {reason}")]
    InvalidDomain { name: String, reason: String },

    #[error("condition on {child:?} must reference a previously added parent, got {parent:?}")]
    InvalidCondition { child: String, parent: String },

    #[error("{value} is not a legal value for {name:?}")]
    IllegalValue { name: String, value: String },
}

/// Equality activation rule: `child` is active iff `parent` is active and
/// assigned `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub child: String,
    pub parent: String,
    pub value: ParamValue,
}

/// An assignment of values to (a subset of) the space's parameters.
///
/// After [`ConfigurationSpace::deactivate_inactive`] only active parameters
/// are present.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Configuration {
    values: HashMap<String, ParamValue>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: ParamValue) {
        self.values.insert(name.into(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.values.iter()
    }
}

impl FromIterator<(String, ParamValue)> for Configuration {
    fn from_iter<T: IntoIterator<Item = (String, ParamValue)>>(iter: T) -> Self {
        Self { values: iter.into_iter().collect() }
    }
}

/// Ordered collection of named hyperparameters with activation conditions
/// and its own seeded sampling stream.
///
/// The declaration order fixes the vector layout: parameter i occupies
/// coordinate i of the encoded vector, inactive parameters included (their
/// slot carries the imputed default's encoding).
#[derive(Debug, Clone)]
pub struct ConfigurationSpace {
    names: Vec<String>,
    params: Vec<Hyperparameter>,
    index: HashMap<String, usize>,
    conditions: Vec<Condition>,
    seed: u32,
    rng: StdRng,
}

impl ConfigurationSpace {
    pub fn new(seed: u32) -> Self {
        Self {
            names: Vec::new(),
            params: Vec::new(),
            index: HashMap::new(),
            conditions: Vec::new(),
            seed,
            rng: StdRng::seed_from_u64(seed as u64),
        }
    }

    /// Appends a hyperparameter, validating its domain.
    pub fn add(&mut self, name: impl Into<String>, param: Hyperparameter) -> Result<(), SpaceError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(SpaceError::DuplicateParameter(name));
        }
        validate_domain(&name, &param)?;
        self.index.insert(name.clone(), self.params.len());
        self.names.push(name);
        self.params.push(param);
        Ok(())
    }

    /// Appends an activation condition. The parent must be declared before
    /// the child so activation can be resolved in declaration order.
    pub fn add_condition(&mut self, cond: Condition) -> Result<(), SpaceError> {
        let child = *self
            .index
            .get(&cond.child)
            .ok_or_else(|| SpaceError::UnknownParameter(cond.child.clone()))?;
        let parent = *self
            .index
            .get(&cond.parent)
            .ok_or_else(|| SpaceError::UnknownParameter(cond.parent.clone()))?;
        if parent >= child {
            return Err(SpaceError::InvalidCondition { child: cond.child, parent: cond.parent });
        }
        self.conditions.push(cond);
        Ok(())
    }

    /// Number of hyperparameters, inactive ones included.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Hyperparameter> {
        self.index.get(name).map(|&i| &self.params[i])
    }

    pub fn hyperparameters(&self) -> impl Iterator<Item = (&String, &Hyperparameter)> {
        self.names.iter().zip(self.params.iter())
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Restarts the sampling stream from the given seed.
    pub fn reseed(&mut self, seed: u32) {
        self.seed = seed;
        self.rng = StdRng::seed_from_u64(seed as u64);
    }

    /// Draws one configuration: every parameter is sampled in declaration
    /// order, then unsatisfied conditionals are removed.
    pub fn sample(&mut self) -> Configuration {
        let mut full = Configuration::new();
        for (name, param) in self.names.iter().zip(self.params.iter()) {
            full.set(name.clone(), param.sample(&mut self.rng));
        }
        self.deactivate_inactive(&full)
    }

    /// The all-defaults configuration, restricted to active parameters.
    pub fn default_configuration(&self) -> Configuration {
        let mut full = Configuration::new();
        for (name, param) in self.names.iter().zip(self.params.iter()) {
            full.set(name.clone(), param.default_value());
        }
        self.deactivate_inactive(&full)
    }

    /// Returns a configuration with every parameter present: values are
    /// taken from `config` where assigned, defaults elsewhere.
    pub fn impute_inactive(&self, config: &Configuration) -> Configuration {
        let mut full = Configuration::new();
        for (name, param) in self.names.iter().zip(self.params.iter()) {
            let value = config.get(name).cloned().unwrap_or_else(|| param.default_value());
            full.set(name.clone(), value);
        }
        full
    }

    /// Removes parameters whose activation conditions are unsatisfied under
    /// `config`.
    pub fn deactivate_inactive(&self, config: &Configuration) -> Configuration {
        let active = self.active_mask(config);
        let mut out = Configuration::new();
        for (i, name) in self.names.iter().enumerate() {
            if active[i] {
                if let Some(value) = config.get(name) {
                    out.set(name.clone(), value.clone());
                }
            }
        }
        out
    }

    /// Encodes a configuration into [0,1]^D. Inactive parameters are imputed
    /// with their default first so the vector always has full dimensionality.
    pub fn to_vector(&self, config: &Configuration) -> Result<Array1<f64>, SpaceError> {
        let full = self.impute_inactive(config);
        let mut vector = Array1::zeros(self.params.len());
        for (i, (name, param)) in self.names.iter().zip(self.params.iter()).enumerate() {
            let value = full.get(name).expect("imputed configuration is total");
            vector[i] = param.encode(value).ok_or_else(|| SpaceError::IllegalValue {
                name: name.clone(),
                value: value.to_string(),
            })?;
        }
        Ok(vector)
    }

    /// Decodes a point of [0,1]^D into a condition-respecting configuration.
    pub fn from_vector(&self, vector: ArrayView1<f64>) -> Configuration {
        assert_eq!(vector.len(), self.params.len(), "vector/space dimensionality mismatch");
        let mut full = Configuration::new();
        for (i, (name, param)) in self.names.iter().zip(self.params.iter()).enumerate() {
            full.set(name.clone(), param.decode(vector[i]));
        }
        self.deactivate_inactive(&full)
    }

    fn active_mask(&self, config: &Configuration) -> Vec<bool> {
        let mut active = vec![true; self.params.len()];
        for (i, name) in self.names.iter().enumerate() {
            for cond in self.conditions.iter().filter(|c| &c.child == name) {
                let parent = self.index[&cond.parent];
                if !active[parent] || config.get(&cond.parent) != Some(&cond.value) {
                    active[i] = false;
                    break;
                }
            }
        }
        active
    }
}

fn validate_domain(name: &str, param: &Hyperparameter) -> Result<(), SpaceError> {
    let err = |reason: &str| SpaceError::InvalidDomain { name: name.to_string(), reason: reason.to_string() };
    match param {
        Hyperparameter::UniformFloat { lower, upper, log } => {
            if !(lower < upper) {
                return Err(err("lower must be strictly below upper"));
            }
            if *log && *lower <= 0.0 {
                return Err(err("log scaling requires a positive lower bound"));
            }
        }
        Hyperparameter::UniformInteger { lower, upper, log } => {
            if !(lower < upper) {
                return Err(err("lower must be strictly below upper"));
            }
            if *log && *lower <= 0 {
                return Err(err("log scaling requires a positive lower bound"));
            }
        }
        Hyperparameter::Ordinal { sequence } => {
            if sequence.is_empty() {
                return Err(err("sequence must not be empty"));
            }
        }
        Hyperparameter::Categorical { choices } => {
            if choices.is_empty() {
                return Err(err("choices must not be empty"));
            }
        }
        Hyperparameter::Constant { .. } => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixed_space() -> ConfigurationSpace {
        let mut cs = ConfigurationSpace::new(0);
        cs.add("lr", Hyperparameter::UniformFloat { lower: 1e-4, upper: 1e-1, log: true }).unwrap();
        cs.add("layers", Hyperparameter::UniformInteger { lower: 1, upper: 16, log: false }).unwrap();
        cs.add("optimizer", Hyperparameter::Categorical {
            choices: vec!["a".into(), "b".into(), "c".into()],
        })
        .unwrap();
        cs.add("seed", Hyperparameter::Constant { value: ParamValue::Int(42) }).unwrap();
        cs.add("batch", Hyperparameter::Ordinal {
            sequence: vec![1i64.into(), 2i64.into(), 4i64.into(), 8i64.into()],
        })
        .unwrap();
        cs
    }

    #[test]
    fn duplicate_parameter_is_rejected() {
        let mut cs = ConfigurationSpace::new(0);
        cs.add("x", Hyperparameter::Constant { value: ParamValue::Int(1) }).unwrap();
        let again = cs.add("x", Hyperparameter::Constant { value: ParamValue::Int(2) });
        assert!(matches!(again, Err(SpaceError::DuplicateParameter(_))));
    }

    #[test]
    fn invalid_domains_are_rejected() {
        let mut cs = ConfigurationSpace::new(0);
        assert!(cs.add("bad", Hyperparameter::UniformFloat { lower: 2.0, upper: 1.0, log: false }).is_err());
        assert!(cs.add("logneg", Hyperparameter::UniformFloat { lower: -1.0, upper: 1.0, log: true }).is_err());
        assert!(cs.add("empty", Hyperparameter::Categorical { choices: vec![] }).is_err());
    }

    #[test]
    fn sampled_configurations_encode_into_unit_cube() {
        let mut cs = mixed_space();
        for _ in 0..50 {
            let config = cs.sample();
            let vector = cs.to_vector(&config).unwrap();
            for &v in vector.iter() {
                assert!((0.0..=1.0).contains(&v), "encoded value {} out of range", v);
            }
        }
    }

    #[test]
    fn encode_then_decode_recovers_active_values() {
        let mut cs = mixed_space();
        for _ in 0..10 {
            let config = cs.sample();
            let vector = cs.to_vector(&config).unwrap();
            let back = cs.from_vector(vector.view());
            for (name, value) in config.iter() {
                match (value, back.get(name).unwrap()) {
                    (ParamValue::Float(a), ParamValue::Float(b)) => {
                        assert!((a - b).abs() < 1e-9 * a.abs().max(1.0), "{}: {} vs {}", name, a, b)
                    }
                    (a, b) => assert_eq!(a, b, "mismatch on {}", name),
                }
            }
        }
    }

    #[test]
    fn conditions_deactivate_children() {
        let mut cs = ConfigurationSpace::new(7);
        cs.add("kind", Hyperparameter::Categorical { choices: vec!["sgd".into(), "adam".into()] })
            .unwrap();
        cs.add("momentum", Hyperparameter::UniformFloat { lower: 0.0, upper: 1.0, log: false })
            .unwrap();
        cs.add_condition(Condition {
            child: "momentum".into(),
            parent: "kind".into(),
            value: "sgd".into(),
        })
        .unwrap();

        let mut config = Configuration::new();
        config.set("kind", "adam".into());
        config.set("momentum", ParamValue::Float(0.9));
        let active = cs.deactivate_inactive(&config);
        assert!(active.contains("kind"));
        assert!(!active.contains("momentum"));

        // imputing brings the child back with its default
        let full = cs.impute_inactive(&active);
        assert_eq!(full.get("momentum"), Some(&ParamValue::Float(0.5)));
    }

    #[test]
    fn condition_parent_must_precede_child() {
        let mut cs = ConfigurationSpace::new(0);
        cs.add("child", Hyperparameter::Constant { value: ParamValue::Int(0) }).unwrap();
        cs.add("parent", Hyperparameter::Constant { value: ParamValue::Int(0) }).unwrap();
        let res = cs.add_condition(Condition {
            child: "child".into(),
            parent: "parent".into(),
            value: ParamValue::Int(0),
        });
        assert!(matches!(res, Err(SpaceError::InvalidCondition { .. })));
    }

    #[test]
    fn reseeding_replays_the_sampling_stream() {
        let mut cs = mixed_space();
        let first: Vec<_> = (0..5).map(|_| cs.sample()).collect();
        cs.reseed(0);
        let second: Vec<_> = (0..5).map(|_| cs.sample()).collect();
        assert_eq!(first, second);
    }
}
