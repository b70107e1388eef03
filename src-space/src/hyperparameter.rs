use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// A concrete value a hyperparameter can take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Float(f64),
    Int(i64),
    Text(String),
}

impl ParamValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Text(_) => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

/// A single dimension of a search space.
///
/// Every variant maps its domain onto [0,1]: [`Hyperparameter::encode`] and
/// [`Hyperparameter::decode`] form the bijection the optimizer relies on.
/// `decode(encode(x))` recovers `x` for any legal value; the reverse is not
/// guaranteed (discrete parameters collapse whole sub-intervals onto one
/// value).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Hyperparameter {
    /// Continuous value in [lower, upper], optionally log scaled.
    UniformFloat { lower: f64, upper: f64, log: bool },
    /// Integer value in [lower, upper], optionally log scaled.
    UniformInteger { lower: i64, upper: i64, log: bool },
    /// One of an ordered sequence of values.
    Ordinal { sequence: Vec<ParamValue> },
    /// One of an unordered set of choices.
    Categorical { choices: Vec<ParamValue> },
    /// A fixed value, untouched by the search.
    Constant { value: ParamValue },
}

impl Hyperparameter {
    /// The default value used when imputing inactive parameters: the
    /// (log-)midpoint for numeric ranges, the first element for discrete
    /// domains, the value itself for constants.
    pub fn default_value(&self) -> ParamValue {
        match self {
            Hyperparameter::UniformFloat { lower, upper, log } => {
                let mid = if *log {
                    ((lower.ln() + upper.ln()) / 2.0).exp()
                } else {
                    (lower + upper) / 2.0
                };
                ParamValue::Float(mid)
            }
            Hyperparameter::UniformInteger { lower, upper, log } => {
                let (lo, hi) = (*lower as f64, *upper as f64);
                let mid = if *log { ((lo.ln() + hi.ln()) / 2.0).exp() } else { (lo + hi) / 2.0 };
                ParamValue::Int((mid.round() as i64).clamp(*lower, *upper))
            }
            Hyperparameter::Ordinal { sequence } => sequence[0].clone(),
            Hyperparameter::Categorical { choices } => choices[0].clone(),
            Hyperparameter::Constant { value } => value.clone(),
        }
    }

    /// Draws a value uniformly from the parameter's domain (log-uniformly
    /// when log scaled).
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParamValue {
        match self {
            Hyperparameter::UniformFloat { lower, upper, log } => {
                let v = if *log {
                    rng.random_range(lower.ln()..upper.ln()).exp()
                } else {
                    rng.random_range(*lower..*upper)
                };
                ParamValue::Float(v)
            }
            Hyperparameter::UniformInteger { lower, upper, log } => {
                let v = if *log {
                    let raw = rng.random_range((*lower as f64).ln()..(*upper as f64).ln()).exp();
                    (raw.round() as i64).clamp(*lower, *upper)
                } else {
                    rng.random_range(*lower..=*upper)
                };
                ParamValue::Int(v)
            }
            Hyperparameter::Ordinal { sequence } => {
                sequence[rng.random_range(0..sequence.len())].clone()
            }
            Hyperparameter::Categorical { choices } => {
                choices[rng.random_range(0..choices.len())].clone()
            }
            Hyperparameter::Constant { value } => value.clone(),
        }
    }

    /// Maps a legal value into [0,1]. Returns `None` when the value does not
    /// belong to the parameter's domain.
    pub fn encode(&self, value: &ParamValue) -> Option<f64> {
        match self {
            Hyperparameter::UniformFloat { lower, upper, log } => {
                let x = value.as_f64()?;
                let code = if *log {
                    (x / lower).ln() / (upper / lower).ln()
                } else {
                    (x - lower) / (upper - lower)
                };
                Some(code)
            }
            Hyperparameter::UniformInteger { lower, upper, log } => {
                let x = value.as_f64()?;
                let (lo, hi) = (*lower as f64, *upper as f64);
                let code = if *log {
                    (x / lo).ln() / (hi / lo).ln()
                } else {
                    (x - lo) / (hi - lo)
                };
                Some(code)
            }
            Hyperparameter::Ordinal { sequence } => {
                let idx = sequence.iter().position(|v| v == value)?;
                Some(idx as f64 / sequence.len() as f64)
            }
            Hyperparameter::Categorical { choices } => {
                let idx = choices.iter().position(|v| v == value)?;
                Some(idx as f64 / choices.len() as f64)
            }
            // Constants encode to 0 so mutation cannot move them.
            Hyperparameter::Constant { .. } => Some(0.0),
        }
    }

    /// Maps a code in [0,1] back to a value of the parameter's domain.
    pub fn decode(&self, code: f64) -> ParamValue {
        match self {
            Hyperparameter::UniformFloat { lower, upper, log } => {
                let v = if *log {
                    lower * (upper / lower).powf(code)
                } else {
                    lower + (upper - lower) * code
                };
                ParamValue::Float(v)
            }
            Hyperparameter::UniformInteger { lower, upper, log } => {
                let (lo, hi) = (*lower as f64, *upper as f64);
                let raw = if *log {
                    lo * (hi / lo).powf(code)
                } else {
                    lo + (hi - lo) * code
                };
                ParamValue::Int((raw.round() as i64).clamp(*lower, *upper))
            }
            Hyperparameter::Ordinal { sequence } => {
                let idx = Self::bucket(code, sequence.len());
                sequence[idx].clone()
            }
            Hyperparameter::Categorical { choices } => {
                let idx = Self::bucket(code, choices.len());
                choices[idx].clone()
            }
            Hyperparameter::Constant { value } => value.clone(),
        }
    }

    /// Selects the last range boundary j/L that is <= code.
    fn bucket(code: f64, levels: usize) -> usize {
        ((code * levels as f64).floor() as usize).min(levels - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_linear_encoding_is_affine() {
        let hp = Hyperparameter::UniformFloat { lower: -5.0, upper: 5.0, log: false };
        assert_eq!(hp.encode(&ParamValue::Float(0.0)), Some(0.5));
        assert_eq!(hp.decode(0.5), ParamValue::Float(0.0));
        assert_eq!(hp.decode(0.0), ParamValue::Float(-5.0));
        assert_eq!(hp.decode(1.0), ParamValue::Float(5.0));
    }

    #[test]
    fn float_log_encoding_round_trips() {
        let hp = Hyperparameter::UniformFloat { lower: 1e-4, upper: 1e-1, log: true };
        for x in [1e-4, 1e-3, 5e-3, 1e-1] {
            let code = hp.encode(&ParamValue::Float(x)).unwrap();
            assert!((0.0..=1.0).contains(&code));
            match hp.decode(code) {
                ParamValue::Float(y) => assert!((x - y).abs() < 1e-12 * x.max(1.0)),
                other => panic!("expected float, got {:?}", other),
            }
        }
    }

    #[test]
    fn integer_decoding_rounds_to_nearest() {
        let hp = Hyperparameter::UniformInteger { lower: 0, upper: 10, log: false };
        assert_eq!(hp.decode(0.04), ParamValue::Int(0));
        assert_eq!(hp.decode(0.06), ParamValue::Int(1));
        assert_eq!(hp.decode(1.0), ParamValue::Int(10));
    }

    #[test]
    fn ordinal_uses_floor_buckets() {
        let hp = Hyperparameter::Ordinal {
            sequence: vec![1i64.into(), 2i64.into(), 4i64.into(), 8i64.into()],
        };
        assert_eq!(hp.decode(0.0), ParamValue::Int(1));
        assert_eq!(hp.decode(0.24), ParamValue::Int(1));
        assert_eq!(hp.decode(0.25), ParamValue::Int(2));
        assert_eq!(hp.decode(0.99), ParamValue::Int(8));
        // encode sits at the lower boundary of each bucket
        assert_eq!(hp.encode(&ParamValue::Int(4)), Some(0.5));
    }

    #[test]
    fn categorical_rejects_foreign_values() {
        let hp = Hyperparameter::Categorical { choices: vec!["a".into(), "b".into(), "c".into()] };
        assert_eq!(hp.encode(&ParamValue::Text("b".into())), Some(1.0 / 3.0));
        assert_eq!(hp.encode(&ParamValue::Text("z".into())), None);
    }

    #[test]
    fn constant_encodes_to_zero() {
        let hp = Hyperparameter::Constant { value: ParamValue::Int(42) };
        assert_eq!(hp.encode(&ParamValue::Int(42)), Some(0.0));
        assert_eq!(hp.decode(0.7), ParamValue::Int(42));
    }
}
