//! Typed hyperparameter search spaces for black-box optimization
//!
//! A [`ConfigurationSpace`] is an ordered collection of named
//! [`Hyperparameter`]s, optionally restricted by equality activation
//! conditions. Every hyperparameter defines a total bijection with the unit
//! interval, so a configuration of D parameters maps to a point in [0,1]^D
//! and back. Optimizers search the hypercube; the space translates.
//!
//! Supported parameter kinds:
//! - Uniform floats and integers, linear or log scaled
//! - Ordinals over an explicit sequence of values
//! - Categoricals over an explicit set of choices
//! - Constants (encoded as 0, immutable under search)

mod hyperparameter;
mod space;

pub use hyperparameter::{Hyperparameter, ParamValue};
pub use space::{Condition, Configuration, ConfigurationSpace, SpaceError};
