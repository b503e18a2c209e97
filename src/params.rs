/*!
The sampled parameter space.

A [`ParamSet`] is an ordered list of unique parameter names plus a
name-to-index table. Internally every position is a plain `Vec<T>` laid out
in `ParamSet` order, so the hot accept/reject loop never performs name
lookups; the by-name interface only exists at the boundary
([`ParamSet::position_from_map`] and friends).
*/

use std::collections::HashMap;

use num_traits::Float;

use crate::errors::{Error, Result};

/// An ordered set of named scalar parameters.
///
/// # Examples
///
/// ```rust
/// use multichain_mcmc::params::ParamSet;
///
/// let params = ParamSet::new(["x", "y"]).unwrap();
/// assert_eq!(params.len(), 2);
/// assert_eq!(params.index_of("y"), Some(1));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSet {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl ParamSet {
    /// Creates a parameter set from an ordered list of names.
    ///
    /// Fails with a configuration error if the list is empty or contains a
    /// duplicate name.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(Error::Configuration(
                "at least one parameter must be sampled".to_string(),
            ));
        }
        let mut index = HashMap::with_capacity(names.len());
        for (ii, name) in names.iter().enumerate() {
            if index.insert(name.clone(), ii).is_some() {
                return Err(Error::Configuration(format!(
                    "duplicate parameter name {name:?}"
                )));
            }
        }
        Ok(Self { names, index })
    }

    /// The number of sampled parameters.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the set is empty. Always `false` for a constructed set.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// The parameter names, in sampling order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// The index of `name` in the position layout, if it is sampled.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Resolves a subset of parameter names to position indices.
    ///
    /// Fails with a configuration error on any name that is not sampled.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<usize>> {
        names
            .iter()
            .map(|name| {
                self.index_of(name).ok_or_else(|| {
                    Error::Configuration(format!(
                        "parameter {name:?} is not a sampled parameter"
                    ))
                })
            })
            .collect()
    }

    /// Converts a by-name value map into a position vector in set order.
    ///
    /// The map must cover exactly the sampled parameters: a missing or an
    /// extra key is a configuration error.
    pub fn position_from_map<T: Float>(&self, values: &HashMap<String, T>) -> Result<Vec<T>> {
        if values.len() != self.names.len() {
            for key in values.keys() {
                if !self.index.contains_key(key) {
                    return Err(Error::Configuration(format!(
                        "value given for {key:?}, which is not a sampled parameter"
                    )));
                }
            }
        }
        self.names
            .iter()
            .map(|name| {
                values.get(name).copied().ok_or_else(|| {
                    Error::Configuration(format!("no value given for parameter {name:?}"))
                })
            })
            .collect()
    }

    /// Converts a position vector back into a by-name map.
    pub fn map_from_position<T: Float>(&self, position: &[T]) -> HashMap<String, T> {
        self.names
            .iter()
            .cloned()
            .zip(position.iter().copied())
            .collect()
    }
}
