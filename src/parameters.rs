//! Static table mapping physical parameters onto the variables stored in dataset files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use validator::Validate;

use crate::error::WxError;

/// A named physical quantity.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct Parameter {
    /// Canonical unit
    #[validate(length(min = 1, message = "unit must not be empty"))]
    pub unit: String,
    /// Variable name used by products without an override
    #[validate(length(min = 1, message = "variable must not be empty"))]
    pub variable: String,
    /// Per-product variable names
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub products: BTreeMap<String, String>,
}

impl Parameter {
    /// Return a new Parameter without product overrides.
    pub fn new(unit: &str, variable: &str) -> Self {
        Parameter {
            unit: unit.to_string(),
            variable: variable.to_string(),
            products: BTreeMap::new(),
        }
    }
}

/// Metadata of one parameter as listed to clients.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ParameterMetadata {
    pub model_key: String,
    pub model_unit: String,
}

/// One entry of a parameter listing.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ParameterDescription {
    pub parameter: String,
    pub parameter_metadata: ParameterMetadata,
}

/// Mapping from parameter names to their stored variables.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ParameterTable {
    parameters: BTreeMap<String, Parameter>,
}

impl Default for ParameterTable {
    /// The GFS surface parameters.
    fn default() -> Self {
        ParameterTable::new([
            ("temperature", Parameter::new("K", "tmp2m")),
            ("relative_humidity", Parameter::new("%", "rh2m")),
            ("wind_gust_speed", Parameter::new("m/s", "gustsfc")),
        ])
    }
}

impl ParameterTable {
    /// Return a new ParameterTable.
    pub fn new<'a>(parameters: impl IntoIterator<Item = (&'a str, Parameter)>) -> Self {
        ParameterTable {
            parameters: parameters
                .into_iter()
                .map(|(name, parameter)| (name.to_string(), parameter))
                .collect(),
        }
    }

    /// Read a table from a JSON file mapping names to parameters.
    pub fn from_file(path: &Path) -> Result<Self, WxError> {
        let contents = std::fs::read(path)?;
        let table: ParameterTable = serde_json::from_slice(&contents)?;
        for parameter in table.parameters.values() {
            parameter.validate()?;
        }
        Ok(table)
    }

    /// Returns the parameter called `name`.
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.parameters.get(name)
    }

    /// Whether the table has a parameter called `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.parameters.contains_key(name)
    }

    /// Returns the variable holding parameter `name` in files of `product`.
    pub fn variable_for(&self, name: &str, product: &str) -> Option<&str> {
        let parameter = self.get(name)?;
        Some(
            parameter
                .products
                .get(product)
                .unwrap_or(&parameter.variable),
        )
    }

    /// Parameter names in lexical order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.keys().map(String::as_str)
    }

    /// List parameters and their default variable and unit.
    pub fn describe(&self) -> Vec<ParameterDescription> {
        self.parameters
            .iter()
            .map(|(name, parameter)| ParameterDescription {
                parameter: name.clone(),
                parameter_metadata: ParameterMetadata {
                    model_key: parameter.variable.clone(),
                    model_unit: parameter.unit.clone(),
                },
            })
            .collect()
    }
}
