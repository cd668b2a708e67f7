use std::{collections::BTreeMap, fmt::Display, num::ParseFloatError};

use serde::Deserialize;

pub type LabelSet = BTreeMap<String, String>;

/// The `data` member of a query API response, tagged by its `resultType`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
pub enum QueryValue {
    Vector(Vec<Sample>),
    Scalar(SamplePair),
    Matrix(Vec<SampleStream>),
    String(StringSample),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Vector,
    Scalar,
    Matrix,
    String,
}

impl QueryValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            QueryValue::Vector(_) => ValueType::Vector,
            QueryValue::Scalar(_) => ValueType::Scalar,
            QueryValue::Matrix(_) => ValueType::Matrix,
            QueryValue::String(_) => ValueType::String,
        }
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueType::Vector => "vector",
            ValueType::Scalar => "scalar",
            ValueType::Matrix => "matrix",
            ValueType::String => "string",
        };
        write!(f, "{name}")
    }
}

/// One series of an instant vector.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Sample {
    #[serde(default)]
    pub metric: LabelSet,
    #[serde(rename = "value")]
    pub point: SamplePair,
}

impl Sample {
    pub fn value(&self) -> f64 {
        self.point.value
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SampleStream {
    #[serde(default)]
    pub metric: LabelSet,
    #[serde(default)]
    pub values: Vec<SamplePair>,
}

/// `[<unix seconds>, "<value>"]` on the wire. The value is a string so that
/// `NaN` and `±Inf` survive JSON.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "(f64, String)")]
pub struct SamplePair {
    pub timestamp: f64,
    pub value: f64,
}

impl TryFrom<(f64, String)> for SamplePair {
    type Error = ParseFloatError;

    fn try_from((timestamp, value): (f64, String)) -> Result<Self, Self::Error> {
        Ok(SamplePair {
            timestamp,
            value: value.parse()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "(f64, String)")]
pub struct StringSample {
    pub timestamp: f64,
    pub value: String,
}

impl From<(f64, String)> for StringSample {
    fn from((timestamp, value): (f64, String)) -> Self {
        StringSample { timestamp, value }
    }
}
