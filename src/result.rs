//! Query results and their serialisation-ready forms.

use chrono::NaiveDateTime;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::models::{timestamp, ModelRun, NoDataReason};

/// A numeric value or a no-data marker with its reason.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// A numeric value in the parameter's canonical unit
    Value(f64),
    /// No value could be determined
    NoData(NoDataReason),
}

impl Value {
    /// The numeric value, if any.
    pub fn value(&self) -> Option<f64> {
        match self {
            Value::Value(value) => Some(*value),
            Value::NoData(_) => None,
        }
    }

    /// The reason there is no value, if any.
    pub fn no_data(&self) -> Option<NoDataReason> {
        match self {
            Value::Value(_) => None,
            Value::NoData(reason) => Some(*reason),
        }
    }
}

/// The outcome for one parameter at one valid time.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Sample {
    #[serde(with = "timestamp")]
    pub valid_time: NaiveDateTime,
    pub value: Value,
}

/// The outcomes for one parameter, ascending by valid time.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ParameterSeries {
    pub parameter: String,
    /// Canonical unit, for known parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub samples: Vec<Sample>,
}

impl ParameterSeries {
    /// A series without values at any of `times`.
    pub fn no_data(
        parameter: &str,
        unit: Option<String>,
        times: &[NaiveDateTime],
        reason: NoDataReason,
    ) -> Self {
        ParameterSeries {
            parameter: parameter.to_string(),
            unit,
            samples: times
                .iter()
                .map(|time| Sample {
                    valid_time: *time,
                    value: Value::NoData(reason),
                })
                .collect(),
        }
    }
}

/// The result of a query: one series per requested parameter, in request order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryResult {
    pub model_run: ModelRun,
    pub latitude: f64,
    pub longitude: f64,
    pub series: Vec<ParameterSeries>,
    /// Integrity problems with files of the model run that were excluded
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// One flattened result record.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Record {
    pub parameter: String,
    #[serde(with = "timestamp")]
    pub valid_time: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_data: Option<NoDataReason>,
}

/// Flatten a result into records ordered by parameter (request order), then valid time.
pub fn assemble(result: &QueryResult) -> Vec<Record> {
    result
        .series
        .iter()
        .flat_map(|series| {
            series.samples.iter().map(move |sample| Record {
                parameter: series.parameter.clone(),
                valid_time: sample.valid_time,
                value: sample.value.value(),
                unit: sample.value.value().and(series.unit.clone()),
                no_data: sample.value.no_data(),
            })
        })
        .collect()
}

/// Parameter values at one valid time.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Forecast {
    #[serde(with = "timestamp")]
    pub valid_time: NaiveDateTime,
    /// Values in request order, `None` where there is no data
    #[serde(serialize_with = "ordered_map")]
    pub parameters: Vec<(String, Option<f64>)>,
}

/// Values grouped by valid time.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ForecastResponse {
    pub lat: f64,
    pub lon: f64,
    pub forecasts: Vec<Forecast>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

fn ordered_map<S: Serializer>(
    entries: &[(String, Option<f64>)],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for (key, value) in entries {
        map.serialize_entry(key, value)?;
    }
    map.end()
}

/// Regroup a result by valid time.
pub fn assemble_forecasts(result: &QueryResult) -> ForecastResponse {
    let mut times: Vec<NaiveDateTime> = result
        .series
        .iter()
        .flat_map(|series| series.samples.iter().map(|sample| sample.valid_time))
        .collect();
    times.sort();
    times.dedup();
    let forecasts = times
        .into_iter()
        .map(|valid_time| Forecast {
            valid_time,
            parameters: result
                .series
                .iter()
                .map(|series| {
                    let value = series
                        .samples
                        .iter()
                        .find(|sample| sample.valid_time == valid_time)
                        .and_then(|sample| sample.value.value());
                    (series.parameter.clone(), value)
                })
                .collect(),
        })
        .collect();
    ForecastResponse {
        lat: result.latitude,
        lon: result.longitude,
        forecasts,
        warnings: result.warnings.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::datetime;
    use serde_json::json;

    fn result() -> QueryResult {
        let times = [datetime(2022, 11, 6, 18), datetime(2022, 11, 6, 19)];
        QueryResult {
            model_run: ModelRun::new(datetime(2022, 11, 6, 18)),
            latitude: 45.0,
            longitude: 84.0,
            series: vec![
                ParameterSeries {
                    parameter: "temperature".to_string(),
                    unit: Some("K".to_string()),
                    samples: vec![
                        Sample {
                            valid_time: times[0],
                            value: Value::Value(271.5),
                        },
                        Sample {
                            valid_time: times[1],
                            value: Value::NoData(NoDataReason::MissingValue),
                        },
                    ],
                },
                ParameterSeries::no_data(
                    "relative_humidity",
                    Some("%".to_string()),
                    &times,
                    NoDataReason::NoCoverage,
                ),
            ],
            warnings: vec![],
        }
    }

    #[test]
    fn test_assemble() {
        let records = assemble(&result());
        assert_eq!(4, records.len());
        assert_eq!(
            json!([
                {"parameter": "temperature", "valid_time": "2022-11-06T18:00:00", "value": 271.5, "unit": "K"},
                {"parameter": "temperature", "valid_time": "2022-11-06T19:00:00", "no_data": "missing_value"},
                {"parameter": "relative_humidity", "valid_time": "2022-11-06T18:00:00", "no_data": "no_coverage"},
                {"parameter": "relative_humidity", "valid_time": "2022-11-06T19:00:00", "no_data": "no_coverage"}
            ]),
            serde_json::to_value(&records).unwrap()
        );
    }

    #[test]
    fn test_assemble_forecasts() {
        let response = assemble_forecasts(&result());
        assert_eq!(
            r#"{"lat":45.0,"lon":84.0,"forecasts":[{"valid_time":"2022-11-06T18:00:00","parameters":{"temperature":271.5,"relative_humidity":null}},{"valid_time":"2022-11-06T19:00:00","parameters":{"temperature":null,"relative_humidity":null}}]}"#,
            serde_json::to_string(&response).unwrap()
        );
    }

    #[test]
    fn test_serialise_result() {
        let mut result = result();
        result.warnings.push("dataset file f001.grid.json is corrupt: invalid JSON".into());
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(json!({"value": 271.5}), value["series"][0]["samples"][0]["value"]);
        assert_eq!(
            json!({"no_data": "missing_value"}),
            value["series"][0]["samples"][1]["value"]
        );
        assert_eq!(1, value["warnings"].as_array().unwrap().len());
    }
}
