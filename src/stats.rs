//! Univariate and multivariate statistics over time series entries

use std::collections::{BTreeMap, HashMap};

use crate::timeseries::Entry;
use crate::value::HostValue;

/// Field name used for entries whose payload is not a mapping
pub const SCALAR_FIELD: &str = "value";

/// Column view of a series: one numeric vector per field, aligned with
/// `timestamps`. Missing or non-numeric samples are NaN.
#[derive(Debug, Clone, Default)]
pub struct Series {
    pub timestamps: Vec<f64>,
    pub fields: BTreeMap<String, Vec<f64>>,
}

impl Series {
    /// Build the column view of `entries`, optionally restricted to `only`
    pub fn from_entries(entries: &[Entry], only: Option<&[String]>) -> Self {
        let mut series = Series {
            timestamps: Vec::with_capacity(entries.len()),
            fields: BTreeMap::new(),
        };
        let wanted = |name: &str| only.map_or(true, |names| names.iter().any(|n| n == name));

        for (row, entry) in entries.iter().enumerate() {
            series.timestamps.push(entry.timestamp);
            match &entry.payload {
                HostValue::Map(items) => {
                    for (key, value) in items {
                        let Ok(name) = key.as_str() else { continue };
                        if wanted(name) {
                            series.column(name, row)[row] = numeric(value);
                        }
                    }
                }
                scalar => {
                    if wanted(SCALAR_FIELD) {
                        series.column(SCALAR_FIELD, row)[row] = numeric(scalar);
                    }
                }
            }
        }
        let len = series.timestamps.len();
        for column in series.fields.values_mut() {
            column.resize(len, f64::NAN);
        }
        series
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    fn column(&mut self, name: &str, row: usize) -> &mut Vec<f64> {
        let column = self.fields.entry(name.to_string()).or_default();
        if column.len() <= row {
            column.resize(row + 1, f64::NAN);
        }
        column
    }
}

fn numeric(value: &HostValue) -> f64 {
    match value {
        HostValue::Bool(_) => f64::NAN,
        other => other.as_float().unwrap_or(f64::NAN),
    }
}

/// Moments of one field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub mean_squares: f64,
    /// Mean of the first differences
    pub diff_mean: f64,
    /// Central moments of the first differences, normalized by `count - 1`
    pub diff_m2: f64,
    pub diff_m3: f64,
    pub diff_m4: f64,
}

impl FieldStats {
    /// Compute the moments of the numeric samples in `values`.
    ///
    /// NaN samples are skipped; returns `None` with fewer than two numbers.
    pub fn compute(values: &[f64]) -> Option<Self> {
        let samples: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
        let n = samples.len();
        if n < 2 {
            return None;
        }

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let (mut sum, mut sum2) = (0.0, 0.0);
        for &v in &samples {
            min = min.min(v);
            max = max.max(v);
            sum += v;
            sum2 += v * v;
        }

        let diffs: Vec<f64> = samples.windows(2).map(|w| w[1] - w[0]).collect();
        let m = (n - 1) as f64;
        let diff_mean = diffs.iter().sum::<f64>() / m;
        let moment = |k: i32| diffs.iter().map(|d| (d - diff_mean).powi(k)).sum::<f64>() / m;

        Some(FieldStats {
            count: n,
            min,
            max,
            mean: sum / n as f64,
            mean_squares: sum2 / n as f64,
            diff_mean,
            diff_m2: moment(2),
            diff_m3: moment(3),
            diff_m4: moment(4),
        })
    }

    fn to_value(&self) -> HostValue {
        HostValue::map([
            ("count", HostValue::from(self.count)),
            ("min", HostValue::number(self.min)),
            ("max", HostValue::number(self.max)),
            ("mean", HostValue::number(self.mean)),
            ("mean_squares", HostValue::number(self.mean_squares)),
            ("diff_mean", HostValue::number(self.diff_mean)),
            ("diff_m2", HostValue::number(self.diff_m2)),
            ("diff_m3", HostValue::number(self.diff_m3)),
            ("diff_m4", HostValue::number(self.diff_m4)),
        ])
    }
}

/// Per-field statistics of one series
///
/// Returns `None` for an empty series. Fields with fewer than two numeric
/// samples are left out of the result.
pub fn univariate(series: &Series) -> Option<HostValue> {
    let (start, stop) = (*series.timestamps.first()?, *series.timestamps.last()?);
    let fields = series
        .fields
        .iter()
        .filter_map(|(name, values)| {
            FieldStats::compute(values).map(|stats| (name.clone(), stats.to_value()))
        })
        .collect::<Vec<_>>();

    Some(HostValue::map([
        ("type", HostValue::from("univariate")),
        ("start", HostValue::number(start)),
        ("stop", HostValue::number(stop)),
        ("len", HostValue::from(series.len())),
        ("fields", HostValue::map(fields)),
    ]))
}

/// Accumulated first and second moments of aligned cross-sections
#[derive(Debug, Clone, PartialEq)]
pub struct Moments {
    /// `key:field` name of each dimension
    pub dimensions: Vec<String>,
    pub count: usize,
    pub sum: Vec<f64>,
    /// Upper triangle (diagonal included) of the sum of pairwise products,
    /// packed row by row
    pub sum2: Vec<f64>,
    pub dsum: Vec<f64>,
    pub dsum2: Vec<f64>,
    pub start: f64,
    pub stop: f64,
}

impl Moments {
    fn new(dimensions: Vec<String>) -> Self {
        let d = dimensions.len();
        let packed = d * (d + 1) / 2;
        Moments {
            dimensions,
            count: 0,
            sum: vec![0.0; d],
            sum2: vec![0.0; packed],
            dsum: vec![0.0; d],
            dsum2: vec![0.0; packed],
            start: f64::NAN,
            stop: f64::NAN,
        }
    }

    fn to_value(&self) -> HostValue {
        let floats = |v: &[f64]| HostValue::List(v.iter().map(|x| HostValue::number(*x)).collect());
        HostValue::map([
            ("type", HostValue::from("multivariate")),
            (
                "fields",
                HostValue::List(self.dimensions.iter().map(|d| HostValue::from(d.as_str())).collect()),
            ),
            ("N", HostValue::from(self.count)),
            ("start", HostValue::number(self.start)),
            ("stop", HostValue::number(self.stop)),
            ("sum", floats(&self.sum)),
            ("sum2", floats(&self.sum2)),
            ("dsum", floats(&self.dsum)),
            ("dsum2", floats(&self.dsum2)),
        ])
    }
}

fn accumulate(sum: &mut [f64], sum2: &mut [f64], row: &[f64]) {
    let mut k = 0;
    for i in 0..row.len() {
        sum[i] += row[i];
        for j in i..row.len() {
            sum2[k] += row[i] * row[j];
            k += 1;
        }
    }
}

/// Cross-sectional moments over several series
///
/// Rows are taken at the timestamps of the first series; a row counts only
/// when every dimension has a numeric value at that timestamp. Returns
/// `None` when fewer than two complete rows exist.
pub fn multivariate_moments(series: &[(String, Series)]) -> Option<Moments> {
    let (_, first) = series.first()?;

    let mut dimensions = Vec::new();
    let mut columns: Vec<(usize, &[f64])> = Vec::new();
    for (index, (key, s)) in series.iter().enumerate() {
        for (field, values) in &s.fields {
            dimensions.push(format!("{}:{}", key, field));
            columns.push((index, values.as_slice()));
        }
    }
    if dimensions.is_empty() {
        return None;
    }

    let positions: Vec<HashMap<u64, usize>> = series
        .iter()
        .map(|(_, s)| {
            s.timestamps
                .iter()
                .enumerate()
                .map(|(i, t)| (t.to_bits(), i))
                .collect()
        })
        .collect();

    let mut moments = Moments::new(dimensions);
    let mut previous: Option<Vec<f64>> = None;
    let mut row = vec![0.0; columns.len()];

    'rows: for &timestamp in &first.timestamps {
        for (slot, (index, values)) in columns.iter().enumerate() {
            let Some(&at) = positions[*index].get(&timestamp.to_bits()) else {
                continue 'rows;
            };
            let value = values[at];
            if value.is_nan() {
                continue 'rows;
            }
            row[slot] = value;
        }

        if moments.count == 0 {
            moments.start = timestamp;
        }
        moments.stop = timestamp;
        moments.count += 1;
        accumulate(&mut moments.sum, &mut moments.sum2, &row);
        if let Some(prev) = &previous {
            let diff: Vec<f64> = row.iter().zip(prev).map(|(a, b)| a - b).collect();
            accumulate(&mut moments.dsum, &mut moments.dsum2, &diff);
        }
        previous = Some(row.clone());
    }

    (moments.count >= 2).then_some(moments)
}

/// `multivariate_moments` as a host value
pub fn multivariate(series: &[(String, Series)]) -> Option<HostValue> {
    multivariate_moments(series).map(|m| m.to_value())
}
