use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::factors::{Factor, PowerVariable};
use crate::services::power::DailyObservation;

/// A day counts as wet when its precipitation reaches this many mm.
pub const WET_DAY_THRESHOLD_MM: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    #[serde(rename = "normal")]
    Normal,
    #[serde(rename = "very cold")]
    VeryCold,
    #[serde(rename = "very hot")]
    VeryHot,
    #[serde(rename = "very windy")]
    VeryWindy,
    #[serde(rename = "very wet (humidity)")]
    VeryWetHumidity,
    #[serde(rename = "very wet (rain)")]
    VeryWetRain,
    #[serde(rename = "very uncomfortable (cold)")]
    VeryUncomfortableCold,
    #[serde(rename = "very uncomfortable (hot)")]
    VeryUncomfortableHot,
    #[serde(rename = "comfortable/normal")]
    ComfortableNormal,
    #[serde(rename = "insufficient-data")]
    InsufficientData,
}

/// Summary over per-year medians (temperature, windspeed, humidity, comfort).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionSummary {
    pub units: String,
    pub n_years: u32,
    pub typical: Option<f64>,
    pub percentiles: BTreeMap<String, f64>,
    pub label: Classification,
}

/// Precipitation summary over pooled raw daily values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WetDaySummary {
    pub units: String,
    pub n_years: u32,
    pub window_days: u32,
    pub n_days_total: u32,
    pub wet_threshold_mm: f64,
    pub prob_wet_day: Option<f64>,
    pub intensity_percentiles: BTreeMap<String, f64>,
    pub label: Classification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactorResult {
    Distribution(DistributionSummary),
    WetDays(WetDaySummary),
}

/// Linear-interpolation percentile (NumPy default), `q` in [0, 100].
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return Some(sorted[lo]);
    }
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

pub fn median(values: &[f64]) -> Option<f64> {
    percentile(values, 50.0)
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Named percentile map (`p10`, `p90`, ...) rounded to 3 decimals. Empty input
/// yields an empty map, never a partial one.
fn percentile_map(values: &[f64], qs: &[u32]) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    for &q in qs {
        if let Some(value) = percentile(values, f64::from(q)) {
            out.insert(format!("p{q}"), round_to(value, 3));
        }
    }
    out
}

pub fn classify_temperature(
    typical: Option<f64>,
    p10: Option<f64>,
    p90: Option<f64>,
) -> Classification {
    match (typical, p10, p90) {
        (Some(value), Some(p10), Some(p90)) => {
            if value <= p10 {
                Classification::VeryCold
            } else if value >= p90 {
                Classification::VeryHot
            } else {
                Classification::Normal
            }
        }
        _ => Classification::InsufficientData,
    }
}

pub fn classify_windspeed(typical: Option<f64>, p90: Option<f64>) -> Classification {
    match (typical, p90) {
        (Some(value), Some(p90)) if value >= p90 => Classification::VeryWindy,
        (Some(_), Some(_)) => Classification::Normal,
        _ => Classification::InsufficientData,
    }
}

pub fn classify_humidity(typical: Option<f64>, p90: Option<f64>) -> Classification {
    match (typical, p90) {
        (Some(value), Some(p90)) if value >= p90 => Classification::VeryWetHumidity,
        (Some(_), Some(_)) => Classification::Normal,
        _ => Classification::InsufficientData,
    }
}

pub fn classify_comfort(
    typical: Option<f64>,
    p10: Option<f64>,
    p90: Option<f64>,
) -> Classification {
    match (typical, p10, p90) {
        (Some(value), Some(p10), Some(p90)) => {
            if value <= p10 {
                Classification::VeryUncomfortableCold
            } else if value >= p90 {
                Classification::VeryUncomfortableHot
            } else {
                Classification::ComfortableNormal
            }
        }
        _ => Classification::InsufficientData,
    }
}

/// Simplified heat index: a linear blend of temperature and relative humidity.
pub fn heat_index(t2m_c: f64, rh_pct: f64) -> f64 {
    round_to(t2m_c + 0.2 * (rh_pct - 40.0) / 10.0, 2)
}

pub fn distinct_year_count(table: &[DailyObservation]) -> u32 {
    table
        .iter()
        .map(|row| row.year)
        .collect::<BTreeSet<_>>()
        .len() as u32
}

/// Median of the non-null daily values per window year. Years whose sample is
/// entirely null drop out of the series. Reducing to one value per year keeps
/// years with more sampled days from over-weighting the distribution.
fn per_year_medians(table: &[DailyObservation], variable: PowerVariable) -> BTreeMap<i32, f64> {
    let mut grouped: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
    for row in table {
        if let Some(value) = row.value(variable) {
            grouped.entry(row.year).or_default().push(value);
        }
    }
    grouped
        .into_iter()
        .filter_map(|(year, values)| median(&values).map(|m| (year, m)))
        .collect()
}

fn raw_values(table: &[DailyObservation], variable: PowerVariable) -> Vec<f64> {
    table.iter().filter_map(|row| row.value(variable)).collect()
}

fn distribution_result(
    factor: Factor,
    series: &[f64],
    n_years: u32,
    qs: &[u32],
    typical_decimals: i32,
    classify: impl Fn(Option<f64>, &BTreeMap<String, f64>) -> Classification,
) -> FactorResult {
    let percentiles = percentile_map(series, qs);
    let typical = median(series).map(|value| round_to(value, typical_decimals));
    let label = classify(typical, &percentiles);
    FactorResult::Distribution(DistributionSummary {
        units: factor.units().to_string(),
        n_years,
        typical,
        percentiles,
        label,
    })
}

/// Per-factor summaries for one concatenated multi-year window table.
/// Pure: recomputing on the identical table yields an identical result.
pub fn analyze(
    table: &[DailyObservation],
    factors: &[Factor],
    half_window_days: u32,
) -> BTreeMap<Factor, FactorResult> {
    let n_years = distinct_year_count(table);
    let mut results = BTreeMap::new();

    if factors.contains(&Factor::Temperature) {
        let series: Vec<f64> = per_year_medians(table, PowerVariable::T2m)
            .into_values()
            .collect();
        results.insert(
            Factor::Temperature,
            distribution_result(Factor::Temperature, &series, n_years, &[10, 90], 2, |t, p| {
                classify_temperature(t, p.get("p10").copied(), p.get("p90").copied())
            }),
        );
    }

    if factors.contains(&Factor::Windspeed) {
        let series: Vec<f64> = per_year_medians(table, PowerVariable::Ws10m)
            .into_values()
            .collect();
        results.insert(
            Factor::Windspeed,
            distribution_result(Factor::Windspeed, &series, n_years, &[90], 2, |t, p| {
                classify_windspeed(t, p.get("p90").copied())
            }),
        );
    }

    if factors.contains(&Factor::Humidity) {
        let series: Vec<f64> = per_year_medians(table, PowerVariable::Rh2m)
            .into_values()
            .collect();
        results.insert(
            Factor::Humidity,
            distribution_result(Factor::Humidity, &series, n_years, &[90], 1, |t, p| {
                classify_humidity(t, p.get("p90").copied())
            }),
        );
    }

    if factors.contains(&Factor::Precipitation) {
        let values = raw_values(table, PowerVariable::Prectotcorr);
        let n_days_total = values.len() as u32;
        let wet: Vec<f64> = values
            .iter()
            .copied()
            .filter(|value| *value >= WET_DAY_THRESHOLD_MM)
            .collect();
        let prob_wet_day = if n_days_total > 0 {
            Some(round_to(wet.len() as f64 / f64::from(n_days_total), 3))
        } else {
            None
        };
        let intensity_percentiles = percentile_map(&wet, &[50, 90]);
        // Unrounded wet-day median against the rounded p90 threshold.
        let label = match (median(&wet), intensity_percentiles.get("p90")) {
            (Some(wet_median), Some(p90)) if wet_median >= *p90 => Classification::VeryWetRain,
            _ => Classification::Normal,
        };
        results.insert(
            Factor::Precipitation,
            FactorResult::WetDays(WetDaySummary {
                units: Factor::Precipitation.units().to_string(),
                n_years,
                window_days: half_window_days,
                n_days_total,
                wet_threshold_mm: WET_DAY_THRESHOLD_MM,
                prob_wet_day,
                intensity_percentiles,
                label,
            }),
        );
    }

    if factors.contains(&Factor::Comfort) {
        let t_medians = per_year_medians(table, PowerVariable::T2m);
        let rh_medians = per_year_medians(table, PowerVariable::Rh2m);
        // Only years with both a temperature and a humidity median contribute.
        let series: Vec<f64> = t_medians
            .iter()
            .filter_map(|(year, t)| rh_medians.get(year).map(|rh| heat_index(*t, *rh)))
            .collect();
        results.insert(
            Factor::Comfort,
            distribution_result(Factor::Comfort, &series, n_years, &[10, 90], 2, |t, p| {
                classify_comfort(t, p.get("p10").copied(), p.get("p90").copied())
            }),
        );
    }

    results
}
