use serde::{Deserialize, Serialize};

/// Climate dimensions a caller can request for an analysis.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Factor {
    Temperature,
    Precipitation,
    Windspeed,
    Humidity,
    Comfort,
}

impl Factor {
    pub const KNOWN: &'static [Factor] = &[
        Factor::Temperature,
        Factor::Precipitation,
        Factor::Windspeed,
        Factor::Humidity,
        Factor::Comfort,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Factor::Temperature => "temperature",
            Factor::Precipitation => "precipitation",
            Factor::Windspeed => "windspeed",
            Factor::Humidity => "humidity",
            Factor::Comfort => "comfort",
        }
    }

    pub fn parse(value: &str) -> Option<Factor> {
        match value.trim() {
            "temperature" => Some(Factor::Temperature),
            "precipitation" => Some(Factor::Precipitation),
            "windspeed" => Some(Factor::Windspeed),
            "humidity" => Some(Factor::Humidity),
            "comfort" => Some(Factor::Comfort),
            _ => None,
        }
    }

    pub fn units(&self) -> &'static str {
        match self {
            Factor::Temperature => "°C",
            Factor::Precipitation => "mm/day",
            Factor::Windspeed => "m/s",
            Factor::Humidity => "%",
            Factor::Comfort => "°C (HI)",
        }
    }

    /// Upstream variables needed to compute this factor. Comfort is derived
    /// from temperature and relative humidity rather than fetched directly.
    pub fn variables(&self) -> &'static [PowerVariable] {
        match self {
            Factor::Temperature => &[PowerVariable::T2m],
            Factor::Precipitation => &[PowerVariable::Prectotcorr],
            Factor::Windspeed => &[PowerVariable::Ws10m],
            Factor::Humidity => &[PowerVariable::Rh2m],
            Factor::Comfort => &[PowerVariable::T2m, PowerVariable::Rh2m],
        }
    }
}

/// Daily variables of the POWER temporal API this service understands.
/// Unknown keys in upstream payloads are dropped during decode.
///
/// Variant order follows the API parameter names so that sorted collections
/// iterate in the same order as the upstream's sorted parameter list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PowerVariable {
    Prectotcorr,
    Rh2m,
    T2m,
    Ws10m,
}

impl PowerVariable {
    pub fn api_name(&self) -> &'static str {
        match self {
            PowerVariable::Prectotcorr => "PRECTOTCORR",
            PowerVariable::Rh2m => "RH2M",
            PowerVariable::T2m => "T2M",
            PowerVariable::Ws10m => "WS10M",
        }
    }
}

/// Minimal deduplicated variable set for a factor list, in API-name order.
pub fn required_variables(factors: &[Factor]) -> Vec<PowerVariable> {
    let mut set = std::collections::BTreeSet::new();
    for factor in factors {
        set.extend(factor.variables().iter().copied());
    }
    set.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_unknown_factor_names() {
        assert_eq!(Factor::parse("temperature"), Some(Factor::Temperature));
        assert_eq!(Factor::parse(" humidity "), Some(Factor::Humidity));
        assert_eq!(Factor::parse("snowfall"), None);
        assert_eq!(Factor::parse(""), None);
    }

    #[test]
    fn comfort_requires_temperature_and_humidity_variables() {
        let vars = required_variables(&[Factor::Comfort]);
        assert_eq!(vars, vec![PowerVariable::Rh2m, PowerVariable::T2m]);
    }

    #[test]
    fn required_variables_are_deduplicated_and_sorted_by_api_name() {
        let vars = required_variables(&[
            Factor::Comfort,
            Factor::Temperature,
            Factor::Precipitation,
            Factor::Humidity,
        ]);
        let names: Vec<&str> = vars.iter().map(PowerVariable::api_name).collect();
        assert_eq!(names, vec!["PRECTOTCORR", "RH2M", "T2M"]);
    }
}
