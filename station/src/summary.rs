use crate::properties::{
    MAX_TEMP_TODAY, MAX_WIND_SPEED_TODAY, MIN_TEMP_TODAY, PREVAILING_WIND_DIRECTION,
    RAIN_ACCUMULATION,
};
use crate::registry::PropertyRegistry;
use crate::weather::compass_degrees;
use chrono::NaiveDate;
use serde::Serialize;

/// Daily row consumed by the forecasting side
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub precip: Option<f64>,
    pub temp_max: Option<f64>,
    pub temp_min: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<String>,
    /// Bearing of `wind_direction`, N = 0
    pub wind_direction_degrees: Option<f64>,
}

impl DailySummary {
    pub fn from_registry(registry: &PropertyRegistry, date: NaiveDate) -> Self {
        let float = |name: &str| registry.get(name).and_then(|p| p.value().as_f64());
        let wind_direction = registry
            .get(PREVAILING_WIND_DIRECTION)
            .and_then(|p| p.value().as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Self {
            date,
            precip: float(RAIN_ACCUMULATION),
            temp_max: float(MAX_TEMP_TODAY),
            temp_min: float(MIN_TEMP_TODAY),
            wind_speed: float(MAX_WIND_SPEED_TODAY),
            wind_direction_degrees: wind_direction.as_deref().and_then(compass_degrees),
            wind_direction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Result;
    use crate::properties::init_properties;
    use crate::property::Value;
    use std::sync::Arc;

    #[test]
    fn test_summary_converts_direction() {
        let mut registry = PropertyRegistry::new();
        init_properties(&mut registry, Arc::new(|_v: &Value| -> Result<()> { Ok(()) })).unwrap();
        registry.set_local(PREVAILING_WIND_DIRECTION, "WSW").unwrap();
        registry.set_local(MAX_TEMP_TODAY, 77.0).unwrap();
        registry.set_local(RAIN_ACCUMULATION, 0.4).unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let summary = DailySummary::from_registry(&registry, date);

        assert_eq!(summary.wind_direction.as_deref(), Some("WSW"));
        assert_eq!(summary.wind_direction_degrees, Some(247.5));
        assert_eq!(summary.temp_max, Some(77.0));
        assert_eq!(summary.precip, Some(0.4));
    }

    #[test]
    fn test_summary_before_first_sample() {
        let registry = PropertyRegistry::new();
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let summary = DailySummary::from_registry(&registry, date);
        assert_eq!(summary.wind_direction, None);
        assert_eq!(summary.temp_max, None);
    }
}
