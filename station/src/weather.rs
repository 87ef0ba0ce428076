use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Samples kept for rolling averages and prevailing wind
pub const ROLLING_WINDOW: usize = 60;

/// Days of rain history exposed as `rain_1d_ago` .. `rain_6d_ago`
pub const RAIN_HISTORY_DAYS: usize = 6;

const COMPASS_POINTS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

/// One raw sample from the station's sensors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub temp_c: f64,
    pub humidity: f64,
    pub pressure_hpa: f64,
    pub lux: i64,
    pub uv_index: f64,
    pub wind_speed: f64,
    pub wind_dir_deg: f64,
    /// Rain collected since the previous sample
    pub rain: f64,
}

/// Everything the station publishes, derived from the readings so far
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub prevailing_wind_direction: String,
    pub wind_dir_string: String,
    pub bme_humidity: f64,
    pub bme_pressure: f64,
    pub bme_temp: f64,
    pub dew_point: f64,
    pub max_temp_today: f64,
    pub min_temp_today: f64,
    pub max_wind_speed_today: f64,
    /// Index 0 is yesterday
    pub rain_days_ago: [f64; RAIN_HISTORY_DAYS],
    pub rain_accumulation: f64,
    pub temp_f: f64,
    pub uv_rolling_average: f64,
    pub wind_rolling_average: f64,
    pub lux: i64,
}

pub fn celsius_to_fahrenheit(c: f64) -> f64 {
    c * 9.0 / 5.0 + 32.0
}

/// Dew point in Celsius (Magnus formula)
pub fn dew_point_c(temp_c: f64, humidity: f64) -> f64 {
    const B: f64 = 17.62;
    const C: f64 = 243.12;
    let rh = humidity.clamp(1.0, 100.0);
    let gamma = (rh / 100.0).ln() + B * temp_c / (C + temp_c);
    C * gamma / (B - gamma)
}

fn compass_index(degrees: f64) -> usize {
    let normalized = degrees.rem_euclid(360.0);
    ((normalized + 11.25) / 22.5) as usize % COMPASS_POINTS.len()
}

/// 16-point compass abbreviation for a bearing
pub fn compass_point(degrees: f64) -> &'static str {
    COMPASS_POINTS[compass_index(degrees)]
}

/// Bearing for a compass abbreviation, e.g. "NNE" -> 22.5
pub fn compass_degrees(point: &str) -> Option<f64> {
    COMPASS_POINTS
        .iter()
        .position(|p| *p == point)
        .map(|i| i as f64 * 22.5)
}

fn mean(values: &VecDeque<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn push_bounded<T>(window: &mut VecDeque<T>, item: T) {
    if window.len() == ROLLING_WINDOW {
        window.pop_front();
    }
    window.push_back(item);
}

/// Rolling and daily state behind the derived properties
#[derive(Debug, Default)]
pub struct WeatherAccumulator {
    day: Option<NaiveDate>,
    uv: VecDeque<f64>,
    wind: VecDeque<f64>,
    directions: VecDeque<usize>,
    max_temp_f: Option<f64>,
    min_temp_f: Option<f64>,
    max_wind: f64,
    rain_today: f64,
    rain_history: [f64; RAIN_HISTORY_DAYS],
}

impl WeatherAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn roll_over(&mut self, today: NaiveDate) {
        match self.day {
            Some(day) if today > day => {
                let elapsed = (today - day).num_days() as usize;
                let shift = elapsed.min(RAIN_HISTORY_DAYS);
                self.rain_history.rotate_right(shift);
                self.rain_history[..shift].fill(0.0);
                if elapsed <= RAIN_HISTORY_DAYS {
                    self.rain_history[elapsed - 1] = self.rain_today;
                }

                self.rain_today = 0.0;
                self.max_temp_f = None;
                self.min_temp_f = None;
                self.max_wind = 0.0;
                self.day = Some(today);
            }
            None => self.day = Some(today),
            // Clock corrected backwards: stay on the latest day seen so the
            // same boundary is not crossed twice
            Some(_) => {}
        }
    }

    fn prevailing_direction(&self) -> &'static str {
        let mut counts = [0usize; COMPASS_POINTS.len()];
        for &i in &self.directions {
            counts[i] += 1;
        }
        // Ties go to the most recent direction
        let best = self
            .directions
            .iter()
            .rev()
            .copied()
            .max_by(|&a, &b| counts[a].cmp(&counts[b]).then(std::cmp::Ordering::Greater));
        best.map(|i| COMPASS_POINTS[i]).unwrap_or(COMPASS_POINTS[0])
    }

    pub fn ingest(&mut self, reading: &SensorReading, today: NaiveDate) -> WeatherSnapshot {
        self.roll_over(today);

        let temp_f = celsius_to_fahrenheit(reading.temp_c);
        let rain = reading.rain.max(0.0);
        let wind = reading.wind_speed.max(0.0);

        self.rain_today += rain;
        self.max_temp_f = Some(self.max_temp_f.map_or(temp_f, |m| m.max(temp_f)));
        self.min_temp_f = Some(self.min_temp_f.map_or(temp_f, |m| m.min(temp_f)));
        self.max_wind = self.max_wind.max(wind);

        push_bounded(&mut self.uv, reading.uv_index);
        push_bounded(&mut self.wind, wind);
        push_bounded(&mut self.directions, compass_index(reading.wind_dir_deg));

        WeatherSnapshot {
            prevailing_wind_direction: self.prevailing_direction().to_string(),
            wind_dir_string: compass_point(reading.wind_dir_deg).to_string(),
            bme_humidity: reading.humidity,
            bme_pressure: reading.pressure_hpa,
            bme_temp: reading.temp_c,
            dew_point: celsius_to_fahrenheit(dew_point_c(reading.temp_c, reading.humidity)),
            max_temp_today: self.max_temp_f.unwrap_or(temp_f),
            min_temp_today: self.min_temp_f.unwrap_or(temp_f),
            max_wind_speed_today: self.max_wind,
            rain_days_ago: self.rain_history,
            rain_accumulation: self.rain_today,
            temp_f,
            uv_rolling_average: mean(&self.uv),
            wind_rolling_average: mean(&self.wind),
            lux: reading.lux,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(temp_c: f64, wind_dir_deg: f64, rain: f64) -> SensorReading {
        SensorReading {
            temp_c,
            humidity: 50.0,
            pressure_hpa: 1013.0,
            lux: 1200,
            uv_index: 2.0,
            wind_speed: 5.0,
            wind_dir_deg,
            rain,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn test_compass_points() {
        assert_eq!(compass_point(0.0), "N");
        assert_eq!(compass_point(359.0), "N");
        assert_eq!(compass_point(22.5), "NNE");
        assert_eq!(compass_point(180.0), "S");
        assert_eq!(compass_point(-90.0), "W");
        assert_eq!(compass_degrees("NNW"), Some(337.5));
        assert_eq!(compass_degrees("SE"), Some(135.0));
        assert_eq!(compass_degrees("up"), None);
    }

    #[test]
    fn test_dew_point_close_to_reference() {
        // 20C at 50% RH has a dew point of about 9.3C
        let dp = dew_point_c(20.0, 50.0);
        assert!((dp - 9.3).abs() < 0.1, "dew point {}", dp);
        assert!(dew_point_c(20.0, 0.0).is_finite());
    }

    #[test]
    fn test_daily_extremes_reset_on_rollover() {
        let mut acc = WeatherAccumulator::new();
        acc.ingest(&reading(10.0, 0.0, 0.0), day(1));
        let snap = acc.ingest(&reading(30.0, 0.0, 0.0), day(1));
        assert_eq!(snap.max_temp_today, 86.0);
        assert_eq!(snap.min_temp_today, 50.0);

        let snap = acc.ingest(&reading(20.0, 0.0, 0.0), day(2));
        assert_eq!(snap.max_temp_today, 68.0);
        assert_eq!(snap.min_temp_today, 68.0);
    }

    #[test]
    fn test_rain_history_shifts_per_day() {
        let mut acc = WeatherAccumulator::new();
        acc.ingest(&reading(10.0, 0.0, 0.25), day(1));
        let snap = acc.ingest(&reading(10.0, 0.0, 0.25), day(1));
        assert_eq!(snap.rain_accumulation, 0.5);

        let snap = acc.ingest(&reading(10.0, 0.0, 0.1), day(2));
        assert_eq!(snap.rain_days_ago[0], 0.5);
        assert_eq!(snap.rain_accumulation, 0.1);

        // Two days pass with no samples on day 3
        let snap = acc.ingest(&reading(10.0, 0.0, 0.0), day(4));
        assert_eq!(snap.rain_days_ago[0], 0.0);
        assert_eq!(snap.rain_days_ago[1], 0.1);
        assert_eq!(snap.rain_days_ago[2], 0.5);
    }

    #[test]
    fn test_clock_moving_backwards_keeps_history() {
        let mut acc = WeatherAccumulator::new();
        acc.ingest(&reading(10.0, 0.0, 0.3), day(5));
        let snap = acc.ingest(&reading(10.0, 0.0, 0.0), day(4));
        assert_eq!(snap.rain_accumulation, 0.3);
        assert_eq!(snap.rain_days_ago, [0.0; RAIN_HISTORY_DAYS]);
    }

    #[test]
    fn test_backwards_correction_does_not_roll_day_twice() {
        let mut acc = WeatherAccumulator::new();
        acc.ingest(&reading(10.0, 0.0, 0.0), day(4));
        acc.ingest(&reading(10.0, 0.0, 0.3), day(5));
        acc.ingest(&reading(10.0, 0.0, 0.0), day(4));
        let snap = acc.ingest(&reading(10.0, 0.0, 0.2), day(5));
        assert_eq!(snap.rain_accumulation, 0.5);
        assert_eq!(snap.rain_days_ago[0], 0.0);

        let snap = acc.ingest(&reading(10.0, 0.0, 0.0), day(6));
        assert_eq!(snap.rain_days_ago[0], 0.5);
        assert_eq!(snap.rain_days_ago[1], 0.0);
    }

    #[test]
    fn test_prevailing_direction_is_most_frequent() {
        let mut acc = WeatherAccumulator::new();
        acc.ingest(&reading(10.0, 90.0, 0.0), day(1));
        acc.ingest(&reading(10.0, 90.0, 0.0), day(1));
        let snap = acc.ingest(&reading(10.0, 270.0, 0.0), day(1));
        assert_eq!(snap.prevailing_wind_direction, "E");
        assert_eq!(snap.wind_dir_string, "W");
    }
}
