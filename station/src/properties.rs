use crate::errors::Result;
use crate::property::{ChangeCallback, Permission, UpdatePolicy};
use crate::registry::PropertyRegistry;
use crate::weather::WeatherSnapshot;
use std::time::Duration;
use tracing::info;

pub const PREVAILING_WIND_DIRECTION: &str = "prevailing_wind_direction";
pub const WIND_DIR_STRING: &str = "wind_dir_string";
pub const BME_HUMIDITY: &str = "bme_humidity";
pub const BME_PRESSURE: &str = "bme_pressure";
pub const BME_TEMP: &str = "bme_temp";
pub const DEW_POINT: &str = "dew_point";
pub const MAX_TEMP_TODAY: &str = "max_temp_today";
pub const MAX_WIND_SPEED_TODAY: &str = "max_wind_speed_today";
pub const MIN_TEMP_TODAY: &str = "min_temp_today";
pub const RAIN_DAYS_AGO: [&str; 6] = [
    "rain_1d_ago",
    "rain_2d_ago",
    "rain_3d_ago",
    "rain_4d_ago",
    "rain_5d_ago",
    "rain_6d_ago",
];
pub const RAIN_ACCUMULATION: &str = "rain_accumulation";
pub const TEMP_F: &str = "temp_f";
pub const UV_ROLLING_AVERAGE: &str = "uv_rolling_average";
pub const WIND_ROLLING_AVERAGE: &str = "wind_rolling_average";
pub const EPOCH_TIME: &str = "epoch_time";
pub const LUX: &str = "lux";

const FAST: UpdatePolicy = UpdatePolicy::Every(Duration::from_secs(3));
const SLOW: UpdatePolicy = UpdatePolicy::Every(Duration::from_secs(10));

/// Register every weather station property. Must run once, before the
/// cloud loop starts.
pub fn init_properties(
    registry: &mut PropertyRegistry,
    on_epoch_change: ChangeCallback,
) -> Result<()> {
    use Permission::{Read, ReadWrite};
    use UpdatePolicy::OnChange;

    registry.register(PREVAILING_WIND_DIRECTION, "", Read, FAST, None)?;
    registry.register(WIND_DIR_STRING, "", Read, FAST, None)?;
    registry.register(BME_HUMIDITY, 0.0, Read, FAST, None)?;
    registry.register(BME_PRESSURE, 0.0, Read, FAST, None)?;
    registry.register(BME_TEMP, 0.0, Read, FAST, None)?;
    registry.register(DEW_POINT, 0.0, Read, FAST, None)?;
    registry.register(MAX_TEMP_TODAY, 0.0, Read, FAST, None)?;
    registry.register(MAX_WIND_SPEED_TODAY, 0.0, Read, FAST, None)?;
    registry.register(MIN_TEMP_TODAY, 0.0, Read, FAST, None)?;
    for name in RAIN_DAYS_AGO {
        registry.register(name, 0.0, Read, OnChange, None)?;
    }
    registry.register(RAIN_ACCUMULATION, 0.0, Read, SLOW, None)?;
    registry.register(TEMP_F, 0.0, Read, FAST, None)?;
    registry.register(UV_ROLLING_AVERAGE, 0.0, Read, FAST, None)?;
    registry.register(WIND_ROLLING_AVERAGE, 0.0, Read, FAST, None)?;
    registry.register(EPOCH_TIME, 0i64, ReadWrite, OnChange, Some(on_epoch_change))?;
    registry.register(LUX, 0i64, Read, FAST, None)?;

    info!("Registered {} properties", registry.len());
    Ok(())
}

/// Copy a derived snapshot into the registry as device-side writes
pub fn apply_snapshot(registry: &mut PropertyRegistry, snapshot: &WeatherSnapshot) -> Result<()> {
    registry.set_local(PREVAILING_WIND_DIRECTION, snapshot.prevailing_wind_direction.as_str())?;
    registry.set_local(WIND_DIR_STRING, snapshot.wind_dir_string.as_str())?;
    registry.set_local(BME_HUMIDITY, snapshot.bme_humidity)?;
    registry.set_local(BME_PRESSURE, snapshot.bme_pressure)?;
    registry.set_local(BME_TEMP, snapshot.bme_temp)?;
    registry.set_local(DEW_POINT, snapshot.dew_point)?;
    registry.set_local(MAX_TEMP_TODAY, snapshot.max_temp_today)?;
    registry.set_local(MAX_WIND_SPEED_TODAY, snapshot.max_wind_speed_today)?;
    registry.set_local(MIN_TEMP_TODAY, snapshot.min_temp_today)?;
    for (name, rain) in RAIN_DAYS_AGO.iter().zip(snapshot.rain_days_ago) {
        registry.set_local(name, rain)?;
    }
    registry.set_local(RAIN_ACCUMULATION, snapshot.rain_accumulation)?;
    registry.set_local(TEMP_F, snapshot.temp_f)?;
    registry.set_local(UV_ROLLING_AVERAGE, snapshot.uv_rolling_average)?;
    registry.set_local(WIND_ROLLING_AVERAGE, snapshot.wind_rolling_average)?;
    registry.set_local(LUX, snapshot.lux)?;
    Ok(())
}
