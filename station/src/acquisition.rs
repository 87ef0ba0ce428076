use crate::clock::StationClock;
use crate::weather::{SensorReading, WeatherAccumulator, WeatherSnapshot};
use rand::Rng;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Anything that can produce a raw sensor sample
pub trait SensorSource: Send {
    fn read(&mut self) -> SensorReading;
}

/// Random walk around plausible spring weather
pub struct SimulatedSensors<R: Rng + Send> {
    rng: R,
    last: SensorReading,
}

impl<R: Rng + Send> SimulatedSensors<R> {
    pub fn new(rng: R) -> Self {
        Self {
            rng,
            last: SensorReading {
                temp_c: 15.0,
                humidity: 60.0,
                pressure_hpa: 1013.0,
                lux: 10_000,
                uv_index: 3.0,
                wind_speed: 5.0,
                wind_dir_deg: 225.0,
                rain: 0.0,
            },
        }
    }
}

impl<R: Rng + Send> SensorSource for SimulatedSensors<R> {
    fn read(&mut self) -> SensorReading {
        let rng = &mut self.rng;
        let last = self.last;

        let raining = rng.gen_bool(0.05);
        let reading = SensorReading {
            temp_c: (last.temp_c + rng.gen_range(-0.2..0.2)).clamp(-40.0, 50.0),
            humidity: (last.humidity + rng.gen_range(-1.0..1.0)).clamp(5.0, 100.0),
            pressure_hpa: (last.pressure_hpa + rng.gen_range(-0.3..0.3)).clamp(950.0, 1060.0),
            lux: (last.lux + rng.gen_range(-500..500)).clamp(0, 120_000),
            uv_index: (last.uv_index + rng.gen_range(-0.1..0.1)).clamp(0.0, 11.0),
            wind_speed: (last.wind_speed + rng.gen_range(-1.0..1.0)).clamp(0.0, 60.0),
            wind_dir_deg: (last.wind_dir_deg + rng.gen_range(-15.0..15.0)).rem_euclid(360.0),
            rain: if raining { rng.gen_range(0.0..0.02) } else { 0.0 },
        };

        self.last = reading;
        reading
    }
}

/// Sample `source` every `interval`, derive a snapshot and hand it to the
/// cloud loop. Returns once the receiving side is gone.
pub async fn run_acquisition<S: SensorSource>(
    mut source: S,
    clock: StationClock,
    tx: mpsc::Sender<WeatherSnapshot>,
    interval: Duration,
) {
    info!("Starting acquisition every {:?}", interval);

    let mut accumulator = WeatherAccumulator::new();
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        let reading = source.read();
        let snapshot = accumulator.ingest(&reading, clock.today());
        debug!("Sampled {:?}", reading);

        if tx.send(snapshot).await.is_err() {
            warn!("Snapshot channel closed, stopping acquisition");
            break;
        }
    }

    info!("Acquisition stopped");
}
