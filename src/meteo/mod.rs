pub(crate) mod areas;
pub(crate) mod snowdrift;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

const BASE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";

/// Hourly variables requested from the archive, in request order.
const HOURLY_VARIABLES: &str = "temperature_2m,precipitation,wind_speed_10m,wind_direction_10m";

#[derive(Error, Debug)]
pub enum MeteoError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// One hourly ERA5 reanalysis record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HourlyObservation {
    pub time: DateTime<Utc>,
    /// Air temperature at 2m, degrees C.
    pub temperature_2m: f64,
    /// Precipitation, mm water equivalent.
    pub precipitation: f64,
    /// Wind speed at 10m, m/s.
    pub wind_speed_10m: f64,
    /// Meteorological wind direction at 10m, degrees the wind blows from.
    pub wind_direction_10m: f64,
}

// Archive response: parallel per-variable arrays keyed by a shared time axis.
#[derive(Debug, Deserialize)]
pub struct ArchiveResponse {
    pub latitude: f64,
    pub longitude: f64,
    pub hourly: HourlyBlock,
}

#[derive(Debug, Deserialize)]
pub struct HourlyBlock {
    pub time: Vec<String>,
    pub temperature_2m: Vec<Option<f64>>,
    pub precipitation: Vec<Option<f64>>,
    pub wind_speed_10m: Vec<Option<f64>>,
    pub wind_direction_10m: Vec<Option<f64>>,
}

impl ArchiveResponse {
    /// Zip the parallel hourly arrays into observation records.
    ///
    /// Rows where any variable is null (reanalysis gaps near the present) are
    /// dropped. Arrays of inconsistent length are an invalid response.
    pub fn observations(&self) -> Result<Vec<HourlyObservation>, MeteoError> {
        let hourly = &self.hourly;
        let n = hourly.time.len();
        let lengths = [
            hourly.temperature_2m.len(),
            hourly.precipitation.len(),
            hourly.wind_speed_10m.len(),
            hourly.wind_direction_10m.len(),
        ];
        if lengths.iter().any(|&len| len != n) {
            return Err(MeteoError::InvalidResponse(format!(
                "hourly arrays have inconsistent lengths: {n} timestamps vs {lengths:?}"
            )));
        }

        let mut observations = Vec::with_capacity(n);
        for i in 0..n {
            let (Some(temperature_2m), Some(precipitation), Some(wind_speed_10m), Some(wind_direction_10m)) = (
                hourly.temperature_2m[i],
                hourly.precipitation[i],
                hourly.wind_speed_10m[i],
                hourly.wind_direction_10m[i],
            ) else {
                continue;
            };
            observations.push(HourlyObservation {
                time: parse_hourly_timestamp(&hourly.time[i])?,
                temperature_2m,
                precipitation,
                wind_speed_10m,
                wind_direction_10m,
            });
        }
        Ok(observations)
    }
}

/// Parse the archive's ISO 8601 timestamps ("2019-01-01T00:00") as UTC.
fn parse_hourly_timestamp(timestamp: &str) -> Result<DateTime<Utc>, MeteoError> {
    NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S"))
        .map(|naive| naive.and_utc())
        .map_err(|_| MeteoError::InvalidTimestamp(timestamp.to_string()))
}

pub struct MeteoClient {
    client: Client,
}

impl MeteoClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Fetch hourly ERA5 reanalysis data for a location and date range.
    ///
    /// The archive holds no future data, so the end date is clamped to today.
    pub async fn fetch_era5(
        &self,
        latitude: f64,
        longitude: f64,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<HourlyObservation>, MeteoError> {
        let today = Utc::now().date_naive();
        let end_date = end_date.min(today);

        let url = format!(
            "{BASE_URL}?latitude={latitude}&longitude={longitude}\
             &start_date={start_date}&end_date={end_date}\
             &hourly={HOURLY_VARIABLES}&models=era5"
        );

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(MeteoError::InvalidResponse(response.text().await?));
        }

        let archive: ArchiveResponse = response.json().await?;
        archive.observations()
    }

    /// Fetch everything covering the snow seasons `start_year..=end_year`,
    /// i.e. 1 July of the first season through 30 June after the last.
    pub async fn fetch_season_range(
        &self,
        latitude: f64,
        longitude: f64,
        start_year: i32,
        end_year: i32,
    ) -> Result<Vec<HourlyObservation>, MeteoError> {
        let start = NaiveDate::from_ymd_opt(start_year, 7, 1)
            .ok_or_else(|| MeteoError::InvalidTimestamp(format!("{start_year}-07-01")))?;
        let end = NaiveDate::from_ymd_opt(end_year + 1, 6, 30)
            .ok_or_else(|| MeteoError::InvalidTimestamp(format!("{}-06-30", end_year + 1)))?;
        self.fetch_era5(latitude, longitude, start, end).await
    }
}

impl Default for MeteoClient {
    fn default() -> Self {
        Self::new()
    }
}
