use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::meteo::MeteoClient;
use crate::meteo::areas::{self, PriceArea};
use crate::meteo::snowdrift::{
    self, DriftSummary, MonthlyResult, SECTOR_LABELS, SeasonFilter, SeasonResult, SectorTransport,
    TablerParams,
};

#[derive(Clone)]
struct AppState {
    meteo_client: Arc<MeteoClient>,
}

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Deserialize)]
struct DriftQuery {
    /// First snow season to include, as its July year.
    start_year: Option<i32>,
    /// Last snow season to include. Default: the last complete season.
    end_year: Option<i32>,
    /// Threshold transport distance T in meters.
    t: Option<f64>,
    /// Fetch distance F in meters.
    f: Option<f64>,
    /// Relocation coefficient theta.
    theta: Option<f64>,
}

impl DriftQuery {
    fn filter(&self) -> SeasonFilter {
        let latest_complete = snowdrift::assign_season(Utc::now()) - 1;
        let end_year = self.end_year.unwrap_or(latest_complete);
        let start_year = self.start_year.unwrap_or(end_year - 4);
        SeasonFilter {
            start_year,
            end_year,
        }
    }

    fn params(&self) -> TablerParams {
        let defaults = TablerParams::default();
        TablerParams {
            threshold_distance_m: self.t.unwrap_or(defaults.threshold_distance_m),
            fetch_distance_m: self.f.unwrap_or(defaults.fetch_distance_m),
            relocation_coefficient: self.theta.unwrap_or(defaults.relocation_coefficient),
            dt_seconds: defaults.dt_seconds,
        }
    }
}

#[derive(Serialize)]
struct SeasonRow {
    season: i32,
    swe_mm: f64,
    qupot_kg_per_m: f64,
    qspot_kg_per_m: f64,
    srwe_mm: f64,
    qinf_kg_per_m: f64,
    qt_kg_per_m: f64,
    control: String,
    season_start: String,
    season_end: String,
    bar_width_ms: f64,
}

impl From<&SeasonResult> for SeasonRow {
    fn from(result: &SeasonResult) -> Self {
        Self {
            season: result.season,
            swe_mm: result.swe_mm,
            qupot_kg_per_m: result.transport.qupot,
            qspot_kg_per_m: result.transport.qspot,
            srwe_mm: result.transport.srwe,
            qinf_kg_per_m: result.transport.qinf,
            qt_kg_per_m: result.transport.qt,
            control: result.transport.control.to_string(),
            season_start: result.season_start.to_rfc3339(),
            season_end: result.season_end.to_rfc3339(),
            bar_width_ms: result.bar_width_ms,
        }
    }
}

#[derive(Serialize)]
struct MonthlyRow {
    season: i32,
    month_start: String,
    swe_mm: f64,
    qt_kg_per_m: f64,
}

impl From<&MonthlyResult> for MonthlyRow {
    fn from(result: &MonthlyResult) -> Self {
        Self {
            season: result.season,
            month_start: result.month_start.to_rfc3339(),
            swe_mm: result.swe_mm,
            qt_kg_per_m: result.qt,
        }
    }
}

#[derive(Serialize)]
struct SectorRow {
    label: &'static str,
    transport_kg_per_m: f64,
}

#[derive(Serialize)]
struct AreaInfo {
    code: String,
    city: String,
    latitude: f64,
    longitude: f64,
}

/// Fetch the observation range for an area and run the drift model over it.
async fn compute_summary(
    state: &AppState,
    area: &PriceArea,
    query: &DriftQuery,
) -> Result<(SeasonFilter, DriftSummary, usize), StatusCode> {
    let filter = query.filter();
    if filter.start_year > filter.end_year {
        return Err(StatusCode::BAD_REQUEST);
    }

    let observations = state
        .meteo_client
        .fetch_season_range(
            area.latitude,
            area.longitude,
            filter.start_year,
            filter.end_year,
        )
        .await
        .map_err(|e| {
            eprintln!("Open-Meteo API error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let summary = snowdrift::compute_drift(&observations, &filter, &query.params()).map_err(|e| {
        eprintln!("Snow drift computation rejected: {}", e);
        StatusCode::BAD_REQUEST
    })?;

    Ok((filter, summary, observations.len()))
}

/// GET /api/v1/areas
/// List all price areas with their reference city coordinates
async fn list_price_areas() -> Json<ApiResponse<Vec<AreaInfo>>> {
    let info: Vec<_> = areas::list_areas()
        .iter()
        .map(|a| AreaInfo {
            code: a.code.to_string(),
            city: a.city.to_string(),
            latitude: a.latitude,
            longitude: a.longitude,
        })
        .collect();

    Json(ApiResponse::success(info))
}

/// GET /api/v1/snow-drift/:area/yearly
/// Per-season Tabler transport table
async fn get_yearly_drift(
    State(state): State<AppState>,
    Path(area_code): Path<String>,
    Query(query): Query<DriftQuery>,
) -> Result<Json<ApiResponse<Vec<SeasonRow>>>, StatusCode> {
    let area = areas::get_area(&area_code).ok_or(StatusCode::BAD_REQUEST)?;
    let (filter, summary, _) = compute_summary(&state, area, &query).await?;

    if summary.yearly.is_empty() {
        return Ok(Json(ApiResponse::error(format!(
            "No observations for {} in seasons {}-{}",
            area, filter.start_year, filter.end_year
        ))));
    }

    let rows = summary.yearly.iter().map(SeasonRow::from).collect();
    Ok(Json(ApiResponse::success(rows)))
}

/// GET /api/v1/snow-drift/:area/monthly
/// Per-(season, month) Qt table
async fn get_monthly_drift(
    State(state): State<AppState>,
    Path(area_code): Path<String>,
    Query(query): Query<DriftQuery>,
) -> Result<Json<ApiResponse<Vec<MonthlyRow>>>, StatusCode> {
    let area = areas::get_area(&area_code).ok_or(StatusCode::BAD_REQUEST)?;
    let (filter, summary, _) = compute_summary(&state, area, &query).await?;

    if summary.monthly.is_empty() {
        return Ok(Json(ApiResponse::error(format!(
            "No observations for {} in seasons {}-{}",
            area, filter.start_year, filter.end_year
        ))));
    }

    let rows = summary.monthly.iter().map(MonthlyRow::from).collect();
    Ok(Json(ApiResponse::success(rows)))
}

/// GET /api/v1/snow-drift/:area/wind-rose
/// 16-sector directional transport averaged across the requested seasons
async fn get_wind_rose(
    State(state): State<AppState>,
    Path(area_code): Path<String>,
    Query(query): Query<DriftQuery>,
) -> Result<Json<ApiResponse<Vec<SectorRow>>>, StatusCode> {
    let area = areas::get_area(&area_code).ok_or(StatusCode::BAD_REQUEST)?;
    let (filter, summary, _) = compute_summary(&state, area, &query).await?;

    match summary.wind_rose {
        Some(sectors) => {
            let rows = SECTOR_LABELS
                .into_iter()
                .zip(sectors)
                .map(|(label, transport)| SectorRow {
                    label,
                    transport_kg_per_m: transport,
                })
                .collect();
            Ok(Json(ApiResponse::success(rows)))
        }
        None => Ok(Json(ApiResponse::error(format!(
            "No observations for {} in seasons {}-{}",
            area, filter.start_year, filter.end_year
        )))),
    }
}

use askama::Template;
use serde_json::json;

#[derive(Template)]
#[template(path = "plot.html")]
struct PlotTemplate {
    area_code: String,
    city: String,
    season_range: String,
    data_points: usize,
    drift_data: String,
    drift_layout: String,
    rose_data: String,
    rose_layout: String,
}

/// Build Plotly traces for the yearly bars and the monthly Qt line.
fn generate_drift_plot(summary: &DriftSummary) -> (String, String) {
    // Yearly bars sit at the season centers and span the whole season.
    let centers: Vec<String> = summary
        .yearly
        .iter()
        .map(|r| {
            (r.season_start + (r.season_end - r.season_start) / 2)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .collect();
    let widths: Vec<f64> = summary.yearly.iter().map(|r| r.bar_width_ms).collect();
    let yearly_qt: Vec<f64> = summary.yearly.iter().map(|r| r.transport.qt).collect();

    let months: Vec<String> = summary
        .monthly
        .iter()
        .map(|m| m.month_start.format("%Y-%m-%d").to_string())
        .collect();
    let monthly_qt: Vec<f64> = summary.monthly.iter().map(|m| m.qt).collect();

    let traces = json!([
        {
            "x": centers,
            "y": yearly_qt,
            "width": widths,
            "name": "Yearly Qt (kg/m)",
            "type": "bar",
            "marker": {
                "color": "rgba(120, 140, 255, 0.45)"
            }
        },
        {
            "x": months,
            "y": monthly_qt,
            "name": "Monthly Qt (kg/m)",
            "type": "scatter",
            "mode": "lines+markers",
            "line": {
                "color": "rgb(255, 140, 0)",
                "width": 2
            },
            "marker": {
                "size": 5
            }
        }
    ]);

    let layout = json!({
        "title": {
            "text": "Monthly and Yearly Snow Drift (Qt)",
            "font": {
                "size": 20
            }
        },
        "xaxis": {
            "title": "Calendar time (snow seasons run July-June)",
            "tickangle": -45
        },
        "yaxis": {
            "title": "Qt (kg/m)"
        },
        "hovermode": "x unified",
        "plot_bgcolor": "rgb(250, 250, 250)",
        "paper_bgcolor": "white",
        "showlegend": true,
        "legend": {
            "orientation": "h",
            "yanchor": "bottom",
            "y": -0.25,
            "xanchor": "center",
            "x": 0.5
        }
    });

    (
        serde_json::to_string(&traces).unwrap(),
        serde_json::to_string(&layout).unwrap(),
    )
}

/// Build the wind-rose barpolar trace, in tonnes/m.
fn generate_rose_plot(sectors: &SectorTransport) -> (String, String) {
    let tonnes: Vec<f64> = sectors.iter().map(|s| s / 1000.0).collect();

    let traces = json!([
        {
            "r": tonnes,
            "theta": SECTOR_LABELS,
            "type": "barpolar",
            "marker": {
                "color": "rgb(120, 140, 255)",
                "line": {
                    "color": "black"
                }
            }
        }
    ]);

    let layout = json!({
        "title": {
            "text": "Average Directional Transport (Wind Rose)"
        },
        "polar": {
            "radialaxis": {
                "title": "Tonnes/m"
            },
            "angularaxis": {
                "direction": "clockwise"
            }
        },
        "paper_bgcolor": "white"
    });

    (
        serde_json::to_string(&traces).unwrap(),
        serde_json::to_string(&layout).unwrap(),
    )
}

/// GET /api/v1/snow-drift/:area/plot
/// Interactive Plotly page with the drift bars, monthly line and wind rose
async fn get_plot(
    State(state): State<AppState>,
    Path(area_code): Path<String>,
    Query(query): Query<DriftQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let area = areas::get_area(&area_code).ok_or(StatusCode::BAD_REQUEST)?;
    let (filter, summary, data_points) = compute_summary(&state, area, &query).await?;

    if summary.yearly.is_empty() {
        return Err(StatusCode::NOT_FOUND);
    }

    let (drift_data, drift_layout) = generate_drift_plot(&summary);
    let (rose_data, rose_layout) = match &summary.wind_rose {
        Some(sectors) => generate_rose_plot(sectors),
        None => ("[]".to_string(), "{}".to_string()),
    };

    let template = PlotTemplate {
        area_code: area.code.to_string(),
        city: area.city.to_string(),
        season_range: format!("{}-{}", filter.start_year, filter.end_year),
        data_points,
        drift_data,
        drift_layout,
        rose_data,
        rose_layout,
    };

    let html = template.render().map_err(|e| {
        eprintln!("Template rendering error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(axum::response::Html(html))
}

/// GET /health
async fn health() -> &'static str {
    "OK"
}

pub async fn start_server() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let state = AppState {
        meteo_client: Arc::new(MeteoClient::new()),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/v1/areas", get(list_price_areas))
        .route("/api/v1/snow-drift/{area}/yearly", get(get_yearly_drift))
        .route("/api/v1/snow-drift/{area}/monthly", get(get_monthly_drift))
        .route("/api/v1/snow-drift/{area}/wind-rose", get(get_wind_rose))
        .route("/api/v1/snow-drift/{area}/plot", get(get_plot))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3048").await?;
    println!("🚀 Server running on http://0.0.0.0:3048");
    println!("\nAvailable endpoints:");
    println!("  GET /health");
    println!("  GET /api/v1/areas");
    println!("  GET /api/v1/snow-drift/:area/yearly?start_year&end_year&t&f&theta");
    println!("  GET /api/v1/snow-drift/:area/monthly?start_year&end_year&t&f&theta");
    println!("  GET /api/v1/snow-drift/:area/wind-rose?start_year&end_year");
    println!("  GET /api/v1/snow-drift/:area/plot?start_year&end_year");
    println!("\nExamples:");
    println!("  curl 'http://localhost:3048/api/v1/snow-drift/NO3/yearly?start_year=2018&end_year=2023'");

    axum::serve(listener, app).await?;

    Ok(())
}
