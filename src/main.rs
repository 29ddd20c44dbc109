mod meteo;
mod server;

use anyhow::Result;
use chrono::Utc;

use crate::meteo::MeteoClient;
use crate::meteo::areas;
use crate::meteo::snowdrift::{self, SECTOR_LABELS, SeasonFilter, TablerParams};

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::args().nth(1).as_deref() == Some("serve") {
        return server::start_server().await;
    }

    // Console report over the last five complete snow seasons for Trondheim.
    let area = areas::get_area("NO3").expect("NO3 is in the registry");
    let latest_complete = snowdrift::assign_season(Utc::now()) - 1;
    let filter = SeasonFilter {
        start_year: latest_complete - 4,
        end_year: latest_complete,
    };
    let params = TablerParams::default();

    println!("=== Seasonal Snow Drift for {} ===\n", area);
    println!(
        "Seasons {}-{} | T = {} m, F = {} m, theta = {}\n",
        filter.start_year,
        filter.end_year,
        params.threshold_distance_m,
        params.fetch_distance_m,
        params.relocation_coefficient
    );

    let client = MeteoClient::new();
    let observations = client
        .fetch_season_range(
            area.latitude,
            area.longitude,
            filter.start_year,
            filter.end_year,
        )
        .await?;
    println!("Fetched {} hourly ERA5 observations", observations.len());

    let summary = snowdrift::compute_drift(&observations, &filter, &params)?;
    if summary.yearly.is_empty() {
        println!("No observations in the requested season range.");
        return Ok(());
    }

    println!("\n=== Yearly Transport ===\n");
    for result in &summary.yearly {
        println!(
            "  {}/{} | SWE: {:8.1} mm | Qt: {:10.1} kg/m | {}",
            result.season,
            result.season + 1,
            result.swe_mm,
            result.transport.qt,
            result.transport.control
        );
    }

    if let Some(rose) = &summary.wind_rose {
        println!("\n=== Average Directional Transport ===\n");
        for (label, transport) in SECTOR_LABELS.iter().zip(rose) {
            println!("  {:>3} | {:10.1} kg/m", label, transport);
        }
    }

    // Export to CSV
    println!("\n=== CSV Export ===");
    println!("Season,Qupot (kg/m),Qspot (kg/m),Srwe (mm),Qinf (kg/m),Qt (kg/m),Control");
    for result in &summary.yearly {
        println!(
            "{},{:.2},{:.2},{:.2},{:.2},{:.2},{}",
            result.season,
            result.transport.qupot,
            result.transport.qspot,
            result.transport.srwe,
            result.transport.qinf,
            result.transport.qt,
            result.transport.control
        );
    }

    Ok(())
}
