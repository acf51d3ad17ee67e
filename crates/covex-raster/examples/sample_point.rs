//! Example: Sample one point from a local or remote GeoTIFF.
//!
//! Usage: cargo run --example sample_point -- <lon> <lat> <raster> [band]

use covex_raster::{RasterRef, RasterSource, WGS84};
use std::env;
use std::time::Instant;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 4 {
        eprintln!("Usage: {} <lon> <lat> <raster> [band]", args[0]);
        eprintln!("Example: {} -105.27 40.01 ./dem.tif", args[0]);
        std::process::exit(1);
    }

    let lon: f64 = args[1].parse().expect("Invalid longitude");
    let lat: f64 = args[2].parse().expect("Invalid latitude");
    let reference = RasterRef::parse(&args[3]);
    let band: u32 = args.get(4).map_or(Ok(1), |s| s.parse()).expect("Invalid band");

    let source = RasterSource::new().expect("Failed to create raster source");

    println!("Opening {}...", reference);
    let start = Instant::now();
    let session = match source.open(&reference) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let raster = session.raster();
    let (width, height) = raster.dimensions();
    println!(
        "Opened {}x{} raster with {} band(s) in {:.3}s",
        width,
        height,
        raster.band_count(),
        start.elapsed().as_secs_f64()
    );
    if let Some(crs) = raster.crs() {
        println!("CRS: {}", crs);
    }

    let coords = [(lon, lat)];
    let sampled = covex_raster::reproject(&coords, Some(&WGS84), raster.crs())
        .and_then(|projected| raster.sample_points(&projected, band));
    match sampled {
        Ok(values) => match values.first().copied().flatten() {
            Some(value) => println!("Value at ({}, {}): {:.4}", lon, lat, value),
            None => println!("No data at ({}, {})", lon, lat),
        },
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    let stats = source.stats();
    println!(
        "{} object(s), {} bytes in {} request(s)",
        stats.objects_read, stats.bytes_read, stats.requests
    );
}
