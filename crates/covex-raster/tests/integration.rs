//! Integration tests for covex-raster against GeoTIFF files on disk.
//!
//! Tiles are generated into a temporary directory with the `tiff` encoder.

use covex_raster::{Crs, RasterError, RasterRef, RasterSource, Transformer, WGS84};
use std::fs::File;
use std::path::Path;
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

/// Write a single-band north-up GeoTIFF.
fn write_tile(
    path: &Path,
    (width, height): (u32, u32),
    origin: (f64, f64),
    pixel: f64,
    epsg: u16,
    values: &[f32],
    nodata: Option<&str>,
) {
    let file = File::create(path).expect("create tile");
    let mut encoder = TiffEncoder::new(file).expect("encoder");
    let mut image = encoder
        .new_image::<Gray32Float>(width, height)
        .expect("image");
    let geo_key = if epsg == 4326 { 2048u16 } else { 3072u16 };
    {
        let dir = image.encoder();
        dir.write_tag(Tag::Unknown(33550), &[pixel, pixel, 0.0][..])
            .expect("scale");
        dir.write_tag(
            Tag::Unknown(33922),
            &[0.0, 0.0, 0.0, origin.0, origin.1, 0.0][..],
        )
        .expect("tiepoint");
        dir.write_tag(
            Tag::Unknown(34735),
            &[1u16, 1, 0, 2, 1025, 0, 1, 1, geo_key, 0, 1, epsg][..],
        )
        .expect("geokeys");
        if let Some(nodata) = nodata {
            dir.write_tag(Tag::Unknown(42113), nodata).expect("nodata");
        }
    }
    image.write_data(values).expect("write");
}

#[test]
fn test_sample_local_geographic_tile() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("tile.tif");
    let values: Vec<f32> = (0..100).map(|v| v as f32).collect();
    write_tile(&path, (10, 10), (-106.0, 41.0), 0.1, 4326, &values, Some("-9999"));

    let source = RasterSource::new().expect("source");
    let reference = RasterRef::Local(path);
    let samples = source
        .sample(&reference, &[(-105.95, 40.95), (-105.15, 40.15), (-90.0, 30.0)], 1)
        .expect("sample");

    assert_eq!(samples, vec![Some(0.0), Some(88.0), None]);

    let stats = source.stats();
    assert_eq!(stats.objects_read, 1);
    assert_eq!(stats.open_sessions, 0);
    assert!(stats.bytes_read > 400);
}

#[test]
fn test_sample_projected_tile_after_reprojection() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("utm.tif");

    // 30 m pixels in UTM zone 13N around (-105.0, 40.0)
    let t = Transformer::new(Some(&WGS84), Some(&Crs::Epsg(32613))).expect("transformer");
    let (cx, cy) = t.transform(-105.0, 40.0).expect("transform");
    let origin = ((cx / 30.0).floor() * 30.0 - 150.0, (cy / 30.0).floor() * 30.0 + 150.0);
    let values: Vec<f32> = (0..100).map(|v| v as f32).collect();
    write_tile(&path, (10, 10), origin, 30.0, 32613, &values, None);

    let source = RasterSource::new().expect("source");
    let session = source.open(&RasterRef::Local(path)).expect("open");
    let raster = session.raster();
    assert_eq!(raster.crs(), Some(&Crs::Epsg(32613)));
    assert_eq!(source.stats().open_sessions, 1);

    let to_raster = Transformer::new(Some(&WGS84), raster.crs()).expect("transformer");
    let coords = to_raster.transform_all(&[(-105.0, 40.0)]).expect("reproject");
    let value = raster.sample_points(&coords, 1).expect("sample")[0];

    // The centre point sits in column 5, row 4 or 5 depending on the grid snap
    let value = value.expect("point should be inside the tile");
    assert!((40.0..=59.0).contains(&value), "unexpected value {value}");

    drop(session);
    assert_eq!(source.stats().open_sessions, 0);
}

#[test]
fn test_nodata_pixels_are_missing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nodata.tif");
    write_tile(&path, (2, 1), (0.0, 1.0), 1.0, 4326, &[255.0, 7.0], Some("255"));

    let source = RasterSource::new().expect("source");
    let samples = source
        .sample(&RasterRef::Local(path), &[(0.5, 0.5), (1.5, 0.5)], 1)
        .expect("sample");
    assert_eq!(samples, vec![None, Some(7.0)]);
}

#[test]
fn test_band_error_releases_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("one_band.tif");
    write_tile(&path, (1, 1), (0.0, 1.0), 1.0, 4326, &[1.0], None);

    let source = RasterSource::new().expect("source");
    let err = source
        .sample(&RasterRef::Local(path), &[(0.5, 0.5)], 3)
        .unwrap_err();

    assert!(matches!(err, RasterError::BandOutOfRange { band: 3, bands: 1, .. }));
    assert_eq!(source.stats().open_sessions, 0);
}

#[test]
fn test_corrupt_tile_is_decode_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("corrupt.tif");
    std::fs::write(&path, b"definitely not a tiff").expect("write");

    let source = RasterSource::new().expect("source");
    let err = source.open(&RasterRef::Local(path)).unwrap_err();
    assert!(!err.is_configuration());
    assert_eq!(source.stats().open_sessions, 0);
}

#[test]
fn test_parallel_sessions_balance() {
    use std::sync::Arc;
    use std::thread;

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("shared.tif");
    write_tile(&path, (4, 4), (0.0, 4.0), 1.0, 4326, &[1.0; 16], None);

    let source = Arc::new(RasterSource::new().expect("source"));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let source = Arc::clone(&source);
            let reference = RasterRef::Local(path.clone());
            thread::spawn(move || {
                let x = (i % 4) as f64 + 0.5;
                source.sample(&reference, &[(x, 2.5)], 1).expect("sample")
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().expect("thread"), vec![Some(1.0)]);
    }

    let stats = source.stats();
    assert_eq!(stats.sessions_opened, 8);
    assert_eq!(stats.objects_read, 8);
    assert_eq!(stats.open_sessions, 0);
}

#[test]
fn test_sampling_reads_only_the_needed_strip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("large.tif");

    // 1024x1024 f32 in 8-row strips: 4 MiB of pixels, 32 KiB per strip
    let size = 1024u32;
    let values: Vec<f32> = (0..size * size).map(|v| v as f32).collect();
    {
        let file = File::create(&path).expect("create tile");
        let mut encoder = TiffEncoder::new(file).expect("encoder");
        let mut image = encoder.new_image::<Gray32Float>(size, size).expect("image");
        image.rows_per_strip(8).expect("rows per strip");
        let dir = image.encoder();
        dir.write_tag(Tag::Unknown(33550), &[1.0f64, 1.0, 0.0][..])
            .expect("scale");
        dir.write_tag(
            Tag::Unknown(33922),
            &[0.0f64, 0.0, 0.0, 0.0, size as f64, 0.0][..],
        )
        .expect("tiepoint");
        dir.write_tag(
            Tag::Unknown(34735),
            &[1u16, 1, 0, 2, 1025, 0, 1, 1, 3072, 0, 1, 3857][..],
        )
        .expect("geokeys");
        image.write_data(&values).expect("write");
    }
    let file_size = std::fs::metadata(&path).expect("metadata").len();

    let source = RasterSource::new().expect("source");
    let session = source.open(&RasterRef::Local(path)).expect("open");
    let raster = session.raster();
    assert_eq!(raster.chunk_dimensions(), (1024, 8));

    // Row 600, col 300
    let value = raster.sample_nearest(300.5, 1024.0 - 600.5, 1).expect("sample");
    assert_eq!(value, Some((600 * 1024 + 300) as f64));

    let stats = source.stats();
    assert!(
        stats.bytes_read < file_size / 8,
        "read {} of {file_size} bytes",
        stats.bytes_read
    );

    // A second point in the same strip is served from the cache
    let requests = stats.requests;
    let value = raster.sample_nearest(10.5, 1024.0 - 601.5, 1).expect("sample");
    assert_eq!(value, Some((601 * 1024 + 10) as f64));
    assert_eq!(source.stats().requests, requests);
}
