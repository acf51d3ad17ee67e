//! Fixtures shared by the integration tests: small GeoTIFF tiles and
//! GeoJSON footprint indexes written into a temporary directory, and a
//! loopback HTTP server for remote reads.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::thread;
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

/// Grid of a test tile: top-left corner, pixel size and dimensions.
#[derive(Debug, Clone, Copy)]
pub struct Grid {
    pub origin: (f64, f64),
    pub pixel: f64,
    pub width: u32,
    pub height: u32,
}

impl Grid {
    /// 10x10 tile of 1-unit pixels with its top-left corner at `(x, y)`.
    pub fn ten_by_ten(x: f64, y: f64) -> Self {
        Self {
            origin: (x, y),
            pixel: 1.0,
            width: 10,
            height: 10,
        }
    }
}

/// Write a single-band float GeoTIFF whose pixel at (row, col) holds
/// `base + row * width + col`. `epsg = None` writes no GeoKeys.
pub fn write_tile(path: &Path, grid: Grid, epsg: Option<u16>, base: f32, nodata: Option<&str>) {
    let values: Vec<f32> = (0..grid.width * grid.height)
        .map(|i| base + i as f32)
        .collect();

    let file = File::create(path).expect("create tile");
    let mut encoder = TiffEncoder::new(file).expect("encoder");
    let mut image = encoder
        .new_image::<Gray32Float>(grid.width, grid.height)
        .expect("image");
    {
        let dir = image.encoder();
        dir.write_tag(Tag::Unknown(33550), &[grid.pixel, grid.pixel, 0.0][..])
            .expect("scale");
        dir.write_tag(
            Tag::Unknown(33922),
            &[0.0, 0.0, 0.0, grid.origin.0, grid.origin.1, 0.0][..],
        )
        .expect("tiepoint");
        if let Some(epsg) = epsg {
            let key = if epsg == 4326 { 2048u16 } else { 3072u16 };
            dir.write_tag(
                Tag::Unknown(34735),
                &[1u16, 1, 0, 2, 1025, 0, 1, 1, key, 0, 1, epsg][..],
            )
            .expect("geokeys");
        }
        if let Some(nodata) = nodata {
            dir.write_tag(Tag::Unknown(42113), nodata).expect("nodata");
        }
    }
    image.write_data(&values).expect("write");
}

/// Expected value of `write_tile` at a coordinate inside `grid`.
pub fn expected_value(grid: Grid, base: f32, x: f64, y: f64) -> f64 {
    let col = ((x - grid.origin.0) / grid.pixel).floor() as u32;
    let row = ((grid.origin.1 - y) / grid.pixel).floor() as u32;
    (base + (row * grid.width + col) as f32) as f64
}

/// Write a GeoJSON footprint index with one rectangle per tile.
pub fn write_index(path: &Path, field: &str, crs: Option<&str>, tiles: &[(&str, Grid)]) {
    let features: Vec<String> = tiles
        .iter()
        .map(|(tile, g)| {
            let (x0, y1) = g.origin;
            let x1 = x0 + g.pixel * g.width as f64;
            let y0 = y1 - g.pixel * g.height as f64;
            format!(
                r#"{{"type":"Feature","properties":{{"{field}":"{tile}"}},"geometry":{{"type":"Polygon","coordinates":[[[{x0},{y0}],[{x1},{y0}],[{x1},{y1}],[{x0},{y1}],[{x0},{y0}]]]}}}}"#
            )
        })
        .collect();
    let crs_member = crs
        .map(|name| format!(r#""crs":{{"type":"name","properties":{{"name":"{name}"}}}},"#))
        .unwrap_or_default();
    let text = format!(
        r#"{{"type":"FeatureCollection",{crs_member}"features":[{}]}}"#,
        features.join(",")
    );
    std::fs::write(path, text).expect("write index");
}

/// Serve `files` over HTTP/1.1 on a loopback port and return the base URL.
///
/// Supports HEAD and GET with a single `Range: bytes=a-b`; unknown paths
/// get a 404. Requests are handled one at a time and every response closes
/// its connection. The server thread lives until the test binary exits.
pub fn serve(files: HashMap<String, Vec<u8>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            respond(stream, &files);
        }
    });
    format!("http://{addr}")
}

fn respond(mut stream: TcpStream, files: &HashMap<String, Vec<u8>>) {
    let Ok(read_half) = stream.try_clone() else {
        return;
    };
    let mut reader = BufReader::new(read_half);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    let mut range = None;
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                range = parse_range(value.trim());
            }
        }
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let path = parts.next().unwrap_or_default().trim_start_matches('/');

    let Some(body) = files.get(path) else {
        let _ = stream.write_all(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        return;
    };
    let len = body.len() as u64;

    let (status, content_range, slice) = match range {
        Some((start, end)) if start < len => {
            let end = end.min(len - 1);
            (
                "206 Partial Content",
                Some(format!("bytes {start}-{end}/{len}")),
                &body[start as usize..=end as usize],
            )
        }
        Some(_) => {
            let _ = stream.write_all(
                format!(
                    "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{len}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                )
                .as_bytes(),
            );
            return;
        }
        None => ("200 OK", None, &body[..]),
    };

    let mut head = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n",
        slice.len()
    );
    if let Some(content_range) = content_range {
        head.push_str(&format!("Content-Range: {content_range}\r\n"));
    }
    head.push_str("\r\n");

    let _ = stream.write_all(head.as_bytes());
    if method != "HEAD" {
        let _ = stream.write_all(slice);
    }
    let _ = stream.flush();
}

/// Parse `bytes=a-b` into an inclusive range.
fn parse_range(value: &str) -> Option<(u64, u64)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

/// Bytes of a tile written with [`write_tile`].
pub fn tile_bytes(dir: &Path, grid: Grid, epsg: Option<u16>, base: f32) -> Vec<u8> {
    let path = dir.join("staging.tif");
    write_tile(&path, grid, epsg, base, None);
    let bytes = std::fs::read(&path).expect("read tile");
    std::fs::remove_file(&path).expect("remove staging tile");
    bytes
}
