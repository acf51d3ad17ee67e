//! Local and remote raster access with scoped read sessions.
//!
//! Every read goes through [`RasterSource::open`], which hands back a
//! [`RasterSession`]. The session owns the open raster, and the byte-range
//! reader behind it, for as long as the caller needs it and is released when
//! dropped, whichever way the caller leaves the scope. The source counts open
//! sessions so that leaks show up in [`SourceStats`].
//!
//! Opening reads the TIFF header and IFD; pixel data is fetched one strip or
//! tile at a time as points are sampled.
//!
//! ## Remote access
//!
//! - `Anonymous`: unsigned HTTP range requests. `s3://bucket/key` is mapped
//!   to the virtual-hosted S3 URL for the configured region, or to
//!   `<endpoint>/<bucket>/<key>` when an endpoint is set.
//! - `Credentialed`: signed S3 range reads through `object_store`, with
//!   credentials taken from the standard `AWS_*` environment variables.
//!
//! Plain `http(s)://` URLs are always read with HTTP range requests.

use crate::range::{
    HttpRangeReader, LocalRangeReader, RangeCursor, RangeReader, ReadCounters, S3RangeReader,
};
use crate::raster::Raster;
use crate::{RasterError, Result};
use object_store::aws::AmazonS3Builder;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Region used for anonymous `s3://` URLs when none is configured.
pub const DEFAULT_REGION: &str = "us-west-2";

/// HTTP timeout for a single raster read.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Where a raster lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RasterRef {
    /// File on the local filesystem.
    Local(PathBuf),
    /// Object addressed by URL (`s3://`, `https://` or `http://`).
    Remote(String),
}

impl RasterRef {
    /// Classify a path or URL.
    pub fn parse(reference: &str) -> Self {
        if reference.contains("://") {
            RasterRef::Remote(reference.to_string())
        } else {
            RasterRef::Local(PathBuf::from(reference))
        }
    }

    /// Whether this raster is read over the network.
    pub fn is_remote(&self) -> bool {
        matches!(self, RasterRef::Remote(_))
    }
}

impl fmt::Display for RasterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RasterRef::Local(path) => write!(f, "{}", path.display()),
            RasterRef::Remote(url) => f.write_str(url),
        }
    }
}

/// How remote objects are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoteAccess {
    /// Unsigned requests against public buckets.
    #[default]
    Anonymous,
    /// Signed requests using AWS credentials from the environment.
    Credentialed,
}

/// Settings for a [`RasterSource`].
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Remote access mode.
    pub access: RemoteAccess,
    /// AWS region for `s3://` URLs.
    pub region: Option<String>,
    /// Custom S3-compatible endpoint.
    pub endpoint: Option<String>,
    /// Timeout for a single HTTP range request.
    pub timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            access: RemoteAccess::Anonymous,
            region: None,
            endpoint: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Read statistics for a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Rasters whose header was read successfully.
    pub objects_read: usize,
    /// Encoded bytes fetched, headers and pixel chunks together.
    pub bytes_read: u64,
    /// Range requests issued (local reads included).
    pub requests: u64,
    /// Sessions opened over the source lifetime.
    pub sessions_opened: usize,
    /// Sessions currently open.
    pub open_sessions: usize,
}

/// Parsed remote location.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RemoteLocation {
    S3 { bucket: String, key: String },
    Http(String),
}

impl RemoteLocation {
    fn parse(url: &str) -> Result<Self> {
        if let Some(rest) = url.strip_prefix("s3://") {
            return match rest.split_once('/') {
                Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                    Ok(RemoteLocation::S3 {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    })
                }
                _ => Err(RasterError::InvalidUrl(url.to_string())),
            };
        }
        if url.starts_with("https://") || url.starts_with("http://") {
            return Ok(RemoteLocation::Http(url.to_string()));
        }
        Err(RasterError::InvalidUrl(url.to_string()))
    }
}

/// Opens rasters from the local filesystem or remote object storage.
///
/// Safe to share across threads; each call to [`open`](Self::open) is an
/// independent session.
pub struct RasterSource {
    config: SourceConfig,
    /// HTTP client for anonymous reads.
    client: reqwest::blocking::Client,
    /// Runtime driving `object_store` for credentialed reads.
    runtime: Option<tokio::runtime::Runtime>,
    objects_read: AtomicUsize,
    counters: Arc<ReadCounters>,
    sessions_opened: AtomicUsize,
    open_sessions: AtomicUsize,
}

impl fmt::Debug for RasterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterSource")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl RasterSource {
    /// Create a source with anonymous remote access.
    pub fn new() -> Result<Self> {
        Self::with_config(SourceConfig::default())
    }

    /// Create a source with explicit settings.
    pub fn with_config(config: SourceConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()?;

        let runtime = match config.access {
            RemoteAccess::Anonymous => None,
            RemoteAccess::Credentialed => Some(
                tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()?,
            ),
        };

        Ok(Self {
            config,
            client,
            runtime,
            objects_read: AtomicUsize::new(0),
            counters: Arc::new(ReadCounters::default()),
            sessions_opened: AtomicUsize::new(0),
            open_sessions: AtomicUsize::new(0),
        })
    }

    /// Source settings.
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Read statistics so far.
    pub fn stats(&self) -> SourceStats {
        SourceStats {
            objects_read: self.objects_read.load(Ordering::Relaxed),
            bytes_read: self.counters.bytes(),
            requests: self.counters.requests(),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            open_sessions: self.open_sessions.load(Ordering::Relaxed),
        }
    }

    /// Open a read session on a raster.
    ///
    /// The session counts as open from the moment this is called; if the
    /// header read or decode fails it is released before the error is
    /// returned.
    pub fn open(&self, reference: &RasterRef) -> Result<RasterSession<'_>> {
        let guard = SessionGuard::acquire(self, reference);

        let reader = self.range_reader(reference)?;
        let size = reader.size();
        let cursor = RangeCursor::new(reader, Arc::clone(&self.counters));
        let raster = Raster::from_reader(cursor, reference.to_string())?;

        self.objects_read.fetch_add(1, Ordering::Relaxed);
        debug!(
            raster = %reference,
            size,
            chunk = ?raster.chunk_dimensions(),
            "read raster header"
        );

        Ok(RasterSession {
            raster,
            _guard: guard,
        })
    }

    /// Open a raster, sample points already in its CRS, and close it again.
    pub fn sample(
        &self,
        reference: &RasterRef,
        points: &[(f64, f64)],
        band: u32,
    ) -> Result<Vec<Option<f64>>> {
        let session = self.open(reference)?;
        session.raster().sample_points(points, band)
    }

    fn range_reader(&self, reference: &RasterRef) -> Result<Box<dyn RangeReader>> {
        let url = match reference {
            RasterRef::Local(path) => return Ok(Box::new(LocalRangeReader::open(path)?)),
            RasterRef::Remote(url) => url,
        };
        match RemoteLocation::parse(url)? {
            RemoteLocation::Http(url) => {
                Ok(Box::new(HttpRangeReader::open(self.client.clone(), &url)?))
            }
            RemoteLocation::S3 { bucket, key } => match self.config.access {
                RemoteAccess::Anonymous => Ok(Box::new(HttpRangeReader::open(
                    self.client.clone(),
                    &self.s3_https_url(&bucket, &key),
                )?)),
                RemoteAccess::Credentialed => Ok(Box::new(self.s3_reader(&bucket, &key, url)?)),
            },
        }
    }

    /// Public HTTPS URL for an S3 object.
    fn s3_https_url(&self, bucket: &str, key: &str) -> String {
        match &self.config.endpoint {
            Some(endpoint) => format!("{}/{bucket}/{key}", endpoint.trim_end_matches('/')),
            None => {
                let region = self.config.region.as_deref().unwrap_or(DEFAULT_REGION);
                format!("https://{bucket}.s3.{region}.amazonaws.com/{key}")
            }
        }
    }

    fn s3_reader(&self, bucket: &str, key: &str, url: &str) -> Result<S3RangeReader> {
        let runtime = self.runtime.as_ref().ok_or_else(|| RasterError::RemoteReadFailed {
            url: url.to_string(),
            reason: "credentialed access has no runtime".to_string(),
        })?;

        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if let Some(region) = &self.config.region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &self.config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        let store = Arc::new(builder.build()?);

        S3RangeReader::open(store, key, url, runtime.handle().clone())
    }
}

/// Open-session accounting that releases on drop.
struct SessionGuard<'a> {
    source: &'a RasterSource,
    reference: String,
}

impl<'a> SessionGuard<'a> {
    fn acquire(source: &'a RasterSource, reference: &RasterRef) -> Self {
        source.sessions_opened.fetch_add(1, Ordering::Relaxed);
        source.open_sessions.fetch_add(1, Ordering::AcqRel);
        debug!(raster = %reference, "opened raster session");
        Self {
            source,
            reference: reference.to_string(),
        }
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.source.open_sessions.fetch_sub(1, Ordering::AcqRel);
        debug!(raster = %self.reference, "closed raster session");
    }
}

/// A raster held open for the lifetime of this value.
pub struct RasterSession<'a> {
    raster: Raster,
    _guard: SessionGuard<'a>,
}

impl fmt::Debug for RasterSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterSession")
            .field("raster", &self.raster.source_name())
            .finish()
    }
}

impl RasterSession<'_> {
    /// The open raster.
    pub fn raster(&self) -> &Raster {
        &self.raster
    }
}
