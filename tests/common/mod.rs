//! Shared fixtures for integration tests: a throwaway SQLite database and
//! storage directories under a temp dir, plus generated source images.
#![allow(dead_code)]

use axum::Router;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use pluto_images::{
    config::Config,
    database::Database,
    errors::CodecResult,
    imaging::{CropPlan, EncodeOptions, ImageCodec, ProbedImage, RasterCodec},
    models::{ImageMetadata, LinkKey, UpsertRequest},
    services::Services,
    web::{AppState, WebServer},
};

pub struct TestEnv {
    pub dir: TempDir,
    pub config: Config,
    pub database: Database,
    pub services: Services,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config<F: FnOnce(&mut Config)>(adjust: F) -> Self {
        Self::build(adjust, Arc::new(RasterCodec::new())).await
    }

    pub async fn with_codec(codec: Arc<dyn ImageCodec>) -> Self {
        Self::build(|_| {}, codec).await
    }

    async fn build<F: FnOnce(&mut Config)>(adjust: F, codec: Arc<dyn ImageCodec>) -> Self {
        let dir = tempfile::tempdir().unwrap();

        let mut config = Config::default();
        config.database.url = format!("sqlite://{}", dir.path().join("pluto.db").display());
        config.database.max_connections = Some(4);
        config.storage.image_dir = dir.path().join("images");
        config.storage.cache_dir = dir.path().join("cache");
        adjust(&mut config);

        let database = Database::new(&config.database).await.unwrap();
        database.migrate().await.unwrap();
        let services = Services::with_codec(&config, &database, codec)
            .await
            .unwrap();

        Self {
            dir,
            config,
            database,
            services,
        }
    }

    pub fn state(&self) -> AppState {
        AppState::new(self.config.clone(), self.database.clone(), self.services.clone())
    }

    pub fn router(&self) -> Router {
        WebServer::create_router(self.state())
    }

    pub fn image_files(&self) -> Vec<String> {
        list_files(&self.config.storage.image_dir)
    }

    /// Finished cache files; in-flight temporaries are skipped.
    pub fn cache_files(&self) -> Vec<String> {
        list_files(&self.config.storage.cache_dir)
            .into_iter()
            .filter(|name| !name.starts_with('.'))
            .collect()
    }
}

/// Raster codec whose renders take at least `delay`.
pub struct SlowCodec {
    pub delay: Duration,
}

impl ImageCodec for SlowCodec {
    fn probe(&self, bytes: &[u8]) -> CodecResult<ProbedImage> {
        RasterCodec.probe(bytes)
    }

    fn render(&self, source: &[u8], plan: &CropPlan, options: &EncodeOptions) -> CodecResult<Vec<u8>> {
        std::thread::sleep(self.delay);
        RasterCodec.render(source, plan, options)
    }
}

pub fn list_files(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();
    names
}

/// Gradient test image encoded as `format`.
pub fn sample_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 90u8])
    });
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut cursor, format)
        .unwrap();
    cursor.into_inner()
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    sample_image(width, height, ImageFormat::Png)
}

pub fn key(identifier: &str) -> LinkKey {
    LinkKey::new("article", "1001", identifier)
}

pub fn upload(identifier: &str, width: u32, height: u32) -> UpsertRequest {
    UpsertRequest::new(key(identifier)).with_file("photo.png", png(width, height))
}

pub fn focus(x: f64, y: f64) -> ImageMetadata {
    ImageMetadata {
        focus_x: Some(x),
        focus_y: Some(y),
        ..ImageMetadata::default()
    }
}
