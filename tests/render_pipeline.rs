mod common;

use chrono::Duration;
use image::ImageFormat;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use common::{focus, key, sample_image, upload, SlowCodec, TestEnv};
use pluto_images::{
    database::UnitOfWork,
    errors::AppError,
    imaging::{receipt, AspectRatio, FitMode, OutputType, RenderParameterSet},
    models::{LinkKey, UpsertRequest},
    services::{CacheValidator, RenderResponse, RenderedImage},
};

async fn seed(env: &TestEnv, width: u32, height: u32) -> i64 {
    env.services
        .assets
        .upsert(upload("hero", width, height), &UnitOfWork::new(), &CancellationToken::new())
        .await
        .unwrap()
        .image_id
}

fn expect_image(response: RenderResponse) -> RenderedImage {
    match response {
        RenderResponse::Image(image) => image,
        other => panic!("expected image, got {other:?}"),
    }
}

fn dimensions(bytes: &[u8]) -> (u32, u32) {
    let decoded = image::load_from_memory(bytes).unwrap();
    (decoded.width(), decoded.height())
}

#[tokio::test]
async fn test_cover_scenario_renders_centred_square() {
    let env = TestEnv::new().await;
    let image_id = seed(&env, 800, 600).await;

    let params = RenderParameterSet {
        fit: Some(FitMode::Cover),
        width: Some(400),
        height: Some(400),
        ..RenderParameterSet::default()
    };

    let image = env.services.assets.find_image(image_id).await.unwrap().unwrap();
    let plan = env.services.render.plan(&image, &params).unwrap();
    assert_eq!((plan.crop.x, plan.crop.y), (100, 0));
    assert_eq!((plan.crop.width, plan.crop.height), (600, 600));

    let rendered = expect_image(
        env.services
            .render
            .render(image_id, &params, &CacheValidator::default())
            .await
            .unwrap(),
    );
    assert!(!rendered.from_cache);
    assert_eq!(rendered.output_type, OutputType::Png);
    assert_eq!(dimensions(&rendered.bytes), (400, 400));
    assert_eq!(rendered.receipt, receipt::encode(image_id, &params));
}

#[tokio::test]
async fn test_miss_then_hit_then_not_modified() {
    let env = TestEnv::new().await;
    let image_id = seed(&env, 120, 80).await;
    let params = RenderParameterSet {
        width: Some(60),
        ..RenderParameterSet::default()
    };

    let miss = expect_image(
        env.services
            .render
            .render(image_id, &params, &CacheValidator::default())
            .await
            .unwrap(),
    );
    assert!(!miss.from_cache);
    assert_eq!(dimensions(&miss.bytes), (60, 40));
    let etag = miss.etag.clone().unwrap();
    let modified = miss.last_modified.unwrap();

    let hit = expect_image(
        env.services
            .render
            .render(image_id, &params, &CacheValidator::default())
            .await
            .unwrap(),
    );
    assert!(hit.from_cache);
    assert_eq!(hit.bytes, miss.bytes);
    assert_eq!(hit.etag.as_deref(), Some(etag.as_str()));

    let by_tag = env
        .services
        .render
        .render(
            image_id,
            &params,
            &CacheValidator {
                if_none_match: Some(etag.clone()),
                if_modified_since: None,
            },
        )
        .await
        .unwrap();
    assert!(matches!(by_tag, RenderResponse::NotModified { .. }));

    let by_date = env
        .services
        .render
        .render(
            image_id,
            &params,
            &CacheValidator {
                if_none_match: None,
                if_modified_since: Some(modified + Duration::seconds(5)),
            },
        )
        .await
        .unwrap();
    assert!(matches!(by_date, RenderResponse::NotModified { .. }));

    let stale_date = env
        .services
        .render
        .render(
            image_id,
            &params,
            &CacheValidator {
                if_none_match: None,
                if_modified_since: Some(modified - Duration::days(1)),
            },
        )
        .await
        .unwrap();
    assert!(expect_image(stale_date).from_cache);
}

#[tokio::test]
async fn test_output_type_defaults_to_source_format() {
    let env = TestEnv::new().await;
    let outcome = env
        .services
        .assets
        .upsert(
            UpsertRequest::new(LinkKey::new("gallery", "9", "shot"))
                .with_file("shot.jpg", sample_image(64, 48, ImageFormat::Jpeg)),
            &UnitOfWork::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let rendered = expect_image(
        env.services
            .render
            .render(outcome.image_id, &RenderParameterSet::default(), &CacheValidator::default())
            .await
            .unwrap(),
    );
    assert_eq!(rendered.output_type, OutputType::Jpg);
    assert!(rendered.file_name().ends_with(".jpg"));
    assert_eq!(image::guess_format(&rendered.bytes).unwrap(), ImageFormat::Jpeg);

    let as_webp = expect_image(
        env.services
            .render
            .render(
                outcome.image_id,
                &RenderParameterSet {
                    output_type: Some(OutputType::Webp),
                    ..RenderParameterSet::default()
                },
                &CacheValidator::default(),
            )
            .await
            .unwrap(),
    );
    assert_eq!(image::guess_format(&as_webp.bytes).unwrap(), ImageFormat::WebP);
}

#[tokio::test]
async fn test_ratio_with_width_derives_height() {
    let env = TestEnv::new().await;
    let image_id = seed(&env, 900, 900).await;

    let params = RenderParameterSet {
        fit: Some(FitMode::Cover),
        width: Some(300),
        ratio: Some(AspectRatio::parse("3:2").unwrap()),
        ..RenderParameterSet::default()
    };
    let rendered = expect_image(
        env.services
            .render
            .render(image_id, &params, &CacheValidator::default())
            .await
            .unwrap(),
    );
    assert_eq!(dimensions(&rendered.bytes), (300, 200));
}

#[tokio::test]
async fn test_unknown_image_is_not_found() {
    let env = TestEnv::new().await;
    let err = env
        .services
        .render
        .render(404, &RenderParameterSet::default(), &CacheValidator::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));
}

#[tokio::test]
async fn test_invalidate_all_then_lookup_misses() {
    let env = TestEnv::new().await;
    let image_id = seed(&env, 50, 50).await;

    let mut receipts = Vec::new();
    for width in [10u16, 20, 30] {
        let params = RenderParameterSet {
            width: Some(width),
            ..RenderParameterSet::default()
        };
        let rendered = expect_image(
            env.services
                .render
                .render(image_id, &params, &CacheValidator::default())
                .await
                .unwrap(),
        );
        receipts.push(rendered.receipt);
    }
    assert_eq!(env.services.cache.entries_for_image(image_id).await.unwrap().len(), 3);

    let report = env.services.cache.invalidate_all(image_id).await.unwrap();
    assert_eq!(report.rows_removed, 3);
    assert_eq!(report.files_removed, 3);
    assert!(report.errors.is_empty());

    for receipt in &receipts {
        assert!(env.services.cache.lookup(receipt).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_missing_cache_file_is_rerendered() {
    let env = TestEnv::new().await;
    let image_id = seed(&env, 50, 50).await;
    let params = RenderParameterSet {
        height: Some(25),
        ..RenderParameterSet::default()
    };

    let first = expect_image(
        env.services
            .render
            .render(image_id, &params, &CacheValidator::default())
            .await
            .unwrap(),
    );
    std::fs::remove_file(env.config.storage.cache_dir.join(first.file_name())).unwrap();

    assert!(env.services.cache.lookup(&first.receipt).await.unwrap().is_none());
    let again = expect_image(
        env.services
            .render
            .render(image_id, &params, &CacheValidator::default())
            .await
            .unwrap(),
    );
    assert!(!again.from_cache);
    assert_eq!(env.cache_files(), vec![first.file_name()]);
}

#[tokio::test]
async fn test_concurrent_misses_produce_one_entry() {
    let env = TestEnv::new().await;
    let image_id = seed(&env, 200, 200).await;
    let params = RenderParameterSet {
        fit: Some(FitMode::Cover),
        width: Some(50),
        height: Some(80),
        ..RenderParameterSet::default()
    };

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let render = env.services.render.clone();
            tokio::spawn(async move {
                render
                    .render(image_id, &params, &CacheValidator::default())
                    .await
                    .map(expect_image)
            })
        })
        .collect();

    let mut rendered_fresh = 0;
    for task in tasks {
        let image = task.await.unwrap().unwrap();
        assert_eq!(dimensions(&image.bytes), (50, 80));
        if !image.from_cache {
            rendered_fresh += 1;
        }
    }

    assert_eq!(rendered_fresh, 1);
    assert_eq!(env.services.cache.entries_for_image(image_id).await.unwrap().len(), 1);
    assert_eq!(env.cache_files().len(), 1);
}

#[tokio::test]
async fn test_output_beyond_limit_is_rejected() {
    let env = TestEnv::with_config(|config| config.render.max_dimension = 100).await;
    let image_id = seed(&env, 800, 800).await;

    // 100 wide at 1:4 from a 200x800 crop needs a 400 pixel tall output
    let params = RenderParameterSet {
        fit: Some(FitMode::Cover),
        width: Some(100),
        ratio: AspectRatio::new(0.25),
        ..RenderParameterSet::default()
    };
    let err = env
        .services
        .render
        .render(image_id, &params, &CacheValidator::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_render_overtaken_by_focus_change_is_not_cached() {
    let env = TestEnv::with_codec(Arc::new(SlowCodec {
        delay: std::time::Duration::from_millis(400),
    }))
    .await;
    let image_id = seed(&env, 200, 100).await;
    let params = RenderParameterSet {
        fit: Some(FitMode::Cover),
        width: Some(100),
        height: Some(100),
        ..RenderParameterSet::default()
    };

    let render = env.services.render.clone();
    let in_flight = tokio::spawn(async move {
        render
            .render(image_id, &params, &CacheValidator::default())
            .await
    });
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let moved = env
        .services
        .assets
        .upsert(
            UpsertRequest::new(key("hero")).with_metadata(focus(0.0, 0.0)),
            &UnitOfWork::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    // Rendered from the old focus: served once, never indexed
    let stale = expect_image(in_flight.await.unwrap().unwrap());
    assert!(!stale.from_cache);
    assert!(stale.etag.is_none());
    assert!(env.services.cache.lookup(&stale.receipt).await.unwrap().is_none());
    assert!(env.cache_files().is_empty());

    let plan = env.services.render.plan(&moved.image, &params).unwrap();
    assert_eq!((plan.crop.x, plan.crop.y), (0, 0));
    let fresh = expect_image(
        env.services
            .render
            .render(image_id, &params, &CacheValidator::default())
            .await
            .unwrap(),
    );
    assert!(fresh.etag.is_some());
    assert_eq!(env.cache_files(), vec![fresh.file_name()]);
}
