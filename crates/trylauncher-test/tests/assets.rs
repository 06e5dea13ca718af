//! Texture loading through the asset cache.

use image::{Rgba, RgbaImage};
use tempfile::TempDir;
use trylauncher_app::{AssetError, AssetManager, MipPolicy};
use trylauncher_gpu::TEXTURE_FORMAT;
use trylauncher_test::Harness;

fn asset_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let image = RgbaImage::from_fn(16, 8, |x, y| {
        if (x + y) % 2 == 0 {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([0, 0, 0, 255])
        }
    });
    image.save(dir.path().join("checker.png")).unwrap();
    std::fs::write(dir.path().join("broken.png"), b"not a png").unwrap();
    dir
}

#[test]
fn textures_are_decoded_uploaded_and_cached() {
    let dir = asset_dir();
    let mut h = Harness::new();
    let mut transfer = h.transfer().unwrap();
    let mut assets = AssetManager::new(dir.path());

    let texture = assets
        .load_texture(&mut h.resources, &mut transfer, "checker.png")
        .unwrap();
    assert_eq!(texture.extent().width, 16);
    assert_eq!(texture.extent().height, 8);
    assert_eq!(texture.format(), TEXTURE_FORMAT);
    assert_eq!(texture.mip_levels(), 5);
    let handle = texture.handle();

    let submissions = h.device.submissions().len();
    let cached = assets
        .load_texture(&mut h.resources, &mut transfer, "checker.png")
        .unwrap();
    assert_eq!(cached.handle(), handle);
    assert_eq!(h.device.submissions().len(), submissions, "no second upload");

    assert_eq!(assets.len(), 1);
    assert_eq!(h.resources.allocation_count(), 1);
    assert_eq!(assets.memory_usage(), 16 * 8 * 4);

    assert!(assets.unload(&mut h.resources, "checker.png"));
    assert!(!assets.unload(&mut h.resources, "checker.png"));
    assert_eq!(assets.memory_usage(), 0);

    drop(transfer);
    h.check_clean().unwrap();
}

#[test]
fn mip_policy_none_uploads_the_base_level() {
    let dir = asset_dir();
    let mut h = Harness::new();
    let mut transfer = h.transfer().unwrap();
    let mut assets = AssetManager::new(dir.path()).with_mips(MipPolicy::None);

    let texture = assets
        .load_texture(&mut h.resources, &mut transfer, "checker.png")
        .unwrap();
    assert_eq!(texture.mip_levels(), 1);

    assets.unload_all(&mut h.resources);
    assert!(assets.is_empty());
}

#[test]
fn missing_and_corrupt_files_are_reported() {
    let dir = asset_dir();
    let mut h = Harness::new();
    let mut transfer = h.transfer().unwrap();
    let mut assets = AssetManager::new(dir.path());

    let missing = assets.load_texture(&mut h.resources, &mut transfer, "nope.png");
    assert!(matches!(missing, Err(AssetError::NotFound(_))));

    let broken = assets.load_texture(&mut h.resources, &mut transfer, "broken.png");
    assert!(matches!(broken, Err(AssetError::Decode { .. })));

    assert!(assets.is_empty());
    assert_eq!(h.allocator.live_count(), 0);
    assert!(h.device.submissions().is_empty());
}
