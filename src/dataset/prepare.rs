//! データセット準備
//!
//! 元画像と採寸テーブルを突き合わせ、画像を正規化して train/val/test に分割し、
//! 分割ごとのマニフェストを書き出します。
//!
//! ```text
//! data/garments/
//!   ├── raw/                 元画像 (*.jpg, *.jpeg, *.png)
//!   ├── measurements.json    識別子 → 採寸値
//!   ├── train/ val/ test/    正規化済み画像（出力）
//!   └── {split}_dataset.json マニフェスト（出力）
//! ```

use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::dataset::manifest::write_manifest;
use crate::dataset::measurements::load_measurement_table;
use crate::dataset::preprocess::process_image;
use crate::dataset::split::{make_rng, partition, SplitCounts, SplitRatios};
use crate::error::{PipelineError, PipelineResult};
use crate::model::config::DataSettings;
use crate::types::{DatasetEntry, Measurements, Split};

/// 対応する画像拡張子
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// 準備結果のサマリー
#[derive(Debug, Clone, Serialize)]
pub struct PreparationSummary {
    /// 各分割の件数
    pub counts: SplitCounts,
    /// 採寸データが無く除外された識別子
    pub skipped: Vec<String>,
    /// 書き出したマニフェスト
    pub manifests: Vec<PathBuf>,
}

/// train/val/test の出力ディレクトリを作成（既存の内容には触れない）
pub fn create_dataset_structure(settings: &DataSettings) -> PipelineResult<()> {
    for split in Split::ALL {
        fs::create_dir_all(settings.split_dir(split))?;
    }
    Ok(())
}

/// 対応拡張子の画像か（大文字小文字は区別しない）
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// 画像の識別子（拡張子を除いたファイル名）
pub fn image_id(path: &Path) -> Option<String> {
    path.file_stem().map(|stem| stem.to_string_lossy().into_owned())
}

/// 元画像ディレクトリ内の画像ファイル一覧（ファイル名順）
pub fn collect_image_files(raw_dir: &Path) -> PipelineResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(raw_dir)? {
        let path = entry?.path();
        if path.is_file() && is_supported_image(&path) {
            files.push(path);
        }
    }
    // シード指定時に分割を再現できるよう順序を固定
    files.sort();
    Ok(files)
}

/// データセットを準備する
pub fn prepare_dataset(settings: &DataSettings) -> PipelineResult<PreparationSummary> {
    let raw_dir = settings.raw_dir();
    if !raw_dir.is_dir() {
        return Err(PipelineError::MissingInput {
            what: "元画像ディレクトリ",
            path: raw_dir,
        });
    }

    let table = load_measurement_table(&settings.measurements_path())?;
    info!("採寸テーブルを読み込みました: {} 件", table.len());

    create_dataset_structure(settings)?;

    let mut matched: Vec<(PathBuf, Measurements)> = Vec::new();
    let mut skipped = Vec::new();
    let mut seen = HashSet::new();
    for path in collect_image_files(&raw_dir)? {
        let Some(id) = image_id(&path) else {
            continue;
        };
        match table.lookup(&id)? {
            Some(measurements) => {
                if !seen.insert(id.clone()) {
                    warn!(
                        "同じ識別子の画像が複数あります（両方をデータセットに含めます）: {}",
                        path.display()
                    );
                }
                matched.push((path, measurements));
            }
            None => {
                warn!("採寸データが見つかりません: {}", id);
                skipped.push(id);
            }
        }
    }

    if matched.is_empty() {
        warn!("採寸データと一致する画像がありません: {}", raw_dir.display());
    }

    let ratios = SplitRatios {
        train: settings.train_ratio,
        val: settings.val_ratio,
    };
    let mut rng = make_rng(settings.seed);
    let parts = partition(matched, ratios, &mut rng);

    let mut manifests = Vec::with_capacity(Split::ALL.len());
    for split in Split::ALL {
        let split_dir = settings.split_dir(split);
        let mut entries = Vec::with_capacity(parts.get(split).len());

        for (src, measurements) in parts.get(split) {
            let file_name = src.file_name().ok_or_else(|| PipelineError::MissingInput {
                what: "画像ファイル名",
                path: src.clone(),
            })?;
            let dst = split_dir.join(file_name);
            process_image(src, &dst, settings.target_size, settings.jpeg_quality)?;

            entries.push(DatasetEntry {
                image_path: dst,
                measurements: *measurements,
            });
        }

        let manifest_path = settings.manifest_path(split);
        write_manifest(&manifest_path, &entries)?;
        info!(
            "{}: {} 件 → {}",
            split,
            entries.len(),
            manifest_path.display()
        );
        manifests.push(manifest_path);
    }

    Ok(PreparationSummary {
        counts: parts.counts(),
        skipped,
        manifests,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::manifest::load_manifest;
    use crate::dataset::preprocess::open_image;
    use image::{Rgb, RgbImage};

    /// raw/ に画像を `count` 枚、measurements.json に先頭 `measured` 件分を書き出す
    fn fixture(count: usize, measured: usize, seed: Option<u64>) -> (tempfile::TempDir, DataSettings) {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("garments");
        let raw = base.join("raw");
        fs::create_dir_all(&raw).unwrap();

        let mut table = serde_json::Map::new();
        for i in 0..count {
            let id = format!("garment_{:02}", i);
            let ext = if i % 2 == 0 { "png" } else { "jpg" };
            let (w, h) = (40 + 13 * i as u32, 300 - 11 * i as u32);
            RgbImage::from_pixel(w, h, Rgb([i as u8 * 20, 80, 160]))
                .save(raw.join(format!("{}.{}", id, ext)))
                .unwrap();

            if i < measured {
                table.insert(
                    id,
                    serde_json::json!({
                        "chest": 50.0 + i as f64,
                        "shoulders": 40.0,
                        "length": 70.0,
                        "sleeves": 60.0,
                        "waist": 45.0
                    }),
                );
            }
        }
        // 対象外のファイルは無視される
        fs::write(raw.join("notes.txt"), "not an image").unwrap();
        fs::write(
            base.join("measurements.json"),
            serde_json::Value::Object(table).to_string(),
        )
        .unwrap();

        let settings = DataSettings {
            base_dir: base,
            seed,
            ..DataSettings::default()
        };
        (dir, settings)
    }

    fn manifest_ids(settings: &DataSettings, split: Split) -> Vec<String> {
        load_manifest(&settings.manifest_path(split))
            .unwrap()
            .iter()
            .map(|e| image_id(&e.image_path).unwrap())
            .collect()
    }

    #[test]
    fn test_prepare_end_to_end_counts_and_skips() {
        let (_dir, settings) = fixture(10, 8, Some(3));
        let summary = prepare_dataset(&settings).unwrap();

        assert_eq!(summary.counts, SplitCounts { train: 5, val: 1, test: 2 });
        assert_eq!(summary.skipped, vec!["garment_08", "garment_09"]);
        assert_eq!(summary.manifests.len(), 3);

        let mut seen = HashSet::new();
        for split in Split::ALL {
            let entries = load_manifest(&settings.manifest_path(split)).unwrap();
            assert_eq!(entries.len(), summary.counts.get(split));
            for entry in entries {
                assert!(entry.image_path.starts_with(settings.split_dir(split)));
                let image = open_image(&entry.image_path).unwrap();
                assert_eq!((image.width(), image.height()), (224, 224));
                assert_eq!(image.color().channel_count(), 3);
                assert!(seen.insert(image_id(&entry.image_path).unwrap()));
            }
        }

        let expected: HashSet<String> = (0..8).map(|i| format!("garment_{:02}", i)).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_prepare_carries_measurements_through() {
        let (_dir, settings) = fixture(4, 4, Some(11));
        prepare_dataset(&settings).unwrap();

        for split in Split::ALL {
            for entry in load_manifest(&settings.manifest_path(split)).unwrap() {
                let id = image_id(&entry.image_path).unwrap();
                let index: f64 = id.trim_start_matches("garment_").parse().unwrap();
                assert_eq!(entry.measurements.chest, 50.0 + index);
            }
        }
    }

    #[test]
    fn test_prepare_is_reproducible_with_seed() {
        let (_a, first) = fixture(12, 12, Some(42));
        let (_b, second) = fixture(12, 12, Some(42));
        prepare_dataset(&first).unwrap();
        prepare_dataset(&second).unwrap();

        for split in Split::ALL {
            assert_eq!(manifest_ids(&first, split), manifest_ids(&second, split));
        }
    }

    #[test]
    fn test_missing_measurement_table_aborts_before_processing() {
        let (_dir, settings) = fixture(3, 3, None);
        fs::remove_file(settings.measurements_path()).unwrap();

        let err = prepare_dataset(&settings).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput { .. }));
        assert!(!settings.split_dir(Split::Train).exists());
        assert!(!settings.manifest_path(Split::Train).exists());
    }

    #[test]
    fn test_unused_invalid_record_does_not_abort() {
        let (_dir, settings) = fixture(3, 3, Some(1));
        let mut table: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&fs::read_to_string(settings.measurements_path()).unwrap()).unwrap();
        table.insert(
            "ghost".to_string(),
            serde_json::json!({"chest": 50, "shoulders": 40, "length": 70, "sleeves": 60, "waist": 0}),
        );
        fs::write(
            settings.measurements_path(),
            serde_json::Value::Object(table).to_string(),
        )
        .unwrap();

        let summary = prepare_dataset(&settings).unwrap();
        assert_eq!(summary.counts.total(), 3);
        assert!(summary.skipped.is_empty());
    }

    #[test]
    fn test_invalid_record_for_present_image_aborts() {
        let (_dir, settings) = fixture(2, 2, None);
        fs::write(
            settings.measurements_path(),
            r#"{"garment_00": {"chest": 50, "shoulders": 40, "length": 70, "sleeves": 60, "waist": 0},
                "garment_01": {"chest": 50, "shoulders": 40, "length": 70, "sleeves": 60, "waist": 45}}"#,
        )
        .unwrap();

        match prepare_dataset(&settings) {
            Err(PipelineError::InvalidMeasurement { id, .. }) => assert_eq!(id, "garment_00"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_identifier_keeps_both_images() {
        let (_dir, settings) = fixture(2, 2, None);
        RgbImage::from_pixel(30, 60, Rgb([10, 10, 10]))
            .save(settings.raw_dir().join("garment_00.jpg"))
            .unwrap();

        let summary = prepare_dataset(&settings).unwrap();
        assert_eq!(summary.counts.total(), 3);
    }

    #[test]
    fn test_missing_raw_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let settings = DataSettings {
            base_dir: dir.path().join("garments"),
            ..DataSettings::default()
        };
        assert!(matches!(
            prepare_dataset(&settings),
            Err(PipelineError::MissingInput { .. })
        ));
    }

    #[test]
    fn test_corrupt_image_aborts_run() {
        let (_dir, settings) = fixture(2, 2, None);
        fs::write(settings.raw_dir().join("garment_00.png"), b"garbage").unwrap();
        assert!(prepare_dataset(&settings).is_err());
    }

    #[test]
    fn test_create_dataset_structure_is_idempotent() {
        let (_dir, settings) = fixture(1, 1, None);
        create_dataset_structure(&settings).unwrap();
        let marker = settings.split_dir(Split::Val).join("keep.jpg");
        fs::write(&marker, b"x").unwrap();

        create_dataset_structure(&settings).unwrap();
        assert!(marker.exists());
    }

    #[test]
    fn test_supported_extensions() {
        assert!(is_supported_image(Path::new("a/b.JPG")));
        assert!(is_supported_image(Path::new("b.jpeg")));
        assert!(is_supported_image(Path::new("c.png")));
        assert!(!is_supported_image(Path::new("d.gif")));
        assert!(!is_supported_image(Path::new("noext")));
        assert_eq!(image_id(Path::new("raw/shirt.v2.jpg")).as_deref(), Some("shirt.v2"));
    }
}
