//! 学習用バッチの供給
//!
//! マニフェストを読み込み、バッチ単位で画像を遅延読み込みしてテンソル化します。
//! 画像はバッチ取得時にだけ読み込み、エポック間ではインデックス順のみ並べ替えます。

use burn::{
    data::dataset::Dataset,
    tensor::{backend::Backend, Tensor},
};
use image::imageops::{self, FilterType};
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::Path;

use crate::dataset::manifest::load_manifest;
use crate::dataset::preprocess::{open_image, to_unit_pixels};
use crate::error::PipelineResult;
use crate::types::{DatasetEntry, NUM_MEASUREMENTS};

/// マニフェスト1本分のデータセット
#[derive(Debug, Clone)]
pub struct GarmentDataset {
    entries: Vec<DatasetEntry>,
}

impl GarmentDataset {
    /// マニフェストから読み込む（エントリは読み込み時に検証済み）
    pub fn from_manifest(path: &Path) -> PipelineResult<Self> {
        Ok(Self {
            entries: load_manifest(path)?,
        })
    }

    pub fn from_entries(entries: Vec<DatasetEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[DatasetEntry] {
        &self.entries
    }
}

impl Dataset<DatasetEntry> for GarmentDataset {
    fn get(&self, index: usize) -> Option<DatasetEntry> {
        self.entries.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct GarmentBatch<B: Backend> {
    /// [batch_size, H, W, 3]（値域 [0, 1]）
    pub images: Tensor<B, 4>,
    /// [batch_size, 5]
    pub targets: Tensor<B, 2>,
}

/// エポックごとに並べ替えるバッチ列
pub struct BatchSequence {
    dataset: GarmentDataset,
    batch_size: usize,
    image_size: u32,
    order: Vec<usize>,
}

impl BatchSequence {
    pub fn new(dataset: GarmentDataset, batch_size: usize, image_size: u32) -> Self {
        let order = (0..dataset.len()).collect();
        Self {
            dataset,
            batch_size: batch_size.max(1),
            image_size,
            order,
        }
    }

    /// バッチ数 ceil(M / B)
    pub fn len(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// i番目のバッチに含まれるデータセット上のインデックス（最後のバッチは短くなり得る）
    pub fn batch_indices(&self, index: usize) -> &[usize] {
        let start = (index * self.batch_size).min(self.order.len());
        let end = (start + self.batch_size).min(self.order.len());
        &self.order[start..end]
    }

    /// i番目のバッチを読み込んでテンソル化
    pub fn get<B: Backend>(&self, index: usize, device: &B::Device) -> PipelineResult<GarmentBatch<B>> {
        let indices = self.batch_indices(index);
        let batch_size = indices.len();
        let size = self.image_size;

        let mut pixels = Vec::with_capacity(batch_size * (size * size) as usize * 3);
        let mut targets = Vec::with_capacity(batch_size * NUM_MEASUREMENTS);

        for &i in indices {
            let entry = &self.dataset.entries[i];
            let mut rgb = open_image(&entry.image_path)?.to_rgb8();
            if rgb.dimensions() != (size, size) {
                rgb = imageops::resize(&rgb, size, size, FilterType::Nearest);
            }
            pixels.extend(to_unit_pixels(&rgb));
            targets.extend(entry.measurements.to_array().map(|v| v as f32));
        }

        let size = size as usize;
        let images = Tensor::<B, 1>::from_floats(pixels.as_slice(), device)
            .reshape([batch_size, size, size, 3]);
        let targets = Tensor::<B, 1>::from_floats(targets.as_slice(), device)
            .reshape([batch_size, NUM_MEASUREMENTS]);

        Ok(GarmentBatch { images, targets })
    }

    /// エポック終了時にインデックス順をシャッフル
    pub fn on_epoch_end<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.order.shuffle(rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::manifest::write_manifest;
    use crate::types::Measurements;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;
    use std::path::PathBuf;

    type TestBackend = NdArray<f32>;

    fn write_images(dir: &Path, count: usize, size: u32) -> Vec<DatasetEntry> {
        (0..count)
            .map(|i| {
                let path = dir.join(format!("item_{}.jpg", i));
                RgbImage::from_pixel(size, size, Rgb([255, 255, 255]))
                    .save(&path)
                    .unwrap();
                DatasetEntry {
                    image_path: path,
                    measurements: Measurements::from_array([
                        50.0 + i as f64,
                        40.0,
                        70.0,
                        60.0,
                        45.0,
                    ]),
                }
            })
            .collect()
    }

    #[test]
    fn test_batch_count_and_last_batch() {
        let dataset = GarmentDataset::from_entries(vec![
            DatasetEntry {
                image_path: PathBuf::from("x.jpg"),
                measurements: Measurements::from_array([1.0; 5]),
            };
            70
        ]);
        let sequence = BatchSequence::new(dataset, 32, 224);

        assert_eq!(sequence.len(), 3);
        assert_eq!(sequence.batch_indices(0).len(), 32);
        assert_eq!(sequence.batch_indices(2).len(), 6);
        assert!(sequence.batch_indices(3).is_empty());
    }

    #[test]
    fn test_exact_multiple_has_full_last_batch() {
        let dataset = GarmentDataset::from_entries(vec![
            DatasetEntry {
                image_path: PathBuf::from("x.jpg"),
                measurements: Measurements::from_array([1.0; 5]),
            };
            64
        ]);
        let sequence = BatchSequence::new(dataset, 32, 224);

        assert_eq!(sequence.len(), 2);
        assert_eq!(sequence.batch_indices(0).len(), 32);
        assert_eq!(sequence.batch_indices(1).len(), 32);
        assert!(sequence.batch_indices(2).is_empty());
    }

    #[test]
    fn test_empty_dataset_has_no_batches() {
        let sequence = BatchSequence::new(GarmentDataset::from_entries(Vec::new()), 8, 224);
        assert!(sequence.is_empty());
        assert_eq!(sequence.len(), 0);
    }

    #[test]
    fn test_each_index_once_per_epoch() {
        let dataset = GarmentDataset::from_entries(vec![
            DatasetEntry {
                image_path: PathBuf::from("x.jpg"),
                measurements: Measurements::from_array([1.0; 5]),
            };
            23
        ]);
        let mut sequence = BatchSequence::new(dataset, 5, 224);
        let mut rng = StdRng::seed_from_u64(9);

        for _ in 0..3 {
            let mut seen = HashSet::new();
            for i in 0..sequence.len() {
                for &index in sequence.batch_indices(i) {
                    assert!(seen.insert(index));
                }
            }
            assert_eq!(seen.len(), 23);
            sequence.on_epoch_end(&mut rng);
        }
    }

    #[test]
    fn test_get_materializes_tensors() {
        let dir = tempfile::tempdir().unwrap();
        let entries = write_images(dir.path(), 3, 16);
        let manifest = dir.path().join("train_dataset.json");
        write_manifest(&manifest, &entries).unwrap();

        let dataset = GarmentDataset::from_manifest(&manifest).unwrap();
        let sequence = BatchSequence::new(dataset, 2, 8);
        let device = Default::default();

        let first = sequence.get::<TestBackend>(0, &device).unwrap();
        assert_eq!(first.images.dims(), [2, 8, 8, 3]);
        assert_eq!(first.targets.dims(), [2, NUM_MEASUREMENTS]);

        let pixels = first.images.into_data().to_vec::<f32>().unwrap();
        assert!(pixels.iter().all(|p| (0.0..=1.0).contains(p)));
        assert!(pixels.iter().all(|p| *p > 0.9));

        let targets = first.targets.into_data().to_vec::<f32>().unwrap();
        assert_eq!(&targets[..5], &[50.0, 40.0, 70.0, 60.0, 45.0]);
        assert_eq!(targets[5], 51.0);

        let last = sequence.get::<TestBackend>(1, &device).unwrap();
        assert_eq!(last.images.dims(), [1, 8, 8, 3]);
    }

    #[test]
    fn test_missing_image_is_error() {
        let dataset = GarmentDataset::from_entries(vec![DatasetEntry {
            image_path: PathBuf::from("no/such/image.jpg"),
            measurements: Measurements::from_array([1.0; 5]),
        }]);
        let sequence = BatchSequence::new(dataset, 4, 8);
        assert!(sequence.get::<TestBackend>(0, &Default::default()).is_err());
    }
}
