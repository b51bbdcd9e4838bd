//! モデル推論機能

use anyhow::{Context, Result};
use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, NamedMpkBytesRecorder, Recorder},
    tensor::{backend::Backend, Tensor},
};
use std::fs;
use std::path::Path;

use crate::dataset::preprocess::{letterbox, open_image, to_unit_pixels};
use crate::ml::export::model_config_from_metadata;
use crate::ml::ml_model::GarmentRegressor;
use crate::model::model_metadata::ModelMetadata;
use crate::model::model_storage::{load_model_with_metadata, load_web_manifest, WEB_WEIGHTS_FILE};
use crate::types::{Measurements, NUM_MEASUREMENTS};

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: GarmentRegressor<B>,
    metadata: ModelMetadata,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// tar.gz のモデルを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(model_path: P, device: B::Device) -> Result<Self> {
        let (metadata, model_binary) = load_model_with_metadata(model_path.as_ref())?;
        let model = model_config_from_metadata(&metadata)?.init::<B>(&device);

        let record = NamedMpkBytesRecorder::<FullPrecisionSettings>::default()
            .load(model_binary, &device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;

        Ok(Self {
            model: model.load_record(record),
            metadata,
            device,
        })
    }

    /// Web形式の書き出し先ディレクトリから読み込む
    pub fn load_web_export<P: AsRef<Path>>(export_dir: P, device: B::Device) -> Result<Self> {
        let manifest = load_web_manifest(export_dir.as_ref())?;
        let weights_path = export_dir.as_ref().join(WEB_WEIGHTS_FILE);
        let weights = fs::read(&weights_path).context(format!("Failed to read {:?}", weights_path))?;

        let model = model_config_from_metadata(&manifest.metadata)?.init::<B>(&device);
        let record = BinBytesRecorder::<FullPrecisionSettings>::default()
            .load(weights, &device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;

        Ok(Self {
            model: model.load_record(record),
            metadata: manifest.metadata,
            device,
        })
    }

    /// 画像を学習データと同じ手順でテンソル用の画素列にする
    fn load_pixels(&self, image_path: &Path) -> Result<Vec<f32>> {
        let image = open_image(image_path)?;
        Ok(to_unit_pixels(&letterbox(&image, self.metadata.input_size)))
    }

    /// 単一画像の採寸値を推定
    pub fn predict_image<P: AsRef<Path>>(&self, image_path: P) -> Result<Measurements> {
        let mut results = self.predict_batch(&[image_path])?;
        results
            .pop()
            .ok_or_else(|| anyhow::anyhow!("推論結果が空です"))
    }

    /// 複数画像をまとめて推定
    pub fn predict_batch(&self, image_paths: &[impl AsRef<Path>]) -> Result<Vec<Measurements>> {
        if image_paths.is_empty() {
            return Ok(Vec::new());
        }

        let size = self.metadata.input_size as usize;
        let mut pixels = Vec::with_capacity(image_paths.len() * size * size * 3);
        for path in image_paths {
            pixels.extend(self.load_pixels(path.as_ref())?);
        }

        let images = Tensor::<B, 1>::from_floats(pixels.as_slice(), &self.device)
            .reshape([image_paths.len(), size, size, 3]);
        let values = self
            .model
            .forward(images)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))?;

        Ok(values
            .chunks_exact(NUM_MEASUREMENTS)
            .map(|row| {
                let mut array = [0.0; NUM_MEASUREMENTS];
                for (dst, src) in array.iter_mut().zip(row) {
                    *dst = *src as f64;
                }
                Measurements::from_array(array)
            })
            .collect())
    }

    /// 学習時のメタデータ
    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}
