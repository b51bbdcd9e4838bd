//! 学習済みモデルの書き出し
//!
//! - ネイティブ形式: metadata.json + model.mpk を tar.gz に格納
//! - Web形式: model.json + weights.bin をディレクトリに展開

use anyhow::{Context, Result};
use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, NamedMpkBytesRecorder, Recorder},
    tensor::backend::Backend,
};
use std::path::PathBuf;
use tracing::info;

use crate::error::{PipelineError, PipelineResult};
use crate::ml::ml_model::{GarmentRegressor, ModelConfig};
use crate::model::config::OutputSettings;
use crate::model::model_metadata::ModelMetadata;
use crate::model::model_storage::{save_model_with_metadata, save_web_export};
use crate::types::NUM_MEASUREMENTS;

/// 書き出し先
#[derive(Debug, Clone)]
pub struct ExportedModel {
    pub archive: PathBuf,
    pub web_dir: PathBuf,
}

/// NamedMpk 形式のバイト列に変換（ネイティブ形式）
pub fn to_native_bytes<B: Backend>(model: &GarmentRegressor<B>) -> PipelineResult<Vec<u8>> {
    NamedMpkBytesRecorder::<FullPrecisionSettings>::default()
        .record(model.clone().into_record(), ())
        .map_err(|e| PipelineError::Record(format!("{:?}", e)))
}

/// バイナリ形式のバイト列に変換（Web形式）
pub fn to_web_bytes<B: Backend>(model: &GarmentRegressor<B>) -> PipelineResult<Vec<u8>> {
    BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(model.clone().into_record(), ())
        .map_err(|e| PipelineError::Record(format!("{:?}", e)))
}

/// メタデータからモデル設定を復元
pub fn model_config_from_metadata(metadata: &ModelMetadata) -> PipelineResult<ModelConfig> {
    let [hidden_size, hidden_size_2] = metadata.hidden_sizes[..] else {
        return Err(PipelineError::Record(format!(
            "hidden_sizes は2要素である必要があります: {:?}",
            metadata.hidden_sizes
        )));
    };
    if metadata.measurement_names.len() != NUM_MEASUREMENTS {
        return Err(PipelineError::Record(format!(
            "出力項目数が一致しません: {} (期待: {})",
            metadata.measurement_names.len(),
            NUM_MEASUREMENTS
        )));
    }

    Ok(ModelConfig::new()
        .with_num_outputs(NUM_MEASUREMENTS)
        .with_dropout(metadata.dropout)
        .with_image_size(metadata.input_size as usize)
        .with_hidden_size(hidden_size)
        .with_hidden_size_2(hidden_size_2))
}

/// ネイティブ形式とWeb形式の両方を書き出す
pub fn export_model<B: Backend>(
    model: &GarmentRegressor<B>,
    metadata: &ModelMetadata,
    output: &OutputSettings,
) -> Result<ExportedModel> {
    let native = to_native_bytes(model)?;
    let archive = save_model_with_metadata(&output.final_model_path, metadata, &native)
        .context("ネイティブ形式の保存に失敗しました")?;
    info!(
        "モデルを保存しました: {} ({:.2} MB)",
        archive.display(),
        native.len() as f64 / 1024.0 / 1024.0
    );

    let web = to_web_bytes(model)?;
    save_web_export(&output.web_export_dir, metadata, &web)
        .context("Web形式の書き出しに失敗しました")?;
    info!("Web用モデルを書き出しました: {}", output.web_export_dir.display());

    Ok(ExportedModel {
        archive,
        web_dir: output.web_export_dir.clone(),
    })
}
