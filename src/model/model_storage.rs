//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（出力項目、入力サイズ、学習履歴など）
//! - model.mpk       - モデルの重み（NamedMpk形式）
//!
//! Web推論用のエクスポートはディレクトリに展開した形で書き出します:
//! - model.json      - 形式・入出力仕様・重みファイル一覧・メタデータ
//! - weights.bin     - モデルの重み（バイナリレコード）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};
use tracing::info;

use crate::model::model_metadata::ModelMetadata;

pub const METADATA_ENTRY: &str = "metadata.json";
pub const MODEL_ENTRY: &str = "model.mpk";
pub const WEB_MODEL_FILE: &str = "model.json";
pub const WEB_WEIGHTS_FILE: &str = "weights.bin";
/// Web エクスポートの形式タグ
pub const WEB_FORMAT: &str = "burn-bin";

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 保存したファイルのパスを返します（拡張子が .gz でなければ .tar.gz を付与）。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    };

    if let Some(parent) = tar_gz_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .context(format!("Failed to create parent directory: {:?}", parent))?;
    }

    let tar_gz_file = File::create(&tar_gz_path)
        .context(format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;

    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    tar_builder
        .into_inner()
        .context("Failed to finalize tar.gz archive")?
        .finish()
        .context("Failed to finish gzip stream")?;

    Ok(tar_gz_path)
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, bytes: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, bytes)
        .context(format!("Failed to add {} to tar", name))
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let (metadata, _) = read_archive(tar_gz_path, false)?;
    metadata.ok_or_else(|| anyhow::anyhow!("{} not found in tar.gz archive", METADATA_ENTRY))
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    match read_archive(tar_gz_path, true)? {
        (Some(metadata), Some(binary)) => Ok((metadata, binary)),
        (None, _) => Err(anyhow::anyhow!("{} not found in tar.gz archive", METADATA_ENTRY)),
        (_, None) => Err(anyhow::anyhow!("{} not found in tar.gz archive", MODEL_ENTRY)),
    }
}

fn read_archive(
    tar_gz_path: &Path,
    with_binary: bool,
) -> Result<(Option<ModelMetadata>, Option<Vec<u8>>)> {
    let tar_gz_file = File::open(tar_gz_path)
        .context(format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;

    let mut archive = Archive::new(GzDecoder::new(tar_gz_file));
    let mut metadata = None;
    let mut binary = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();

        match name.as_str() {
            METADATA_ENTRY => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str)?;
                metadata = Some(ModelMetadata::from_json_string(&json_str)?);
                if !with_binary {
                    break;
                }
            }
            MODEL_ENTRY if with_binary => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                binary = Some(buffer);
            }
            _ => {}
        }
    }

    Ok((metadata, binary))
}

/// Web推論用の入力仕様
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebInputSpec {
    /// [batch, H, W, 3]（batch は -1）
    pub shape: [i64; 4],
    pub layout: String,
    /// 画素値の範囲
    pub value_range: [f32; 2],
}

/// 重みファイル一覧の1項目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebWeightsEntry {
    pub path: String,
    pub byte_length: u64,
}

/// model.json の内容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebModelManifest {
    pub format: String,
    pub input: WebInputSpec,
    pub outputs: Vec<String>,
    pub weights_manifest: Vec<WebWeightsEntry>,
    pub metadata: ModelMetadata,
}

/// Web推論用にモデルをディレクトリへ書き出す
pub fn save_web_export(
    output_dir: &Path,
    metadata: &ModelMetadata,
    weights: &[u8],
) -> Result<WebModelManifest> {
    fs::create_dir_all(output_dir)
        .context(format!("Failed to create export directory: {:?}", output_dir))?;

    fs::write(output_dir.join(WEB_WEIGHTS_FILE), weights)
        .context(format!("Failed to write {}", WEB_WEIGHTS_FILE))?;

    let size = metadata.input_size as i64;
    let manifest = WebModelManifest {
        format: WEB_FORMAT.to_string(),
        input: WebInputSpec {
            shape: [-1, size, size, 3],
            layout: "NHWC".to_string(),
            value_range: [0.0, 1.0],
        },
        outputs: metadata.measurement_names.clone(),
        weights_manifest: vec![WebWeightsEntry {
            path: WEB_WEIGHTS_FILE.to_string(),
            byte_length: weights.len() as u64,
        }],
        metadata: metadata.clone(),
    };

    let json = serde_json::to_string_pretty(&manifest).context("Failed to serialize model.json")?;
    fs::write(output_dir.join(WEB_MODEL_FILE), json)
        .context(format!("Failed to write {}", WEB_MODEL_FILE))?;

    Ok(manifest)
}

/// Web エクスポートの model.json を読み込む
pub fn load_web_manifest(output_dir: &Path) -> Result<WebModelManifest> {
    let path = output_dir.join(WEB_MODEL_FILE);
    let json = fs::read_to_string(&path).context(format!("Failed to read {:?}", path))?;
    serde_json::from_str(&json).context("Failed to deserialize model.json")
}

/// メタデータをログに出力
pub fn log_metadata_info(metadata: &ModelMetadata) {
    info!("=== モデルメタデータ ===");
    info!("出力項目: {}", metadata.measurement_names.join(", "));
    info!("モデル入力サイズ: {}x{}", metadata.input_size, metadata.input_size);
    info!(
        "構成: {} + Dense {:?} (dropout={})",
        metadata.backbone, metadata.hidden_sizes, metadata.dropout
    );
    info!("学習エポック数: {}", metadata.epochs_run);
    if let (Some(epoch), Some(loss)) = (metadata.best_epoch, metadata.best_val_loss) {
        info!("ベストエポック: {} (val_loss={:.4})", epoch, loss);
    }
    info!("最終学習率: {:e}", metadata.final_learning_rate);
    info!("学習日時: {}", metadata.trained_at);
}
