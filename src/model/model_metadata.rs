//! モデルメタデータの定義
//!
//! 学習済みモデルと一緒に保存し、推論時のモデル再構築と学習履歴の確認に使います。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::MEASUREMENT_NAMES;

/// 1エポック分の学習記録
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// エポック番号（1始まり）
    pub epoch: usize,
    pub train_loss: f64,
    pub train_mae: f64,
    pub val_loss: f64,
    pub val_mae: f64,
    /// このエポックで使った学習率
    pub learning_rate: f64,
}

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.mpk: モデルの重み
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// 出力の並び順
    /// 例: ["chest", "shoulders", "length", "sleeves", "waist"]
    pub measurement_names: Vec<String>,

    /// モデル入力サイズ（正方形）
    pub input_size: u32,

    /// バックボーン名
    pub backbone: String,

    /// 回帰ヘッドの中間層ユニット数
    pub hidden_sizes: Vec<usize>,

    pub dropout: f64,

    /// 実際に回したエポック数
    pub epochs_run: usize,

    /// 検証損失が最良だったエポック（復元された重み）
    #[serde(default)]
    pub best_epoch: Option<usize>,

    #[serde(default)]
    pub best_val_loss: Option<f64>,

    pub final_learning_rate: f64,

    /// 学習終了の理由 ("early_stopping" / "epoch_limit")
    #[serde(default)]
    pub stop_reason: Option<String>,

    #[serde(default)]
    pub history: Vec<EpochMetrics>,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成（学習時刻は現在時刻）
    pub fn new(input_size: u32, backbone: &str, hidden_sizes: Vec<usize>, dropout: f64) -> Self {
        Self {
            measurement_names: MEASUREMENT_NAMES.iter().map(|s| s.to_string()).collect(),
            input_size,
            backbone: backbone.to_string(),
            hidden_sizes,
            dropout,
            epochs_run: 0,
            best_epoch: None,
            best_val_loss: None,
            final_learning_rate: 0.0,
            stop_reason: None,
            history: Vec::new(),
            trained_at: chrono::Local::now().to_rfc3339(),
        }
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
