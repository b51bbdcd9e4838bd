//! パイプライン設定管理モジュール
//!
//! データセット準備・学習・出力先の設定をJSON形式で保存・読み込みします。
//! 両ステージはこの設定オブジェクトだけを受け取り、暗黙のグローバル状態に依存しません。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, PipelineResult};
use crate::types::Split;

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Wgpu
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// データセット準備の設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    /// データセットのルート (raw/, measurements.json, 各分割を含む)
    pub base_dir: PathBuf,
    /// 元画像ディレクトリ名（base_dir からの相対）
    pub raw_dir_name: String,
    /// 採寸テーブルのファイル名（base_dir からの相対）
    pub measurements_file: String,
    /// 出力画像サイズ（正方形、ピクセル）
    pub target_size: u32,
    /// 出力JPEGの品質
    pub jpeg_quality: u8,
    /// 学習データの割合
    pub train_ratio: f64,
    /// 検証データの割合（残りはテスト）
    pub val_ratio: f64,
    /// 分割時のシャッフル用シード。None なら毎回異なる分割になる
    pub seed: Option<u64>,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("data/garments"),
            raw_dir_name: "raw".to_string(),
            measurements_file: "measurements.json".to_string(),
            target_size: 224,
            jpeg_quality: 95,
            train_ratio: 0.7,
            val_ratio: 0.15,
            seed: None,
        }
    }
}

impl DataSettings {
    pub fn raw_dir(&self) -> PathBuf {
        self.base_dir.join(&self.raw_dir_name)
    }

    pub fn measurements_path(&self) -> PathBuf {
        self.base_dir.join(&self.measurements_file)
    }

    /// 処理済み画像の出力先 (例: data/garments/train)
    pub fn split_dir(&self, split: Split) -> PathBuf {
        self.base_dir.join(split.as_str())
    }

    /// マニフェストのパス (例: data/garments/train_dataset.json)
    pub fn manifest_path(&self, split: Split) -> PathBuf {
        self.base_dir.join(split.manifest_file_name())
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// 最大エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 初期学習率
    pub learning_rate: f64,
    /// ドロップアウト率
    pub dropout: f64,
    /// 検証損失が改善しないまま何エポックで打ち切るか
    pub early_stopping_patience: usize,
    /// 検証損失が改善しないまま何エポックで学習率を下げるか
    pub lr_patience: usize,
    /// 学習率の減衰率
    pub lr_factor: f64,
    /// 学習率の下限
    pub min_learning_rate: f64,
    /// 学習率減衰判定で「改善」とみなす最小の差
    pub lr_min_delta: f64,
    /// エポックごとのシャッフル用シード
    pub seed: Option<u64>,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 50,
            batch_size: 32,
            learning_rate: 1e-3,
            dropout: 0.3,
            early_stopping_patience: 5,
            lr_patience: 3,
            lr_factor: 0.5,
            min_learning_rate: 1e-5,
            lr_min_delta: 1e-4,
            seed: None,
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// 事前学習済みバックボーンの重み (.mpk、pytorch機能有効時は .pt/.pth も可)
    pub backbone_weights: Option<PathBuf>,
}

/// 出力先設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// ベストモデルのチェックポイント出力先
    pub checkpoint_dir: PathBuf,
    /// 最終モデル（ネイティブ形式、tar.gz）
    pub final_model_path: PathBuf,
    /// Web推論用エクスポート先ディレクトリ
    pub web_export_dir: PathBuf,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("checkpoints"),
            final_model_path: PathBuf::from("final_model.tar.gz"),
            web_export_dir: PathBuf::from("model_web"),
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// データセット設定
    pub data: DataSettings,
    /// トレーニング設定
    pub training: TrainingSettings,
    /// モデル設定
    pub model: ModelSettings,
    /// 出力先設定
    pub output: OutputSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("garment_config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// デフォルトパスから設定を読み込む、存在しない場合はデフォルト設定を返す
    pub fn load_or_default() -> Self {
        let path = Self::default_path();
        if path.exists() {
            match Self::load(&path) {
                Ok(config) => {
                    tracing::info!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            }
        } else {
            tracing::info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// コマンドライン引数で指定されたパス、なければデフォルトから読み込む
    ///
    /// 明示的に指定されたファイルの読み込み失敗はエラーとして扱います。
    pub fn from_args_or_default(path: Option<&str>) -> anyhow::Result<Self> {
        use anyhow::Context;
        match path {
            Some(path) => Self::load(path)
                .with_context(|| format!("設定ファイルを読み込めません: {}", path)),
            None => Ok(Self::load_or_default()),
        }
    }

    /// 値の範囲を検証する
    pub fn validate(&self) -> PipelineResult<()> {
        let data = &self.data;
        let training = &self.training;

        let checks: [(bool, String); 8] = [
            (data.target_size > 0, "target_size は1以上が必要です".to_string()),
            (
                (0.0..=1.0).contains(&data.train_ratio) && (0.0..=1.0).contains(&data.val_ratio),
                format!(
                    "分割比率は0〜1の範囲が必要です (train={}, val={})",
                    data.train_ratio, data.val_ratio
                ),
            ),
            (
                data.train_ratio + data.val_ratio <= 1.0,
                format!(
                    "train_ratio + val_ratio が1を超えています ({} + {})",
                    data.train_ratio, data.val_ratio
                ),
            ),
            (training.batch_size > 0, "batch_size は1以上が必要です".to_string()),
            (training.num_epochs > 0, "num_epochs は1以上が必要です".to_string()),
            (
                training.learning_rate > 0.0 && training.min_learning_rate > 0.0,
                "学習率は正の値が必要です".to_string(),
            ),
            (
                training.lr_factor > 0.0 && training.lr_factor < 1.0,
                format!("lr_factor は0〜1の範囲が必要です ({})", training.lr_factor),
            ),
            (
                (0.0..1.0).contains(&training.dropout),
                format!("dropout は0以上1未満が必要です ({})", training.dropout),
            ),
        ];

        match checks.into_iter().find(|(ok, _)| !ok) {
            Some((_, message)) => Err(PipelineError::InvalidConfig(message)),
            None => Ok(()),
        }
    }

    /// 設定情報をログに出力
    pub fn display(&self) {
        tracing::info!("=== パイプライン設定 ===");
        tracing::info!("計算デバイス: {}", self.device_type);
        tracing::info!("データセット: {}", self.data.base_dir.display());
        tracing::info!(
            "画像サイズ: {}x{} (JPEG品質 {})",
            self.data.target_size,
            self.data.target_size,
            self.data.jpeg_quality
        );
        tracing::info!(
            "分割比率: train={} val={} test=残り, シード: {:?}",
            self.data.train_ratio,
            self.data.val_ratio,
            self.data.seed
        );
        tracing::info!(
            "エポック数: {}, バッチサイズ: {}, 学習率: {}",
            self.training.num_epochs,
            self.training.batch_size,
            self.training.learning_rate
        );
        match &self.model.backbone_weights {
            Some(path) => tracing::info!("バックボーン重み: {}", path.display()),
            None => tracing::info!("バックボーン重み: なし"),
        }
    }
}
