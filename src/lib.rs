//! 衣類写真からの採寸推定
//!
//! - `dataset`: 元画像と採寸テーブルから train/val/test のデータセットを作成
//! - `ml`: 凍結した MobileNetV2 + 回帰ヘッドの学習・書き出し・推論（`ml` 機能）
//! - `model`: 設定ファイルと学習済みモデルの保存形式

pub mod dataset;
pub mod error;
pub mod logging;
pub mod model;
pub mod types;

#[cfg(feature = "ml")]
pub mod ml;

pub use error::{PipelineError, PipelineResult};
pub use types::{DatasetEntry, Measurements, Split, MEASUREMENT_NAMES, NUM_MEASUREMENTS};
