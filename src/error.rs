use std::path::PathBuf;
use thiserror::Error;

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{what}が見つかりません: {}", path.display())]
    MissingInput { what: &'static str, path: PathBuf },

    #[error("採寸データが不正です ({id}): {reason}")]
    InvalidMeasurement { id: String, reason: String },

    #[error("マニフェストが不正です {}[{index}]: {reason}", path.display())]
    InvalidManifest {
        path: PathBuf,
        index: usize,
        reason: String,
    },

    #[error("画像の処理に失敗しました {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("{0} データが空です")]
    EmptySplit(String),

    #[error("設定が不正です: {0}")]
    InvalidConfig(String),

    #[error("モデルレコードの読み書きに失敗しました: {0}")]
    Record(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn image(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        Self::Image {
            path: path.into(),
            source,
        }
    }
}
