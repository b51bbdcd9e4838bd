use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 採寸項目数
pub const NUM_MEASUREMENTS: usize = 5;

/// 採寸項目名（モデル出力の並び順）
pub const MEASUREMENT_NAMES: [&str; NUM_MEASUREMENTS] =
    ["chest", "shoulders", "length", "sleeves", "waist"];

/// 衣類1点分の採寸値
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    pub chest: f64,
    pub shoulders: f64,
    pub length: f64,
    pub sleeves: f64,
    pub waist: f64,
}

impl Measurements {
    /// 配列から生成（MEASUREMENT_NAMESの順）
    pub fn from_array(values: [f64; NUM_MEASUREMENTS]) -> Self {
        let [chest, shoulders, length, sleeves, waist] = values;
        Self {
            chest,
            shoulders,
            length,
            sleeves,
            waist,
        }
    }

    /// MEASUREMENT_NAMESの順で配列化
    pub fn to_array(&self) -> [f64; NUM_MEASUREMENTS] {
        [self.chest, self.shoulders, self.length, self.sleeves, self.waist]
    }

    /// 全項目が正の有限値であることを検証し、不正な最初の項目名を返す
    pub fn invalid_field(&self) -> Option<&'static str> {
        MEASUREMENT_NAMES
            .iter()
            .zip(self.to_array())
            .find(|(_, value)| !(value.is_finite() && *value > 0.0))
            .map(|(name, _)| *name)
    }
}

/// マニフェストの1エントリ（処理済み画像パス + 採寸値）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub image_path: PathBuf,
    pub measurements: Measurements,
}

/// データセットの分割種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    /// ディレクトリ名・マニフェスト名に使う文字列
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }

    /// マニフェストファイル名 (例: train_dataset.json)
    pub fn manifest_file_name(&self) -> String {
        format!("{}_dataset.json", self.as_str())
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
