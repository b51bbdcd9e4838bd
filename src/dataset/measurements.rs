//! 採寸テーブルの読み込み
//!
//! `measurements.json` は識別子（拡張子を除いたファイル名）から
//! {chest, shoulders, length, sleeves, waist} への対応表です。

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{PipelineError, PipelineResult};
use crate::types::Measurements;

/// 識別子 → 採寸レコード（検証前）
///
/// レコードは参照されたときに初めて検証します。画像の無い識別子のレコードは読み飛ばされます。
#[derive(Debug, Clone, Default)]
pub struct MeasurementTable {
    records: BTreeMap<String, serde_json::Value>,
}

impl MeasurementTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 識別子の採寸値を取り出して検証する
    ///
    /// レコードが無ければ `Ok(None)`。5項目が揃っていない・正の数でない場合はエラー。
    pub fn lookup(&self, id: &str) -> PipelineResult<Option<Measurements>> {
        let Some(value) = self.records.get(id) else {
            return Ok(None);
        };

        let measurements = Measurements::deserialize(value).map_err(|e| {
            PipelineError::InvalidMeasurement {
                id: id.to_string(),
                reason: e.to_string(),
            }
        })?;

        if let Some(field) = measurements.invalid_field() {
            return Err(PipelineError::InvalidMeasurement {
                id: id.to_string(),
                reason: format!("{} は正の数である必要があります", field),
            });
        }

        Ok(Some(measurements))
    }
}

/// 採寸テーブルを読み込む
///
/// ファイルが無い、または JSON オブジェクトとして読めない場合はエラー。
pub fn load_measurement_table(path: &Path) -> PipelineResult<MeasurementTable> {
    if !path.is_file() {
        return Err(PipelineError::MissingInput {
            what: "採寸テーブル",
            path: path.to_path_buf(),
        });
    }

    let records = serde_json::from_str(&fs::read_to_string(path)?)?;
    Ok(MeasurementTable { records })
}
