//! 分割マニフェストの読み書き
//!
//! マニフェストは `{image_path, measurements}` のJSON配列です。
//! 読み込み時にエントリごとに型検証し、壊れたエントリは位置付きのエラーにします。

use std::fs;
use std::path::Path;

use crate::error::{PipelineError, PipelineResult};
use crate::types::DatasetEntry;

/// マニフェストを書き出す（インデント2）
pub fn write_manifest(path: &Path, entries: &[DatasetEntry]) -> PipelineResult<()> {
    let json = serde_json::to_string_pretty(entries)?;
    fs::write(path, json)?;
    Ok(())
}

/// マニフェストを読み込んで検証する
pub fn load_manifest(path: &Path) -> PipelineResult<Vec<DatasetEntry>> {
    if !path.is_file() {
        return Err(PipelineError::MissingInput {
            what: "マニフェスト",
            path: path.to_path_buf(),
        });
    }

    let invalid = |index: usize, reason: String| PipelineError::InvalidManifest {
        path: path.to_path_buf(),
        index,
        reason,
    };

    let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(path)?)?;
    let serde_json::Value::Array(items) = value else {
        return Err(invalid(0, "トップレベルがJSON配列ではありません".to_string()));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let entry: DatasetEntry =
                serde_json::from_value(item).map_err(|e| invalid(index, e.to_string()))?;

            if entry.image_path.as_os_str().is_empty() {
                return Err(invalid(index, "image_path が空です".to_string()));
            }
            if let Some(field) = entry.measurements.invalid_field() {
                return Err(invalid(index, format!("{} は正の数である必要があります", field)));
            }

            Ok(entry)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Measurements;
    use std::path::PathBuf;

    fn entry(name: &str) -> DatasetEntry {
        DatasetEntry {
            image_path: PathBuf::from(format!("data/garments/train/{}.jpg", name)),
            measurements: Measurements::from_array([52.0, 44.0, 70.0, 61.0, 47.0]),
        }
    }

    #[test]
    fn test_write_then_load_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train_dataset.json");
        let entries = vec![entry("b"), entry("a"), entry("c")];

        write_manifest(&path, &entries).unwrap();
        assert_eq!(load_manifest(&path).unwrap(), entries);

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("[\n  {"));
    }

    #[test]
    fn test_empty_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("val_dataset.json");
        write_manifest(&path, &[]).unwrap();
        assert!(load_manifest(&path).unwrap().is_empty());
    }

    #[test]
    fn test_missing_key_reports_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train_dataset.json");
        fs::write(
            &path,
            r#"[
                {"image_path": "a.jpg", "measurements": {"chest": 1, "shoulders": 1, "length": 1, "sleeves": 1, "waist": 1}},
                {"image_path": "b.jpg", "measurements": {"chest": 1, "shoulders": 1, "length": 1, "sleeves": 1}}
            ]"#,
        )
        .unwrap();

        match load_manifest(&path) {
            Err(PipelineError::InvalidManifest { index, reason, .. }) => {
                assert_eq!(index, 1);
                assert!(reason.contains("waist"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_wrong_type_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train_dataset.json");
        fs::write(
            &path,
            r#"[{"image_path": "a.jpg", "measurements": {"chest": "wide", "shoulders": 1, "length": 1, "sleeves": 1, "waist": 1}}]"#,
        )
        .unwrap();
        assert!(matches!(
            load_manifest(&path),
            Err(PipelineError::InvalidManifest { index: 0, .. })
        ));
    }

    #[test]
    fn test_non_array_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train_dataset.json");
        fs::write(&path, r#"{"image_path": "a.jpg"}"#).unwrap();
        assert!(matches!(
            load_manifest(&path),
            Err(PipelineError::InvalidManifest { .. })
        ));
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_manifest(&dir.path().join("test_dataset.json")),
            Err(PipelineError::MissingInput { .. })
        ));
    }
}
