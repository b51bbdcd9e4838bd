//! データセット準備
//!
//! 使い方: prepare_dataset [config.json]

use anyhow::Result;
use garment_measure::dataset::prepare_dataset;
use garment_measure::logging;
use garment_measure::model::AppConfig;
use tracing::info;

fn main() -> Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let config = AppConfig::from_args_or_default(args.get(1).map(String::as_str))?;
    config.validate()?;
    config.display();

    let summary = prepare_dataset(&config.data)?;

    info!(
        "データセットを作成しました: train={} val={} test={} (除外 {} 件)",
        summary.counts.train,
        summary.counts.val,
        summary.counts.test,
        summary.skipped.len()
    );
    for manifest in &summary.manifests {
        info!("  {}", manifest.display());
    }
    Ok(())
}
