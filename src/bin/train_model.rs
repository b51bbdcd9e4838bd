//! モデル学習
//!
//! 使い方: train_model [config.json]

#![recursion_limit = "256"]

use anyhow::Result;
use burn::backend::{Autodiff, Wgpu};
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::WgpuDevice;
use garment_measure::logging;
use garment_measure::ml::train_model;
use garment_measure::model::{log_metadata_info, load_metadata, AppConfig, DeviceType};
use tracing::info;

fn main() -> Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let config = AppConfig::from_args_or_default(args.get(1).map(String::as_str))?;
    config.display();

    let report = match config.device_type {
        DeviceType::Wgpu => {
            let device = WgpuDevice::default();
            info!("使用デバイス: {:?}", device);
            train_model::<Autodiff<Wgpu>>(&config, device)?
        }
        DeviceType::Cpu => {
            info!("使用デバイス: CPU (NdArray)");
            train_model::<Autodiff<NdArray>>(&config, NdArrayDevice::Cpu)?
        }
    };

    info!(
        "学習完了: {} エポック ({:?})",
        report.history.len(),
        report.stop_reason
    );
    if let Some(checkpoint) = &report.checkpoint {
        info!("ベストのチェックポイント: {}", checkpoint.display());
    }
    info!("ネイティブ形式: {}", report.exported.archive.display());
    info!("Web形式: {}", report.exported.web_dir.display());

    log_metadata_info(&load_metadata(&report.exported.archive)?);
    Ok(())
}
