//! 学習済みモデルで写真の採寸値を推定
//!
//! 使い方: predict <final_model.tar.gz> <image>... [cpu|wgpu]

use anyhow::{bail, Result};
use burn::backend::Wgpu;
use burn::tensor::backend::Backend;
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::WgpuDevice;
use garment_measure::logging;
use garment_measure::ml::InferenceEngine;
use garment_measure::model::log_metadata_info;
use std::path::{Path, PathBuf};

fn run<B: Backend>(model_path: &Path, images: &[PathBuf], device: B::Device) -> Result<()> {
    let engine = InferenceEngine::<B>::load(model_path, device)?;
    log_metadata_info(engine.metadata());

    let predictions = engine.predict_batch(images)?;
    for (image, measurements) in images.iter().zip(predictions) {
        let line = serde_json::json!({
            "image": image,
            "measurements": measurements,
        });
        println!("{}", line);
    }
    Ok(())
}

fn main() -> Result<()> {
    logging::init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let use_cpu = match args.last().map(String::as_str) {
        Some("cpu") => {
            args.pop();
            true
        }
        Some("wgpu") => {
            args.pop();
            false
        }
        _ => false,
    };

    if args.len() < 2 {
        bail!("使い方: predict <final_model.tar.gz> <image>... [cpu|wgpu]");
    }

    let model_path = PathBuf::from(&args[0]);
    let images: Vec<PathBuf> = args[1..].iter().map(PathBuf::from).collect();

    if use_cpu {
        run::<NdArray>(&model_path, &images, NdArrayDevice::Cpu)
    } else {
        run::<Wgpu>(&model_path, &images, WgpuDevice::default())
    }
}
