//! モデル学習
//!
//! 凍結バックボーン + 回帰ヘッドを Adam / MSE で学習します。
//! エポックごとに検証損失で学習制御（チェックポイント・早期終了・学習率減衰）を行い、
//! 終了時はベストの重みに戻してからネイティブ形式とWeb形式で書き出します。

use anyhow::{Context, Result};
use burn::{
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, backend::Backend, ElementConversion},
};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::dataset::split::make_rng;
use crate::error::PipelineError;
use crate::ml::backbone::MobileNetV2;
use crate::ml::callbacks::{CheckpointKeeper, StopReason, TrainingMonitor};
use crate::ml::data::{BatchSequence, GarmentDataset};
use crate::ml::export::{export_model, ExportedModel};
use crate::ml::ml_model::{mean_absolute_error, GarmentRegressor, ModelConfig, BACKBONE_NAME};
use crate::model::config::AppConfig;
use crate::model::model_metadata::{EpochMetrics, ModelMetadata};
use crate::types::{Split, NUM_MEASUREMENTS};

/// 学習結果
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub history: Vec<EpochMetrics>,
    pub best_epoch: Option<usize>,
    pub best_val_loss: f64,
    pub final_learning_rate: f64,
    pub stop_reason: StopReason,
    /// 残っているベストのチェックポイント
    pub checkpoint: Option<PathBuf>,
    pub exported: ExportedModel,
}

/// 損失・MAEのサンプル数加重平均
#[derive(Debug, Default)]
struct RunningMean {
    loss: f64,
    mae: f64,
    samples: usize,
}

impl RunningMean {
    fn add(&mut self, loss: f64, mae: f64, samples: usize) {
        self.loss += loss * samples as f64;
        self.mae += mae * samples as f64;
        self.samples += samples;
    }

    fn finish(&self) -> (f64, f64) {
        if self.samples == 0 {
            return (f64::NAN, f64::NAN);
        }
        (
            self.loss / self.samples as f64,
            self.mae / self.samples as f64,
        )
    }
}

fn load_split(config: &AppConfig, split: Split) -> Result<BatchSequence> {
    let path = config.data.manifest_path(split);
    let dataset = GarmentDataset::from_manifest(&path)
        .context(format!("{} マニフェストの読み込みに失敗しました", split))?;
    let samples = dataset.entries().len();
    let batches = BatchSequence::new(dataset, config.training.batch_size, config.data.target_size);
    if batches.is_empty() {
        return Err(PipelineError::EmptySplit(split.to_string()).into());
    }

    info!(
        "{}データ: {} 件, {} バッチ ({})",
        split,
        samples,
        batches.len(),
        path.display()
    );
    Ok(batches)
}

/// バックボーンを用意（重み未指定ならランダム初期化）
fn build_backbone<B: Backend>(config: &AppConfig, device: &B::Device) -> Result<MobileNetV2<B>> {
    let backbone = MobileNetV2::new(device);
    match &config.model.backbone_weights {
        Some(path) => {
            info!("事前学習済みの重みを読み込みます: {}", path.display());
            Ok(backbone.load_pretrained(path, device)?)
        }
        None => {
            warn!("バックボーンの重みが指定されていません。ランダム初期化で学習します");
            Ok(backbone)
        }
    }
}

/// 1エポック分の学習
fn train_epoch<B: AutodiffBackend, O: Optimizer<GarmentRegressor<B>, B>>(
    mut model: GarmentRegressor<B>,
    optim: &mut O,
    batches: &BatchSequence,
    learning_rate: f64,
    device: &B::Device,
) -> Result<(GarmentRegressor<B>, f64, f64)> {
    let mut running = RunningMean::default();

    for i in 0..batches.len() {
        let batch = batches.get::<B>(i, device)?;
        let samples = batch.targets.dims()[0];

        let item = model.forward_regression(batch.images, batch.targets);
        let loss = item.loss.clone().into_scalar().elem::<f64>();
        let mae = mean_absolute_error(item.output, item.targets)
            .into_scalar()
            .elem::<f64>();
        running.add(loss, mae, samples);

        let grads = GradientsParams::from_grads(item.loss.backward(), &model);
        model = optim.step(learning_rate, model, grads);
    }

    let (loss, mae) = running.finish();
    Ok((model, loss, mae))
}

/// 検証データで損失とMAEを計算
fn evaluate<B: Backend>(
    model: &GarmentRegressor<B>,
    batches: &BatchSequence,
    device: &B::Device,
) -> Result<(f64, f64)> {
    let mut running = RunningMean::default();

    for i in 0..batches.len() {
        let batch = batches.get::<B>(i, device)?;
        let samples = batch.targets.dims()[0];

        let item = model.forward_regression(batch.images, batch.targets);
        let loss = item.loss.into_scalar().elem::<f64>();
        let mae = mean_absolute_error(item.output, item.targets)
            .into_scalar()
            .elem::<f64>();
        running.add(loss, mae, samples);
    }

    Ok(running.finish())
}

/// モデル学習を実行
///
/// 早期終了に限らず、エポック上限で終わった場合もベストエポックの重みに戻してから書き出します。
/// 上限到達時に最終エポックの重みを残す Keras の `restore_best_weights` とはこの点が異なります。
pub fn train_model<B: AutodiffBackend>(config: &AppConfig, device: B::Device) -> Result<TrainingReport> {
    config.validate()?;
    let settings = &config.training;

    let mut train_batches = load_split(config, Split::Train)?;
    let mut val_batches = load_split(config, Split::Val)?;

    let model_config = ModelConfig::new()
        .with_num_outputs(NUM_MEASUREMENTS)
        .with_dropout(settings.dropout)
        .with_image_size(config.data.target_size as usize);
    info!(
        "モデル設定: {} + Dense {} -> {} -> {}, 入力サイズ: {}x{}, dropout={}",
        BACKBONE_NAME,
        model_config.hidden_size,
        model_config.hidden_size_2,
        model_config.num_outputs,
        model_config.image_size,
        model_config.image_size,
        model_config.dropout
    );

    let backbone = build_backbone::<B>(config, &device)?;
    let mut model = model_config.init_with_backbone(backbone, &device);
    let mut optim = AdamConfig::new().init::<B, GarmentRegressor<B>>();

    let mut monitor = TrainingMonitor::new(settings);
    let mut keeper = CheckpointKeeper::new(&config.output.checkpoint_dir)?;
    let mut rng = make_rng(settings.seed);

    let mut learning_rate = settings.learning_rate;
    let mut best_model: Option<GarmentRegressor<B>> = None;
    let mut history = Vec::new();

    info!(
        "学習を開始します: 最大 {} エポック, バッチサイズ {}, 学習率 {}",
        settings.num_epochs, settings.batch_size, learning_rate
    );

    let mut epoch = 0;
    let stop_reason = loop {
        epoch += 1;

        let (trained, train_loss, train_mae) =
            train_epoch(model, &mut optim, &train_batches, learning_rate, &device)?;
        model = trained;

        let valid_model = model.valid();
        let (val_loss, val_mae) = evaluate(&valid_model, &val_batches, &device)?;

        info!(
            "エポック {}/{}: loss={:.4} mae={:.4} val_loss={:.4} val_mae={:.4} lr={:e}",
            epoch, settings.num_epochs, train_loss, train_mae, val_loss, val_mae, learning_rate
        );
        history.push(EpochMetrics {
            epoch,
            train_loss,
            train_mae,
            val_loss,
            val_mae,
            learning_rate,
        });

        let outcome = monitor.observe(epoch, val_loss);
        if outcome.improved {
            keeper.save(epoch, &valid_model)?;
            best_model = Some(model.clone());
        }
        if outcome.lr_reduced {
            info!("学習率を下げました: {:e} -> {:e}", learning_rate, outcome.learning_rate);
        }
        learning_rate = outcome.learning_rate;

        train_batches.on_epoch_end(&mut rng);
        val_batches.on_epoch_end(&mut rng);

        if let Some(reason) = outcome.stop {
            break reason;
        }
    };

    match stop_reason {
        StopReason::EarlyStopping => info!("検証損失が改善しないため学習を打ち切りました (エポック {})", epoch),
        StopReason::EpochLimit => info!("最大エポック数に達しました"),
    }

    if let (Some(best), Some(best_epoch)) = (best_model, monitor.best_epoch()) {
        info!("ベストエポック {} の重みに戻します", best_epoch);
        model = best;
    }

    let mut metadata = ModelMetadata::new(
        config.data.target_size,
        BACKBONE_NAME,
        vec![model_config.hidden_size, model_config.hidden_size_2],
        model_config.dropout,
    );
    metadata.epochs_run = epoch;
    metadata.best_epoch = monitor.best_epoch();
    metadata.best_val_loss = monitor.best_epoch().map(|_| monitor.best_val_loss());
    metadata.final_learning_rate = monitor.learning_rate();
    metadata.stop_reason = Some(
        match stop_reason {
            StopReason::EarlyStopping => "early_stopping",
            StopReason::EpochLimit => "epoch_limit",
        }
        .to_string(),
    );
    metadata.history = history.clone();

    let exported = export_model(&model.valid(), &metadata, &config.output)?;

    Ok(TrainingReport {
        history,
        best_epoch: monitor.best_epoch(),
        best_val_loss: monitor.best_val_loss(),
        final_learning_rate: monitor.learning_rate(),
        stop_reason,
        checkpoint: keeper.best_path().map(|p| p.to_path_buf()),
        exported,
    })
}
