//! 学習制御（エポック終了時に検証損失で判定）
//!
//! - ベストのみのチェックポイント保存
//! - 早期終了（ベスト時の重みへ復元）
//! - 検証損失の停滞時に学習率を減衰
//! - エポック数の上限

use burn::{
    module::Module,
    record::{DefaultFileRecorder, FullPrecisionSettings},
    tensor::backend::Backend,
};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::model::config::TrainingSettings;

/// 早期終了
///
/// 検証損失が `patience` エポック連続で改善しなければ停止します。
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best: f64,
    best_epoch: Option<usize>,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: f64::INFINITY,
            best_epoch: None,
            wait: 0,
        }
    }

    /// 検証損失を記録し、(改善したか, 停止すべきか) を返す
    pub fn observe(&mut self, epoch: usize, val_loss: f64) -> (bool, bool) {
        if val_loss < self.best {
            self.best = val_loss;
            self.best_epoch = Some(epoch);
            self.wait = 0;
            return (true, false);
        }

        self.wait += 1;
        (false, self.wait >= self.patience)
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }
}

/// 検証損失の停滞時に学習率を下げる
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    factor: f64,
    patience: usize,
    min_lr: f64,
    min_delta: f64,
    best: f64,
    wait: usize,
    learning_rate: f64,
}

impl ReduceLrOnPlateau {
    pub fn new(learning_rate: f64, factor: f64, patience: usize, min_lr: f64, min_delta: f64) -> Self {
        Self {
            factor,
            patience,
            min_lr,
            min_delta,
            best: f64::INFINITY,
            wait: 0,
            learning_rate,
        }
    }

    /// 検証損失を記録し、学習率を下げた場合は新しい値を返す
    pub fn observe(&mut self, val_loss: f64) -> Option<f64> {
        if val_loss < self.best - self.min_delta {
            self.best = val_loss;
            self.wait = 0;
            return None;
        }

        self.wait += 1;
        if self.wait < self.patience {
            return None;
        }

        self.wait = 0;
        if self.learning_rate <= self.min_lr {
            return None;
        }
        self.learning_rate = (self.learning_rate * self.factor).max(self.min_lr);
        Some(self.learning_rate)
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }
}

/// 学習終了の理由
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EarlyStopping,
    EpochLimit,
}

/// 1エポック分の判定結果
#[derive(Debug, Clone, PartialEq)]
pub struct EpochOutcome {
    /// 検証損失がベストを更新した
    pub improved: bool,
    /// 次エポックで使う学習率
    pub learning_rate: f64,
    pub lr_reduced: bool,
    pub stop: Option<StopReason>,
}

/// 早期終了・学習率減衰・エポック上限をまとめて判定する
#[derive(Debug, Clone)]
pub struct TrainingMonitor {
    early_stopping: EarlyStopping,
    plateau: ReduceLrOnPlateau,
    max_epochs: usize,
}

impl TrainingMonitor {
    pub fn new(settings: &TrainingSettings) -> Self {
        Self {
            early_stopping: EarlyStopping::new(settings.early_stopping_patience),
            plateau: ReduceLrOnPlateau::new(
                settings.learning_rate,
                settings.lr_factor,
                settings.lr_patience,
                settings.min_learning_rate,
                settings.lr_min_delta,
            ),
            max_epochs: settings.num_epochs,
        }
    }

    /// エポック（1始まり）の検証損失を判定
    pub fn observe(&mut self, epoch: usize, val_loss: f64) -> EpochOutcome {
        let (improved, patience_exhausted) = self.early_stopping.observe(epoch, val_loss);
        let reduced = self.plateau.observe(val_loss);

        let stop = if patience_exhausted {
            Some(StopReason::EarlyStopping)
        } else if epoch >= self.max_epochs {
            Some(StopReason::EpochLimit)
        } else {
            None
        };

        EpochOutcome {
            improved,
            learning_rate: self.plateau.learning_rate(),
            lr_reduced: reduced.is_some(),
            stop,
        }
    }

    pub fn best_val_loss(&self) -> f64 {
        self.early_stopping.best()
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.early_stopping.best_epoch()
    }

    pub fn learning_rate(&self) -> f64 {
        self.plateau.learning_rate()
    }
}

/// ベストのチェックポイントだけを残して保存する
#[derive(Debug)]
pub struct CheckpointKeeper {
    dir: PathBuf,
    current: Option<PathBuf>,
}

impl CheckpointKeeper {
    pub fn new(dir: &Path) -> PipelineResult<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            current: None,
        })
    }

    /// `model_<epoch:02>.mpk` として保存し、前回のベストを削除
    pub fn save<B: Backend, M: Module<B>>(&mut self, epoch: usize, model: &M) -> PipelineResult<PathBuf> {
        let stem = self.dir.join(format!("model_{:02}", epoch));
        model
            .clone()
            .save_file(stem.clone(), &DefaultFileRecorder::<FullPrecisionSettings>::new())
            .map_err(|e| PipelineError::Record(format!("{:?}", e)))?;
        let path = stem.with_extension("mpk");

        if let Some(previous) = self.current.replace(path.clone()) {
            if previous != path {
                if let Err(e) = fs::remove_file(&previous) {
                    warn!("古いチェックポイントを削除できません {}: {}", previous.display(), e);
                }
            }
        }

        info!("チェックポイントを保存しました: {}", path.display());
        Ok(path)
    }

    /// 現在のベストチェックポイント
    pub fn best_path(&self) -> Option<&Path> {
        self.current.as_deref()
    }
}
