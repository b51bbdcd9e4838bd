//! MobileNetV2 特徴抽出器（凍結バックボーン）
//!
//! torchvision の `mobilenet_v2().features` と同じ層構成です。
//! 学習中は更新しないため、バッチ正規化は推論用の固定アフィン変換
//! （running_mean / running_var）としてのみ実装しています。
//!
//! # アーキテクチャ
//! - stem: Conv 3x3 stride 2 (3 -> 32) + BN + ReLU6
//! - 17個の Inverted Residual ブロック（t, c, n, s は `BLOCK_SETTINGS`）
//! - last: Conv 1x1 (320 -> 1280) + BN + ReLU6
//!
//! 出力は [batch, 1280, H/32, W/32] の特徴マップです。

use burn::{
    module::{Module, Param},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        PaddingConfig2d,
    },
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::{backend::Backend, Tensor},
};
use std::path::Path;

use crate::error::{PipelineError, PipelineResult};

/// バックボーンの出力チャネル数
pub const FEATURE_CHANNELS: usize = 1280;

/// バッチ正規化のイプシロン（torchvisionと同じ）
const BN_EPSILON: f64 = 1e-5;

const STEM_CHANNELS: usize = 32;

/// (expand ratio t, 出力チャネル c, 繰り返し数 n, 最初のstride s)
pub const BLOCK_SETTINGS: [(usize, usize, usize, usize); 7] = [
    (1, 16, 1, 1),
    (6, 24, 2, 2),
    (6, 32, 3, 2),
    (6, 64, 4, 2),
    (6, 96, 3, 1),
    (6, 160, 3, 2),
    (6, 320, 1, 1),
];

/// 凍結されたバッチ正規化
///
/// パラメータ名はPyTorchの state dict と一致させています。
#[derive(Module, Debug)]
pub struct FrozenBatchNorm<B: Backend> {
    weight: Param<Tensor<B, 1>>,
    bias: Param<Tensor<B, 1>>,
    running_mean: Param<Tensor<B, 1>>,
    running_var: Param<Tensor<B, 1>>,
}

impl<B: Backend> FrozenBatchNorm<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            weight: Param::from_tensor(Tensor::ones([channels], device)),
            bias: Param::from_tensor(Tensor::zeros([channels], device)),
            running_mean: Param::from_tensor(Tensor::zeros([channels], device)),
            running_var: Param::from_tensor(Tensor::ones([channels], device)),
        }
    }

    /// y = (x - mean) / sqrt(var + eps) * weight + bias
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [channels] = self.weight.dims();
        let scale = self.weight.val() / (self.running_var.val() + BN_EPSILON).sqrt();
        let shift = self.bias.val() - self.running_mean.val() * scale.clone();

        x * scale.reshape([1, channels, 1, 1]) + shift.reshape([1, channels, 1, 1])
    }
}

/// Conv (バイアスなし) + 凍結BN
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    conv: Conv2d<B>,
    bn: FrozenBatchNorm<B>,
}

impl<B: Backend> ConvBn<B> {
    fn new(
        channels: [usize; 2],
        kernel: usize,
        stride: usize,
        groups: usize,
        device: &B::Device,
    ) -> Self {
        let padding = (kernel - 1) / 2;
        Self {
            conv: Conv2dConfig::new(channels, [kernel, kernel])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(padding, padding))
                .with_groups(groups)
                .with_bias(false)
                .init(device),
            bn: FrozenBatchNorm::new(channels[1], device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }

    /// Conv + BN + ReLU6
    fn forward_relu6(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        relu6(self.forward(x))
    }
}

fn relu6<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    x.clamp(0.0, 6.0)
}

/// Inverted Residual ブロック
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    /// 1x1 拡張（t = 1 のブロックには無い）
    expand: Option<ConvBn<B>>,
    /// 3x3 depthwise
    depthwise: ConvBn<B>,
    /// 1x1 射影（活性化なし）
    project: ConvBn<B>,
}

impl<B: Backend> InvertedResidual<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        expand_ratio: usize,
        device: &B::Device,
    ) -> Self {
        let hidden = in_channels * expand_ratio;
        let expand =
            (expand_ratio != 1).then(|| ConvBn::new([in_channels, hidden], 1, 1, 1, device));

        Self {
            expand,
            depthwise: ConvBn::new([hidden, hidden], 3, stride, hidden, device),
            project: ConvBn::new([hidden, out_channels], 1, 1, 1, device),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.expand {
            Some(expand) => expand.forward_relu6(input.clone()),
            None => input.clone(),
        };
        let x = self.depthwise.forward_relu6(x);
        let x = self.project.forward(x);

        // stride 1 かつ入出力チャネルが同じときだけ形状が一致する
        if x.dims() == input.dims() {
            x + input
        } else {
            x
        }
    }
}

/// MobileNetV2 特徴抽出器
#[derive(Module, Debug)]
pub struct MobileNetV2<B: Backend> {
    stem: ConvBn<B>,
    blocks: Vec<InvertedResidual<B>>,
    last: ConvBn<B>,
}

impl<B: Backend> MobileNetV2<B> {
    /// ランダム初期化で構築
    pub fn new(device: &B::Device) -> Self {
        let mut blocks = Vec::new();
        let mut in_channels = STEM_CHANNELS;
        for (expand_ratio, out_channels, repeats, first_stride) in BLOCK_SETTINGS {
            for i in 0..repeats {
                let stride = if i == 0 { first_stride } else { 1 };
                blocks.push(InvertedResidual::new(
                    in_channels,
                    out_channels,
                    stride,
                    expand_ratio,
                    device,
                ));
                in_channels = out_channels;
            }
        }

        Self {
            stem: ConvBn::new([3, STEM_CHANNELS], 3, 2, 1, device),
            blocks,
            last: ConvBn::new([in_channels, FEATURE_CHANNELS], 1, 1, 1, device),
        }
    }

    /// 事前学習済みの重みを読み込む
    ///
    /// - `.mpk`: burn の NamedMpk レコード
    /// - `.pt` / `.pth`: torchvision の state dict（`pytorch` 機能が必要）
    pub fn load_pretrained(self, path: &Path, device: &B::Device) -> PipelineResult<Self> {
        if !path.is_file() {
            return Err(PipelineError::MissingInput {
                what: "バックボーンの重み",
                path: path.to_path_buf(),
            });
        }

        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "pt" | "pth" => self.load_torchvision(path, device),
            _ => self
                .load_file(
                    path.to_path_buf(),
                    &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
                    device,
                )
                .map_err(|e| PipelineError::Record(format!("{:?}", e))),
        }
    }

    #[cfg(feature = "pytorch")]
    fn load_torchvision(self, path: &Path, device: &B::Device) -> PipelineResult<Self> {
        use burn::record::Recorder;
        use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};

        let mut args = LoadArgs::new(path.to_path_buf());
        for (pattern, replacement) in torchvision_key_remaps() {
            args = args.with_key_remap(&pattern, &replacement);
        }

        let record = PyTorchFileRecorder::<FullPrecisionSettings>::default()
            .load(args, device)
            .map_err(|e| PipelineError::Record(format!("{:?}", e)))?;
        Ok(self.load_record(record))
    }

    #[cfg(not(feature = "pytorch"))]
    fn load_torchvision(self, path: &Path, _device: &B::Device) -> PipelineResult<Self> {
        Err(PipelineError::Record(format!(
            "PyTorch形式の重みを読むには pytorch 機能を有効にしてビルドしてください: {}",
            path.display()
        )))
    }

    /// 特徴マップを計算 [batch, 3, H, W] -> [batch, 1280, H/32, W/32]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.stem.forward_relu6(images);
        for block in &self.blocks {
            x = block.forward(x);
        }
        self.last.forward_relu6(x)
    }
}

/// torchvision の `features.*` キーをこのモジュールのパスに対応付ける正規表現
///
/// torchvision では t = 1 のブロック（features.1）だけ conv.* の並びが異なる。
pub fn torchvision_key_remaps() -> Vec<(String, String)> {
    let mut remaps = vec![
        (r"^features\.0\.0\.(.+)$".to_string(), "stem.conv.$1".to_string()),
        (r"^features\.0\.1\.(.+)$".to_string(), "stem.bn.$1".to_string()),
    ];

    let num_blocks: usize = BLOCK_SETTINGS.iter().map(|(_, _, n, _)| n).sum();
    for feature_index in 1..=num_blocks {
        let block = feature_index - 1;
        let prefix = format!(r"^features\.{}\.conv\.", feature_index);
        let layout: &[(&str, &str)] = if feature_index == 1 {
            &[
                (r"0\.0", "depthwise.conv"),
                (r"0\.1", "depthwise.bn"),
                ("1", "project.conv"),
                ("2", "project.bn"),
            ]
        } else {
            &[
                (r"0\.0", "expand.conv"),
                (r"0\.1", "expand.bn"),
                (r"1\.0", "depthwise.conv"),
                (r"1\.1", "depthwise.bn"),
                ("2", "project.conv"),
                ("3", "project.bn"),
            ]
        };
        for (torch, ours) in layout {
            remaps.push((
                format!(r"{}{}\.(.+)$", prefix, torch),
                format!("blocks.{}.{}.$1", block, ours),
            ));
        }
    }

    let last = num_blocks + 1;
    remaps.push((format!(r"^features\.{}\.0\.(.+)$", last), "last.conv.$1".to_string()));
    remaps.push((format!(r"^features\.{}\.1\.(.+)$", last), "last.bn.$1".to_string()));
    remaps
}
