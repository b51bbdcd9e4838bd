//! 採寸回帰モデルの定義
//!
//! 凍結した MobileNetV2 の特徴に全結合の回帰ヘッドを付け、
//! 写真1枚から5項目の採寸値を推定します。

use burn::{
    config::Config,
    module::Module,
    nn::{
        loss::{MseLoss, Reduction},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{backend::Backend, Tensor},
    train::RegressionOutput,
};

use crate::ml::backbone::{MobileNetV2, FEATURE_CHANNELS};

/// バックボーン名（メタデータに記録）
pub const BACKBONE_NAME: &str = "mobilenet_v2";

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 出力数（採寸項目数）
    #[config(default = 5)]
    pub num_outputs: usize,
    /// ドロップアウト率
    #[config(default = 0.3)]
    pub dropout: f64,
    /// 入力画像サイズ（正方形）
    #[config(default = 224)]
    pub image_size: usize,
    /// 第1全結合層のユニット数
    #[config(default = 128)]
    pub hidden_size: usize,
    /// 第2全結合層のユニット数
    #[config(default = 64)]
    pub hidden_size_2: usize,
}

impl ModelConfig {
    /// ランダム初期化のバックボーンでモデルを構築
    pub fn init<B: Backend>(&self, device: &B::Device) -> GarmentRegressor<B> {
        self.init_with_backbone(MobileNetV2::new(device), device)
    }

    /// 与えられたバックボーンを凍結してモデルを構築
    pub fn init_with_backbone<B: Backend>(
        &self,
        backbone: MobileNetV2<B>,
        device: &B::Device,
    ) -> GarmentRegressor<B> {
        GarmentRegressor {
            backbone: backbone.no_grad(),
            head: self.init_head(device),
        }
    }

    pub fn init_head<B: Backend>(&self, device: &B::Device) -> RegressionHead<B> {
        RegressionHead {
            fc1: LinearConfig::new(FEATURE_CHANNELS, self.hidden_size).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc2: LinearConfig::new(self.hidden_size, self.hidden_size_2).init(device),
            output: LinearConfig::new(self.hidden_size_2, self.num_outputs).init(device),
            activation: Relu::new(),
        }
    }
}

/// 回帰ヘッド
///
/// Dense 128 + ReLU -> Dropout -> Dense 64 + ReLU -> Dense 5 (線形)
#[derive(Module, Debug)]
pub struct RegressionHead<B: Backend> {
    fc1: Linear<B>,
    dropout: Dropout,
    fc2: Linear<B>,
    output: Linear<B>,
    activation: Relu,
}

impl<B: Backend> RegressionHead<B> {
    /// [batch, 1280] -> [batch, num_outputs]
    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.activation.forward(self.fc1.forward(features));
        let x = self.dropout.forward(x);
        let x = self.activation.forward(self.fc2.forward(x));
        self.output.forward(x)
    }
}

/// 採寸回帰モデル
///
/// バックボーンは `no_grad` で凍結されており、勾配が流れるのはヘッドのみです。
#[derive(Module, Debug)]
pub struct GarmentRegressor<B: Backend> {
    backbone: MobileNetV2<B>,
    head: RegressionHead<B>,
}

impl<B: Backend> GarmentRegressor<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, H, W, 3]（値域 [0, 1]）
    ///
    /// # 戻り値
    /// - 採寸値 [batch_size, 5]（chest, shoulders, length, sleeves, waist）
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        // NHWC -> NCHW
        let x = images.permute([0, 3, 1, 2]);
        let x = self.backbone.forward(x);

        // Global Average Pooling
        let x = x.mean_dim(3).mean_dim(2);
        let x = x.reshape([batch_size, FEATURE_CHANNELS]);

        self.head.forward(x)
    }

    /// 順伝播と損失計算（MSE）
    pub fn forward_regression(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 2>,
    ) -> RegressionOutput<B> {
        let output = self.forward(images);
        let loss = MseLoss::new().forward(output.clone(), targets.clone(), Reduction::Mean);

        RegressionOutput::new(loss, output, targets)
    }
}

/// 平均絶対誤差
pub fn mean_absolute_error<B: Backend>(output: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    (output - targets).abs().mean()
}
