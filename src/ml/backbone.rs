//! MobileNetV2 特徴抽出器
//!
//! torchvision の `mobilenet_v2` と同じ層構成で、ImageNet 学習済みの重み（.pth）を
//! そのまま読み込めるようにしています。分類層は持たず、1280チャネルの特徴マップを返します。

use anyhow::Result;
use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d,
    },
    record::FullPrecisionSettings,
    tensor::{backend::Backend, Tensor},
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use std::path::Path;

/// 出力特徴のチャネル数
pub const FEATURE_CHANNELS: usize = 1280;

/// ImageNet の平均と標準偏差
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// (拡張率 t, 出力チャネル c, 繰り返し n, 最初のストライド s)
const INVERTED_RESIDUAL_SETTINGS: [[usize; 4]; 7] = [
    [1, 16, 1, 1],
    [6, 24, 2, 2],
    [6, 32, 3, 2],
    [6, 64, 4, 2],
    [6, 96, 3, 1],
    [6, 160, 3, 2],
    [6, 320, 1, 1],
];

const STEM_CHANNELS: usize = 32;

/// Conv + BatchNorm + ReLU6
#[derive(Module, Debug)]
pub struct ConvNormActivation<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B>,
}

impl<B: Backend> ConvNormActivation<B> {
    fn new(
        channels: [usize; 2],
        kernel_size: usize,
        stride: usize,
        groups: usize,
        device: &B::Device,
    ) -> Self {
        let padding = (kernel_size - 1) / 2;
        let conv = Conv2dConfig::new(channels, [kernel_size, kernel_size])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_groups(groups)
            .with_bias(false)
            .init(device);

        Self {
            conv,
            norm: BatchNormConfig::new(channels[1]).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.norm.forward(x);
        x.clamp(0.0, 6.0)
    }
}

/// 逆残差ブロック（拡張 1x1 → depthwise 3x3 → 射影 1x1）
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    /// 拡張率1のブロックには無い
    expand: Option<ConvNormActivation<B>>,
    depthwise: ConvNormActivation<B>,
    project_conv: Conv2d<B>,
    project_norm: BatchNorm<B>,
}

impl<B: Backend> InvertedResidual<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, expand_ratio: usize, device: &B::Device) -> Self {
        let hidden = in_channels * expand_ratio;
        let expand = (expand_ratio != 1)
            .then(|| ConvNormActivation::new([in_channels, hidden], 1, 1, 1, device));

        Self {
            expand,
            depthwise: ConvNormActivation::new([hidden, hidden], 3, stride, hidden, device),
            project_conv: Conv2dConfig::new([hidden, out_channels], [1, 1])
                .with_bias(false)
                .init(device),
            project_norm: BatchNormConfig::new(out_channels).init(device),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.expand {
            Some(expand) => expand.forward(input.clone()),
            None => input.clone(),
        };
        let x = self.depthwise.forward(x);
        let x = self.project_conv.forward(x);
        let x = self.project_norm.forward(x);

        // ストライド1かつ入出力チャネルが同じときだけ形状が一致する
        if x.dims() == input.dims() {
            x + input
        } else {
            x
        }
    }
}

/// 特徴抽出器の設定
#[derive(Config, Debug)]
pub struct MobileNetV2Config {
    /// 出力チャネル数
    #[config(default = 1280)]
    pub last_channels: usize,
}

impl MobileNetV2Config {
    pub fn init<B: Backend>(&self, device: &B::Device) -> MobileNetV2<B> {
        let stem = ConvNormActivation::new([3, STEM_CHANNELS], 3, 2, 1, device);

        let mut blocks = Vec::new();
        let mut in_channels = STEM_CHANNELS;
        for [t, c, n, s] in INVERTED_RESIDUAL_SETTINGS {
            for i in 0..n {
                let stride = if i == 0 { s } else { 1 };
                blocks.push(InvertedResidual::new(in_channels, c, stride, t, device));
                in_channels = c;
            }
        }

        let last = ConvNormActivation::new([in_channels, self.last_channels], 1, 1, 1, device);

        MobileNetV2 { stem, blocks, last }
    }
}

/// MobileNetV2 本体（分類層なし）
///
/// 入力は [0, 1] の RGB 画像 [batch, 3, H, W]。ImageNet 正規化は内部で行う
#[derive(Module, Debug)]
pub struct MobileNetV2<B: Backend> {
    stem: ConvNormActivation<B>,
    blocks: Vec<InvertedResidual<B>>,
    last: ConvNormActivation<B>,
}

impl<B: Backend> MobileNetV2<B> {
    /// 順伝播
    ///
    /// # 戻り値
    /// - 特徴マップ [batch, 1280, H/32, W/32]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = normalize_imagenet(images);
        let x = self.stem.forward(x);
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        self.last.forward(x)
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}

/// [0, 1] の画像を ImageNet の平均・標準偏差で正規化
pub fn normalize_imagenet<B: Backend>(images: Tensor<B, 4>) -> Tensor<B, 4> {
    let device = images.device();
    let mean = Tensor::<B, 1>::from_floats(IMAGENET_MEAN, &device).reshape([1, 3, 1, 1]);
    let std = Tensor::<B, 1>::from_floats(IMAGENET_STD, &device).reshape([1, 3, 1, 1]);
    (images - mean) / std
}

/// torchvision のキー名をこのモジュールの構造に合わせる
fn torchvision_key_remaps() -> Vec<(String, String)> {
    let mut remaps = vec![
        (r"^features\.0\.0\.(.+)$".to_string(), "stem.conv.$1".to_string()),
        (r"^features\.0\.1\.(.+)$".to_string(), "stem.norm.$1".to_string()),
        (r"^features\.1\.conv\.0\.0\.(.+)$".to_string(), "blocks.0.depthwise.conv.$1".to_string()),
        (r"^features\.1\.conv\.0\.1\.(.+)$".to_string(), "blocks.0.depthwise.norm.$1".to_string()),
        (r"^features\.1\.conv\.1\.(.+)$".to_string(), "blocks.0.project_conv.$1".to_string()),
        (r"^features\.1\.conv\.2\.(.+)$".to_string(), "blocks.0.project_norm.$1".to_string()),
    ];

    // features.2 ～ features.17 は拡張層を持つ
    for feature in 2..=17 {
        let block = feature - 1;
        let prefix = format!(r"^features\.{}\.conv", feature);
        remaps.extend([
            (format!(r"{}\.0\.0\.(.+)$", prefix), format!("blocks.{}.expand.conv.$1", block)),
            (format!(r"{}\.0\.1\.(.+)$", prefix), format!("blocks.{}.expand.norm.$1", block)),
            (format!(r"{}\.1\.0\.(.+)$", prefix), format!("blocks.{}.depthwise.conv.$1", block)),
            (format!(r"{}\.1\.1\.(.+)$", prefix), format!("blocks.{}.depthwise.norm.$1", block)),
            (format!(r"{}\.2\.(.+)$", prefix), format!("blocks.{}.project_conv.$1", block)),
            (format!(r"{}\.3\.(.+)$", prefix), format!("blocks.{}.project_norm.$1", block)),
        ]);
    }

    remaps.push((r"^features\.18\.0\.(.+)$".to_string(), "last.conv.$1".to_string()));
    remaps.push((r"^features\.18\.1\.(.+)$".to_string(), "last.norm.$1".to_string()));
    remaps
}

/// torchvision の学習済み重みを読み込む
pub fn load_pretrained<B: Backend>(
    backbone: MobileNetV2<B>,
    weights_path: &Path,
    device: &B::Device,
) -> Result<MobileNetV2<B>> {
    use burn::record::Recorder;

    let mut args = LoadArgs::new(weights_path.to_path_buf());
    for (pattern, replacement) in torchvision_key_remaps() {
        args = args.with_key_remap(&pattern, &replacement);
    }

    let record = PyTorchFileRecorder::<FullPrecisionSettings>::default()
        .load(args, device)
        .map_err(|e| anyhow::anyhow!("学習済み重みの読み込みエラー {}: {:?}", weights_path.display(), e))?;

    Ok(backbone.load_record(record))
}

/// 特徴抽出器を構築し、重みがあれば読み込んで凍結する
///
/// 重みが無い・読めない場合は初期値のまま続行する
pub fn build_frozen_backbone<B: Backend>(
    weights_path: Option<&Path>,
    device: &B::Device,
) -> MobileNetV2<B> {
    let backbone = MobileNetV2Config::new().init::<B>(device);

    let backbone = match weights_path {
        Some(path) if path.is_file() => match load_pretrained(backbone.clone(), path, device) {
            Ok(loaded) => {
                log::info!("学習済み特徴抽出器を読み込みました: {}", path.display());
                loaded
            }
            Err(e) => {
                log::warn!("{:#}。初期値の特徴抽出器を使用します", e);
                backbone
            }
        },
        Some(path) => {
            log::warn!(
                "学習済み重みが見つかりません: {}。初期値の特徴抽出器を使用します",
                path.display()
            );
            backbone
        }
        None => {
            log::warn!("学習済み重みが設定されていません。初期値の特徴抽出器を使用します");
            backbone
        }
    };

    backbone.no_grad()
}
