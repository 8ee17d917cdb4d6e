use crate::catalog::{ArchitectureSpec, ModelError};
use burn::module::Module;
use burn::nn;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::activation::{relu, sigmoid};
use burn::tensor::backend::Backend;
use burn::tensor::{BasicOps, Tensor};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct ConvDetectorConfig {
    pub channels: Vec<usize>,
    pub head_hidden: usize,
    pub max_boxes: usize,
    pub num_classes: usize,
}

impl ConvDetectorConfig {
    pub fn from_architecture(arch: &ArchitectureSpec, num_classes: usize) -> Self {
        Self {
            channels: arch.channels.clone(),
            head_hidden: arch.head_hidden,
            max_boxes: arch.max_boxes,
            num_classes,
        }
    }
}

/// Copy a tensor's values to the host as f32.
pub fn tensor_values<B, const D: usize, K>(t: Tensor<B, D, K>) -> Result<Vec<f32>, ModelError>
where
    B: Backend,
    K: BasicOps<B>,
{
    t.into_data()
        .to_vec::<f32>()
        .map_err(|e| ModelError::TensorData(format!("{e:?}")))
}

/// Stack of stride-2 3x3 convolutions; the pretrained/frozen part of the detector.
#[derive(Debug, Module)]
pub struct Backbone<B: Backend> {
    convs: Vec<Conv2d<B>>,
}

impl<B: Backend> Backbone<B> {
    pub fn new(channels: &[usize], device: &B::Device) -> Self {
        let mut convs = Vec::with_capacity(channels.len());
        let mut c_in = 3;
        for &c_out in channels {
            convs.push(
                Conv2dConfig::new([c_in, c_out], [3, 3])
                    .with_stride([2, 2])
                    .with_padding(nn::PaddingConfig2d::Explicit(1, 1))
                    .init(device),
            );
            c_in = c_out;
        }
        Self { convs }
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = images;
        for conv in &self.convs {
            x = relu(conv.forward(x));
        }
        x
    }

    /// Load backbone-only weights saved with `save_file` + `BinFileRecorder<FullPrecisionSettings>`.
    pub fn load_pretrained(self, path: &Path, device: &B::Device) -> Result<Self, ModelError> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.load_file(path.to_path_buf(), &recorder, device)
            .map_err(|e| ModelError::Weights {
                path: path.to_path_buf(),
                msg: e.to_string(),
            })
    }
}

/// Raw multibox predictions.
#[derive(Debug, Clone)]
pub struct DetectorOutput<B: Backend> {
    /// Ordered xyxy boxes in 0..1, shape [batch, max_boxes, 4].
    pub boxes: Tensor<B, 3>,
    /// Objectness in 0..1, shape [batch, max_boxes].
    pub scores: Tensor<B, 2>,
    /// Unnormalized class scores, shape [batch, max_boxes, num_classes].
    pub class_logits: Tensor<B, 3>,
}

#[derive(Debug, Module)]
pub struct ConvDetector<B: Backend> {
    backbone: Backbone<B>,
    neck: nn::Linear<B>,
    box_head: nn::Linear<B>,
    score_head: nn::Linear<B>,
    class_head: nn::Linear<B>,
    max_boxes: usize,
    num_classes: usize,
}

impl<B: Backend> ConvDetector<B> {
    pub fn new(cfg: ConvDetectorConfig, device: &B::Device) -> Self {
        let max_boxes = cfg.max_boxes.max(1);
        let num_classes = cfg.num_classes.max(1);
        let backbone = Backbone::new(&cfg.channels, device);
        let features = cfg.channels.last().copied().unwrap_or(3);
        // Mean and max pooled features are concatenated.
        let neck = nn::LinearConfig::new(features * 2, cfg.head_hidden).init(device);
        let box_head = nn::LinearConfig::new(cfg.head_hidden, max_boxes * 4).init(device);
        let score_head = nn::LinearConfig::new(cfg.head_hidden, max_boxes).init(device);
        let class_head =
            nn::LinearConfig::new(cfg.head_hidden, max_boxes * num_classes).init(device);
        Self {
            backbone,
            neck,
            box_head,
            score_head,
            class_head,
            max_boxes,
            num_classes,
        }
    }

    pub fn max_boxes(&self) -> usize {
        self.max_boxes
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn backbone(&self) -> &Backbone<B> {
        &self.backbone
    }

    pub fn with_backbone(mut self, backbone: Backbone<B>) -> Self {
        self.backbone = backbone;
        self
    }

    /// Stop gradient tracking on the backbone so only neck and heads are fine-tuned.
    pub fn freeze_backbone(mut self) -> Self {
        self.backbone = self.backbone.no_grad();
        self
    }

    pub fn forward_multibox(&self, images: Tensor<B, 4>) -> DetectorOutput<B> {
        let fmap = self.backbone.forward(images);
        let [batch, channels, h, w] = fmap.dims();
        // Pool over one flattened spatial axis; ndarray's max_dim backward only
        // supports a reduced last dimension.
        let flat = fmap.reshape([batch, channels, h * w]);
        let mean = flat.clone().mean_dim(2).reshape([batch, channels]);
        let max = flat.max_dim(2).reshape([batch, channels]);
        let x = relu(self.neck.forward(Tensor::cat(vec![mean, max], 1)));

        let boxes_flat = sigmoid(self.box_head.forward(x.clone()));
        let scores = sigmoid(self.score_head.forward(x.clone()));
        let class_logits = self
            .class_head
            .forward(x)
            .reshape([batch, self.max_boxes, self.num_classes]);
        let boxes = boxes_flat.reshape([batch, self.max_boxes, 4]);

        // Reorder/clamp to enforce x0 <= x1, y0 <= y1 within [0,1] using arithmetic.
        let x0 = boxes.clone().slice([0..batch, 0..self.max_boxes, 0..1]);
        let y0 = boxes.clone().slice([0..batch, 0..self.max_boxes, 1..2]);
        let x1 = boxes.clone().slice([0..batch, 0..self.max_boxes, 2..3]);
        let y1 = boxes.slice([0..batch, 0..self.max_boxes, 3..4]);

        let dx = x0.clone() - x1.clone();
        let dy = y0.clone() - y1.clone();
        let half = 0.5;

        let x_min = ((x0.clone() + x1.clone() - dx.clone().abs()) * half).clamp(0.0, 1.0);
        let x_max = ((x0 + x1 + dx.abs()) * half).clamp(0.0, 1.0);
        let y_min = ((y0.clone() + y1.clone() - dy.clone().abs()) * half).clamp(0.0, 1.0);
        let y_max = ((y0 + y1 + dy.abs()) * half).clamp(0.0, 1.0);

        DetectorOutput {
            boxes: Tensor::cat(vec![x_min, y_min, x_max, y_max], 2),
            scores,
            class_logits,
        }
    }
}
