//! Greedy target assignment and the detection loss.

use burn::tensor::activation::log_softmax;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use burn_dataset::BurnBatch;
use models::{iou_xyxy, tensor_values, ConvDetector, ModelError};

/// Per-slot training targets produced by matching ground truth to predictions.
pub struct MatchedTargets<B: Backend> {
    /// 1.0 for slots matched to a ground-truth box, shape [batch, max_pred].
    pub objectness: Tensor<B, 2>,
    pub boxes: Tensor<B, 3>,
    /// 1.0 on the four coordinates of matched slots, shape [batch, max_pred, 4].
    pub box_weights: Tensor<B, 3>,
    /// One-hot class of matched slots, zeros elsewhere, shape [batch, max_pred, classes].
    pub classes: Tensor<B, 3>,
    pub matched: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct LossWeights {
    pub lambda_box: f32,
    pub lambda_obj: f32,
    pub lambda_cls: f32,
}

/// For each ground-truth box pick the still-free prediction slot with the best IoU.
pub fn build_greedy_targets<B: Backend>(
    pred_boxes: Tensor<B, 3>,
    gt_boxes: Tensor<B, 3>,
    gt_classes: Tensor<B, 2>,
    gt_mask: Tensor<B, 2>,
    num_classes: usize,
) -> Result<MatchedTargets<B>, ModelError> {
    let device = pred_boxes.device();
    let [batch, max_pred, _] = pred_boxes.dims();
    let max_gt = gt_boxes.dims()[1];

    let gt_mask_vec = tensor_values(gt_mask)?;
    let gt_boxes_vec = tensor_values(gt_boxes)?;
    let gt_classes_vec = tensor_values(gt_classes)?;
    let pred_boxes_vec = tensor_values(pred_boxes)?;

    let mut obj_targets = vec![0.0f32; batch * max_pred];
    let mut box_targets = vec![0.0f32; batch * max_pred * 4];
    let mut box_weights = vec![0.0f32; batch * max_pred * 4];
    let mut class_targets = vec![0.0f32; batch * max_pred * num_classes];
    let mut matched = 0usize;

    for b in 0..batch {
        let mut taken = vec![false; max_pred];
        for g in 0..max_gt {
            let gi = b * max_gt + g;
            if gt_mask_vec[gi] < 0.5 {
                continue;
            }
            let gb = [
                gt_boxes_vec[gi * 4],
                gt_boxes_vec[gi * 4 + 1],
                gt_boxes_vec[gi * 4 + 2],
                gt_boxes_vec[gi * 4 + 3],
            ];

            let mut best: Option<(usize, f32)> = None;
            for (p, _) in taken.iter().enumerate().filter(|(_, t)| !**t) {
                let pi = (b * max_pred + p) * 4;
                let pb = [
                    pred_boxes_vec[pi],
                    pred_boxes_vec[pi + 1],
                    pred_boxes_vec[pi + 2],
                    pred_boxes_vec[pi + 3],
                ];
                let iou = iou_xyxy(pb, gb);
                if best.map_or(true, |(_, best_iou)| iou > best_iou) {
                    best = Some((p, iou));
                }
            }
            // More ground truth than prediction slots: the rest stay unmatched.
            let Some((best_p, _)) = best else { break };
            taken[best_p] = true;
            matched += 1;

            let slot = b * max_pred + best_p;
            obj_targets[slot] = 1.0;
            box_targets[slot * 4..slot * 4 + 4].copy_from_slice(&gb);
            box_weights[slot * 4..slot * 4 + 4].copy_from_slice(&[1.0; 4]);
            let class_id = (gt_classes_vec[gi].round() as usize).min(num_classes - 1);
            class_targets[slot * num_classes + class_id] = 1.0;
        }
    }

    Ok(MatchedTargets {
        objectness: Tensor::from_data(TensorData::new(obj_targets, [batch, max_pred]), &device),
        boxes: Tensor::from_data(TensorData::new(box_targets, [batch, max_pred, 4]), &device),
        box_weights: Tensor::from_data(TensorData::new(box_weights, [batch, max_pred, 4]), &device),
        classes: Tensor::from_data(
            TensorData::new(class_targets, [batch, max_pred, num_classes]),
            &device,
        ),
        matched,
    })
}

/// BCE objectness over all slots + L1 box and cross-entropy class loss over matched slots.
pub fn detection_loss<B: Backend>(
    model: &ConvDetector<B>,
    batch: &BurnBatch<B>,
    weights: &LossWeights,
) -> Result<Tensor<B, 1>, ModelError> {
    let out = model.forward_multibox(batch.images.clone());
    let targets = build_greedy_targets(
        out.boxes.clone(),
        batch.boxes.clone(),
        batch.classes.clone(),
        batch.box_mask.clone(),
        model.num_classes(),
    )?;

    let eps = 1e-6;
    let [b, n] = targets.objectness.dims();
    let scores = out.scores.clamp(eps, 1.0 - eps);
    let obj_loss = -((targets.objectness.clone() * scores.clone().log())
        + ((targets.objectness.ones_like() - targets.objectness) * (scores.ones_like() - scores).log()))
    .sum()
    .div_scalar((b * n) as f32);

    let matched = targets.matched.max(1) as f32;
    let box_loss = ((out.boxes - targets.boxes).abs() * targets.box_weights)
        .sum()
        .div_scalar(matched);
    let cls_loss = -(log_softmax(out.class_logits, 2) * targets.classes)
        .sum()
        .div_scalar(matched);

    Ok(box_loss * weights.lambda_box + obj_loss * weights.lambda_obj + cls_loss * weights.lambda_cls)
}

pub fn scalar<B: Backend>(t: Tensor<B, 1>) -> Result<f32, ModelError> {
    tensor_values(t)?
        .first()
        .copied()
        .ok_or_else(|| ModelError::TensorData("expected a scalar, got an empty tensor".into()))
}
