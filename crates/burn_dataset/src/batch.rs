//! Batch iteration for training and validation.

use crate::aug::{PreparedSample, TransformPipeline};
use crate::types::{BurnDatasetError, DatasetResult, LabeledImageSet, LabeledSample};
use burn::tensor::{backend::Backend, Tensor, TensorData};
use rand::{seq::SliceRandom, SeedableRng};

pub struct BurnBatch<B: Backend> {
    /// Shape [batch, 3, height, width].
    pub images: Tensor<B, 4>,
    /// Normalized boxes, shape [batch, max_boxes, 4].
    pub boxes: Tensor<B, 3>,
    /// Class id per box slot as f32, shape [batch, max_boxes].
    pub classes: Tensor<B, 2>,
    /// 1.0 where a box slot is populated, shape [batch, max_boxes].
    pub box_mask: Tensor<B, 2>,
}

/// Stack prepared samples into tensors, padding box slots up to `max_boxes`.
pub fn collate<B: Backend>(
    samples: &[PreparedSample],
    max_boxes: usize,
    device: &B::Device,
) -> DatasetResult<BurnBatch<B>> {
    let Some(first) = samples.first() else {
        return Err(BurnDatasetError::Other("cannot collate empty batch".into()));
    };
    let max_boxes = max_boxes.max(1);
    let (width, height) = (first.width, first.height);
    let batch = samples.len();

    let mut images_buf = Vec::with_capacity(batch * first.image_chw.len());
    let mut boxes_buf = vec![0.0f32; batch * max_boxes * 4];
    let mut classes_buf = vec![0.0f32; batch * max_boxes];
    let mut mask_buf = vec![0.0f32; batch * max_boxes];

    for (b, sample) in samples.iter().enumerate() {
        if sample.width != width || sample.height != height {
            return Err(BurnDatasetError::Other(format!(
                "image dimensions differ within batch: {}x{}, expected {}x{}",
                sample.width, sample.height, width, height
            )));
        }
        images_buf.extend_from_slice(&sample.image_chw);
        for (i, lbl) in sample.boxes.iter().take(max_boxes).enumerate() {
            let slot = b * max_boxes + i;
            boxes_buf[slot * 4..slot * 4 + 4].copy_from_slice(&lbl.bbox_norm);
            classes_buf[slot] = lbl.class_id as f32;
            mask_buf[slot] = 1.0;
        }
    }

    let images = Tensor::<B, 4>::from_data(
        TensorData::new(images_buf, [batch, 3, height as usize, width as usize]),
        device,
    );
    let boxes =
        Tensor::<B, 3>::from_data(TensorData::new(boxes_buf, [batch, max_boxes, 4]), device);
    let classes =
        Tensor::<B, 2>::from_data(TensorData::new(classes_buf, [batch, max_boxes]), device);
    let box_mask = Tensor::<B, 2>::from_data(TensorData::new(mask_buf, [batch, max_boxes]), device);

    Ok(BurnBatch {
        images,
        boxes,
        classes,
        box_mask,
    })
}

pub fn prepare_sample(
    sample: &LabeledSample,
    pipeline: &TransformPipeline,
    sample_key: u64,
) -> DatasetResult<PreparedSample> {
    let img = image::open(&sample.image_path)
        .map_err(|e| BurnDatasetError::Image {
            path: sample.image_path.clone(),
            source: e,
        })?
        .to_rgb8();
    pipeline.apply(img, &sample.boxes, sample_key)
}

/// Iterates a labelled set in batches, reshuffling per epoch when configured.
pub struct BatchIter<'a> {
    set: &'a LabeledImageSet,
    order: Vec<usize>,
    cursor: usize,
    batch_size: usize,
    epoch: u64,
    pipeline: TransformPipeline,
}

impl<'a> BatchIter<'a> {
    pub fn new(
        set: &'a LabeledImageSet,
        batch_size: usize,
        pipeline: TransformPipeline,
        shuffle_seed: Option<u64>,
        epoch: u64,
    ) -> Self {
        let mut order: Vec<usize> = (0..set.len()).collect();
        if let Some(seed) = shuffle_seed {
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed.wrapping_add(epoch));
            order.shuffle(&mut rng);
        }
        Self {
            set,
            order,
            cursor: 0,
            batch_size: batch_size.max(1),
            epoch,
            pipeline,
        }
    }

    pub fn batches_per_epoch(&self) -> usize {
        self.order.len().div_ceil(self.batch_size)
    }

    pub fn next_batch<B: Backend>(
        &mut self,
        device: &B::Device,
    ) -> DatasetResult<Option<BurnBatch<B>>> {
        let remaining = self.order.len().saturating_sub(self.cursor);
        if remaining == 0 {
            return Ok(None);
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let mut prepared = Vec::with_capacity(end - self.cursor);
        for &idx in &self.order[self.cursor..end] {
            let key = (self.epoch << 32) ^ idx as u64;
            prepared.push(prepare_sample(&self.set.samples[idx], &self.pipeline, key)?);
        }
        self.cursor = end;
        collate(&prepared, self.pipeline.max_boxes, device).map(Some)
    }
}
