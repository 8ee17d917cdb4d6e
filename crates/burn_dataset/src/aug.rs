//! Image resizing and light augmentation applied before batching.

use crate::types::{DatasetResult, LabeledBox};
use image::imageops::FilterType;
use rand::{Rng, SeedableRng};

/// A resized sample ready for tensor assembly.
#[derive(Debug, Clone)]
pub struct PreparedSample {
    /// Image in CHW layout, normalized to [0, 1].
    pub image_chw: Vec<f32>,
    pub width: u32,
    pub height: u32,
    pub boxes: Vec<LabeledBox>,
}

#[derive(Debug, Clone)]
pub struct TransformPipeline {
    /// Images are stretched to this size; normalized boxes are unchanged by the resize.
    pub target_size: (u32, u32),
    pub flip_horizontal_prob: f32,
    pub color_jitter_prob: f32,
    pub color_jitter_strength: f32,
    /// Cap on boxes per image; extras are dropped.
    pub max_boxes: usize,
    pub seed: Option<u64>,
}

impl TransformPipeline {
    /// Deterministic resize only; used for evaluation and inference.
    pub fn inference(target_size: (u32, u32), max_boxes: usize) -> Self {
        Self {
            target_size,
            flip_horizontal_prob: 0.0,
            color_jitter_prob: 0.0,
            color_jitter_strength: 0.0,
            max_boxes,
            seed: None,
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "target_size={}x{} flip_p={:.2} color_jitter_p={:.2} strength={:.2} max_boxes={} seed={}",
            self.target_size.0,
            self.target_size.1,
            self.flip_horizontal_prob,
            self.color_jitter_prob,
            self.color_jitter_strength,
            self.max_boxes,
            self.seed
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string())
        )
    }

    /// Resize (and possibly augment) an image together with its boxes.
    ///
    /// `sample_key` is mixed into the seed so each sample gets its own deterministic draw.
    pub fn apply(
        &self,
        img: image::RgbImage,
        boxes: &[LabeledBox],
        sample_key: u64,
    ) -> DatasetResult<PreparedSample> {
        let mut rng = match self.seed {
            Some(seed) => rand::rngs::StdRng::seed_from_u64(seed ^ sample_key),
            None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
        };
        let (w, h) = self.target_size;
        let mut boxes: Vec<LabeledBox> = boxes.to_vec();

        let mut resized = image::imageops::resize(&img, w, h, FilterType::Triangle);

        maybe_hflip(&mut resized, &mut boxes, self.flip_horizontal_prob, &mut rng);
        maybe_jitter(
            &mut resized,
            self.color_jitter_prob,
            self.color_jitter_strength,
            &mut rng,
        );

        if boxes.len() > self.max_boxes {
            boxes.truncate(self.max_boxes);
        }
        Ok(PreparedSample {
            image_chw: to_chw(&resized),
            width: w,
            height: h,
            boxes,
        })
    }
}

pub fn to_chw(img: &image::RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut image_chw = vec![0.0f32; plane * 3];
    for (x, y, pixel) in img.enumerate_pixels() {
        let base = (y * width + x) as usize;
        image_chw[base] = pixel[0] as f32 / 255.0;
        image_chw[plane + base] = pixel[1] as f32 / 255.0;
        image_chw[2 * plane + base] = pixel[2] as f32 / 255.0;
    }
    image_chw
}

fn maybe_hflip(img: &mut image::RgbImage, boxes: &mut [LabeledBox], prob: f32, rng: &mut impl Rng) {
    if prob <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) < prob {
        image::imageops::flip_horizontal_in_place(img);
        for b in boxes.iter_mut() {
            let x0 = b.bbox_norm[0];
            let x1 = b.bbox_norm[2];
            b.bbox_norm[0] = (1.0 - x1).clamp(0.0, 1.0);
            b.bbox_norm[2] = (1.0 - x0).clamp(0.0, 1.0);
        }
    }
}

fn maybe_jitter(img: &mut image::RgbImage, prob: f32, strength: f32, rng: &mut impl Rng) {
    if prob <= 0.0 || strength <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return;
    }
    let bright = 1.0 + rng.random_range(-strength..strength);
    let contrast = 1.0 + rng.random_range(-strength..strength);
    for pixel in img.pixels_mut() {
        for c in 0..3 {
            let v = pixel[c] as f32 / 255.0;
            let mut v = (v - 0.5) * contrast + 0.5;
            v *= bright;
            pixel[c] = (v.clamp(0.0, 1.0) * 255.0) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(b: [f32; 4]) -> LabeledBox {
        LabeledBox {
            bbox_norm: b,
            class_id: 0,
            difficult: false,
        }
    }

    #[test]
    fn force_resize_keeps_normalized_boxes() {
        let img = image::RgbImage::from_pixel(20, 10, image::Rgb([255, 0, 0]));
        let pipeline = TransformPipeline::inference((8, 8), 4);
        let out = pipeline
            .apply(img, &[boxed([0.1, 0.2, 0.5, 0.6])], 0)
            .unwrap();
        assert_eq!((out.width, out.height), (8, 8));
        assert_eq!(out.image_chw.len(), 3 * 8 * 8);
        assert_eq!(out.boxes[0].bbox_norm, [0.1, 0.2, 0.5, 0.6]);
        assert!((out.image_chw[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn certain_jitter_changes_pixels_and_keeps_boxes() {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([120, 120, 120]));
        let pipeline = TransformPipeline {
            color_jitter_prob: 1.0,
            color_jitter_strength: 0.5,
            seed: Some(11),
            ..TransformPipeline::inference((4, 4), 4)
        };
        let out = pipeline.apply(img, &[boxed([0.1, 0.2, 0.3, 0.4])], 0).unwrap();
        assert_eq!(out.boxes[0].bbox_norm, [0.1, 0.2, 0.3, 0.4]);
        assert!(out.image_chw.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(out.image_chw.iter().any(|v| (v - 120.0 / 255.0).abs() > 1e-3));
    }

    #[test]
    fn certain_flip_mirrors_boxes() {
        let img = image::RgbImage::new(4, 4);
        let pipeline = TransformPipeline {
            flip_horizontal_prob: 1.0,
            seed: Some(7),
            ..TransformPipeline::inference((4, 4), 4)
        };
        let out = pipeline.apply(img, &[boxed([0.1, 0.0, 0.3, 1.0])], 3).unwrap();
        let b = out.boxes[0].bbox_norm;
        assert!((b[0] - 0.7).abs() < 1e-6 && (b[2] - 0.9).abs() < 1e-6);
    }

    #[test]
    fn excess_boxes_are_truncated() {
        let img = image::RgbImage::new(4, 4);
        let boxes = vec![boxed([0.0, 0.0, 0.5, 0.5]); 5];
        let out = TransformPipeline::inference((4, 4), 2)
            .apply(img, &boxes, 0)
            .unwrap();
        assert_eq!(out.boxes.len(), 2);
    }
}
