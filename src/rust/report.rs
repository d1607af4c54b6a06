//! PNG renderings of predictions, training curves and confusion matrices.

use std::fs;
use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use log::info;
use serde::{Deserialize, Serialize};

use crate::classifier::{ClassifierError, DecodedPrediction};
use crate::evaluation::ConfusionMatrix;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([60, 60, 60]);
const BAR: Rgb<u8> = Rgb([170, 170, 170]);
const TOP_BAR: Rgb<u8> = Rgb([46, 139, 87]);
const TRAIN_SERIES: Rgb<u8> = Rgb([31, 119, 180]);
const VALIDATION_SERIES: Rgb<u8> = Rgb([255, 127, 14]);

const PREVIEW_WIDTH: u32 = 320;
const BAR_ROW: u32 = 18;
const BAR_GAP: u32 = 6;
const MARGIN: u32 = 24;

/// Per-epoch metrics recorded by the trainer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    #[serde(default)]
    pub accuracy: Vec<f64>,
    #[serde(default)]
    pub val_accuracy: Vec<f64>,
    #[serde(default)]
    pub loss: Vec<f64>,
    #[serde(default)]
    pub val_loss: Vec<f64>,
}

impl TrainingHistory {
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, ClassifierError> {
        let bytes = fs::read(path.as_ref())?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ClassifierError::InvalidInput(format!("Malformed training history: {}", e)))
    }

    pub fn epochs(&self) -> usize {
        [&self.accuracy, &self.val_accuracy, &self.loss, &self.val_loss]
            .iter()
            .map(|series| series.len())
            .max()
            .unwrap_or(0)
    }
}

fn save(canvas: &RgbImage, out: &Path) -> Result<(), ClassifierError> {
    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent)?;
    }
    canvas
        .save(out)
        .map_err(|e| ClassifierError::Render(format!("Failed to write {}: {}", out.display(), e)))?;
    info!("Wrote {}", out.display());
    Ok(())
}

fn fill(canvas: &mut RgbImage, x: u32, y: u32, width: u32, height: u32, color: Rgb<u8>) {
    if width > 0 && height > 0 {
        draw_filled_rect_mut(canvas, Rect::at(x as i32, y as i32).of_size(width, height), color);
    }
}

/// Draws the source image above one bar per class, in registry order. The winning
/// class is drawn in a highlight colour.
pub fn draw_prediction(image: &DynamicImage, prediction: &DecodedPrediction) -> RgbImage {
    let preview_height = ((image.height() as u64 * PREVIEW_WIDTH as u64) / image.width().max(1) as u64).max(1) as u32;
    let preview = image
        .resize_exact(PREVIEW_WIDTH, preview_height, FilterType::Triangle)
        .to_rgb8();

    let rows = prediction.all_classes.len() as u32;
    let panel_height = MARGIN + rows * (BAR_ROW + BAR_GAP);
    let mut canvas = RgbImage::from_pixel(PREVIEW_WIDTH, preview_height + panel_height, BACKGROUND);
    image::imageops::replace(&mut canvas, &preview, 0, 0);

    let track = PREVIEW_WIDTH - 2 * MARGIN;
    for class in &prediction.all_classes {
        let y = preview_height + MARGIN / 2 + class.index as u32 * (BAR_ROW + BAR_GAP);
        let score = if class.score.is_finite() { class.score.clamp(0.0, 1.0) } else { 0.0 };
        let color = if class.index == prediction.class_index { TOP_BAR } else { BAR };
        fill(&mut canvas, MARGIN, y, (score * track as f32).round() as u32, BAR_ROW, color);
        draw_hollow_rect_mut(&mut canvas, Rect::at(MARGIN as i32, y as i32).of_size(track, BAR_ROW), AXIS);
    }
    canvas
}

pub fn render_prediction(image: &DynamicImage, prediction: &DecodedPrediction, out: &Path) -> Result<(), ClassifierError> {
    save(&draw_prediction(image, prediction), out)
}

struct Panel {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

impl Panel {
    fn point(&self, epoch: usize, epochs: usize, value: f64, max: f64) -> (f32, f32) {
        let fx = if epochs > 1 { epoch as f64 / (epochs - 1) as f64 } else { 0.5 };
        let fy = if max > 0.0 { (value / max).clamp(0.0, 1.0) } else { 0.0 };
        (
            self.x as f32 + (fx * self.width as f64) as f32,
            self.y as f32 + ((1.0 - fy) * self.height as f64) as f32,
        )
    }

    fn draw_axes(&self, canvas: &mut RgbImage) {
        let (x0, y0) = (self.x as f32, self.y as f32);
        let (x1, y1) = ((self.x + self.width) as f32, (self.y + self.height) as f32);
        draw_line_segment_mut(canvas, (x0, y0), (x0, y1), AXIS);
        draw_line_segment_mut(canvas, (x0, y1), (x1, y1), AXIS);
    }

    fn draw_series(&self, canvas: &mut RgbImage, series: &[f64], epochs: usize, max: f64, color: Rgb<u8>) {
        let points: Vec<(f32, f32)> = series
            .iter()
            .enumerate()
            .filter(|(_, value)| value.is_finite())
            .map(|(epoch, &value)| self.point(epoch, epochs, value, max))
            .collect();
        for pair in points.windows(2) {
            draw_line_segment_mut(canvas, pair[0], pair[1], color);
        }
        for &(x, y) in &points {
            fill(canvas, (x as u32).saturating_sub(1), (y as u32).saturating_sub(1), 3, 3, color);
        }
    }
}

/// Accuracy on the left, loss on the right; training in blue, validation in orange.
pub fn draw_training_history(history: &TrainingHistory) -> RgbImage {
    const PANEL_WIDTH: u32 = 360;
    const PANEL_HEIGHT: u32 = 240;

    let width = 2 * PANEL_WIDTH + 4 * MARGIN;
    let height = PANEL_HEIGHT + 2 * MARGIN;
    let mut canvas = RgbImage::from_pixel(width, height, BACKGROUND);
    let epochs = history.epochs();

    let accuracy = Panel { x: MARGIN, y: MARGIN, width: PANEL_WIDTH, height: PANEL_HEIGHT };
    accuracy.draw_axes(&mut canvas);
    accuracy.draw_series(&mut canvas, &history.accuracy, epochs, 1.0, TRAIN_SERIES);
    accuracy.draw_series(&mut canvas, &history.val_accuracy, epochs, 1.0, VALIDATION_SERIES);

    let max_loss = history
        .loss
        .iter()
        .chain(&history.val_loss)
        .copied()
        .filter(|v| v.is_finite())
        .fold(0.0_f64, f64::max);
    let loss = Panel { x: PANEL_WIDTH + 3 * MARGIN, y: MARGIN, width: PANEL_WIDTH, height: PANEL_HEIGHT };
    loss.draw_axes(&mut canvas);
    loss.draw_series(&mut canvas, &history.loss, epochs, max_loss, TRAIN_SERIES);
    loss.draw_series(&mut canvas, &history.val_loss, epochs, max_loss, VALIDATION_SERIES);

    canvas
}

pub fn render_training_history(history: &TrainingHistory, out: &Path) -> Result<(), ClassifierError> {
    save(&draw_training_history(history), out)
}

/// Heat-map grid, rows are true classes and columns predicted classes.
pub fn draw_confusion_matrix(matrix: &ConfusionMatrix) -> RgbImage {
    const CELL: u32 = 48;

    let n = matrix.num_classes() as u32;
    let side = n * CELL + 2 * MARGIN;
    let mut canvas = RgbImage::from_pixel(side, side, BACKGROUND);
    let max = matrix.max_count().max(1) as f32;

    for (row, counts) in matrix.rows().iter().enumerate() {
        for (col, &count) in counts.iter().enumerate() {
            let t = count as f32 / max;
            let shade = |light: u8, dark: u8| (light as f32 + (dark as f32 - light as f32) * t).round() as u8;
            let color = Rgb([shade(247, 8), shade(251, 48), shade(255, 107)]);
            let x = MARGIN + col as u32 * CELL;
            let y = MARGIN + row as u32 * CELL;
            fill(&mut canvas, x, y, CELL, CELL, color);
            draw_hollow_rect_mut(&mut canvas, Rect::at(x as i32, y as i32).of_size(CELL, CELL), AXIS);
        }
    }
    canvas
}

pub fn render_confusion_matrix(matrix: &ConfusionMatrix, out: &Path) -> Result<(), ClassifierError> {
    save(&draw_confusion_matrix(matrix), out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{decode, ClassIndexRegistry};

    #[test]
    fn test_prediction_highlights_top_class() {
        let registry = ClassIndexRegistry::build(["normal", "arthritis"]).unwrap();
        let prediction = decode(&[0.2, 0.8], &registry).unwrap();
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 32, Rgb([0, 0, 0])));

        let canvas = draw_prediction(&image, &prediction);
        assert_eq!(canvas.width(), PREVIEW_WIDTH);
        assert_eq!(canvas.height(), 160 + MARGIN + 2 * (BAR_ROW + BAR_GAP));

        let second_bar_y = 160 + MARGIN / 2 + (BAR_ROW + BAR_GAP) + BAR_ROW / 2;
        assert_eq!(*canvas.get_pixel(MARGIN + 10, second_bar_y), TOP_BAR);
        let first_bar_y = 160 + MARGIN / 2 + BAR_ROW / 2;
        assert_eq!(*canvas.get_pixel(MARGIN + 10, first_bar_y), BAR);
    }

    #[test]
    fn test_history_from_json() {
        let json = r#"{"accuracy": [0.5, 0.7, 0.8], "loss": [0.9, 0.5, 0.3], "val_loss": [1.0, 0.6]}"#;
        let history: TrainingHistory = serde_json::from_str(json).unwrap();
        assert_eq!(history.epochs(), 3);
        assert!(history.val_accuracy.is_empty());

        let canvas = draw_training_history(&history);
        assert!(canvas.pixels().any(|p| *p == TRAIN_SERIES));
        assert!(canvas.pixels().any(|p| *p == VALIDATION_SERIES));
    }

    #[test]
    fn test_empty_history_still_renders() {
        let canvas = draw_training_history(&TrainingHistory::default());
        assert!(canvas.width() > 0);
    }

    #[test]
    fn test_confusion_matrix_size() {
        let matrix = ConfusionMatrix::from_pairs(3, &[0, 1, 2], &[0, 1, 1]).unwrap();
        let canvas = draw_confusion_matrix(&matrix);
        assert_eq!(canvas.width(), 3 * 48 + 2 * MARGIN);
    }

    #[test]
    fn test_render_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("plots").join("history.png");
        render_training_history(&TrainingHistory::default(), &out).unwrap();
        assert!(image::open(&out).is_ok());
    }
}
