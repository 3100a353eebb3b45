use anyhow::Result;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub(crate) const PLOT_WIDTH: u32 = 800;
pub(crate) const PLOT_HEIGHT: u32 = 600;
const MARGIN: u32 = 48;
const LEGEND_SWATCH: u32 = 14;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const FRAME: Rgb<u8> = Rgb([60, 60, 60]);
const GRID: Rgb<u8> = Rgb([225, 225, 225]);
const SERIES_COLORS: [Rgb<u8>; 4] = [
    Rgb([31, 119, 180]),
    Rgb([255, 127, 14]),
    Rgb([44, 160, 44]),
    Rgb([214, 39, 40]),
];

/// Epoch-by-epoch curves across both training phases, persisted next to the
/// plots as `history.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub phases: Vec<PhaseHistory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseHistory {
    pub name: String,
    pub epochs: Vec<EpochMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub valid_loss: f64,
    pub valid_accuracy: f64,
}

impl TrainingHistory {
    pub fn num_epochs(&self) -> usize {
        self.phases.iter().map(|phase| phase.epochs.len()).sum()
    }

    /// One polyline per phase and split, on a shared epoch axis.
    fn series(&self, value: impl Fn(&EpochMetrics) -> (f64, f64)) -> Vec<Series> {
        let mut series = Vec::new();
        let mut offset = 0usize;
        for (index, phase) in self.phases.iter().enumerate() {
            let (train, valid): (Vec<_>, Vec<_>) = phase
                .epochs
                .iter()
                .enumerate()
                .map(|(i, epoch)| {
                    let (t, v) = value(epoch);
                    (((offset + i) as f64, t), ((offset + i) as f64, v))
                })
                .unzip();
            series.push(Series {
                color: SERIES_COLORS[(2 * index) % SERIES_COLORS.len()],
                points: train,
            });
            series.push(Series {
                color: SERIES_COLORS[(2 * index + 1) % SERIES_COLORS.len()],
                points: valid,
            });
            offset += phase.epochs.len();
        }
        series
    }
}

struct Series {
    color: Rgb<u8>,
    points: Vec<(f64, f64)>,
}

/// Render `accuracy_plot.png` and `loss_plot.png` into `results_dir` and
/// return both paths.
pub fn save_curves(history: &TrainingHistory, results_dir: &Path) -> Result<(PathBuf, PathBuf)> {
    let accuracy_path = results_dir.join("accuracy_plot.png");
    let loss_path = results_dir.join("loss_plot.png");

    render_chart(
        &history.series(|e| (e.train_accuracy, e.valid_accuracy)),
        &accuracy_path,
    )?;
    render_chart(
        &history.series(|e| (e.train_loss, e.valid_loss)),
        &loss_path,
    )?;

    Ok((accuracy_path, loss_path))
}

fn render_chart(series: &[Series], path: &Path) -> Result<()> {
    let mut img = RgbImage::from_pixel(PLOT_WIDTH, PLOT_HEIGHT, BACKGROUND);

    let left = MARGIN as f32;
    let right = (PLOT_WIDTH - MARGIN) as f32;
    let top = MARGIN as f32;
    let bottom = (PLOT_HEIGHT - MARGIN) as f32;

    let max_x = series
        .iter()
        .flat_map(|s| s.points.iter().map(|(x, _)| *x))
        .fold(1.0f64, f64::max);
    let min_y = series
        .iter()
        .flat_map(|s| s.points.iter().map(|(_, y)| *y))
        .fold(f64::INFINITY, f64::min);
    let max_y = series
        .iter()
        .flat_map(|s| s.points.iter().map(|(_, y)| *y))
        .fold(f64::NEG_INFINITY, f64::max);
    let (min_y, max_y) = if min_y.is_finite() && max_y.is_finite() && min_y < max_y {
        (min_y, max_y)
    } else if min_y.is_finite() {
        (min_y - 0.5, min_y + 0.5)
    } else {
        (0.0, 1.0)
    };

    let to_px = |(x, y): (f64, f64)| -> (f32, f32) {
        let px = left + ((x / max_x) as f32) * (right - left);
        let py = bottom - (((y - min_y) / (max_y - min_y)) as f32) * (bottom - top);
        (px, py)
    };

    for division in 1..10 {
        let fx = left + (right - left) * division as f32 / 10.0;
        let fy = top + (bottom - top) * division as f32 / 10.0;
        draw_line_segment_mut(&mut img, (fx, top), (fx, bottom), GRID);
        draw_line_segment_mut(&mut img, (left, fy), (right, fy), GRID);
    }
    draw_line_segment_mut(&mut img, (left, top), (left, bottom), FRAME);
    draw_line_segment_mut(&mut img, (left, bottom), (right, bottom), FRAME);
    draw_line_segment_mut(&mut img, (right, top), (right, bottom), FRAME);
    draw_line_segment_mut(&mut img, (left, top), (right, top), FRAME);

    for s in series {
        if s.points.len() == 1 {
            let (px, py) = to_px(s.points[0]);
            draw_filled_rect_mut(
                &mut img,
                Rect::at(px as i32 - 2, py as i32 - 2).of_size(4, 4),
                s.color,
            );
            continue;
        }
        for window in s.points.windows(2) {
            draw_line_segment_mut(&mut img, to_px(window[0]), to_px(window[1]), s.color);
        }
    }

    for (index, s) in series.iter().enumerate() {
        let x = (PLOT_WIDTH - MARGIN - 2 * LEGEND_SWATCH) as i32;
        let y = (MARGIN + 8) as i32 + index as i32 * (LEGEND_SWATCH + 6) as i32;
        draw_filled_rect_mut(
            &mut img,
            Rect::at(x, y).of_size(LEGEND_SWATCH, LEGEND_SWATCH),
            s.color,
        );
    }

    img.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn history() -> TrainingHistory {
        let phase = |name: &str, epochs: usize| PhaseHistory {
            name: name.to_string(),
            epochs: (1..=epochs)
                .map(|epoch| EpochMetrics {
                    epoch,
                    train_loss: 1.0 / epoch as f64,
                    train_accuracy: 60.0 + epoch as f64,
                    valid_loss: 1.2 / epoch as f64,
                    valid_accuracy: 55.0 + epoch as f64,
                })
                .collect(),
        };
        TrainingHistory {
            phases: vec![phase("head", 3), phase("finetune", 3)],
        }
    }

    #[test]
    fn epochs_accumulate_across_phases() {
        assert_eq!(history().num_epochs(), 6);
    }

    #[test]
    fn curves_render_to_decodable_pngs() {
        let dir = TempDir::new().unwrap();
        let (accuracy, loss) = save_curves(&history(), dir.path()).unwrap();
        for path in [accuracy, loss] {
            let img = image::open(&path).unwrap();
            assert_eq!((img.width(), img.height()), (PLOT_WIDTH, PLOT_HEIGHT));
        }
    }

    #[test]
    fn single_epoch_history_still_renders() {
        let dir = TempDir::new().unwrap();
        let history = TrainingHistory {
            phases: vec![PhaseHistory {
                name: "head".to_string(),
                epochs: vec![EpochMetrics {
                    epoch: 1,
                    train_loss: 0.9,
                    train_accuracy: 40.0,
                    valid_loss: 1.1,
                    valid_accuracy: 35.0,
                }],
            }],
        };
        assert!(save_curves(&history, dir.path()).is_ok());
    }

    #[test]
    fn history_round_trips_through_json() {
        let history = history();
        let json = serde_json::to_string(&history).unwrap();
        let parsed: TrainingHistory = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.phases[0].epochs, history.phases[0].epochs);
    }
}
