use std::path::Path;

use hound::SampleFormat;
use image::imageops::{self, FilterType};
use ndarray::Array2;
use palette::{LinSrgb, Mix, Srgb};
use plotters::prelude::*;

use crate::config::ImageSize;
use crate::error::{GenreError, Result};
use crate::models::TrainingHistory;
use crate::types::{AudioSignal, SpectrogramImage};

pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

const HISTORY_PLOT_SIZE: (u32, u32) = (1200, 500);

fn render_err<E: std::fmt::Display>(e: E) -> GenreError {
    GenreError::Render(e.to_string())
}

/// Load a WAV file at its native sample rate, down-mixed to mono.
pub fn load_wav(file_path: &Path) -> Result<AudioSignal> {
    let reader =
        hound::WavReader::open(file_path).map_err(|e| GenreError::item_decode(file_path, e))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>(),
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
        }
    }
    .map_err(|e| GenreError::item_decode(file_path, e))?;

    let channels = spec.channels.max(1) as usize;
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok(AudioSignal {
        samples,
        sample_rate: spec.sample_rate,
    })
}

pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Open an image, convert it to RGB and resize it to `size`, ignoring aspect ratio.
pub fn load_image(path: &Path, size: ImageSize) -> Result<SpectrogramImage> {
    let rgb = image::ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| GenreError::item_decode(path, e))?
        .decode()
        .map_err(|e| GenreError::item_decode(path, e))?
        .to_rgb8();

    let rgb = if rgb.dimensions() == (size.width, size.height) {
        rgb
    } else {
        imageops::resize(&rgb, size.width, size.height, FilterType::Triangle)
    };

    Ok(SpectrogramImage::from_rgb(rgb))
}

/// Sequential dark-to-bright colour map (black -> purple -> orange -> pale yellow).
fn get_color_from_palette(x: f64) -> RGBColor {
    const STOPS: [(u8, u8, u8); 5] = [
        (0, 0, 4),
        (81, 18, 124),
        (183, 55, 121),
        (252, 137, 97),
        (252, 253, 191),
    ];

    let x = x.clamp(0.0, 1.0) as f32;
    let scaled = x * (STOPS.len() - 1) as f32;
    let i = (scaled.floor() as usize).min(STOPS.len() - 2);

    let to_linear = |(r, g, b): (u8, u8, u8)| -> LinSrgb {
        Srgb::new(r, g, b).into_format::<f32>().into_linear()
    };
    let color = to_linear(STOPS[i]).mix(to_linear(STOPS[i + 1]), scaled - i as f32);
    let color = Srgb::<f32>::from_linear(color).into_format::<u8>();

    RGBColor(color.red, color.green, color.blue)
}

/// Draw a dB spectrogram `(mel bands, frames)` edge to edge: no axes, labels or margins.
///
/// Low frequencies end up at the bottom of the image.
pub fn plot_mel_spectrogram(db: &Array2<f64>, size: ImageSize, filename: &Path) -> Result<()> {
    let (n_mels, n_frames) = db.dim();
    if n_mels == 0 || n_frames == 0 {
        return Err(GenreError::Render("empty spectrogram".into()));
    }

    let root = BitMapBackend::new(filename, (size.width, size.height)).into_drawing_area();
    root.fill(&BLACK).map_err(render_err)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(0)
        .build_cartesian_2d(0..n_frames as u32, 0..n_mels as u32)
        .map_err(render_err)?;

    let min_value = db.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_value = db.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max_value - min_value;

    chart
        .draw_series(db.indexed_iter().map(|((m, t), &value)| {
            let normalised = if range > 0.0 { (value - min_value) / range } else { 0.0 };
            Rectangle::new(
                [(t as u32, m as u32), (t as u32 + 1, m as u32 + 1)],
                get_color_from_palette(normalised).filled(),
            )
        }))
        .map_err(render_err)?;

    root.present().map_err(render_err)?;
    Ok(())
}

/// Training and validation accuracy/loss per epoch, side by side.
///
/// Titles, axes and legends need a system font; without one the curves are
/// still drawn, unlabelled.
pub fn plot_history(history: &TrainingHistory, filename: &Path) -> Result<()> {
    if history.epochs.is_empty() {
        return Err(GenreError::Render("no epochs to plot".into()));
    }

    if let Err(e) = draw_history(history, filename, true) {
        log::warn!("Plotting labelled training curves failed ({e}), drawing curves only");
        draw_history(history, filename, false)?;
    }
    log::info!("Training curves saved to {}", filename.display());
    Ok(())
}

fn draw_history(history: &TrainingHistory, filename: &Path, labelled: bool) -> Result<()> {
    let root = BitMapBackend::new(filename, HISTORY_PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(render_err)?;
    let panels = root.split_evenly((1, 2));

    let n_epochs = history.epochs.len() as u32;
    let max_loss = history
        .epochs
        .iter()
        .flat_map(|e| [e.train_loss, e.val_loss.unwrap_or(0.0)])
        .fold(0.0f64, f64::max)
        .max(1e-3);

    type Pick = fn(&crate::models::EpochMetrics) -> Option<f64>;
    let panel_specs: [(&str, f64, Pick, Pick); 2] = [
        ("Accuracy", 1.0, |e| Some(e.train_accuracy), |e| e.val_accuracy),
        ("Loss", max_loss * 1.05, |e| Some(e.train_loss), |e| e.val_loss),
    ];

    for (area, (title, y_max, train, val)) in panels.iter().zip(panel_specs) {
        let mut builder = ChartBuilder::on(area);
        builder.margin(10);
        if labelled {
            builder
                .caption(title, ("sans-serif", 28))
                .x_label_area_size(40)
                .y_label_area_size(50);
        }
        let mut chart = builder
            .build_cartesian_2d(1u32..n_epochs.max(2), 0f64..y_max)
            .map_err(render_err)?;

        if labelled {
            chart
                .configure_mesh()
                .x_desc("Epoch")
                .y_desc(title)
                .draw()
                .map_err(render_err)?;
        }

        for (label, pick, color) in [("train", train, &BLUE), ("validation", val, &RED)] {
            let points: Vec<(u32, f64)> = history
                .epochs
                .iter()
                .enumerate()
                .filter_map(|(i, e)| pick(e).map(|v| (i as u32 + 1, v)))
                .collect();
            if points.is_empty() {
                continue;
            }
            chart
                .draw_series(LineSeries::new(points, color))
                .map_err(render_err)?
                .label(label)
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
        }

        if labelled {
            chart
                .configure_series_labels()
                .background_style(WHITE.mix(0.8))
                .border_style(BLACK)
                .draw()
                .map_err(render_err)?;
        }
    }

    root.present().map_err(render_err)
}
