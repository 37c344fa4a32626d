//! Audio to spectrogram-image conversion.

use std::path::Path;

use log::{info, warn};

use crate::config::GenreConfig;
use crate::error::{GenreError, Result};
use crate::load_and_show::{load_wav, plot_mel_spectrogram};
use crate::process::{mel_spectrogram, power_to_db};

/// Render `audio_path` as a mel spectrogram image at `output_path`.
///
/// On failure no output file is left behind.
pub fn convert(audio_path: &Path, output_path: &Path, config: &GenreConfig) -> Result<()> {
    let result = render(audio_path, output_path, config);
    if let Err(e) = &result {
        warn!("Spectrogram conversion failed for {}: {e}", audio_path.display());
        if output_path.exists() {
            let _ = std::fs::remove_file(output_path);
        }
    }
    result
}

fn render(audio_path: &Path, output_path: &Path, config: &GenreConfig) -> Result<()> {
    let signal = load_wav(audio_path)?;
    if signal.samples.is_empty() || signal.sample_rate == 0 {
        return Err(GenreError::item_decode(audio_path, "audio contains no samples"));
    }

    let mel = mel_spectrogram(&signal.samples, signal.sample_rate, &config.spectrogram);
    let db = power_to_db(&mel, config.spectrogram.top_db);
    plot_mel_spectrogram(&db, config.image_size, output_path)?;

    info!(
        "Spectrogram of {} ({} samples @ {} Hz) saved to {}",
        audio_path.display(),
        signal.samples.len(),
        signal.sample_rate,
        output_path.display()
    );
    Ok(())
}
