use std::{
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::warn;
use recognising_genres::{
    load_and_show::plot_history, load_config, train_model, GenreConfig, Predictor,
};

/// Music genre recognition from spectrogram images
#[derive(Parser)]
#[command(name = "recognising_genres")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// JSON configuration file (defaults are used when absent)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train on a `<genre>/*.png` directory tree, then start the prompt loop
    Train {
        /// Dataset root directory
        dataset: PathBuf,

        /// Exit after training instead of prompting for audio files
        #[arg(long)]
        no_interactive: bool,

        /// Save accuracy and loss curves to this PNG
        #[arg(long)]
        history_plot: Option<PathBuf>,
    },
    /// Predict the genre of one spectrogram image
    Predict {
        /// Spectrogram image (png/jpg)
        image: PathBuf,
    },
    /// Repeatedly classify WAV files typed on stdin
    Interactive,
}

const EXIT_WORDS: [&str; 2] = ["exit", "quit"];

fn interactive(predictor: &Predictor) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("WAV file to classify ('exit' to quit): ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            println!();
            return Ok(());
        };
        let input = line?;
        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&input.to_lowercase().as_str()) {
            return Ok(());
        }

        match predictor.predict_audio(Path::new(input)) {
            Ok(p) => println!("Predicted genre: {} ({:.1}%)", p.genre, p.confidence * 100.0),
            Err(e) => warn!("{e}"),
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => GenreConfig::default(),
    };

    match cli.command {
        Commands::Train {
            dataset,
            no_interactive,
            history_plot,
        } => {
            let outcome = train_model(&dataset, &config)
                .with_context(|| format!("Training on {} failed", dataset.display()))?;

            println!("Test accuracy: {:.3}", outcome.test_accuracy);
            println!("{}", outcome.report);

            if let Some(path) = history_plot {
                plot_history(&outcome.history, &path)
                    .with_context(|| format!("Could not plot to {}", path.display()))?;
            }

            if !no_interactive {
                let predictor = Predictor::from_parts(outcome.model, outcome.encoder, &config);
                interactive(&predictor)?;
            }
        }
        Commands::Predict { image } => {
            let prediction = Predictor::load(&config)?
                .predict(&image)
                .with_context(|| format!("Could not classify {}", image.display()))?;
            println!(
                "Predicted genre: {} ({:.1}%)",
                prediction.genre,
                prediction.confidence * 100.0
            );
        }
        Commands::Interactive => {
            let predictor = Predictor::load(&config)?;
            interactive(&predictor)?;
        }
    }

    Ok(())
}
