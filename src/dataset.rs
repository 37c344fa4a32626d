//! Labelled image dataset loaded from a `root/<genre>/*.{png,jpg,jpeg}` tree.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};

use crate::config::GenreConfig;
use crate::error::{GenreError, Result};
use crate::load_and_show::{has_image_extension, load_image};
use crate::types::{Sample, SpectrogramImage};

#[derive(Debug, Default)]
pub struct Dataset {
    pub samples: Vec<Sample>,
    /// Files that could not be decoded; each was skipped.
    pub failures: Vec<GenreError>,
    /// Genres whose sub-directory was absent.
    pub missing_genres: Vec<String>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn images(&self) -> impl Iterator<Item = &SpectrogramImage> {
        self.samples.iter().map(|s| &s.image)
    }

    pub fn labels(&self) -> Vec<&str> {
        self.samples.iter().map(|s| s.genre.as_str()).collect()
    }
}

fn image_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && has_image_extension(p))
        .collect();
    files.sort();
    Ok(files)
}

/// Walk every configured genre folder under `root`.
///
/// Missing genre folders and undecodable files are logged and skipped; only a
/// missing `root` is an error. Callers decide what an empty result means.
pub fn load(root: &Path, config: &GenreConfig) -> Result<Dataset> {
    if !root.is_dir() {
        return Err(GenreError::MissingData(format!(
            "dataset directory {} does not exist",
            root.display()
        )));
    }

    let mut dataset = Dataset::default();

    for genre in &config.genres {
        let genre_dir = root.join(genre);
        if !genre_dir.is_dir() {
            warn!("Genre folder {} not found, skipping", genre_dir.display());
            dataset.missing_genres.push(genre.clone());
            continue;
        }

        let files = match image_files(&genre_dir) {
            Ok(files) => files,
            Err(e) => {
                warn!("Cannot list {}: {e}", genre_dir.display());
                dataset.missing_genres.push(genre.clone());
                continue;
            }
        };

        let before = dataset.samples.len();
        for path in files {
            match load_image(&path, config.image_size) {
                Ok(image) => dataset.samples.push(Sample {
                    image,
                    genre: genre.clone(),
                    path,
                }),
                Err(e) => {
                    warn!("{e}");
                    dataset.failures.push(e);
                }
            }
        }
        debug!("{genre}: {} images", dataset.samples.len() - before);
    }

    info!(
        "Loaded {} images from {} ({} skipped, {} genre folders missing)",
        dataset.samples.len(),
        root.display(),
        dataset.failures.len(),
        dataset.missing_genres.len()
    );

    Ok(dataset)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::ImageSize;
    use image::{Rgb, RgbImage};
    use std::collections::HashMap;

    pub(crate) fn write_image(path: &Path, width: u32, height: u32, value: u8) {
        RgbImage::from_pixel(width, height, Rgb([value, value / 2, 255 - value]))
            .save(path)
            .unwrap();
    }

    fn config(genres: &[&str]) -> GenreConfig {
        GenreConfig {
            genres: genres.iter().map(|g| g.to_string()).collect(),
            image_size: ImageSize::square(32),
            ..GenreConfig::default()
        }
    }

    #[test]
    fn loads_images_resized_with_labels() {
        let dir = tempfile::tempdir().unwrap();
        for (genre, n) in [("jazz", 3), ("rock", 2)] {
            let genre_dir = dir.path().join(genre);
            fs::create_dir(&genre_dir).unwrap();
            for i in 0..n {
                write_image(&genre_dir.join(format!("{i}.png")), 40 + i * 7, 19, 100);
            }
        }

        let dataset = load(dir.path(), &config(&["jazz", "rock"])).unwrap();
        assert_eq!(dataset.len(), 5);
        assert!(dataset
            .images()
            .all(|img| img.size() == ImageSize::square(32) && img.channels() == 3));

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for label in dataset.labels() {
            *counts.entry(label).or_default() += 1;
        }
        assert_eq!(counts["jazz"], 3);
        assert_eq!(counts["rock"], 2);
    }

    #[test]
    fn missing_genre_folders_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("pop")).unwrap();
        write_image(&dir.path().join("pop/a.png"), 8, 8, 10);

        let dataset = load(dir.path(), &config(&["pop", "metal", "blues"])).unwrap();
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.missing_genres, vec!["metal", "blues"]);
    }

    #[test]
    fn bad_files_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let genre_dir = dir.path().join("disco");
        fs::create_dir(&genre_dir).unwrap();
        write_image(&genre_dir.join("good.png"), 10, 10, 50);
        fs::write(genre_dir.join("bad.jpg"), b"definitely not a jpeg").unwrap();
        fs::write(genre_dir.join("notes.txt"), b"ignored").unwrap();

        let dataset = load(dir.path(), &config(&["disco"])).unwrap();
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.failures.len(), 1);
        assert!(matches!(dataset.failures[0], GenreError::ItemDecode { .. }));
    }

    #[test]
    fn uppercase_extensions_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let genre_dir = dir.path().join("reggae");
        fs::create_dir(&genre_dir).unwrap();
        RgbImage::from_pixel(5, 5, Rgb([1, 2, 3]))
            .save_with_format(genre_dir.join("LOUD.PNG"), image::ImageFormat::Png)
            .unwrap();

        let dataset = load(dir.path(), &config(&["reggae"])).unwrap();
        assert_eq!(dataset.len(), 1);
    }

    #[test]
    fn missing_root_is_missing_data() {
        let result = load(Path::new("/no/such/dataset"), &config(&["rock"]));
        assert!(matches!(result, Err(GenreError::MissingData(_))));
    }
}
