//! Directory-backed frame source
//!
//! Walks every image in a scene directory one row per frame. Files that fail
//! to decode are dropped from the rotation; once nothing decodes the walker
//! only hands out empty frames.
//!
//! `next_frame` runs on the streamer's tick, so the image after the current
//! one is decoded ahead on a background thread. The tick only blocks if that
//! decode is still running when the current image ends.

use super::{FrameSource, SourceError};
use crate::pixels::PixelBuffer;
use image::RgbImage;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use thiserror::Error;

#[derive(Error, Debug)]
enum DecodeError {
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error("image has no pixels")]
    Empty,
}

/// An image being decoded on a background thread
struct Prefetch {
    path: PathBuf,
    decoded: mpsc::Receiver<Result<RgbImage, DecodeError>>,
}

impl Prefetch {
    fn start(path: PathBuf) -> Self {
        let (tx, rx) = mpsc::sync_channel(1);
        let target = path.clone();
        std::thread::spawn(move || {
            // The walker may have moved on; nobody is waiting then.
            let _ = tx.send(decode(&target));
        });
        Self { path, decoded: rx }
    }

    fn wait(self) -> Result<RgbImage, DecodeError> {
        self.decoded.recv().unwrap_or_else(|_| decode(&self.path))
    }
}

enum WalkerState {
    /// An image is decoded and `row` is the next row to hand out
    Loaded { image: RgbImage, row: u32 },
    /// Every candidate file failed to decode
    Exhausted,
}

/// Plays the images of a directory row by row, wrapping around forever
pub struct ImageWalker {
    dir: PathBuf,
    files: Vec<PathBuf>,
    /// Index of the next file to open
    cursor: usize,
    state: WalkerState,
    /// Decode of the file at `cursor`, started when the current image loaded
    prefetch: Option<Prefetch>,
}

impl ImageWalker {
    /// Open a scene directory.
    ///
    /// With more than one image the starting file is picked at random, so
    /// several controllers pointed at the same scene don't run in lockstep.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, SourceError> {
        let files = list_frames(dir.as_ref())?;
        let start = if files.len() > 1 {
            rand::thread_rng().gen_range(0..files.len())
        } else {
            0
        };

        Self::starting_at(dir.as_ref(), files, start)
    }

    fn starting_at(dir: &Path, files: Vec<PathBuf>, start: usize) -> Result<Self, SourceError> {
        let mut walker = Self {
            dir: dir.to_path_buf(),
            files,
            cursor: start,
            state: WalkerState::Exhausted,
            prefetch: None,
        };

        if !walker.advance() {
            return Err(SourceError::NoUsableSource(walker.dir));
        }

        log::info!(
            "Loaded scene {} ({} images)",
            walker.dir.display(),
            walker.files.len()
        );
        Ok(walker)
    }

    /// Load the next decodable file, dropping the ones that fail.
    ///
    /// Returns false once the candidate list is empty.
    fn advance(&mut self) -> bool {
        self.state = WalkerState::Exhausted;
        let mut prefetched = self.prefetch.take();

        while !self.files.is_empty() {
            if self.cursor >= self.files.len() {
                self.cursor = 0;
            }

            let path = &self.files[self.cursor];
            let decoded = match prefetched.take() {
                Some(prefetch) if prefetch.path == *path => prefetch.wait(),
                _ => decode(path),
            };

            match decoded {
                Ok(image) => {
                    self.cursor += 1;
                    self.state = WalkerState::Loaded { image, row: 0 };
                    self.prefetch_next();
                    return true;
                }
                Err(e) => {
                    // The cursor now points at the following candidate.
                    let bad = self.files.remove(self.cursor);
                    log::error!("Error reading {}: {}", bad.display(), e);
                }
            }
        }

        log::error!("No readable images left in {}", self.dir.display());
        false
    }

    /// Start decoding the file after the current one
    fn prefetch_next(&mut self) {
        if self.files.len() < 2 {
            return;
        }
        let next = self.files[self.cursor % self.files.len()].clone();
        self.prefetch = Some(Prefetch::start(next));
    }
}

impl FrameSource for ImageWalker {
    fn next_frame(&mut self) -> PixelBuffer {
        let (frame, finished) = match &mut self.state {
            WalkerState::Exhausted => return PixelBuffer::default(),
            WalkerState::Loaded { image, row } => {
                let frame = PixelBuffer::from_image_row(image, *row);
                *row += 1;
                let finished = *row >= image.height();
                if finished && self.files.len() == 1 {
                    // Only one image: replay it without touching the disk again.
                    *row = 0;
                    (frame, false)
                } else {
                    (frame, finished)
                }
            }
        };

        if finished {
            self.advance();
        }

        frame
    }

    fn release(&mut self) {
        log::debug!("Releasing scene {}", self.dir.display());
        self.state = WalkerState::Exhausted;
        self.prefetch = None;
        self.files.clear();
    }
}

/// Sorted list of candidate frame files in `dir`.
///
/// Subdirectories and names starting with `.` or `_` are skipped.
fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let io_err = |source| SourceError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || name.starts_with('_') {
            continue;
        }
        if entry.file_type().map_err(io_err)?.is_dir() {
            continue;
        }
        files.push(entry.path());
    }

    files.sort();
    Ok(files)
}

fn decode(path: &Path) -> Result<RgbImage, DecodeError> {
    let image = image::open(path)?.to_rgb8();
    if image.width() == 0 || image.height() == 0 {
        return Err(DecodeError::Empty);
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_png(dir: &Path, name: &str, width: u32, height: u32, bytes: Vec<u8>) {
        RgbImage::from_raw(width, height, bytes)
            .unwrap()
            .save(dir.join(name))
            .unwrap();
    }

    fn three_image_scene() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "a.png", 2, 1, vec![1, 1, 1, 2, 2, 2]);
        write_png(dir.path(), "b.png", 2, 1, vec![3, 3, 3, 4, 4, 4]);
        write_png(dir.path(), "c.png", 2, 1, vec![5, 5, 5, 6, 6, 6]);
        dir
    }

    #[test]
    fn test_list_frames_skips_hidden_and_dirs() {
        let dir = three_image_scene();
        write_png(dir.path(), ".hidden.png", 1, 1, vec![0, 0, 0]);
        write_png(dir.path(), "_draft.png", 1, 1, vec![0, 0, 0]);
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let files = list_frames(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.png", "b.png", "c.png"]);
    }

    #[test]
    fn test_walks_images_in_cyclic_order() {
        let dir = three_image_scene();
        let mut walker = ImageWalker::open(dir.path()).unwrap();

        let order: [&[u8]; 3] = [
            &[1, 1, 1, 2, 2, 2],
            &[3, 3, 3, 4, 4, 4],
            &[5, 5, 5, 6, 6, 6],
        ];

        let first = walker.next_frame();
        assert_eq!(first.len(), 6);
        let start = order
            .iter()
            .position(|f| *f == first.as_bytes())
            .expect("first frame should be one of the images");

        for step in 1..7 {
            let frame = walker.next_frame();
            assert_eq!(frame.as_bytes(), order[(start + step) % 3]);
        }
    }

    #[test]
    fn test_fixed_start_follows_file_order() {
        let dir = three_image_scene();
        let files = list_frames(dir.path()).unwrap();
        let mut walker = ImageWalker::starting_at(dir.path(), files, 1).unwrap();

        assert_eq!(walker.next_frame().as_bytes(), &[3, 3, 3, 4, 4, 4]);
        assert_eq!(walker.next_frame().as_bytes(), &[5, 5, 5, 6, 6, 6]);
        assert_eq!(walker.next_frame().as_bytes(), &[1, 1, 1, 2, 2, 2]);
    }

    #[test]
    fn test_single_image_replays_rows() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "only.png", 1, 2, vec![10, 20, 30, 40, 50, 60]);

        let mut walker = ImageWalker::open(dir.path()).unwrap();
        // Remove the file: replaying must not reopen it.
        std::fs::remove_file(dir.path().join("only.png")).unwrap();

        for _ in 0..3 {
            assert_eq!(walker.next_frame().as_bytes(), &[10, 20, 30]);
            assert_eq!(walker.next_frame().as_bytes(), &[40, 50, 60]);
        }
    }

    #[test]
    fn test_corrupt_files_are_dropped() {
        let dir = three_image_scene();
        std::fs::write(dir.path().join("broken.png"), b"not an image").unwrap();

        let files = list_frames(dir.path()).unwrap();
        assert_eq!(files.len(), 4);

        // Sorted order is a, b, broken, c: start on the broken file.
        let mut walker = ImageWalker::starting_at(dir.path(), files, 2).unwrap();
        assert_eq!(walker.files.len(), 3);
        assert_eq!(walker.next_frame().as_bytes(), &[5, 5, 5, 6, 6, 6]);
        assert_eq!(walker.next_frame().as_bytes(), &[1, 1, 1, 2, 2, 2]);
        assert_eq!(walker.next_frame().as_bytes(), &[3, 3, 3, 4, 4, 4]);
        assert_eq!(walker.next_frame().as_bytes(), &[5, 5, 5, 6, 6, 6]);
    }

    #[test]
    fn test_no_usable_images() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageWalker::open(dir.path()),
            Err(SourceError::NoUsableSource(_))
        ));

        std::fs::write(dir.path().join("junk.jpg"), b"\x00\x01\x02").unwrap();
        assert!(matches!(
            ImageWalker::open(dir.path()),
            Err(SourceError::NoUsableSource(_))
        ));
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            ImageWalker::open(&missing),
            Err(SourceError::Io { .. })
        ));
    }

    #[test]
    fn test_exhausted_walker_returns_empty_frames() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "a.png", 1, 1, vec![1, 2, 3]);
        let files = vec![dir.path().join("a.png"), dir.path().join("b.png")];

        let mut walker = ImageWalker::starting_at(dir.path(), files, 0).unwrap();
        // a.png is already decoded; b.png never existed.
        std::fs::remove_file(dir.path().join("a.png")).unwrap();

        assert_eq!(walker.next_frame().as_bytes(), &[1, 2, 3]);
        assert!(walker.next_frame().is_empty());
        assert!(walker.next_frame().is_empty());
        assert!(walker.files.is_empty());
    }

    #[test]
    fn test_next_image_is_decoded_ahead() {
        let dir = three_image_scene();
        let files = list_frames(dir.path()).unwrap();
        let mut walker = ImageWalker::starting_at(dir.path(), files.clone(), 1).unwrap();

        let pending = |walker: &ImageWalker| walker.prefetch.as_ref().map(|p| p.path.clone());
        assert_eq!(pending(&walker), Some(files[2].clone()));

        assert_eq!(walker.next_frame().as_bytes(), &[3, 3, 3, 4, 4, 4]);
        // Wraps back to the first file.
        assert_eq!(pending(&walker), Some(files[0].clone()));
        assert_eq!(walker.next_frame().as_bytes(), &[5, 5, 5, 6, 6, 6]);
        assert_eq!(pending(&walker), Some(files[1].clone()));
    }

    #[test]
    fn test_corrupt_file_decoded_ahead_is_dropped() {
        let dir = three_image_scene();
        std::fs::write(dir.path().join("broken.png"), b"not an image").unwrap();

        // Starting on b.png puts broken.png next in line.
        let files = list_frames(dir.path()).unwrap();
        let mut walker = ImageWalker::starting_at(dir.path(), files, 1).unwrap();

        assert_eq!(walker.next_frame().as_bytes(), &[3, 3, 3, 4, 4, 4]);
        assert_eq!(walker.files.len(), 3);
        assert_eq!(walker.next_frame().as_bytes(), &[5, 5, 5, 6, 6, 6]);
        assert_eq!(walker.next_frame().as_bytes(), &[1, 1, 1, 2, 2, 2]);
    }

    #[test]
    fn test_single_image_has_nothing_to_decode_ahead() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "only.png", 1, 1, vec![9, 9, 9]);
        let walker = ImageWalker::open(dir.path()).unwrap();
        assert!(walker.prefetch.is_none());
    }

    #[test]
    fn test_release_clears_state() {
        let dir = three_image_scene();
        let mut walker = ImageWalker::open(dir.path()).unwrap();
        walker.release();
        assert!(walker.prefetch.is_none());
        assert!(walker.next_frame().is_empty());
    }
}
