//! Placeholder frames: script text split into pages and rendered onto plain
//! canvases. Used when no external visuals are available.

use fontdue::{Font, FontSettings};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Orientation;
use crate::{Error, Result};

const BACKGROUND: Rgb<u8> = Rgb([18, 18, 18]);
const TEXT_COLOR: Rgb<u8> = Rgb([240, 240, 240]);
const FOOTER_COLOR: Rgb<u8> = Rgb([160, 160, 160]);
const FONT_SIZE: f32 = 40.0;
const MARGIN: u32 = 60;
const FIRST_LINE_Y: u32 = 80;
const LINE_SPACING: u32 = FONT_SIZE as u32 + 8;
const FOOTER_OFFSET: u32 = 70;
const MIN_CHUNK_CHARS: usize = 80;

const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
    "/System/Library/Fonts/Supplemental/Arial Bold.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arialbd.ttf",
];

/// Split `text` into exactly `count` contiguous chunks.
///
/// Non-empty lines are flattened into one string, cut every
/// `max(80, len / count)` characters, then padded with empty chunks or
/// truncated to `count`.
pub fn chunk_script(text: &str, count: usize) -> Vec<String> {
    if count == 0 {
        return Vec::new();
    }

    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let combined = if lines.is_empty() {
        text.to_string()
    } else {
        lines.join(" ")
    };

    let chars: Vec<char> = combined.chars().collect();
    let chunk_len = (chars.len() / count).max(MIN_CHUNK_CHARS);

    let mut chunks: Vec<String> = chars
        .chunks(chunk_len)
        .map(|c| c.iter().collect())
        .collect();
    chunks.resize(count, String::new());
    chunks
}

/// Greedy word wrap: a word moves to the next line once the current line
/// would exceed `max_width`. A single over-long word keeps its own line.
fn wrap_words(text: &str, max_width: f32, measure: impl Fn(&str) -> f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();

    for word in text.split(' ') {
        let candidate = if line.is_empty() {
            word.to_string()
        } else {
            format!("{line} {word}")
        };
        let candidate = candidate.trim().to_string();

        if measure(&candidate) > max_width && !line.is_empty() {
            lines.push(std::mem::take(&mut line));
            line = word.to_string();
        } else {
            line = candidate;
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

fn load_font(path: &Path) -> Option<Font> {
    let bytes = std::fs::read(path).ok()?;
    match Font::from_bytes(bytes, FontSettings::default()) {
        Ok(font) => Some(font),
        Err(e) => {
            warn!(path = %path.display(), error = e, "Unusable font file");
            None
        }
    }
}

/// Renders placeholder frames at the orientation's resolution.
#[derive(Clone)]
pub struct PlaceholderRenderer {
    width: u32,
    height: u32,
    font: Option<Arc<Font>>,
}

impl std::fmt::Debug for PlaceholderRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaceholderRenderer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("has_font", &self.font.is_some())
            .finish()
    }
}

impl PlaceholderRenderer {
    /// Load the configured font, or the first usable system font.
    pub fn new(orientation: Orientation, font_path: Option<&Path>) -> Self {
        let font = font_path
            .and_then(load_font)
            .or_else(|| {
                SYSTEM_FONT_CANDIDATES
                    .iter()
                    .map(Path::new)
                    .find_map(load_font)
            });

        if font.is_none() {
            warn!("No usable font found, placeholder frames will carry no text");
        }

        Self::with_font(orientation, font)
    }

    pub fn with_font(orientation: Orientation, font: Option<Font>) -> Self {
        let (width, height) = orientation.resolution();
        Self {
            width,
            height,
            font: font.map(Arc::new),
        }
    }

    /// Render exactly `count` frames of `script` into `dest`.
    pub async fn render(&self, script: &str, count: usize, dest: &Path) -> Result<Vec<PathBuf>> {
        let chunks = chunk_script(script, count);
        let renderer = self.clone();
        let dest = dest.to_path_buf();

        tokio::task::spawn_blocking(move || renderer.render_blocking(&chunks, &dest))
            .await
            .map_err(|e| Error::Other(format!("Frame rendering task failed: {}", e)))?
    }

    fn render_blocking(&self, chunks: &[String], dest: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dest)
            .map_err(|e| Error::io_path("creating frame directory", dest, e))?;

        let total = chunks.len();
        let mut paths = Vec::with_capacity(total);
        for (idx, chunk) in chunks.iter().enumerate() {
            let frame = self.render_frame(chunk, idx + 1, total);
            let path = dest.join(format!("frame_{:03}.png", idx + 1));
            frame.save_with_format(&path, image::ImageFormat::Png)?;
            paths.push(path);
        }

        debug!(frames = paths.len(), dest = %dest.display(), "Rendered placeholder frames");
        Ok(paths)
    }

    fn render_frame(&self, chunk: &str, page: usize, total: usize) -> RgbImage {
        let mut img = RgbImage::from_pixel(self.width, self.height, BACKGROUND);

        let Some(font) = self.font.as_deref() else {
            return img;
        };

        let max_width = self.width.saturating_sub(MARGIN * 2) as f32;
        let mut y = FIRST_LINE_Y;
        for line in wrap_words(chunk, max_width, |s| text_width(font, s)) {
            if y + LINE_SPACING > self.height.saturating_sub(FOOTER_OFFSET) {
                break;
            }
            draw_text(&mut img, font, MARGIN, y, &line, TEXT_COLOR);
            y += LINE_SPACING;
        }

        let footer = format!("{page}/{total}");
        draw_text(
            &mut img,
            font,
            MARGIN,
            self.height.saturating_sub(FOOTER_OFFSET),
            &footer,
            FOOTER_COLOR,
        );
        img
    }
}

fn text_width(font: &Font, text: &str) -> f32 {
    text.chars()
        .map(|ch| font.metrics(ch, FONT_SIZE).advance_width)
        .sum()
}

/// Alpha-blend `text` with its top edge at `top`.
fn draw_text(img: &mut RgbImage, font: &Font, left: u32, top: u32, text: &str, color: Rgb<u8>) {
    let ascent = font
        .horizontal_line_metrics(FONT_SIZE)
        .map(|m| m.ascent)
        .unwrap_or(FONT_SIZE * 0.8);
    let baseline = top as f32 + ascent;
    let mut pen_x = left as f32;

    for ch in text.chars() {
        let (metrics, bitmap) = font.rasterize(ch, FONT_SIZE);
        let origin_x = pen_x.round() as i64 + metrics.xmin as i64;
        let origin_y = baseline.round() as i64 - metrics.height as i64 - metrics.ymin as i64;

        for row in 0..metrics.height {
            for col in 0..metrics.width {
                let coverage = bitmap[row * metrics.width + col];
                if coverage == 0 {
                    continue;
                }
                let x = origin_x + col as i64;
                let y = origin_y + row as i64;
                if x < 0 || y < 0 || x >= img.width() as i64 || y >= img.height() as i64 {
                    continue;
                }
                let pixel = img.get_pixel_mut(x as u32, y as u32);
                let alpha = coverage as u32;
                for c in 0..3 {
                    pixel.0[c] = ((color.0[c] as u32 * alpha + pixel.0[c] as u32 * (255 - alpha))
                        / 255) as u8;
                }
            }
        }
        pen_x += metrics.advance_width;
    }
}
