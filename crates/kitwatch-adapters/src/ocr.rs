//! OCR contract and a `tesseract` CLI backed engine.

use std::path::PathBuf;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    fn right(&self) -> u32 {
        self.left.saturating_add(self.width)
    }

    fn bottom(&self) -> u32 {
        self.top.saturating_add(self.height)
    }

    fn union(self, other: BoundingBox) -> BoundingBox {
        let left = self.left.min(other.left);
        let top = self.top.min(other.top);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        BoundingBox {
            left,
            top,
            width: right - left,
            height: bottom - top,
        }
    }
}

/// One detected piece of text. Only `text` feeds player matching.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrSpan {
    pub region: BoundingBox,
    pub text: String,
    pub confidence: f32,
}

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("preparing image for ocr: {0}")]
    Prepare(String),
    #[error("running ocr engine: {0}")]
    Engine(String),
}

/// Text detection over a decoded image; spans come back in detection order.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn read_text(&self, image: &DynamicImage) -> Result<Vec<OcrSpan>, OcrError>;
}

/// Runs the `tesseract` binary in TSV mode and groups recognised words into lines.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: PathBuf,
    lang: String,
}

impl TesseractOcr {
    pub fn new(binary: impl Into<PathBuf>, lang: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            lang: lang.into(),
        }
    }
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self::new("tesseract", "eng")
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn read_text(&self, image: &DynamicImage) -> Result<Vec<OcrSpan>, OcrError> {
        let image = image.clone();
        let file = tokio::task::spawn_blocking(move || write_temp_png(&image))
            .await
            .map_err(|e| OcrError::Prepare(e.to_string()))??;

        let output = Command::new(&self.binary)
            .arg(file.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.lang)
            .arg("tsv")
            .output()
            .await
            .map_err(|e| OcrError::Engine(format!("spawning {}: {e}", self.binary.display())))?;

        if !output.status.success() {
            return Err(OcrError::Engine(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let spans = parse_tesseract_tsv(&String::from_utf8_lossy(&output.stdout));
        debug!(spans = spans.len(), "ocr finished");
        Ok(spans)
    }
}

fn write_temp_png(image: &DynamicImage) -> Result<NamedTempFile, OcrError> {
    let file = tempfile::Builder::new()
        .prefix("kitwatch-ocr-")
        .suffix(".png")
        .tempfile()
        .map_err(|e| OcrError::Prepare(e.to_string()))?;
    image
        .save_with_format(file.path(), ImageFormat::Png)
        .map_err(|e| OcrError::Prepare(e.to_string()))?;
    Ok(file)
}

/// Tesseract TSV columns: level, page, block, par, line, word, left, top, width, height, conf, text.
pub fn parse_tesseract_tsv(tsv: &str) -> Vec<OcrSpan> {
    let mut spans = Vec::new();
    let mut current: Option<((u32, u32, u32, u32), OcrSpan, usize)> = None;

    for line in tsv.lines().skip(1) {
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let text = cols[11].trim();
        if text.is_empty() {
            continue;
        }
        let num = |i: usize| cols[i].trim().parse::<u32>().unwrap_or(0);
        let key = (num(1), num(2), num(3), num(4));
        let region = BoundingBox {
            left: num(6),
            top: num(7),
            width: num(8),
            height: num(9),
        };
        let confidence = cols[10].trim().parse::<f32>().unwrap_or(0.0);

        if let Some((_, span, words)) = current.as_mut().filter(|(k, _, _)| *k == key) {
            span.text.push(' ');
            span.text.push_str(text);
            span.region = span.region.union(region);
            span.confidence += confidence;
            *words += 1;
            continue;
        }

        if let Some(done) = current.take() {
            spans.push(finish_span(done));
        }
        current = Some((
            key,
            OcrSpan {
                region,
                text: text.to_string(),
                confidence,
            },
            1,
        ));
    }
    if let Some(done) = current.take() {
        spans.push(finish_span(done));
    }
    spans
}

fn finish_span((_, mut span, words): ((u32, u32, u32, u32), OcrSpan, usize)) -> OcrSpan {
    span.confidence /= words as f32;
    span
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t800\t600\t-1\t
4\t1\t1\t1\t1\t0\t100\t50\t300\t40\t-1\t
5\t1\t1\t1\t1\t1\t100\t50\t120\t40\t91.5\tFly
5\t1\t1\t1\t1\t2\t230\t52\t170\t38\t88.5\tEmirates
5\t1\t2\t1\t1\t1\t300\t200\t140\t60\t95\tSAKA
5\t1\t2\t1\t1\t2\t460\t200\t10\t60\t-1\t
5\t1\t3\t1\t1\t1\t320\t300\t60\t90\t80\t7
";

    #[test]
    fn words_are_grouped_into_lines_in_order() {
        let spans = parse_tesseract_tsv(SAMPLE_TSV);
        let texts: Vec<&str> = spans.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["Fly Emirates", "SAKA", "7"]);

        assert_eq!(
            spans[0].region,
            BoundingBox {
                left: 100,
                top: 50,
                width: 300,
                height: 40
            }
        );
        assert!((spans[0].confidence - 90.0).abs() < 1e-3);
        assert_eq!(spans[1].confidence, 95.0);
    }

    #[test]
    fn union_of_boxes_near_u32_max_saturates() {
        let edge = BoundingBox {
            left: u32::MAX - 5,
            top: 10,
            width: 100,
            height: u32::MAX,
        };
        let small = BoundingBox {
            left: 0,
            top: 0,
            width: 10,
            height: 10,
        };
        let merged = small.union(edge);
        assert_eq!(merged.left, 0);
        assert_eq!(merged.width, u32::MAX);
        assert_eq!(merged.height, u32::MAX);

        let tsv = format!(
            "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
             5\t1\t1\t1\t1\t1\t{}\t0\t{}\t20\t90\tSAKA\n\
             5\t1\t1\t1\t1\t2\t0\t0\t10\t20\t80\t7\n",
            u32::MAX,
            u32::MAX
        );
        let spans = parse_tesseract_tsv(&tsv);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "SAKA 7");
        assert_eq!(spans[0].region.width, u32::MAX);
    }

    #[tokio::test]
    async fn prepared_image_is_a_readable_png() {
        let img = DynamicImage::new_rgb8(6, 4);
        let file = tokio::task::spawn_blocking(move || write_temp_png(&img))
            .await
            .unwrap()
            .unwrap();
        let decoded = image::open(file.path()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (6, 4));
    }

    #[test]
    fn empty_or_header_only_output_has_no_spans() {
        assert!(parse_tesseract_tsv("").is_empty());
        assert!(parse_tesseract_tsv("level\tpage_num\n").is_empty());
    }
}
