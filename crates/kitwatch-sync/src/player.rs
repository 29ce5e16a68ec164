//! Photo → OCR → roster resolution for one listing.

use std::sync::Arc;

use kitwatch_adapters::{decode_image, ImageError, ImageSource, OcrEngine, OcrError};
use kitwatch_core::{PlayerMatch, PlayerMatcher};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PhotoError {
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Ocr(#[from] OcrError),
}

pub struct PlayerResolver {
    images: Arc<dyn ImageSource>,
    ocr: Arc<dyn OcrEngine>,
    matcher: PlayerMatcher,
}

impl PlayerResolver {
    pub fn new(images: Arc<dyn ImageSource>, ocr: Arc<dyn OcrEngine>, matcher: PlayerMatcher) -> Self {
        Self {
            images,
            ocr,
            matcher,
        }
    }

    /// Photos are tried in listing order; the first accepted span ends the search.
    /// A photo that cannot be fetched, decoded, or read is skipped.
    pub async fn resolve(&self, photo_urls: &[String]) -> Option<PlayerMatch> {
        for url in photo_urls {
            match self.resolve_photo(url).await {
                Ok(Some(found)) => {
                    info!(photo = %url, span = %found.span, player = %found.name, score = found.score, "player resolved");
                    return Some(found);
                }
                Ok(None) => debug!(photo = %url, "no player text on photo"),
                Err(err) => warn!(photo = %url, error = %err, "skipping photo"),
            }
        }
        None
    }

    async fn resolve_photo(&self, url: &str) -> Result<Option<PlayerMatch>, PhotoError> {
        let bytes = self.images.fetch_image(url).await?;
        let image = decode_image(&bytes)?;
        let spans = self.ocr.read_text(&image).await?;
        Ok(self.matcher.match_spans(spans.iter().map(|s| s.text.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
    use kitwatch_adapters::{BoundingBox, OcrSpan};
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::Mutex;

    fn png_bytes(width: u32) -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(width, 2, Rgb([0, 0, 0]));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png).unwrap();
        out
    }

    /// Serves fixed bodies per URL; unknown URLs fail retrieval.
    struct MapImages {
        bodies: HashMap<String, Vec<u8>>,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ImageSource for MapImages {
        async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, ImageError> {
            self.requested.lock().unwrap().push(url.to_string());
            self.bodies.get(url).cloned().ok_or_else(|| ImageError::Retrieval {
                url: url.to_string(),
                reason: "404".into(),
            })
        }
    }

    /// Returns the spans registered for the decoded image width.
    struct WidthOcr {
        by_width: HashMap<u32, Vec<&'static str>>,
    }

    #[async_trait]
    impl OcrEngine for WidthOcr {
        async fn read_text(&self, image: &DynamicImage) -> Result<Vec<OcrSpan>, OcrError> {
            let Some(texts) = self.by_width.get(&image.width()) else {
                return Err(OcrError::Engine("engine crashed".into()));
            };
            Ok(texts
                .iter()
                .map(|t| OcrSpan {
                    region: BoundingBox::default(),
                    text: t.to_string(),
                    confidence: 0.9,
                })
                .collect())
        }
    }

    fn matcher() -> PlayerMatcher {
        PlayerMatcher::new(["saka", "rice", "emirates"], ["emirates", "fly"], 85.0, 3)
    }

    fn resolver(bodies: Vec<(&str, Vec<u8>)>, ocr: Vec<(u32, Vec<&'static str>)>) -> (PlayerResolver, Arc<MapImages>) {
        let images = Arc::new(MapImages {
            bodies: bodies.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            requested: Mutex::new(Vec::new()),
        });
        let ocr = Arc::new(WidthOcr {
            by_width: ocr.into_iter().collect(),
        });
        (PlayerResolver::new(images.clone(), ocr, matcher()), images)
    }

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn failing_photos_are_skipped_until_one_resolves() {
        let (resolver, images) = resolver(
            vec![
                ("https://img/garbage.jpg", b"not an image".to_vec()),
                ("https://img/sponsor.jpg", png_bytes(2)),
                ("https://img/back.jpg", png_bytes(3)),
                ("https://img/unused.jpg", png_bytes(4)),
            ],
            vec![(2, vec!["FLY EMIRATES"]), (3, vec!["7", "SAKA"]), (4, vec!["RICE"])],
        );

        let found = resolver
            .resolve(&urls(&[
                "https://img/missing.jpg",
                "https://img/garbage.jpg",
                "https://img/sponsor.jpg",
                "https://img/back.jpg",
                "https://img/unused.jpg",
            ]))
            .await
            .expect("player");

        assert_eq!(found.name, "saka");
        assert_eq!(found.span, "SAKA");
        assert_eq!(
            images.requested.lock().unwrap().as_slice(),
            &urls(&[
                "https://img/missing.jpg",
                "https://img/garbage.jpg",
                "https://img/sponsor.jpg",
                "https://img/back.jpg",
            ])[..]
        );
    }

    #[tokio::test]
    async fn exclusion_words_block_roster_matches() {
        let (resolver, _) = resolver(
            vec![("https://img/front.jpg", png_bytes(2))],
            vec![(2, vec!["Emirates"])],
        );
        assert!(resolver.resolve(&urls(&["https://img/front.jpg"])).await.is_none());
    }

    #[tokio::test]
    async fn ocr_failure_moves_to_next_photo() {
        let (resolver, _) = resolver(
            vec![("https://img/a.jpg", png_bytes(5)), ("https://img/b.jpg", png_bytes(3))],
            vec![(3, vec!["RICE"])],
        );
        let found = resolver
            .resolve(&urls(&["https://img/a.jpg", "https://img/b.jpg"]))
            .await
            .expect("player");
        assert_eq!(found.name, "rice");
    }

    #[tokio::test]
    async fn no_photos_means_no_player() {
        let (resolver, _) = resolver(vec![], vec![]);
        assert!(resolver.resolve(&[]).await.is_none());
    }
}
