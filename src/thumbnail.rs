use eframe::egui::ColorImage;

/// Module for downloading and decoding playlist entry thumbnails.
///
/// Uses the listing's thumbnail URL when there is one, otherwise YouTube's
/// standard image for the video ID.
pub fn fetch_thumbnail(thumbnail_url: Option<&str>, video_id: Option<&str>) -> Option<ColorImage> {
    let url = match (thumbnail_url, video_id) {
        (Some(url), _) => url.to_string(),
        (None, Some(id)) => format!("https://img.youtube.com/vi/{id}/mqdefault.jpg"),
        (None, None) => return None,
    };
    let bytes = match reqwest::blocking::get(&url).and_then(|r| r.error_for_status()?.bytes()) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "thumbnail download failed");
            return None;
        }
    };
    let img = match image::load_from_memory(&bytes) {
        Ok(img) => img.thumbnail(160, 90).to_rgba8(),
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "thumbnail decode failed");
            return None;
        }
    };
    let size = [img.width() as usize, img.height() as usize];
    Some(ColorImage::from_rgba_unmultiplied(size, &img))
}
