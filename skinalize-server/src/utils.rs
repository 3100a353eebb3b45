use axum::extract::Multipart;
use base64::Engine as _;
use image::DynamicImage;
use mime_guess::MimeGuess;

use crate::error::AppError;

pub(crate) struct ImageUpload {
    pub image: DynamicImage,
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl ImageUpload {
    pub(crate) fn data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

/// The upload types the UI offers, checked on the file name before any decode
/// work happens.
pub(crate) fn is_supported_image(filename: &str) -> bool {
    match MimeGuess::from_path(filename).first() {
        Some(mime) if mime.type_() == "image" => {
            matches!(mime.subtype().as_str(), "jpeg" | "png")
        }
        _ => false,
    }
}

pub(crate) async fn read_image_field(mut multipart: Multipart) -> Result<ImageUpload, AppError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("image") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        if !is_supported_image(&filename) {
            return Err(AppError::UnsupportedType(filename));
        }
        let mime = MimeGuess::from_path(&filename)
            .first()
            .map(|mime| mime.to_string())
            .unwrap_or_else(|| "image/jpeg".to_string());
        let bytes = field.bytes().await?.to_vec();
        let image = image::load_from_memory(&bytes)?;
        return Ok(ImageUpload { image, bytes, mime });
    }
    Err(AppError::MissingImage)
}

pub(crate) async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install ctrl-c handler");
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_the_offered_upload_types() {
        assert!(is_supported_image("lesion.jpg"));
        assert!(is_supported_image("lesion.jpeg"));
        assert!(is_supported_image("lesion.png"));
        assert!(is_supported_image("UPPER.JPG"));
    }

    #[test]
    fn rejects_everything_else_before_decode() {
        assert!(!is_supported_image("animation.gif"));
        assert!(!is_supported_image("notes.txt"));
        assert!(!is_supported_image("archive.tar.gz"));
        assert!(!is_supported_image("no_extension"));
        assert!(!is_supported_image(""));
    }
}
