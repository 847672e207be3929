use cb_core::MimeType;
use image::ImageFormat;

/// What an exported file is, as far as naming and encoding go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Image(ImageFormat),
    Text,
    Html,
    Binary,
}

impl ContentType {
    const SUPPORTED_IMAGES: [ImageFormat; 4] = [
        ImageFormat::Png,
        ImageFormat::Jpeg,
        ImageFormat::WebP,
        ImageFormat::Bmp,
    ];

    /// Sniff the payload. Anything that is not a supported image is binary.
    pub fn sniff(payload: &[u8]) -> Self {
        match image::guess_format(payload) {
            Ok(format) if Self::SUPPORTED_IMAGES.contains(&format) => Self::Image(format),
            _ => Self::Binary,
        }
    }

    pub fn from_mime(mime: &MimeType) -> Option<Self> {
        let content = match mime.as_str() {
            "text/plain" => Self::Text,
            "text/html" => Self::Html,
            "application/octet-stream" => Self::Binary,
            other => {
                let format = ImageFormat::from_mime_type(other)?;
                if !Self::SUPPORTED_IMAGES.contains(&format) {
                    return None;
                }
                Self::Image(format)
            }
        };
        Some(content)
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Image(ImageFormat::Jpeg) => "jpg",
            Self::Image(format) => format.extensions_str().first().copied().unwrap_or("img"),
            Self::Text => "txt",
            Self::Html => "html",
            Self::Binary => "bin",
        }
    }

    pub fn image_format(self) -> Option<ImageFormat> {
        match self {
            Self::Image(format) => Some(format),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_png_signature() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert_eq!(ContentType::sniff(&png), ContentType::Image(ImageFormat::Png));
        assert_eq!(ContentType::sniff(b"plain text"), ContentType::Binary);
    }

    #[test]
    fn maps_known_mime_types() {
        let jpeg = ContentType::from_mime(&MimeType("image/jpeg".into())).unwrap();
        assert_eq!(jpeg, ContentType::Image(ImageFormat::Jpeg));
        assert_eq!(jpeg.extension(), "jpg");
        assert_eq!(
            ContentType::from_mime(&MimeType::image_png()).map(ContentType::extension),
            Some("png")
        );
        assert_eq!(
            ContentType::from_mime(&MimeType::text_plain()),
            Some(ContentType::Text)
        );
        assert_eq!(ContentType::from_mime(&MimeType("image/tiff".into())), None);
        assert_eq!(ContentType::from_mime(&MimeType("video/mp4".into())), None);
    }
}
