//! Best-effort remote images and the mandatory verification QR code.

use crate::DocumentSpec;
use crate::debug::DebugLogger;
use crate::error::ContractError;
use crate::frame::{Cursor, Frame};
use crate::pdf::flate_compress;
use crate::types::Pt;
use base64::Engine;
use image::GenericImageView;
use reqwest::blocking::Client;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Light modules around the symbol, as the QR standard requires.
const QR_QUIET_ZONE: usize = 4;

/// Why an optional asset could not be retrieved. Never fatal to a render.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no asset url configured")]
    MissingUrl,

    #[error("server responded with status {0}")]
    Status(u16),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed data uri")]
    InvalidDataUri,

    #[error("asset body is empty")]
    Empty,
}

/// Source of remote asset bytes. Implementations must be usable from
/// several renders at once.
pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Blocking HTTP fetcher. The client timeout bounds the only blocking point
/// of a render.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl AssetFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if url.starts_with("data:") {
            return parse_data_uri(url).map(|(_, data)| data);
        }
        let response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = response.bytes()?;
        if body.is_empty() {
            return Err(FetchError::Empty);
        }
        Ok(body.to_vec())
    }
}

/// Fetches an optional asset, folding every failure into `None`.
pub fn fetch_asset(fetcher: &dyn AssetFetcher, url: Option<&str>) -> Option<Vec<u8>> {
    fetch_asset_logged(fetcher, url, None)
}

pub(crate) fn fetch_asset_logged(
    fetcher: &dyn AssetFetcher,
    url: Option<&str>,
    debug: Option<&DebugLogger>,
) -> Option<Vec<u8>> {
    let result = match url.map(str::trim).filter(|url| !url.is_empty()) {
        None => Err(FetchError::MissingUrl),
        Some(url) => fetcher.fetch(url).and_then(|data| {
            if data.is_empty() {
                Err(FetchError::Empty)
            } else {
                Ok(data)
            }
        }),
    };
    match result {
        Ok(data) => Some(data),
        Err(FetchError::MissingUrl) => None,
        Err(err) => {
            log::warn!("asset fetch failed, continuing without it: {err}");
            if let Some(debug) = debug {
                debug.log(json!({"type": "asset.fetch_failed", "reason": err.to_string()}));
                debug.increment("asset.fetch_failed", 1);
            }
            None
        }
    }
}

/// Splits a `data:` URI into its media type and decoded payload.
pub fn parse_data_uri(uri: &str) -> Result<(String, Vec<u8>), FetchError> {
    let rest = uri.strip_prefix("data:").ok_or(FetchError::InvalidDataUri)?;
    let (header, payload) = rest.split_once(',').ok_or(FetchError::InvalidDataUri)?;
    let mut params = header.split(';');
    let mime = params
        .next()
        .filter(|value| !value.is_empty())
        .unwrap_or("application/octet-stream")
        .to_string();
    let data = if params.any(|param| param.eq_ignore_ascii_case("base64")) {
        base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|_| FetchError::InvalidDataUri)?
    } else {
        payload.as_bytes().to_vec()
    };
    if data.is_empty() {
        return Err(FetchError::Empty);
    }
    Ok((mime, data))
}

/// `{base}/{document_id}`, the conventional QR payload.
pub fn verification_url(base: &str, document_id: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), document_id)
}

/// An image XObject ready for serialization.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ImageData {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) color_space: &'static str,
    pub(crate) bits_per_component: u8,
    pub(crate) filter: &'static str,
    pub(crate) data: Vec<u8>,
    pub(crate) alpha: Option<AlphaData>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AlphaData {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) data: Vec<u8>,
}

/// PNG and JPEG only. JPEG streams pass through untouched; everything else
/// becomes flate-compressed RGB with an alpha mask when any pixel is not
/// opaque.
pub(crate) fn decode_image_bytes(data: &[u8]) -> Option<ImageData> {
    let format = image::guess_format(data).ok()?;
    if !matches!(format, image::ImageFormat::Png | image::ImageFormat::Jpeg) {
        return None;
    }
    let decoded = image::load_from_memory_with_format(data, format).ok()?;
    let (width, height) = decoded.dimensions();
    if width == 0 || height == 0 {
        return None;
    }

    if format == image::ImageFormat::Jpeg {
        let color_space = match decoded.color() {
            image::ColorType::L8 | image::ColorType::La8 => "/DeviceGray",
            image::ColorType::Rgb8 | image::ColorType::Rgba8 => "/DeviceRGB",
            // CMYK and 16-bit JPEGs are re-encoded below.
            _ => "",
        };
        if !color_space.is_empty() {
            return Some(ImageData {
                width,
                height,
                color_space,
                bits_per_component: 8,
                filter: "/DCTDecode",
                data: data.to_vec(),
                alpha: None,
            });
        }
    }

    let rgba = decoded.to_rgba8();
    let pixels = (width as usize) * (height as usize);
    let mut rgb = Vec::with_capacity(pixels * 3);
    let mut alpha = Vec::with_capacity(pixels);
    let mut has_alpha = false;
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        has_alpha |= a != 255;
        rgb.extend_from_slice(&[r, g, b]);
        alpha.push(a);
    }
    Some(ImageData {
        width,
        height,
        color_space: "/DeviceRGB",
        bits_per_component: 8,
        filter: "/FlateDecode",
        data: flate_compress(&rgb),
        alpha: has_alpha.then(|| AlphaData {
            width,
            height,
            data: flate_compress(&alpha),
        }),
    })
}

/// Draws the logo at the top-left of the content area. Returns the moved
/// cursor and whether a logo was drawn; absent or undecodable bytes only
/// consume the header gap.
pub(crate) fn embed_logo(
    frame: &mut Frame,
    cursor: Cursor,
    bytes: Option<&[u8]>,
    spec: &DocumentSpec,
    debug: Option<&DebugLogger>,
) -> (Cursor, bool) {
    let image = match bytes {
        Some(bytes) => {
            let decoded = decode_image_bytes(bytes);
            if decoded.is_none() {
                log::warn!("logo bytes are not a supported image; skipping logo");
                if let Some(debug) = debug {
                    debug.log(json!({"type": "asset.logo_skipped", "reason": "undecodable", "bytes": bytes.len()}));
                }
            }
            decoded
        }
        None => None,
    };
    let Some(image) = image else {
        return (frame.advance(cursor, spec.header_gap), false);
    };

    let cursor = frame.ensure_space(cursor, spec.logo_height + spec.header_gap);
    let aspect = image.width as f32 / image.height as f32;
    let mut width = Pt::from_f32(spec.logo_height.to_f32() * aspect);
    let mut height = spec.logo_height;
    let max_width = frame.content_width();
    if width > max_width {
        width = max_width;
        height = Pt::from_f32(max_width.to_f32() / aspect);
    }
    let (pixel_w, pixel_h) = (image.width, image.height);
    let id = frame.add_image(image);
    let x = frame.left();
    frame
        .page_mut(cursor.page_index)
        .draw_image(x, cursor.y - height, width, height, id);
    if let Some(debug) = debug {
        debug.log(json!({
            "type": "asset.logo_embedded",
            "page_index": cursor.page_index,
            "pixels": [pixel_w, pixel_h],
            "width_milli": width.to_milli(),
            "height_milli": height.to_milli(),
        }));
    }
    (frame.advance(cursor, spec.logo_height + spec.header_gap), true)
}

/// Encodes `payload` as a one-pixel-per-module grayscale image including the
/// quiet zone.
pub(crate) fn qr_image(payload: &str) -> Result<ImageData, ContractError> {
    if payload.trim().is_empty() {
        return Err(ContractError::QrGeneration(
            "verification payload is empty".to_string(),
        ));
    }
    let code = qrcode::QrCode::new(payload.as_bytes())
        .map_err(|err| ContractError::QrGeneration(err.to_string()))?;
    let modules = code.width();
    let side = modules + QR_QUIET_ZONE * 2;
    let mut gray = vec![255u8; side * side];
    for (index, color) in code.to_colors().into_iter().enumerate() {
        if color == qrcode::Color::Dark {
            let row = index / modules + QR_QUIET_ZONE;
            let col = index % modules + QR_QUIET_ZONE;
            gray[row * side + col] = 0;
        }
    }
    let side = u32::try_from(side)
        .map_err(|_| ContractError::QrGeneration("symbol too large".to_string()))?;
    Ok(ImageData {
        width: side,
        height: side,
        color_space: "/DeviceGray",
        bits_per_component: 8,
        filter: "/FlateDecode",
        data: flate_compress(&gray),
        alpha: None,
    })
}

/// Places the QR code as a `size` square whose lower-left corner is `(x, y)`.
pub(crate) fn embed_qr(
    frame: &mut Frame,
    page_index: usize,
    x: Pt,
    y: Pt,
    size: Pt,
    payload: &str,
) -> Result<(), ContractError> {
    let image = qr_image(payload)?;
    let id = frame.add_image(image);
    frame.page_mut(page_index).draw_image(x, y, size, size, id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubFetcher {
        response: fn() -> Result<Vec<u8>, FetchError>,
        calls: AtomicUsize,
    }

    impl StubFetcher {
        fn new(response: fn() -> Result<Vec<u8>, FetchError>) -> Self {
            Self {
                response,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl AssetFetcher for StubFetcher {
        fn fetch(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.response)()
        }
    }

    fn tiny_png() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(4, 2, image::Rgba([200, 10, 10, 128]));
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    fn inflate(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        flate2::read::ZlibDecoder::new(data)
            .read_to_end(&mut out)
            .expect("valid zlib");
        out
    }

    #[test]
    fn fetch_failures_fold_into_none() {
        let not_found = StubFetcher::new(|| Err(FetchError::Status(404)));
        assert_eq!(fetch_asset(&not_found, Some("https://cdn.invalid/logo.png")), None);
        let empty = StubFetcher::new(|| Ok(Vec::new()));
        assert_eq!(fetch_asset(&empty, Some("https://cdn.invalid/logo.png")), None);
        let ok = StubFetcher::new(|| Ok(vec![1, 2, 3]));
        assert_eq!(fetch_asset(&ok, Some("https://cdn.invalid/logo.png")), Some(vec![1, 2, 3]));
    }

    #[test]
    fn missing_url_never_reaches_the_fetcher() {
        let fetcher = StubFetcher::new(|| Ok(vec![1]));
        assert_eq!(fetch_asset(&fetcher, None), None);
        assert_eq!(fetch_asset(&fetcher, Some("   ")), None);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn data_uris_decode_locally() {
        let (mime, data) = parse_data_uri("data:image/png;base64,AAEC").expect("valid uri");
        assert_eq!(mime, "image/png");
        assert_eq!(data, vec![0, 1, 2]);
        let (mime, data) = parse_data_uri("data:,hello").expect("raw payload");
        assert_eq!(mime, "application/octet-stream");
        assert_eq!(data, b"hello");
        assert!(matches!(
            parse_data_uri("data:image/png;base64,@@@"),
            Err(FetchError::InvalidDataUri)
        ));
        assert!(matches!(parse_data_uri("https://x"), Err(FetchError::InvalidDataUri)));
    }

    #[test]
    fn http_fetcher_serves_data_uris_without_network() {
        let fetcher = HttpFetcher::new(Duration::from_millis(50)).expect("client");
        let data = fetcher.fetch("data:text/plain;base64,aGk=").expect("decoded");
        assert_eq!(data, b"hi");
    }

    #[test]
    fn verification_url_joins_base_and_id() {
        assert_eq!(
            verification_url("https://verify.example.com/docs/", "C-2024-0042"),
            "https://verify.example.com/docs/C-2024-0042"
        );
    }

    #[test]
    fn png_with_transparency_gets_a_soft_mask() {
        let image = decode_image_bytes(&tiny_png()).expect("decodes");
        assert_eq!((image.width, image.height), (4, 2));
        assert_eq!(image.filter, "/FlateDecode");
        assert_eq!(inflate(&image.data).len(), 4 * 2 * 3);
        let alpha = image.alpha.expect("semi-transparent pixels");
        assert!(inflate(&alpha.data).iter().all(|&a| a == 128));
    }

    #[test]
    fn unsupported_bytes_do_not_decode() {
        assert!(decode_image_bytes(b"<svg xmlns='http://www.w3.org/2000/svg'/>").is_none());
        assert!(decode_image_bytes(&[]).is_none());
    }

    #[test]
    fn undecodable_logo_only_consumes_header_gap() {
        let spec = DocumentSpec::default();
        let mut frame = Frame::new(spec.page_size, spec.margins);
        let start = frame.open();
        let (cursor, drawn) = embed_logo(&mut frame, start, Some(b"not an image"), &spec, None);
        assert!(!drawn);
        assert_eq!(cursor.y, start.y - spec.header_gap);
        let (absent, _) = embed_logo(&mut frame, start, None, &spec, None);
        assert_eq!(absent, cursor);
    }

    #[test]
    fn logo_scales_to_target_height() {
        let spec = DocumentSpec::default();
        let mut frame = Frame::new(spec.page_size, spec.margins);
        let start = frame.open();
        let png = tiny_png();
        let (cursor, drawn) = embed_logo(&mut frame, start, Some(&png), &spec, None);
        assert!(drawn);
        assert_eq!(cursor.y, start.y - spec.logo_height - spec.header_gap);
        let doc = frame.finish(None);
        let drawn = doc.pages[0].commands().iter().find_map(|cmd| match cmd {
            crate::canvas::Command::DrawImage { width, height, .. } => Some((*width, *height)),
            _ => None,
        });
        // 4x2 pixels: twice as wide as tall.
        assert_eq!(drawn, Some((spec.logo_height * 2, spec.logo_height)));
    }

    #[test]
    fn qr_image_includes_quiet_zone() {
        let image = qr_image("https://verify.example.com/C-1").expect("encodes");
        assert_eq!(image.color_space, "/DeviceGray");
        let side = image.width as usize;
        let gray = inflate(&image.data);
        assert_eq!(gray.len(), side * side);
        // Version 1 or larger symbol plus 4 light modules on each side.
        assert!(side >= 21 + 8);
        assert!(gray[..side * QR_QUIET_ZONE].iter().all(|&px| px == 255));
        // Top-left finder pattern starts right after the quiet zone.
        assert_eq!(gray[QR_QUIET_ZONE * side + QR_QUIET_ZONE], 0);
    }

    #[test]
    fn empty_qr_payload_is_fatal() {
        for payload in ["", "   ", "\n\t"] {
            let err = qr_image(payload).expect_err("empty payload");
            assert!(matches!(err, ContractError::QrGeneration(_)));
        }
    }
}
