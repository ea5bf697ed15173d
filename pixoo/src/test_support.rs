//! Fixtures shared by the display and scheduler tests.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::codecs::gif::GifEncoder;
use image::{Delay, Frame, ImageFormat, Rgba, RgbaImage};
use pixoo_codec::CommandFrame;

use crate::config::{ConnectionConfig, PlaybackConfig};
use crate::display::Display;
use crate::session::Session;
use crate::transport::mock::MockTransport;
use crate::transport::SerialTransport;

pub const ADDRESS: &str = "11:22:33:44:55:66";

pub fn write_png(dir: &Path, name: &str, size: u32, color: [u8; 4]) -> PathBuf {
    let img = RgbaImage::from_pixel(size, size, Rgba(color));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();

    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

pub fn write_gif(dir: &Path, name: &str, size: u32, colors: &[[u8; 4]], delay_ms: u32) -> PathBuf {
    let mut bytes = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut bytes);
        let frames = colors.iter().map(|&c| {
            Frame::from_parts(
                RgbaImage::from_pixel(size, size, Rgba(c)),
                0,
                0,
                Delay::from_numer_denom_ms(delay_ms, 1),
            )
        });
        encoder.encode_frames(frames).unwrap();
    }

    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// A display connected to a fresh mock transport
pub async fn connected_display() -> (Display, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::new(0));
    let session = Session::new(
        Arc::clone(&transport) as Arc<dyn SerialTransport>,
        ConnectionConfig::default(),
    );
    let mut display = Display::new(ADDRESS, session, 16, PlaybackConfig::default());
    display.connect().await.unwrap();
    (display, transport)
}

/// Every write decoded back into command frames
pub fn sent_frames(transport: &MockTransport) -> Vec<CommandFrame> {
    transport
        .writes()
        .iter()
        .map(|w| CommandFrame::decode(w).unwrap())
        .collect()
}
