/*!
One Pixoo display: its session, its image cache and the device commands.
*/

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Datelike, TimeZone, Timelike};
use pixoo_codec::codec::mask;
use pixoo_codec::protocol::{box_mode, opcode, MAX_ANIMATION_FRAMES, STILL_PREFIX};
use pixoo_codec::{
    chunk, encode_frame, encode_subframe, pack, AnimationAssembler, BlockResizer, CodecError,
    EncodedImage, ImageDecoder, Pacing, RasterDecoder, RasterFrame, Resizer, Rgb,
};
use tracing::{debug, info};

use crate::cache::{FrameRef, ImageCache};
use crate::config::PlaybackConfig;
use crate::error::Result;
use crate::session::Session;

/// Called with the palette and the per-frame pixel indices of whatever was just sent
pub type FrameObserver = Arc<dyn Fn(&[Rgb], &[Vec<u8>]) + Send + Sync>;

const CLEAR_SOURCE: &str = "<clear>";

/// What a still transmission learned about its source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StillInfo {
    pub frame_count: usize,
    pub speed_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameSpeed {
    Fixed(u32),
    /// Source timecodes, when the frame has no usable speed
    Timecodes(Vec<u32>),
}

/// Snapshot of the most recently encoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastFrame {
    pub palette: Vec<Rgb>,
    pub pixels: Vec<u8>,
    pub speed: FrameSpeed,
}

pub struct Display {
    address: String,
    session: Session,
    cache: ImageCache,
    decoder: Box<dyn RasterDecoder>,
    resizer: Box<dyn Resizer>,
    observer: Option<FrameObserver>,
    size: usize,
    playback: PlaybackConfig,
}

impl Display {
    pub fn new(address: impl Into<String>, session: Session, size: usize, playback: PlaybackConfig) -> Self {
        Self {
            address: address.into(),
            session,
            cache: ImageCache::new(),
            decoder: Box::new(ImageDecoder::new()),
            resizer: Box::new(BlockResizer::new()),
            observer: None,
            size,
            playback,
        }
    }

    pub fn with_decoder(mut self, decoder: impl RasterDecoder + 'static) -> Self {
        self.decoder = Box::new(decoder);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn set_frame_observer(&mut self, observer: FrameObserver) {
        self.observer = Some(observer);
    }

    pub async fn connect(&mut self) -> Result<()> {
        self.session.connect(&self.address).await
    }

    pub async fn close(&mut self) {
        self.session.close().await;
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Frame and send one command
    pub async fn send(&mut self, opcode: u8, args: &[u8]) -> Result<usize> {
        self.session.write(&encode_frame(opcode, args)).await
    }

    pub async fn set_brightness(&mut self, percent: i64) -> Result<()> {
        self.send(opcode::SET_SYSTEM_BRIGHTNESS, &[mask(percent)]).await?;
        Ok(())
    }

    /// Temperature in degrees, negative values wrap to `256 + t`
    pub async fn set_climate(&mut self, temperature: i64, weather: i64) -> Result<()> {
        let temperature = if temperature < 0 { 256 + temperature } else { temperature };
        self.send(opcode::SET_SYSTEM_CLIMATE, &[mask(temperature), mask(weather)])
            .await?;
        Ok(())
    }

    /// Sync the device clock, optionally switching to the clock face
    pub async fn set_datetime<Tz: TimeZone>(&mut self, datetime: &DateTime<Tz>, visual: Option<u8>) -> Result<()> {
        let year = datetime.year() as i64;
        let args = [
            mask(year % 100),
            mask(year / 100),
            datetime.month() as u8,
            datetime.day() as u8,
            datetime.hour() as u8,
            datetime.minute() as u8,
            datetime.second() as u8,
            0x00,
        ];
        self.send(opcode::SET_SYSTEM_DATETIME, &args).await?;

        if let Some(visual) = visual {
            self.set_box_mode(box_mode::CLOCK, visual, &[]).await?;
        }
        Ok(())
    }

    pub async fn set_fullday(&mut self, mode: i64) -> Result<()> {
        self.send(opcode::SET_SYSTEM_FULLDAY, &[mask(mode)]).await?;
        Ok(())
    }

    pub async fn set_box_mode(&mut self, mode: u8, visual: u8, extra: &[i64]) -> Result<()> {
        let mut args = vec![mode, visual];
        args.extend(extra.iter().map(|&v| mask(v)));
        self.send(opcode::SET_BOX_MODE, &args).await?;
        Ok(())
    }

    pub async fn set_color(&mut self, r: i64, g: i64, b: i64) -> Result<()> {
        self.send(opcode::SET_COLOR, &[mask(r), mask(g), mask(b)]).await?;
        Ok(())
    }

    /// Number of frames in a source file
    pub async fn frame_count(&mut self, path: &Path) -> Result<usize> {
        let raster = match self.cache.raster_for(path) {
            Some(raster) => raster,
            None => self.load_source(path).await?,
        };
        Ok(raster.frame_count())
    }

    async fn load_source(&mut self, path: &Path) -> Result<Arc<pixoo_codec::DecodedRaster>> {
        let bytes = tokio::fs::read(path).await.map_err(CodecError::from)?;
        let raster = self.decoder.decode(&bytes)?;
        Ok(self.cache.load(path, raster))
    }

    /// Encode one frame, reusing the cache when possible
    pub async fn encode_image(&mut self, frame: &FrameRef) -> Result<EncodedImage> {
        if let Some(image) = self.cache.get(frame) {
            return Ok(image.clone());
        }

        let raster = match self.cache.raster_for(&frame.path) {
            Some(raster) => raster,
            None => self.load_source(&frame.path).await?,
        };

        let image = pack(&raster.frame(frame.index)?, self.size, self.resizer.as_ref())?.with_source(
            frame.index,
            raster.frame_count(),
            raster.timecode(frame.index),
            raster.intrinsic_speed_ms(),
        );
        self.cache.insert(frame, image.clone());

        Ok(image)
    }

    fn notify(&self, palette: &[Rgb], pixels: &[Vec<u8>]) {
        if let Some(observer) = &self.observer {
            observer(palette, pixels);
        }
    }

    async fn send_still_image(&mut self, image: &EncodedImage) -> Result<()> {
        let mut args = STILL_PREFIX.to_vec();
        args.extend(encode_subframe(image, 0, false));
        self.send(opcode::DRAW_STILL, &args).await?;

        self.notify(image.palette.colors(), std::slice::from_ref(&image.indices));
        Ok(())
    }

    /// Encode and send one frame as a still image
    pub async fn show_still(&mut self, frame: &FrameRef) -> Result<StillInfo> {
        info!("[{}]: SEND PIC {} #{}", self.address, frame.path.display(), frame.index);

        let image = self.encode_image(frame).await?;
        self.send_still_image(&image).await?;

        Ok(StillInfo {
            frame_count: image.frame_count,
            speed_ms: image.intrinsic_speed_ms,
        })
    }

    /// Fill the display with one color
    pub async fn clear_frame(&mut self, pixel: [u8; 4]) -> Result<()> {
        let frame = FrameRef::still(CLEAR_SOURCE);
        let image = pack(&RasterFrame::solid(self.size, pixel), self.size, self.resizer.as_ref())?;
        self.cache.insert(&frame, image.clone());

        self.send_still_image(&image).await
    }

    /// Encode every frame, assemble them and send the animation in chunks
    ///
    /// Returns the number of chunks sent.
    pub async fn send_animation(&mut self, frames: &[FrameRef], speed_ms: u16, pacing: Pacing) -> Result<usize> {
        let frame_count = u16::try_from(frames.len()).map_err(|_| CodecError::TooManyFrames {
            count: frames.len(),
            limit: MAX_ANIMATION_FRAMES,
        })?;

        let mut images = Vec::with_capacity(frames.len());
        for frame in frames {
            images.push(self.encode_image(frame).await?);
        }

        let pacing = match pacing {
            Pacing::Fixed(0) => Pacing::Fixed(self.playback.default_speed_ms),
            other => other,
        };
        let buffer = AnimationAssembler::new(pacing).speed(speed_ms).assemble(&images);
        let chunks = chunk(&buffer, frame_count, self.playback.chunk_payload);
        debug!(
            "[{}]: Animation of {} frames, {} bytes, {} chunks",
            self.address,
            images.len(),
            buffer.len(),
            chunks.len()
        );

        for c in &chunks {
            self.session.write(&c.encode()).await?;
        }

        if let Some(last) = images.last() {
            let pixels: Vec<Vec<u8>> = images.iter().map(|i| i.indices.clone()).collect();
            self.notify(last.palette.colors(), &pixels);
        }

        Ok(chunks.len())
    }

    /// Palette, pixels and speed of the most recently encoded frame
    pub fn last_frame(&self) -> Option<LastFrame> {
        let image = self.cache.last()?;

        let speed = if image.intrinsic_speed_ms > 0 {
            FrameSpeed::Fixed(image.intrinsic_speed_ms)
        } else {
            let timecodes = self.cache.raster().map(|r| r.timecodes()).unwrap_or_default();
            FrameSpeed::Timecodes(timecodes)
        };

        Some(LastFrame {
            palette: image.palette.colors().to_vec(),
            pixels: image.indices.clone(),
            speed,
        })
    }
}
