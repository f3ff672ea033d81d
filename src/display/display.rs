//! SDL2 Window Display Module
//! Presents the shared display buffer and shows the status text in the
//! window title. Uses the sdl2 crate for window management and rendering.

use color_eyre::{eyre::eyre, Result};
use flume::Receiver;
use sdl2::event::Event;
use sdl2::pixels::PixelFormatEnum;
use sdl2::rect::Rect;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use tracing::{debug, info};

use crate::display::DisplayBuffer;
use crate::pipeline::{Session, SessionState};

/// SDL2 Window Display
/// Handles window creation, the event loop, and texture upload of dirty
/// regions from the [`DisplayBuffer`].
pub struct Sdl2Display {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    title: String,
}

impl Sdl2Display {
    pub fn new(sdl_context: &sdl2::Sdl, title: &str, width: u32, height: u32) -> Result<Self> {
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window(title, width, height)
            .position_centered()
            .resizable()
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();

        Ok(Self {
            canvas,
            texture_creator,
            title: title.to_string(),
        })
    }

    /// Render until the window is closed or the capture session ends.
    /// Closing the window asks the session to stop.
    pub fn run(
        &mut self,
        sdl_context: &sdl2::Sdl,
        buffer: &DisplayBuffer,
        status: Receiver<String>,
        session: &Session,
    ) -> Result<()> {
        let mut event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;

        // BGRA bytes in memory are ARGB8888 on little-endian hosts
        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::ARGB8888, buffer.width(), buffer.height())
            .map_err(|e| eyre!(e))?;

        'running: loop {
            for event in event_pump.poll_iter() {
                if let Event::Quit { .. } = event {
                    info!("Quit event received");
                    session.request_stop();
                    break 'running;
                }
            }

            if session.state() == SessionState::Closed {
                debug!("Capture session closed, leaving render loop");
                break;
            }

            if let Some(text) = status.try_iter().last() {
                self.canvas
                    .window_mut()
                    .set_title(&format!("{} | {}", self.title, text))?;
            }

            buffer.present(|pixels, stride, dirty| -> Result<()> {
                let Some(region) = dirty else {
                    return Ok(());
                };
                let offset = (region.y * stride + region.x * 4) as usize;
                let rect = Rect::new(region.x as i32, region.y as i32, region.width, region.height);
                texture
                    .update(rect, &pixels[offset..], stride as usize)
                    .map_err(|e| eyre!(e))
            })?;

            self.canvas.clear();
            self.canvas
                .copy(&texture, None, None)
                .map_err(|e| eyre!(e))?;
            self.canvas.present();
        }

        Ok(())
    }
}
