//! moodcam: live depth-camera view with periodic emotion inference

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use moodcam::capture::{FrameSource, SyntheticSource};
use moodcam::display::DisplayBuffer;
use moodcam::inference::{Classifier, Dispatcher, FaceApiClient, ResultSlot};
use moodcam::pipeline::{CaptureLoop, CaptureThread, Session};
use moodcam::status::StatusText;
use moodcam::{CaptureBackend, Config};

fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing();

    info!("moodcam launching...");

    // Load configuration
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    if config.inference.api_key.is_none() {
        warn!("No face service key configured; every sample will fail authentication");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("moodcam-inference")
        .build()?;

    let session = Session::new();
    let status = Arc::new(StatusText::new());
    let status_rx = status.subscribe();
    let classifier: Arc<dyn Classifier> = Arc::new(FaceApiClient::new(&config.inference)?);
    let dispatcher = Arc::new(Dispatcher::new(
        runtime.handle().clone(),
        classifier,
        Arc::new(ResultSlot::new()),
        status.clone(),
        config.pipeline.max_in_flight,
        config.pipeline.jpeg_quality,
    ));

    let (display, capture_thread) = match config.capture.backend {
        CaptureBackend::Synthetic => {
            let (width, height) = config.capture.sensor.color_resolution.dimensions();
            let source = SyntheticSource::new(width, height, config.capture.buffer_count as usize)
                .with_pace(Duration::from_millis(33));
            spawn_capture(source, &config, &dispatcher, &status, &session)?
        }
        CaptureBackend::V4l2 => open_v4l2(&config, &dispatcher, &status, &session)?,
    };

    // Ctrl-C ends the session the same way closing the window does
    let signal_session = session.clone();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_session.request_stop();
        }
    });

    // Shut the loop down and drain even when the renderer failed
    let rendered = render(&config, &display, status_rx, &session);
    if let Err(e) = &rendered {
        error!("Renderer failed: {}", e);
    }

    let outcome = capture_thread
        .stop()
        .map_err(|_| eyre!("capture thread panicked"))?;

    // Let orphaned inference requests finish, without holding shutdown hostage
    let grace = Duration::from_millis(config.inference.shutdown_grace_ms);
    runtime.block_on(async {
        if tokio::time::timeout(grace, dispatcher.drain()).await.is_err() {
            warn!("In-flight inference did not finish within {:?}", grace);
        }
    });
    runtime.shutdown_timeout(grace);

    rendered?;
    let report = outcome?;
    info!(
        "moodcam shutting down: {} frames, {} samples submitted, {} skipped",
        report.frames, report.submitted, report.skipped
    );
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("moodcam=debug"));
    let registry = tracing_subscriber::registry().with(filter).with(
        tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime()),
    );

    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());

    registry.init();
}

/// Size the display buffer to the source and start the capture loop thread
fn spawn_capture<S: FrameSource + 'static>(
    source: S,
    config: &Config,
    dispatcher: &Arc<Dispatcher>,
    status: &Arc<StatusText>,
    session: &Session,
) -> Result<(Arc<DisplayBuffer>, CaptureThread)> {
    let (width, height) = source.native_resolution();
    info!("Display buffer sized to {}x{}", width, height);
    let display = Arc::new(DisplayBuffer::new(width, height));

    let capture_loop = CaptureLoop::new(
        source,
        display.clone(),
        dispatcher.clone(),
        status.clone(),
        session.clone(),
        config.pipeline.sample_interval,
    );
    Ok((display, capture_loop.spawn()?))
}

#[cfg(feature = "v4l2")]
fn open_v4l2(
    config: &Config,
    dispatcher: &Arc<Dispatcher>,
    status: &Arc<StatusText>,
    session: &Session,
) -> Result<(Arc<DisplayBuffer>, CaptureThread)> {
    // Auto-detect capture device if needed
    let mut capture_config = config.capture.clone();
    if capture_config.device.is_empty() {
        capture_config.device = moodcam::utils::auto_detect_device()?;
    }
    info!("Using capture device: {}", capture_config.device);

    let source = moodcam::capture::V4l2Source::open(&capture_config)?;
    spawn_capture(source, config, dispatcher, status, session)
}

#[cfg(not(feature = "v4l2"))]
fn open_v4l2(
    _config: &Config,
    _dispatcher: &Arc<Dispatcher>,
    _status: &Arc<StatusText>,
    _session: &Session,
) -> Result<(Arc<DisplayBuffer>, CaptureThread)> {
    Err(eyre!("built without the v4l2 feature; use capture.backend = \"synthetic\""))
}

#[cfg(feature = "sdl-display")]
fn render(
    config: &Config,
    display: &DisplayBuffer,
    status: flume::Receiver<String>,
    session: &Session,
) -> Result<()> {
    use moodcam::display::Sdl2Display;

    // Initialize SDL2
    let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
    let mut window = Sdl2Display::new(
        &sdl_context,
        &config.display.title,
        config.display.width,
        config.display.height,
    )?;
    window.run(&sdl_context, display, status, session)
}

/// Headless: log status changes until the session ends
#[cfg(not(feature = "sdl-display"))]
fn render(
    _config: &Config,
    _display: &DisplayBuffer,
    status: flume::Receiver<String>,
    session: &Session,
) -> Result<()> {
    while session.is_running() {
        if let Ok(text) = status.recv_timeout(Duration::from_millis(200)) {
            info!(status = %text, "Status");
        }
    }
    Ok(())
}
