/// Device nodes probed by auto-detection
pub const PROBE_NODES: u32 = 10;

/// Whether a device advertising these pixel formats can feed the pipeline
pub fn offers_bgra<'a>(fourccs: impl IntoIterator<Item = &'a [u8; 4]>) -> bool {
    fourccs.into_iter().any(|code| code == b"AR24")
}

/// Auto-detect the first capture device with a 32-bit BGRA color stream
#[cfg(feature = "v4l2")]
pub fn auto_detect_device() -> color_eyre::Result<String> {
    use std::path::Path;

    use color_eyre::eyre::eyre;
    use tracing::{debug, info};
    use v4l::{capability::Flags, video::Capture, Device};

    info!("Auto-detecting capture devices...");

    for i in 0..PROBE_NODES {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        // Check for capture capability
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }

        if let Ok(formats) = dev.enum_formats() {
            let codes: Vec<[u8; 4]> = formats.iter().map(|f| f.fourcc.repr).collect();
            if offers_bgra(&codes) {
                info!("Found BGRA device: {} - {}", path, caps.card);
                return Ok(path);
            }
            debug!("Skipping {}: no BGRA format", path);
        }
    }

    Err(eyre!("No BGRA capture device found"))
}
