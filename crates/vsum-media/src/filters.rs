//! FFmpeg video filters for frame sampling.

use vsum_models::ExtractionMode;

/// Frames wider than this are scaled down, keeping the aspect ratio.
pub const DEFAULT_MAX_WIDTH: u32 = 1280;

/// JPEG quality passed to `-q:v` (2 is near-lossless).
pub const JPEG_QUALITY: u8 = 2;

/// Output file pattern inside the frame directory.
pub const FRAME_PATTERN: &str = "frame_%04d.jpg";

/// Select only intra-coded frames.
pub const FILTER_KEYFRAMES: &str = "select='eq(pict_type,I)'";

/// Downscale to at most `max_width` pixels wide with an even height.
pub fn filter_scale(max_width: u32) -> String {
    format!("scale='min({},iw)':-2", max_width)
}

/// Sample one frame every `seconds` seconds.
pub fn filter_interval(seconds: u32) -> String {
    format!("fps=1/{}", seconds.max(1))
}

/// Full `-vf` chain for an extraction mode.
pub fn frame_filter(mode: &ExtractionMode, max_width: u32) -> String {
    let sampler = match mode {
        ExtractionMode::AllKeyframes => FILTER_KEYFRAMES.to_string(),
        ExtractionMode::FixedInterval { seconds } => filter_interval(*seconds),
    };
    format!("{},{}", sampler, filter_scale(max_width))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyframe_filter() {
        assert_eq!(
            frame_filter(&ExtractionMode::AllKeyframes, 1280),
            "select='eq(pict_type,I)',scale='min(1280,iw)':-2"
        );
    }

    #[test]
    fn test_interval_filter() {
        assert_eq!(
            frame_filter(&ExtractionMode::FixedInterval { seconds: 5 }, 640),
            "fps=1/5,scale='min(640,iw)':-2"
        );
        assert_eq!(filter_interval(0), "fps=1/1");
    }
}
