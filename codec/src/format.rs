//! Track descriptors.

use serde::{Deserialize, Serialize};

/// Media type strings.
pub mod mime {
    /// H.264 / AVC video.
    pub const VIDEO_AVC: &str = "video/avc";
    /// H.265 / HEVC video.
    pub const VIDEO_HEVC: &str = "video/hevc";
    /// VP8 video.
    pub const VIDEO_VP8: &str = "video/x-vnd.on2.vp8";
    /// VP9 video.
    pub const VIDEO_VP9: &str = "video/x-vnd.on2.vp9";
    /// AV1 video.
    pub const VIDEO_AV1: &str = "video/av01";
    /// Uncompressed RGBA video.
    pub const VIDEO_RAW: &str = "video/raw";
    /// AAC audio.
    pub const AUDIO_AAC: &str = "audio/mp4a-latm";
}

/// Color format telling an encoder that its input arrives through a surface.
pub const COLOR_FORMAT_SURFACE: u32 = 0x7F00_0789;

/// Description of one elementary stream.
///
/// Read once from a source container (or produced once by an encoder) and
/// not mutated while the stream is being processed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackFormat {
    /// Media type, e.g. `video/avc`.
    pub mime: String,
    /// Index of the track inside its container.
    pub track_index: Option<usize>,
    /// Width in pixels.
    pub width: Option<u32>,
    /// Height in pixels.
    pub height: Option<u32>,
    /// Target or declared bitrate in bits per second.
    pub bit_rate: Option<u32>,
    /// Frames per second.
    pub frame_rate: Option<u32>,
    /// Seconds between key frames.
    pub i_frame_interval: Option<u32>,
    /// Codec color format.
    pub color_format: Option<u32>,
    /// Audio sample rate in Hz.
    pub sample_rate: Option<u32>,
    /// Audio channel count.
    pub channel_count: Option<u32>,
    /// Track duration in microseconds.
    pub duration_us: Option<i64>,
    /// Complete codec configuration box (`avcC`, `hvcC`, `av1C`, `vpcC`, `esds`).
    pub codec_config: Option<Vec<u8>>,
}

impl TrackFormat {
    /// Create a video format.
    #[must_use]
    pub fn video(mime: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            mime: mime.into(),
            width: Some(width),
            height: Some(height),
            ..Self::default()
        }
    }

    /// Create an audio format.
    #[must_use]
    pub fn audio(mime: impl Into<String>, sample_rate: u32, channel_count: u32) -> Self {
        Self {
            mime: mime.into(),
            sample_rate: Some(sample_rate),
            channel_count: Some(channel_count),
            ..Self::default()
        }
    }

    /// Whether the media type is `video/*`.
    #[must_use]
    pub fn is_video(&self) -> bool {
        self.mime.starts_with("video/")
    }

    /// Whether the format declares an audio channel count.
    #[must_use]
    pub const fn has_channel_count(&self) -> bool {
        self.channel_count.is_some()
    }

    /// Frame size, if both dimensions are known.
    #[must_use]
    pub fn size(&self) -> Option<(u32, u32)> {
        self.width.zip(self.height)
    }

    /// Set the codec configuration box.
    #[must_use]
    pub fn with_codec_config(mut self, config: Vec<u8>) -> Self {
        self.codec_config = Some(config);
        self
    }

    /// Set the frame rate.
    #[must_use]
    pub const fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    /// Set the track duration.
    #[must_use]
    pub const fn with_duration_us(mut self, duration_us: i64) -> Self {
        self.duration_us = Some(duration_us);
        self
    }
}

/// Size limits reported by an encoder before it is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderCapabilities {
    /// Largest supported width.
    pub max_width: u32,
    /// Largest supported height.
    pub max_height: u32,
    /// Width must be a multiple of this.
    pub width_alignment: u32,
    /// Height must be a multiple of this.
    pub height_alignment: u32,
}

impl Default for EncoderCapabilities {
    fn default() -> Self {
        Self {
            max_width: 4096,
            max_height: 4096,
            width_alignment: 2,
            height_alignment: 2,
        }
    }
}

impl EncoderCapabilities {
    /// Whether `width` x `height` can be encoded as-is.
    #[must_use]
    pub fn supports(&self, width: u32, height: u32) -> bool {
        width > 0
            && height > 0
            && width <= self.max_width
            && height <= self.max_height
            && width % self.width_alignment.max(1) == 0
            && height % self.height_alignment.max(1) == 0
    }

    /// Closest supported size to the requested one.
    ///
    /// The requested size is kept when supported. Otherwise it is scaled down
    /// (keeping the aspect ratio) to fit the maximum, then rounded down to the
    /// required alignment.
    #[must_use]
    pub fn fit(&self, width: u32, height: u32) -> (u32, u32) {
        if self.supports(width, height) {
            return (width, height);
        }

        let (mut w, mut h) = (u64::from(width.max(1)), u64::from(height.max(1)));
        let (max_w, max_h) = (u64::from(self.max_width), u64::from(self.max_height));
        if w > max_w || h > max_h {
            // Scale by the tighter of the two limits.
            if w * max_h > h * max_w {
                h = (h * max_w / w).max(1);
                w = max_w;
            } else {
                w = (w * max_h / h).max(1);
                h = max_h;
            }
        }

        let align = |value: u64, alignment: u32| -> u32 {
            let alignment = u64::from(alignment.max(1));
            let aligned = (value / alignment * alignment).max(alignment);
            u32::try_from(aligned).unwrap_or(u32::MAX)
        };
        (align(w, self.width_alignment), align(h, self.height_alignment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_size_is_kept() {
        let caps = EncoderCapabilities::default();
        assert_eq!(caps.fit(1280, 720), (1280, 720));
    }

    #[test]
    fn odd_size_is_aligned_down() {
        let caps = EncoderCapabilities::default();
        assert_eq!(caps.fit(641, 479), (640, 478));
    }

    #[test]
    fn oversized_input_keeps_aspect_ratio() {
        let caps = EncoderCapabilities {
            max_width: 1920,
            max_height: 1080,
            width_alignment: 16,
            height_alignment: 16,
        };
        assert_eq!(caps.fit(3840, 2160), (1920, 1072));
    }

    #[test]
    fn zero_alignment_accepts_any_size() {
        let caps = EncoderCapabilities {
            width_alignment: 0,
            height_alignment: 0,
            ..EncoderCapabilities::default()
        };
        assert!(caps.supports(641, 479));
        assert!(!caps.supports(0, 479));
        assert!(!caps.supports(4097, 479));
        assert_eq!(caps.fit(641, 479), (641, 479));
    }

    #[test]
    fn audio_predicate_uses_channel_count() {
        let audio = TrackFormat::audio(mime::AUDIO_AAC, 48_000, 2);
        let video = TrackFormat::video(mime::VIDEO_AVC, 640, 480);
        assert!(audio.has_channel_count());
        assert!(!audio.is_video());
        assert!(video.is_video());
        assert!(!video.has_channel_count());
    }

    #[test]
    fn format_round_trips_through_json() {
        let format = TrackFormat::video(mime::VIDEO_AV1, 320, 240).with_frame_rate(25);
        let json = serde_json::to_string(&format).unwrap();
        let back: TrackFormat = serde_json::from_str(&json).unwrap();
        assert_eq!(back, format);
    }
}
