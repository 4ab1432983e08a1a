//! Contracts for the collaborators that feed the pipelines.
//!
//! The image-sequence encoder and the audio converter live outside this
//! workspace. Their outputs are MP4 files the [`StreamMuxer`](crate::StreamMuxer)
//! and [`Transcoder`](crate::Transcoder) consume.

use std::path::{Path, PathBuf};

use crate::VideoError;

/// Turns an ordered list of still images into a video file.
pub trait ImageSequenceEncoder {
    /// Encode `images`, in order, into a video at `output_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if an image cannot be read or the video written.
    fn encode(&self, output_path: &Path, images: &[PathBuf]) -> Result<(), VideoError>;
}

/// Extracts, trims and fades the audio of a media file.
pub trait AudioConverter {
    /// Write the audio of `input` to `output_path`, cut to `max_duration_ms`
    /// with the given fades.
    ///
    /// # Errors
    ///
    /// Returns an error if the input has no audio or the output cannot be
    /// written.
    fn convert(
        &self,
        input: &Path,
        output_path: &Path,
        max_duration_ms: u64,
        fade_in_ms: u64,
        fade_out_ms: u64,
    ) -> Result<(), VideoError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<String>>,
    }

    impl ImageSequenceEncoder for Recorder {
        fn encode(&self, output_path: &Path, images: &[PathBuf]) -> Result<(), VideoError> {
            if images.is_empty() {
                return Err(VideoError::InvalidState("no images".into()));
            }
            self.calls
                .borrow_mut()
                .push(format!("encode {} {}", output_path.display(), images.len()));
            Ok(())
        }
    }

    impl AudioConverter for Recorder {
        fn convert(
            &self,
            input: &Path,
            output_path: &Path,
            max_duration_ms: u64,
            fade_in_ms: u64,
            fade_out_ms: u64,
        ) -> Result<(), VideoError> {
            self.calls.borrow_mut().push(format!(
                "convert {} {} {max_duration_ms} {fade_in_ms} {fade_out_ms}",
                input.display(),
                output_path.display()
            ));
            Ok(())
        }
    }

    #[test]
    fn collaborators_are_object_safe() {
        let recorder = Recorder::default();
        let encoder: &dyn ImageSequenceEncoder = &recorder;
        let converter: &dyn AudioConverter = &recorder;

        encoder
            .encode(Path::new("slides.mp4"), &[PathBuf::from("a.png"), PathBuf::from("b.png")])
            .unwrap();
        converter
            .convert(Path::new("song.mp3"), Path::new("song.m4a"), 30_000, 500, 1_500)
            .unwrap();
        assert!(encoder.encode(Path::new("empty.mp4"), &[]).is_err());

        assert_eq!(
            *recorder.calls.borrow(),
            ["encode slides.mp4 2", "convert song.mp3 song.m4a 30000 500 1500"]
        );
    }
}
