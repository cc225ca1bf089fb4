//! Minimal RIFF/WAVE container for synthesized fixtures.
//!
//! Samples are written exactly as quantized: 8-bit data stays signed rather
//! than being offset to the unsigned WAV convention, because the subject
//! streams the data chunk straight to an `S8` device.

use log::{debug, info};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use super::{FormatDescriptor, FrameBuffer, SampleWidth};
use crate::error::{HarnessError, Result};

const WAVE_FORMAT_PCM: u16 = 1;
const FMT_CHUNK_SIZE: u32 = 16;
const HEADER_BYTES: u32 = 44;

/// Header fields recovered from a fixture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixtureHeader {
    pub format: FormatDescriptor,
    pub frames: u32,
}

/// Write `buffer` to `path`, replacing any previous content.
///
/// The file is flushed and synced before returning.
pub fn write_fixture<P: AsRef<Path>>(path: P, buffer: &FrameBuffer) -> Result<()> {
    let path = path.as_ref();
    let format = buffer.format();
    let (riff_len, data_len) = chunk_lengths(buffer.samples().len(), format.width)?;
    let block_align = format.frame_bytes();

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    writer.write_all(b"RIFF")?;
    writer.write_all(&riff_len.to_le_bytes())?;
    writer.write_all(b"WAVE")?;

    writer.write_all(b"fmt ")?;
    writer.write_all(&FMT_CHUNK_SIZE.to_le_bytes())?;
    writer.write_all(&WAVE_FORMAT_PCM.to_le_bytes())?;
    writer.write_all(&format.channels.to_le_bytes())?;
    writer.write_all(&format.sample_rate.to_le_bytes())?;
    writer.write_all(&(block_align * format.sample_rate).to_le_bytes())?;
    writer.write_all(&(block_align as u16).to_le_bytes())?;
    writer.write_all(&(format.width.bytes() * 8).to_le_bytes())?;

    writer.write_all(b"data")?;
    writer.write_all(&data_len.to_le_bytes())?;
    for &sample in buffer.samples() {
        match format.width {
            SampleWidth::S8 => writer.write_all(&(sample as i8).to_le_bytes())?,
            SampleWidth::S16 => writer.write_all(&(sample as i16).to_le_bytes())?,
            SampleWidth::S32 => writer.write_all(&sample.to_le_bytes())?,
        }
    }

    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    info!(
        "Wrote fixture {:?}: {} frames, {} channel(s), {}-byte samples at {} Hz",
        path,
        buffer.frames(),
        format.channels,
        format.width,
        format.sample_rate
    );
    Ok(())
}

/// RIFF and data chunk lengths for `samples` samples of `width`; both must
/// fit the 32-bit size fields.
fn chunk_lengths(samples: usize, width: SampleWidth) -> Result<(u32, u32)> {
    let data_len = u32::try_from(samples)
        .ok()
        .and_then(|samples| samples.checked_mul(width.bytes() as u32));
    let lengths = data_len
        .and_then(|data_len| Some((data_len.checked_add(HEADER_BYTES - 8)?, data_len)));
    lengths.ok_or_else(|| invalid_data("fixture too large for a WAV file"))
}

/// Parse the header of a fixture the way the subject does: walk chunks
/// until `data`, skipping unknown ones and any `fmt ` extension bytes.
pub fn read_header<P: AsRef<Path>>(path: P) -> Result<FixtureHeader> {
    let mut reader = BufReader::new(File::open(path.as_ref())?);

    let mut riff = [0u8; 12];
    reader.read_exact(&mut riff)?;
    if &riff[0..4] != b"RIFF" || &riff[8..12] != b"WAVE" {
        return Err(invalid_data("not a RIFF/WAVE file"));
    }

    let mut format: Option<FormatDescriptor> = None;
    loop {
        let mut chunk = [0u8; 8];
        reader.read_exact(&mut chunk)?;
        let length = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);

        match &chunk[0..4] {
            b"fmt " => {
                let mut fmt = [0u8; 16];
                reader.read_exact(&mut fmt)?;
                if length > FMT_CHUNK_SIZE {
                    reader.seek(SeekFrom::Current((length - FMT_CHUNK_SIZE) as i64))?;
                }
                let channels = u16::from_le_bytes([fmt[2], fmt[3]]);
                let sample_rate = u32::from_le_bytes([fmt[4], fmt[5], fmt[6], fmt[7]]);
                let bits = u16::from_le_bytes([fmt[14], fmt[15]]);
                let width = SampleWidth::try_from(bits / 8)?;
                format = Some(FormatDescriptor::new(channels, width, sample_rate));
            }
            b"data" => {
                let format = format.ok_or_else(|| invalid_data("data chunk before fmt chunk"))?;
                let frame_bytes = format.frame_bytes();
                if frame_bytes == 0 {
                    return Err(invalid_data("zero channel count"));
                }
                let header = FixtureHeader {
                    format,
                    frames: length / frame_bytes,
                };
                debug!("Read fixture header: {:?}", header);
                return Ok(header);
            }
            _ => {
                reader.seek(SeekFrom::Current(length as i64))?;
            }
        }
    }
}

fn invalid_data(message: &str) -> HarnessError {
    HarnessError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        message.to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{synthesize, ToneSet};
    use tempfile::tempdir;

    #[test]
    fn test_header_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fixture.wav");

        for width in [SampleWidth::S8, SampleWidth::S16, SampleWidth::S32] {
            let format = FormatDescriptor::new(2, width, 48000);
            let buffer = synthesize(format, &ToneSet::new(vec![300, 4000]), 960).unwrap();
            write_fixture(&path, &buffer).unwrap();

            let header = read_header(&path).unwrap();
            assert_eq!(header.format, format);
            assert_eq!(header.frames, 960);
        }
    }

    #[test]
    fn test_file_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fixture.wav");
        let format = FormatDescriptor::new(1, SampleWidth::S32, 8000);
        let buffer = synthesize(format, &ToneSet::new(vec![100]), 100).unwrap();
        write_fixture(&path, &buffer).unwrap();

        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, 44 + 400);
    }

    #[test]
    fn test_eight_bit_samples_stay_signed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fixture.wav");
        let format = FormatDescriptor::new(1, SampleWidth::S8, 44100);
        let buffer = synthesize(format, &ToneSet::new(vec![11025]), 4).unwrap();
        write_fixture(&path, &buffer).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[44..], &[0, 101, 0, (-101i8) as u8]);
    }

    #[test]
    fn test_overwrites_previous_fixture() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fixture.wav");
        let tones = ToneSet::new(vec![440]);

        let format = FormatDescriptor::new(1, SampleWidth::S16, 8000);

        let long = synthesize(format, &tones, 800).unwrap();
        write_fixture(&path, &long).unwrap();
        let short = synthesize(format, &tones, 80).unwrap();
        write_fixture(&path, &short).unwrap();

        assert_eq!(read_header(&path).unwrap().frames, 80);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 44 + 160);
    }

    #[test]
    fn test_chunk_lengths() {
        assert_eq!(chunk_lengths(100, SampleWidth::S32).unwrap(), (436, 400));
        assert_eq!(chunk_lengths(0, SampleWidth::S8).unwrap(), (36, 0));
    }

    #[test]
    fn test_oversized_fixture_rejected() {
        let too_many_for_data = (u32::MAX / 2) as usize + 1;
        let too_many_for_riff = (u32::MAX / 4) as usize;
        for (samples, width) in [
            (too_many_for_data, SampleWidth::S16),
            (too_many_for_riff, SampleWidth::S32),
        ] {
            match chunk_lengths(samples, width) {
                Err(HarnessError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::InvalidData),
                other => panic!("expected InvalidData, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_rejects_non_wave_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.wav");
        std::fs::write(&path, b"not a wave file at all").unwrap();
        assert!(read_header(&path).is_err());
    }

    #[test]
    fn test_write_to_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("fixture.wav");
        let buffer = synthesize(
            FormatDescriptor::new(1, SampleWidth::S16, 8000),
            &ToneSet::new(vec![440]),
            8,
        )
        .unwrap();
        assert!(matches!(
            write_fixture(&path, &buffer),
            Err(HarnessError::Io(_))
        ));
    }
}
