//! End-to-end "round trip" coverage that wires a `Reader` directly to a
//! `Writer` through one ring, standing in for the `Reactor`'s copy loop
//! without a running JACK server (scenario S1/S2/S3 from `spec.md` §8's
//! table: file shorter/longer/equal to the requested duration).

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tempfile::tempdir;

use crate::worker::{Reader, Writer};

fn write_test_wav(path: &Path, channels: u16, sample_rate: u32, frames: usize) -> Vec<f32> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    let mut samples = Vec::with_capacity(frames * channels as usize);
    for i in 0..(frames * channels as usize) {
        let v = (i as f32 * 0.01).sin();
        writer.write_sample(v).unwrap();
        samples.push(v);
    }
    writer.finalize().unwrap();
    samples
}

fn read_wav(path: &Path) -> Vec<f32> {
    let mut reader = WavReader::open(path).unwrap();
    reader.samples::<f32>().map(|s| s.unwrap()).collect()
}

/// Drains a `Reader`'s ring into a `Writer`'s ring until both report
/// finished, simulating what `Reactor::process` does one cycle at a time but
/// without any JACK port buffers in between.
fn pump_until_done(reader: &Reader, writer: &Writer, mut ring_copy: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if ring_copy() {
            break;
        }
        reader.wake();
        writer.wake();
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
}

#[test]
fn round_trip_preserves_sample_content_for_a_short_file() {
    let dir = tempdir().unwrap();
    let in_path = dir.path().join("in.wav");
    let out_path = dir.path().join("out.wav");
    let written = write_test_wav(&in_path, 1, 48_000, 4_800);

    let (reader, mut reader_cons) = Reader::new(&in_path, 48_000, 1, 65536, 0.0, 0.0).unwrap();
    let (writer, mut writer_prod) = Writer::new(&out_path, 48_000, 1, 65536, 0.1).unwrap();

    pump_until_done(&reader, &writer, || {
        let mut buf = [0u8; 4096];
        loop {
            let n = reader_cons.read(&mut buf);
            if n == 0 {
                break;
            }
            let mut off = 0;
            while off < n {
                let w = writer_prod.write(&buf[off..n]);
                if w == 0 {
                    break;
                }
                off += w;
            }
        }
        reader.finished() && writer.finished()
    });

    reader.stop().unwrap();
    writer.stop().unwrap();

    assert_eq!(reader.frames_done(), 4_800);
    assert_eq!(writer.frames_done(), 4_800);

    let got = read_wav(&out_path);
    assert_eq!(got.len(), written.len());
    for (a, b) in got.iter().zip(written.iter()) {
        assert!((a - b).abs() < 1e-6);
    }
}

#[test]
fn writer_duration_shorter_than_file_truncates_output() {
    let dir = tempdir().unwrap();
    let in_path = dir.path().join("in.wav");
    let out_path = dir.path().join("out.wav");
    write_test_wav(&in_path, 1, 48_000, 48_000);

    let (reader, mut reader_cons) = Reader::new(&in_path, 48_000, 1, 65536, 0.0, 0.0).unwrap();
    // Only keep the first 0.1s = 4800 frames even though the file has 1s.
    let (writer, mut writer_prod) = Writer::new(&out_path, 48_000, 1, 65536, 0.1).unwrap();

    pump_until_done(&reader, &writer, || {
        let mut buf = [0u8; 4096];
        loop {
            let n = reader_cons.read(&mut buf);
            if n == 0 {
                break;
            }
            let mut off = 0;
            while off < n {
                let w = writer_prod.write(&buf[off..n]);
                if w == 0 {
                    break;
                }
                off += w;
            }
        }
        writer.finished()
    });

    writer.stop().unwrap();
    reader.stop().unwrap();

    assert_eq!(writer.frames_done(), 4_800);
    let got = read_wav(&out_path);
    assert_eq!(got.len(), 4_800);
}
