use std::f32::consts::TAU;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::time::Duration;

use snowman_core::{
    AudioSource, DetectorHandle, EngineConfig, EngineStatus, ExitReason, SnowmanEngine,
    SnowmanError, StubConfig, StubDetector,
};
use tokio::sync::broadcast::error::TryRecvError;

/// Mono 16-bit WAV made of (seconds, amplitude) segments of a 440 Hz tone.
fn write_tone(path: &Path, rate: u32, segments: &[(f32, f32)]) -> usize {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let mut n = 0usize;
    for &(secs, amplitude) in segments {
        for _ in 0..(secs * rate as f32) as usize {
            let t = n as f32 / rate as f32;
            let s = amplitude * (TAU * 440.0 * t).sin();
            writer.write_sample((s * 32767.0) as i16).unwrap();
            n += 1;
        }
    }
    writer.finalize().unwrap();
    n
}

fn stub_engine(config: EngineConfig) -> SnowmanEngine {
    SnowmanEngine::new(config, DetectorHandle::new(StubDetector::new(StubConfig::default())))
}

#[tokio::test]
async fn wav_session_detects_loud_segment() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hotword.wav");
    let total = write_tone(&path, 16_000, &[(0.5, 0.0), (0.5, 0.8), (0.5, 0.0)]);

    let engine = stub_engine(EngineConfig::default());
    let mut detections = engine.subscribe_detections();
    let mut hotwords = engine.subscribe_hotwords();

    engine
        .start(AudioSource::Wav {
            path: path.clone(),
            realtime: false,
        })
        .unwrap();
    assert_eq!(engine.wait().await, Some(ExitReason::SourceEnded));
    assert_eq!(engine.status(), EngineStatus::Stopped);
    assert!(!engine.is_running());

    let mut codes = Vec::new();
    loop {
        match detections.try_recv() {
            Ok(event) => {
                assert_eq!(event.samples, 128);
                codes.push(event.code);
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            Err(TryRecvError::Lagged(n)) => panic!("lagged by {n}"),
        }
    }

    assert_eq!(codes.len(), total / 128);
    assert_eq!(codes.iter().filter(|&&c| c == 1).count(), 1, "codes={codes:?}");
    assert!(codes.contains(&-2));
    assert!(codes.iter().all(|&c| c >= -2 && c <= 1));

    let hotword = hotwords.try_recv().expect("hotword event");
    assert_eq!(hotword.hotword, Some(1));
    assert!(hotwords.try_recv().is_err());

    let snap = engine.diagnostics_snapshot();
    assert_eq!(snap.blocks_received, (total / 128) as u64);
    assert_eq!(snap.blocks_dropped, 0);
    assert_eq!(snap.hotwords, 1);
    assert_eq!(snap.staging_allocations, 1);
    assert_eq!(snap.staging_releases, 1);
}

#[tokio::test]
async fn unpaced_replay_delivers_every_quantum_with_default_queue() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("long.wav");
    // Far more quanta than the 64-block default queue holds.
    let total = write_tone(&path, 16_000, &[(14.0, 0.0), (0.5, 0.8), (15.5, 0.0)]);
    assert!(total / 128 > 64 * 10);

    let engine = stub_engine(EngineConfig::default());
    let mut hotwords = engine.subscribe_hotwords();
    engine
        .start(AudioSource::Wav {
            path,
            realtime: false,
        })
        .unwrap();
    assert_eq!(engine.wait().await, Some(ExitReason::SourceEnded));

    let snap = engine.diagnostics_snapshot();
    assert_eq!(snap.blocks_dropped, 0);
    assert_eq!(snap.blocks_captured, (total / 128) as u64);
    assert_eq!(snap.blocks_received, (total / 128) as u64);
    assert_eq!(snap.hotwords, 1);
    assert_eq!(hotwords.try_recv().unwrap().hotword, Some(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_starts_admit_exactly_one_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("paced.wav");
    write_tone(&path, 16_000, &[(3.0, 0.0)]);

    let engine = Arc::new(stub_engine(EngineConfig::default()));
    let barrier = Arc::new(Barrier::new(2));
    let attempts: Vec<_> = (0..2)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            let source = AudioSource::Wav {
                path: path.clone(),
                realtime: true,
            };
            tokio::task::spawn_blocking(move || {
                barrier.wait();
                engine.start(source)
            })
        })
        .collect();

    let mut results = Vec::new();
    for attempt in attempts {
        results.push(attempt.await.unwrap());
    }
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(SnowmanError::AlreadyRunning))));

    engine.stop().unwrap();
    assert_eq!(engine.wait().await, Some(ExitReason::Stopped));
}

#[tokio::test]
async fn wav_at_device_rate_is_resampled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("48k.wav");
    write_tone(&path, 48_000, &[(1.0, 0.0)]);

    let engine = stub_engine(EngineConfig::default());
    engine
        .start(AudioSource::Wav {
            path,
            realtime: false,
        })
        .unwrap();
    engine.wait().await;

    // 1 s at 16 kHz ≈ 125 quanta, less resampler warm-up.
    let received = engine.diagnostics_snapshot().blocks_received;
    assert!((118..=125).contains(&received), "received={received}");
}

#[tokio::test]
async fn detector_is_consumed_by_a_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short.wav");
    write_tone(&path, 16_000, &[(0.1, 0.0)]);

    let engine = stub_engine(EngineConfig::default());
    let source = AudioSource::Wav {
        path,
        realtime: false,
    };
    engine.start(source.clone()).unwrap();
    engine.wait().await;

    assert!(matches!(engine.start(source), Err(SnowmanError::StageClosed)));
}

#[tokio::test]
async fn stop_ends_realtime_session_early() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("long.wav");
    let total = write_tone(&path, 16_000, &[(3.0, 0.1)]);

    let engine = stub_engine(EngineConfig::default());
    let mut status = engine.subscribe_status();
    engine
        .start(AudioSource::Wav {
            path,
            realtime: true,
        })
        .unwrap();
    assert!(matches!(
        engine.start(AudioSource::default()),
        Err(SnowmanError::AlreadyRunning)
    ));

    tokio::time::sleep(Duration::from_millis(200)).await;
    engine.stop().unwrap();
    assert_eq!(engine.wait().await, Some(ExitReason::Stopped));

    assert_eq!(status.recv().await.unwrap().status, EngineStatus::Listening);
    assert_eq!(status.recv().await.unwrap().status, EngineStatus::Stopped);

    let snap = engine.diagnostics_snapshot();
    assert!(snap.blocks_received > 0);
    assert!(snap.blocks_received < (total / 128) as u64);
    assert_eq!(snap.staging_releases, 1);
}

#[tokio::test]
async fn allocation_failure_reports_error_status() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tiny_heap.wav");
    write_tone(&path, 16_000, &[(0.5, 0.0)]);

    let detector = StubDetector::new(StubConfig {
        memory_limit: 64,
        ..StubConfig::default()
    });
    let engine = SnowmanEngine::new(EngineConfig::default(), DetectorHandle::new(detector));
    engine
        .start(AudioSource::Wav {
            path,
            realtime: false,
        })
        .unwrap();

    assert_eq!(engine.wait().await, Some(ExitReason::Fatal));
    assert_eq!(engine.status(), EngineStatus::Error);
    assert_eq!(engine.diagnostics_snapshot().detection_calls, 0);
}
