use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use tempfile::tempdir;
use srt_tts_sync::config::{OverlapPolicy, RetryPolicy, SyncConfig, VoiceConfig};
use srt_tts_sync::error::TtsSyncError;
use srt_tts_sync::media::AudioClip;
use srt_tts_sync::report::SyncReport;
use srt_tts_sync::subtitle::LanguageDetector;
use srt_tts_sync::tts::{SynthesisError, TtsProvider};
use srt_tts_sync::{synchronize_subtitles, TtsSync};

const SR: u32 = 16_000;

const SUBTITLES: &str = "1
00:00:02,000 --> 00:00:05,000
The quick brown fox jumps over the lazy dog.

2
00:00:06,000 --> 00:00:07,500
<i>Short line</i>

3
00:00:09,000 --> 00:00:10,000
This line always fails.
";

/// Речь длится `слова * 0.5 / rate` секунд, строки с "fails" не синтезируются
struct WordClockProvider {
    calls: AtomicUsize,
}

impl WordClockProvider {
    fn new() -> Self {
        Self { calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl TtsProvider for WordClockProvider {
    fn name(&self) -> &'static str {
        "word-clock"
    }

    fn default_voice(&self) -> &'static str {
        "clock-voice"
    }

    fn rate_range(&self) -> (f32, f32) {
        (0.25, 4.0)
    }

    async fn synthesize(&self, text: &str, _voice: &str, rate: f32) -> Result<Bytes, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("fails") {
            return Err(SynthesisError::Provider { status: 503, message: "service unavailable".to_string() });
        }

        let natural = text.split_whitespace().count() as f64 * 0.5;
        let samples = (natural / rate as f64 * 24_000.0).round() as usize;
        let wav = AudioClip::new(vec![0.3; samples], 24_000).to_wav_bytes().unwrap();
        Ok(Bytes::from(wav))
    }
}

struct EnglishDetector;

impl LanguageDetector for EnglishDetector {
    fn detect(&self, _text: &str) -> Option<String> {
        Some("en".to_string())
    }
}

fn config() -> SyncConfig {
    SyncConfig {
        retry: RetryPolicy::immediate(3),
        sample_rate: SR,
        ..SyncConfig::default()
    }
}

fn voices() -> VoiceConfig {
    VoiceConfig {
        default_voice: HashMap::from([("en".to_string(), "en-US-AriaNeural".to_string())]),
        fallback_voice: Some("en-US-GuyNeural".to_string()),
    }
}

async fn run_once(dir: &Path, name: &str) -> (SyncReport, Vec<f32>, usize) {
    let input = dir.join("input.srt");
    std::fs::write(&input, SUBTITLES).unwrap();
    let output = dir.join(name);

    let provider = Arc::new(WordClockProvider::new());
    let sync = TtsSync::new(provider.clone(), config())
        .unwrap()
        .with_voice_config(voices())
        .with_detector(Box::new(EnglishDetector));
    let report = sync.process(&input, &output).await.unwrap();

    let mut reader = hound::WavReader::open(&output).unwrap();
    assert_eq!(reader.spec().sample_rate, SR);
    assert_eq!(reader.spec().channels, 1);
    let samples: Vec<f32> = reader.samples::<i16>().map(|s| s.unwrap() as f32 / i16::MAX as f32).collect();

    (report, samples, provider.calls.load(Ordering::SeqCst))
}

#[tokio::test]
async fn test_pipeline_aligns_track_to_subtitles() {
    let dir = tempdir().unwrap();
    let (report, samples, calls) = run_once(dir.path(), "out.wav").await;

    assert_eq!(report.language, "en");
    assert_eq!(report.voice, "en-US-AriaNeural");
    assert_eq!(report.provider, "word-clock");
    assert_eq!(report.segment_count, 3);

    // 9 слов: 4.5s естественной речи в окне 3s
    let first = &report.segments[0];
    assert_eq!(first.default_duration, Some(4.5));
    assert_eq!(first.speed_factor, Some(1.5));
    assert!((first.final_duration - 3.0).abs() < 0.01);
    assert_eq!(first.onset, 2.0);
    assert_eq!(first.silence_before, 2.0);

    // 2 слова: 1.0s в окне 1.5s
    let second = &report.segments[1];
    assert_eq!(second.speed_factor, Some(0.67));
    assert!((second.onset - 6.0).abs() < 1e-9);
    assert_eq!(second.lateness, 0.0);

    // третья строка заменена тишиной ровно в длину окна
    let third = &report.segments[2];
    assert!(third.used_fallback);
    assert_eq!(third.speed_factor, None);
    assert_eq!(third.attempts, 3);
    assert!((third.final_duration - 1.0).abs() < 1e-9);
    assert_eq!(report.fallback_indices(), vec![2]);

    // 2 + 2 вызова для удачных сегментов и 3 попытки пробы для неудачного
    assert_eq!(calls, 7);

    assert_eq!(samples.len(), 10 * SR as usize);
    assert!((report.total_duration - 10.0).abs() < 1e-9);
    let clip_total: f64 = report.segments.iter().map(|s| s.final_duration).sum();
    assert!((report.total_duration - (report.total_silence + clip_total)).abs() < 1e-9);

    // до первого клипа и в конце (тишина вместо третьего) звука нет
    assert!(samples[..2 * SR as usize].iter().all(|s| *s == 0.0));
    assert!(samples[9 * SR as usize..].iter().all(|s| *s == 0.0));
    assert!(samples[2 * SR as usize + 100..4 * SR as usize].iter().any(|s| *s != 0.0));
}

#[tokio::test]
async fn test_pipeline_is_deterministic() {
    let dir = tempdir().unwrap();
    let (first, first_samples, _) = run_once(dir.path(), "a.wav").await;
    let (second, second_samples, _) = run_once(dir.path(), "b.wav").await;

    let factors = |report: &SyncReport| report.segments.iter().map(|s| s.speed_factor).collect::<Vec<_>>();
    assert_eq!(factors(&first), factors(&second));
    assert_eq!(first_samples.len(), second_samples.len());
    assert_eq!(first.total_duration, second.total_duration);
}

#[tokio::test]
async fn test_report_and_diagnostics_files() {
    let dir = tempdir().unwrap();
    let (report, _, _) = run_once(dir.path(), "out.wav").await;

    let report_path = dir.path().join("report.json");
    report.write_json(&report_path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(json["fallback_count"], 1);
    assert_eq!(json["segments"][2]["used_fallback"], true);

    let csv_path = dir.path().join("diagnostics.csv");
    report.write_diagnostics(&csv_path).unwrap();
    let csv = std::fs::read_to_string(&csv_path).unwrap();
    assert_eq!(csv.lines().count(), 4);
    assert!(csv.lines().nth(1).unwrap().starts_with("0,4.500,3.000,1.50"));
}

#[tokio::test]
async fn test_missing_input_is_fatal() {
    let dir = tempdir().unwrap();
    let result = synchronize_subtitles(
        dir.path().join("missing.srt"),
        dir.path().join("out.wav"),
        Arc::new(WordClockProvider::new()),
        config(),
        voices(),
    )
    .await;

    assert!(matches!(result, Err(TtsSyncError::FileNotFound(_))));
    assert!(!dir.path().join("out.wav").exists());
}

#[tokio::test]
async fn test_overlap_rejection() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("overlap.srt");
    std::fs::write(
        &input,
        "1\n00:00:00,000 --> 00:00:03,000\nfirst line here\n\n2\n00:00:02,000 --> 00:00:04,000\nsecond line\n",
    )
    .unwrap();

    let provider = Arc::new(WordClockProvider::new());
    let config = SyncConfig { overlap_policy: OverlapPolicy::Reject, ..config() };
    let sync = TtsSync::new(provider.clone(), config)
        .unwrap()
        .with_detector(Box::new(EnglishDetector));
    let result = sync.process(&input, dir.path().join("out.wav")).await;
    assert!(matches!(result, Err(TtsSyncError::Assembly(_))));
    // порядок проверяется до синтеза, провайдер не вызывается
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    assert!(!dir.path().join("out.wav").exists());
}

#[tokio::test]
async fn test_out_of_order_file_fails_before_synthesis() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("unordered.srt");
    std::fs::write(
        &input,
        "1\n00:00:05,000 --> 00:00:06,000\nlater line\n\n2\n00:00:01,000 --> 00:00:02,000\nearlier line\n",
    )
    .unwrap();

    let provider = Arc::new(WordClockProvider::new());
    let sync = TtsSync::new(provider.clone(), config())
        .unwrap()
        .with_detector(Box::new(EnglishDetector));
    let result = sync.process(&input, dir.path().join("out.wav")).await;
    assert!(matches!(result, Err(TtsSyncError::Assembly(_))));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
}
