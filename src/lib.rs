//! Основной файл библиотеки srt-tts-sync
//!
//! Озвучивание субтитров с сохранением таймингов: каждая строка синтезируется
//! облачным TTS, скорость речи подгоняется под окно субтитра, клипы
//! склеиваются с тишиной в одну дорожку, выровненную по исходной шкале времени.
//!
//! Конвейер: загрузка субтитров -> выбор голоса -> синтез сегментов -> сборка дорожки.

pub mod progress;
pub mod notification;
pub mod config;
pub mod error;
pub mod report;
pub mod subtitle;
pub mod tts;
pub mod media;
pub mod utils;

use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use crate::config::{SyncConfig, VoiceConfig};
use crate::error::{Result, TtsSyncError};
use crate::media::track::{assemble, validate_order, AssembledTrack};
use crate::progress::{ProcessStep, ProgressReporter, ProgressTracker};
use crate::report::{RunInfo, SyncReport};
use crate::subtitle::{detect_majority_language, parse_subtitle_file, select_voice, LanguageDetector, Segment, WhatlangDetector, UNKNOWN_LANGUAGE};
use crate::tts::{SegmentSynthesizer, SynthesisResult, TtsProvider};

pub use crate::config::{Backoff, OverlapPolicy, ProviderKind, RetryPolicy};

/// Результат синхронизации в памяти
#[derive(Debug)]
pub struct SyncOutput {
    /// Преобладающий язык субтитров
    pub language: String,
    /// Голос, которым озвучены сегменты
    pub voice: String,
    /// Результаты синтеза в порядке сегментов
    pub results: Vec<SynthesisResult>,
    /// Собранная дорожка
    pub track: AssembledTrack,
    pub report: SyncReport,
}

/// Конвейер синхронизации TTS с субтитрами
pub struct TtsSync {
    provider: Arc<dyn TtsProvider>,
    config: SyncConfig,
    voices: VoiceConfig,
    detector: Box<dyn LanguageDetector>,
    voice: Option<String>,
    cancel: CancellationToken,
    progress_tracker: Option<Arc<ProgressTracker>>,
}

impl TtsSync {
    /// Создать конвейер. Конфигурация проверяется сразу
    pub fn new(provider: Arc<dyn TtsProvider>, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            provider,
            config,
            voices: VoiceConfig::default(),
            detector: Box::new(WhatlangDetector::default()),
            voice: None,
            cancel: CancellationToken::new(),
            progress_tracker: None,
        })
    }

    /// Таблица голосов по языкам
    pub fn with_voice_config(mut self, voices: VoiceConfig) -> Self {
        self.voices = voices;
        self
    }

    /// Заменить детектор языка
    pub fn with_detector(mut self, detector: Box<dyn LanguageDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Явно заданный голос. Определение языка при этом не выполняется
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    /// Использовать внешний токен отмены (например, привязанный к Ctrl-C)
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Репортер прогресса
    pub fn with_progress_reporter(mut self, reporter: Box<dyn ProgressReporter>) -> Self {
        self.progress_tracker = Some(Arc::new(ProgressTracker::with_reporter(reporter)));
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Токен отмены текущего конвейера
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn set_step(&self, step: ProcessStep) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(TtsSyncError::Cancelled);
        }
        if let Some(tracker) = &self.progress_tracker {
            tracker.set_step(step);
        }
        Ok(())
    }

    fn resolve_voice(&self, segments: &[Segment]) -> (String, String) {
        if let Some(voice) = &self.voice {
            log::info!("Using explicitly configured voice {}", voice);
            return (UNKNOWN_LANGUAGE.to_string(), voice.clone());
        }

        let language = detect_majority_language(segments, self.detector.as_ref());
        let voice = select_voice(&language, &self.voices, self.provider.default_voice());
        (language, voice)
    }

    /// Озвучить уже загруженные сегменты и собрать дорожку
    pub async fn run(&self, segments: &[Segment]) -> Result<SyncOutput> {
        if segments.is_empty() {
            return Err(TtsSyncError::SubtitleParsing("No subtitle segments to synthesize".to_string()));
        }

        validate_order(segments, self.config.sample_rate, self.config.overlap_policy)?;

        self.set_step(ProcessStep::LanguageDetection)?;
        let (language, voice) = self.resolve_voice(segments);
        log::info!("Language: {}, voice: {}", language, voice);
        if !self.provider.supports_voice(&voice) {
            return Err(TtsSyncError::Configuration(format!(
                "voice '{}' is not available for the {} provider",
                voice,
                self.provider.name()
            )));
        }

        self.set_step(ProcessStep::SpeechSynthesis)?;
        let synthesizer = SegmentSynthesizer::new(self.provider.clone(), self.config.clone(), self.cancel.clone());
        let results = synthesizer.synthesize_all(segments, &voice, self.progress_tracker.clone()).await?;

        self.set_step(ProcessStep::TrackAssembly)?;
        let track = assemble(
            segments,
            results.iter().map(|result| result.clip.clone()),
            self.config.sample_rate,
            self.config.overlap_policy,
        )?;

        let run = RunInfo {
            language: &language,
            voice: &voice,
            provider: self.provider.name(),
            min_speed_factor: self.config.min_speed_factor,
        };
        let report = SyncReport::build(segments, &results, &track, run)?;

        if report.fallback_count > 0 {
            log::warn!(
                "{} of {} segments were replaced with silence: {:?}",
                report.fallback_count,
                report.segment_count,
                report.fallback_indices()
            );
        }

        Ok(SyncOutput {
            language,
            voice,
            results,
            track,
            report,
        })
    }

    /// Полный цикл: прочитать субтитры, озвучить, записать WAV
    pub async fn process<P: AsRef<Path>, Q: AsRef<Path>>(&self, input: P, output: Q) -> Result<SyncReport> {
        let input = input.as_ref();
        let output = output.as_ref();
        log::info!("Synchronizing speech for {} -> {}", input.display(), output.display());

        self.set_step(ProcessStep::SubtitleLoading)?;
        let segments = parse_subtitle_file(input)?;
        if let Some(tracker) = &self.progress_tracker {
            tracker.update_step_progress(100.0, Some(format!("Загружено сегментов: {}", segments.len())));
        }

        let result = self.run(&segments).await?;

        self.set_step(ProcessStep::Export)?;
        result.track.track.write_wav(output)?;

        if let Some(tracker) = &self.progress_tracker {
            tracker.complete();
        }
        log::info!(
            "Done: {:.3}s track, {} segments, {} fallbacks",
            result.report.total_duration,
            result.report.segment_count,
            result.report.fallback_count
        );
        Ok(result.report)
    }
}

/// Озвучить файл субтитров и записать дорожку с настройками по умолчанию
pub async fn synchronize_subtitles<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    provider: Arc<dyn TtsProvider>,
    config: SyncConfig,
    voices: VoiceConfig,
) -> Result<SyncReport> {
    TtsSync::new(provider, config)?.with_voice_config(voices).process(input, output).await
}
