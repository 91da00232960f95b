//! Синтез сегментов с подгонкой длительности
//!
//! Провайдер не умеет синтезировать речь заданной длительности, только
//! с заданным коэффициентом скорости. Поэтому каждый сегмент проходит так:
//!
//! 1. пробный синтез на скорости 1.0, измерение естественной длительности;
//! 2. коэффициент `естественная / целевая`, нижняя граница, диапазон провайдера,
//!    округление до двух знаков;
//! 3. финальный синтез с этим коэффициентом;
//! 4. (опционально) корректирующие проходы, если клип всё ещё далёк от цели.
//!
//! Модель линейная: длительность считается обратно пропорциональной скорости.
//! Отклонение итогового клипа от цели всегда измеряется и попадает в отчёт.
//!
//! Если пробный или финальный синтез не удался за все попытки, вместо речи
//! ставится тишина ровно целевой длительности. Ошибкой это не считается.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use bytes::Bytes;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use crate::config::SyncConfig;
use crate::error::{Result, TtsSyncError};
use crate::media::audio::AudioClip;
use crate::progress::ProgressTracker;
use crate::subtitle::parser::Segment;
use crate::tts::retry::{retry_with_policy, RetryError};
use crate::tts::{SynthesisError, TtsProvider, NEUTRAL_RATE};

/// Результат синтеза одного сегмента
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    /// Индекс сегмента
    pub index: usize,
    /// Ответ провайдера как есть (None при подстановке тишины)
    pub audio: Option<Bytes>,
    /// Итоговый клип на частоте дорожки
    pub clip: AudioClip,
    /// Длительность пробного синтеза, секунды
    pub default_duration: Option<f64>,
    /// Длительность окна субтитра, секунды
    pub target_duration: f64,
    /// Коэффициент скорости, с которым синтезирован клип
    pub speed_factor: Option<f32>,
    /// Клип заменён тишиной
    pub used_fallback: bool,
    /// Всего обращений к провайдеру
    pub attempts: u32,
    /// Выполненные корректирующие проходы
    pub refinements: u32,
    /// Причина подстановки тишины
    pub failure: Option<String>,
}

impl SynthesisResult {
    /// Длительность итогового клипа, секунды
    pub fn duration(&self) -> f64 {
        self.clip.duration()
    }

    /// Отклонение от целевой длительности (положительное - клип длиннее окна)
    pub fn drift(&self) -> f64 {
        self.duration() - self.target_duration
    }

    /// Отклонение относительно целевой длительности
    pub fn relative_drift(&self) -> f64 {
        if self.target_duration > 0.0 {
            self.drift() / self.target_duration
        } else {
            0.0
        }
    }
}

/// Округлить коэффициент до двух знаков, как он уходит провайдеру
pub fn quantize_rate(rate: f64) -> f64 {
    (rate * 100.0).round() / 100.0
}

/// Коэффициент скорости для финального синтеза.
///
/// `natural / target`, затем нижняя граница `min_floor`, затем диапазон
/// провайдера `range`, затем округление до двух знаков.
pub fn compute_speed_factor(default_duration: f64, target_duration: f64, min_floor: Option<f32>, range: (f32, f32)) -> f32 {
    let raw = default_duration / target_duration;
    let mut rate = raw;

    if let Some(floor) = min_floor {
        if rate < floor as f64 {
            log::debug!("Speed factor {:.3} is below the floor, using {:.2}", rate, floor);
            rate = floor as f64;
        }
    }

    let (min_rate, max_rate) = range;
    if rate < min_rate as f64 || rate > max_rate as f64 {
        let clamped = rate.clamp(min_rate as f64, max_rate as f64);
        log::warn!(
            "Speed factor {:.3} is outside the provider range [{:.2}, {:.2}], using {:.2}",
            rate,
            min_rate,
            max_rate,
            clamped
        );
        rate = clamped;
    }

    let quantized = quantize_rate(rate) as f32;
    match min_floor {
        Some(floor) if quantized < floor && floor <= max_rate => floor,
        _ => quantized,
    }
}

/// Удачный рендер: ответ провайдера, декодированный клип и число попыток
struct Rendered {
    audio: Bytes,
    clip: AudioClip,
    attempts: u32,
}

/// Счётчики сегмента, видимые снаружи во время синтеза.
///
/// Нужны, чтобы при таймауте отчёт сохранил сделанные обращения и
/// длительность пробного синтеза.
#[derive(Debug, Default)]
struct AttemptLog {
    calls: AtomicU32,
    default_duration: Mutex<Option<f64>>,
}

impl AttemptLog {
    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_default_duration(&self, duration: f64) {
        *self.default_duration.lock() = Some(duration);
    }

    fn default_duration(&self) -> Option<f64> {
        *self.default_duration.lock()
    }
}

/// Синтезатор сегментов поверх провайдера
#[derive(Clone)]
pub struct SegmentSynthesizer {
    provider: Arc<dyn TtsProvider>,
    config: Arc<SyncConfig>,
    cancel: CancellationToken,
}

impl SegmentSynthesizer {
    pub fn new(provider: Arc<dyn TtsProvider>, config: SyncConfig, cancel: CancellationToken) -> Self {
        Self {
            provider,
            config: Arc::new(config),
            cancel,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn provider(&self) -> &dyn TtsProvider {
        self.provider.as_ref()
    }

    /// Синтезировать и декодировать текст с заданной скоростью, с повторами
    async fn render(
        &self,
        segment: &Segment,
        voice: &str,
        rate: f32,
        phase: &str,
        tally: &AttemptLog,
    ) -> std::result::Result<Rendered, RetryError<SynthesisError>> {
        let label = format!("Segment {} {} (rate {:.2})", segment.index, phase, rate);
        let provider = self.provider.as_ref();
        let text = segment.text.as_str();
        let sample_rate = self.config.sample_rate;

        let ((audio, clip), attempts) = retry_with_policy(&self.config.retry, &self.cancel, &label, |_| async move {
            tally.record_call();
            let audio = provider.synthesize(text, voice, rate).await?;
            let clip = AudioClip::decode(&audio)
                .and_then(|clip| clip.resample(sample_rate))
                .map_err(|e| SynthesisError::Decode(e.to_string()))?;
            Ok::<_, SynthesisError>((audio, clip))
        })
        .await?;

        Ok(Rendered { audio, clip, attempts })
    }

    /// Подставить тишину целевой длительности
    fn fallback(&self, segment: &Segment, default_duration: Option<f64>, attempts: u32, reason: String) -> SynthesisResult {
        log::warn!("Segment {}: {}; substituting {:.3}s of silence", segment.index, reason, segment.target_duration());
        SynthesisResult {
            index: segment.index,
            audio: None,
            clip: AudioClip::silence(segment.target_duration(), self.config.sample_rate),
            default_duration,
            target_duration: segment.target_duration(),
            speed_factor: None,
            used_fallback: true,
            attempts,
            refinements: 0,
            failure: Some(reason),
        }
    }

    /// Синтезировать один сегмент.
    ///
    /// Ошибкой возвращается только отмена запуска. Исчерпанные попытки
    /// дают результат с тишиной и `used_fallback = true`.
    pub async fn synthesize(&self, segment: &Segment, voice: &str) -> Result<SynthesisResult> {
        self.synthesize_logged(segment, voice, &AttemptLog::default()).await
    }

    async fn synthesize_logged(&self, segment: &Segment, voice: &str, tally: &AttemptLog) -> Result<SynthesisResult> {
        let target = segment.target_duration();

        let probe = match self.render(segment, voice, NEUTRAL_RATE, "probe", tally).await {
            Ok(probe) => probe,
            Err(RetryError::Cancelled) => return Err(TtsSyncError::Cancelled),
            Err(RetryError::Exhausted { attempts, last }) => {
                return Ok(self.fallback(segment, None, attempts, format!("probe synthesis failed after {} attempts: {}", attempts, last)));
            }
        };

        let default_duration = probe.clip.duration();
        tally.set_default_duration(default_duration);
        let rate = compute_speed_factor(default_duration, target, self.config.min_speed_factor, self.provider.rate_range());
        log::info!(
            "Segment {}: natural {:.3}s, target {:.3}s, speed factor {:.2}",
            segment.index,
            default_duration,
            target,
            rate
        );

        let rendered = match self.render(segment, voice, rate, "final", tally).await {
            Ok(rendered) => rendered,
            Err(RetryError::Cancelled) => return Err(TtsSyncError::Cancelled),
            Err(RetryError::Exhausted { attempts, last }) => {
                return Ok(self.fallback(
                    segment,
                    Some(default_duration),
                    probe.attempts + attempts,
                    format!("final synthesis failed after {} attempts: {}", attempts, last),
                ));
            }
        };

        let mut result = SynthesisResult {
            index: segment.index,
            audio: Some(rendered.audio),
            clip: rendered.clip,
            default_duration: Some(default_duration),
            target_duration: target,
            speed_factor: Some(rate),
            used_fallback: false,
            attempts: probe.attempts + rendered.attempts,
            refinements: 0,
            failure: None,
        };

        self.refine(segment, voice, &mut result, tally).await?;

        if result.relative_drift().abs() > self.config.drift_tolerance {
            log::warn!(
                "Segment {}: clip is {:.3}s for a {:.3}s window (drift {:+.3}s)",
                segment.index,
                result.duration(),
                target,
                result.drift()
            );
        }

        Ok(result)
    }

    /// Корректирующие проходы: `rate * actual / target`, пока отклонение выше допуска
    async fn refine(&self, segment: &Segment, voice: &str, result: &mut SynthesisResult, tally: &AttemptLog) -> Result<()> {
        let (min_rate, max_rate) = self.provider.rate_range();

        for _ in 0..self.config.max_refinements {
            if result.relative_drift().abs() <= self.config.drift_tolerance {
                break;
            }
            let Some(current) = result.speed_factor else { break };

            let mut next = current as f64 * result.duration() / result.target_duration;
            if let Some(floor) = self.config.min_speed_factor {
                next = next.max(floor as f64);
            }
            let next = quantize_rate(next.clamp(min_rate as f64, max_rate as f64)) as f32;
            if (next - current).abs() < f32::EPSILON {
                log::debug!("Segment {}: refinement cannot change the rate {:.2}", segment.index, current);
                break;
            }

            match self.render(segment, voice, next, "refinement", tally).await {
                Ok(rendered) => {
                    log::info!(
                        "Segment {}: refined speed factor {:.2} -> {:.2}, clip {:.3}s -> {:.3}s",
                        segment.index,
                        current,
                        next,
                        result.duration(),
                        rendered.clip.duration()
                    );
                    result.audio = Some(rendered.audio);
                    result.clip = rendered.clip;
                    result.speed_factor = Some(next);
                    result.attempts += rendered.attempts;
                    result.refinements += 1;
                }
                Err(RetryError::Cancelled) => return Err(TtsSyncError::Cancelled),
                Err(RetryError::Exhausted { attempts, last }) => {
                    log::warn!("Segment {}: refinement failed, keeping the previous clip: {}", segment.index, last);
                    result.attempts += attempts;
                    break;
                }
            }
        }

        Ok(())
    }

    /// Синтезировать все сегменты пулом не более `max_concurrent_requests` задач.
    ///
    /// Результаты идут в порядке входных сегментов. Сегмент, не уложившийся
    /// в таймаут, заменяется тишиной.
    pub async fn synthesize_all(
        &self,
        segments: &[Segment],
        voice: &str,
        tracker: Option<Arc<ProgressTracker>>,
    ) -> Result<Vec<SynthesisResult>> {
        let total = segments.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_requests.max(1)));
        let completed = Arc::new(AtomicUsize::new(0));
        let voice: Arc<str> = Arc::from(voice);

        log::info!(
            "Synthesizing {} segments with {} (voice {}, up to {} concurrent requests)",
            total,
            self.provider.name(),
            voice,
            self.config.max_concurrent_requests
        );

        let mut tasks = Vec::with_capacity(total);
        for segment in segments.iter().cloned() {
            let synthesizer = self.clone();
            let semaphore = semaphore.clone();
            let completed = completed.clone();
            let tracker = tracker.clone();
            let voice = voice.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| TtsSyncError::Other(format!("Synthesis pool closed: {}", e)))?;

                let tally = AttemptLog::default();
                let result = match synthesizer.config.segment_timeout() {
                    Some(limit) => match tokio::time::timeout(limit, synthesizer.synthesize_logged(&segment, &voice, &tally)).await {
                        Ok(result) => result,
                        Err(_) => Ok(synthesizer.fallback(
                            &segment,
                            tally.default_duration(),
                            tally.calls(),
                            format!("{} after {}s", SynthesisError::Timeout, limit.as_secs()),
                        )),
                    },
                    None => synthesizer.synthesize_logged(&segment, &voice, &tally).await,
                }?;

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(t) = &tracker {
                    t.update_step_progress(
                        done as f32 / total as f32 * 100.0,
                        Some(format!("Сегмент {}/{}", done, total)),
                    );
                }

                Ok::<_, TtsSyncError>(result)
            }));
        }

        let mut results = Vec::with_capacity(total);
        let mut cancelled = false;
        for joined in join_all(tasks).await {
            match joined {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(TtsSyncError::Cancelled)) => cancelled = true,
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(TtsSyncError::Other(format!("Synthesis task failed: {}", e))),
            }
        }

        if cancelled || self.cancel.is_cancelled() {
            log::warn!("Synthesis cancelled after {} of {} segments", results.len(), total);
            return Err(TtsSyncError::Cancelled);
        }

        let fallbacks = results.iter().filter(|r| r.used_fallback).count();
        log::info!("Synthesis finished: {} segments, {} replaced with silence", total, fallbacks);
        Ok(results)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;

    pub(crate) const SR: u32 = 8_000;

    /// Детерминированный провайдер: речь длится `natural / rate` секунд
    pub(crate) struct StubProvider {
        pub natural: HashMap<String, f64>,
        pub default_natural: f64,
        /// Сколько первых вызовов завершаются ошибкой
        pub failures: usize,
        pub calls: Mutex<Vec<f32>>,
        pub delay: Option<Duration>,
        pub range: (f32, f32),
    }

    impl StubProvider {
        pub(crate) fn new(default_natural: f64) -> Self {
            Self {
                natural: HashMap::new(),
                default_natural,
                failures: 0,
                calls: Mutex::new(Vec::new()),
                delay: None,
                range: (0.5, 2.0),
            }
        }

        pub(crate) fn failing(mut self, failures: usize) -> Self {
            self.failures = failures;
            self
        }

        pub(crate) fn rates(&self) -> Vec<f32> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl TtsProvider for StubProvider {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn default_voice(&self) -> &'static str {
            "stub-voice"
        }

        fn rate_range(&self) -> (f32, f32) {
            self.range
        }

        async fn synthesize(&self, text: &str, _voice: &str, rate: f32) -> std::result::Result<Bytes, SynthesisError> {
            let call = {
                let mut calls = self.calls.lock();
                calls.push(rate);
                calls.len()
            };
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if call <= self.failures {
                return Err(SynthesisError::Provider { status: 500, message: format!("stub failure #{}", call) });
            }
            let natural = self.natural.get(text).copied().unwrap_or(self.default_natural);
            let clip = AudioClip::new(vec![0.25; (natural / rate as f64 * SR as f64).round() as usize], SR);
            Ok(Bytes::from(clip.to_wav_bytes().unwrap()))
        }
    }

    pub(crate) fn test_config() -> SyncConfig {
        SyncConfig {
            retry: RetryPolicy::immediate(3),
            sample_rate: SR,
            ..SyncConfig::default()
        }
    }

    fn segment(start_ms: u64, end_ms: u64) -> Segment {
        Segment::new(0, Duration::from_millis(start_ms), Duration::from_millis(end_ms), "hello world").unwrap()
    }

    fn synthesizer(provider: Arc<StubProvider>, config: SyncConfig) -> SegmentSynthesizer {
        SegmentSynthesizer::new(provider, config, CancellationToken::new())
    }

    #[test]
    fn test_compute_speed_factor() {
        assert_eq!(compute_speed_factor(6.0, 3.0, None, (0.5, 2.0)), 2.0);
        assert_eq!(compute_speed_factor(1.0, 3.0, None, (0.25, 4.0)), 0.33);
        assert_eq!(compute_speed_factor(1.0, 2.0, Some(0.9), (0.5, 2.0)), 0.9);
        assert_eq!(compute_speed_factor(9.0, 2.0, None, (0.5, 2.0)), 2.0);
        assert_eq!(compute_speed_factor(2.0, 3.0, None, (0.5, 2.0)), 0.67);
    }

    #[tokio::test]
    async fn test_two_to_five_seconds_with_six_second_natural() {
        let provider = Arc::new(StubProvider::new(6.0));
        let result = synthesizer(provider.clone(), test_config()).synthesize(&segment(2_000, 5_000), "v").await.unwrap();

        assert!(!result.used_fallback);
        assert_eq!(result.speed_factor, Some(2.0));
        assert_eq!(result.default_duration, Some(6.0));
        assert!((result.duration() - 3.0).abs() < 0.01);
        assert!(result.drift().abs() < 0.01);
        assert_eq!(provider.rates(), vec![1.0, 2.0]);
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn test_floor_is_sent_to_provider() {
        let provider = Arc::new(StubProvider::new(1.0));
        let config = SyncConfig { min_speed_factor: Some(0.9), ..test_config() };
        let result = synthesizer(provider.clone(), config).synthesize(&segment(0, 2_000), "v").await.unwrap();

        assert_eq!(provider.rates(), vec![1.0, 0.9]);
        assert_eq!(result.speed_factor, Some(0.9));
    }

    #[tokio::test]
    async fn test_always_failing_provider_yields_exact_silence() {
        let provider = Arc::new(StubProvider::new(1.0).failing(usize::MAX));
        let result = synthesizer(provider.clone(), test_config()).synthesize(&segment(1_000, 3_500), "v").await.unwrap();

        assert!(result.used_fallback);
        assert!(result.audio.is_none());
        assert_eq!(result.speed_factor, None);
        assert!(result.clip.is_silent());
        assert_eq!(result.clip.samples.len(), (2.5 * SR as f64) as usize);
        assert_eq!(result.attempts, 3);
        assert!(result.failure.as_deref().unwrap_or_default().contains("probe"));
    }

    #[tokio::test]
    async fn test_two_failures_then_success_is_not_a_fallback() {
        let provider = Arc::new(StubProvider::new(3.0).failing(2));
        let result = synthesizer(provider.clone(), test_config()).synthesize(&segment(0, 3_000), "v").await.unwrap();

        assert!(!result.used_fallback);
        assert_eq!(result.speed_factor, Some(1.0));
        assert_eq!(result.attempts, 4);
    }

    /// Первые `garbage` ответов - не аудио
    struct Garbled {
        inner: StubProvider,
        garbage: usize,
        calls: AtomicUsize,
    }

    impl Garbled {
        fn new(inner: StubProvider, garbage: usize) -> Self {
            Self { inner, garbage, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl TtsProvider for Garbled {
        fn name(&self) -> &'static str {
            "garbled"
        }
        fn default_voice(&self) -> &'static str {
            "v"
        }
        async fn synthesize(&self, text: &str, voice: &str, rate: f32) -> std::result::Result<Bytes, SynthesisError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.garbage {
                return Ok(Bytes::from_static(b"not audio"));
            }
            self.inner.synthesize(text, voice, rate).await
        }
    }

    #[tokio::test]
    async fn test_undecodable_audio_is_retried() {
        let provider = Arc::new(Garbled::new(StubProvider::new(3.0), 2));
        let synth = SegmentSynthesizer::new(provider.clone(), test_config(), CancellationToken::new());
        let result = synth.synthesize(&segment(0, 3_000), "v").await.unwrap();

        assert!(!result.used_fallback);
        assert_eq!(result.speed_factor, Some(1.0));
        assert_eq!(result.attempts, 4);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_always_undecodable_yields_exact_silence() {
        let provider = Arc::new(Garbled::new(StubProvider::new(1.0), usize::MAX));
        let synth = SegmentSynthesizer::new(provider, test_config(), CancellationToken::new());
        let result = synth.synthesize(&segment(500, 2_250), "v").await.unwrap();

        assert!(result.used_fallback);
        assert!(result.audio.is_none());
        assert!(result.clip.is_silent());
        assert_eq!(result.clip.samples.len(), (1.75 * SR as f64) as usize);
        assert_eq!(result.attempts, 3);
        assert!(result.failure.as_deref().unwrap_or_default().contains("decode"));
    }

    #[tokio::test]
    async fn test_exhausted_final_keeps_default_duration() {
        struct ProbeOnly(StubProvider);

        #[async_trait]
        impl TtsProvider for ProbeOnly {
            fn name(&self) -> &'static str {
                "probe-only"
            }
            fn default_voice(&self) -> &'static str {
                "v"
            }
            async fn synthesize(&self, text: &str, voice: &str, rate: f32) -> std::result::Result<Bytes, SynthesisError> {
                if rate == NEUTRAL_RATE {
                    self.0.synthesize(text, voice, rate).await
                } else {
                    Err(SynthesisError::Cancelled("aborted".to_string()))
                }
            }
        }

        let provider = Arc::new(ProbeOnly(StubProvider::new(4.0)));
        let synth = SegmentSynthesizer::new(provider, test_config(), CancellationToken::new());
        let result = synth.synthesize(&segment(0, 2_000), "v").await.unwrap();

        assert!(result.used_fallback);
        assert_eq!(result.default_duration, Some(4.0));
        assert_eq!(result.attempts, 4);
        assert!((result.duration() - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_refinement_corrects_nonlinear_provider() {
        struct Sluggish(StubProvider);

        // скорость действует только наполовину
        #[async_trait]
        impl TtsProvider for Sluggish {
            fn name(&self) -> &'static str {
                "sluggish"
            }
            fn default_voice(&self) -> &'static str {
                "v"
            }
            fn rate_range(&self) -> (f32, f32) {
                (0.25, 4.0)
            }
            async fn synthesize(&self, text: &str, voice: &str, rate: f32) -> std::result::Result<Bytes, SynthesisError> {
                self.0.synthesize(text, voice, 1.0 + (rate - 1.0) / 2.0).await
            }
        }

        let provider = Arc::new(Sluggish(StubProvider::new(4.0)));
        let config = SyncConfig { max_refinements: 3, drift_tolerance: 0.02, ..test_config() };
        let synth = SegmentSynthesizer::new(provider, config, CancellationToken::new());
        let result = synth.synthesize(&segment(0, 2_000), "v").await.unwrap();

        assert!(result.refinements >= 1);
        assert!(result.relative_drift().abs() < 0.05);
        assert!(result.speed_factor.unwrap() > 2.0);
    }

    #[tokio::test]
    async fn test_cancellation_is_an_error() {
        let provider = Arc::new(StubProvider::new(1.0));
        let token = CancellationToken::new();
        token.cancel();
        let synth = SegmentSynthesizer::new(provider, test_config(), token);

        assert!(matches!(synth.synthesize(&segment(0, 1_000), "v").await, Err(TtsSyncError::Cancelled)));
    }

    #[tokio::test]
    async fn test_synthesize_all_keeps_order_and_times_out() {
        let mut stub = StubProvider::new(1.0);
        stub.delay = Some(Duration::from_millis(10));
        let provider = Arc::new(stub);
        let segments: Vec<Segment> = (0..6)
            .map(|i| Segment::new(i, Duration::from_secs(i as u64 * 2), Duration::from_secs(i as u64 * 2 + 1), format!("line {}", i)).unwrap())
            .collect();

        let config = SyncConfig { max_concurrent_requests: 3, ..test_config() };
        let results = synthesizer(provider.clone(), config).synthesize_all(&segments, "v", None).await.unwrap();
        let indices: Vec<usize> = results.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
        assert!(results.iter().all(|r| !r.used_fallback));
        assert_eq!(provider.rates().len(), 12);

        let mut slow = StubProvider::new(1.0);
        slow.delay = Some(Duration::from_secs(5));
        let config = SyncConfig { segment_timeout_secs: Some(1), ..test_config() };
        let results = synthesizer(Arc::new(slow), config).synthesize_all(&segments[..1], "v", None).await.unwrap();
        assert!(results[0].used_fallback);
        assert!(results[0].failure.as_deref().unwrap_or_default().contains("timed out"));
        assert!((results[0].duration() - 1.0).abs() < 1e-9);
        assert_eq!(results[0].attempts, 1);
        assert_eq!(results[0].default_duration, None);
    }

    #[tokio::test]
    async fn test_timeout_after_probe_keeps_counts() {
        struct SlowFinal(StubProvider);

        #[async_trait]
        impl TtsProvider for SlowFinal {
            fn name(&self) -> &'static str {
                "slow-final"
            }
            fn default_voice(&self) -> &'static str {
                "v"
            }
            async fn synthesize(&self, text: &str, voice: &str, rate: f32) -> std::result::Result<Bytes, SynthesisError> {
                if rate != NEUTRAL_RATE {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                self.0.synthesize(text, voice, rate).await
            }
        }

        let segments = vec![segment(0, 1_000)];
        let config = SyncConfig { segment_timeout_secs: Some(1), ..test_config() };
        let synth = SegmentSynthesizer::new(Arc::new(SlowFinal(StubProvider::new(1.5))), config, CancellationToken::new());
        let results = synth.synthesize_all(&segments, "v", None).await.unwrap();

        assert!(results[0].used_fallback);
        assert_eq!(results[0].default_duration, Some(1.5));
        assert_eq!(results[0].attempts, 2);
        assert_eq!(results[0].speed_factor, None);
    }

    #[tokio::test]
    async fn test_deterministic_speed_factors() {
        let segments: Vec<Segment> = (0..4)
            .map(|i| Segment::new(i, Duration::from_millis(i as u64 * 1_500), Duration::from_millis(i as u64 * 1_500 + 1_300), format!("line {}", i)).unwrap())
            .collect();

        let mut runs = Vec::new();
        for _ in 0..2 {
            let mut stub = StubProvider::new(1.7);
            stub.natural.insert("line 2".to_string(), 0.6);
            let results = synthesizer(Arc::new(stub), test_config()).synthesize_all(&segments, "v", None).await.unwrap();
            runs.push(results.iter().map(|r| (r.speed_factor, r.clip.samples.len())).collect::<Vec<_>>());
        }
        assert_eq!(runs[0], runs[1]);
    }
}
