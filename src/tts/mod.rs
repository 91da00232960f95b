//! Модуль для работы с TTS
//!
//! Провайдеры синтеза речи, политика повторных попыток и синтезатор
//! сегментов, подгоняющий длительность речи под окно субтитра.

pub mod azure;
pub mod openai;
pub mod retry;
pub mod synthesizer;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use azure::AzureTts;
pub use openai::OpenAiTts;
pub use retry::{retry_with_policy, RetryError};
pub use synthesizer::{SegmentSynthesizer, SynthesisResult};

/// Нейтральный коэффициент скорости для пробного синтеза
pub const NEUTRAL_RATE: f32 = 1.0;

/// Ошибка одной попытки синтеза
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Провайдер вернул ошибку
    #[error("provider error (status {status}): {message}")]
    Provider { status: u16, message: String },

    /// Запрос не дошёл до провайдера или ответ не дочитан
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Провайдер вернул пустой ответ
    #[error("provider returned no audio")]
    EmptyAudio,

    /// Синтез отменён провайдером или запуском
    #[error("synthesis cancelled: {0}")]
    Cancelled(String),

    /// Ответ не удалось декодировать как аудио
    #[error("audio decode error: {0}")]
    Decode(String),

    /// Превышено время ожидания
    #[error("synthesis timed out")]
    Timeout,
}

/// Облачный (или локальный) синтезатор речи
///
/// Провайдер принимает только относительный коэффициент скорости, а не целевую
/// длительность. Подгонка длительности делается в [`SegmentSynthesizer`].
#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// Имя провайдера для логов и отчёта
    fn name(&self) -> &'static str;

    /// Голос, если таблица голосов ничего не дала
    fn default_voice(&self) -> &'static str;

    /// Поддерживаемый диапазон коэффициента скорости
    fn rate_range(&self) -> (f32, f32) {
        (0.5, 2.0)
    }

    /// Известен ли провайдеру голос. По умолчанию проверка не выполняется
    fn supports_voice(&self, _voice: &str) -> bool {
        true
    }

    /// Синтезировать текст заданным голосом с коэффициентом скорости `rate`
    async fn synthesize(&self, text: &str, voice: &str, rate: f32) -> Result<Bytes, SynthesisError>;
}

/// Прочитать тело ответа или превратить неуспешный статус в [`SynthesisError::Provider`]
pub(crate) async fn read_audio_response(response: reqwest::Response) -> Result<Bytes, SynthesisError> {
    let status = response.status();
    if !status.is_success() {
        let message = match response.text().await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
            Err(e) => format!("Failed to read error response: {}", e),
        };
        return Err(SynthesisError::Provider { status: status.as_u16(), message });
    }

    let bytes = response.bytes().await?;
    if bytes.is_empty() {
        return Err(SynthesisError::EmptyAudio);
    }
    Ok(bytes)
}
