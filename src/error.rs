//! Модуль обработки ошибок библиотеки srt-tts-sync
//!
//! Здесь собраны фатальные ошибки запуска. Сбои отдельных попыток синтеза
//! описаны в [`crate::tts::SynthesisError`] и наружу не выходят: сегмент
//! в этом случае озвучивается тишиной.

use thiserror::Error;

/// Ошибки библиотеки srt-tts-sync
#[derive(Debug, Error)]
pub enum TtsSyncError {
    /// Ошибка HTTP запроса
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Ошибка ввода-вывода
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Ошибка сериализации/десериализации JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Ошибка чтения или записи WAV
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// Ошибка парсинга субтитров
    #[error("Subtitle parsing error: {0}")]
    SubtitleParsing(String),

    /// Файл не найден
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Неверный формат
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Ошибка конфигурации
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Ошибка обработки аудио
    #[error("Audio processing error: {0}")]
    AudioProcessing(String),

    /// Нарушен порядок сегментов при сборке дорожки
    #[error("Track assembly error: {0}")]
    Assembly(String),

    /// Запуск отменён
    #[error("Run cancelled")]
    Cancelled,

    /// Другая ошибка
    #[error("Other error: {0}")]
    Other(String),
}

impl From<&str> for TtsSyncError {
    fn from(s: &str) -> Self {
        TtsSyncError::Other(s.to_string())
    }
}

impl From<String> for TtsSyncError {
    fn from(s: String) -> Self {
        TtsSyncError::Other(s)
    }
}

/// Тип Result для библиотеки srt-tts-sync
pub type Result<T> = std::result::Result<T, TtsSyncError>;
