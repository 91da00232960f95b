//! Модуль конфигурации библиотеки srt-tts-sync
//!
//! Конфигурация загружается один раз при старте и дальше передаётся
//! по ссылке. Глобального состояния нет.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::error::{Result, TtsSyncError};

/// Провайдер синтеза речи
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Azure Cognitive Services Speech
    Azure,
    /// OpenAI Audio API
    OpenAi,
}

impl Default for ProviderKind {
    fn default() -> Self {
        Self::Azure
    }
}

impl ProviderKind {
    /// Получить строковое представление провайдера
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Azure => "azure",
            Self::OpenAi => "openai",
        }
    }
}

/// Стратегия паузы между попытками
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Одинаковая пауза перед каждой повторной попыткой
    Fixed,
    /// Пауза удваивается после каждой неудачи
    Exponential,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Fixed
    }
}

/// Политика повторных попыток для одного вызова синтеза
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Общее число попыток, включая первую
    pub max_attempts: u32,
    /// Базовая пауза между попытками в миллисекундах
    pub delay_ms: u64,
    /// Стратегия паузы
    pub backoff: Backoff,
    /// Добавлять случайный разброс к паузе (до 25%)
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 5000,
            backoff: Backoff::Fixed,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Политика без пауз, удобна для тестов и локальных провайдеров
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay_ms: 0,
            backoff: Backoff::Fixed,
            jitter: false,
        }
    }

    /// Пауза перед попыткой с номером `attempt + 1` (нумерация с 1)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = match self.backoff {
            Backoff::Fixed => self.delay_ms,
            Backoff::Exponential => {
                let shift = attempt.saturating_sub(1).min(16);
                self.delay_ms.saturating_mul(1u64 << shift)
            }
        };

        if self.jitter && base > 0 {
            let spread = rand::random::<f64>() * 0.25;
            Duration::from_millis(base + (base as f64 * spread) as u64)
        } else {
            Duration::from_millis(base)
        }
    }
}

/// Что делать с сегментом, который начинается раньше конца предыдущего
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Клип ставится сразу после предыдущего и звучит с опозданием
    Defer,
    /// Перекрытие считается ошибкой входных данных
    Reject,
}

impl Default for OverlapPolicy {
    fn default() -> Self {
        Self::Defer
    }
}

/// Конфигурация конвейера синхронизации
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Нижняя граница коэффициента скорости (None - без ограничения)
    pub min_speed_factor: Option<f32>,
    /// Максимальное количество одновременных запросов к провайдеру
    pub max_concurrent_requests: usize,
    /// Повторные попытки для пробного и финального синтеза
    pub retry: RetryPolicy,
    /// Ограничение времени на один сегмент, в секундах
    pub segment_timeout_secs: Option<u64>,
    /// Частота дискретизации итоговой дорожки
    pub sample_rate: u32,
    /// Обработка перекрывающихся сегментов
    pub overlap_policy: OverlapPolicy,
    /// Сколько корректирующих проходов допускается после финального синтеза
    pub max_refinements: u32,
    /// Допустимое относительное отклонение длительности клипа от цели
    pub drift_tolerance: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_speed_factor: None,
            max_concurrent_requests: 4,
            retry: RetryPolicy::default(),
            segment_timeout_secs: Some(180),
            sample_rate: 24_000,
            overlap_policy: OverlapPolicy::default(),
            max_refinements: 0,
            drift_tolerance: 0.05,
        }
    }
}

impl SyncConfig {
    /// Проверить согласованность параметров
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_requests == 0 {
            return Err(TtsSyncError::Configuration("max_concurrent_requests must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(TtsSyncError::Configuration("retry.max_attempts must be at least 1".to_string()));
        }
        if self.sample_rate == 0 {
            return Err(TtsSyncError::Configuration("sample_rate must be positive".to_string()));
        }
        if let Some(floor) = self.min_speed_factor {
            if !(floor.is_finite() && floor > 0.0) {
                return Err(TtsSyncError::Configuration(format!("min_speed_factor must be positive, got {}", floor)));
            }
        }
        if !(self.drift_tolerance.is_finite() && self.drift_tolerance >= 0.0) {
            return Err(TtsSyncError::Configuration(format!("drift_tolerance must be non-negative, got {}", self.drift_tolerance)));
        }
        if self.segment_timeout_secs == Some(0) {
            return Err(TtsSyncError::Configuration("segment_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    /// Таймаут на сегмент в виде Duration
    pub fn segment_timeout(&self) -> Option<Duration> {
        self.segment_timeout_secs.map(Duration::from_secs)
    }

    /// Загрузить конфигурацию из JSON файла
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TtsSyncError::FileNotFound(format!("{}: {}", path.display(), e)))?;
        let config: SyncConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }
}

/// Соответствие кодов языков голосам провайдера
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VoiceConfig {
    /// Голос для каждого кода языка (ISO 639-1)
    #[serde(default)]
    pub default_voice: HashMap<String, String>,
    /// Голос на случай, если язык не распознан или отсутствует в таблице
    #[serde(default)]
    pub fallback_voice: Option<String>,
}

impl VoiceConfig {
    /// Загрузить таблицу голосов из JSON файла
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TtsSyncError::FileNotFound(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&contents)
    }

    /// Разобрать таблицу голосов из строки JSON
    pub fn from_json(contents: &str) -> Result<Self> {
        let config: VoiceConfig = serde_json::from_str(contents)
            .map_err(|e| TtsSyncError::Configuration(format!("Invalid voice configuration: {}", e)))?;
        if config.default_voice.values().any(|voice| voice.trim().is_empty()) {
            return Err(TtsSyncError::Configuration("Voice configuration contains an empty voice name".to_string()));
        }
        Ok(config)
    }

    /// Голос для языка, если он задан
    pub fn voice_for(&self, language: &str) -> Option<&str> {
        self.default_voice.get(language).map(String::as_str)
    }
}
