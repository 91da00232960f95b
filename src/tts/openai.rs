//! Модуль для интеграции с OpenAI API
//!
//! Синтез через `/v1/audio/speech`. Скорость передаётся параметром `speed`
//! (0.25 - 4.0), ответ запрашивается в WAV, чтобы не терять точность
//! при измерении длительности.

use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client};
use serde::Serialize;
use crate::error::{Result, TtsSyncError};
use crate::tts::{read_audio_response, SynthesisError, TtsProvider};

/// Адрес API по умолчанию
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Параметры запроса к API OpenAI TTS
#[derive(Debug, Serialize)]
struct TtsRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'a str,
}

/// Клиент OpenAI TTS
#[derive(Debug, Clone)]
pub struct OpenAiTts {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiTts {
    /// Создать клиента с моделью `tts-1`
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_model(api_key, "tts-1")
    }

    /// Создать клиента с заданной моделью
    pub fn with_model(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            log::error!("OpenAI API key is empty");
            return Err(TtsSyncError::Configuration("OpenAI API key is required for TTS generation".to_string()));
        }

        let model = model.into();
        if !available_models().contains(&model.as_str()) {
            log::warn!("Unknown OpenAI TTS model '{}', sending it as is", model);
        }

        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Использовать другой адрес API (прокси, совместимые сервисы)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl TtsProvider for OpenAiTts {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn default_voice(&self) -> &'static str {
        "alloy"
    }

    fn rate_range(&self) -> (f32, f32) {
        (0.25, 4.0)
    }

    fn supports_voice(&self, voice: &str) -> bool {
        available_voices().iter().any(|known| *known == voice)
    }

    async fn synthesize(&self, text: &str, voice: &str, rate: f32) -> std::result::Result<Bytes, SynthesisError> {
        let processed_text = preprocess_text(text);

        let request_body = TtsRequest {
            model: &self.model,
            input: &processed_text,
            voice,
            speed: rate,
            response_format: "wav",
        };

        log::debug!("Sending OpenAI TTS request: model={}, voice={}, speed={:.2}", self.model, voice, rate);

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await?;

        read_audio_response(response).await.map_err(|e| match e {
            SynthesisError::Provider { status, message } => SynthesisError::Provider {
                status,
                message: extract_error_message(&message),
            },
            other => other,
        })
    }
}

/// Достать `error.message` из JSON ответа, если он есть
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| json["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

/// Предобрабатывает текст перед отправкой в API TTS.
fn preprocess_text(text: &str) -> String {
    let mut result = text.trim().replace('\n', " ").replace("...", ". ");

    while result.contains("  ") {
        result = result.replace("  ", " ");
    }
    let mut result = result.trim_end().to_string();

    // Без завершающего знака модель иногда обрывает интонацию
    if let Some(last) = result.chars().last() {
        if !".!?".contains(last) {
            result.push('.');
        }
    }

    result
}

/// Возвращает список доступных голосов TTS.
pub fn available_voices() -> Vec<&'static str> {
    vec!["alloy", "ash", "ballad", "coral", "echo", "fable", "onyx", "nova", "sage", "shimmer", "verse"]
}

/// Возвращает список доступных моделей TTS.
pub fn available_models() -> Vec<&'static str> {
    vec!["tts-1", "tts-1-hd", "gpt-4o-mini-tts"]
}
