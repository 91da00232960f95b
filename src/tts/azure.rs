//! Модуль для интеграции с Azure Speech
//!
//! Синтез через REST API Cognitive Services. Скорость задаётся атрибутом
//! `rate` элемента `<prosody>` в SSML, ответ - WAV (RIFF, 24 кГц, 16 бит, моно).

use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use crate::error::{Result, TtsSyncError};
use crate::tts::{read_audio_response, SynthesisError, TtsProvider};

/// Формат ответа Azure
pub const OUTPUT_FORMAT: &str = "riff-24khz-16bit-mono-pcm";

/// Голос по умолчанию
pub const DEFAULT_VOICE: &str = "en-US-AriaNeural";

/// Клиент Azure Speech
#[derive(Debug, Clone)]
pub struct AzureTts {
    client: Client,
    subscription_key: String,
    endpoint: String,
}

impl AzureTts {
    /// Создать клиента для региона (например, `westeurope`)
    pub fn new(subscription_key: impl Into<String>, region: &str) -> Result<Self> {
        let region = region.trim();
        if region.is_empty() {
            return Err(TtsSyncError::Configuration("Azure region is required".to_string()));
        }
        let endpoint = format!("https://{}.tts.speech.microsoft.com/cognitiveservices/v1", region);
        Self::with_endpoint(subscription_key, endpoint)
    }

    /// Создать клиента с явным адресом (частные эндпоинты, контейнеры Speech)
    pub fn with_endpoint(subscription_key: impl Into<String>, endpoint: impl Into<String>) -> Result<Self> {
        let subscription_key = subscription_key.into();
        if subscription_key.trim().is_empty() {
            log::error!("Azure subscription key is empty");
            return Err(TtsSyncError::Configuration("Azure subscription key is required for TTS generation".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("srt-tts-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            subscription_key,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl TtsProvider for AzureTts {
    fn name(&self) -> &'static str {
        "azure"
    }

    fn default_voice(&self) -> &'static str {
        DEFAULT_VOICE
    }

    async fn synthesize(&self, text: &str, voice: &str, rate: f32) -> std::result::Result<Bytes, SynthesisError> {
        let ssml = build_ssml(text, voice, rate);
        log::debug!("Sending Azure TTS request: voice={}, rate={:.2}", voice, rate);

        let response = self
            .client
            .post(&self.endpoint)
            .header("Ocp-Apim-Subscription-Key", &self.subscription_key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", OUTPUT_FORMAT)
            .body(ssml)
            .send()
            .await?;

        // 408 и 499 Azure отдаёт, когда синтез прерван на его стороне
        match response.status().as_u16() {
            408 | 499 => {
                let status = response.status();
                return Err(SynthesisError::Cancelled(format!("Azure aborted synthesis ({})", status)));
            }
            _ => {}
        }

        read_audio_response(response).await
    }
}

/// Язык для `xml:lang`: первые две части имени голоса (`en-US-AriaNeural` -> `en-US`)
fn voice_locale(voice: &str) -> String {
    let parts: Vec<&str> = voice.split('-').collect();
    match parts.as_slice() {
        [lang, region, _, ..] => format!("{}-{}", lang, region),
        [lang, ..] if !lang.is_empty() => lang.to_string(),
        _ => "en-US".to_string(),
    }
}

/// Сформировать SSML с заданной скоростью
pub fn build_ssml(text: &str, voice: &str, rate: f32) -> String {
    format!(
        "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' xmlns:mstts='http://www.w3.org/2001/mstts' xml:lang='{}'>\
<voice name='{}'><prosody rate='{:.2}'>{}</prosody></voice></speak>",
        escape_xml(&voice_locale(voice)),
        escape_xml(voice),
        rate,
        escape_xml(text)
    )
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssml_contains_rate_and_voice() {
        let ssml = build_ssml("Hello", "en-US-AriaNeural", 1.2345);
        assert!(ssml.contains("xml:lang='en-US'"));
        assert!(ssml.contains("<voice name='en-US-AriaNeural'>"));
        assert!(ssml.contains("<prosody rate='1.23'>Hello</prosody>"));
    }

    #[test]
    fn test_ssml_escapes_text() {
        let ssml = build_ssml("Tom & Jerry <3 'quotes'", "fr-FR-DeniseNeural", 1.0);
        assert!(ssml.contains("Tom &amp; Jerry &lt;3 &apos;quotes&apos;"));
        assert!(ssml.contains("xml:lang='fr-FR'"));
    }

    #[test]
    fn test_voice_locale_fallbacks() {
        assert_eq!(voice_locale("de-DE-KatjaNeural"), "de-DE");
        assert_eq!(voice_locale("custom"), "custom");
    }

    #[test]
    fn test_credentials_are_required() {
        assert!(AzureTts::new("", "westeurope").is_err());
        assert!(AzureTts::new("key", " ").is_err());
        assert!(AzureTts::new("key", "westeurope").is_ok());
    }
}
