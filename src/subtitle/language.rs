//! Определение основного языка субтитров и выбор голоса
//!
//! Язык определяется для каждой строки отдельно, затем выбирается
//! самый частый. При равенстве побеждает язык, встретившийся первым.

use crate::config::VoiceConfig;
use crate::subtitle::parser::Segment;

/// Код, который возвращается, если язык не удалось определить ни для одной строки
pub const UNKNOWN_LANGUAGE: &str = "unknown";

/// Детектор языка одной строки текста
pub trait LanguageDetector: Send + Sync {
    /// Вернуть код языка (ISO 639-1, если он известен) или `None`
    fn detect(&self, text: &str) -> Option<String>;
}

/// Детектор на основе whatlang
#[derive(Debug, Default, Clone)]
pub struct WhatlangDetector {
    /// Учитывать только надёжные результаты
    pub reliable_only: bool,
}

impl LanguageDetector for WhatlangDetector {
    fn detect(&self, text: &str) -> Option<String> {
        let info = whatlang::detect(text)?;
        if self.reliable_only && !info.is_reliable() {
            return None;
        }
        Some(iso_639_1(info.lang()).to_string())
    }
}

/// Перевод кодов whatlang (ISO 639-3) в двухбуквенные коды, которыми размечена таблица голосов
fn iso_639_1(lang: whatlang::Lang) -> &'static str {
    use whatlang::Lang;

    match lang {
        Lang::Eng => "en",
        Lang::Fra => "fr",
        Lang::Deu => "de",
        Lang::Spa => "es",
        Lang::Ita => "it",
        Lang::Por => "pt",
        Lang::Rus => "ru",
        Lang::Ukr => "uk",
        Lang::Pol => "pl",
        Lang::Nld => "nl",
        Lang::Swe => "sv",
        Lang::Dan => "da",
        Lang::Fin => "fi",
        Lang::Tur => "tr",
        Lang::Cmn => "zh",
        Lang::Jpn => "ja",
        Lang::Kor => "ko",
        Lang::Hin => "hi",
        Lang::Heb => "he",
        Lang::Ell => "el",
        Lang::Ces => "cs",
        Lang::Hun => "hu",
        Lang::Ron => "ro",
        Lang::Vie => "vi",
        Lang::Tha => "th",
        Lang::Ind => "id",
        other => other.code(),
    }
}

/// Определить преобладающий язык по всем сегментам
pub fn detect_majority_language(segments: &[Segment], detector: &dyn LanguageDetector) -> String {
    // Порядок первого появления нужен для детерминированного выбора при равенстве
    let mut votes: Vec<(String, usize)> = Vec::new();

    for segment in segments {
        match detector.detect(&segment.text) {
            Some(language) => match votes.iter_mut().find(|(code, _)| *code == language) {
                Some((_, count)) => *count += 1,
                None => votes.push((language, 1)),
            },
            None => {
                log::warn!("Could not detect language for segment {}: '{}'", segment.index, segment.text);
            }
        }
    }

    let mut winner: Option<&(String, usize)> = None;
    for vote in &votes {
        if winner.map_or(true, |best| vote.1 > best.1) {
            winner = Some(vote);
        }
    }

    match winner {
        Some((language, count)) => {
            log::info!("Majority language: {} ({} of {} segments)", language, count, segments.len());
            language.clone()
        }
        None => {
            log::warn!("Language could not be detected for any segment");
            UNKNOWN_LANGUAGE.to_string()
        }
    }
}

/// Выбрать голос для языка: таблица, затем запасной голос из таблицы, затем голос провайдера
pub fn select_voice(language: &str, voices: &VoiceConfig, provider_default: &str) -> String {
    if let Some(voice) = voices.voice_for(language) {
        return voice.to_string();
    }

    let fallback = voices.fallback_voice.as_deref().unwrap_or(provider_default);
    log::info!("No voice configured for language '{}', using {}", language, fallback);
    fallback.to_string()
}
