//! Модуль для работы с субтитрами
//!
//! Загрузка сегментов из SRT/VTT и выбор голоса по языку текста.

pub mod parser;
pub mod language;

pub use parser::{Segment, SubtitleFormat, parse_subtitle_file, parse_subtitles};
pub use language::{LanguageDetector, WhatlangDetector, detect_majority_language, select_voice, UNKNOWN_LANGUAGE};
