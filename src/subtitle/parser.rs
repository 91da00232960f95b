//! Модуль для парсинга субтитров
//!
//! Поддерживаются SRT (`HH:MM:SS,mmm`) и WebVTT (`HH:MM:SS.mmm` или `MM:SS.mmm`).
//! Результат - упорядоченный список сегментов, готовых к озвучиванию.

use std::path::Path;
use std::time::Duration;
use lazy_static::lazy_static;
use regex::Regex;
use crate::error::{Result, TtsSyncError};

lazy_static! {
    static ref TIMING_LINE: Regex = Regex::new(
        r"^\s*((?:\d+:)?\d{1,2}:\d{2}(?:[.,]\d{1,3})?)\s*-->\s*((?:\d+:)?\d{1,2}:\d{2}(?:[.,]\d{1,3})?)"
    ).expect("timing regex is valid");
    static ref MARKUP_TAG: Regex = Regex::new(r"<[^>]*>|\{\\[^}]*\}").expect("markup regex is valid");
}

/// Один субтитр: временное окно и текст
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Порядковый номер сегмента в списке (с нуля)
    pub index: usize,
    /// Время начала от начала дорожки
    pub start: Duration,
    /// Время окончания
    pub end: Duration,
    /// Текст для озвучивания
    pub text: String,
}

impl Segment {
    /// Создать сегмент, проверив окно и текст
    pub fn new(index: usize, start: Duration, end: Duration, text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if end <= start {
            return Err(TtsSyncError::SubtitleParsing(format!(
                "segment {} ends at {:.3}s, not after its start {:.3}s",
                index,
                end.as_secs_f64(),
                start.as_secs_f64()
            )));
        }
        if text.trim().is_empty() {
            return Err(TtsSyncError::SubtitleParsing(format!("segment {} has no text", index)));
        }
        Ok(Self { index, start, end, text })
    }

    /// Начало в секундах
    pub fn start_secs(&self) -> f64 {
        self.start.as_secs_f64()
    }

    /// Конец в секундах
    pub fn end_secs(&self) -> f64 {
        self.end.as_secs_f64()
    }

    /// Длительность окна, в которое должна уложиться речь
    pub fn target_duration(&self) -> f64 {
        (self.end - self.start).as_secs_f64()
    }
}

/// Формат файла субтитров
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleFormat {
    Srt,
    WebVtt,
}

impl SubtitleFormat {
    /// Определить формат по расширению, а если оно неизвестно - по содержимому
    pub fn detect(path: &Path, contents: &str) -> Self {
        match path.extension().and_then(|ext| ext.to_str()).map(|ext| ext.to_lowercase()) {
            Some(ext) if ext == "vtt" => Self::WebVtt,
            Some(ext) if ext == "srt" => Self::Srt,
            _ if contents.trim_start_matches('\u{feff}').trim_start().starts_with("WEBVTT") => Self::WebVtt,
            _ => Self::Srt,
        }
    }
}

/// Прочитать файл субтитров и вернуть сегменты
pub fn parse_subtitle_file<P: AsRef<Path>>(path: P) -> Result<Vec<Segment>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .map_err(|e| TtsSyncError::FileNotFound(format!("Failed to open subtitle file {}: {}", path.display(), e)))?;

    let format = SubtitleFormat::detect(path, &contents);
    log::info!("Parsing {:?} subtitles from {}", format, path.display());

    let segments = parse_subtitles(&contents, format)?;
    if segments.is_empty() {
        return Err(TtsSyncError::SubtitleParsing(format!("No usable cues in {}", path.display())));
    }

    log::info!("Loaded {} segments", segments.len());
    Ok(segments)
}

/// Разобрать содержимое субтитров заданного формата
pub fn parse_subtitles(contents: &str, format: SubtitleFormat) -> Result<Vec<Segment>> {
    let contents = contents.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut blocks: Vec<&str> = contents.split("\n\n").collect();

    if format == SubtitleFormat::WebVtt {
        // Первый блок - заголовок WEBVTT
        match blocks.first() {
            Some(header) if header.trim_start().starts_with("WEBVTT") => {
                blocks.remove(0);
            }
            _ => {
                return Err(TtsSyncError::InvalidFormat("Invalid VTT file: missing WEBVTT header".to_string()));
            }
        }
    }

    let mut segments = Vec::new();
    for block in blocks {
        let block = block.trim_matches('\n');
        if block.trim().is_empty() {
            continue;
        }

        let Some((start, end, text)) = parse_cue_block(block)? else {
            continue;
        };

        if end <= start {
            log::warn!("Skipping cue '{}': end {:?} is not after start {:?}", text, end, start);
            continue;
        }
        if text.is_empty() {
            log::warn!("Skipping empty cue at {:.3}s", start.as_secs_f64());
            continue;
        }

        segments.push(Segment { index: segments.len(), start, end, text });
    }

    Ok(segments)
}

/// Разобрать блок субтитра. `None` для блоков без временной строки (NOTE, STYLE, номера)
fn parse_cue_block(block: &str) -> Result<Option<(Duration, Duration, String)>> {
    let lines: Vec<&str> = block.lines().collect();
    let Some(timing_index) = lines.iter().position(|line| line.contains("-->")) else {
        return Ok(None);
    };

    let timing_line = lines[timing_index];
    let captures = TIMING_LINE
        .captures(timing_line)
        .ok_or_else(|| TtsSyncError::SubtitleParsing(format!("Malformed timing line: {}", timing_line.trim())))?;

    let start = parse_timestamp(&captures[1])?;
    let end = parse_timestamp(&captures[2])?;
    let text = clean_text(&lines[timing_index + 1..].join(" "));

    Ok(Some((start, end, text)))
}

/// Парсинг отметки времени `HH:MM:SS,mmm`, `HH:MM:SS.mmm` или `MM:SS.mmm`
pub fn parse_timestamp(value: &str) -> Result<Duration> {
    let invalid = || TtsSyncError::SubtitleParsing(format!("Invalid timestamp: {}", value));

    let value = value.trim();
    let (clock, fraction) = match value.find(|c| c == ',' || c == '.') {
        Some(pos) => (&value[..pos], &value[pos + 1..]),
        None => (value, ""),
    };

    let parts = clock
        .split(':')
        .map(|part| part.parse::<u64>().map_err(|_| invalid()))
        .collect::<Result<Vec<u64>>>()?;

    let (hours, minutes, seconds) = match parts.as_slice() {
        [h, m, s] => (*h, *m, *s),
        [m, s] => (0, *m, *s),
        _ => return Err(invalid()),
    };
    if minutes >= 60 || seconds >= 60 {
        return Err(invalid());
    }

    let millis = if fraction.is_empty() {
        0
    } else {
        let ms = fraction.parse::<u64>().map_err(|_| invalid())?;
        match fraction.len() {
            1 => ms * 100,
            2 => ms * 10,
            3 => ms,
            _ => return Err(invalid()),
        }
    };

    let total = hours
        .checked_mul(60)
        .and_then(|m| m.checked_add(minutes))
        .and_then(|m| m.checked_mul(60))
        .and_then(|s| s.checked_add(seconds))
        .and_then(|s| s.checked_mul(1000))
        .and_then(|ms| ms.checked_add(millis))
        .ok_or_else(invalid)?;

    Ok(Duration::from_millis(total))
}

/// Подготовка текста для TTS: убрать разметку, раскрыть сущности, нормализовать пробелы
pub fn clean_text(text: &str) -> String {
    let text = MARKUP_TAG.replace_all(text, "");

    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&");

    text.split_whitespace().collect::<Vec<&str>>().join(" ")
}
