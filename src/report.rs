//! Итоги запуска
//!
//! JSON-отчёт по всем сегментам (какие заменены тишиной, с каким
//! коэффициентом синтезированы, насколько разошлись с окном) и CSV
//! с данными для графика коэффициентов скорости.

use std::path::Path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::{Result, TtsSyncError};
use crate::media::track::AssembledTrack;
use crate::subtitle::parser::Segment;
use crate::tts::SynthesisResult;

/// Сведения о сегменте
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SegmentReport {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub target_duration: f64,
    pub default_duration: Option<f64>,
    pub speed_factor: Option<f32>,
    pub final_duration: f64,
    pub drift: f64,
    pub onset: f64,
    pub lateness: f64,
    pub silence_before: f64,
    pub used_fallback: bool,
    pub attempts: u32,
    pub refinements: u32,
    pub failure: Option<String>,
}

/// Отчёт о запуске
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncReport {
    pub generated_at: DateTime<Utc>,
    pub language: String,
    pub voice: String,
    pub provider: String,
    pub sample_rate: u32,
    pub min_speed_factor: Option<f32>,
    pub segment_count: usize,
    pub fallback_count: usize,
    /// Длительность дорожки, секунды
    pub total_duration: f64,
    /// Вставленная тишина, секунды
    pub total_silence: f64,
    /// Суммарное опоздание клипов, секунды
    pub total_lateness: f64,
    pub max_abs_drift: f64,
    pub segments: Vec<SegmentReport>,
}

/// Параметры запуска, попадающие в отчёт
#[derive(Debug, Clone)]
pub struct RunInfo<'a> {
    pub language: &'a str,
    pub voice: &'a str,
    pub provider: &'a str,
    pub min_speed_factor: Option<f32>,
}

impl SyncReport {
    /// Свести сегменты, результаты синтеза и размещение на дорожке
    pub fn build(segments: &[Segment], results: &[SynthesisResult], assembled: &AssembledTrack, run: RunInfo<'_>) -> Result<Self> {
        if segments.len() != results.len() || segments.len() != assembled.placements.len() {
            return Err(TtsSyncError::Other(format!(
                "report mismatch: {} segments, {} results, {} placements",
                segments.len(),
                results.len(),
                assembled.placements.len()
            )));
        }

        let entries: Vec<SegmentReport> = segments
            .iter()
            .zip(results)
            .zip(&assembled.placements)
            .map(|((segment, result), placement)| SegmentReport {
                index: segment.index,
                start: segment.start_secs(),
                end: segment.end_secs(),
                target_duration: result.target_duration,
                default_duration: result.default_duration,
                speed_factor: result.speed_factor,
                final_duration: placement.duration,
                drift: placement.duration - result.target_duration,
                onset: placement.onset,
                lateness: placement.lateness,
                silence_before: placement.silence_before,
                used_fallback: result.used_fallback,
                attempts: result.attempts,
                refinements: result.refinements,
                failure: result.failure.clone(),
            })
            .collect();

        Ok(Self {
            generated_at: Utc::now(),
            language: run.language.to_string(),
            voice: run.voice.to_string(),
            provider: run.provider.to_string(),
            sample_rate: assembled.track.sample_rate,
            min_speed_factor: run.min_speed_factor,
            segment_count: entries.len(),
            fallback_count: entries.iter().filter(|e| e.used_fallback).count(),
            total_duration: assembled.duration(),
            total_silence: assembled.total_silence,
            total_lateness: entries.iter().map(|e| e.lateness).sum(),
            max_abs_drift: entries.iter().map(|e| e.drift.abs()).fold(0.0, f64::max),
            segments: entries,
        })
    }

    /// Индексы сегментов, замененных тишиной
    pub fn fallback_indices(&self) -> Vec<usize> {
        self.segments.iter().filter(|s| s.used_fallback).map(|s| s.index).collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?)?;
        log::info!("Saved run report: {}", path.display());
        Ok(())
    }

    /// Записать CSV: индекс, естественная и целевая длительность, коэффициент, нижняя граница
    pub fn write_diagnostics<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut writer = csv::Writer::from_path(path).map_err(csv_error)?;
        writer
            .write_record(["index", "default_duration", "target_duration", "speed_factor", "min_speed_factor"])
            .map_err(csv_error)?;

        let floor = self.min_speed_factor.map(|f| format!("{:.2}", f)).unwrap_or_default();
        for segment in &self.segments {
            writer
                .write_record([
                    segment.index.to_string(),
                    segment.default_duration.map(|d| format!("{:.3}", d)).unwrap_or_default(),
                    format!("{:.3}", segment.target_duration),
                    segment.speed_factor.map(|f| format!("{:.2}", f)).unwrap_or_default(),
                    floor.clone(),
                ])
                .map_err(csv_error)?;
        }
        writer.flush()?;

        log::info!("Saved speed factor diagnostics: {}", path.display());
        Ok(())
    }
}

fn csv_error(e: csv::Error) -> TtsSyncError {
    TtsSyncError::Other(format!("CSV error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverlapPolicy;
    use crate::media::audio::AudioClip;
    use crate::media::track::assemble;
    use std::time::Duration;
    use tempfile::tempdir;

    const SR: u32 = 1_000;

    fn result(index: usize, target: f64, clip_secs: f64, factor: Option<f32>) -> SynthesisResult {
        SynthesisResult {
            index,
            audio: None,
            clip: AudioClip::new(vec![0.1; (clip_secs * SR as f64) as usize], SR),
            default_duration: factor.map(|f| target * f as f64),
            target_duration: target,
            speed_factor: factor,
            used_fallback: factor.is_none(),
            attempts: if factor.is_some() { 2 } else { 3 },
            refinements: 0,
            failure: factor.is_none().then(|| "probe synthesis failed".to_string()),
        }
    }

    fn fixture() -> SyncReport {
        let segments = vec![
            Segment::new(0, Duration::from_secs(1), Duration::from_secs(3), "first").unwrap(),
            Segment::new(1, Duration::from_secs(4), Duration::from_secs(5), "second").unwrap(),
        ];
        let results = vec![result(0, 2.0, 2.5, Some(1.5)), result(1, 1.0, 1.0, None)];
        let assembled = assemble(&segments, results.iter().map(|r| r.clip.clone()), SR, OverlapPolicy::Defer).unwrap();
        let run = RunInfo { language: "en", voice: "en-US-AriaNeural", provider: "azure", min_speed_factor: Some(0.9) };
        SyncReport::build(&segments, &results, &assembled, run).unwrap()
    }

    #[test]
    fn test_build_report() {
        let report = fixture();
        assert_eq!(report.segment_count, 2);
        assert_eq!(report.fallback_count, 1);
        assert_eq!(report.fallback_indices(), vec![1]);
        assert!((report.segments[0].drift - 0.5).abs() < 1e-9);
        assert!((report.total_duration - 5.0).abs() < 1e-9);
        assert!((report.total_silence - 1.5).abs() < 1e-9);
        assert!((report.max_abs_drift - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_json_roundtrip() {
        let report = fixture();
        let parsed: SyncReport = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn test_diagnostics_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("diagnostics.csv");
        fixture().write_diagnostics(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "index,default_duration,target_duration,speed_factor,min_speed_factor");
        assert_eq!(lines[1], "0,3.000,2.000,1.50,0.90");
        assert_eq!(lines[2], "1,,1.000,,0.90");
    }
}
