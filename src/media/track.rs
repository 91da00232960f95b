//! Сборка итоговой дорожки
//!
//! Клипы добавляются строго в порядке сегментов. Перед каждым клипом
//! вставляется тишина, чтобы его начало совпало с началом субтитра.
//! Если дорожка уже длиннее (предыдущий клип не уложился в окно),
//! клип ставится сразу, без тишины, и звучит с опозданием. Обрезки
//! и наложения нет.
//!
//! Вся арифметика ведётся в целых семплах, поэтому длина дорожки после
//! сегмента `i` без опоздания равна ровно `round(start_i * sr) + len(clip_i)`.

use serde::Serialize;
use crate::config::OverlapPolicy;
use crate::error::{Result, TtsSyncError};
use crate::media::audio::{samples_to_seconds, seconds_to_samples, AudioClip};
use crate::subtitle::parser::Segment;

/// Размещение одного клипа на дорожке
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Placement {
    /// Индекс сегмента
    pub index: usize,
    /// Вставленная перед клипом тишина, секунды
    pub silence_before: f64,
    /// Фактическое начало клипа на дорожке, секунды
    pub onset: f64,
    /// Длительность клипа, секунды
    pub duration: f64,
    /// Насколько клип начался позже начала субтитра, секунды
    pub lateness: f64,
}

/// Растущая дорожка с явно проверяемым порядком сегментов
#[derive(Debug)]
pub struct TrackAssembler {
    track: AudioClip,
    overlap_policy: OverlapPolicy,
    placements: Vec<Placement>,
    total_silence: usize,
    last_start: Option<usize>,
    last_end: Option<usize>,
}

impl TrackAssembler {
    /// Пустая дорожка заданной частоты
    pub fn new(sample_rate: u32, overlap_policy: OverlapPolicy) -> Self {
        Self {
            track: AudioClip::new(Vec::new(), sample_rate),
            overlap_policy,
            placements: Vec::new(),
            total_silence: 0,
            last_start: None,
            last_end: None,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.track.sample_rate
    }

    /// Текущая длина дорожки в секундах
    pub fn duration(&self) -> f64 {
        self.track.duration()
    }

    /// Текущая длина дорожки в семплах
    pub fn len_samples(&self) -> usize {
        self.track.samples.len()
    }

    /// Добавить клип сегмента. Сегменты должны идти по неубыванию времени начала
    pub fn push(&mut self, segment: &Segment, clip: AudioClip) -> Result<&Placement> {
        let sample_rate = self.track.sample_rate;
        let start = seconds_to_samples(segment.start_secs(), sample_rate);
        let end = seconds_to_samples(segment.end_secs(), sample_rate);

        if let Some(last_start) = self.last_start {
            if start < last_start {
                return Err(TtsSyncError::Assembly(format!(
                    "segment {} starts at {:.3}s, before the previous segment",
                    segment.index,
                    segment.start_secs()
                )));
            }
        }

        if let Some(last_end) = self.last_end {
            if start < last_end {
                match self.overlap_policy {
                    OverlapPolicy::Reject => {
                        return Err(TtsSyncError::Assembly(format!(
                            "segment {} starts at {:.3}s, inside the previous segment's window",
                            segment.index,
                            segment.start_secs()
                        )));
                    }
                    OverlapPolicy::Defer => {
                        log::warn!(
                            "Segment {} overlaps the previous one by {:.3}s",
                            segment.index,
                            samples_to_seconds(last_end - start, sample_rate)
                        );
                    }
                }
            }
        }

        let clip = if clip.sample_rate == sample_rate {
            clip
        } else {
            clip.resample(sample_rate)?
        };

        let current = self.track.samples.len();
        let (gap, lateness) = if start >= current {
            (start - current, 0)
        } else {
            (0, current - start)
        };

        if lateness > 0 {
            log::warn!(
                "Segment {} starts {:.3}s late: the track already runs past its start",
                segment.index,
                samples_to_seconds(lateness, sample_rate)
            );
        }

        self.track.samples.resize(current + gap, 0.0);
        let onset = self.track.samples.len();
        let clip_len = clip.samples.len();
        self.track.samples.extend_from_slice(&clip.samples);

        self.total_silence += gap;
        self.last_start = Some(start);
        self.last_end = Some(self.last_end.map_or(end, |last| last.max(end)));

        self.placements.push(Placement {
            index: segment.index,
            silence_before: samples_to_seconds(gap, sample_rate),
            onset: samples_to_seconds(onset, sample_rate),
            duration: samples_to_seconds(clip_len, sample_rate),
            lateness: samples_to_seconds(lateness, sample_rate),
        });

        Ok(&self.placements[self.placements.len() - 1])
    }

    /// Завершить сборку
    pub fn finish(self) -> AssembledTrack {
        let silence = samples_to_seconds(self.total_silence, self.track.sample_rate);
        AssembledTrack {
            track: self.track,
            placements: self.placements,
            total_silence: silence,
        }
    }
}

/// Готовая дорожка и сведения о размещении клипов
#[derive(Debug, Clone)]
pub struct AssembledTrack {
    pub track: AudioClip,
    pub placements: Vec<Placement>,
    /// Суммарная вставленная тишина, секунды
    pub total_silence: f64,
}

impl AssembledTrack {
    /// Длительность дорожки в секундах
    pub fn duration(&self) -> f64 {
        self.track.duration()
    }
}

/// Проверить порядок сегментов до синтеза.
///
/// Те же правила, что и в [`TrackAssembler::push`]: начало не раньше
/// предыдущего начала, наложение окон допустимо только при `OverlapPolicy::Defer`.
pub fn validate_order(segments: &[Segment], sample_rate: u32, overlap_policy: OverlapPolicy) -> Result<()> {
    let mut last_start: Option<usize> = None;
    let mut last_end: Option<usize> = None;

    for segment in segments {
        let start = seconds_to_samples(segment.start_secs(), sample_rate);
        let end = seconds_to_samples(segment.end_secs(), sample_rate);

        if last_start.is_some_and(|last| start < last) {
            return Err(TtsSyncError::Assembly(format!(
                "segment {} starts at {:.3}s, before the previous segment",
                segment.index,
                segment.start_secs()
            )));
        }
        if overlap_policy == OverlapPolicy::Reject && last_end.is_some_and(|last| start < last) {
            return Err(TtsSyncError::Assembly(format!(
                "segment {} starts at {:.3}s, inside the previous segment's window",
                segment.index,
                segment.start_secs()
            )));
        }

        last_start = Some(start);
        last_end = Some(last_end.map_or(end, |last| last.max(end)));
    }
    Ok(())
}

/// Собрать дорожку из сегментов и клипов одной длины
pub fn assemble<I>(segments: &[Segment], clips: I, sample_rate: u32, overlap_policy: OverlapPolicy) -> Result<AssembledTrack>
where
    I: IntoIterator<Item = AudioClip>,
{
    let clips: Vec<AudioClip> = clips.into_iter().collect();
    if clips.len() != segments.len() {
        return Err(TtsSyncError::Assembly(format!(
            "{} segments but {} clips",
            segments.len(),
            clips.len()
        )));
    }

    let mut assembler = TrackAssembler::new(sample_rate, overlap_policy);
    for (segment, clip) in segments.iter().zip(clips) {
        assembler.push(segment, clip)?;
    }

    let assembled = assembler.finish();
    log::info!(
        "Assembled track: {:.3}s ({} clips, {:.3}s of inserted silence)",
        assembled.duration(),
        assembled.placements.len(),
        assembled.total_silence
    );
    Ok(assembled)
}
