//! Модуль для работы с аудио
//!
//! Декодирование ответов провайдера в PCM (hound для WAV, symphonia для остальных
//! форматов), приведение частоты дискретизации (rubato) и запись WAV.
//! Всё аудио внутри библиотеки - моно, f32 в диапазоне [-1.0, 1.0].

use std::io::Cursor;
use std::path::Path;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::probe::Hint;
use crate::error::{Result, TtsSyncError};

/// Размер блока для ресемплера
const RESAMPLE_CHUNK: usize = 1024;

/// Моно аудиофрагмент
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    /// Семплы PCM
    pub samples: Vec<f32>,
    /// Частота дискретизации в Гц
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// Тишина заданной длительности
    pub fn silence(duration_secs: f64, sample_rate: u32) -> Self {
        Self {
            samples: vec![0.0; seconds_to_samples(duration_secs, sample_rate)],
            sample_rate,
        }
    }

    /// Длительность в секундах
    pub fn duration(&self) -> f64 {
        samples_to_seconds(self.samples.len(), self.sample_rate)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Все семплы нулевые
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|s| *s == 0.0)
    }

    /// Декодировать ответ провайдера. WAV читается через hound, прочие форматы через symphonia
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(TtsSyncError::AudioProcessing("Empty audio payload".to_string()));
        }

        let clip = if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
            match decode_wav(bytes) {
                Ok(clip) => clip,
                Err(e) => match fix_streamed_header(bytes) {
                    Some(fixed) => {
                        log::debug!("WAV header has placeholder sizes ({}), decoding with recomputed sizes", e);
                        decode_wav(&fixed).or_else(|_| decode_compressed(bytes))?
                    }
                    None => decode_compressed(bytes).map_err(|_| e)?,
                },
            }
        } else {
            decode_compressed(bytes)?
        };

        if clip.is_empty() {
            return Err(TtsSyncError::AudioProcessing("Decoded audio contains no samples".to_string()));
        }
        Ok(clip)
    }

    /// Привести к нужной частоте дискретизации
    pub fn resample(self, target_rate: u32) -> Result<Self> {
        if self.sample_rate == target_rate || self.samples.is_empty() {
            return Ok(Self { sample_rate: target_rate, ..self });
        }

        log::debug!("Resampling {} samples from {} Hz to {} Hz", self.samples.len(), self.sample_rate, target_rate);
        let samples = resample_mono(&self.samples, self.sample_rate, target_rate)?;
        Ok(Self::new(samples, target_rate))
    }

    /// Закодировать в WAV (16 бит) в памяти
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, pcm16_spec(self.sample_rate))?;
            write_pcm16(&mut writer, &self.samples)?;
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }

    /// Записать WAV-файл. Файл сначала пишется во временный рядом с целевым, затем переименовывается
    pub fn write_wav<P: AsRef<Path>>(&self, output_path: P) -> Result<()> {
        let output_path = output_path.as_ref();
        let dir = match output_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let temp = tempfile::Builder::new().prefix(".srt-tts-sync").suffix(".wav").tempfile_in(dir)?;
        {
            let mut writer = WavWriter::new(std::io::BufWriter::new(temp.as_file()), pcm16_spec(self.sample_rate))?;
            write_pcm16(&mut writer, &self.samples)?;
            writer.finalize()?;
        }
        temp.persist(output_path).map_err(|e| TtsSyncError::Io(e.error))?;

        log::info!(
            "Saved WAV file: {} ({} samples, {} Hz, {:.3}s)",
            output_path.display(),
            self.samples.len(),
            self.sample_rate,
            self.duration()
        );
        Ok(())
    }
}

/// Перевести секунды в целое число семплов (с округлением)
pub fn seconds_to_samples(seconds: f64, sample_rate: u32) -> usize {
    if seconds <= 0.0 {
        return 0;
    }
    (seconds * sample_rate as f64).round() as usize
}

/// Перевести число семплов в секунды
pub fn samples_to_seconds(samples: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    samples as f64 / sample_rate as f64
}

fn pcm16_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

fn write_pcm16<W: std::io::Write + std::io::Seek>(writer: &mut WavWriter<W>, samples: &[f32]) -> Result<()> {
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        writer.write_sample(value)?;
    }
    Ok(())
}

/// Декодирование WAV через hound с поддержкой 8/16/24/32 бит и float
fn decode_wav(bytes: &[u8]) -> Result<AudioClip> {
    let mut reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let pcm: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .map(|s| s.map(|v| v as f32 / 128.0))
            .collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 8_388_608.0))
            .collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 2_147_483_648.0))
            .collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        (format, bits) => {
            return Err(TtsSyncError::AudioProcessing(format!(
                "Unsupported WAV format: {:?}, {} bits",
                format, bits
            )));
        }
    };

    Ok(AudioClip::new(downmix(pcm, spec.channels as usize), spec.sample_rate))
}

/// Пересчитать размеры RIFF и `data` по фактической длине буфера.
///
/// Потоковые WAV пишутся до того, как известна длина, и вместо размеров
/// содержат заглушки (`0xFFFFFFFF` или 0). Возвращает None, если чанк `data` не найден.
fn fix_streamed_header(bytes: &[u8]) -> Option<Vec<u8>> {
    let read_u32 = |pos: usize| -> Option<u32> {
        let raw = bytes.get(pos..pos + 4)?;
        Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    };

    let mut block_align = 1usize;
    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = read_u32(pos + 4)? as usize;
        let body = pos + 8;

        if id == b"fmt " {
            let raw = bytes.get(body + 12..body + 14)?;
            block_align = (u16::from_le_bytes([raw[0], raw[1]]) as usize).max(1);
        } else if id == b"data" {
            let available = bytes.len() - body;
            let data_len = available - available % block_align;

            let mut fixed = bytes[..body + data_len].to_vec();
            fixed[pos + 4..pos + 8].copy_from_slice(&(data_len as u32).to_le_bytes());
            let riff_len = (fixed.len() - 8) as u32;
            fixed[4..8].copy_from_slice(&riff_len.to_le_bytes());
            return Some(fixed);
        }

        // чанки выровнены по двум байтам
        pos = body.checked_add(size)?.checked_add(size % 2)?;
    }
    None
}

/// Декодирование сжатых форматов (MP3, AAC и т.д.) через symphonia
fn decode_compressed(bytes: &[u8]) -> Result<AudioClip> {
    let cursor = Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let format_opts = FormatOptions {
        enable_gapless: true,
        ..Default::default()
    };

    let probed = symphonia::default::get_probe()
        .format(&Hint::new(), mss, &format_opts, &Default::default())
        .map_err(|e| TtsSyncError::AudioProcessing(format!("Unrecognised audio format: {}", e)))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| TtsSyncError::AudioProcessing("No audio track found".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions { verify: false })
        .map_err(|e| TtsSyncError::AudioProcessing(format!("Failed to create decoder: {}", e)))?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut pcm = Vec::new();

    while let Ok(packet) = format.next_packet() {
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;

                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                pcm.extend(downmix(buffer.samples().to_vec(), spec.channels.count()));
            }
            Err(e) => {
                log::warn!("Skipping undecodable packet: {}", e);
                continue;
            }
        }
    }

    if sample_rate == 0 {
        return Err(TtsSyncError::AudioProcessing("Unknown sample rate".to_string()));
    }

    Ok(AudioClip::new(pcm, sample_rate))
}

/// Свести перемежающиеся каналы в моно
fn downmix(interleaved: Vec<f32>, channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved;
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Ресемплинг моно сигнала с sinc-интерполяцией
fn resample_mono(input: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    let ratio = to_rate as f64 / from_rate as f64;
    let expected = (input.len() as f64 * ratio).round() as usize;

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| TtsSyncError::AudioProcessing(format!("Failed to initialise resampler: {}", e)))?;
    let delay = resampler.output_delay();

    let mut output = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);
    let mut position = 0;

    while input.len() - position >= resampler.input_frames_next() {
        let needed = resampler.input_frames_next();
        let chunk = [&input[position..position + needed]];
        let frames = resampler
            .process(&chunk[..], None)
            .map_err(|e| TtsSyncError::AudioProcessing(format!("Resampling failed: {}", e)))?;
        output.extend_from_slice(&frames[0]);
        position += needed;
    }

    if position < input.len() {
        let chunk = [&input[position..]];
        let frames = resampler
            .process_partial(Some(&chunk[..]), None)
            .map_err(|e| TtsSyncError::AudioProcessing(format!("Resampling failed: {}", e)))?;
        output.extend_from_slice(&frames[0]);
    }

    // Досливаем хвост, задержанный фильтром
    while output.len() < expected + delay {
        let frames = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(|e| TtsSyncError::AudioProcessing(format!("Resampling failed: {}", e)))?;
        if frames[0].is_empty() {
            break;
        }
        output.extend_from_slice(&frames[0]);
    }

    output.drain(..delay.min(output.len()));
    output.resize(expected, 0.0);
    Ok(output)
}
