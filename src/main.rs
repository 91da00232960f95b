use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use srt_tts_sync::config::{Backoff, OverlapPolicy, ProviderKind, SyncConfig, VoiceConfig};
use srt_tts_sync::error::TtsSyncError;
use srt_tts_sync::notification::{LogProgressObserver, ProgressBarObserver};
use srt_tts_sync::progress::{DefaultProgressReporter, ProgressReporter};
use srt_tts_sync::tts::{AzureTts, OpenAiTts, TtsProvider};
use srt_tts_sync::utils::init_logger;
use srt_tts_sync::TtsSync;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProviderArg {
    Azure,
    Openai,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackoffArg {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OverlapArg {
    Defer,
    Reject,
}

/// Озвучить субтитры и собрать дорожку, выровненную по их таймингам
#[derive(Debug, Parser)]
#[command(name = "srt-tts-sync", version, about)]
struct Cli {
    /// Файл субтитров (SRT или WebVTT)
    input: PathBuf,

    /// Куда записать WAV
    #[arg(short = 'o', long)]
    output: PathBuf,

    /// JSON с голосами по языкам
    #[arg(long)]
    voice_config: Option<PathBuf>,

    /// JSON с параметрами конвейера (флаги ниже имеют приоритет)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ProviderArg::Azure)]
    provider: ProviderArg,

    #[arg(long, env = "AZURE_SPEECH_KEY", hide_env_values = true)]
    azure_key: Option<String>,

    #[arg(long, env = "AZURE_SPEECH_REGION")]
    azure_region: Option<String>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_key: Option<String>,

    #[arg(long, default_value = "tts-1")]
    openai_model: String,

    /// Голос для всех сегментов, без определения языка
    #[arg(long)]
    voice: Option<String>,

    /// Нижняя граница коэффициента скорости
    #[arg(long)]
    min_speed_factor: Option<f32>,

    /// Одновременных запросов к провайдеру
    #[arg(long)]
    concurrency: Option<usize>,

    /// Попыток на каждый вызов синтеза
    #[arg(long)]
    retries: Option<u32>,

    #[arg(long)]
    retry_delay_ms: Option<u64>,

    #[arg(long, value_enum)]
    backoff: Option<BackoffArg>,

    /// Таймаут на сегмент, секунды
    #[arg(long)]
    segment_timeout: Option<u64>,

    #[arg(long)]
    sample_rate: Option<u32>,

    #[arg(long, value_enum)]
    overlap: Option<OverlapArg>,

    /// Корректирующих проходов при отклонении длительности
    #[arg(long)]
    refine: Option<u32>,

    /// JSON-отчёт о запуске
    #[arg(long)]
    report: Option<PathBuf>,

    /// CSV с коэффициентами скорости по сегментам
    #[arg(long)]
    diagnostics: Option<PathBuf>,

    /// Показывать прогресс-бар
    #[arg(long)]
    progress: bool,

    /// Подробность логов (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn provider_kind(&self) -> ProviderKind {
        match self.provider {
            ProviderArg::Azure => ProviderKind::Azure,
            ProviderArg::Openai => ProviderKind::OpenAi,
        }
    }

    fn sync_config(&self) -> Result<SyncConfig> {
        let mut config = match &self.config {
            Some(path) => SyncConfig::load(path).with_context(|| format!("Failed to load {}", path.display()))?,
            None => SyncConfig::default(),
        };

        if self.min_speed_factor.is_some() {
            config.min_speed_factor = self.min_speed_factor;
        }
        if let Some(concurrency) = self.concurrency {
            config.max_concurrent_requests = concurrency;
        }
        if let Some(retries) = self.retries {
            config.retry.max_attempts = retries;
        }
        if let Some(delay) = self.retry_delay_ms {
            config.retry.delay_ms = delay;
        }
        if let Some(backoff) = self.backoff {
            config.retry.backoff = match backoff {
                BackoffArg::Fixed => Backoff::Fixed,
                BackoffArg::Exponential => Backoff::Exponential,
            };
        }
        if let Some(timeout) = self.segment_timeout {
            config.segment_timeout_secs = Some(timeout);
        }
        if let Some(sample_rate) = self.sample_rate {
            config.sample_rate = sample_rate;
        }
        if let Some(overlap) = self.overlap {
            config.overlap_policy = match overlap {
                OverlapArg::Defer => OverlapPolicy::Defer,
                OverlapArg::Reject => OverlapPolicy::Reject,
            };
        }
        if let Some(refine) = self.refine {
            config.max_refinements = refine;
        }

        config.validate()?;
        Ok(config)
    }

    fn build_provider(&self) -> Result<Arc<dyn TtsProvider>> {
        let provider: Arc<dyn TtsProvider> = match self.provider_kind() {
            ProviderKind::Azure => {
                let (Some(key), Some(region)) = (&self.azure_key, &self.azure_region) else {
                    bail!("Azure provider needs --azure-key and --azure-region (or AZURE_SPEECH_KEY / AZURE_SPEECH_REGION)");
                };
                Arc::new(AzureTts::new(key.as_str(), region)?)
            }
            ProviderKind::OpenAi => {
                let Some(key) = &self.openai_key else {
                    bail!("OpenAI provider needs --openai-key (or OPENAI_API_KEY)");
                };
                Arc::new(OpenAiTts::with_model(key.as_str(), self.openai_model.as_str())?)
            }
        };
        Ok(provider)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let config = cli.sync_config()?;
    let provider = cli.build_provider()?;
    let voices = match &cli.voice_config {
        Some(path) => VoiceConfig::load(path).with_context(|| format!("Failed to load voice config {}", path.display()))?,
        None => VoiceConfig::default(),
    };

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling the run");
            ctrl_c_token.cancel();
        }
    });

    let mut reporter = DefaultProgressReporter::new();
    if cli.progress {
        reporter.add_observer(Box::new(ProgressBarObserver::default()));
    } else {
        reporter.add_observer(Box::new(LogProgressObserver));
    }

    let mut sync = TtsSync::new(provider, config)?
        .with_voice_config(voices)
        .with_cancellation(cancel)
        .with_progress_reporter(Box::new(reporter));
    if let Some(voice) = &cli.voice {
        sync = sync.with_voice(voice.as_str());
    }

    let report = match sync.process(&cli.input, &cli.output).await {
        Ok(report) => report,
        Err(TtsSyncError::Cancelled) => bail!("Run cancelled, no output written"),
        Err(e) => {
            log::error!("Synchronization failed: {}", e);
            return Err(e).context(format!("Failed to synchronize {}", cli.input.display()));
        }
    };

    if let Some(path) = &cli.report {
        report.write_json(path).with_context(|| format!("Failed to write report {}", path.display()))?;
    }
    if let Some(path) = &cli.diagnostics {
        report
            .write_diagnostics(path)
            .with_context(|| format!("Failed to write diagnostics {}", path.display()))?;
    }

    eprintln!(
        "Wrote {} ({:.2}s, {} segments, {} replaced with silence)",
        cli.output.display(),
        report.total_duration,
        report.segment_count,
        report.fallback_count
    );
    Ok(())
}
