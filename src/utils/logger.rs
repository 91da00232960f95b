use env_logger::{Builder, Env};
use log::LevelFilter;
use std::io::Write;

/// Фильтр по умолчанию, если `RUST_LOG` не задан
const DEFAULT_FILTER: &str = "warn,srt_tts_sync=info";

/// Уровень для модулей крейта при заданной подробности (`-v`, `-vv`)
pub fn level_for_verbosity(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Инициализировать env_logger. `RUST_LOG` имеет приоритет над `verbosity`.
///
/// Повторный вызов ничего не делает.
pub fn init_logger(verbosity: u8) {
    let env_configured = std::env::var_os("RUST_LOG").is_some();
    let mut builder = Builder::from_env(Env::default().filter_or("RUST_LOG", DEFAULT_FILTER));

    if !env_configured {
        builder
            .filter_module("srt_tts_sync", level_for_verbosity(verbosity))
            .filter_module("hyper", LevelFilter::Warn)
            .filter_module("reqwest", LevelFilter::Warn)
            .filter_module("rustls", LevelFilter::Warn)
            .filter_module("symphonia", LevelFilter::Warn);
    }

    builder
        .format(|buf, record| writeln!(buf, "[{}] {}: {}", record.level(), record.target(), record.args()))
        .target(env_logger::Target::Stderr);

    if let Err(e) = builder.try_init() {
        log::debug!("Logger already initialised: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(level_for_verbosity(0), LevelFilter::Info);
        assert_eq!(level_for_verbosity(1), LevelFilter::Debug);
        assert_eq!(level_for_verbosity(5), LevelFilter::Trace);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logger(0);
        init_logger(2);
    }
}
