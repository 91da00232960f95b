//! Наблюдатели прогресса
//!
//! Конкретные реализации [`ProgressObserver`]: прогресс-бар в терминале,
//! журнал `log` и история в памяти.

use std::io::Write;
use std::sync::Arc;
use parking_lot::Mutex;
use crate::progress::{ProgressInfo, ProgressObserver};

fn format_progress(progress: &ProgressInfo) -> String {
    let mut line = format!(
        "{}: {:.1}% (всего {:.1}%)",
        progress.step, progress.step_progress, progress.total_progress
    );
    if let Some(details) = progress.details.as_deref().filter(|d| !d.is_empty()) {
        line.push_str(" - ");
        line.push_str(details);
    }
    line
}

/// Прогресс-бар в одну строку stderr
pub struct ProgressBarObserver {
    width: usize,
    last_progress: Mutex<f32>,
}

impl ProgressBarObserver {
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(10),
            // отрицательное значение гарантирует первую отрисовку
            last_progress: Mutex::new(-1.0),
        }
    }

    fn render(&self, progress: &ProgressInfo) -> String {
        let filled = ((progress.total_progress / 100.0) * self.width as f32).round() as usize;
        let filled = filled.min(self.width);
        format!(
            "[{}{}] {:5.1}% {}",
            "#".repeat(filled),
            "-".repeat(self.width - filled),
            progress.total_progress,
            progress.details.as_deref().unwrap_or(&progress.step)
        )
    }
}

impl Default for ProgressBarObserver {
    fn default() -> Self {
        Self::new(40)
    }
}

impl ProgressObserver for ProgressBarObserver {
    fn on_progress_update(&self, progress: ProgressInfo) {
        let mut last = self.last_progress.lock();
        if (progress.total_progress - *last).abs() < 0.1 && progress.total_progress < 100.0 {
            return;
        }
        *last = progress.total_progress;

        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\r{:<100}", self.render(&progress));
        if progress.total_progress >= 100.0 {
            let _ = writeln!(stderr);
        }
        let _ = stderr.flush();
    }
}

/// Прогресс в журнал `log` на уровне info
#[derive(Debug, Default)]
pub struct LogProgressObserver;

impl ProgressObserver for LogProgressObserver {
    fn on_progress_update(&self, progress: ProgressInfo) {
        log::info!("Progress: {}", format_progress(&progress));
    }
}

/// Хранит историю обновлений в памяти
#[derive(Debug, Default, Clone)]
pub struct MemoryProgressObserver {
    history: Arc<Mutex<Vec<ProgressInfo>>>,
}

impl MemoryProgressObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Копия истории обновлений
    pub fn history(&self) -> Vec<ProgressInfo> {
        self.history.lock().clone()
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }
}

impl ProgressObserver for MemoryProgressObserver {
    fn on_progress_update(&self, progress: ProgressInfo) {
        self.history.lock().push(progress);
    }
}
