//! Модуль для работы с медиа
//!
//! Декодирование и запись аудио, сборка итоговой дорожки.

pub mod audio;
pub mod track;

pub use audio::AudioClip;
pub use track::{assemble, validate_order, AssembledTrack, Placement, TrackAssembler};
