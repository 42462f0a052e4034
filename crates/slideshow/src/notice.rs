use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Started,
    StoppedManual,
    StoppedByTimer,
    ContentUnavailable,
    RenderFailed,
}

impl NoticeKind {
    pub const ALL: [NoticeKind; 5] = [
        NoticeKind::Started,
        NoticeKind::StoppedManual,
        NoticeKind::StoppedByTimer,
        NoticeKind::ContentUnavailable,
        NoticeKind::RenderFailed,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::StoppedManual => "stopped_manual",
            Self::StoppedByTimer => "stopped_by_timer",
            Self::ContentUnavailable => "content_unavailable",
            Self::RenderFailed => "render_failed",
        }
    }

    pub fn from_key(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL.into_iter().find(|kind| kind.key() == raw)
    }
}

/// How a finished rotation is described to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopKind {
    Manual,
    ByTimer,
}

impl StopKind {
    /// A stop counts as timer-driven once the user has been silent for longer than
    /// `threshold`, whichever code path asked for the stop.
    pub fn classify(since_last_interaction: Duration, threshold: Duration) -> Self {
        if since_last_interaction > threshold {
            Self::ByTimer
        } else {
            Self::Manual
        }
    }

    pub fn notice(&self) -> NoticeKind {
        match self {
            Self::Manual => NoticeKind::StoppedManual,
            Self::ByTimer => NoticeKind::StoppedByTimer,
        }
    }
}

/// Slideshow microcopy per language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phrasebook {
    default_language: String,
    texts: HashMap<String, HashMap<NoticeKind, String>>,
}

impl Phrasebook {
    pub fn empty(default_language: impl Into<String>) -> Self {
        Self {
            default_language: default_language.into(),
            texts: HashMap::new(),
        }
    }

    pub fn builtin(default_language: impl Into<String>) -> Self {
        let mut book = Self::empty(default_language);
        for (kind, text) in [
            (NoticeKind::Started, "▶️ Автопрокрутка запущена"),
            (NoticeKind::StoppedManual, "⏹️ Автопрокрутка остановлена"),
            (
                NoticeKind::StoppedByTimer,
                "⏹️ Автопрокрутка остановлена по таймеру",
            ),
            (NoticeKind::ContentUnavailable, "Ошибка загрузки баннеров."),
            (
                NoticeKind::RenderFailed,
                "Произошла ошибка управления баннером.",
            ),
        ] {
            book.set("ru", kind, text);
        }
        for (kind, text) in [
            (NoticeKind::Started, "▶️ Slideshow started"),
            (NoticeKind::StoppedManual, "⏹️ Slideshow stopped"),
            (NoticeKind::StoppedByTimer, "⏹️ Slideshow stopped by timer"),
            (NoticeKind::ContentUnavailable, "Banners are unavailable."),
            (NoticeKind::RenderFailed, "Could not update the banner."),
        ] {
            book.set("en", kind, text);
        }
        book
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    pub fn set(&mut self, language: &str, kind: NoticeKind, text: impl Into<String>) {
        self.texts
            .entry(language.trim().to_string())
            .or_default()
            .insert(kind, text.into());
    }

    /// Falls back to the default language, then to an empty string (a silent ack).
    pub fn text(&self, language: &str, kind: NoticeKind) -> &str {
        self.texts
            .get(language)
            .and_then(|row| row.get(&kind))
            .or_else(|| {
                self.texts
                    .get(&self.default_language)
                    .and_then(|row| row.get(&kind))
            })
            .map(String::as_str)
            .unwrap_or("")
    }
}

impl Default for Phrasebook {
    fn default() -> Self {
        Self::builtin("ru")
    }
}
