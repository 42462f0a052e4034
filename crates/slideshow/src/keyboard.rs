use std::fmt;
use std::str::FromStr;

use super::cursor::Direction;
use super::types::ItemLink;

pub const PREV_LABEL: &str = "⏮";
pub const NEXT_LABEL: &str = "⏭";
pub const PLAY_LABEL: &str = "▶️";
pub const STOP_LABEL: &str = "⏹";

/// The four rotation controls a user can tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlAction {
    Prev,
    Next,
    Play,
    Stop,
}

impl ControlAction {
    pub fn callback_data(&self) -> &'static str {
        match self {
            Self::Prev => "banner_prev",
            Self::Next => "banner_next",
            Self::Play => "banner_play",
            Self::Stop => "banner_stop",
        }
    }

    pub fn from_callback_data(raw: &str) -> Option<Self> {
        match raw {
            "banner_prev" => Some(Self::Prev),
            "banner_next" => Some(Self::Next),
            "banner_play" => Some(Self::Play),
            "banner_stop" => Some(Self::Stop),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Prev => "prev",
            Self::Next => "next",
            Self::Play => "play",
            Self::Stop => "stop",
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            Self::Prev => Some(Direction::Backward),
            Self::Next => Some(Direction::Forward),
            Self::Play | Self::Stop => None,
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

impl FromStr for ControlAction {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "prev" => Ok(Self::Prev),
            "next" => Ok(Self::Next),
            "play" => Ok(Self::Play),
            "stop" => Ok(Self::Stop),
            other => Self::from_callback_data(other).ok_or_else(|| other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonTarget {
    Callback(String),
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyboardButton {
    pub label: String,
    pub target: ButtonTarget,
}

impl KeyboardButton {
    pub fn callback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            target: ButtonTarget::Callback(data.into()),
        }
    }

    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            target: ButtonTarget::Url(url.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Keyboard {
    pub rows: Vec<Vec<KeyboardButton>>,
}

impl Keyboard {
    /// `⏮ | ▶️ | ⏭` while idle, `⏮ | ⏹ | ⏭` while a rotation runs.
    pub fn controls(playing: bool) -> Self {
        let toggle = if playing {
            KeyboardButton::callback(STOP_LABEL, ControlAction::Stop.callback_data())
        } else {
            KeyboardButton::callback(PLAY_LABEL, ControlAction::Play.callback_data())
        };

        Self {
            rows: vec![vec![
                KeyboardButton::callback(PREV_LABEL, ControlAction::Prev.callback_data()),
                toggle,
                KeyboardButton::callback(NEXT_LABEL, ControlAction::Next.callback_data()),
            ]],
        }
    }

    pub fn with_links(mut self, links: &[ItemLink]) -> Self {
        self.rows.extend(
            links
                .iter()
                .map(|link| vec![KeyboardButton::url(&link.label, &link.url)]),
        );
        self
    }

    pub fn shows_stop(&self) -> bool {
        self.rows.iter().flatten().any(|button| {
            button.target == ButtonTarget::Callback(ControlAction::Stop.callback_data().to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_follows_playing_flag() {
        assert!(Keyboard::controls(true).shows_stop());
        assert!(!Keyboard::controls(false).shows_stop());
        assert_eq!(Keyboard::controls(false).rows[0][1].label, PLAY_LABEL);
    }

    #[test]
    fn links_become_url_rows_below_controls() {
        let links = vec![ItemLink {
            label: "Play Market".to_string(),
            url: "https://play.example/fc".to_string(),
        }];
        let keyboard = Keyboard::controls(false).with_links(&links);

        assert_eq!(keyboard.rows.len(), 2);
        assert_eq!(
            keyboard.rows[1][0].target,
            ButtonTarget::Url("https://play.example/fc".to_string())
        );
    }

    #[test]
    fn parses_words_and_callback_data() {
        assert_eq!("Next".parse::<ControlAction>(), Ok(ControlAction::Next));
        assert_eq!("banner_stop".parse::<ControlAction>(), Ok(ControlAction::Stop));
        assert!("cabinet".parse::<ControlAction>().is_err());
    }
}
