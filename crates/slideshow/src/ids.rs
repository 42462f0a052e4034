use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
#[snafu(display("platform id '{raw}' is invalid for {id_type}"))]
pub struct ParseIdError {
    stage: &'static str,
    id_type: &'static str,
    raw: String,
    source: ParseIntError,
}

// Chat platforms hand out plain integers; wrapping them keeps user, chat and message ids
// from being swapped at call sites.
macro_rules! define_platform_id {
    ($name:ident, $raw:ty, $id_type:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub $raw);

        impl $name {
            pub fn new(raw: $raw) -> Self {
                Self(raw)
            }

            pub fn parse(raw: &str) -> Result<Self, ParseIdError> {
                let parsed = raw.trim().parse::<$raw>().context(ParseIdSnafu {
                    stage: "parse-platform-id",
                    id_type: $id_type,
                    raw: raw.to_string(),
                })?;
                Ok(Self(parsed))
            }

            pub fn get(&self) -> $raw {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }

        impl From<$raw> for $name {
            fn from(value: $raw) -> Self {
                Self::new(value)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(raw: &str) -> Result<Self, ParseIdError> {
                Self::parse(raw)
            }
        }
    };
}

define_platform_id!(UserId, u64, "user-id");
define_platform_id!(ChatId, i64, "chat-id");
define_platform_id!(MessageId, i64, "message-id");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_padded_numeric_ids() {
        assert_eq!(UserId::parse(" 42 ").map(|id| id.get()).ok(), Some(42));
        assert_eq!("-100".parse::<ChatId>().map(|id| id.get()).ok(), Some(-100));
    }

    #[test]
    fn rejects_non_numeric_ids_with_type_in_message() {
        let error = MessageId::parse("abc").err().map(|error| error.to_string());
        assert_eq!(
            error.as_deref(),
            Some("platform id 'abc' is invalid for message-id")
        );
    }
}
