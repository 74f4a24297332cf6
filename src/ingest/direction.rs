//! Message direction inference

use serde::{Deserialize, Serialize};

/// Whether the customer or the business side sent a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    /// Resolve direction from the provider's flags
    ///
    /// The provider sets `from_me` for anything authored by the connected
    /// line, whether the CRM sent it through the API (`was_sent_by_api`), the
    /// user typed it on the phone (`device_sent`), or another linked device
    /// echoed it. All of those are the business side. `from_me == false` is
    /// decided first and never consults the other flags.
    #[must_use]
    pub const fn resolve(from_me: bool, was_sent_by_api: bool, device_sent: bool) -> Self {
        if !from_me {
            return Self::Inbound;
        }
        match (was_sent_by_api, device_sent) {
            // CRM send, phone send, and any other self-authored event
            (true, false) | (_, true) | (false, false) => Self::Outbound,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }

    /// Delivery status recorded for a newly seen message
    #[must_use]
    pub const fn initial_status(self) -> &'static str {
        match self {
            Self::Inbound => "received",
            Self::Outbound => "sent",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_flag_combinations() {
        let cases = [
            // (from_me, was_sent_by_api, device_sent) -> expected
            ((false, false, false), Direction::Inbound),
            ((false, false, true), Direction::Inbound),
            ((false, true, false), Direction::Inbound),
            ((false, true, true), Direction::Inbound),
            ((true, false, false), Direction::Outbound),
            ((true, false, true), Direction::Outbound),
            ((true, true, false), Direction::Outbound),
            ((true, true, true), Direction::Outbound),
        ];

        for ((from_me, api, device), expected) in cases {
            assert_eq!(
                Direction::resolve(from_me, api, device),
                expected,
                "fromMe={from_me} wasSentByApi={api} deviceSent={device}"
            );
        }
    }

    #[test]
    fn parse_roundtrips_names() {
        for direction in [Direction::Inbound, Direction::Outbound] {
            assert_eq!(Direction::parse(direction.as_str()), Some(direction));
        }
        assert_eq!(Direction::parse("sideways"), None);
    }

    #[test]
    fn initial_status() {
        assert_eq!(Direction::Inbound.initial_status(), "received");
        assert_eq!(Direction::Outbound.initial_status(), "sent");
    }
}
