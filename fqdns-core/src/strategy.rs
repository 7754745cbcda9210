use std::fmt;
use std::str::FromStr;

/// The policy governing how multiple UDP responses to the same query are
/// combined into one answer.
///
/// Closed by construction: there is no `InvalidStrategy` variant, because
/// a `Strategy` can never hold anything but one of these five values. The
/// original implementation parsed this from a free-form string at every
/// call site and had to fail at runtime if it didn't match; here `clap`
/// (or any other `FromStr` caller) rejects an unrecognized value before a
/// `Strategy` ever exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Strategy {
    #[value(name = "pick-first")]
    PickFirst,
    #[value(name = "pick-later")]
    PickLater,
    #[value(name = "pick-right")]
    PickRight,
    #[value(name = "pick-right-later")]
    PickRightLater,
    #[value(name = "pick-all")]
    PickAll,
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pick-first" => Ok(Self::PickFirst),
            "pick-later" => Ok(Self::PickLater),
            "pick-right" => Ok(Self::PickRight),
            "pick-right-later" => Ok(Self::PickRightLater),
            "pick-all" => Ok(Self::PickAll),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PickFirst => "pick-first",
            Self::PickLater => "pick-later",
            Self::PickRight => "pick-right",
            Self::PickRightLater => "pick-right-later",
            Self::PickAll => "pick-all",
        };
        f.write_str(s)
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Self::PickRight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_from_str() {
        for strategy in [
            Strategy::PickFirst,
            Strategy::PickLater,
            Strategy::PickRight,
            Strategy::PickRightLater,
            Strategy::PickAll,
        ] {
            assert_eq!(strategy.to_string().parse::<Strategy>().unwrap(), strategy);
        }
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        assert!("pick-random".parse::<Strategy>().is_err());
    }

    #[test]
    fn default_is_pick_right() {
        assert_eq!(Strategy::default(), Strategy::PickRight);
    }
}
