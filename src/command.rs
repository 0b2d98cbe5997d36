use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::value::HostValue;

/// Commands understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // Time series
    Size,
    Add,
    Exists,
    Rank,
    Get,
    Pop,
    IPop,
    Times,
    ITimes,
    Range,
    IRange,
    Count,
    PopRange,
    IPopRange,

    // Statistics
    Stats,
    IStats,
    MultiStats,

    // Sorted-set helpers
    ZPop,
    ZDiffStore,
    FilterIds,
    Move2Set,
}

/// How many keys a command addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyArity {
    /// Exactly one key
    One,
    /// At least this many keys
    AtLeast(usize),
    /// Exactly this many keys
    Exactly(usize),
}

impl Command {
    pub const ALL: [Command; 21] = [
        Command::Size,
        Command::Add,
        Command::Exists,
        Command::Rank,
        Command::Get,
        Command::Pop,
        Command::IPop,
        Command::Times,
        Command::ITimes,
        Command::Range,
        Command::IRange,
        Command::Count,
        Command::PopRange,
        Command::IPopRange,
        Command::Stats,
        Command::IStats,
        Command::MultiStats,
        Command::ZPop,
        Command::ZDiffStore,
        Command::FilterIds,
        Command::Move2Set,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::Size => "size",
            Command::Add => "add",
            Command::Exists => "exists",
            Command::Rank => "rank",
            Command::Get => "get",
            Command::Pop => "pop",
            Command::IPop => "ipop",
            Command::Times => "times",
            Command::ITimes => "itimes",
            Command::Range => "range",
            Command::IRange => "irange",
            Command::Count => "count",
            Command::PopRange => "pop_range",
            Command::IPopRange => "ipop_range",
            Command::Stats => "stats",
            Command::IStats => "istats",
            Command::MultiStats => "multi_stats",
            Command::ZPop => "zpop",
            Command::ZDiffStore => "zdiffstore",
            Command::FilterIds => "filter_ids",
            Command::Move2Set => "move2set",
        }
    }

    pub fn key_arity(self) -> KeyArity {
        match self {
            Command::MultiStats | Command::Move2Set => KeyArity::AtLeast(1),
            Command::ZDiffStore => KeyArity::AtLeast(2),
            Command::FilterIds => KeyArity::Exactly(2),
            _ => KeyArity::One,
        }
    }

    /// Whether the command changes the store
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Command::Add
                | Command::Pop
                | Command::IPop
                | Command::PopRange
                | Command::IPopRange
                | Command::ZPop
                | Command::ZDiffStore
                | Command::FilterIds
                | Command::Move2Set
        )
    }

    /// Check the number of keys supplied for this command
    pub fn check_keys(self, count: usize) -> Result<(), Error> {
        match self.key_arity() {
            KeyArity::One if count > 1 => Err(Error::command(format!(
                "only one timeseries permitted for command {}",
                self
            ))),
            KeyArity::One if count == 0 => Err(Error::command(format!(
                "command {} requires a key",
                self
            ))),
            KeyArity::AtLeast(n) if count < n => Err(Error::command(format!(
                "command {} requires at least {} keys, got {}",
                self, n, count
            ))),
            KeyArity::Exactly(n) if count != n => Err(Error::command(format!(
                "command {} requires exactly {} keys, got {}",
                self, n, count
            ))),
            _ => Ok(()),
        }
    }
}

/// Positional arguments of one command invocation
#[derive(Debug, Clone, Copy)]
pub struct Args<'a> {
    command: Command,
    values: &'a [HostValue],
}

impl<'a> Args<'a> {
    pub fn new(command: Command, values: &'a [HostValue]) -> Self {
        Args { command, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Require at least `n` arguments
    pub fn require(&self, n: usize) -> Result<(), Error> {
        if self.values.len() < n {
            return Err(Error::command(format!(
                "command {} requires {} arguments, got {}",
                self.command,
                n,
                self.values.len()
            )));
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<&'a HostValue, Error> {
        self.values.get(index).ok_or_else(|| {
            Error::command(format!(
                "command {} is missing argument {}",
                self.command,
                index + 1
            ))
        })
    }

    pub fn optional(&self, index: usize) -> Option<&'a HostValue> {
        self.values.get(index).filter(|v| !v.is_none())
    }

    /// A score bound. Accepts numbers and numeric strings, including infinities.
    pub fn score(&self, index: usize) -> Result<f64, Error> {
        let value = self.get(index)?;
        let score = value.as_float().map_err(|e| self.invalid(index, e))?;
        if score.is_nan() {
            return Err(self.invalid(index, "score is not a number".to_string()));
        }
        Ok(score)
    }

    /// A rank. Negative ranks count from the end.
    pub fn rank(&self, index: usize) -> Result<i64, Error> {
        self.get(index)?
            .as_int()
            .map_err(|e| self.invalid(index, e))
    }

    pub fn text(&self, index: usize) -> Result<&'a str, Error> {
        self.get(index)?.as_str().map_err(|e| self.invalid(index, e))
    }

    pub fn flag(&self, index: usize) -> Result<bool, Error> {
        match self.optional(index) {
            Some(value) => value.as_bool().map_err(|e| self.invalid(index, e)),
            None => Ok(false),
        }
    }

    /// Optional list of field names
    pub fn fields(&self, index: usize) -> Result<Option<Vec<String>>, Error> {
        let Some(value) = self.optional(index) else {
            return Ok(None);
        };
        let items = value.as_list().map_err(|e| self.invalid(index, e))?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .map_err(|e| self.invalid(index, e))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    fn invalid(&self, index: usize, reason: String) -> Error {
        Error::command(format!(
            "invalid argument {} for command {}: {}",
            index + 1,
            self.command,
            reason
        ))
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::command(format!("unknown command '{}'", name)))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        for command in Command::ALL {
            assert_eq!(command.name().parse::<Command>().unwrap(), command);
        }
        assert_eq!("POP_RANGE".parse::<Command>().unwrap(), Command::PopRange);
        assert!("flushall".parse::<Command>().is_err());
    }

    #[test]
    fn test_key_checks() {
        assert!(Command::Size.check_keys(1).is_ok());
        let err = Command::Size.check_keys(2).unwrap_err();
        assert_eq!(err.to_string(), "only one timeseries permitted for command size");
        assert!(Command::Size.check_keys(0).is_err());
        assert!(Command::ZDiffStore.check_keys(1).is_err());
        assert!(Command::ZDiffStore.check_keys(3).is_ok());
        assert!(Command::FilterIds.check_keys(3).is_err());
        assert!(Command::MultiStats.check_keys(4).is_ok());
    }

    #[test]
    fn test_args() {
        let values = vec![
            HostValue::from("-inf"),
            HostValue::Int(-1),
            HostValue::from("1"),
            HostValue::List(vec![HostValue::from("price")]),
        ];
        let args = Args::new(Command::Times, &values);
        assert_eq!(args.score(0).unwrap(), f64::NEG_INFINITY);
        assert_eq!(args.rank(1).unwrap(), -1);
        assert!(args.flag(2).unwrap());
        assert!(!args.flag(7).unwrap());
        assert_eq!(args.fields(3).unwrap(), Some(vec!["price".to_string()]));
        assert!(args.require(5).is_err());

        let err = args.score(3).unwrap_err();
        assert!(err.to_string().contains("invalid argument 4 for command times"));
    }
}
