use chrono::Duration;
use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize};
use std::{collections::HashSet, fmt, sync::Mutex};

/// A traded pair such as `BTC/USDT`, in the provider-neutral slash form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Symbol(&'static str);

impl<'de> Deserialize<'de> for Symbol {
    #[inline]
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Symbol::new)
    }
}

impl Symbol {
    // Flyweight pattern
    // Leaks memory if and only if no symbol with the same name exists.
    // This allows us to pass the symbol name as a static str, which in turn
    // enables implementing Copy.
    pub fn new<R: AsRef<str>>(name: R) -> Self {
        static SET: Lazy<Mutex<HashSet<&'static str>>> = Lazy::new(|| Mutex::new(HashSet::new()));
        let mut set = SET.lock().unwrap();
        if !set.contains(name.as_ref()) {
            let leaked: &'static str = Box::leak(name.as_ref().to_owned().into_boxed_str());
            set.insert(leaked);
        }

        Symbol(set.get(name.as_ref()).unwrap())
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Width of one bar bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H8,
    H12,
    D1,
    W1,
}

impl Timeframe {
    pub fn duration(&self) -> Duration {
        match self {
            Self::M1 => Duration::minutes(1),
            Self::M3 => Duration::minutes(3),
            Self::M5 => Duration::minutes(5),
            Self::M15 => Duration::minutes(15),
            Self::M30 => Duration::minutes(30),
            Self::H1 => Duration::hours(1),
            Self::H2 => Duration::hours(2),
            Self::H4 => Duration::hours(4),
            Self::H6 => Duration::hours(6),
            Self::H8 => Duration::hours(8),
            Self::H12 => Duration::hours(12),
            Self::D1 => Duration::days(1),
            Self::W1 => Duration::weeks(1),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::M1 => "1m",
            Self::M3 => "3m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H2 => "2h",
            Self::H4 => "4h",
            Self::H6 => "6h",
            Self::H8 => "8h",
            Self::H12 => "12h",
            Self::D1 => "1d",
            Self::W1 => "1w",
        };
        write!(f, "{}", label)
    }
}

/// Identity of one watched bar series. Equality and hashing are structural
/// over both fields, so two keys for the same symbol and timeframe are the
/// same key wherever they were constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
}

impl SeriesKey {
    pub fn new<R: AsRef<str>>(symbol: R, timeframe: Timeframe) -> Self {
        SeriesKey {
            symbol: Symbol::new(symbol),
            timeframe,
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}
