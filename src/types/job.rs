//! Jobs and configurations.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AcceptError, AcceptResult};

/// One unit of dispatchable work: a named handler plus its arguments.
///
/// The handler is referenced by name so a job can be written to disk and
/// executed by a worker process on another machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Name of the registered handler.
    pub function: String,

    /// Arguments, as a JSON object.
    pub args: Value,
}

impl Job {
    /// Creates a job from any serializable argument struct.
    ///
    /// Fails with [`AcceptError::UnhashableArgument`] if the arguments do not
    /// serialize to JSON (for example a map with non-string keys).
    pub fn new<A: Serialize>(function: impl Into<String>, args: &A) -> AcceptResult<Self> {
        let function = function.into();
        let args = serde_json::to_value(args).map_err(|e| {
            AcceptError::UnhashableArgument(format!("{function}: {e}"))
        })?;
        Ok(Self { function, args })
    }

    /// Decodes the arguments back into a typed struct.
    pub fn decode_args<A: for<'de> Deserialize<'de>>(&self) -> AcceptResult<A> {
        serde_json::from_value(self.args.clone()).map_err(|e| AcceptError::JobFailed {
            function: self.function.clone(),
            message: format!("malformed arguments: {e}"),
        })
    }
}

/// Knob settings defining one program variant.
///
/// Knob identifiers map to approximation levels. The empty configuration is
/// the precise baseline. Ordered so that hashing and display are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration(BTreeMap<String, i64>);

impl Configuration {
    /// The precise baseline.
    pub fn precise() -> Self {
        Self::default()
    }

    /// Builds a configuration from knob/level pairs.
    pub fn from_knobs<I, K>(knobs: I) -> Self
    where
        I: IntoIterator<Item = (K, i64)>,
        K: Into<String>,
    {
        Self(knobs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// True for the precise baseline.
    pub fn is_precise(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates knob/level pairs in knob order.
    pub fn knobs(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Stable key used in reports.
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// Contents of the knob file handed to the compiler: `knob level` lines.
    pub fn to_knob_file(&self) -> String {
        let mut out = String::new();
        for (knob, level) in self.knobs() {
            out.push_str(knob);
            out.push(' ');
            out.push_str(&level.to_string());
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_precise() {
            return write!(f, "precise");
        }
        let parts: Vec<String> = self.knobs().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}", parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_configuration_display_is_order_independent() {
        let a = Configuration::from_knobs([("loop.c:12", 2), ("kmeans.c:40", 1)]);
        let b = Configuration::from_knobs([("kmeans.c:40", 1), ("loop.c:12", 2)]);

        assert_eq!(a, b);
        assert_eq!(a.key(), "kmeans.c:40=1,loop.c:12=2");
        assert_eq!(Configuration::precise().key(), "precise");
    }

    #[test]
    fn test_knob_file() {
        let config = Configuration::from_knobs([("b", 3), ("a", 1)]);
        assert_eq!(config.to_knob_file(), "a 1\nb 3\n");
        assert_eq!(Configuration::precise().to_knob_file(), "");
    }

    #[test]
    fn test_job_rejects_non_string_keys() {
        let mut args: HashMap<(u8, u8), u8> = HashMap::new();
        args.insert((1, 2), 3);

        let err = Job::new("build", &args).unwrap_err();
        assert!(matches!(err, AcceptError::UnhashableArgument(_)));
    }

    #[test]
    fn test_decode_args() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Args {
            rep: usize,
        }

        let job = Job::new("run", &Args { rep: 2 }).unwrap();
        let back: Args = job.decode_args().unwrap();
        assert_eq!(back, Args { rep: 2 });
    }
}
